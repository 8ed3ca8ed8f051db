//! Bleed and crop-mark removal.
//!
//! Print PDFs carry a few millimetres of bleed and often printer marks
//! outside the final page. For distribution every page is cut back to its
//! finished size:
//!
//! | Page has        | Kept rectangle                         |
//! |-----------------|----------------------------------------|
//! | `TrimBox`       | the TrimBox, unchanged                 |
//! | `BleedBox`      | BleedBox shrunk by the bleed           |
//! | `CropBox`       | CropBox shrunk by the bleed            |
//! | only `MediaBox` | MediaBox shrunk by the bleed           |
//!
//! The kept rectangle is written to all four boxes so every viewer and RIP
//! agrees on the page size. `MediaBox` and `CropBox` are inheritable and are
//! looked up through the page tree.

use crate::error::RotoError;
use lopdf::{Dictionary, Document, Object, ObjectId};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Points per millimetre.
pub const MM_TO_PT: f64 = 72.0 / 25.4;

/// Page-tree depth after which a `Parent` chain is assumed to be cyclic.
pub(crate) const MAX_TREE_DEPTH: usize = 64;

/// A PDF rectangle in points, normalised so `left < right` and `bottom < top`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Rect {
    pub left: f64,
    pub bottom: f64,
    pub right: f64,
    pub top: f64,
}

impl Rect {
    /// Build from any two opposite corners.
    pub fn from_corners(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self {
            left: x1.min(x2),
            bottom: y1.min(y2),
            right: x1.max(x2),
            top: y1.max(y2),
        }
    }

    pub fn width(&self) -> f64 {
        self.right - self.left
    }

    pub fn height(&self) -> f64 {
        self.top - self.bottom
    }

    /// Shrink by `margin` on every side; `None` when nothing is left.
    pub fn inset(&self, margin: f64) -> Option<Rect> {
        let r = Rect {
            left: self.left + margin,
            bottom: self.bottom + margin,
            right: self.right - margin,
            top: self.top - margin,
        };
        (r.right > r.left && r.top > r.bottom).then_some(r)
    }

    fn to_object(self) -> Object {
        Object::Array(
            [self.left, self.bottom, self.right, self.top]
                .into_iter()
                .map(|v| Object::Real(v as f32))
                .collect(),
        )
    }
}

/// The page boxes defined by the PDF format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BoxKind {
    TrimBox,
    BleedBox,
    CropBox,
    MediaBox,
}

impl BoxKind {
    pub fn key(self) -> &'static [u8] {
        match self {
            BoxKind::TrimBox => b"TrimBox",
            BoxKind::BleedBox => b"BleedBox",
            BoxKind::CropBox => b"CropBox",
            BoxKind::MediaBox => b"MediaBox",
        }
    }

    fn inheritable(self) -> bool {
        matches!(self, BoxKind::CropBox | BoxKind::MediaBox)
    }
}

/// The boxes a page defines (directly or inherited), 1-based page number.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageBoxes {
    pub page: u32,
    pub media_box: Option<Rect>,
    pub crop_box: Option<Rect>,
    pub bleed_box: Option<Rect>,
    pub trim_box: Option<Rect>,
}

/// What trimming did to one page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageTrim {
    pub page: u32,
    pub source: BoxKind,
    pub rect: Rect,
}

/// Pick the rectangle to keep for one page.
pub fn pick_trim_box(boxes: &PageBoxes, bleed_mm: f64) -> Result<(Rect, BoxKind), RotoError> {
    let margin = bleed_mm * MM_TO_PT;
    let (base, source, margin) = if let Some(r) = boxes.trim_box {
        (r, BoxKind::TrimBox, 0.0)
    } else if let Some(r) = boxes.bleed_box {
        (r, BoxKind::BleedBox, margin)
    } else if let Some(r) = boxes.crop_box {
        (r, BoxKind::CropBox, margin)
    } else if let Some(r) = boxes.media_box {
        (r, BoxKind::MediaBox, margin)
    } else {
        return Err(RotoError::CorruptPdf {
            path: PathBuf::new(),
            detail: format!("page {} has no MediaBox", boxes.page),
        });
    };

    match base.inset(margin) {
        Some(rect) => Ok((rect, source)),
        None => Err(RotoError::BleedTooLarge {
            page: boxes.page,
            box_kind: source,
            bleed_mm,
        }),
    }
}

/// Read the four boxes of `page_id`.
pub fn read_page_boxes(doc: &Document, page: u32, page_id: ObjectId) -> PageBoxes {
    PageBoxes {
        page,
        media_box: find_box(doc, page_id, BoxKind::MediaBox),
        crop_box: find_box(doc, page_id, BoxKind::CropBox),
        bleed_box: find_box(doc, page_id, BoxKind::BleedBox),
        trim_box: find_box(doc, page_id, BoxKind::TrimBox),
    }
}

fn find_box(doc: &Document, page_id: ObjectId, kind: BoxKind) -> Option<Rect> {
    let mut node: &Dictionary = doc.get_dictionary(page_id).ok()?;
    for _ in 0..MAX_TREE_DEPTH {
        if let Ok(obj) = node.get(kind.key()) {
            return rect_from_object(doc, obj);
        }
        if !kind.inheritable() {
            return None;
        }
        let parent = node.get(b"Parent").and_then(Object::as_reference).ok()?;
        node = doc.get_dictionary(parent).ok()?;
    }
    None
}

fn rect_from_object(doc: &Document, obj: &Object) -> Option<Rect> {
    let (_, obj) = doc.dereference(obj).ok()?;
    let arr = obj.as_array().ok()?;
    if arr.len() != 4 {
        return None;
    }
    let mut v = [0f64; 4];
    for (slot, item) in v.iter_mut().zip(arr) {
        let (_, item) = doc.dereference(item).ok()?;
        *slot = match item {
            Object::Integer(i) => *i as f64,
            Object::Real(r) => f64::from(*r),
            _ => return None,
        };
    }
    Some(Rect::from_corners(v[0], v[1], v[2], v[3]))
}

pub(crate) fn load(path: &Path) -> Result<Document, RotoError> {
    Document::load(path).map_err(|e| RotoError::CorruptPdf {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })
}

/// Trim every page of `input` and write the result to `output` atomically.
pub async fn clean_pdf(input: &Path, output: &Path, bleed_mm: f64) -> Result<Vec<PageTrim>, RotoError> {
    let input = input.to_path_buf();
    let output = output.to_path_buf();
    tokio::task::spawn_blocking(move || clean_pdf_blocking(&input, &output, bleed_mm))
        .await
        .map_err(|e| RotoError::Internal(format!("trim task failed: {e}")))?
}

fn clean_pdf_blocking(input: &Path, output: &Path, bleed_mm: f64) -> Result<Vec<PageTrim>, RotoError> {
    let mut doc = load(input)?;

    let mut trims = Vec::new();
    for (page, page_id) in doc.get_pages() {
        let boxes = read_page_boxes(&doc, page, page_id);
        let (rect, source) = pick_trim_box(&boxes, bleed_mm).map_err(|e| match e {
            RotoError::CorruptPdf { detail, .. } => RotoError::CorruptPdf {
                path: input.to_path_buf(),
                detail,
            },
            other => other,
        })?;
        trims.push((page_id, PageTrim { page, source, rect }));
    }

    for (page_id, trim) in &trims {
        let dict = doc
            .get_object_mut(*page_id)
            .and_then(Object::as_dict_mut)
            .map_err(|e| RotoError::CorruptPdf {
                path: input.to_path_buf(),
                detail: format!("page {}: {e}", trim.page),
            })?;
        for kind in [BoxKind::MediaBox, BoxKind::CropBox, BoxKind::TrimBox, BoxKind::BleedBox] {
            dict.set(kind.key(), trim.rect.to_object());
        }
        debug!("Page {}: using {:?}", trim.page, trim.source);
    }

    write_atomically(&mut doc, output)?;
    info!("Trimmed {} pages → {}", trims.len(), output.display());
    Ok(trims.into_iter().map(|(_, t)| t).collect())
}

/// Save through a temp file in the destination directory, then rename.
pub(crate) fn write_atomically(doc: &mut Document, output: &Path) -> Result<(), RotoError> {
    let write_err = |source: std::io::Error| RotoError::OutputWriteFailed {
        path: output.to_path_buf(),
        source,
    };
    let parent = output
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent).map_err(write_err)?;

    let tmp = tempfile::Builder::new()
        .prefix(".roto-")
        .suffix(".pdf")
        .tempfile_in(parent)
        .map_err(write_err)?;
    doc.save(tmp.path()).map_err(|e| write_err(std::io::Error::other(e.to_string())))?;
    tmp.persist(output).map_err(|e| write_err(e.error))?;
    Ok(())
}

/// Page boxes and basic facts, without modifying anything.
pub async fn read_document_info(path: &Path) -> Result<crate::output::DocumentInfo, RotoError> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let doc = load(&path)?;
        let file_size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        let pages: Vec<PageBoxes> = doc
            .get_pages()
            .into_iter()
            .map(|(n, id)| read_page_boxes(&doc, n, id))
            .collect();
        Ok(crate::output::DocumentInfo {
            path: path.clone(),
            pdf_version: doc.version.clone(),
            page_count: pages.len(),
            file_size,
            encrypted: doc.trailer.get(b"Encrypt").is_ok(),
            pages,
        })
    })
    .await
    .map_err(|e| RotoError::Internal(format!("inspect task failed: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::dictionary;

    fn rect(l: f64, b: f64, r: f64, t: f64) -> Rect {
        Rect { left: l, bottom: b, right: r, top: t }
    }

    fn boxes() -> PageBoxes {
        PageBoxes {
            page: 1,
            media_box: Some(rect(0.0, 0.0, 612.0, 792.0)),
            crop_box: None,
            bleed_box: None,
            trim_box: None,
        }
    }

    fn nums(r: Rect) -> Object {
        Object::Array(vec![
            Object::Real(r.left as f32),
            Object::Real(r.bottom as f32),
            Object::Real(r.right as f32),
            Object::Real(r.top as f32),
        ])
    }

    /// Two pages; MediaBox on the Pages node, one page with its own TrimBox.
    fn fixture(path: &Path) {
        let mut doc = Document::with_version("1.6");
        let pages_id = doc.new_object_id();
        let content_id = doc.add_object(lopdf::Stream::new(Dictionary::new(), b"".to_vec()));
        let p1 = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "TrimBox" => nums(rect(20.0, 20.0, 300.0, 400.0)),
        });
        let p2 = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![p1.into(), p2.into()],
                "Count" => Object::Integer(2),
                "MediaBox" => vec![Object::Integer(0), Object::Integer(0), Object::Integer(340), Object::Integer(440)],
            }),
        );
        let catalog = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
        doc.trailer.set("Root", catalog);
        doc.save(path).unwrap();
    }

    #[test]
    fn trim_box_is_kept_as_is() {
        let b = PageBoxes {
            trim_box: Some(rect(10.0, 10.0, 100.0, 100.0)),
            bleed_box: Some(rect(0.0, 0.0, 110.0, 110.0)),
            ..boxes()
        };
        let (r, src) = pick_trim_box(&b, 3.0).unwrap();
        assert_eq!(src, BoxKind::TrimBox);
        assert_eq!(r, rect(10.0, 10.0, 100.0, 100.0));
    }

    #[test]
    fn bleed_box_preferred_over_crop_and_media() {
        let b = PageBoxes {
            bleed_box: Some(rect(0.0, 0.0, 200.0, 200.0)),
            crop_box: Some(rect(5.0, 5.0, 195.0, 195.0)),
            ..boxes()
        };
        let (r, src) = pick_trim_box(&b, 25.4).unwrap();
        assert_eq!(src, BoxKind::BleedBox);
        assert!((r.left - 72.0).abs() < 1e-9);
        assert!((r.right - 128.0).abs() < 1e-9);
    }

    #[test]
    fn media_box_shrunk_by_bleed() {
        let (r, src) = pick_trim_box(&boxes(), 3.0).unwrap();
        assert_eq!(src, BoxKind::MediaBox);
        let m = 3.0 * MM_TO_PT;
        assert!((r.width() - (612.0 - 2.0 * m)).abs() < 1e-9);
        assert!((r.height() - (792.0 - 2.0 * m)).abs() < 1e-9);
    }

    #[test]
    fn bleed_too_large() {
        let b = PageBoxes {
            media_box: Some(rect(0.0, 0.0, 10.0, 10.0)),
            ..boxes()
        };
        match pick_trim_box(&b, 5.0).unwrap_err() {
            RotoError::BleedTooLarge { page, box_kind, .. } => {
                assert_eq!(page, 1);
                assert_eq!(box_kind, BoxKind::MediaBox);
            }
            other => panic!("unexpected: {other}"),
        }
    }

    #[test]
    fn zero_bleed_keeps_media_box() {
        let (r, _) = pick_trim_box(&boxes(), 0.0).unwrap();
        assert_eq!(r, rect(0.0, 0.0, 612.0, 792.0));
    }

    #[test]
    fn rect_normalises_corners() {
        assert_eq!(Rect::from_corners(10.0, 20.0, 0.0, 5.0), rect(0.0, 5.0, 10.0, 20.0));
        assert!(rect(0.0, 0.0, 4.0, 4.0).inset(2.0).is_none());
    }

    #[tokio::test]
    async fn clean_pdf_sets_all_boxes() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.pdf");
        let output = dir.path().join("out/in-net.pdf");
        fixture(&input);

        let trims = clean_pdf(&input, &output, 10.0).await.unwrap();
        assert_eq!(trims.len(), 2);
        assert_eq!(trims[0].source, BoxKind::TrimBox);
        // Page 2 inherits the MediaBox from the page tree.
        assert_eq!(trims[1].source, BoxKind::MediaBox);

        let info = read_document_info(&output).await.unwrap();
        assert_eq!(info.page_count, 2);
        let p2 = &info.pages[1];
        let expected = trims[1].rect;
        for b in [p2.media_box, p2.crop_box, p2.bleed_box, p2.trim_box] {
            let b = b.unwrap();
            assert!((b.left - expected.left).abs() < 1e-3);
            assert!((b.top - expected.top).abs() < 1e-3);
        }
    }

    #[tokio::test]
    async fn clean_pdf_failure_leaves_no_output() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.pdf");
        let output = dir.path().join("in-net.pdf");
        fixture(&input);

        let err = clean_pdf(&input, &output, 500.0).await.unwrap_err();
        assert!(matches!(err, RotoError::BleedTooLarge { page: 2, .. }));
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn unparsable_input_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("bad.pdf");
        std::fs::write(&input, b"%PDF-1.4\nthis is not a pdf body").unwrap();
        let err = read_document_info(&input).await.unwrap_err();
        assert!(matches!(err, RotoError::CorruptPdf { .. }));
    }
}
