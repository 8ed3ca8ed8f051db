//! Concatenate several PDFs into one document.
//!
//! Each source is renumbered above the objects already taken, its pages are
//! re-parented under a single new page tree, and everything the old catalogs
//! and page trees kept alive is pruned. Attributes a page inherited from its
//! old tree (`MediaBox`, `CropBox`, `Resources`, `Rotate`) are copied onto the
//! page first, so trimming and rendering see the same page as before.

use crate::error::RotoError;
use crate::pipeline::trim::{load, write_atomically, MAX_TREE_DEPTH};
use lopdf::{dictionary, Document, Object, ObjectId};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const INHERITED_KEYS: [&[u8]; 4] = [b"MediaBox", b"CropBox", b"Resources", b"Rotate"];

/// Merge `inputs`, in order, into `output` (written atomically).
///
/// Returns the page count of the merged document. Encrypted sources are
/// refused, since their streams cannot be moved without decrypting them.
pub async fn merge_pdfs(inputs: &[PathBuf], output: &Path) -> Result<usize, RotoError> {
    if inputs.is_empty() {
        return Err(RotoError::InvalidConfig("Nothing to merge".into()));
    }
    let inputs = inputs.to_vec();
    let output = output.to_path_buf();
    tokio::task::spawn_blocking(move || merge_blocking(&inputs, &output))
        .await
        .map_err(|e| RotoError::Internal(format!("merge task failed: {e}")))?
}

fn merge_blocking(inputs: &[PathBuf], output: &Path) -> Result<usize, RotoError> {
    let mut merged = Document::with_version("1.4");
    let mut next_id = 1;
    let mut kids: Vec<ObjectId> = Vec::new();

    for path in inputs {
        let corrupt = |detail: String| RotoError::CorruptPdf {
            path: path.clone(),
            detail,
        };
        let mut doc = load(path)?;
        if doc.trailer.get(b"Encrypt").is_ok() {
            return Err(corrupt("encrypted documents cannot be merged".into()));
        }

        doc.renumber_objects_with(next_id);
        next_id = doc.max_id + 1;

        let pages: Vec<ObjectId> = doc.get_pages().into_values().collect();
        if pages.is_empty() {
            return Err(corrupt("document has no pages".into()));
        }
        for &id in &pages {
            let inherited = inherited_attributes(&doc, id);
            let page = doc
                .get_object_mut(id)
                .and_then(Object::as_dict_mut)
                .map_err(|e| corrupt(format!("page object {id:?}: {e}")))?;
            for (key, value) in inherited {
                page.set(key, value);
            }
        }

        if doc.version > merged.version {
            merged.version = doc.version.clone();
        }
        debug!("{}: {} pages", path.display(), pages.len());
        kids.extend(pages);
        merged.objects.extend(doc.objects);
    }

    let pages_id: ObjectId = (next_id, 0);
    let catalog_id: ObjectId = (next_id + 1, 0);
    for &id in &kids {
        if let Ok(page) = merged.get_object_mut(id).and_then(Object::as_dict_mut) {
            page.set("Parent", pages_id);
        }
    }

    let count = kids.len();
    merged.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids.into_iter().map(Object::Reference).collect::<Vec<_>>(),
            "Count" => count as i64,
        }),
    );
    merged.objects.insert(
        catalog_id,
        Object::Dictionary(dictionary! { "Type" => "Catalog", "Pages" => pages_id }),
    );
    merged.trailer.set("Root", catalog_id);
    merged.max_id = next_id + 1;
    merged.prune_objects();

    write_atomically(&mut merged, output)?;
    info!("Merged {} files ({} pages) → {}", inputs.len(), count, output.display());
    Ok(count)
}

/// Inheritable attributes the page does not set itself, from the nearest ancestor.
fn inherited_attributes(doc: &Document, page_id: ObjectId) -> Vec<(Vec<u8>, Object)> {
    let Ok(page) = doc.get_dictionary(page_id) else {
        return Vec::new();
    };
    let mut missing: Vec<&[u8]> = INHERITED_KEYS
        .iter()
        .copied()
        .filter(|key| !page.has(key))
        .collect();
    let mut found = Vec::new();
    let mut parent = page.get(b"Parent").and_then(Object::as_reference).ok();

    for _ in 0..MAX_TREE_DEPTH {
        let Some(id) = parent.filter(|_| !missing.is_empty()) else {
            break;
        };
        let Ok(node) = doc.get_dictionary(id) else {
            break;
        };
        missing.retain(|key| match node.get(key) {
            Ok(value) => {
                found.push((key.to_vec(), value.clone()));
                false
            }
            Err(_) => true,
        });
        parent = node.get(b"Parent").and_then(Object::as_reference).ok();
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::trim::read_document_info;
    use lopdf::{Dictionary, Stream};

    /// One page whose MediaBox and Resources sit on the Pages node.
    fn one_page(path: &Path, width: i64, marker: &str) {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });
        let content = format!("BT /F1 12 Tf 20 20 Td ({marker}) Tj ET");
        let content_id = doc.add_object(Stream::new(Dictionary::new(), content.into_bytes()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => Object::Integer(1),
                "MediaBox" => vec![Object::Integer(0), Object::Integer(0), width.into(), Object::Integer(400)],
                "Resources" => dictionary! { "Font" => dictionary! { "F1" => font_id } },
            }),
        );
        let catalog_id = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
        doc.trailer.set("Root", catalog_id);
        doc.save(path).unwrap();
    }

    #[tokio::test]
    async fn two_single_pages_become_one_document() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.pdf");
        let b = dir.path().join("b.pdf");
        one_page(&a, 300, "first");
        one_page(&b, 500, "second");
        let out = dir.path().join("out/merged.pdf");

        let pages = merge_pdfs(&[a, b], &out).await.unwrap();
        assert_eq!(pages, 2);

        let doc = Document::load(&out).unwrap();
        assert_eq!(doc.get_pages().len(), 2);
        assert_eq!(doc.version, "1.5");

        // Inherited boxes travel with their page, in input order.
        let info = read_document_info(&out).await.unwrap();
        let widths: Vec<f64> = info.pages.iter().map(|p| p.media_box.unwrap().width()).collect();
        assert_eq!(widths, vec![300.0, 500.0]);

        // Each page still finds its own font.
        for (_, id) in doc.get_pages() {
            let page = doc.get_dictionary(id).unwrap();
            assert!(page.get(b"Resources").is_ok());
            let content = doc.get_page_content(id).unwrap();
            assert!(!content.is_empty());
        }
    }

    #[tokio::test]
    async fn nothing_to_merge_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let err = merge_pdfs(&[], &dir.path().join("m.pdf")).await.unwrap_err();
        assert!(matches!(err, RotoError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn corrupt_source_names_the_file_and_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.pdf");
        one_page(&good, 300, "ok");
        let bad = dir.path().join("bad.pdf");
        std::fs::write(&bad, b"%PDF-1.4\nno objects here").unwrap();
        let out = dir.path().join("m.pdf");

        match merge_pdfs(&[good, bad.clone()], &out).await.unwrap_err() {
            RotoError::CorruptPdf { path, .. } => assert_eq!(path, bad),
            other => panic!("unexpected: {other}"),
        }
        assert!(!out.exists());
    }
}
