//! In-process operations that strategies can use instead of an external tool.
//!
//! All of them are blocking (lopdf and image decoding are CPU-bound), so
//! [`run`] moves the work onto tokio's blocking pool.
//!
//! * [`BuiltinOp::PassThrough`]: copy, the last rung of the vector ladder.
//! * [`BuiltinOp::RecompressImages`]: re-encode raster images as JPEG.
//! * [`BuiltinOp::AssembleJpegPages`]: rebuild a PDF from rasterised pages.

use crate::pipeline::strategy::BuiltinOp;
use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, DynamicImage, GrayImage, ImageFormat, RgbImage};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};
use std::collections::HashSet;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Images smaller than this on either side are logos and rules; recompressing
/// them saves nothing and often grows them.
pub const MIN_IMAGE_SIDE: u32 = 100;

/// How far from the end of the file `%%EOF` may sit.
const EOF_WINDOW: u64 = 1024;

/// Parameters builtins read from the job profile.
#[derive(Debug, Clone, Copy)]
pub struct BuiltinParams {
    pub quality: u8,
    pub dpi: u32,
    pub image_scale: f32,
}

/// Run `op` from `input` to `output` on the blocking pool.
///
/// Returns a one-line summary for the attempt diagnostics, or the failure detail.
pub async fn run(
    op: BuiltinOp,
    input: &Path,
    output: &Path,
    params: BuiltinParams,
) -> Result<String, String> {
    let input = input.to_path_buf();
    let output = output.to_path_buf();
    tokio::task::spawn_blocking(move || match op {
        BuiltinOp::PassThrough => pass_through(&input, &output),
        BuiltinOp::RecompressImages => recompress_images(&input, &output, &params),
        BuiltinOp::AssembleJpegPages => assemble_jpeg_pages(&input, &output, params.dpi),
    })
    .await
    .map_err(|e| format!("{op} task failed: {e}"))?
}

// ── Pass-through ─────────────────────────────────────────────────────────

fn pass_through(input: &Path, output: &Path) -> Result<String, String> {
    let n = std::fs::copy(input, output).map_err(|e| format!("copy failed: {e}"))?;
    Ok(format!("copied {n} bytes unchanged"))
}

// ── Image recompression ──────────────────────────────────────────────────

#[derive(Debug, Default)]
struct RecompressStats {
    total: usize,
    replaced: usize,
    bytes_before: usize,
    bytes_after: usize,
}

fn recompress_images(input: &Path, output: &Path, params: &BuiltinParams) -> Result<String, String> {
    let mut doc = Document::load(input).map_err(|e| format!("failed to load PDF: {e}"))?;
    let quality = params.quality.clamp(1, 95);

    let image_ids: Vec<ObjectId> = doc
        .objects
        .iter()
        .filter_map(|(id, obj)| match obj {
            Object::Stream(s) if is_image(&s.dict) => Some(*id),
            _ => None,
        })
        .collect();

    // Soft masks are images too, but belong to their parent image.
    let masks: HashSet<ObjectId> = image_ids
        .iter()
        .filter_map(|id| match doc.get_object(*id) {
            Ok(Object::Stream(s)) => s.dict.get(b"SMask").and_then(Object::as_reference).ok(),
            _ => None,
        })
        .collect();

    let mut stats = RecompressStats::default();
    for id in image_ids.into_iter().filter(|id| !masks.contains(id)) {
        let Ok(Object::Stream(stream)) = doc.get_object_mut(id) else {
            continue;
        };
        stats.total += 1;
        let before = stream.content.len();
        match recompress_stream(stream, quality, params.image_scale) {
            Ok(true) => {
                stats.replaced += 1;
                stats.bytes_before += before;
                stats.bytes_after += stream.content.len();
            }
            Ok(false) => {}
            Err(e) => debug!("Image {:?} left untouched: {}", id, e),
        }
    }

    doc.compress();
    doc.save(output).map_err(|e| format!("failed to save PDF: {e}"))?;

    Ok(format!(
        "recompressed {} of {} images ({} → {} bytes)",
        stats.replaced, stats.total, stats.bytes_before, stats.bytes_after
    ))
}

fn is_image(dict: &Dictionary) -> bool {
    matches!(dict.get(b"Subtype"), Ok(Object::Name(n)) if n == b"Image")
}

fn dict_u32(dict: &Dictionary, key: &[u8]) -> Option<u32> {
    match dict.get(key).ok()? {
        Object::Integer(n) if *n > 0 => u32::try_from(*n).ok(),
        _ => None,
    }
}

fn dict_name<'a>(dict: &'a Dictionary, key: &[u8]) -> Option<&'a [u8]> {
    match dict.get(key).ok()? {
        Object::Name(n) => Some(n.as_slice()),
        // A one-element filter array is common; longer chains are left alone.
        Object::Array(arr) if arr.len() == 1 => match &arr[0] {
            Object::Name(n) => Some(n.as_slice()),
            _ => None,
        },
        _ => None,
    }
}

/// Replace one image stream with a smaller JPEG.
///
/// `Ok(false)` means the image was skipped on purpose (unsupported kind, too
/// small, or the JPEG would not be smaller).
fn recompress_stream(stream: &mut Stream, quality: u8, scale: f32) -> Result<bool, String> {
    let dict = &stream.dict;
    let (Some(width), Some(height)) = (dict_u32(dict, b"Width"), dict_u32(dict, b"Height")) else {
        return Ok(false);
    };
    if width < MIN_IMAGE_SIDE || height < MIN_IMAGE_SIDE {
        return Ok(false);
    }
    if matches!(dict.get(b"ImageMask"), Ok(Object::Boolean(true))) {
        return Ok(false);
    }
    if dict_u32(dict, b"BitsPerComponent").unwrap_or(8) != 8 {
        return Ok(false);
    }
    // Soft masks are referenced from images; their geometry must not change.
    if dict.get(b"SMask").is_ok() || dict.get(b"Mask").is_ok() {
        return Ok(false);
    }

    // Only device colour spaces are safe to re-encode without colour management.
    let gray = match dict_name(dict, b"ColorSpace") {
        Some(b"DeviceRGB") => false,
        Some(b"DeviceGray") => true,
        _ => return Ok(false),
    };

    let decoded = match dict.get(b"Filter").ok() {
        None => raw_to_image(&stream.content, width, height, gray)?,
        Some(_) => match dict_name(dict, b"Filter") {
            Some(b"DCTDecode") => {
                image::load_from_memory_with_format(&stream.content, ImageFormat::Jpeg)
                    .map_err(|e| format!("JPEG decode: {e}"))?
            }
            Some(b"FlateDecode") => {
                let raw = stream
                    .decompressed_content()
                    .map_err(|e| format!("Flate decode: {e}"))?;
                raw_to_image(&raw, width, height, gray)?
            }
            _ => return Ok(false),
        },
    };

    let img = scale_image(decoded, scale);
    let img = match img.color() {
        ColorType::L8 | ColorType::Rgb8 => img,
        _ if gray => DynamicImage::ImageLuma8(img.to_luma8()),
        _ => DynamicImage::ImageRgb8(img.to_rgb8()),
    };
    let encoded = encode_jpeg(&img, quality)?;
    if encoded.len() >= stream.content.len() {
        return Ok(false);
    }

    let color_space = if matches!(img, DynamicImage::ImageLuma8(_)) {
        "DeviceGray"
    } else {
        "DeviceRGB"
    };
    let dict = &mut stream.dict;
    dict.set("Filter", Object::Name(b"DCTDecode".to_vec()));
    dict.set("Width", Object::Integer(i64::from(img.width())));
    dict.set("Height", Object::Integer(i64::from(img.height())));
    dict.set("ColorSpace", Object::Name(color_space.as_bytes().to_vec()));
    dict.set("BitsPerComponent", Object::Integer(8));
    dict.remove(b"DecodeParms");
    dict.remove(b"Decode");
    stream.set_content(encoded);
    stream.allows_compression = false;
    Ok(true)
}

fn raw_to_image(data: &[u8], width: u32, height: u32, gray: bool) -> Result<DynamicImage, String> {
    let channels = if gray { 1 } else { 3 };
    let expected = width as usize * height as usize * channels;
    if data.len() < expected {
        return Err(format!("{} bytes of samples, expected {}", data.len(), expected));
    }
    let samples = data[..expected].to_vec();
    if gray {
        GrayImage::from_raw(width, height, samples)
            .map(DynamicImage::ImageLuma8)
            .ok_or_else(|| "gray buffer size mismatch".to_string())
    } else {
        RgbImage::from_raw(width, height, samples)
            .map(DynamicImage::ImageRgb8)
            .ok_or_else(|| "RGB buffer size mismatch".to_string())
    }
}

fn scale_image(img: DynamicImage, scale: f32) -> DynamicImage {
    if !(scale > 0.0 && scale < 1.0) {
        return img;
    }
    let w = ((img.width() as f32 * scale).round() as u32).max(1);
    let h = ((img.height() as f32 * scale).round() as u32).max(1);
    img.resize_exact(w, h, image::imageops::FilterType::Lanczos3)
}

fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, String> {
    let mut buf = Vec::new();
    img.write_with_encoder(JpegEncoder::new_with_quality(&mut buf, quality))
        .map_err(|e| format!("JPEG encode: {e}"))?;
    Ok(buf)
}

// ── Page assembly ────────────────────────────────────────────────────────

/// Page images in a directory, in file-name order.
fn page_images(dir: &Path) -> Result<Vec<PathBuf>, String> {
    let entries =
        std::fs::read_dir(dir).map_err(|e| format!("cannot read {}: {e}", dir.display()))?;
    let mut pages: Vec<PathBuf> = entries
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .map(|e| e.eq_ignore_ascii_case("jpg") || e.eq_ignore_ascii_case("jpeg"))
                .unwrap_or(false)
        })
        .collect();
    pages.sort();
    Ok(pages)
}

fn assemble_jpeg_pages(dir: &Path, output: &Path, dpi: u32) -> Result<String, String> {
    let pages = page_images(dir)?;
    if pages.is_empty() {
        return Err(format!("no page images in {}", dir.display()));
    }
    let dpi = f64::from(dpi.max(1));

    let mut doc = Document::with_version("1.4");
    let pages_id = doc.new_object_id();
    let mut kids: Vec<Object> = Vec::with_capacity(pages.len());

    for path in &pages {
        let bytes = std::fs::read(path).map_err(|e| format!("cannot read {}: {e}", path.display()))?;
        let img = image::load_from_memory_with_format(&bytes, ImageFormat::Jpeg)
            .map_err(|e| format!("{} is not a readable JPEG: {e}", path.display()))?;
        let (w, h) = (img.width(), img.height());
        let color_space = match img.color().channel_count() {
            1 => "DeviceGray",
            _ => "DeviceRGB",
        };

        let mut image = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => Object::Integer(i64::from(w)),
                "Height" => Object::Integer(i64::from(h)),
                "ColorSpace" => color_space,
                "BitsPerComponent" => Object::Integer(8),
                "Filter" => "DCTDecode",
            },
            bytes,
        );
        image.allows_compression = false;
        let image_id = doc.add_object(image);

        let pw = f64::from(w) / dpi * 72.0;
        let ph = f64::from(h) / dpi * 72.0;
        let content = format!("q\n{pw:.3} 0 0 {ph:.3} 0 0 cm\n/Im0 Do\nQ\n");
        let content_id = doc.add_object(Stream::new(Dictionary::new(), content.into_bytes()));

        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Real(pw as f32),
                Object::Real(ph as f32),
            ],
            "Contents" => content_id,
            "Resources" => dictionary! {
                "XObject" => dictionary! { "Im0" => image_id },
            },
        });
        kids.push(page_id.into());
    }

    let count = kids.len();
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => Object::Integer(count as i64),
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.compress();
    doc.save(output).map_err(|e| format!("failed to save PDF: {e}"))?;

    Ok(format!("assembled {count} pages at {dpi} dpi"))
}

// ── Output validation ────────────────────────────────────────────────────

/// Cheap structural check of a produced PDF: non-empty, `%PDF` header and a
/// `%%EOF` marker near the end. Returns the file size.
pub fn validate_pdf(path: &Path) -> Result<u64, String> {
    let mut f = std::fs::File::open(path).map_err(|_| "no output file was produced".to_string())?;
    let len = f
        .metadata()
        .map_err(|e| format!("cannot stat output: {e}"))?
        .len();
    if len == 0 {
        return Err("output file is empty".into());
    }

    let mut head = [0u8; 5];
    let n = f.read(&mut head).map_err(|e| format!("cannot read output: {e}"))?;
    if n < 4 || &head[..4] != b"%PDF" {
        return Err("output does not start with %PDF".into());
    }

    let window = len.min(EOF_WINDOW);
    f.seek(SeekFrom::Start(len - window))
        .map_err(|e| format!("cannot read output: {e}"))?;
    let mut tail = Vec::with_capacity(window as usize);
    f.read_to_end(&mut tail)
        .map_err(|e| format!("cannot read output: {e}"))?;
    if !tail.windows(5).any(|w| w == b"%%EOF") {
        return Err("output is truncated (no %%EOF trailer)".into());
    }
    Ok(len)
}
