//! Document structure extraction: PDF (or exported layout) → [`LayoutDocument`].
//!
//! The rest of the pipeline only sees the [`DocumentExtractor`] trait. Two
//! implementations ship with the crate:
//!
//! * [`PdfiumExtractor`] walks the page objects of a PDF through pdfium:
//!   text objects become Text or Heading elements, image objects become
//!   Image elements and raw image streams.
//! * [`JsonLayoutExtractor`] reads a layout export from disk, so an external
//!   layout analyser can drive the pipeline.
//!
//! ## Why spawn_blocking?
//!
//! Both extractors do blocking work (pdfium FFI, file reads). The
//! orchestrator calls them from `tokio::task::spawn_blocking`, which is why
//! the trait is `Send + Sync` and the methods are synchronous.

use crate::error::Pdf2EpubError;
use crate::model::{BBox, Element, LayoutDocument, Page, TextAttributes};
use image::{DynamicImage, ImageFormat};
use pdfium_render::prelude::*;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};

/// Font-size ratio (against the page median) at or above which text is a level-1 heading.
const HEADING_1_RATIO: f32 = 1.6;
/// Font-size ratio at or above which text is a level-2 heading.
const HEADING_2_RATIO: f32 = 1.25;

/// Raw pixels or bytes for one image located in the source document.
pub enum RawImageData {
    /// Still-encoded bytes (a file on disk, a pass-through stream).
    Encoded(Vec<u8>),
    /// Already decoded by the extractor. `source_format` records the
    /// original encoding when the extractor knows it.
    Decoded {
        image: DynamicImage,
        source_format: Option<ImageFormat>,
    },
}

/// One image enumerated by an extractor, keyed by `origin_ref`.
pub struct RawImage {
    pub origin_ref: String,
    pub page_number: u32,
    /// Position among the page's images, 0-based.
    pub index: usize,
    pub data: RawImageData,
}

/// External collaborator yielding page layout and raw images.
///
/// Failures here are fatal to the run.
pub trait DocumentExtractor: Send + Sync {
    /// Extract the ordered page layout.
    fn layout(&self) -> Result<LayoutDocument, Pdf2EpubError>;

    /// Enumerate raw images. Every Image element's `origin_ref` in
    /// [`Self::layout`] should appear here at most once.
    fn images(&self) -> Result<Vec<RawImage>, Pdf2EpubError>;
}

// ── pdfium ───────────────────────────────────────────────────────────────────

/// Bind to a pdfium library: `PDFIUM_LIB_PATH`, then `./`, then the system.
pub fn bind_pdfium() -> Result<Pdfium, Pdf2EpubError> {
    let from_env = std::env::var("PDFIUM_LIB_PATH").ok().map(PathBuf::from);

    let bindings = match from_env {
        Some(path) => {
            // Accept either the library file itself or its directory.
            let lib = if path.is_dir() {
                Pdfium::pdfium_platform_library_name_at_path(&path)
            } else {
                path
            };
            Pdfium::bind_to_library(&lib)
        }
        None => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library()),
    }
    .map_err(|e| Pdf2EpubError::PdfiumBindingFailed(format!("{:?}", e)))?;

    Ok(Pdfium::new(bindings))
}

/// Extracts layout and images from a PDF with pdfium.
///
/// The document is reopened for every call so the extractor holds no FFI
/// state between stages.
pub struct PdfiumExtractor {
    path: PathBuf,
    password: Option<String>,
}

impl PdfiumExtractor {
    pub fn new(path: impl Into<PathBuf>, password: Option<String>) -> Self {
        Self {
            path: path.into(),
            password,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open<'a>(&'a self, pdfium: &'a Pdfium) -> Result<PdfDocument<'a>, Pdf2EpubError> {
        let password = self.password.as_deref();
        pdfium.load_pdf_from_file(&self.path, password).map_err(|e| {
            let err_str = format!("{:?}", e);
            if err_str.contains("Password") || err_str.contains("password") {
                if password.is_some() {
                    Pdf2EpubError::WrongPassword {
                        path: self.path.clone(),
                    }
                } else {
                    Pdf2EpubError::PasswordRequired {
                        path: self.path.clone(),
                    }
                }
            } else {
                Pdf2EpubError::CorruptPdf {
                    path: self.path.clone(),
                    detail: err_str,
                }
            }
        })
    }
}

/// A text run collected before heading classification.
struct TextRun {
    bbox: BBox,
    text: String,
    attributes: TextAttributes,
}

enum Collected {
    Text(TextRun),
    Image { bbox: BBox, origin_ref: String },
}

/// Canonical `origin_ref` for the `index`-th image on `page_number`.
pub fn pdf_image_ref(page_number: u32, index: usize) -> String {
    format!("page{}/img{}", page_number, index)
}

/// Convert a PDF-space rectangle (origin bottom-left) to a top-left bbox.
fn flip_bounds(
    left: f32,
    bottom: f32,
    right: f32,
    top: f32,
    page_height: f32,
) -> BBox {
    BBox::new(left, page_height - top, right, page_height - bottom)
}

fn object_bbox(object: &PdfPageObject, page_height: f32) -> Option<BBox> {
    let b = object.bounds().ok()?;
    Some(flip_bounds(
        b.left().value,
        b.bottom().value,
        b.right().value,
        b.top().value,
        page_height,
    ))
}

fn hex_color(red: u8, green: u8, blue: u8) -> String {
    format!("#{:02x}{:02x}{:02x}", red, green, blue)
}

fn median(values: &mut [f32]) -> Option<f32> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    Some(values[values.len() / 2])
}

/// Heading level for a run of `size` points on a page whose median is `median`.
pub fn heading_level(size: f32, median: f32) -> Option<u8> {
    if median <= 0.0 || !size.is_finite() {
        return None;
    }
    let ratio = size / median;
    if ratio >= HEADING_1_RATIO {
        Some(1)
    } else if ratio >= HEADING_2_RATIO {
        Some(2)
    } else {
        None
    }
}

/// Turn collected runs into elements, promoting large text to headings.
fn classify(collected: Vec<Collected>) -> Vec<Element> {
    let mut sizes: Vec<f32> = collected
        .iter()
        .filter_map(|c| match c {
            Collected::Text(run) => run.attributes.font_size,
            Collected::Image { .. } => None,
        })
        .collect();
    let median = median(&mut sizes).unwrap_or(0.0);

    collected
        .into_iter()
        .map(|c| match c {
            Collected::Image { bbox, origin_ref } => Element::Image { bbox, origin_ref },
            Collected::Text(run) => {
                match run.attributes.font_size.and_then(|s| heading_level(s, median)) {
                    Some(level) => Element::Heading {
                        bbox: run.bbox,
                        text: run.text,
                        level,
                    },
                    None => Element::Text {
                        bbox: run.bbox,
                        text: run.text,
                        attributes: run.attributes,
                    },
                }
            }
        })
        .collect()
}

fn is_jpeg_stream(image: &PdfPageImageObject) -> bool {
    image
        .filters()
        .iter()
        .any(|f| f.name().contains("DCT"))
}

impl DocumentExtractor for PdfiumExtractor {
    fn layout(&self) -> Result<LayoutDocument, Pdf2EpubError> {
        let pdfium = bind_pdfium()?;
        let document = self.open(&pdfium)?;
        let pages = document.pages();
        info!("PDF loaded: {} pages", pages.len());

        let mut out = Vec::with_capacity(pages.len() as usize);
        for (idx, page) in pages.iter().enumerate() {
            let page_number = idx as u32 + 1;
            let width = page.width().value;
            let height = page.height().value;

            let mut collected = Vec::new();
            let mut image_index = 0usize;
            for object in page.objects().iter() {
                let Some(bbox) = object_bbox(&object, height) else {
                    continue;
                };
                if let Some(text_obj) = object.as_text_object() {
                    let text = text_obj.text();
                    if text.trim().is_empty() {
                        continue;
                    }
                    let attributes = TextAttributes {
                        font_name: Some(text_obj.font().name()).filter(|n| !n.is_empty()),
                        font_size: Some(text_obj.unscaled_font_size().value)
                            .filter(|s| *s > 0.0),
                        color: object
                            .fill_color()
                            .ok()
                            .map(|c| hex_color(c.red(), c.green(), c.blue())),
                    };
                    collected.push(Collected::Text(TextRun {
                        bbox,
                        text,
                        attributes,
                    }));
                } else if object.as_image_object().is_some() {
                    collected.push(Collected::Image {
                        bbox,
                        origin_ref: pdf_image_ref(page_number, image_index),
                    });
                    image_index += 1;
                }
            }

            let elements = classify(collected);
            debug!("Page {}: {} elements", page_number, elements.len());
            out.push(Page {
                page_number,
                width_pt: width,
                height_pt: height,
                elements,
            });
        }

        Ok(LayoutDocument {
            title: document
                .metadata()
                .get(PdfDocumentMetadataTagType::Title)
                .map(|t| t.value().to_string())
                .filter(|t| !t.trim().is_empty()),
            pages: out,
        })
    }

    fn images(&self) -> Result<Vec<RawImage>, Pdf2EpubError> {
        let pdfium = bind_pdfium()?;
        let document = self.open(&pdfium)?;

        let mut out = Vec::new();
        for (idx, page) in document.pages().iter().enumerate() {
            let page_number = idx as u32 + 1;
            let mut image_index = 0usize;
            for object in page.objects().iter() {
                // Keep numbering in step with `layout`, which skips objects without bounds.
                if object.bounds().is_err() {
                    continue;
                }
                let Some(image_obj) = object.as_image_object() else {
                    continue;
                };
                let origin_ref = pdf_image_ref(page_number, image_index);
                image_index += 1;

                match image_obj.get_raw_image() {
                    Ok(image) => {
                        let source_format = is_jpeg_stream(image_obj).then_some(ImageFormat::Jpeg);
                        out.push(RawImage {
                            origin_ref,
                            page_number,
                            index: image_index - 1,
                            data: RawImageData::Decoded {
                                image,
                                source_format,
                            },
                        });
                    }
                    Err(e) => warn!("{}: cannot read image stream: {:?}", origin_ref, e),
                }
            }
        }
        info!("Found {} raw images", out.len());
        Ok(out)
    }
}

// ── JSON layout ──────────────────────────────────────────────────────────────

/// Reads a layout export (the `layout.json` this crate writes, or a
/// compatible one) and serves image files referenced from it.
///
/// Image `origin_ref`s are file paths relative to the JSON file's directory.
pub struct JsonLayoutExtractor {
    path: PathBuf,
}

impl JsonLayoutExtractor {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn base_dir(&self) -> PathBuf {
        self.path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

impl DocumentExtractor for JsonLayoutExtractor {
    fn layout(&self) -> Result<LayoutDocument, Pdf2EpubError> {
        let raw = std::fs::read_to_string(&self.path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Pdf2EpubError::FileNotFound {
                path: self.path.clone(),
            },
            std::io::ErrorKind::PermissionDenied => Pdf2EpubError::PermissionDenied {
                path: self.path.clone(),
            },
            _ => Pdf2EpubError::InvalidLayout {
                path: self.path.clone(),
                detail: e.to_string(),
            },
        })?;
        let value: serde_json::Value =
            serde_json::from_str(&raw).map_err(|e| Pdf2EpubError::InvalidLayout {
                path: self.path.clone(),
                detail: e.to_string(),
            })?;
        let doc = LayoutDocument::from_value(&value).map_err(|detail| {
            Pdf2EpubError::InvalidLayout {
                path: self.path.clone(),
                detail,
            }
        })?;
        info!(
            "Layout loaded from {}: {} pages",
            self.path.display(),
            doc.page_count()
        );
        Ok(doc)
    }

    fn images(&self) -> Result<Vec<RawImage>, Pdf2EpubError> {
        let doc = self.layout()?;
        let base = self.base_dir();

        let mut out = Vec::new();
        for page in &doc.pages {
            for (index, origin_ref) in page.image_refs().enumerate() {
                if !is_contained_ref(origin_ref) {
                    warn!(
                        "{}: image reference escapes the layout directory, skipped",
                        origin_ref
                    );
                    continue;
                }
                let file = base.join(origin_ref);
                match std::fs::read(&file) {
                    Ok(bytes) => out.push(RawImage {
                        origin_ref: origin_ref.to_string(),
                        page_number: page.page_number,
                        index,
                        data: RawImageData::Encoded(bytes),
                    }),
                    Err(e) => warn!("{}: cannot read '{}': {}", origin_ref, file.display(), e),
                }
            }
        }
        Ok(out)
    }
}

/// A relative path that stays under its base directory.
fn is_contained_ref(origin_ref: &str) -> bool {
    let path = Path::new(origin_ref);
    !origin_ref.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Persist `layout` as pretty JSON for inspection.
pub fn write_layout_json(layout: &LayoutDocument, path: &Path) -> Result<(), Pdf2EpubError> {
    let json = serde_json::to_vec_pretty(layout)
        .map_err(|e| Pdf2EpubError::Internal(format!("layout serialisation: {}", e)))?;
    std::fs::write(path, json).map_err(|source| Pdf2EpubError::WorkDir {
        path: path.to_path_buf(),
        source,
    })?;
    debug!("Layout written to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn pdf_refs_are_distinct_across_pages() {
        assert_eq!(pdf_image_ref(1, 0), "page1/img0");
        assert_ne!(pdf_image_ref(1, 0), pdf_image_ref(2, 0));
    }

    #[test]
    fn flip_moves_origin_to_top_left() {
        // A box 100pt from the bottom of a 792pt page.
        let b = flip_bounds(72.0, 100.0, 300.0, 128.0, 792.0);
        assert_eq!(b, BBox::new(72.0, 664.0, 300.0, 692.0));
    }

    #[test]
    fn heading_thresholds() {
        assert_eq!(heading_level(20.0, 12.0), Some(1));
        assert_eq!(heading_level(16.0, 12.0), Some(2));
        assert_eq!(heading_level(12.0, 12.0), None);
        assert_eq!(heading_level(12.0, 0.0), None);
    }

    #[test]
    fn classify_promotes_large_runs() {
        let run = |size: f32, text: &str| {
            Collected::Text(TextRun {
                bbox: BBox::new(0.0, 0.0, 1.0, 1.0),
                text: text.into(),
                attributes: TextAttributes {
                    font_size: Some(size),
                    ..Default::default()
                },
            })
        };
        let elements = classify(vec![
            run(24.0, "Title"),
            run(12.0, "body one"),
            Collected::Image {
                bbox: BBox::new(0.0, 0.0, 1.0, 1.0),
                origin_ref: "page1/img0".into(),
            },
            run(12.0, "body two"),
        ]);
        assert!(matches!(elements[0], Element::Heading { level: 1, .. }));
        assert!(matches!(elements[1], Element::Text { .. }));
        assert!(matches!(elements[2], Element::Image { .. }));
        assert!(matches!(elements[3], Element::Text { .. }));
    }

    #[test]
    fn hex_color_is_lowercase_six_digits() {
        assert_eq!(hex_color(0x33, 0x33, 0x33), "#333333");
        assert_eq!(hex_color(255, 0, 10), "#ff000a");
    }

    #[test]
    fn json_extractor_reads_layout_and_images() {
        let dir = tempfile::tempdir().unwrap();
        let mut png = Vec::new();
        DynamicImage::new_rgb8(2, 2)
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .unwrap();
        std::fs::create_dir(dir.path().join("pics")).unwrap();
        std::fs::write(dir.path().join("pics/a.png"), &png).unwrap();

        let layout = serde_json::json!({
            "pages": [{
                "page_number": 1, "width_pt": 612, "height_pt": 792,
                "elements": [
                    {"type": "image", "bbox": [0, 0, 10, 10], "image_path": "pics/a.png"},
                    {"type": "image", "bbox": [0, 0, 10, 10], "image_path": "pics/missing.png"}
                ]
            }]
        });
        let path = dir.path().join("layout.json");
        std::fs::write(&path, layout.to_string()).unwrap();

        let extractor = JsonLayoutExtractor::new(&path);
        assert_eq!(extractor.layout().unwrap().page_count(), 1);
        let images = extractor.images().unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].origin_ref, "pics/a.png");
        assert!(matches!(&images[0].data, RawImageData::Encoded(b) if b == &png));
    }

    #[test]
    fn json_extractor_stays_inside_layout_dir() {
        let root = tempfile::tempdir().unwrap();
        let layout_dir = root.path().join("export");
        std::fs::create_dir_all(&layout_dir).unwrap();
        std::fs::write(root.path().join("secret.png"), b"outside").unwrap();
        std::fs::write(layout_dir.join("ok.png"), b"inside").unwrap();
        let outside = root.path().join("secret.png");

        let layout = serde_json::json!({
            "pages": [{
                "page_number": 1,
                "elements": [
                    {"type": "image", "bbox": [0, 0, 1, 1], "ref": "../secret.png"},
                    {"type": "image", "bbox": [0, 0, 1, 1], "ref": outside.to_string_lossy()},
                    {"type": "image", "bbox": [0, 0, 1, 1], "ref": "./ok.png"}
                ]
            }]
        });
        let path = layout_dir.join("layout.json");
        std::fs::write(&path, layout.to_string()).unwrap();

        let images = JsonLayoutExtractor::new(&path).images().unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].origin_ref, "./ok.png");
    }

    #[test]
    fn contained_refs() {
        assert!(is_contained_ref("pics/a.png"));
        assert!(is_contained_ref("./a.png"));
        assert!(!is_contained_ref("../a.png"));
        assert!(!is_contained_ref("pics/../../a.png"));
        assert!(!is_contained_ref("/etc/passwd"));
        assert!(!is_contained_ref(""));
    }

    #[test]
    fn json_extractor_missing_file_is_fatal() {
        let err = JsonLayoutExtractor::new("/definitely/not/here.json")
            .layout()
            .unwrap_err();
        assert!(matches!(err, Pdf2EpubError::FileNotFound { .. }));
    }

    #[test]
    fn json_extractor_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{\"no_pages\": true}").unwrap();
        let err = JsonLayoutExtractor::new(&path).layout().unwrap_err();
        assert!(matches!(err, Pdf2EpubError::InvalidLayout { .. }));
    }

    #[test]
    fn layout_json_round_trips_through_extractor() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("layout.json");
        let doc = LayoutDocument {
            title: Some("T".into()),
            pages: vec![Page::new(1, 612.0, 792.0).with_element(Element::Text {
                bbox: BBox::new(72.0, 72.0, 300.0, 100.0),
                text: "Hello World!".into(),
                attributes: TextAttributes::default(),
            })],
        };
        write_layout_json(&doc, &path).unwrap();
        assert_eq!(JsonLayoutExtractor::new(&path).layout().unwrap(), doc);
    }
}
