//! Pipeline tests with in-memory extractors and renderers.
//!
//! No pdfium library and no network are needed: the extractor serves a
//! hand-built layout and the renderers are either scripted fakes or the
//! built-in template renderer.

use async_trait::async_trait;
use edgequake_pdf2epub::model::{BBox, Element, LayoutDocument, Page, TextAttributes};
use edgequake_pdf2epub::pipeline::extract::{RawImage, RawImageData};
use edgequake_pdf2epub::pipeline::markup::RenderRequest;
use edgequake_pdf2epub::pipeline::renderer::{RenderUsage, RenderedMarkup};
use edgequake_pdf2epub::{
    convert_with_extractor, ConversionConfig, ConversionProgressCallback, DocumentExtractor,
    write_if_rendered, JsonLayoutExtractor, LayoutRenderer, PageError, PageSelection,
    Pdf2EpubError, RendererKind,
};
use image::{DynamicImage, ImageFormat, RgbImage};
use std::io::Read;
use std::path::Path;
use std::sync::{Arc, Mutex};

// ── Fakes ────────────────────────────────────────────────────────────────────

struct FakeExtractor {
    layout: LayoutDocument,
    with_image: bool,
}

impl DocumentExtractor for FakeExtractor {
    fn layout(&self) -> Result<LayoutDocument, Pdf2EpubError> {
        Ok(self.layout.clone())
    }

    fn images(&self) -> Result<Vec<RawImage>, Pdf2EpubError> {
        if !self.with_image {
            return Ok(Vec::new());
        }
        Ok(vec![RawImage {
            origin_ref: "page1/img0".to_string(),
            page_number: 1,
            index: 0,
            data: RawImageData::Decoded {
                image: DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 3, image::Rgb([200, 10, 10]))),
                source_format: Some(ImageFormat::Png),
            },
        }])
    }
}

struct FailingExtractor;

impl DocumentExtractor for FailingExtractor {
    fn layout(&self) -> Result<LayoutDocument, Pdf2EpubError> {
        Err(Pdf2EpubError::CorruptPdf {
            path: "broken.pdf".into(),
            detail: "xref table missing".into(),
        })
    }

    fn images(&self) -> Result<Vec<RawImage>, Pdf2EpubError> {
        Ok(Vec::new())
    }
}

/// Wraps each page number in a paragraph; fails the listed pages.
#[derive(Default)]
struct ScriptedRenderer {
    fail_pages: Vec<u32>,
    seen: Mutex<Vec<RenderRequest>>,
}

#[async_trait]
impl LayoutRenderer for ScriptedRenderer {
    async fn render(&self, request: &RenderRequest) -> Result<RenderedMarkup, PageError> {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(request.clone());
        }
        if self.fail_pages.contains(&request.page_number) {
            return Err(PageError::RendererFailed {
                page: request.page_number,
                attempts: 3,
                detail: "service unavailable".into(),
            });
        }
        Ok(RenderedMarkup {
            content: format!(
                "```html\n<div class=\"epub-page-container\"><p>page {}</p></div>\n```",
                request.page_number
            ),
            usage: RenderUsage {
                input_tokens: 100,
                output_tokens: 20,
                retries: 0,
            },
        })
    }
}

/// Answers every page with a complete XHTML document.
struct FullDocumentRenderer;

#[async_trait]
impl LayoutRenderer for FullDocumentRenderer {
    async fn render(&self, request: &RenderRequest) -> Result<RenderedMarkup, PageError> {
        Ok(RenderedMarkup {
            content: format!(
                "<!DOCTYPE html><html xmlns=\"http://www.w3.org/1999/xhtml\"><head><title>p</title></head><body><p>page {}</p></body></html>",
                request.page_number
            ),
            usage: RenderUsage::default(),
        })
    }
}

#[derive(Default)]
struct EventLog(Mutex<Vec<String>>);

impl ConversionProgressCallback for EventLog {
    fn on_conversion_start(&self, total_pages: usize) {
        self.0.lock().unwrap().push(format!("start {total_pages}"));
    }
    fn on_page_complete(&self, page_num: u32, _total: usize, _len: usize) {
        self.0.lock().unwrap().push(format!("ok {page_num}"));
    }
    fn on_page_error(&self, page_num: u32, _total: usize, _error: &str) {
        self.0.lock().unwrap().push(format!("err {page_num}"));
    }
    fn on_conversion_complete(&self, total: usize, success: usize) {
        self.0.lock().unwrap().push(format!("done {success}/{total}"));
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Route library logs to the test harness; `RUST_LOG=debug` to see them.
fn init_logs() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn text(x0: f32, y0: f32, x1: f32, y1: f32, s: &str) -> Element {
    Element::Text {
        bbox: BBox::new(x0, y0, x1, y1),
        text: s.to_string(),
        attributes: TextAttributes::default(),
    }
}

fn three_pages() -> LayoutDocument {
    LayoutDocument {
        title: Some("Layout Title".into()),
        pages: vec![
            Page::new(1, 612.0, 792.0)
                .with_element(Element::Heading {
                    bbox: BBox::new(72.0, 72.0, 540.0, 100.0),
                    text: "Chapter One".into(),
                    level: 1,
                })
                .with_element(Element::Image {
                    bbox: BBox::new(100.0, 200.0, 300.0, 350.0),
                    origin_ref: "page1/img0".into(),
                }),
            Page::new(2, 612.0, 792.0).with_element(text(72.0, 72.0, 300.0, 100.0, "second")),
            Page::new(3, 612.0, 792.0).with_element(text(72.0, 72.0, 300.0, 100.0, "third")),
        ],
    }
}

fn read_entry(epub: &Path, name: &str) -> String {
    let file = std::fs::File::open(epub).unwrap();
    let mut archive = zip::ZipArchive::new(file).unwrap();
    let mut entry = archive.by_name(name).unwrap();
    let mut s = String::new();
    entry.read_to_string(&mut s).unwrap();
    s
}

fn entry_names(epub: &Path) -> Vec<String> {
    let file = std::fs::File::open(epub).unwrap();
    let mut archive = zip::ZipArchive::new(file).unwrap();
    (0..archive.len())
        .map(|i| archive.by_index(i).unwrap().name().to_string())
        .collect()
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn failed_page_is_dropped_and_order_is_kept() {
    init_logs();
    let renderer = Arc::new(ScriptedRenderer {
        fail_pages: vec![2],
        ..Default::default()
    });
    let events = Arc::new(EventLog::default());
    let config = ConversionConfig::builder()
        .renderer(renderer.clone())
        .progress_callback(events.clone())
        .title("Scripted")
        .build()
        .unwrap();
    let extractor = Arc::new(FakeExtractor {
        layout: three_pages(),
        with_image: true,
    });

    let mut output = convert_with_extractor(extractor, &config).await.unwrap();
    assert_eq!(output.reading_order(), vec![1, 3]);
    assert_eq!(output.stats.processed_pages, 2);
    assert_eq!(output.stats.failed_pages, 1);
    assert_eq!(output.stats.total_input_tokens, 200);
    assert!(!output.stats.renderer_skipped);
    assert!(matches!(
        output.pages[1].error,
        Some(PageError::RendererFailed { page: 2, .. })
    ));

    // Fences are stripped before the fragment is accepted.
    assert!(output.pages[0].markup.starts_with("<div"));

    assert_eq!(
        *events.0.lock().unwrap(),
        vec!["start 3", "ok 1", "err 2", "ok 3", "done 2/3"]
    );

    let dir = tempfile::tempdir().unwrap();
    let epub = dir.path().join("book.epub");
    let summary = output.write_epub(&epub).unwrap();
    assert_eq!(summary.reading_order, vec![1, 3]);
    assert!(output.stats.epub_written);

    let names = entry_names(&epub);
    assert_eq!(names[0], "mimetype");
    assert!(names.contains(&"OEBPS/Text/page_0001.xhtml".to_string()));
    assert!(!names.contains(&"OEBPS/Text/page_0002.xhtml".to_string()));
    assert!(names.contains(&"OEBPS/Text/page_0003.xhtml".to_string()));
    assert!(names.contains(&"OEBPS/Images/page1_img0.png".to_string()));

    let opf = read_entry(&epub, "OEBPS/content.opf");
    assert!(opf.contains("Scripted"));
    let p1 = opf.find("page_0001").unwrap();
    let p3 = opf.find("page_0003").unwrap();
    assert!(p1 < p3);
}

#[tokio::test]
async fn request_carries_margins_and_resolved_image_href() {
    let renderer = Arc::new(ScriptedRenderer::default());
    let config = ConversionConfig::builder()
        .renderer(renderer.clone())
        .pages(PageSelection::Single(1))
        .build()
        .unwrap();
    let extractor = Arc::new(FakeExtractor {
        layout: three_pages(),
        with_image: true,
    });

    let output = convert_with_extractor(extractor, &config).await.unwrap();
    assert_eq!(output.stats.selected_pages, 1);
    assert_eq!(output.reading_order(), vec![1]);

    let seen = renderer.seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    let req = &seen[0];
    assert_eq!(req.page_number, 1);
    assert_eq!(req.margins.left, 72.0);

    let heading = &req.elements[0];
    assert_eq!(heading.kind, "heading");
    assert_eq!(heading.content_box.left, 0.0);
    assert_eq!(heading.content_box.top, 0.0);

    let image = &req.elements[1];
    assert_eq!(image.image_path.as_deref(), Some("../Images/page1_img0.png"));
    assert_eq!(image.content_box.left, 28.0);
    assert_eq!(image.content_box.top, 128.0);
}

#[tokio::test]
async fn hello_world_with_template_renderer() {
    let layout = LayoutDocument {
        title: None,
        pages: vec![Page::new(1, 612.0, 792.0)
            .with_element(text(72.0, 72.0, 300.0, 100.0, "Hello World"))],
    };
    let config = ConversionConfig::builder()
        .renderer_kind(RendererKind::Template)
        .title("Hello")
        .language("fr")
        .build()
        .unwrap();
    let extractor = Arc::new(FakeExtractor {
        layout,
        with_image: false,
    });

    let mut output = convert_with_extractor(extractor, &config).await.unwrap();
    assert_eq!(output.stats.processed_pages, 1);
    assert_eq!(output.stats.total_input_tokens, 0);

    let dir = tempfile::tempdir().unwrap();
    let epub = dir.path().join("nested/dir/hello.epub");
    output.write_epub(&epub).unwrap();

    assert_eq!(read_entry(&epub, "mimetype"), "application/epub+zip");
    let page = read_entry(&epub, "OEBPS/Text/page_0001.xhtml");
    assert!(page.contains("Hello World"));
    assert!(page.contains("left: 0pt; top: 0pt; width: 228pt; height: 28pt;"));
    assert!(page.contains("../Styles/style.css"));

    let opf = read_entry(&epub, "OEBPS/content.opf");
    assert!(opf.contains(">fr<"));
    assert!(opf.contains("urn:uuid:"));

    let css = read_entry(&epub, "OEBPS/Styles/style.css");
    assert!(css.contains("72pt"));
}

#[tokio::test]
async fn page_without_elements_still_renders() {
    let layout = LayoutDocument {
        title: None,
        pages: vec![Page::new(1, 612.0, 792.0)],
    };
    let config = ConversionConfig::builder()
        .renderer_kind(RendererKind::Template)
        .build()
        .unwrap();
    let extractor = Arc::new(FakeExtractor {
        layout,
        with_image: false,
    });

    let output = convert_with_extractor(extractor, &config).await.unwrap();
    assert_eq!(output.reading_order(), vec![1]);
    let markup = &output.pages[0].markup;
    assert!(markup.contains("page-content"));
    assert!(markup.contains("page-number"));
}

#[tokio::test]
async fn every_page_failing_still_packages_an_empty_book() {
    let renderer = Arc::new(ScriptedRenderer {
        fail_pages: vec![1, 2, 3],
        ..Default::default()
    });
    let config = ConversionConfig::builder().renderer(renderer).build().unwrap();
    let extractor = Arc::new(FakeExtractor {
        layout: three_pages(),
        with_image: false,
    });

    let mut output = convert_with_extractor(extractor, &config).await.unwrap();
    assert!(output.reading_order().is_empty());
    assert_eq!(output.stats.failed_pages, 3);

    let dir = tempfile::tempdir().unwrap();
    let epub = dir.path().join("empty.epub");
    let summary = output.write_epub(&epub).unwrap();
    assert!(summary.reading_order.is_empty());
    let names = entry_names(&epub);
    assert!(names.contains(&"OEBPS/nav.xhtml".to_string()));
    assert!(!names.iter().any(|n| n.starts_with("OEBPS/Text/")));
}

#[tokio::test]
async fn extraction_failure_is_fatal() {
    let config = ConversionConfig::builder()
        .renderer_kind(RendererKind::Template)
        .build()
        .unwrap();
    let err = convert_with_extractor(Arc::new(FailingExtractor), &config)
        .await
        .unwrap_err();
    assert!(matches!(err, Pdf2EpubError::CorruptPdf { .. }));
}

#[tokio::test]
async fn work_dir_keeps_layout_images_and_pages() {
    init_logs();
    let dir = tempfile::tempdir().unwrap();
    let work = dir.path().join("work");
    let config = ConversionConfig::builder()
        .renderer_kind(RendererKind::Template)
        .work_dir(work.clone())
        .build()
        .unwrap();
    let extractor = Arc::new(FakeExtractor {
        layout: three_pages(),
        with_image: true,
    });

    let output = convert_with_extractor(extractor, &config).await.unwrap();
    assert_eq!(output.work_dir(), work.as_path());
    drop(output);

    assert!(work.join("layout.json").is_file());
    assert!(work.join("OEBPS/Images/page1_img0.png").is_file());
    assert!(work.join("OEBPS/Styles/style.css").is_file());
    assert!(work.join("OEBPS/Text/page_0002.xhtml").is_file());
}

#[tokio::test]
async fn exported_layout_drives_the_pipeline() {
    init_logs();
    let dir = tempfile::tempdir().unwrap();
    let img_path = dir.path().join("figure.png");
    RgbImage::from_pixel(2, 2, image::Rgb([0, 0, 255]))
        .save(&img_path)
        .unwrap();
    let layout_path = dir.path().join("layout.json");
    std::fs::write(
        &layout_path,
        r#"{
            "title": "Exported",
            "pages": [
                {"page_no": 1, "page_width": 600, "page_height": 800, "elements": [
                    {"type": "title", "bbox": [72, 72, 400, 110], "text": "Intro"},
                    {"type": "picture", "bbox": [72, 200, 272, 400], "ref": "figure.png"},
                    {"type": "table", "bbox": [72, 450, 500, 600]}
                ]}
            ]
        }"#,
    )
    .unwrap();

    let config = ConversionConfig::builder()
        .renderer_kind(RendererKind::Template)
        .build()
        .unwrap();
    let extractor = Arc::new(JsonLayoutExtractor::new(&layout_path));
    let mut output = convert_with_extractor(extractor, &config).await.unwrap();

    assert_eq!(output.metadata.title, "Exported");
    assert_eq!(output.stats.images_packaged, 1);
    assert!(output.pages[0].markup.contains("../Images/figure.png"));
    assert!(output.pages[0].markup.contains("<h1"));

    let epub = dir.path().join("exported.epub");
    output.write_epub(&epub).unwrap();
    assert!(entry_names(&epub).contains(&"OEBPS/Images/figure.png".to_string()));
}

#[tokio::test]
async fn full_document_pages_link_the_stylesheet() {
    let config = ConversionConfig::builder()
        .renderer(Arc::new(FullDocumentRenderer))
        .build()
        .unwrap();
    let extractor = Arc::new(FakeExtractor {
        layout: three_pages(),
        with_image: false,
    });

    let mut output = convert_with_extractor(extractor, &config).await.unwrap();
    let dir = tempfile::tempdir().unwrap();
    let epub = dir.path().join("full.epub");
    output.write_epub(&epub).unwrap();

    let page = read_entry(&epub, "OEBPS/Text/page_0001.xhtml");
    assert!(page.contains("href=\"../Styles/style.css\""));
    assert!(page.contains("<p>page 1</p>"));
    assert_eq!(page.matches("<html").count(), 1);
}

#[tokio::test]
async fn missing_provider_skips_rendering_and_writes_nothing() {
    init_logs();
    let config = ConversionConfig::builder()
        .provider_name("no-such-provider")
        .build()
        .unwrap();
    let extractor = Arc::new(FakeExtractor {
        layout: three_pages(),
        with_image: true,
    });

    let mut output = convert_with_extractor(extractor, &config).await.unwrap();
    assert!(output.stats.renderer_skipped);
    assert!(output.pages.is_empty());
    assert!(output.reading_order().is_empty());
    assert_eq!(output.images.len(), 1);
    assert_eq!(output.stats.images_packaged, 1);
    assert!(output.work_dir().join("layout.json").is_file());

    let dir = tempfile::tempdir().unwrap();
    let epub = dir.path().join("skipped.epub");
    write_if_rendered(&mut output, &epub).unwrap();
    assert!(!epub.exists());
    assert!(!output.stats.epub_written);
}

#[tokio::test]
async fn repeated_page_numbers_render_once() {
    let mut layout = three_pages();
    layout
        .pages
        .push(Page::new(2, 612.0, 792.0).with_element(text(72.0, 72.0, 300.0, 100.0, "again")));
    let renderer = Arc::new(ScriptedRenderer::default());
    let config = ConversionConfig::builder()
        .renderer(renderer.clone())
        .build()
        .unwrap();
    let extractor = Arc::new(FakeExtractor {
        layout,
        with_image: false,
    });

    let output = convert_with_extractor(extractor, &config).await.unwrap();
    assert_eq!(output.reading_order(), vec![1, 2, 3]);
    assert_eq!(output.stats.total_pages, 3);

    let seen = renderer.seen.lock().unwrap();
    let second: Vec<_> = seen.iter().filter(|r| r.page_number == 2).collect();
    assert_eq!(second.len(), 1);
    assert!(serde_json::to_string(second[0]).unwrap().contains("second"));
}
