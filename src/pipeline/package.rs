//! EPUB packaging: fragments + images + stylesheet → one `.epub` file.
//!
//! ## Container layout
//!
//! ```text
//! mimetype                      (stored, first entry)
//! META-INF/container.xml
//! OEBPS/content.opf             package document (EPUB 3)
//! OEBPS/toc.ncx                 EPUB 2 navigation, for older readers
//! OEBPS/nav.xhtml               EPUB 3 navigation document
//! OEBPS/Text/page_NNNN.xhtml    one per successful page
//! OEBPS/Images/<file>           one per packaged image
//! OEBPS/Styles/style.css
//! ```
//!
//! Reading order is the ascending page number of the fragments that exist.
//! Failed pages simply have no fragment, so the order is compacted rather
//! than gapped. The archive is written to a sibling temp file and renamed
//! into place; on any error the temp file is removed and nothing appears at
//! the destination.

use crate::error::Pdf2EpubError;
use crate::pipeline::images::{ImageMap, PackagedImage};
use crate::pipeline::markup::PageMarkupFragment;
use crate::pipeline::stylesheet::STYLESHEET_PATH;
use chrono::{DateTime, SecondsFormat, Utc};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::fs::File;
use std::io::{Cursor, Seek, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

const CONTENT_DIR: &str = "OEBPS";
const XHTML_MEDIA_TYPE: &str = "application/xhtml+xml";

/// Book-level metadata written into the package document.
#[derive(Debug, Clone, PartialEq)]
pub struct EpubMetadata {
    pub title: String,
    pub language: String,
    /// Unique identifier, `urn:uuid:…` by default.
    pub identifier: String,
    pub modified: DateTime<Utc>,
}

impl EpubMetadata {
    /// Metadata with language `en`, a fresh UUID identifier and the current time.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            language: "en".to_string(),
            identifier: format!("urn:uuid:{}", uuid::Uuid::new_v4()),
            modified: Utc::now(),
        }
    }
}

/// One page in reading order.
#[derive(Debug, Clone, PartialEq)]
pub struct PageEntry {
    pub page_number: u32,
    /// Manifest id, e.g. `page_0003`.
    pub id: String,
    /// Path relative to the content directory, e.g. `Text/page_0003.xhtml`.
    pub href: String,
}

/// Canonical text path for a page, relative to the content directory.
pub fn page_href(page_number: u32) -> String {
    format!("Text/page_{:04}.xhtml", page_number)
}

/// What goes into the package, resolved before anything is written.
#[derive(Debug, Clone)]
pub struct PackageManifest<'a> {
    pub pages: Vec<(PageEntry, &'a PageMarkupFragment)>,
    /// Images with their encoded bytes, read back from disk.
    pub images: Vec<(&'a PackagedImage, Vec<u8>)>,
    pub images_skipped: usize,
}

impl<'a> PackageManifest<'a> {
    /// Order fragments by page number and load every image's backing file.
    ///
    /// Duplicate page numbers keep the first fragment. Images whose file is
    /// missing or unreadable are skipped.
    pub fn build(fragments: &'a [PageMarkupFragment], images: &'a ImageMap) -> Self {
        let mut ordered: Vec<&PageMarkupFragment> = fragments.iter().collect();
        ordered.sort_by_key(|f| f.page_number);
        let mut pages: Vec<(PageEntry, &PageMarkupFragment)> = Vec::with_capacity(ordered.len());
        for fragment in ordered {
            if pages
                .last()
                .is_some_and(|(entry, _)| entry.page_number == fragment.page_number)
            {
                warn!("Duplicate fragment for page {} ignored", fragment.page_number);
                continue;
            }
            pages.push((
                PageEntry {
                    page_number: fragment.page_number,
                    id: format!("page_{:04}", fragment.page_number),
                    href: page_href(fragment.page_number),
                },
                fragment,
            ));
        }

        let mut loaded = Vec::with_capacity(images.len());
        let mut images_skipped = 0;
        for img in images.iter() {
            match std::fs::read(&img.disk_path) {
                Ok(bytes) => loaded.push((img, bytes)),
                Err(e) => {
                    warn!(
                        "Image '{}' not packaged: cannot read '{}': {}",
                        img.origin_ref,
                        img.disk_path.display(),
                        e
                    );
                    images_skipped += 1;
                }
            }
        }

        Self {
            pages,
            images: loaded,
            images_skipped,
        }
    }

    pub fn reading_order(&self) -> Vec<u32> {
        self.pages.iter().map(|(e, _)| e.page_number).collect()
    }
}

/// Result of a successful packaging run.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct PackageSummary {
    pub path: PathBuf,
    /// Page numbers in spine order.
    pub reading_order: Vec<u32>,
    pub images_packaged: usize,
    pub images_skipped: usize,
    pub bytes_written: u64,
}

/// Failures while producing archive contents.
#[derive(Debug, Error)]
enum PackError {
    #[error("zip: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("xml: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Assemble and atomically write the EPUB at `dest`.
pub fn assemble(
    fragments: &[PageMarkupFragment],
    images: &ImageMap,
    stylesheet: &str,
    metadata: &EpubMetadata,
    dest: &Path,
) -> Result<PackageSummary, Pdf2EpubError> {
    let manifest = PackageManifest::build(fragments, images);
    if manifest.pages.is_empty() {
        warn!(
            "No page fragments to package; writing an EPUB with an empty reading order to {}",
            dest.display()
        );
    }

    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| Pdf2EpubError::OutputWriteFailed {
            path: dest.to_path_buf(),
            source,
        })?;
    }

    let tmp_path = dest.with_extension("epub.tmp");
    let file = File::create(&tmp_path).map_err(|source| Pdf2EpubError::OutputWriteFailed {
        path: dest.to_path_buf(),
        source,
    })?;

    let written = write_archive(file, &manifest, stylesheet, metadata).map_err(|e| {
        let _ = std::fs::remove_file(&tmp_path);
        Pdf2EpubError::PackagingFailed {
            path: dest.to_path_buf(),
            detail: e.to_string(),
        }
    })?;
    drop(written);

    std::fs::rename(&tmp_path, dest).map_err(|source| {
        let _ = std::fs::remove_file(&tmp_path);
        Pdf2EpubError::OutputWriteFailed {
            path: dest.to_path_buf(),
            source,
        }
    })?;

    let bytes_written = std::fs::metadata(dest).map(|m| m.len()).unwrap_or(0);
    let summary = PackageSummary {
        path: dest.to_path_buf(),
        reading_order: manifest.reading_order(),
        images_packaged: manifest.images.len(),
        images_skipped: manifest.images_skipped,
        bytes_written,
    };
    info!(
        "EPUB written: {} ({} pages, {} images, {} bytes)",
        dest.display(),
        summary.reading_order.len(),
        summary.images_packaged,
        bytes_written
    );
    Ok(summary)
}

fn write_archive<W: Write + Seek>(
    writer: W,
    manifest: &PackageManifest<'_>,
    stylesheet: &str,
    metadata: &EpubMetadata,
) -> Result<W, PackError> {
    let mut zip = ZipWriter::new(writer);
    let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    // Readers sniff the first entry: it must be the uncompressed mimetype.
    zip.start_file("mimetype", stored)?;
    zip.write_all(b"application/epub+zip")?;

    zip.start_file("META-INF/container.xml", deflated)?;
    zip.write_all(&container_xml()?)?;

    zip.start_file(format!("{}/content.opf", CONTENT_DIR), deflated)?;
    zip.write_all(&package_document(manifest, metadata)?)?;

    zip.start_file(format!("{}/toc.ncx", CONTENT_DIR), deflated)?;
    zip.write_all(&ncx_document(manifest, metadata)?)?;

    zip.start_file(format!("{}/nav.xhtml", CONTENT_DIR), deflated)?;
    zip.write_all(&nav_document(manifest, metadata)?)?;

    zip.start_file(format!("{}/{}", CONTENT_DIR, STYLESHEET_PATH), deflated)?;
    zip.write_all(stylesheet.as_bytes())?;

    for (entry, fragment) in &manifest.pages {
        debug!("Packaging page {} → {}", entry.page_number, entry.href);
        zip.start_file(format!("{}/{}", CONTENT_DIR, entry.href), deflated)?;
        zip.write_all(page_document(fragment, metadata).as_bytes())?;
    }

    for (img, bytes) in &manifest.images {
        // Already-compressed formats gain nothing from deflate.
        zip.start_file(format!("{}/{}", CONTENT_DIR, img.packaged_path), stored)?;
        zip.write_all(bytes)?;
    }

    Ok(zip.finish()?)
}

// ── XML documents ────────────────────────────────────────────────────────────

fn xml_writer() -> Result<Writer<Cursor<Vec<u8>>>, PackError> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;
    Ok(writer)
}

fn write_text_element<W: Write>(
    writer: &mut Writer<W>,
    start: BytesStart<'_>,
    value: &str,
) -> Result<(), PackError> {
    let end = start.to_end().into_owned();
    writer.write_event(Event::Start(start))?;
    writer.write_event(Event::Text(BytesText::new(value)))?;
    writer.write_event(Event::End(end))?;
    Ok(())
}

fn empty_element<W: Write>(
    writer: &mut Writer<W>,
    name: &str,
    attrs: &[(&str, &str)],
) -> Result<(), PackError> {
    let mut elem = BytesStart::new(name);
    for attr in attrs {
        elem.push_attribute(*attr);
    }
    writer.write_event(Event::Empty(elem))?;
    Ok(())
}

fn container_xml() -> Result<Vec<u8>, PackError> {
    let mut w = xml_writer()?;
    let mut container = BytesStart::new("container");
    container.push_attribute(("version", "1.0"));
    container.push_attribute(("xmlns", "urn:oasis:names:tc:opendocument:xmlns:container"));
    w.write_event(Event::Start(container))?;
    w.write_event(Event::Start(BytesStart::new("rootfiles")))?;
    let full_path = format!("{}/content.opf", CONTENT_DIR);
    empty_element(
        &mut w,
        "rootfile",
        &[
            ("full-path", full_path.as_str()),
            ("media-type", "application/oebps-package+xml"),
        ],
    )?;
    w.write_event(Event::End(BytesEnd::new("rootfiles")))?;
    w.write_event(Event::End(BytesEnd::new("container")))?;
    Ok(w.into_inner().into_inner())
}

fn image_id(index: usize) -> String {
    format!("img_{:04}", index + 1)
}

fn package_document(
    manifest: &PackageManifest<'_>,
    metadata: &EpubMetadata,
) -> Result<Vec<u8>, PackError> {
    let mut w = xml_writer()?;

    let mut package = BytesStart::new("package");
    package.push_attribute(("xmlns", "http://www.idpf.org/2007/opf"));
    package.push_attribute(("version", "3.0"));
    package.push_attribute(("unique-identifier", "book-id"));
    package.push_attribute(("xml:lang", metadata.language.as_str()));
    w.write_event(Event::Start(package))?;

    // ── metadata
    let mut meta = BytesStart::new("metadata");
    meta.push_attribute(("xmlns:dc", "http://purl.org/dc/elements/1.1/"));
    w.write_event(Event::Start(meta))?;
    let mut identifier = BytesStart::new("dc:identifier");
    identifier.push_attribute(("id", "book-id"));
    write_text_element(&mut w, identifier, &metadata.identifier)?;
    write_text_element(&mut w, BytesStart::new("dc:title"), &metadata.title)?;
    write_text_element(&mut w, BytesStart::new("dc:language"), &metadata.language)?;
    let mut modified = BytesStart::new("meta");
    modified.push_attribute(("property", "dcterms:modified"));
    write_text_element(
        &mut w,
        modified,
        &metadata
            .modified
            .to_rfc3339_opts(SecondsFormat::Secs, true),
    )?;
    w.write_event(Event::End(BytesEnd::new("metadata")))?;

    // ── manifest
    w.write_event(Event::Start(BytesStart::new("manifest")))?;
    empty_element(
        &mut w,
        "item",
        &[
            ("id", "nav"),
            ("href", "nav.xhtml"),
            ("media-type", XHTML_MEDIA_TYPE),
            ("properties", "nav"),
        ],
    )?;
    empty_element(
        &mut w,
        "item",
        &[
            ("id", "ncx"),
            ("href", "toc.ncx"),
            ("media-type", "application/x-dtbncx+xml"),
        ],
    )?;
    empty_element(
        &mut w,
        "item",
        &[
            ("id", "style"),
            ("href", STYLESHEET_PATH),
            ("media-type", "text/css"),
        ],
    )?;
    for (entry, _) in &manifest.pages {
        empty_element(
            &mut w,
            "item",
            &[
                ("id", entry.id.as_str()),
                ("href", entry.href.as_str()),
                ("media-type", XHTML_MEDIA_TYPE),
            ],
        )?;
    }
    for (i, (img, _)) in manifest.images.iter().enumerate() {
        let id = image_id(i);
        empty_element(
            &mut w,
            "item",
            &[
                ("id", id.as_str()),
                ("href", img.packaged_path.as_str()),
                ("media-type", img.media_type),
            ],
        )?;
    }
    w.write_event(Event::End(BytesEnd::new("manifest")))?;

    // ── spine: navigation first, then pages
    let mut spine = BytesStart::new("spine");
    spine.push_attribute(("toc", "ncx"));
    w.write_event(Event::Start(spine))?;
    if manifest.pages.is_empty() {
        empty_element(&mut w, "itemref", &[("idref", "nav")])?;
    } else {
        empty_element(&mut w, "itemref", &[("idref", "nav"), ("linear", "no")])?;
    }
    for (entry, _) in &manifest.pages {
        empty_element(&mut w, "itemref", &[("idref", entry.id.as_str())])?;
    }
    w.write_event(Event::End(BytesEnd::new("spine")))?;

    w.write_event(Event::End(BytesEnd::new("package")))?;
    Ok(w.into_inner().into_inner())
}

fn page_label(page_number: u32) -> String {
    format!("Page {}", page_number)
}

fn ncx_document(
    manifest: &PackageManifest<'_>,
    metadata: &EpubMetadata,
) -> Result<Vec<u8>, PackError> {
    let mut w = xml_writer()?;
    let mut ncx = BytesStart::new("ncx");
    ncx.push_attribute(("xmlns", "http://www.daisy.org/z3986/2005/ncx/"));
    ncx.push_attribute(("version", "2005-1"));
    w.write_event(Event::Start(ncx))?;

    w.write_event(Event::Start(BytesStart::new("head")))?;
    for (name, content) in [
        ("dtb:uid", metadata.identifier.as_str()),
        ("dtb:depth", "1"),
        ("dtb:totalPageCount", "0"),
        ("dtb:maxPageNumber", "0"),
    ] {
        empty_element(&mut w, "meta", &[("name", name), ("content", content)])?;
    }
    w.write_event(Event::End(BytesEnd::new("head")))?;

    w.write_event(Event::Start(BytesStart::new("docTitle")))?;
    write_text_element(&mut w, BytesStart::new("text"), &metadata.title)?;
    w.write_event(Event::End(BytesEnd::new("docTitle")))?;

    // A navMap needs at least one navPoint; an empty book points at the nav document.
    let points: Vec<(String, String)> = if manifest.pages.is_empty() {
        vec![(metadata.title.clone(), "nav.xhtml".to_string())]
    } else {
        manifest
            .pages
            .iter()
            .map(|(e, _)| (page_label(e.page_number), e.href.clone()))
            .collect()
    };

    w.write_event(Event::Start(BytesStart::new("navMap")))?;
    for (i, (label, src)) in points.iter().enumerate() {
        let id = format!("navpoint-{}", i + 1);
        let order = (i + 1).to_string();
        let mut point = BytesStart::new("navPoint");
        point.push_attribute(("id", id.as_str()));
        point.push_attribute(("playOrder", order.as_str()));
        w.write_event(Event::Start(point))?;
        w.write_event(Event::Start(BytesStart::new("navLabel")))?;
        write_text_element(&mut w, BytesStart::new("text"), label)?;
        w.write_event(Event::End(BytesEnd::new("navLabel")))?;
        empty_element(&mut w, "content", &[("src", src.as_str())])?;
        w.write_event(Event::End(BytesEnd::new("navPoint")))?;
    }
    w.write_event(Event::End(BytesEnd::new("navMap")))?;

    w.write_event(Event::End(BytesEnd::new("ncx")))?;
    Ok(w.into_inner().into_inner())
}

fn nav_document(
    manifest: &PackageManifest<'_>,
    metadata: &EpubMetadata,
) -> Result<Vec<u8>, PackError> {
    let mut w = xml_writer()?;
    let mut html = BytesStart::new("html");
    html.push_attribute(("xmlns", "http://www.w3.org/1999/xhtml"));
    html.push_attribute(("xmlns:epub", "http://www.idpf.org/2007/ops"));
    html.push_attribute(("lang", metadata.language.as_str()));
    html.push_attribute(("xml:lang", metadata.language.as_str()));
    w.write_event(Event::Start(html))?;

    w.write_event(Event::Start(BytesStart::new("head")))?;
    write_text_element(&mut w, BytesStart::new("title"), &metadata.title)?;
    w.write_event(Event::End(BytesEnd::new("head")))?;

    w.write_event(Event::Start(BytesStart::new("body")))?;
    let mut nav = BytesStart::new("nav");
    nav.push_attribute(("epub:type", "toc"));
    nav.push_attribute(("id", "toc"));
    w.write_event(Event::Start(nav))?;
    write_text_element(&mut w, BytesStart::new("h1"), &metadata.title)?;
    w.write_event(Event::Start(BytesStart::new("ol")))?;
    if manifest.pages.is_empty() {
        // An <ol> must not be empty.
        w.write_event(Event::Start(BytesStart::new("li")))?;
        write_text_element(&mut w, BytesStart::new("span"), &metadata.title)?;
        w.write_event(Event::End(BytesEnd::new("li")))?;
    }
    for (entry, _) in &manifest.pages {
        w.write_event(Event::Start(BytesStart::new("li")))?;
        let mut a = BytesStart::new("a");
        a.push_attribute(("href", entry.href.as_str()));
        write_text_element(&mut w, a, &page_label(entry.page_number))?;
        w.write_event(Event::End(BytesEnd::new("li")))?;
    }
    w.write_event(Event::End(BytesEnd::new("ol")))?;
    w.write_event(Event::End(BytesEnd::new("nav")))?;
    w.write_event(Event::End(BytesEnd::new("body")))?;
    w.write_event(Event::End(BytesEnd::new("html")))?;
    Ok(w.into_inner().into_inner())
}

/// Whether `markup` is already a complete document rather than a fragment.
fn is_full_document(markup: &str) -> bool {
    let head = markup.trim_start();
    head.starts_with("<?xml") || head.starts_with("<!DOCTYPE") || markup.contains("<html")
}

/// Drop a leading XML declaration and doctype.
fn strip_prolog(markup: &str) -> &str {
    let mut rest = markup.trim_start();
    for open in ["<?xml", "<!DOCTYPE", "<!doctype"] {
        if rest.starts_with(open) {
            if let Some(end) = rest.find('>') {
                rest = rest[end + 1..].trim_start();
            }
        }
    }
    rest
}

/// Add the shared stylesheet link to a complete document.
///
/// The link goes before `</head>`, or into a new head right after the
/// `<html>` open tag. Returns `None` when neither spot exists.
fn link_stylesheet(markup: &str) -> Option<String> {
    let href = format!("../{}", STYLESHEET_PATH);
    if markup.contains(&href) {
        return Some(markup.to_string());
    }
    let link = format!(r#"<link rel="stylesheet" type="text/css" href="{href}" />"#);
    // ASCII lowering keeps byte offsets valid for `markup`.
    let lower = markup.to_ascii_lowercase();

    if let Some(at) = lower.find("</head>") {
        return Some(format!("{}{}\n{}", &markup[..at], link, &markup[at..]));
    }
    let open = lower.find("<html")?;
    let end = open + lower[open..].find('>')? + 1;
    if markup[..end].ends_with("/>") {
        return None;
    }
    Some(format!(
        "{}<head>{}</head>{}",
        &markup[..end],
        link,
        &markup[end..]
    ))
}

/// Wrap a fragment in an XHTML page linking the shared stylesheet.
///
/// Complete documents are kept, with the stylesheet link added if missing.
pub fn page_document(fragment: &PageMarkupFragment, metadata: &EpubMetadata) -> String {
    if is_full_document(&fragment.markup) {
        if let Some(doc) = link_stylesheet(&fragment.markup) {
            return doc;
        }
        warn!(
            "Page {}: document has no <html> element, wrapping it",
            fragment.page_number
        );
    }
    let body = strip_prolog(&fragment.markup);
    let lang = html_escape::encode_double_quoted_attribute(&metadata.language);
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops" lang="{lang}" xml:lang="{lang}">
<head>
  <title>{title}</title>
  <link rel="stylesheet" type="text/css" href="../{css}" />
</head>
<body>
{body}
</body>
</html>
"#,
        lang = lang,
        title = html_escape::encode_text(&page_label(fragment.page_number)),
        css = STYLESHEET_PATH,
        body = body,
    )
}
