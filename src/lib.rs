//! # edgequake-pdf2epub
//!
//! Convert PDF documents to fixed-layout-flavoured EPUB 3 books, using an
//! LLM to turn each page's positioned layout into XHTML.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input     resolve local file or download from URL
//!  ├─ 2. Extract   positioned text, headings and images via pdfium
//!  ├─ 3. Images    decode, re-encode and store under OEBPS/Images
//!  ├─ 4. Markup    margin-relative layout request per page → renderer
//!  ├─ 5. Style     one deterministic stylesheet for the whole book
//!  └─ 6. Package   mimetype, container.xml, content.opf, nav, toc.ncx
//! ```
//!
//! Pages are rendered one at a time, in order. A page whose renderer call
//! fails after all retries is dropped from the book; the run continues.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_pdf2epub::{convert_to_file, ConversionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / …
//!     let config = ConversionConfig::default();
//!     let stats = convert_to_file("document.pdf", "document.epub", &config).await?;
//!     eprintln!("{}/{} pages rendered", stats.processed_pages, stats.selected_pages);
//!     Ok(())
//! }
//! ```
//!
//! Without credentials, use the template renderer:
//!
//! ```rust,no_run
//! use edgequake_pdf2epub::{ConversionConfig, RendererKind};
//!
//! let config = ConversionConfig::builder()
//!     .renderer_kind(RendererKind::Template)
//!     .build()
//!     .unwrap();
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdf2epub` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! ```toml
//! edgequake-pdf2epub = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
pub mod model;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ConversionConfig, ConversionConfigBuilder, PageSelection, RendererKind};
pub use convert::{
    convert, convert_from_bytes, convert_sync, convert_to_file, convert_with_extractor, inspect,
    write_if_rendered,
};
pub use error::{AssetError, PageError, Pdf2EpubError};
pub use model::{BBox, Element, LayoutDocument, Page, TextAttributes};
pub use output::{ConversionOutput, ConversionStats, PageResult};
pub use pipeline::extract::{DocumentExtractor, JsonLayoutExtractor, PdfiumExtractor};
pub use pipeline::geometry::{ContentBox, PageMargins};
pub use pipeline::markup::PageMarkupFragment;
pub use pipeline::package::{EpubMetadata, PackageSummary};
pub use pipeline::renderer::{LayoutRenderer, LlmLayoutRenderer, TemplateRenderer};
pub use progress::{ConversionProgressCallback, NoopProgressCallback, ProgressCallback};
