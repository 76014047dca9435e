//! Error types for the edgequake-pdf2epub library.
//!
//! Three error types mirror three failure scopes:
//!
//! * [`Pdf2EpubError`] — **Fatal**: the run cannot proceed at all (bad input
//!   file, unparseable PDF, unwritable destination). Returned as
//!   `Err(Pdf2EpubError)` from the top-level `convert*` functions.
//!
//! * [`PageError`] — **Non-fatal, one page**: the renderer failed for a single
//!   page. Stored inside [`crate::output::PageResult`]; the page is left out of
//!   the reading order and every other page is unaffected.
//!
//! * [`AssetError`] — **Non-fatal, one image**: an image could not be decoded,
//!   re-encoded or written. The image is left out of the asset map.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-pdf2epub library.
#[derive(Debug, Error)]
pub enum Pdf2EpubError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    // ── Extraction errors ─────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}\nTry repairing with: qpdf --decrypt input.pdf output.pdf")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{path}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { path: PathBuf },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{path}'")]
    WrongPassword { path: PathBuf },

    /// A pre-exported layout document could not be read or parsed.
    #[error("Layout file '{path}' is invalid: {detail}")]
    InvalidLayout { path: PathBuf, detail: String },

    /// The document structure extractor failed on a specific page.
    #[error("Layout extraction failed for page {page}: {detail}")]
    ExtractionFailed { page: usize, detail: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium, place the library in the current\n\
directory, or install it system-wide.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Renderer errors ───────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    ///
    /// The pipeline treats this as a degradation, not a failure: the run
    /// continues without the renderer and no package is produced.
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or populate the working directory tree.
    #[error("Failed to prepare working directory '{path}': {source}")]
    WorkDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not create or write the output EPUB file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The EPUB container could not be assembled.
    #[error("Failed to package EPUB '{path}': {detail}")]
    PackagingFailed { path: PathBuf, detail: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single page.
///
/// Stored alongside [`crate::output::PageResult`] when a page fails. The page
/// is omitted from the reading order; the run continues.
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// Renderer call failed (transport or API error) after all attempts.
    #[error("Page {page}: renderer failed after {attempts} attempt(s): {detail}")]
    RendererFailed {
        page: u32,
        attempts: u32,
        detail: String,
    },

    /// Renderer call timed out on its final attempt.
    #[error("Page {page}: renderer timed out after {secs}s")]
    Timeout { page: u32, secs: u64 },

    /// Renderer returned nothing usable.
    #[error("Page {page}: renderer returned an empty response")]
    EmptyResponse { page: u32 },

    /// Renderer returned content that is not a markup fragment.
    #[error("Page {page}: renderer returned malformed markup: {detail}")]
    MalformedResponse { page: u32, detail: String },
}

impl PageError {
    /// Page number the error belongs to.
    pub fn page(&self) -> u32 {
        match self {
            PageError::RendererFailed { page, .. }
            | PageError::Timeout { page, .. }
            | PageError::EmptyResponse { page }
            | PageError::MalformedResponse { page, .. } => *page,
        }
    }
}

/// A non-fatal error for a single image asset.
#[derive(Debug, Clone, Error)]
pub enum AssetError {
    /// The raw bytes are not in a format the image codec understands.
    #[error("image '{origin_ref}': cannot decode: {detail}")]
    Decode { origin_ref: String, detail: String },

    /// Re-encoding to the packaged format failed.
    #[error("image '{origin_ref}': cannot encode: {detail}")]
    Encode { origin_ref: String, detail: String },

    /// The encoded file could not be written to the images directory.
    #[error("image '{origin_ref}': cannot write '{path}': {detail}")]
    Write {
        origin_ref: String,
        path: PathBuf,
        detail: String,
    },
}
