//! Progress-callback trait for per-page conversion events.
//!
//! Inject an [`Arc<dyn ConversionProgressCallback>`] via
//! [`crate::config::ConversionConfigBuilder::progress_callback`] to receive
//! events as the pipeline extracts images and renders each page. Pages are
//! rendered one at a time, so events for a run arrive in order.
//!
//! # Example
//!
//! ```rust
//! use edgequake_pdf2epub::{ConversionProgressCallback, ConversionConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: AtomicUsize,
//! }
//!
//! impl ConversionProgressCallback for CountingCallback {
//!     fn on_page_complete(&self, page_num: u32, total_pages: usize, markup_len: usize) {
//!         self.completed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("Page {}/{} done ({} bytes)", page_num, total_pages, markup_len);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { completed: AtomicUsize::new(0) });
//!
//! let config = ConversionConfig::builder()
//!     .progress_callback(counter as Arc<dyn ConversionProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the conversion pipeline as it works through a document.
///
/// All methods default to no-ops so callers only override what they need.
pub trait ConversionProgressCallback: Send + Sync {
    /// Called once after layout extraction, before any page is rendered.
    ///
    /// * `total_pages` — pages that will be rendered
    fn on_conversion_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called once image extraction has finished.
    ///
    /// * `packaged` — images written to the working directory
    /// * `failed`   — images that could not be decoded or written
    fn on_images_extracted(&self, packaged: usize, failed: usize) {
        let _ = (packaged, failed);
    }

    /// Called just before the renderer is asked for a page.
    fn on_page_start(&self, page_num: u32, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// Called when a page's markup is accepted.
    ///
    /// * `markup_len` — byte length of the accepted fragment
    fn on_page_complete(&self, page_num: u32, total_pages: usize, markup_len: usize) {
        let _ = (page_num, total_pages, markup_len);
    }

    /// Called when a page is dropped after all retries.
    fn on_page_error(&self, page_num: u32, total_pages: usize, error: &str) {
        let _ = (page_num, total_pages, error);
    }

    /// Called once after every page has been attempted.
    ///
    /// * `success_count` — pages that produced a fragment
    fn on_conversion_complete(&self, total_pages: usize, success_count: usize) {
        let _ = (total_pages, success_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ConversionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ConversionConfig`].
pub type ProgressCallback = Arc<dyn ConversionProgressCallback>;
