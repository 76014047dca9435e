//! Conversion results: per-page outcomes, run statistics and packaging.

use crate::error::{PageError, Pdf2EpubError};
use crate::model::LayoutDocument;
use crate::pipeline::images::ImageMap;
use crate::pipeline::markup::PageMarkupFragment;
use crate::pipeline::package::{self, EpubMetadata, PackageSummary};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Outcome of rendering one page.
#[derive(Debug, Clone, Serialize)]
pub struct PageResult {
    /// 1-indexed page number.
    pub page_num: u32,
    /// Accepted markup fragment; empty when `error` is set.
    pub markup: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub duration_ms: u64,
    pub retries: u32,
    pub error: Option<PageError>,
}

impl PageResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Aggregate numbers for one run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConversionStats {
    /// Pages in the extracted layout.
    pub total_pages: usize,
    /// Pages chosen by the page selection.
    pub selected_pages: usize,
    pub processed_pages: usize,
    pub failed_pages: usize,
    pub images_packaged: usize,
    pub images_failed: usize,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub extraction_duration_ms: u64,
    pub render_duration_ms: u64,
    pub total_duration_ms: u64,
    /// No renderer was available (missing credentials); no page was rendered.
    pub renderer_skipped: bool,
    pub epub_written: bool,
}

/// Where the run's assets live.
pub enum WorkDir {
    /// Removed when the output is dropped.
    Temp(TempDir),
    /// Caller-chosen directory, left in place.
    Kept(PathBuf),
}

impl WorkDir {
    pub fn path(&self) -> &Path {
        match self {
            WorkDir::Temp(t) => t.path(),
            WorkDir::Kept(p) => p,
        }
    }
}

/// Everything a conversion produced, ready to be packaged.
pub struct ConversionOutput {
    /// One entry per selected page, ascending.
    pub pages: Vec<PageResult>,
    pub images: ImageMap,
    pub layout: LayoutDocument,
    pub metadata: EpubMetadata,
    pub stylesheet: String,
    pub stats: ConversionStats,
    pub(crate) work_dir: WorkDir,
}

impl ConversionOutput {
    /// Fragments of the pages that rendered, ascending by page number.
    pub fn fragments(&self) -> Vec<PageMarkupFragment> {
        self.pages
            .iter()
            .filter(|p| p.is_success())
            .map(|p| PageMarkupFragment {
                page_number: p.page_num,
                markup: p.markup.clone(),
            })
            .collect()
    }

    /// Page numbers that will appear in the book, in order.
    pub fn reading_order(&self) -> Vec<u32> {
        self.pages
            .iter()
            .filter(|p| p.is_success())
            .map(|p| p.page_num)
            .collect()
    }

    pub fn work_dir(&self) -> &Path {
        self.work_dir.path()
    }

    /// Package the result as an EPUB at `path`.
    ///
    /// Packages whatever succeeded, including nothing at all; callers that
    /// must not write a book for a skipped renderer check
    /// [`ConversionStats::renderer_skipped`] first.
    pub fn write_epub(&mut self, path: impl AsRef<Path>) -> Result<PackageSummary, Pdf2EpubError> {
        let summary = package::assemble(
            &self.fragments(),
            &self.images,
            &self.stylesheet,
            &self.metadata,
            path.as_ref(),
        )?;
        self.stats.epub_written = true;
        Ok(summary)
    }
}

impl std::fmt::Debug for ConversionOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversionOutput")
            .field("pages", &self.pages.len())
            .field("images", &self.images.len())
            .field("metadata", &self.metadata)
            .field("stats", &self.stats)
            .field("work_dir", &self.work_dir())
            .finish()
    }
}
