//! Configuration types for PDF-to-EPUB conversion.
//!
//! All conversion behaviour is controlled through [`ConversionConfig`], built
//! via its [`ConversionConfigBuilder`]. The one [`PageMargins`] value held
//! here is the only source of margins for the coordinate transformer, the
//! stylesheet and the renderer prompt.

use crate::error::Pdf2EpubError;
use crate::pipeline::geometry::PageMargins;
use crate::pipeline::renderer::LayoutRenderer;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

/// Default model when a provider is named without one.
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Highest accepted `max_retries`.
pub const MAX_RETRIES: u32 = 10;

/// Configuration for a PDF-to-EPUB conversion.
///
/// # Example
/// ```rust
/// use edgequake_pdf2epub::{ConversionConfig, RendererKind};
///
/// let config = ConversionConfig::builder()
///     .renderer_kind(RendererKind::Template)
///     .title("Annual Report")
///     .build()
///     .unwrap();
/// assert_eq!(config.margins.bottom, 60.0);
/// ```
#[derive(Clone)]
pub struct ConversionConfig {
    /// Page margins in points. Default: top 72, left 72, right 72, bottom 60.
    pub margins: PageMargins,

    /// Which renderer produces page markup. Default: [`RendererKind::Llm`].
    pub renderer_kind: RendererKind,

    /// Pre-constructed renderer. Takes precedence over everything else.
    pub renderer: Option<Arc<dyn LayoutRenderer>>,

    /// LLM model identifier, e.g. "gpt-4o-mini". If None, uses [`DEFAULT_MODEL`].
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.1.
    ///
    /// Layout reproduction wants the model to copy geometry, not improvise.
    pub temperature: f32,

    /// Maximum tokens the LLM may generate per page. Default: 4096.
    ///
    /// Dense pages produce long markup; too low a cap truncates mid-tag and
    /// the page is then rejected as malformed.
    pub max_tokens: usize,

    /// Retries after a failed renderer call. Default: 2.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per retry. Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-call renderer timeout in seconds. Default: 120.
    pub api_timeout_secs: u64,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Custom system prompt. If None, uses the built-in layout prompt.
    pub system_prompt: Option<String>,

    /// Page selection. Default: all pages.
    pub pages: PageSelection,

    /// Book title. Default: the input file stem.
    pub title: Option<String>,

    /// Book language (BCP 47). Default: "en".
    pub language: String,

    /// Book identifier. Default: a fresh `urn:uuid:`.
    pub identifier: Option<String>,

    /// Working directory for extracted assets.
    ///
    /// When None a temporary directory is used and removed with the
    /// [`crate::output::ConversionOutput`]. When set, the directory is kept.
    pub work_dir: Option<PathBuf>,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Optional per-page progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            margins: PageMargins::default(),
            renderer_kind: RendererKind::default(),
            renderer: None,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.1,
            max_tokens: 4096,
            max_retries: 2,
            retry_backoff_ms: 500,
            api_timeout_secs: 120,
            password: None,
            system_prompt: None,
            pages: PageSelection::default(),
            title: None,
            language: "en".to_string(),
            identifier: None,
            work_dir: None,
            download_timeout_secs: 120,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ConversionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfig")
            .field("margins", &self.margins)
            .field("renderer_kind", &self.renderer_kind)
            .field("renderer", &self.renderer.as_ref().map(|_| "<dyn LayoutRenderer>"))
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("pages", &self.pages)
            .field("title", &self.title)
            .field("language", &self.language)
            .field("work_dir", &self.work_dir)
            .finish()
    }
}

impl ConversionConfig {
    pub fn builder() -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ConversionConfig`].
#[derive(Debug)]
pub struct ConversionConfigBuilder {
    config: ConversionConfig,
}

impl ConversionConfigBuilder {
    pub fn margins(mut self, margins: PageMargins) -> Self {
        self.config.margins = margins;
        self
    }

    pub fn renderer_kind(mut self, kind: RendererKind) -> Self {
        self.config.renderer_kind = kind;
        self
    }

    pub fn renderer(mut self, renderer: Arc<dyn LayoutRenderer>) -> Self {
        self.config.renderer = Some(renderer);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn pages(mut self, selection: PageSelection) -> Self {
        self.config.pages = selection;
        self
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.config.title = Some(title.into());
        self
    }

    pub fn language(mut self, lang: impl Into<String>) -> Self {
        self.config.language = lang.into();
        self
    }

    pub fn identifier(mut self, id: impl Into<String>) -> Self {
        self.config.identifier = Some(id.into());
        self
    }

    pub fn work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.work_dir = Some(dir.into());
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConversionConfig, Pdf2EpubError> {
        let c = &self.config;
        if !c.margins.is_valid() {
            return Err(Pdf2EpubError::InvalidConfig(format!(
                "margins must be finite and ≥ 0, got {:?}",
                c.margins
            )));
        }
        if c.api_timeout_secs == 0 {
            return Err(Pdf2EpubError::InvalidConfig(
                "API timeout must be ≥ 1 second".into(),
            ));
        }
        if c.max_tokens == 0 {
            return Err(Pdf2EpubError::InvalidConfig("max_tokens must be ≥ 1".into()));
        }
        if c.language.trim().is_empty() {
            return Err(Pdf2EpubError::InvalidConfig("language must not be empty".into()));
        }
        if c.max_retries > MAX_RETRIES {
            return Err(Pdf2EpubError::InvalidConfig(format!(
                "max_retries must be ≤ {}, got {}",
                MAX_RETRIES, c.max_retries
            )));
        }
        if let PageSelection::Range(start, end) = c.pages {
            if start == 0 || end < start {
                return Err(Pdf2EpubError::InvalidConfig(format!(
                    "invalid page range {}-{}",
                    start, end
                )));
            }
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// How page markup is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RendererKind {
    /// An LLM renders each page's layout JSON. Needs provider credentials. (default)
    #[default]
    Llm,
    /// Deterministic built-in rendering; no network, no credentials.
    Template,
}

impl FromStr for RendererKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "llm" => Ok(RendererKind::Llm),
            "template" => Ok(RendererKind::Template),
            other => Err(format!("unknown renderer '{}': expected llm or template", other)),
        }
    }
}

/// Specifies which pages of the PDF to convert.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum PageSelection {
    /// Convert all pages (default).
    #[default]
    All,
    /// Convert a single page (1-indexed).
    Single(usize),
    /// Convert a contiguous range of pages (1-indexed, inclusive).
    Range(usize, usize),
    /// Convert specific pages (1-indexed).
    Set(Vec<usize>),
}

impl PageSelection {
    /// Whether 1-indexed `page` is selected.
    pub fn contains(&self, page: usize) -> bool {
        match self {
            PageSelection::All => true,
            PageSelection::Single(p) => *p == page,
            PageSelection::Range(start, end) => page >= *start && page <= *end,
            PageSelection::Set(pages) => pages.contains(&page),
        }
    }
}

impl FromStr for PageSelection {
    type Err = String;

    /// Parse `"all"`, `"5"`, `"1-10"` or `"1,3,5-7"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("all") {
            return Ok(PageSelection::All);
        }
        let parse = |p: &str| {
            p.trim()
                .parse::<usize>()
                .ok()
                .filter(|n| *n >= 1)
                .ok_or_else(|| format!("invalid page number '{}'", p.trim()))
        };
        let range = |part: &str| -> Result<(usize, usize), String> {
            match part.split_once('-') {
                Some((a, b)) => {
                    let (a, b) = (parse(a)?, parse(b)?);
                    if b < a {
                        return Err(format!("invalid page range '{}'", part));
                    }
                    Ok((a, b))
                }
                None => parse(part).map(|n| (n, n)),
            }
        };

        if !s.contains(',') {
            let (a, b) = range(s)?;
            return Ok(if a == b {
                PageSelection::Single(a)
            } else {
                PageSelection::Range(a, b)
            });
        }

        let mut pages = Vec::new();
        for part in s.split(',').filter(|p| !p.trim().is_empty()) {
            let (a, b) = range(part)?;
            pages.extend(a..=b);
        }
        pages.sort_unstable();
        pages.dedup();
        Ok(PageSelection::Set(pages))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = ConversionConfig::default();
        assert_eq!(c.margins, PageMargins::new(72.0, 72.0, 72.0, 60.0));
        assert_eq!(c.api_timeout_secs, 120);
        assert_eq!(c.max_retries, 2);
        assert_eq!(c.language, "en");
        assert_eq!(c.renderer_kind, RendererKind::Llm);
    }

    #[test]
    fn builder_rejects_negative_margins() {
        let err = ConversionConfig::builder()
            .margins(PageMargins::new(-1.0, 0.0, 0.0, 0.0))
            .build()
            .unwrap_err();
        assert!(matches!(err, Pdf2EpubError::InvalidConfig(_)));
    }

    #[test]
    fn builder_rejects_zero_timeout_and_empty_language() {
        assert!(ConversionConfig::builder().api_timeout_secs(0).build().is_err());
        assert!(ConversionConfig::builder().language("  ").build().is_err());
    }

    #[test]
    fn builder_bounds_max_retries() {
        assert!(ConversionConfig::builder().max_retries(MAX_RETRIES).build().is_ok());
        let err = ConversionConfig::builder().max_retries(25).build().unwrap_err();
        assert!(matches!(err, Pdf2EpubError::InvalidConfig(_)));
    }

    #[test]
    fn renderer_kind_parses() {
        assert_eq!("template".parse::<RendererKind>().unwrap(), RendererKind::Template);
        assert_eq!("LLM".parse::<RendererKind>().unwrap(), RendererKind::Llm);
        assert!("vlm".parse::<RendererKind>().is_err());
    }

    #[test]
    fn page_selection_parses() {
        assert_eq!("all".parse::<PageSelection>().unwrap(), PageSelection::All);
        assert_eq!("5".parse::<PageSelection>().unwrap(), PageSelection::Single(5));
        assert_eq!("2-4".parse::<PageSelection>().unwrap(), PageSelection::Range(2, 4));
        assert_eq!(
            "5,1,3-4,3".parse::<PageSelection>().unwrap(),
            PageSelection::Set(vec![1, 3, 4, 5])
        );
        assert!("0".parse::<PageSelection>().is_err());
        assert!("4-2".parse::<PageSelection>().is_err());
        assert!("x".parse::<PageSelection>().is_err());
    }

    #[test]
    fn page_selection_contains() {
        assert!(PageSelection::All.contains(99));
        assert!(PageSelection::Single(3).contains(3));
        assert!(!PageSelection::Single(3).contains(4));
        assert!(PageSelection::Range(2, 4).contains(4));
        assert!(!PageSelection::Range(2, 4).contains(5));
        assert!(PageSelection::Set(vec![1, 5]).contains(5));
    }
}
