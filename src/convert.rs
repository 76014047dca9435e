//! Conversion entry points.
//!
//! The pipeline is strictly sequential: extract layout, persist images,
//! render pages one by one, then (optionally) package. Blocking work
//! (pdfium, image codecs, file writes) runs under `spawn_blocking`; the
//! renderer call is the only network I/O.

use crate::config::{ConversionConfig, RendererKind, DEFAULT_MODEL};
use crate::error::{PageError, Pdf2EpubError};
use crate::model::{LayoutDocument, Page};
use crate::output::{ConversionOutput, ConversionStats, PageResult, WorkDir};
use crate::pipeline::extract::{write_layout_json, DocumentExtractor, PdfiumExtractor};
use crate::pipeline::images::{ImageAssetManager, ImageMap};
use crate::pipeline::markup::{build_page, PageMarkupFragment};
use crate::pipeline::package::{page_document, page_href, EpubMetadata};
use crate::pipeline::renderer::{LayoutRenderer, LlmLayoutRenderer, TemplateRenderer};
use crate::pipeline::{input, stylesheet};
use edgequake_llm::{LLMProvider, ProviderFactory};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// Convert a PDF file or URL.
///
/// Returns the rendered pages, the image map and the stats; call
/// [`ConversionOutput::write_epub`] to package them, or use
/// [`convert_to_file`].
///
/// # Errors
/// Only fatal errors: unreadable input, extraction failure, binding failure,
/// or a working directory that cannot be created. Page and image failures
/// are recorded in the output instead.
pub async fn convert(
    input_str: impl AsRef<str>,
    config: &ConversionConfig,
) -> Result<ConversionOutput, Pdf2EpubError> {
    let input_str = input_str.as_ref();
    info!("Starting conversion: {}", input_str);

    let resolved = input::resolve_input(input_str, config.download_timeout_secs).await?;
    let extractor = Arc::new(PdfiumExtractor::new(
        resolved.path(),
        config.password.clone(),
    ));
    // `resolved` keeps a downloaded file alive until the pipeline is done.
    run_pipeline(extractor, Some(resolved.stem()), config).await
}

/// Run the pipeline on any [`DocumentExtractor`].
pub async fn convert_with_extractor(
    extractor: Arc<dyn DocumentExtractor>,
    config: &ConversionConfig,
) -> Result<ConversionOutput, Pdf2EpubError> {
    run_pipeline(extractor, None, config).await
}

/// Convert a PDF and write the EPUB to `output_path`.
///
/// When no renderer could be configured (missing credentials) nothing is
/// written and `stats.epub_written` is false.
pub async fn convert_to_file(
    input_str: impl AsRef<str>,
    output_path: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<ConversionStats, Pdf2EpubError> {
    let mut output = convert(input_str, config).await?;
    write_if_rendered(&mut output, output_path.as_ref())?;
    Ok(output.stats)
}

/// Package `output` at `path` unless the renderer was skipped.
pub fn write_if_rendered(output: &mut ConversionOutput, path: &Path) -> Result<(), Pdf2EpubError> {
    if output.stats.renderer_skipped {
        warn!(
            "Renderer unavailable: no EPUB written to {}. Layout and images are in {}",
            path.display(),
            output.work_dir().display()
        );
        return Ok(());
    }
    output.write_epub(path)?;
    Ok(())
}

/// Synchronous wrapper around [`convert`].
///
/// Creates a temporary tokio runtime internally.
pub fn convert_sync(
    input_str: impl AsRef<str>,
    config: &ConversionConfig,
) -> Result<ConversionOutput, Pdf2EpubError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| Pdf2EpubError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(convert(input_str, config))
}

/// Extract the layout of a PDF without rendering anything.
///
/// Does not require an LLM provider or API key.
pub async fn inspect(
    input_str: impl AsRef<str>,
    config: &ConversionConfig,
) -> Result<LayoutDocument, Pdf2EpubError> {
    let resolved = input::resolve_input(input_str.as_ref(), config.download_timeout_secs).await?;
    let extractor = PdfiumExtractor::new(resolved.path(), config.password.clone());
    tokio::task::spawn_blocking(move || extractor.layout())
        .await
        .map_err(|e| Pdf2EpubError::Internal(format!("Extraction task panicked: {}", e)))?
}

/// Convert PDF bytes held in memory.
///
/// The bytes are written to a managed [`tempfile`] that is removed when
/// this function returns.
pub async fn convert_from_bytes(
    bytes: &[u8],
    config: &ConversionConfig,
) -> Result<ConversionOutput, Pdf2EpubError> {
    let mut tmp = tempfile::Builder::new()
        .suffix(".pdf")
        .tempfile()
        .map_err(|e| Pdf2EpubError::Internal(format!("tempfile: {e}")))?;
    tmp.write_all(bytes)
        .map_err(|e| Pdf2EpubError::Internal(format!("tempfile write: {e}")))?;
    let path = tmp.path().to_string_lossy().to_string();
    convert(&path, config).await
}

// ── Pipeline ─────────────────────────────────────────────────────────────

/// Subdirectories of the working tree.
struct WorkLayout {
    root: PathBuf,
    text: PathBuf,
    images: PathBuf,
    styles: PathBuf,
}

fn prepare_work_dir(config: &ConversionConfig) -> Result<(WorkDir, WorkLayout), Pdf2EpubError> {
    let work_dir = match &config.work_dir {
        Some(dir) => WorkDir::Kept(dir.clone()),
        None => WorkDir::Temp(TempDir::new().map_err(|source| Pdf2EpubError::WorkDir {
            path: std::env::temp_dir(),
            source,
        })?),
    };
    let root = work_dir.path().to_path_buf();
    let content = root.join("OEBPS");
    let layout = WorkLayout {
        text: content.join("Text"),
        images: content.join("Images"),
        styles: content.join("Styles"),
        root,
    };
    for dir in [&layout.text, &layout.images, &layout.styles] {
        std::fs::create_dir_all(dir).map_err(|source| Pdf2EpubError::WorkDir {
            path: dir.clone(),
            source,
        })?;
    }
    debug!("Working directory: {}", layout.root.display());
    Ok((work_dir, layout))
}

fn write_work_file(path: &Path, contents: &str) -> Result<(), Pdf2EpubError> {
    std::fs::write(path, contents).map_err(|source| Pdf2EpubError::WorkDir {
        path: path.to_path_buf(),
        source,
    })
}

async fn run_pipeline(
    extractor: Arc<dyn DocumentExtractor>,
    default_title: Option<String>,
    config: &ConversionConfig,
) -> Result<ConversionOutput, Pdf2EpubError> {
    let total_start = Instant::now();
    let (work_dir, dirs) = prepare_work_dir(config)?;

    // ── Step 1: Extract layout ───────────────────────────────────────────
    let extract_start = Instant::now();
    let mut layout = {
        let extractor = Arc::clone(&extractor);
        tokio::task::spawn_blocking(move || extractor.layout())
            .await
            .map_err(|e| Pdf2EpubError::Internal(format!("Extraction task panicked: {}", e)))??
    };
    layout.normalize_pages();
    write_layout_json(&layout, &dirs.root.join("layout.json"))?;
    info!("Layout extracted: {} pages", layout.page_count());

    // ── Step 2: Extract and persist images ───────────────────────────────
    let images: ImageMap = {
        let extractor = Arc::clone(&extractor);
        let images_dir = dirs.images.clone();
        tokio::task::spawn_blocking(move || {
            ImageAssetManager::new(images_dir).extract(&*extractor)
        })
        .await
        .map_err(|e| Pdf2EpubError::Internal(format!("Image task panicked: {}", e)))??
    };
    let extraction_duration_ms = extract_start.elapsed().as_millis() as u64;
    if let Some(ref cb) = config.progress_callback {
        cb.on_images_extracted(images.len(), images.failed());
    }

    // ── Step 3: Stylesheet and metadata ──────────────────────────────────
    let css = stylesheet::generate(&config.margins);
    write_work_file(&dirs.styles.join("style.css"), &css)?;

    let title = config
        .title
        .clone()
        .or(default_title)
        .or_else(|| layout.title.clone())
        .unwrap_or_else(|| "Untitled".to_string());
    let mut metadata = EpubMetadata::new(title);
    metadata.language = config.language.clone();
    if let Some(ref id) = config.identifier {
        metadata.identifier = id.clone();
    }

    // ── Step 4: Resolve renderer ─────────────────────────────────────────
    let renderer = skip_if_unconfigured(resolve_renderer(config).await)?;

    // ── Step 5: Render selected pages, in order ──────────────────────────
    let selected: Vec<_> = layout
        .pages
        .iter()
        .filter(|p| config.pages.contains(p.page_number as usize))
        .collect();
    let total = selected.len();
    if let Some(ref cb) = config.progress_callback {
        cb.on_conversion_start(total);
    }

    let render_start = Instant::now();
    let mut pages: Vec<PageResult> = Vec::with_capacity(total);
    if let Some(renderer) = renderer.as_deref() {
        for page in &selected {
            let result = render_one(page, &images, renderer, config, total).await;
            if result.is_success() {
                let fragment = PageMarkupFragment {
                    page_number: result.page_num,
                    markup: result.markup.clone(),
                };
                let path = dirs.root.join("OEBPS").join(page_href(result.page_num));
                write_work_file(&path, &page_document(&fragment, &metadata))?;
            }
            pages.push(result);
        }
    }
    let render_duration_ms = render_start.elapsed().as_millis() as u64;

    // ── Step 6: Stats ────────────────────────────────────────────────────
    let processed = pages.iter().filter(|p| p.is_success()).count();
    let failed = pages.len() - processed;
    if renderer.is_some() && processed == 0 && total > 0 {
        warn!("Every selected page failed to render; the book will have no pages");
    }

    let stats = ConversionStats {
        total_pages: layout.page_count(),
        selected_pages: total,
        processed_pages: processed,
        failed_pages: failed,
        images_packaged: images.len(),
        images_failed: images.failed(),
        total_input_tokens: pages.iter().map(|p| p.input_tokens as u64).sum(),
        total_output_tokens: pages.iter().map(|p| p.output_tokens as u64).sum(),
        extraction_duration_ms,
        render_duration_ms,
        total_duration_ms: total_start.elapsed().as_millis() as u64,
        renderer_skipped: renderer.is_none(),
        epub_written: false,
    };

    info!(
        "Conversion complete: {}/{} pages rendered, {} images, {}ms total",
        processed, total, stats.images_packaged, stats.total_duration_ms
    );
    if let Some(ref cb) = config.progress_callback {
        cb.on_conversion_complete(total, processed);
    }

    Ok(ConversionOutput {
        pages,
        images,
        layout,
        metadata,
        stylesheet: css,
        stats,
        work_dir,
    })
}

/// Render one page, converting any failure into the page's result.
async fn render_one(
    page: &Page,
    images: &ImageMap,
    renderer: &dyn LayoutRenderer,
    config: &ConversionConfig,
    total: usize,
) -> PageResult {
    let start = Instant::now();
    let page_num = page.page_number;
    if let Some(ref cb) = config.progress_callback {
        cb.on_page_start(page_num, total);
    }

    let result = match build_page(page, images, &config.margins, renderer).await {
        Ok((fragment, usage)) => PageResult {
            page_num,
            markup: fragment.markup,
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            duration_ms: start.elapsed().as_millis() as u64,
            retries: usage.retries,
            error: None,
        },
        Err(e) => {
            warn!("Dropping page: {}", e);
            let retries = match &e {
                PageError::RendererFailed { attempts, .. } => attempts.saturating_sub(1),
                _ => 0,
            };
            PageResult {
                page_num,
                markup: String::new(),
                input_tokens: 0,
                output_tokens: 0,
                duration_ms: start.elapsed().as_millis() as u64,
                retries,
                error: Some(e),
            }
        }
    };

    if let Some(ref cb) = config.progress_callback {
        match &result.error {
            None => cb.on_page_complete(page_num, total, result.markup.len()),
            Some(e) => cb.on_page_error(page_num, total, &e.to_string()),
        }
    }
    result
}

// ── Renderer / provider resolution ───────────────────────────────────────

/// Pick the renderer, from most-specific to least-specific:
///
/// 1. a pre-built renderer (`config.renderer`)
/// 2. the deterministic template renderer (`RendererKind::Template`)
/// 3. an LLM renderer on the provider resolved by [`resolve_provider`]
pub async fn resolve_renderer(
    config: &ConversionConfig,
) -> Result<Arc<dyn LayoutRenderer>, Pdf2EpubError> {
    if let Some(ref renderer) = config.renderer {
        return Ok(Arc::clone(renderer));
    }
    if config.renderer_kind == RendererKind::Template {
        return Ok(Arc::new(TemplateRenderer));
    }
    let provider = resolve_provider(config).await?;
    Ok(Arc::new(LlmLayoutRenderer::new(provider, config)))
}

/// A missing provider is not fatal: the run continues without rendering.
fn skip_if_unconfigured(
    resolved: Result<Arc<dyn LayoutRenderer>, Pdf2EpubError>,
) -> Result<Option<Arc<dyn LayoutRenderer>>, Pdf2EpubError> {
    match resolved {
        Ok(r) => Ok(Some(r)),
        Err(Pdf2EpubError::ProviderNotConfigured { provider, hint }) => {
            warn!(
                "LLM provider '{}' not configured; skipping page rendering. {}",
                provider, hint
            );
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, Pdf2EpubError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        Pdf2EpubError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider:
///
/// 1. **Pre-built provider** (`config.provider`).
/// 2. **Named provider + model** (`config.provider_name`).
/// 3. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`).
/// 4. **OpenAI** when `OPENAI_API_KEY` is set.
/// 5. **Full auto-detection** (`ProviderFactory::from_env`).
async fn resolve_provider(config: &ConversionConfig) -> Result<Arc<dyn LLMProvider>, Pdf2EpubError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);

    if let Some(ref name) = config.provider_name {
        return create_provider(name, model);
    }

    if let (Ok(prov), Ok(env_model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !env_model.is_empty() {
            return create_provider(&prov, &env_model);
        }
    }

    if std::env::var("OPENAI_API_KEY").is_ok_and(|k| !k.is_empty()) {
        return create_provider("openai", model);
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| Pdf2EpubError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or use --renderer template.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}
