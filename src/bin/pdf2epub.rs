//! CLI binary for edgequake-pdf2epub.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ConversionConfig` and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_pdf2epub::pipeline::input::is_url;
use edgequake_pdf2epub::{
    convert, convert_with_extractor, inspect, ConversionConfig, ConversionProgressCallback,
    ConversionStats, DocumentExtractor, JsonLayoutExtractor, LayoutDocument, PageSelection,
    ProgressCallback, RendererKind, write_if_rendered,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a live progress bar plus one log line per page.
struct CliProgressCallback {
    bar: ProgressBar,
    /// Start of the page currently being rendered.
    page_started: Mutex<Option<Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    /// Spinner until `on_conversion_start` reports the page count.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Extracting layout…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            page_started: Mutex::new(None),
            errors: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Rendering");
        self.bar.reset_eta();
    }

    fn page_elapsed(&self) -> f64 {
        self.page_started
            .lock()
            .ok()
            .and_then(|mut started| started.take())
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl ConversionProgressCallback for CliProgressCallback {
    fn on_images_extracted(&self, packaged: usize, failed: usize) {
        let failed_note = if failed > 0 {
            format!("  {}", red(&format!("{failed} failed")))
        } else {
            String::new()
        };
        self.bar.println(format!(
            "{} {} images extracted{}",
            cyan("◆"),
            bold(&packaged.to_string()),
            failed_note
        ));
    }

    fn on_conversion_start(&self, total_pages: usize) {
        self.activate_bar(total_pages);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Rendering {total_pages} pages…"))
        ));
    }

    fn on_page_start(&self, page_num: u32, _total: usize) {
        if let Ok(mut started) = self.page_started.lock() {
            *started = Some(Instant::now());
        }
        self.bar.set_message(format!("page {page_num}"));
    }

    fn on_page_complete(&self, page_num: u32, total: usize, markup_len: usize) {
        let elapsed = self.page_elapsed();
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {:<8}  {}",
            green("✓"),
            page_num,
            total,
            dim(&format!("{markup_len:>5} bytes")),
            dim(&format!("{elapsed:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, page_num: u32, total: usize, error: &str) {
        let elapsed = self.page_elapsed();
        self.errors.fetch_add(1, Ordering::SeqCst);

        let msg: String = if error.chars().count() > 80 {
            error.chars().take(79).chain(Some('\u{2026}')).collect()
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}  {}",
            red("✗"),
            page_num,
            total,
            red(&msg),
            dim(&format!("{elapsed:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_conversion_complete(&self, total_pages: usize, success_count: usize) {
        let failed = self.errors.load(Ordering::SeqCst);
        self.bar.finish_and_clear();

        if failed == 0 {
            eprintln!(
                "{} {} pages rendered",
                green("✔"),
                bold(&success_count.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} pages rendered  ({} dropped)",
                if failed == total_pages {
                    red("✘")
                } else {
                    cyan("⚠")
                },
                bold(&success_count.to_string()),
                total_pages,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Convert next to the input (document.epub)
  pdf2epub -p document.pdf

  # Choose the output path
  pdf2epub -p document.pdf -o books/document.epub

  # Offline rendering, no API key needed
  pdf2epub -p document.pdf --renderer template

  # Specific pages with a specific model
  pdf2epub -p paper.pdf --pages 1-5 --provider openai --model gpt-4o

  # Drive the pipeline from an exported layout
  pdf2epub -p paper.pdf --layout export/layout.json

  # Keep the intermediate files (layout.json, Images/, Text/)
  pdf2epub -p paper.pdf --work-dir ./paper-work

  # Show the extracted layout only
  pdf2epub -p document.pdf --inspect-only --json

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Path to libpdfium (file or directory)

Without any provider credentials the layout and images are still extracted,
but no page is rendered and no EPUB is written.
"#;

/// Convert PDF files to EPUB books.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2epub",
    version,
    about = "Convert PDF files to EPUB books, rendering each page's layout with an LLM",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF file path or HTTP/HTTPS URL.
    #[arg(short = 'p', long = "pdf_path")]
    pdf_path: String,

    /// Output EPUB path. Defaults to the input path with an .epub extension.
    #[arg(short = 'o', long = "output_epub_path", env = "PDF2EPUB_OUTPUT")]
    output_epub_path: Option<PathBuf>,

    /// Use a pre-exported layout JSON instead of extracting from the PDF.
    #[arg(long, env = "PDF2EPUB_LAYOUT")]
    layout: Option<PathBuf>,

    /// Page renderer: llm or template.
    #[arg(long, env = "PDF2EPUB_RENDERER", default_value = "llm")]
    renderer: RendererKind,

    /// LLM model ID.
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Page selection: all, 5, 3-15, or 1,3,5-7.
    #[arg(long, env = "PDF2EPUB_PAGES", default_value = "all")]
    pages: PageSelection,

    /// Book title. Defaults to the input file name.
    #[arg(long)]
    title: Option<String>,

    /// Book language (BCP 47).
    #[arg(long, env = "PDF2EPUB_LANGUAGE", default_value = "en")]
    language: String,

    /// Keep intermediate files in this directory.
    #[arg(long, env = "PDF2EPUB_WORK_DIR")]
    work_dir: Option<PathBuf>,

    /// Retries per page on renderer failure.
    #[arg(long, env = "PDF2EPUB_MAX_RETRIES", default_value_t = 2)]
    max_retries: u32,

    /// Per-attempt renderer timeout in seconds.
    #[arg(long, env = "PDF2EPUB_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// Max LLM output tokens per page.
    #[arg(long, env = "PDF2EPUB_MAX_TOKENS", default_value_t = 4096)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "PDF2EPUB_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, env = "PDF2EPUB_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "PDF2EPUB_PASSWORD")]
    password: Option<String>,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "PDF2EPUB_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Print the extracted layout only, no rendering.
    #[arg(long)]
    inspect_only: bool,

    /// Print JSON (layout or stats) on stdout.
    #[arg(long, env = "PDF2EPUB_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "PDF2EPUB_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDF2EPUB_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDF2EPUB_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs unless -v is given.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Input check ──────────────────────────────────────────────────────
    if !is_url(&cli.pdf_path) && !Path::new(&cli.pdf_path).exists() {
        eprintln!("{} input file not found: {}", red("error:"), cli.pdf_path);
        std::process::exit(1);
    }

    let progress_cb: Option<ProgressCallback> = if show_progress && !cli.inspect_only {
        let cb = CliProgressCallback::new_dynamic();
        Some(cb as Arc<dyn ConversionProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb).await?;

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        let layout = match cli.layout {
            Some(ref path) => JsonLayoutExtractor::new(path)
                .layout()
                .context("Failed to read layout")?,
            None => inspect(&cli.pdf_path, &config)
                .await
                .context("Failed to inspect PDF")?,
        };
        print_layout(&cli, &layout)?;
        return Ok(());
    }

    // ── Run conversion ───────────────────────────────────────────────────
    let output_path = cli
        .output_epub_path
        .clone()
        .unwrap_or_else(|| default_output_path(&cli.pdf_path));

    let mut output = match cli.layout {
        Some(ref path) => {
            let extractor: Arc<dyn DocumentExtractor> = Arc::new(JsonLayoutExtractor::new(path));
            convert_with_extractor(extractor, &config).await
        }
        None => convert(&cli.pdf_path, &config).await,
    }
    .context("Conversion failed")?;

    write_if_rendered(&mut output, &output_path)
        .with_context(|| format!("Failed to write {}", output_path.display()))?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&output.stats).context("Failed to serialise stats")?
        );
    } else if !cli.quiet {
        print_summary(&output.stats, &output_path, output.work_dir());
    }

    Ok(())
}

/// Map CLI args to `ConversionConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ConversionConfig> {
    let mut builder = ConversionConfig::builder()
        .renderer_kind(cli.renderer)
        .pages(cli.pages.clone())
        .language(cli.language.clone())
        .max_retries(cli.max_retries)
        .api_timeout_secs(cli.api_timeout)
        .max_tokens(cli.max_tokens)
        .temperature(cli.temperature)
        .download_timeout_secs(cli.download_timeout);

    if let Some(ref path) = cli.system_prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read system prompt from {:?}", path))?;
        builder = builder.system_prompt(prompt);
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(ref password) = cli.password {
        builder = builder.password(password.clone());
    }
    if let Some(ref dir) = cli.work_dir {
        builder = builder.work_dir(dir.clone());
    }
    if let Some(title) = cli.title.clone().or_else(|| title_from_input(&cli.pdf_path)) {
        builder = builder.title(title);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// `doc.pdf` → `doc.epub`; URLs land in the current directory.
fn default_output_path(input: &str) -> PathBuf {
    if is_url(input) {
        let name = input
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or("downloaded");
        return PathBuf::from(name).with_extension("epub");
    }
    Path::new(input).with_extension("epub")
}

fn title_from_input(input: &str) -> Option<String> {
    default_output_path(input)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
}

fn print_layout(cli: &Cli, layout: &LayoutDocument) -> Result<()> {
    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(layout).context("Failed to serialise layout")?
        );
        return Ok(());
    }
    println!("File:    {}", cli.pdf_path);
    if let Some(ref t) = layout.title {
        println!("Title:   {}", t);
    }
    println!("Pages:   {}", layout.page_count());
    for page in &layout.pages {
        println!(
            "  page {:>4}  {:>7.1} x {:<7.1} pt  {:>4} elements  {:>3} images",
            page.page_number,
            page.width_pt,
            page.height_pt,
            page.elements.len(),
            page.image_refs().count()
        );
    }
    Ok(())
}

fn print_summary(stats: &ConversionStats, output_path: &Path, work_dir: &Path) {
    if stats.renderer_skipped {
        eprintln!(
            "{}  no renderer configured: {} pages extracted, nothing written",
            cyan("⚠"),
            stats.total_pages
        );
        eprintln!(
            "   set OPENAI_API_KEY (or another provider key) or use {}",
            bold("--renderer template")
        );
        eprintln!("   {}", dim(&format!("work dir: {}", work_dir.display())));
        return;
    }
    eprintln!(
        "{}  {}/{} pages  {} images  {}ms  →  {}",
        if stats.failed_pages == 0 {
            green("✔")
        } else {
            cyan("⚠")
        },
        stats.processed_pages,
        stats.selected_pages,
        stats.images_packaged,
        stats.total_duration_ms,
        bold(&output_path.display().to_string()),
    );
    if stats.total_input_tokens > 0 {
        eprintln!(
            "   {} tokens in  /  {} tokens out",
            dim(&stats.total_input_tokens.to_string()),
            dim(&stats.total_output_tokens.to_string()),
        );
    }
}
