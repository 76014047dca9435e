//! Layout-to-markup renderers.
//!
//! A [`LayoutRenderer`] turns one [`RenderRequest`] into a markup string.
//! [`LlmLayoutRenderer`] asks a language model through `edgequake-llm`;
//! [`TemplateRenderer`] produces the same page structure deterministically
//! and needs no network.
//!
//! ## Retry Strategy
//!
//! Transport errors, timeouts and empty answers are retried with exponential
//! backoff (`retry_backoff_ms * 2^(attempt-1)`): with a 500 ms base and 2
//! retries the waits are 500 ms then 1 s. A single wait never exceeds 30 s.
//! Every attempt gets its own timeout.

use crate::config::ConversionConfig;
use crate::error::PageError;
use crate::pipeline::markup::{RenderRequest, RequestElement};
use crate::prompts::layout_system_prompt;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::sync::Arc;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// Token usage and retry count for one rendered page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RenderUsage {
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub retries: u32,
}

/// Raw renderer answer, before post-processing.
#[derive(Debug, Clone)]
pub struct RenderedMarkup {
    pub content: String,
    pub usage: RenderUsage,
}

/// Turns a page's render request into markup.
#[async_trait]
pub trait LayoutRenderer: Send + Sync {
    async fn render(&self, request: &RenderRequest) -> Result<RenderedMarkup, PageError>;
}

// ── LLM renderer ─────────────────────────────────────────────────────────────

/// Renders pages by sending the request JSON to an LLM provider.
pub struct LlmLayoutRenderer {
    provider: Arc<dyn LLMProvider>,
    system_prompt: String,
    options: CompletionOptions,
    max_retries: u32,
    retry_backoff_ms: u64,
    timeout: Duration,
}

impl LlmLayoutRenderer {
    /// Build a renderer for `provider` using the prompt, sampling, retry and
    /// timeout settings of `config`.
    pub fn new(provider: Arc<dyn LLMProvider>, config: &ConversionConfig) -> Self {
        Self {
            provider,
            system_prompt: config
                .system_prompt
                .clone()
                .unwrap_or_else(|| layout_system_prompt(&config.margins)),
            options: build_options(config),
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
            timeout: Duration::from_secs(config.api_timeout_secs),
        }
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }
}

/// Upper bound on a single retry wait.
const MAX_BACKOFF_MS: u64 = 30_000;

/// Wait before retry `attempt` (1-based): `base * 2^(attempt-1)`, capped.
fn backoff_ms(base_ms: u64, attempt: u32) -> u64 {
    let factor = 1u64.checked_shl(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
    base_ms.saturating_mul(factor).min(MAX_BACKOFF_MS)
}

/// Failure of a single attempt.
enum AttemptError {
    Transport(String),
    TimedOut,
    Empty,
}

#[async_trait]
impl LayoutRenderer for LlmLayoutRenderer {
    async fn render(&self, request: &RenderRequest) -> Result<RenderedMarkup, PageError> {
        let page = request.page_number;
        let payload = serde_json::to_string_pretty(request).map_err(|e| {
            PageError::MalformedResponse {
                page,
                detail: format!("request serialisation failed: {}", e),
            }
        })?;
        let messages = vec![
            ChatMessage::system(self.system_prompt.as_str()),
            ChatMessage::user(payload.as_str()),
        ];

        let mut last_err = AttemptError::Transport("no attempt made".into());

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = backoff_ms(self.retry_backoff_ms, attempt);
                warn!(
                    "Page {}: retry {}/{} after {}ms",
                    page, attempt, self.max_retries, backoff
                );
                sleep(Duration::from_millis(backoff)).await;
            }

            match timeout(self.timeout, self.provider.chat(&messages, Some(&self.options))).await {
                Ok(Ok(response)) if response.content.trim().is_empty() => {
                    warn!("Page {}: attempt {} returned no content", page, attempt + 1);
                    last_err = AttemptError::Empty;
                }
                Ok(Ok(response)) => {
                    debug!(
                        "Page {}: {} input tokens, {} output tokens",
                        page, response.prompt_tokens, response.completion_tokens
                    );
                    return Ok(RenderedMarkup {
                        content: response.content,
                        usage: RenderUsage {
                            input_tokens: response.prompt_tokens,
                            output_tokens: response.completion_tokens,
                            retries: attempt,
                        },
                    });
                }
                Ok(Err(e)) => {
                    let msg = e.to_string();
                    warn!("Page {}: attempt {} failed: {}", page, attempt + 1, msg);
                    last_err = AttemptError::Transport(msg);
                }
                Err(_) => {
                    warn!(
                        "Page {}: attempt {} timed out after {}s",
                        page,
                        attempt + 1,
                        self.timeout.as_secs()
                    );
                    last_err = AttemptError::TimedOut;
                }
            }
        }

        Err(match last_err {
            AttemptError::TimedOut => PageError::Timeout {
                page,
                secs: self.timeout.as_secs(),
            },
            AttemptError::Empty => PageError::EmptyResponse { page },
            AttemptError::Transport(detail) => PageError::RendererFailed {
                page,
                attempts: self.max_retries + 1,
                detail,
            },
        })
    }
}

/// Build `CompletionOptions` from the conversion config.
fn build_options(config: &ConversionConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

// ── Template renderer ────────────────────────────────────────────────────────

/// Emits positioned markup straight from the request's content boxes.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateRenderer;

/// Format a point value for CSS, dropping needless decimals.
fn pt(v: f32) -> String {
    let rounded = (v * 100.0).round() / 100.0;
    // Avoid "-0pt".
    if rounded == 0.0 {
        "0pt".to_string()
    } else {
        format!("{}pt", rounded)
    }
}

fn position_style(el: &RequestElement) -> String {
    let b = &el.content_box;
    format!(
        "position: absolute; left: {}; top: {}; width: {}; height: {};",
        pt(b.left),
        pt(b.top),
        pt(b.width),
        pt(b.height)
    )
}

/// CSS declarations for the element's text attributes, if any.
fn text_style(el: &RequestElement) -> String {
    let mut style = String::new();
    if let Some(attrs) = &el.attributes {
        if let Some(font) = &attrs.font_name {
            let clean: String = font
                .chars()
                .filter(|c| !matches!(c, '\'' | '"' | ';' | '{' | '}' | '<' | '>' | '&'))
                .collect();
            if !clean.is_empty() {
                let _ = write!(style, " font-family: '{}';", clean);
            }
        }
        if let Some(size) = attrs.font_size.filter(|s| s.is_finite() && *s > 0.0) {
            let _ = write!(style, " font-size: {};", pt(size));
        }
        if let Some(color) = attrs.color.as_deref().filter(|c| is_hex_color(c)) {
            let _ = write!(style, " color: {};", color);
        }
    }
    style
}

fn is_hex_color(c: &str) -> bool {
    let hex = c.strip_prefix('#').unwrap_or("");
    matches!(hex.len(), 3 | 6) && hex.chars().all(|ch| ch.is_ascii_hexdigit())
}

fn render_element(el: &RequestElement, page_number: u32, out: &mut String) {
    let pos = position_style(el);
    let text = el.text.as_deref().unwrap_or("");
    match el.kind.as_str() {
        "text" => {
            let _ = write!(
                out,
                "<div class=\"element text\" style=\"{} white-space: pre-wrap;{}\">{}</div>",
                pos,
                text_style(el),
                html_escape::encode_text(text)
            );
        }
        "heading" => {
            let level = el.level.unwrap_or(1).clamp(1, 6);
            let _ = write!(
                out,
                "<h{lvl} class=\"element heading\" style=\"{} margin: 0;\">{}</h{lvl}>",
                pos,
                html_escape::encode_text(text),
                lvl = level
            );
        }
        "image" => {
            let src = el.image_path.as_deref().unwrap_or("");
            let _ = write!(
                out,
                "<div class=\"element image\" style=\"{}\"><img src=\"{}\" alt=\"Image from page {}\" style=\"width: 100%; height: 100%;\" /></div>",
                pos,
                html_escape::encode_double_quoted_attribute(src),
                page_number
            );
        }
        "list" => {
            let _ = write!(out, "<ul class=\"element list\" style=\"{} margin: 0;\">", pos);
            for item in el.items.iter().flatten() {
                let _ = write!(out, "<li>{}</li>", html_escape::encode_text(item));
            }
            out.push_str("</ul>");
        }
        _ => {
            let _ = write!(
                out,
                "<div class=\"element other\" style=\"{} white-space: pre-wrap;\">{}</div>",
                pos,
                html_escape::encode_text(text)
            );
        }
    }
    out.push('\n');
}

impl TemplateRenderer {
    /// Render synchronously.
    pub fn render_markup(&self, request: &RenderRequest) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "<div class=\"epub-page-container\" style=\"position: relative; width: {}; height: {};\">",
            pt(request.page_width),
            pt(request.page_height)
        );
        out.push_str("<div class=\"page-content\">\n");
        for el in &request.elements {
            render_element(el, request.page_number, &mut out);
        }
        out.push_str("</div>\n");
        let _ = writeln!(out, "<div class=\"page-number\">{}</div>", request.page_number);
        out.push_str("</div>");
        out
    }
}

#[async_trait]
impl LayoutRenderer for TemplateRenderer {
    async fn render(&self, request: &RenderRequest) -> Result<RenderedMarkup, PageError> {
        Ok(RenderedMarkup {
            content: self.render_markup(request),
            usage: RenderUsage::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BBox, Element, Page, TextAttributes};
    use crate::pipeline::geometry::PageMargins;
    use crate::pipeline::images::ImageMap;
    use crate::pipeline::markup::build_request;

    #[test]
    fn backoff_doubles_then_caps() {
        assert_eq!(backoff_ms(500, 1), 500);
        assert_eq!(backoff_ms(500, 2), 1000);
        assert_eq!(backoff_ms(500, 3), 2000);
        assert_eq!(backoff_ms(500, 25), MAX_BACKOFF_MS);
        assert_eq!(backoff_ms(500, 70), MAX_BACKOFF_MS);
        assert_eq!(backoff_ms(u64::MAX, 2), MAX_BACKOFF_MS);
    }

    #[test]
    fn build_options_defaults() {
        let config = ConversionConfig::default();
        let opts = build_options(&config);
        assert_eq!(opts.temperature, Some(0.1));
        assert_eq!(opts.max_tokens, Some(4096));
    }

    #[test]
    fn pt_formatting() {
        assert_eq!(pt(228.0), "228pt");
        assert_eq!(pt(-62.0), "-62pt");
        assert_eq!(pt(12.5), "12.5pt");
        assert_eq!(pt(-0.0), "0pt");
    }

    #[test]
    fn hex_color_check() {
        assert!(is_hex_color("#333333"));
        assert!(is_hex_color("#abc"));
        assert!(!is_hex_color("red"));
        assert!(!is_hex_color("#12345g"));
    }

    fn hello_page() -> Page {
        Page::new(1, 612.0, 792.0).with_element(Element::Text {
            bbox: BBox::new(72.0, 72.0, 300.0, 100.0),
            text: "Hello <World> & co".into(),
            attributes: TextAttributes {
                font_name: Some("Arial".into()),
                font_size: Some(12.0),
                color: Some("#333333".into()),
            },
        })
    }

    #[test]
    fn template_positions_text_at_content_origin() {
        let req = build_request(&hello_page(), &ImageMap::default(), &PageMargins::default());
        let markup = TemplateRenderer.render_markup(&req);
        assert!(markup.starts_with("<div class=\"epub-page-container\""));
        assert!(markup.contains("width: 612pt; height: 792pt;"));
        assert!(markup.contains("left: 0pt; top: 0pt; width: 228pt; height: 28pt;"));
        assert!(markup.contains("font-family: 'Arial'; font-size: 12pt; color: #333333;"));
        assert!(markup.contains("Hello &lt;World&gt; &amp; co"));
        assert!(markup.contains("<div class=\"page-number\">1</div>"));
        assert!(markup.ends_with("</div>"));
    }

    #[test]
    fn template_emits_one_node_per_element_in_order() {
        let page = Page::new(4, 612.0, 792.0)
            .with_element(Element::Heading {
                bbox: BBox::new(72.0, 72.0, 300.0, 100.0),
                text: "Title".into(),
                level: 2,
            })
            .with_element(Element::Image {
                bbox: BBox::new(72.0, 120.0, 300.0, 300.0),
                origin_ref: "page4/img0".into(),
            })
            .with_element(Element::List {
                bbox: BBox::new(72.0, 320.0, 300.0, 400.0),
                items: vec!["one".into(), "two".into()],
            });
        let req = build_request(&page, &ImageMap::default(), &PageMargins::default());
        let markup = TemplateRenderer.render_markup(&req);

        let h = markup.find("<h2 class=\"element heading\"").unwrap();
        let i = markup.find("<img src=\"../Images/img0\"").unwrap();
        let l = markup.find("<ul class=\"element list\"").unwrap();
        assert!(h < i && i < l);
        assert_eq!(markup.matches("class=\"element ").count(), 3);
        assert!(markup.contains("<li>one</li><li>two</li>"));
        assert!(markup.contains("alt=\"Image from page 4\""));
    }

    #[tokio::test]
    async fn template_renderer_is_deterministic() {
        let req = build_request(&hello_page(), &ImageMap::default(), &PageMargins::default());
        let a = TemplateRenderer.render(&req).await.unwrap();
        let b = TemplateRenderer.render(&req).await.unwrap();
        assert_eq!(a.content, b.content);
        assert_eq!(a.usage, RenderUsage::default());
    }
}
