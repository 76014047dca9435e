//! Post-processing: normalise renderer output into an accepted fragment.
//!
//! Models wrap markup in code fences despite being told not to, and some
//! providers return CRLF line endings. The rules here undo both and then
//! decide whether what is left looks like markup at all. Anything that does
//! not is a page failure, never a silently accepted fragment.
//!
//! ## Rule Order
//!
//! 1. Normalise line endings (CRLF / CR → LF)
//! 2. Strip one outer code fence: ```` ``` ````, ```` ```xhtml ````,
//!    ```` ```html ````, ```` ```xml ````
//! 3. Strip invisible Unicode (BOM, zero-width spaces)
//! 4. Trim surrounding whitespace
//! 5. Shape check: non-empty, starts with `<`, ends with `>`

use crate::error::PageError;
use once_cell::sync::Lazy;
use regex::Regex;

/// Fence languages recognised around renderer output.
pub const FENCE_LANGUAGES: &[&str] = &["xhtml", "html", "xml"];

/// Normalise raw renderer output for `page`.
///
/// Returns the cleaned fragment, or the [`PageError`] that drops the page.
pub fn clean_fragment(page: u32, raw: &str) -> Result<String, PageError> {
    let s = normalise_line_endings(raw);
    let s = strip_code_fences(&s);
    let s = remove_invisible_chars(&s);
    let s = s.trim();

    if s.is_empty() {
        return Err(PageError::EmptyResponse { page });
    }
    if !(s.starts_with('<') && s.ends_with('>')) {
        return Err(PageError::MalformedResponse {
            page,
            detail: format!("not a markup fragment: {:?}", preview(s)),
        });
    }
    Ok(s.to_string())
}

// ── Rule 1: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 2: Strip outer code fences ──────────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^```(?:xhtml|html|xml)?[ \t]*\n(.*?)\n?```\s*$")
        .expect("fence regex is valid")
});

fn strip_code_fences(input: &str) -> String {
    match RE_OUTER_FENCES.captures(input.trim()) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    }
}

// ── Rule 3: Strip invisible Unicode ──────────────────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input
        .chars()
        .filter(|c| !matches!(c, '\u{FEFF}' | '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{2060}'))
        .collect()
}

fn preview(s: &str) -> String {
    s.chars().take(40).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_xhtml_fence() {
        let raw = "```xhtml\n<div class=\"page-content\">Hi</div>\n```";
        assert_eq!(
            clean_fragment(1, raw).unwrap(),
            "<div class=\"page-content\">Hi</div>"
        );
    }

    #[test]
    fn strips_every_recognised_fence() {
        for lang in ["", "html", "xml", "xhtml"] {
            let raw = format!("  ```{lang}\n<p>x</p>\n```  \n");
            assert_eq!(clean_fragment(1, &raw).unwrap(), "<p>x</p>", "lang={lang}");
        }
    }

    #[test]
    fn unknown_fence_language_is_rejected() {
        let raw = "```markdown\n<p>x</p>\n```";
        assert!(matches!(
            clean_fragment(4, raw),
            Err(PageError::MalformedResponse { page: 4, .. })
        ));
    }

    #[test]
    fn unfenced_markup_is_trimmed() {
        assert_eq!(clean_fragment(1, "\n\n  <p>a</p>\r\n").unwrap(), "<p>a</p>");
    }

    #[test]
    fn crlf_inside_fence() {
        let raw = "```html\r\n<p>a</p>\r\n<p>b</p>\r\n```\r\n";
        assert_eq!(clean_fragment(1, raw).unwrap(), "<p>a</p>\n<p>b</p>");
    }

    #[test]
    fn empty_and_fence_only_are_empty_responses() {
        for raw in ["", "   \n", "```\n```", "```xhtml\n\n```", "\u{FEFF}"] {
            assert_eq!(
                clean_fragment(9, raw),
                Err(PageError::EmptyResponse { page: 9 }),
                "raw={raw:?}"
            );
        }
    }

    #[test]
    fn prose_is_malformed() {
        let err = clean_fragment(2, "Sorry, I cannot help with that.").unwrap_err();
        assert_eq!(err.page(), 2);
        assert!(matches!(err, PageError::MalformedResponse { .. }));
    }

    #[test]
    fn bom_is_removed() {
        assert_eq!(clean_fragment(1, "\u{FEFF}<p>a</p>").unwrap(), "<p>a</p>");
    }
}
