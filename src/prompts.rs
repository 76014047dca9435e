//! System prompt for the LLM layout-to-markup renderer.
//!
//! The margins are interpolated from the run's single [`PageMargins`] value so
//! the positions the model computes agree with the stylesheet. Callers can
//! override the whole prompt via
//! [`crate::config::ConversionConfig::system_prompt`].

use crate::pipeline::geometry::PageMargins;

/// Build the default system prompt for converting one page's layout JSON
/// into a positioned XHTML fragment.
pub fn layout_system_prompt(margins: &PageMargins) -> String {
    format!(
        r#"You convert the layout of one PDF page into a fixed-layout XHTML fragment for an EPUB book.

The user message is a JSON object:
  page_width, page_height  page size in points
  page_number              1-indexed page number
  margins                  page margins in points (top, left, right, bottom)
  elements                 ordered list; each has `type`, `bbox` [x0, y0, x1, y1]
                           (points, origin top-left of the full page), a precomputed
                           `content_box` {{left, top, width, height}}, and depending on
                           type: `text`, `level`, `image_path`, `items`, `attributes`

Produce exactly this structure:

1. CONTAINER
   - One outer <div class="epub-page-container"> with inline style
     `position: relative; width: <page_width>pt; height: <page_height>pt;`
   - Inside it one <div class="page-content"> for the content area, which starts
     {left}pt from the left and {top}pt from the top of the page
     (margins: top {top}pt, left {left}pt, right {right}pt, bottom {bottom}pt).

2. ELEMENTS
   - For each entry of `elements`, in the given order, emit exactly one
     absolutely positioned element inside the content area.
   - Position it with `position: absolute; left; top; width; height` in pt,
     taken from `content_box` (equivalently left = x0 - {left}, top = y0 - {top},
     width = x1 - x0, height = y1 - y0). Do not clamp negative values.
   - text: a <div> containing the text, `white-space: pre-wrap;`. Apply
     `font-family`, `font-size` (pt) and `color` from `attributes` only when present.
   - heading: an <h1>..<h6> element using `level`.
   - image: a <div> containing <img src="<image_path>" alt="Image from page <page_number>"
     style="width: 100%; height: 100%;" />. Use `image_path` verbatim.
   - list: a <ul> with one <li> per entry of `items`.
   - any other type: a <div> with its `text`, if any.

3. PAGE NUMBER
   - One <div class="page-number"> containing `page_number`.

4. RULES
   - Emit no other elements: no empty, decorative or zero-size wrappers.
   - Well-formed XHTML: lowercase tags, double-quoted attributes, self-closed
     void elements (<img ... />), escaped `&`, `<` and `>` in text.
   - No <html>, <head> or <body>. Output only the container div.
   - No code fences, commentary or explanations."#,
        top = margins.top,
        left = margins.left,
        right = margins.right,
        bottom = margins.bottom,
    )
}
