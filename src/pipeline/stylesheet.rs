//! Shared stylesheet for every page of the book.
//!
//! The `.page-content` box is inset by exactly the margins the coordinate
//! transformer subtracts, so absolutely positioned elements line up with
//! their source positions.

use crate::pipeline::geometry::PageMargins;

/// Path of the stylesheet inside the content directory.
pub const STYLESHEET_PATH: &str = "Styles/style.css";

/// Render the stylesheet for `margins`. Output depends on nothing else.
pub fn generate(margins: &PageMargins) -> String {
    format!(
        r#"@page {{
    margin-top: {top}pt;
    margin-left: {left}pt;
    margin-right: {right}pt;
    margin-bottom: {bottom}pt;
}}

body {{
    margin: 0;
    padding: 0;
    font-family: "Liberation Serif", serif;
    line-height: 1.4;
}}

.epub-page-container {{
    position: relative;
    margin: 0;
    padding: 0;
    overflow: hidden;
}}

.page-content {{
    position: absolute;
    top: {top}pt;
    left: {left}pt;
    right: {right}pt;
    bottom: {bottom}pt;
}}

.page-content .element {{
    position: absolute;
    margin: 0;
    padding: 0;
    overflow: visible;
}}

.page-content .text,
.page-content .other {{
    white-space: pre-wrap;
}}

.page-content h1,
.page-content h2,
.page-content h3,
.page-content h4,
.page-content h5,
.page-content h6 {{
    margin: 0;
    line-height: 1.2;
}}

.page-content ul {{
    margin: 0;
    padding-left: 1.2em;
}}

.page-content img {{
    display: block;
    width: 100%;
    height: 100%;
}}

.page-number {{
    position: absolute;
    bottom: 30pt;
    right: 30pt;
    text-align: right;
    font-size: 8pt;
    color: #555555;
}}
"#,
        top = margins.top,
        left = margins.left,
        right = margins.right,
        bottom = margins.bottom,
    )
}
