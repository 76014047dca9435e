//! Pipeline stages for PDF-to-EPUB conversion.
//!
//! Each submodule implements one transformation step and is tested on its
//! own.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ extract ──▶ images ──▶ markup ──▶ renderer ──▶ postprocess ──▶ package
//! (URL/path) (pdfium)   (Images/)  (request)  (LLM/template) (cleanup)      (zip)
//!                          geometry ┘                          stylesheet ┘
//! ```
//!
//! 1. [`input`]    canonicalise the user-supplied path or URL to a local file
//! 2. [`extract`]  pull positioned elements and raw images out of the PDF;
//!    runs in `spawn_blocking` because pdfium is not async-safe
//! 3. [`images`]   decode, re-encode and name image assets on disk
//! 4. [`geometry`] map PDF bounding boxes into the margin-relative content box
//! 5. [`markup`]   build the per-page render request and drive the renderer
//! 6. [`renderer`] LLM-backed renderer with retry/backoff, plus a
//!    deterministic template renderer
//! 7. [`postprocess`] strip fences and reject non-markup responses
//! 8. [`stylesheet`] / [`package`] generate the CSS and write the EPUB archive

pub mod extract;
pub mod geometry;
pub mod images;
pub mod input;
pub mod markup;
pub mod package;
pub mod postprocess;
pub mod renderer;
pub mod stylesheet;
