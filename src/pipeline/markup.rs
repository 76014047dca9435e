//! Page markup building: layout page → renderer request → markup fragment.
//!
//! [`build_request`] is pure. It walks the page's elements in order,
//! computes each content box, and resolves image references through the
//! [`ImageMap`] so the renderer only ever sees packaged paths.
//! [`build_page`] sends that request to a [`LayoutRenderer`] and normalises
//! the answer. A failure here costs exactly one page.

use crate::error::PageError;
use crate::model::{BBox, Element, Page, TextAttributes};
use crate::pipeline::geometry::{transform, ContentBox, PageMargins};
use crate::pipeline::images::ImageMap;
use crate::pipeline::postprocess::clean_fragment;
use crate::pipeline::renderer::{LayoutRenderer, RenderUsage};
use serde::Serialize;
use tracing::{debug, warn};

/// Self-describing renderer input for one page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderRequest {
    pub page_width: f32,
    pub page_height: f32,
    pub page_number: u32,
    pub margins: PageMargins,
    pub elements: Vec<RequestElement>,
}

/// One element of a [`RenderRequest`], in source order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestElement {
    #[serde(rename = "type")]
    pub kind: String,
    /// Raw page-space box.
    pub bbox: BBox,
    /// Box relative to the content area.
    pub content_box: ContentBox,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<u8>,
    /// Already-resolved reference, used verbatim in the markup.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributes: Option<TextAttributes>,
}

impl RequestElement {
    fn new(kind: &str, bbox: BBox, margins: &PageMargins) -> Self {
        Self {
            kind: kind.to_string(),
            bbox,
            content_box: transform(bbox, margins),
            text: None,
            level: None,
            image_path: None,
            items: None,
            attributes: None,
        }
    }
}

/// Accepted markup for one page.
#[derive(Debug, Clone, PartialEq)]
pub struct PageMarkupFragment {
    pub page_number: u32,
    pub markup: String,
}

/// Resolve an image reference, falling back to the last path segment of
/// `origin_ref` under the images directory.
fn resolve_image(origin_ref: &str, images: &ImageMap, page_number: u32) -> String {
    if let Some(img) = images.get(origin_ref) {
        return img.href.clone();
    }
    let literal = origin_ref
        .rsplit(['/', '\\'])
        .find(|s| !s.is_empty())
        .unwrap_or(origin_ref);
    warn!(
        "Page {}: image '{}' has no packaged file; using literal '{}'",
        page_number, origin_ref, literal
    );
    format!("../Images/{}", literal)
}

/// Build the renderer request for `page`. Element order is preserved.
pub fn build_request(page: &Page, images: &ImageMap, margins: &PageMargins) -> RenderRequest {
    let elements = page
        .elements
        .iter()
        .map(|element| {
            let mut req = RequestElement::new(element.kind(), element.bbox(), margins);
            match element {
                Element::Text {
                    text, attributes, ..
                } => {
                    req.text = Some(text.clone());
                    if !attributes.is_empty() {
                        req.attributes = Some(attributes.clone());
                    }
                }
                Element::Heading { text, level, .. } => {
                    req.text = Some(text.clone());
                    req.level = Some((*level).max(1));
                }
                Element::Image { origin_ref, .. } => {
                    req.image_path = Some(resolve_image(origin_ref, images, page.page_number));
                }
                Element::List { items, .. } => {
                    req.items = Some(items.clone());
                }
                Element::Other { text, .. } => {
                    req.text = text.clone();
                }
            }
            req
        })
        .collect();

    RenderRequest {
        page_width: page.width_pt,
        page_height: page.height_pt,
        page_number: page.page_number,
        margins: *margins,
        elements,
    }
}

/// Render one page into an accepted fragment.
pub async fn build_page(
    page: &Page,
    images: &ImageMap,
    margins: &PageMargins,
    renderer: &dyn LayoutRenderer,
) -> Result<(PageMarkupFragment, RenderUsage), PageError> {
    let request = build_request(page, images, margins);
    debug!(
        "Page {}: rendering {} elements",
        page.page_number,
        request.elements.len()
    );
    let rendered = renderer.render(&request).await?;
    let markup = clean_fragment(page.page_number, &rendered.content)?;
    Ok((
        PageMarkupFragment {
            page_number: page.page_number,
            markup,
        },
        rendered.usage,
    ))
}
