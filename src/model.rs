//! Layout model: the page structure produced by a document extractor.
//!
//! A [`LayoutDocument`] is read-only to the rest of the pipeline. Element
//! order within a page is presentation order and is preserved end-to-end;
//! absolutely positioned output does not otherwise convey sequence.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// Axis-aligned rectangle in page-space points, origin top-left.
///
/// Serialised as `[x0, y0, x1, y1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f32; 4]", into = "[f32; 4]")]
pub struct BBox {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl BBox {
    /// Build a box, swapping coordinates so that `x1 >= x0` and `y1 >= y0`.
    pub fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self {
            x0: x0.min(x1),
            y0: y0.min(y1),
            x1: x0.max(x1),
            y1: y0.max(y1),
        }
    }

    pub fn width(&self) -> f32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f32 {
        self.y1 - self.y0
    }
}

impl From<[f32; 4]> for BBox {
    fn from(v: [f32; 4]) -> Self {
        BBox::new(v[0], v[1], v[2], v[3])
    }
}

impl From<BBox> for [f32; 4] {
    fn from(b: BBox) -> Self {
        [b.x0, b.y0, b.x1, b.y1]
    }
}

/// Optional typography of a text run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextAttributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_name: Option<String>,
    /// Font size in points.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_size: Option<f32>,
    /// Hex colour, e.g. `#333333`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl TextAttributes {
    pub fn is_empty(&self) -> bool {
        self.font_name.is_none() && self.font_size.is_none() && self.color.is_none()
    }
}

/// One positioned block on a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Element {
    Text {
        bbox: BBox,
        text: String,
        #[serde(default, skip_serializing_if = "TextAttributes::is_empty")]
        attributes: TextAttributes,
    },
    Heading {
        bbox: BBox,
        text: String,
        level: u8,
    },
    Image {
        bbox: BBox,
        origin_ref: String,
    },
    List {
        bbox: BBox,
        items: Vec<String>,
    },
    Other {
        bbox: BBox,
        /// The source's own type name, if it had one.
        kind: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },
}

impl Element {
    pub fn bbox(&self) -> BBox {
        match self {
            Element::Text { bbox, .. }
            | Element::Heading { bbox, .. }
            | Element::Image { bbox, .. }
            | Element::List { bbox, .. }
            | Element::Other { bbox, .. } => *bbox,
        }
    }

    /// Type tag used in renderer requests.
    pub fn kind(&self) -> &str {
        match self {
            Element::Text { .. } => "text",
            Element::Heading { .. } => "heading",
            Element::Image { .. } => "image",
            Element::List { .. } => "list",
            Element::Other { kind, .. } => kind,
        }
    }

    /// Convert a loosely-typed element dictionary into the closed variant.
    ///
    /// Never fails: anything that does not fit a known shape becomes
    /// [`Element::Other`] carrying whatever text could be found.
    pub fn from_value(value: &Value) -> Element {
        let bbox = value
            .get("bbox")
            .and_then(parse_bbox)
            .unwrap_or(BBox::new(0.0, 0.0, 0.0, 0.0));
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("other")
            .to_ascii_lowercase();
        let text = string_field(value, &["text", "content"]);

        match kind.as_str() {
            "text" | "paragraph" => match text {
                Some(text) => Element::Text {
                    bbox,
                    text,
                    attributes: parse_attributes(value),
                },
                None => other(bbox, kind, None),
            },
            "heading" | "title" | "section_header" => match text {
                Some(text) => Element::Heading {
                    bbox,
                    text,
                    level: parse_level(value.get("level")),
                },
                None => other(bbox, kind, None),
            },
            "image" | "picture" | "figure" => {
                match string_field(value, &["origin_ref", "ref", "image_path", "src"]) {
                    Some(origin_ref) => Element::Image { bbox, origin_ref },
                    None => other(bbox, kind, text),
                }
            }
            "list" => {
                let items: Option<Vec<String>> = value.get("items").and_then(Value::as_array).map(
                    |items| {
                        items
                            .iter()
                            .filter_map(|item| match item {
                                Value::String(s) => Some(s.clone()),
                                Value::Object(_) => string_field(item, &["text", "content"]),
                                Value::Null => None,
                                other => Some(other.to_string()),
                            })
                            .collect()
                    },
                );
                match items {
                    Some(items) => Element::List { bbox, items },
                    None => other(bbox, kind, text),
                }
            }
            _ => other(bbox, kind, text),
        }
    }
}

fn other(bbox: BBox, kind: String, text: Option<String>) -> Element {
    Element::Other { bbox, kind, text }
}

fn string_field(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| value.get(*k).and_then(Value::as_str))
        .map(str::to_string)
}

fn parse_bbox(value: &Value) -> Option<BBox> {
    let coords: Vec<f32> = match value {
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_f64)
            .map(|v| v as f32)
            .collect(),
        Value::Object(map) => ["x0", "y0", "x1", "y1"]
            .iter()
            .filter_map(|k| map.get(*k).and_then(Value::as_f64))
            .map(|v| v as f32)
            .collect(),
        _ => return None,
    };
    if coords.len() != 4 || coords.iter().any(|c| !c.is_finite()) {
        return None;
    }
    Some(BBox::new(coords[0], coords[1], coords[2], coords[3]))
}

fn parse_attributes(value: &Value) -> TextAttributes {
    let source = value.get("attributes").unwrap_or(value);
    TextAttributes {
        font_name: string_field(source, &["font_name"]),
        font_size: source
            .get("font_size")
            .or_else(|| source.get("font_size_pt"))
            .and_then(Value::as_f64)
            .map(|v| v as f32),
        color: string_field(source, &["color"]),
    }
}

/// Heading level, defaulting to 1 when absent or not a positive integer.
pub fn parse_level(value: Option<&Value>) -> u8 {
    value
        .and_then(Value::as_i64)
        .filter(|l| *l >= 1)
        .map(|l| l.min(6) as u8)
        .unwrap_or(1)
}

/// One page of the extracted layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    /// 1-indexed page number; unique within the document.
    pub page_number: u32,
    pub width_pt: f32,
    pub height_pt: f32,
    pub elements: Vec<Element>,
}

impl Page {
    pub fn new(page_number: u32, width_pt: f32, height_pt: f32) -> Self {
        Self {
            page_number,
            width_pt,
            height_pt,
            elements: Vec::new(),
        }
    }

    pub fn with_element(mut self, element: Element) -> Self {
        self.elements.push(element);
        self
    }

    /// Origin references of every image element on the page, in order.
    pub fn image_refs(&self) -> impl Iterator<Item = &str> {
        self.elements.iter().filter_map(|e| match e {
            Element::Image { origin_ref, .. } => Some(origin_ref.as_str()),
            _ => None,
        })
    }
}

/// Root of an extracted layout: the ordered pages of one PDF.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LayoutDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub pages: Vec<Page>,
}

impl LayoutDocument {
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Parse a loosely-typed layout export.
    ///
    /// Pages may use `page_number` or `page_no`; missing numbers fall back
    /// to position. Geometry keys accept both `width_pt` and `page_width`.
    pub fn from_value(value: &Value) -> Result<LayoutDocument, String> {
        let pages = value
            .get("pages")
            .and_then(Value::as_array)
            .ok_or_else(|| "missing 'pages' array".to_string())?;

        let mut out = Vec::with_capacity(pages.len());
        for (i, page) in pages.iter().enumerate() {
            let number = page
                .get("page_number")
                .or_else(|| page.get("page_no"))
                .and_then(Value::as_u64)
                .filter(|n| *n >= 1)
                .map(|n| n as u32)
                .unwrap_or(i as u32 + 1);
            let dim = |keys: &[&str]| {
                keys.iter()
                    .find_map(|k| page.get(*k).and_then(Value::as_f64))
                    .map(|v| v as f32)
                    .unwrap_or(0.0)
            };
            let elements = page
                .get("elements")
                .and_then(Value::as_array)
                .map(|els| els.iter().map(Element::from_value).collect())
                .unwrap_or_default();
            out.push(Page {
                page_number: number,
                width_pt: dim(&["width_pt", "page_width", "width"]),
                height_pt: dim(&["height_pt", "page_height", "height"]),
                elements,
            });
        }
        let mut doc = LayoutDocument {
            title: value
                .get("title")
                .and_then(Value::as_str)
                .map(str::to_string),
            pages: out,
        };
        doc.normalize_pages();
        Ok(doc)
    }

    /// Sort pages by number and drop any page repeating an earlier number.
    ///
    /// The first occurrence in source order wins. Returns how many pages
    /// were dropped.
    pub fn normalize_pages(&mut self) -> usize {
        let before = self.pages.len();
        // Stable, so duplicates keep their source order.
        self.pages.sort_by_key(|p| p.page_number);
        self.pages.dedup_by(|later, earlier| {
            let dup = later.page_number == earlier.page_number;
            if dup {
                warn!("Duplicate page number {}: keeping the first", later.page_number);
            }
            dup
        });
        before - self.pages.len()
    }
}
