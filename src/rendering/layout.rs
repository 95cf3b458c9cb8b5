//! Block layout for export subtrees
//!
//! Elements stack vertically inside their parent's content box; absolutely
//! positioned elements are placed with `left`/`top` and take no flow space.
//! Text wraps on an estimated fixed advance, which is all the glyph-box
//! painter needs.

use crate::dom::{Document, NodeId};
use crate::rendering::style::{parse_color, parse_length, Color};
use crate::{Error, Result};

pub const DEFAULT_FONT_SIZE: f32 = 16.0;
/// Advance of one character as a fraction of the font size
pub const GLYPH_ADVANCE: f32 = 0.6;
/// Line height as a fraction of the font size
pub const LINE_HEIGHT: f32 = 1.25;

const SKIPPED_TAGS: &[&str] = &["head", "style", "script", "template", "title", "meta", "link", "noscript"];

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    pub fn scaled(&self, k: f32) -> Rect {
        Rect::new(self.x * k, self.y * k, self.width * k, self.height * k)
    }

    pub fn translated(&self, dx: f32, dy: f32) -> Rect {
        Rect::new(self.x + dx, self.y + dy, self.width, self.height)
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    /// Smallest rect containing both
    pub fn union(&self, other: &Rect) -> Rect {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        Rect::new(
            x,
            y,
            (self.x + self.width).max(other.x + other.width) - x,
            (self.y + self.height).max(other.y + other.height) - y,
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LayoutKind {
    Block,
    Image,
    Text {
        lines: Vec<String>,
        font_size: f32,
        line_height: f32,
        color: Color,
    },
}

/// A laid-out box: the node it came from, its border box and the opacity
/// accumulated from its ancestors within the laid-out subtree.
#[derive(Debug, Clone, PartialEq)]
pub struct LayoutNode {
    pub node: NodeId,
    pub rect: Rect,
    pub kind: LayoutKind,
    pub opacity: f32,
}

/// Inherited text properties
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Inherited {
    pub font_size: f32,
    pub color: Color,
    pub opacity: f32,
}

impl Default for Inherited {
    fn default() -> Self {
        Self {
            font_size: DEFAULT_FONT_SIZE,
            color: Color::BLACK,
            opacity: 1.0,
        }
    }
}

/// Font size and color a node inherits from its ancestors (opacity excluded)
pub fn inherited_for(doc: &Document, id: NodeId) -> Inherited {
    let mut chain = Vec::new();
    let mut cur = doc.parent(id);
    while let Some(n) = cur {
        chain.push(n);
        cur = doc.parent(n);
    }
    let mut inh = Inherited::default();
    for n in chain.into_iter().rev() {
        if let Some(fs) = doc.computed_value(n, "font-size").and_then(|v| parse_length(&v)) {
            inh.font_size = fs;
        }
        if let Some(c) = doc.computed_value(n, "color").and_then(|v| parse_color(&v)) {
            inh.color = c;
        }
    }
    inh
}

/// Lay out the whole document from `<body>` against the viewport
pub fn layout_document(doc: &Document) -> Vec<LayoutNode> {
    let vp = doc.viewport();
    let mut ctx = LayoutContext { doc, out: Vec::new(), root_width: None };
    let containing = Rect::new(0.0, 0.0, vp.width as f32, vp.height as f32);
    ctx.layout_element(doc.body(), containing, 0.0, Inherited::default());
    ctx.out
}

/// Rendered border box of an attached element, in page coordinates
pub fn measure(doc: &Document, id: NodeId) -> Option<Rect> {
    if !doc.is_attached(id) || !doc.is_element(id) {
        return None;
    }
    layout_document(doc)
        .into_iter()
        .find(|n| n.node == id)
        .map(|n| n.rect)
}

/// Lay out `id` and its descendants in local coordinates (root at 0,0).
///
/// The root keeps the width it has in the live page, so a detached copy with
/// the same explicit size produces identical geometry.
pub fn layout_subtree(doc: &Document, id: NodeId) -> Result<(Rect, Vec<LayoutNode>)> {
    let rendered = measure(doc, id)
        .ok_or_else(|| Error::InvalidTarget(format!("node {} is not rendered", id.index())))?;
    let mut ctx = LayoutContext {
        doc,
        out: Vec::new(),
        root_width: Some((id, rendered.width)),
    };
    let mut inherited = inherited_for(doc, id);
    inherited.opacity = 1.0;
    let containing = Rect::new(0.0, 0.0, rendered.width, rendered.height);
    ctx.layout_element(id, containing, 0.0, inherited);

    let Some(root) = ctx.out.first().map(|n| n.rect) else {
        return Err(Error::InvalidTarget(format!("node {} produced no box", id.index())));
    };
    let nodes = ctx
        .out
        .into_iter()
        .map(|mut n| {
            n.rect = n.rect.translated(-root.x, -root.y);
            n
        })
        .collect();
    Ok((Rect::new(0.0, 0.0, root.width, root.height), nodes))
}

struct LayoutContext<'a> {
    doc: &'a Document,
    out: Vec<LayoutNode>,
    root_width: Option<(NodeId, f32)>,
}

impl<'a> LayoutContext<'a> {
    /// Returns the flow height the element consumes in its parent
    fn layout_element(&mut self, id: NodeId, containing: Rect, cursor_y: f32, inherited: Inherited) -> f32 {
        let doc = self.doc;
        let Some(tag) = doc.tag(id) else { return 0.0 };
        if SKIPPED_TAGS.contains(&tag) {
            return 0.0;
        }
        let style = doc.computed_style(id);
        let get = |prop: &str| style.iter().find(|(k, _)| k == prop).map(|(_, v)| v.as_str());
        if get("display") == Some("none") {
            return 0.0;
        }

        let font_size = get("font-size").and_then(parse_length).unwrap_or(inherited.font_size);
        let color = get("color").and_then(parse_color).unwrap_or(inherited.color);
        let own_opacity = get("opacity").and_then(|v| v.trim().parse::<f32>().ok()).unwrap_or(1.0);
        let inh = Inherited {
            font_size,
            color,
            opacity: (inherited.opacity * own_opacity).clamp(0.0, 1.0),
        };

        let position = get("position").unwrap_or("static");
        let positioned = matches!(position, "absolute" | "fixed");
        let left = get("left").and_then(parse_length).unwrap_or(0.0);
        let top = get("top").and_then(parse_length).unwrap_or(0.0);
        let is_img = tag == "img";

        let attr_len = |name: &str| doc.attr(id, name).and_then(parse_length);
        let explicit_width = get("width")
            .and_then(parse_length)
            .or_else(|| if is_img { attr_len("width") } else { None });
        let explicit_height = get("height")
            .and_then(parse_length)
            .or_else(|| if is_img { attr_len("height") } else { None });

        let (x, y) = if position == "fixed" {
            (left, top)
        } else if positioned {
            (containing.x + left, containing.y + top)
        } else {
            (containing.x, containing.y + cursor_y)
        };
        let width = match self.root_width {
            Some((root, w)) if root == id => w,
            _ => explicit_width
                .unwrap_or(if positioned { containing.width - left } else { containing.width })
                .max(0.0),
        };
        let padding = get("padding")
            .and_then(|p| p.split_whitespace().next().and_then(parse_length))
            .unwrap_or(0.0)
            .max(0.0);

        let slot = self.out.len();
        self.out.push(LayoutNode {
            node: id,
            rect: Rect::new(x, y, width, 0.0),
            kind: if is_img { LayoutKind::Image } else { LayoutKind::Block },
            opacity: inh.opacity,
        });

        let content = Rect::new(
            x + padding,
            y + padding,
            (width - 2.0 * padding).max(0.0),
            0.0,
        );
        let mut flow = 0.0;
        if !is_img {
            for child in doc.children(id).to_vec() {
                if let Some(text) = doc.text(child) {
                    flow += self.layout_text(child, text, content, flow, inh);
                } else {
                    flow += self.layout_element(child, content, flow, inh);
                }
            }
        }

        let height = explicit_height.unwrap_or(flow + 2.0 * padding).max(0.0);
        self.out[slot].rect.height = height;
        if positioned {
            0.0
        } else {
            height
        }
    }

    fn layout_text(&mut self, id: NodeId, text: &str, content: Rect, cursor_y: f32, inh: Inherited) -> f32 {
        let lines = wrap_text(text, content.width, inh.font_size);
        if lines.is_empty() {
            return 0.0;
        }
        let line_height = inh.font_size * LINE_HEIGHT;
        let height = lines.len() as f32 * line_height;
        self.out.push(LayoutNode {
            node: id,
            rect: Rect::new(content.x, content.y + cursor_y, content.width, height),
            kind: LayoutKind::Text {
                lines,
                font_size: inh.font_size,
                line_height,
                color: inh.color,
            },
            opacity: inh.opacity,
        });
        height
    }
}

/// Greedy word wrap on the fixed glyph advance
pub fn wrap_text(text: &str, width: f32, font_size: f32) -> Vec<String> {
    let advance = font_size * GLYPH_ADVANCE;
    let chars_per_line = if advance > 0.0 { (width / advance).floor().max(1.0) as usize } else { 1 };
    let mut lines = Vec::new();
    let mut cur = String::new();
    for word in text.split_whitespace() {
        let cur_len = cur.chars().count();
        if cur_len > 0 && cur_len + 1 + word.chars().count() > chars_per_line {
            lines.push(std::mem::take(&mut cur));
        }
        if !cur.is_empty() {
            cur.push(' ');
        }
        cur.push_str(word);
    }
    if !cur.is_empty() {
        lines.push(cur);
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Viewport;

    fn doc(html: &str) -> Document {
        Document::parse(html, Viewport { width: 400, height: 300 })
    }

    #[test]
    fn blocks_stack_vertically_with_padding() {
        let d = doc(r#"<div id="a" style="padding: 10px"><div style="height: 20px"></div><div style="height: 30px"></div></div>"#);
        let a = d.query_selector("#a").unwrap();
        let rect = measure(&d, a).unwrap();
        assert_eq!(rect, Rect::new(0.0, 0.0, 400.0, 70.0));

        let (root, nodes) = layout_subtree(&d, a).unwrap();
        assert_eq!(root.height, 70.0);
        assert_eq!(nodes[1].rect, Rect::new(10.0, 10.0, 380.0, 20.0));
        assert_eq!(nodes[2].rect, Rect::new(10.0, 30.0, 380.0, 30.0));
    }

    #[test]
    fn absolute_children_do_not_take_flow_space() {
        let d = doc(r#"<div id="a" style="width: 300px; height: 200px"><span style="position: absolute; left: 90px; top: 80px; width: 120px">Now</span></div>"#);
        let a = d.query_selector("#a").unwrap();
        let (root, nodes) = layout_subtree(&d, a).unwrap();
        assert_eq!(root, Rect::new(0.0, 0.0, 300.0, 200.0));
        let span = nodes.iter().find(|n| d.tag(n.node) == Some("span")).unwrap();
        assert_eq!(span.rect.x, 90.0);
        assert_eq!(span.rect.y, 80.0);
        assert_eq!(span.rect.width, 120.0);
    }

    #[test]
    fn layout_subtree_is_local_to_root() {
        let d = doc(r#"<div style="height: 50px"></div><div id="b" style="width: 100px; height: 40px"></div>"#);
        let b = d.query_selector("#b").unwrap();
        assert_eq!(measure(&d, b).unwrap().y, 50.0);
        let (root, nodes) = layout_subtree(&d, b).unwrap();
        assert_eq!(root, Rect::new(0.0, 0.0, 100.0, 40.0));
        assert_eq!(nodes[0].rect.y, 0.0);
    }

    #[test]
    fn hidden_and_metadata_nodes_are_skipped() {
        let d = doc(r#"<div id="a"><style>p{}</style><p style="display:none">x</p></div>"#);
        let a = d.query_selector("#a").unwrap();
        let (_, nodes) = layout_subtree(&d, a).unwrap();
        assert_eq!(nodes.len(), 1);
        assert!(measure(&d, d.query_selector("p").unwrap()).is_none());
    }

    #[test]
    fn text_inherits_font_size_and_color() {
        let d = doc(r#"<div style="font-size: 20px; color: #fff"><p id="p">Hello world</p></div>"#);
        let p = d.query_selector("#p").unwrap();
        let (_, nodes) = layout_subtree(&d, p).unwrap();
        match &nodes[1].kind {
            LayoutKind::Text { font_size, color, lines, .. } => {
                assert_eq!(*font_size, 20.0);
                assert_eq!(*color, Color::WHITE);
                assert_eq!(lines, &vec!["Hello world".to_string()]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn wrap_text_breaks_on_words() {
        // 10 chars per line at 16px over 100px
        let lines = wrap_text("alpha beta gamma delta", 100.0, 16.0);
        assert_eq!(lines, vec!["alpha beta", "gamma", "delta"]);
    }
}
