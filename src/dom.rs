//! Arena-backed DOM used as the live document of an export.
//!
//! Nodes live in a flat arena indexed by [`NodeId`]. Removing a node only
//! detaches it from its parent; ids stay valid for the lifetime of the
//! document, so stale handles are detected with [`Document::is_attached`].
//! Computed style cascades the attached `<style>` sheets and the inline
//! `style` attribute; see [`Document::computed_style`].

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::Arc;

use scraper::{ElementRef, Html};

use crate::css::{self, Declaration, Selector, Specificity, StyleRule};
use crate::{Error, Result, Viewport};

pub use crate::css::{parse_declarations, serialize_declarations};

/// Shorthands that reset their longhands (`transition` clears `transition-*`)
const RESETTING_SHORTHANDS: &[&str] = &["transition", "animation", "background", "padding"];

/// Shared handle to the live document. The export model is single-threaded,
/// so plain `Rc<RefCell<_>>` is enough.
pub type SharedDocument = Rc<RefCell<Document>>;

/// Index of a node inside a [`Document`] arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeData {
    Element {
        tag: String,
        attrs: BTreeMap<String, String>,
    },
    Text(String),
}

#[derive(Debug, Clone)]
pub struct Node {
    pub data: NodeData,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<Node>,
    root: NodeId,
    head: NodeId,
    body: NodeId,
    viewport: Viewport,
    // parsed rules of the attached `<style>` elements, dropped on any tree change
    sheet: RefCell<Option<Arc<Vec<StyleRule>>>>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new(Viewport::default())
    }
}

impl Document {
    /// Create an empty `<html><head></head><body></body></html>` document
    pub fn new(viewport: Viewport) -> Self {
        let mut doc = Self {
            nodes: Vec::new(),
            root: NodeId(0),
            head: NodeId(0),
            body: NodeId(0),
            viewport,
            sheet: RefCell::new(None),
        };
        let root = doc.create_element("html");
        let head = doc.create_element("head");
        let body = doc.create_element("body");
        doc.link(root, head);
        doc.link(root, body);
        doc.root = root;
        doc.head = head;
        doc.body = body;
        doc
    }

    /// Parse an HTML document. The `<body>` subtree is imported along with
    /// the `<style>` elements of `<head>`; comments and whitespace-only text
    /// nodes are dropped.
    pub fn parse(html: &str, viewport: Viewport) -> Self {
        let parsed = Html::parse_document(html);
        let mut doc = Self::new(viewport);
        for section in parsed.root_element().children().filter_map(ElementRef::wrap) {
            match section.value().name() {
                "head" => {
                    let head_id = doc.head;
                    for style in section
                        .children()
                        .filter_map(ElementRef::wrap)
                        .filter(|e| e.value().name() == "style")
                    {
                        doc.import_element(style, head_id);
                    }
                }
                "body" => {
                    let body_id = doc.body;
                    if let Some(attrs) = doc.attrs_mut(body_id) {
                        for (k, v) in section.value().attrs() {
                            attrs.insert(k.to_string(), v.to_string());
                        }
                    }
                    doc.import_children(section, body_id);
                }
                _ => {}
            }
        }
        doc
    }

    fn import_element(&mut self, el: ElementRef<'_>, parent: NodeId) {
        let id = self.create_element(el.value().name());
        if let Some(attrs) = self.attrs_mut(id) {
            for (k, v) in el.value().attrs() {
                attrs.insert(k.to_string(), v.to_string());
            }
        }
        self.link(parent, id);
        self.import_children(el, id);
    }

    fn import_children(&mut self, el: ElementRef<'_>, parent: NodeId) {
        for child in el.children() {
            match child.value() {
                scraper::Node::Element(_) => {
                    if let Some(child_el) = ElementRef::wrap(child) {
                        self.import_element(child_el, parent);
                    }
                }
                scraper::Node::Text(text) => {
                    let s: &str = text;
                    if !s.trim().is_empty() {
                        let id = self.create_text(s);
                        self.link(parent, id);
                    }
                }
                _ => {}
            }
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn head(&self) -> NodeId {
        self.head
    }

    pub fn body(&self) -> NodeId {
        self.body
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    pub fn is_element(&self, id: NodeId) -> bool {
        matches!(self.get(id).map(|n| &n.data), Some(NodeData::Element { .. }))
    }

    pub fn tag(&self, id: NodeId) -> Option<&str> {
        match &self.get(id)?.data {
            NodeData::Element { tag, .. } => Some(tag.as_str()),
            NodeData::Text(_) => None,
        }
    }

    /// Text of a text node (`None` for elements)
    pub fn text(&self, id: NodeId) -> Option<&str> {
        match &self.get(id)?.data {
            NodeData::Text(t) => Some(t.as_str()),
            NodeData::Element { .. } => None,
        }
    }

    pub fn attrs(&self, id: NodeId) -> Option<&BTreeMap<String, String>> {
        match &self.get(id)?.data {
            NodeData::Element { attrs, .. } => Some(attrs),
            NodeData::Text(_) => None,
        }
    }

    fn attrs_mut(&mut self, id: NodeId) -> Option<&mut BTreeMap<String, String>> {
        match &mut self.nodes.get_mut(id.0)?.data {
            NodeData::Element { attrs, .. } => Some(attrs),
            NodeData::Text(_) => None,
        }
    }

    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        self.attrs(id)?.get(name).map(|s| s.as_str())
    }

    pub fn set_attr(&mut self, id: NodeId, name: &str, value: &str) -> Result<()> {
        let attrs = self
            .attrs_mut(id)
            .ok_or_else(|| Error::InvalidTarget(format!("node {} is not an element", id.0)))?;
        attrs.insert(name.to_string(), value.to_string());
        Ok(())
    }

    pub fn remove_attr(&mut self, id: NodeId, name: &str) {
        if let Some(attrs) = self.attrs_mut(id) {
            attrs.remove(name);
        }
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.get(id)?.parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.get(id).map(|n| n.children.as_slice()).unwrap_or(&[])
    }

    /// Whether the node is reachable from the document root
    pub fn is_attached(&self, id: NodeId) -> bool {
        let mut cur = Some(id);
        while let Some(n) = cur {
            if n == self.root {
                return true;
            }
            cur = self.parent(n);
        }
        false
    }

    pub fn create_element(&mut self, tag: &str) -> NodeId {
        self.push(NodeData::Element {
            tag: tag.to_ascii_lowercase(),
            attrs: BTreeMap::new(),
        })
    }

    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.push(NodeData::Text(text.to_string()))
    }

    fn push(&mut self, data: NodeData) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            data,
            parent: None,
            children: Vec::new(),
        });
        id
    }

    fn link(&mut self, parent: NodeId, child: NodeId) {
        *self.sheet.get_mut() = None;
        self.nodes[child.0].parent = Some(parent);
        self.nodes[parent.0].children.push(child);
    }

    /// Append `child` to `parent`, detaching it from its previous parent first
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        if !self.is_element(parent) {
            return Err(Error::InvalidTarget(format!("node {} cannot have children", parent.0)));
        }
        if self.get(child).is_none() {
            return Err(Error::InvalidTarget(format!("unknown node {}", child.0)));
        }
        let mut cur = Some(parent);
        while let Some(n) = cur {
            if n == child {
                return Err(Error::InvalidTarget("cannot append a node inside itself".to_string()));
            }
            cur = self.parent(n);
        }
        self.remove(child);
        self.link(parent, child);
        Ok(())
    }

    /// Detach a node (and its subtree) from its parent. No-op when detached.
    pub fn remove(&mut self, id: NodeId) {
        if let Some(parent) = self.parent(id) {
            *self.sheet.get_mut() = None;
            self.nodes[parent.0].children.retain(|c| *c != id);
            self.nodes[id.0].parent = None;
        }
    }

    /// Copy a subtree. The copy is detached and shares nothing with the source.
    pub fn deep_clone(&mut self, id: NodeId) -> Result<NodeId> {
        let data = self
            .get(id)
            .map(|n| n.data.clone())
            .ok_or_else(|| Error::InvalidTarget(format!("unknown node {}", id.0)))?;
        let copy = self.push(data);
        let children = self.children(id).to_vec();
        for child in children {
            let child_copy = self.deep_clone(child)?;
            self.link(copy, child_copy);
        }
        Ok(copy)
    }

    /// Preorder traversal including `id` itself
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(n) = stack.pop() {
            if self.get(n).is_none() {
                continue;
            }
            out.push(n);
            for c in self.children(n).iter().rev() {
                stack.push(*c);
            }
        }
        out
    }

    /// Elements under `scope` (inclusive) carrying the attribute `name`
    pub fn elements_with_attr(&self, scope: NodeId, name: &str) -> Vec<NodeId> {
        self.descendants(scope)
            .into_iter()
            .filter(|n| self.attr(*n, name).is_some())
            .collect()
    }

    /// Concatenated text of a subtree
    pub fn text_content(&self, id: NodeId) -> String {
        self.descendants(id)
            .into_iter()
            .filter_map(|n| self.text(n))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Parsed inline style declarations, in source order
    pub fn style(&self, id: NodeId) -> Vec<(String, String)> {
        self.attr(id, "style").map(parse_declarations).unwrap_or_default()
    }

    /// Value of an inline declaration. Rendering reads [`Document::computed_value`].
    pub fn style_value(&self, id: NodeId, property: &str) -> Option<String> {
        self.style(id)
            .into_iter()
            .find(|(k, _)| k == property)
            .map(|(_, v)| v)
    }

    pub fn set_style(&mut self, id: NodeId, property: &str, value: &str) -> Result<()> {
        let mut decls = self.style(id);
        let property = property.to_ascii_lowercase();
        match decls.iter_mut().find(|(k, _)| *k == property) {
            Some(slot) => slot.1 = value.to_string(),
            None => decls.push((property, value.to_string())),
        }
        self.set_attr(id, "style", &serialize_declarations(&decls))
    }

    /// Remove every declaration whose property satisfies `pred`
    pub fn remove_style_where<F>(&mut self, id: NodeId, pred: F)
    where
        F: Fn(&str) -> bool,
    {
        if self.attr(id, "style").is_none() {
            return;
        }
        let decls: Vec<_> = self.style(id).into_iter().filter(|(k, _)| !pred(k)).collect();
        if let Some(attrs) = self.attrs_mut(id) {
            attrs.insert("style".to_string(), serialize_declarations(&decls));
        }
    }

    /// Cascaded declarations of an element, in the order they were applied.
    ///
    /// Matching stylesheet rules apply by specificity then source order, the
    /// inline `style` attribute above them, and `!important` declarations
    /// above every normal one. A `transition`, `animation`, `background` or
    /// `padding` shorthand clears the longhands applied before it.
    pub fn computed_style(&self, id: NodeId) -> Vec<(String, String)> {
        if !self.is_element(id) {
            return Vec::new();
        }
        let rules = self.rules();
        let inline = self.attr(id, "style").map(css::parse_declaration_block).unwrap_or_default();

        // (important, inline, specificity, rule order)
        let mut cascade: Vec<((bool, bool, Specificity, usize), &Declaration)> = Vec::new();
        for (order, rule) in rules.iter().enumerate() {
            if rule.selector.matches(self, id) {
                let specificity = rule.selector.specificity();
                cascade.extend(rule.declarations.iter().map(|d| ((d.important, false, specificity, order), d)));
            }
        }
        cascade.extend(inline.iter().map(|d| ((d.important, true, (0, 0, 0), usize::MAX), d)));
        cascade.sort_by_key(|(key, _)| *key);

        let mut out: Vec<(String, String)> = Vec::new();
        for (_, d) in cascade {
            if RESETTING_SHORTHANDS.contains(&d.property.as_str()) {
                let prefix = format!("{}-", d.property);
                out.retain(|(k, _)| !k.starts_with(&prefix));
            }
            out.retain(|(k, _)| *k != d.property);
            out.push((d.property.clone(), d.value.clone()));
        }
        out
    }

    pub fn computed_value(&self, id: NodeId, property: &str) -> Option<String> {
        self.computed_style(id)
            .into_iter()
            .find(|(k, _)| k == property)
            .map(|(_, v)| v)
    }

    /// Rules of every attached `<style>` element, in document order
    fn rules(&self) -> Arc<Vec<StyleRule>> {
        if let Some(rules) = self.sheet.borrow().as_ref() {
            return Arc::clone(rules);
        }
        let rules: Vec<StyleRule> = self
            .descendants(self.root)
            .into_iter()
            .filter(|n| self.tag(*n) == Some("style"))
            .flat_map(|n| {
                let text: String = self.children(n).iter().filter_map(|c| self.text(*c)).collect();
                css::parse_stylesheet(&text)
            })
            .collect();
        let rules = Arc::new(rules);
        *self.sheet.borrow_mut() = Some(Arc::clone(&rules));
        rules
    }

    /// First attached element matching `selector`
    pub fn query_selector(&self, selector: &str) -> Option<NodeId> {
        self.query_selector_all(selector).into_iter().next()
    }

    /// Attached elements matching a selector list of compound selectors
    /// (`tag`, `#id`, `.class`, `[attr]`, `[attr=value]`) joined by
    /// descendant or child combinators.
    pub fn query_selector_all(&self, selector: &str) -> Vec<NodeId> {
        let selectors: Option<Vec<Selector>> = css::split_selector_list(selector)
            .iter()
            .map(|s| Selector::parse(s))
            .collect();
        let Some(selectors) = selectors.filter(|s| !s.is_empty()) else {
            return Vec::new();
        };
        self.descendants(self.root)
            .into_iter()
            .filter(|n| selectors.iter().any(|sel| sel.matches(self, *n)))
            .collect()
    }

    /// Serialize a subtree to HTML
    pub fn outer_html(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.write_html(id, &mut out);
        out
    }

    fn write_html(&self, id: NodeId, out: &mut String) {
        let Some(node) = self.get(id) else { return };
        match &node.data {
            NodeData::Text(t) => out.push_str(&escape_text(t)),
            NodeData::Element { tag, attrs } => {
                out.push('<');
                out.push_str(tag);
                for (k, v) in attrs {
                    out.push(' ');
                    out.push_str(k);
                    out.push_str("=\"");
                    out.push_str(&escape_attr(v));
                    out.push('"');
                }
                out.push('>');
                if VOID_TAGS.contains(&tag.as_str()) {
                    return;
                }
                for c in &node.children {
                    self.write_html(*c, out);
                }
                out.push_str("</");
                out.push_str(tag);
                out.push('>');
            }
        }
    }
}

const VOID_TAGS: &[&str] = &["img", "br", "hr", "input", "meta", "link", "source"];

fn escape_text(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn escape_attr(s: &str) -> String {
    s.replace('&', "&amp;").replace('"', "&quot;")
}
