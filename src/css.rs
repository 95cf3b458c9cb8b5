//! Stylesheet parsing and selector matching
//!
//! Rules are plain `selector-list { declarations }` blocks. Selectors are
//! compound selectors (`tag`, `*`, `#id`, `.class`, `[attr]`, `[attr=value]`)
//! joined by descendant or child combinators. At-rules are skipped whole, and
//! selectors using pseudo-classes, pseudo-elements or sibling combinators are
//! dropped since they can never match a static document.

use crate::dom::{Document, NodeId};

/// One declaration of a block or `style` attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    pub property: String,
    pub value: String,
    pub important: bool,
}

/// `(ids, classes and attributes, tags)`
pub type Specificity = (u32, u32, u32);

/// A single selector of a rule's selector list with the rule's declarations
#[derive(Debug, Clone)]
pub struct StyleRule {
    pub selector: Selector,
    pub declarations: Vec<Declaration>,
}

/// Parse a stylesheet into rules, one per selector of each selector list,
/// in source order.
pub fn parse_stylesheet(css: &str) -> Vec<StyleRule> {
    let css = strip_comments(css);
    let mut rules = Vec::new();
    let mut rest = css.as_str();
    while let Some(open) = rest.find('{') {
        let Some(close) = matching_brace(rest, open) else {
            log::debug!("[css] unterminated block, ignoring the rest of the sheet");
            break;
        };
        // statements such as `@import ...;` end before the prelude
        let prelude = rest[..open].rsplit(';').next().unwrap_or_default().trim();
        let body = &rest[open + 1..close];
        rest = &rest[close + 1..];

        if prelude.is_empty() || prelude.starts_with('@') {
            continue;
        }
        let declarations = parse_declaration_block(body);
        if declarations.is_empty() {
            continue;
        }
        for part in split_selector_list(prelude) {
            match Selector::parse(&part) {
                Some(selector) => rules.push(StyleRule {
                    selector,
                    declarations: declarations.clone(),
                }),
                None => log::trace!("[css] skipping selector {:?}", part),
            }
        }
    }
    rules
}

fn strip_comments(css: &str) -> String {
    let mut out = String::with_capacity(css.len());
    let mut rest = css;
    while let Some(start) = rest.find("/*") {
        out.push_str(&rest[..start]);
        match rest[start + 2..].find("*/") {
            Some(end) => rest = &rest[start + 2 + end + 2..],
            None => return out,
        }
    }
    out.push_str(rest);
    out
}

/// Index of the `}` closing the block opened at `open`
fn matching_brace(css: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    for (i, ch) in css[open..].char_indices() {
        match (quote, ch) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(ch),
            (None, '{') => depth += 1,
            (None, '}') => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Split a declaration block (or `style` attribute) into declarations.
///
/// Semicolons inside parentheses or quotes (e.g. `url(data:image/png;base64,...)`)
/// do not terminate a declaration. Later duplicates win unless the earlier
/// one is `!important` and the later one is not.
pub fn parse_declaration_block(css: &str) -> Vec<Declaration> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (i, ch) in css.char_indices() {
        match (quote, ch) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(ch),
            (None, '(') => depth += 1,
            (None, ')') => depth = depth.saturating_sub(1),
            (None, ';') if depth == 0 => {
                push_declaration(&mut out, &css[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    push_declaration(&mut out, &css[start..]);
    out
}

fn push_declaration(out: &mut Vec<Declaration>, decl: &str) {
    let Some((k, v)) = decl.split_once(':') else { return };
    let property = k.trim().to_ascii_lowercase();
    let v = v.trim();
    let (value, important) = match v.strip_suffix("!important") {
        Some(rest) => (rest.trim(), true),
        None => (v, false),
    };
    if property.is_empty() || value.is_empty() {
        return;
    }
    if out.iter().any(|d| d.property == property && d.important && !important) {
        return;
    }
    out.retain(|d| d.property != property);
    out.push(Declaration {
        property,
        value: value.to_string(),
        important,
    });
}

/// `(property, value)` pairs of a `style` attribute; `!important` is dropped
pub fn parse_declarations(css: &str) -> Vec<(String, String)> {
    parse_declaration_block(css)
        .into_iter()
        .map(|d| (d.property, d.value))
        .collect()
}

pub fn serialize_declarations(decls: &[(String, String)]) -> String {
    decls
        .iter()
        .map(|(k, v)| format!("{}: {}", k, v))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Split a selector list on commas outside brackets and quotes
pub fn split_selector_list(list: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut cur = String::new();
    for ch in list.chars() {
        match (quote, ch) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(ch),
            (None, '[' | '(') => depth += 1,
            (None, ']' | ')') => depth = depth.saturating_sub(1),
            (None, ',') if depth == 0 => {
                out.push(cur.trim().to_string());
                cur.clear();
                continue;
            }
            _ => {}
        }
        cur.push(ch);
    }
    out.push(cur.trim().to_string());
    out.retain(|s| !s.is_empty());
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Combinator {
    Descendant,
    Child,
}

/// Compound selectors joined by combinators, matched right to left
#[derive(Debug, Clone)]
pub struct Selector {
    compounds: Vec<Compound>,
    // combinators[i] sits between compounds[i] and compounds[i + 1]
    combinators: Vec<Combinator>,
}

impl Selector {
    pub fn parse(s: &str) -> Option<Self> {
        let mut compounds = Vec::new();
        let mut combinators = Vec::new();
        let mut pending: Option<Combinator> = None;
        for token in tokenize(s)? {
            match token {
                Token::Child => {
                    if compounds.is_empty() || pending.is_some() {
                        return None;
                    }
                    pending = Some(Combinator::Child);
                }
                Token::Compound(text) => {
                    if !compounds.is_empty() {
                        combinators.push(pending.take().unwrap_or(Combinator::Descendant));
                    }
                    compounds.push(Compound::parse(&text)?);
                }
            }
        }
        if compounds.is_empty() || pending.is_some() {
            return None;
        }
        Some(Self { compounds, combinators })
    }

    pub fn specificity(&self) -> Specificity {
        self.compounds.iter().fold((0, 0, 0), |(a, b, c), compound| {
            let (x, y, z) = compound.specificity();
            (a + x, b + y, c + z)
        })
    }

    pub fn matches(&self, doc: &Document, id: NodeId) -> bool {
        self.matches_at(doc, id, self.compounds.len() - 1)
    }

    fn matches_at(&self, doc: &Document, id: NodeId, idx: usize) -> bool {
        if !self.compounds[idx].matches(doc, id) {
            return false;
        }
        if idx == 0 {
            return true;
        }
        match self.combinators[idx - 1] {
            Combinator::Child => doc.parent(id).is_some_and(|p| self.matches_at(doc, p, idx - 1)),
            Combinator::Descendant => {
                let mut cur = doc.parent(id);
                while let Some(p) = cur {
                    if self.matches_at(doc, p, idx - 1) {
                        return true;
                    }
                    cur = doc.parent(p);
                }
                false
            }
        }
    }
}

enum Token {
    Compound(String),
    Child,
}

fn tokenize(s: &str) -> Option<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut cur = String::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let flush = |cur: &mut String, tokens: &mut Vec<Token>| {
        if !cur.is_empty() {
            tokens.push(Token::Compound(std::mem::take(cur)));
        }
    };
    for ch in s.trim().chars() {
        match (quote, ch) {
            (Some(q), c) if c == q => {
                quote = None;
                cur.push(ch);
            }
            (Some(_), _) => cur.push(ch),
            (None, '"' | '\'') => {
                quote = Some(ch);
                cur.push(ch);
            }
            (None, '[') => {
                depth += 1;
                cur.push(ch);
            }
            (None, ']') => {
                depth = depth.saturating_sub(1);
                cur.push(ch);
            }
            (None, c) if depth > 0 => cur.push(c),
            (None, c) if c.is_whitespace() => flush(&mut cur, &mut tokens),
            (None, '>') => {
                flush(&mut cur, &mut tokens);
                tokens.push(Token::Child);
            }
            (None, '+' | '~' | ':' | '(' | ')') => return None,
            (None, c) => cur.push(c),
        }
    }
    if quote.is_some() || depth > 0 {
        return None;
    }
    flush(&mut cur, &mut tokens);
    Some(tokens)
}

/// Selector for a single element, e.g. `div.card[data-layer=screen]`
#[derive(Debug, Clone, Default)]
struct Compound {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attrs: Vec<(String, Option<String>)>,
}

impl Compound {
    fn parse(s: &str) -> Option<Self> {
        let mut sel = Compound::default();
        let tag_end = s.find(['#', '.', '[']).unwrap_or(s.len());
        let tag = &s[..tag_end];
        if !tag.is_empty() && tag != "*" {
            if !tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
                return None;
            }
            sel.tag = Some(tag.to_ascii_lowercase());
        }
        let mut rest = &s[tag_end..];
        while let Some(first) = rest.chars().next() {
            match first {
                '#' | '.' => {
                    let body = &rest[1..];
                    let end = body.find(['#', '.', '[']).unwrap_or(body.len());
                    let name = body[..end].to_string();
                    if name.is_empty() {
                        return None;
                    }
                    if first == '#' {
                        sel.id = Some(name);
                    } else {
                        sel.classes.push(name);
                    }
                    rest = &body[end..];
                }
                '[' => {
                    let close = rest.find(']')?;
                    let inner = &rest[1..close];
                    match inner.split_once('=') {
                        Some((k, v)) => sel.attrs.push((
                            k.trim().to_string(),
                            Some(v.trim().trim_matches(['"', '\'']).to_string()),
                        )),
                        None => sel.attrs.push((inner.trim().to_string(), None)),
                    }
                    rest = &rest[close + 1..];
                }
                _ => return None,
            }
        }
        Some(sel)
    }

    fn specificity(&self) -> Specificity {
        (
            self.id.is_some() as u32,
            (self.classes.len() + self.attrs.len()) as u32,
            self.tag.is_some() as u32,
        )
    }

    fn matches(&self, doc: &Document, id: NodeId) -> bool {
        let Some(tag) = doc.tag(id) else { return false };
        if let Some(t) = &self.tag {
            if t != tag {
                return false;
            }
        }
        if let Some(want) = &self.id {
            if doc.attr(id, "id") != Some(want.as_str()) {
                return false;
            }
        }
        if !self.classes.is_empty() {
            let class_attr = doc.attr(id, "class").unwrap_or("");
            let have: Vec<&str> = class_attr.split_whitespace().collect();
            if !self.classes.iter().all(|c| have.contains(&c.as_str())) {
                return false;
            }
        }
        self.attrs.iter().all(|(k, v)| match (doc.attr(id, k), v) {
            (Some(_), None) => true,
            (Some(actual), Some(want)) => actual == want,
            (None, _) => false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Viewport;

    #[test]
    fn stylesheet_skips_comments_and_at_rules() {
        let sheet = r#"
            /* palette */
            @import url("x.css");
            .a, #b > p { color: red; padding: 4px !important }
            @keyframes spin { from { opacity: 0 } to { opacity: 1 } }
            @media (max-width: 10px) { .a { color: blue } }
            a:hover { color: green }
            .c { }
        "#;
        let rules = parse_stylesheet(sheet);
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].selector.specificity(), (0, 1, 0));
        assert_eq!(rules[1].selector.specificity(), (1, 0, 1));
        assert_eq!(
            rules[0].declarations[1],
            Declaration {
                property: "padding".into(),
                value: "4px".into(),
                important: true,
            }
        );
    }

    #[test]
    fn important_survives_a_later_normal_duplicate() {
        let decls = parse_declaration_block("color: red !important; color: blue; width: 1px; width: 2px");
        assert_eq!(decls.len(), 2);
        assert_eq!(decls[0].value, "red");
        assert_eq!(decls[1].value, "2px");
    }

    #[test]
    fn selector_lists_ignore_commas_in_attributes() {
        assert_eq!(
            split_selector_list(r#"[data-x="a,b"], .y ,"#),
            vec![r#"[data-x="a,b"]"#.to_string(), ".y".to_string()]
        );
    }

    #[test]
    fn combinators_match_ancestors() {
        let doc = Document::parse(
            r#"<div class="shell"><section><p id="p" data-layer="screen">x</p></section></div>"#,
            Viewport::default(),
        );
        let p = doc.query_selector("#p").unwrap();
        let matches = |s: &str| Selector::parse(s).unwrap().matches(&doc, p);
        assert!(matches(".shell p"));
        assert!(matches(".shell * [data-layer=screen]"));
        assert!(matches("section > p"));
        assert!(!matches(".shell > p"));
        assert!(!matches("section p.other"));
        assert!(Selector::parse("p:hover").is_none());
        assert!(Selector::parse("a + p").is_none());
        assert!(Selector::parse("> p").is_none());
    }
}
