//! Element access for the sandboxed side
//!
//! [`PickDocument`] is the narrow surface the sandboxed picker needs from a
//! rendered document. [`StaticDocument`] implements it over generated markup
//! with a forgiving tag scanner; it does not validate or sanitize anything.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Handle to one element of a rendered document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ElementId(pub usize);

impl std::fmt::Display for ElementId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("Element {0} not found")]
    NotFound(ElementId),

    #[error("Property '{property}' is unreadable on element {element}")]
    Unreadable {
        element: ElementId,
        property: &'static str,
    },
}

/// What the sandboxed picker reads from and writes to a document
///
/// Every read may fail independently; the picker falls back to an empty
/// value per field. The outline is the only thing the picker writes.
pub trait PickDocument {
    fn tag_name(&self, element: ElementId) -> Result<String, DocumentError>;

    /// Value of the `id` attribute, empty if absent
    fn dom_id(&self, element: ElementId) -> Result<String, DocumentError>;

    /// Value of the `class` attribute, empty if absent
    fn class_name(&self, element: ElementId) -> Result<String, DocumentError>;

    fn text_content(&self, element: ElementId) -> Result<String, DocumentError>;

    fn outer_markup(&self, element: ElementId) -> Result<String, DocumentError>;

    fn outline(&self, element: ElementId) -> Result<Option<String>, DocumentError>;

    fn set_outline(
        &mut self,
        element: ElementId,
        outline: Option<String>,
    ) -> Result<(), DocumentError>;
}

/// `tag#id.class1.class2`, omitting empty parts
pub fn build_selector(tag_name: &str, dom_id: &str, class_name: &str) -> String {
    let mut selector = tag_name.to_lowercase();
    if !dom_id.is_empty() {
        selector.push('#');
        selector.push_str(dom_id);
    }
    for class in class_name.split_whitespace() {
        selector.push('.');
        selector.push_str(class);
    }
    selector
}

/// Keep at most `max_chars` characters, never splitting a UTF-8 sequence
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => s[..byte_idx].to_string(),
        None => s.to_string(),
    }
}

static TAG_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?s)<!--.*?-->|<![^>]*>|<\?[^>]*>|</\s*([A-Za-z][A-Za-z0-9:-]*)\s*>|<([A-Za-z][A-Za-z0-9:-]*)((?:\s+[^\s"'>/=]+(?:\s*=\s*(?:"[^"]*"|'[^']*'|[^\s"'=<>`]+))?)*)\s*(/?)>"#,
    )
    .expect("tag pattern is valid")
});

static ATTR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"([^\s"'>/=]+)(?:\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'=<>`]+)))?"#)
        .expect("attribute pattern is valid")
});

static OUTLINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:^|;)\s*outline\s*:\s*([^;]+)").expect("outline pattern is valid"));

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style", "textarea", "title"];

#[derive(Debug, Clone)]
struct Node {
    tag: String,
    id: String,
    class: String,
    start: usize,
    inner_start: usize,
    inner_end: usize,
    end: usize,
    depth: usize,
    outline: Option<String>,
}

/// One line per element, for listing a document to the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementSummary {
    pub id: ElementId,
    pub depth: usize,
    pub selector: String,
    pub text: String,
}

/// Generated markup scanned into a flat element arena
///
/// Element ids are assigned in document order, so two scans of the same
/// markup agree on every [`ElementId`].
#[derive(Debug, Clone)]
pub struct StaticDocument {
    markup: String,
    nodes: Vec<Node>,
}

impl StaticDocument {
    pub fn parse(markup: impl Into<String>) -> Self {
        let markup = markup.into();
        let nodes = scan(&markup);
        Self { markup, nodes }
    }

    pub fn markup(&self) -> &str {
        &self.markup
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// First element whose `id` attribute equals `dom_id`
    pub fn find_by_dom_id(&self, dom_id: &str) -> Option<ElementId> {
        self.nodes
            .iter()
            .position(|n| n.id == dom_id)
            .map(ElementId)
    }

    /// First element with the given tag name
    pub fn find_by_tag(&self, tag: &str) -> Option<ElementId> {
        let tag = tag.to_lowercase();
        self.nodes.iter().position(|n| n.tag == tag).map(ElementId)
    }

    /// Elements inside `<body>` (or all, when there is no body), for display
    pub fn summaries(&self, max_text: usize) -> Vec<ElementSummary> {
        let body = self.nodes.iter().position(|n| n.tag == "body");
        self.nodes
            .iter()
            .enumerate()
            .filter(|(idx, node)| match body {
                Some(b) => *idx > b && node.start < self.nodes[b].end,
                None => true,
            })
            .filter(|(_, node)| !RAW_TEXT_ELEMENTS.contains(&node.tag.as_str()))
            .map(|(idx, node)| ElementSummary {
                id: ElementId(idx),
                depth: node.depth,
                selector: build_selector(&node.tag, &node.id, &node.class),
                text: truncate_chars(
                    &visible_text(&self.markup[node.inner_start..node.inner_end]),
                    max_text,
                ),
            })
            .collect()
    }

    fn node(&self, element: ElementId) -> Result<&Node, DocumentError> {
        self.nodes
            .get(element.0)
            .ok_or(DocumentError::NotFound(element))
    }
}

impl PickDocument for StaticDocument {
    fn tag_name(&self, element: ElementId) -> Result<String, DocumentError> {
        Ok(self.node(element)?.tag.clone())
    }

    fn dom_id(&self, element: ElementId) -> Result<String, DocumentError> {
        Ok(self.node(element)?.id.clone())
    }

    fn class_name(&self, element: ElementId) -> Result<String, DocumentError> {
        Ok(self.node(element)?.class.clone())
    }

    fn text_content(&self, element: ElementId) -> Result<String, DocumentError> {
        let node = self.node(element)?;
        Ok(visible_text(&self.markup[node.inner_start..node.inner_end]))
    }

    fn outer_markup(&self, element: ElementId) -> Result<String, DocumentError> {
        let node = self.node(element)?;
        Ok(self.markup[node.start..node.end].to_string())
    }

    fn outline(&self, element: ElementId) -> Result<Option<String>, DocumentError> {
        Ok(self.node(element)?.outline.clone())
    }

    fn set_outline(
        &mut self,
        element: ElementId,
        outline: Option<String>,
    ) -> Result<(), DocumentError> {
        let node = self
            .nodes
            .get_mut(element.0)
            .ok_or(DocumentError::NotFound(element))?;
        node.outline = outline;
        Ok(())
    }
}

fn scan(markup: &str) -> Vec<Node> {
    let mut nodes: Vec<Node> = Vec::new();
    let mut open: Vec<usize> = Vec::new();
    let mut pos = 0;

    while let Some(caps) = TAG_RE.captures_at(markup, pos) {
        let Some(whole) = caps.get(0) else { break };
        pos = whole.end().max(pos + 1);

        if let Some(name) = caps.get(1) {
            let tag = name.as_str().to_lowercase();
            let Some(depth) = open.iter().rposition(|&i| nodes[i].tag == tag) else {
                continue;
            };
            // Elements left open inside the closed one end where it ends
            for &idx in &open[depth + 1..] {
                nodes[idx].inner_end = whole.start();
                nodes[idx].end = whole.start();
            }
            let idx = open[depth];
            nodes[idx].inner_end = whole.start();
            nodes[idx].end = whole.end();
            open.truncate(depth);
            continue;
        }

        let Some(name) = caps.get(2) else { continue };
        let tag = name.as_str().to_lowercase();
        let attrs = caps.get(3).map(|m| m.as_str()).unwrap_or_default();
        let self_closing = caps.get(4).is_some_and(|m| !m.as_str().is_empty());

        let mut node = Node {
            tag: tag.clone(),
            id: String::new(),
            class: String::new(),
            start: whole.start(),
            inner_start: whole.end(),
            inner_end: whole.end(),
            end: whole.end(),
            depth: open.len(),
            outline: None,
        };
        for attr in ATTR_RE.captures_iter(attrs) {
            let Some(key) = attr.get(1) else { continue };
            let value = attr
                .get(2)
                .or_else(|| attr.get(3))
                .or_else(|| attr.get(4))
                .map(|m| m.as_str().trim().to_string())
                .unwrap_or_default();
            match key.as_str().to_lowercase().as_str() {
                "id" => node.id = value,
                "class" => node.class = value.split_whitespace().collect::<Vec<_>>().join(" "),
                "style" => {
                    node.outline = OUTLINE_RE
                        .captures(&value)
                        .and_then(|c| c.get(1))
                        .map(|m| m.as_str().trim().to_string());
                }
                _ => {}
            }
        }

        if self_closing || VOID_ELEMENTS.contains(&tag.as_str()) {
            nodes.push(node);
            continue;
        }

        if RAW_TEXT_ELEMENTS.contains(&tag.as_str()) {
            // Body is raw text; jump straight to the matching end tag
            let closing = format!("</{tag}");
            let rest = &markup[whole.end()..];
            match find_ascii_case_insensitive(rest, &closing) {
                Some(rel) => {
                    let close_start = whole.end() + rel;
                    let close_end = markup[close_start..]
                        .find('>')
                        .map(|i| close_start + i + 1)
                        .unwrap_or(markup.len());
                    node.inner_end = close_start;
                    node.end = close_end;
                    pos = close_end;
                }
                None => {
                    node.inner_end = markup.len();
                    node.end = markup.len();
                    pos = markup.len();
                }
            }
            nodes.push(node);
            continue;
        }

        nodes.push(node);
        open.push(nodes.len() - 1);
    }

    for idx in open {
        nodes[idx].inner_end = markup.len();
        nodes[idx].end = markup.len();
    }
    nodes
}

fn find_ascii_case_insensitive(haystack: &str, needle: &str) -> Option<usize> {
    let needle = needle.as_bytes();
    haystack
        .as_bytes()
        .windows(needle.len())
        .position(|w| w.eq_ignore_ascii_case(needle))
}

/// Text a reader would see: tags and raw-text bodies removed, common
/// entities decoded, whitespace collapsed
fn visible_text(fragment: &str) -> String {
    let mut text = String::with_capacity(fragment.len());
    let mut pos = 0;
    while let Some(caps) = TAG_RE.captures_at(fragment, pos) {
        let Some(whole) = caps.get(0) else { break };
        text.push_str(&fragment[pos..whole.start()]);
        text.push(' ');
        pos = whole.end();

        let raw_tag = caps
            .get(2)
            .map(|m| m.as_str().to_lowercase())
            .filter(|t| t == "script" || t == "style");
        if let Some(tag) = raw_tag {
            let closing = format!("</{tag}");
            match find_ascii_case_insensitive(&fragment[pos..], &closing) {
                Some(rel) => pos += rel,
                None => pos = fragment.len(),
            }
        }
    }
    text.push_str(&fragment[pos.min(fragment.len())..]);

    let decoded = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}
