//! Markup to element tree.
//!
//! `lol_html` streams the document and reports start tags, end tags and text
//! in source order. The stream is replayed into a small owned tree that the
//! style and layout passes walk.

use std::{cell::RefCell, rc::Rc};

use lol_html::{
    HandlerResult, RewriteStrSettings, doc_text, element, html_content::EndTag, rewrite_str,
};

use super::EngineError;

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
    "source", "track", "wbr",
];

/// Elements that implicitly close an open `<p>`.
const CLOSES_PARAGRAPH: &[&str] = &[
    "address", "article", "aside", "blockquote", "div", "dl", "fieldset", "footer", "form",
    "h1", "h2", "h3", "h4", "h5", "h6", "header", "hr", "main", "nav", "ol", "p", "pre",
    "section", "table", "ul",
];

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub tag: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Node>,
}

impl Element {
    fn new(tag: impl Into<String>, attributes: Vec<(String, String)>) -> Self {
        Self {
            tag: tag.into(),
            attributes,
            children: Vec::new(),
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn id(&self) -> Option<&str> {
        self.attr("id")
    }

    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.attr("class").unwrap_or_default().split_whitespace()
    }

    /// Concatenated text of every descendant.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        collect_text(self, &mut out);
        out
    }

    /// Depth-first visit of every descendant element, in document order.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Element)) {
        for child in &self.children {
            if let Node::Element(element) = child {
                visit(element);
                element.walk(visit);
            }
        }
    }
}

fn collect_text(element: &Element, out: &mut String) {
    for child in &element.children {
        match child {
            Node::Text(text) => out.push_str(text),
            Node::Element(element) => collect_text(element, out),
        }
    }
}

#[derive(Debug)]
enum Event {
    Open {
        tag: String,
        attributes: Vec<(String, String)>,
        void: bool,
    },
    Close(String),
    Text(String),
}

/// Parse `markup` into a tree rooted at a synthetic `#document` element.
pub fn parse(markup: &str) -> Result<Element, EngineError> {
    let events = Rc::new(RefCell::new(Vec::<Event>::new()));

    rewrite_str(
        markup,
        RewriteStrSettings {
            element_content_handlers: vec![element!("*", {
                let events = Rc::clone(&events);
                move |el| {
                    let tag = el.tag_name();
                    let attributes = el
                        .attributes()
                        .iter()
                        .map(|attr| (attr.name(), attr.value()))
                        .collect();
                    let void = VOID_ELEMENTS.contains(&tag.as_str());
                    events.borrow_mut().push(Event::Open {
                        tag: tag.clone(),
                        attributes,
                        void,
                    });
                    if !void && let Some(handlers) = el.end_tag_handlers() {
                        let events = Rc::clone(&events);
                        let on_end: Box<
                            dyn for<'a, 'b> FnOnce(&'a mut EndTag<'b>) -> HandlerResult,
                        > = Box::new(move |_end| {
                            events.borrow_mut().push(Event::Close(tag));
                            Ok(())
                        });
                        handlers.push(on_end);
                    }
                    Ok(())
                }
            })],
            document_content_handlers: vec![doc_text!({
                let events = Rc::clone(&events);
                move |chunk| {
                    let text = chunk.as_str();
                    if text.is_empty() {
                        return Ok(());
                    }
                    let mut events = events.borrow_mut();
                    match events.last_mut() {
                        Some(Event::Text(pending)) => pending.push_str(text),
                        _ => events.push(Event::Text(text.to_owned())),
                    }
                    Ok(())
                }
            })],
            ..RewriteStrSettings::default()
        },
    )
    .map_err(|err| EngineError::Document(err.to_string()))?;

    let events = Rc::try_unwrap(events)
        .map(RefCell::into_inner)
        .unwrap_or_else(|rc| std::mem::take(&mut *rc.borrow_mut()));

    Ok(build_tree(events))
}

fn build_tree(events: Vec<Event>) -> Element {
    let mut stack = vec![Element::new("#document", Vec::new())];

    for event in events {
        match event {
            Event::Open {
                tag,
                attributes,
                void,
            } => {
                if CLOSES_PARAGRAPH.contains(&tag.as_str()) {
                    close_implied(&mut stack, "p");
                }
                if tag == "li" {
                    close_implied(&mut stack, "li");
                }
                let element = Element::new(tag, attributes);
                if void {
                    append(&mut stack, Node::Element(element));
                } else {
                    stack.push(element);
                }
            }
            Event::Close(tag) => {
                if stack.iter().skip(1).any(|open| open.tag == tag) {
                    while let Some(open) = pop_into_parent(&mut stack) {
                        if open == tag {
                            break;
                        }
                    }
                }
            }
            Event::Text(raw) => {
                let raw_text = stack
                    .last()
                    .is_some_and(|open| matches!(open.tag.as_str(), "style" | "script"));
                let text = if raw_text { raw } else { decode_entities(&raw) };
                append(&mut stack, Node::Text(text));
            }
        }
    }

    while pop_into_parent(&mut stack).is_some() {}
    stack.pop().unwrap_or_else(|| Element::new("#document", Vec::new()))
}

fn close_implied(stack: &mut Vec<Element>, tag: &str) {
    if stack.len() > 1 && stack.last().is_some_and(|open| open.tag == tag) {
        pop_into_parent(stack);
    }
}

/// Close the innermost open element, returning its tag. The root never pops.
fn pop_into_parent(stack: &mut Vec<Element>) -> Option<String> {
    if stack.len() < 2 {
        return None;
    }
    let element = stack.pop()?;
    let tag = element.tag.clone();
    append(stack, Node::Element(element));
    Some(tag)
}

fn append(stack: &mut [Element], node: Node) {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(node);
    }
}

/// Decode character references in text content.
pub fn decode_entities(raw: &str) -> String {
    if !raw.contains('&') {
        return raw.to_owned();
    }

    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        match tail.find(';').filter(|end| *end <= 12) {
            Some(end) => match lookup_entity(&tail[1..end]) {
                Some(ch) => {
                    out.push(ch);
                    rest = &tail[end + 1..];
                }
                None => {
                    out.push('&');
                    rest = &tail[1..];
                }
            },
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn lookup_entity(name: &str) -> Option<char> {
    if let Some(numeric) = name.strip_prefix('#') {
        let code = match numeric.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => numeric.parse().ok()?,
        };
        return char::from_u32(code);
    }
    let ch = match name {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => '\u{a0}',
        "copy" => '©',
        "reg" => '®',
        "hellip" => '…',
        "mdash" => '—',
        "ndash" => '–',
        "middot" => '·',
        "laquo" => '«',
        "raquo" => '»',
        "times" => '×',
        _ => return None,
    };
    Some(ch)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn first_element(root: &Element) -> &Element {
        root.children
            .iter()
            .find_map(|node| match node {
                Node::Element(element) => Some(element),
                Node::Text(_) => None,
            })
            .expect("element child")
    }

    #[test]
    fn builds_nested_tree_with_text() {
        let root = parse("<div class=\"a b\"><p>Hello <b>world</b></p></div>").expect("parse");
        let div = first_element(&root);
        assert_eq!(div.tag, "div");
        assert_eq!(div.classes().collect::<Vec<_>>(), vec!["a", "b"]);
        let p = first_element(div);
        assert_eq!(p.text_content(), "Hello world");
    }

    #[test]
    fn void_elements_do_not_swallow_siblings() {
        let root = parse("<p>a<br>b<img src=\"x.png\">c</p>").expect("parse");
        let p = first_element(&root);
        assert_eq!(p.children.len(), 5);
        assert_eq!(p.text_content(), "abc");
    }

    #[test]
    fn unclosed_paragraphs_are_siblings() {
        let root = parse("<p>one<p>two").expect("parse");
        let tags: Vec<_> = root
            .children
            .iter()
            .filter_map(|node| match node {
                Node::Element(element) => Some(element.text_content()),
                Node::Text(_) => None,
            })
            .collect();
        assert_eq!(tags, vec!["one", "two"]);
    }

    #[test]
    fn decodes_entities_outside_style() {
        let root = parse("<p>a &amp; b &#x4e2d;&#25991; &bogus;</p><style>a>b{}</style>")
            .expect("parse");
        let mut texts = Vec::new();
        root.walk(&mut |element| texts.push(element.text_content()));
        assert_eq!(texts, vec!["a & b 中文 &bogus;", "a>b{}"]);
    }

    #[test]
    fn end_tags_close_the_matching_element() {
        let root = parse("<div><span>in</span>after</div>tail").expect("parse");
        let div = first_element(&root);
        assert_eq!(div.children.len(), 2);
        assert_eq!(first_element(div).text_content(), "in");
        assert!(matches!(root.children.last(), Some(Node::Text(text)) if text == "tail"));
    }
}
