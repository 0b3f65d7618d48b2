//! Minimal XML element tree built on quick-xml events
//!
//! The source dialects are walked node by node (mixed content matters for
//! body markup), so records are loaded into an owned tree first. Entities
//! beyond the XML predefined set are resolved from a small HTML table; text
//! with unknown entities is kept verbatim rather than failing the record.

use pubfeed_common::text::decode_utf8_or_latin1;
use quick_xml::escape::{escape, resolve_predefined_entity, unescape_with};
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use std::borrow::Cow;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum XmlError {
    #[error("Malformed XML at byte {position}: {message}")]
    Syntax { position: u64, message: String },

    #[error("Unexpected closing tag at byte {position}")]
    Unbalanced { position: u64 },

    #[error("Document has no root element")]
    Empty,

    #[error("Unclosed element <{0}>")]
    Unclosed(String),
}

pub type Result<T> = std::result::Result<T, XmlError>;

/// A child of an element
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Element(Element),
    Text(String),
}

/// An XML element with ordered attributes and mixed content
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Node>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Parse raw bytes, reading them as Latin-1 when they are not UTF-8.
    pub fn parse_bytes(raw: &[u8]) -> Result<Element> {
        Self::parse(&decode_utf8_or_latin1(raw))
    }

    /// Parse a document and return its root element.
    pub fn parse(xml: &str) -> Result<Element> {
        let mut reader = Reader::from_str(xml);
        let mut stack: Vec<Element> = Vec::new();
        let mut root: Option<Element> = None;

        loop {
            let position = reader.buffer_position() as u64;
            let event = reader.read_event().map_err(|e| XmlError::Syntax {
                position,
                message: e.to_string(),
            })?;

            match event {
                Event::Start(ref e) => stack.push(start_element(e, position)?),
                Event::Empty(ref e) => {
                    let element = start_element(e, position)?;
                    close(&mut stack, &mut root, element, position)?;
                },
                Event::End(_) => {
                    let element = stack.pop().ok_or(XmlError::Unbalanced { position })?;
                    close(&mut stack, &mut root, element, position)?;
                },
                Event::Text(ref t) => {
                    if let Some(parent) = stack.last_mut() {
                        let raw = String::from_utf8_lossy(t);
                        parent.push_text(&unescape_lossy(&raw));
                    }
                },
                Event::CData(ref c) => {
                    if let Some(parent) = stack.last_mut() {
                        parent.push_text(&String::from_utf8_lossy(c));
                    }
                },
                Event::Eof => break,
                // declarations, comments, processing instructions, doctype
                _ => {},
            }
        }

        if let Some(open) = stack.pop() {
            return Err(XmlError::Unclosed(open.name));
        }
        root.ok_or(XmlError::Empty)
    }

    fn push_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        // adjacent text and CDATA chunks form one text node
        if let Some(Node::Text(last)) = self.children.last_mut() {
            last.push_str(text);
        } else {
            self.children.push(Node::Text(text.to_string()));
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Attribute value, empty when absent
    pub fn attr_or_empty(&self, name: &str) -> &str {
        self.attr(name).unwrap_or("")
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attr(name).is_some()
    }

    /// Direct child elements in document order
    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        })
    }

    pub fn has_element_children(&self) -> bool {
        self.elements().next().is_some()
    }

    pub fn child(&self, name: &str) -> Option<&Element> {
        self.elements().find(|e| e.name == name)
    }

    pub fn children_named<'a, 'n>(&'a self, name: &'n str) -> impl Iterator<Item = &'a Element> + 'n
    where
        'a: 'n,
    {
        self.elements().filter(move |e| e.name == name)
    }

    /// Follow a `/` separated path of child element names.
    pub fn path(&self, path: &str) -> Option<&Element> {
        path.split('/')
            .filter(|segment| !segment.is_empty())
            .try_fold(self, |current, segment| current.child(segment))
    }

    /// All elements matching a `/` separated child path, like `table/tbody/tr`.
    pub fn path_all(&self, path: &str) -> Vec<&Element> {
        let mut current = vec![self];
        for segment in path.split('/').filter(|segment| !segment.is_empty()) {
            current = current
                .into_iter()
                .flat_map(move |e| e.elements().filter(move |c| c.name == segment))
                .collect();
        }
        current
    }

    /// Descendant elements in document order, not including `self`.
    pub fn descendants(&self) -> Vec<&Element> {
        let mut out = Vec::new();
        collect_descendants(self, &mut out);
        out
    }

    /// First descendant with the given name.
    pub fn find(&self, name: &str) -> Option<&Element> {
        self.descendants().into_iter().find(|e| e.name == name)
    }

    pub fn find_all(&self, name: &str) -> Vec<&Element> {
        self.descendants()
            .into_iter()
            .filter(|e| e.name == name)
            .collect()
    }

    /// First descendant `<name attr="value">`.
    pub fn find_with_attr(&self, name: &str, attr: &str, value: &str) -> Option<&Element> {
        self.descendants()
            .into_iter()
            .find(|e| e.name == name && e.attr(attr) == Some(value))
    }

    pub fn find_all_with_attr(&self, name: &str, attr: &str, value: &str) -> Vec<&Element> {
        self.descendants()
            .into_iter()
            .filter(|e| e.name == name && e.attr(attr) == Some(value))
            .collect()
    }

    /// Concatenated text of all descendant text nodes.
    pub fn text(&self) -> String {
        let mut out = String::new();
        collect_text(self, &mut out);
        out
    }

    /// Text of the direct text children only.
    pub fn own_text(&self) -> String {
        self.children
            .iter()
            .filter_map(|node| match node {
                Node::Text(t) => Some(t.as_str()),
                Node::Element(_) => None,
            })
            .collect()
    }

    /// Serialize back to markup.
    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        write_element(self, &mut out);
        out
    }
}

fn start_element(e: &BytesStart<'_>, position: u64) -> Result<Element> {
    let mut element = Element::new(String::from_utf8_lossy(e.name().as_ref()).into_owned());
    for attr in e.attributes() {
        let attr = attr.map_err(|err| XmlError::Syntax {
            position,
            message: err.to_string(),
        })?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let raw = String::from_utf8_lossy(&attr.value);
        element.attributes.push((key, unescape_lossy(&raw)));
    }
    Ok(element)
}

fn close(
    stack: &mut [Element],
    root: &mut Option<Element>,
    element: Element,
    position: u64,
) -> Result<()> {
    match stack.last_mut() {
        Some(parent) => {
            parent.children.push(Node::Element(element));
            Ok(())
        },
        None if root.is_none() => {
            *root = Some(element);
            Ok(())
        },
        None => Err(XmlError::Syntax {
            position,
            message: "multiple root elements".to_string(),
        }),
    }
}

fn unescape_lossy(raw: &str) -> String {
    match unescape_with(raw, html_entity) {
        Ok(text) => text.into_owned(),
        Err(e) => {
            debug!(error = %e, "Keeping text with unresolved entity verbatim");
            raw.to_string()
        },
    }
}

fn html_entity(name: &str) -> Option<&'static str> {
    let value = match name {
        "nbsp" => "\u{a0}",
        "shy" => "\u{ad}",
        "ndash" => "–",
        "mdash" => "—",
        "bdquo" => "„",
        "ldquo" => "“",
        "rdquo" => "”",
        "lsquo" => "‘",
        "rsquo" => "’",
        "sbquo" => "‚",
        "laquo" => "«",
        "raquo" => "»",
        "hellip" => "…",
        "euro" => "€",
        "middot" => "·",
        "bull" => "•",
        "copy" => "©",
        "reg" => "®",
        "deg" => "°",
        "auml" => "ä",
        "ouml" => "ö",
        "uuml" => "ü",
        "Auml" => "Ä",
        "Ouml" => "Ö",
        "Uuml" => "Ü",
        "szlig" => "ß",
        "eacute" => "é",
        "egrave" => "è",
        "agrave" => "à",
        _ => return resolve_predefined_entity(name),
    };
    Some(value)
}

fn collect_descendants<'a>(element: &'a Element, out: &mut Vec<&'a Element>) {
    for child in element.elements() {
        out.push(child);
        collect_descendants(child, out);
    }
}

fn collect_text(element: &Element, out: &mut String) {
    for node in &element.children {
        match node {
            Node::Text(t) => out.push_str(t),
            Node::Element(e) => collect_text(e, out),
        }
    }
}

fn write_element(element: &Element, out: &mut String) {
    out.push('<');
    out.push_str(&element.name);
    for (key, value) in &element.attributes {
        out.push(' ');
        out.push_str(key);
        out.push_str("=\"");
        out.push_str(&escape(value.as_str()));
        out.push('"');
    }
    if element.children.is_empty() {
        out.push_str("/>");
        return;
    }
    out.push('>');
    for node in &element.children {
        match node {
            Node::Text(t) => out.push_str(&escape(t.as_str())),
            Node::Element(e) => write_element(e, out),
        }
    }
    out.push_str("</");
    out.push_str(&element.name);
    out.push('>');
}

/// Escape text for inclusion in generated HTML.
pub fn escape_html(value: &str) -> Cow<'_, str> {
    escape(value)
}
