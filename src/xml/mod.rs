// src/xml/mod.rs
//! Minimal XML element tree on top of quick-xml
//!
//! Documents are small enough to hold in memory, and a tree makes the
//! document-order walk for protected values straightforward. Text is kept
//! verbatim (no trimming) because field values may begin or end with spaces;
//! whitespace between child elements is dropped.

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use zeroize::Zeroize;

use crate::error::{FormatError, FormatResult};
use crate::progress::Progress;

const EVENTS_PER_POLL: usize = 4096;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlElement {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<XmlElement>,
    text: String,
}

impl XmlElement {
    pub fn new(name: &str) -> Self {
        XmlElement {
            name: name.to_owned(),
            attributes: Vec::new(),
            children: Vec::new(),
            text: String::new(),
        }
    }

    /// Parses a whole document and returns its root element
    pub fn parse(data: &[u8], progress: &Progress) -> FormatResult<XmlElement> {
        let mut reader = Reader::from_reader(data);
        let mut buf = Vec::new();
        let mut stack: Vec<XmlElement> = Vec::new();
        let mut root = None;
        let mut events = 0usize;

        loop {
            events += 1;
            if events % EVENTS_PER_POLL == 0 {
                progress.check()?;
            }
            match reader.read_event_into(&mut buf)? {
                Event::Start(start) => stack.push(element_from(&start)?),
                Event::Empty(start) => {
                    let element = element_from(&start)?;
                    attach(&mut stack, &mut root, element)?;
                }
                Event::End(_) => {
                    let element = stack
                        .pop()
                        .ok_or_else(|| FormatError::xml("unbalanced closing tag"))?;
                    attach(&mut stack, &mut root, element)?;
                }
                Event::Text(text) => {
                    if let Some(top) = stack.last_mut() {
                        top.text.push_str(&text.unescape()?);
                    }
                }
                Event::CData(data) => {
                    if let Some(top) = stack.last_mut() {
                        top.text.push_str(&String::from_utf8_lossy(&data.into_inner()));
                    }
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }

        if !stack.is_empty() {
            return Err(FormatError::xml("document ended inside an element"));
        }
        root.ok_or_else(|| FormatError::xml("document has no root element"))
    }

    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlElement> {
        self.children.iter().filter(move |c| c.name == name)
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Text content of a leaf element; empty for elements with children
    pub fn text(&self) -> &str {
        if self.children.is_empty() {
            &self.text
        } else {
            ""
        }
    }

    pub fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name).map(|c| c.text())
    }
}

impl Drop for XmlElement {
    fn drop(&mut self) {
        self.text.zeroize();
        for (_, value) in &mut self.attributes {
            value.zeroize();
        }
    }
}

fn element_from(start: &BytesStart<'_>) -> FormatResult<XmlElement> {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let mut element = XmlElement::new(&name);
    for attr in start.attributes() {
        let attr = attr.map_err(FormatError::xml)?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value()?.into_owned();
        element.attributes.push((key, value));
    }
    Ok(element)
}

fn attach(
    stack: &mut [XmlElement],
    root: &mut Option<XmlElement>,
    element: XmlElement,
) -> FormatResult<()> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None if root.is_none() => *root = Some(element),
        None => return Err(FormatError::xml("more than one root element")),
    }
    Ok(())
}

/// Streaming writer producing a compact (unindented) document
pub struct XmlWriter {
    inner: Writer<Vec<u8>>,
}

impl XmlWriter {
    pub fn new() -> FormatResult<Self> {
        let mut inner = Writer::new(Vec::new());
        inner.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), Some("yes"))))?;
        Ok(XmlWriter { inner })
    }

    pub fn start(&mut self, name: &str) -> FormatResult<()> {
        self.inner.write_event(Event::Start(BytesStart::new(name)))?;
        Ok(())
    }

    pub fn start_with(&mut self, name: &str, attributes: &[(&str, &str)]) -> FormatResult<()> {
        let mut start = BytesStart::new(name);
        for attr in attributes {
            start.push_attribute(*attr);
        }
        self.inner.write_event(Event::Start(start))?;
        Ok(())
    }

    pub fn end(&mut self, name: &str) -> FormatResult<()> {
        self.inner.write_event(Event::End(BytesEnd::new(name)))?;
        Ok(())
    }

    /// `<name attr..>value</name>`, or `<name attr../>` when the value is empty
    pub fn leaf_with(
        &mut self,
        name: &str,
        attributes: &[(&str, &str)],
        value: &str,
    ) -> FormatResult<()> {
        let mut start = BytesStart::new(name);
        for attr in attributes {
            start.push_attribute(*attr);
        }
        if value.is_empty() {
            self.inner.write_event(Event::Empty(start))?;
            return Ok(());
        }
        self.inner.write_event(Event::Start(start))?;
        self.inner
            .write_event(Event::Text(BytesText::new(value)))?;
        self.inner.write_event(Event::End(BytesEnd::new(name)))?;
        Ok(())
    }

    pub fn leaf(&mut self, name: &str, value: &str) -> FormatResult<()> {
        self.leaf_with(name, &[], value)
    }

    pub fn leaf_bool(&mut self, name: &str, value: bool) -> FormatResult<()> {
        self.leaf(name, bool_text(value))
    }

    pub fn leaf_opt_bool(&mut self, name: &str, value: Option<bool>) -> FormatResult<()> {
        let text = value.map(bool_text).unwrap_or("null");
        self.leaf(name, text)
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.inner.into_inner()
    }
}

pub fn bool_text(value: bool) -> &'static str {
    if value {
        "True"
    } else {
        "False"
    }
}

/// Parses the document's boolean spelling; anything unrecognised is `None`
pub fn parse_bool(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_leaf_whitespace_and_drops_indentation() {
        let doc = b"<?xml version=\"1.0\"?>\n<Root>\n  <Value Protected=\"True\">  padded  </Value>\n  <Empty/>\n</Root>";
        let root = XmlElement::parse(doc, &Progress::new()).unwrap();
        assert_eq!(root.name, "Root");
        assert_eq!(root.text(), "");
        let value = root.child("Value").unwrap();
        assert_eq!(value.text(), "  padded  ");
        assert_eq!(value.attr("Protected"), Some("True"));
        assert_eq!(root.child_text("Empty"), Some(""));
    }

    #[test]
    fn writer_output_parses_back_with_escaping() {
        let mut writer = XmlWriter::new().unwrap();
        writer.start("Root").unwrap();
        writer.leaf("Name", "a < b & \"c\"").unwrap();
        writer.leaf_with("Value", &[("Ref", "3")], "").unwrap();
        writer.end("Root").unwrap();
        let root = XmlElement::parse(&writer.into_inner(), &Progress::new()).unwrap();
        assert_eq!(root.child_text("Name"), Some("a < b & \"c\""));
        assert_eq!(root.child("Value").unwrap().attr("Ref"), Some("3"));
    }

    #[test]
    fn rejects_truncated_documents() {
        assert!(XmlElement::parse(b"<Root><Child>", &Progress::new()).is_err());
    }
}
