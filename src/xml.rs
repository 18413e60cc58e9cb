//! A small owned XML tree on top of `quick_xml`'s event reader.
//!
//! Feeds from the supported services are small, so parsing into a tree and
//! then walking it is simpler than streaming. Namespace prefixes are dropped:
//! `<media:title>` is found as `title`.

use anyhow::Result;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::SyncError;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Element {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    /// Concatenated text and CDATA directly inside this element.
    pub text: String,
    pub children: Vec<Element>,
}

impl Element {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// First direct child with the given local name.
    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Trimmed text of the first direct child with the given name.
    pub fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name).map(|c| c.text.trim())
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Every element below this one with the given name, in document order.
    pub fn descendants<'a>(&'a self, name: &str) -> Vec<&'a Element> {
        let mut out = Vec::new();
        collect(self, name, &mut out);
        out
    }
}

fn collect<'a>(el: &'a Element, name: &str, out: &mut Vec<&'a Element>) {
    for child in &el.children {
        if child.name == name {
            out.push(child);
        }
        collect(child, name, out);
    }
}

/// Parse a document and return its root element.
pub fn parse(bytes: &[u8]) -> Result<Element> {
    let mut reader = Reader::from_reader(bytes);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => stack.push(open(&e)?),
            Ok(Event::Empty(e)) => {
                let el = open(&e)?;
                attach(&mut stack, &mut root, el);
            }
            Ok(Event::End(_)) => {
                if let Some(el) = stack.pop() {
                    attach(&mut stack, &mut root, el);
                }
            }
            Ok(Event::Text(t)) => {
                if let Some(top) = stack.last_mut() {
                    let text = t
                        .unescape()
                        .map_err(|e| SyncError::decode("XML", e.to_string()))?;
                    top.text.push_str(&text);
                }
            }
            Ok(Event::CData(c)) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(SyncError::decode("XML", e.to_string()).into()),
            _ => {}
        }
        buf.clear();
    }

    match root {
        Some(root) => Ok(root),
        None => Err(SyncError::decode("XML", "document has no root element").into()),
    }
}

fn open(e: &BytesStart<'_>) -> Result<Element> {
    let mut el = Element {
        name: String::from_utf8_lossy(e.local_name().as_ref()).into_owned(),
        ..Element::default()
    };
    for attr in e.attributes() {
        let attr = attr.map_err(|err| SyncError::decode("XML attribute", err.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|err| SyncError::decode("XML attribute", err.to_string()))?
            .into_owned();
        el.attrs.push((key, value));
    }
    Ok(el)
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, el: Element) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(el),
        None => {
            if root.is_none() {
                *root = Some(el);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_elements_and_attributes() {
        let doc = br#"<?xml version="1.0"?>
<posts user="jacob">
  <post href="http://example.com/" hash="abc" tag="a b"/>
  <post href="http://example.org/" hash="def" tag=""/>
</posts>"#;
        let root = parse(doc).unwrap();
        assert_eq!(root.name, "posts");
        assert_eq!(root.attr("user"), Some("jacob"));
        let posts: Vec<_> = root.children_named("post").collect();
        assert_eq!(posts.len(), 2);
        assert_eq!(posts[1].attr("hash"), Some("def"));
    }

    #[test]
    fn drops_namespace_prefixes_and_keeps_cdata() {
        let doc = br#"<feed xmlns:media="http://search.yahoo.com/mrss/">
  <entry><media:group><media:title>Cat &amp; dog</media:title></media:group>
  <content><![CDATA[<b>hi</b>]]></content></entry>
</feed>"#;
        let root = parse(doc).unwrap();
        let titles = root.descendants("title");
        assert_eq!(titles.len(), 1);
        assert_eq!(titles[0].text, "Cat & dog");
        let entry = root.child("entry").unwrap();
        assert_eq!(entry.child_text("content"), Some("<b>hi</b>"));
    }

    #[test]
    fn garbage_is_undecodable() {
        assert!(crate::error::is_decode(&parse(b"").unwrap_err()));
        assert!(parse(b"<a><b></a>").is_err());
    }
}
