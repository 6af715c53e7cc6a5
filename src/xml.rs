//! Minimal owned XML tree on top of quick-xml.
//!
//! The harvested documents are namespace-heavy (didl, dc, dcx, srw_dc, ...)
//! but every lookup the extractor needs is by local name, so element and
//! attribute names are stored with their prefixes stripped. Namespace
//! declarations (`xmlns`, `xmlns:*`) are not kept as attributes.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::{HarvestError, Result};

#[derive(Debug, Clone, Default)]
pub struct XmlNode {
    /// Local element name, prefix stripped.
    pub name: String,
    /// Local attribute names and unescaped values, xmlns declarations excluded.
    pub attrs: Vec<(String, String)>,
    /// Concatenated text content directly under this element.
    pub text: String,
    pub children: Vec<XmlNode>,
}

impl XmlNode {
    /// First descendant (depth-first, document order) with the given local name.
    pub fn find(&self, local: &str) -> Option<&XmlNode> {
        for child in &self.children {
            if child.name == local {
                return Some(child);
            }
            if let Some(found) = child.find(local) {
                return Some(found);
            }
        }
        None
    }

    /// All descendants with the given local name, document order.
    pub fn find_all<'a>(&'a self, local: &str) -> Vec<&'a XmlNode> {
        let mut out = Vec::new();
        self.collect_named(local, &mut out);
        out
    }

    fn collect_named<'a>(&'a self, local: &str, out: &mut Vec<&'a XmlNode>) {
        for child in &self.children {
            if child.name == local {
                out.push(child);
            }
            child.collect_named(local, out);
        }
    }

    pub fn attr(&self, local: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == local)
            .map(|(_, v)| v.as_str())
    }

    pub fn trimmed_text(&self) -> &str {
        self.text.trim()
    }
}

fn local_name(qname: &[u8]) -> String {
    let name = String::from_utf8_lossy(qname);
    match name.rsplit_once(':') {
        Some((_, local)) => local.to_string(),
        None => name.into_owned(),
    }
}

fn node_from_start(start: &BytesStart<'_>, context: &str) -> Result<XmlNode> {
    let mut attrs = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| HarvestError::parse(context, e.to_string()))?;
        // xmlns / xmlns:* are namespace declarations, not data.
        if attr.key.as_ref() == b"xmlns" || attr.key.as_ref().starts_with(b"xmlns:") {
            continue;
        }
        let value = attr
            .unescape_value()
            .map_err(|e| HarvestError::parse(context, e.to_string()))?;
        attrs.push((local_name(attr.key.as_ref()), value.into_owned()));
    }
    Ok(XmlNode {
        name: local_name(start.name().as_ref()),
        attrs,
        text: String::new(),
        children: Vec::new(),
    })
}

/// Parse a whole document into a tree, returning the root element.
pub fn parse(doc: &str, context: &str) -> Result<XmlNode> {
    let mut reader = Reader::from_str(doc);
    reader.config_mut().trim_text(true);

    // Index 0 is a virtual root that collects top-level elements.
    let mut stack: Vec<XmlNode> = vec![XmlNode::default()];

    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => {
                stack.push(node_from_start(&start, context)?);
            }
            Ok(Event::Empty(start)) => {
                let node = node_from_start(&start, context)?;
                stack
                    .last_mut()
                    .expect("virtual root always present")
                    .children
                    .push(node);
            }
            Ok(Event::End(_)) => {
                // The reader rejects mismatched end tags, so the stack
                // always holds at least the virtual root plus one element.
                let node = stack.pop().expect("element open for end tag");
                stack
                    .last_mut()
                    .expect("virtual root always present")
                    .children
                    .push(node);
            }
            Ok(Event::Text(text)) => {
                let unescaped = text
                    .unescape()
                    .map_err(|e| HarvestError::parse(context, e.to_string()))?;
                stack
                    .last_mut()
                    .expect("virtual root always present")
                    .text
                    .push_str(&unescaped);
            }
            Ok(Event::CData(data)) => {
                stack
                    .last_mut()
                    .expect("virtual root always present")
                    .text
                    .push_str(&String::from_utf8_lossy(&data));
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(HarvestError::parse(context, e.to_string())),
        }
    }

    let mut virtual_root = stack.pop().expect("virtual root always present");
    if !stack.is_empty() {
        return Err(HarvestError::parse(context, "unclosed element at end of document"));
    }
    let root = virtual_root
        .children
        .drain(..)
        .next()
        .ok_or_else(|| HarvestError::parse(context, "document contains no element"));
    root
}
