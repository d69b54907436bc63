// src/markup.rs
//! Body markup tree emitted for topics.
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Node {
    Element(Element),
    Text(String),
}

impl Node {
    pub fn text(text: impl Into<String>) -> Self {
        Node::Text(text.into())
    }

    pub fn as_element(&self) -> Option<&Element> {
        match self {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        }
    }

    /// Concatenated text content.
    pub fn plain_text(&self) -> String {
        match self {
            Node::Text(t) => t.clone(),
            Node::Element(e) => e.plain_text(),
        }
    }
}

impl From<Element> for Node {
    fn from(element: Element) -> Self {
        Node::Element(element)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Element {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<Node>,
}

impl Element {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            attrs: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn with_attr(mut self, key: &str, value: impl Into<String>) -> Self {
        self.set_attr(key, value);
        self
    }

    pub fn with_child(mut self, child: impl Into<Node>) -> Self {
        self.children.push(child.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.children.push(Node::Text(text.into()));
        self
    }

    pub fn set_attr(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.attrs.iter_mut().find(|(k, _)| k == key) {
            Some(slot) => slot.1 = value,
            None => self.attrs.push((key.to_string(), value)),
        }
    }

    pub fn push(&mut self, child: impl Into<Node>) {
        self.children.push(child.into());
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(Node::as_element)
    }

    /// Depth-first search over descendants, self excluded.
    pub fn descendants_named<'a>(&'a self, name: &str) -> Vec<&'a Element> {
        let mut found = Vec::new();
        let mut stack: Vec<&Element> = self.elements().collect();
        stack.reverse();
        while let Some(e) = stack.pop() {
            if e.name == name {
                found.push(e);
            }
            let mut kids: Vec<&Element> = e.elements().collect();
            kids.reverse();
            stack.extend(kids);
        }
        found
    }

    pub fn plain_text(&self) -> String {
        self.children.iter().map(Node::plain_text).collect()
    }

    pub fn to_xml(&self) -> String {
        let mut writer = Writer::new(Vec::new());
        // Writing into a Vec cannot fail.
        let _ = write_element(&mut writer, self);
        String::from_utf8_lossy(&writer.into_inner()).into_owned()
    }
}

/// Renders a node sequence as one XML fragment.
pub fn nodes_to_xml(nodes: &[Node]) -> String {
    let mut writer = Writer::new(Vec::new());
    for node in nodes {
        let _ = write_node(&mut writer, node);
    }
    String::from_utf8_lossy(&writer.into_inner()).into_owned()
}

fn write_node(writer: &mut Writer<Vec<u8>>, node: &Node) -> quick_xml::Result<()> {
    match node {
        Node::Text(text) => writer.write_event(Event::Text(BytesText::new(text))),
        Node::Element(element) => write_element(writer, element),
    }
}

fn write_element(writer: &mut Writer<Vec<u8>>, element: &Element) -> quick_xml::Result<()> {
    let mut start = BytesStart::new(element.name.as_str());
    for (key, value) in &element.attrs {
        start.push_attribute((key.as_str(), value.as_str()));
    }
    if element.children.is_empty() {
        return writer.write_event(Event::Empty(start));
    }
    writer.write_event(Event::Start(start))?;
    for child in &element.children {
        write_node(writer, child)?;
    }
    writer.write_event(Event::End(BytesEnd::new(element.name.as_str())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_nested_markup_with_escaping() {
        let p = Element::new("p")
            .with_attr("outputclass", "center")
            .with_text("a < b ")
            .with_child(Element::new("b").with_text("&"));
        assert_eq!(
            p.to_xml(),
            r#"<p outputclass="center">a &lt; b <b>&amp;</b></p>"#
        );
    }

    #[test]
    fn empty_elements_self_close() {
        let entry = Element::new("entry").with_attr("colname", "c2");
        assert_eq!(entry.to_xml(), r#"<entry colname="c2"/>"#);
    }

    #[test]
    fn set_attr_replaces_existing_value() {
        let mut e = Element::new("row").with_attr("outputclass", "a");
        e.set_attr("outputclass", "b");
        assert_eq!(e.attrs.len(), 1);
        assert_eq!(e.attr("outputclass"), Some("b"));
    }

    #[test]
    fn descendants_are_found_in_document_order() {
        let tree = Element::new("table").with_child(
            Element::new("tgroup")
                .with_child(Element::new("row").with_attr("n", "1"))
                .with_child(Element::new("tbody").with_child(Element::new("row").with_attr("n", "2"))),
        );
        let rows: Vec<_> = tree
            .descendants_named("row")
            .iter()
            .filter_map(|r| r.attr("n"))
            .collect();
        assert_eq!(rows, vec!["1", "2"]);
    }
}
