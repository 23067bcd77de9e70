use std::collections::BTreeMap;
use std::fmt;
use std::io::Cursor;

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use super::error::{XmlParseError, XmlParseResult};
use super::query;

pub(crate) type NodeId = usize;

const ROOT: NodeId = 0;

#[derive(Debug, Clone, PartialEq)]
struct NodeData {
    name: String,
    attributes: BTreeMap<String, String>,
    text: Option<String>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl NodeData {
    fn new(name: String, attributes: BTreeMap<String, String>, parent: Option<NodeId>) -> Self {
        Self {
            name,
            attributes,
            text: None,
            parent,
            children: Vec::new(),
        }
    }
}

/// A parsed XML document.
///
/// Nodes live in a flat arena owned by the document. Child lists are the
/// only ownership edges; parent links are plain indices back into the arena,
/// so dropping the document never has to walk them.
///
/// Index 0 is a synthetic, unnamed root whose children are the top-level
/// elements of the input.
#[derive(Debug, Clone, PartialEq)]
pub struct XmlDocument {
    nodes: Vec<NodeData>,
}

impl XmlDocument {
    pub(crate) fn new() -> Self {
        Self {
            nodes: vec![NodeData::new(String::new(), BTreeMap::new(), None)],
        }
    }

    /// The synthetic query root
    pub fn root(&self) -> XmlNode<'_> {
        XmlNode { doc: self, id: ROOT }
    }

    /// Shorthand for `self.root().query(path)`
    pub fn query(&self, path: &str) -> Vec<XmlNode<'_>> {
        self.root().query(path)
    }

    /// Text of the first node matching `path`
    pub fn query_text(&self, path: &str) -> Option<&str> {
        self.query(path).into_iter().find_map(|node| node.text())
    }

    pub(crate) fn root_id(&self) -> NodeId {
        ROOT
    }

    pub(crate) fn append_child(
        &mut self,
        parent: NodeId,
        name: String,
        attributes: BTreeMap<String, String>,
    ) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(NodeData::new(name, attributes, Some(parent)));
        self.nodes[parent].children.push(id);
        id
    }

    pub(crate) fn append_text(&mut self, id: NodeId, text: &str) {
        self.nodes[id]
            .text
            .get_or_insert_with(String::new)
            .push_str(text);
    }

    pub(crate) fn name_of(&self, id: NodeId) -> &str {
        &self.nodes[id].name
    }

    pub(crate) fn parent_of(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id].parent
    }
}

/// Borrowed view of one element inside an [`XmlDocument`]
#[derive(Clone, Copy)]
pub struct XmlNode<'a> {
    doc: &'a XmlDocument,
    id: NodeId,
}

impl<'a> XmlNode<'a> {
    fn data(&self) -> &'a NodeData {
        &self.doc.nodes[self.id]
    }

    /// Tag name with any namespace prefix removed. Empty for the document root.
    pub fn name(&self) -> &'a str {
        &self.data().name
    }

    pub fn attributes(&self) -> &'a BTreeMap<String, String> {
        &self.data().attributes
    }

    pub fn attribute(&self, key: &str) -> Option<&'a str> {
        self.data().attributes.get(key).map(String::as_str)
    }

    /// Direct text content, if any was seen while this element was open
    pub fn text(&self) -> Option<&'a str> {
        self.data().text.as_deref()
    }

    pub fn parent(&self) -> Option<XmlNode<'a>> {
        self.data().parent.map(|id| XmlNode { doc: self.doc, id })
    }

    /// Children in document order
    pub fn children(&self) -> impl Iterator<Item = XmlNode<'a>> + 'a {
        let doc = self.doc;
        self.data().children.iter().map(move |&id| XmlNode { doc, id })
    }

    /// First direct child with the given name
    pub fn child(&self, name: &str) -> Option<XmlNode<'a>> {
        self.children().find(|child| child.name() == name)
    }

    pub fn child_text(&self, name: &str) -> Option<&'a str> {
        self.child(name).and_then(|child| child.text())
    }

    pub fn is_root(&self) -> bool {
        self.id == ROOT
    }

    /// Evaluate a `/`-delimited path relative to this node
    pub fn query(&self, path: &str) -> Vec<XmlNode<'a>> {
        query::query(*self, path)
    }

    /// Serialize this element and its descendants back to XML.
    ///
    /// For the document root this writes each top-level element in order.
    /// Mixed content is not preserved: an element's text is written before
    /// its children.
    pub fn to_xml(&self) -> XmlParseResult<String> {
        let mut writer = Writer::new(Cursor::new(Vec::new()));
        if self.is_root() {
            for child in self.children() {
                write_node(&mut writer, child)?;
            }
        } else {
            write_node(&mut writer, *self)?;
        }

        String::from_utf8(writer.into_inner().into_inner())
            .map_err(|e| XmlParseError::InvalidStructure(e.to_string()))
    }
}

fn write_node(writer: &mut Writer<Cursor<Vec<u8>>>, node: XmlNode<'_>) -> XmlParseResult<()> {
    let mut start = BytesStart::new(node.name());
    for (key, value) in node.attributes() {
        start.push_attribute((key.as_str(), value.as_str()));
    }

    if node.text().is_none() && node.data().children.is_empty() {
        return writer
            .write_event(Event::Empty(start))
            .map_err(|e| XmlParseError::SyntaxError(e.to_string()));
    }

    writer
        .write_event(Event::Start(start))
        .map_err(|e| XmlParseError::SyntaxError(e.to_string()))?;
    if let Some(text) = node.text() {
        writer
            .write_event(Event::Text(BytesText::new(text)))
            .map_err(|e| XmlParseError::SyntaxError(e.to_string()))?;
    }
    for child in node.children() {
        write_node(writer, child)?;
    }
    writer
        .write_event(Event::End(BytesEnd::new(node.name())))
        .map_err(|e| XmlParseError::SyntaxError(e.to_string()))
}

impl PartialEq for XmlNode<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.doc, other.doc) && self.id == other.id
    }
}

impl fmt::Debug for XmlNode<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XmlNode")
            .field("name", &self.name())
            .field("attributes", self.attributes())
            .field("text", &self.text())
            .field("children", &self.data().children.len())
            .finish()
    }
}
