use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::LibXml2Result;
use crate::libxml2::{
    LibXml2Wrapper, NodeType, XPathNode, XPathValue, XmlDocument, XmlNodeRef,
};

/// Kind of node a rule landed on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Element,
    Attribute,
    TextNode,
    CDataSection,
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TargetKind::Element => "element",
            TargetKind::Attribute => "attribute",
            TargetKind::TextNode => "text node",
            TargetKind::CDataSection => "CDATA section",
        };
        f.write_str(name)
    }
}

/// A node selected by a rule path, with the context needed to report on it.
///
/// Text and CDATA targets remember their parent element. Reads and writes
/// still act on the matched node alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchedTarget<'doc> {
    Element(XmlNodeRef<'doc>),
    Attribute(XmlNodeRef<'doc>),
    TextNode {
        node: XmlNodeRef<'doc>,
        parent: Option<XmlNodeRef<'doc>>,
    },
    CDataSection {
        node: XmlNodeRef<'doc>,
        parent: Option<XmlNodeRef<'doc>>,
    },
}

impl<'doc> MatchedTarget<'doc> {
    pub fn kind(&self) -> TargetKind {
        match self {
            MatchedTarget::Element(_) => TargetKind::Element,
            MatchedTarget::Attribute(_) => TargetKind::Attribute,
            MatchedTarget::TextNode { .. } => TargetKind::TextNode,
            MatchedTarget::CDataSection { .. } => TargetKind::CDataSection,
        }
    }

    fn node(&self) -> XmlNodeRef<'doc> {
        match *self {
            MatchedTarget::Element(node)
            | MatchedTarget::Attribute(node)
            | MatchedTarget::TextNode { node, .. }
            | MatchedTarget::CDataSection { node, .. } => node,
        }
    }

    /// Current textual value
    pub fn value(&self) -> String {
        self.node().value()
    }

    /// Replace the textual value in place
    pub fn write(&self, value: &str) -> LibXml2Result<()> {
        self.node().set_value(value)
    }

    /// Short human-readable location, e.g. `attribute @id of <item>`
    pub fn describe(&self) -> String {
        match self {
            MatchedTarget::Element(node) => format!("element <{}>", node.name()),
            MatchedTarget::Attribute(node) => match node.parent() {
                Some(owner) => format!("attribute @{} of <{}>", node.name(), owner.name()),
                None => format!("attribute @{}", node.name()),
            },
            MatchedTarget::TextNode { parent, .. } | MatchedTarget::CDataSection { parent, .. } => {
                match parent {
                    Some(parent) => format!("{} of <{}>", self.kind(), parent.name()),
                    None => self.kind().to_string(),
                }
            }
        }
    }
}

/// What a rule path selected in one document
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution<'doc> {
    /// A non-empty node-set. `skipped` names nodes that carry no rewritable value.
    Matched {
        targets: Vec<MatchedTarget<'doc>>,
        skipped: Vec<&'static str>,
    },
    /// Empty node-set
    NotFound,
    /// The path could not be evaluated or did not yield nodes
    Unresolvable(String),
}

/// Evaluates rule paths against document trees
#[derive(Debug, Clone)]
pub struct NodeResolver {
    libxml2: Arc<LibXml2Wrapper>,
    namespaces: BTreeMap<String, String>,
}

impl NodeResolver {
    pub fn new(libxml2: Arc<LibXml2Wrapper>, namespaces: BTreeMap<String, String>) -> Self {
        Self {
            libxml2,
            namespaces,
        }
    }

    /// Evaluate `path` against `document` and classify every selected node
    pub fn resolve<'doc>(&self, document: &'doc XmlDocument, path: &str) -> Resolution<'doc> {
        let value = match self.libxml2.evaluate_xpath(document, path, &self.namespaces) {
            Ok(value) => value,
            Err(e) => return Resolution::Unresolvable(e.to_string()),
        };

        let nodes = match value {
            XPathValue::Nodes(nodes) => nodes,
            XPathValue::Boolean(b) => {
                return Resolution::Unresolvable(format!("path yields the boolean {}, not nodes", b));
            }
            XPathValue::Number(n) => {
                return Resolution::Unresolvable(format!("path yields the number {}, not nodes", n));
            }
            XPathValue::String(s) => {
                return Resolution::Unresolvable(format!(
                    "path yields the string '{}', not nodes",
                    s
                ));
            }
            XPathValue::Other(code) => {
                return Resolution::Unresolvable(format!(
                    "path yields an unsupported result (type {})",
                    code
                ));
            }
        };

        if nodes.is_empty() {
            return Resolution::NotFound;
        }

        let mut targets = Vec::with_capacity(nodes.len());
        let mut skipped = Vec::new();
        for entry in nodes {
            let node = match entry {
                XPathNode::Tree(node) => node,
                XPathNode::Transient(kind) => {
                    skipped.push(kind.describe());
                    continue;
                }
            };
            match node.node_type() {
                NodeType::Element => targets.push(MatchedTarget::Element(node)),
                NodeType::Attribute => targets.push(MatchedTarget::Attribute(node)),
                NodeType::Text => targets.push(MatchedTarget::TextNode {
                    node,
                    parent: node.parent(),
                }),
                NodeType::CData => targets.push(MatchedTarget::CDataSection {
                    node,
                    parent: node.parent(),
                }),
                other => skipped.push(other.describe()),
            }
        }

        Resolution::Matched { targets, skipped }
    }
}
