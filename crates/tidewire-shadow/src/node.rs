use std::collections::BTreeMap;
use std::fmt;

use tidewire_proto::{AttributeValue, ComponentId};

/// Stable handle into the tree's arena.
pub type NodeId = usize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Container,
    Element {
        name: String,
        attributes: BTreeMap<String, AttributeValue>,
        reference_capture: Option<String>,
    },
    Text {
        content: String,
    },
    Markup {
        content: String,
    },
    Component {
        component_id: ComponentId,
    },
}

impl NodeKind {
    pub fn element(name: impl Into<String>) -> Self {
        NodeKind::Element {
            name: name.into(),
            attributes: BTreeMap::new(),
            reference_capture: None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            NodeKind::Container => "container",
            NodeKind::Element { .. } => "element",
            NodeKind::Text { .. } => "text",
            NodeKind::Markup { .. } => "markup",
            NodeKind::Component { .. } => "component",
        }
    }

    /// Whether edits may step into this node.
    pub fn has_children(&self) -> bool {
        matches!(
            self,
            NodeKind::Container | NodeKind::Element { .. } | NodeKind::Component { .. }
        )
    }
}

#[derive(Debug)]
pub struct LogicalNode {
    pub(crate) kind: NodeKind,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
}

impl LogicalNode {
    pub(crate) fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            parent: None,
            children: Vec::new(),
        }
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }
}

/// Owned copy of a subtree, used to compare trees without arena handles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotNode {
    pub kind: NodeKind,
    pub children: Vec<SnapshotNode>,
}

impl SnapshotNode {
    pub fn leaf(kind: NodeKind) -> Self {
        Self {
            kind,
            children: Vec::new(),
        }
    }

    pub fn text(content: impl Into<String>) -> Self {
        Self::leaf(NodeKind::Text {
            content: content.into(),
        })
    }

    pub fn element(name: impl Into<String>, children: Vec<SnapshotNode>) -> Self {
        Self {
            kind: NodeKind::element(name),
            children,
        }
    }
}

impl fmt::Display for SnapshotNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            NodeKind::Container | NodeKind::Component { .. } => {
                for child in &self.children {
                    write!(f, "{child}")?;
                }
                Ok(())
            }
            NodeKind::Element {
                name, attributes, ..
            } => {
                write!(f, "<{name}")?;
                for (key, value) in attributes {
                    match value {
                        AttributeValue::Text(text) => write!(f, " {key}=\"{text}\"")?,
                        AttributeValue::EventHandler(id) => write!(f, " {key}=\"#{id}\"")?,
                    }
                }
                write!(f, ">")?;
                for child in &self.children {
                    write!(f, "{child}")?;
                }
                write!(f, "</{name}>")
            }
            NodeKind::Text { content } | NodeKind::Markup { content } => f.write_str(content),
        }
    }
}
