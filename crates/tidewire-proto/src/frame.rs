use crate::batch::{ComponentId, EventHandlerId};

/// Value carried by an attribute frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValue {
    Text(String),
    EventHandler(EventHandlerId),
}

/// One entry of a batch's reference-frame table.
///
/// `subtree_length` always counts the frame itself, so an element holding a
/// single text node has a length of 2.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceFrame {
    Element {
        name: String,
        subtree_length: u32,
    },
    Text {
        content: String,
    },
    Attribute {
        name: String,
        value: AttributeValue,
    },
    Component {
        component_id: ComponentId,
        subtree_length: u32,
    },
    Region {
        subtree_length: u32,
    },
    ElementReferenceCapture {
        capture_id: String,
    },
    ComponentReferenceCapture,
    Markup {
        content: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    Element,
    Text,
    Attribute,
    Component,
    Region,
    ElementReferenceCapture,
    ComponentReferenceCapture,
    Markup,
}

impl FrameKind {
    pub fn as_u8(self) -> u8 {
        match self {
            FrameKind::Element => 1,
            FrameKind::Text => 2,
            FrameKind::Attribute => 3,
            FrameKind::Component => 4,
            FrameKind::Region => 5,
            FrameKind::ElementReferenceCapture => 6,
            FrameKind::ComponentReferenceCapture => 7,
            FrameKind::Markup => 8,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(FrameKind::Element),
            2 => Some(FrameKind::Text),
            3 => Some(FrameKind::Attribute),
            4 => Some(FrameKind::Component),
            5 => Some(FrameKind::Region),
            6 => Some(FrameKind::ElementReferenceCapture),
            7 => Some(FrameKind::ComponentReferenceCapture),
            8 => Some(FrameKind::Markup),
            _ => None,
        }
    }
}

impl std::fmt::Display for FrameKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            FrameKind::Element => "element",
            FrameKind::Text => "text",
            FrameKind::Attribute => "attribute",
            FrameKind::Component => "component",
            FrameKind::Region => "region",
            FrameKind::ElementReferenceCapture => "element-reference-capture",
            FrameKind::ComponentReferenceCapture => "component-reference-capture",
            FrameKind::Markup => "markup",
        };
        f.write_str(label)
    }
}

impl ReferenceFrame {
    pub fn element(name: impl Into<String>, subtree_length: u32) -> Self {
        ReferenceFrame::Element {
            name: name.into(),
            subtree_length,
        }
    }

    pub fn text(content: impl Into<String>) -> Self {
        ReferenceFrame::Text {
            content: content.into(),
        }
    }

    pub fn markup(content: impl Into<String>) -> Self {
        ReferenceFrame::Markup {
            content: content.into(),
        }
    }

    pub fn attribute(name: impl Into<String>, value: impl Into<String>) -> Self {
        ReferenceFrame::Attribute {
            name: name.into(),
            value: AttributeValue::Text(value.into()),
        }
    }

    pub fn event_handler(name: impl Into<String>, handler_id: EventHandlerId) -> Self {
        ReferenceFrame::Attribute {
            name: name.into(),
            value: AttributeValue::EventHandler(handler_id),
        }
    }

    pub fn kind(&self) -> FrameKind {
        match self {
            ReferenceFrame::Element { .. } => FrameKind::Element,
            ReferenceFrame::Text { .. } => FrameKind::Text,
            ReferenceFrame::Attribute { .. } => FrameKind::Attribute,
            ReferenceFrame::Component { .. } => FrameKind::Component,
            ReferenceFrame::Region { .. } => FrameKind::Region,
            ReferenceFrame::ElementReferenceCapture { .. } => FrameKind::ElementReferenceCapture,
            ReferenceFrame::ComponentReferenceCapture => FrameKind::ComponentReferenceCapture,
            ReferenceFrame::Markup { .. } => FrameKind::Markup,
        }
    }

    /// Number of table slots this frame spans. Zero-length containers still
    /// occupy their own slot.
    pub fn subtree_length(&self) -> usize {
        match self {
            ReferenceFrame::Element { subtree_length, .. }
            | ReferenceFrame::Component { subtree_length, .. }
            | ReferenceFrame::Region { subtree_length } => (*subtree_length).max(1) as usize,
            _ => 1,
        }
    }
}
