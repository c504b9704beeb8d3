//! Input/output slot model and widget records

use crate::types::{LinkId, SlotType};
use serde::{Deserialize, Serialize};

/// An input slot on a node.
///
/// Holds at most one incoming link. When `widget` is set and no link is
/// attached, the widget value on the node is the canonical value for this
/// input.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputSlot {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: SlotType,
    /// The incoming link, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<LinkId>,
    /// Name of the widget backing this input, if widget-convertible
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub widget: Option<String>,
    /// Floating links terminating at this slot
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub floating_links: Vec<LinkId>,
}

impl InputSlot {
    pub fn new(name: impl Into<String>, ty: impl Into<SlotType>) -> Self {
        Self {
            name: name.into(),
            ty: ty.into(),
            link: None,
            widget: None,
            floating_links: Vec::new(),
        }
    }

    pub fn with_widget(mut self, widget: impl Into<String>) -> Self {
        self.widget = Some(widget.into());
        self
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_some()
    }
}

/// An output slot on a node. Fans out to any number of links.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputSlot {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: SlotType,
    /// Outgoing links, in connection order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<LinkId>,
    /// Floating links originating at this slot
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub floating_links: Vec<LinkId>,
}

impl OutputSlot {
    pub fn new(name: impl Into<String>, ty: impl Into<SlotType>) -> Self {
        Self {
            name: name.into(),
            ty: ty.into(),
            links: Vec::new(),
            floating_links: Vec::new(),
        }
    }

    pub fn is_connected(&self) -> bool {
        !self.links.is_empty()
    }
}

/// A widget value carried by a node
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Widget {
    pub name: String,
    /// Widget kind, e.g. `"number"`, `"text"`, `"combo"`
    pub kind: String,
    pub value: serde_json::Value,
}

impl Widget {
    pub fn new(
        name: impl Into<String>,
        kind: impl Into<String>,
        value: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_slot_connected() {
        let mut slot = InputSlot::new("image", "IMAGE");
        assert!(!slot.is_connected());
        slot.link = Some(4);
        assert!(slot.is_connected());
    }

    #[test]
    fn test_slot_serde_shape() {
        let slot = InputSlot::new("value", "INT").with_widget("value");
        let json = serde_json::to_value(&slot).unwrap();
        assert_eq!(json["type"], "INT");
        assert_eq!(json["widget"], "value");
        assert!(json.get("link").is_none());
    }
}
