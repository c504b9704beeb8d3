//! Node-definition registry
//!
//! Definitions describe the slots and widgets a node type exposes. The
//! registry is an explicit handle passed to whoever needs it; there is no
//! process-wide global.

use crate::error::{GraphError, Result};
use crate::node::{Node, NodeRole};
use crate::slots::{InputSlot, OutputSlot, Widget};
use crate::types::{NodeId, SlotType};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Widget configuration attached to an input definition
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetSpec {
    /// Widget kind, e.g. `"number"`, `"text"`, `"combo"`
    pub kind: String,
    /// Option list for combo widgets
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    pub default: serde_json::Value,
    /// When set, the input must be fed by a link even though a widget spec
    /// exists
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub force_input: bool,
}

impl WidgetSpec {
    pub fn combo(options: Vec<serde_json::Value>) -> Self {
        Self {
            kind: "combo".to_string(),
            default: options.first().cloned().unwrap_or_default(),
            options: Some(options),
            force_input: false,
        }
    }
}

/// Definition of one input on a node type
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputDef {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: SlotType,
    #[serde(default = "default_true")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub widget: Option<WidgetSpec>,
}

fn default_true() -> bool {
    true
}

impl InputDef {
    pub fn new(name: impl Into<String>, ty: impl Into<SlotType>) -> Self {
        Self {
            name: name.into(),
            ty: ty.into(),
            required: true,
            widget: None,
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn with_widget(mut self, widget: WidgetSpec) -> Self {
        self.widget = Some(widget);
        self
    }

    /// True when this input is driven by a widget value rather than a link
    pub fn is_widget_input(&self) -> bool {
        self.widget.as_ref().is_some_and(|w| !w.force_input)
    }
}

/// Definition of one output on a node type
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputDef {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: SlotType,
}

impl OutputDef {
    pub fn new(name: impl Into<String>, ty: impl Into<SlotType>) -> Self {
        Self {
            name: name.into(),
            ty: ty.into(),
        }
    }
}

/// A registered node type
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDef {
    #[serde(rename = "type")]
    pub type_name: String,
    pub title: String,
    #[serde(default)]
    pub role: NodeRole,
    #[serde(default)]
    pub inputs: Vec<InputDef>,
    #[serde(default)]
    pub outputs: Vec<OutputDef>,
    /// Set on definitions synthesized from a group; carries the data needed
    /// to expand instances back into their inner nodes
    #[serde(skip)]
    pub group: Option<Arc<crate::groups::GroupNodeConfig>>,
}

impl NodeDef {
    pub fn new(type_name: impl Into<String>) -> Self {
        let type_name = type_name.into();
        Self {
            title: type_name.clone(),
            type_name,
            ..Default::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_role(mut self, role: NodeRole) -> Self {
        self.role = role;
        self
    }

    pub fn input(mut self, input: InputDef) -> Self {
        self.inputs.push(input);
        self
    }

    pub fn output(mut self, output: OutputDef) -> Self {
        self.outputs.push(output);
        self
    }

    pub fn is_group(&self) -> bool {
        self.group.is_some()
    }

    /// Build a node instance from this definition
    pub fn instantiate(&self, id: NodeId) -> Node {
        let mut node = Node::new(id, self.type_name.clone()).with_title(self.title.clone());
        node.role = self.role;
        for input in &self.inputs {
            let mut slot = InputSlot::new(input.name.clone(), input.ty.clone());
            if let Some(spec) = &input.widget {
                if !spec.force_input {
                    slot.widget = Some(input.name.clone());
                    node.widgets.push(Widget::new(
                        input.name.clone(),
                        spec.kind.clone(),
                        spec.default.clone(),
                    ));
                }
            }
            node.inputs.push(slot);
        }
        for output in &self.outputs {
            node.outputs
                .push(OutputSlot::new(output.name.clone(), output.ty.clone()));
        }
        node
    }
}

/// Registry of node definitions keyed by type name
#[derive(Debug, Default)]
pub struct NodeRegistry {
    defs: HashMap<String, NodeDef>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition, replacing any previous one under the same name
    pub fn register(&mut self, def: NodeDef) {
        self.defs.insert(def.type_name.clone(), def);
    }

    pub fn get(&self, type_name: &str) -> Option<&NodeDef> {
        self.defs.get(type_name)
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.defs.contains_key(type_name)
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    /// Merge another set of definitions into this one; later wins
    pub fn merge(&mut self, defs: impl IntoIterator<Item = NodeDef>) {
        for def in defs {
            self.register(def);
        }
    }

    /// Build a node instance of a registered type
    pub fn instantiate(&self, id: NodeId, type_name: &str) -> Result<Node> {
        let def = self
            .get(type_name)
            .ok_or_else(|| GraphError::UnknownNodeType(type_name.to_string()))?;
        Ok(def.instantiate(id))
    }
}

/// A set of slot changes for one node, produced by remote type resolution
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDefPatch {
    #[serde(default)]
    pub inputs: Vec<InputDef>,
    #[serde(default)]
    pub outputs: Vec<OutputDef>,
}
