//! Node entity and per-type behavior hooks

use crate::link::Link;
use crate::slots::{InputSlot, OutputSlot, Widget};
use crate::types::{NodeId, SlotRef, SlotType};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How a node participates in connectivity algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeRole {
    /// An ordinary executable node
    #[default]
    Standard,
    /// Forwards its single input to its single output; adopts the upstream
    /// type and propagates it downstream
    PassThrough,
    /// Holds a widget value and applies it directly to consumers instead of
    /// executing
    Value,
}

/// Which side of a node a connection change happened on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionSide {
    Input,
    Output,
}

/// A node in the graph
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: NodeId,
    /// Registered type name this node was created from
    #[serde(rename = "type")]
    pub node_type: String,
    pub title: String,
    #[serde(default)]
    pub role: NodeRole,
    #[serde(default)]
    pub inputs: Vec<InputSlot>,
    #[serde(default)]
    pub outputs: Vec<OutputSlot>,
    #[serde(default)]
    pub widgets: Vec<Widget>,
    /// Free-form per-node properties
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub properties: HashMap<String, serde_json::Value>,
}

impl Node {
    pub fn new(id: NodeId, node_type: impl Into<String>) -> Self {
        let node_type = node_type.into();
        Self {
            id,
            title: node_type.clone(),
            node_type,
            role: NodeRole::Standard,
            inputs: Vec::new(),
            outputs: Vec::new(),
            widgets: Vec::new(),
            properties: HashMap::new(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn add_input(&mut self, slot: InputSlot) -> usize {
        self.inputs.push(slot);
        self.inputs.len() - 1
    }

    pub fn add_output(&mut self, slot: OutputSlot) -> usize {
        self.outputs.push(slot);
        self.outputs.len() - 1
    }

    /// Resolve a slot reference to an input index
    pub fn find_input_slot(&self, slot: &SlotRef) -> Option<usize> {
        match slot {
            SlotRef::Index(i) => (*i < self.inputs.len()).then_some(*i),
            SlotRef::Name(name) => self.inputs.iter().position(|s| &s.name == name),
        }
    }

    /// Resolve a slot reference to an output index
    pub fn find_output_slot(&self, slot: &SlotRef) -> Option<usize> {
        match slot {
            SlotRef::Index(i) => (*i < self.outputs.len()).then_some(*i),
            SlotRef::Name(name) => self.outputs.iter().position(|s| &s.name == name),
        }
    }

    pub fn widget(&self, name: &str) -> Option<&Widget> {
        self.widgets.iter().find(|w| w.name == name)
    }

    pub fn widget_mut(&mut self, name: &str) -> Option<&mut Widget> {
        self.widgets.iter_mut().find(|w| w.name == name)
    }

    /// Value applied by a [`NodeRole::Value`] node, taken from its first
    /// widget
    pub fn applied_value(&self) -> Option<&serde_json::Value> {
        self.widgets.first().map(|w| &w.value)
    }
}

/// Per-type connection hooks, registered against a node type name.
///
/// A strategy object rather than node subclassing: the graph consults the
/// behavior (if any) before committing a connection and notifies it after
/// every change.
pub trait NodeBehavior: Send + Sync {
    /// Veto point before a link lands on `input_slot` of `node`.
    /// Return false to reject the connection.
    fn on_connect_input(
        &self,
        node: &Node,
        input_slot: usize,
        origin_node: NodeId,
        origin_ty: &SlotType,
    ) -> bool {
        let _ = (node, input_slot, origin_node, origin_ty);
        true
    }

    /// Veto point before a link leaves `output_slot` of `node`.
    fn on_connect_output(
        &self,
        node: &Node,
        output_slot: usize,
        target_node: NodeId,
        target_ty: &SlotType,
    ) -> bool {
        let _ = (node, output_slot, target_node, target_ty);
        true
    }

    /// Called after a connection on `slot` was made or severed
    fn on_connections_change(
        &self,
        node: &Node,
        side: ConnectionSide,
        slot: usize,
        connected: bool,
        link: Option<&Link>,
    ) {
        let _ = (node, side, slot, connected, link);
    }
}

/// A behavior that accepts everything; used when no behavior is registered
pub struct DefaultBehavior;

impl NodeBehavior for DefaultBehavior {}
