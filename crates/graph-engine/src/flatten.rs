//! Flatten a graph into executable descriptors.
//!
//! Group instances expand into their inner nodes with path-scoped ids
//! (`outer:index`, nested recursively). Pass-through and value nodes
//! disappear from the output: every executable input is resolved through
//! them to a concrete producer or an applied value.

use crate::error::{GraphError, Result};
use crate::graph::Graph;
use crate::groups::GroupNodeConfig;
use crate::node::NodeRole;
use crate::registry::NodeRegistry;
use crate::slots::Widget;
use crate::types::{ExecutionId, NodeId, SlotType, scoped_id};
use std::collections::{HashMap, HashSet};

/// What feeds an executable input
#[derive(Debug, Clone, PartialEq)]
pub enum InputSource {
    /// Output `slot` of the executable node `id`
    Node { id: ExecutionId, slot: usize },
    /// A value applied directly, from a widget or a value node
    Value(serde_json::Value),
}

/// One input of an executable node, with its resolved source
#[derive(Debug, Clone)]
pub struct ExecInput {
    pub name: String,
    pub ty: SlotType,
    pub source: Option<InputSource>,
}

/// A node in the flattened graph
#[derive(Debug, Clone)]
pub struct ExecutableNode {
    pub id: ExecutionId,
    pub node_type: String,
    pub title: String,
    /// The visible graph node this was expanded out of, when it came from a
    /// group instance; progress for this node reports against it
    pub group_root: Option<NodeId>,
    pub widgets: Vec<Widget>,
    pub inputs: Vec<ExecInput>,
}

impl ExecutableNode {
    /// What feeds input `slot`, across any group nesting
    pub fn resolve_input(&self, slot: usize) -> Option<&InputSource> {
        self.inputs.get(slot).and_then(|i| i.source.as_ref())
    }
}

/// The flat, ordered result of expanding a graph
#[derive(Debug, Default)]
pub struct FlattenedGraph {
    nodes: Vec<ExecutableNode>,
    by_id: HashMap<ExecutionId, usize>,
}

impl FlattenedGraph {
    pub fn nodes(&self) -> &[ExecutableNode] {
        &self.nodes
    }

    pub fn get(&self, id: &str) -> Option<&ExecutableNode> {
        self.by_id.get(id).map(|i| &self.nodes[*i])
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn push(&mut self, node: ExecutableNode) {
        self.by_id.insert(node.id.clone(), self.nodes.len());
        self.nodes.push(node);
    }
}

/// Expand `graph` into executable descriptors, in execution order.
///
/// Errors with [`GraphError::RecursiveGroup`] when a group definition
/// contains itself at any depth, and [`GraphError::CircularResolution`] when
/// input resolution re-enters the same output.
pub fn flatten(graph: &Graph, registry: &NodeRegistry) -> Result<FlattenedGraph> {
    let mut flattener = Flattener {
        graph,
        registry,
        out: FlattenedGraph::default(),
    };
    flattener.expand_root()?;
    Ok(flattener.out)
}

/// Identifies a node within a scope
#[derive(Debug, Clone, Copy)]
enum NodeRef {
    /// A node of the real graph (root scope)
    Graph(NodeId),
    /// An inner node of the enclosing group definition, by index
    Inner(usize),
}

/// Resolution context: the chain of group expansions above the current node
enum Scope<'a> {
    Root,
    Group {
        parent: &'a Scope<'a>,
        config: &'a GroupNodeConfig,
        /// Execution id of the group instance
        path: &'a str,
        /// The instance's position in the parent scope
        instance: NodeRef,
        /// Widget state per inner node, outer overrides applied
        widgets: &'a [Vec<Widget>],
    },
}

struct Flattener<'a> {
    graph: &'a Graph,
    registry: &'a NodeRegistry,
    out: FlattenedGraph,
}

impl<'a> Flattener<'a> {
    fn expand_root(&mut self) -> Result<()> {
        for node_id in self.graph.compute_execution_order() {
            let Some(node) = self.graph.node(node_id) else {
                continue;
            };
            let group = self
                .registry
                .get(&node.node_type)
                .and_then(|d| d.group.as_deref());
            if let Some(config) = group {
                let mut stack = vec![config.definition.name.clone()];
                self.expand_group(
                    node_id.to_string(),
                    node_id,
                    config,
                    &Scope::Root,
                    NodeRef::Graph(node_id),
                    &mut stack,
                )?;
                continue;
            }
            if node.role != NodeRole::Standard {
                continue;
            }
            let mut inputs = Vec::with_capacity(node.inputs.len());
            for (slot, input) in node.inputs.iter().enumerate() {
                let mut visited = HashSet::new();
                let source =
                    self.resolve_input(&Scope::Root, NodeRef::Graph(node_id), slot, &mut visited)?;
                inputs.push(ExecInput {
                    name: input.name.clone(),
                    ty: input.ty.clone(),
                    source,
                });
            }
            self.out.push(ExecutableNode {
                id: node_id.to_string(),
                node_type: node.node_type.clone(),
                title: node.title.clone(),
                group_root: None,
                widgets: node.widgets.clone(),
                inputs,
            });
        }
        Ok(())
    }

    fn expand_group(
        &mut self,
        path: String,
        group_root: NodeId,
        config: &GroupNodeConfig,
        parent: &Scope<'_>,
        instance: NodeRef,
        stack: &mut Vec<String>,
    ) -> Result<()> {
        let materialized = self.materialize_widgets(config, parent, instance);
        let scope = Scope::Group {
            parent,
            config,
            path: &path,
            instance,
            widgets: &materialized,
        };

        for state in &config.definition.nodes {
            let i = state.index;
            let nested = self
                .registry
                .get(&state.node_type)
                .and_then(|d| d.group.as_deref());
            if let Some(nested) = nested {
                let name = nested.definition.name.clone();
                if stack.contains(&name) {
                    return Err(GraphError::RecursiveGroup(name));
                }
                stack.push(name);
                self.expand_group(
                    scoped_id(&path, i),
                    group_root,
                    nested,
                    &scope,
                    NodeRef::Inner(i),
                    stack,
                )?;
                stack.pop();
                continue;
            }
            if state.role != NodeRole::Standard {
                continue;
            }
            let mut inputs = Vec::with_capacity(state.inputs.len());
            for (slot, input) in state.inputs.iter().enumerate() {
                let mut visited = HashSet::new();
                let source = self.resolve_input(&scope, NodeRef::Inner(i), slot, &mut visited)?;
                inputs.push(ExecInput {
                    name: input.name.clone(),
                    ty: input.ty.clone(),
                    source,
                });
            }
            self.out.push(ExecutableNode {
                id: scoped_id(&path, i),
                node_type: state.node_type.clone(),
                title: state.title.clone(),
                group_root: Some(group_root),
                widgets: materialized.get(i).cloned().unwrap_or_default(),
                inputs,
            });
        }
        Ok(())
    }

    /// Inner widget state with the outer instance's values written through
    /// the widget map
    fn materialize_widgets(
        &self,
        config: &GroupNodeConfig,
        parent: &Scope<'_>,
        instance: NodeRef,
    ) -> Vec<Vec<Widget>> {
        let mut widgets: Vec<Vec<Widget>> = config
            .definition
            .nodes
            .iter()
            .map(|n| n.widgets.clone())
            .collect();
        for (new_name, (index, old_name)) in &config.new_to_old_widget {
            let Some(outer) = self.widget_in_scope(parent, instance, new_name) else {
                continue;
            };
            let Some(inner) = widgets.get_mut(*index) else {
                continue;
            };
            match inner.iter_mut().find(|w| &w.name == old_name) {
                Some(w) => w.value = outer.value,
                None => inner.push(Widget::new(old_name.clone(), outer.kind, outer.value)),
            }
        }
        widgets
    }

    fn widget_in_scope(
        &self,
        scope: &Scope<'_>,
        node: NodeRef,
        name: &str,
    ) -> Option<Widget> {
        match (scope, node) {
            (Scope::Root, NodeRef::Graph(id)) => {
                self.graph.node(id)?.widget(name).cloned()
            }
            (Scope::Group { widgets, .. }, NodeRef::Inner(i)) => {
                widgets.get(i)?.iter().find(|w| w.name == name).cloned()
            }
            _ => None,
        }
    }

    /// True when `name` is a group definition already open somewhere up the
    /// scope chain. Descending into it again can only mean the definition
    /// contains itself.
    fn scope_contains(mut scope: &Scope<'_>, name: &str) -> bool {
        while let Scope::Group { parent, config, .. } = scope {
            if config.definition.name == name {
                return true;
            }
            scope = *parent;
        }
        false
    }

    fn exec_id(scope: &Scope<'_>, node: NodeRef) -> ExecutionId {
        match (scope, node) {
            (_, NodeRef::Graph(id)) => id.to_string(),
            (Scope::Group { path, .. }, NodeRef::Inner(i)) => scoped_id(path, i),
            (Scope::Root, NodeRef::Inner(i)) => i.to_string(),
        }
    }

    /// What feeds input `slot` of `node` in `scope`
    fn resolve_input(
        &self,
        scope: &Scope<'_>,
        node: NodeRef,
        slot: usize,
        visited: &mut HashSet<String>,
    ) -> Result<Option<InputSource>> {
        match (scope, node) {
            (Scope::Root, NodeRef::Graph(id)) => {
                let Some(graph_node) = self.graph.node(id) else {
                    return Ok(None);
                };
                let Some(input) = graph_node.inputs.get(slot) else {
                    return Ok(None);
                };
                if let Some(link) = input.link.and_then(|l| self.graph.link(l)) {
                    if let Some(origin) = link.origin_id {
                        return self.resolve_output(
                            scope,
                            NodeRef::Graph(origin),
                            link.origin_slot,
                            visited,
                        );
                    }
                }
                Ok(input
                    .widget
                    .as_ref()
                    .and_then(|w| graph_node.widget(w))
                    .map(|w| InputSource::Value(w.value.clone())))
            }
            (
                Scope::Group {
                    parent,
                    config,
                    instance,
                    widgets,
                    ..
                },
                NodeRef::Inner(i),
            ) => {
                // externally surfaced: follow the outer instance's real link
                if let Some(agg) = config.old_to_new_input.get(&(i, slot)) {
                    return self.resolve_input(parent, *instance, *agg, visited);
                }
                // satisfied by an internal link
                if let Some(link) = config.links_to.get(&(i, slot)) {
                    return self.resolve_output(
                        scope,
                        NodeRef::Inner(link.origin),
                        link.origin_slot,
                        visited,
                    );
                }
                // widget-backed, with outer values already materialized
                let value = config
                    .definition
                    .nodes
                    .get(i)
                    .and_then(|n| n.inputs.get(slot))
                    .and_then(|s| s.widget.as_ref())
                    .and_then(|name| {
                        widgets
                            .get(i)?
                            .iter()
                            .find(|w| &w.name == name)
                            .map(|w| InputSource::Value(w.value.clone()))
                    });
                Ok(value)
            }
            _ => Ok(None),
        }
    }

    /// What output `slot` of `node` ultimately produces: a concrete
    /// executable output, an applied value, or nothing
    fn resolve_output(
        &self,
        scope: &Scope<'_>,
        node: NodeRef,
        slot: usize,
        visited: &mut HashSet<String>,
    ) -> Result<Option<InputSource>> {
        let key = format!("{}#{slot}", Self::exec_id(scope, node));
        if !visited.insert(key.clone()) {
            return Err(GraphError::CircularResolution(key));
        }

        let (role, type_name) = match (scope, node) {
            (_, NodeRef::Graph(id)) => {
                let Some(n) = self.graph.node(id) else {
                    return Ok(None);
                };
                (n.role, n.node_type.clone())
            }
            (Scope::Group { config, .. }, NodeRef::Inner(i)) => {
                let Some(state) = config.definition.nodes.get(i) else {
                    return Ok(None);
                };
                (state.role, state.node_type.clone())
            }
            (Scope::Root, NodeRef::Inner(_)) => return Ok(None),
        };

        // group instance: chase the aggregate output into the inner graph
        if let Some(nested) = self.registry.get(&type_name).and_then(|d| d.group.as_deref()) {
            let name = &nested.definition.name;
            if Self::scope_contains(scope, name) {
                return Err(GraphError::RecursiveGroup(name.clone()));
            }
            let Some((inner, inner_slot)) = nested.new_to_old_output.get(slot).copied() else {
                return Ok(None);
            };
            let path = Self::exec_id(scope, node);
            let materialized = self.materialize_widgets(nested, scope, node);
            let child = Scope::Group {
                parent: scope,
                config: nested,
                path: &path,
                instance: node,
                widgets: &materialized,
            };
            return self.resolve_output(&child, NodeRef::Inner(inner), inner_slot, visited);
        }

        match role {
            NodeRole::Standard => Ok(Some(InputSource::Node {
                id: Self::exec_id(scope, node),
                slot,
            })),
            NodeRole::PassThrough => self.resolve_input(scope, node, 0, visited),
            NodeRole::Value => {
                let value = match (scope, node) {
                    (_, NodeRef::Graph(id)) => self
                        .graph
                        .node(id)
                        .and_then(|n| n.applied_value())
                        .cloned(),
                    (Scope::Group { widgets, .. }, NodeRef::Inner(i)) => {
                        widgets.get(i).and_then(|w| w.first()).map(|w| w.value.clone())
                    }
                    _ => None,
                };
                Ok(value.map(InputSource::Value))
            }
        }
    }
}
