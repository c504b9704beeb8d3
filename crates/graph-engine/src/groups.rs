//! Group nodes: collapse a selection into a reusable definition and
//! synthesize the aggregate node type it registers as

use crate::error::{GraphError, Result};
use crate::graph::Graph;
use crate::node::NodeRole;
use crate::registry::{InputDef, NodeDef, NodeRegistry, OutputDef, WidgetSpec};
use crate::slots::{InputSlot, OutputSlot, Widget};
use crate::types::{NodeId, SlotType};
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

/// Serialized state of one node inside a group definition.
///
/// Slots are kept for their names and types; link ids are meaningless
/// outside the source graph and are cleared on capture.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InnerNode {
    pub index: usize,
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
}

type GroupLinkTuple = (usize, usize, usize, usize, SlotType, SlotType);

/// A link between two inner nodes, by definition-local index.
///
/// Wire format: `[originIndex, originSlot, targetIndex, targetSlot, type,
/// resolvedType]` where the resolved type is the concrete type the origin
/// output carried when the group was built (wildcards captured resolved).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "GroupLinkTuple", into = "GroupLinkTuple")]
pub struct GroupLink {
    pub origin: usize,
    pub origin_slot: usize,
    pub target: usize,
    pub target_slot: usize,
    pub ty: SlotType,
    pub resolved_ty: SlotType,
}

impl From<GroupLinkTuple> for GroupLink {
    fn from(t: GroupLinkTuple) -> Self {
        Self {
            origin: t.0,
            origin_slot: t.1,
            target: t.2,
            target_slot: t.3,
            ty: t.4,
            resolved_ty: t.5,
        }
    }
}

impl From<GroupLink> for GroupLinkTuple {
    fn from(l: GroupLink) -> Self {
        (
            l.origin,
            l.origin_slot,
            l.target,
            l.target_slot,
            l.ty,
            l.resolved_ty,
        )
    }
}

type ExternalSlotTuple = (usize, usize, SlotType);

/// Marks an inner output that had consumers outside the selection when the
/// group was built. Wire format: `[nodeIndex, slot, type]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "ExternalSlotTuple", into = "ExternalSlotTuple")]
pub struct ExternalSlot {
    pub node_index: usize,
    pub slot: usize,
    pub ty: SlotType,
}

impl From<ExternalSlotTuple> for ExternalSlot {
    fn from(t: ExternalSlotTuple) -> Self {
        Self {
            node_index: t.0,
            slot: t.1,
            ty: t.2,
        }
    }
}

impl From<ExternalSlot> for ExternalSlotTuple {
    fn from(e: ExternalSlot) -> Self {
        (e.node_index, e.slot, e.ty)
    }
}

/// Per-inner-node presentation overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeOverrides {
    /// Input renames keyed by original input name
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub inputs: HashMap<String, SlotOverride>,
    /// Output overrides keyed by slot index
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub outputs: HashMap<usize, SlotOverride>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Force an internally-consumed output onto (or off) the surface
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visible: Option<bool>,
}

/// A reusable group captured from a selection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupDefinition {
    pub name: String,
    pub id: String,
    pub nodes: Vec<InnerNode>,
    #[serde(default)]
    pub links: Vec<GroupLink>,
    #[serde(default)]
    pub external: Vec<ExternalSlot>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub config: HashMap<usize, NodeOverrides>,
}

/// Capture a selection of nodes as a group definition.
///
/// Nodes are ordered by the graph's execution order so widget order stays
/// stable when the definition is re-registered. Links fully inside the
/// selection are recorded by local index with the origin output's resolved
/// type; outputs with consumers outside the selection get external markers
/// (a wildcard output takes its first link's type).
pub fn build_group(graph: &Graph, selection: &[NodeId], name: impl Into<String>) -> Result<GroupDefinition> {
    let selected: HashSet<NodeId> = selection.iter().copied().collect();
    if selected.is_empty() {
        return Err(GraphError::resolution("cannot build a group from an empty selection"));
    }
    for id in &selected {
        if graph.node(*id).is_none() {
            return Err(GraphError::NodeNotFound(*id));
        }
    }

    let ordered: Vec<NodeId> = graph
        .compute_execution_order()
        .into_iter()
        .filter(|id| selected.contains(id))
        .collect();
    let index_of: HashMap<NodeId, usize> = ordered
        .iter()
        .enumerate()
        .map(|(i, id)| (*id, i))
        .collect();

    let mut nodes = Vec::with_capacity(ordered.len());
    for (index, id) in ordered.iter().enumerate() {
        let node = graph.node(*id).ok_or(GraphError::NodeNotFound(*id))?;
        let mut inputs = node.inputs.clone();
        for slot in &mut inputs {
            slot.link = None;
            slot.floating_links.clear();
        }
        let mut outputs = node.outputs.clone();
        for slot in &mut outputs {
            slot.links.clear();
            slot.floating_links.clear();
        }
        nodes.push(InnerNode {
            index,
            node_type: node.node_type.clone(),
            title: node.title.clone(),
            role: node.role,
            inputs,
            outputs,
            widgets: node.widgets.clone(),
        });
    }

    let mut links = Vec::new();
    let mut external = Vec::new();
    let mut marked: HashSet<(usize, usize)> = HashSet::new();
    for link in graph.links() {
        let (Some(origin), Some(target)) = (link.origin_id, link.target_id) else {
            continue;
        };
        match (index_of.get(&origin), index_of.get(&target)) {
            (Some(&o), Some(&t)) => {
                let resolved = graph
                    .node(origin)
                    .and_then(|n| n.outputs.get(link.origin_slot))
                    .map(|s| s.ty.clone())
                    .unwrap_or_else(SlotType::any);
                links.push(GroupLink {
                    origin: o,
                    origin_slot: link.origin_slot,
                    target: t,
                    target_slot: link.target_slot,
                    ty: link.ty.clone(),
                    resolved_ty: resolved,
                });
            }
            (Some(&o), None) => {
                if marked.insert((o, link.origin_slot)) {
                    let slot_ty = graph
                        .node(origin)
                        .and_then(|n| n.outputs.get(link.origin_slot))
                        .map(|s| s.ty.clone())
                        .unwrap_or_else(SlotType::any);
                    let ty = if slot_ty.is_wildcard() {
                        link.ty.clone()
                    } else {
                        slot_ty
                    };
                    external.push(ExternalSlot {
                        node_index: o,
                        slot: link.origin_slot,
                        ty,
                    });
                }
            }
            _ => {}
        }
    }
    // deterministic order regardless of link-map iteration
    links.sort_by_key(|l| (l.target, l.target_slot));
    external.sort_by_key(|e| (e.node_index, e.slot));

    Ok(GroupDefinition {
        name: name.into(),
        id: format!("group-{}", Uuid::new_v4()),
        nodes,
        links,
        external,
        config: HashMap::new(),
    })
}

/// Everything needed to treat a group definition as a node type: the
/// synthesized aggregate surface plus the index maps flattening uses to
/// translate between the outer node and its inner nodes.
#[derive(Debug, Clone)]
pub struct GroupNodeConfig {
    pub definition: GroupDefinition,
    pub type_name: String,
    /// (target index, target slot) -> internal link feeding it
    pub links_to: HashMap<(usize, usize), GroupLink>,
    /// (origin index, origin slot) -> internal links leaving it
    pub links_from: HashMap<(usize, usize), Vec<GroupLink>>,
    /// (node index, output slot) -> type recorded for external consumers
    pub external_from: HashMap<(usize, usize), SlotType>,
    /// (node index, input slot) -> aggregate input index
    pub old_to_new_input: HashMap<(usize, usize), usize>,
    /// (node index, output slot) -> aggregate output index
    pub old_to_new_output: HashMap<(usize, usize), usize>,
    /// aggregate output index -> (node index, output slot)
    pub new_to_old_output: Vec<(usize, usize)>,
    /// aggregate widget name -> (node index, inner widget name)
    pub new_to_old_widget: HashMap<String, (usize, String)>,
    /// Resolved concrete types for value and pass-through inner nodes
    pub resolved_types: HashMap<usize, SlotType>,
    pub aggregate_inputs: Vec<InputDef>,
    pub aggregate_outputs: Vec<OutputDef>,
}

impl GroupNodeConfig {
    /// Derive the aggregate surface and index maps from a definition
    pub fn build(definition: GroupDefinition, registry: &NodeRegistry) -> Result<Self> {
        let mut links_to = HashMap::new();
        let mut links_from: HashMap<(usize, usize), Vec<GroupLink>> = HashMap::new();
        for link in &definition.links {
            links_to.insert((link.target, link.target_slot), link.clone());
            links_from
                .entry((link.origin, link.origin_slot))
                .or_default()
                .push(link.clone());
        }
        let external_from: HashMap<(usize, usize), SlotType> = definition
            .external
            .iter()
            .map(|e| ((e.node_index, e.slot), e.ty.clone()))
            .collect();

        let mut config = Self {
            type_name: format!("group/{}", definition.name),
            definition,
            links_to,
            links_from,
            external_from,
            old_to_new_input: HashMap::new(),
            old_to_new_output: HashMap::new(),
            new_to_old_output: Vec::new(),
            new_to_old_widget: HashMap::new(),
            resolved_types: HashMap::new(),
            aggregate_inputs: Vec::new(),
            aggregate_outputs: Vec::new(),
        };
        config.derive_surface(registry)?;
        Ok(config)
    }

    fn derive_surface(&mut self, registry: &NodeRegistry) -> Result<()> {
        let mut seen_inputs: HashSet<String> = HashSet::new();
        let mut seen_outputs: HashSet<String> = HashSet::new();

        let nodes = self.definition.nodes.clone();
        for node in &nodes {
            let i = node.index;
            let prefix = if node.title.is_empty() {
                node.node_type.clone()
            } else {
                node.title.clone()
            };
            let overrides = self.definition.config.get(&i).cloned().unwrap_or_default();

            match node.role {
                NodeRole::Value => {
                    self.surface_value_node(node, &prefix, registry, &mut seen_inputs)?;
                }
                NodeRole::PassThrough => {
                    self.surface_pass_through(node, &prefix, &mut seen_inputs);
                }
                NodeRole::Standard => {
                    let def = registry.get(&node.node_type).cloned();
                    for (slot, input) in node.inputs.iter().enumerate() {
                        // internally satisfied inputs stay off the surface
                        if self.links_to.contains_key(&(i, slot)) {
                            continue;
                        }
                        let base = overrides
                            .inputs
                            .get(&input.name)
                            .and_then(|o| o.name.clone())
                            .unwrap_or_else(|| input.name.clone());
                        let name = unique_name(&mut seen_inputs, &base, &prefix);
                        let widget = def.as_ref().and_then(|d| {
                            d.inputs
                                .iter()
                                .find(|inp| inp.name == input.name)
                                .and_then(|inp| inp.widget.clone())
                        });
                        let required = def
                            .as_ref()
                            .and_then(|d| d.inputs.iter().find(|inp| inp.name == input.name))
                            .map(|inp| inp.required)
                            .unwrap_or(true);
                        if let Some(inner_widget) = &input.widget {
                            self.new_to_old_widget
                                .insert(name.clone(), (i, inner_widget.clone()));
                        }
                        self.old_to_new_input
                            .insert((i, slot), self.aggregate_inputs.len());
                        self.aggregate_inputs.push(InputDef {
                            name,
                            ty: input.ty.clone(),
                            required,
                            widget,
                        });
                    }
                }
            }

            for (slot, output) in node.outputs.iter().enumerate() {
                let internally_consumed = self.links_from.contains_key(&(i, slot));
                let externally_consumed = self.external_from.contains_key(&(i, slot));
                let visible = overrides
                    .outputs
                    .get(&slot)
                    .and_then(|o| o.visible)
                    .unwrap_or(!internally_consumed || externally_consumed);
                if !visible || node.role == NodeRole::Value {
                    continue;
                }
                let base = overrides
                    .outputs
                    .get(&slot)
                    .and_then(|o| o.name.clone())
                    .unwrap_or_else(|| {
                        if output.name.is_empty() {
                            output.ty.to_string()
                        } else {
                            output.name.clone()
                        }
                    });
                let name = unique_name(&mut seen_outputs, &base, &prefix);
                let ty = if output.ty.is_wildcard() {
                    self.external_from
                        .get(&(i, slot))
                        .cloned()
                        .or_else(|| self.resolved_types.get(&i).cloned())
                        .unwrap_or_else(|| output.ty.clone())
                } else {
                    output.ty.clone()
                };
                self.old_to_new_output
                    .insert((i, slot), self.aggregate_outputs.len());
                self.new_to_old_output.push((i, slot));
                self.aggregate_outputs.push(OutputDef { name, ty });
            }
        }
        Ok(())
    }

    /// A value node surfaces as a single widget input; its type comes from
    /// its first consumer, and combo consumers contribute their option list.
    fn surface_value_node(
        &mut self,
        node: &InnerNode,
        prefix: &str,
        registry: &NodeRegistry,
        seen_inputs: &mut HashSet<String>,
    ) -> Result<()> {
        let i = node.index;
        let Some(first) = self
            .links_from
            .get(&(i, 0))
            .and_then(|links| links.first())
            .cloned()
        else {
            // an unconnected value node contributes nothing
            return Ok(());
        };
        let ty = if first.ty.is_wildcard() {
            first.resolved_ty.clone()
        } else {
            first.ty.clone()
        };

        let consumer = self.definition.nodes.get(first.target);
        let consumer_input_name = consumer
            .and_then(|n| n.inputs.get(first.target_slot))
            .map(|s| s.name.clone());
        let combo = consumer.and_then(|n| {
            let def = registry.get(&n.node_type)?;
            let input_name = consumer_input_name.as_deref()?;
            def.inputs
                .iter()
                .find(|inp| inp.name == input_name)
                .and_then(|inp| inp.widget.as_ref())
                .filter(|w| w.kind == "combo")
                .cloned()
        });

        let inner_widget = node.widgets.first();
        let widget_name = inner_widget.map(|w| w.name.clone()).unwrap_or_else(|| "value".to_string());
        let spec = match combo {
            Some(mut spec) => {
                if let Some(w) = inner_widget {
                    spec.default = w.value.clone();
                }
                spec
            }
            None => WidgetSpec {
                kind: widget_kind_for(&ty),
                options: None,
                default: inner_widget.map(|w| w.value.clone()).unwrap_or_default(),
                force_input: false,
            },
        };

        let name = unique_name(seen_inputs, &widget_name, prefix);
        self.new_to_old_widget
            .insert(name.clone(), (i, widget_name));
        self.resolved_types.insert(i, ty.clone());
        self.aggregate_inputs.push(InputDef {
            name,
            ty,
            required: true,
            widget: Some(spec),
        });
        Ok(())
    }

    /// A pass-through node resolves its concrete type from, in order: its
    /// consumer's input type, the resolved type of its feed, any recorded
    /// outgoing link type, the external marker, and finally the wildcard
    /// (in which case its exposed input must be link-fed).
    fn surface_pass_through(
        &mut self,
        node: &InnerNode,
        prefix: &str,
        seen_inputs: &mut HashSet<String>,
    ) {
        let i = node.index;
        let from_consumer = self.links_from.get(&(i, 0)).and_then(|links| {
            links.first().and_then(|l| {
                self.definition
                    .nodes
                    .get(l.target)
                    .and_then(|n| n.inputs.get(l.target_slot))
                    .map(|s| s.ty.clone())
                    .filter(|t| !t.is_wildcard())
            })
        });
        let from_feed = self
            .links_to
            .get(&(i, 0))
            .map(|l| l.resolved_ty.clone())
            .filter(|t| !t.is_wildcard());
        let from_links = self
            .definition
            .links
            .iter()
            .find(|l| l.origin == i)
            .map(|l| l.ty.clone())
            .filter(|t| !t.is_wildcard());
        let from_external = self.external_from.get(&(i, 0)).cloned();

        let resolved = from_consumer
            .or(from_feed)
            .or(from_links)
            .or(from_external);
        let force_input = resolved.is_none();
        let ty = resolved.unwrap_or_else(SlotType::any);
        self.resolved_types.insert(i, ty.clone());

        // satisfied internally: nothing to surface
        if self.links_to.contains_key(&(i, 0)) {
            return;
        }
        if node.inputs.is_empty() {
            warn!("pass-through node {i} in group '{}' has no input", self.definition.name);
            return;
        }
        let base = if node.inputs[0].name.is_empty() {
            ty.to_string()
        } else {
            node.inputs[0].name.clone()
        };
        let name = unique_name(seen_inputs, &base, prefix);
        self.old_to_new_input
            .insert((i, 0), self.aggregate_inputs.len());
        self.aggregate_inputs.push(InputDef {
            name,
            ty,
            required: true,
            widget: force_input.then(|| WidgetSpec {
                kind: "link".to_string(),
                options: None,
                default: serde_json::Value::Null,
                force_input: true,
            }),
        });
    }

    /// Assemble the aggregate node definition. The config travels inside it
    /// so instances can be expanded back into their inner nodes.
    pub fn into_node_def(self) -> NodeDef {
        let mut def = NodeDef::new(self.type_name.clone()).with_title(self.definition.name.clone());
        def.inputs = self.aggregate_inputs.clone();
        def.outputs = self.aggregate_outputs.clone();
        def.group = Some(Arc::new(self));
        def
    }
}

/// Register a group definition as a node type, replacing any previous
/// registration under the same name
pub fn register_group(definition: GroupDefinition, registry: &mut NodeRegistry) -> Result<NodeDef> {
    let config = GroupNodeConfig::build(definition, registry)?;
    let def = config.into_node_def();
    registry.register(def.clone());
    Ok(def)
}

fn widget_kind_for(ty: &SlotType) -> String {
    match ty.as_str().to_ascii_uppercase().as_str() {
        "INT" | "FLOAT" | "NUMBER" => "number".to_string(),
        "BOOLEAN" | "BOOL" => "toggle".to_string(),
        _ => "text".to_string(),
    }
}

/// Disambiguate a surfaced slot name: bare name first, then title-prefixed,
/// then counted.
fn unique_name(seen: &mut HashSet<String>, base: &str, prefix: &str) -> String {
    if seen.insert(base.to_string()) {
        return base.to_string();
    }
    let prefixed = format!("{prefix} {base}");
    if seen.insert(prefixed.clone()) {
        return prefixed;
    }
    let mut n = 2;
    loop {
        let candidate = format!("{prefix} {n} {base}");
        if seen.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::NodeDef;
    use serde_json::json;

    fn test_registry() -> NodeRegistry {
        let mut reg = NodeRegistry::new();
        reg.register(
            NodeDef::new("Load")
                .input(InputDef::new("path", "STRING").with_widget(WidgetSpec {
                    kind: "text".into(),
                    options: None,
                    default: json!(""),
                    force_input: false,
                }))
                .output(OutputDef::new("image", "IMAGE")),
        );
        reg.register(
            NodeDef::new("Sharpen")
                .input(InputDef::new("image", "IMAGE"))
                .input(InputDef::new("amount", "FLOAT").with_widget(WidgetSpec {
                    kind: "number".into(),
                    options: None,
                    default: json!(1.0),
                    force_input: false,
                }))
                .output(OutputDef::new("image", "IMAGE")),
        );
        reg.register(
            NodeDef::new("Save").input(InputDef::new("image", "IMAGE")),
        );
        reg
    }

    fn pipeline_graph(reg: &NodeRegistry) -> (Graph, NodeId, NodeId, NodeId) {
        let mut g = Graph::new();
        let load = g.create_node(reg, "Load").unwrap();
        let sharpen = g.create_node(reg, "Sharpen").unwrap();
        let save = g.create_node(reg, "Save").unwrap();
        g.connect(load, 0, sharpen, 0, None).unwrap();
        g.connect(sharpen, 0, save, 0, None).unwrap();
        (g, load, sharpen, save)
    }

    #[test]
    fn test_build_group_captures_internal_links() {
        let reg = test_registry();
        let (g, load, sharpen, _save) = pipeline_graph(&reg);

        let def = build_group(&g, &[load, sharpen], "Loader").unwrap();
        assert_eq!(def.nodes.len(), 2);
        assert_eq!(def.nodes[0].node_type, "Load");
        assert_eq!(def.nodes[1].node_type, "Sharpen");
        assert_eq!(def.links.len(), 1);
        assert_eq!(
            def.links[0],
            GroupLink {
                origin: 0,
                origin_slot: 0,
                target: 1,
                target_slot: 0,
                ty: SlotType::new("IMAGE"),
                resolved_ty: SlotType::new("IMAGE"),
            }
        );
        // Sharpen's output feeds Save, outside the selection
        assert_eq!(def.external.len(), 1);
        assert_eq!(def.external[0].node_index, 1);
        assert_eq!(def.external[0].ty, SlotType::new("IMAGE"));
    }

    #[test]
    fn test_group_link_tuple_serde() {
        let link = GroupLink {
            origin: 0,
            origin_slot: 1,
            target: 2,
            target_slot: 0,
            ty: SlotType::new("*"),
            resolved_ty: SlotType::new("IMAGE"),
        };
        let json = serde_json::to_string(&link).unwrap();
        assert_eq!(json, r#"[0,1,2,0,"*","IMAGE"]"#);
        let back: GroupLink = serde_json::from_str(&json).unwrap();
        assert_eq!(back, link);
    }

    #[test]
    fn test_register_exposes_single_output() {
        let reg_src = test_registry();
        let (g, load, sharpen, _save) = pipeline_graph(&reg_src);
        let def = build_group(&g, &[load, sharpen], "Loader").unwrap();

        let mut reg = test_registry();
        let node_def = register_group(def, &mut reg).unwrap();
        assert_eq!(node_def.type_name, "group/Loader");

        // Load's output is consumed internally and stays hidden; only
        // Sharpen's externally-consumed output surfaces.
        assert_eq!(node_def.outputs.len(), 1);
        assert_eq!(node_def.outputs[0].ty, SlotType::new("IMAGE"));

        // Linked inputs drop off the surface: path widget + amount widget
        // remain, Sharpen's image input is internal.
        let names: Vec<&str> = node_def.inputs.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["path", "amount"]);

        let config = node_def.group.as_ref().unwrap();
        assert_eq!(config.new_to_old_output, vec![(1, 0)]);
        assert_eq!(config.new_to_old_widget["path"], (0, "path".to_string()));
        assert_eq!(config.new_to_old_widget["amount"], (1, "amount".to_string()));
    }

    #[test]
    fn test_name_collisions_take_title_prefix() {
        let mut reg = NodeRegistry::new();
        reg.register(
            NodeDef::new("Scale")
                .input(InputDef::new("image", "IMAGE"))
                .output(OutputDef::new("image", "IMAGE")),
        );
        let mut g = Graph::new();
        let a = g.create_node(&reg, "Scale").unwrap();
        let b = g.create_node(&reg, "Scale").unwrap();
        // not linked to each other: both inputs surface
        let def = build_group(&g, &[a, b], "TwoScales").unwrap();
        let node_def = register_group(def, &mut reg).unwrap();

        let names: Vec<&str> = node_def.inputs.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["image", "Scale image"]);
        let out_names: Vec<&str> = node_def.outputs.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(out_names, vec!["image", "Scale image"]);
    }

    #[test]
    fn test_value_node_infers_type_from_consumer() {
        let mut reg = NodeRegistry::new();
        reg.register(
            NodeDef::new("Resize")
                .input(InputDef::new("mode", "STRING").with_widget(WidgetSpec::combo(vec![
                    json!("stretch"),
                    json!("crop"),
                ])))
                .output(OutputDef::new("image", "IMAGE")),
        );
        let mut value_def = NodeDef::new("Constant").with_role(NodeRole::Value);
        value_def.outputs.push(OutputDef::new("", "*"));
        reg.register(value_def);

        let mut g = Graph::new();
        let constant = g.create_node(&reg, "Constant").unwrap();
        g.node_mut(constant)
            .unwrap()
            .widgets
            .push(Widget::new("value", "text", json!("crop")));
        let resize = g.create_node(&reg, "Resize").unwrap();
        // combo-backed input accepts the link after conversion
        g.node_mut(resize).unwrap().inputs[0].widget = None;
        g.connect(constant, 0, resize, 0, None).unwrap();

        let def = build_group(&g, &[constant, resize], "Preset").unwrap();
        let node_def = register_group(def, &mut reg).unwrap();

        // the value node surfaces as a combo widget pulled from Resize's def
        let value_input = node_def.inputs.iter().find(|i| i.name == "value").unwrap();
        let spec = value_input.widget.as_ref().unwrap();
        assert_eq!(spec.kind, "combo");
        assert_eq!(
            spec.options.as_ref().unwrap(),
            &vec![json!("stretch"), json!("crop")]
        );
        assert_eq!(spec.default, json!("crop"));
    }

    #[test]
    fn test_pass_through_resolution_in_group() {
        let mut reg = NodeRegistry::new();
        reg.register(
            NodeDef::new("Save").input(InputDef::new("image", "IMAGE")),
        );
        let mut relay = NodeDef::new("Relay").with_role(NodeRole::PassThrough);
        relay.inputs.push(InputDef::new("", "*"));
        relay.outputs.push(OutputDef::new("", "*"));
        reg.register(relay);

        let mut g = Graph::new();
        let relay = g.create_node(&reg, "Relay").unwrap();
        let save = g.create_node(&reg, "Save").unwrap();
        g.connect(relay, 0, save, 0, None).unwrap();

        let def = build_group(&g, &[relay, save], "Relayed").unwrap();
        let node_def = register_group(def, &mut reg).unwrap();

        // the relay's dangling input surfaces with the consumer's type
        assert_eq!(node_def.inputs.len(), 1);
        assert_eq!(node_def.inputs[0].ty, SlotType::new("IMAGE"));
        assert!(node_def.outputs.is_empty());
    }

    #[test]
    fn test_visibility_override_surfaces_internal_output() {
        let reg_src = test_registry();
        let (g, load, sharpen, _save) = pipeline_graph(&reg_src);
        let mut def = build_group(&g, &[load, sharpen], "Loader").unwrap();
        def.config.insert(
            0,
            NodeOverrides {
                inputs: HashMap::new(),
                outputs: HashMap::from([(
                    0,
                    SlotOverride {
                        name: None,
                        visible: Some(true),
                    },
                )]),
            },
        );

        let mut reg = test_registry();
        let node_def = register_group(def, &mut reg).unwrap();
        assert_eq!(node_def.outputs.len(), 2);
    }

    #[test]
    fn test_reregistration_replaces_definition() {
        let reg_src = test_registry();
        let (g, load, sharpen, _save) = pipeline_graph(&reg_src);
        let def = build_group(&g, &[load, sharpen], "Loader").unwrap();

        let mut reg = test_registry();
        register_group(def.clone(), &mut reg).unwrap();
        let before = reg.len();
        let mut def2 = def;
        def2.nodes.truncate(1);
        def2.links.clear();
        def2.external.clear();
        register_group(def2, &mut reg).unwrap();
        assert_eq!(reg.len(), before);
        let replaced = reg.get("group/Loader").unwrap();
        assert_eq!(replaced.group.as_ref().unwrap().definition.nodes.len(), 1);
    }
}
