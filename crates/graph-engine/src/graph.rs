//! The graph: node/link/reroute arenas and the connection mutator

use crate::error::{GraphError, Result};
use crate::link::{FloatingSide, Link};
use crate::node::{ConnectionSide, Node, NodeBehavior, NodeRole};
use crate::registry::{NodeDefPatch, NodeRegistry};
use crate::reroute::{self, Reroute};
use crate::slots::{InputSlot, OutputSlot, Widget};
use crate::types::{LinkId, NodeId, RerouteId, SlotRef};
use crate::typing;
use log::{debug, warn};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

/// Where to insert a new reroute on an existing path
#[derive(Debug, Clone, Copy)]
pub enum InsertPoint {
    /// Between the named reroute and its parent
    BeforeReroute(RerouteId),
    /// Between the link's last reroute (if any) and its target
    AtLinkEnd(LinkId),
}

/// A node graph.
///
/// Owns the arenas for nodes, links, floating links, and reroutes, and is
/// the only place connections are mutated. Link and reroute ids are
/// allocated monotonically and never reused.
#[derive(Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Graph {
    nodes: BTreeMap<NodeId, Node>,
    links: HashMap<LinkId, Link>,
    floating_links: HashMap<LinkId, Link>,
    reroutes: BTreeMap<RerouteId, Reroute>,
    last_node_id: NodeId,
    last_link_id: LinkId,
    last_reroute_id: RerouteId,
    /// Bumped on every structural change
    version: u64,
    #[serde(skip)]
    configuring: bool,
    #[serde(skip)]
    propagating: bool,
    #[serde(skip)]
    behaviors: HashMap<String, Arc<dyn NodeBehavior>>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    // --- accessors ---

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn link(&self, id: LinkId) -> Option<&Link> {
        self.links.get(&id)
    }

    pub fn links(&self) -> impl Iterator<Item = &Link> {
        self.links.values()
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    pub fn floating_link(&self, id: LinkId) -> Option<&Link> {
        self.floating_links.get(&id)
    }

    pub fn floating_links(&self) -> impl Iterator<Item = &Link> {
        self.floating_links.values()
    }

    pub fn reroute(&self, id: RerouteId) -> Option<&Reroute> {
        self.reroutes.get(&id)
    }

    pub fn reroute_mut(&mut self, id: RerouteId) -> Option<&mut Reroute> {
        self.reroutes.get_mut(&id)
    }

    pub fn reroutes(&self) -> impl Iterator<Item = &Reroute> {
        self.reroutes.values()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    fn touch(&mut self) {
        self.version += 1;
    }

    // --- configuration window ---

    pub fn is_configuring(&self) -> bool {
        self.configuring
    }

    /// Suspend type propagation while a serialized graph is being restored
    pub fn begin_configure(&mut self) {
        self.configuring = true;
    }

    /// End the configuration window: prune reroute link ids that no longer
    /// resolve, drop reroutes left with no links at all, then run one
    /// consolidation pass of type propagation over every pass-through node
    pub fn end_configure(&mut self) {
        self.configuring = false;
        let mut emptied: Vec<RerouteId> = Vec::new();
        for r in self.reroutes.values_mut() {
            let before = r.total_links();
            let alive = r.validate_links(&self.links, &self.floating_links);
            if r.total_links() != before {
                warn!("reroute {} referenced links that no longer exist; pruned", r.id);
            }
            if !alive {
                emptied.push(r.id);
            }
        }
        for id in emptied {
            let _ = self.remove_reroute(id);
        }
        let pass_through: Vec<NodeId> = self
            .nodes
            .values()
            .filter(|n| n.role == NodeRole::PassThrough)
            .map(|n| n.id)
            .collect();
        for id in pass_through {
            self.maybe_propagate(id);
        }
    }

    // --- behaviors ---

    /// Register connection hooks for a node type
    pub fn register_behavior(
        &mut self,
        type_name: impl Into<String>,
        behavior: Arc<dyn NodeBehavior>,
    ) {
        self.behaviors.insert(type_name.into(), behavior);
    }

    fn notify_change(
        &self,
        node_id: NodeId,
        side: ConnectionSide,
        slot: usize,
        connected: bool,
        link: Option<&Link>,
    ) {
        let Some(node) = self.nodes.get(&node_id) else {
            return;
        };
        if let Some(behavior) = self.behaviors.get(&node.node_type) {
            behavior.on_connections_change(node, side, slot, connected, link);
        }
    }

    fn maybe_propagate(&mut self, node_id: NodeId) {
        if self.propagating || self.configuring {
            return;
        }
        if self.nodes.get(&node_id).map(|n| n.role) != Some(NodeRole::PassThrough) {
            return;
        }
        self.propagating = true;
        typing::propagate_pass_through(self, node_id);
        self.propagating = false;
    }

    // --- nodes ---

    /// Add a node. A zero id is replaced with a fresh one; explicit ids bump
    /// the allocator past them.
    pub fn add_node(&mut self, mut node: Node) -> NodeId {
        if node.id == 0 {
            self.last_node_id += 1;
            node.id = self.last_node_id;
        } else {
            self.last_node_id = self.last_node_id.max(node.id);
        }
        let id = node.id;
        self.nodes.insert(id, node);
        self.touch();
        id
    }

    /// Instantiate a registered node type and add it
    pub fn create_node(&mut self, registry: &NodeRegistry, type_name: &str) -> Result<NodeId> {
        let node = registry.instantiate(self.last_node_id + 1, type_name)?;
        Ok(self.add_node(node))
    }

    /// Remove a node, severing every link and floating link touching it
    pub fn remove_node(&mut self, node_id: NodeId) -> Result<Node> {
        let (input_count, output_count) = {
            let node = self
                .nodes
                .get(&node_id)
                .ok_or(GraphError::NodeNotFound(node_id))?;
            (node.inputs.len(), node.outputs.len())
        };
        for slot in 0..input_count {
            self.disconnect_input(node_id, slot, true)?;
        }
        for slot in 0..output_count {
            self.disconnect_output(node_id, slot, true)?;
        }
        let stray: Vec<LinkId> = self
            .floating_links
            .values()
            .filter(|l| l.origin_id == Some(node_id) || l.target_id == Some(node_id))
            .map(|l| l.id)
            .collect();
        for id in stray {
            self.remove_floating_link(id)?;
        }
        let node = self
            .nodes
            .remove(&node_id)
            .ok_or(GraphError::NodeNotFound(node_id))?;
        self.touch();
        Ok(node)
    }

    // --- connection mutator ---

    /// Connect an output slot to an input slot.
    ///
    /// Unknown nodes and unresolvable slot references are errors. Rejected
    /// connections (loop-back, type mismatch, behavior veto) return
    /// `Ok(None)` and leave the graph untouched. On success the previous
    /// link into the input, if any, is severed with its reroutes kept, and
    /// the new link id is returned.
    pub fn connect(
        &mut self,
        origin: NodeId,
        output: impl Into<SlotRef>,
        target: NodeId,
        input: impl Into<SlotRef>,
        after_reroute: Option<RerouteId>,
    ) -> Result<Option<LinkId>> {
        let output = output.into();
        let input = input.into();

        let origin_node = self
            .nodes
            .get(&origin)
            .ok_or(GraphError::NodeNotFound(origin))?;
        let target_node = self
            .nodes
            .get(&target)
            .ok_or(GraphError::NodeNotFound(target))?;
        let oslot = origin_node
            .find_output_slot(&output)
            .ok_or_else(|| GraphError::SlotNotFound {
                node: origin,
                side: "output",
                slot: slot_label(&output),
            })?;
        let islot = target_node
            .find_input_slot(&input)
            .ok_or_else(|| GraphError::SlotNotFound {
                node: target,
                side: "input",
                slot: slot_label(&input),
            })?;

        if origin == target {
            debug!("rejecting loop-back connection on node {origin}");
            return Ok(None);
        }

        let out_ty = origin_node.outputs[oslot].ty.clone();
        let in_ty = target_node.inputs[islot].ty.clone();
        if !typing::is_valid_connection(&out_ty, &in_ty) {
            debug!("rejecting {out_ty} -> {in_ty} between nodes {origin} and {target}");
            return Ok(None);
        }

        if let Some(behavior) = self.behaviors.get(&target_node.node_type) {
            if !behavior.on_connect_input(target_node, islot, origin, &out_ty) {
                return Ok(None);
            }
        }
        if let Some(behavior) = self.behaviors.get(&origin_node.node_type) {
            if !behavior.on_connect_output(origin_node, oslot, target, &in_ty) {
                return Ok(None);
            }
        }

        // Inputs hold a single link; displace the previous one but keep its
        // reroutes alive as a floating path.
        let occupied = self
            .nodes
            .get(&target)
            .and_then(|n| n.inputs.get(islot))
            .is_some_and(|s| s.link.is_some());
        if occupied {
            self.disconnect_input(target, islot, true)?;
        }

        self.last_link_id += 1;
        let id = self.last_link_id;
        let ty = if in_ty.as_str().is_empty() {
            out_ty
        } else {
            in_ty
        };
        let link = Link::new(id, ty, origin, oslot, target, islot, after_reroute);

        if let Some(after) = after_reroute {
            if let Some(chain) = reroute::chain(&mut self.reroutes, after) {
                for rid in &chain {
                    if let Some(r) = self.reroutes.get_mut(rid) {
                        r.link_ids.insert(id);
                        r.floating = None;
                    }
                }
                // A full link now ends here; the floating terminus is moot.
                if let Some(last) = chain.last().copied() {
                    let stale: Vec<LinkId> = self
                        .floating_links
                        .values()
                        .filter(|l| l.parent_reroute == Some(last))
                        .map(|l| l.id)
                        .collect();
                    for fid in stale {
                        self.remove_floating_link(fid)?;
                    }
                }
            } else {
                warn!("link {id} attached below a cyclic reroute chain at {after}");
            }
        }

        if let Some(node) = self.nodes.get_mut(&origin) {
            node.outputs[oslot].links.push(id);
        }
        if let Some(node) = self.nodes.get_mut(&target) {
            node.inputs[islot].link = Some(id);
        }
        self.links.insert(id, link.clone());
        self.touch();

        self.notify_change(origin, ConnectionSide::Output, oslot, true, Some(&link));
        self.notify_change(target, ConnectionSide::Input, islot, true, Some(&link));

        self.maybe_propagate(target);
        self.maybe_propagate(origin);
        Ok(Some(id))
    }

    /// Sever the link into an input slot. With `keep_reroutes` the reroute
    /// path survives as a floating link anchored at the origin output.
    /// Returns false when the slot had no link.
    pub fn disconnect_input(
        &mut self,
        node_id: NodeId,
        slot: usize,
        keep_reroutes: bool,
    ) -> Result<bool> {
        let node = self
            .nodes
            .get(&node_id)
            .ok_or(GraphError::NodeNotFound(node_id))?;
        let input = node.inputs.get(slot).ok_or(GraphError::SlotNotFound {
            node: node_id,
            side: "input",
            slot: slot.to_string(),
        })?;

        let floating: Vec<LinkId> = input.floating_links.clone();
        for fid in floating {
            self.remove_floating_link(fid)?;
        }

        let link_id = self
            .nodes
            .get_mut(&node_id)
            .ok_or(GraphError::NodeNotFound(node_id))?
            .inputs[slot]
            .link
            .take();
        let Some(link_id) = link_id else {
            return Ok(false);
        };

        let keep = keep_reroutes.then_some(FloatingSide::Output);
        let link = self.unlink(link_id, keep)?;

        self.notify_change(node_id, ConnectionSide::Input, slot, false, Some(&link));
        if let Some(origin) = link.origin_id {
            self.notify_change(
                origin,
                ConnectionSide::Output,
                link.origin_slot,
                false,
                Some(&link),
            );
            self.maybe_propagate(origin);
        }
        self.maybe_propagate(node_id);
        Ok(true)
    }

    /// Sever every link leaving an output slot. With `keep_reroutes` each
    /// reroute path survives as a floating link anchored at its target
    /// input. Returns the number of links removed.
    pub fn disconnect_output(
        &mut self,
        node_id: NodeId,
        slot: usize,
        keep_reroutes: bool,
    ) -> Result<usize> {
        let node = self
            .nodes
            .get(&node_id)
            .ok_or(GraphError::NodeNotFound(node_id))?;
        let output = node.outputs.get(slot).ok_or(GraphError::SlotNotFound {
            node: node_id,
            side: "output",
            slot: slot.to_string(),
        })?;

        let floating: Vec<LinkId> = output.floating_links.clone();
        for fid in floating {
            self.remove_floating_link(fid)?;
        }

        let ids: Vec<LinkId> = self
            .nodes
            .get(&node_id)
            .and_then(|n| n.outputs.get(slot))
            .map(|o| o.links.clone())
            .unwrap_or_default();
        let keep = keep_reroutes.then_some(FloatingSide::Input);
        let mut severed = 0;
        for link_id in ids {
            let link = self.unlink(link_id, keep)?;
            severed += 1;
            self.notify_change(node_id, ConnectionSide::Output, slot, false, Some(&link));
            if let Some(target) = link.target_id {
                self.notify_change(
                    target,
                    ConnectionSide::Input,
                    link.target_slot,
                    false,
                    Some(&link),
                );
                self.maybe_propagate(target);
            }
        }
        self.maybe_propagate(node_id);
        Ok(severed)
    }

    /// Remove a link from the registry, detach it from both slots, and
    /// settle its reroute chain. With `keep` set, the path survives as a
    /// floating link when the anchor reroute would otherwise be orphaned.
    fn unlink(&mut self, link_id: LinkId, keep: Option<FloatingSide>) -> Result<Link> {
        let link = self
            .links
            .remove(&link_id)
            .ok_or(GraphError::LinkNotFound(link_id))?;

        if let Some(target) = link.target_id {
            if let Some(node) = self.nodes.get_mut(&target) {
                if let Some(input) = node.inputs.get_mut(link.target_slot) {
                    if input.link == Some(link_id) {
                        input.link = None;
                    }
                }
            }
        }
        if let Some(origin) = link.origin_id {
            if let Some(node) = self.nodes.get_mut(&origin) {
                if let Some(output) = node.outputs.get_mut(link.origin_slot) {
                    output.links.retain(|l| *l != link_id);
                }
            }
        }

        if let Some(parent) = link.parent_reroute {
            if let Some(chain) = reroute::chain(&mut self.reroutes, parent) {
                let anchor = match keep {
                    Some(FloatingSide::Output) => chain.last().copied(),
                    Some(FloatingSide::Input) => chain.first().copied(),
                    None => None,
                };
                let preserve = anchor
                    .and_then(|a| self.reroutes.get(&a))
                    .is_some_and(|r| {
                        r.link_ids.len() == 1
                            && r.link_ids.contains(&link_id)
                            && r.floating_link_ids.is_empty()
                    });
                if preserve {
                    // keep is Some here by construction of anchor
                    if let Some(side) = keep {
                        let mut floating = link.clone();
                        floating.to_floating(side, link.parent_reroute);
                        self.add_floating_link(floating)?;
                    }
                }
                let mut orphaned = Vec::new();
                for rid in &chain {
                    if let Some(r) = self.reroutes.get_mut(rid) {
                        r.link_ids.remove(&link_id);
                        if r.total_links() == 0 && keep.is_none() {
                            orphaned.push(*rid);
                        }
                    }
                }
                for rid in orphaned {
                    self.remove_reroute(rid)?;
                }
            }
        }
        self.touch();
        Ok(link)
    }

    // --- floating links ---

    /// Register a floating link. A zero id is replaced with a fresh one. The
    /// link id is added to every reroute on its path and the free-end
    /// reroute is marked floating.
    pub fn add_floating_link(&mut self, mut link: Link) -> Result<LinkId> {
        if link.id == 0 {
            self.last_link_id += 1;
            link.id = self.last_link_id;
        } else {
            self.last_link_id = self.last_link_id.max(link.id);
        }
        let id = link.id;
        let side = if link.has_origin() {
            FloatingSide::Output
        } else {
            FloatingSide::Input
        };

        if let Some(parent) = link.parent_reroute {
            if let Some(chain) = reroute::chain(&mut self.reroutes, parent) {
                for rid in &chain {
                    if let Some(r) = self.reroutes.get_mut(rid) {
                        r.floating_link_ids.insert(id);
                    }
                }
                let free_end = match side {
                    FloatingSide::Output => chain.last().copied(),
                    FloatingSide::Input => chain.first().copied(),
                };
                if let Some(r) = free_end.and_then(|rid| self.reroutes.get_mut(&rid)) {
                    r.floating = Some(side);
                }
            }
        }

        if let Some(origin) = link.origin_id {
            if let Some(output) = self
                .nodes
                .get_mut(&origin)
                .and_then(|n| n.outputs.get_mut(link.origin_slot))
            {
                output.floating_links.push(id);
            }
        }
        if let Some(target) = link.target_id {
            if let Some(input) = self
                .nodes
                .get_mut(&target)
                .and_then(|n| n.inputs.get_mut(link.target_slot))
            {
                input.floating_links.push(id);
            }
        }

        self.floating_links.insert(id, link);
        self.touch();
        Ok(id)
    }

    /// Remove a floating link, clearing slot caches and reroute membership.
    /// Reroutes left without any link are removed.
    pub fn remove_floating_link(&mut self, link_id: LinkId) -> Result<Link> {
        let link = self
            .floating_links
            .remove(&link_id)
            .ok_or(GraphError::LinkNotFound(link_id))?;

        if let Some(origin) = link.origin_id {
            if let Some(output) = self
                .nodes
                .get_mut(&origin)
                .and_then(|n| n.outputs.get_mut(link.origin_slot))
            {
                output.floating_links.retain(|l| *l != link_id);
            }
        }
        if let Some(target) = link.target_id {
            if let Some(input) = self
                .nodes
                .get_mut(&target)
                .and_then(|n| n.inputs.get_mut(link.target_slot))
            {
                input.floating_links.retain(|l| *l != link_id);
            }
        }

        let mut orphaned = Vec::new();
        for r in self.reroutes.values_mut() {
            if r.floating_link_ids.remove(&link_id) && r.floating_link_ids.is_empty() {
                r.floating = None;
            }
            if r.total_links() == 0 {
                orphaned.push(r.id);
            }
        }
        for rid in orphaned {
            self.remove_reroute(rid)?;
        }
        self.touch();
        Ok(link)
    }

    // --- reroutes ---

    /// Insert a reroute at `pos` on an existing path
    pub fn insert_reroute(&mut self, pos: [f64; 2], at: InsertPoint) -> Result<RerouteId> {
        self.last_reroute_id += 1;
        let id = self.last_reroute_id;
        let mut reroute = Reroute::new(id, pos);

        match at {
            InsertPoint::AtLinkEnd(link_id) => {
                let link = self
                    .links
                    .get_mut(&link_id)
                    .or_else(|| self.floating_links.get_mut(&link_id))
                    .ok_or(GraphError::LinkNotFound(link_id))?;
                reroute.parent_id = link.parent_reroute;
                if self.links.contains_key(&link_id) {
                    reroute.link_ids.insert(link_id);
                } else {
                    reroute.floating_link_ids.insert(link_id);
                }
                let link = self
                    .links
                    .get_mut(&link_id)
                    .or_else(|| self.floating_links.get_mut(&link_id))
                    .ok_or(GraphError::LinkNotFound(link_id))?;
                link.parent_reroute = Some(id);
            }
            InsertPoint::BeforeReroute(before) => {
                let existing = self
                    .reroutes
                    .get(&before)
                    .ok_or(GraphError::RerouteNotFound(before))?;
                reroute.parent_id = existing.parent_id;
                reroute.link_ids = existing.link_ids.clone();
                reroute.floating_link_ids = existing.floating_link_ids.clone();
                if let Some(r) = self.reroutes.get_mut(&before) {
                    r.parent_id = Some(id);
                }
            }
        }

        self.reroutes.insert(id, reroute);
        self.touch();
        Ok(id)
    }

    /// Re-parent a reroute. Self-assignment or anything that would close a
    /// cycle is rejected with `Ok(false)`, checked eagerly against the
    /// current state before any mutation.
    pub fn set_reroute_parent(
        &mut self,
        id: RerouteId,
        parent: Option<RerouteId>,
    ) -> Result<bool> {
        if !self.reroutes.contains_key(&id) {
            return Err(GraphError::RerouteNotFound(id));
        }
        if let Some(parent) = parent {
            if !self.reroutes.contains_key(&parent) {
                return Ok(false);
            }
            if reroute::would_cycle(&self.reroutes, id, parent) {
                warn!("refusing reroute parent {parent} for {id}: would create a cycle");
                return Ok(false);
            }
        }
        if let Some(r) = self.reroutes.get_mut(&id) {
            r.parent_id = parent;
        }
        self.touch();
        Ok(true)
    }

    /// Remove a reroute, splicing its children onto its parent. Floating
    /// links that lose their entire path go with it.
    pub fn remove_reroute(&mut self, id: RerouteId) -> Result<Reroute> {
        let removed = self
            .reroutes
            .remove(&id)
            .ok_or(GraphError::RerouteNotFound(id))?;

        for r in self.reroutes.values_mut() {
            if r.parent_id == Some(id) {
                r.parent_id = removed.parent_id;
            }
        }
        for l in self.links.values_mut() {
            if l.parent_reroute == Some(id) {
                l.parent_reroute = removed.parent_id;
            }
        }
        let mut dropped: Vec<LinkId> = Vec::new();
        for l in self.floating_links.values_mut() {
            if l.parent_reroute == Some(id) {
                if removed.parent_id.is_none() {
                    dropped.push(l.id);
                } else {
                    l.parent_reroute = removed.parent_id;
                }
            }
        }
        for fid in dropped {
            self.remove_floating_link(fid)?;
        }
        self.touch();
        Ok(removed)
    }

    /// Resolve the reroute chain ending at `id`, origin-first. `None` marks
    /// a cyclic chain.
    pub fn reroute_chain(&mut self, id: RerouteId) -> Option<Vec<RerouteId>> {
        reroute::chain(&mut self.reroutes, id)
    }

    // --- slot surgery ---

    /// Remove an input slot, disconnecting it first and re-indexing links
    /// that target subsequent slots
    pub fn remove_input(&mut self, node_id: NodeId, slot: usize) -> Result<InputSlot> {
        self.disconnect_input(node_id, slot, false)?;
        let node = self
            .nodes
            .get_mut(&node_id)
            .ok_or(GraphError::NodeNotFound(node_id))?;
        let removed = node.inputs.remove(slot);
        for l in self
            .links
            .values_mut()
            .chain(self.floating_links.values_mut())
        {
            if l.target_id == Some(node_id) && l.target_slot > slot {
                l.target_slot -= 1;
            }
        }
        self.touch();
        Ok(removed)
    }

    /// Remove an output slot, disconnecting it first and re-indexing links
    /// that originate at subsequent slots
    pub fn remove_output(&mut self, node_id: NodeId, slot: usize) -> Result<OutputSlot> {
        self.disconnect_output(node_id, slot, false)?;
        let node = self
            .nodes
            .get_mut(&node_id)
            .ok_or(GraphError::NodeNotFound(node_id))?;
        let removed = node.outputs.remove(slot);
        for l in self
            .links
            .values_mut()
            .chain(self.floating_links.values_mut())
        {
            if l.origin_id == Some(node_id) && l.origin_slot > slot {
                l.origin_slot -= 1;
            }
        }
        self.touch();
        Ok(removed)
    }

    /// Apply a slot patch from type resolution: retype matching slots, add
    /// new ones, and remove (with disconnect) slots no longer defined.
    pub fn apply_def_patch(&mut self, node_id: NodeId, patch: &NodeDefPatch) -> Result<()> {
        let node = self
            .nodes
            .get(&node_id)
            .ok_or(GraphError::NodeNotFound(node_id))?;

        let gone: Vec<usize> = node
            .inputs
            .iter()
            .enumerate()
            .filter(|(_, s)| !patch.inputs.iter().any(|d| d.name == s.name))
            .map(|(i, _)| i)
            .collect();
        for slot in gone.into_iter().rev() {
            self.remove_input(node_id, slot)?;
        }
        for def in &patch.inputs {
            let node = self
                .nodes
                .get_mut(&node_id)
                .ok_or(GraphError::NodeNotFound(node_id))?;
            match node.inputs.iter_mut().find(|s| s.name == def.name) {
                Some(slot) => slot.ty = def.ty.clone(),
                None => {
                    let mut slot = InputSlot::new(def.name.clone(), def.ty.clone());
                    if let Some(spec) = &def.widget {
                        if !spec.force_input {
                            slot.widget = Some(def.name.clone());
                            if node.widget(&def.name).is_none() {
                                node.widgets.push(Widget::new(
                                    def.name.clone(),
                                    spec.kind.clone(),
                                    spec.default.clone(),
                                ));
                            }
                        }
                    }
                    node.inputs.push(slot);
                }
            }
        }

        let node = self
            .nodes
            .get(&node_id)
            .ok_or(GraphError::NodeNotFound(node_id))?;
        let gone: Vec<usize> = node
            .outputs
            .iter()
            .enumerate()
            .filter(|(_, s)| !patch.outputs.iter().any(|d| d.name == s.name))
            .map(|(i, _)| i)
            .collect();
        for slot in gone.into_iter().rev() {
            self.remove_output(node_id, slot)?;
        }
        for def in &patch.outputs {
            let node = self
                .nodes
                .get_mut(&node_id)
                .ok_or(GraphError::NodeNotFound(node_id))?;
            match node.outputs.iter_mut().find(|s| s.name == def.name) {
                Some(slot) => slot.ty = def.ty.clone(),
                None => node
                    .outputs
                    .push(OutputSlot::new(def.name.clone(), def.ty.clone())),
            }
        }
        self.touch();
        Ok(())
    }

    // --- execution order ---

    /// Topological order over full links (Kahn's algorithm). Ties resolve by
    /// ascending node id so the order is stable across runs; nodes caught in
    /// a cycle are appended at the end, also by id.
    pub fn compute_execution_order(&self) -> Vec<NodeId> {
        let mut indegree: BTreeMap<NodeId, usize> =
            self.nodes.keys().map(|id| (*id, 0)).collect();
        for link in self.links.values() {
            if let (Some(origin), Some(target)) = (link.origin_id, link.target_id) {
                if self.nodes.contains_key(&origin) {
                    if let Some(d) = indegree.get_mut(&target) {
                        *d += 1;
                    }
                }
            }
        }

        let mut ready: BTreeSet<NodeId> = indegree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut placed: HashSet<NodeId> = HashSet::new();

        while let Some(id) = ready.iter().next().copied() {
            ready.remove(&id);
            order.push(id);
            placed.insert(id);
            if let Some(node) = self.nodes.get(&id) {
                for output in &node.outputs {
                    for link_id in &output.links {
                        let Some(target) =
                            self.links.get(link_id).and_then(|l| l.target_id)
                        else {
                            continue;
                        };
                        if let Some(d) = indegree.get_mut(&target) {
                            *d = d.saturating_sub(1);
                            if *d == 0 && !placed.contains(&target) {
                                ready.insert(target);
                            }
                        }
                    }
                }
            }
        }

        for id in self.nodes.keys() {
            if !placed.contains(id) {
                order.push(*id);
            }
        }
        order
    }

    /// Serialize the graph for the remote type-resolution service
    pub fn snapshot(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}

fn slot_label(slot: &SlotRef) -> String {
    match slot {
        SlotRef::Index(i) => i.to_string(),
        SlotRef::Name(n) => n.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slots::{InputSlot, OutputSlot};
    use crate::types::SlotType;

    fn producer(id: NodeId, ty: &str) -> Node {
        let mut node = Node::new(id, "Producer");
        node.add_output(OutputSlot::new("out", ty));
        node
    }

    fn consumer(id: NodeId, ty: &str) -> Node {
        let mut node = Node::new(id, "Consumer");
        node.add_input(InputSlot::new("in", ty));
        node
    }

    fn pass_through(id: NodeId) -> Node {
        let mut node = Node::new(id, "Relay");
        node.role = NodeRole::PassThrough;
        node.add_input(InputSlot::new("", "*"));
        node.add_output(OutputSlot::new("", "*"));
        node
    }

    #[test]
    fn test_connect_updates_both_slots() {
        let mut g = Graph::new();
        g.add_node(producer(1, "IMAGE"));
        g.add_node(consumer(2, "IMAGE"));

        let id = g.connect(1, 0, 2, 0, None).unwrap().unwrap();
        assert_eq!(g.node(1).unwrap().outputs[0].links, vec![id]);
        assert_eq!(g.node(2).unwrap().inputs[0].link, Some(id));
        let link = g.link(id).unwrap();
        assert_eq!(link.origin_id, Some(1));
        assert_eq!(link.target_id, Some(2));
    }

    #[test]
    fn test_connect_rejects_loopback_and_mismatch() {
        let mut g = Graph::new();
        let mut node = producer(1, "IMAGE");
        node.add_input(InputSlot::new("in", "IMAGE"));
        g.add_node(node);
        g.add_node(consumer(2, "MASK"));

        assert_eq!(g.connect(1, 0, 1, 0, None).unwrap(), None);
        assert_eq!(g.connect(1, 0, 2, 0, None).unwrap(), None);
        assert_eq!(g.link_count(), 0);
    }

    #[test]
    fn test_connect_missing_node_is_error() {
        let mut g = Graph::new();
        g.add_node(producer(1, "IMAGE"));
        assert!(matches!(
            g.connect(1, 0, 99, 0, None),
            Err(GraphError::NodeNotFound(99))
        ));
    }

    #[test]
    fn test_connect_by_slot_name() {
        let mut g = Graph::new();
        g.add_node(producer(1, "IMAGE"));
        g.add_node(consumer(2, "IMAGE"));
        let id = g.connect(1, "out", 2, "in", None).unwrap();
        assert!(id.is_some());
        assert!(matches!(
            g.connect(1, "missing", 2, "in", None),
            Err(GraphError::SlotNotFound { .. })
        ));
    }

    #[test]
    fn test_input_holds_single_link() {
        let mut g = Graph::new();
        g.add_node(producer(1, "IMAGE"));
        g.add_node(producer(2, "IMAGE"));
        g.add_node(consumer(3, "IMAGE"));

        let first = g.connect(1, 0, 3, 0, None).unwrap().unwrap();
        let second = g.connect(2, 0, 3, 0, None).unwrap().unwrap();
        assert_eq!(g.node(3).unwrap().inputs[0].link, Some(second));
        assert!(g.link(first).is_none());
        assert!(g.node(1).unwrap().outputs[0].links.is_empty());
    }

    #[test]
    fn test_link_ids_never_reused() {
        let mut g = Graph::new();
        g.add_node(producer(1, "IMAGE"));
        g.add_node(consumer(2, "IMAGE"));

        let first = g.connect(1, 0, 2, 0, None).unwrap().unwrap();
        g.disconnect_input(2, 0, false).unwrap();
        let second = g.connect(1, 0, 2, 0, None).unwrap().unwrap();
        assert!(second > first);
    }

    struct RejectInputs;
    impl NodeBehavior for RejectInputs {
        fn on_connect_input(
            &self,
            _node: &Node,
            _slot: usize,
            _origin: NodeId,
            _ty: &SlotType,
        ) -> bool {
            false
        }
    }

    #[test]
    fn test_behavior_veto_rejects_connection() {
        let mut g = Graph::new();
        g.add_node(producer(1, "IMAGE"));
        g.add_node(consumer(2, "IMAGE"));
        g.register_behavior("Consumer", Arc::new(RejectInputs));

        assert_eq!(g.connect(1, 0, 2, 0, None).unwrap(), None);
        assert_eq!(g.link_count(), 0);
    }

    #[test]
    fn test_disconnect_input_clears_both_sides() {
        let mut g = Graph::new();
        g.add_node(producer(1, "IMAGE"));
        g.add_node(consumer(2, "IMAGE"));
        g.connect(1, 0, 2, 0, None).unwrap();

        assert!(g.disconnect_input(2, 0, false).unwrap());
        assert!(!g.disconnect_input(2, 0, false).unwrap());
        assert_eq!(g.link_count(), 0);
        assert!(g.node(1).unwrap().outputs[0].links.is_empty());
        assert_eq!(g.node(2).unwrap().inputs[0].link, None);
    }

    #[test]
    fn test_reroute_chain_merge_on_connect() {
        let mut g = Graph::new();
        g.add_node(producer(1, "IMAGE"));
        g.add_node(consumer(2, "IMAGE"));
        let link = g.connect(1, 0, 2, 0, None).unwrap().unwrap();
        let r1 = g.insert_reroute([10.0, 0.0], InsertPoint::AtLinkEnd(link)).unwrap();
        let r2 = g.insert_reroute([20.0, 0.0], InsertPoint::AtLinkEnd(link)).unwrap();

        // r2 now terminates the path, parented to r1
        assert_eq!(g.link(link).unwrap().parent_reroute, Some(r2));
        assert_eq!(g.reroute(r2).unwrap().parent_id, Some(r1));
        assert_eq!(g.reroute_chain(r2), Some(vec![r1, r2]));
    }

    #[test]
    fn test_disconnect_keeping_reroutes_floats_the_path() {
        let mut g = Graph::new();
        g.add_node(producer(1, "IMAGE"));
        g.add_node(consumer(2, "IMAGE"));
        let link = g.connect(1, 0, 2, 0, None).unwrap().unwrap();
        let r = g.insert_reroute([10.0, 0.0], InsertPoint::AtLinkEnd(link)).unwrap();

        g.disconnect_input(2, 0, true).unwrap();
        assert_eq!(g.link_count(), 0);
        let reroute = g.reroute(r).unwrap();
        assert_eq!(reroute.floating, Some(FloatingSide::Output));
        assert_eq!(reroute.floating_link_ids.len(), 1);
        let floating = g.floating_links().next().unwrap();
        assert_eq!(floating.origin_id, Some(1));
        assert!(!floating.has_target());
        // the origin slot caches the floating link
        assert_eq!(g.node(1).unwrap().outputs[0].floating_links.len(), 1);
    }

    #[test]
    fn test_disconnect_without_keep_removes_orphan_reroutes() {
        let mut g = Graph::new();
        g.add_node(producer(1, "IMAGE"));
        g.add_node(consumer(2, "IMAGE"));
        let link = g.connect(1, 0, 2, 0, None).unwrap().unwrap();
        let r = g.insert_reroute([10.0, 0.0], InsertPoint::AtLinkEnd(link)).unwrap();

        g.disconnect_input(2, 0, false).unwrap();
        assert!(g.reroute(r).is_none());
        assert_eq!(g.floating_links().count(), 0);
    }

    #[test]
    fn test_reconnect_through_chain_clears_floating_terminus() {
        let mut g = Graph::new();
        g.add_node(producer(1, "IMAGE"));
        g.add_node(consumer(2, "IMAGE"));
        g.add_node(consumer(3, "IMAGE"));
        let link = g.connect(1, 0, 2, 0, None).unwrap().unwrap();
        let r = g.insert_reroute([10.0, 0.0], InsertPoint::AtLinkEnd(link)).unwrap();
        g.disconnect_input(2, 0, true).unwrap();
        assert_eq!(g.floating_links().count(), 1);

        let new_link = g.connect(1, 0, 3, 0, Some(r)).unwrap().unwrap();
        assert_eq!(g.floating_links().count(), 0);
        let reroute = g.reroute(r).unwrap();
        assert_eq!(reroute.floating, None);
        assert!(reroute.link_ids.contains(&new_link));
    }

    #[test]
    fn test_set_reroute_parent_rejects_cycles_eagerly() {
        let mut g = Graph::new();
        g.add_node(producer(1, "IMAGE"));
        g.add_node(consumer(2, "IMAGE"));
        let link = g.connect(1, 0, 2, 0, None).unwrap().unwrap();
        let r1 = g.insert_reroute([10.0, 0.0], InsertPoint::AtLinkEnd(link)).unwrap();
        let r2 = g.insert_reroute([20.0, 0.0], InsertPoint::AtLinkEnd(link)).unwrap();

        assert!(!g.set_reroute_parent(r1, Some(r1)).unwrap());
        assert!(!g.set_reroute_parent(r1, Some(r2)).unwrap());
        assert_eq!(g.reroute(r1).unwrap().parent_id, None);
        assert_eq!(g.reroute(r2).unwrap().parent_id, Some(r1));
    }

    #[test]
    fn test_remove_reroute_splices_children() {
        let mut g = Graph::new();
        g.add_node(producer(1, "IMAGE"));
        g.add_node(consumer(2, "IMAGE"));
        let link = g.connect(1, 0, 2, 0, None).unwrap().unwrap();
        let r1 = g.insert_reroute([10.0, 0.0], InsertPoint::AtLinkEnd(link)).unwrap();
        let r2 = g.insert_reroute([20.0, 0.0], InsertPoint::AtLinkEnd(link)).unwrap();

        g.remove_reroute(r1).unwrap();
        assert_eq!(g.reroute(r2).unwrap().parent_id, None);
        assert_eq!(g.link(link).unwrap().parent_reroute, Some(r2));
    }

    #[test]
    fn test_end_configure_prunes_stale_reroute_links() {
        let mut g = Graph::new();
        g.add_node(producer(1, "IMAGE"));
        g.add_node(consumer(2, "IMAGE"));
        let link = g.connect(1, 0, 2, 0, None).unwrap().unwrap();
        let r1 = g.insert_reroute([10.0, 0.0], InsertPoint::AtLinkEnd(link)).unwrap();
        let r2 = g.insert_reroute([20.0, 0.0], InsertPoint::AtLinkEnd(link)).unwrap();

        g.begin_configure();
        // state left behind by a bad restore: r1 also knows a dead link, r2
        // knows only dead links
        g.reroute_mut(r1).unwrap().link_ids.insert(99);
        let r2_links = &mut g.reroute_mut(r2).unwrap().link_ids;
        r2_links.clear();
        r2_links.insert(98);
        g.end_configure();

        assert_eq!(g.reroute(r1).unwrap().link_ids, HashSet::from([link]));
        assert!(g.reroute(r2).is_none());
        // removing r2 re-splices the path onto r1
        assert_eq!(g.link(link).unwrap().parent_reroute, Some(r1));
    }

    #[test]
    fn test_remove_input_reindexes_links() {
        let mut g = Graph::new();
        g.add_node(producer(1, "IMAGE"));
        g.add_node(producer(2, "IMAGE"));
        let mut sink = Node::new(3, "Sink");
        sink.add_input(InputSlot::new("a", "IMAGE"));
        sink.add_input(InputSlot::new("b", "IMAGE"));
        g.add_node(sink);
        g.connect(1, 0, 3, 0, None).unwrap();
        let kept = g.connect(2, 0, 3, 1, None).unwrap().unwrap();

        g.remove_input(3, 0).unwrap();
        let node = g.node(3).unwrap();
        assert_eq!(node.inputs.len(), 1);
        assert_eq!(node.inputs[0].name, "b");
        assert_eq!(node.inputs[0].link, Some(kept));
        assert_eq!(g.link(kept).unwrap().target_slot, 0);
    }

    #[test]
    fn test_remove_output_reindexes_links() {
        let mut g = Graph::new();
        let mut src = Node::new(1, "Source");
        src.add_output(OutputSlot::new("a", "IMAGE"));
        src.add_output(OutputSlot::new("b", "IMAGE"));
        g.add_node(src);
        g.add_node(consumer(2, "IMAGE"));
        g.add_node(consumer(3, "IMAGE"));
        g.connect(1, 0, 2, 0, None).unwrap();
        let kept = g.connect(1, 1, 3, 0, None).unwrap().unwrap();

        g.remove_output(1, 0).unwrap();
        let node = g.node(1).unwrap();
        assert_eq!(node.outputs.len(), 1);
        assert_eq!(node.outputs[0].name, "b");
        assert!(node.outputs[0].links.contains(&kept));
        assert_eq!(g.link(kept).unwrap().origin_slot, 0);
        assert_eq!(g.node(2).unwrap().inputs[0].link, None);
    }

    #[test]
    fn test_remove_node_severs_everything() {
        let mut g = Graph::new();
        g.add_node(producer(1, "IMAGE"));
        let mut mid = Node::new(2, "Filter");
        mid.add_input(InputSlot::new("in", "IMAGE"));
        mid.add_output(OutputSlot::new("out", "IMAGE"));
        g.add_node(mid);
        g.add_node(consumer(3, "IMAGE"));
        g.connect(1, 0, 2, 0, None).unwrap();
        g.connect(2, 0, 3, 0, None).unwrap();

        g.remove_node(2).unwrap();
        assert_eq!(g.link_count(), 0);
        assert!(g.node(1).unwrap().outputs[0].links.is_empty());
        assert_eq!(g.node(3).unwrap().inputs[0].link, None);
    }

    #[test]
    fn test_execution_order_diamond() {
        let mut g = Graph::new();
        g.add_node(producer(1, "IMAGE"));
        let mut a = Node::new(2, "A");
        a.add_input(InputSlot::new("in", "IMAGE"));
        a.add_output(OutputSlot::new("out", "IMAGE"));
        g.add_node(a);
        let mut b = Node::new(3, "B");
        b.add_input(InputSlot::new("in", "IMAGE"));
        b.add_output(OutputSlot::new("out", "IMAGE"));
        g.add_node(b);
        let mut join = Node::new(4, "Join");
        join.add_input(InputSlot::new("a", "IMAGE"));
        join.add_input(InputSlot::new("b", "IMAGE"));
        g.add_node(join);
        g.connect(1, 0, 2, 0, None).unwrap();
        g.connect(1, 0, 3, 0, None).unwrap();
        g.connect(2, 0, 4, 0, None).unwrap();
        g.connect(3, 0, 4, 1, None).unwrap();

        assert_eq!(g.compute_execution_order(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_execution_order_appends_cycles() {
        let mut g = Graph::new();
        let mut a = Node::new(1, "A");
        a.add_input(InputSlot::new("in", "X"));
        a.add_output(OutputSlot::new("out", "X"));
        g.add_node(a);
        let mut b = Node::new(2, "B");
        b.add_input(InputSlot::new("in", "X"));
        b.add_output(OutputSlot::new("out", "X"));
        g.add_node(b);
        g.add_node(producer(3, "X"));
        g.connect(1, 0, 2, 0, None).unwrap();
        g.connect(2, 0, 1, 0, None).unwrap();

        let order = g.compute_execution_order();
        assert_eq!(order[0], 3);
        assert_eq!(&order[1..], &[1, 2]);
    }

    #[test]
    fn test_pass_through_adopts_upstream_type() {
        let mut g = Graph::new();
        g.add_node(producer(1, "IMAGE"));
        g.add_node(pass_through(2));
        g.add_node(consumer(3, "IMAGE"));

        g.connect(1, 0, 2, 0, None).unwrap();
        assert_eq!(g.node(2).unwrap().outputs[0].ty, SlotType::new("IMAGE"));

        g.connect(2, 0, 3, 0, None).unwrap();
        assert!(g.node(3).unwrap().inputs[0].link.is_some());

        // severing upstream reverts the chain to the wildcard
        g.disconnect_input(2, 0, false).unwrap();
        assert_eq!(
            g.node(2).unwrap().outputs[0].ty,
            SlotType::new("IMAGE"),
            "type sticks until recomputed against consumers"
        );
    }

    #[test]
    fn test_pass_through_chain_disconnects_incompatible_consumer() {
        let mut g = Graph::new();
        g.add_node(pass_through(1));
        g.add_node(consumer(2, "MASK"));
        g.add_node(producer(3, "IMAGE"));

        // wildcard chain first: MASK consumer attaches fine
        g.connect(1, 0, 2, 0, None).unwrap();
        assert!(g.node(2).unwrap().inputs[0].link.is_some());
        // chain adopted the consumer's expectation
        assert_eq!(g.node(1).unwrap().outputs[0].ty, SlotType::new("MASK"));

        // a concrete IMAGE producer resolves the chain and evicts the
        // incompatible consumer
        g.connect(3, 0, 1, 0, None).unwrap();
        assert_eq!(g.node(1).unwrap().outputs[0].ty, SlotType::new("IMAGE"));
        assert_eq!(g.node(2).unwrap().inputs[0].link, None);
    }

    #[test]
    fn test_propagation_suppressed_while_configuring() {
        let mut g = Graph::new();
        g.begin_configure();
        g.add_node(producer(1, "IMAGE"));
        g.add_node(pass_through(2));
        g.connect(1, 0, 2, 0, None).unwrap();
        assert_eq!(g.node(2).unwrap().outputs[0].ty, SlotType::new("*"));

        g.end_configure();
        assert_eq!(g.node(2).unwrap().outputs[0].ty, SlotType::new("IMAGE"));
    }
}
