//! Slot type compatibility and pass-through type propagation

use crate::graph::Graph;
use crate::node::NodeRole;
use crate::types::{NodeId, SlotType};
use regex::RegexBuilder;
use std::collections::HashSet;

/// Decide whether an output of type `a` may connect to an input of type `b`.
///
/// The relation is symmetric. Rules, in order:
/// 1. Either side being a whole-type wildcard (`""`, `"0"`, `"*"`) matches.
/// 2. Comma-separated unions are compared pairwise; any case-insensitive
///    exact match between members succeeds.
/// 3. Only after exact matching fails, members containing `*` are widened to
///    patterns (`*` matching any run of characters) and tried both ways.
pub fn is_valid_connection(a: &SlotType, b: &SlotType) -> bool {
    if a.is_wildcard() || b.is_wildcard() {
        return true;
    }
    let left: Vec<&str> = a.as_str().split(',').map(str::trim).collect();
    let right: Vec<&str> = b.as_str().split(',').map(str::trim).collect();

    for x in &left {
        for y in &right {
            if x.eq_ignore_ascii_case(y) {
                return true;
            }
        }
    }
    for x in &left {
        for y in &right {
            if wildcard_matches(x, y) || wildcard_matches(y, x) {
                return true;
            }
        }
    }
    false
}

/// Match `value` against `pattern`, where `*` in the pattern stands for any
/// run of characters. Returns false for patterns without a `*` or patterns
/// that fail to compile.
fn wildcard_matches(pattern: &str, value: &str) -> bool {
    if !pattern.contains('*') {
        return false;
    }
    let expr = format!("^{}$", regex::escape(pattern).replace("\\*", ".*"));
    match RegexBuilder::new(&expr).case_insensitive(true).build() {
        Ok(re) => re.is_match(value),
        Err(_) => false,
    }
}

/// Re-derive the resolved type of the pass-through chain containing `start`
/// and apply it downstream.
///
/// Walks upstream through pass-through nodes to the nearest concrete
/// producer, then breadth-first downstream over the chain: consumers whose
/// input no longer accepts the resolved type are disconnected, and every
/// chain node's output adopts the type (falling back to the first consumer's
/// input type, then the wildcard). Suppressed while the graph is being
/// configured; a final pass runs when configuring ends.
pub fn propagate_pass_through(graph: &mut Graph, start: NodeId) {
    if graph.is_configuring() {
        return;
    }
    let Some(node) = graph.node(start) else {
        return;
    };
    if node.role != NodeRole::PassThrough {
        return;
    }

    // Upstream: find the concrete input type feeding the chain.
    let mut input_ty: Option<SlotType> = None;
    let mut visited: HashSet<NodeId> = HashSet::new();
    let mut current = start;
    loop {
        if !visited.insert(current) {
            // The chain feeds itself; sever at the point we re-entered.
            let _ = graph.disconnect_input(current, 0, false);
            break;
        }
        let Some((origin_id, origin_slot)) = graph
            .node(current)
            .and_then(|n| n.inputs.first())
            .and_then(|i| i.link)
            .and_then(|l| graph.link(l))
            .and_then(|l| l.origin_id.map(|o| (o, l.origin_slot)))
        else {
            break;
        };
        let Some(origin) = graph.node(origin_id) else {
            break;
        };
        if origin.role == NodeRole::PassThrough {
            current = origin_id;
            continue;
        }
        input_ty = origin.outputs.get(origin_slot).map(|o| o.ty.clone());
        break;
    }

    // Downstream: collect chain members and consumer endpoints.
    let mut chain: Vec<NodeId> = Vec::new();
    let mut consumers: Vec<(NodeId, usize)> = Vec::new();
    let mut seen: HashSet<NodeId> = HashSet::from([start]);
    let mut queue: Vec<NodeId> = vec![start];
    while let Some(id) = queue.pop() {
        chain.push(id);
        let Some(node) = graph.node(id) else { continue };
        for output in &node.outputs {
            for link_id in &output.links {
                let Some(link) = graph.link(*link_id) else {
                    continue;
                };
                let Some(target_id) = link.target_id else {
                    continue;
                };
                let Some(target) = graph.node(target_id) else {
                    continue;
                };
                if target.role == NodeRole::PassThrough {
                    if seen.insert(target_id) {
                        queue.push(target_id);
                    }
                } else {
                    consumers.push((target_id, link.target_slot));
                }
            }
        }
    }

    // Consumers that no longer accept the resolved type get disconnected.
    let mut fallback_ty: Option<SlotType> = None;
    if let Some(ty) = &input_ty {
        for (consumer, slot) in &consumers {
            let compatible = graph
                .node(*consumer)
                .and_then(|n| n.inputs.get(*slot))
                .map(|i| is_valid_connection(ty, &i.ty))
                .unwrap_or(false);
            if !compatible {
                let _ = graph.disconnect_input(*consumer, *slot, false);
            }
        }
    } else {
        // No producer: adopt the first consumer's expectation.
        fallback_ty = consumers.first().and_then(|(consumer, slot)| {
            graph
                .node(*consumer)
                .and_then(|n| n.inputs.get(*slot))
                .map(|i| i.ty.clone())
        });
    }

    let resolved = input_ty.or(fallback_ty).unwrap_or_else(SlotType::any);
    for id in chain {
        if let Some(node) = graph.node_mut(id) {
            if let Some(output) = node.outputs.first_mut() {
                output.ty = resolved.clone();
            }
        }
    }
}
