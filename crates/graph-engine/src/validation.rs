//! Whole-graph consistency checks.
//!
//! These validate the invariants the mutation paths are supposed to
//! maintain: link registry and slot state agree in both directions, slot
//! indices are in bounds, and reroute chains are acyclic. All findings are
//! returned, not just the first.

use crate::graph::Graph;
use crate::types::{LinkId, NodeId, RerouteId};
use std::collections::HashSet;
use std::fmt;

/// A single inconsistency found in a graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsistencyIssue {
    /// A link references a node that is not in the graph
    MissingEndpoint {
        link: LinkId,
        node: NodeId,
    },
    /// A link references a slot index past the end of a node's slot list
    SlotOutOfBounds {
        link: LinkId,
        node: NodeId,
        side: &'static str,
        slot: usize,
    },
    /// A link exists but the slot it claims to occupy does not point back
    NotOnSlot {
        link: LinkId,
        node: NodeId,
        side: &'static str,
        slot: usize,
    },
    /// A slot references a link missing from the registry
    DanglingSlotLink {
        node: NodeId,
        side: &'static str,
        slot: usize,
        link: LinkId,
    },
    /// A reroute's parent chain loops back on itself
    RerouteCycle { reroute: RerouteId },
    /// A reroute's parent is not in the graph
    MissingRerouteParent {
        reroute: RerouteId,
        parent: RerouteId,
    },
    /// A reroute holds a link id that no longer exists
    StaleRerouteLink {
        reroute: RerouteId,
        link: LinkId,
    },
}

impl fmt::Display for ConsistencyIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingEndpoint { link, node } => {
                write!(f, "link {link} references missing node {node}")
            }
            Self::SlotOutOfBounds {
                link,
                node,
                side,
                slot,
            } => write!(
                f,
                "link {link} references {side} slot {slot} past the end of node {node}"
            ),
            Self::NotOnSlot {
                link,
                node,
                side,
                slot,
            } => write!(
                f,
                "link {link} is not recorded on {side} slot {slot} of node {node}"
            ),
            Self::DanglingSlotLink {
                node,
                side,
                slot,
                link,
            } => write!(
                f,
                "{side} slot {slot} of node {node} references missing link {link}"
            ),
            Self::RerouteCycle { reroute } => {
                write!(f, "reroute {reroute} is part of a parent cycle")
            }
            Self::MissingRerouteParent { reroute, parent } => {
                write!(f, "reroute {reroute} references missing parent {parent}")
            }
            Self::StaleRerouteLink { reroute, link } => {
                write!(f, "reroute {reroute} references missing link {link}")
            }
        }
    }
}

impl std::error::Error for ConsistencyIssue {}

/// Check every consistency invariant, returning all findings
pub fn validate_graph(graph: &Graph) -> Vec<ConsistencyIssue> {
    let mut issues = Vec::new();

    for link in graph.links() {
        if let Some(origin) = link.origin_id {
            match graph.node(origin) {
                None => issues.push(ConsistencyIssue::MissingEndpoint {
                    link: link.id,
                    node: origin,
                }),
                Some(node) => match node.outputs.get(link.origin_slot) {
                    None => issues.push(ConsistencyIssue::SlotOutOfBounds {
                        link: link.id,
                        node: origin,
                        side: "output",
                        slot: link.origin_slot,
                    }),
                    Some(slot) => {
                        if !slot.links.contains(&link.id) {
                            issues.push(ConsistencyIssue::NotOnSlot {
                                link: link.id,
                                node: origin,
                                side: "output",
                                slot: link.origin_slot,
                            });
                        }
                    }
                },
            }
        }
        if let Some(target) = link.target_id {
            match graph.node(target) {
                None => issues.push(ConsistencyIssue::MissingEndpoint {
                    link: link.id,
                    node: target,
                }),
                Some(node) => match node.inputs.get(link.target_slot) {
                    None => issues.push(ConsistencyIssue::SlotOutOfBounds {
                        link: link.id,
                        node: target,
                        side: "input",
                        slot: link.target_slot,
                    }),
                    Some(slot) => {
                        if slot.link != Some(link.id) {
                            issues.push(ConsistencyIssue::NotOnSlot {
                                link: link.id,
                                node: target,
                                side: "input",
                                slot: link.target_slot,
                            });
                        }
                    }
                },
            }
        }
    }

    for node in graph.nodes() {
        for (i, input) in node.inputs.iter().enumerate() {
            if let Some(link) = input.link {
                if graph.link(link).is_none() {
                    issues.push(ConsistencyIssue::DanglingSlotLink {
                        node: node.id,
                        side: "input",
                        slot: i,
                        link,
                    });
                }
            }
        }
        for (i, output) in node.outputs.iter().enumerate() {
            for link in &output.links {
                if graph.link(*link).is_none() {
                    issues.push(ConsistencyIssue::DanglingSlotLink {
                        node: node.id,
                        side: "output",
                        slot: i,
                        link: *link,
                    });
                }
            }
        }
    }

    for reroute in graph.reroutes() {
        if let Some(parent) = reroute.parent_id {
            if graph.reroute(parent).is_none() {
                issues.push(ConsistencyIssue::MissingRerouteParent {
                    reroute: reroute.id,
                    parent,
                });
            }
        }
        let mut visited: HashSet<RerouteId> = HashSet::new();
        let mut current = Some(reroute.id);
        while let Some(id) = current {
            if !visited.insert(id) {
                issues.push(ConsistencyIssue::RerouteCycle {
                    reroute: reroute.id,
                });
                break;
            }
            current = graph.reroute(id).and_then(|r| r.parent_id);
        }
        for link in &reroute.link_ids {
            if graph.link(*link).is_none() {
                issues.push(ConsistencyIssue::StaleRerouteLink {
                    reroute: reroute.id,
                    link: *link,
                });
            }
        }
        for link in &reroute.floating_link_ids {
            if graph.floating_link(*link).is_none() {
                issues.push(ConsistencyIssue::StaleRerouteLink {
                    reroute: reroute.id,
                    link: *link,
                });
            }
        }
    }

    issues
}

/// True when no invariant is violated
pub fn is_consistent(graph: &Graph) -> bool {
    validate_graph(graph).is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Graph, InsertPoint};
    use crate::node::Node;
    use crate::slots::{InputSlot, OutputSlot};

    fn linked_pair() -> Graph {
        let mut g = Graph::new();
        let mut p = Node::new(1, "P");
        p.add_output(OutputSlot::new("out", "IMAGE"));
        g.add_node(p);
        let mut c = Node::new(2, "C");
        c.add_input(InputSlot::new("in", "IMAGE"));
        g.add_node(c);
        g.connect(1, 0, 2, 0, None).unwrap();
        g
    }

    #[test]
    fn test_mutations_keep_graph_consistent() {
        let mut g = linked_pair();
        assert!(is_consistent(&g));

        let link = g.node(2).unwrap().inputs[0].link.unwrap();
        g.insert_reroute([5.0, 5.0], InsertPoint::AtLinkEnd(link))
            .unwrap();
        assert!(is_consistent(&g));

        g.disconnect_input(2, 0, true).unwrap();
        assert!(is_consistent(&g));

        g.remove_node(1).unwrap();
        assert!(is_consistent(&g));
    }

    #[test]
    fn test_corrupted_slot_reference_is_reported() {
        let mut g = linked_pair();
        // simulate corruption: the input forgets its link
        g.node_mut(2).unwrap().inputs[0].link = None;
        let issues = validate_graph(&g);
        assert!(issues
            .iter()
            .any(|i| matches!(i, ConsistencyIssue::NotOnSlot { side: "input", .. })));
    }

    #[test]
    fn test_dangling_output_link_is_reported() {
        let mut g = linked_pair();
        g.node_mut(1).unwrap().outputs[0].links.push(999);
        let issues = validate_graph(&g);
        assert!(issues
            .iter()
            .any(|i| matches!(i, ConsistencyIssue::DanglingSlotLink { link: 999, .. })));
    }
}
