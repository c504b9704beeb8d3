//! Reroute points: draggable waypoints forming singly-linked chains along
//! link paths

use crate::link::{FloatingSide, Link};
use crate::types::{LinkId, RerouteId};
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// A reroute point. Chains toward the origin via `parent_id`; the link's
/// `parent_reroute` names the final reroute before the target.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reroute {
    pub id: RerouteId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<RerouteId>,
    pub pos: [f64; 2],
    /// Full links whose paths pass through this point
    #[serde(default)]
    pub link_ids: HashSet<LinkId>,
    /// Floating links whose paths pass through this point
    #[serde(default, skip_serializing_if = "HashSet::is_empty")]
    pub floating_link_ids: HashSet<LinkId>,
    /// Set when this point anchors only floating links; names the side that
    /// is still attached
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub floating: Option<FloatingSide>,
}

impl Serialize for FloatingSide {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        match self {
            FloatingSide::Output => s.serialize_str("output"),
            FloatingSide::Input => s.serialize_str("input"),
        }
    }
}

impl<'de> Deserialize<'de> for FloatingSide {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        match s.as_str() {
            "output" => Ok(FloatingSide::Output),
            "input" => Ok(FloatingSide::Input),
            other => Err(serde::de::Error::custom(format!(
                "unknown floating side: {other}"
            ))),
        }
    }
}

impl Reroute {
    pub fn new(id: RerouteId, pos: [f64; 2]) -> Self {
        Self {
            id,
            parent_id: None,
            pos,
            link_ids: HashSet::new(),
            floating_link_ids: HashSet::new(),
            floating: None,
        }
    }

    /// Count of all links, full and floating, passing through this point
    pub fn total_links(&self) -> usize {
        self.link_ids.len() + self.floating_link_ids.len()
    }

    /// Drop link ids that no longer exist in either registry. Returns true
    /// when at least one valid link remains.
    pub fn validate_links(
        &mut self,
        links: &HashMap<LinkId, Link>,
        floating: &HashMap<LinkId, Link>,
    ) -> bool {
        self.link_ids.retain(|id| links.contains_key(id));
        self.floating_link_ids.retain(|id| floating.contains_key(id));
        self.total_links() != 0
    }
}

/// Resolve the chain of reroutes ending at `id`, ordered origin-first.
///
/// Returns `None` when the parent chain contains a cycle; this is distinct
/// from `Some(vec![])`, which can only happen for an unknown id. A parent id
/// pointing at a missing reroute is treated as corruption and healed by
/// clearing it.
pub fn chain(reroutes: &mut BTreeMap<RerouteId, Reroute>, id: RerouteId) -> Option<Vec<RerouteId>> {
    let mut out = Vec::new();
    let mut visited = HashSet::new();
    let mut current = Some(id);
    while let Some(cur) = current {
        if !visited.insert(cur) {
            return None;
        }
        let Some(reroute) = reroutes.get(&cur) else {
            break;
        };
        out.push(cur);
        current = reroute.parent_id;
        if let Some(parent) = current {
            if !reroutes.contains_key(&parent) {
                warn!("reroute {cur} references missing parent {parent}; clearing");
                if let Some(r) = reroutes.get_mut(&cur) {
                    r.parent_id = None;
                }
                break;
            }
        }
    }
    out.reverse();
    Some(out)
}

/// Check whether setting `parent` on `id` would create a cycle, against the
/// current state of the map. Self-assignment always counts as a cycle.
pub fn would_cycle(
    reroutes: &BTreeMap<RerouteId, Reroute>,
    id: RerouteId,
    parent: RerouteId,
) -> bool {
    if id == parent {
        return true;
    }
    let mut visited = HashSet::from([id]);
    let mut current = Some(parent);
    while let Some(cur) = current {
        if !visited.insert(cur) {
            return true;
        }
        current = reroutes.get(&cur).and_then(|r| r.parent_id);
    }
    false
}

/// Walk one step from `from` toward the target along `link_id`'s chain:
/// the reroute parented at `from` that carries the link. This is the
/// traversal a renderer uses to trace a link's path point by point.
pub fn find_next_reroute(
    reroutes: &BTreeMap<RerouteId, Reroute>,
    from: Option<RerouteId>,
    link_id: LinkId,
) -> Option<RerouteId> {
    reroutes
        .values()
        .find(|r| {
            r.parent_id == from
                && (r.link_ids.contains(&link_id) || r.floating_link_ids.contains(&link_id))
        })
        .map(|r| r.id)
}
