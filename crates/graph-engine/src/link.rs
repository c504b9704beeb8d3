//! Link records connecting output slots to input slots

use crate::types::{LinkId, NodeId, RerouteId, SlotType};
use serde::de::{Error as DeError, SeqAccess, Visitor};
use serde::ser::SerializeSeq;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Which endpoint of a floating link is still attached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloatingSide {
    /// Attached at the origin output; the input end dangles
    Output,
    /// Attached at the target input; the output end dangles
    Input,
}

/// A directed connection from an output slot to an input slot.
///
/// Either endpoint may be absent, in which case the link is *floating*: it
/// preserves a reroute path while one end is disconnected.
///
/// Wire format is positional: `[id, originId, originSlot, targetId,
/// targetSlot, type]` with `-1` standing in for an absent endpoint, plus an
/// optional seventh element carrying the resolved type of a wildcard output.
#[derive(Debug, Clone, PartialEq)]
pub struct Link {
    pub id: LinkId,
    pub ty: SlotType,
    pub origin_id: Option<NodeId>,
    pub origin_slot: usize,
    pub target_id: Option<NodeId>,
    pub target_slot: usize,
    /// Last reroute on the path from origin to target, if any
    pub parent_reroute: Option<RerouteId>,
    /// Concrete type recorded for a wildcard origin output
    pub resolved_ty: Option<SlotType>,
}

impl Link {
    pub fn new(
        id: LinkId,
        ty: SlotType,
        origin_id: NodeId,
        origin_slot: usize,
        target_id: NodeId,
        target_slot: usize,
        parent_reroute: Option<RerouteId>,
    ) -> Self {
        Self {
            id,
            ty,
            origin_id: Some(origin_id),
            origin_slot,
            target_id: Some(target_id),
            target_slot,
            parent_reroute,
            resolved_ty: None,
        }
    }

    pub fn has_origin(&self) -> bool {
        self.origin_id.is_some()
    }

    pub fn has_target(&self) -> bool {
        self.target_id.is_some()
    }

    pub fn is_floating(&self) -> bool {
        !self.has_origin() || !self.has_target()
    }

    /// Detach one endpoint, turning this link into a floating link anchored
    /// at `side` and parented to `parent_reroute`
    pub fn to_floating(&mut self, side: FloatingSide, parent_reroute: Option<RerouteId>) {
        match side {
            FloatingSide::Output => {
                self.target_id = None;
                self.target_slot = 0;
            }
            FloatingSide::Input => {
                self.origin_id = None;
                self.origin_slot = 0;
            }
        }
        self.parent_reroute = parent_reroute;
    }
}

impl Serialize for Link {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = if self.resolved_ty.is_some() { 7 } else { 6 };
        let mut seq = serializer.serialize_seq(Some(len))?;
        seq.serialize_element(&self.id)?;
        seq.serialize_element(&self.origin_id.map(|n| n as i64).unwrap_or(-1))?;
        seq.serialize_element(&self.origin_slot)?;
        seq.serialize_element(&self.target_id.map(|n| n as i64).unwrap_or(-1))?;
        seq.serialize_element(&self.target_slot)?;
        seq.serialize_element(&self.ty)?;
        if let Some(resolved) = &self.resolved_ty {
            seq.serialize_element(resolved)?;
        }
        seq.end()
    }
}

struct LinkVisitor;

impl<'de> Visitor<'de> for LinkVisitor {
    type Value = Link;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a link tuple of 6 or 7 elements")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Link, A::Error> {
        let id: LinkId = seq
            .next_element()?
            .ok_or_else(|| DeError::invalid_length(0, &self))?;
        let origin: i64 = seq
            .next_element()?
            .ok_or_else(|| DeError::invalid_length(1, &self))?;
        let origin_slot: usize = seq
            .next_element()?
            .ok_or_else(|| DeError::invalid_length(2, &self))?;
        let target: i64 = seq
            .next_element()?
            .ok_or_else(|| DeError::invalid_length(3, &self))?;
        let target_slot: usize = seq
            .next_element()?
            .ok_or_else(|| DeError::invalid_length(4, &self))?;
        let ty: SlotType = seq
            .next_element()?
            .ok_or_else(|| DeError::invalid_length(5, &self))?;
        let resolved_ty: Option<SlotType> = seq.next_element()?;

        Ok(Link {
            id,
            ty,
            origin_id: (origin >= 0).then_some(origin as NodeId),
            origin_slot,
            target_id: (target >= 0).then_some(target as NodeId),
            target_slot,
            parent_reroute: None,
            resolved_ty,
        })
    }
}

impl<'de> Deserialize<'de> for Link {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_seq(LinkVisitor)
    }
}
