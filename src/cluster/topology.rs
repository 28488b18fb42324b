//! Slot Topology
//!
//! Slot ranges with their master and replicas, as reported by `CLUSTER SLOTS`.

use crate::cluster::resp::RespValue;
use crate::cluster::NodeAddr;
use crate::error::{CacheError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotRange {
    pub start: u16,
    pub end: u16,
    pub master: NodeAddr,
    pub replicas: Vec<NodeAddr>,
}

/// Routing table: slot ranges ordered by start slot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotMap {
    ranges: Vec<SlotRange>,
}

impl SlotMap {
    pub fn new(mut ranges: Vec<SlotRange>) -> Self {
        ranges.sort_by_key(|range| range.start);
        Self { ranges }
    }

    /// Parses a `CLUSTER SLOTS` reply.
    ///
    /// An empty host in the reply means "the node that answered", so
    /// `origin` fills it in.
    pub fn from_cluster_slots(reply: RespValue, origin: &NodeAddr) -> Result<Self> {
        let entries = match reply {
            RespValue::Array(entries) => entries,
            RespValue::Error(message) => return Err(CacheError::CommandRejected(message)),
            other => return Err(malformed(&format!("expected array, got {:?}", other))),
        };

        let mut ranges = Vec::with_capacity(entries.len());
        for entry in entries {
            let fields = match entry {
                RespValue::Array(fields) if fields.len() >= 3 => fields,
                other => return Err(malformed(&format!("bad slot entry {:?}", other))),
            };
            let start = slot_number(&fields[0])?;
            let end = slot_number(&fields[1])?;
            let mut nodes = fields[2..]
                .iter()
                .map(|node| parse_node(node, origin))
                .collect::<Result<Vec<_>>>()?;
            let master = nodes.remove(0);
            ranges.push(SlotRange {
                start,
                end,
                master,
                replicas: nodes,
            });
        }

        if ranges.is_empty() {
            return Err(malformed("cluster reports no slots"));
        }
        Ok(Self::new(ranges))
    }

    /// Range owning `slot`.
    pub fn range_for(&self, slot: u16) -> Option<&SlotRange> {
        let idx = self.ranges.partition_point(|range| range.end < slot);
        self.ranges
            .get(idx)
            .filter(|range| range.start <= slot && slot <= range.end)
    }

    /// Distinct master nodes in slot order.
    pub fn masters(&self) -> Vec<NodeAddr> {
        let mut masters: Vec<NodeAddr> = Vec::new();
        for range in &self.ranges {
            if !masters.contains(&range.master) {
                masters.push(range.master.clone());
            }
        }
        masters
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

fn slot_number(value: &RespValue) -> Result<u16> {
    match value {
        RespValue::Integer(n) if (0..16384).contains(n) => Ok(*n as u16),
        other => Err(malformed(&format!("bad slot number {:?}", other))),
    }
}

fn parse_node(value: &RespValue, origin: &NodeAddr) -> Result<NodeAddr> {
    let fields = match value {
        RespValue::Array(fields) if fields.len() >= 2 => fields,
        other => return Err(malformed(&format!("bad node entry {:?}", other))),
    };
    let host = fields[0]
        .as_text()
        .ok_or_else(|| malformed("node host is not a string"))?;
    let port = match &fields[1] {
        RespValue::Integer(port) if (1..=65535).contains(port) => *port as u16,
        other => return Err(malformed(&format!("bad node port {:?}", other))),
    };
    let host = if host.is_empty() || host == "?" {
        origin.host.clone()
    } else {
        host
    };
    Ok(NodeAddr::new(host, port))
}

fn malformed(msg: &str) -> CacheError {
    CacheError::StoreUnavailable(format!("malformed CLUSTER SLOTS reply: {}", msg))
}
