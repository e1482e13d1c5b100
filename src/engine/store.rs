//! Controller state store
//!
//! Owns one [`ControllerRecord`] per scene controller node. Only the engine
//! task mutates it, so no locking is involved.

use super::types::{IndicatorMask, NodeId, BUTTON_COUNT};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Per-controller bookkeeping
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControllerRecord {
    /// Physical node of the controller
    pub node_id: NodeId,
    /// Update time of the last indicator report already processed
    pub indicator_update_time: u64,
    /// Bitmask the engine last asserted on the indicator register
    pub desired_indicator: IndicatorMask,
    /// Button group -> associated load nodes, in hardware order
    pub associations: BTreeMap<u8, Vec<NodeId>>,
    /// Virtual devices of this node seen so far
    pub devices: BTreeSet<String>,
}

impl ControllerRecord {
    /// New record with every group present and empty
    pub fn new(node_id: NodeId, desired_indicator: IndicatorMask) -> Self {
        Self {
            node_id,
            indicator_update_time: 0,
            desired_indicator,
            associations: (1..=BUTTON_COUNT).map(|group| (group, Vec::new())).collect(),
            devices: BTreeSet::new(),
        }
    }

    /// Associated loads of one button group
    pub fn group(&self, group: u8) -> &[NodeId] {
        self.associations
            .get(&group)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Groups whose association list contains `load`
    pub fn groups_containing(&self, load: NodeId) -> Vec<u8> {
        self.associations
            .iter()
            .filter(|(_, members)| members.contains(&load))
            .map(|(group, _)| *group)
            .collect()
    }
}

/// Collection of controller records keyed by node id
#[derive(Debug, Default)]
pub struct ControllerStore {
    records: BTreeMap<NodeId, ControllerRecord>,
}

impl ControllerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, node_id: NodeId) -> bool {
        self.records.contains_key(&node_id)
    }

    pub fn get(&self, node_id: NodeId) -> Option<&ControllerRecord> {
        self.records.get(&node_id)
    }

    pub fn get_mut(&mut self, node_id: NodeId) -> Option<&mut ControllerRecord> {
        self.records.get_mut(&node_id)
    }

    pub fn insert(&mut self, record: ControllerRecord) {
        self.records.insert(record.node_id, record);
    }

    pub fn remove(&mut self, node_id: NodeId) -> Option<ControllerRecord> {
        self.records.remove(&node_id)
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.records.keys().copied().collect()
    }

    /// Every (controller, group) pair whose association list contains `load`
    ///
    /// Ordered by controller node id, then group.
    pub fn groups_containing(&self, load: NodeId) -> Vec<(NodeId, u8)> {
        self.records
            .values()
            .flat_map(|record| {
                record
                    .groups_containing(load)
                    .into_iter()
                    .map(move |group| (record.node_id, group))
            })
            .collect()
    }

    /// Every load node referenced by any controller
    pub fn all_loads(&self) -> BTreeSet<NodeId> {
        self.records
            .values()
            .flat_map(|record| record.associations.values().flatten().copied())
            .collect()
    }
}
