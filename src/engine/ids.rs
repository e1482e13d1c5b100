//! Typed virtual device identifiers
//!
//! Virtual device ids are composite strings built from underscore and hyphen
//! separated segments, e.g. `ZWayVDev_zway_Remote_14-0-0-2-S` for button 2 of
//! node 14, or `ZWayVDev_zway_21-0-38` for the multilevel device of node 21.

use super::types::{NodeId, BUTTON_COUNT};
use serde::{Deserialize, Serialize};

/// Segment marking a button device
const REMOTE_SEGMENT: &str = "Remote";

/// Naming scheme used by the host for virtual device ids
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdScheme {
    /// First segment of every virtual device id (e.g. "ZWayVDev")
    pub family: String,
    /// Name of the host controller instance (e.g. "zway")
    pub controller_name: String,
}

impl IdScheme {
    pub fn new(family: impl Into<String>, controller_name: impl Into<String>) -> Self {
        Self {
            family: family.into(),
            controller_name: controller_name.into(),
        }
    }

    /// Extract the physical node id from a virtual device id
    ///
    /// Returns `None` when the id does not belong to this family or the node
    /// segment is not numeric.
    pub fn node_id(&self, device_id: &str) -> Option<NodeId> {
        let segments: Vec<&str> = device_id.split('_').collect();
        if segments.len() < 2 || segments[0] != self.family {
            return None;
        }
        segments.last()?.split('-').next()?.parse().ok()
    }

    /// Id of the virtual device for `button` on controller `node_id`
    pub fn button_device(&self, node_id: NodeId, button: u8) -> ButtonDeviceId {
        ButtonDeviceId {
            family: self.family.clone(),
            controller_name: self.controller_name.clone(),
            node_id,
            button,
        }
    }

    /// Id of the multilevel virtual device of a load node
    pub fn load_device(&self, node_id: NodeId) -> String {
        format!("{}_{}_{}-0-38", self.family, self.controller_name, node_id)
    }
}

impl Default for IdScheme {
    fn default() -> Self {
        Self::new("ZWayVDev", "zway")
    }
}

/// Identifier of a virtual button device
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ButtonDeviceId {
    pub family: String,
    pub controller_name: String,
    pub node_id: NodeId,
    pub button: u8,
}

impl ButtonDeviceId {
    /// Parse `<family>_<controller>_Remote_<node>-0-0-<button>-S`
    ///
    /// Returns `None` for anything that does not match exactly, including
    /// button numbers outside 1..=5.
    pub fn parse(device_id: &str) -> Option<Self> {
        let mut segments = device_id.split('_');
        let family = segments.next()?;
        let controller_name = segments.next()?;
        if segments.next()? != REMOTE_SEGMENT {
            return None;
        }
        let tail = segments.next()?;
        if segments.next().is_some() || family.is_empty() || controller_name.is_empty() {
            return None;
        }

        let parts: Vec<&str> = tail.split('-').collect();
        let [node, "0", "0", button, "S"] = parts.as_slice() else {
            return None;
        };
        if button.len() != 1 {
            return None;
        }

        let node_id: NodeId = node.parse().ok()?;
        let button: u8 = button.parse().ok()?;
        if !(1..=BUTTON_COUNT).contains(&button) {
            return None;
        }

        Some(Self {
            family: family.to_string(),
            controller_name: controller_name.to_string(),
            node_id,
            button,
        })
    }
}

impl std::fmt::Display for ButtonDeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}_{}_{}_{}-0-0-{}-S",
            self.family, self.controller_name, REMOTE_SEGMENT, self.node_id, self.button
        )
    }
}
