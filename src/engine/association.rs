//! Association sync
//!
//! Derives each button's on/off state from the loads in its association
//! group. The first load in stored group order with a level above zero turns
//! the button on; an empty or all-dark group turns it off.

use super::bindings::BindingContext;
use super::types::{ButtonState, NodeId, BUTTON_COUNT, LEVEL_PROPERTY};
use crate::registry::Topic;
use std::collections::BTreeMap;
use tracing::{debug, trace, warn};

impl super::SyncEngine {
    /// Read association groups 1..=5 of a controller
    ///
    /// The controller itself and the gateway node are dropped from every
    /// list. A failed read leaves that group empty.
    pub(super) async fn load_associations(&self, controller: NodeId) -> BTreeMap<u8, Vec<NodeId>> {
        let gateway = self.config.host.gateway_node_id;
        let mut associations = BTreeMap::new();

        for group in 1..=BUTTON_COUNT {
            let members = match self
                .registry
                .read_association_group(controller, group)
                .await
            {
                Ok(members) => members
                    .into_iter()
                    .filter(|node| *node != controller && *node != gateway)
                    .collect(),
                Err(e) => {
                    warn!(
                        "Failed to read association group {} of node {}: {}",
                        group, controller, e
                    );
                    Vec::new()
                }
            };
            associations.insert(group, members);
        }

        associations
    }

    /// Subscribe to level changes of every load a controller references
    ///
    /// A load shared between groups or controllers is bound once.
    pub(super) async fn bind_loads(&mut self, controller: NodeId) {
        let Some(record) = self.store.get(controller) else {
            return;
        };

        let mut loads: Vec<NodeId> = record.associations.values().flatten().copied().collect();
        loads.sort_unstable();
        loads.dedup();

        for load in loads {
            if self.bindings.has_load(load) {
                continue;
            }
            let topic = Topic::Property {
                device: self.scheme.load_device(load),
                key: LEVEL_PROPERTY.to_string(),
            };
            self.bind(topic, BindingContext::LoadDevice { load }).await;
        }
    }

    /// A load's level changed: recompute every button whose group holds it
    pub(super) async fn on_load_level_changed(&mut self, load: NodeId) {
        let affected = self.store.groups_containing(load);
        if affected.is_empty() {
            trace!(load, "Level change for unreferenced load");
            return;
        }

        for (controller, group) in affected {
            let members = match self.store.get(controller) {
                Some(record) => record.group(group).to_vec(),
                None => continue,
            };

            // First member in stored order with a level decides
            let mut lit_by = None;
            for member in members {
                let level = self.registry.read_load_level(member).await.unwrap_or(0);
                if level > 0 {
                    lit_by = Some(member);
                    break;
                }
            }

            let state = if lit_by.is_some() {
                ButtonState::On
            } else {
                ButtonState::Off
            };
            debug!(controller, group, load, ?lit_by, %state, "Association state derived");
            self.force_button(controller, group, state).await;
        }
    }
}
