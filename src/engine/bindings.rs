//! Subscription bookkeeping
//!
//! Every subscription the engine registers is recorded here together with an
//! explicit context describing what it is bound to. Handlers receive the
//! context rather than capturing state, and teardown walks this table.

use super::types::NodeId;
use crate::registry::SubscriptionId;
use std::collections::{BTreeMap, BTreeSet};

/// What a subscription is bound to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindingContext {
    /// Device creation notifications
    DeviceCreated,
    /// Device removal notifications
    DeviceRemoved,
    /// Level changes of one of a controller's own virtual devices
    ControllerDevice { controller: NodeId, device: String },
    /// Indicator register updates of a controller
    Indicator { controller: NodeId },
    /// Level changes of an associated load
    LoadDevice { load: NodeId },
}

/// Table of live subscriptions
#[derive(Debug, Default)]
pub struct BindingTable {
    contexts: BTreeMap<SubscriptionId, BindingContext>,
    indicators: BTreeMap<NodeId, SubscriptionId>,
    devices: BTreeMap<String, SubscriptionId>,
    loads: BTreeMap<NodeId, SubscriptionId>,
    lifecycle: Vec<SubscriptionId>,
}

impl BindingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a subscription
    pub fn insert(&mut self, id: SubscriptionId, context: BindingContext) {
        match &context {
            BindingContext::DeviceCreated | BindingContext::DeviceRemoved => {
                self.lifecycle.push(id)
            }
            BindingContext::ControllerDevice { device, .. } => {
                self.devices.insert(device.clone(), id);
            }
            BindingContext::Indicator { controller } => {
                self.indicators.insert(*controller, id);
            }
            BindingContext::LoadDevice { load } => {
                self.loads.insert(*load, id);
            }
        }
        self.contexts.insert(id, context);
    }

    /// Forget a subscription, returning its context
    pub fn remove(&mut self, id: SubscriptionId) -> Option<BindingContext> {
        let context = self.contexts.remove(&id)?;
        match &context {
            BindingContext::DeviceCreated | BindingContext::DeviceRemoved => {
                self.lifecycle.retain(|existing| *existing != id)
            }
            BindingContext::ControllerDevice { device, .. } => {
                self.devices.remove(device);
            }
            BindingContext::Indicator { controller } => {
                self.indicators.remove(controller);
            }
            BindingContext::LoadDevice { load } => {
                self.loads.remove(load);
            }
        }
        Some(context)
    }

    pub fn context(&self, id: SubscriptionId) -> Option<&BindingContext> {
        self.contexts.get(&id)
    }

    pub fn has_indicator(&self, controller: NodeId) -> bool {
        self.indicators.contains_key(&controller)
    }

    pub fn has_device(&self, device: &str) -> bool {
        self.devices.contains_key(device)
    }

    pub fn has_load(&self, load: NodeId) -> bool {
        self.loads.contains_key(&load)
    }

    pub fn is_started(&self) -> bool {
        !self.lifecycle.is_empty()
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    /// Subscriptions tied to one controller (indicator and own devices)
    pub fn controller_bindings(&self, controller: NodeId) -> Vec<SubscriptionId> {
        self.contexts
            .iter()
            .filter(|(_, context)| match context {
                BindingContext::Indicator { controller: node }
                | BindingContext::ControllerDevice {
                    controller: node, ..
                } => *node == controller,
                _ => false,
            })
            .map(|(id, _)| *id)
            .collect()
    }

    /// Load subscriptions whose load is not in `referenced`
    pub fn orphaned_loads(&self, referenced: &BTreeSet<NodeId>) -> Vec<SubscriptionId> {
        self.loads
            .iter()
            .filter(|(load, _)| !referenced.contains(load))
            .map(|(_, id)| *id)
            .collect()
    }

    /// Every subscription in teardown order: indicators, controller devices,
    /// loads, then creation/removal
    pub fn teardown_order(&self) -> Vec<SubscriptionId> {
        self.indicators
            .values()
            .chain(self.devices.values())
            .chain(self.loads.values())
            .chain(self.lifecycle.iter())
            .copied()
            .collect()
    }
}
