//! In-memory device registry
//!
//! A self-contained host used by the simulator CLI and by the engine tests.
//! It keeps virtual devices, node-level state and subscriptions behind a
//! single mutex, records every write the engine issues in a journal, and
//! offers host-side helpers to simulate hardware reports and user input.
//!
//! Callbacks are always invoked after the lock has been released.

use super::{
    DeviceRegistry, Event, Notification, NotificationFn, RegistryError, SubscriptionId, Topic,
};
use crate::config::{ControllerMatchConfig, SimulatedNodeKind, SimulationConfig};
use crate::engine::ids::IdScheme;
use crate::engine::types::{
    IndicatorMask, IndicatorReading, MetadataKey, NodeId, BUTTON_COUNT, DEVICE_TYPE_PROPERTY,
    LEVEL_PROPERTY, SWITCH_CONTROL_TYPE, SWITCH_MULTILEVEL_TYPE, TOGGLE_BUTTON_TYPE,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::{debug, trace};

/// Properties of a single virtual device
pub type DeviceProperties = BTreeMap<String, Value>;

/// Node-level state of a simulated physical device
#[derive(Debug, Clone, Default)]
pub struct NodeState {
    pub vendor: Option<String>,
    pub device_type: Option<String>,
    pub indicator: IndicatorReading,
    pub associations: BTreeMap<u8, Vec<NodeId>>,
    /// Multilevel level, `None` for nodes without one
    pub level: Option<u8>,
}

/// A write issued through the [`DeviceRegistry`] trait
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryWrite {
    Property {
        device: String,
        key: String,
        value: Value,
    },
    Indicator {
        node: NodeId,
        value: IndicatorMask,
    },
    IndicatorRequest {
        node: NodeId,
    },
    LevelQuery {
        node: NodeId,
    },
}

#[derive(Default)]
struct Inner {
    devices: BTreeMap<String, DeviceProperties>,
    nodes: BTreeMap<NodeId, NodeState>,
    subscriptions: BTreeMap<SubscriptionId, (Topic, NotificationFn)>,
    next_subscription: SubscriptionId,
    /// Last indicator update time handed out (wall clock, milliseconds)
    clock: u64,
    journal: Vec<RegistryWrite>,
}

impl Inner {
    /// Next update time, strictly after every earlier one
    fn tick(&mut self) -> u64 {
        let now = u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or_default();
        self.clock = now.max(self.clock + 1);
        self.clock
    }

    /// Collect the callbacks interested in `event`
    fn listeners(&self, event: &Event) -> Vec<(SubscriptionId, NotificationFn)> {
        self.subscriptions
            .iter()
            .filter(|(_, (topic, _))| match (topic, event) {
                (Topic::DeviceCreated, Event::DeviceCreated { .. }) => true,
                (Topic::DeviceRemoved, Event::DeviceRemoved { .. }) => true,
                (
                    Topic::Property { device, key },
                    Event::PropertyChanged {
                        device: changed,
                        key: changed_key,
                        ..
                    },
                ) => device == changed && key == changed_key,
                (Topic::Indicator { node }, Event::IndicatorChanged { node: changed, .. }) => {
                    node == changed
                }
                _ => false,
            })
            .map(|(id, (_, callback))| (*id, callback.clone()))
            .collect()
    }
}

/// In-memory [`DeviceRegistry`] implementation
pub struct InMemoryRegistry {
    name: String,
    scheme: IdScheme,
    inner: Mutex<Inner>,
}

impl InMemoryRegistry {
    pub fn new(name: impl Into<String>, scheme: IdScheme) -> Self {
        Self {
            name: name.into(),
            scheme,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Naming scheme used for the devices this registry creates
    pub fn scheme(&self) -> &IdScheme {
        &self.scheme
    }

    fn emit(&self, event: Event) {
        let listeners = self.inner.lock().listeners(&event);
        trace!(?event, listeners = listeners.len(), "Dispatching registry event");
        for (subscription, callback) in listeners {
            callback(Notification {
                subscription,
                event: event.clone(),
            });
        }
    }

    // =========================================================================
    // Host-side simulation
    // =========================================================================

    /// Register (or replace) the node-level state of a physical device
    pub fn insert_node(&self, node: NodeId, state: NodeState) {
        self.inner.lock().nodes.insert(node, state);
    }

    /// Populate the registry from a `simulation` config section
    pub fn seed(&self, controller: &ControllerMatchConfig, simulation: &SimulationConfig) {
        for node in &simulation.nodes {
            match node.kind {
                SimulatedNodeKind::SceneController => self.add_scene_controller(
                    node.node_id,
                    node.vendor.as_deref().unwrap_or(&controller.vendor),
                    node.device_type.as_deref().unwrap_or(&controller.device_type),
                    node.associations.clone(),
                ),
                SimulatedNodeKind::Dimmer => self.add_dimmer(node.node_id, node.level),
                SimulatedNodeKind::Switch => self.add_switch(node.node_id, node.level > 0),
            }
        }
        debug!(
            "Registry '{}': seeded {} nodes",
            self.name,
            simulation.nodes.len()
        );
    }

    /// Drop a node's state without touching its virtual devices
    pub fn forget_node(&self, node: NodeId) -> bool {
        self.inner.lock().nodes.remove(&node).is_some()
    }

    /// Create a virtual device and notify creation listeners
    pub fn add_device(&self, device: impl Into<String>, properties: DeviceProperties) {
        let device = device.into();
        debug!("Registry '{}': device created {}", self.name, device);
        self.inner.lock().devices.insert(device.clone(), properties);
        self.emit(Event::DeviceCreated { device });
    }

    /// Remove a virtual device and notify removal listeners
    pub fn remove_device(&self, device: &str) -> bool {
        let removed = self.inner.lock().devices.remove(device).is_some();
        if removed {
            debug!("Registry '{}': device removed {}", self.name, device);
            self.emit(Event::DeviceRemoved {
                device: device.to_string(),
            });
        }
        removed
    }

    /// Add a scene controller node with its button and generic event devices
    pub fn add_scene_controller(
        &self,
        node: NodeId,
        vendor: &str,
        device_type: &str,
        associations: BTreeMap<u8, Vec<NodeId>>,
    ) {
        self.insert_node(
            node,
            NodeState {
                vendor: Some(vendor.to_string()),
                device_type: Some(device_type.to_string()),
                associations,
                ..Default::default()
            },
        );

        for button in 1..=BUTTON_COUNT {
            let id = self.scheme.button_device(node, button).to_string();
            self.add_device(id, device_properties(TOGGLE_BUTTON_TYPE, json!("off")));
        }
        self.add_device(
            format!(
                "{}_{}_{}-0-0-1-B",
                self.scheme.family, self.scheme.controller_name, node
            ),
            device_properties(SWITCH_CONTROL_TYPE, json!("off")),
        );
    }

    /// Add a dimmable load node with its multilevel device
    pub fn add_dimmer(&self, node: NodeId, level: u8) {
        self.insert_node(
            node,
            NodeState {
                level: Some(level),
                ..Default::default()
            },
        );
        self.add_device(
            self.scheme.load_device(node),
            device_properties(SWITCH_MULTILEVEL_TYPE, json!(level)),
        );
    }

    /// Add an on/off load node (no multilevel level)
    pub fn add_switch(&self, node: NodeId, on: bool) {
        self.insert_node(node, NodeState::default());
        self.add_device(
            format!(
                "{}_{}_{}-0-37",
                self.scheme.family, self.scheme.controller_name, node
            ),
            device_properties("switchBinary", json!(if on { "on" } else { "off" })),
        );
    }

    /// Simulate a user action changing a device property
    ///
    /// Unlike [`DeviceRegistry::set_property`] this is not journaled.
    pub fn host_set_property(&self, device: &str, key: &str, value: Value) -> bool {
        {
            let mut inner = self.inner.lock();
            let Some(properties) = inner.devices.get_mut(device) else {
                return false;
            };
            properties.insert(key.to_string(), value.clone());
        }
        self.emit(Event::PropertyChanged {
            device: device.to_string(),
            key: key.to_string(),
            value,
        });
        true
    }

    /// Simulate a load reporting a new level
    pub fn set_load_level(&self, node: NodeId, level: u8) -> bool {
        {
            let mut inner = self.inner.lock();
            let Some(state) = inner.nodes.get_mut(&node) else {
                return false;
            };
            state.level = Some(level);
        }
        let device = self.scheme.load_device(node);
        self.host_set_property(&device, LEVEL_PROPERTY, json!(level));
        true
    }

    /// Simulate the node reporting its indicator register (fresh reading)
    pub fn report_indicator(&self, node: NodeId, value: IndicatorMask) -> Option<IndicatorReading> {
        let reading = {
            let mut inner = self.inner.lock();
            let update_time = inner.tick();
            let state = inner.nodes.get_mut(&node)?;
            state.indicator = IndicatorReading {
                value,
                update_time,
                invalidate_time: state.indicator.invalidate_time,
            };
            state.indicator
        };
        self.emit(Event::IndicatorChanged { node, reading });
        Some(reading)
    }

    /// Deliver an arbitrary indicator reading (stale or duplicate reports)
    pub fn report_indicator_reading(&self, node: NodeId, reading: IndicatorReading) -> bool {
        {
            let mut inner = self.inner.lock();
            let Some(state) = inner.nodes.get_mut(&node) else {
                return false;
            };
            state.indicator = reading;
            inner.clock = inner.clock.max(reading.update_time).max(reading.invalidate_time);
        }
        self.emit(Event::IndicatorChanged { node, reading });
        true
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Current value of a device property
    pub fn property(&self, device: &str, key: &str) -> Option<Value> {
        self.inner
            .lock()
            .devices
            .get(device)
            .and_then(|properties| properties.get(key).cloned())
    }

    /// Node-level state
    pub fn node(&self, node: NodeId) -> Option<NodeState> {
        self.inner.lock().nodes.get(&node).cloned()
    }

    /// Number of live subscriptions
    pub fn subscription_count(&self) -> usize {
        self.inner.lock().subscriptions.len()
    }

    /// Topics of all live subscriptions
    pub fn topics(&self) -> Vec<Topic> {
        self.inner
            .lock()
            .subscriptions
            .values()
            .map(|(topic, _)| topic.clone())
            .collect()
    }

    /// Writes issued through the trait so far
    pub fn journal(&self) -> Vec<RegistryWrite> {
        self.inner.lock().journal.clone()
    }

    /// Drain the journal
    pub fn take_journal(&self) -> Vec<RegistryWrite> {
        std::mem::take(&mut self.inner.lock().journal)
    }
}

/// Property map for a virtual device of `device_type` with a level
pub fn device_properties(device_type: &str, level: Value) -> DeviceProperties {
    let mut properties = DeviceProperties::new();
    properties.insert(DEVICE_TYPE_PROPERTY.to_string(), json!(device_type));
    properties.insert(LEVEL_PROPERTY.to_string(), level);
    properties
}

#[async_trait]
impl DeviceRegistry for InMemoryRegistry {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_devices(&self) -> Vec<String> {
        self.inner.lock().devices.keys().cloned().collect()
    }

    async fn get_property(&self, device: &str, key: &str) -> Option<Value> {
        self.property(device, key)
    }

    async fn set_property(
        &self,
        device: &str,
        key: &str,
        value: Value,
    ) -> Result<(), RegistryError> {
        {
            let mut inner = self.inner.lock();
            let properties = inner
                .devices
                .get_mut(device)
                .ok_or_else(|| RegistryError::UnknownDevice(device.to_string()))?;
            properties.insert(key.to_string(), value.clone());
            inner.journal.push(RegistryWrite::Property {
                device: device.to_string(),
                key: key.to_string(),
                value: value.clone(),
            });
        }
        self.emit(Event::PropertyChanged {
            device: device.to_string(),
            key: key.to_string(),
            value,
        });
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: Topic,
        callback: NotificationFn,
    ) -> Result<SubscriptionId, RegistryError> {
        let mut inner = self.inner.lock();
        inner.next_subscription += 1;
        let id = inner.next_subscription;
        trace!(id, ?topic, "Subscription added");
        inner.subscriptions.insert(id, (topic, callback));
        Ok(id)
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), RegistryError> {
        self.inner
            .lock()
            .subscriptions
            .remove(&id)
            .map(|_| ())
            .ok_or(RegistryError::UnknownSubscription(id))
    }

    async fn read_indicator(&self, node: NodeId) -> Result<IndicatorReading, RegistryError> {
        self.inner
            .lock()
            .nodes
            .get(&node)
            .map(|state| state.indicator)
            .ok_or(RegistryError::UnknownNode(node))
    }

    async fn write_indicator(
        &self,
        node: NodeId,
        value: IndicatorMask,
    ) -> Result<(), RegistryError> {
        let mut inner = self.inner.lock();
        let state = inner
            .nodes
            .get_mut(&node)
            .ok_or(RegistryError::UnknownNode(node))?;
        // Cached value only; the node confirms through a later report
        state.indicator.value = value;
        inner.journal.push(RegistryWrite::Indicator { node, value });
        Ok(())
    }

    async fn request_indicator(&self, node: NodeId) -> Result<(), RegistryError> {
        let reading = {
            let mut inner = self.inner.lock();
            if !inner.nodes.contains_key(&node) {
                return Err(RegistryError::UnknownNode(node));
            }
            inner.journal.push(RegistryWrite::IndicatorRequest { node });
            let update_time = inner.tick();
            let state = inner
                .nodes
                .get_mut(&node)
                .ok_or(RegistryError::UnknownNode(node))?;
            state.indicator.update_time = update_time;
            state.indicator
        };
        self.emit(Event::IndicatorChanged { node, reading });
        Ok(())
    }

    async fn read_association_group(
        &self,
        node: NodeId,
        group: u8,
    ) -> Result<Vec<NodeId>, RegistryError> {
        let inner = self.inner.lock();
        let state = inner.nodes.get(&node).ok_or(RegistryError::UnknownNode(node))?;
        Ok(state.associations.get(&group).cloned().unwrap_or_default())
    }

    async fn read_node_metadata(&self, node: NodeId, key: MetadataKey) -> Option<String> {
        let inner = self.inner.lock();
        let state = inner.nodes.get(&node)?;
        match key {
            MetadataKey::VendorString => state.vendor.clone(),
            MetadataKey::DeviceTypeString => state.device_type.clone(),
        }
    }

    async fn read_load_level(&self, node: NodeId) -> Option<u8> {
        self.inner.lock().nodes.get(&node).and_then(|state| state.level)
    }

    async fn query_load_level(&self, node: NodeId) -> Result<(), RegistryError> {
        let level = {
            let mut inner = self.inner.lock();
            let level = inner
                .nodes
                .get(&node)
                .ok_or(RegistryError::UnknownNode(node))?
                .level;
            inner.journal.push(RegistryWrite::LevelQuery { node });
            level
        };
        if let Some(level) = level {
            // The node answers with its current level
            let device = self.scheme.load_device(node);
            self.host_set_property(&device, LEVEL_PROPERTY, json!(level));
        }
        Ok(())
    }
}
