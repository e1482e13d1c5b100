//! Device registry adapter
//!
//! The registry is the host's view of the device world: it enumerates
//! virtual devices, exposes their semantic properties, delivers change
//! notifications, and gives low-level access to a physical node's indicator
//! register and association groups. The sync engine only talks to the host
//! through this trait.

pub mod memory;

use crate::engine::types::{IndicatorMask, IndicatorReading, MetadataKey, NodeId};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

pub use memory::InMemoryRegistry;

/// Identifier of a registered subscription
pub type SubscriptionId = u64;

/// Errors surfaced by a registry adapter
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("unknown node {0}")]
    UnknownNode(NodeId),

    #[error("unknown device '{0}'")]
    UnknownDevice(String),

    #[error("unknown subscription {0}")]
    UnknownSubscription(SubscriptionId),

    #[error("transport error: {0}")]
    Transport(String),
}

/// What a subscription listens to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Any virtual device created
    DeviceCreated,
    /// Any virtual device removed
    DeviceRemoved,
    /// A property of one virtual device changed
    Property { device: String, key: String },
    /// The indicator register of a node was updated
    Indicator { node: NodeId },
}

/// Payload of a notification
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    DeviceCreated { device: String },
    DeviceRemoved { device: String },
    PropertyChanged {
        device: String,
        key: String,
        value: Value,
    },
    IndicatorChanged {
        node: NodeId,
        reading: IndicatorReading,
    },
}

/// A notification delivered to a subscriber
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    /// Subscription that matched
    pub subscription: SubscriptionId,
    pub event: Event,
}

/// Callback invoked by the registry for each matching notification
///
/// Must not block: implementations forward into a channel.
pub type NotificationFn = Arc<dyn Fn(Notification) + Send + Sync>;

/// Host device registry
///
/// All methods take `&self`; adapters use interior mutability.
#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    /// Adapter name, used in logs
    fn name(&self) -> &str;

    /// Ids of every virtual device currently known to the host
    async fn list_devices(&self) -> Vec<String>;

    /// Read a device property; `None` if the device or key is unknown
    async fn get_property(&self, device: &str, key: &str) -> Option<Value>;

    /// Write a device property
    async fn set_property(&self, device: &str, key: &str, value: Value)
        -> Result<(), RegistryError>;

    /// Register a listener for `topic`
    async fn subscribe(
        &self,
        topic: Topic,
        callback: NotificationFn,
    ) -> Result<SubscriptionId, RegistryError>;

    /// Remove a listener
    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), RegistryError>;

    /// Current (cached) value of a node's indicator register
    async fn read_indicator(&self, node: NodeId) -> Result<IndicatorReading, RegistryError>;

    /// Write a node's indicator register
    async fn write_indicator(&self, node: NodeId, value: IndicatorMask)
        -> Result<(), RegistryError>;

    /// Ask the node to report its indicator register again
    async fn request_indicator(&self, node: NodeId) -> Result<(), RegistryError>;

    /// Ordered member list of one association group
    async fn read_association_group(
        &self,
        node: NodeId,
        group: u8,
    ) -> Result<Vec<NodeId>, RegistryError>;

    /// Node-level metadata string, `None` if absent
    async fn read_node_metadata(&self, node: NodeId, key: MetadataKey) -> Option<String>;

    /// Last known multilevel level of a node, `None` if it has none
    async fn read_load_level(&self, node: NodeId) -> Option<u8>;

    /// Ask a multilevel node to report its level again
    async fn query_load_level(&self, node: NodeId) -> Result<(), RegistryError>;
}
