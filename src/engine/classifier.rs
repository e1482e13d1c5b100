//! Identity classifier
//!
//! Decides whether a virtual device belongs to a scene controller node by
//! looking at the node-level vendor and device-type metadata.

use super::ids::IdScheme;
use super::types::{MetadataKey, NodeId};
use crate::config::ControllerMatchConfig;
use crate::registry::DeviceRegistry;
use tracing::debug;

/// Matches devices against the configured controller vendor and type
#[derive(Debug, Clone)]
pub struct IdentityClassifier {
    scheme: IdScheme,
    vendor: String,
    device_type: String,
}

impl IdentityClassifier {
    pub fn new(scheme: IdScheme, config: &ControllerMatchConfig) -> Self {
        Self {
            scheme,
            vendor: config.vendor.clone(),
            device_type: config.device_type.clone(),
        }
    }

    /// Node id of the scene controller `device` belongs to, if any
    ///
    /// Unparseable ids and missing metadata simply fail the match.
    pub async fn classify(&self, registry: &dyn DeviceRegistry, device: &str) -> Option<NodeId> {
        let node = self.scheme.node_id(device)?;

        let vendor = registry
            .read_node_metadata(node, MetadataKey::VendorString)
            .await
            .unwrap_or_default();
        if vendor != self.vendor {
            return None;
        }

        let device_type = registry
            .read_node_metadata(node, MetadataKey::DeviceTypeString)
            .await
            .unwrap_or_default();
        if device_type != self.device_type {
            return None;
        }

        debug!("Found {} controller: node {} ({})", self.vendor, node, device);
        Some(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::memory::NodeState;
    use crate::registry::InMemoryRegistry;
    use std::collections::BTreeMap;

    fn classifier() -> IdentityClassifier {
        IdentityClassifier::new(IdScheme::default(), &ControllerMatchConfig::default())
    }

    #[tokio::test]
    async fn test_matches_vendor_and_type() {
        let registry = InMemoryRegistry::new("test", IdScheme::default());
        registry.add_scene_controller(14, "Cooper", "Static Scene Controller", BTreeMap::new());

        let classifier = classifier();
        assert_eq!(
            classifier
                .classify(&registry, "ZWayVDev_zway_Remote_14-0-0-3-S")
                .await,
            Some(14)
        );
        assert_eq!(
            classifier.classify(&registry, "ZWayVDev_zway_14-0-0-1-B").await,
            Some(14)
        );
    }

    #[tokio::test]
    async fn test_rejects_other_vendors_and_types() {
        let registry = InMemoryRegistry::new("test", IdScheme::default());
        registry.add_scene_controller(14, "Leviton", "Static Scene Controller", BTreeMap::new());
        registry.add_scene_controller(15, "Cooper", "Multilevel Switch", BTreeMap::new());
        registry.add_dimmer(21, 0);

        let classifier = classifier();
        for device in [
            "ZWayVDev_zway_Remote_14-0-0-1-S",
            "ZWayVDev_zway_Remote_15-0-0-1-S",
            "ZWayVDev_zway_21-0-38",
        ] {
            assert_eq!(classifier.classify(&registry, device).await, None, "{}", device);
        }
    }

    #[tokio::test]
    async fn test_missing_metadata_and_bad_ids_fail() {
        let registry = InMemoryRegistry::new("test", IdScheme::default());
        registry.insert_node(
            30,
            NodeState {
                vendor: Some("Cooper".to_string()),
                device_type: None,
                ..Default::default()
            },
        );

        let classifier = classifier();
        assert_eq!(classifier.classify(&registry, "ZWayVDev_zway_30-0-37").await, None);
        assert_eq!(classifier.classify(&registry, "ZWayVDev_zway_99-0-37").await, None);
        assert_eq!(classifier.classify(&registry, "DummyDevice_bn_5").await, None);
        assert_eq!(classifier.classify(&registry, "not-a-device").await, None);
    }
}
