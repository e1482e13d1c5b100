//! Configuration management for Scene Sync
//!
//! Handles loading, parsing, and hot-reloading of YAML configuration files.

pub mod watcher;

use crate::engine::ids::IdScheme;
use crate::engine::types::{NodeId, BUTTON_COUNT};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::fs;

pub use watcher::ConfigWatcher;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub controller: ControllerMatchConfig,
    #[serde(default)]
    pub host: HostConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub simulation: Option<SimulationConfig>,
}

/// Node metadata identifying a scene controller
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ControllerMatchConfig {
    #[serde(default = "default_vendor")]
    pub vendor: String,
    #[serde(default = "default_device_type")]
    pub device_type: String,
}

/// Host naming and addressing
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct HostConfig {
    /// First segment of virtual device ids
    #[serde(default = "default_family")]
    pub family: String,
    /// Host controller instance name
    #[serde(default = "default_controller_name")]
    pub controller_name: String,
    /// Node id of the gateway itself; never treated as an associated load
    #[serde(default = "default_gateway_node_id")]
    pub gateway_node_id: NodeId,
}

impl HostConfig {
    pub fn id_scheme(&self) -> IdScheme {
        IdScheme::new(self.family.clone(), self.controller_name.clone())
    }
}

/// Reconciliation tuning
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct SyncConfig {
    /// Delay before re-querying dimmers after a button turns on
    #[serde(default = "default_refresh_delay_ms")]
    pub refresh_delay_ms: u64,
    /// Release a controller's subscriptions when it is removed
    #[serde(default)]
    pub release_bindings_on_removal: bool,
}

/// Devices to seed the in-memory registry with
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct SimulationConfig {
    #[serde(default)]
    pub nodes: Vec<SimulatedNode>,
}

/// One simulated physical node
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct SimulatedNode {
    pub node_id: NodeId,
    pub kind: SimulatedNodeKind,
    /// Overrides `controller.vendor` for scene controllers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
    /// Overrides `controller.device_type` for scene controllers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_type: Option<String>,
    /// Association groups (scene controllers only)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub associations: BTreeMap<u8, Vec<NodeId>>,
    /// Initial level (dimmers) or on/off (switches, non-zero = on)
    #[serde(default)]
    pub level: u8,
}

/// Kind of simulated node
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SimulatedNodeKind {
    SceneController,
    Dimmer,
    Switch,
}

impl AppConfig {
    /// Load configuration from file with validation
    pub async fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config = Self::parse(&contents)
            .with_context(|| format!("Failed to parse YAML config: {}", path))?;

        Ok(config)
    }

    /// Parse and validate configuration from a YAML string
    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub async fn save(&self, path: &str) -> Result<()> {
        let yaml = serde_yaml::to_string(self).context("Failed to serialize config to YAML")?;

        fs::write(path, yaml)
            .await
            .with_context(|| format!("Failed to write config file: {}", path))?;

        Ok(())
    }

    /// Validate configuration for correctness and consistency
    pub fn validate(&self) -> Result<()> {
        if self.controller.vendor.is_empty() {
            anyhow::bail!("controller.vendor cannot be empty");
        }
        if self.controller.device_type.is_empty() {
            anyhow::bail!("controller.device_type cannot be empty");
        }

        for (field, value) in [
            ("host.family", &self.host.family),
            ("host.controller_name", &self.host.controller_name),
        ] {
            if value.is_empty() {
                anyhow::bail!("{} cannot be empty", field);
            }
            if value.contains('_') || value.contains('-') {
                anyhow::bail!("{} '{}' cannot contain '_' or '-'", field, value);
            }
        }

        if self.host.gateway_node_id == 0 {
            anyhow::bail!("host.gateway_node_id must be greater than 0");
        }

        if let Some(simulation) = &self.simulation {
            self.validate_simulation(simulation)
                .context("Invalid simulation section")?;
        }

        Ok(())
    }

    fn validate_simulation(&self, simulation: &SimulationConfig) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for node in &simulation.nodes {
            if node.node_id == 0 {
                anyhow::bail!("Node id 0 is not addressable");
            }
            if !seen.insert(node.node_id) {
                anyhow::bail!("Node {} is defined more than once", node.node_id);
            }

            if node.kind != SimulatedNodeKind::SceneController && !node.associations.is_empty() {
                anyhow::bail!(
                    "Node {} has associations but is not a scene controller",
                    node.node_id
                );
            }

            for group in node.associations.keys() {
                if !(1..=BUTTON_COUNT).contains(group) {
                    anyhow::bail!(
                        "Node {} has association group {} (must be 1-{})",
                        node.node_id,
                        group,
                        BUTTON_COUNT
                    );
                }
            }

            if node.kind == SimulatedNodeKind::Dimmer && node.level > 99 {
                anyhow::bail!(
                    "Dimmer {} has level {} (must be 0-99)",
                    node.node_id,
                    node.level
                );
            }
        }
        Ok(())
    }
}

impl Default for ControllerMatchConfig {
    fn default() -> Self {
        Self {
            vendor: default_vendor(),
            device_type: default_device_type(),
        }
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            family: default_family(),
            controller_name: default_controller_name(),
            gateway_node_id: default_gateway_node_id(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            refresh_delay_ms: default_refresh_delay_ms(),
            release_bindings_on_removal: false,
        }
    }
}

// Default value functions
fn default_vendor() -> String { "Cooper".to_string() }
fn default_device_type() -> String { "Static Scene Controller".to_string() }
fn default_family() -> String { "ZWayVDev".to_string() }
fn default_controller_name() -> String { "zway".to_string() }
fn default_gateway_node_id() -> NodeId { 1 }
fn default_refresh_delay_ms() -> u64 { 2000 }
