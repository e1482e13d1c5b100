//! Tests for the sync engine, driven step by step against the in-memory registry

use super::types::{IndicatorMask, IndicatorReading};
use super::*;
use crate::registry::memory::RegistryWrite;
use crate::registry::InMemoryRegistry;
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::timeout;

const VENDOR: &str = "Cooper";
const DEVICE_TYPE: &str = "Static Scene Controller";

struct Harness {
    registry: Arc<InMemoryRegistry>,
    engine: SyncEngine,
    rx: mpsc::UnboundedReceiver<EngineCommand>,
}

impl Harness {
    fn new(config: AppConfig) -> Self {
        let registry = Arc::new(InMemoryRegistry::new("test", config.host.id_scheme()));
        let (engine, rx) = SyncEngine::new(config, registry.clone());
        Self {
            registry,
            engine,
            rx,
        }
    }

    fn with_refresh_delay(refresh_delay_ms: u64) -> Self {
        let mut config = AppConfig::default();
        config.sync.refresh_delay_ms = refresh_delay_ms;
        Self::new(config)
    }

    /// Process commands until the channel stays quiet
    async fn settle(&mut self) {
        while let Ok(Some(cmd)) = timeout(Duration::from_millis(50), self.rx.recv()).await {
            self.engine.handle(cmd).await;
        }
    }

    async fn start(&mut self) {
        let (tx, rx) = oneshot::channel();
        self.engine.handle(EngineCommand::Start { response: tx }).await;
        rx.await.unwrap().unwrap();
        self.settle().await;
    }

    async fn stop(&mut self) -> usize {
        let (tx, rx) = oneshot::channel();
        assert!(!self.engine.handle(EngineCommand::Stop { response: tx }).await);
        rx.await.unwrap()
    }

    fn button(&self, node: NodeId, button: u8) -> String {
        self.registry.scheme().button_device(node, button).to_string()
    }

    fn button_level(&self, node: NodeId, button: u8) -> Option<serde_json::Value> {
        self.registry.property(&self.button(node, button), LEVEL_PROPERTY)
    }

    fn press(&self, node: NodeId, button: u8, state: &str) {
        let device = self.button(node, button);
        assert!(self
            .registry
            .host_set_property(&device, LEVEL_PROPERTY, json!(state)));
    }

    fn desired(&self, node: NodeId) -> u8 {
        self.engine.store.get(node).unwrap().desired_indicator.bits()
    }

    fn indicator_writes(&self) -> Vec<u8> {
        self.registry
            .journal()
            .into_iter()
            .filter_map(|write| match write {
                RegistryWrite::Indicator { value, .. } => Some(value.bits()),
                _ => None,
            })
            .collect()
    }

    fn level_queries(&self) -> Vec<NodeId> {
        self.registry
            .journal()
            .into_iter()
            .filter_map(|write| match write {
                RegistryWrite::LevelQuery { node } => Some(node),
                _ => None,
            })
            .collect()
    }
}

fn groups(entries: &[(u8, &[NodeId])]) -> BTreeMap<u8, Vec<NodeId>> {
    entries
        .iter()
        .map(|(group, members)| (*group, members.to_vec()))
        .collect()
}

#[tokio::test]
async fn test_replay_sets_up_existing_controller() {
    let mut h = Harness::with_refresh_delay(0);
    h.registry
        .add_scene_controller(14, VENDOR, DEVICE_TYPE, groups(&[(2, &[21, 22])]));
    h.registry.add_dimmer(21, 0);
    h.registry.add_dimmer(22, 0);

    h.start().await;

    let record = h.engine.store.get(14).unwrap();
    assert_eq!(record.group(2), &[21, 22]);
    assert!(record.group(1).is_empty());
    assert_eq!(record.devices.len(), 6);
    assert!(record.indicator_update_time > 0);

    // creation/removal + indicator + 6 own devices + 2 loads
    assert_eq!(h.engine.bindings.len(), 11);
    assert_eq!(h.registry.subscription_count(), 11);
    assert!(h
        .registry
        .journal()
        .contains(&RegistryWrite::IndicatorRequest { node: 14 }));
}

#[tokio::test]
async fn test_live_creation_and_non_controllers() {
    let mut h = Harness::with_refresh_delay(0);
    h.start().await;
    assert!(h.engine.store.is_empty());

    h.registry
        .add_scene_controller(15, "Leviton", DEVICE_TYPE, BTreeMap::new());
    h.registry.add_dimmer(21, 10);
    h.settle().await;
    assert!(h.engine.store.is_empty());
    assert_eq!(h.engine.bindings.len(), 2);

    h.registry
        .add_scene_controller(14, VENDOR, DEVICE_TYPE, BTreeMap::new());
    h.settle().await;
    assert_eq!(h.engine.store.node_ids(), vec![14]);
    assert!(h.engine.bindings.has_indicator(14));
}

#[tokio::test]
async fn test_setup_is_idempotent() {
    let mut h = Harness::with_refresh_delay(0);
    h.registry
        .add_scene_controller(14, VENDOR, DEVICE_TYPE, groups(&[(1, &[21]), (3, &[21])]));
    h.registry.add_dimmer(21, 0);
    h.start().await;
    let bindings = h.engine.bindings.len();

    // Replaying the same devices changes nothing
    for device in h.registry.list_devices().await {
        h.engine.on_device_created(&device).await;
    }
    h.settle().await;

    assert_eq!(h.engine.bindings.len(), bindings);
    assert_eq!(h.engine.store.len(), 1);
    assert_eq!(
        h.registry
            .journal()
            .iter()
            .filter(|write| matches!(write, RegistryWrite::IndicatorRequest { .. }))
            .count(),
        1
    );
}

#[tokio::test]
async fn test_gateway_and_self_excluded_from_groups() {
    let mut h = Harness::with_refresh_delay(0);
    h.registry
        .add_scene_controller(14, VENDOR, DEVICE_TYPE, groups(&[(1, &[1, 14, 21, 1])]));
    h.start().await;

    assert_eq!(h.engine.store.get(14).unwrap().group(1), &[21]);
}

#[tokio::test]
async fn test_zero_bitmask_forces_all_buttons_off() {
    let mut h = Harness::with_refresh_delay(0);
    h.registry
        .add_scene_controller(14, VENDOR, DEVICE_TYPE, BTreeMap::new());
    for button in 1..=5 {
        h.press(14, button, "on");
    }
    h.registry.report_indicator(14, IndicatorMask::new(0b11111));
    h.start().await;
    assert_eq!(h.desired(14), 0b11111);

    h.registry.report_indicator(14, IndicatorMask::new(0));
    h.settle().await;

    for button in 1..=5 {
        assert_eq!(h.button_level(14, button), Some(json!("off")), "button {}", button);
    }
    // Each forced off is echoed back and clears its bit
    assert_eq!(h.desired(14), 0);
}

#[tokio::test]
async fn test_lit_bits_never_turn_buttons_on() {
    let mut h = Harness::with_refresh_delay(0);
    h.registry
        .add_scene_controller(14, VENDOR, DEVICE_TYPE, BTreeMap::new());
    h.start().await;
    h.registry.take_journal();

    h.registry.report_indicator(14, IndicatorMask::new(0b10101));
    h.settle().await;

    for button in 1..=5 {
        assert_eq!(h.button_level(14, button), Some(json!("off")));
    }
    assert!(h.registry.journal().is_empty());
}

#[tokio::test]
async fn test_button_on_writes_single_bit() {
    let mut h = Harness::with_refresh_delay(0);
    h.registry
        .add_scene_controller(14, VENDOR, DEVICE_TYPE, BTreeMap::new());
    h.registry.report_indicator(14, IndicatorMask::new(0b00001));
    h.start().await;

    h.press(14, 4, "on");
    h.settle().await;
    assert_eq!(h.desired(14), 0b01001);

    h.press(14, 4, "off");
    h.settle().await;
    assert_eq!(h.desired(14), 0b00001);
    assert_eq!(h.indicator_writes(), vec![0b01001, 0b00001]);
}

#[tokio::test]
async fn test_button_on_with_bit_already_set_is_noop() {
    let mut h = Harness::with_refresh_delay(0);
    h.registry
        .add_scene_controller(14, VENDOR, DEVICE_TYPE, groups(&[(3, &[21])]));
    h.registry.add_dimmer(21, 0);
    h.registry.report_indicator(14, IndicatorMask::new(0b00100));
    h.start().await;
    h.registry.take_journal();

    h.press(14, 3, "on");
    h.settle().await;

    assert!(h.indicator_writes().is_empty());
    assert!(h.level_queries().is_empty());
    assert_eq!(h.desired(14), 0b00100);
}

#[tokio::test]
async fn test_failed_write_keeps_desired_mask() {
    let mut h = Harness::with_refresh_delay(0);
    h.registry
        .add_scene_controller(14, VENDOR, DEVICE_TYPE, BTreeMap::new());
    h.start().await;

    // Node drops off the network while its devices remain
    assert!(h.registry.forget_node(14));
    h.press(14, 2, "on");
    h.settle().await;

    assert_eq!(h.desired(14), 0);
    assert!(h.indicator_writes().is_empty());
    assert!(h.level_queries().is_empty());
}

#[tokio::test]
async fn test_stale_and_duplicate_reports_ignored() {
    let mut h = Harness::with_refresh_delay(0);
    h.registry
        .add_scene_controller(14, VENDOR, DEVICE_TYPE, BTreeMap::new());
    h.start().await;

    h.press(14, 1, "on");
    h.settle().await;
    assert_eq!(h.desired(14), 0b00001);

    let last = h.engine.store.get(14).unwrap().indicator_update_time;

    // Same update time as already processed
    h.registry.report_indicator_reading(
        14,
        IndicatorReading {
            value: IndicatorMask::new(0),
            update_time: last,
            invalidate_time: 0,
        },
    );
    h.settle().await;
    assert_eq!(h.button_level(14, 1), Some(json!("on")));

    // Newer, but invalidated by a later read
    h.registry.report_indicator_reading(
        14,
        IndicatorReading {
            value: IndicatorMask::new(0),
            update_time: last + 5,
            invalidate_time: last + 6,
        },
    );
    h.settle().await;
    assert_eq!(h.button_level(14, 1), Some(json!("on")));
    assert_eq!(h.engine.store.get(14).unwrap().indicator_update_time, last);

    // Fresh report goes through
    h.registry.report_indicator_reading(
        14,
        IndicatorReading {
            value: IndicatorMask::new(0),
            update_time: last + 10,
            invalidate_time: last + 6,
        },
    );
    h.settle().await;
    assert_eq!(h.button_level(14, 1), Some(json!("off")));
    assert_eq!(
        h.engine.store.get(14).unwrap().indicator_update_time,
        last + 10
    );
}

#[tokio::test]
async fn test_switch_control_requests_indicator() {
    let mut h = Harness::with_refresh_delay(0);
    h.registry
        .add_scene_controller(14, VENDOR, DEVICE_TYPE, BTreeMap::new());
    h.press(14, 2, "on");
    h.registry.report_indicator(14, IndicatorMask::new(0b00010));
    h.start().await;
    h.registry.take_journal();

    assert!(h
        .registry
        .host_set_property("ZWayVDev_zway_14-0-0-1-B", LEVEL_PROPERTY, json!("off")));
    h.settle().await;

    assert!(h
        .registry
        .journal()
        .contains(&RegistryWrite::IndicatorRequest { node: 14 }));
    // Register still has the bit lit
    assert_eq!(h.button_level(14, 2), Some(json!("on")));
}

#[tokio::test]
async fn test_load_level_drives_button() {
    let mut h = Harness::with_refresh_delay(0);
    h.registry
        .add_scene_controller(14, VENDOR, DEVICE_TYPE, groups(&[(2, &[21, 22])]));
    h.registry.add_dimmer(21, 0);
    h.registry.add_dimmer(22, 0);
    h.start().await;

    h.registry.set_load_level(22, 50);
    h.settle().await;

    assert_eq!(h.button_level(14, 2), Some(json!("on")));
    assert_eq!(h.desired(14), 0b00010);

    h.registry.set_load_level(22, 0);
    h.settle().await;

    assert_eq!(h.button_level(14, 2), Some(json!("off")));
    assert_eq!(h.desired(14), 0);

    // Any level above zero counts as on
    h.registry.set_load_level(21, 1);
    h.settle().await;

    assert_eq!(h.button_level(14, 2), Some(json!("on")));
    assert_eq!(h.desired(14), 0b00010);
}

#[tokio::test]
async fn test_first_lit_member_wins_across_controllers() {
    let mut h = Harness::with_refresh_delay(0);
    h.registry.add_scene_controller(
        14,
        VENDOR,
        DEVICE_TYPE,
        groups(&[(1, &[23, 21]), (4, &[21])]),
    );
    h.registry
        .add_scene_controller(15, VENDOR, DEVICE_TYPE, groups(&[(5, &[22, 21])]));
    h.registry.add_switch(23, true);
    h.registry.add_dimmer(21, 0);
    h.registry.add_dimmer(22, 0);
    h.start().await;

    // 23 has no level and never counts as lit
    h.registry.set_load_level(21, 30);
    h.settle().await;

    assert_eq!(h.button_level(14, 1), Some(json!("on")));
    assert_eq!(h.button_level(14, 4), Some(json!("on")));
    assert_eq!(h.button_level(15, 5), Some(json!("on")));
    assert_eq!(h.button_level(14, 2), Some(json!("off")));

    h.registry.set_load_level(22, 60);
    h.registry.set_load_level(21, 0);
    h.settle().await;

    assert_eq!(h.button_level(14, 1), Some(json!("off")));
    assert_eq!(h.button_level(14, 4), Some(json!("off")));
    assert_eq!(h.button_level(15, 5), Some(json!("on")));
}

#[tokio::test]
async fn test_refresh_queries_only_dimmers() {
    let mut h = Harness::with_refresh_delay(0);
    h.registry
        .add_scene_controller(14, VENDOR, DEVICE_TYPE, groups(&[(1, &[21, 23, 22])]));
    h.registry.add_dimmer(21, 40);
    h.registry.add_switch(23, false);
    h.registry.add_dimmer(22, 0);
    h.start().await;
    h.registry.take_journal();

    h.press(14, 1, "on");
    h.settle().await;

    assert_eq!(h.level_queries(), vec![21, 22]);
}

#[tokio::test]
async fn test_refresh_waits_for_delay() {
    let mut h = Harness::with_refresh_delay(60_000);
    h.registry
        .add_scene_controller(14, VENDOR, DEVICE_TYPE, groups(&[(1, &[21])]));
    h.registry.add_dimmer(21, 0);
    h.start().await;
    h.registry.take_journal();

    h.press(14, 1, "on");
    h.settle().await;

    assert_eq!(h.indicator_writes(), vec![0b00001]);
    assert!(h.level_queries().is_empty());

    // Turning off never schedules a refresh
    let mut h = Harness::with_refresh_delay(0);
    h.registry
        .add_scene_controller(14, VENDOR, DEVICE_TYPE, groups(&[(1, &[21])]));
    h.registry.add_dimmer(21, 0);
    h.registry.report_indicator(14, IndicatorMask::new(0b00001));
    h.press(14, 1, "on");
    h.start().await;
    h.registry.take_journal();

    h.press(14, 1, "off");
    h.settle().await;
    assert_eq!(h.indicator_writes(), vec![0]);
    assert!(h.level_queries().is_empty());
}

#[tokio::test]
async fn test_removal_keeps_bindings_by_default() {
    let mut h = Harness::with_refresh_delay(0);
    h.registry
        .add_scene_controller(14, VENDOR, DEVICE_TYPE, groups(&[(1, &[21])]));
    h.registry.add_dimmer(21, 0);
    h.start().await;
    let subscriptions = h.registry.subscription_count();

    h.registry.take_journal();

    // One removal for the node is enough to drop the record
    h.registry.remove_device(&h.button(14, 1));
    h.settle().await;

    assert!(!h.engine.store.contains(14));
    assert_eq!(h.registry.subscription_count(), subscriptions);

    // Remaining devices still notify, but nothing is written to the node
    h.press(14, 2, "on");
    h.registry.set_load_level(21, 40);
    h.registry.report_indicator(14, IndicatorMask::new(0));
    h.settle().await;

    assert!(h.indicator_writes().is_empty());
    assert!(h.level_queries().is_empty());
    assert!(h.registry.journal().iter().all(|write| !matches!(
        write,
        RegistryWrite::Property { .. }
    )));
    assert_eq!(h.button_level(14, 2), Some(json!("on")));
}

#[tokio::test]
async fn test_removal_releases_bindings_when_configured() {
    let mut config = AppConfig::default();
    config.sync.refresh_delay_ms = 0;
    config.sync.release_bindings_on_removal = true;
    let mut h = Harness::new(config);
    h.registry
        .add_scene_controller(14, VENDOR, DEVICE_TYPE, groups(&[(1, &[21, 22])]));
    h.registry
        .add_scene_controller(15, VENDOR, DEVICE_TYPE, groups(&[(2, &[22])]));
    h.registry.add_dimmer(21, 0);
    h.registry.add_dimmer(22, 0);
    h.start().await;
    // 2 lifecycle + 2 * (indicator + 6 devices) + 2 loads
    assert_eq!(h.registry.subscription_count(), 18);

    h.registry.remove_device(&h.button(14, 1));
    h.settle().await;

    assert!(!h.engine.store.contains(14));
    assert!(!h.engine.bindings.has_indicator(14));
    assert!(!h.engine.bindings.has_device(&h.button(14, 3)));
    assert!(!h.engine.bindings.has_load(21));
    assert!(h.engine.bindings.has_load(22));
    // 2 lifecycle + 7 for node 15 + load 22
    assert_eq!(h.registry.subscription_count(), 10);
    assert_eq!(h.engine.bindings.len(), 10);
}

#[tokio::test]
async fn test_stop_releases_every_subscription() {
    let mut h = Harness::with_refresh_delay(0);
    h.registry
        .add_scene_controller(14, VENDOR, DEVICE_TYPE, groups(&[(1, &[21]), (2, &[22])]));
    h.registry.add_dimmer(21, 0);
    h.registry.add_dimmer(22, 0);
    h.start().await;
    let subscriptions = h.registry.subscription_count();

    assert_eq!(h.stop().await, subscriptions);
    assert_eq!(h.registry.subscription_count(), 0);
    assert!(h.engine.bindings.is_empty());
    assert!(h.engine.store.is_empty());
}

#[tokio::test]
async fn test_update_config_changes_matching() {
    let mut h = Harness::with_refresh_delay(0);
    h.registry
        .add_scene_controller(15, "Leviton", "Scene Keypad", BTreeMap::new());
    h.start().await;
    assert!(h.engine.store.is_empty());

    let mut config = AppConfig::default();
    config.controller.vendor = "Leviton".to_string();
    config.controller.device_type = "Scene Keypad".to_string();
    config.host.family = "Other".to_string();
    h.engine.handle(EngineCommand::UpdateConfig(Box::new(config))).await;

    // Naming is kept, matching is not
    assert_eq!(h.engine.scheme, IdScheme::default());
    let device = h.button(15, 1);
    h.engine.on_device_created(&device).await;
    h.settle().await;
    assert!(h.engine.store.contains(15));
}

#[tokio::test]
async fn test_update_config_keeps_gateway() {
    let mut h = Harness::with_refresh_delay(0);
    h.registry
        .add_scene_controller(14, VENDOR, DEVICE_TYPE, groups(&[(1, &[1, 21]), (2, &[7])]));
    h.start().await;

    let mut config = AppConfig::default();
    config.host.gateway_node_id = 7;
    config.sync.refresh_delay_ms = 250;
    h.engine.handle(EngineCommand::UpdateConfig(Box::new(config))).await;

    assert_eq!(h.engine.config.host.gateway_node_id, 1);
    assert_eq!(h.engine.config.sync.refresh_delay_ms, 250);

    // Controllers set up after the reload are filtered the same way
    h.registry
        .add_scene_controller(15, VENDOR, DEVICE_TYPE, groups(&[(1, &[1, 21]), (2, &[7])]));
    h.settle().await;

    for node in [14, 15] {
        let record = h.engine.store.get(node).unwrap();
        assert_eq!(record.group(1), &[21]);
        assert_eq!(record.group(2), &[7]);
    }
}

#[tokio::test]
async fn test_handle_spawn_start_stop() {
    let registry = Arc::new(InMemoryRegistry::new("test", IdScheme::default()));
    registry.add_scene_controller(14, VENDOR, DEVICE_TYPE, groups(&[(3, &[21])]));
    registry.add_dimmer(21, 20);

    let handle = SyncEngine::spawn(AppConfig::default(), registry.clone());
    handle.start().await.unwrap();
    assert!(handle.is_running());

    let record = handle.controller(14).await.unwrap();
    assert_eq!(record.group(3), &[21]);
    assert_eq!(handle.controllers().await.len(), 1);
    assert!(handle.controller(99).await.is_none());

    let bindings = handle.binding_count().await;
    assert_eq!(bindings, registry.subscription_count());

    assert_eq!(handle.stop().await.unwrap(), bindings);
    assert_eq!(registry.subscription_count(), 0);
    assert!(handle.controllers().await.is_empty());
    assert!(handle.stop().await.is_err());
}
