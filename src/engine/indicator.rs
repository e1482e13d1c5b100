//! Indicator reconciliation
//!
//! Keeps the controller's indicator register and its virtual button devices
//! consistent in both directions:
//!
//! - **Button → indicator**: a button device changing state flips exactly
//!   one bit of the engine's desired bitmask and writes it to the register.
//!   A transition that does not change the bit writes nothing, which is what
//!   stops the echo of our own device writes.
//! - **Indicator → buttons**: a fresh register report forces every button
//!   whose bit is clear to "off". Lit bits never turn buttons on; the LED is
//!   a status lamp, not an input.

use super::types::{
    ButtonState, IndicatorReading, NodeId, DEVICE_TYPE_PROPERTY, SWITCH_CONTROL_TYPE,
    SWITCH_MULTILEVEL_TYPE, TOGGLE_BUTTON_TYPE,
};
use super::{ids::ButtonDeviceId, EngineCommand};
use serde_json::Value;
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, trace, warn};

impl super::SyncEngine {
    /// Level change on one of a controller's own virtual devices
    pub(super) async fn on_controller_device_changed(
        &mut self,
        controller: NodeId,
        device: &str,
        value: &Value,
    ) {
        if !self.store.contains(controller) {
            trace!(controller, "Change for removed controller ignored");
            return;
        }

        let device_type = self
            .registry
            .get_property(device, DEVICE_TYPE_PROPERTY)
            .await;

        match device_type.as_ref().and_then(Value::as_str) {
            Some(TOGGLE_BUTTON_TYPE) => {
                let Some(id) = ButtonDeviceId::parse(device).filter(|id| id.node_id == controller)
                else {
                    debug!("Ignoring change on unrecognized button device {}", device);
                    return;
                };
                let Some(state) = ButtonState::from_value(value) else {
                    debug!("Ignoring non on/off level {} on {}", value, device);
                    return;
                };
                self.set_indicator(controller, id.button, state).await;
            }
            Some(SWITCH_CONTROL_TYPE) => {
                // Generic off event from the controller: ask for the register
                // and let the report drive the buttons
                debug!(controller, "Generic controller event, refreshing indicator");
                if let Err(e) = self.registry.request_indicator(controller).await {
                    warn!("Failed to request indicator for node {}: {}", controller, e);
                }
            }
            other => {
                trace!(?other, device, "Level change on untracked device type");
            }
        }
    }

    /// Assert `state` for `button` on the indicator register
    pub(super) async fn set_indicator(&mut self, controller: NodeId, button: u8, state: ButtonState) {
        let Some(record) = self.store.get(controller) else {
            return;
        };

        let current = record.desired_indicator;
        let Some(next) = current.with_button(button, state) else {
            trace!(controller, button, %state, "Indicator already matches, no write");
            return;
        };

        if let Err(e) = self.registry.write_indicator(controller, next).await {
            warn!(
                "Failed to write indicator {} to node {}: {}",
                next, controller, e
            );
            return;
        }

        if let Some(record) = self.store.get_mut(controller) {
            record.desired_indicator = next;
        }
        debug!(controller, button, %state, "Indicator {} -> {}", current, next);

        if state == ButtonState::On {
            self.schedule_refresh(controller, button);
        }
    }

    /// Indicator register report from the hardware
    pub(super) async fn on_indicator_report(&mut self, controller: NodeId, reading: IndicatorReading) {
        let Some(record) = self.store.get_mut(controller) else {
            trace!(controller, "Indicator report for removed controller ignored");
            return;
        };

        if !reading.is_fresh(record.indicator_update_time) {
            trace!(
                controller,
                update_time = reading.update_time,
                invalidate_time = reading.invalidate_time,
                last = record.indicator_update_time,
                "Stale indicator report dropped"
            );
            return;
        }

        record.indicator_update_time = reading.update_time;
        debug!(controller, "Indicator report {}", reading.value);

        for button in reading.value.dark_buttons() {
            self.force_button(controller, button, ButtonState::Off).await;
        }
    }

    /// Post a deferred dimmer query for `button` back onto our own channel
    ///
    /// Not cancellable; dropped silently if the engine has stopped by then.
    fn schedule_refresh(&self, controller: NodeId, button: u8) {
        let delay = Duration::from_millis(self.config.sync.refresh_delay_ms);
        let tx = self.command_tx.clone();

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(EngineCommand::RefreshAssociated { controller, button });
        });
    }

    /// Ask every dimmer in a button's association group for its level
    pub(super) async fn refresh_associated(&self, controller: NodeId, button: u8) {
        let Some(record) = self.store.get(controller) else {
            return;
        };

        let members: BTreeSet<NodeId> = record.group(button).iter().copied().collect();
        if members.is_empty() {
            return;
        }

        let mut queried = BTreeSet::new();
        for device in self.registry.list_devices().await {
            let Some(node) = self.scheme.node_id(&device) else {
                continue;
            };
            if !members.contains(&node) || queried.contains(&node) {
                continue;
            }

            let device_type = self
                .registry
                .get_property(&device, DEVICE_TYPE_PROPERTY)
                .await;
            if device_type.as_ref().and_then(Value::as_str) != Some(SWITCH_MULTILEVEL_TYPE) {
                continue;
            }

            queried.insert(node);
            if let Err(e) = self.registry.query_load_level(node).await {
                warn!("Failed to query level of node {}: {}", node, e);
            }
        }

        debug!(controller, button, ?queried, "Refreshed associated dimmers");
    }
}
