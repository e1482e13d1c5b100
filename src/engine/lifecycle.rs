//! Engine lifecycle: start/stop, controller setup and removal

use super::bindings::BindingContext;
use super::store::ControllerRecord;
use super::types::{NodeId, LEVEL_PROPERTY};
use crate::registry::{RegistryError, SubscriptionId, Topic};
use tracing::{debug, info, warn};

impl super::SyncEngine {
    /// Subscribe to device creation/removal, then replay existing devices
    ///
    /// Replay covers devices the host created before the engine started;
    /// creation order at host boot is not guaranteed.
    pub(super) async fn start(&mut self) -> Result<(), RegistryError> {
        if self.bindings.is_started() {
            warn!("SyncEngine already started");
            return Ok(());
        }

        self.subscribe(Topic::DeviceCreated, BindingContext::DeviceCreated)
            .await?;
        self.subscribe(Topic::DeviceRemoved, BindingContext::DeviceRemoved)
            .await?;

        let devices = self.registry.list_devices().await;
        debug!("Replaying {} existing devices", devices.len());
        for device in &devices {
            self.on_device_created(device).await;
        }

        info!(
            "✅ SyncEngine started on '{}' ({} controllers, {} subscriptions)",
            self.registry.name(),
            self.store.len(),
            self.bindings.len()
        );
        Ok(())
    }

    /// Release every subscription and forget all controllers
    ///
    /// Returns the number of subscriptions released.
    pub(super) async fn stop(&mut self) -> usize {
        let mut released = 0;

        for id in self.bindings.teardown_order() {
            self.release(id).await;
            released += 1;
        }

        let controllers = self.store.len();
        self.store.clear();

        info!(
            "🛑 SyncEngine stopped ({} subscriptions released, {} controllers dropped)",
            released, controllers
        );
        released
    }

    /// Register a subscription and record its context
    async fn subscribe(
        &mut self,
        topic: Topic,
        context: BindingContext,
    ) -> Result<SubscriptionId, RegistryError> {
        let id = self
            .registry
            .subscribe(topic, self.notification_sink())
            .await?;
        self.bindings.insert(id, context);
        Ok(id)
    }

    /// Like [`Self::subscribe`], logging failures instead of returning them
    pub(super) async fn bind(&mut self, topic: Topic, context: BindingContext) {
        if let Err(e) = self.subscribe(topic.clone(), context).await {
            warn!(?topic, "Failed to subscribe: {}", e);
        }
    }

    /// Unsubscribe and forget one binding
    async fn release(&mut self, id: SubscriptionId) {
        if let Err(e) = self.registry.unsubscribe(id).await {
            warn!("Failed to unsubscribe {}: {}", id, e);
        }
        self.bindings.remove(id);
    }

    /// A device appeared (live or during replay)
    pub(super) async fn on_device_created(&mut self, device: &str) {
        let Some(controller) = self
            .classifier
            .classify(self.registry.as_ref(), device)
            .await
        else {
            return;
        };

        self.setup_controller(controller, device).await;
    }

    /// Idempotent setup of a controller for one of its devices
    ///
    /// The record, indicator binding and load bindings are created once per
    /// node; each device gets its own level binding.
    async fn setup_controller(&mut self, controller: NodeId, device: &str) {
        let created = if self.store.contains(controller) {
            false
        } else {
            let reading = match self.registry.read_indicator(controller).await {
                Ok(reading) => reading,
                Err(e) => {
                    warn!("Failed to read indicator of node {}: {}", controller, e);
                    return;
                }
            };

            let mut record = ControllerRecord::new(controller, reading.value);
            record.associations = self.load_associations(controller).await;
            self.store.insert(record);
            self.bind_loads(controller).await;

            info!(
                "🎛️ Scene controller {} set up (indicator {})",
                controller, reading.value
            );
            true
        };

        if let Some(record) = self.store.get_mut(controller) {
            record.devices.insert(device.to_string());
        }

        if !self.bindings.has_device(device) {
            let topic = Topic::Property {
                device: device.to_string(),
                key: LEVEL_PROPERTY.to_string(),
            };
            let context = BindingContext::ControllerDevice {
                controller,
                device: device.to_string(),
            };
            self.bind(topic, context).await;
        }

        if !self.bindings.has_indicator(controller) {
            self.bind(
                Topic::Indicator { node: controller },
                BindingContext::Indicator { controller },
            )
            .await;
        }

        if created {
            if let Err(e) = self.registry.request_indicator(controller).await {
                warn!("Failed to request indicator for node {}: {}", controller, e);
            }
        }
    }

    /// A device of a tracked controller node disappeared
    ///
    /// The first removal for the node drops its record, so nothing further
    /// is written to it. Subscriptions are only released when configured to.
    pub(super) async fn on_device_removed(&mut self, device: &str) {
        let Some(controller) = self.scheme.node_id(device) else {
            return;
        };
        let Some(record) = self.store.remove(controller) else {
            return;
        };

        info!(
            "Scene controller {} removed ({} removed, {} devices seen)",
            controller,
            device,
            record.devices.len()
        );

        if self.config.sync.release_bindings_on_removal {
            self.release_controller_bindings(controller).await;
        }
    }

    /// Drop a removed controller's subscriptions and loads nobody references
    async fn release_controller_bindings(&mut self, controller: NodeId) {
        let mut ids = self.bindings.controller_bindings(controller);
        ids.extend(self.bindings.orphaned_loads(&self.store.all_loads()));

        debug!(controller, count = ids.len(), "Releasing controller subscriptions");
        for id in ids {
            self.release(id).await;
        }
    }
}
