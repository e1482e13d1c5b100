//! Sync engine - keeps scene controller indicators, virtual buttons and
//! associated loads consistent
//!
//! The engine is an actor: it owns the controller records and the
//! subscription table, and processes one [`EngineCommand`] at a time from a
//! single channel. Registry notifications, deferred refreshes and host
//! requests all arrive on that channel, so a reconciliation always runs to
//! completion before the next one starts.
//!
//! ```text
//! registry callbacks ──┐
//! delay tasks ─────────┼──► command_rx ──► SyncEngine ──► DeviceRegistry writes
//! EngineHandle ────────┘                   (store, bindings)
//! ```
//!
//! - `classifier`: which devices belong to a scene controller
//! - `indicator`: button ↔ indicator register reconciliation
//! - `association`: load level → button state derivation
//! - `lifecycle`: start/stop, controller setup and removal

mod association;
mod bindings;
mod classifier;
mod commands;
mod handle;
pub mod ids;
mod indicator;
mod lifecycle;
pub mod store;
pub mod types;

#[cfg(test)]
mod tests;

pub use bindings::{BindingContext, BindingTable};
pub use classifier::IdentityClassifier;
pub use commands::EngineCommand;
pub use handle::EngineHandle;
pub use store::{ControllerRecord, ControllerStore};

use crate::config::AppConfig;
use crate::registry::{DeviceRegistry, Event, Notification, NotificationFn};
use ids::IdScheme;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};
use types::{ButtonState, NodeId, LEVEL_PROPERTY};

/// Reconciliation engine for scene controllers
pub struct SyncEngine {
    /// Host device registry
    registry: Arc<dyn DeviceRegistry>,
    /// Virtual device naming, fixed for the engine's lifetime
    scheme: IdScheme,
    /// Active configuration
    config: AppConfig,
    /// Decides which devices belong to scene controllers
    classifier: IdentityClassifier,
    /// Per-controller records
    store: ControllerStore,
    /// Live subscriptions and their contexts
    bindings: BindingTable,
    /// Sender feeding our own command channel (registry callbacks, delays)
    command_tx: mpsc::UnboundedSender<EngineCommand>,
    /// Number of commands processed
    command_count: u64,
}

impl SyncEngine {
    /// Create an engine and the receiving end of its command channel
    ///
    /// Most callers want [`SyncEngine::spawn`]; this is exposed so the engine
    /// can be driven step by step.
    pub fn new(
        config: AppConfig,
        registry: Arc<dyn DeviceRegistry>,
    ) -> (Self, mpsc::UnboundedReceiver<EngineCommand>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let scheme = config.host.id_scheme();
        let classifier = IdentityClassifier::new(scheme.clone(), &config.controller);

        let engine = Self {
            registry,
            scheme,
            config,
            classifier,
            store: ControllerStore::new(),
            bindings: BindingTable::new(),
            command_tx,
            command_count: 0,
        };

        (engine, command_rx)
    }

    /// Spawn the engine's run loop and return a handle to it
    pub fn spawn(config: AppConfig, registry: Arc<dyn DeviceRegistry>) -> EngineHandle {
        let (engine, command_rx) = Self::new(config, registry);
        let handle = EngineHandle::new(engine.command_tx.clone());

        tokio::spawn(engine.run(command_rx));
        info!("SyncEngine spawned");

        handle
    }

    /// Main run loop
    ///
    /// Exits after a `Stop` command has been handled.
    async fn run(mut self, mut command_rx: mpsc::UnboundedReceiver<EngineCommand>) {
        debug!(registry = self.registry.name(), "SyncEngine run loop started");

        while let Some(cmd) = command_rx.recv().await {
            if !self.handle(cmd).await {
                break;
            }
        }

        info!(
            commands = self.command_count,
            "SyncEngine run loop terminated"
        );
    }

    /// Process one command; returns `false` once the engine has stopped
    pub async fn handle(&mut self, cmd: EngineCommand) -> bool {
        trace!(?cmd, "Processing command");
        self.command_count += 1;

        match cmd {
            EngineCommand::Notify(notification) => self.on_notification(notification).await,
            EngineCommand::RefreshAssociated { controller, button } => {
                self.refresh_associated(controller, button).await
            }
            EngineCommand::UpdateConfig(config) => self.update_config(*config),
            EngineCommand::Start { response } => {
                let result = self.start().await;
                let _ = response.send(result);
            }
            EngineCommand::Stop { response } => {
                let released = self.stop().await;
                let _ = response.send(released);
                return false;
            }
            EngineCommand::GetController { node, response } => {
                let _ = response.send(self.store.get(node).cloned());
            }
            EngineCommand::ListControllers { response } => {
                let records = self
                    .store
                    .node_ids()
                    .into_iter()
                    .filter_map(|node| self.store.get(node).cloned())
                    .collect();
                let _ = response.send(records);
            }
            EngineCommand::BindingCount { response } => {
                let _ = response.send(self.bindings.len());
            }
        }

        true
    }

    /// Route a registry notification to its handler using the binding context
    async fn on_notification(&mut self, notification: Notification) {
        let Some(context) = self.bindings.context(notification.subscription).cloned() else {
            trace!(
                subscription = notification.subscription,
                "Notification for released subscription dropped"
            );
            return;
        };

        match (context, notification.event) {
            (BindingContext::DeviceCreated, Event::DeviceCreated { device }) => {
                self.on_device_created(&device).await
            }
            (BindingContext::DeviceRemoved, Event::DeviceRemoved { device }) => {
                self.on_device_removed(&device).await
            }
            (
                BindingContext::ControllerDevice { controller, device },
                Event::PropertyChanged { value, .. },
            ) => self.on_controller_device_changed(controller, &device, &value).await,
            (BindingContext::Indicator { controller }, Event::IndicatorChanged { reading, .. }) => {
                self.on_indicator_report(controller, reading).await
            }
            (BindingContext::LoadDevice { load }, Event::PropertyChanged { .. }) => {
                self.on_load_level_changed(load).await
            }
            (context, event) => {
                warn!(?context, ?event, "Notification does not match its binding");
            }
        }
    }

    /// Callback handed to the registry for every subscription
    fn notification_sink(&self) -> NotificationFn {
        let tx = self.command_tx.clone();
        Arc::new(move |notification: Notification| {
            let _ = tx.send(EngineCommand::Notify(notification));
        })
    }

    /// Drive a button's virtual device to `state` unless it is already there
    ///
    /// Missing devices are skipped. Writing the device triggers its own
    /// change notification, which flows back through the indicator path.
    async fn force_button(&self, controller: NodeId, button: u8, state: ButtonState) {
        let device = self.scheme.button_device(controller, button).to_string();

        let Some(current) = self.registry.get_property(&device, LEVEL_PROPERTY).await else {
            trace!(device = %device, "Button device not present, skipping");
            return;
        };

        if ButtonState::from_value(&current) == Some(state) {
            return;
        }

        debug!(controller, button, %state, "Forcing button state");
        if let Err(e) = self
            .registry
            .set_property(&device, LEVEL_PROPERTY, state.to_value())
            .await
        {
            warn!("Failed to set {} to {}: {}", device, state, e);
        }
    }

    /// Apply a reloaded configuration
    ///
    /// Device naming is fixed at construction; only matching and sync
    /// settings change.
    fn update_config(&mut self, config: AppConfig) {
        if config.host.id_scheme() != self.scheme {
            warn!(
                "Device naming changes require a restart (keeping {}_{})",
                self.scheme.family, self.scheme.controller_name
            );
        }
        if config.host.gateway_node_id != self.config.host.gateway_node_id {
            warn!(
                "Gateway node changes require a restart (keeping node {})",
                self.config.host.gateway_node_id
            );
        }

        // Association lists were filtered with the old host section
        self.classifier = IdentityClassifier::new(self.scheme.clone(), &config.controller);
        self.config = AppConfig {
            host: self.config.host.clone(),
            ..config
        };
        info!("🔄 SyncEngine configuration updated");
    }
}
