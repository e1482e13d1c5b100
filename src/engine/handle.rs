//! EngineHandle - Public API for the SyncEngine actor
//!
//! Wraps the engine's command channel with async methods. Lifecycle calls
//! wait for the engine's acknowledgement; queries return empty results once
//! the engine has stopped.

use super::commands::EngineCommand;
use super::store::ControllerRecord;
use super::types::NodeId;
use crate::config::AppConfig;
use anyhow::{anyhow, Context, Result};
use tokio::sync::{mpsc, oneshot};

/// Handle for interacting with a running [`super::SyncEngine`]
///
/// Cheap to clone and safe to share across tasks.
#[derive(Clone)]
pub struct EngineHandle {
    cmd_tx: mpsc::UnboundedSender<EngineCommand>,
}

impl EngineHandle {
    pub fn new(cmd_tx: mpsc::UnboundedSender<EngineCommand>) -> Self {
        Self { cmd_tx }
    }

    /// Subscribe to device events and replay existing devices
    pub async fn start(&self) -> Result<()> {
        let (response_tx, response_rx) = oneshot::channel();
        self.cmd_tx
            .send(EngineCommand::Start {
                response: response_tx,
            })
            .map_err(|_| anyhow!("Sync engine is not running"))?;

        response_rx
            .await
            .context("Sync engine dropped start request")?
            .context("Failed to subscribe to device events")
    }

    /// Release every subscription and stop the engine
    ///
    /// Returns the number of subscriptions released.
    pub async fn stop(&self) -> Result<usize> {
        let (response_tx, response_rx) = oneshot::channel();
        self.cmd_tx
            .send(EngineCommand::Stop {
                response: response_tx,
            })
            .map_err(|_| anyhow!("Sync engine is not running"))?;

        response_rx
            .await
            .context("Sync engine dropped stop request")
    }

    /// Apply a reloaded configuration (fire-and-forget)
    pub fn update_config(&self, config: AppConfig) {
        let _ = self
            .cmd_tx
            .send(EngineCommand::UpdateConfig(Box::new(config)));
    }

    /// Record of one controller, `None` if unknown or the engine stopped
    pub async fn controller(&self, node: NodeId) -> Option<ControllerRecord> {
        let (response_tx, response_rx) = oneshot::channel();
        let cmd = EngineCommand::GetController {
            node,
            response: response_tx,
        };

        if self.cmd_tx.send(cmd).is_err() {
            return None;
        }

        response_rx.await.ok().flatten()
    }

    /// Every controller record
    pub async fn controllers(&self) -> Vec<ControllerRecord> {
        let (response_tx, response_rx) = oneshot::channel();
        let cmd = EngineCommand::ListControllers {
            response: response_tx,
        };

        if self.cmd_tx.send(cmd).is_err() {
            return Vec::new();
        }

        response_rx.await.unwrap_or_default()
    }

    /// Number of live subscriptions held by the engine
    pub async fn binding_count(&self) -> usize {
        let (response_tx, response_rx) = oneshot::channel();
        let cmd = EngineCommand::BindingCount {
            response: response_tx,
        };

        if self.cmd_tx.send(cmd).is_err() {
            return 0;
        }

        response_rx.await.unwrap_or(0)
    }

    /// Whether the engine's run loop is still alive
    pub fn is_running(&self) -> bool {
        !self.cmd_tx.is_closed()
    }
}
