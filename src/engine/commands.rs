//! Commands processed by the sync engine actor
//!
//! Every input to the engine, whether a registry notification, a deferred
//! refresh, or a request from the host, is a command on one channel. The
//! engine handles them strictly one at a time.

use super::store::ControllerRecord;
use super::types::NodeId;
use crate::config::AppConfig;
use crate::registry::{Notification, RegistryError};
use tokio::sync::oneshot;

/// Commands for the sync engine actor
pub enum EngineCommand {
    // -------------------------------------------------------------------------
    // Host notifications (fire and forget)
    // -------------------------------------------------------------------------
    /// A notification delivered by the registry for one of our subscriptions
    Notify(Notification),

    /// Deferred query of the dimmers associated to a button
    ///
    /// Posted by the delay task scheduled after a button turns on.
    RefreshAssociated {
        controller: NodeId,
        button: u8,
    },

    /// Replace classifier and sync settings (hot reload)
    UpdateConfig(Box<AppConfig>),

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------
    /// Subscribe to device creation/removal and replay existing devices
    Start {
        response: oneshot::Sender<Result<(), RegistryError>>,
    },

    /// Release every subscription and stop the run loop
    ///
    /// Responds with the number of subscriptions released.
    Stop { response: oneshot::Sender<usize> },

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------
    /// Get the record of one controller
    GetController {
        node: NodeId,
        response: oneshot::Sender<Option<ControllerRecord>>,
    },

    /// Get every controller record
    ListControllers {
        response: oneshot::Sender<Vec<ControllerRecord>>,
    },

    /// Number of live subscriptions held by the engine
    BindingCount { response: oneshot::Sender<usize> },
}

// Manual Debug implementation because oneshot senders add nothing useful
impl std::fmt::Debug for EngineCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineCommand::Notify(notification) => {
                f.debug_tuple("Notify").field(notification).finish()
            }
            EngineCommand::RefreshAssociated { controller, button } => f
                .debug_struct("RefreshAssociated")
                .field("controller", controller)
                .field("button", button)
                .finish(),
            EngineCommand::UpdateConfig(_) => write!(f, "UpdateConfig"),
            EngineCommand::Start { .. } => write!(f, "Start"),
            EngineCommand::Stop { .. } => write!(f, "Stop"),
            EngineCommand::GetController { node, .. } => f
                .debug_struct("GetController")
                .field("node", node)
                .finish_non_exhaustive(),
            EngineCommand::ListControllers { .. } => write!(f, "ListControllers"),
            EngineCommand::BindingCount { .. } => write!(f, "BindingCount"),
        }
    }
}
