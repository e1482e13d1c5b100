//! Scene Sync
//!
//! Keeps a multi-button scene controller's indicator LEDs, its virtual
//! per-button devices, and the loads associated to each button consistent.
//!
//! - [`engine`]: the reconciliation actor
//! - [`registry`]: the host device registry seam and an in-memory host
//! - [`config`]: YAML configuration with hot reload
//! - [`cli`]: interactive simulator shell

pub mod cli;
pub mod config;
pub mod engine;
pub mod registry;
