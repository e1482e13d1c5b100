//! Hot reload of the configuration file
//!
//! The file's directory is watched rather than the file itself: editors that
//! save by writing a temporary file and renaming it over the original replace
//! the inode, which a watch on the file alone stops seeing.

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::AppConfig;

/// Quiet period before re-reading, so a save in several writes loads once
const SETTLE_DELAY: Duration = Duration::from_millis(100);

/// Delivers a freshly parsed [`AppConfig`] whenever the file changes on disk
///
/// Files that fail to parse or validate are logged and skipped; the caller
/// keeps running with the last good configuration.
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
    rx: mpsc::Receiver<AppConfig>,
}

impl ConfigWatcher {
    /// Load `config_path` and start watching it
    pub async fn new(config_path: String) -> Result<(Self, Arc<AppConfig>)> {
        let initial = AppConfig::load(&config_path)
            .await
            .context("Failed to load initial config")?;

        let path = Path::new(&config_path);
        let file_name = path
            .file_name()
            .map(OsString::from)
            .with_context(|| format!("Config path has no file name: {}", config_path))?;
        let directory = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let (tx, rx) = mpsc::channel(10);
        let reload = Reloader {
            path: config_path.clone(),
            tx,
            pending: Arc::new(AtomicBool::new(false)),
            runtime: Handle::current(),
        };

        // Runs on notify's own thread
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) if touches(&event, &file_name) => {
                debug!("Config file event {:?}", event.kind);
                reload.schedule();
            }
            Ok(_) => {}
            Err(e) => error!("Config watch error: {}", e),
        })?;

        watcher
            .watch(&directory, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch directory {}", directory.display()))?;

        info!("Watching {} for changes", config_path);

        Ok((
            Self {
                _watcher: watcher,
                rx,
            },
            Arc::new(initial),
        ))
    }

    /// Next reloaded configuration; `None` once the watcher is gone
    pub async fn next_config(&mut self) -> Option<AppConfig> {
        self.rx.recv().await
    }
}

/// Whether a directory event writes or replaces the watched file
fn touches(event: &Event, file_name: &OsString) -> bool {
    matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
        && event
            .paths
            .iter()
            .any(|p| p.file_name() == Some(file_name.as_os_str()))
}

struct Reloader {
    path: String,
    tx: mpsc::Sender<AppConfig>,
    /// Set while a reload is waiting out the settle delay
    pending: Arc<AtomicBool>,
    runtime: Handle,
}

impl Reloader {
    fn schedule(&self) {
        if self.pending.swap(true, Ordering::AcqRel) {
            return;
        }

        let path = self.path.clone();
        let tx = self.tx.clone();
        let pending = self.pending.clone();
        self.runtime.spawn(async move {
            tokio::time::sleep(SETTLE_DELAY).await;
            pending.store(false, Ordering::Release);

            match AppConfig::load(&path).await {
                Ok(config) => {
                    info!("Configuration reloaded from {}", path);
                    if tx.send(config).await.is_err() {
                        debug!("Config receiver dropped, reload discarded");
                    }
                }
                Err(e) => warn!("Ignoring invalid config {}: {:#}", path, e),
            }
        });
    }
}
