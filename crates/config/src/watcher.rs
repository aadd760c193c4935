//! Debounced config file watcher.
//!
//! Watches the config file and its parent directory (editors often replace
//! the file rather than writing in place), coalesces bursts of events over
//! the debounce interval, then reloads and delivers the new server list.
//! A burst of modify events yields exactly one delivery.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::error::Result;
use crate::loader::load_file;
use crate::server::ServerConfig;

/// Default time to wait for further file events before reloading.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// A running config file watcher.
///
/// Dropping the watcher stops event delivery.
pub struct ConfigWatcher {
    configs: mpsc::Receiver<Vec<ServerConfig>>,
    // Keeps the notify backend (and its threads) alive.
    _watcher: RecommendedWatcher,
}

impl ConfigWatcher {
    /// Start watching `path` with the default debounce interval.
    pub fn start(path: impl Into<PathBuf>) -> Result<Self> {
        Self::with_debounce(path, DEFAULT_DEBOUNCE)
    }

    /// Start watching `path`, coalescing events over `debounce`.
    pub fn with_debounce(path: impl Into<PathBuf>, debounce: Duration) -> Result<Self> {
        let path: PathBuf = path.into();
        let watched = path.canonicalize().unwrap_or_else(|_| path.clone());

        let (event_tx, event_rx) = mpsc::unbounded_channel::<()>();
        let filter_path = watched.clone();

        let mut watcher =
            notify::recommended_watcher(move |result: notify::Result<Event>| {
                let event = match result {
                    Ok(event) => event,
                    Err(error) => {
                        tracing::warn!(%error, "error watching config file");
                        return;
                    }
                };

                if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                    return;
                }

                if event.paths.iter().any(|p| paths_match(p, &filter_path)) {
                    // Receiver gone means we are shutting down.
                    let _ = event_tx.send(());
                }
            })?;

        watcher.watch(&watched, RecursiveMode::NonRecursive)?;

        if let Some(dir) = watched.parent() {
            if let Err(error) = watcher.watch(dir, RecursiveMode::NonRecursive) {
                tracing::warn!(%error, "failed to watch config directory");
            }
        }

        let (config_tx, config_rx) = mpsc::channel(1);
        tokio::spawn(debounce_loop(watched, debounce, event_rx, config_tx));

        Ok(Self {
            configs: config_rx,
            _watcher: watcher,
        })
    }

    /// Wait for the next reloaded server list.
    ///
    /// Returns `None` once the watcher has shut down.
    pub async fn recv(&mut self) -> Option<Vec<ServerConfig>> {
        self.configs.recv().await
    }
}

fn paths_match(event_path: &Path, watched: &Path) -> bool {
    if event_path == watched {
        return true;
    }

    // Canonicalization differences (symlinks, relative components).
    event_path
        .canonicalize()
        .is_ok_and(|canonical| canonical == watched)
}

async fn debounce_loop(
    path: PathBuf,
    debounce: Duration,
    mut events: mpsc::UnboundedReceiver<()>,
    configs: mpsc::Sender<Vec<ServerConfig>>,
) {
    while events.recv().await.is_some() {
        // Coalesce the burst: keep resetting until the file goes quiet.
        while let Ok(Some(())) = timeout(debounce, events.recv()).await {}

        tracing::info!(path = %path.display(), "reloading configuration");

        match load_file(&path) {
            Ok(servers) => {
                if configs.send(servers).await.is_err() {
                    return;
                }
            }
            Err(error) => {
                tracing::warn!(%error, path = %path.display(), "error reloading configuration");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::fs;

    // A burst of writes inside the debounce window produces exactly one
    // reload delivery.
    #[tokio::test]
    async fn burst_of_writes_delivers_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "servers:\n- name: a\n  command: mcp-a\n").unwrap();

        let mut watcher =
            ConfigWatcher::with_debounce(&path, Duration::from_millis(200)).unwrap();

        for _ in 0..3 {
            fs::write(&path, "servers:\n- name: a\n  command: mcp-a\n").unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let servers = timeout(Duration::from_secs(5), watcher.recv())
            .await
            .expect("no reload delivered")
            .expect("watcher closed");
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].name, "a");

        // The burst was coalesced: nothing further arrives.
        let second = timeout(Duration::from_millis(600), watcher.recv()).await;
        assert!(second.is_err());
    }

    #[tokio::test]
    async fn reload_parse_errors_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "servers:\n- name: a\n  command: mcp-a\n").unwrap();

        let mut watcher =
            ConfigWatcher::with_debounce(&path, Duration::from_millis(100)).unwrap();

        fs::write(&path, "servers: 42\n").unwrap();
        let nothing = timeout(Duration::from_millis(800), watcher.recv()).await;
        assert!(nothing.is_err());

        fs::write(&path, "servers:\n- name: b\n  command: mcp-b\n").unwrap();
        let servers = timeout(Duration::from_secs(5), watcher.recv())
            .await
            .expect("no reload delivered")
            .expect("watcher closed");
        assert_eq!(servers[0].name, "b");
    }
}
