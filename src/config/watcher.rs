//! Config hot-reload, grounded in the teacher's `config/watcher.rs`
//! debounced-filesystem-events pattern. A changed config file does not
//! mutate any running agent's in-flight state (§3 invariants don't cover
//! config); it republishes a fresh `RuntimeConfig` on a channel that the
//! binary entry point may use to pick up new agent spawns.

use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;

use super::RuntimeConfig;

pub struct ConfigWatchHandle {
    pub rx: mpsc::UnboundedReceiver<RuntimeConfig>,
    _debouncer: notify_debouncer_mini::Debouncer<notify::RecommendedWatcher>,
}

/// Watches `path` for writes and emits a freshly-reloaded `RuntimeConfig`
/// on the returned channel, debounced by `debounce_ms` so editors that
/// write-then-rename don't trigger a reload storm.
pub fn watch_config_file(path: impl Into<PathBuf>, debounce_ms: u64) -> notify::Result<ConfigWatchHandle> {
    let path = path.into();
    let (tx, rx) = mpsc::unbounded_channel();

    let watch_path = path.clone();
    let mut debouncer = notify_debouncer_mini::new_debouncer(
        Duration::from_millis(debounce_ms),
        move |result: notify_debouncer_mini::DebounceEventResult| {
            if result.is_err() {
                return;
            }
            if let Ok(config) = RuntimeConfig::load_from(&watch_path) {
                let _ = tx.send(config);
            }
        },
    )?;

    if let Some(parent) = path.parent() {
        debouncer
            .watcher()
            .watch(parent, notify::RecursiveMode::NonRecursive)?;
    }

    Ok(ConfigWatchHandle { rx, _debouncer: debouncer })
}

pub fn is_config_file(path: &Path, config_file_name: &str) -> bool {
    path.file_name().and_then(|n| n.to_str()) == Some(config_file_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_config_file_matches_by_name() {
        assert!(is_config_file(Path::new("/a/b/config.toml"), "config.toml"));
        assert!(!is_config_file(Path::new("/a/b/other.toml"), "config.toml"));
    }
}
