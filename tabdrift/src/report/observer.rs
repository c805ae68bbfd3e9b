//! Optional experiment-tracking hooks.
//!
//! Observers receive telemetry only. Whether one is attached never changes the
//! computed results.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Mutex;

use serde_json::{json, Value};
use tracing::warn;

/// Receives run lifecycle and metric events. Every method defaults to a no-op.
pub trait RunObserver: Sync {
    fn on_run_start(&self, _name: &str, _params: &Value) {}

    fn on_metrics(&self, _step: usize, _metrics: &BTreeMap<String, f64>) {}

    fn on_run_end(&self, _name: &str) {}
}

/// Observer that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl RunObserver for NoopObserver {}

/// Appends one JSON object per event to a file.
///
/// Write failures are logged and dropped.
pub struct JsonlObserver {
    file: Mutex<File>,
}

impl JsonlObserver {
    /// Open `path` for appending, creating it (and its parent directory) if needed.
    pub fn open(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    fn emit(&self, event: Value) {
        let line = match serde_json::to_string(&event) {
            Ok(line) => line,
            Err(e) => {
                warn!("Tracking event not serializable: {}", e);
                return;
            }
        };
        match self.file.lock() {
            Ok(mut file) => {
                if let Err(e) = writeln!(file, "{}", line) {
                    warn!("Failed to write tracking event: {}", e);
                }
            }
            Err(_) => warn!("Tracking file lock poisoned; event dropped"),
        }
    }
}

impl RunObserver for JsonlObserver {
    fn on_run_start(&self, name: &str, params: &Value) {
        self.emit(json!({ "event": "run_start", "name": name, "params": params }));
    }

    fn on_metrics(&self, step: usize, metrics: &BTreeMap<String, f64>) {
        self.emit(json!({ "event": "metrics", "step": step, "metrics": metrics }));
    }

    fn on_run_end(&self, name: &str) {
        self.emit(json!({ "event": "run_end", "name": name }));
    }
}
