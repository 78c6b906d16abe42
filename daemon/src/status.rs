use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::restart::RestartSummary;

/// Severity attached to every message pushed through a [`StatusSink`].
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// One-way notification channel consumed by the presentation layer.
///
/// The core calls [`report`](StatusSink::report) from whatever context it is
/// running in (the event loop, the WMI delivery thread, a test) and never
/// waits for or reads a response. Implementations are responsible for their
/// own thread safety and must not block the caller.
pub trait StatusSink: Send + Sync {
    fn report(&self, severity: Severity, message: &str);
}

/// Default sink: tagged stderr lines, matching the daemon's other diagnostics.
pub struct StderrSink;

impl StatusSink for StderrSink {
    fn report(&self, severity: Severity, message: &str) {
        match severity {
            Severity::Info => eprintln!("[monitor] {message}"),
            Severity::Warning => eprintln!("[monitor] warning: {message}"),
            Severity::Error => eprintln!("[monitor] error: {message}"),
        }
    }
}

/// Current operational state of the monitor.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum MonitorState {
    /// No device-arrival subscription is active.
    Idle,
    /// A device-arrival subscription is active and events trigger restarts.
    Monitoring,
}

/// Runtime status written by the daemon to %APPDATA%\Replug\status.toml.
/// The configuration UI reads this file (read-only) to display daemon state.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MonitorStatus {
    /// Daemon binary version (set from Cargo.toml at compile time).
    pub version: String,
    /// Current operational state.
    pub state: MonitorState,
    /// Identifying string of the most recently handled device arrival, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_device: Option<String>,
    /// Outcome counts of the most recent restart orchestration, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_summary: Option<RestartSummary>,
    /// RFC 3339 timestamp of the most recently handled device arrival, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_event_timestamp: Option<String>,
    /// Human-readable error message if the daemon encountered a non-fatal error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MonitorStatus {
    /// Constructs the initial idle status on daemon startup.
    pub fn new() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            state: MonitorState::Idle,
            last_device: None,
            last_summary: None,
            last_event_timestamp: None,
            error: None,
        }
    }

    /// Records a handled device arrival and stamps it with the current time.
    pub fn record_arrival(&mut self, device_id: &str, summary: Option<RestartSummary>) {
        self.last_device = Some(device_id.to_string());
        if summary.is_some() {
            self.last_summary = summary;
        }
        self.last_event_timestamp = Some(chrono::Local::now().to_rfc3339());
    }
}

/// Serializes `status` to TOML and writes it to `path`.
/// Creates the parent directory if it does not exist.
/// Logs errors to stderr rather than panicking — a status write failure should
/// never crash the daemon.
pub fn write_status(path: &Path, status: &MonitorStatus) {
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            eprintln!("[status] Failed to create directory {}: {e}", parent.display());
            return;
        }
    }
    match toml::to_string_pretty(status) {
        Ok(content) => {
            if let Err(e) = std::fs::write(path, content) {
                eprintln!("[status] Failed to write status file: {e}");
            }
        }
        Err(e) => eprintln!("[status] Failed to serialize status: {e}"),
    }
}

/// Sink used across the crate's tests: records every report in order.
#[cfg(test)]
pub(crate) struct RecordingSink {
    pub events: std::sync::Mutex<Vec<(Severity, String)>>,
}

#[cfg(test)]
impl RecordingSink {
    pub fn new() -> Self {
        Self { events: std::sync::Mutex::new(Vec::new()) }
    }

    pub fn messages(&self) -> Vec<String> {
        self.events.lock().unwrap().iter().map(|(_, m)| m.clone()).collect()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.messages().iter().any(|m| m.contains(needle))
    }
}

#[cfg(test)]
impl StatusSink for RecordingSink {
    fn report(&self, severity: Severity, message: &str) {
        self.events.lock().unwrap().push((severity, message.to_string()));
    }
}
