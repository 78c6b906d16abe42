use anyhow::{Context, Result};
use notify::{Config as NotifyConfig, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

use crate::event::DaemonEvent;

pub const SETTINGS_VERSION: u32 = 1;

/// Persisted daemon settings. Deserialized from %APPDATA%\Replug\settings.toml.
///
/// Replaces the legacy single-line key/value record the first program
/// generation used; every field has a serde default so a partial or missing
/// file degrades to an empty configuration rather than an error.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Schema version, bumped if the field set ever changes incompatibly.
    #[serde(default = "default_version")]
    pub version: u32,
    /// Executable paths to restart on a matching device arrival.
    /// Ordered, duplicate-free; order is the restart order.
    #[serde(default)]
    pub paths: Vec<String>,
    /// Whether the daemon registers itself to start at user login.
    #[serde(default)]
    pub auto_start: bool,
    /// Device filter patterns as raw newline-joined text. Split into
    /// individual patterns only when read (see [`Settings::filter_patterns`]).
    #[serde(default)]
    pub filter_text: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: SETTINGS_VERSION,
            paths: Vec::new(),
            auto_start: false,
            filter_text: String::new(),
        }
    }
}

impl Settings {
    /// Returns the filter patterns: one per non-blank line of `filter_text`,
    /// trimmed, in file order.
    pub fn filter_patterns(&self) -> Vec<String> {
        self.filter_text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect()
    }

    /// Drops empty entries and duplicates from `paths`, keeping first-seen order.
    fn normalize(&mut self) {
        let mut seen = Vec::new();
        self.paths.retain(|p| {
            if p.is_empty() || seen.contains(p) {
                return false;
            }
            seen.push(p.clone());
            true
        });
    }
}

/// Owns the settings file and mediates every read and write of it.
///
/// All mutation goes through the `save_*` accessors, each of which rewrites
/// the whole file (read-modify-write, no partial update). Loads never fail:
/// a missing, unreadable, or corrupt file yields [`Settings::default`] and a
/// stderr diagnostic.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the whole settings record, falling back to defaults on any error.
    pub fn load(&self) -> Settings {
        if !self.path.exists() {
            return Settings::default();
        }
        let parsed = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read settings file: {}", self.path.display()))
            .and_then(|content| {
                toml::from_str::<Settings>(&content)
                    .with_context(|| format!("Failed to parse settings file: {}", self.path.display()))
            });
        match parsed {
            Ok(mut settings) => {
                settings.normalize();
                settings
            }
            Err(e) => {
                eprintln!("[settings] Error (using defaults): {e:#}");
                Settings::default()
            }
        }
    }

    /// Writes the whole settings record, creating the parent directory if needed.
    pub fn save(&self, settings: &Settings) -> Result<()> {
        let mut settings = settings.clone();
        settings.normalize();
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
        let content = toml::to_string_pretty(&settings).context("Failed to serialize settings")?;
        std::fs::write(&self.path, content)
            .with_context(|| format!("Failed to write settings file: {}", self.path.display()))
    }

    // ── Field accessors (each save is a full-file rewrite) ────────────────────

    pub fn load_paths(&self) -> Vec<String> {
        self.load().paths
    }

    pub fn save_paths(&self, paths: &[String]) -> Result<()> {
        let mut settings = self.load();
        settings.paths = paths.to_vec();
        self.save(&settings)
    }

    pub fn load_filter_text(&self) -> String {
        self.load().filter_text
    }

    pub fn save_filter_text(&self, text: &str) -> Result<()> {
        let mut settings = self.load();
        settings.filter_text = text.to_string();
        self.save(&settings)
    }

    pub fn load_auto_start(&self) -> bool {
        self.load().auto_start
    }

    pub fn save_auto_start(&self, enabled: bool) -> Result<()> {
        let mut settings = self.load();
        settings.auto_start = enabled;
        self.save(&settings)
    }
}

/// Spawns a file watcher on the parent directory of `path`.  Whenever the
/// settings file is created or modified, sends a `SettingsChanged` event.
///
/// The daemon re-reads settings on every device arrival anyway; this watcher
/// exists so external edits are surfaced promptly and the start-at-login
/// registration can be re-synced while idle.
pub async fn watch_settings(path: PathBuf, tx: mpsc::Sender<DaemonEvent>) {
    let (watch_tx, mut watch_rx) = mpsc::channel::<notify::Event>(16);

    let mut watcher = match RecommendedWatcher::new(
        move |res: notify::Result<notify::Event>| {
            if let Ok(event) = res {
                let _ = watch_tx.blocking_send(event);
            }
        },
        NotifyConfig::default(),
    ) {
        Ok(w) => w,
        Err(e) => {
            eprintln!("[settings] Failed to create file watcher: {e}");
            return;
        }
    };

    // Watch the parent directory rather than the file directly so we catch
    // editor-style atomic saves (write-new + rename).
    let watch_dir = match path.parent() {
        Some(d) => d.to_path_buf(),
        None => {
            eprintln!("[settings] Settings path has no parent directory");
            return;
        }
    };

    if let Err(e) = watcher.watch(&watch_dir, RecursiveMode::NonRecursive) {
        eprintln!("[settings] Failed to watch settings directory: {e}");
        return;
    }

    while let Some(event) = watch_rx.recv().await {
        let affects_settings = event.paths.iter().any(|p| p == path.as_path());
        let is_write = matches!(
            event.kind,
            notify::EventKind::Create(_) | notify::EventKind::Modify(_)
        );

        if affects_settings && is_write {
            if tx.send(DaemonEvent::SettingsChanged).await.is_err() {
                break;
            }
        }
    }
}

fn default_version() -> u32 {
    SETTINGS_VERSION
}
