//! Canonical file paths for Replug data files on Windows.
//!
//! Both files live under %APPDATA%\Replug\:
//!   - settings.toml  Written by the configuration UI, read by the daemon.
//!   - status.toml    Written by the daemon, read by the configuration UI.
use std::path::PathBuf;

const APP_DIR_NAME: &str = "Replug";
pub const SETTINGS_FILE_NAME: &str = "settings.toml";
pub const STATUS_FILE_NAME: &str = "status.toml";

/// Returns the Replug application data directory: %APPDATA%\Replug\
pub fn app_data_dir() -> PathBuf {
    let appdata = std::env::var("APPDATA").expect("APPDATA environment variable not set");
    PathBuf::from(appdata).join(APP_DIR_NAME)
}

/// Returns the full path to the settings file: %APPDATA%\Replug\settings.toml
pub fn settings_file_path() -> PathBuf {
    app_data_dir().join(SETTINGS_FILE_NAME)
}

/// Returns the full path to the status file: %APPDATA%\Replug\status.toml
pub fn status_file_path() -> PathBuf {
    app_data_dir().join(STATUS_FILE_NAME)
}
