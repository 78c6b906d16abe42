//! Start-at-login registration via the `HKCU\...\Run` registry key.
//!
//! The saved `auto_start` setting drives the registry state: on daemon
//! startup (and whenever the setting changes while idle) the Run-key value
//! is created or removed to match it. Both directions are idempotent.
//!
//! On non-Windows platforms both functions compile and succeed as no-ops.
use anyhow::Result;

// ── Windows implementation ─────────────────────────────────────────────────────

#[cfg(windows)]
mod imp {
    use anyhow::{Context, Result};
    use std::io;
    use winreg::enums::{HKEY_CURRENT_USER, KEY_SET_VALUE};
    use winreg::RegKey;

    const RUN_KEY: &str = r"Software\Microsoft\Windows\CurrentVersion\Run";
    const VALUE_NAME: &str = "Replug";

    /// Writes `exe_path` under `HKCU\...\Run\Replug`.
    /// Idempotent: overwrites the value if it already exists.
    pub fn register(exe_path: &str) -> Result<()> {
        let hkcu = RegKey::predef(HKEY_CURRENT_USER);
        let (key, _) = hkcu
            .create_subkey(RUN_KEY)
            .context("Failed to open HKCU Run key")?;
        key.set_value(VALUE_NAME, &exe_path)
            .context("Failed to set Run-key value")
    }

    /// Removes the `Replug` value from `HKCU\...\Run`.
    /// Succeeds silently if the value or key does not exist.
    pub fn unregister() -> Result<()> {
        let hkcu = RegKey::predef(HKEY_CURRENT_USER);
        let key = match hkcu.open_subkey_with_flags(RUN_KEY, KEY_SET_VALUE) {
            Ok(key) => key,
            // Key doesn't exist — nothing to remove.
            Err(_) => return Ok(()),
        };
        match key.delete_value(VALUE_NAME) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => {
                Err(e).context("Failed to delete Run-key value")
            }
            _ => Ok(()),
        }
    }
}

// ── Public API ─────────────────────────────────────────────────────────────────

/// Brings the Windows Run-key registration in line with the saved
/// `auto_start` flag: registers the running binary when `enabled`, removes
/// the registration otherwise. Safe to call on every startup.
pub fn apply_auto_start(enabled: bool) -> Result<()> {
    #[cfg(windows)]
    {
        if enabled {
            let exe = std::env::current_exe()
                .map_err(|e| anyhow::anyhow!("Failed to locate daemon executable: {e}"))?;
            let exe_str = exe.to_string_lossy();
            imp::register(&exe_str)?;
            eprintln!("[startup] Registered in Windows startup: {exe_str}");
        } else {
            imp::unregister()?;
        }
    }
    #[cfg(not(windows))]
    {
        // No-op on non-Windows platforms.
        let _ = enabled;
    }
    Ok(())
}
