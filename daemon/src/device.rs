//! Device-arrival watcher.
//!
//! On Windows the watcher registers a WMI notification query for
//! `__InstanceCreationEvent` on `Win32_PnPEntity` — one event per
//! plug-and-play device attach — on a dedicated OS thread, and forwards each
//! arrival into the daemon's event channel.  The thread owns the COM
//! apartment and WMI connection; setup success or failure is handed back to
//! the subscriber over a one-shot handshake channel before any event flows.
//!
//! On non-Windows platforms subscribing fails with
//! [`SubscriptionError::Unsupported`] and the daemon stays idle.
use thiserror::Error;
use tokio::sync::mpsc;

use crate::event::DaemonEvent;

#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error("device notifications are not supported on this platform")]
    Unsupported,
    #[error("failed to initialize device notification channel: {0}")]
    Init(String),
}

/// Ephemeral record of one device attach: the best-available identifying
/// string, preferring the stable hardware ID over the display caption
/// (captions may be empty or generic). Empty when no metadata was available.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceArrival {
    pub device_id: String,
}

/// Seam over the OS device-notification channel. The production
/// implementation is [`WmiDeviceNotifier`]; tests inject fakes that
/// synthesize arrivals without touching the OS.
pub trait DeviceNotifier: Send + Sync {
    /// Registers for device-arrival notifications, delivering one
    /// [`DaemonEvent::DeviceArrived`] per attach into `tx` in OS order, with
    /// no reordering or de-duplication. At most one subscription is active
    /// at a time (enforced by the monitor controller).
    ///
    /// On failure nothing is left partially registered.
    fn subscribe(&self, tx: mpsc::Sender<DaemonEvent>) -> Result<WatcherHandle, SubscriptionError>;
}

/// Handle to a live subscription. Dropping the handle does NOT stop the
/// watcher; call [`stop`](WatcherHandle::stop), which is idempotent.
pub struct WatcherHandle {
    stop: Option<Box<dyn FnOnce() + Send>>,
}

impl WatcherHandle {
    pub fn new(stop: impl FnOnce() + Send + 'static) -> Self {
        Self { stop: Some(Box::new(stop)) }
    }

    /// Stops event delivery. Safe to call more than once; only the first
    /// call has an effect.
    pub fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            stop();
        }
    }
}

/// Production notifier backed by WMI on Windows.
pub struct WmiDeviceNotifier;

impl DeviceNotifier for WmiDeviceNotifier {
    #[cfg(windows)]
    fn subscribe(&self, tx: mpsc::Sender<DaemonEvent>) -> Result<WatcherHandle, SubscriptionError> {
        imp::subscribe(tx)
    }

    #[cfg(not(windows))]
    fn subscribe(&self, tx: mpsc::Sender<DaemonEvent>) -> Result<WatcherHandle, SubscriptionError> {
        let _ = tx;
        Err(SubscriptionError::Unsupported)
    }
}

// ── Windows implementation ────────────────────────────────────────────────────

#[cfg(windows)]
mod imp {
    use serde::Deserialize;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{mpsc as std_mpsc, Arc};
    use std::time::Duration;

    use wmi::{COMLibrary, FilterValue, WMIConnection};

    use super::{DeviceArrival, SubscriptionError, WatcherHandle};
    use crate::event::DaemonEvent;

    /// WQL polling interval (the WITHIN clause of the notification query).
    const POLL_WITHIN: Duration = Duration::from_secs(2);

    #[derive(Deserialize, Debug)]
    #[serde(rename = "__InstanceCreationEvent")]
    #[serde(rename_all = "PascalCase")]
    struct PnpCreationEvent {
        target_instance: PnpEntity,
    }

    #[derive(Deserialize, Debug)]
    #[serde(rename = "Win32_PnPEntity")]
    #[serde(rename_all = "PascalCase")]
    struct PnpEntity {
        caption: Option<String>,
        #[serde(rename = "PNPDeviceID")]
        pnp_device_id: Option<String>,
    }

    impl PnpEntity {
        fn device_id(self) -> String {
            self.pnp_device_id
                .filter(|id| !id.is_empty())
                .or(self.caption)
                .unwrap_or_default()
        }
    }

    pub fn subscribe(
        tx: tokio::sync::mpsc::Sender<DaemonEvent>,
    ) -> Result<WatcherHandle, SubscriptionError> {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        // The first recv reports whether WMI registration succeeded on the
        // watcher thread, mirroring the thread-ID handshake the keyboard-hook
        // pump would use.
        let (ready_tx, ready_rx) = std_mpsc::sync_channel::<Result<(), String>>(1);

        std::thread::Builder::new()
            .name("wmi-device-watch".into())
            .spawn(move || run_notification_loop(thread_stop, ready_tx, tx))
            .map_err(|e| SubscriptionError::Init(format!("failed to spawn watcher thread: {e}")))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(WatcherHandle::new(move || stop.store(true, Ordering::Relaxed))),
            Ok(Err(msg)) => Err(SubscriptionError::Init(msg)),
            Err(_) => Err(SubscriptionError::Init(
                "watcher thread exited during setup".to_string(),
            )),
        }
    }

    /// Runs on the dedicated watcher thread. Dropping the WMI connection on
    /// any early return tears the notification registration down, so a failed
    /// setup leaves nothing half-registered.
    fn run_notification_loop(
        stop: Arc<AtomicBool>,
        ready_tx: std_mpsc::SyncSender<Result<(), String>>,
        tx: tokio::sync::mpsc::Sender<DaemonEvent>,
    ) {
        let com = match COMLibrary::new() {
            Ok(com) => com,
            Err(e) => {
                let _ = ready_tx.send(Err(format!("COM initialization failed: {e}")));
                return;
            }
        };
        let wmi_con = match WMIConnection::new(com) {
            Ok(con) => con,
            Err(e) => {
                let _ = ready_tx.send(Err(format!("WMI connection failed: {e}")));
                return;
            }
        };

        let mut filters = HashMap::<String, FilterValue>::new();
        match FilterValue::is_a::<PnpEntity>() {
            Ok(value) => {
                filters.insert("TargetInstance".to_owned(), value);
            }
            Err(e) => {
                let _ = ready_tx.send(Err(format!("notification filter rejected: {e}")));
                return;
            }
        }

        let iterator =
            match wmi_con.filtered_notification::<PnpCreationEvent>(&filters, Some(POLL_WITHIN)) {
                Ok(it) => it,
                Err(e) => {
                    let _ = ready_tx.send(Err(format!("notification query failed: {e}")));
                    return;
                }
            };

        let _ = ready_tx.send(Ok(()));

        for event in iterator {
            if stop.load(Ordering::Relaxed) {
                break;
            }
            let arrival = match event {
                Ok(ev) => DeviceArrival { device_id: ev.target_instance.device_id() },
                Err(e) => {
                    eprintln!("[device] Dropped malformed arrival event: {e}");
                    continue;
                }
            };
            // blocking_send queues behind the event loop if a restart run is
            // still in flight; OS delivery order is preserved.
            if tx.blocking_send(DaemonEvent::DeviceArrived(arrival)).is_err() {
                break;
            }
        }
        eprintln!("[device] Notification thread exited");
    }

}

// ── Tests ─────────────────────────────────────────────────────────────────────
