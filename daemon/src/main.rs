mod config;
mod device;
mod event;
mod filter;
mod monitor;
mod paths;
mod restart;
mod startup;
mod status;

use std::sync::Arc;
use tokio::sync::mpsc;

use crate::config::SettingsStore;
use crate::device::WmiDeviceNotifier;
use crate::event::DaemonEvent;
use crate::monitor::{MonitorController, MonitorError};
use crate::restart::SystemSupervisor;
use crate::status::{MonitorStatus, Severity, StatusSink, StderrSink};

#[tokio::main]
async fn main() {
    // ── App data directory ────────────────────────────────────────────────────
    let app_dir = paths::app_data_dir();
    if let Err(e) = std::fs::create_dir_all(&app_dir) {
        eprintln!("Failed to create app data directory {}: {e}", app_dir.display());
        std::process::exit(1);
    }

    // ── Settings ──────────────────────────────────────────────────────────────
    let store = SettingsStore::new(paths::settings_file_path());
    let settings = store.load();

    // ── Initial status ────────────────────────────────────────────────────────
    let status_path = paths::status_file_path();
    let mut current_status = MonitorStatus::new();
    status::write_status(&status_path, &current_status);

    // ── Start-at-login registration ───────────────────────────────────────────
    if let Err(e) = startup::apply_auto_start(settings.auto_start) {
        eprintln!("[startup] Failed to sync start-at-login registration: {e:#}");
    }

    let (event_tx, mut event_rx) = mpsc::channel::<DaemonEvent>(32);

    // ── Background tasks ──────────────────────────────────────────────────────
    tokio::spawn(config::watch_settings(store.path().to_path_buf(), event_tx.clone()));

    // Graceful shutdown on Ctrl+C.
    {
        let tx = event_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = tx.send(DaemonEvent::Shutdown).await;
            }
        });
    }

    let sink: Arc<dyn StatusSink> = Arc::new(StderrSink);
    let mut controller = MonitorController::new(
        store.clone(),
        Box::new(WmiDeviceNotifier),
        Arc::new(SystemSupervisor::new()),
        Arc::clone(&sink),
        event_tx.clone(),
    );

    println!("replug-daemon v{} started", env!("CARGO_PKG_VERSION"));

    // Monitoring begins automatically on launch. A dead notification channel
    // is fatal (nothing this process could ever do without it); a mere
    // configuration problem is not — we stay idle and retry when the
    // settings file changes.
    match controller.start() {
        Ok(()) => {}
        Err(MonitorError::Subscription(e)) => {
            sink.report(Severity::Error, &format!("Cannot start monitoring: {e}"));
            current_status.error = Some(e.to_string());
            status::write_status(&status_path, &current_status);
            std::process::exit(1);
        }
        Err(e) => {
            sink.report(Severity::Warning, &format!("Monitoring not started: {e}"));
            current_status.error = Some(e.to_string());
        }
    }
    current_status.state = controller.state();
    status::write_status(&status_path, &current_status);

    // ── Event loop ────────────────────────────────────────────────────────────
    // One event is handled to completion before the next is received, so
    // restart runs for consecutive device arrivals never overlap.
    while let Some(evt) = event_rx.recv().await {
        match evt {
            DaemonEvent::DeviceArrived(arrival) => {
                let summary = controller.handle_arrival(&arrival.device_id);
                current_status.record_arrival(&arrival.device_id, summary);
                current_status.state = controller.state();
                status::write_status(&status_path, &current_status);
            }

            DaemonEvent::SettingsChanged => {
                eprintln!("[settings] Settings file changed on disk");
                // Arrival handling re-reads the file anyway; while idle,
                // refresh the login registration and retry starting.
                if !controller.config_locked() {
                    if let Err(e) = startup::apply_auto_start(store.load_auto_start()) {
                        eprintln!("[startup] Failed to sync start-at-login registration: {e:#}");
                    }
                    match controller.start() {
                        Ok(()) => current_status.error = None,
                        Err(e) => {
                            sink.report(Severity::Warning, &format!("Monitoring not started: {e}"));
                            current_status.error = Some(e.to_string());
                        }
                    }
                    current_status.state = controller.state();
                    status::write_status(&status_path, &current_status);
                }
            }

            DaemonEvent::Shutdown => {
                println!("Shutting down");
                controller.stop();
                current_status.state = controller.state();
                current_status.error = None;
                status::write_status(&status_path, &current_status);
                break;
            }
        }
    }
}
