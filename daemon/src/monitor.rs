//! Monitor controller: owns the device-watcher lifecycle and turns accepted
//! device arrivals into restart runs.
//!
//! All arrival handling happens on the daemon's single event-loop context,
//! one event to completion before the next, so two restart orchestrations
//! can never overlap. Configuration is locked (for the external UI) exactly
//! while monitoring is active; the handling path re-reads the settings file
//! on every arrival instead of caching it.
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::SettingsStore;
use crate::device::{DeviceNotifier, SubscriptionError, WatcherHandle};
use crate::event::DaemonEvent;
use crate::filter;
use crate::restart::{restart_applications, ProcessSupervisor, RestartSummary, TERMINATION_GRACE};
use crate::status::{MonitorState, Severity, StatusSink};

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("no applications configured")]
    NoApplications,
    #[error("no valid executable paths")]
    NoValidPaths,
    #[error(transparent)]
    Subscription(#[from] SubscriptionError),
}

pub struct MonitorController {
    store: SettingsStore,
    notifier: Box<dyn DeviceNotifier>,
    supervisor: Arc<dyn ProcessSupervisor>,
    sink: Arc<dyn StatusSink>,
    events: mpsc::Sender<DaemonEvent>,
    grace: Duration,
    state: MonitorState,
    watcher: Option<WatcherHandle>,
}

impl MonitorController {
    pub fn new(
        store: SettingsStore,
        notifier: Box<dyn DeviceNotifier>,
        supervisor: Arc<dyn ProcessSupervisor>,
        sink: Arc<dyn StatusSink>,
        events: mpsc::Sender<DaemonEvent>,
    ) -> Self {
        Self {
            store,
            notifier,
            supervisor,
            sink,
            events,
            grace: TERMINATION_GRACE,
            state: MonitorState::Idle,
            watcher: None,
        }
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    /// Whether configuration mutation is currently disabled for the external
    /// caller. Tied 1:1 to the monitor state.
    pub fn config_locked(&self) -> bool {
        self.state == MonitorState::Monitoring
    }

    /// Subscribes to device arrivals and transitions Idle → Monitoring.
    ///
    /// Refused (state unchanged) when no applications are configured or none
    /// of the configured paths currently exist on disk. A subscription
    /// failure also leaves the controller Idle; the notifier guarantees
    /// nothing stays half-registered. Calling while already monitoring is a
    /// no-op.
    pub fn start(&mut self) -> Result<(), MonitorError> {
        if self.state == MonitorState::Monitoring {
            return Ok(());
        }

        let paths = self.store.load_paths();
        if paths.is_empty() {
            return Err(MonitorError::NoApplications);
        }
        let valid = paths.iter().filter(|p| Path::new(p).is_file()).count();
        if valid == 0 {
            return Err(MonitorError::NoValidPaths);
        }

        let handle = self.notifier.subscribe(self.events.clone())?;
        self.watcher = Some(handle);
        self.state = MonitorState::Monitoring;
        self.sink.report(
            Severity::Info,
            &format!("Monitoring started for {valid} application(s). Waiting for device arrivals"),
        );
        Ok(())
    }

    /// Unregisters the device watcher and transitions to Idle.
    /// Idempotent and infallible; the second call in a row is a no-op.
    pub fn stop(&mut self) {
        if let Some(mut watcher) = self.watcher.take() {
            watcher.stop();
        }
        if self.state != MonitorState::Idle {
            self.state = MonitorState::Idle;
            self.sink.report(Severity::Info, "Monitoring stopped");
        }
    }

    /// Handles one device arrival to completion: re-load settings, evaluate
    /// the filter, and (on acceptance) run the restart orchestration.
    ///
    /// Returns the restart summary, or `None` when the arrival was filtered
    /// out or the controller is not monitoring. Invoked only from the event
    /// loop, so runs are strictly serialized.
    pub fn handle_arrival(&mut self, device_id: &str) -> Option<RestartSummary> {
        if self.state != MonitorState::Monitoring {
            return None;
        }

        // Read-through: every arrival observes the latest saved configuration.
        let settings = self.store.load();
        let patterns = settings.filter_patterns();
        let display = if device_id.is_empty() { "<unknown device>" } else { device_id };

        if !filter::accepts(device_id, &patterns, self.sink.as_ref()) {
            self.sink.report(
                Severity::Info,
                &format!("'{display}': no matching filter, restart skipped"),
            );
            return None;
        }

        self.sink.report(
            Severity::Info,
            &format!(
                "Device connected: '{display}'. Restarting {} application(s)",
                settings.paths.len()
            ),
        );
        let summary = restart_applications(
            &settings.paths,
            self.supervisor.as_ref(),
            self.grace,
            self.sink.as_ref(),
        );
        // Inherited behavior: the aggregate message only appears when at
        // least one restart succeeded; all-failed runs stay per-item.
        if summary.succeeded > 0 {
            self.sink.report(
                Severity::Info,
                &format!("Successfully restarted {} application(s)", summary.succeeded),
            );
        }
        Some(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::status::RecordingSink;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Notifier fake: counts subscriptions and watcher teardowns, optionally
    /// scripted to fail registration.
    struct FakeNotifier {
        subscribed: Arc<AtomicUsize>,
        stopped: Arc<AtomicUsize>,
        fail: bool,
    }

    impl FakeNotifier {
        fn working() -> (Self, Arc<AtomicUsize>, Arc<AtomicUsize>) {
            let subscribed = Arc::new(AtomicUsize::new(0));
            let stopped = Arc::new(AtomicUsize::new(0));
            let notifier = Self {
                subscribed: Arc::clone(&subscribed),
                stopped: Arc::clone(&stopped),
                fail: false,
            };
            (notifier, subscribed, stopped)
        }

        fn failing() -> Self {
            Self {
                subscribed: Arc::new(AtomicUsize::new(0)),
                stopped: Arc::new(AtomicUsize::new(0)),
                fail: true,
            }
        }
    }

    impl DeviceNotifier for FakeNotifier {
        fn subscribe(
            &self,
            _tx: mpsc::Sender<DaemonEvent>,
        ) -> Result<WatcherHandle, SubscriptionError> {
            if self.fail {
                return Err(SubscriptionError::Init(
                    "notification service unavailable".to_string(),
                ));
            }
            self.subscribed.fetch_add(1, Ordering::SeqCst);
            let stopped = Arc::clone(&self.stopped);
            Ok(WatcherHandle::new(move || {
                stopped.fetch_add(1, Ordering::SeqCst);
            }))
        }
    }

    /// Supervisor fake: no processes ever running, every launch succeeds,
    /// every call recorded in order.
    #[derive(Default)]
    struct LaunchRecorder {
        calls: Mutex<Vec<String>>,
    }

    impl LaunchRecorder {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl ProcessSupervisor for LaunchRecorder {
        fn running_instances(&self, stem: &str) -> Vec<u32> {
            self.calls.lock().unwrap().push(format!("enumerate {stem}"));
            Vec::new()
        }

        fn terminate(&self, _pid: u32) -> bool {
            true
        }

        fn launch(&self, path: &Path) -> io::Result<()> {
            let stem = path.file_stem().unwrap().to_string_lossy().into_owned();
            self.calls.lock().unwrap().push(format!("launch {stem}"));
            Ok(())
        }
    }

    struct Harness {
        controller: MonitorController,
        store: SettingsStore,
        sink: Arc<RecordingSink>,
        supervisor: Arc<LaunchRecorder>,
        subscribed: Arc<AtomicUsize>,
        stopped: Arc<AtomicUsize>,
        _rx: mpsc::Receiver<DaemonEvent>,
    }

    fn harness(dir: &tempfile::TempDir, settings: Settings) -> Harness {
        let store = SettingsStore::new(dir.path().join("settings.toml"));
        store.save(&settings).unwrap();

        let (notifier, subscribed, stopped) = FakeNotifier::working();
        let sink = Arc::new(RecordingSink::new());
        let supervisor = Arc::new(LaunchRecorder::default());
        let (tx, rx) = mpsc::channel(8);

        let mut controller = MonitorController::new(
            store.clone(),
            Box::new(notifier),
            Arc::clone(&supervisor) as Arc<dyn ProcessSupervisor>,
            Arc::clone(&sink) as Arc<dyn StatusSink>,
            tx,
        );
        controller.grace = Duration::ZERO;

        Harness { controller, store, sink, supervisor, subscribed, stopped, _rx: rx }
    }

    /// Creates a real file so start()'s path validation passes.
    fn touch(dir: &tempfile::TempDir, name: &str) -> String {
        let path = dir.path().join(name);
        std::fs::write(&path, b"").unwrap();
        path.to_string_lossy().into_owned()
    }

    fn settings_with(paths: Vec<String>, filter_text: &str) -> Settings {
        Settings { paths, filter_text: filter_text.to_string(), ..Settings::default() }
    }

    // ── start validation ──────────────────────────────────────────────────────

    #[test]
    fn start_with_empty_application_list_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let mut h = harness(&dir, Settings::default());

        let err = h.controller.start().unwrap_err();
        assert!(matches!(err, MonitorError::NoApplications));
        assert_eq!(h.controller.state(), MonitorState::Idle);
        assert!(!h.controller.config_locked());
        assert_eq!(h.subscribed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn start_with_only_missing_paths_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("gone.exe").to_string_lossy().into_owned();
        let mut h = harness(&dir, settings_with(vec![missing], ""));

        let err = h.controller.start().unwrap_err();
        assert!(matches!(err, MonitorError::NoValidPaths));
        assert_eq!(h.controller.state(), MonitorState::Idle);
    }

    #[test]
    fn start_subscribes_and_locks_configuration() {
        let dir = tempfile::tempdir().unwrap();
        let exe = touch(&dir, "foo.exe");
        let mut h = harness(&dir, settings_with(vec![exe], "usb"));

        h.controller.start().unwrap();
        assert_eq!(h.controller.state(), MonitorState::Monitoring);
        assert!(h.controller.config_locked());
        assert_eq!(h.subscribed.load(Ordering::SeqCst), 1);
        assert!(h.sink.contains("Monitoring started for 1 application(s)"));
    }

    #[test]
    fn start_while_monitoring_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let exe = touch(&dir, "foo.exe");
        let mut h = harness(&dir, settings_with(vec![exe], "usb"));

        h.controller.start().unwrap();
        h.controller.start().unwrap();
        assert_eq!(h.subscribed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn subscription_failure_leaves_controller_idle() {
        let dir = tempfile::tempdir().unwrap();
        let exe = touch(&dir, "foo.exe");
        let store = SettingsStore::new(dir.path().join("settings.toml"));
        store.save(&settings_with(vec![exe], "usb")).unwrap();

        let sink = Arc::new(RecordingSink::new());
        let (tx, _rx) = mpsc::channel(8);
        let mut controller = MonitorController::new(
            store,
            Box::new(FakeNotifier::failing()),
            Arc::new(LaunchRecorder::default()) as Arc<dyn ProcessSupervisor>,
            Arc::clone(&sink) as Arc<dyn StatusSink>,
            tx,
        );

        let err = controller.start().unwrap_err();
        assert!(matches!(err, MonitorError::Subscription(_)));
        assert_eq!(controller.state(), MonitorState::Idle);
        assert!(!controller.config_locked());
    }

    // ── stop ──────────────────────────────────────────────────────────────────

    #[test]
    fn stop_twice_is_a_noop_the_second_time() {
        let dir = tempfile::tempdir().unwrap();
        let exe = touch(&dir, "foo.exe");
        let mut h = harness(&dir, settings_with(vec![exe], "usb"));

        h.controller.start().unwrap();
        h.controller.stop();
        assert_eq!(h.controller.state(), MonitorState::Idle);
        assert_eq!(h.stopped.load(Ordering::SeqCst), 1);

        let reports_after_first_stop = h.sink.messages().len();
        h.controller.stop();
        assert_eq!(h.controller.state(), MonitorState::Idle);
        assert_eq!(h.stopped.load(Ordering::SeqCst), 1);
        assert_eq!(h.sink.messages().len(), reports_after_first_stop);
    }

    #[test]
    fn stop_before_start_is_safe() {
        let dir = tempfile::tempdir().unwrap();
        let mut h = harness(&dir, Settings::default());
        h.controller.stop();
        assert_eq!(h.controller.state(), MonitorState::Idle);
    }

    // ── arrival handling ──────────────────────────────────────────────────────

    #[test]
    fn arrival_while_idle_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let exe = touch(&dir, "foo.exe");
        let mut h = harness(&dir, settings_with(vec![exe], "usb"));

        assert!(h.controller.handle_arrival("USB Drive").is_none());
        assert!(h.supervisor.calls().is_empty());
    }

    #[test]
    fn rejected_arrival_never_invokes_the_orchestrator() {
        let dir = tempfile::tempdir().unwrap();
        let exe = touch(&dir, "foo.exe");
        let mut h = harness(&dir, settings_with(vec![exe], "(?i)usb.*drive"));

        h.controller.start().unwrap();
        let summary = h.controller.handle_arrival("Bluetooth Mouse");

        assert!(summary.is_none());
        assert!(h.supervisor.calls().is_empty());
        assert!(h.sink.contains("no matching filter, restart skipped"));
    }

    #[test]
    fn accepted_arrival_restarts_and_summarizes() {
        let dir = tempfile::tempdir().unwrap();
        let exe = touch(&dir, "foo.exe");
        let mut h = harness(&dir, settings_with(vec![exe], "(?i)usb.*drive"));

        h.controller.start().unwrap();
        let summary = h.controller.handle_arrival("USB Mass Storage Drive").unwrap();

        assert_eq!(summary, RestartSummary { succeeded: 1, failed: 0, skipped: 0 });
        assert_eq!(h.supervisor.calls(), vec!["enumerate foo", "launch foo"]);
        assert!(h.sink.contains("Successfully restarted 1 application(s)"));
    }

    #[test]
    fn empty_device_id_is_rejected_when_filters_exist() {
        let dir = tempfile::tempdir().unwrap();
        let exe = touch(&dir, "foo.exe");
        let mut h = harness(&dir, settings_with(vec![exe], ".*"));

        h.controller.start().unwrap();
        assert!(h.controller.handle_arrival("").is_none());
        assert!(h.supervisor.calls().is_empty());
    }

    #[test]
    fn all_skipped_run_emits_no_aggregate_success_message() {
        let dir = tempfile::tempdir().unwrap();
        let exe = touch(&dir, "foo.exe");
        let mut h = harness(&dir, settings_with(vec![exe.clone()], "usb"));

        h.controller.start().unwrap();
        // The executable disappears between start and the arrival.
        std::fs::remove_file(&exe).unwrap();
        let summary = h.controller.handle_arrival("USB Drive").unwrap();

        assert_eq!(summary, RestartSummary { succeeded: 0, failed: 0, skipped: 1 });
        assert!(!h.sink.contains("Successfully restarted"));
        assert!(h.sink.contains("file not found"));
    }

    // ── read-through configuration ────────────────────────────────────────────

    #[test]
    fn each_arrival_observes_the_latest_saved_settings() {
        let dir = tempfile::tempdir().unwrap();
        let exe = touch(&dir, "foo.exe");
        let mut h = harness(&dir, settings_with(vec![exe], "usb"));

        h.controller.start().unwrap();
        assert!(h.controller.handle_arrival("usb stick").is_some());

        // Saved between arrivals; no restart for the same device id now.
        h.store.save_filter_text("bluetooth").unwrap();
        assert!(h.controller.handle_arrival("usb stick").is_none());
        assert_eq!(h.supervisor.calls(), vec!["enumerate foo", "launch foo"]);
    }

    // ── serialization of back-to-back arrivals ────────────────────────────────

    #[test]
    fn back_to_back_arrivals_never_interleave_restart_runs() {
        let dir = tempfile::tempdir().unwrap();
        let a = touch(&dir, "a.exe");
        let b = touch(&dir, "b.exe");
        let mut h = harness(&dir, settings_with(vec![a, b], "usb"));

        h.controller.start().unwrap();
        h.controller.handle_arrival("usb one").unwrap();
        h.controller.handle_arrival("usb two").unwrap();

        // Each run completes over the full path list before the next begins.
        assert_eq!(
            h.supervisor.calls(),
            vec![
                "enumerate a", "launch a", "enumerate b", "launch b",
                "enumerate a", "launch a", "enumerate b", "launch b",
            ]
        );
    }
}
