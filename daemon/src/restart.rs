//! Hard-restart orchestration: kill running instances of each configured
//! executable, wait out a short grace interval, relaunch.
use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use std::process::Command;
use std::sync::Mutex;
use std::time::Duration;

use sysinfo::{Pid, ProcessesToUpdate, System};

use crate::status::{Severity, StatusSink};

/// Pause between terminating a process and relaunching its executable, so the
/// OS has released the image file and any port bindings before the new
/// instance starts. Applied only when something was actually terminated.
pub const TERMINATION_GRACE: Duration = Duration::from_millis(200);

/// Result of one restart attempt for a single executable path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestartOutcome {
    /// The path was not attempted (e.g. the file does not exist).
    Skipped(String),
    /// Running instances were terminated (if any) and a new one launched.
    Succeeded,
    /// Termination or launch failed; later paths are still processed.
    Failed(String),
}

/// Outcome counts for one orchestration run over the configured path list.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub struct RestartSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl RestartSummary {
    fn record(&mut self, outcome: &RestartOutcome) {
        match outcome {
            RestartOutcome::Skipped(_) => self.skipped += 1,
            RestartOutcome::Succeeded => self.succeeded += 1,
            RestartOutcome::Failed(_) => self.failed += 1,
        }
    }
}

/// Narrow seam over the OS process table, so orchestration is testable with a
/// fake that synthesizes running processes and records kill/spawn calls.
pub trait ProcessSupervisor: Send + Sync {
    /// PIDs of running processes whose image name (minus extension) equals
    /// `stem`, case-insensitively.
    fn running_instances(&self, stem: &str) -> Vec<u32>;

    /// Forcibly terminates `pid`. Returns `false` if the signal could not be
    /// delivered; a process that already exited counts as terminated.
    fn terminate(&self, pid: u32) -> bool;

    /// Launches a new process from `path` with no privilege elevation. The
    /// child is not waited on.
    fn launch(&self, path: &Path) -> io::Result<()>;
}

/// Production supervisor backed by the `sysinfo` process table and
/// `std::process::Command`.
pub struct SystemSupervisor {
    system: Mutex<System>,
}

impl SystemSupervisor {
    pub fn new() -> Self {
        Self { system: Mutex::new(System::new()) }
    }
}

impl ProcessSupervisor for SystemSupervisor {
    fn running_instances(&self, stem: &str) -> Vec<u32> {
        let mut sys = self.system.lock().unwrap();
        sys.refresh_processes(ProcessesToUpdate::All, true);
        sys.processes()
            .iter()
            .filter(|(_, process)| {
                let name = process.name().to_string_lossy();
                // Image names carry .exe on Windows; compare stems.
                let name_stem = Path::new(name.as_ref())
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| name.clone().into_owned());
                name_stem.eq_ignore_ascii_case(stem)
            })
            .map(|(pid, _)| pid.as_u32())
            .collect()
    }

    fn terminate(&self, pid: u32) -> bool {
        let sys = self.system.lock().unwrap();
        match sys.process(Pid::from_u32(pid)) {
            Some(process) => process.kill(),
            // Already gone between enumeration and kill.
            None => true,
        }
    }

    fn launch(&self, path: &Path) -> io::Result<()> {
        Command::new(path).spawn().map(|_| ())
    }
}

/// Restarts every executable in `paths`, strictly in sequence.
///
/// Per path: verify the file exists, terminate every running instance whose
/// image name matches the file stem, wait `grace` if anything was terminated,
/// then relaunch. A failing path never prevents the remaining paths from
/// being processed; skip and failure outcomes are reported per item as they
/// occur. The caller decides what to do with the aggregate summary.
pub fn restart_applications(
    paths: &[String],
    supervisor: &dyn ProcessSupervisor,
    grace: Duration,
    sink: &dyn StatusSink,
) -> RestartSummary {
    let mut summary = RestartSummary::default();

    for entry in paths {
        let outcome = restart_one(entry, supervisor, grace);
        let display = file_name_for_display(entry);
        match &outcome {
            RestartOutcome::Skipped(reason) => {
                sink.report(Severity::Warning, &format!("Skipping restart of '{display}': {reason}"));
            }
            RestartOutcome::Failed(reason) => {
                sink.report(Severity::Error, &format!("Error restarting '{display}': {reason}"));
            }
            RestartOutcome::Succeeded => {}
        }
        summary.record(&outcome);
    }

    summary
}

fn restart_one(entry: &str, supervisor: &dyn ProcessSupervisor, grace: Duration) -> RestartOutcome {
    let path = Path::new(entry);
    if !path.is_file() {
        return RestartOutcome::Skipped("file not found".to_string());
    }

    let stem = match path.file_stem() {
        Some(stem) => stem.to_string_lossy().into_owned(),
        None => return RestartOutcome::Skipped("path has no file name".to_string()),
    };

    let running = supervisor.running_instances(&stem);
    let mut terminated = 0usize;
    for pid in &running {
        if supervisor.terminate(*pid) {
            terminated += 1;
        } else {
            // Leave the surviving instance alone rather than racing a
            // relaunch against it; move on to the next path.
            return RestartOutcome::Failed(format!("failed to terminate running instance (pid {pid})"));
        }
    }

    if terminated > 0 {
        std::thread::sleep(grace);
    }

    match supervisor.launch(path) {
        Ok(()) => RestartOutcome::Succeeded,
        Err(e) => RestartOutcome::Failed(format!("failed to launch: {e}")),
    }
}

fn file_name_for_display(entry: &str) -> String {
    Path::new(entry)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| entry.to_string())
}
