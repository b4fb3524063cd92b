//! Child process lifecycle for privileged tool invocations.
//!
//! A long `emerge` or a half-finished `cryptsetup luksFormat` must not keep
//! running after the installer dies. Captured tools run in their own process
//! group with `PR_SET_PDEATHSIG`; interactive tools share the terminal's
//! foreground group and are signalled by PID. Every running tool is tracked
//! in the `ChildRegistry` together with the command line it was started
//! with, so an interrupted run can say what it interrupted.

use nix::libc;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

static CHILD_REGISTRY: OnceLock<Arc<Mutex<ChildRegistry>>> = OnceLock::new();

/// Grace period before SIGKILL when the installer is signalled.
const SIGNAL_GRACE: Duration = Duration::from_secs(3);

/// Grace period before SIGKILL when the run ends normally.
const DROP_GRACE: Duration = Duration::from_secs(5);

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq)]
struct TrackedChild {
    command: String,
    /// Leader of its own process group (captured tools)
    own_group: bool,
}

/// Tools currently running on behalf of a stage, keyed by PID.
#[derive(Debug, Default)]
pub struct ChildRegistry {
    children: BTreeMap<u32, TrackedChild>,
    /// Set once termination started; later calls are no-ops
    stopping: bool,
}

impl ChildRegistry {
    /// Process-wide registry shared by the runner and the signal thread.
    pub fn global() -> Arc<Mutex<ChildRegistry>> {
        CHILD_REGISTRY
            .get_or_init(|| Arc::new(Mutex::new(ChildRegistry::default())))
            .clone()
    }

    pub fn register(&mut self, pid: u32, command: impl Into<String>, own_group: bool) {
        let command = command.into();
        tracing::debug!(pid, %command, own_group, "tracking tool process");
        self.children.insert(pid, TrackedChild { command, own_group });
    }

    pub fn unregister(&mut self, pid: u32) {
        if self.children.remove(&pid).is_some() {
            tracing::debug!(pid, "tool process finished");
        }
    }

    pub fn count(&self) -> usize {
        self.children.len()
    }

    /// Stop every tracked tool: SIGTERM, wait up to `grace`, SIGKILL the
    /// rest. Returns the command lines that were still running.
    pub fn terminate_all(&mut self, grace: Duration) -> Vec<String> {
        if self.stopping {
            return Vec::new();
        }
        self.stopping = true;

        let children = std::mem::take(&mut self.children);
        if children.is_empty() {
            return Vec::new();
        }
        tracing::warn!(count = children.len(), "stopping running tools");

        for (&pid, child) in &children {
            deliver(pid, child.own_group, Signal::SIGTERM);
        }

        let deadline = Instant::now() + grace;
        while Instant::now() < deadline && children.keys().any(|&pid| is_running(pid)) {
            std::thread::sleep(POLL_INTERVAL);
        }

        for (&pid, child) in &children {
            if is_running(pid) {
                tracing::warn!(pid, command = %child.command, "tool ignored SIGTERM, killing");
                deliver(pid, child.own_group, Signal::SIGKILL);
            }
        }

        children.into_values().map(|child| child.command).collect()
    }
}

/// Signal a tool; group leaders get the signal on the whole group so the
/// `tar` under a `sh -c` is reached too.
fn deliver(pid: u32, own_group: bool, sig: Signal) {
    let target = if own_group {
        Pid::from_raw(-(pid as i32))
    } else {
        Pid::from_raw(pid as i32)
    };
    if let Err(e) = signal::kill(target, sig) {
        tracing::debug!(pid, signal = %sig, error = %e, "signal not delivered");
        if own_group {
            let _ = signal::kill(Pid::from_raw(pid as i32), sig);
        }
    }
}

/// Present and neither zombie nor dead.
fn is_running(pid: u32) -> bool {
    if signal::kill(Pid::from_raw(pid as i32), None).is_err() {
        return false;
    }
    std::fs::read_to_string(format!("/proc/{}/stat", pid))
        .ok()
        .and_then(|stat| {
            // The state follows the parenthesised command name
            let after_name = stat.rsplit_once(')')?.1;
            after_name.split_whitespace().next().map(|s| !matches!(s, "Z" | "X"))
        })
        .unwrap_or(true)
}

/// Held by `main` for the whole installation; stops leftover tools on drop.
pub struct ProcessGuard {
    registry: Arc<Mutex<ChildRegistry>>,
}

impl ProcessGuard {
    pub fn new() -> Self {
        Self {
            registry: ChildRegistry::global(),
        }
    }
}

impl Default for ProcessGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        if let Ok(mut registry) = self.registry.lock() {
            for command in registry.terminate_all(DROP_GRACE) {
                tracing::warn!(%command, "tool still running at exit was stopped");
            }
        }
    }
}

/// Watch SIGINT/SIGTERM/SIGHUP on a background thread: stop running tools,
/// tell the operator what was interrupted and exit with `128 + signo`.
pub fn init_signal_handlers() -> Result<(), std::io::Error> {
    use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])?;

    std::thread::spawn(move || {
        if let Some(sig) = signals.forever().next() {
            tracing::warn!(signal = sig, "installation interrupted");
            let interrupted = ChildRegistry::global()
                .lock()
                .map(|mut registry| registry.terminate_all(SIGNAL_GRACE))
                .unwrap_or_default();
            for command in &interrupted {
                eprintln!("\n[INTERRUPTED] {}", command);
            }
            eprintln!("The target is left as it is; inspect it before re-running.");
            std::process::exit(128 + sig);
        }
    });

    Ok(())
}

/// Puts a `Command` in its own process group, tied to the installer's life.
pub trait CommandProcessGroup {
    fn in_new_process_group(&mut self) -> &mut Self;
}

impl CommandProcessGroup for std::process::Command {
    fn in_new_process_group(&mut self) -> &mut Self {
        use std::os::unix::process::CommandExt;
        // SAFETY: setpgid and prctl are async-signal-safe.
        unsafe {
            self.pre_exec(|| {
                nix::unistd::setpgid(Pid::from_raw(0), Pid::from_raw(0))
                    .map_err(std::io::Error::other)?;
                if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    #[test]
    fn test_register_unregister() {
        let mut registry = ChildRegistry::default();
        registry.register(1234, "emerge --sync", true);
        registry.register(5678, "passwd", false);
        assert_eq!(registry.count(), 2);

        registry.unregister(1234);
        registry.unregister(1234);
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_terminate_reports_interrupted_group() {
        let mut child = Command::new("sleep")
            .arg("60")
            .in_new_process_group()
            .spawn()
            .expect("spawn sleep");
        let pid = child.id();

        let mut registry = ChildRegistry::default();
        registry.register(pid, "sleep 60", true);
        assert!(is_running(pid));

        let interrupted = registry.terminate_all(Duration::from_secs(2));
        assert_eq!(interrupted, vec!["sleep 60".to_string()]);
        assert!(!child.wait().expect("reap").success());
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_terminate_single_process() {
        let mut child = Command::new("sleep").arg("60").spawn().expect("spawn sleep");
        let mut registry = ChildRegistry::default();
        registry.register(child.id(), "sleep 60", false);

        registry.terminate_all(Duration::from_secs(2));
        assert!(!child.wait().expect("reap").success());
    }

    #[test]
    fn test_termination_runs_once() {
        let mut registry = ChildRegistry::default();
        registry.register(999_999, "gone", false);
        assert_eq!(registry.terminate_all(Duration::from_millis(10)), vec!["gone".to_string()]);

        registry.register(999_998, "late", false);
        assert!(registry.terminate_all(Duration::from_millis(10)).is_empty());
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_missing_pid_not_running() {
        assert!(!is_running(999_999));
    }
}
