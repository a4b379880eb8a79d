use std::collections::HashSet;
use std::io;
use std::process::Command;
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

/// Keeps track of spawned child processes so their whole tree, including
/// anything the child spawned itself, can be terminated on interrupt.
pub trait ProcessSupervisor: Send + Sync {
    /// Adjusts `command` before it is spawned so its tree can be signalled.
    fn prepare(&self, command: &mut Command);

    fn track(&self, pid: u32);

    fn release(&self, pid: u32);

    /// Process ids currently tracked.
    fn live(&self) -> Vec<u32>;

    /// Terminates the tree rooted at `pid`.
    fn terminate_tree(&self, pid: u32) -> io::Result<()>;

    /// Terminates every tracked tree. Keeps going past failures and returns
    /// the first one.
    fn terminate_all(&self) -> io::Result<()> {
        let mut first = None;

        for pid in self.live() {
            debug!("Terminating process tree {pid}");
            if let Err(e) = self.terminate_tree(pid) {
                warn!("Couldn't terminate process tree {pid}: {e}");
                first.get_or_insert(e);
            }
            self.release(pid);
        }

        first.map_or(Ok(()), Err)
    }
}

/// Exit code of a run stopped by the operator.
pub const INTERRUPTED: i32 = 130;

/// Takes every tracked tree down after an operator interrupt and returns the
/// exit code to leave with.
pub fn interrupted(supervisor: &dyn ProcessSupervisor) -> i32 {
    warn!("Interrupted, stopping {} running process tree(s)", supervisor.live().len());
    if let Err(e) = supervisor.terminate_all() {
        warn!("Couldn't stop every process tree: {e}");
    }
    INTERRUPTED
}

/// Routes Ctrl-C through [`interrupted`], then exits.
///
/// Children run in their own process group, so the terminal's interrupt
/// only reaches this process and the handler is what stops them.
pub fn install_interrupt_handler(supervisor: Arc<dyn ProcessSupervisor>) -> Result<(), ctrlc::Error> {
    ctrlc::set_handler(move || std::process::exit(interrupted(supervisor.as_ref())))
}

/// Process groups on Unix, `taskkill /T` on Windows.
#[derive(Debug, Default)]
pub struct OsSupervisor {
    live: Mutex<HashSet<u32>>,
}

impl OsSupervisor {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProcessSupervisor for OsSupervisor {
    #[cfg(unix)]
    fn prepare(&self, command: &mut Command) {
        use std::os::unix::process::CommandExt;
        // The child leads a new group whose id equals its pid.
        command.process_group(0);
    }

    #[cfg(not(unix))]
    fn prepare(&self, _command: &mut Command) {}

    fn track(&self, pid: u32) {
        if let Ok(mut live) = self.live.lock() {
            live.insert(pid);
        }
    }

    fn release(&self, pid: u32) {
        if let Ok(mut live) = self.live.lock() {
            live.remove(&pid);
        }
    }

    fn live(&self) -> Vec<u32> {
        let mut pids: Vec<u32> = self
            .live
            .lock()
            .map(|live| live.iter().copied().collect())
            .unwrap_or_default();
        pids.sort_unstable();
        pids
    }

    #[cfg(unix)]
    fn terminate_tree(&self, pid: u32) -> io::Result<()> {
        let status = Command::new("sh")
            .args(["-c", &format!("kill -TERM -{pid}")])
            .status()?;

        if status.success() {
            Ok(())
        } else {
            Err(io::Error::other(format!("kill exited with {status}")))
        }
    }

    #[cfg(windows)]
    fn terminate_tree(&self, pid: u32) -> io::Result<()> {
        let status = Command::new("taskkill")
            .args(["/PID", &pid.to_string(), "/T", "/F"])
            .status()?;

        if status.success() {
            Ok(())
        } else {
            Err(io::Error::other(format!("taskkill exited with {status}")))
        }
    }

    #[cfg(not(any(unix, windows)))]
    fn terminate_tree(&self, _pid: u32) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "process trees are not supported"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_and_release() {
        let supervisor = OsSupervisor::new();
        supervisor.track(42);
        supervisor.track(7);
        assert_eq!(supervisor.live(), vec![7, 42]);

        supervisor.release(42);
        assert_eq!(supervisor.live(), vec![7]);
    }

    #[cfg(unix)]
    #[test]
    fn test_terminate_all_kills_group() {
        let supervisor = OsSupervisor::new();
        let mut command = Command::new("sh");
        command.args(["-c", "sleep 30 & sleep 30"]);
        supervisor.prepare(&mut command);

        let mut child = command.spawn().unwrap();
        supervisor.track(child.id());
        supervisor.terminate_all().unwrap();

        let status = child.wait().unwrap();
        assert!(!status.success());
        assert!(supervisor.live().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_interrupt_stops_running_tree() {
        let supervisor = OsSupervisor::new();
        let mut command = Command::new("sh");
        command.args(["-c", "sleep 30"]);
        supervisor.prepare(&mut command);

        let mut child = command.spawn().unwrap();
        supervisor.track(child.id());

        assert_eq!(interrupted(&supervisor), INTERRUPTED);
        assert!(!child.wait().unwrap().success());
        assert!(supervisor.live().is_empty());
    }

    #[test]
    fn test_interrupt_with_nothing_running() {
        assert_eq!(interrupted(&OsSupervisor::new()), INTERRUPTED);
    }
}
