use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use nix::sys::signal::Signal;

use crate::helpers::command::CommandBuilder;
use crate::helpers::signal::terminate;
use crate::helpers::sudo::wrap_with_sudo;
use crate::prelude::*;
use crate::process::{Pid, ProcessDirectory, SystemDirectory};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    NotRunning,
    Running,
    Exited,
}

/// Owns the lifecycle of the privileged tracer process.
///
/// The tracer is spawned through sudo when the runner is not root, with its
/// output captured to a dedicated log file. Stopping signals the tracer's
/// immediate children before the tracer itself; with the sudo wrapper the
/// supervised pid is sudo's, and the actual tracer is its child.
pub struct Supervisor {
    executable: PathBuf,
    log_path: PathBuf,
    process: Option<Child>,
}

impl Supervisor {
    pub fn new<P: AsRef<Path>>(executable: P, log_path: P) -> Self {
        Self {
            executable: executable.as_ref().to_path_buf(),
            log_path: log_path.as_ref().to_path_buf(),
            process: None,
        }
    }

    /// Spawn the supervised process with elevated privilege.
    ///
    /// Failing to spawn is fatal to the session: the caller must abort.
    pub fn launch(&mut self) -> Result<Pid> {
        let builder = CommandBuilder::new(&self.executable);
        let cmd = wrap_with_sudo(builder)?.build();
        self.attach(cmd)
            .with_context(|| format!("Failed to launch the tracer {}", self.executable.display()))
    }

    fn attach(&mut self, mut cmd: Command) -> Result<Pid> {
        let log_file = File::create(&self.log_path).with_context(|| {
            format!("Failed to create the log file {}", self.log_path.display())
        })?;
        let child = cmd
            .stdout(Stdio::from(log_file.try_clone()?))
            .stderr(Stdio::from(log_file))
            .spawn()?;
        let pid = child.id() as Pid;
        debug!(
            "Supervising process {} ({}), logs in {}",
            pid,
            self.executable.display(),
            self.log_path.display()
        );
        self.process = Some(child);
        Ok(pid)
    }

    /// Non-blocking poll of the live OS state of the supervised process.
    pub fn state(&mut self) -> SupervisorState {
        match self.process.as_mut() {
            None => SupervisorState::NotRunning,
            Some(child) => match child.try_wait() {
                Ok(None) => SupervisorState::Running,
                Ok(Some(_)) => SupervisorState::Exited,
                Err(err) => {
                    debug!("Failed to poll the supervised process: {}", err);
                    SupervisorState::Exited
                }
            },
        }
    }

    pub fn pid(&self) -> Option<Pid> {
        self.process.as_ref().map(|child| child.id() as Pid)
    }

    /// Signal the supervised process and its immediate children, children
    /// first. Idempotent: a no-op unless the process is currently running.
    ///
    /// Signal delivery is fire-and-forget; exit confirmation is up to the
    /// caller. Children that exit between the snapshot and the signal are
    /// silently skipped.
    pub fn stop(&mut self) {
        if self.state() != SupervisorState::Running {
            return;
        }
        let pid = match self.pid() {
            Some(pid) => pid,
            None => return,
        };

        match SystemDirectory::snapshot().children_of(&[pid]) {
            Ok(children) => {
                for child in &children {
                    terminate(child.pid, Signal::SIGINT);
                }
            }
            Err(err) => warn!("Failed to enumerate children of process {}: {}", pid, err),
        }
        terminate(pid, Signal::SIGINT);
    }
}

/// No supervised process outlives its handle: a supervisor discarded while
/// still running stops the process first.
impl Drop for Supervisor {
    fn drop(&mut self) {
        if self.state() == SupervisorState::Running {
            warn!("Supervisor dropped while the tracer is still running, stopping it");
            self.stop();
        }
    }
}

#[cfg(test)]
impl Supervisor {
    /// Launch without the sudo wrapper, for tests that exercise the
    /// supervision lifecycle on an unprivileged process.
    fn launch_unprivileged<I, S>(&mut self, args: I) -> Result<Pid>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        let mut builder = CommandBuilder::new(&self.executable);
        builder.args(args);
        self.attach(builder.build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::{Duration, Instant};

    fn sleeper(dir: &tempfile::TempDir) -> Supervisor {
        Supervisor::new(
            PathBuf::from("/bin/sleep"),
            dir.path().join("supervised.log"),
        )
    }

    fn wait_for_exit(supervisor: &mut Supervisor) -> SupervisorState {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let state = supervisor.state();
            if state != SupervisorState::Running || Instant::now() > deadline {
                return state;
            }
            sleep(Duration::from_millis(50));
        }
    }

    #[test]
    fn test_state_before_launch() {
        let dir = tempfile::tempdir().unwrap();
        let mut supervisor = sleeper(&dir);
        assert_eq!(supervisor.state(), SupervisorState::NotRunning);
        assert_eq!(supervisor.pid(), None);
    }

    #[test]
    fn test_stop_without_launch_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let mut supervisor = sleeper(&dir);
        supervisor.stop();
        supervisor.stop();
        assert_eq!(supervisor.state(), SupervisorState::NotRunning);
    }

    #[test]
    fn test_launch_stop_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let mut supervisor = sleeper(&dir);

        let pid = supervisor.launch_unprivileged(["30"]).unwrap();
        assert!(pid > 0);
        assert_eq!(supervisor.state(), SupervisorState::Running);

        supervisor.stop();
        assert_eq!(wait_for_exit(&mut supervisor), SupervisorState::Exited);

        // Idempotent on an already-exited process
        supervisor.stop();
        assert_eq!(supervisor.state(), SupervisorState::Exited);
    }

    #[test]
    fn test_launch_failure_leaves_nothing_running() {
        let dir = tempfile::tempdir().unwrap();
        let mut supervisor = Supervisor::new(
            PathBuf::from("/nonexistent/tracer"),
            dir.path().join("supervised.log"),
        );

        let result = supervisor.launch_unprivileged([] as [&str; 0]);
        assert!(result.is_err());
        assert_eq!(supervisor.state(), SupervisorState::NotRunning);

        // A failed launch leaves stop() a no-op
        supervisor.stop();
        assert_eq!(supervisor.state(), SupervisorState::NotRunning);
    }

    #[test]
    fn test_state_reflects_natural_exit() {
        let dir = tempfile::tempdir().unwrap();
        let mut supervisor = sleeper(&dir);

        supervisor.launch_unprivileged(["0.1"]).unwrap();
        assert_eq!(wait_for_exit(&mut supervisor), SupervisorState::Exited);
    }
}
