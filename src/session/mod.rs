use std::fmt::Display;
use std::fs::File;
use std::process::{Child, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use nix::sys::signal::Signal;

use crate::config::Config;
use crate::helpers::command::CommandBuilder;
use crate::helpers::signal::terminate;
use crate::helpers::sudo::wrap_as_user;
use crate::local_logger::{ACCENT_U8_COLOR_CODE, set_progress_bar, unset_progress_bar};
use crate::prelude::*;
use crate::process::{Pid, SystemDirectory, resolver};
use crate::supervisor::Supervisor;

pub mod window;
pub use window::SessionWindow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Warming,
    Active,
    TearingDown,
}

impl Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Warming => write!(f, "warming"),
            SessionState::Active => write!(f, "active"),
            SessionState::TearingDown => write!(f, "tearing down"),
        }
    }
}

/// Shared flag an operator-side trigger (Ctrl-C) flips to short-circuit the
/// session's waits into teardown instead of letting the countdown elapse.
#[derive(Clone, Default)]
pub struct StopToken(Arc<AtomicBool>);

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Sequences one analysis session: start the tracer, let it warm up, run the
/// target command under the requested user, count down the lifetime, then
/// tear down the target's process tree followed by the tracer.
pub struct Session {
    config: Config,
    state: SessionState,
}

impl Session {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            state: SessionState::Idle,
        }
    }

    fn transition(&mut self, to: SessionState) {
        debug!("Session state: {} -> {}", self.state, to);
        self.state = to;
    }

    /// Run the full session. Returns the published window, or `None` when the
    /// session was cancelled before the target command ever started.
    ///
    /// The tracer is stopped on every exit path, including a failed target
    /// spawn: that error is surfaced only after teardown completed.
    pub fn run(&mut self, stop: &StopToken) -> Result<Option<SessionWindow>> {
        let started_at = Utc::now();
        let progress =
            build_progress_bar(self.config.warmup + self.config.lifetime + TEARDOWN_TICKS);
        set_progress_bar(progress.clone());

        let mut supervisor = Supervisor::new(&self.config.tracer_path, &self.config.tracer_log);
        self.transition(SessionState::Warming);
        let tracer_pid = match supervisor.launch() {
            Ok(pid) => pid,
            Err(err) => {
                self.transition(SessionState::Idle);
                unset_progress_bar();
                return Err(err);
            }
        };
        info!(
            "Tracer {} started (pid {})",
            self.config.tracer_path.display(),
            tracer_pid
        );

        let outcome = self.observe(&progress, stop, started_at, tracer_pid);

        self.transition(SessionState::TearingDown);
        progress.set_message("Stopping the tracer...");
        supervisor.stop();
        progress.inc(TEARDOWN_TICKS);
        self.transition(SessionState::Idle);

        let window = outcome?;
        match &window {
            Some(_) => progress.finish_with_message("Ready!"),
            None => progress.abandon_with_message("Cancelled"),
        }
        unset_progress_bar();
        Ok(window)
    }

    fn observe(
        &mut self,
        progress: &ProgressBar,
        stop: &StopToken,
        started_at: chrono::DateTime<Utc>,
        tracer_pid: Pid,
    ) -> Result<Option<SessionWindow>> {
        progress.set_message("Analysing the environment...");
        if !wait_with_progress(self.config.warmup, progress, stop) {
            info!("Session cancelled before the target command started");
            return Ok(None);
        }

        self.transition(SessionState::Active);
        let mut target = self.spawn_target()?;
        let target_pid = target.id() as Pid;

        // Once the target exists, its tree is torn down on every exit path,
        // the error ones included
        let outcome = self.watch_target(&mut target, progress, stop, started_at, tracer_pid);
        progress.set_message("Stopping the launched processes...");
        self.terminate_target_tree(target_pid);
        outcome.map(Some)
    }

    fn watch_target(
        &self,
        target: &mut Child,
        progress: &ProgressBar,
        stop: &StopToken,
        started_at: chrono::DateTime<Utc>,
        tracer_pid: Pid,
    ) -> Result<SessionWindow> {
        // sudo reports a bad user or a missing command by exiting straight away
        thread::sleep(Duration::from_millis(200));
        if let Ok(Some(status)) = target.try_wait() {
            if !status.success() {
                bail!(
                    "The command `{}` could not be started as {} ({status})",
                    shell_words::join(&self.config.command),
                    self.config.user
                );
            }
        }
        let target_pid = target.id() as Pid;
        let window = SessionWindow {
            started_at,
            target_pid,
            tracer_pid,
        };
        let window_path = window.publish()?;
        info!(
            "Observing `{}` as {} for {}s (pid {}), session window in {}",
            shell_words::join(&self.config.command),
            self.config.user,
            self.config.lifetime,
            target_pid,
            window_path.display()
        );

        progress.set_message("Analysing your command...");
        if !wait_with_progress(self.config.lifetime, progress, stop) {
            info!("Session stopped early by the operator");
        }
        Ok(window)
    }

    fn spawn_target(&self) -> Result<Child> {
        let log_file = File::create(&self.config.command_log).with_context(|| {
            format!(
                "Failed to create the log file {}",
                self.config.command_log.display()
            )
        })?;
        let mut builder = CommandBuilder::new(&self.config.command[0]);
        builder.args(&self.config.command[1..]);
        let mut cmd = wrap_as_user(builder, &self.config.user)?.build();
        cmd.stdout(Stdio::from(log_file.try_clone()?))
            .stderr(Stdio::from(log_file));
        cmd.spawn().with_context(|| {
            format!(
                "Failed to run `{}` as {}",
                shell_words::join(&self.config.command),
                self.config.user
            )
        })
    }

    /// Signal the target's whole descendant tree, children before parents,
    /// from a live snapshot of the process table. Processes that exited
    /// between the snapshot and the signal are skipped silently.
    fn terminate_target_tree(&self, target_pid: Pid) {
        let directory = SystemDirectory::snapshot();
        let descendants = match resolver::resolve(&directory, &[target_pid]) {
            Ok(descendants) => descendants,
            Err(err) => {
                warn!(
                    "Failed to resolve the descendants of process {}: {}",
                    target_pid, err
                );
                Vec::new()
            }
        };
        for pid in resolver::termination_order(target_pid, &descendants) {
            terminate(pid, Signal::SIGTERM);
        }
    }
}

/// Tick once per second, bumping the progress bar, until `seconds` elapsed or
/// the stop token was triggered. Returns whether the wait ran to completion.
fn wait_with_progress(seconds: u64, progress: &ProgressBar, stop: &StopToken) -> bool {
    for _ in 0..seconds {
        if stop.is_triggered() {
            return false;
        }
        thread::sleep(Duration::from_secs(1));
        progress.inc(1);
    }
    !stop.is_triggered()
}

/// Extra progress step for the teardown phase: the bar only fills once the
/// target tree and the tracer have both been stopped.
const TEARDOWN_TICKS: u64 = 1;

fn build_progress_bar(total_seconds: u64) -> ProgressBar {
    let bar = ProgressBar::new(total_seconds);
    bar.set_style(
        ProgressStyle::with_template(
            format!(
                "  {{bar:40.{ACCENT_U8_COLOR_CODE}}} {{percent:>3}}% {{wide_msg:.{ACCENT_U8_COLOR_CODE}.bold}}"
            )
            .as_str(),
        )
        .unwrap(),
    );
    bar
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunArgs;
    use std::time::Instant;

    #[test]
    fn test_new_session_is_idle() {
        let session = Session::new(Config::try_from(RunArgs::test()).unwrap());
        assert_eq!(session.state, SessionState::Idle);
    }

    #[test]
    fn test_wait_with_progress_completes() {
        let progress = ProgressBar::hidden();
        progress.set_length(2);
        let stop = StopToken::new();
        assert!(wait_with_progress(2, &progress, &stop));
        assert_eq!(progress.position(), 2);
    }

    #[test]
    fn test_triggered_token_short_circuits_the_wait() {
        let progress = ProgressBar::hidden();
        let stop = StopToken::new();
        stop.trigger();

        let before = Instant::now();
        assert!(!wait_with_progress(3600, &progress, &stop));
        assert!(before.elapsed() < Duration::from_secs(1));
        assert_eq!(progress.position(), 0);
    }

    #[test]
    fn test_terminate_target_tree_kills_the_target_and_its_children() {
        let session = Session::new(Config::try_from(RunArgs::test()).unwrap());
        let mut target = std::process::Command::new("/bin/sh")
            .args(["-c", "sleep 30; sleep 30"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .unwrap();
        // Let the shell start its first child
        thread::sleep(Duration::from_millis(300));

        session.terminate_target_tree(target.id() as Pid);

        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            match target.try_wait().unwrap() {
                Some(_) => break,
                None if Instant::now() > deadline => {
                    panic!("target still running after its tree was terminated")
                }
                None => thread::sleep(Duration::from_millis(50)),
            }
        }
    }

    #[test]
    fn test_progress_holds_below_full_until_teardown() {
        let progress = build_progress_bar(1 + 1 + TEARDOWN_TICKS);
        progress.set_draw_target(indicatif::ProgressDrawTarget::hidden());
        let stop = StopToken::new();

        // Warm-up and lifetime both elapsed: teardown is still pending, the
        // bar must not read 100% yet
        assert!(wait_with_progress(1, &progress, &stop));
        assert!(wait_with_progress(1, &progress, &stop));
        assert!(progress.position() < progress.length().unwrap());

        progress.inc(TEARDOWN_TICKS);
        assert_eq!(progress.position(), progress.length().unwrap());
    }

    #[test]
    fn test_stop_token_is_shared_between_clones() {
        let stop = StopToken::new();
        let clone = stop.clone();
        assert!(!clone.is_triggered());
        stop.trigger();
        assert!(clone.is_triggered());
    }
}
