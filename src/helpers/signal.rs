use crate::helpers::sudo::run_with_sudo;
use crate::prelude::*;
use crate::process::Pid;
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};

/// Best-effort graceful signal delivery.
///
/// A process that already exited is not an error: termination races are
/// expected and ignored. A permission error is retried through sudo, since
/// both the tracer and the target command run under another identity; if that
/// also fails it is reported without interrupting the caller's sweep.
pub fn terminate(pid: Pid, sig: Signal) {
    match signal::kill(nix::unistd::Pid::from_raw(pid), sig) {
        Ok(()) => trace!("Sent {} to process {}", sig.as_str(), pid),
        Err(Errno::ESRCH) => debug!("Process {} already exited", pid),
        Err(Errno::EPERM) => {
            let sig_name = sig.as_str().trim_start_matches("SIG").to_string();
            if let Err(err) = run_with_sudo("kill", ["-s".to_string(), sig_name, pid.to_string()])
            {
                warn!("Failed to signal process {}: {}", pid, err);
            }
        }
        Err(err) => warn!("Failed to signal process {}: {}", pid, err),
    }
}
