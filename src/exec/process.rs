use std::io;
use std::os::unix::process::CommandExt;
use std::process::{Child, ExitStatus};
use std::sync::atomic::AtomicBool;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use wait_timeout::ChildExt;

use super::interrupt;

/// How often a waiting child is checked against the interrupt flag.
const POLL: Duration = Duration::from_millis(100);

pub(crate) enum Waited {
    Exited(ExitStatus),
    TimedOut,
    Interrupted,
}

/// A child running as the leader of its own process group.
///
/// Dropping it sends SIGKILL to the whole group and reaps the child, so no
/// descendant outlives the value on any exit path.
pub(crate) struct ScopedProcess {
    child: Child,
    pgid: Pid,
    reaped: bool,
}

impl ScopedProcess {
    pub(crate) fn spawn(cmd: &mut std::process::Command) -> io::Result<Self> {
        let child = cmd.process_group(0).spawn()?;
        let pgid = Pid::from_raw(child.id() as i32);
        Ok(Self {
            child,
            pgid,
            reaped: false,
        })
    }

    /// Wait for exit, the timeout, or an interrupt, whichever comes first.
    /// On timeout or interrupt the group is killed and the child reaped
    /// before returning.
    pub(crate) fn wait(&mut self, timeout: Duration, stop: &AtomicBool) -> io::Result<Waited> {
        let deadline = Instant::now() + timeout;
        loop {
            if interrupt::requested(stop) {
                self.terminate();
                return Ok(Waited::Interrupted);
            }
            let now = Instant::now();
            if now >= deadline {
                self.terminate();
                return Ok(Waited::TimedOut);
            }
            if let Some(status) = self.child.wait_timeout((deadline - now).min(POLL))? {
                self.reaped = true;
                return Ok(Waited::Exited(status));
            }
        }
    }

    /// SIGKILL the group. Already-gone groups are fine.
    pub(crate) fn kill_group(&self) {
        match killpg(self.pgid, Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => log::warn!("killpg({}) failed: {e}", self.pgid),
        }
    }

    fn terminate(&mut self) {
        self.kill_group();
        if !self.reaped {
            if let Err(e) = self.child.wait() {
                log::warn!("reaping pid {} failed: {e}", self.pgid);
            }
            self.reaped = true;
        }
    }
}

impl Drop for ScopedProcess {
    fn drop(&mut self) {
        self.terminate();
    }
}
