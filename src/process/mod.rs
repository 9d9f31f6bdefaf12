//! Subprocess ownership and lifecycle
//!
//! [`ProcessHandle`] is handed to callers that opt out of automatic
//! draining (long-running or cancellable git operations). It owns the live
//! child, its pipes, and the start timestamp; termination kills the whole
//! process group so a shell-wrapped git cannot leave orphans behind.

pub mod interleave;

use std::io;
use std::process::{Child, ExitStatus};
use std::time::{Duration, Instant};

use wait_timeout::ChildExt;

use crate::process::interleave::InterleavedOutput;

/// Check whether a process with the given PID is alive.
///
/// Sends the null signal (signal 0), which probes existence without
/// delivering anything. `EPERM` still means the process exists.
#[cfg(unix)]
pub fn is_process_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let pid = match i32::try_from(pid) {
        Ok(v) => v,
        Err(_) => return false,
    };
    match kill(Pid::from_raw(pid), None) {
        Ok(()) | Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// A live git subprocess owned by the caller.
///
/// Produced by `GitRunner::spawn`. The caller is responsible for draining
/// the pipes (see [`interleave`]) and reaping the child;
/// [`terminate`](Self::terminate) does both for the cancellation path.
pub struct ProcessHandle {
    child: Child,
    command_line: String,
    started: Instant,
}

impl ProcessHandle {
    pub(crate) fn new(child: Child, command_line: String) -> Self {
        Self {
            child,
            command_line,
            started: Instant::now(),
        }
    }

    /// The fully assembled command line, shell-quoted for display.
    pub fn command_line(&self) -> &str {
        &self.command_line
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Wall-clock time since the process was spawned.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    #[cfg(unix)]
    pub fn is_alive(&self) -> bool {
        is_process_alive(self.child.id())
    }

    /// Mutable access to the underlying child, e.g. to take its pipes for
    /// a custom draining loop.
    pub fn child_mut(&mut self) -> &mut Child {
        &mut self.child
    }

    pub fn into_child(self) -> Child {
        self.child
    }

    /// Wait for exit with a bounded deadline. Returns `None` on timeout;
    /// deadlines themselves are the caller's policy, not the engine's.
    pub fn wait_timeout(&mut self, timeout: Duration) -> io::Result<Option<ExitStatus>> {
        self.child.wait_timeout(timeout)
    }

    /// Wait for the process to exit, releasing its pipes.
    pub fn wait(&mut self) -> io::Result<ExitStatus> {
        self.child.wait()
    }

    /// Kill the process (and, on unix, its whole process group), drain any
    /// remaining pipe content, and reap the child. Cancellation is only
    /// complete once the pipes are at EOF, otherwise readers leak.
    pub fn terminate(mut self) -> io::Result<Option<ExitStatus>> {
        self.signal_group();
        // The child itself, in case it detached from the group.
        let _ = self.child.kill();

        if let (Some(stdout), Some(stderr)) = (self.child.stdout.take(), self.child.stderr.take())
        {
            let mut lines = InterleavedOutput::spawn(stdout, stderr);
            for _ in lines.by_ref() {}
            lines.finish()?;
        }

        self.child.wait().map(Some)
    }

    #[cfg(unix)]
    fn signal_group(&self) {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if let Ok(pid) = i32::try_from(self.child.id()) {
            // The child is spawned as a group leader, so this reaches any
            // grandchildren a wrapping shell may have started.
            let _ = killpg(Pid::from_raw(pid), Signal::SIGTERM);
        }
    }

    #[cfg(not(unix))]
    fn signal_group(&self) {}
}
