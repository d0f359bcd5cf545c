use crate::RuntimeError;
use std::path::PathBuf;
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, ExitStatus};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use zeroize::Zeroizing;

/// Exit code reported when the child outlives its timeout.
pub const EXIT_TIMEOUT: i32 = 124;

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const TERM_GRACE: Duration = Duration::from_secs(2);

/// How the user's command ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildExit {
    Exited(i32),
    Signaled(i32),
    TimedOut,
}

impl ChildExit {
    fn from_status(status: ExitStatus) -> Self {
        use std::os::unix::process::ExitStatusExt;
        match (status.code(), status.signal()) {
            (Some(code), _) => Self::Exited(code),
            (None, Some(sig)) => Self::Signaled(sig),
            (None, None) => Self::Exited(1),
        }
    }

    /// Shell-style exit code: the child's own code, `128 + signal` for a
    /// signal death, [`EXIT_TIMEOUT`] for a timeout.
    pub fn code(self) -> i32 {
        match self {
            Self::Exited(code) => code,
            Self::Signaled(sig) => 128 + sig,
            Self::TimedOut => EXIT_TIMEOUT,
        }
    }

    pub fn success(self) -> bool {
        self == Self::Exited(0)
    }
}

/// The user's command with its environment overrides. Standard streams are
/// inherited from cryptow.
///
/// A command with a timeout runs in its own process group so that the whole
/// group, grandchildren included, is terminated at the deadline. It is then
/// no longer in the terminal's foreground group, so Ctrl-C is forwarded to it
/// through `interrupted`.
#[derive(Debug, Default)]
pub struct ChildCommand {
    pub argv: Vec<String>,
    pub env: Vec<(String, Zeroizing<String>)>,
    pub working_dir: Option<PathBuf>,
    /// Polled while a timed command runs; once it reports true the process
    /// group receives SIGINT.
    pub interrupted: Option<fn() -> bool>,
}

impl ChildCommand {
    pub fn new(argv: Vec<String>) -> Self {
        Self {
            argv,
            ..Self::default()
        }
    }

    pub fn env(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.env.push((key.into(), Zeroizing::new(value.into())));
        self
    }

    pub fn secret_env(&mut self, key: impl Into<String>, value: Zeroizing<String>) -> &mut Self {
        self.env.push((key.into(), value));
        self
    }

    /// Spawn the command and wait for it, killing it once `timeout` elapses.
    /// A timeout too large to represent as a deadline means no deadline.
    pub fn run(&self, timeout: Option<Duration>) -> Result<ChildExit, RuntimeError> {
        let Some((program, args)) = self.argv.split_first() else {
            return Err(RuntimeError::ExecFailed("empty command".to_owned()));
        };
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        if timeout.is_some() && deadline.is_none() {
            debug!("timeout exceeds the clock range, waiting without a deadline");
        }

        let mut command = Command::new(program);
        command.args(args);
        for (key, value) in &self.env {
            command.env(key, value.as_str());
        }
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }
        if deadline.is_some() {
            command.process_group(0);
        }
        debug!("spawning {program} with {} argument(s)", args.len());
        let mut child = command
            .spawn()
            .map_err(|e| RuntimeError::ExecFailed(format!("failed to start '{program}': {e}")))?;

        let Some(deadline) = deadline else {
            return Ok(ChildExit::from_status(child.wait()?));
        };
        let pgid = i32::try_from(child.id())
            .map_err(|_| RuntimeError::ExecFailed(format!("invalid pid {}", child.id())))?;
        let mut forwarded = false;
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(ChildExit::from_status(status));
            }
            if !forwarded && self.interrupted.is_some_and(|check| check()) {
                debug!("forwarding interrupt to process group {pgid}");
                signal_group(pgid, libc::SIGINT);
                forwarded = true;
            }
            if Instant::now() >= deadline {
                warn!(
                    "command exceeded {}s timeout, terminating",
                    timeout.map_or(0, |t| t.as_secs())
                );
                terminate(&mut child, pgid)?;
                return Ok(ChildExit::TimedOut);
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

/// SIGTERM to the process group, then SIGKILL to whatever is left of it once
/// the direct child exits or the grace period ends.
fn terminate(child: &mut Child, pgid: i32) -> Result<(), RuntimeError> {
    signal_group(pgid, libc::SIGTERM);
    let grace_end = Instant::now() + TERM_GRACE;
    let mut exited = false;
    while Instant::now() < grace_end {
        if child.try_wait()?.is_some() {
            exited = true;
            break;
        }
        thread::sleep(POLL_INTERVAL);
    }
    if !exited {
        warn!("pid {pgid} did not exit after SIGTERM, sending SIGKILL");
    }
    signal_group(pgid, libc::SIGKILL);
    if !exited {
        child.wait()?;
    }
    Ok(())
}

fn signal_group(pgid: i32, signal: libc::c_int) {
    // SAFETY: kill() has no memory-safety preconditions; the group id is the
    // pid of a child we spawned into its own group.
    #[allow(unsafe_code)]
    let ret = unsafe { libc::kill(-pgid, signal) };
    if ret != 0 {
        let errno = std::io::Error::last_os_error();
        if errno.raw_os_error() != Some(libc::ESRCH) {
            warn!("failed to send signal {signal} to process group {pgid}: {errno}");
        }
    }
}
