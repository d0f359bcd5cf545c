use crate::RuntimeError;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use tracing::debug;

/// Locations of the external tools cryptow drives. Each can be overridden
/// through an environment variable, which is also how tests substitute fakes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolConfig {
    pub gocryptfs: PathBuf,
    pub pass: PathBuf,
    pub umount: PathBuf,
    pub mountpoint: PathBuf,
    pub mount_table: PathBuf,
    /// Volume backend name, see [`select_backend`](crate::select_backend).
    pub backend: String,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            gocryptfs: PathBuf::from("gocryptfs"),
            pass: PathBuf::from("pass"),
            umount: PathBuf::from("umount"),
            mountpoint: PathBuf::from("mountpoint"),
            mount_table: PathBuf::from("/proc/self/mounts"),
            backend: "gocryptfs".to_owned(),
        }
    }
}

impl ToolConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok().filter(|v| !v.is_empty()))
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let path = |key: &str, fallback: PathBuf| lookup(key).map_or(fallback, PathBuf::from);
        Self {
            gocryptfs: path("CRYPTOW_GOCRYPTFS", defaults.gocryptfs),
            pass: path("CRYPTOW_PASS", defaults.pass),
            umount: path("CRYPTOW_UMOUNT", defaults.umount),
            mountpoint: path("CRYPTOW_MOUNTPOINT", defaults.mountpoint),
            mount_table: path("CRYPTOW_MOUNTS_PATH", defaults.mount_table),
            backend: lookup("CRYPTOW_BACKEND").unwrap_or(defaults.backend),
        }
    }
}

pub(crate) fn tool_name(program: &Path) -> String {
    program
        .file_name()
        .unwrap_or(program.as_os_str())
        .to_string_lossy()
        .into_owned()
}

/// Run a tool to completion with captured output and no stdin.
pub(crate) fn run_tool<I, S>(program: &Path, args: I) -> Result<Output, RuntimeError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    debug!("exec: {command:?}");
    command.output().map_err(|e| RuntimeError::ToolUnavailable {
        tool: tool_name(program),
        detail: e.to_string(),
    })
}

/// Like [`run_tool`], but a non-zero exit becomes [`RuntimeError::ToolFailed`].
pub(crate) fn run_tool_checked<I, S>(program: &Path, args: I) -> Result<Output, RuntimeError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = run_tool(program, args)?;
    if output.status.success() {
        Ok(output)
    } else {
        Err(RuntimeError::ToolFailed {
            tool: tool_name(program),
            detail: failure_detail(&output),
        })
    }
}

/// One-line description of a failed tool run: its stderr collapsed onto a
/// single line, or the exit status when stderr is empty.
pub(crate) fn failure_detail(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let lines: Vec<&str> = stderr
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    if lines.is_empty() {
        output.status.to_string()
    } else {
        format!("{} ({})", lines.join("; "), output.status)
    }
}
