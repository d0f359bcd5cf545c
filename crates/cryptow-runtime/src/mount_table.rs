use crate::tools::ToolConfig;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::os::unix::ffi::OsStringExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::debug;

/// Read the mount targets (second field) from a `/proc/mounts`-style table.
/// Paths are raw bytes; nothing here assumes UTF-8.
pub fn read_mount_targets(table: &Path) -> io::Result<Vec<PathBuf>> {
    let content = fs::read(table)?;
    Ok(parse_mount_targets(&content))
}

pub fn parse_mount_targets(content: &[u8]) -> Vec<PathBuf> {
    content
        .split(|&b| b == b'\n')
        .filter_map(|line| {
            line.split(u8::is_ascii_whitespace)
                .filter(|field| !field.is_empty())
                .nth(1)
        })
        .map(|target| PathBuf::from(OsString::from_vec(unescape_mount_field(target))))
        .collect()
}

/// Decode the kernel's `\NNN` octal escapes (space is `\040`, backslash is
/// `\134`). Malformed escapes are kept verbatim.
pub fn unescape_mount_field(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() && is_octal_escape(&bytes[i + 1..i + 4]) {
            let value = (bytes[i + 1] - b'0') * 64 + (bytes[i + 2] - b'0') * 8 + (bytes[i + 3] - b'0');
            out.push(value);
            i += 4;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    out
}

fn is_octal_escape(digits: &[u8]) -> bool {
    digits.len() == 3 && digits[0] <= b'3' && digits.iter().all(|d| (b'0'..=b'7').contains(d))
}

/// Whether `path` is an active mount point.
///
/// The live mount table is authoritative. Only when it cannot be read does
/// this fall back to the external `mountpoint -q` probe.
pub fn probe_mount_point(path: &Path, tools: &ToolConfig) -> bool {
    match read_mount_targets(&tools.mount_table) {
        Ok(targets) => {
            let canonical = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
            targets.iter().any(|t| t == path || *t == canonical)
        }
        Err(e) => {
            debug!(
                "mount table {} unreadable ({e}); probing {} with {}",
                tools.mount_table.display(),
                path.display(),
                tools.mountpoint.display()
            );
            Command::new(&tools.mountpoint)
                .arg("-q")
                .arg(path)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .is_ok_and(|s| s.success())
        }
    }
}
