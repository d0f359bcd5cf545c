use crate::tools::ToolConfig;
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::process::Command;

/// A missing prerequisite with actionable install instructions.
#[derive(Debug, Serialize)]
pub struct MissingPrereq {
    pub name: String,
    pub purpose: &'static str,
    pub install_hint: &'static str,
}

impl fmt::Display for MissingPrereq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "  - {}: {} (install: {})",
            self.name, self.purpose, self.install_hint
        )
    }
}

fn command_exists(program: &Path) -> bool {
    if program.components().count() > 1 {
        return program.is_file();
    }
    Command::new("which")
        .arg(program)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Check the external tools mount, unmount and secret retrieval depend on.
/// Returns a list of missing items. Empty list means all prerequisites are met.
pub fn check_prereqs(tools: &ToolConfig) -> Vec<MissingPrereq> {
    let required: [(&Path, &'static str, &'static str); 4] = [
        (
            tools.gocryptfs.as_path(),
            "encrypted volume mounts",
            "zypper install gocryptfs | apt install gocryptfs | dnf install gocryptfs | pacman -S gocryptfs",
        ),
        (
            tools.pass.as_path(),
            "secret retrieval",
            "zypper install password-store | apt install pass | dnf install pass | pacman -S pass",
        ),
        (
            tools.umount.as_path(),
            "unmounting volumes",
            "part of util-linux (usually pre-installed)",
        ),
        (
            tools.mountpoint.as_path(),
            "mount probing when the mount table is unreadable",
            "part of util-linux (usually pre-installed)",
        ),
    ];

    required
        .into_iter()
        .filter(|(program, _, _)| !command_exists(program))
        .map(|(program, purpose, install_hint)| MissingPrereq {
            name: program.display().to_string(),
            purpose,
            install_hint,
        })
        .collect()
}

/// Format a list of missing prerequisites into a user-friendly error message.
pub fn format_missing(missing: &[MissingPrereq]) -> String {
    use std::fmt::Write as _;
    let mut msg = String::from("missing prerequisites:\n");
    for m in missing {
        let _ = writeln!(msg, "{m}");
    }
    msg.push_str("\ncryptow requires these tools to mount volumes and read secrets.");
    msg
}

/// Single-line form of [`format_missing`] for `error:` messages.
pub fn summarize_missing(missing: &[MissingPrereq]) -> String {
    let items: Vec<String> = missing
        .iter()
        .map(|m| format!("{} (needed for {}; install: {})", m.name, m.purpose, m.install_hint))
        .collect();
    format!("missing prerequisites: {}", items.join("; "))
}
