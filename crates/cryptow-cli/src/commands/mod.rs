pub mod completions;
pub mod doctor;
pub mod init;
pub mod list;
pub mod man_pages;
pub mod mount;
pub mod run;
pub mod unmount;

use cryptow_core::{CoreError, Plan, ProfileStatus};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_PROFILE_ERROR: u8 = 2;
pub const EXIT_STATE_ERROR: u8 = 3;

/// A command failure: the single-line message printed after `error:` and
/// the process exit code.
#[derive(Debug)]
pub struct Failure {
    pub code: u8,
    pub message: String,
}

impl Failure {
    pub fn new(code: u8, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<CoreError> for Failure {
    fn from(e: CoreError) -> Self {
        let code = match e {
            CoreError::Profile(_) => EXIT_PROFILE_ERROR,
            CoreError::Store(_) => EXIT_STATE_ERROR,
            _ => EXIT_FAILURE,
        };
        Self::new(code, e.to_string())
    }
}

impl From<String> for Failure {
    fn from(message: String) -> Self {
        Self::new(EXIT_FAILURE, message)
    }
}

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

fn style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template).unwrap_or_else(|_| ProgressStyle::default_spinner())
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        style("{spinner:.cyan} {msg}")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    pb.set_style(style("{msg}"));
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    pb.set_style(style("{msg}"));
    pb.finish_with_message(format!("✗ {msg}"));
}

pub fn colorize_status(status: ProfileStatus) -> String {
    use console::Style;
    let text = status.to_string();
    match status {
        ProfileStatus::Mounted => Style::new().green().bold().apply_to(text).to_string(),
        ProfileStatus::Unmounted => Style::new().dim().apply_to(text).to_string(),
        ProfileStatus::Stale => Style::new().yellow().apply_to(text).to_string(),
        ProfileStatus::Error => Style::new().red().apply_to(text).to_string(),
    }
}

/// Print a dry-run plan, one action per line.
pub fn print_plan(verb: &str, plan: &Plan) {
    println!("[dry-run] Would {verb} profile '{}'", plan.profile);
    for step in &plan.steps {
        println!("  {step}");
    }
    for note in &plan.notes {
        println!("  note: {note}");
    }
    println!("[dry-run] No commands executed");
}
