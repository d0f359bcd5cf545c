use super::{json_pretty, Failure, EXIT_FAILURE, EXIT_SUCCESS};
use cryptow_core::{Engine, ProfileStatus};
use cryptow_runtime::{check_prereqs, format_missing, ToolConfig};
use serde::Serialize;

pub fn run(engine: &Engine, tools: &ToolConfig, json_output: bool) -> Result<u8, Failure> {
    let mut checks: Vec<Check> = Vec::new();
    let mut all_pass = true;

    check_tools(tools, &mut checks, &mut all_pass);
    check_profiles(engine, &mut checks, &mut all_pass);

    let data_dir = engine.layout().data_dir();
    if data_dir.is_dir() {
        checks.push(Check::pass(
            "data_dir",
            &format!("Data directory exists: {}", data_dir.display()),
        ));
    } else {
        checks.push(Check::info(
            "data_dir",
            &format!(
                "Data directory {} not created yet (created on first use)",
                data_dir.display()
            ),
        ));
    }

    print_results(&checks, all_pass, json_output)
}

fn check_tools(tools: &ToolConfig, checks: &mut Vec<Check>, all_pass: &mut bool) {
    checks.push(Check::info(
        "backend",
        &format!("Volume backend: {}", tools.backend),
    ));
    let missing = check_prereqs(tools);
    if missing.is_empty() {
        checks.push(Check::pass(
            "prereqs",
            "gocryptfs, pass, umount and mountpoint are available",
        ));
    } else if tools.backend == "mock" {
        checks.push(Check::warn(
            "prereqs",
            &format!("{} tool(s) missing (ignored by the mock backend)", missing.len()),
        ));
    } else {
        *all_pass = false;
        checks.push(Check::fail("prereqs", &format_missing(&missing)));
    }
}

fn check_profiles(engine: &Engine, checks: &mut Vec<Check>, all_pass: &mut bool) {
    let path = engine.layout().profiles_file();
    let rows = match engine.list_status() {
        Ok(rows) => rows,
        Err(e) => {
            *all_pass = false;
            checks.push(Check::fail("profiles_file", &e.to_string()));
            return;
        }
    };
    if !path.exists() {
        checks.push(Check::warn(
            "profiles_file",
            &format!("No profiles file at {}", path.display()),
        ));
        return;
    }
    checks.push(Check::pass(
        "profiles_file",
        &format!("{} profile(s) defined in {}", rows.len(), path.display()),
    ));

    for row in &rows {
        match row.status {
            ProfileStatus::Error => {
                *all_pass = false;
                checks.push(Check::fail(
                    "profile",
                    row.error.as_deref().unwrap_or("invalid profile"),
                ));
            }
            ProfileStatus::Stale => checks.push(Check::warn(
                "stale_lock",
                &format!(
                    "Profile '{}' has a stale lock (clear it with: cryptow unmount --force {})",
                    row.name, row.name
                ),
            )),
            ProfileStatus::Mounted => checks.push(Check::info(
                "mounted",
                &format!("Profile '{}' is mounted", row.name),
            )),
            ProfileStatus::Unmounted => {}
        }
    }
}

fn print_results(checks: &[Check], all_pass: bool, json_output: bool) -> Result<u8, Failure> {
    if json_output {
        let json = serde_json::json!({
            "healthy": all_pass,
            "checks": checks,
        });
        println!("{}", json_pretty(&json)?);
    } else {
        println!("cryptow doctor\n");
        for check in checks {
            let icon = match check.status {
                "pass" => "✓",
                "fail" => "✗",
                "warn" => "⚠",
                _ => "ℹ",
            };
            println!("  {icon} {}", check.message);
        }
        println!();
        if all_pass {
            println!("All checks passed.");
        } else {
            println!("Some checks failed. See above for details.");
        }
    }
    Ok(if all_pass { EXIT_SUCCESS } else { EXIT_FAILURE })
}

#[derive(Serialize)]
struct Check {
    name: String,
    status: &'static str,
    message: String,
}

impl Check {
    fn new(name: &str, status: &'static str, message: &str) -> Self {
        Self {
            name: name.to_owned(),
            status,
            message: message.to_owned(),
        }
    }

    fn pass(name: &str, message: &str) -> Self {
        Self::new(name, "pass", message)
    }

    fn fail(name: &str, message: &str) -> Self {
        Self::new(name, "fail", message)
    }

    fn warn(name: &str, message: &str) -> Self {
        Self::new(name, "warn", message)
    }

    fn info(name: &str, message: &str) -> Self {
        Self::new(name, "info", message)
    }
}
