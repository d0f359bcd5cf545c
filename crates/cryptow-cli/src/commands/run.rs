use super::{json_pretty, print_plan, Failure, EXIT_FAILURE, EXIT_SUCCESS};
use console::style;
use cryptow_core::{Engine, RunOptions, RunPlan, RunReport};
use cryptow_runtime::ChildExit;
use std::time::Duration;

pub struct Flags {
    pub dry_run: bool,
    pub force: bool,
    pub timeout: Option<u64>,
    pub args: Vec<String>,
}

/// Any failure that keeps the command from running exits with 1; otherwise
/// the command's own exit code is returned.
pub fn run(engine: &Engine, name: &str, flags: Flags, json: bool) -> Result<u8, Failure> {
    let opts = RunOptions {
        dry_run: flags.dry_run,
        force: flags.force,
        timeout: flags.timeout.map(Duration::from_secs),
        extra_args: flags.args,
    };
    execute(engine, name, &opts, json).map_err(|f| Failure::new(EXIT_FAILURE, f.message))
}

fn execute(engine: &Engine, name: &str, opts: &RunOptions, json: bool) -> Result<u8, Failure> {
    let profile = engine.resolve_profile(name)?;

    match engine.run(&profile, opts)? {
        RunReport::DryRun(plan) => {
            if json {
                println!("{}", json_pretty(&plan)?);
            } else {
                print_run_plan(&plan);
            }
            Ok(EXIT_SUCCESS)
        }
        RunReport::Completed {
            exit,
            reused,
            unmount_error,
            exit_code,
        } => {
            let outcome = Outcome {
                exit,
                reused,
                unmount_error: unmount_error.as_deref(),
                timeout: opts.timeout,
            };
            for message in outcome.messages(name) {
                eprintln!("{}", style(message).bold());
            }
            Ok(u8::try_from(exit_code).unwrap_or(EXIT_FAILURE))
        }
    }
}

/// What the operator is told once the command has finished.
struct Outcome<'a> {
    exit: ChildExit,
    reused: bool,
    unmount_error: Option<&'a str>,
    timeout: Option<Duration>,
}

impl Outcome<'_> {
    fn messages(&self, name: &str) -> Vec<String> {
        let mut messages = Vec::new();
        if self.reused {
            messages.push(format!(
                "Profile '{name}' was already mounted; reused the existing mount and left it mounted."
            ));
        }
        match self.exit {
            ChildExit::TimedOut => messages.push(format!(
                "Command timed out after {}s (exit code {})",
                self.timeout.map_or(0, |t| t.as_secs()),
                self.exit.code()
            )),
            other if other.code() != 0 => {
                messages.push(format!("Command exited with code {}", other.code()));
            }
            _ => {}
        }
        if let Some(error) = self.unmount_error {
            messages.push(format!("Failed to unmount profile '{name}': {error}"));
        }
        messages
    }
}

fn print_run_plan(plan: &RunPlan) {
    if plan.reuse {
        println!(
            "[dry-run] Profile '{}' is already mounted; would reuse existing mount.",
            plan.profile
        );
    } else if let Some(mount) = &plan.mount {
        print_plan("mount", mount);
    }
    println!("[dry-run] Would run command: {}", plan.command.join(" "));
    if !plan.env.is_empty() {
        println!("[dry-run] Environment overrides:");
        for (key, value) in &plan.env {
            println!("  {key}={value}");
        }
    }
    if let Some(dir) = &plan.working_dir {
        println!("[dry-run] Working directory: {}", dir.display());
    }
}
