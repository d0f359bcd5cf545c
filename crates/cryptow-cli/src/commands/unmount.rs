use super::{json_pretty, print_plan, Failure, EXIT_SUCCESS};
use cryptow_core::{Engine, UnmountOptions};

pub fn run(engine: &Engine, name: &str, dry_run: bool, force: bool, json: bool) -> Result<u8, Failure> {
    let profile = engine.resolve_profile(name)?;
    let was_locked = engine.tracker().is_active(name);
    let plan = engine.unmount(&profile, &UnmountOptions { dry_run, force })?;

    if json {
        let status = match (dry_run, was_locked) {
            (true, _) => "planned",
            (false, true) => "unmounted",
            (false, false) => "not_mounted",
        };
        let payload = serde_json::json!({
            "profile": name,
            "status": status,
            "plan": plan,
        });
        println!("{}", json_pretty(&payload)?);
    } else if !was_locked {
        println!("Profile '{name}' is not mounted.");
    } else if dry_run {
        print_plan("unmount", &plan);
    } else {
        println!("unmounted profile '{name}'");
    }
    Ok(EXIT_SUCCESS)
}
