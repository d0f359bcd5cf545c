use super::{json_pretty, print_plan, spin_fail, spin_ok, spinner, Failure, EXIT_SUCCESS};
use cryptow_core::{Engine, MountOptions};

pub fn run(engine: &Engine, name: &str, dry_run: bool, force: bool, json: bool) -> Result<u8, Failure> {
    let profile = engine.resolve_profile(name)?;
    let opts = MountOptions { dry_run, force };

    if dry_run {
        let plan = engine.mount(&profile, &opts)?;
        if json {
            println!("{}", json_pretty(&plan)?);
        } else {
            print_plan("mount", &plan);
        }
        return Ok(EXIT_SUCCESS);
    }

    let pb = (!json).then(|| spinner(&format!("mounting '{name}'...")));
    match engine.mount(&profile, &opts) {
        Ok(_) => {
            if let Some(ref pb) = pb {
                spin_ok(pb, &format!("mounted profile '{name}'"));
            }
        }
        Err(e) => {
            if let Some(ref pb) = pb {
                spin_fail(pb, "mount failed");
            }
            return Err(e.into());
        }
    }

    if json {
        let payload = serde_json::json!({
            "profile": name,
            "mount_dirs": profile.mount_dirs(),
            "status": "mounted",
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        for dir in profile.mount_dirs() {
            println!("mounted at {}", dir.display());
        }
    }
    Ok(EXIT_SUCCESS)
}
