use super::{json_pretty, spin_fail, spin_ok, spinner, Failure, EXIT_SUCCESS};
use cryptow_core::{Engine, InitOptions};

pub fn run(
    engine: &Engine,
    name: &str,
    gen_pass: bool,
    length: usize,
    json: bool,
) -> Result<u8, Failure> {
    let profile = engine.resolve_profile(name)?;
    if profile.volume_injectors().is_empty() {
        println!("Profile '{name}' has no gocryptfs injectors; nothing to initialize.");
        return Ok(EXIT_SUCCESS);
    }

    let pb = (!json).then(|| spinner(&format!("initializing '{name}'...")));
    let result = engine.init(&profile, &InitOptions { gen_pass, length });
    let cipher_dirs = match result {
        Ok(dirs) => {
            if let Some(ref pb) = pb {
                spin_ok(pb, &format!("initialized profile '{name}'"));
            }
            dirs
        }
        Err(e) => {
            if let Some(ref pb) = pb {
                spin_fail(pb, "init failed");
            }
            return Err(e.into());
        }
    };

    if json {
        let payload = serde_json::json!({
            "profile": name,
            "cipher_dirs": cipher_dirs,
            "status": "initialized",
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        for dir in &cipher_dirs {
            println!("cipher dir: {}", dir.display());
        }
    }
    Ok(EXIT_SUCCESS)
}
