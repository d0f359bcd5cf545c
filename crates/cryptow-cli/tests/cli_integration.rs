//! CLI subprocess integration tests.
//!
//! These tests invoke the `cryptow` binary as a subprocess with the mock
//! volume backend and a fake `pass` script, and verify exit codes, output,
//! and the on-disk state left behind.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

struct Sandbox {
    dir: tempfile::TempDir,
}

impl Sandbox {
    fn new() -> Self {
        let sandbox = Self {
            dir: tempfile::tempdir().unwrap(),
        };
        fs::create_dir_all(sandbox.config_dir()).unwrap();
        fs::create_dir_all(sandbox.pass_store()).unwrap();
        let script = format!(
            r#"#!/bin/sh
store='{store}'
case "$1" in
  show)
    [ -f "$store/$2" ] || {{ echo "Error: $2 is not in the password store." >&2; exit 1; }}
    cat "$store/$2"
    ;;
  generate)
    shift
    [ "$1" = "-n" ] && shift
    mkdir -p "$(dirname "$store/$1")"
    printf 'generated-%s\n' "$2" > "$store/$1"
    ;;
  *)
    exit 2
    ;;
esac
"#,
            store = sandbox.pass_store().display()
        );
        let pass = sandbox.pass_bin();
        fs::write(&pass, script).unwrap();
        fs::set_permissions(&pass, fs::Permissions::from_mode(0o755)).unwrap();
        sandbox
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn config_dir(&self) -> PathBuf {
        self.root().join("config")
    }

    fn data_dir(&self) -> PathBuf {
        self.root().join("data")
    }

    fn pass_store(&self) -> PathBuf {
        self.root().join("pass-store")
    }

    fn pass_bin(&self) -> PathBuf {
        self.root().join("fake-pass")
    }

    fn set_secret(&self, entry: &str, value: &str) {
        let path = self.pass_store().join(entry);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, format!("{value}\n")).unwrap();
    }

    fn write_profiles(&self, yaml: &str) {
        fs::write(
            self.config_dir().join("profiles.yaml"),
            yaml.replace("$ROOT", &self.root().display().to_string()),
        )
        .unwrap();
    }

    fn lock_file(&self, profile: &str) -> PathBuf {
        self.data_dir()
            .join("profiles")
            .join(profile)
            .join("mount.lock")
    }

    fn cryptow(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_cryptow"));
        cmd.env("CRYPTOW_SKIP_PREREQS", "1")
            .env("CRYPTOW_BACKEND", "mock")
            .env("CRYPTOW_PASS", self.pass_bin())
            .env_remove("CRYPTOW_LOG")
            .arg("--config-dir")
            .arg(self.config_dir())
            .arg("--data-dir")
            .arg(self.data_dir());
        cmd
    }

    fn run(&self, args: &[&str]) -> Output {
        self.cryptow().args(args).output().unwrap()
    }
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

const VAULT: &str = r"
profiles:
  vault:
    command: [env]
    env:
      STATIC_VAR: plain
    injectors:
      - type: gocryptfs
        password_entry: gocryptfs/vault
        cipher_dir: $ROOT/cipher
        mount_dir: $ROOT/mnt
      - type: env
        password_entry: env/token
        env: API_TOKEN
";

fn vault_sandbox() -> Sandbox {
    let sandbox = Sandbox::new();
    sandbox.write_profiles(VAULT);
    sandbox.set_secret("gocryptfs/vault", "volume-pass");
    sandbox.set_secret("env/token", "token-from-store");
    let init = sandbox.run(&["init", "vault"]);
    assert!(init.status.success(), "init failed: {}", stderr(&init));
    sandbox
}

#[test]
fn cli_version_exits_zero() {
    let output = Command::new(env!("CARGO_BIN_EXE_cryptow"))
        .arg("--version")
        .output()
        .unwrap();
    assert!(output.status.success());
    assert!(stdout(&output).contains("cryptow"));
}

#[test]
fn cli_help_lists_commands() {
    let output = Command::new(env!("CARGO_BIN_EXE_cryptow"))
        .arg("--help")
        .output()
        .unwrap();
    assert!(output.status.success());
    let text = stdout(&output);
    for command in ["list", "init", "mount", "unmount", "run", "doctor"] {
        assert!(text.contains(command), "help must list '{command}'");
    }
}

#[test]
fn list_without_profiles_file() {
    let sandbox = Sandbox::new();
    let output = sandbox.run(&["list"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("No profiles found"));
}

#[test]
fn list_json_reports_broken_profile_without_failing() {
    let sandbox = Sandbox::new();
    sandbox.write_profiles(
        r#"
profiles:
  good:
    command: ["true"]
    injectors:
      - {type: env, password_entry: env/x, env: X}
  bad:
    command: ["true"]
    injectors:
      - {type: keyring, password_entry: k}
"#,
    );
    let output = sandbox.run(&["list", "--json"]);
    assert!(output.status.success(), "{}", stderr(&output));
    let rows: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    let rows = rows.as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["name"], "bad");
    assert_eq!(rows[0]["status"], "error");
    assert!(rows[0]["error"].as_str().unwrap().contains("keyring"));
    assert_eq!(rows[1]["name"], "good");
    assert_eq!(rows[1]["status"], "unmounted");
}

#[test]
fn run_injects_secret_and_cleans_up() {
    let sandbox = vault_sandbox();
    let output = sandbox.run(&["run", "vault"]);
    assert!(output.status.success(), "run failed: {}", stderr(&output));
    let env = stdout(&output);
    assert!(env.contains("API_TOKEN=token-from-store"));
    assert!(env.contains("STATIC_VAR=plain"));
    assert!(env.contains("CRYPTOW_PROFILE=vault"));
    assert!(env.contains(&format!(
        "CRYPTOW_MOUNT={}",
        sandbox.root().join("mnt").display()
    )));
    assert!(!sandbox.lock_file("vault").exists());
    assert!(!sandbox.root().join("mnt").exists());
    assert!(sandbox.data_dir().join("log").join("cryptow.log").exists());
}

#[test]
fn run_propagates_child_exit_code() {
    let sandbox = vault_sandbox();
    let output = sandbox.run(&["run", "vault", "sh", "-c", "exit 7"]);
    // `env sh -c 'exit 7'` runs the shell through the profile command.
    assert_eq!(output.status.code(), Some(7));
    assert!(stderr(&output).contains("Command exited with code 7"));
    assert!(!sandbox.lock_file("vault").exists());
}

#[test]
fn run_appends_hyphenated_arguments() {
    let sandbox = vault_sandbox();
    let output = sandbox.run(&["run", "vault", "sh", "-c", "echo \"$@\"", "sh", "--flag", "-x"]);
    assert!(output.status.success(), "{}", stderr(&output));
    assert_eq!(stdout(&output).trim(), "--flag -x");
}

#[test]
fn run_with_missing_env_secret_fails_before_command() {
    let sandbox = vault_sandbox();
    fs::remove_file(sandbox.pass_store().join("env/token")).unwrap();
    let marker = sandbox.root().join("ran");
    let marker = marker.to_string_lossy();
    let output = sandbox.run(&["run", "vault", "touch", &marker]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("No secret retrieved from pass for 'env/token'"));
    assert!(!sandbox.root().join("ran").exists());
    assert!(!sandbox.lock_file("vault").exists());
}

#[test]
fn run_uninitialized_profile_names_remedy() {
    let sandbox = Sandbox::new();
    sandbox.write_profiles(VAULT);
    sandbox.set_secret("gocryptfs/vault", "volume-pass");
    let output = sandbox.run(&["run", "vault"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("cryptow init vault"));
    assert!(!sandbox.lock_file("vault").exists());
}

#[test]
fn run_timeout_exits_124() {
    let sandbox = vault_sandbox();
    let output = sandbox.run(&["run", "--timeout", "1", "vault", "sleep", "30"]);
    assert_eq!(output.status.code(), Some(124));
    assert!(stderr(&output).contains("timed out"));
    assert!(!sandbox.lock_file("vault").exists());
}

#[test]
fn run_dry_run_masks_secrets_and_touches_nothing() {
    let sandbox = Sandbox::new();
    sandbox.write_profiles(VAULT);
    let output = sandbox.run(&["run", "--dry-run", "vault", "--extra"]);
    assert!(output.status.success(), "{}", stderr(&output));
    let text = stdout(&output);
    assert!(text.contains("[dry-run] Would run command: env --extra"));
    assert!(text.contains("API_TOKEN=<pass:env/token>"));
    assert!(!text.contains("token-from-store"));
    assert!(!sandbox.lock_file("vault").exists());
    assert!(!sandbox.root().join("mnt").exists());
}

#[test]
fn init_twice_reports_already_initialized() {
    let sandbox = vault_sandbox();
    assert!(sandbox.root().join("cipher/gocryptfs.conf").exists());
    let output = sandbox.run(&["init", "vault"]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("already initialized"));
}

#[test]
fn init_gen_pass_refuses_existing_entry() {
    let sandbox = Sandbox::new();
    sandbox.write_profiles(VAULT);
    sandbox.set_secret("gocryptfs/vault", "preset");
    let output = sandbox.run(&["init", "vault", "--gen-pass"]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("Refusing to overwrite"));
    assert!(!sandbox.root().join("cipher/gocryptfs.conf").exists());
}

#[test]
fn init_gen_pass_creates_entry() {
    let sandbox = Sandbox::new();
    sandbox.write_profiles(VAULT);
    let output = sandbox.run(&["init", "vault", "--gen-pass", "--length", "12"]);
    assert!(output.status.success(), "{}", stderr(&output));
    let generated = fs::read_to_string(sandbox.pass_store().join("gocryptfs/vault")).unwrap();
    assert_eq!(generated.trim(), "generated-12");
    assert!(sandbox.root().join("cipher/gocryptfs.conf").exists());
}

#[test]
fn mount_is_locked_until_forced_unmount() {
    let sandbox = vault_sandbox();
    let output = sandbox.run(&["mount", "vault"]);
    assert!(output.status.success(), "{}", stderr(&output));
    assert!(sandbox.lock_file("vault").exists());

    let again = sandbox.run(&["mount", "vault"]);
    assert_eq!(again.status.code(), Some(3));
    assert!(stderr(&again).contains("Use --force to override"));

    // The mock backend forgets its mounts when the process exits.
    let list = sandbox.run(&["list", "--json"]);
    let rows: serde_json::Value = serde_json::from_str(&stdout(&list)).unwrap();
    assert_eq!(rows[0]["status"], "stale");

    let output = sandbox.run(&["unmount", "--force", "vault"]);
    assert!(output.status.success(), "{}", stderr(&output));
    assert!(!sandbox.lock_file("vault").exists());
}

#[test]
fn unmount_unmounted_profile_is_noop() {
    let sandbox = vault_sandbox();
    let output = sandbox.run(&["unmount", "vault"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("is not mounted"));
}

#[test]
fn missing_tools_fail_on_a_single_line() {
    let sandbox = vault_sandbox();
    let output = sandbox
        .cryptow()
        .env("CRYPTOW_SKIP_PREREQS", "0")
        .env("CRYPTOW_BACKEND", "gocryptfs")
        .env("CRYPTOW_GOCRYPTFS", "/nonexistent/gocryptfs")
        .args(["mount", "vault"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    let err = stderr(&output);
    assert_eq!(err.lines().count(), 1, "{err}");
    assert!(err.starts_with("error: missing prerequisites: /nonexistent/gocryptfs"));
    assert!(!sandbox.lock_file("vault").exists());
}

#[test]
fn unknown_profile_is_a_profile_error() {
    let sandbox = vault_sandbox();
    let output = sandbox.run(&["mount", "nope"]);
    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).starts_with("error: "));
}

#[test]
fn completions_generate_for_bash() {
    let output = Command::new(env!("CARGO_BIN_EXE_cryptow"))
        .args(["completions", "bash"])
        .output()
        .unwrap();
    assert!(output.status.success());
    assert!(stdout(&output).contains("cryptow"));
}

#[test]
fn man_pages_are_written() {
    let sandbox = Sandbox::new();
    let dir = sandbox.root().join("man");
    let output = sandbox
        .cryptow()
        .arg("man-pages")
        .arg(&dir)
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", stderr(&output));
    assert!(dir.join("cryptow.1").exists());
    assert!(dir.join("cryptow-run.1").exists());
}

#[test]
fn doctor_json_reports_checks() {
    let sandbox = vault_sandbox();
    let output = sandbox.run(&["doctor", "--json"]);
    let report: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    let checks = report["checks"].as_array().unwrap();
    assert!(checks.iter().any(|c| c["name"] == "profiles_file" && c["status"] == "pass"));
    assert!(checks.iter().any(|c| c["name"] == "backend"));
}
