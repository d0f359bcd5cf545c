use crate::concurrency::interrupt_requested;
use crate::lifecycle::ProfileStatus;
use crate::session::MountSession;
use crate::CoreError;
use cryptow_runtime::{
    select_backend, ChildCommand, ChildExit, PassStore, Passfile, RuntimeError, SecretStore,
    ToolConfig, VolumeBackend,
};
use cryptow_schema::{validate_profile_name, Profile, ProfilesFile, VolumeInjector};
use cryptow_store::{StateLayout, StateTracker};
use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Central orchestration engine for cryptow profiles.
///
/// Owns the on-disk session tracker and the two external seams (volume
/// backend and secret store) and provides init, mount, unmount, run, and
/// status operations on resolved profiles.
pub struct Engine {
    layout: StateLayout,
    tracker: StateTracker,
    backend: Arc<dyn VolumeBackend>,
    secrets: Arc<dyn SecretStore>,
    interrupted: fn() -> bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct InitOptions {
    /// Generate the password-store entry before initializing.
    pub gen_pass: bool,
    pub length: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MountOptions {
    pub dry_run: bool,
    /// Delete an existing lock marker before acquiring.
    pub force: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UnmountOptions {
    pub dry_run: bool,
    /// Fall back to a lazy unmount, keep going past failures, and always
    /// clear the session markers.
    pub force: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub dry_run: bool,
    pub force: bool,
    pub timeout: Option<Duration>,
    /// Appended to the profile command verbatim.
    pub extra_args: Vec<String>,
}

/// One planned backend action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PlanStep {
    Mount {
        cipher_dir: PathBuf,
        mount_dir: PathBuf,
        password_entry: String,
    },
    Unmount {
        mount_dir: PathBuf,
    },
}

impl fmt::Display for PlanStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mount {
                cipher_dir,
                mount_dir,
                password_entry,
            } => write!(
                f,
                "mount {} -> {} (pass: {password_entry})",
                cipher_dir.display(),
                mount_dir.display()
            ),
            Self::Unmount { mount_dir } => write!(f, "unmount {}", mount_dir.display()),
        }
    }
}

/// Ordered backend actions for one profile, plus read-only observations
/// that would affect a real run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Plan {
    pub profile: String,
    pub steps: Vec<PlanStep>,
    pub notes: Vec<String>,
}

/// What `run` would do, computed without side effects.
#[derive(Debug, Clone, Serialize)]
pub struct RunPlan {
    pub profile: String,
    /// True when every volume is already mounted and would be reused.
    pub reuse: bool,
    pub mount: Option<Plan>,
    pub command: Vec<String>,
    /// Environment overrides in application order. Secrets are shown as
    /// `<pass:entry>`.
    pub env: Vec<(String, String)>,
    pub working_dir: Option<PathBuf>,
}

#[derive(Debug)]
pub enum RunReport {
    DryRun(RunPlan),
    Completed {
        exit: ChildExit,
        reused: bool,
        /// Set when the trailing unmount failed.
        unmount_error: Option<String>,
        exit_code: i32,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct ProfileSummary {
    pub name: String,
    pub status: ProfileStatus,
    pub mount_dirs: Vec<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Engine {
    /// Engine backed by the tools named in `tools` and the `pass` store.
    pub fn new(layout: StateLayout, tools: &ToolConfig) -> Result<Self, CoreError> {
        let backend: Arc<dyn VolumeBackend> = Arc::from(select_backend(tools)?);
        let secrets: Arc<dyn SecretStore> = Arc::new(PassStore::new(tools.pass.clone()));
        Ok(Self::with_parts(layout, backend, secrets))
    }

    pub fn with_parts(
        layout: StateLayout,
        backend: Arc<dyn VolumeBackend>,
        secrets: Arc<dyn SecretStore>,
    ) -> Self {
        Self {
            tracker: StateTracker::new(layout.clone()),
            layout,
            backend,
            secrets,
            interrupted: interrupt_requested,
        }
    }

    /// Replace the Ctrl-C check consulted by [`run`](Self::run).
    #[must_use]
    pub fn with_interrupt_check(mut self, interrupted: fn() -> bool) -> Self {
        self.interrupted = interrupted;
        self
    }

    pub fn layout(&self) -> &StateLayout {
        &self.layout
    }

    pub fn tracker(&self) -> &StateTracker {
        &self.tracker
    }

    pub fn backend(&self) -> &dyn VolumeBackend {
        self.backend.as_ref()
    }

    pub fn profiles(&self) -> Result<ProfilesFile, CoreError> {
        Ok(ProfilesFile::load(self.layout.profiles_file())?)
    }

    /// Sorted profile names. A missing profiles file yields none.
    pub fn list_profile_names(&self) -> Result<Vec<String>, CoreError> {
        Ok(self.profiles()?.names())
    }

    /// Resolve and validate a profile, ensuring its state directory exists.
    pub fn resolve_profile(&self, name: &str) -> Result<Profile, CoreError> {
        validate_profile_name(name)?;
        let profile = self
            .profiles()?
            .resolve(name, &self.layout.default_dirs())?;
        self.layout.ensure_profile_dir(&profile.name)?;
        Ok(profile)
    }

    /// Whether every volume of `profile` is live in the mount table.
    /// Profiles without volumes are never considered mounted.
    pub fn is_mounted(&self, profile: &Profile) -> bool {
        self.backend.all_mounted(&profile.mount_dirs())
    }

    pub fn list_status(&self) -> Result<Vec<ProfileSummary>, CoreError> {
        let file = self.profiles()?;
        let defaults = self.layout.default_dirs();
        Ok(file
            .names()
            .into_iter()
            .map(|name| match file.resolve(&name, &defaults) {
                Ok(profile) => self.summarize(&profile),
                Err(e) => ProfileSummary {
                    name,
                    status: ProfileStatus::Error,
                    mount_dirs: Vec::new(),
                    pid: None,
                    error: Some(e.to_string()),
                },
            })
            .collect())
    }

    pub fn summarize(&self, profile: &Profile) -> ProfileSummary {
        let locked = self.tracker.is_active(&profile.name);
        let marker = if locked {
            self.tracker.process_marker(&profile.name)
        } else {
            None
        };
        let dirs = profile.mount_dirs();
        let live = if dirs.is_empty() {
            marker.as_ref().is_some_and(|m| m.is_alive())
        } else {
            self.backend.all_mounted(&dirs)
        };
        ProfileSummary {
            name: profile.name.clone(),
            status: ProfileStatus::classify(locked, live),
            mount_dirs: dirs.iter().map(|d| d.to_path_buf()).collect(),
            pid: marker.map(|m| m.pid),
            error: None,
        }
    }

    /// Create the ciphertext stores that do not exist yet. Returns the cipher
    /// directories initialized by this call.
    ///
    /// Stores left over from an interrupted earlier init are skipped; only a
    /// profile whose stores all exist is refused. With `gen_pass`, each
    /// distinct entry is generated once, an entry already backing an existing
    /// store is reused, and any other existing entry is refused before
    /// anything is written.
    pub fn init(&self, profile: &Profile, opts: &InitOptions) -> Result<Vec<PathBuf>, CoreError> {
        let (done, pending): (Vec<&VolumeInjector>, Vec<&VolumeInjector>) = profile
            .volume_injectors()
            .into_iter()
            .partition(|volume| self.backend.is_initialized(&volume.cipher_dir));
        if pending.is_empty() {
            return match done.first() {
                Some(volume) => Err(CoreError::AlreadyInitialized {
                    profile: profile.name.clone(),
                    cipher_dir: volume.cipher_dir.clone(),
                }),
                None => Ok(Vec::new()),
            };
        }
        for volume in &done {
            info!(
                "{} is already initialized, skipping",
                volume.cipher_dir.display()
            );
        }

        if opts.gen_pass {
            for entry in self.entries_to_generate(&done, &pending)? {
                info!("generating pass entry '{entry}' for '{}'", profile.name);
                self.secrets.generate(entry, opts.length)?;
            }
        }

        let mut initialized = Vec::with_capacity(pending.len());
        for volume in pending {
            fs::create_dir_all(&volume.cipher_dir)?;
            let secret = self.secrets.fetch(&volume.password_entry)?;
            let passfile = Passfile::create(&secret)?;
            let result = self.backend.init(&volume.cipher_dir, passfile.path());
            passfile.remove();
            result?;
            info!(
                "initialized '{}' at {}",
                profile.name,
                volume.cipher_dir.display()
            );
            initialized.push(volume.cipher_dir.clone());
        }
        Ok(initialized)
    }

    /// Distinct entries of `pending` volumes that `init --gen-pass` must
    /// create, in declaration order.
    fn entries_to_generate<'p>(
        &self,
        done: &[&VolumeInjector],
        pending: &[&'p VolumeInjector],
    ) -> Result<Vec<&'p str>, CoreError> {
        let mut entries: Vec<&'p str> = Vec::new();
        for volume in pending {
            let entry = volume.password_entry.as_str();
            if entries.contains(&entry) || done.iter().any(|d| d.password_entry == entry) {
                continue;
            }
            if self.secrets.exists(entry)? {
                return Err(RuntimeError::SecretExists(entry.to_owned()).into());
            }
            entries.push(entry);
        }
        Ok(entries)
    }

    fn mount_plan(&self, profile: &Profile) -> Plan {
        let mut plan = Plan {
            profile: profile.name.clone(),
            ..Plan::default()
        };
        if self.tracker.is_active(&profile.name) {
            plan.notes.push(format!(
                "lock marker present at {}",
                self.layout.lock_file(&profile.name).display()
            ));
        }
        for volume in profile.volume_injectors() {
            if !self.backend.is_initialized(&volume.cipher_dir) {
                plan.notes.push(format!(
                    "{} is not initialized (cryptow init {})",
                    volume.cipher_dir.display(),
                    profile.name
                ));
            }
            plan.steps.push(PlanStep::Mount {
                cipher_dir: volume.cipher_dir.clone(),
                mount_dir: volume.mount_dir.clone(),
                password_entry: volume.password_entry.clone(),
            });
        }
        plan
    }

    fn unmount_plan(&self, profile: &Profile) -> Plan {
        let mut plan = Plan {
            profile: profile.name.clone(),
            ..Plan::default()
        };
        if !self.tracker.is_active(&profile.name) {
            plan.notes
                .push(format!("profile '{}' is not mounted", profile.name));
            return plan;
        }
        plan.steps = profile
            .volume_injectors()
            .into_iter()
            .rev()
            .map(|volume| PlanStep::Unmount {
                mount_dir: volume.mount_dir.clone(),
            })
            .collect();
        plan
    }

    fn check_initialized(&self, profile: &Profile) -> Result<(), CoreError> {
        match profile
            .volume_injectors()
            .into_iter()
            .find(|volume| !self.backend.is_initialized(&volume.cipher_dir))
        {
            Some(volume) => Err(CoreError::NotInitialized {
                profile: profile.name.clone(),
                cipher_dir: volume.cipher_dir.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Mount every volume in declaration order under a freshly acquired
    /// lock. If any volume fails, the ones already mounted are unmounted in
    /// reverse, the session markers are cleared, and the mount error is
    /// returned. A dry run only returns the plan.
    pub fn mount(&self, profile: &Profile, opts: &MountOptions) -> Result<Plan, CoreError> {
        let plan = self.mount_plan(profile);
        if opts.dry_run {
            return Ok(plan);
        }
        self.check_initialized(profile)?;
        self.tracker.acquire(&profile.name, opts.force)?;
        if let Err(e) = self.tracker.record_process(&profile.name) {
            self.tracker.release(&profile.name);
            return Err(e.into());
        }

        let mut mounted: Vec<&VolumeInjector> = Vec::new();
        for volume in profile.volume_injectors() {
            if let Err(e) = self.mount_volume(profile, volume) {
                warn!(
                    "mount of '{}' failed after {} volume(s), rolling back: {e}",
                    profile.name,
                    mounted.len()
                );
                self.rollback(&mounted);
                self.tracker.release(&profile.name);
                return Err(e);
            }
            mounted.push(volume);
        }
        info!("mounted profile '{}'", profile.name);
        Ok(plan)
    }

    fn mount_volume(&self, profile: &Profile, volume: &VolumeInjector) -> Result<(), CoreError> {
        fs::create_dir_all(&volume.cipher_dir)?;
        fs::create_dir_all(&volume.mount_dir)?;
        let secret = self.secrets.fetch(&volume.password_entry)?;
        let passfile = Passfile::create(&secret)?;
        let result = self
            .backend
            .mount(&volume.cipher_dir, &volume.mount_dir, passfile.path());
        passfile.remove();
        result.map_err(|source| CoreError::Mount {
            profile: profile.name.clone(),
            mount_dir: volume.mount_dir.clone(),
            source,
        })?;
        info!(
            "mounted '{}' at {}",
            profile.name,
            volume.mount_dir.display()
        );
        Ok(())
    }

    fn rollback(&self, mounted: &[&VolumeInjector]) {
        for volume in mounted.iter().rev() {
            let dir = &volume.mount_dir;
            if let Err(e) = self.backend.unmount(dir) {
                warn!("rollback: unmount {} failed: {e}", dir.display());
                if let Err(e) = self.backend.unmount_lazy(dir) {
                    warn!("rollback: lazy unmount {} failed: {e}", dir.display());
                    continue;
                }
            }
            remove_mount_dir(dir);
        }
    }

    /// Unmount every volume in reverse declaration order and clear the
    /// session markers. Unlocked profiles are a no-op (with `force`, stray
    /// process markers are cleared too).
    ///
    /// Without `force` the first failure is returned and the lock is kept.
    /// With `force`, a failed unmount is retried lazily, remaining volumes
    /// are still processed, the markers are always cleared, and the first
    /// failure the lazy retry could not resolve is returned.
    pub fn unmount(&self, profile: &Profile, opts: &UnmountOptions) -> Result<Plan, CoreError> {
        let plan = self.unmount_plan(profile);
        if opts.dry_run {
            return Ok(plan);
        }
        if !self.tracker.is_active(&profile.name) {
            debug!("profile '{}' is not locked, nothing to unmount", profile.name);
            if opts.force {
                self.tracker.release(&profile.name);
            }
            return Ok(plan);
        }

        let mut first_failure: Option<CoreError> = None;
        for volume in profile.volume_injectors().into_iter().rev() {
            let dir = &volume.mount_dir;
            if opts.force && !self.backend.is_mounted(dir) {
                debug!("{} is not mounted, skipping", dir.display());
                remove_mount_dir(dir);
                continue;
            }
            match self.backend.unmount(dir) {
                Ok(()) => {}
                Err(source) if !opts.force => {
                    return Err(CoreError::Unmount {
                        profile: profile.name.clone(),
                        mount_dir: dir.clone(),
                        source,
                    });
                }
                Err(e) => {
                    warn!("unmount {} failed ({e}), retrying lazily", dir.display());
                    if let Err(source) = self.backend.unmount_lazy(dir) {
                        warn!("lazy unmount {} failed: {source}", dir.display());
                        first_failure.get_or_insert(CoreError::Unmount {
                            profile: profile.name.clone(),
                            mount_dir: dir.clone(),
                            source,
                        });
                        continue;
                    }
                    warn!("unmounted {} lazily", dir.display());
                }
            }
            remove_mount_dir(dir);
        }

        self.tracker.release(&profile.name);
        match first_failure {
            Some(e) => Err(e),
            None => {
                info!("unmounted profile '{}'", profile.name);
                Ok(plan)
            }
        }
    }

    /// Mount `profile` and hand back a guard that unmounts it again.
    pub fn open_session<'a>(
        &'a self,
        profile: &'a Profile,
        force: bool,
    ) -> Result<MountSession<'a>, CoreError> {
        self.mount(
            profile,
            &MountOptions {
                dry_run: false,
                force,
            },
        )?;
        Ok(MountSession::new(self, profile))
    }

    pub(crate) fn teardown(&self, profile: &Profile) -> Result<(), CoreError> {
        self.unmount(
            profile,
            &UnmountOptions {
                dry_run: false,
                force: true,
            },
        )
        .map(|_| ())
    }

    fn command_line(profile: &Profile, opts: &RunOptions) -> Vec<String> {
        profile
            .command
            .iter()
            .chain(&opts.extra_args)
            .cloned()
            .collect()
    }

    /// Static overrides, the identity variable and, for fresh mounts, the
    /// primary volume's directories.
    fn base_env(profile: &Profile, fresh: bool) -> Vec<(String, String)> {
        let mut env: Vec<(String, String)> = profile
            .env
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        env.push(("CRYPTOW_PROFILE".to_owned(), profile.name.clone()));
        if fresh {
            if let Some(primary) = profile.primary_volume() {
                env.push((
                    "CRYPTOW_MOUNT".to_owned(),
                    primary.mount_dir.display().to_string(),
                ));
                env.push((
                    "CRYPTOW_CIPHER".to_owned(),
                    primary.cipher_dir.display().to_string(),
                ));
            }
        }
        env
    }

    fn run_plan(&self, profile: &Profile, opts: &RunOptions) -> RunPlan {
        let reuse = self.is_mounted(profile);
        let mut env = Self::base_env(profile, !reuse);
        env.extend(profile.env_injectors().into_iter().map(|inj| {
            (
                inj.env_var.clone(),
                format!("<pass:{}>", inj.password_entry),
            )
        }));
        RunPlan {
            profile: profile.name.clone(),
            reuse,
            mount: (!reuse).then(|| self.mount_plan(profile)),
            command: Self::command_line(profile, opts),
            env,
            working_dir: profile.working_dir.clone(),
        }
    }

    /// Run the profile command with its volumes mounted and secrets injected.
    ///
    /// A profile whose volumes are all live already is reused and left
    /// mounted. Otherwise it is mounted for the duration of the command and
    /// force-unmounted afterwards whatever the command's outcome. Secrets are
    /// fetched only after mounting succeeded. A failed trailing unmount turns
    /// an exit code of 0 into 1.
    pub fn run(&self, profile: &Profile, opts: &RunOptions) -> Result<RunReport, CoreError> {
        if opts.dry_run {
            return Ok(RunReport::DryRun(self.run_plan(profile, opts)));
        }

        let reused = self.is_mounted(profile);
        let session = if reused {
            info!("reusing existing mount for '{}'", profile.name);
            None
        } else {
            Some(self.open_session(profile, opts.force)?)
        };

        let mut child = ChildCommand::new(Self::command_line(profile, opts));
        for (key, value) in Self::base_env(profile, !reused) {
            child.env(key, value);
        }
        for injector in profile.env_injectors() {
            let secret = self.secrets.fetch(&injector.password_entry)?;
            child.secret_env(injector.env_var.clone(), secret);
        }
        child.working_dir.clone_from(&profile.working_dir);
        child.interrupted = Some(self.interrupted);
        if (self.interrupted)() {
            return Err(CoreError::Interrupted(profile.name.clone()));
        }

        info!("running '{}' for profile '{}'", child.argv.join(" "), profile.name);
        let exit = child.run(opts.timeout)?;
        drop(child);
        if (self.interrupted)() {
            info!("interrupted while running '{}'", profile.name);
        }
        if let ChildExit::TimedOut = exit {
            warn!("command for '{}' timed out", profile.name);
        }

        let mut exit_code = exit.code();
        let mut unmount_error = None;
        if let Some(session) = session {
            if let Err(e) = session.finish() {
                warn!("trailing unmount of '{}' failed: {e}", profile.name);
                unmount_error = Some(e.to_string());
                if exit_code == 0 {
                    exit_code = 1;
                }
            }
        }
        info!("profile '{}' command exited with {exit_code}", profile.name);

        Ok(RunReport::Completed {
            exit,
            reused,
            unmount_error,
            exit_code,
        })
    }
}

fn remove_mount_dir(dir: &Path) {
    if let Err(e) = fs::remove_dir(dir) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("failed to remove mount directory {}: {e}", dir.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cryptow_runtime::{MockBackend, MockEvent, StaticSecretStore};
    use std::path::Path;

    struct Fixture {
        dir: tempfile::TempDir,
        backend: Arc<MockBackend>,
        secrets: Arc<StaticSecretStore>,
        engine: Engine,
    }

    fn fixture(yaml: &str, secrets: StaticSecretStore) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let layout = StateLayout::new(dir.path().join("cfg"), dir.path().join("data"));
        fs::create_dir_all(layout.config_dir()).unwrap();
        fs::write(
            layout.profiles_file(),
            yaml.replace("$ROOT", &dir.path().display().to_string()),
        )
        .unwrap();
        let backend = Arc::new(MockBackend::new());
        let secrets = Arc::new(secrets);
        let engine = Engine::with_parts(layout, backend.clone(), secrets.clone());
        Fixture {
            dir,
            backend,
            secrets,
            engine,
        }
    }

    const TWO_VOLUMES: &str = r"
profiles:
  work:
    command: [sh, -c, 'exit 0']
    injectors:
      - type: gocryptfs
        password_entry: gocryptfs/a
        cipher_dir: $ROOT/c/a
        mount_dir: $ROOT/m/a
      - type: gocryptfs
        password_entry: gocryptfs/b
        cipher_dir: $ROOT/c/b
        mount_dir: $ROOT/m/b
      - type: env
        password_entry: env/token
        env: API_TOKEN
";

    fn secrets() -> StaticSecretStore {
        StaticSecretStore::new()
            .with("gocryptfs/a", "pa")
            .with("gocryptfs/b", "pb")
            .with("env/token", "tok")
    }

    fn initialized(f: &Fixture) -> Profile {
        let profile = f.engine.resolve_profile("work").unwrap();
        f.engine.init(&profile, &InitOptions::default()).unwrap();
        profile
    }

    fn root(f: &Fixture) -> &Path {
        f.dir.path()
    }

    #[test]
    fn resolve_creates_state_dir() {
        let f = fixture(TWO_VOLUMES, secrets());
        f.engine.resolve_profile("work").unwrap();
        assert!(f.engine.layout().profile_dir("work").is_dir());
        assert!(matches!(
            f.engine.resolve_profile("nope"),
            Err(CoreError::Profile(_))
        ));
        assert!(matches!(
            f.engine.resolve_profile("../x"),
            Err(CoreError::Profile(_))
        ));
    }

    #[test]
    fn mount_then_unmount_round_trip() {
        let f = fixture(TWO_VOLUMES, secrets());
        let profile = initialized(&f);
        f.engine.mount(&profile, &MountOptions::default()).unwrap();
        assert!(f.engine.is_mounted(&profile));
        assert!(f.engine.tracker().is_active("work"));
        assert!(f.engine.tracker().process_marker("work").is_some());

        f.engine
            .unmount(&profile, &UnmountOptions::default())
            .unwrap();
        assert!(f.backend.mounted().is_empty());
        assert!(!f.engine.tracker().is_active("work"));
        assert!(f.engine.tracker().process_marker("work").is_none());
        assert!(!root(&f).join("m/a").exists());

        let a = root(&f).join("m/a");
        let b = root(&f).join("m/b");
        let events = f.backend.events();
        assert_eq!(
            &events[2..],
            &[
                MockEvent::Mount(a.clone()),
                MockEvent::Mount(b.clone()),
                MockEvent::Unmount(b),
                MockEvent::Unmount(a),
            ]
        );
        assert_eq!(f.backend.passfile_secrets(), vec!["pa", "pb", "pa", "pb"]);
    }

    #[test]
    fn mount_requires_initialized_store() {
        let f = fixture(TWO_VOLUMES, secrets());
        let profile = f.engine.resolve_profile("work").unwrap();
        let err = f
            .engine
            .mount(&profile, &MountOptions::default())
            .unwrap_err();
        assert!(err.to_string().contains("cryptow init work"));
        assert!(!f.engine.tracker().is_active("work"));
        assert!(f.backend.events().is_empty());
    }

    #[test]
    fn second_mount_is_locked_out() {
        let f = fixture(TWO_VOLUMES, secrets());
        let profile = initialized(&f);
        f.engine.mount(&profile, &MountOptions::default()).unwrap();
        let err = f
            .engine
            .mount(&profile, &MountOptions::default())
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::Store(cryptow_store::StoreError::AlreadyLocked(_))
        ));
    }

    #[test]
    fn failed_mount_rolls_back_in_reverse() {
        let yaml = r"
three:
  command: [true]
  injectors:
    - {type: gocryptfs, password_entry: p, cipher_dir: $ROOT/c/1, mount_dir: $ROOT/m/1}
    - {type: gocryptfs, password_entry: p, cipher_dir: $ROOT/c/2, mount_dir: $ROOT/m/2}
    - {type: gocryptfs, password_entry: p, cipher_dir: $ROOT/c/3, mount_dir: $ROOT/m/3}
";
        let f = fixture(yaml, StaticSecretStore::new().with("p", "x"));
        let profile = f.engine.resolve_profile("three").unwrap();
        f.engine.init(&profile, &InitOptions::default()).unwrap();
        let m = |n: &str| root(&f).join("m").join(n);
        f.backend.fail_mount_at(&m("3"));

        let err = f
            .engine
            .mount(&profile, &MountOptions::default())
            .unwrap_err();
        assert!(matches!(err, CoreError::Mount { .. }));
        assert!(err.to_string().contains("three"));

        let events: Vec<_> = f
            .backend
            .events()
            .into_iter()
            .filter(|e| !matches!(e, MockEvent::Init(_)))
            .collect();
        assert_eq!(
            events,
            vec![
                MockEvent::Mount(m("1")),
                MockEvent::Mount(m("2")),
                MockEvent::Mount(m("3")),
                MockEvent::Unmount(m("2")),
                MockEvent::Unmount(m("1")),
            ]
        );
        assert!(f.backend.mounted().is_empty());
        assert!(!f.engine.tracker().is_active("three"));
        assert!(f.engine.tracker().process_marker("three").is_none());
    }

    #[test]
    fn missing_volume_secret_rolls_back() {
        let f = fixture(TWO_VOLUMES, secrets());
        let profile = initialized(&f);
        let store = StaticSecretStore::new().with("gocryptfs/a", "pa");
        let engine = Engine::with_parts(
            f.engine.layout().clone(),
            f.backend.clone(),
            Arc::new(store),
        );
        let err = engine.mount(&profile, &MountOptions::default()).unwrap_err();
        assert!(err.to_string().contains("gocryptfs/b"));
        assert!(f.backend.mounted().is_empty());
        assert!(!engine.tracker().is_active("work"));
    }

    #[test]
    fn unmount_unlocked_is_noop() {
        let f = fixture(TWO_VOLUMES, secrets());
        let profile = f.engine.resolve_profile("work").unwrap();
        f.engine
            .unmount(&profile, &UnmountOptions::default())
            .unwrap();
        f.engine
            .unmount(
                &profile,
                &UnmountOptions {
                    force: true,
                    ..UnmountOptions::default()
                },
            )
            .unwrap();
        assert!(f.backend.events().is_empty());
    }

    #[test]
    fn unmount_failure_keeps_lock_without_force() {
        let f = fixture(TWO_VOLUMES, secrets());
        let profile = initialized(&f);
        f.engine.mount(&profile, &MountOptions::default()).unwrap();
        f.backend.fail_unmount_at(&root(&f).join("m/b"));

        let err = f
            .engine
            .unmount(&profile, &UnmountOptions::default())
            .unwrap_err();
        assert!(matches!(err, CoreError::Unmount { .. }));
        assert!(f.engine.tracker().is_active("work"));
    }

    #[test]
    fn forced_unmount_falls_back_to_lazy_and_clears_state() {
        let f = fixture(TWO_VOLUMES, secrets());
        let profile = initialized(&f);
        f.engine.mount(&profile, &MountOptions::default()).unwrap();
        let a = root(&f).join("m/a");
        let b = root(&f).join("m/b");
        f.backend.fail_unmount_at(&b);
        f.backend.fail_unmount_at(&a);
        f.backend.fail_lazy_unmount_at(&b);

        let err = f
            .engine
            .unmount(
                &profile,
                &UnmountOptions {
                    force: true,
                    ..UnmountOptions::default()
                },
            )
            .unwrap_err();
        match err {
            CoreError::Unmount { mount_dir, .. } => assert_eq!(mount_dir, b),
            other => panic!("unexpected error: {other}"),
        }
        assert!(!f.engine.tracker().is_active("work"));
        assert!(!f.backend.is_mounted(&a));
        assert!(f
            .backend
            .events()
            .contains(&MockEvent::LazyUnmount(a.clone())));
    }

    #[test]
    fn dry_run_has_no_side_effects() {
        let f = fixture(TWO_VOLUMES, secrets());
        let profile = f.engine.resolve_profile("work").unwrap();
        let plan = f
            .engine
            .mount(
                &profile,
                &MountOptions {
                    dry_run: true,
                    force: false,
                },
            )
            .unwrap();
        assert_eq!(plan.steps.len(), 2);
        assert!(plan.notes.iter().any(|n| n.contains("not initialized")));
        assert!(!f.engine.tracker().is_active("work"));
        assert!(f.backend.events().is_empty());
        assert!(f.secrets.fetches().is_empty());
    }

    #[test]
    fn run_mounts_injects_and_unmounts() {
        let f = fixture(TWO_VOLUMES, secrets());
        let profile = initialized(&f);
        let out = root(&f).join("out");
        let opts = RunOptions {
            extra_args: vec![],
            ..RunOptions::default()
        };
        let mut profile = profile;
        profile.command = vec![
            "sh".to_owned(),
            "-c".to_owned(),
            format!(
                "echo \"$API_TOKEN $CRYPTOW_PROFILE $CRYPTOW_MOUNT\" > '{}'",
                out.display()
            ),
        ];

        let report = f.engine.run(&profile, &opts).unwrap();
        match report {
            RunReport::Completed {
                exit_code,
                reused,
                unmount_error,
                ..
            } => {
                assert_eq!(exit_code, 0);
                assert!(!reused);
                assert!(unmount_error.is_none());
            }
            RunReport::DryRun(_) => panic!("expected a completed run"),
        }
        let written = fs::read_to_string(&out).unwrap();
        assert_eq!(
            written.trim(),
            format!("tok work {}", root(&f).join("m/a").display())
        );
        assert!(f.backend.mounted().is_empty());
        assert!(!f.engine.tracker().is_active("work"));
        let fetches = f.secrets.fetches();
        assert_eq!(
            fetches[fetches.len() - 3..],
            ["gocryptfs/a", "gocryptfs/b", "env/token"]
        );
    }

    #[test]
    fn run_propagates_child_exit_and_still_unmounts() {
        let f = fixture(TWO_VOLUMES, secrets());
        let mut profile = initialized(&f);
        profile.command = vec!["sh".to_owned(), "-c".to_owned(), "exit 7".to_owned()];
        let RunReport::Completed { exit_code, .. } =
            f.engine.run(&profile, &RunOptions::default()).unwrap()
        else {
            panic!("expected a completed run");
        };
        assert_eq!(exit_code, 7);
        assert!(f.backend.mounted().is_empty());
        assert!(!f.engine.tracker().is_active("work"));
    }

    #[test]
    fn run_reuses_live_mount_and_leaves_it() {
        let f = fixture(TWO_VOLUMES, secrets());
        let mut profile = initialized(&f);
        f.engine.mount(&profile, &MountOptions::default()).unwrap();
        let out = root(&f).join("out");
        profile.command = vec![
            "sh".to_owned(),
            "-c".to_owned(),
            format!("echo \"[${{CRYPTOW_MOUNT:-}}]\" > '{}'", out.display()),
        ];
        let before = f.backend.events().len();

        let RunReport::Completed { reused, exit_code, .. } =
            f.engine.run(&profile, &RunOptions::default()).unwrap()
        else {
            panic!("expected a completed run");
        };
        assert!(reused);
        assert_eq!(exit_code, 0);
        assert_eq!(f.backend.events().len(), before);
        assert!(f.engine.is_mounted(&profile));
        assert!(f.engine.tracker().is_active("work"));
        assert_eq!(fs::read_to_string(&out).unwrap().trim(), "[]");
    }

    #[test]
    fn run_with_missing_env_secret_skips_child_and_unmounts() {
        let f = fixture(TWO_VOLUMES, secrets());
        let mut profile = initialized(&f);
        let marker = root(&f).join("ran");
        profile.command = vec!["touch".to_owned(), marker.display().to_string()];
        let store = StaticSecretStore::new()
            .with("gocryptfs/a", "pa")
            .with("gocryptfs/b", "pb");
        let engine = Engine::with_parts(
            f.engine.layout().clone(),
            f.backend.clone(),
            Arc::new(store),
        );

        let err = engine.run(&profile, &RunOptions::default()).unwrap_err();
        assert!(matches!(
            err,
            CoreError::Runtime(RuntimeError::SecretNotFound(_))
        ));
        assert!(!marker.exists());
        assert!(f.backend.mounted().is_empty());
        assert!(!engine.tracker().is_active("work"));
    }

    #[test]
    fn interrupt_before_command_unwinds_without_running() {
        let f = fixture(TWO_VOLUMES, secrets());
        let mut profile = initialized(&f);
        let marker = root(&f).join("ran");
        profile.command = vec!["touch".to_owned(), marker.display().to_string()];
        let engine = Engine::with_parts(
            f.engine.layout().clone(),
            f.backend.clone(),
            f.secrets.clone(),
        )
        .with_interrupt_check(|| true);

        let err = engine.run(&profile, &RunOptions::default()).unwrap_err();
        assert!(matches!(err, CoreError::Interrupted(ref name) if name == "work"));
        assert!(!marker.exists());
        assert!(f.backend.mounted().is_empty());
        assert!(!engine.tracker().is_active("work"));
    }

    #[test]
    fn trailing_unmount_failure_upgrades_zero_exit() {
        let f = fixture(TWO_VOLUMES, secrets());
        let profile = initialized(&f);
        let b = root(&f).join("m/b");
        f.backend.fail_unmount_at(&b);
        f.backend.fail_lazy_unmount_at(&b);

        let RunReport::Completed {
            exit_code,
            unmount_error,
            ..
        } = f.engine.run(&profile, &RunOptions::default()).unwrap()
        else {
            panic!("expected a completed run");
        };
        assert_eq!(exit_code, 1);
        assert!(unmount_error.is_some());
        assert!(!f.engine.tracker().is_active("work"));
    }

    #[test]
    fn run_timeout_reports_sentinel() {
        let f = fixture(TWO_VOLUMES, secrets());
        let mut profile = initialized(&f);
        profile.command = vec!["sleep".to_owned(), "30".to_owned()];
        let opts = RunOptions {
            timeout: Some(Duration::from_millis(200)),
            ..RunOptions::default()
        };
        let RunReport::Completed { exit, exit_code, .. } = f.engine.run(&profile, &opts).unwrap()
        else {
            panic!("expected a completed run");
        };
        assert_eq!(exit, ChildExit::TimedOut);
        assert_eq!(exit_code, 124);
        assert!(f.backend.mounted().is_empty());
    }

    #[test]
    fn run_dry_run_masks_secrets() {
        let f = fixture(TWO_VOLUMES, secrets());
        let profile = f.engine.resolve_profile("work").unwrap();
        let opts = RunOptions {
            dry_run: true,
            extra_args: vec!["--flag".to_owned()],
            ..RunOptions::default()
        };
        let RunReport::DryRun(plan) = f.engine.run(&profile, &opts).unwrap() else {
            panic!("expected a plan");
        };
        assert!(!plan.reuse);
        assert_eq!(plan.command.last().map(String::as_str), Some("--flag"));
        assert!(plan
            .env
            .contains(&("API_TOKEN".to_owned(), "<pass:env/token>".to_owned())));
        assert!(plan.env.iter().any(|(k, _)| k == "CRYPTOW_MOUNT"));
        assert!(f.secrets.fetches().is_empty());
        assert!(f.backend.events().is_empty());
    }

    #[test]
    fn init_refuses_existing_store_and_pass_entry() {
        let f = fixture(TWO_VOLUMES, secrets());
        let profile = initialized(&f);
        assert!(matches!(
            f.engine.init(&profile, &InitOptions::default()),
            Err(CoreError::AlreadyInitialized { .. })
        ));

        let g = fixture(TWO_VOLUMES, secrets());
        let profile = g.engine.resolve_profile("work").unwrap();
        let err = g
            .engine
            .init(
                &profile,
                &InitOptions {
                    gen_pass: true,
                    length: 32,
                },
            )
            .unwrap_err();
        assert!(err.to_string().contains("Refusing to overwrite"));
    }

    #[test]
    fn init_generates_missing_entries() {
        let f = fixture(TWO_VOLUMES, StaticSecretStore::new());
        let profile = f.engine.resolve_profile("work").unwrap();
        let dirs = f
            .engine
            .init(
                &profile,
                &InitOptions {
                    gen_pass: true,
                    length: 8,
                },
            )
            .unwrap();
        assert_eq!(dirs.len(), 2);
        assert!(f.secrets.exists("gocryptfs/a").unwrap());
        assert!(dirs.iter().all(|d| f.backend.is_initialized(d)));
    }

    const SHARED_ENTRY: &str = r"
profiles:
  work:
    command: [sh, -c, 'exit 0']
    password_entry: gocryptfs/shared
    injectors:
      - {type: gocryptfs, cipher_dir: $ROOT/c/a, mount_dir: $ROOT/m/a}
      - {type: gocryptfs, cipher_dir: $ROOT/c/b, mount_dir: $ROOT/m/b}
";

    fn gen_pass() -> InitOptions {
        InitOptions {
            gen_pass: true,
            length: 12,
        }
    }

    #[test]
    fn init_generates_shared_entry_once() {
        let f = fixture(SHARED_ENTRY, StaticSecretStore::new());
        let profile = f.engine.resolve_profile("work").unwrap();
        let dirs = f.engine.init(&profile, &gen_pass()).unwrap();
        assert_eq!(dirs.len(), 2);
        assert!(dirs.iter().all(|d| f.backend.is_initialized(d)));
        assert_eq!(f.backend.passfile_secrets(), vec!["g".repeat(12); 2]);
    }

    #[test]
    fn init_resumes_after_partial_failure() {
        let f = fixture(SHARED_ENTRY, StaticSecretStore::new());
        let profile = f.engine.resolve_profile("work").unwrap();
        let (first, second) = (root(&f).join("c/a"), root(&f).join("c/b"));
        f.backend.fail_init_at(&second);
        assert!(f.engine.init(&profile, &gen_pass()).is_err());
        assert!(f.backend.is_initialized(&first));
        assert!(!f.backend.is_initialized(&second));

        let retry = Engine::with_parts(
            f.engine.layout().clone(),
            Arc::new(MockBackend::new()),
            f.secrets.clone(),
        );
        let dirs = retry.init(&profile, &gen_pass()).unwrap();
        assert_eq!(dirs, vec![second.clone()]);
        assert!(retry.backend().is_initialized(&second));

        assert!(matches!(
            retry.init(&profile, &gen_pass()),
            Err(CoreError::AlreadyInitialized { .. })
        ));
    }

    #[test]
    fn init_refuses_foreign_entry_before_writing() {
        let yaml = r"
profiles:
  work:
    command: [sh, -c, 'exit 0']
    injectors:
      - {type: gocryptfs, password_entry: new/a, cipher_dir: $ROOT/c/a, mount_dir: $ROOT/m/a}
      - {type: gocryptfs, password_entry: taken/b, cipher_dir: $ROOT/c/b, mount_dir: $ROOT/m/b}
";
        let f = fixture(yaml, StaticSecretStore::new().with("taken/b", "x"));
        let profile = f.engine.resolve_profile("work").unwrap();
        let err = f.engine.init(&profile, &gen_pass()).unwrap_err();
        assert!(err.to_string().contains("taken/b"));
        assert!(!f.secrets.exists("new/a").unwrap());
        assert!(f.backend.events().is_empty());
    }

    #[test]
    fn list_reports_status_per_profile() {
        let yaml = r"
profiles:
  good:
    command: [true]
    injectors:
      - {type: gocryptfs, password_entry: p, cipher_dir: $ROOT/c, mount_dir: $ROOT/m}
  broken:
    command: [true]
    injectors:
      - {type: ssh, password_entry: p}
";
        let f = fixture(yaml, StaticSecretStore::new().with("p", "x"));
        let profile = f.engine.resolve_profile("good").unwrap();
        f.engine.init(&profile, &InitOptions::default()).unwrap();

        let rows = f.engine.list_status().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].name, "broken");
        assert_eq!(rows[0].status, ProfileStatus::Error);
        assert!(rows[0].error.as_deref().unwrap_or("").contains("ssh"));
        assert_eq!(rows[1].status, ProfileStatus::Unmounted);

        f.engine.mount(&profile, &MountOptions::default()).unwrap();
        let rows = f.engine.list_status().unwrap();
        assert_eq!(rows[1].status, ProfileStatus::Mounted);
        assert_eq!(rows[1].pid, Some(std::process::id()));

        f.backend.unmount(&root(&f).join("m")).unwrap();
        let rows = f.engine.list_status().unwrap();
        assert_eq!(rows[1].status, ProfileStatus::Stale);
    }
}
