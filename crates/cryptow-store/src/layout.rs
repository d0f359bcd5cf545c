use crate::StoreError;
use cryptow_schema::{validate_profile_name, DefaultDirs, PROFILES_FILE_NAME};
use std::fs;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "cryptow";
const LOCK_FILE: &str = "mount.lock";
const PID_FILE: &str = "mount.pid";
const LOG_FILE: &str = "cryptow.log";

/// Directory layout for cryptow configuration and per-profile state.
///
/// ```text
/// <config>/profiles.yaml
/// <data>/profiles/<name>/mount.lock
/// <data>/profiles/<name>/mount.pid
/// <data>/profiles/<name>/cipher        (default cipher dir)
/// <data>/mounts/<name>                 (default mount dir)
/// <data>/log/cryptow.log
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateLayout {
    config_dir: PathBuf,
    data_dir: PathBuf,
}

impl StateLayout {
    pub fn new(config_dir: impl Into<PathBuf>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
            data_dir: data_dir.into(),
        }
    }

    /// Resolve directories from the process environment. Explicit overrides
    /// win over `CRYPTOW_CONFIG_DIR`/`CRYPTOW_DATA_DIR`, which win over the
    /// XDG base directories.
    pub fn from_env(
        config_override: Option<PathBuf>,
        data_override: Option<PathBuf>,
    ) -> Result<Self, StoreError> {
        Self::resolve_with(config_override, data_override, |key| {
            std::env::var(key).ok().filter(|v| !v.is_empty())
        })
    }

    pub fn resolve_with(
        config_override: Option<PathBuf>,
        data_override: Option<PathBuf>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, StoreError> {
        let home = || {
            lookup("HOME")
                .map(PathBuf::from)
                .ok_or_else(|| StoreError::NoHome("HOME environment variable is not set".to_owned()))
        };

        let config_dir = match config_override {
            Some(dir) => dir,
            None => match lookup("CRYPTOW_CONFIG_DIR") {
                Some(dir) => PathBuf::from(dir),
                None => match lookup("XDG_CONFIG_HOME") {
                    Some(xdg) => PathBuf::from(xdg).join(APP_DIR),
                    None => home()?.join(".config").join(APP_DIR),
                },
            },
        };

        let data_dir = match data_override {
            Some(dir) => dir,
            None => match lookup("CRYPTOW_DATA_DIR") {
                Some(dir) => PathBuf::from(dir),
                None => match lookup("XDG_DATA_HOME") {
                    Some(xdg) => PathBuf::from(xdg).join(APP_DIR),
                    None => home()?.join(".local").join("share").join(APP_DIR),
                },
            },
        };

        Ok(Self::new(config_dir, data_dir))
    }

    #[inline]
    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    #[inline]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    #[inline]
    pub fn profiles_file(&self) -> PathBuf {
        self.config_dir.join(PROFILES_FILE_NAME)
    }

    #[inline]
    pub fn profiles_dir(&self) -> PathBuf {
        self.data_dir.join("profiles")
    }

    #[inline]
    pub fn profile_dir(&self, profile: &str) -> PathBuf {
        self.profiles_dir().join(profile)
    }

    #[inline]
    pub fn mounts_dir(&self) -> PathBuf {
        self.data_dir.join("mounts")
    }

    #[inline]
    pub fn log_file(&self) -> PathBuf {
        self.data_dir.join("log").join(LOG_FILE)
    }

    /// Zero-byte marker whose existence means a mount session owns the profile.
    #[inline]
    pub fn lock_file(&self, profile: &str) -> PathBuf {
        self.profile_dir(profile).join(LOCK_FILE)
    }

    #[inline]
    pub fn pid_file(&self, profile: &str) -> PathBuf {
        self.profile_dir(profile).join(PID_FILE)
    }

    pub fn default_dirs(&self) -> DefaultDirs {
        DefaultDirs {
            profiles_dir: self.profiles_dir(),
            mounts_dir: self.mounts_dir(),
        }
    }

    /// Create the profile's private state directory. Idempotent.
    pub fn ensure_profile_dir(&self, profile: &str) -> Result<PathBuf, StoreError> {
        validate_profile_name(profile).map_err(|e| StoreError::InvalidName(e.to_string()))?;
        let dir = self.profile_dir(profile);
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }
}
