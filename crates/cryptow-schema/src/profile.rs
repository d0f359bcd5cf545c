use crate::ProfileError;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// A validated, immutable profile resolved from the profiles file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Profile {
    pub name: String,
    /// Non-empty argv; the first element is the executable.
    pub command: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub working_dir: Option<PathBuf>,
    /// Declaration order drives mount order (and reverse unmount order).
    pub injectors: Vec<Injector>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Injector {
    /// An encrypted directory mounted through the volume backend.
    Volume(VolumeInjector),
    /// A secret exported into the child environment.
    Env(EnvInjector),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VolumeInjector {
    pub password_entry: String,
    pub cipher_dir: PathBuf,
    pub mount_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvInjector {
    pub password_entry: String,
    pub env_var: String,
}

impl Injector {
    pub fn password_entry(&self) -> &str {
        match self {
            Self::Volume(v) => &v.password_entry,
            Self::Env(e) => &e.password_entry,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Volume(_) => "gocryptfs",
            Self::Env(_) => "env",
        }
    }
}

impl Profile {
    /// Split injectors into volume and environment variants, each in
    /// declaration order.
    pub fn partition(&self) -> (Vec<&VolumeInjector>, Vec<&EnvInjector>) {
        let mut volumes = Vec::new();
        let mut envs = Vec::new();
        for injector in &self.injectors {
            match injector {
                Injector::Volume(v) => volumes.push(v),
                Injector::Env(e) => envs.push(e),
            }
        }
        (volumes, envs)
    }

    pub fn volume_injectors(&self) -> Vec<&VolumeInjector> {
        self.partition().0
    }

    pub fn env_injectors(&self) -> Vec<&EnvInjector> {
        self.partition().1
    }

    /// The first declared volume; its directories are exported to the child
    /// as convenience variables.
    pub fn primary_volume(&self) -> Option<&VolumeInjector> {
        self.injectors.iter().find_map(|i| match i {
            Injector::Volume(v) => Some(v),
            Injector::Env(_) => None,
        })
    }

    pub fn mount_dirs(&self) -> Vec<&Path> {
        self.volume_injectors()
            .into_iter()
            .map(|v| v.mount_dir.as_path())
            .collect()
    }
}

/// Base directories used to derive volume paths a profile leaves unset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultDirs {
    /// Per-profile private state lives under `<profiles_dir>/<name>`.
    pub profiles_dir: PathBuf,
    pub mounts_dir: PathBuf,
}

impl DefaultDirs {
    /// `ordinal` is the zero-based position among the profile's volume
    /// injectors; later volumes get a numbered suffix so defaults never collide.
    pub fn cipher_dir(&self, profile: &str, ordinal: usize) -> PathBuf {
        let base = self.profiles_dir.join(profile);
        if ordinal == 0 {
            base.join("cipher")
        } else {
            base.join(format!("cipher-{}", ordinal + 1))
        }
    }

    pub fn mount_dir(&self, profile: &str, ordinal: usize) -> PathBuf {
        if ordinal == 0 {
            self.mounts_dir.join(profile)
        } else {
            self.mounts_dir.join(format!("{profile}-{}", ordinal + 1))
        }
    }
}

/// Profile names map 1:1 to state directories, so they must be a single
/// well-formed path component.
pub fn validate_profile_name(name: &str) -> Result<(), ProfileError> {
    let bad = name.trim().is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0']);
    if bad {
        return Err(ProfileError::InvalidName(name.to_owned()));
    }
    Ok(())
}
