use crate::paths::expand_home;
use crate::profile::{validate_profile_name, DefaultDirs, EnvInjector, Injector, Profile, VolumeInjector};
use crate::ProfileError;
use serde::Deserialize;
use serde_yaml::Value;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

pub const PROFILES_FILE_NAME: &str = "profiles.yaml";

/// The parsed profiles file: a mapping of profile name to its still
/// unvalidated definition. Definitions are validated one at a time by
/// [`resolve`](Self::resolve), so a broken profile never hides its siblings.
#[derive(Debug, Clone)]
pub struct ProfilesFile {
    path: PathBuf,
    exists: bool,
    entries: BTreeMap<String, Value>,
}

/// YAML scalars are accepted wherever a string is expected.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CommandSpec {
    Line(String),
    Argv(Vec<Scalar>),
}

#[derive(Debug, Default, Deserialize)]
struct RawProfile {
    #[serde(default)]
    command: Option<CommandSpec>,
    #[serde(default)]
    env: BTreeMap<String, Scalar>,
    #[serde(default, alias = "working_dir")]
    cwd: Option<String>,
    #[serde(default, alias = "passwordEntry")]
    password_entry: Option<Scalar>,
    #[serde(default, alias = "cipherDir")]
    cipher_dir: Option<String>,
    #[serde(default, alias = "mountDir")]
    mount_dir: Option<String>,
    #[serde(default)]
    injectors: Option<Vec<RawInjector>>,
}

#[derive(Debug, Default, Deserialize)]
struct RawInjector {
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default, alias = "passwordEntry")]
    password_entry: Option<Scalar>,
    #[serde(default, alias = "cipherDir")]
    cipher_dir: Option<String>,
    #[serde(default, alias = "mountDir")]
    mount_dir: Option<String>,
    #[serde(default, alias = "variable", alias = "name")]
    env: Option<String>,
}

impl ProfilesFile {
    /// Load the profiles file. A missing file is not an error: it yields an
    /// empty set with [`exists`](Self::exists) returning false.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ProfileError> {
        let path = path.into();
        if !path.exists() {
            return Ok(Self {
                path,
                exists: false,
                entries: BTreeMap::new(),
            });
        }
        let content = fs::read_to_string(&path)?;
        Self::parse_str(path, &content)
    }

    pub fn parse_str(path: impl Into<PathBuf>, content: &str) -> Result<Self, ProfileError> {
        let path = path.into();
        let display = path.display().to_string();
        let mut file = Self {
            path,
            exists: true,
            entries: BTreeMap::new(),
        };
        if content.trim().is_empty() {
            return Ok(file);
        }

        let parsed: Value = serde_yaml::from_str(content).map_err(|e| ProfileError::Parse {
            path: display.clone(),
            message: e.to_string(),
        })?;

        let profiles = match parsed {
            Value::Mapping(ref m) if m.contains_key("profiles") => {
                m.get("profiles").cloned().unwrap_or(Value::Null)
            }
            other => other,
        };

        let mapping = match profiles {
            Value::Null => return Ok(file),
            Value::Mapping(m) => m,
            _ => return Err(ProfileError::InvalidLayout(display)),
        };

        for (key, definition) in mapping {
            let name = match key {
                Value::String(s) => s,
                Value::Number(n) => n.to_string(),
                _ => return Err(ProfileError::InvalidLayout(display)),
            };
            if !definition.is_mapping() {
                return Err(ProfileError::Invalid {
                    profile: name,
                    message: format!("definition in {display} must be a mapping"),
                });
            }
            file.entries.insert(name, definition);
        }

        Ok(file)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.exists
    }

    /// Profile names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Validate a single named definition into a [`Profile`].
    pub fn resolve(&self, name: &str, defaults: &DefaultDirs) -> Result<Profile, ProfileError> {
        if !self.exists {
            return Err(ProfileError::ConfigNotFound(self.path.clone()));
        }
        let value = self
            .entries
            .get(name)
            .ok_or_else(|| ProfileError::NotFound {
                name: name.to_owned(),
                path: self.path.display().to_string(),
            })?;
        let raw: RawProfile =
            serde_yaml::from_value(value.clone()).map_err(|e| ProfileError::Invalid {
                profile: name.to_owned(),
                message: e.to_string(),
            })?;
        build_profile(name, raw, defaults)
    }
}

fn non_empty(value: Option<&Scalar>) -> Option<String> {
    value
        .map(ToString::to_string)
        .filter(|s| !s.trim().is_empty())
}

fn build_profile(name: &str, raw: RawProfile, defaults: &DefaultDirs) -> Result<Profile, ProfileError> {
    validate_profile_name(name)?;

    let command: Vec<String> = match raw.command {
        Some(CommandSpec::Line(line)) if !line.trim().is_empty() => vec![expand_home(&line)],
        Some(CommandSpec::Argv(parts)) if !parts.is_empty() => {
            parts.iter().map(|p| expand_home(&p.to_string())).collect()
        }
        _ => return Err(ProfileError::MissingCommand(name.to_owned())),
    };

    let env = raw
        .env
        .iter()
        .map(|(k, v)| (k.clone(), expand_home(&v.to_string())))
        .collect();
    let working_dir = raw.cwd.as_deref().map(|d| PathBuf::from(expand_home(d)));

    let raw_injectors = raw.injectors.as_deref().unwrap_or_default();
    let mut injectors = Vec::with_capacity(raw_injectors.len());
    let mut volume_ordinal = 0usize;

    for (i, def) in raw_injectors.iter().enumerate() {
        let index = i + 1;
        let kind = def
            .kind
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ProfileError::MissingType {
                profile: name.to_owned(),
                index,
            })?;

        match kind {
            "gocryptfs" | "volume" => {
                let password_entry = non_empty(def.password_entry.as_ref())
                    .or_else(|| non_empty(raw.password_entry.as_ref()))
                    .ok_or_else(|| ProfileError::MissingField {
                        profile: name.to_owned(),
                        index,
                        kind: "gocryptfs",
                        field: "password_entry",
                    })?;
                let cipher_dir = def
                    .cipher_dir
                    .as_deref()
                    .or(raw.cipher_dir.as_deref())
                    .map_or_else(
                        || defaults.cipher_dir(name, volume_ordinal),
                        |d| PathBuf::from(expand_home(d)),
                    );
                let mount_dir = def
                    .mount_dir
                    .as_deref()
                    .or(raw.mount_dir.as_deref())
                    .map_or_else(
                        || defaults.mount_dir(name, volume_ordinal),
                        |d| PathBuf::from(expand_home(d)),
                    );
                volume_ordinal += 1;
                injectors.push(Injector::Volume(VolumeInjector {
                    password_entry,
                    cipher_dir,
                    mount_dir,
                }));
            }
            "env" => {
                let password_entry = non_empty(def.password_entry.as_ref()).ok_or_else(|| {
                    ProfileError::MissingField {
                        profile: name.to_owned(),
                        index,
                        kind: "env",
                        field: "password_entry",
                    }
                })?;
                let env_var = def
                    .env
                    .as_deref()
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .ok_or_else(|| ProfileError::MissingField {
                        profile: name.to_owned(),
                        index,
                        kind: "env",
                        field: "env",
                    })?;
                injectors.push(Injector::Env(EnvInjector {
                    password_entry,
                    env_var: env_var.to_owned(),
                }));
            }
            other => {
                return Err(ProfileError::UnsupportedInjector {
                    profile: name.to_owned(),
                    index,
                    kind: other.to_owned(),
                })
            }
        }
    }

    if injectors.is_empty() {
        return Err(ProfileError::MissingInjectors(name.to_owned()));
    }

    let mut seen = HashSet::new();
    for injector in &injectors {
        if let Injector::Volume(v) = injector {
            if !seen.insert(v.mount_dir.clone()) {
                return Err(ProfileError::DuplicateMountDir {
                    profile: name.to_owned(),
                    path: v.mount_dir.clone(),
                });
            }
        }
    }

    Ok(Profile {
        name: name.to_owned(),
        command,
        env,
        working_dir,
        injectors,
    })
}
