//! Profile parsing, validation, and the injector model for cryptow.
//!
//! This crate defines the schema layer: reading the YAML profiles file
//! (`ProfilesFile`), turning a named definition into a validated `Profile`,
//! and the `Injector` sum type that distinguishes encrypted volumes from
//! plain environment secrets. It performs no mounting and no secret lookups.

pub mod paths;
pub mod profile;
pub mod raw;

pub use paths::{expand_home, expand_home_with};
pub use profile::{
    validate_profile_name, DefaultDirs, EnvInjector, Injector, Profile, VolumeInjector,
};
pub use raw::{ProfilesFile, PROFILES_FILE_NAME};

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("failed to read profiles file: {0}")]
    Io(#[from] std::io::Error),
    #[error("profiles configuration not found at {}", .0.display())]
    ConfigNotFound(PathBuf),
    #[error("failed to parse profiles YAML at {path}: {message}")]
    Parse { path: String, message: String },
    #[error("profiles YAML at {0} must map profile names to definitions")]
    InvalidLayout(String),
    #[error("profile '{name}' not found in {path}")]
    NotFound { name: String, path: String },
    #[error("invalid profile name '{0}': must be a single non-empty path component")]
    InvalidName(String),
    #[error("profile '{profile}' is invalid: {message}")]
    Invalid { profile: String, message: String },
    #[error("profile '{0}' is missing a 'command' definition")]
    MissingCommand(String),
    #[error("profile '{0}' is missing 'injectors'")]
    MissingInjectors(String),
    #[error("injector #{index} in profile '{profile}' is missing 'type'")]
    MissingType { profile: String, index: usize },
    #[error("injector #{index} in profile '{profile}' has unsupported type '{kind}'")]
    UnsupportedInjector {
        profile: String,
        index: usize,
        kind: String,
    },
    #[error("{kind} injector #{index} in profile '{profile}' is missing '{field}'")]
    MissingField {
        profile: String,
        index: usize,
        kind: &'static str,
        field: &'static str,
    },
    #[error("profile '{profile}' mounts more than one volume at {}", .path.display())]
    DuplicateMountDir { profile: String, path: PathBuf },
}
