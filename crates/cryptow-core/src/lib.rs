//! Core orchestration engine for cryptow profile sessions.
//!
//! This crate ties together profile resolution, on-disk session markers, and
//! the runtime backends into the `Engine`: the central API for initializing,
//! mounting, unmounting, running, and inspecting profiles. Mounts are made in
//! declaration order, rolled back in reverse on failure, and a `run` always
//! unwinds the mounts it made itself.

pub mod concurrency;
pub mod engine;
pub mod lifecycle;
pub mod session;

pub use concurrency::{install_signal_handler, interrupt_requested};
pub use engine::{
    Engine, InitOptions, MountOptions, Plan, PlanStep, ProfileSummary, RunOptions, RunPlan,
    RunReport, UnmountOptions,
};
pub use lifecycle::ProfileStatus;
pub use session::MountSession;

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Profile(#[from] cryptow_schema::ProfileError),
    #[error(transparent)]
    Store(#[from] cryptow_store::StoreError),
    #[error(transparent)]
    Runtime(#[from] cryptow_runtime::RuntimeError),
    #[error(
        "profile '{profile}' is not initialized ({} has no gocryptfs.conf). Run: cryptow init {profile}",
        .cipher_dir.display()
    )]
    NotInitialized { profile: String, cipher_dir: PathBuf },
    #[error("profile '{profile}' is already initialized at {}", .cipher_dir.display())]
    AlreadyInitialized { profile: String, cipher_dir: PathBuf },
    #[error("failed to mount '{profile}' at {}: {source}", .mount_dir.display())]
    Mount {
        profile: String,
        mount_dir: PathBuf,
        #[source]
        source: cryptow_runtime::RuntimeError,
    },
    #[error("failed to unmount '{profile}' from {}: {source}", .mount_dir.display())]
    Unmount {
        profile: String,
        mount_dir: PathBuf,
        #[source]
        source: cryptow_runtime::RuntimeError,
    },
    #[error("interrupted before running the command of '{0}'")]
    Interrupted(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
