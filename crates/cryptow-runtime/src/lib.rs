//! External collaborators for cryptow: encrypted mounts, the OS mount table,
//! the secret store, and the user's child process.
//!
//! Everything that shells out lives here behind two seams: [`VolumeBackend`]
//! (gocryptfs, or an in-memory mock) and [`SecretStore`] (`pass`, or a static
//! map). The core engine only talks to these traits.

pub mod backend;
pub mod child;
pub mod gocryptfs;
pub mod mock;
pub mod mount_table;
pub mod prereq;
pub mod secret;
pub mod tools;

pub use backend::{select_backend, VolumeBackend};
pub use child::{ChildCommand, ChildExit, EXIT_TIMEOUT};
pub use gocryptfs::GocryptfsBackend;
pub use mock::{MockBackend, MockEvent};
pub use mount_table::{probe_mount_point, unescape_mount_field};
pub use prereq::{check_prereqs, format_missing, summarize_missing, MissingPrereq};
pub use secret::{Passfile, PassStore, SecretStore, StaticSecretStore};
pub use tools::ToolConfig;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{tool} not found or failed to start: {detail}")]
    ToolUnavailable { tool: String, detail: String },
    #[error("{tool} failed: {detail}")]
    ToolFailed { tool: String, detail: String },
    #[error("No secret retrieved from pass for '{0}'.")]
    SecretNotFound(String),
    #[error("Refusing to overwrite existing pass entry '{0}'.")]
    SecretExists(String),
    #[error("backend '{0}' is not available")]
    BackendUnavailable(String),
    #[error("command execution failed: {0}")]
    ExecFailed(String),
}
