//! On-disk state for cryptow: directory layout, lock marker, and process marker.
//!
//! The lock marker is the single mutual-exclusion primitive for a profile's
//! mount session. It is created with exclusive-create semantics so two
//! invocations can never both believe they own the same profile. Whether the
//! volumes are actually mounted is never stored here; that is always
//! re-derived from the live mount table.

pub mod layout;
pub mod marker;
pub mod tracker;

pub use layout::StateLayout;
pub use marker::ProcessMarker;
pub use tracker::StateTracker;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("state I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Profile '{0}' appears mounted (lock exists). Use --force to override.")]
    AlreadyLocked(String),
    #[error("cannot locate state directories: {0}")]
    NoHome(String),
    #[error("invalid profile name: {0}")]
    InvalidName(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
