use serde::Serialize;
use std::fmt;

/// Observed state of a profile, derived from the lock marker and the live
/// mount table. Nothing here is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileStatus {
    Mounted,
    Unmounted,
    /// The lock marker exists but the session it describes is gone.
    Stale,
    /// The profile definition failed to resolve.
    Error,
}

impl ProfileStatus {
    /// `live` is whether every mount path is active (for profiles without
    /// volumes: whether the recorded session owner is still running).
    pub fn classify(locked: bool, live: bool) -> Self {
        match (locked, live) {
            (_, true) => Self::Mounted,
            (true, false) => Self::Stale,
            (false, false) => Self::Unmounted,
        }
    }
}

impl fmt::Display for ProfileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Mounted => "mounted",
            Self::Unmounted => "unmounted",
            Self::Stale => "stale",
            Self::Error => "error",
        })
    }
}
