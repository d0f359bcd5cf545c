use crate::layout::StateLayout;
use crate::marker::ProcessMarker;
use crate::StoreError;
use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::Path;
use tracing::{debug, warn};

/// Tracks which profiles currently own a mount session through on-disk
/// markers. All state survives process crashes and is cleared by
/// [`release`](Self::release).
#[derive(Debug, Clone)]
pub struct StateTracker {
    layout: StateLayout,
}

impl StateTracker {
    pub fn new(layout: StateLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &StateLayout {
        &self.layout
    }

    /// True iff the lock marker exists.
    pub fn is_active(&self, profile: &str) -> bool {
        self.layout.lock_file(profile).exists()
    }

    /// Create the lock marker with exclusive-create semantics.
    ///
    /// With `force`, an existing marker is deleted first. That bypasses the
    /// mutual-exclusion guarantee and is only safe when the previous owner is
    /// known to be gone.
    pub fn acquire(&self, profile: &str, force: bool) -> Result<(), StoreError> {
        self.layout.ensure_profile_dir(profile)?;
        let lock_path = self.layout.lock_file(profile);

        if force {
            match fs::remove_file(&lock_path) {
                Ok(()) => warn!("removed existing lock for '{profile}' (forced)"),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
        {
            Ok(_) => {
                debug!("acquired lock {}", lock_path.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                Err(StoreError::AlreadyLocked(profile.to_owned()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Record the current process as the session owner.
    pub fn record_process(&self, profile: &str) -> Result<ProcessMarker, StoreError> {
        let marker = ProcessMarker::current();
        marker.write(&self.layout.pid_file(profile))?;
        Ok(marker)
    }

    /// The recorded session owner, if any. Unreadable markers are logged and
    /// reported as absent.
    pub fn process_marker(&self, profile: &str) -> Option<ProcessMarker> {
        match ProcessMarker::read(&self.layout.pid_file(profile)) {
            Ok(marker) => marker,
            Err(e) => {
                warn!("ignoring unreadable process marker for '{profile}': {e}");
                None
            }
        }
    }

    /// Remove the process marker and the lock marker. Never fails: cleanup
    /// must proceed regardless, so I/O errors are only logged.
    pub fn release(&self, profile: &str) {
        remove_marker(&self.layout.pid_file(profile));
        remove_marker(&self.layout.lock_file(profile));
        debug!("released state for '{profile}'");
    }
}

fn remove_marker(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!("failed to remove {}: {e}", path.display()),
    }
}
