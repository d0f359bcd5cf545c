use crate::engine::Engine;
use crate::CoreError;
use cryptow_schema::Profile;
use tracing::warn;

/// A mount session opened by this process. Its volumes are unmounted (and the
/// session markers released) exactly once: by [`finish`](Self::finish), or on
/// drop if the session is abandoned on an error path.
pub struct MountSession<'a> {
    engine: &'a Engine,
    profile: &'a Profile,
    armed: bool,
}

impl<'a> MountSession<'a> {
    pub(crate) fn new(engine: &'a Engine, profile: &'a Profile) -> Self {
        Self {
            engine,
            profile,
            armed: true,
        }
    }

    pub fn profile(&self) -> &Profile {
        self.profile
    }

    /// Force-unmount now and report the result.
    pub fn finish(mut self) -> Result<(), CoreError> {
        self.armed = false;
        self.engine.teardown(self.profile)
    }
}

impl Drop for MountSession<'_> {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = self.engine.teardown(self.profile) {
                warn!("failed to unmount '{}' during cleanup: {e}", self.profile.name);
            }
        }
    }
}
