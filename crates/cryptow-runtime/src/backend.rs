use crate::tools::ToolConfig;
use crate::RuntimeError;
use std::path::Path;

/// An encrypted-filesystem mounting tool.
///
/// Implementations never keep a notion of "mounted" on their own behalf for
/// the engine to trust; [`is_mounted`](Self::is_mounted) must reflect the live
/// system every time it is called.
pub trait VolumeBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Whether `cipher_dir` holds an initialized ciphertext store.
    fn is_initialized(&self, cipher_dir: &Path) -> bool;

    fn init(&self, cipher_dir: &Path, passfile: &Path) -> Result<(), RuntimeError>;

    fn mount(&self, cipher_dir: &Path, mount_dir: &Path, passfile: &Path)
        -> Result<(), RuntimeError>;

    fn unmount(&self, mount_dir: &Path) -> Result<(), RuntimeError>;

    /// Detach even when busy. Used as a fallback when a forced unmount
    /// is requested and [`unmount`](Self::unmount) failed.
    fn unmount_lazy(&self, mount_dir: &Path) -> Result<(), RuntimeError>;

    fn is_mounted(&self, mount_dir: &Path) -> bool;

    /// True only if every path is independently mounted. An empty set is not
    /// considered mounted, and a partially mounted set counts as unmounted.
    /// Paths are probed concurrently.
    fn all_mounted(&self, mount_dirs: &[&Path]) -> bool {
        match mount_dirs {
            [] => false,
            [single] => self.is_mounted(single),
            many => std::thread::scope(|s| {
                let probes: Vec<_> = many
                    .iter()
                    .map(|dir| s.spawn(move || self.is_mounted(dir)))
                    .collect();
                probes
                    .into_iter()
                    .all(|probe| probe.join().unwrap_or(false))
            }),
        }
    }
}

pub fn select_backend(tools: &ToolConfig) -> Result<Box<dyn VolumeBackend>, RuntimeError> {
    match tools.backend.as_str() {
        "gocryptfs" => Ok(Box::new(crate::gocryptfs::GocryptfsBackend::new(
            tools.clone(),
        ))),
        "mock" => Ok(Box::new(crate::mock::MockBackend::new())),
        other => Err(RuntimeError::BackendUnavailable(other.to_owned())),
    }
}
