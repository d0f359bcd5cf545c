use crate::backend::VolumeBackend;
use crate::gocryptfs::CONFIG_FILE;
use crate::RuntimeError;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// A call observed by [`MockBackend`], in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockEvent {
    Init(PathBuf),
    Mount(PathBuf),
    Unmount(PathBuf),
    LazyUnmount(PathBuf),
}

#[derive(Default)]
struct MockState {
    mounted: HashSet<PathBuf>,
    events: Vec<MockEvent>,
    passfile_secrets: Vec<String>,
    fail_init: HashSet<PathBuf>,
    fail_mount: HashSet<PathBuf>,
    fail_unmount: HashSet<PathBuf>,
    fail_lazy_unmount: HashSet<PathBuf>,
}

/// In-memory volume backend. Ciphertext initialization is real (it writes
/// the config marker), mounts are not.
#[derive(Default)]
pub struct MockBackend {
    state: Mutex<MockState>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, MockState>, RuntimeError> {
        self.state
            .lock()
            .map_err(|e| RuntimeError::ExecFailed(format!("mutex poisoned: {e}")))
    }

    pub fn fail_init_at(&self, cipher_dir: &Path) {
        if let Ok(mut s) = self.state() {
            s.fail_init.insert(cipher_dir.to_path_buf());
        }
    }

    pub fn fail_mount_at(&self, mount_dir: &Path) {
        if let Ok(mut s) = self.state() {
            s.fail_mount.insert(mount_dir.to_path_buf());
        }
    }

    pub fn fail_unmount_at(&self, mount_dir: &Path) {
        if let Ok(mut s) = self.state() {
            s.fail_unmount.insert(mount_dir.to_path_buf());
        }
    }

    pub fn fail_lazy_unmount_at(&self, mount_dir: &Path) {
        if let Ok(mut s) = self.state() {
            s.fail_lazy_unmount.insert(mount_dir.to_path_buf());
        }
    }

    /// Pretend something else already mounted `mount_dir`.
    pub fn mark_mounted(&self, mount_dir: &Path) {
        if let Ok(mut s) = self.state() {
            s.mounted.insert(mount_dir.to_path_buf());
        }
    }

    pub fn events(&self) -> Vec<MockEvent> {
        self.state().map(|s| s.events.clone()).unwrap_or_default()
    }

    pub fn mounted(&self) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = self
            .state()
            .map(|s| s.mounted.iter().cloned().collect())
            .unwrap_or_default();
        dirs.sort();
        dirs
    }

    /// Secrets read from passfiles handed to `init`/`mount`, in call order.
    pub fn passfile_secrets(&self) -> Vec<String> {
        self.state()
            .map(|s| s.passfile_secrets.clone())
            .unwrap_or_default()
    }
}

fn tool_failed(detail: String) -> RuntimeError {
    RuntimeError::ToolFailed {
        tool: "mock".to_owned(),
        detail,
    }
}

impl VolumeBackend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn is_initialized(&self, cipher_dir: &Path) -> bool {
        cipher_dir.join(CONFIG_FILE).is_file()
    }

    fn init(&self, cipher_dir: &Path, passfile: &Path) -> Result<(), RuntimeError> {
        let secret = std::fs::read_to_string(passfile)?;
        let mut state = self.state()?;
        state.events.push(MockEvent::Init(cipher_dir.to_path_buf()));
        state.passfile_secrets.push(secret.trim_end().to_owned());
        if state.fail_init.contains(cipher_dir) {
            return Err(tool_failed(format!("cannot initialize {}", cipher_dir.display())));
        }
        std::fs::create_dir_all(cipher_dir)?;
        std::fs::write(cipher_dir.join(CONFIG_FILE), "{\"Creator\":\"mock\"}\n")?;
        Ok(())
    }

    fn mount(
        &self,
        _cipher_dir: &Path,
        mount_dir: &Path,
        passfile: &Path,
    ) -> Result<(), RuntimeError> {
        let secret = std::fs::read_to_string(passfile)?;
        let mut state = self.state()?;
        state.events.push(MockEvent::Mount(mount_dir.to_path_buf()));
        state.passfile_secrets.push(secret.trim_end().to_owned());
        if state.fail_mount.contains(mount_dir) {
            return Err(tool_failed(format!("cannot mount {}", mount_dir.display())));
        }
        if !mount_dir.is_dir() {
            return Err(tool_failed(format!(
                "mountpoint {} does not exist",
                mount_dir.display()
            )));
        }
        state.mounted.insert(mount_dir.to_path_buf());
        Ok(())
    }

    fn unmount(&self, mount_dir: &Path) -> Result<(), RuntimeError> {
        let mut state = self.state()?;
        state.events.push(MockEvent::Unmount(mount_dir.to_path_buf()));
        if state.fail_unmount.contains(mount_dir) {
            return Err(tool_failed(format!("{}: target is busy", mount_dir.display())));
        }
        if !state.mounted.remove(mount_dir) {
            return Err(tool_failed(format!("{}: not mounted", mount_dir.display())));
        }
        Ok(())
    }

    fn unmount_lazy(&self, mount_dir: &Path) -> Result<(), RuntimeError> {
        let mut state = self.state()?;
        state
            .events
            .push(MockEvent::LazyUnmount(mount_dir.to_path_buf()));
        if state.fail_lazy_unmount.contains(mount_dir) {
            return Err(tool_failed(format!("{}: lazy unmount failed", mount_dir.display())));
        }
        state.mounted.remove(mount_dir);
        Ok(())
    }

    fn is_mounted(&self, mount_dir: &Path) -> bool {
        self.state()
            .map(|s| s.mounted.contains(mount_dir))
            .unwrap_or(false)
    }
}
