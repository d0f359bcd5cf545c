use crate::tools::{failure_detail, run_tool, run_tool_checked};
use crate::RuntimeError;
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::NamedTempFile;
use tracing::{debug, warn};
use zeroize::{Zeroize, Zeroizing};

/// An external secret store queried by entry name.
pub trait SecretStore: Send + Sync {
    /// Fetch one entry, trimmed of trailing whitespace. An empty value is
    /// reported as [`RuntimeError::SecretNotFound`].
    fn fetch(&self, entry: &str) -> Result<Zeroizing<String>, RuntimeError>;

    fn exists(&self, entry: &str) -> Result<bool, RuntimeError>;

    /// Generate a new random secret of `length` characters under `entry`.
    fn generate(&self, entry: &str, length: usize) -> Result<(), RuntimeError>;
}

/// The `pass` password manager.
pub struct PassStore {
    binary: PathBuf,
}

impl PassStore {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl SecretStore for PassStore {
    fn fetch(&self, entry: &str) -> Result<Zeroizing<String>, RuntimeError> {
        let mut output = run_tool(&self.binary, ["show", entry])?;
        if !output.status.success() {
            debug!("pass show {entry}: {}", failure_detail(&output));
            output.stdout.zeroize();
            return Err(RuntimeError::SecretNotFound(entry.to_owned()));
        }
        let secret = Zeroizing::new(String::from_utf8_lossy(&output.stdout).trim_end().to_owned());
        output.stdout.zeroize();
        if secret.is_empty() {
            return Err(RuntimeError::SecretNotFound(entry.to_owned()));
        }
        Ok(secret)
    }

    fn exists(&self, entry: &str) -> Result<bool, RuntimeError> {
        let mut output = run_tool(&self.binary, ["show", entry])?;
        output.stdout.zeroize();
        Ok(output.status.success())
    }

    fn generate(&self, entry: &str, length: usize) -> Result<(), RuntimeError> {
        let length = length.to_string();
        let mut output = run_tool_checked(&self.binary, ["generate", "-n", entry, &length])?;
        output.stdout.zeroize();
        Ok(())
    }
}

/// A fixed in-memory secret store that records every lookup.
#[derive(Default)]
pub struct StaticSecretStore {
    secrets: Mutex<HashMap<String, String>>,
    fetches: Mutex<Vec<String>>,
}

impl StaticSecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(self, entry: &str, secret: &str) -> Self {
        if let Ok(mut secrets) = self.secrets.lock() {
            secrets.insert(entry.to_owned(), secret.to_owned());
        }
        self
    }

    /// Entries passed to [`fetch`](SecretStore::fetch), in call order.
    pub fn fetches(&self) -> Vec<String> {
        self.fetches.lock().map(|f| f.clone()).unwrap_or_default()
    }
}

impl SecretStore for StaticSecretStore {
    fn fetch(&self, entry: &str) -> Result<Zeroizing<String>, RuntimeError> {
        if let Ok(mut fetches) = self.fetches.lock() {
            fetches.push(entry.to_owned());
        }
        let secrets = self
            .secrets
            .lock()
            .map_err(|e| RuntimeError::ExecFailed(format!("mutex poisoned: {e}")))?;
        match secrets.get(entry) {
            Some(s) if !s.trim_end().is_empty() => Ok(Zeroizing::new(s.trim_end().to_owned())),
            _ => Err(RuntimeError::SecretNotFound(entry.to_owned())),
        }
    }

    fn exists(&self, entry: &str) -> Result<bool, RuntimeError> {
        let secrets = self
            .secrets
            .lock()
            .map_err(|e| RuntimeError::ExecFailed(format!("mutex poisoned: {e}")))?;
        Ok(secrets.contains_key(entry))
    }

    fn generate(&self, entry: &str, length: usize) -> Result<(), RuntimeError> {
        let mut secrets = self
            .secrets
            .lock()
            .map_err(|e| RuntimeError::ExecFailed(format!("mutex poisoned: {e}")))?;
        // `pass generate` without `--force` never overwrites.
        if secrets.contains_key(entry) {
            return Err(RuntimeError::ToolFailed {
                tool: "pass".to_owned(),
                detail: format!("An entry already exists for {entry}."),
            });
        }
        secrets.insert(entry.to_owned(), "g".repeat(length));
        Ok(())
    }
}

/// A secret written to an owner-only (0600) temporary file for tools that
/// read passwords from a file. The file is removed by [`remove`](Self::remove)
/// or, failing that, on drop.
pub struct Passfile {
    file: NamedTempFile,
}

impl Passfile {
    pub fn create(secret: &str) -> Result<Self, RuntimeError> {
        let mut file = tempfile::Builder::new()
            .prefix("cryptow-pass-")
            .tempfile()?;
        fs::set_permissions(file.path(), fs::Permissions::from_mode(0o600))?;
        let payload = Zeroizing::new(format!("{secret}\n"));
        file.write_all(payload.as_bytes())?;
        file.as_file().sync_all()?;
        Ok(Self { file })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn remove(self) {
        let path = self.file.path().to_path_buf();
        if let Err(e) = self.file.close() {
            warn!("failed to remove passfile {}: {e}", path.display());
        }
    }
}
