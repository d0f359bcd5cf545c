use crate::backend::VolumeBackend;
use crate::mount_table::probe_mount_point;
use crate::tools::{run_tool_checked, ToolConfig};
use crate::RuntimeError;
use std::ffi::OsStr;
use std::path::Path;
use tracing::debug;

/// Marker gocryptfs writes into an initialized ciphertext directory.
pub const CONFIG_FILE: &str = "gocryptfs.conf";

pub struct GocryptfsBackend {
    tools: ToolConfig,
}

impl GocryptfsBackend {
    pub fn new(tools: ToolConfig) -> Self {
        Self { tools }
    }
}

impl VolumeBackend for GocryptfsBackend {
    fn name(&self) -> &'static str {
        "gocryptfs"
    }

    fn is_initialized(&self, cipher_dir: &Path) -> bool {
        cipher_dir.join(CONFIG_FILE).is_file()
    }

    fn init(&self, cipher_dir: &Path, passfile: &Path) -> Result<(), RuntimeError> {
        debug!("gocryptfs -init {}", cipher_dir.display());
        run_tool_checked(
            &self.tools.gocryptfs,
            [
                OsStr::new("-init"),
                OsStr::new("-q"),
                OsStr::new("--passfile"),
                passfile.as_os_str(),
                cipher_dir.as_os_str(),
            ],
        )?;
        Ok(())
    }

    fn mount(
        &self,
        cipher_dir: &Path,
        mount_dir: &Path,
        passfile: &Path,
    ) -> Result<(), RuntimeError> {
        debug!("gocryptfs {} -> {}", cipher_dir.display(), mount_dir.display());
        run_tool_checked(
            &self.tools.gocryptfs,
            [
                OsStr::new("-q"),
                OsStr::new("--passfile"),
                passfile.as_os_str(),
                cipher_dir.as_os_str(),
                mount_dir.as_os_str(),
            ],
        )?;
        Ok(())
    }

    fn unmount(&self, mount_dir: &Path) -> Result<(), RuntimeError> {
        run_tool_checked(&self.tools.umount, [mount_dir.as_os_str()])?;
        Ok(())
    }

    fn unmount_lazy(&self, mount_dir: &Path) -> Result<(), RuntimeError> {
        run_tool_checked(&self.tools.umount, [OsStr::new("-l"), mount_dir.as_os_str()])?;
        Ok(())
    }

    fn is_mounted(&self, mount_dir: &Path) -> bool {
        probe_mount_point(mount_dir, &self.tools)
    }
}
