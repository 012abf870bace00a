//! Volume descriptors.
//!
//! A [`VolumeDescriptor`] is the static description of one logical volume:
//! where it attaches, where it mounts, how big it is and which filesystem it
//! carries. It is built by a profile before every run and never persisted.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{error, info};

use crate::error::{Result, SnapError};
use crate::exec::{CommandError, CommandRunner};
use crate::host::HostFs;
use crate::types::Filesystem;

fn default_mount_options() -> String {
    "defaults".to_string()
}

/// Desired EBS volume setup for one mount point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeDescriptor {
    /// Device name requested at attach time (e.g. `/dev/sdf`)
    pub device: PathBuf,

    /// Where the filesystem is mounted; never `/`
    pub mount_point: PathBuf,

    /// Size in GiB
    pub size: u32,

    #[serde(default)]
    pub filesystem: Filesystem,

    /// Passed verbatim to `mount -o`
    #[serde(default = "default_mount_options")]
    pub mount_options: String,

    #[serde(default)]
    pub delete_on_termination: bool,
}

impl VolumeDescriptor {
    /// XFS volume with `defaults` mount options.
    ///
    /// # Errors
    ///
    /// `Validation` if the descriptor breaks an invariant, see [`Self::validate`].
    pub fn new(
        device: impl Into<PathBuf>,
        mount_point: impl Into<PathBuf>,
        size: u32,
    ) -> Result<Self> {
        let volume = Self {
            device: device.into(),
            mount_point: mount_point.into(),
            size,
            filesystem: Filesystem::default(),
            mount_options: default_mount_options(),
            delete_on_termination: false,
        };
        volume.validate()?;
        Ok(volume)
    }

    pub fn with_filesystem(mut self, filesystem: Filesystem) -> Self {
        self.filesystem = filesystem;
        self
    }

    pub fn with_mount_options(mut self, options: impl Into<String>) -> Self {
        self.mount_options = options.into();
        self
    }

    pub fn with_delete_on_termination(mut self, delete: bool) -> Self {
        self.delete_on_termination = delete;
        self
    }

    /// Check the descriptor invariants: non-empty device, absolute non-root
    /// mount point, positive size.
    pub fn validate(&self) -> Result<()> {
        if self.device.as_os_str().is_empty() {
            return Err(SnapError::validation("volume device must be specified"));
        }
        if !self.mount_point.is_absolute() {
            return Err(SnapError::validation(format!(
                "mount point {} must be an absolute path",
                self.mount_point.display()
            )));
        }
        if self.mount_point == Path::new("/") {
            return Err(SnapError::validation(format!(
                "volume on {} cannot be mounted on /",
                self.device.display()
            )));
        }
        if self.size == 0 {
            return Err(SnapError::validation(format!(
                "volume on {} must have a positive size",
                self.device.display()
            )));
        }
        Ok(())
    }

    /// The device path the kernel exposes.
    ///
    /// Xen-based instances expose a device requested as `/dev/sdf` as
    /// `/dev/xvdf`; only the `sd` prefix of the final component is rewritten.
    pub fn instance_device(&self) -> PathBuf {
        let name = self
            .device
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        match name.strip_prefix("sd") {
            Some(suffix) => self.device.with_file_name(format!("xvd{}", suffix)),
            None => self.device.clone(),
        }
    }

    /// Format binary for this volume's filesystem
    pub fn format_command(&self) -> &'static str {
        self.filesystem.format_command()
    }

    /// Freeze binary for this volume's filesystem
    pub fn freeze_command(&self) -> &'static str {
        self.filesystem.freeze_command()
    }

    /// argv for `mount`
    pub fn mount_args(&self) -> Vec<String> {
        vec![
            "-t".to_string(),
            self.filesystem.mount_type().to_string(),
            "-o".to_string(),
            self.mount_options.clone(),
            self.instance_device().display().to_string(),
            self.mount_point.display().to_string(),
        ]
    }

    /// argv for the format binary
    pub fn format_args(&self) -> Vec<String> {
        let mut args: Vec<String> = self
            .filesystem
            .format_flags()
            .iter()
            .map(|s| s.to_string())
            .collect();
        args.push(self.instance_device().display().to_string());
        args
    }

    /// Mount the instance device on the mount point, creating the mount point
    /// and its parents first.
    pub fn mount(&self, runner: &dyn CommandRunner, host: &dyn HostFs) -> Result<()> {
        if !host.exists(&self.mount_point) {
            host.create_dir_all(&self.mount_point)?;
        }

        let device = self.instance_device();
        info!(device = %device.display(), mount_point = %self.mount_point.display(), "mounting device");

        runner.run("mount", &self.mount_args()).map_err(|e| {
            let err = SnapError::Mount {
                device: device.clone(),
                output: command_output(&e),
            };
            error!("{}", err);
            err
        })?;
        Ok(())
    }

    /// Unmount the instance device.
    pub fn unmount(&self, runner: &dyn CommandRunner) -> Result<()> {
        let device = self.instance_device();
        info!(device = %device.display(), "unmounting device");

        runner
            .run("umount", &[device.display().to_string()])
            .map_err(|e| SnapError::Unmount {
                device: device.clone(),
                output: command_output(&e),
            })?;
        Ok(())
    }

    /// Put a fresh filesystem on the instance device.
    pub fn format(&self, runner: &dyn CommandRunner) -> Result<()> {
        let device = self.instance_device();
        info!(device = %device.display(), filesystem = %self.filesystem, "formatting device");

        runner
            .run(self.format_command(), &self.format_args())
            .map_err(|e| {
                let err = SnapError::Format {
                    device: device.clone(),
                    output: command_output(&e),
                };
                error!("{}", err);
                err
            })?;
        Ok(())
    }
}

impl fmt::Display for VolumeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} volume on {} from {} ({} GiB)",
            self.filesystem,
            self.mount_point.display(),
            self.device.display(),
            self.size
        )
    }
}

fn command_output(err: &CommandError) -> String {
    err.output().to_string()
}
