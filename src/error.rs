//! Error handling module for ebsnap
//!
//! Provides the error taxonomy shared by the orchestrator, the volume and
//! freeze helpers, and the cloud client. Every failure that comes from an
//! external command carries the captured output of that command.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for ebsnap
#[derive(Error, Debug)]
pub enum SnapError {
    /// No snapshot matches the volume's identity tags and mount point.
    /// Recoverable: the mount flow falls back to a fresh volume.
    #[error("No snapshot found for mount point {}", .mount_point.display())]
    MissingSnapshot { mount_point: PathBuf },

    /// The device is absent from the instance's block-device mapping
    #[error("{device} not found in block device mapping")]
    MissingVolume { device: String },

    /// The OS-visible device path already exists before volume creation
    #[error("Device {} already exists", .device.display())]
    DeviceAlreadyExists { device: PathBuf },

    /// Attach polling exceeded its retry ceiling
    #[error("Volume {volume_id} not attached at {} after {attempts} attempts", .device.display())]
    AttachmentTimeout {
        volume_id: String,
        device: PathBuf,
        attempts: u32,
    },

    /// Detach polling exceeded its retry ceiling
    #[error("Volume {volume_id} not detached after {attempts} attempts")]
    DetachmentTimeout { volume_id: String, attempts: u32 },

    /// `mount` exited non-zero
    #[error("Error mounting {}: {output}", .device.display())]
    Mount { device: PathBuf, output: String },

    /// `umount` exited non-zero
    #[error("Error unmounting {}: {output}", .device.display())]
    Unmount { device: PathBuf, output: String },

    /// `mkfs.*` exited non-zero
    #[error("Error formatting {}: {output}", .device.display())]
    Format { device: PathBuf, output: String },

    /// Refused to freeze a mount point that lives on the root device
    #[error("Refusing to freeze {}, it is part of the root filesystem \"/\"", .mount_point.display())]
    RootFreeze { mount_point: PathBuf },

    /// The freeze command failed, the filesystem was not frozen
    #[error("Error freezing {}: {output}", .mount_point.display())]
    Freeze { mount_point: PathBuf, output: String },

    /// The thaw command failed, the filesystem may still be frozen
    #[error("Error thawing {} (run the thaw command manually): {output}", .mount_point.display())]
    Thaw { mount_point: PathBuf, output: String },

    /// Missing tooling, unknown profile, bad template, missing identity
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Invalid volume descriptors or user input
    #[error("Validation error: {0}")]
    Validation(String),

    /// A cloud API call failed or returned something unusable
    #[error("Cloud API error: {0}")]
    Cloud(String),

    /// A profile lifecycle hook failed
    #[error("Hook {hook} failed: {message}")]
    Hook { hook: &'static str, message: String },

    /// IO errors (mount point creation, stat, config files)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for ebsnap operations
pub type Result<T> = std::result::Result<T, SnapError>;

impl SnapError {
    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a cloud API error
    pub fn cloud(msg: impl Into<String>) -> Self {
        Self::Cloud(msg.into())
    }

    /// Create a hook error
    pub fn hook(hook: &'static str, msg: impl Into<String>) -> Self {
        Self::Hook {
            hook,
            message: msg.into(),
        }
    }

    /// True for the one failure the mount flow recovers from
    pub fn is_missing_snapshot(&self) -> bool {
        matches!(self, Self::MissingSnapshot { .. })
    }
}
