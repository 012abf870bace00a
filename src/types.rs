//! Core data types shared across ebsnap
//!
//! Stringly-typed values coming from the cloud API or the config file are
//! parsed into these enums and structs at the boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use strum::{Display, EnumIter, EnumString};

use crate::tags::Tags;

/// Filesystem placed on a volume.
///
/// Each variant knows its `mount -t` name, its format binary and the binary
/// used to freeze/thaw it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Filesystem {
    #[default]
    Xfs,
    Ext3,
    Ext4,
    Jfs,
    ReiserFs,
}

impl Filesystem {
    /// Type name passed to `mount -t`
    pub fn mount_type(&self) -> &'static str {
        match self {
            Self::Xfs => "xfs",
            Self::Ext3 => "ext3",
            Self::Ext4 => "ext4",
            Self::Jfs => "jfs",
            Self::ReiserFs => "reiserfs",
        }
    }

    /// Binary that formats a device with this filesystem
    pub fn format_command(&self) -> &'static str {
        match self {
            Self::Xfs => "mkfs.xfs",
            Self::Ext3 => "mkfs.ext3",
            Self::Ext4 => "mkfs.ext4",
            Self::Jfs => "mkfs.jfs",
            Self::ReiserFs => "mkfs.reiserfs",
        }
    }

    /// Flags placed before the device. jfs and reiserfs prompt for
    /// confirmation without `-q`.
    pub fn format_flags(&self) -> &'static [&'static str] {
        match self {
            Self::Xfs | Self::Ext3 | Self::Ext4 => &[],
            Self::Jfs | Self::ReiserFs => &["-q"],
        }
    }

    /// Binary that freezes (`-f`) and thaws (`-u`) a mount point
    pub fn freeze_command(&self) -> &'static str {
        match self {
            Self::Xfs => "xfs_freeze",
            Self::Ext3 | Self::Ext4 | Self::Jfs | Self::ReiserFs => "fsfreeze",
        }
    }
}

/// The `{role, cluster, environment}` triple that scopes snapshots and
/// volumes to one logical deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub role: String,
    pub cluster: String,
    pub environment: String,
}

impl Identity {
    /// Tag keys that make up an identity, in tag order
    pub const KEYS: [&'static str; 3] = ["role", "cluster", "environment"];

    pub fn new(
        role: impl Into<String>,
        cluster: impl Into<String>,
        environment: impl Into<String>,
    ) -> Self {
        Self {
            role: role.into(),
            cluster: cluster.into(),
            environment: environment.into(),
        }
    }

    /// Value for one identity key
    pub fn get(&self, key: &str) -> Option<&str> {
        match key {
            "role" => Some(&self.role),
            "cluster" => Some(&self.cluster),
            "environment" => Some(&self.environment),
            _ => None,
        }
    }

    pub fn to_tags(&self) -> Tags {
        let mut tags = Tags::new();
        tags.insert("role", &self.role);
        tags.insert("cluster", &self.cluster);
        tags.insert("environment", &self.environment);
        tags
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "role={} cluster={} environment={}",
            self.role, self.cluster, self.environment
        )
    }
}

/// What the instance metadata service reports about the running instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceMetadata {
    pub instance_id: String,
    pub availability_zone: String,
    /// Raw userdata, None when the instance was launched without any
    pub userdata: Option<String>,
}

/// A snapshot as listed by the cloud service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRef {
    pub id: String,
    /// Source volume, when the listing reports it
    pub volume_id: Option<String>,
    pub created: DateTime<Utc>,
    pub tags: Tags,
}

/// Volume lifecycle state as reported by the cloud service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VolumeState {
    Creating,
    Available,
    InUse,
    Deleting,
    Deleted,
    Error,
    Other(String),
}

impl VolumeState {
    pub fn parse(state: &str) -> Self {
        match state {
            "creating" => Self::Creating,
            "available" => Self::Available,
            "in-use" => Self::InUse,
            "deleting" => Self::Deleting,
            "deleted" => Self::Deleted,
            "error" => Self::Error,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Creating => "creating",
            Self::Available => "available",
            Self::InUse => "in-use",
            Self::Deleting => "deleting",
            Self::Deleted => "deleted",
            Self::Error => "error",
            Self::Other(s) => s,
        }
    }
}

impl fmt::Display for VolumeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A volume as listed by the cloud service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeInfo {
    pub id: String,
    pub state: VolumeState,
    pub tags: Tags,
}
