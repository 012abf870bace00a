//! Cloud volume service capability.
//!
//! Everything the orchestrator asks of the block-storage provider. The
//! production implementation is [`crate::aws::AwsCli`]; tests use an
//! in-memory fake.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::tags::Tags;
use crate::types::{InstanceMetadata, SnapshotRef, VolumeInfo, VolumeState};

/// Parameters for creating a volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeRequest {
    /// Size in GiB
    pub size: u32,
    pub availability_zone: String,
    /// Restore from this snapshot; None creates an empty volume
    pub snapshot_id: Option<String>,
}

/// Parameters for attaching a volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachRequest {
    pub volume_id: String,
    pub instance_id: String,
    /// Requested device name (e.g. `/dev/sdf`)
    pub device: PathBuf,
}

/// Handle returned after creating a volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeHandle {
    pub id: String,
    pub state: VolumeState,
}

/// Handle returned after requesting a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotHandle {
    pub id: String,
    pub volume_id: String,
}

/// Requested device name → volume id, for volumes attached to one instance
pub type BlockDeviceMapping = BTreeMap<String, String>;

/// Backend operations required for snapshot and volume management.
pub trait CloudVolumeService {
    /// Identity and placement of the instance we run on
    fn instance_metadata(&self) -> Result<InstanceMetadata>;

    fn block_device_mapping(&self, instance_id: &str) -> Result<BlockDeviceMapping>;

    fn create_volume(&self, request: &VolumeRequest) -> Result<VolumeHandle>;

    fn attach_volume(&self, request: &AttachRequest) -> Result<()>;

    /// Delete the volume attached at `device` when the instance terminates.
    /// EC2 keeps this flag on the attachment, so the volume must be in use.
    fn set_delete_on_termination(&self, instance_id: &str, device: &Path) -> Result<()>;

    /// True if the provider accepted the detach request
    fn detach_volume(&self, volume_id: &str) -> Result<bool>;

    fn volume_state(&self, volume_id: &str) -> Result<VolumeState>;

    /// Delete a volume; it must not be attached
    fn delete_volume(&self, volume_id: &str) -> Result<()>;

    /// Volumes whose tags match every tag in `filter`
    fn list_volumes(&self, filter: &Tags) -> Result<Vec<VolumeInfo>>;

    fn create_snapshot(&self, volume_id: &str, description: &str) -> Result<SnapshotHandle>;

    /// Snapshots owned by this account whose tags match every tag in `filter`
    fn list_snapshots(&self, filter: &Tags) -> Result<Vec<SnapshotRef>>;

    fn delete_snapshot(&self, snapshot_id: &str) -> Result<()>;

    /// Add (or overwrite) tags on a volume or snapshot
    fn tag_resource(&self, resource_id: &str, tags: &Tags) -> Result<()>;
}
