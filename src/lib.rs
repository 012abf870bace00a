//! ebsnap Library
//!
//! Consistent EBS snapshots of mounted volumes and deterministic restore of
//! those volumes from their most recent tagged snapshot.

pub mod audit;
pub mod aws;
pub mod cli;
pub mod cloud;
pub mod config;
pub mod error;
pub mod exec;
pub mod freeze;
pub mod host;
pub mod logging;
pub mod profiles;
pub mod sanity;
pub mod selection;
pub mod snapshotter;
pub mod tags;
pub mod types;
pub mod volume;

// Re-export main types for convenience
pub use aws::AwsCli;
pub use cloud::{AttachRequest, CloudVolumeService, SnapshotHandle, VolumeHandle, VolumeRequest};
pub use config::{HookCommands, IdentityOverrides, PollSettings, ProfileConfig, Settings};
pub use error::{Result, SnapError};
pub use exec::{CommandError, CommandOutput, CommandRunner, SystemRunner};
pub use freeze::with_frozen;
pub use host::{Clock, HostFs, LocalFs, SystemClock};
pub use profiles::{ConfiguredProfile, Profile, ProfileContext, ProfileRegistry, UserdataProfile};
pub use selection::{SnapshotCatalog, select_snapshot};
pub use snapshotter::{Backends, MountOutcome, MountReport, Orchestrator, UnmountReport};
pub use tags::Tags;
pub use types::{Filesystem, Identity, InstanceMetadata, SnapshotRef, VolumeInfo, VolumeState};
pub use volume::VolumeDescriptor;
