//! Snapshot orchestrator.
//!
//! Drives a snapshot or restore run over a profile's volumes, strictly one
//! volume at a time in descriptor order.
//!
//! # Snapshot run
//!
//! ```text
//! pre_snapshots
//!   for each volume:
//!     pre_snapshot → resolve volume id → freeze → create snapshot → thaw → tag → post_snapshot
//! post_snapshots
//! ```
//!
//! The first failure aborts the rest of the run. Snapshots already created
//! by earlier volumes stay in place.
//!
//! # Mount run
//!
//! ```text
//! pre_mounts
//!   for each volume:
//!     pre_mount → device present? → skip or DeviceAlreadyExists
//!     select snapshot (none → fresh volume)
//!     create → tag → wait available → attach → wait in-use + device
//!       → format (fresh only) → mount → post_mount
//! post_mounts
//! ```
//!
//! A dry run stops after selection and runs no hooks.

use chrono::Duration;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, error, info, warn};

use crate::audit::{self, StaleMountPoint};
use crate::cloud::{AttachRequest, BlockDeviceMapping, CloudVolumeService, VolumeRequest};
use crate::config::{PollSettings, Settings};
use crate::error::{Result, SnapError};
use crate::exec::CommandRunner;
use crate::freeze::with_frozen;
use crate::host::{Clock, HostFs};
use crate::profiles::Profile;
use crate::selection::SnapshotCatalog;
use crate::tags::{self, Tags};
use crate::types::{Identity, InstanceMetadata, SnapshotRef, VolumeInfo, VolumeState};
use crate::volume::VolumeDescriptor;

/// Capabilities the orchestrator drives.
#[derive(Clone, Copy)]
pub struct Backends<'a> {
    pub cloud: &'a dyn CloudVolumeService,
    pub runner: &'a dyn CommandRunner,
    pub host: &'a dyn HostFs,
    pub clock: &'a dyn Clock,
}

/// What happened to one volume in a mount run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountOutcome {
    /// Created, attached and mounted; `snapshot_id` is None for a fresh volume
    Mounted {
        volume_id: String,
        snapshot_id: Option<String>,
    },
    /// Device already present and the caller asked to ignore mounted volumes
    Skipped,
    /// Dry run: what would have been restored
    Planned { snapshot_id: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountReport {
    pub volume: VolumeDescriptor,
    pub outcome: MountOutcome,
}

/// Result of best-effort unmount and detach for one volume
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnmountReport {
    pub volume: VolumeDescriptor,
    pub unmounted: bool,
    /// Volume id, when the detach completed
    pub detached: Option<String>,
}

/// One orchestration context: an instance, an identity and a profile.
pub struct Orchestrator<'a> {
    backends: Backends<'a>,
    settings: &'a Settings,
    identity: &'a Identity,
    instance: &'a InstanceMetadata,
    profile: &'a dyn Profile,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        backends: Backends<'a>,
        settings: &'a Settings,
        identity: &'a Identity,
        instance: &'a InstanceMetadata,
        profile: &'a dyn Profile,
    ) -> Self {
        Self {
            backends,
            settings,
            identity,
            instance,
            profile,
        }
    }

    /// Tags that scope snapshot and volume lookups for this profile
    pub fn filter_tags(&self) -> Tags {
        self.profile.filter_tags(self.identity)
    }

    // ========================================================================
    // Snapshots
    // ========================================================================

    /// Take a frozen, tagged snapshot of every volume.
    pub fn make_snapshots(&self, volumes: &[VolumeDescriptor]) -> Result<Vec<SnapshotRef>> {
        let runner = self.backends.runner;
        self.profile.pre_snapshots(runner, volumes)?;

        let mapping = self
            .backends
            .cloud
            .block_device_mapping(&self.instance.instance_id)?;

        let mut created = Vec::with_capacity(volumes.len());
        for volume in volumes {
            self.profile.pre_snapshot(runner, volume)?;
            created.push(self.snapshot_volume(volume, &mapping)?);
            self.profile.post_snapshot(runner, volume)?;
        }

        self.profile.post_snapshots(runner, volumes)?;
        info!(count = created.len(), "snapshot run complete");
        Ok(created)
    }

    fn snapshot_volume(&self, volume: &VolumeDescriptor, mapping: &BlockDeviceMapping) -> Result<SnapshotRef> {
        let volume_id = lookup_volume_id(mapping, volume)?;
        let now = self.backends.clock.now();
        let tags = self.resource_tags(volume, now);
        // Rendered before freezing so a bad template never leaves the window open
        let description = self.description(volume)?;

        let handle = with_frozen(
            self.backends.runner,
            self.backends.host,
            volume.freeze_command(),
            &volume.mount_point,
            || self.backends.cloud.create_snapshot(&volume_id, &description),
        )?;
        info!(
            snapshot_id = %handle.id,
            volume_id = %volume_id,
            mount_point = %volume.mount_point.display(),
            "snapshot requested"
        );

        self.tag(&handle.id, &tags)?;

        Ok(SnapshotRef {
            id: handle.id,
            volume_id: Some(handle.volume_id),
            created: now,
            tags,
        })
    }

    fn description(&self, volume: &VolumeDescriptor) -> Result<String> {
        let values = BTreeMap::from([
            ("role", self.identity.role.clone()),
            ("cluster", self.identity.cluster.clone()),
            ("environment", self.identity.environment.clone()),
            (tags::MOUNT_POINT, volume.mount_point.display().to_string()),
            ("device", volume.device.display().to_string()),
            (tags::INSTANCE_ID, self.instance.instance_id.clone()),
        ]);
        tags::render_description(&self.settings.description_template, &values)
    }

    // ========================================================================
    // Mounting
    // ========================================================================

    /// Restore every volume from its most recent snapshot, or create it empty.
    pub fn mount_snapshots(
        &self,
        volumes: &[VolumeDescriptor],
        ignore_mounted: bool,
        dry_run: bool,
    ) -> Result<Vec<MountReport>> {
        let runner = self.backends.runner;
        if !dry_run {
            self.profile.pre_mounts(runner, volumes)?;
        }

        let catalog = SnapshotCatalog::fetch(self.backends.cloud, &self.filter_tags())?;
        if catalog.is_empty() {
            warn!(filter = %self.filter_tags(), "no snapshots match, every volume will be created empty");
        } else {
            info!(snapshots = catalog.len(), "loaded snapshot catalog");
        }

        let mut reports = Vec::with_capacity(volumes.len());
        for volume in volumes {
            if !dry_run {
                self.profile.pre_mount(runner, volume)?;
            }

            let device = volume.instance_device();
            if self.backends.host.exists(&device) {
                if ignore_mounted {
                    warn!(device = %device.display(), "device already present, skipping");
                    reports.push(MountReport {
                        volume: volume.clone(),
                        outcome: MountOutcome::Skipped,
                    });
                    continue;
                }
                return Err(SnapError::DeviceAlreadyExists { device });
            }

            let snapshot = match catalog.select(&volume.mount_point) {
                Ok(snapshot) => Some(snapshot),
                Err(e) if e.is_missing_snapshot() => {
                    info!(mount_point = %volume.mount_point.display(), "no snapshot found, creating empty volume");
                    None
                }
                Err(e) => return Err(e),
            };
            let snapshot_id = snapshot.map(|s| s.id.clone());

            if dry_run {
                info!(
                    mount_point = %volume.mount_point.display(),
                    snapshot_id = snapshot_id.as_deref().unwrap_or("none"),
                    size = volume.size,
                    "dry run: would create, attach{} and mount",
                    if snapshot_id.is_none() { ", format" } else { "" }
                );
                reports.push(MountReport {
                    volume: volume.clone(),
                    outcome: MountOutcome::Planned { snapshot_id },
                });
                continue;
            }

            let volume_id = self.restore_volume(volume, snapshot_id.clone())?;
            self.profile.post_mount(runner, volume)?;

            reports.push(MountReport {
                volume: volume.clone(),
                outcome: MountOutcome::Mounted {
                    volume_id,
                    snapshot_id,
                },
            });
        }

        if !dry_run {
            self.profile.post_mounts(runner, volumes)?;
        }
        Ok(reports)
    }

    fn restore_volume(&self, volume: &VolumeDescriptor, snapshot_id: Option<String>) -> Result<String> {
        let cloud = self.backends.cloud;
        let fresh = snapshot_id.is_none();

        let handle = cloud.create_volume(&VolumeRequest {
            size: volume.size,
            availability_zone: self.instance.availability_zone.clone(),
            snapshot_id,
        })?;
        info!(volume_id = %handle.id, mount_point = %volume.mount_point.display(), "volume created");

        let tags = self.resource_tags(volume, self.backends.clock.now());
        self.tag(&handle.id, &tags)?;

        let device = volume.instance_device();
        let attach = &self.settings.attach;
        if handle.state != VolumeState::Available {
            let available = self.poll(attach, || {
                Ok(cloud.volume_state(&handle.id)? == VolumeState::Available)
            })?;
            if !available {
                return Err(SnapError::AttachmentTimeout {
                    volume_id: handle.id,
                    device,
                    attempts: attach.max_attempts,
                });
            }
        }

        cloud.attach_volume(&AttachRequest {
            volume_id: handle.id.clone(),
            instance_id: self.instance.instance_id.clone(),
            device: volume.device.clone(),
        })?;
        info!(volume_id = %handle.id, device = %volume.device.display(), "attach requested");

        let attached = self.poll(attach, || {
            Ok(cloud.volume_state(&handle.id)? == VolumeState::InUse && self.backends.host.exists(&device))
        })?;
        if !attached {
            return Err(SnapError::AttachmentTimeout {
                volume_id: handle.id,
                device,
                attempts: attach.max_attempts,
            });
        }

        if volume.delete_on_termination {
            cloud.set_delete_on_termination(&self.instance.instance_id, &volume.device)?;
            debug!(volume_id = %handle.id, "delete on termination set");
        }

        if fresh {
            volume.format(self.backends.runner)?;
        }
        volume.mount(self.backends.runner, self.backends.host)?;
        Ok(handle.id)
    }

    // ========================================================================
    // Unmounting
    // ========================================================================

    /// Unmount and detach every volume. Failures are logged, never raised.
    pub fn unmount_snapshots(&self, volumes: &[VolumeDescriptor]) -> Vec<UnmountReport> {
        let mapping = match self
            .backends
            .cloud
            .block_device_mapping(&self.instance.instance_id)
        {
            Ok(mapping) => Some(mapping),
            Err(e) => {
                error!(error = %e, "cannot read block device mapping, volumes will not be detached");
                None
            }
        };

        volumes
            .iter()
            .map(|volume| {
                let unmounted = match volume.unmount(self.backends.runner) {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(error = %e, "unmount failed, continuing");
                        false
                    }
                };

                let detached = mapping.as_ref().and_then(|m| self.detach(volume, m));
                UnmountReport {
                    volume: volume.clone(),
                    unmounted,
                    detached,
                }
            })
            .collect()
    }

    fn detach(&self, volume: &VolumeDescriptor, mapping: &BlockDeviceMapping) -> Option<String> {
        let outcome = lookup_volume_id(mapping, volume).and_then(|volume_id| {
            self.detach_volume(&volume_id)?;
            Ok(volume_id)
        });
        match outcome {
            Ok(volume_id) => Some(volume_id),
            Err(e) => {
                error!(error = %e, device = %volume.device.display(), "detach failed, continuing");
                None
            }
        }
    }

    fn detach_volume(&self, volume_id: &str) -> Result<()> {
        let cloud = self.backends.cloud;
        if !cloud.detach_volume(volume_id)? {
            warn!(volume_id, "detach request was not accepted");
        }

        let detach = &self.settings.detach;
        let detached = self.poll(detach, || {
            Ok(cloud.volume_state(volume_id)? == VolumeState::Available)
        })?;
        if !detached {
            return Err(SnapError::DetachmentTimeout {
                volume_id: volume_id.to_string(),
                attempts: detach.max_attempts,
            });
        }
        info!(volume_id, "volume detached");
        Ok(())
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Delete (or with `dry_run`, list) snapshots whose `expires` tag has passed.
    pub fn prune_expired(&self, dry_run: bool) -> Result<Vec<SnapshotRef>> {
        let snapshots = self.backends.cloud.list_snapshots(&self.filter_tags())?;
        let expired: Vec<SnapshotRef> = audit::expired_snapshots(&snapshots, self.backends.clock.now())
            .into_iter()
            .cloned()
            .collect();

        for snapshot in &expired {
            if dry_run {
                info!(snapshot_id = %snapshot.id, "dry run: would delete expired snapshot");
                continue;
            }
            self.backends.cloud.delete_snapshot(&snapshot.id)?;
            info!(snapshot_id = %snapshot.id, "deleted expired snapshot");
        }
        Ok(expired)
    }

    /// Delete (or with `dry_run`, list) detached volumes whose `expires` tag
    /// has passed. Volumes still attached are never touched.
    pub fn prune_volumes(&self, dry_run: bool) -> Result<Vec<VolumeInfo>> {
        let volumes = self.backends.cloud.list_volumes(&self.filter_tags())?;
        let expired: Vec<VolumeInfo> = audit::expired_volumes(&volumes, self.backends.clock.now())
            .into_iter()
            .cloned()
            .collect();

        for volume in &expired {
            if dry_run {
                info!(volume_id = %volume.id, "dry run: would delete expired volume");
                continue;
            }
            self.backends.cloud.delete_volume(&volume.id)?;
            info!(volume_id = %volume.id, "deleted expired volume");
        }
        Ok(expired)
    }

    /// Mount points whose in-use volumes have no snapshot younger than `max_age`.
    pub fn check_backups(&self, max_age: Duration) -> Result<Vec<StaleMountPoint>> {
        let filter = self.filter_tags();
        let volumes = self.backends.cloud.list_volumes(&filter)?;
        let snapshots = self.backends.cloud.list_snapshots(&filter)?;

        let stale = audit::stale_mount_points(&volumes, &snapshots, self.backends.clock.now(), max_age);
        for entry in &stale {
            warn!(
                mount_point = %entry.mount_point,
                volumes = %entry.volume_ids.join(", "),
                "no recent snapshot"
            );
        }
        Ok(stale)
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn resource_tags(&self, volume: &VolumeDescriptor, now: chrono::DateTime<chrono::Utc>) -> Tags {
        tags::resource_tags(
            self.identity,
            &volume.mount_point,
            &self.instance.instance_id,
            now,
            self.settings.retention_days,
        )
    }

    fn tag(&self, resource_id: &str, tags: &Tags) -> Result<()> {
        self.backends.cloud.tag_resource(resource_id, tags).map_err(|e| {
            error!(resource_id, error = %e, "resource created but left untagged");
            e
        })
    }

    /// Check `ready`, sleeping between checks; at most `max_attempts` sleeps.
    fn poll<F>(&self, settings: &PollSettings, mut ready: F) -> Result<bool>
    where
        F: FnMut() -> Result<bool>,
    {
        for _ in 0..settings.max_attempts {
            if ready()? {
                return Ok(true);
            }
            self.backends.clock.sleep(settings.interval());
        }
        ready()
    }
}

/// Cloud volume id behind a descriptor, by requested then instance device name.
fn lookup_volume_id(mapping: &BlockDeviceMapping, volume: &VolumeDescriptor) -> Result<String> {
    let requested = volume.device.display().to_string();
    let instance: PathBuf = volume.instance_device();
    mapping
        .get(&requested)
        .or_else(|| mapping.get(&instance.display().to_string()))
        .cloned()
        .ok_or(SnapError::MissingVolume { device: requested })
}
