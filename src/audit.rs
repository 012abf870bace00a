//! Backup audit and snapshot expiry.
//!
//! Pure functions over cloud listings; the orchestrator does the fetching.

use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{Result, SnapError};
use crate::types::{SnapshotRef, VolumeInfo, VolumeState};

/// A mount point whose in-use volumes have no recent snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleMountPoint {
    pub mount_point: String,
    pub volume_ids: Vec<String>,
}

/// Parse an age such as `30m`, `12h`, `1d` or `2w`.
///
/// Units: `s`, `m`, `h`, `d`, `w`. A unit is required.
pub fn parse_age(input: &str) -> Result<Duration> {
    let input = input.trim();
    let malformed = || {
        SnapError::validation(format!(
            "malformed age '{}', expected <number><s|m|h|d|w> such as 12h",
            input
        ))
    };

    let unit = input.chars().last().ok_or_else(malformed)?;
    let digits = &input[..input.len() - unit.len_utf8()];
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(malformed());
    }
    let count: i64 = digits.parse().map_err(|_| malformed())?;

    let seconds_per_unit = match unit {
        's' => 1,
        'm' => 60,
        'h' => 3600,
        'd' => 86_400,
        'w' => 604_800,
        _ => return Err(malformed()),
    };

    count
        .checked_mul(seconds_per_unit)
        .and_then(Duration::try_seconds)
        .ok_or_else(malformed)
}

/// Snapshots whose `expires` tag lies before `now`.
///
/// A snapshot without a parseable `expires` tag is never considered expired.
pub fn expired_snapshots(snapshots: &[SnapshotRef], now: DateTime<Utc>) -> Vec<&SnapshotRef> {
    snapshots
        .iter()
        .filter(|s| s.tags.expires().is_some_and(|expires| expires < now))
        .collect()
}

/// Detached (`available`) volumes whose `expires` tag lies before `now`.
///
/// Volumes in any other state, or without a parseable `expires` tag, are kept.
pub fn expired_volumes(volumes: &[VolumeInfo], now: DateTime<Utc>) -> Vec<&VolumeInfo> {
    volumes
        .iter()
        .filter(|v| v.state == VolumeState::Available)
        .filter(|v| v.tags.expires().is_some_and(|expires| expires < now))
        .collect()
}

/// Mount points of in-use volumes lacking a snapshot younger than `max_age`.
///
/// A mount point counts as backed up when at least one snapshot was taken
/// from one of its in-use volumes within the window. Volumes without a
/// `mount_point` tag are ignored.
pub fn stale_mount_points(
    volumes: &[VolumeInfo],
    snapshots: &[SnapshotRef],
    now: DateTime<Utc>,
    max_age: Duration,
) -> Vec<StaleMountPoint> {
    let mut by_mount_point: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for volume in volumes.iter().filter(|v| v.state == VolumeState::InUse) {
        if let Some(mount_point) = volume.tags.mount_point() {
            by_mount_point.entry(mount_point).or_default().push(&volume.id);
        }
    }

    let recent_sources: BTreeSet<&str> = snapshots
        .iter()
        .filter(|s| now - s.created <= max_age)
        .filter_map(|s| s.volume_id.as_deref())
        .collect();

    by_mount_point
        .into_iter()
        .filter(|(_, ids)| !ids.iter().any(|id| recent_sources.contains(id)))
        .map(|(mount_point, ids)| StaleMountPoint {
            mount_point: mount_point.to_string(),
            volume_ids: ids.into_iter().map(str::to_string).collect(),
        })
        .collect()
}
