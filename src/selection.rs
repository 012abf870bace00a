//! Snapshot selection policy.
//!
//! The cloud listing is filtered server-side by identity tags once per run
//! ([`SnapshotCatalog`]); each volume then picks from it client-side by
//! `mount_point` tag.

use std::cmp::Ordering;
use std::path::Path;
use tracing::debug;

use crate::cloud::CloudVolumeService;
use crate::error::{Result, SnapError};
use crate::tags::Tags;
use crate::types::SnapshotRef;

/// Most recent snapshot whose `mount_point` tag equals `mount_point`.
///
/// Equal creation timestamps are broken by the lexicographically larger
/// snapshot id, so the choice never depends on listing order.
///
/// # Errors
///
/// `MissingSnapshot` when no snapshot carries a matching `mount_point` tag.
pub fn select_snapshot<'a>(snapshots: &'a [SnapshotRef], mount_point: &Path) -> Result<&'a SnapshotRef> {
    let wanted = mount_point.display().to_string();

    snapshots
        .iter()
        .filter(|s| s.tags.mount_point() == Some(wanted.as_str()))
        .max_by(|a, b| recency(a, b))
        .ok_or_else(|| SnapError::MissingSnapshot {
            mount_point: mount_point.to_path_buf(),
        })
}

fn recency(a: &SnapshotRef, b: &SnapshotRef) -> Ordering {
    a.created.cmp(&b.created).then_with(|| a.id.cmp(&b.id))
}

/// Snapshot listing for one orchestration run.
///
/// Fetched once with the run's filter tags and read-only afterwards.
#[derive(Debug, Clone)]
pub struct SnapshotCatalog {
    snapshots: Vec<SnapshotRef>,
}

impl SnapshotCatalog {
    /// List every snapshot matching `filter` with a single cloud call.
    pub fn fetch(cloud: &dyn CloudVolumeService, filter: &Tags) -> Result<Self> {
        let snapshots = cloud.list_snapshots(filter)?;
        debug!(count = snapshots.len(), filter = %filter, "fetched snapshot catalog");
        Ok(Self { snapshots })
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// [`select_snapshot`] over this catalog
    pub fn select(&self, mount_point: &Path) -> Result<&SnapshotRef> {
        select_snapshot(&self.snapshots, mount_point)
    }
}
