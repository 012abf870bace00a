//! Local host capabilities: filesystem checks and time.
//!
//! The orchestrator never touches `std::fs` or `std::thread::sleep` directly;
//! it goes through these traits so the attach/detach loops and the root
//! freeze check can be exercised without an EC2 instance.

use chrono::{DateTime, Utc};
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use std::time::Duration;

/// Filesystem checks used by the volume descriptor and freeze guard.
pub trait HostFs {
    /// True if `path` exists (device node or directory).
    fn exists(&self, path: &Path) -> bool;

    /// Create `path` and all missing parents.
    fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    /// True if `path` lives on the same device as `/`.
    fn shares_root_device(&self, path: &Path) -> io::Result<bool>;
}

/// The real local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFs;

impl HostFs for LocalFs {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        std::fs::create_dir_all(path)
    }

    fn shares_root_device(&self, path: &Path) -> io::Result<bool> {
        let root = std::fs::metadata("/")?;
        let target = std::fs::metadata(path)?;
        Ok(root.dev() == target.dev())
    }
}

/// Wall clock plus the polling sleep primitive.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;

    /// Block the calling thread for `duration`.
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}
