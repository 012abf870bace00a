//! Filesystem freeze guard.
//!
//! Quiesces a mounted filesystem for the duration of one closure so that a
//! block-level snapshot taken inside it is point-in-time consistent.
//!
//! # Guarantees
//!
//! - A mount point on the same device as `/` is never frozen. Freezing the
//!   root filesystem hangs the instance.
//! - If the freeze command fails, the closure never runs.
//! - Once frozen, the thaw command runs on every exit path: success, error,
//!   and panic unwinding.
//! - A thaw failure is logged. It is returned only when the closure itself
//!   succeeded, so it never masks the closure's error.
//!
//! A process killed while frozen leaves the filesystem frozen; run
//! `<freeze command> -u <mount point>` by hand in that case.

use std::path::{Path, PathBuf};
use tracing::{error, info};

use crate::error::{Result, SnapError};
use crate::exec::CommandRunner;
use crate::host::HostFs;

/// Freeze `mount_point` with `freeze_command`, run `body`, thaw.
pub fn with_frozen<T, F>(
    runner: &dyn CommandRunner,
    host: &dyn HostFs,
    freeze_command: &str,
    mount_point: &Path,
    body: F,
) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    let guard = FreezeGuard::acquire(runner, host, freeze_command, mount_point)?;
    let result = body();
    let thawed = guard.release();

    match (result, thawed) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(thaw_err)) => Err(thaw_err),
        (Err(body_err), _) => Err(body_err),
    }
}

/// A frozen mount point. Dropping it without [`FreezeGuard::release`]
/// (panic unwinding) still thaws.
struct FreezeGuard<'a> {
    runner: &'a dyn CommandRunner,
    freeze_command: &'a str,
    mount_point: PathBuf,
    frozen: bool,
}

impl<'a> FreezeGuard<'a> {
    fn acquire(
        runner: &'a dyn CommandRunner,
        host: &dyn HostFs,
        freeze_command: &'a str,
        mount_point: &Path,
    ) -> Result<Self> {
        if host.shares_root_device(mount_point)? {
            let err = SnapError::RootFreeze {
                mount_point: mount_point.to_path_buf(),
            };
            error!("{}", err);
            return Err(err);
        }

        info!(mount_point = %mount_point.display(), "freezing");
        runner
            .run(freeze_command, &freeze_args("-f", mount_point))
            .map_err(|e| SnapError::Freeze {
                mount_point: mount_point.to_path_buf(),
                output: e.output().to_string(),
            })?;

        Ok(Self {
            runner,
            freeze_command,
            mount_point: mount_point.to_path_buf(),
            frozen: true,
        })
    }

    fn release(mut self) -> Result<()> {
        self.thaw()
    }

    fn thaw(&mut self) -> Result<()> {
        if !self.frozen {
            return Ok(());
        }
        self.frozen = false;

        info!(mount_point = %self.mount_point.display(), "thawing");
        self.runner
            .run(self.freeze_command, &freeze_args("-u", &self.mount_point))
            .map(|_| ())
            .map_err(|e| {
                let err = SnapError::Thaw {
                    mount_point: self.mount_point.clone(),
                    output: e.output().to_string(),
                };
                error!("{}", err);
                err
            })
    }
}

impl Drop for FreezeGuard<'_> {
    fn drop(&mut self) {
        // Already logged inside thaw
        let _ = self.thaw();
    }
}

fn freeze_args(flag: &str, mount_point: &Path) -> Vec<String> {
    vec![flag.to_string(), mount_point.display().to_string()]
}
