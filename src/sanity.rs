//! Pre-flight sanity checks for the runtime environment
//!
//! Verifies, before any volume is touched:
//! - Required binaries are on PATH (mount tooling, the aws CLI, curl, and the
//!   format and freeze binaries of every filesystem in use)
//! - Running with root privileges (EUID 0)

use std::collections::BTreeSet;
use tracing::{debug, info};

use crate::error::{Result, SnapError};
use crate::exec::CommandRunner;
use crate::volume::VolumeDescriptor;

/// Result of environment verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SanityCheckResult {
    pub missing_binaries: Vec<String>,
    pub is_root: bool,
}

impl SanityCheckResult {
    /// Returns true if all checks passed
    pub fn is_ok(&self) -> bool {
        self.missing_binaries.is_empty() && self.is_root
    }

    /// `Configuration` error describing every failed check
    pub fn into_result(self) -> Result<()> {
        if self.is_ok() {
            return Ok(());
        }
        let mut problems = Vec::new();
        if !self.is_root {
            problems.push("root privileges required (run with sudo)".to_string());
        }
        if !self.missing_binaries.is_empty() {
            problems.push(format!(
                "missing binaries: {}",
                self.missing_binaries.join(", ")
            ));
        }
        Err(SnapError::configuration(problems.join("; ")))
    }
}

/// Binaries every run needs regardless of filesystem
const BASE_BINARIES: &[&str] = &[
    "mount",  // util-linux
    "umount", // util-linux
    "curl",   // instance metadata
];

/// Binaries needed to snapshot and restore `volumes` with `aws_cli`
pub fn required_binaries(aws_cli: &str, volumes: &[VolumeDescriptor]) -> Vec<String> {
    let mut binaries: BTreeSet<String> = BASE_BINARIES.iter().map(|b| b.to_string()).collect();
    binaries.insert(aws_cli.to_string());
    binaries.extend(tooling_binaries(volumes));
    binaries.into_iter().collect()
}

fn tooling_binaries(volumes: &[VolumeDescriptor]) -> BTreeSet<String> {
    volumes
        .iter()
        .flat_map(|v| [v.format_command(), v.freeze_command()])
        .map(str::to_string)
        .collect()
}

/// Check if a binary is available in PATH
pub fn binary_exists(runner: &dyn CommandRunner, name: &str) -> bool {
    runner.run("which", &[name.to_string()]).is_ok()
}

/// Check if running as root (EUID 0)
pub fn is_running_as_root() -> bool {
    nix::unistd::geteuid().is_root()
}

/// Perform all sanity checks and return the result
pub fn verify_environment(runner: &dyn CommandRunner, binaries: &[String]) -> SanityCheckResult {
    let missing: Vec<String> = binaries
        .iter()
        .filter(|b| !binary_exists(runner, b))
        .cloned()
        .collect();
    for binary in &missing {
        debug!(binary = %binary, "required binary not found");
    }

    SanityCheckResult {
        missing_binaries: missing,
        is_root: is_running_as_root(),
    }
}

/// Fail fast when a volume's format or freeze tooling is absent.
pub fn check_volume_tooling(runner: &dyn CommandRunner, volumes: &[VolumeDescriptor]) -> Result<()> {
    let missing: Vec<String> = tooling_binaries(volumes)
        .into_iter()
        .filter(|b| !binary_exists(runner, b))
        .collect();

    if missing.is_empty() {
        info!(volumes = volumes.len(), "filesystem tooling present");
        Ok(())
    } else {
        Err(SnapError::configuration(format!(
            "filesystem tooling not installed: {}",
            missing.join(", ")
        )))
    }
}
