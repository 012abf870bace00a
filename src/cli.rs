use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// ebsnap - tagged EBS snapshots and boot-time volume restore
#[derive(Parser, Debug)]
#[command(name = "ebsnap")]
#[command(about = "Snapshot mounted EBS volumes and restore them from their latest snapshot")]
#[command(version)]
pub struct Cli {
    /// Log verbosity: 0 error, 1 warn, 2 info, 3 debug
    #[arg(short, long, global = true, default_value_t = 2)]
    pub verbosity: u8,

    /// Settings file (default: $EBSNAP_CONFIG, /etc/ebsnap.json, /etc/ebsnap/settings.json)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the role identity tag
    #[arg(long, global = true)]
    pub role: Option<String>,

    /// Override the cluster identity tag
    #[arg(long, global = true)]
    pub cluster: Option<String>,

    /// Override the environment identity tag
    #[arg(long, global = true)]
    pub environment: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Freeze, snapshot and tag every volume of a profile
    MakeSnapshots {
        /// Profile name
        #[arg(default_value = "userdata")]
        profile: String,
    },
    /// Create volumes from the latest snapshots, attach and mount them
    MountSnapshots {
        /// Profile name
        #[arg(default_value = "userdata")]
        profile: String,

        /// Skip volumes whose device is already present instead of failing
        #[arg(long)]
        ignore_mounted: bool,

        /// Select snapshots and log the plan without changing anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Unmount and detach every volume of a profile (best effort)
    UnmountSnapshots {
        /// Profile name
        #[arg(default_value = "userdata")]
        profile: String,
    },
    /// Print the volumes of a profile
    ListVolumes {
        /// Profile name
        #[arg(default_value = "userdata")]
        profile: String,
    },
    /// Print the registered profile names
    ListProfiles,
    /// Report mount points without a recent snapshot; exit code is their count
    CheckBackups {
        /// Profile whose filter tags scope the audit
        #[arg(default_value = "userdata")]
        profile: String,

        /// Maximum snapshot age, e.g. 30m, 12h, 1d, 2w
        #[arg(long, default_value = "1d")]
        max_age: String,
    },
    /// Delete snapshots whose expires tag has passed
    PruneSnapshots {
        /// Profile whose filter tags scope the pruning
        #[arg(default_value = "userdata")]
        profile: String,

        /// List expired snapshots without deleting them
        #[arg(long)]
        dry_run: bool,
    },
    /// Delete detached volumes whose expires tag has passed
    PruneVolumes {
        /// Profile whose filter tags scope the pruning
        #[arg(default_value = "userdata")]
        profile: String,

        /// List expired volumes without deleting them
        #[arg(long)]
        dry_run: bool,
    },
    /// Pre-flight check: root, required binaries, instance metadata
    Check {
        /// Profile whose filesystems determine the required tooling
        #[arg(default_value = "userdata")]
        profile: String,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        <Self as clap::Parser>::parse()
    }
}
