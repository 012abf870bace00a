//! ebsnap - Main entry point
//!
//! Loads settings, sets up logging, builds the profile registry and
//! dispatches one subcommand against the instance we are running on.

use anyhow::{Context, Result};
use std::process::ExitCode;
use tracing::{debug, error, info, warn};

use ebsnap::audit::parse_age;
use ebsnap::cli::{Cli, Commands};
use ebsnap::{
    AwsCli, Backends, CloudVolumeService, IdentityOverrides, InstanceMetadata, LocalFs, MountOutcome,
    Orchestrator, Profile, ProfileContext, ProfileRegistry, Settings, SystemClock, SystemRunner,
    logging, sanity,
};

fn main() -> ExitCode {
    let cli = Cli::parse_args();

    let (settings, settings_path) = match Settings::load(cli.config.as_deref()) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("✗ Failed to load settings: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    let _log_guard = match logging::init(cli.verbosity, settings.log_dir.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("✗ Failed to initialize logging: {:#}", e);
            return ExitCode::FAILURE;
        }
    };
    match &settings_path {
        Some(path) => info!(path = %path.display(), "loaded settings"),
        None => info!("no settings file found, using defaults"),
    }

    match run(&cli, &settings) {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Everything a subcommand needs about the running instance
struct RunContext<'a> {
    instance: InstanceMetadata,
    userdata: Option<serde_json::Value>,
    identity: ebsnap::Identity,
    profile: &'a dyn Profile,
}

fn run(cli: &Cli, settings: &Settings) -> Result<ExitCode> {
    let registry = ProfileRegistry::build(settings);
    let runner = SystemRunner;
    let cloud = AwsCli::new(&runner, settings.aws_cli.clone(), settings.region.clone());

    let profile_name = match &cli.command {
        Commands::ListProfiles => {
            for name in registry.names() {
                println!("{}", name);
            }
            return Ok(ExitCode::SUCCESS);
        }
        Commands::Check { profile } => return run_check(cli, settings, &registry, &cloud, profile),
        Commands::MakeSnapshots { profile }
        | Commands::MountSnapshots { profile, .. }
        | Commands::UnmountSnapshots { profile }
        | Commands::ListVolumes { profile }
        | Commands::CheckBackups { profile, .. }
        | Commands::PruneSnapshots { profile, .. }
        | Commands::PruneVolumes { profile, .. } => profile.as_str(),
    };

    let ctx = instance_context(cli, settings, &registry, &cloud, profile_name)?;
    let profile_ctx = ProfileContext {
        identity: &ctx.identity,
        instance: &ctx.instance,
        userdata: ctx.userdata.as_ref(),
    };
    let volumes = ctx
        .profile
        .volumes(&profile_ctx)
        .with_context(|| format!("Failed to list volumes of profile '{}'", profile_name))?;
    debug!(profile = profile_name, volumes = volumes.len(), identity = %ctx.identity, "run context ready");

    let host = LocalFs;
    let clock = SystemClock;
    let backends = Backends {
        cloud: &cloud,
        runner: &runner,
        host: &host,
        clock: &clock,
    };
    let orchestrator = Orchestrator::new(backends, settings, &ctx.identity, &ctx.instance, ctx.profile);

    match &cli.command {
        Commands::MakeSnapshots { .. } => {
            require_root()?;
            sanity::check_volume_tooling(&runner, &volumes)?;
            let snapshots = orchestrator.make_snapshots(&volumes)?;
            for snapshot in &snapshots {
                println!(
                    "✓ {} {} ({})",
                    snapshot.id,
                    snapshot.tags.mount_point().unwrap_or("-"),
                    snapshot.volume_id.as_deref().unwrap_or("-")
                );
            }
        }
        Commands::MountSnapshots {
            ignore_mounted,
            dry_run,
            ..
        } => {
            if !*dry_run {
                require_root()?;
                sanity::check_volume_tooling(&runner, &volumes)?;
            }
            let reports = orchestrator.mount_snapshots(&volumes, *ignore_mounted, *dry_run)?;
            for report in &reports {
                let mount_point = report.volume.mount_point.display();
                match &report.outcome {
                    MountOutcome::Mounted {
                        volume_id,
                        snapshot_id,
                    } => println!(
                        "✓ {} mounted from {} as {}",
                        mount_point,
                        snapshot_id.as_deref().unwrap_or("empty volume"),
                        volume_id
                    ),
                    MountOutcome::Skipped => println!("- {} skipped, device present", mount_point),
                    MountOutcome::Planned { snapshot_id } => println!(
                        "? {} would be restored from {}",
                        mount_point,
                        snapshot_id.as_deref().unwrap_or("empty volume")
                    ),
                }
            }
        }
        Commands::UnmountSnapshots { .. } => {
            require_root()?;
            for report in orchestrator.unmount_snapshots(&volumes) {
                println!(
                    "{} {} unmounted={} detached={}",
                    if report.unmounted && report.detached.is_some() { "✓" } else { "✗" },
                    report.volume.mount_point.display(),
                    report.unmounted,
                    report.detached.as_deref().unwrap_or("no")
                );
            }
        }
        Commands::ListVolumes { .. } => {
            for volume in &volumes {
                println!(
                    "{}\t{}\t{}\t{} GiB\t{}\t{}",
                    volume.device.display(),
                    volume.instance_device().display(),
                    volume.mount_point.display(),
                    volume.size,
                    volume.filesystem,
                    volume.mount_options
                );
            }
        }
        Commands::CheckBackups { max_age, .. } => {
            let max_age = parse_age(max_age)?;
            let stale = orchestrator.check_backups(max_age)?;
            for entry in &stale {
                println!("✗ {} on volume(s) {}", entry.mount_point, entry.volume_ids.join(", "));
            }
            if stale.is_empty() {
                println!("✓ every mount point has a recent snapshot");
            }
            return Ok(ExitCode::from(u8::try_from(stale.len()).unwrap_or(u8::MAX)));
        }
        Commands::PruneSnapshots { dry_run, .. } => {
            let pruned = orchestrator.prune_expired(*dry_run)?;
            let verb = if *dry_run { "would delete" } else { "deleted" };
            for snapshot in &pruned {
                println!("{} {} (expired {})", verb, snapshot.id, snapshot.tags.get("expires").unwrap_or("-"));
            }
            info!(count = pruned.len(), dry_run = *dry_run, "prune complete");
        }
        Commands::PruneVolumes { dry_run, .. } => {
            let pruned = orchestrator.prune_volumes(*dry_run)?;
            let verb = if *dry_run { "would delete" } else { "deleted" };
            for volume in &pruned {
                println!(
                    "{} {} {} (expired {})",
                    verb,
                    volume.id,
                    volume.tags.mount_point().unwrap_or("-"),
                    volume.tags.get("expires").unwrap_or("-")
                );
            }
            info!(count = pruned.len(), dry_run = *dry_run, "volume prune complete");
        }
        Commands::ListProfiles | Commands::Check { .. } => {}
    }

    Ok(ExitCode::SUCCESS)
}

fn instance_context<'a>(
    cli: &Cli,
    settings: &Settings,
    registry: &'a ProfileRegistry,
    cloud: &dyn CloudVolumeService,
    profile_name: &str,
) -> Result<RunContext<'a>> {
    let profile = registry.get(profile_name)?;
    let instance = cloud
        .instance_metadata()
        .context("Failed to read instance metadata (is this an EC2 instance?)")?;

    let userdata = instance
        .userdata
        .as_deref()
        .and_then(|raw| match serde_json::from_str(raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(error = %e, "userdata is not JSON, ignoring it");
                None
            }
        });

    let overrides = IdentityOverrides {
        role: cli.role.clone(),
        cluster: cli.cluster.clone(),
        environment: cli.environment.clone(),
    };
    let identity = overrides.resolve(settings.identity.as_ref(), userdata.as_ref())?;

    Ok(RunContext {
        instance,
        userdata,
        identity,
        profile,
    })
}

fn run_check(
    cli: &Cli,
    settings: &Settings,
    registry: &ProfileRegistry,
    cloud: &dyn CloudVolumeService,
    profile_name: &str,
) -> Result<ExitCode> {
    let mut healthy = true;

    let volumes = match instance_context(cli, settings, registry, cloud, profile_name) {
        Ok(ctx) => {
            println!("✓ instance {} in {}", ctx.instance.instance_id, ctx.instance.availability_zone);
            println!("✓ identity {}", ctx.identity);
            let profile_ctx = ProfileContext {
                identity: &ctx.identity,
                instance: &ctx.instance,
                userdata: ctx.userdata.as_ref(),
            };
            match ctx.profile.volumes(&profile_ctx) {
                Ok(volumes) => {
                    println!("✓ profile {} has {} volume(s)", profile_name, volumes.len());
                    volumes
                }
                Err(e) => {
                    println!("✗ profile {}: {}", profile_name, e);
                    healthy = false;
                    Vec::new()
                }
            }
        }
        Err(e) => {
            println!("✗ {:#}", e);
            healthy = false;
            Vec::new()
        }
    };

    let binaries = sanity::required_binaries(&settings.aws_cli, &volumes);
    let result = sanity::verify_environment(&SystemRunner, &binaries);
    if result.missing_binaries.is_empty() {
        println!("✓ all {} required binaries present", binaries.len());
    }
    if result.is_root {
        println!("✓ running as root");
    }
    if let Err(e) = result.into_result() {
        println!("✗ {}", e);
        healthy = false;
    }

    Ok(if healthy {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn require_root() -> Result<()> {
    if !sanity::is_running_as_root() {
        anyhow::bail!("Root privileges required to freeze, format and mount volumes (run with sudo)");
    }
    Ok(())
}
