//! Profiles declared in the settings file.

use tracing::info;

use super::{Profile, ProfileContext};
use crate::config::ProfileConfig;
use crate::error::{Result, SnapError};
use crate::exec::CommandRunner;
use crate::tags::Tags;
use crate::types::Identity;
use crate::volume::VolumeDescriptor;

/// Fixed volume list, optional filter-tag subset and hook commands.
#[derive(Debug, Clone)]
pub struct ConfiguredProfile {
    name: String,
    config: ProfileConfig,
}

impl ConfiguredProfile {
    pub fn new(name: impl Into<String>, config: ProfileConfig) -> Self {
        Self {
            name: name.into(),
            config,
        }
    }

    fn run_hook(
        &self,
        runner: &dyn CommandRunner,
        hook: &'static str,
        argv: &Option<Vec<String>>,
        volume: Option<&VolumeDescriptor>,
    ) -> Result<()> {
        let Some((program, args)) = argv.as_deref().and_then(|a| a.split_first()) else {
            return Ok(());
        };

        let args: Vec<String> = args
            .iter()
            .map(|arg| match volume {
                Some(v) => substitute(arg, v),
                None => arg.clone(),
            })
            .collect();

        info!(profile = %self.name, hook, program = %program, "running hook");
        runner
            .run(program, &args)
            .map(|_| ())
            .map_err(|e| SnapError::hook(hook, e.to_string()))
    }
}

fn substitute(arg: &str, volume: &VolumeDescriptor) -> String {
    arg.replace("{device}", &volume.device.display().to_string())
        .replace("{mount_point}", &volume.mount_point.display().to_string())
}

impl Profile for ConfiguredProfile {
    fn name(&self) -> &str {
        &self.name
    }

    fn volumes(&self, _ctx: &ProfileContext<'_>) -> Result<Vec<VolumeDescriptor>> {
        Ok(self.config.volumes.clone())
    }

    fn filter_tags(&self, identity: &Identity) -> Tags {
        match &self.config.filter_tags {
            Some(keys) => keys
                .iter()
                .filter_map(|k| identity.get(k).map(|v| (k.clone(), v.to_string())))
                .collect(),
            None => identity.to_tags(),
        }
    }

    fn pre_snapshots(&self, runner: &dyn CommandRunner, _volumes: &[VolumeDescriptor]) -> Result<()> {
        self.run_hook(runner, "pre_snapshots", &self.config.hooks.pre_snapshots, None)
    }

    fn post_snapshots(&self, runner: &dyn CommandRunner, _volumes: &[VolumeDescriptor]) -> Result<()> {
        self.run_hook(runner, "post_snapshots", &self.config.hooks.post_snapshots, None)
    }

    fn pre_snapshot(&self, runner: &dyn CommandRunner, volume: &VolumeDescriptor) -> Result<()> {
        self.run_hook(runner, "pre_snapshot", &self.config.hooks.pre_snapshot, Some(volume))
    }

    fn post_snapshot(&self, runner: &dyn CommandRunner, volume: &VolumeDescriptor) -> Result<()> {
        self.run_hook(runner, "post_snapshot", &self.config.hooks.post_snapshot, Some(volume))
    }

    fn pre_mounts(&self, runner: &dyn CommandRunner, _volumes: &[VolumeDescriptor]) -> Result<()> {
        self.run_hook(runner, "pre_mounts", &self.config.hooks.pre_mounts, None)
    }

    fn post_mounts(&self, runner: &dyn CommandRunner, _volumes: &[VolumeDescriptor]) -> Result<()> {
        self.run_hook(runner, "post_mounts", &self.config.hooks.post_mounts, None)
    }

    fn pre_mount(&self, runner: &dyn CommandRunner, volume: &VolumeDescriptor) -> Result<()> {
        self.run_hook(runner, "pre_mount", &self.config.hooks.pre_mount, Some(volume))
    }

    fn post_mount(&self, runner: &dyn CommandRunner, volume: &VolumeDescriptor) -> Result<()> {
        self.run_hook(runner, "post_mount", &self.config.hooks.post_mount, Some(volume))
    }
}
