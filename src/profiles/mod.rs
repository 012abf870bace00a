//! Volume layout profiles.
//!
//! A profile names the volumes one kind of instance carries and may hook
//! into the snapshot and mount runs. Profiles are registered explicitly in
//! a [`ProfileRegistry`] built once at startup and handed to the dispatcher.
//!
//! # Built-in Profiles
//!
//! | Profile    | Volumes from | Hooks |
//! |------------|--------------|-------|
//! | `userdata` | the `volumes` array in instance userdata | none |
//! | one per `profiles` entry in settings | the settings file | optional commands |

mod configured;
mod userdata;

pub use configured::ConfiguredProfile;
pub use userdata::UserdataProfile;

use std::collections::BTreeMap;
use tracing::warn;

use crate::config::Settings;
use crate::error::{Result, SnapError};
use crate::exec::CommandRunner;
use crate::tags::Tags;
use crate::types::{Identity, InstanceMetadata};
use crate::volume::VolumeDescriptor;

/// What a profile may consult when listing its volumes.
#[derive(Debug, Clone, Copy)]
pub struct ProfileContext<'a> {
    pub identity: &'a Identity,
    pub instance: &'a InstanceMetadata,
    /// Instance userdata parsed as JSON, if it was valid JSON
    pub userdata: Option<&'a serde_json::Value>,
}

/// A named volume layout with optional lifecycle hooks.
///
/// Every hook defaults to a no-op. A hook error aborts the run it belongs to.
pub trait Profile {
    fn name(&self) -> &str;

    /// Volumes to snapshot or restore, in processing order
    fn volumes(&self, ctx: &ProfileContext<'_>) -> Result<Vec<VolumeDescriptor>>;

    /// Tags used to look up this profile's snapshots; all identity tags by default
    fn filter_tags(&self, identity: &Identity) -> Tags {
        identity.to_tags()
    }

    fn pre_snapshots(&self, _runner: &dyn CommandRunner, _volumes: &[VolumeDescriptor]) -> Result<()> {
        Ok(())
    }

    fn post_snapshots(&self, _runner: &dyn CommandRunner, _volumes: &[VolumeDescriptor]) -> Result<()> {
        Ok(())
    }

    fn pre_snapshot(&self, _runner: &dyn CommandRunner, _volume: &VolumeDescriptor) -> Result<()> {
        Ok(())
    }

    fn post_snapshot(&self, _runner: &dyn CommandRunner, _volume: &VolumeDescriptor) -> Result<()> {
        Ok(())
    }

    fn pre_mounts(&self, _runner: &dyn CommandRunner, _volumes: &[VolumeDescriptor]) -> Result<()> {
        Ok(())
    }

    fn post_mounts(&self, _runner: &dyn CommandRunner, _volumes: &[VolumeDescriptor]) -> Result<()> {
        Ok(())
    }

    fn pre_mount(&self, _runner: &dyn CommandRunner, _volume: &VolumeDescriptor) -> Result<()> {
        Ok(())
    }

    fn post_mount(&self, _runner: &dyn CommandRunner, _volume: &VolumeDescriptor) -> Result<()> {
        Ok(())
    }
}

/// Name → profile mapping.
pub struct ProfileRegistry {
    profiles: BTreeMap<String, Box<dyn Profile>>,
}

impl ProfileRegistry {
    pub fn new() -> Self {
        Self {
            profiles: BTreeMap::new(),
        }
    }

    /// The built-in `userdata` profile plus one profile per settings entry.
    ///
    /// A settings entry named `userdata` replaces the built-in one.
    pub fn build(settings: &Settings) -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(UserdataProfile));
        for (name, config) in &settings.profiles {
            if registry.profiles.contains_key(name) {
                warn!(profile = %name, "settings profile replaces built-in profile");
            }
            registry.register(Box::new(ConfiguredProfile::new(name.clone(), config.clone())));
        }
        registry
    }

    pub fn register(&mut self, profile: Box<dyn Profile>) {
        self.profiles.insert(profile.name().to_string(), profile);
    }

    /// # Errors
    ///
    /// `Configuration` listing the known names when `name` is not registered.
    pub fn get(&self, name: &str) -> Result<&dyn Profile> {
        self.profiles
            .get(name)
            .map(|p| p.as_ref())
            .ok_or_else(|| {
                SnapError::configuration(format!(
                    "unknown profile '{}', known profiles: {}",
                    name,
                    self.names().join(", ")
                ))
            })
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        self.profiles.keys().map(String::as_str).collect()
    }
}

impl Default for ProfileRegistry {
    fn default() -> Self {
        Self::new()
    }
}
