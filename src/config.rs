//! Configuration file handling.
//!
//! Settings are a JSON document found through a short search path. Every
//! field has a default, so an instance with no config file at all still
//! works off its userdata.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::SnapError;
use crate::types::Identity;
use crate::volume::VolumeDescriptor;

/// Environment variable naming a config file
pub const CONFIG_ENV: &str = "EBSNAP_CONFIG";

/// Locations tried, in order, when neither `--config` nor `$EBSNAP_CONFIG` is set
pub const SEARCH_PATH: [&str; 2] = ["/etc/ebsnap.json", "/etc/ebsnap/settings.json"];

pub const DEFAULT_DESCRIPTION_TEMPLATE: &str =
    "snapshot-%(role)s-%(environment)s-%(cluster)s-%(mount_point)s";

pub const DEFAULT_LOG_DIR: &str = "/var/log/ebsnap";

/// Bounded polling loop parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollSettings {
    pub max_attempts: u32,
    pub interval_secs: u64,
}

impl PollSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            max_attempts: 45,
            interval_secs: 1,
        }
    }
}

/// Optional argv per profile lifecycle hook.
///
/// Per-volume hooks substitute `{device}` and `{mount_point}` in each argument.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HookCommands {
    pub pre_snapshots: Option<Vec<String>>,
    pub post_snapshots: Option<Vec<String>>,
    pub pre_snapshot: Option<Vec<String>>,
    pub post_snapshot: Option<Vec<String>>,
    pub pre_mounts: Option<Vec<String>>,
    pub post_mounts: Option<Vec<String>>,
    pub pre_mount: Option<Vec<String>>,
    pub post_mount: Option<Vec<String>>,
}

impl HookCommands {
    fn all(&self) -> [(&'static str, &Option<Vec<String>>); 8] {
        [
            ("pre_snapshots", &self.pre_snapshots),
            ("post_snapshots", &self.post_snapshots),
            ("pre_snapshot", &self.pre_snapshot),
            ("post_snapshot", &self.post_snapshot),
            ("pre_mounts", &self.pre_mounts),
            ("post_mounts", &self.post_mounts),
            ("pre_mount", &self.pre_mount),
            ("post_mount", &self.post_mount),
        ]
    }
}

/// A named volume layout from the config file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileConfig {
    pub volumes: Vec<VolumeDescriptor>,

    /// Identity keys used to look up snapshots; None means all three
    #[serde(default)]
    pub filter_tags: Option<Vec<String>>,

    #[serde(default)]
    pub hooks: HookCommands,
}

/// Top-level settings document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Passed to the aws CLI as `--region`
    pub region: Option<String>,
    pub aws_cli: String,
    /// Days until a snapshot or restored volume is tagged as expired
    pub retention_days: u32,
    pub description_template: String,
    pub attach: PollSettings,
    pub detach: PollSettings,
    pub log_dir: Option<PathBuf>,
    /// Static identity; overrides the instance userdata
    pub identity: Option<Identity>,
    pub profiles: BTreeMap<String, ProfileConfig>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            region: None,
            aws_cli: "aws".to_string(),
            retention_days: 7,
            description_template: DEFAULT_DESCRIPTION_TEMPLATE.to_string(),
            attach: PollSettings::default(),
            detach: PollSettings::default(),
            log_dir: Some(PathBuf::from(DEFAULT_LOG_DIR)),
            identity: None,
            profiles: BTreeMap::new(),
        }
    }
}

impl Settings {
    /// Load settings from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read configuration from {:?}", path.as_ref()))?;

        let settings: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse configuration JSON in {:?}", path.as_ref()))?;

        Ok(settings)
    }

    /// Find the config file to use.
    ///
    /// An explicit path or `env_path` is returned as given; the search path
    /// is only used when both are absent, and only existing files count.
    pub fn locate(explicit: Option<&Path>, env_path: Option<PathBuf>) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return Some(path.to_path_buf());
        }
        if let Some(path) = env_path.filter(|p| !p.as_os_str().is_empty()) {
            return Some(path);
        }
        SEARCH_PATH
            .iter()
            .map(PathBuf::from)
            .find(|candidate| candidate.is_file())
    }

    /// Locate, load and validate settings. Returns the file used, if any.
    pub fn load(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        let env_path = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        let settings = match Self::locate(explicit, env_path) {
            Some(path) => {
                let settings = Self::load_from_file(&path)?;
                (settings, Some(path))
            }
            None => (Self::default(), None),
        };
        settings.0.validate()?;
        Ok(settings)
    }

    /// Validate the settings
    pub fn validate(&self) -> Result<()> {
        if self.retention_days == 0 {
            anyhow::bail!("retention_days must be at least 1");
        }
        if self.aws_cli.trim().is_empty() {
            anyhow::bail!("aws_cli must name the aws command line binary");
        }
        if self.attach.max_attempts == 0 || self.detach.max_attempts == 0 {
            anyhow::bail!("Poll max_attempts must be at least 1");
        }
        crate::tags::check_description_template(&self.description_template)
            .context("Invalid description_template")?;

        for (name, profile) in &self.profiles {
            validate_profile(name, profile)?;
        }

        Ok(())
    }
}

fn validate_profile(name: &str, profile: &ProfileConfig) -> Result<()> {
    let mut devices = BTreeSet::new();
    let mut mount_points = BTreeSet::new();

    for volume in &profile.volumes {
        volume
            .validate()
            .with_context(|| format!("Invalid volume in profile '{}'", name))?;

        if !devices.insert(volume.device.clone()) {
            anyhow::bail!(
                "Profile '{}' uses device {} more than once",
                name,
                volume.device.display()
            );
        }
        if !mount_points.insert(volume.mount_point.clone()) {
            anyhow::bail!(
                "Profile '{}' uses mount point {} more than once",
                name,
                volume.mount_point.display()
            );
        }
    }

    if let Some(keys) = &profile.filter_tags {
        if keys.is_empty() {
            anyhow::bail!("Profile '{}' has an empty filter_tags list", name);
        }
        if let Some(unknown) = keys.iter().find(|k| !Identity::KEYS.contains(&k.as_str())) {
            anyhow::bail!(
                "Profile '{}' filters on unknown tag '{}' (expected one of {})",
                name,
                unknown,
                Identity::KEYS.join(", ")
            );
        }
    }

    for (hook, argv) in profile.hooks.all() {
        if argv.as_ref().is_some_and(|a| a.is_empty()) {
            anyhow::bail!("Profile '{}' has an empty command for hook {}", name, hook);
        }
    }

    Ok(())
}

/// Identity values given on the command line
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityOverrides {
    pub role: Option<String>,
    pub cluster: Option<String>,
    pub environment: Option<String>,
}

impl IdentityOverrides {
    /// Resolve each identity key from, in order: the override, the
    /// configured identity, the userdata object.
    pub fn resolve(
        &self,
        configured: Option<&Identity>,
        userdata: Option<&serde_json::Value>,
    ) -> crate::error::Result<Identity> {
        let pick = |key: &str, flag: &Option<String>| -> crate::error::Result<String> {
            flag.clone()
                .or_else(|| configured.and_then(|i| i.get(key)).map(str::to_string))
                .or_else(|| {
                    userdata
                        .and_then(|u| u.get(key))
                        .and_then(|v| v.as_str())
                        .map(str::to_string)
                })
                .ok_or_else(|| {
                    SnapError::configuration(format!(
                        "no '{}' identity tag: pass --{} or set it in settings or userdata",
                        key, key
                    ))
                })
        };

        Ok(Identity {
            role: pick("role", &self.role)?,
            cluster: pick("cluster", &self.cluster)?,
            environment: pick("environment", &self.environment)?,
        })
    }
}
