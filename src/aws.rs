//! EC2 implementation of [`CloudVolumeService`].
//!
//! Drives the `aws ec2` command line client and the instance metadata
//! endpoint (IMDSv2, via `curl`) through a [`CommandRunner`], so it needs no
//! SDK and runs on any instance that has the CLI configured.
//!
//! # Argument encoding
//!
//! List parameters (`--tags`, `--filters`, `--block-device-mappings`) are
//! passed as JSON documents rather than the CLI shorthand syntax, so tag
//! values containing commas or `=` survive intact.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::path::Path;
use tracing::debug;

use crate::cloud::{
    AttachRequest, BlockDeviceMapping, CloudVolumeService, SnapshotHandle, VolumeHandle,
    VolumeRequest,
};
use crate::error::{Result, SnapError};
use crate::exec::CommandRunner;
use crate::tags::Tags;
use crate::types::{InstanceMetadata, SnapshotRef, VolumeInfo, VolumeState};

/// Link-local address of the EC2 instance metadata service
pub const METADATA_ENDPOINT: &str = "http://169.254.169.254";

/// `aws ec2` backed cloud client.
pub struct AwsCli<'a> {
    runner: &'a dyn CommandRunner,
    binary: String,
    region: Option<String>,
    metadata_endpoint: String,
}

impl<'a> AwsCli<'a> {
    pub fn new(runner: &'a dyn CommandRunner, binary: impl Into<String>, region: Option<String>) -> Self {
        Self {
            runner,
            binary: binary.into(),
            region,
            metadata_endpoint: METADATA_ENDPOINT.to_string(),
        }
    }

    pub fn with_metadata_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.metadata_endpoint = endpoint.into();
        self
    }

    /// Run `aws ec2 <operation> <args> --output json [--region r]`.
    fn ec2(&self, operation: &str, args: Vec<String>) -> Result<String> {
        let mut argv = vec!["ec2".to_string(), operation.to_string()];
        argv.extend(args);
        argv.push("--output".to_string());
        argv.push("json".to_string());
        if let Some(region) = &self.region {
            argv.push("--region".to_string());
            argv.push(region.clone());
        }

        debug!(operation, "calling ec2");
        self.runner
            .run(&self.binary, &argv)
            .map(|out| out.stdout)
            .map_err(|e| SnapError::cloud(format!("ec2 {}: {}", operation, e.output().trim())))
    }

    fn ec2_json<T: DeserializeOwned>(&self, operation: &str, args: Vec<String>) -> Result<T> {
        let stdout = self.ec2(operation, args)?;
        serde_json::from_str(&stdout).map_err(|e| {
            SnapError::cloud(format!("ec2 {}: unexpected response: {}", operation, e))
        })
    }

    fn metadata_token(&self) -> Result<String> {
        let args = vec![
            "-sf".to_string(),
            "--max-time".to_string(),
            "5".to_string(),
            "-X".to_string(),
            "PUT".to_string(),
            "-H".to_string(),
            "X-aws-ec2-metadata-token-ttl-seconds: 300".to_string(),
            format!("{}/latest/api/token", self.metadata_endpoint),
        ];
        self.runner
            .run("curl", &args)
            .map(|out| out.stdout.trim().to_string())
            .map_err(|e| SnapError::cloud(format!("instance metadata token: {}", e.output().trim())))
    }

    fn metadata_get(&self, token: &str, path: &str) -> std::result::Result<String, String> {
        let args = vec![
            "-sf".to_string(),
            "--max-time".to_string(),
            "5".to_string(),
            "-H".to_string(),
            format!("X-aws-ec2-metadata-token: {}", token),
            format!("{}/latest/{}", self.metadata_endpoint, path),
        ];
        self.runner
            .run("curl", &args)
            .map(|out| out.stdout)
            .map_err(|e| e.output().trim().to_string())
    }
}

impl CloudVolumeService for AwsCli<'_> {
    fn instance_metadata(&self) -> Result<InstanceMetadata> {
        let token = self.metadata_token()?;
        let field = |path: &str| -> Result<String> {
            self.metadata_get(&token, path)
                .map(|v| v.trim().to_string())
                .map_err(|e| SnapError::cloud(format!("instance metadata {}: {}", path, e)))
        };

        let instance_id = field("meta-data/instance-id")?;
        let availability_zone = field("meta-data/placement/availability-zone")?;
        // 404 when the instance was launched without userdata
        let userdata = match self.metadata_get(&token, "user-data") {
            Ok(data) if !data.trim().is_empty() => Some(data),
            Ok(_) => None,
            Err(e) => {
                debug!(error = %e, "no userdata available");
                None
            }
        };

        Ok(InstanceMetadata {
            instance_id,
            availability_zone,
            userdata,
        })
    }

    fn block_device_mapping(&self, instance_id: &str) -> Result<BlockDeviceMapping> {
        let out: DescribeInstancesOutput = self.ec2_json(
            "describe-instances",
            vec!["--instance-ids".to_string(), instance_id.to_string()],
        )?;

        let instance = out
            .reservations
            .into_iter()
            .flat_map(|r| r.instances)
            .next()
            .ok_or_else(|| SnapError::cloud(format!("instance {} not found", instance_id)))?;

        Ok(instance
            .block_device_mappings
            .into_iter()
            .filter_map(|m| m.ebs.map(|ebs| (m.device_name, ebs.volume_id)))
            .collect())
    }

    fn create_volume(&self, request: &VolumeRequest) -> Result<VolumeHandle> {
        let mut args = vec![
            "--size".to_string(),
            request.size.to_string(),
            "--availability-zone".to_string(),
            request.availability_zone.clone(),
        ];
        if let Some(snapshot_id) = &request.snapshot_id {
            args.push("--snapshot-id".to_string());
            args.push(snapshot_id.clone());
        }

        let out: CreateVolumeOutput = self.ec2_json("create-volume", args)?;
        Ok(VolumeHandle {
            id: out.volume_id,
            state: VolumeState::parse(&out.state),
        })
    }

    fn attach_volume(&self, request: &AttachRequest) -> Result<()> {
        let device = request.device.display().to_string();
        self.ec2(
            "attach-volume",
            vec![
                "--volume-id".to_string(),
                request.volume_id.clone(),
                "--instance-id".to_string(),
                request.instance_id.clone(),
                "--device".to_string(),
                device,
            ],
        )?;
        Ok(())
    }

    fn set_delete_on_termination(&self, instance_id: &str, device: &Path) -> Result<()> {
        let mapping = json!([{
            "DeviceName": device.display().to_string(),
            "Ebs": { "DeleteOnTermination": true }
        }]);
        self.ec2(
            "modify-instance-attribute",
            vec![
                "--instance-id".to_string(),
                instance_id.to_string(),
                "--block-device-mappings".to_string(),
                mapping.to_string(),
            ],
        )?;
        Ok(())
    }

    fn detach_volume(&self, volume_id: &str) -> Result<bool> {
        self.ec2(
            "detach-volume",
            vec!["--volume-id".to_string(), volume_id.to_string()],
        )?;
        Ok(true)
    }

    fn volume_state(&self, volume_id: &str) -> Result<VolumeState> {
        let out: DescribeVolumesOutput = self.ec2_json(
            "describe-volumes",
            vec!["--volume-ids".to_string(), volume_id.to_string()],
        )?;
        out.volumes
            .into_iter()
            .next()
            .map(|v| VolumeState::parse(&v.state))
            .ok_or_else(|| SnapError::cloud(format!("volume {} not found", volume_id)))
    }

    fn list_volumes(&self, filter: &Tags) -> Result<Vec<VolumeInfo>> {
        let out: DescribeVolumesOutput =
            self.ec2_json("describe-volumes", filter_args(filter))?;
        Ok(out
            .volumes
            .into_iter()
            .map(|v| VolumeInfo {
                id: v.volume_id,
                state: VolumeState::parse(&v.state),
                tags: collect_tags(v.tags),
            })
            .collect())
    }

    fn create_snapshot(&self, volume_id: &str, description: &str) -> Result<SnapshotHandle> {
        let out: CreateSnapshotOutput = self.ec2_json(
            "create-snapshot",
            vec![
                "--volume-id".to_string(),
                volume_id.to_string(),
                "--description".to_string(),
                description.to_string(),
            ],
        )?;
        Ok(SnapshotHandle {
            id: out.snapshot_id,
            volume_id: out.volume_id,
        })
    }

    fn list_snapshots(&self, filter: &Tags) -> Result<Vec<SnapshotRef>> {
        let mut args = vec!["--owner-ids".to_string(), "self".to_string()];
        args.extend(filter_args(filter));

        let out: DescribeSnapshotsOutput = self.ec2_json("describe-snapshots", args)?;
        Ok(out
            .snapshots
            .into_iter()
            .map(|s| SnapshotRef {
                id: s.snapshot_id,
                volume_id: s.volume_id,
                created: s.start_time,
                tags: collect_tags(s.tags),
            })
            .collect())
    }

    fn delete_volume(&self, volume_id: &str) -> Result<()> {
        self.ec2(
            "delete-volume",
            vec!["--volume-id".to_string(), volume_id.to_string()],
        )?;
        Ok(())
    }

    fn delete_snapshot(&self, snapshot_id: &str) -> Result<()> {
        self.ec2(
            "delete-snapshot",
            vec!["--snapshot-id".to_string(), snapshot_id.to_string()],
        )?;
        Ok(())
    }

    fn tag_resource(&self, resource_id: &str, tags: &Tags) -> Result<()> {
        let tag_list: Vec<serde_json::Value> = tags
            .iter()
            .map(|(k, v)| json!({ "Key": k, "Value": v }))
            .collect();
        self.ec2(
            "create-tags",
            vec![
                "--resources".to_string(),
                resource_id.to_string(),
                "--tags".to_string(),
                serde_json::Value::Array(tag_list).to_string(),
            ],
        )?;
        Ok(())
    }
}

/// `--filters` as JSON: one `tag:<key>` filter per tag
fn filter_args(filter: &Tags) -> Vec<String> {
    if filter.is_empty() {
        return Vec::new();
    }
    let filters: Vec<serde_json::Value> = filter
        .iter()
        .map(|(k, v)| json!({ "Name": format!("tag:{}", k), "Values": [v] }))
        .collect();
    vec![
        "--filters".to_string(),
        serde_json::Value::Array(filters).to_string(),
    ]
}

fn collect_tags(tags: Vec<AwsTag>) -> Tags {
    tags.into_iter().map(|t| (t.key, t.value)).collect()
}

// ============================================================================
// Response shapes (only the fields we read)
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AwsTag {
    key: String,
    value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreateVolumeOutput {
    volume_id: String,
    state: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreateSnapshotOutput {
    snapshot_id: String,
    volume_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeSnapshotsOutput {
    #[serde(default)]
    snapshots: Vec<AwsSnapshot>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AwsSnapshot {
    snapshot_id: String,
    #[serde(default)]
    volume_id: Option<String>,
    start_time: DateTime<Utc>,
    #[serde(default)]
    tags: Vec<AwsTag>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeVolumesOutput {
    #[serde(default)]
    volumes: Vec<AwsVolume>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AwsVolume {
    volume_id: String,
    state: String,
    #[serde(default)]
    tags: Vec<AwsTag>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeInstancesOutput {
    #[serde(default)]
    reservations: Vec<Reservation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Reservation {
    #[serde(default)]
    instances: Vec<Instance>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Instance {
    #[serde(default)]
    block_device_mappings: Vec<AwsBlockDevice>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AwsBlockDevice {
    device_name: String,
    #[serde(default)]
    ebs: Option<AwsEbs>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AwsEbs {
    volume_id: String,
}
