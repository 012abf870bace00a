//! Volumes declared in instance userdata.

use super::{Profile, ProfileContext};
use crate::error::{Result, SnapError};
use crate::volume::VolumeDescriptor;

/// Reads volume descriptors from the userdata key `volumes`.
///
/// ```json
/// {"role": "db", "cluster": "main", "environment": "prod",
///  "volumes": [{"device": "/dev/sdf", "mount_point": "/mnt/data", "size": 50}]}
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct UserdataProfile;

impl Profile for UserdataProfile {
    fn name(&self) -> &str {
        "userdata"
    }

    fn volumes(&self, ctx: &ProfileContext<'_>) -> Result<Vec<VolumeDescriptor>> {
        let userdata = ctx
            .userdata
            .ok_or_else(|| SnapError::configuration("instance userdata is missing or not JSON"))?;
        let declared = userdata
            .get("volumes")
            .ok_or_else(|| SnapError::configuration("userdata has no 'volumes' key"))?;

        let volumes: Vec<VolumeDescriptor> = serde_json::from_value(declared.clone())
            .map_err(|e| SnapError::configuration(format!("invalid userdata volumes: {}", e)))?;
        for volume in &volumes {
            volume.validate()?;
        }
        Ok(volumes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Filesystem, Identity, InstanceMetadata};
    use serde_json::json;

    fn with_ctx<T>(userdata: Option<serde_json::Value>, f: impl FnOnce(&ProfileContext<'_>) -> T) -> T {
        let identity = Identity::new("db", "main", "prod");
        let instance = InstanceMetadata {
            instance_id: "i-1".to_string(),
            availability_zone: "us-east-1a".to_string(),
            userdata: None,
        };
        let ctx = ProfileContext {
            identity: &identity,
            instance: &instance,
            userdata: userdata.as_ref(),
        };
        f(&ctx)
    }

    #[test]
    fn test_reads_volumes_from_userdata() {
        let userdata = json!({
            "volumes": [
                {"device": "/dev/sdf", "mount_point": "/mnt/data", "size": 50, "filesystem": "ext4"},
                {"device": "/dev/sdg", "mount_point": "/mnt/logs", "size": 5}
            ]
        });
        let volumes = with_ctx(Some(userdata), |ctx| UserdataProfile.volumes(ctx)).expect("volumes");
        assert_eq!(volumes.len(), 2);
        assert_eq!(volumes[0].filesystem, Filesystem::Ext4);
        assert_eq!(volumes[1].mount_options, "defaults");
    }

    #[test]
    fn test_missing_userdata_is_configuration_error() {
        let err = with_ctx(None, |ctx| UserdataProfile.volumes(ctx)).expect_err("no userdata");
        assert!(matches!(err, SnapError::Configuration(_)));
    }

    #[test]
    fn test_invalid_descriptor_rejected() {
        let userdata = json!({"volumes": [{"device": "/dev/sdf", "mount_point": "/", "size": 5}]});
        let err = with_ctx(Some(userdata), |ctx| UserdataProfile.volumes(ctx)).expect_err("root mount");
        assert!(matches!(err, SnapError::Validation(_)));
    }
}
