//! Tag sets and the tagging scheme for snapshots and volumes.
//!
//! Every snapshot and every restored volume carries the same keys:
//!
//! | Key           | Value |
//! |---------------|-------|
//! | `role`        | identity |
//! | `cluster`     | identity |
//! | `environment` | identity |
//! | `mount_point` | volume mount point |
//! | `instance_id` | instance that created the resource |
//! | `created`     | RFC 3339 UTC |
//! | `expires`     | `created` + retention window |
//!
//! Identity tags plus `mount_point` select the "current" snapshot of a volume.

use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use crate::error::{Result, SnapError};
use crate::types::Identity;

pub const MOUNT_POINT: &str = "mount_point";
pub const INSTANCE_ID: &str = "instance_id";
pub const CREATED: &str = "created";
pub const EXPIRES: &str = "expires";

/// Ordered mapping of tag key to tag value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tags(BTreeMap<String, String>);

impl Tags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn mount_point(&self) -> Option<&str> {
        self.get(MOUNT_POINT)
    }

    /// Parsed `expires` tag; None if absent or not RFC 3339
    pub fn expires(&self) -> Option<DateTime<Utc>> {
        self.get(EXPIRES)
            .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Tags {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl fmt::Display for Tags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        write!(f, "{}", parts.join(","))
    }
}

/// Tags for a snapshot or restored volume of the volume mounted at
/// `mount_point`.
pub fn resource_tags(
    identity: &Identity,
    mount_point: &Path,
    instance_id: &str,
    now: DateTime<Utc>,
    retention_days: u32,
) -> Tags {
    let mut tags = identity.to_tags();
    tags.insert(MOUNT_POINT, mount_point.display().to_string());
    tags.insert(INSTANCE_ID, instance_id);
    tags.insert(CREATED, now.to_rfc3339());
    tags.insert(
        EXPIRES,
        (now + Duration::days(i64::from(retention_days))).to_rfc3339(),
    );
    tags
}

/// Placeholders a snapshot description template may use
pub const DESCRIPTION_KEYS: [&str; 6] = [
    "role",
    "cluster",
    "environment",
    MOUNT_POINT,
    "device",
    INSTANCE_ID,
];

/// Render `template` against sample values for every [`DESCRIPTION_KEYS`]
/// entry, so a bad template fails at load time instead of mid-snapshot.
pub fn check_description_template(template: &str) -> Result<()> {
    let sample: BTreeMap<&str, String> = DESCRIPTION_KEYS
        .iter()
        .map(|key| (*key, format!("<{}>", key)))
        .collect();
    render_description(template, &sample).map(|_| ())
}

/// Render a `%(key)s` description template, then normalize `_` to `-`.
///
/// `%%` is a literal percent sign.
///
/// # Errors
///
/// `Configuration` if the template names a key not in `values` or has an
/// unterminated placeholder.
pub fn render_description(template: &str, values: &BTreeMap<&str, String>) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        if let Some(after) = tail.strip_prefix("%%") {
            out.push('%');
            rest = after;
        } else if let Some(after) = tail.strip_prefix("%(") {
            let end = after.find(")s").ok_or_else(|| {
                SnapError::configuration(format!(
                    "unterminated placeholder in description template '{}'",
                    template
                ))
            })?;
            let key = &after[..end];
            let value = values.get(key).ok_or_else(|| {
                SnapError::configuration(format!(
                    "unknown placeholder '{}' in description template '{}'",
                    key, template
                ))
            })?;
            out.push_str(value);
            rest = &after[end + 2..];
        } else {
            out.push('%');
            rest = &tail[1..];
        }
    }
    out.push_str(rest);

    Ok(out.replace('_', "-"))
}
