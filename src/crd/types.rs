//! Shared types embedded in the `EKSClusterConfig` spec/status
//!
//! These mirror the AWS EKS nodegroup/cluster shape closely enough that the
//! upstream projector (`aws::projector`) can produce values of these same
//! types straight from `DescribeCluster`/`DescribeNodegroup` responses.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A single managed node group attached to the cluster.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeGroup {
    /// Unique (within one ClusterConfig) node-group name.
    pub name: String,
    /// Kubernetes version for this group; falls back to the cluster version
    /// when absent (§4.5 point 8).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub min_size: i32,
    pub max_size: i32,
    pub desired_size: i32,
    pub disk_size: i32,
    pub instance_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ec2_ssh_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnets: Option<Vec<String>>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub resource_tags: BTreeMap<String, String>,
    #[serde(default)]
    pub gpu: bool,
    #[serde(default)]
    pub arm: bool,
    #[serde(default)]
    pub request_spot_instances: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spot_instance_types: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launch_template: Option<LaunchTemplateRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_role: Option<String>,
}

/// Reference to an EC2 launch template + version, either user-supplied or
/// created by the launch-template manager.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LaunchTemplateRef {
    pub id: String,
    pub name: Option<String>,
    pub version: String,
}

/// Cluster control-plane log types EKS can publish to CloudWatch.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, PartialOrd, Ord)]
pub enum LoggingType {
    #[serde(rename = "api")]
    Api,
    #[serde(rename = "audit")]
    Audit,
    #[serde(rename = "authenticator")]
    Authenticator,
    #[serde(rename = "controllerManager")]
    ControllerManager,
    #[serde(rename = "scheduler")]
    Scheduler,
}

impl LoggingType {
    /// The exact string EKS's API uses for this log type.
    pub fn as_str(self) -> &'static str {
        match self {
            LoggingType::Api => "api",
            LoggingType::Audit => "audit",
            LoggingType::Authenticator => "authenticator",
            LoggingType::ControllerManager => "controllerManager",
            LoggingType::Scheduler => "scheduler",
        }
    }
}

/// Whether `status.subnets`/`status.securityGroups` came from the user's
/// spec or were provisioned by the operator (invariant 3, §3).
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum NetworkFieldsSource {
    Provided,
    #[default]
    Generated,
}

/// Parse a `"<major>.<minor>"` Kubernetes version string into its numeric
/// components. EKS versions never carry a patch component, so this is
/// intentionally narrower than full semver.
pub fn parse_minor_version(v: &str) -> Option<(u32, u32)> {
    let mut parts = v.trim().splitn(2, '.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    Some((major, minor))
}

/// Invariant 2 (§3): a node group may trail the control plane by 0-3 minor
/// versions, and must never be ahead of it.
pub fn version_skew_ok(cluster_version: &str, nodegroup_version: &str) -> bool {
    match (
        parse_minor_version(cluster_version),
        parse_minor_version(nodegroup_version),
    ) {
        (Some((cmaj, cmin)), Some((nmaj, nmin))) if cmaj == nmaj => {
            cmin >= nmin && cmin - nmin <= 3
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_trailing_skew_within_window() {
        for ng in ["1.25", "1.26", "1.27", "1.28"] {
            assert!(version_skew_ok("1.28", ng), "ng={ng}");
        }
    }

    #[test]
    fn rejects_skew_outside_window() {
        assert!(!version_skew_ok("1.28", "1.24"));
        assert!(!version_skew_ok("1.28", "1.29"));
    }
}
