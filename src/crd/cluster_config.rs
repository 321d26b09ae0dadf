//! `EKSClusterConfig` custom resource (§3, §6)
//!
//! One `EKSClusterConfig` represents the desired and observed state of a
//! single hosted EKS cluster. The CRD is namespaced even though the cluster
//! it describes is cloud-global (§6).

use std::collections::{BTreeMap, HashSet};

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{LoggingType, NetworkFieldsSource, NodeGroup};

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "eks.cattle.io",
    version = "v1",
    kind = "EKSClusterConfig",
    plural = "eksclusterconfigs",
    shortname = "eksc",
    namespaced,
    status = "EKSClusterConfigStatus",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct EKSClusterConfigSpec {
    /// The cluster's remote-side name. Immutable after creation.
    pub display_name: String,
    pub region: String,
    /// `"namespace/name"` reference to a Secret carrying `accessKey`/`secretKey`.
    pub credential_ref: String,
    #[serde(default)]
    pub imported: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubernetes_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_access: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_access: Option<bool>,
    #[serde(default)]
    pub public_access_sources: Vec<String>,
    #[serde(default)]
    pub logging_types: Vec<LoggingType>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub subnets: Vec<String>,
    #[serde(default)]
    pub security_groups: Vec<String>,
    #[serde(default)]
    pub service_role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secrets_encryption: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kms_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ebs_csi_driver: Option<bool>,
    #[serde(default)]
    pub node_groups: Vec<NodeGroup>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EKSClusterConfigStatus {
    #[serde(default)]
    pub phase: String,
    #[serde(default)]
    pub failure_message: String,
    #[serde(default)]
    pub subnets: Vec<String>,
    #[serde(default)]
    pub security_groups: Vec<String>,
    #[serde(default)]
    pub virtual_network: String,
    #[serde(default)]
    pub network_fields_source: NetworkFieldsSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub managed_launch_template_id: Option<String>,
    #[serde(default)]
    pub managed_launch_template_versions: BTreeMap<String, String>,
    #[serde(default)]
    pub template_versions_to_delete: Vec<String>,
    #[serde(default)]
    pub generated_node_role: String,
}

impl EKSClusterConfigSpec {
    /// Validation performed before a create is issued (§4.8, `""` phase) and
    /// before every `active`/`updating` reconcile.
    pub fn validate(&self) -> Result<(), String> {
        if self.display_name.trim().is_empty() {
            return Err("spec.displayName must not be empty".to_string());
        }
        if self.region.trim().is_empty() {
            return Err("spec.region must not be empty".to_string());
        }
        if self.credential_ref.trim().is_empty() {
            return Err("spec.credentialRef must not be empty".to_string());
        }

        self.validate_nodegroup_names_unique()?;

        if let Some(cluster_version) = &self.kubernetes_version {
            self.validate_nodegroup_version_skew(cluster_version)?;
        }

        Ok(())
    }

    /// Invariant 1 (§3).
    fn validate_nodegroup_names_unique(&self) -> Result<(), String> {
        let mut seen = HashSet::new();
        for ng in &self.node_groups {
            if !seen.insert(ng.name.as_str()) {
                return Err(format!("duplicate node group name: {}", ng.name));
            }
        }
        Ok(())
    }

    /// Invariant 2 (§3): scenario 3 in §8 expects a message naming both
    /// versions.
    fn validate_nodegroup_version_skew(&self, cluster_version: &str) -> Result<(), String> {
        for ng in &self.node_groups {
            let ng_version = ng.version.as_deref().unwrap_or(cluster_version);
            if !super::types::version_skew_ok(cluster_version, ng_version) {
                return Err(format!(
                    "node group {} version {} is not within 3 minor versions of cluster version {}",
                    ng.name, ng_version, cluster_version
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_spec() -> EKSClusterConfigSpec {
        EKSClusterConfigSpec {
            display_name: "test".to_string(),
            region: "us-east-1".to_string(),
            credential_ref: "default/creds".to_string(),
            kubernetes_version: Some("1.28".to_string()),
            ..Default::default()
        }
    }

    impl Default for EKSClusterConfigSpec {
        fn default() -> Self {
            EKSClusterConfigSpec {
                display_name: String::new(),
                region: String::new(),
                credential_ref: String::new(),
                imported: false,
                kubernetes_version: None,
                public_access: None,
                private_access: None,
                public_access_sources: Vec::new(),
                logging_types: Vec::new(),
                tags: BTreeMap::new(),
                subnets: Vec::new(),
                security_groups: Vec::new(),
                service_role: String::new(),
                secrets_encryption: None,
                kms_key: None,
                ebs_csi_driver: None,
                node_groups: Vec::new(),
            }
        }
    }

    #[test]
    fn rejects_duplicate_nodegroup_names() {
        let mut spec = base_spec();
        spec.node_groups = vec![
            NodeGroup {
                name: "ng1".to_string(),
                ..Default::default()
            },
            NodeGroup {
                name: "ng1".to_string(),
                ..Default::default()
            },
        ];
        assert!(spec.validate().is_err());
    }

    #[test]
    fn accepts_unique_nodegroup_names() {
        let mut spec = base_spec();
        spec.node_groups = vec![
            NodeGroup {
                name: "ng1".to_string(),
                ..Default::default()
            },
            NodeGroup {
                name: "ng2".to_string(),
                ..Default::default()
            },
        ];
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn rejects_nodegroup_version_ahead_of_cluster() {
        let mut spec = base_spec();
        spec.node_groups = vec![NodeGroup {
            name: "ng1".to_string(),
            version: Some("1.29".to_string()),
            ..Default::default()
        }];
        let err = spec.validate().unwrap_err();
        assert!(err.contains("1.29"));
        assert!(err.contains("1.28"));
    }

    #[test]
    fn rejects_nodegroup_version_too_far_behind() {
        let mut spec = base_spec();
        spec.node_groups = vec![NodeGroup {
            name: "ng1".to_string(),
            version: Some("1.24".to_string()),
            ..Default::default()
        }];
        assert!(spec.validate().is_err());
    }
}
