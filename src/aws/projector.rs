//! Upstream projector (§4.4)
//!
//! Reads the cloud's view of a cluster and its node groups and reshapes it
//! into the same shape as the desired spec, so the update planner can diff
//! field-by-field instead of special-casing "what does AWS call this".
//! Projection is deterministic and side-effect-free: no mutating calls here.

use std::collections::HashMap;

use base64::Engine;

use crate::aws::client::CloudClient;
use crate::error::{Error, Result};

/// The cloud-side view of a ClusterConfig, in the spec's own shape.
#[derive(Clone, Debug, Default)]
pub struct UpstreamSpec {
    pub cluster_arn: String,
    pub kubernetes_version: String,
    /// Empty when the cluster has no OIDC issuer yet (still being created).
    pub oidc_issuer: String,
    pub public_access: bool,
    pub private_access: bool,
    pub public_access_sources: Vec<String>,
    pub logging_types: Vec<String>,
    pub tags: HashMap<String, String>,
    pub subnets: Vec<String>,
    pub security_groups: Vec<String>,
    pub vpc_id: String,
    pub service_role: String,
    pub secrets_encryption: bool,
    pub kms_key: String,
    pub node_groups: Vec<UpstreamNodeGroup>,
}

#[derive(Clone, Debug, Default)]
pub struct UpstreamNodeGroup {
    pub name: String,
    pub arn: String,
    /// `None` when the upstream node group is currently `updating` — the
    /// version is withheld from the diff to avoid flapping while an update
    /// is already in flight (§4.4).
    pub version: Option<String>,
    pub min_size: i32,
    pub max_size: i32,
    pub desired_size: i32,
    pub disk_size: i32,
    pub subnets: Vec<String>,
    pub labels: HashMap<String, String>,
    pub tags: HashMap<String, String>,
    pub resource_tags: HashMap<String, String>,
    pub node_role: String,
    pub request_spot_instances: bool,
    pub spot_instance_types: Vec<String>,
    pub instance_type: Option<String>,
    pub gpu: bool,
    pub arm: bool,
    pub launch_template_id: Option<String>,
    pub launch_template_version: Option<String>,
    pub user_data: Option<String>,
    pub ssh_key: Option<String>,
    pub image_id: Option<String>,
}

/// Projects cloud state for `cluster_name`. Returns `Ok(None)` when the
/// cluster does not exist upstream (the caller's job to decide what that
/// means for its phase).
pub async fn project(
    client: &CloudClient,
    cluster_name: &str,
    managed_template_id: Option<&str>,
    include_managed_lt: bool,
) -> Result<Option<UpstreamSpec>> {
    let Some(cluster) = client.describe_cluster(cluster_name).await? else {
        return Ok(None);
    };

    let kubernetes_version = cluster
        .version()
        .ok_or_else(|| Error::ProjectionError("cluster has no reported version".into()))?
        .to_string();

    let vpc = cluster.resources_vpc_config();
    let public_access = vpc.and_then(|v| v.endpoint_public_access).unwrap_or(false);
    let private_access = vpc.and_then(|v| v.endpoint_private_access).unwrap_or(false);
    let public_access_sources = vpc
        .and_then(|v| v.public_access_cidrs.clone())
        .unwrap_or_default();
    let subnets = vpc.and_then(|v| v.subnet_ids.clone()).unwrap_or_default();
    let security_groups = vpc
        .and_then(|v| v.security_group_ids.clone())
        .unwrap_or_default();
    let vpc_id = vpc.and_then(|v| v.vpc_id.clone()).unwrap_or_default();

    let logging_types = cluster
        .logging()
        .and_then(|l| l.cluster_logging.clone())
        .unwrap_or_default()
        .into_iter()
        .filter(|setup| setup.enabled.unwrap_or(false))
        .flat_map(|setup| setup.types.unwrap_or_default())
        .map(|t| t.as_str().to_string())
        .collect();

    let tags = cluster.tags().cloned().unwrap_or_default();
    let service_role = cluster.role_arn().unwrap_or_default().to_string();
    let cluster_arn = cluster.arn().unwrap_or_default().to_string();
    let oidc_issuer = cluster
        .identity()
        .and_then(|i| i.oidc())
        .and_then(|o| o.issuer())
        .unwrap_or_default()
        .to_string();

    let encryption = cluster.encryption_config().unwrap_or_default();
    let secrets_encryption = !encryption.is_empty();
    let kms_key = encryption
        .first()
        .and_then(|e| e.provider())
        .and_then(|p| p.key_arn())
        .unwrap_or_default()
        .to_string();

    let mut node_groups = Vec::new();
    for name in client.list_nodegroups(cluster_name).await? {
        let Some(ng) = client.describe_nodegroup(cluster_name, &name).await? else {
            continue;
        };
        if ng.status() == Some(&aws_sdk_eks::types::NodegroupStatus::Deleting) {
            continue;
        }
        node_groups.push(project_nodegroup(client, ng, managed_template_id, include_managed_lt).await?);
    }

    Ok(Some(UpstreamSpec {
        cluster_arn,
        kubernetes_version,
        oidc_issuer,
        public_access,
        private_access,
        public_access_sources,
        logging_types,
        tags,
        subnets,
        security_groups,
        vpc_id,
        service_role,
        secrets_encryption,
        kms_key,
        node_groups,
    }))
}

async fn project_nodegroup(
    client: &CloudClient,
    ng: aws_sdk_eks::types::Nodegroup,
    managed_template_id: Option<&str>,
    include_managed_lt: bool,
) -> Result<UpstreamNodeGroup> {
    let scaling = ng.scaling_config();
    let (min_size, max_size, desired_size) = (
        scaling.and_then(|s| s.min_size).unwrap_or(0),
        scaling.and_then(|s| s.max_size).unwrap_or(0),
        scaling.and_then(|s| s.desired_size).unwrap_or(0),
    );

    let updating = ng.status() == Some(&aws_sdk_eks::types::NodegroupStatus::Updating);
    let version = if updating {
        None
    } else {
        ng.version().map(str::to_string)
    };

    let request_spot_instances = ng.capacity_type() == Some(&aws_sdk_eks::types::CapacityTypes::Spot);
    let instance_types = ng.instance_types().to_vec();
    let (spot_instance_types, instance_type) = if request_spot_instances {
        (instance_types, None)
    } else {
        (Vec::new(), instance_types.into_iter().next())
    };

    let (gpu, arm) = match ng.ami_type() {
        Some(t) if t.as_str().contains("GPU") => (true, false),
        Some(t) if t.as_str().contains("ARM") => (false, true),
        _ => (false, false),
    };

    let mut out = UpstreamNodeGroup {
        name: ng.nodegroup_name().unwrap_or_default().to_string(),
        arn: ng.nodegroup_arn().unwrap_or_default().to_string(),
        version,
        min_size,
        max_size,
        desired_size,
        disk_size: ng.disk_size().unwrap_or(0),
        subnets: ng.subnets().to_vec(),
        labels: ng.labels().cloned().unwrap_or_default(),
        tags: ng.tags().cloned().unwrap_or_default(),
        resource_tags: HashMap::new(),
        node_role: ng.node_role().unwrap_or_default().to_string(),
        request_spot_instances,
        spot_instance_types,
        instance_type,
        gpu,
        arm,
        launch_template_id: None,
        launch_template_version: None,
        user_data: None,
        ssh_key: None,
        image_id: None,
    };

    if let Some(lt) = ng.launch_template() {
        let lt_id = lt.id().map(str::to_string);
        let lt_version = lt.version().map(str::to_string);

        let is_managed = lt_id.as_deref().is_some_and(|id| Some(id) == managed_template_id);

        if is_managed {
            if !include_managed_lt {
                // Strip the reference so the planner diffs raw machine
                // fields, not template identity.
            } else {
                match fold_managed_template_fields(client, &mut out, lt_id.as_deref(), lt_version.as_deref())
                    .await?
                {
                    true => {}
                    false => {
                        // Version/template vanished upstream; keep the node
                        // group but leave the template id unset so the
                        // planner re-attaches one.
                    }
                }
            }
        } else {
            out.launch_template_id = lt_id;
            out.launch_template_version = lt_version;
        }
    }

    Ok(out)
}

/// Fetches the launch-template version's data and folds machine fields into
/// `out`. Returns `false` (and leaves the template reference unset) if the
/// version can't be found.
async fn fold_managed_template_fields(
    client: &CloudClient,
    out: &mut UpstreamNodeGroup,
    lt_id: Option<&str>,
    lt_version: Option<&str>,
) -> Result<bool> {
    let (Some(id), Some(version)) = (lt_id, lt_version) else {
        return Ok(false);
    };
    let Some(lt_version) = client.describe_launch_template_version(id, version).await? else {
        return Ok(false);
    };
    let Some(data) = lt_version.launch_template_data() else {
        return Ok(false);
    };

    out.launch_template_id = Some(id.to_string());
    out.launch_template_version = Some(version.to_string());
    out.ssh_key = data.key_name().map(str::to_string);
    out.image_id = data.image_id().map(str::to_string);
    if let Some(block_devices) = data.block_device_mappings.as_ref().and_then(|b| b.first()) {
        if let Some(ebs) = block_devices.ebs() {
            if let Some(size) = ebs.volume_size() {
                out.disk_size = size;
            }
        }
    }
    if !out.request_spot_instances {
        out.instance_type = data.instance_type().map(|t| t.as_str().to_string());
    }
    out.user_data = data.user_data().and_then(|raw| {
        base64::engine::general_purpose::STANDARD
            .decode(raw)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
    });
    out.resource_tags = data
        .tag_specifications
        .as_ref()
        .and_then(|specs| specs.first())
        .and_then(|spec| spec.tags.clone())
        .unwrap_or_default()
        .into_iter()
        .filter_map(|t| Some((t.key?, t.value?)))
        .collect();

    Ok(true)
}
