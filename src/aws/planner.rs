//! Update planner (§4.5) and node-group creation (§4.7)
//!
//! Given the desired spec and the upstream projection, emits the smallest
//! ordered set of remote calls needed to close the diff. Enforces the
//! single-in-flight-mutation rule (§9): after issuing one cluster-level
//! mutation the planner returns immediately and lets the reconciler
//! re-enqueue, rather than racing the cloud's own "update in progress"
//! rejection.

use std::collections::{BTreeMap, HashMap, HashSet};

use aws_sdk_cloudformation::types::Capability;

use crate::aws::arn::RegionContext;
use crate::aws::client::CloudClient;
use crate::aws::launch_template::{self, MachineFields};
use crate::aws::projector::{UpstreamNodeGroup, UpstreamSpec};
use crate::aws::stack;
use crate::aws::templates::NODE_INSTANCE_ROLE_TEMPLATE;
use crate::crd::{EKSClusterConfigSpec, EKSClusterConfigStatus, NodeGroup};
use crate::error::{Error, Result};

const UNRESTRICTED_CIDR: &str = "0.0.0.0/0";

/// Whether the planner performed a mutation this pass. `NoChange` tells the
/// reconciler the record may settle back into `active`.
#[derive(Debug, PartialEq, Eq)]
pub enum PlanOutcome {
    NoChange,
    Mutated,
}

/// Runs the ordered diff in §4.5 against a single reconcile's projection,
/// issuing at most one cluster-level mutation (plus any node-group-level
/// work, which iterates independently per §4.5).
pub async fn plan(
    client: &CloudClient,
    region_ctx: &RegionContext,
    display_name: &str,
    spec: &EKSClusterConfigSpec,
    status: &mut EKSClusterConfigStatus,
    upstream: &UpstreamSpec,
) -> Result<PlanOutcome> {
    // 1. Kubernetes version.
    if let Some(desired_version) = &spec.kubernetes_version {
        if desired_version != &upstream.kubernetes_version {
            client
                .update_cluster_version(display_name, desired_version)
                .await?;
            return Ok(PlanOutcome::Mutated);
        }
    }

    // 2. Tags (not exclusive with other cluster updates).
    let (to_tag, to_untag) = diff_tags(&spec.tags, &upstream.tags);
    if !to_tag.is_empty() {
        client.tag_resource(&upstream.cluster_arn, &to_tag).await?;
    }
    if !to_untag.is_empty() {
        client.untag_resource(&upstream.cluster_arn, &to_untag).await?;
    }

    // 3. Logging types.
    let desired_logging: HashSet<String> = spec
        .logging_types
        .iter()
        .map(|t| t.as_str().to_string())
        .collect();
    let upstream_logging: HashSet<String> = upstream.logging_types.iter().cloned().collect();
    let to_enable: Vec<String> = desired_logging.difference(&upstream_logging).cloned().collect();
    let to_disable: Vec<String> = upstream_logging.difference(&desired_logging).cloned().collect();
    if !to_enable.is_empty() || !to_disable.is_empty() {
        client
            .update_cluster_logging(display_name, &to_enable, &to_disable)
            .await?;
        return Ok(PlanOutcome::Mutated);
    }

    // 4 & 5. Public/private access, public access sources.
    let desired_public = spec.public_access.unwrap_or(false);
    let desired_private = spec.private_access.unwrap_or(false);
    let access_differs = desired_public != upstream.public_access || desired_private != upstream.private_access;

    let desired_sources_norm = normalize_public_access_sources(&spec.public_access_sources);
    let upstream_sources_norm = normalize_public_access_sources(&upstream.public_access_sources);
    let sources_differ = desired_sources_norm != upstream_sources_norm;

    if access_differs {
        client
            .update_cluster_config_access(display_name, desired_public, desired_private, None)
            .await?;
        return Ok(PlanOutcome::Mutated);
    }
    if sources_differ {
        let to_send: Vec<String> = if spec.public_access_sources.is_empty() {
            vec![UNRESTRICTED_CIDR.to_string()]
        } else {
            spec.public_access_sources.clone()
        };
        client
            .update_cluster_config_access(display_name, desired_public, desired_private, Some(&to_send))
            .await?;
        return Ok(PlanOutcome::Mutated);
    }

    // 6. EBS CSI driver add-on.
    if spec.ebs_csi_driver.unwrap_or(false) {
        if client.describe_addon(display_name, "aws-ebs-csi-driver").await?.is_none() {
            if upstream.oidc_issuer.is_empty() {
                return Err(Error::ProjectionError(
                    "cluster has no OIDC issuer yet, cannot enable EBS CSI driver".into(),
                ));
            }
            crate::aws::oidc::enable_ebs_csi_driver(
                client,
                region_ctx,
                display_name,
                display_name,
                &upstream.oidc_issuer,
                None,
            )
            .await?;
            return Ok(PlanOutcome::Mutated);
        }
    }

    // 7. Node-group set: create missing, delete extra.
    let desired_names: HashSet<&str> = spec.node_groups.iter().map(|ng| ng.name.as_str()).collect();
    let upstream_names: HashSet<&str> = upstream.node_groups.iter().map(|ng| ng.name.as_str()).collect();

    for ng in &spec.node_groups {
        if !upstream_names.contains(ng.name.as_str()) {
            create_nodegroup(client, region_ctx, display_name, status, ng).await?;
            return Ok(PlanOutcome::Mutated);
        }
    }
    for name in upstream_names.difference(&desired_names) {
        client.delete_nodegroup(display_name, name).await?;
        return Ok(PlanOutcome::Mutated);
    }

    // 8. Per node group, in order.
    for ng in &spec.node_groups {
        let Some(upstream_ng) = upstream.node_groups.iter().find(|u| u.name == ng.name) else {
            continue;
        };

        let desired_version = ng
            .version
            .clone()
            .or_else(|| spec.kubernetes_version.clone());
        if let (Some(desired_v), Some(upstream_v)) = (&desired_version, &upstream_ng.version) {
            if desired_v != upstream_v {
                let new_version = maybe_bump_launch_template(client, status, ng, upstream_ng).await?;
                client
                    .update_nodegroup_version(
                        display_name,
                        &ng.name,
                        desired_v,
                        status.managed_launch_template_id.as_deref(),
                        new_version.as_deref(),
                    )
                    .await?;
                if let Some(v) = new_version {
                    queue_old_version(status, &ng.name, v);
                }
                return Ok(PlanOutcome::Mutated);
            }
        }

        let (add_labels, remove_labels) = diff_tags(&ng.labels, &upstream_ng.labels);
        let scaling_differs = ng.min_size != upstream_ng.min_size
            || ng.max_size != upstream_ng.max_size
            || ng.desired_size != upstream_ng.desired_size;
        if !add_labels.is_empty() || !remove_labels.is_empty() || scaling_differs {
            let scaling = scaling_differs.then_some((ng.min_size, ng.max_size, ng.desired_size));
            client
                .update_nodegroup_config(display_name, &ng.name, &add_labels, &remove_labels, scaling)
                .await?;
            return Ok(PlanOutcome::Mutated);
        }

        let (to_tag, to_untag) = diff_tags(&ng.resource_tags, &upstream_ng.resource_tags);
        if !to_tag.is_empty() {
            client.tag_resource(&upstream_ng.arn, &to_tag).await?;
        }
        if !to_untag.is_empty() {
            client.untag_resource(&upstream_ng.arn, &to_untag).await?;
        }

        if machine_fields_differ(ng, upstream_ng) {
            let new_version = maybe_bump_launch_template(client, status, ng, upstream_ng).await?;
            if let Some(v) = new_version {
                client
                    .update_nodegroup_version(
                        display_name,
                        &ng.name,
                        upstream_ng.version.as_deref().unwrap_or_default(),
                        status.managed_launch_template_id.as_deref(),
                        Some(&v),
                    )
                    .await?;
                queue_old_version(status, &ng.name, v);
                return Ok(PlanOutcome::Mutated);
            }
        }
    }

    // Nothing left to converge: safe to drop any launch-template versions a
    // prior pass superseded now that no node-group update references them.
    if let Some(template_id) = status.managed_launch_template_id.clone() {
        if !status.template_versions_to_delete.is_empty() {
            let stale = std::mem::take(&mut status.template_versions_to_delete);
            launch_template::delete_versions(client, &template_id, &stale).await?;
        }
    }

    Ok(PlanOutcome::NoChange)
}

/// Records `new_version` as the node group's current managed-template
/// version, queuing whatever version it replaced for deletion once the
/// node group finishes cutting over (§4.7) — AWS refuses to delete a
/// version still referenced by an in-flight node-group update.
fn queue_old_version(status: &mut EKSClusterConfigStatus, nodegroup_name: &str, new_version: String) {
    if let Some(old) = status
        .managed_launch_template_versions
        .insert(nodegroup_name.to_string(), new_version)
    {
        status.template_versions_to_delete.push(old);
    }
}

/// Added-or-changed keys (desired wins on conflict) and removed keys (only
/// in upstream). Exercised directly by the tag round-trip property (§8).
pub fn diff_tags(
    desired: &BTreeMap<String, String>,
    upstream: &HashMap<String, String>,
) -> (HashMap<String, String>, Vec<String>) {
    let mut to_add = HashMap::new();
    for (k, v) in desired {
        if upstream.get(k) != Some(v) {
            to_add.insert(k.clone(), v.clone());
        }
    }
    let to_remove = upstream
        .keys()
        .filter(|k| !desired.contains_key(*k))
        .cloned()
        .collect();
    (to_add, to_remove)
}

/// `[]` and `["0.0.0.0/0"]` both mean "unrestricted"; everything else
/// compares as a set (§4.5 item 5, §8).
pub fn normalize_public_access_sources(sources: &[String]) -> Vec<String> {
    if sources.is_empty() || sources == [UNRESTRICTED_CIDR.to_string()] {
        return vec![UNRESTRICTED_CIDR.to_string()];
    }
    let mut sorted = sources.to_vec();
    sorted.sort();
    sorted.dedup();
    sorted
}

fn desired_machine_fields(ng: &NodeGroup) -> MachineFields {
    MachineFields {
        user_data: ng.user_data.clone(),
        ssh_key: ng.ec2_ssh_key.clone(),
        disk_size: ng.disk_size,
        image_id: ng.image_id.clone(),
        instance_type: Some(ng.instance_type.clone()),
        resource_tags: ng.resource_tags.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
    }
}

fn upstream_machine_fields(ng: &UpstreamNodeGroup) -> MachineFields {
    MachineFields {
        user_data: ng.user_data.clone(),
        ssh_key: ng.ssh_key.clone(),
        disk_size: ng.disk_size,
        image_id: ng.image_id.clone(),
        instance_type: ng.instance_type.clone(),
        resource_tags: ng.resource_tags.clone(),
    }
}

fn machine_fields_differ(ng: &NodeGroup, upstream_ng: &UpstreamNodeGroup) -> bool {
    // Only meaningful for node groups backed by the managed template; a
    // user-supplied launch template is never rewritten by this operator.
    ng.launch_template.is_none()
        && desired_machine_fields(ng) != upstream_machine_fields(upstream_ng)
}

async fn maybe_bump_launch_template(
    client: &CloudClient,
    status: &mut EKSClusterConfigStatus,
    ng: &NodeGroup,
    upstream_ng: &UpstreamNodeGroup,
) -> Result<Option<String>> {
    if ng.launch_template.is_some() {
        return Ok(None);
    }
    let Some(template_id) = status.managed_launch_template_id.clone() else {
        return Ok(None);
    };
    launch_template::create_new_version_if_needed(
        client,
        &template_id,
        &desired_machine_fields(ng),
        &upstream_machine_fields(upstream_ng),
        ng.request_spot_instances,
    )
    .await
}

/// Creates a single desired node group that doesn't exist upstream yet
/// (§4.7). On `createNodegroup` failure, deletes any launch-template
/// version it just created to avoid leaking versions.
async fn create_nodegroup(
    client: &CloudClient,
    region_ctx: &RegionContext,
    display_name: &str,
    status: &mut EKSClusterConfigStatus,
    ng: &NodeGroup,
) -> Result<()> {
    let capacity_type = if ng.request_spot_instances {
        "spot"
    } else {
        "on-demand"
    };

    let (launch_template_id, launch_template_version) = match &ng.launch_template {
        Some(user_lt) => (Some(user_lt.id.clone()), Some(user_lt.version.clone())),
        None => {
            let template_id = match status.managed_launch_template_id.clone() {
                Some(id) => id,
                None => {
                    let id = launch_template::ensure_managed_template_exists(client, display_name, None).await?;
                    status.managed_launch_template_id = Some(id.clone());
                    id
                }
            };
            let version = launch_template::create_new_version_if_needed(
                client,
                &template_id,
                &desired_machine_fields(ng),
                &MachineFields::default(),
                ng.request_spot_instances,
            )
            .await?;
            (Some(template_id), version)
        }
    };

    let ami_type = if ng.image_id.is_some() || ng.launch_template.is_some() {
        "CUSTOM"
    } else {
        match (ng.arm, ng.gpu) {
            (true, _) => "AL2023_ARM_64_STANDARD",
            (false, true) => "AL2_x86_64_GPU",
            (false, false) => "AL2023_x86_64_STANDARD",
        }
    };

    let subnets = if !ng.subnets.as_ref().map(|s| s.is_empty()).unwrap_or(true) {
        ng.subnets.clone().unwrap_or_default()
    } else {
        status.subnets.clone()
    };

    let node_role = match &ng.node_role {
        Some(role) => role.clone(),
        None => {
            if status.generated_node_role.is_empty() {
                let role = apply_node_instance_role_stack(client, region_ctx, display_name).await?;
                status.generated_node_role = role.clone();
                role
            } else {
                status.generated_node_role.clone()
            }
        }
    };

    let result = client
        .create_nodegroup(
            display_name,
            &ng.name,
            &node_role,
            &subnets,
            (ng.min_size, ng.max_size, ng.desired_size),
            ami_type,
            capacity_type,
            ng.disk_size,
            &ng.labels,
            &ng.tags,
            launch_template_id.as_deref(),
            launch_template_version.as_deref(),
        )
        .await;

    match result {
        Ok(()) => {
            if let Some(v) = launch_template_version {
                status.managed_launch_template_versions.insert(ng.name.clone(), v);
            }
            Ok(())
        }
        Err(e) => {
            if let (Some(template_id), Some(version)) = (&launch_template_id, &launch_template_version) {
                if ng.launch_template.is_none() {
                    let _ = launch_template::delete_versions(client, template_id, &[version.clone()]).await;
                }
            }
            Err(e)
        }
    }
}

async fn apply_node_instance_role_stack(
    client: &CloudClient,
    region_ctx: &RegionContext,
    display_name: &str,
) -> Result<String> {
    let mut params = HashMap::new();
    params.insert("ClusterName".to_string(), display_name.to_string());
    params.insert(
        "Ec2ServicePrincipal".to_string(),
        region_ctx.ec2_service_principal().to_string(),
    );
    params.insert("ArnPrefix".to_string(), region_ctx.arn_prefix().to_string());

    let stack_name = format!("eks-node-instance-role-{display_name}");
    let outputs = stack::apply_stack(
        client,
        &stack_name,
        NODE_INSTANCE_ROLE_TEMPLATE,
        &[Capability::CapabilityNamedIam],
        &params,
    )
    .await?;
    outputs
        .get("NodeInstanceRole")
        .cloned()
        .ok_or_else(|| Error::StackError("stack did not produce NodeInstanceRole output".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_diff_round_trips() {
        let mut upstream = HashMap::new();
        upstream.insert("env".to_string(), "prod".to_string());
        upstream.insert("stale".to_string(), "x".to_string());

        let mut desired = BTreeMap::new();
        desired.insert("env".to_string(), "staging".to_string());
        desired.insert("team".to_string(), "platform".to_string());

        let (to_add, to_remove) = diff_tags(&desired, &upstream);

        let mut applied = upstream.clone();
        for k in &to_remove {
            applied.remove(k);
        }
        for (k, v) in &to_add {
            applied.insert(k.clone(), v.clone());
        }
        let applied: BTreeMap<String, String> = applied.into_iter().collect();
        assert_eq!(applied, desired);
    }

    #[test]
    fn public_access_sources_filter_treats_empty_and_unrestricted_as_equal() {
        let empty: Vec<String> = vec![];
        let unrestricted = vec![UNRESTRICTED_CIDR.to_string()];
        assert_eq!(
            normalize_public_access_sources(&empty),
            normalize_public_access_sources(&unrestricted)
        );
    }

    #[test]
    fn public_access_sources_filter_is_identity_otherwise() {
        let sources = vec!["10.0.0.0/8".to_string(), "192.168.0.0/16".to_string()];
        let mut expected = sources.clone();
        expected.sort();
        assert_eq!(normalize_public_access_sources(&sources), expected);
    }
}
