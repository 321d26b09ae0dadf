//! Deleter (§4.9)
//!
//! Runs under the finalizer. Imported clusters are never deleted — their
//! finalizer is simply removed. Otherwise node groups go first (waited out,
//! not fire-and-forget at the reconcile level — see §9 open question (a)
//! for why the node-group API call itself is still fire-and-forget), then
//! the managed launch template, then the cluster, then the IAM/VPC stacks
//! this operator provisioned.

use std::time::Duration;

use tracing::info;

use crate::aws::client::CloudClient;
use crate::aws::launch_template;
use crate::aws::stack;
use crate::crd::{EKSClusterConfigSpec, EKSClusterConfigStatus, NetworkFieldsSource};
use crate::error::Result;

const NODEGROUP_POLL_INTERVAL: Duration = Duration::from_secs(10);

pub async fn delete(
    client: &CloudClient,
    display_name: &str,
    spec: &EKSClusterConfigSpec,
    status: &EKSClusterConfigStatus,
) -> Result<()> {
    // 1. Node groups: issue delete for any not already deleting, then wait
    //    for the set to drain.
    loop {
        let names = client.list_nodegroups(display_name).await?;
        if names.is_empty() {
            break;
        }
        for name in &names {
            let Some(ng) = client.describe_nodegroup(display_name, name).await? else {
                continue;
            };
            if ng.status() != Some(&aws_sdk_eks::types::NodegroupStatus::Deleting) {
                client.delete_nodegroup(display_name, name).await?;
            }
        }
        info!(cluster = display_name, remaining = names.len(), "waiting for node groups to drain");
        tokio::time::sleep(NODEGROUP_POLL_INTERVAL).await;
    }

    // 2. Managed launch-template versions (both in-service and those a
    //    prior reconcile superseded but hadn't yet deleted), then the
    //    template itself.
    if let Some(template_id) = &status.managed_launch_template_id {
        let mut versions: Vec<String> = status.managed_launch_template_versions.values().cloned().collect();
        versions.extend(status.template_versions_to_delete.iter().cloned());
        launch_template::delete_versions(client, template_id, &versions).await?;
        client.delete_launch_template(template_id).await?;
    }

    // 3. The cluster itself, tolerating not-found.
    client.delete_cluster(display_name).await?;

    // 4. Service-role stack, only if the operator provisioned it.
    if spec.service_role.is_empty() {
        let primary = format!("eks-service-role-{display_name}");
        let legacy = format!("{display_name}-service-role");
        stack::delete_stack(client, &primary, &legacy).await?;
    }

    // 5. VPC stack, only if the operator generated the networking.
    if status.network_fields_source == NetworkFieldsSource::Generated {
        let primary = format!("eks-vpc-{display_name}");
        let legacy = format!("{display_name}-vpc");
        stack::delete_stack(client, &primary, &legacy).await?;
    }

    // 6. Node-instance-role stack.
    let primary = format!("eks-node-instance-role-{display_name}");
    let legacy = format!("{display_name}-node-instance-role");
    stack::delete_stack(client, &primary, &legacy).await?;

    Ok(())
}
