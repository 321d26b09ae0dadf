//! Phase reconciler for `EKSClusterConfig` (§4.8)
//!
//! Dispatches on `status.phase` and owns the state machine, status updates,
//! re-enqueue timing, and error recording. Every remote call used here goes
//! through the cloud client facade; the facade itself never retries, so all
//! retry/backoff behavior lives in this module and in `error_policy`.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::{Api, ObjectMeta, Patch, PatchParams};
use kube::client::Client;
use kube::runtime::controller::{Action, Controller};
use kube::runtime::finalizer::{finalizer, Event};
use kube::runtime::watcher::Config;
use kube::{Resource, ResourceExt};
use tracing::{debug, error, info, instrument};

use crate::aws::arn::RegionContext;
use crate::aws::client::CloudClient;
use crate::aws::planner::{self, PlanOutcome};
use crate::aws::projector;
use crate::aws::session;
use crate::aws::stack;
use crate::aws::templates::{SERVICE_ROLE_TEMPLATE, VPC_TEMPLATE};
use crate::crd::{EKSClusterConfig, EKSClusterConfigStatus, NetworkFieldsSource};
use crate::error::{Error, Result};

use super::finalizers::EKS_CLUSTER_CONFIG_FINALIZER;

const CREATING_POLL: Duration = Duration::from_secs(30);
const SETTLE_POLL: Duration = Duration::from_secs(30);
const MUTATED_POLL: Duration = Duration::from_secs(10);
const IMPORT_POLL: Duration = Duration::from_secs(5);

pub struct ControllerState {
    pub client: Client,
}

/// Starts the controller loop. Runs until the process is asked to shut down.
pub async fn run_controller(state: Arc<ControllerState>) -> Result<()> {
    let client = state.client.clone();
    let configs: Api<EKSClusterConfig> = Api::all(client.clone());

    info!("starting EKSClusterConfig controller");

    if let Err(e) = configs.list(&Default::default()).await {
        error!("EKSClusterConfig CRD not found: {:?}", e);
        return Err(Error::ConfigError(
            "EKSClusterConfig CRD not installed".to_string(),
        ));
    }

    Controller::new(configs, Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, state)
        .for_each(|res| async move {
            match res {
                Ok(obj) => info!("reconciled: {:?}", obj),
                Err(e) => error!("reconcile error: {:?}", e),
            }
        })
        .await;

    Ok(())
}

#[instrument(skip(obj, ctx), fields(name = %obj.name_any(), namespace = obj.namespace()))]
async fn reconcile(obj: Arc<EKSClusterConfig>, ctx: Arc<ControllerState>) -> Result<Action> {
    let client = ctx.client.clone();
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<EKSClusterConfig> = Api::namespaced(client.clone(), &namespace);

    finalizer(&api, EKS_CLUSTER_CONFIG_FINALIZER, obj, |event| async {
        match event {
            Event::Apply(cfg) => apply_wrapped(&client, &cfg).await,
            Event::Cleanup(cfg) => cleanup(&client, &cfg).await,
        }
    })
    .await
    .map_err(Error::from)
}

/// The error-recording wrapper (§4.8). Writes `status.failureMessage`
/// unless the error is an "update in progress" idempotency marker. An
/// `active` record is flipped to `updating` on failure; `importing` is left
/// alone per §9's open question (b).
async fn apply_wrapped(client: &Client, cfg: &EKSClusterConfig) -> Result<Action> {
    match dispatch(client, cfg).await {
        Ok(action) => {
            record_metric_reconcile("success");
            Ok(action)
        }
        Err(err) if err.is_update_in_progress() => {
            debug!("cluster has an update in progress upstream, deferring");
            record_metric_reconcile("retry");
            Ok(Action::requeue(SETTLE_POLL))
        }
        Err(err) => {
            record_metric_reconcile("failure");
            record_failure(client, cfg, &err).await;
            Err(err)
        }
    }
}

async fn record_failure(client: &Client, cfg: &EKSClusterConfig, err: &Error) {
    let namespace = cfg.namespace().unwrap_or_else(|| "default".to_string());
    let name = cfg.name_any();
    let api: Api<EKSClusterConfig> = Api::namespaced(client.clone(), &namespace);

    let mut status = cfg.status.clone().unwrap_or_default();
    status.failure_message = err.to_string();
    if status.phase == "active" {
        status.phase = "updating".to_string();
    }

    let patch = serde_json::json!({ "status": status });
    if let Err(e) = api
        .patch_status(&name, &PatchParams::apply("eks-operator"), &Patch::Merge(&patch))
        .await
    {
        debug!("status update raced while recording failure for {namespace}/{name}: {e:?}");
    }
}

fn error_policy(cfg: Arc<EKSClusterConfig>, error: &Error, _ctx: Arc<ControllerState>) -> Action {
    error!("reconciliation error for {}: {:?}", cfg.name_any(), error);
    let retry = if error.is_retriable() {
        Duration::from_secs(15)
    } else {
        Duration::from_secs(60)
    };
    Action::requeue(retry)
}

async fn dispatch(client: &Client, cfg: &EKSClusterConfig) -> Result<Action> {
    let namespace = cfg.namespace().unwrap_or_else(|| "default".to_string());
    let display_name = cfg.spec.display_name.clone();
    let status = cfg.status.clone().unwrap_or_default();

    let aws = session::build_client(client, &namespace, &cfg.spec.credential_ref, &cfg.spec.region).await?;
    let region_ctx = RegionContext::new(cfg.spec.region.clone());

    match status.phase.as_str() {
        "importing" => handle_importing(client, &aws, cfg, &namespace, &display_name, status).await,
        "" => handle_initial(client, &aws, &region_ctx, cfg, &namespace, &display_name).await,
        "creating" => handle_creating(client, &aws, cfg, &namespace, &display_name, status).await,
        "active" | "updating" => {
            handle_active_or_updating(client, &aws, &region_ctx, cfg, &namespace, &display_name, status).await
        }
        other => Err(Error::ConfigError(format!("unrecognized phase {other}"))),
    }
}

/// `importing` → project upstream, create the CA secret, copy networking
/// into status, settle into `active` (§4.8).
async fn handle_importing(
    client: &Client,
    aws: &CloudClient,
    cfg: &EKSClusterConfig,
    namespace: &str,
    display_name: &str,
    mut status: EKSClusterConfigStatus,
) -> Result<Action> {
    let Some(upstream) = projector::project(aws, display_name, status.managed_launch_template_id.as_deref(), true).await?
    else {
        return Err(Error::ProjectionError(format!(
            "imported cluster {display_name} does not exist upstream"
        )));
    };

    let Some(cluster) = aws.describe_cluster(display_name).await? else {
        return Err(Error::ProjectionError(format!(
            "imported cluster {display_name} vanished between describes"
        )));
    };
    let endpoint = cluster.endpoint().unwrap_or_default().to_string();
    let ca = cluster
        .certificate_authority()
        .and_then(|ca| ca.data())
        .unwrap_or_default()
        .to_string();

    ensure_ca_secret(client, cfg, namespace, &endpoint, &ca).await?;

    status.subnets = upstream.subnets;
    status.security_groups = upstream.security_groups;
    status.virtual_network = upstream.vpc_id;
    status.network_fields_source = NetworkFieldsSource::Provided;
    status.phase = "active".to_string();
    status.failure_message.clear();
    patch_status(client, cfg, namespace, &status).await?;
    record_metric_phase("active");

    Ok(Action::requeue(SETTLE_POLL))
}

/// `""` → validate, branch on `spec.imported`, otherwise ensure networking
/// and the service role, submit `createCluster`, move to `creating` (§4.8).
async fn handle_initial(
    client: &Client,
    aws: &CloudClient,
    region_ctx: &RegionContext,
    cfg: &EKSClusterConfig,
    namespace: &str,
    display_name: &str,
) -> Result<Action> {
    cfg.spec.validate().map_err(Error::ValidationError)?;

    let mut status = EKSClusterConfigStatus::default();

    if cfg.spec.imported {
        status.phase = "importing".to_string();
        patch_status(client, cfg, namespace, &status).await?;
        record_metric_phase("importing");
        return Ok(Action::requeue(IMPORT_POLL));
    }

    let (subnets, security_groups, virtual_network, network_fields_source) = if cfg.spec.subnets.is_empty() {
        let outputs = apply_vpc_stack(aws, display_name).await?;
        let subnets = outputs
            .get("SubnetIds")
            .map(|s| s.split(',').map(str::to_string).collect())
            .unwrap_or_default();
        let security_groups = outputs
            .get("SecurityGroups")
            .map(|s| s.split(',').map(str::to_string).collect())
            .unwrap_or_default();
        let virtual_network = outputs.get("VpcId").cloned().unwrap_or_default();
        (subnets, security_groups, virtual_network, NetworkFieldsSource::Generated)
    } else {
        (
            cfg.spec.subnets.clone(),
            cfg.spec.security_groups.clone(),
            String::new(),
            NetworkFieldsSource::Provided,
        )
    };

    let service_role = if cfg.spec.service_role.is_empty() {
        apply_service_role_stack(aws, display_name).await?
    } else {
        cfg.spec.service_role.clone()
    };

    aws.create_cluster(
        display_name,
        &service_role,
        cfg.spec.kubernetes_version.as_deref(),
        &subnets,
        &security_groups,
        cfg.spec.public_access.unwrap_or(false),
        cfg.spec.private_access.unwrap_or(false),
        &cfg.spec.public_access_sources,
        &cfg.spec.logging_types.iter().map(|t| t.as_str().to_string()).collect::<Vec<_>>(),
        &cfg.spec.tags.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        cfg.spec
            .secrets_encryption
            .unwrap_or(false)
            .then(|| cfg.spec.kms_key.as_deref())
            .flatten(),
    )
    .await?;

    status.subnets = subnets;
    status.security_groups = security_groups;
    status.virtual_network = virtual_network;
    status.network_fields_source = network_fields_source;
    status.phase = "creating".to_string();
    status.failure_message.clear();
    patch_status(client, cfg, namespace, &status).await?;
    record_metric_phase("creating");

    Ok(Action::requeue(CREATING_POLL))
}

/// `creating` → poll until `active` (create CA secret, settle) or `failed`
/// (fatal) (§4.8).
async fn handle_creating(
    client: &Client,
    aws: &CloudClient,
    cfg: &EKSClusterConfig,
    namespace: &str,
    display_name: &str,
    mut status: EKSClusterConfigStatus,
) -> Result<Action> {
    let Some(cluster) = aws.describe_cluster(display_name).await? else {
        return Ok(Action::requeue(CREATING_POLL));
    };

    match cluster.status() {
        Some(&aws_sdk_eks::types::ClusterStatus::Active) => {
            let endpoint = cluster.endpoint().unwrap_or_default().to_string();
            let ca = cluster
                .certificate_authority()
                .and_then(|ca| ca.data())
                .unwrap_or_default()
                .to_string();
            ensure_ca_secret(client, cfg, namespace, &endpoint, &ca).await?;

            status.phase = "active".to_string();
            status.failure_message.clear();
            patch_status(client, cfg, namespace, &status).await?;
            record_metric_phase("active");
            Ok(Action::requeue(SETTLE_POLL))
        }
        Some(&aws_sdk_eks::types::ClusterStatus::Failed) => Err(Error::ClusterFailed(format!(
            "cluster {display_name} entered failed state during creation"
        ))),
        _ => Ok(Action::requeue(CREATING_POLL)),
    }
}

/// `active`/`updating` → validate, check for transient upstream state, then
/// diff via the update planner (§4.8).
async fn handle_active_or_updating(
    client: &Client,
    aws: &CloudClient,
    region_ctx: &RegionContext,
    cfg: &EKSClusterConfig,
    namespace: &str,
    display_name: &str,
    mut status: EKSClusterConfigStatus,
) -> Result<Action> {
    cfg.spec.validate().map_err(Error::ValidationError)?;

    if has_transient_upstream_state(aws, display_name).await? {
        status.phase = "updating".to_string();
        patch_status(client, cfg, namespace, &status).await?;
        record_metric_phase("updating");
        return Ok(Action::requeue(SETTLE_POLL));
    }

    let Some(upstream) = projector::project(aws, display_name, status.managed_launch_template_id.as_deref(), true).await?
    else {
        return Err(Error::ProjectionError(format!(
            "cluster {display_name} not found upstream while active"
        )));
    };

    match planner::plan(aws, region_ctx, display_name, &cfg.spec, &mut status, &upstream).await? {
        PlanOutcome::Mutated => {
            status.phase = "updating".to_string();
            status.failure_message.clear();
            patch_status(client, cfg, namespace, &status).await?;
            record_metric_phase("updating");
            record_metric_mutating_call();
            Ok(Action::requeue(MUTATED_POLL))
        }
        PlanOutcome::NoChange => {
            status.phase = "active".to_string();
            status.failure_message.clear();
            patch_status(client, cfg, namespace, &status).await?;
            record_metric_phase("active");
            Ok(Action::requeue(SETTLE_POLL))
        }
    }
}

async fn has_transient_upstream_state(aws: &CloudClient, display_name: &str) -> Result<bool> {
    let cluster_transient = match aws.describe_cluster(display_name).await?.and_then(|c| c.status().cloned()) {
        Some(aws_sdk_eks::types::ClusterStatus::Active) => false,
        _ => true,
    };
    if cluster_transient {
        return Ok(true);
    }

    for name in aws.list_nodegroups(display_name).await? {
        let settled = matches!(
            aws.describe_nodegroup(display_name, &name).await?.and_then(|ng| ng.status().cloned()),
            Some(aws_sdk_eks::types::NodegroupStatus::Active)
        );
        if !settled {
            return Ok(true);
        }
    }
    Ok(false)
}

async fn cleanup(client: &Client, cfg: &EKSClusterConfig) -> Result<Action> {
    let namespace = cfg.namespace().unwrap_or_else(|| "default".to_string());
    let display_name = cfg.spec.display_name.clone();

    if cfg.spec.imported {
        info!("imported cluster {display_name}, removing finalizer without cloud mutation");
        return Ok(Action::await_change());
    }

    let aws = session::build_client(client, &namespace, &cfg.spec.credential_ref, &cfg.spec.region).await?;
    let status = cfg.status.clone().unwrap_or_default();

    super::deleter::delete(&aws, &display_name, &cfg.spec, &status).await?;

    info!("deletion complete for EKSClusterConfig {namespace}/{}", cfg.name_any());
    Ok(Action::await_change())
}

async fn apply_vpc_stack(aws: &CloudClient, display_name: &str) -> Result<std::collections::HashMap<String, String>> {
    let mut params = std::collections::HashMap::new();
    params.insert("ClusterName".to_string(), display_name.to_string());
    let stack_name = format!("eks-vpc-{display_name}");
    stack::apply_stack(aws, &stack_name, VPC_TEMPLATE, &[], &params).await
}

async fn apply_service_role_stack(aws: &CloudClient, display_name: &str) -> Result<String> {
    let mut params = std::collections::HashMap::new();
    params.insert("ClusterName".to_string(), display_name.to_string());
    let stack_name = format!("eks-service-role-{display_name}");
    let outputs = stack::apply_stack(
        aws,
        &stack_name,
        SERVICE_ROLE_TEMPLATE,
        &[aws_sdk_cloudformation::types::Capability::CapabilityNamedIam],
        &params,
    )
    .await?;
    outputs
        .get("RoleArn")
        .cloned()
        .ok_or_else(|| Error::StackError("stack did not produce RoleArn output".into()))
}

/// Creates or updates the CA secret (§6): named after the ClusterConfig,
/// owner-referenced back to it, carrying `endpoint` and `ca`.
async fn ensure_ca_secret(client: &Client, cfg: &EKSClusterConfig, namespace: &str, endpoint: &str, ca: &str) -> Result<()> {
    let name = cfg.name_any();
    let owner_ref = cfg
        .controller_owner_ref(&())
        .ok_or_else(|| Error::ConfigError("cannot build owner reference for CA secret".into()))?;

    let mut data = std::collections::BTreeMap::new();
    data.insert("endpoint".to_string(), ByteString(endpoint.as_bytes().to_vec()));
    data.insert(
        "ca".to_string(),
        ByteString(base64::engine::general_purpose::STANDARD.encode(ca).into_bytes()),
    );

    let secret = Secret {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: Some(namespace.to_string()),
            owner_references: Some(vec![owner_ref]),
            ..Default::default()
        },
        data: Some(data),
        ..Default::default()
    };

    let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);
    secrets
        .patch(&name, &PatchParams::apply("eks-operator"), &Patch::Apply(&secret))
        .await
        .map_err(Error::KubeError)?;
    Ok(())
}

async fn patch_status(client: &Client, cfg: &EKSClusterConfig, namespace: &str, status: &EKSClusterConfigStatus) -> Result<()> {
    let api: Api<EKSClusterConfig> = Api::namespaced(client.clone(), namespace);
    let patch = serde_json::json!({ "status": status });
    api.patch_status(&cfg.name_any(), &PatchParams::apply("eks-operator"), &Patch::Merge(&patch))
        .await
        .map_err(Error::KubeError)?;
    Ok(())
}

#[cfg(feature = "metrics")]
fn record_metric_reconcile(outcome: &str) {
    crate::metrics::record_reconcile(outcome);
}
#[cfg(not(feature = "metrics"))]
fn record_metric_reconcile(_outcome: &str) {}

#[cfg(feature = "metrics")]
fn record_metric_phase(phase: &str) {
    crate::metrics::record_phase(phase);
}
#[cfg(not(feature = "metrics"))]
fn record_metric_phase(_phase: &str) {}

#[cfg(feature = "metrics")]
fn record_metric_mutating_call() {
    crate::metrics::record_mutating_call();
}
#[cfg(not(feature = "metrics"))]
fn record_metric_mutating_call() {}
