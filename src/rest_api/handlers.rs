//! Axum handlers backing the read-only REST surface (§5 "operational
//! visibility" ambient concern — the CRD/status subresource remains the
//! source of truth; this surface only ever reads).

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use kube::api::Api;
use kube::ResourceExt;

use crate::controller::ControllerState;
use crate::crd::EKSClusterConfig;

use super::dto::{
    ClusterConfigDetailResponse, ClusterConfigListResponse, ClusterConfigSummary, ErrorResponse,
    HealthResponse,
};

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[cfg(feature = "metrics")]
pub async fn metrics() -> String {
    crate::metrics::encode_text()
}

pub async fn list_cluster_configs(
    State(state): State<Arc<ControllerState>>,
) -> Result<Json<ClusterConfigListResponse>, ApiError> {
    let api: Api<EKSClusterConfig> = Api::all(state.client.clone());
    let list = api.list(&Default::default()).await.map_err(ApiError::from)?;

    let items: Vec<ClusterConfigSummary> = list
        .items
        .iter()
        .map(|cfg| {
            let status = cfg.status.clone().unwrap_or_default();
            ClusterConfigSummary {
                name: cfg.name_any(),
                namespace: cfg.namespace().unwrap_or_default(),
                display_name: cfg.spec.display_name.clone(),
                region: cfg.spec.region.clone(),
                phase: status.phase,
                failure_message: status.failure_message,
            }
        })
        .collect();

    Ok(Json(ClusterConfigListResponse {
        total: items.len(),
        items,
    }))
}

pub async fn get_cluster_config(
    State(state): State<Arc<ControllerState>>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Json<ClusterConfigDetailResponse>, ApiError> {
    let api: Api<EKSClusterConfig> = Api::namespaced(state.client.clone(), &namespace);
    let cfg = api.get(&name).await.map_err(ApiError::from)?;
    let status = cfg.status.clone().unwrap_or_default();

    Ok(Json(ClusterConfigDetailResponse {
        name: cfg.name_any(),
        namespace,
        display_name: cfg.spec.display_name.clone(),
        region: cfg.spec.region.clone(),
        network_fields_source: status.network_fields_source,
        status,
    }))
}

/// Thin wrapper so handlers can `?`-propagate `kube::Error` straight into an
/// HTTP response.
pub struct ApiError(kube::Error);

impl From<kube::Error> for ApiError {
    fn from(e: kube::Error) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            kube::Error::Api(e) if e.code == 404 => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorResponse::new("kube_error", &self.0.to_string());
        (status, Json(body)).into_response()
    }
}
