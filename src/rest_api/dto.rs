//! Data Transfer Objects for the REST API

use serde::{Deserialize, Serialize};

use crate::crd::{EKSClusterConfigStatus, NetworkFieldsSource};

/// Response for listing cluster configs
#[derive(Debug, Serialize)]
pub struct ClusterConfigListResponse {
    pub items: Vec<ClusterConfigSummary>,
    pub total: usize,
}

/// Summary of an EKSClusterConfig for list views
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterConfigSummary {
    pub name: String,
    pub namespace: String,
    pub display_name: String,
    pub region: String,
    pub phase: String,
    pub failure_message: String,
}

/// Response for a single cluster config
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterConfigDetailResponse {
    pub name: String,
    pub namespace: String,
    pub display_name: String,
    pub region: String,
    pub network_fields_source: NetworkFieldsSource,
    pub status: EKSClusterConfigStatus,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub namespace: Option<String>,
}
