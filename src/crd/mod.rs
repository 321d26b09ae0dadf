//! Custom Resource Definition for the EKS operator
//!
//! Defines the `EKSClusterConfig` custom resource (group `eks.cattle.io`,
//! version `v1`) that drives reconciliation.

mod cluster_config;
mod types;

pub use cluster_config::{EKSClusterConfig, EKSClusterConfigSpec, EKSClusterConfigStatus};
pub use types::*;
