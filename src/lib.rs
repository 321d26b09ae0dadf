//! eks-operator-rs: a Kubernetes operator that reconciles `EKSClusterConfig`
//! resources against AWS EKS.
//!
//! The operator drives a hosted EKS cluster and its node groups from a
//! single namespaced custom resource, provisioning the supporting VPC/IAM
//! CloudFormation stacks it needs along the way (§4, §6).

pub mod aws;
pub mod controller;
pub mod crd;
pub mod error;
pub mod telemetry;

#[cfg(feature = "metrics")]
pub mod metrics;

#[cfg(feature = "rest-api")]
pub mod rest_api;

pub use crate::error::{Error, Result};
