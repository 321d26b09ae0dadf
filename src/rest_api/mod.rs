//! Optional read-only REST API (feature `rest-api`)
//!
//! Serves `EKSClusterConfig` status summaries and, when the `metrics`
//! feature is also enabled, a Prometheus `/metrics` endpoint. Never issues
//! a cloud or cluster mutation — every route is a read against the
//! Kubernetes API.

mod dto;
mod handlers;
mod server;

pub use server::run_server;
