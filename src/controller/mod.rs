//! Controller: the `EKSClusterConfig` reconciler and its supporting pieces.

mod deleter;
mod finalizers;
pub mod reconciler;

pub use reconciler::{run_controller, ControllerState};
