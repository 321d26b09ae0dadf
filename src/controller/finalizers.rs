//! Finalizer constant for `EKSClusterConfig` (§4.9)

pub const EKS_CLUSTER_CONFIG_FINALIZER: &str = "eksclusterconfigs.eks.cattle.io/operator";
