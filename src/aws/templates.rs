//! CloudFormation stack templates consumed by the stack orchestrator (§6)
//!
//! These are treated as opaque parameterised text by the rest of the core;
//! only the documented output keys matter to callers. Region-specific values
//! (service principal, ARN prefix, DNS suffix) are passed in as template
//! parameters rather than baked in, so a single template body works across
//! partitions.

/// VPC/subnet/security-group scaffolding. Outputs: `VpcId`, `SubnetIds`
/// (comma-joined), `SecurityGroups` (comma-joined).
pub const VPC_TEMPLATE: &str = include_str!("templates/vpc.yaml");

/// Cluster service role. Output: `RoleArn`.
pub const SERVICE_ROLE_TEMPLATE: &str = include_str!("templates/service_role.yaml");

/// Node instance role, parameterised by the region's EC2 service principal
/// and ARN prefix. Output: `NodeInstanceRole`.
pub const NODE_INSTANCE_ROLE_TEMPLATE: &str = include_str!("templates/node_instance_role.yaml");

/// EBS CSI driver IRSA role, parameterised by region, OIDC provider id, AWS
/// domain suffix, and ARN prefix. Output: `EBSCSIDriverRole`.
pub const EBS_CSI_DRIVER_ROLE_TEMPLATE: &str = include_str!("templates/ebs_csi_driver_role.yaml");
