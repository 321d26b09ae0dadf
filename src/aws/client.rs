//! Cloud client facade (§4.1)
//!
//! A thin capability layer over the AWS SDK clients actually in use. Every
//! operation the rest of the core needs against EKS, EC2, IAM, and
//! CloudFormation is exposed here and nowhere else; the facade carries no
//! retries or state of its own, which keeps it the sole surface worth
//! mocking in tests.

use std::collections::HashMap;

use aws_config::BehaviorVersion;
use aws_sdk_cloudformation::types::{Capability, Parameter, StackEvent};
use aws_sdk_ec2::types::Image;
use aws_sdk_eks::types::{Addon, Cluster, Nodegroup, NodegroupScalingConfig};
use aws_sdk_iam::types::OpenIdConnectProviderListEntry;

use crate::error::{Error, Result};

/// Everything the core needs to reach a single region in a single account,
/// built fresh per reconcile from the credential secret (§6, §9 "credential
/// staleness").
#[derive(Clone)]
pub struct CloudClient {
    pub region: String,
    eks: aws_sdk_eks::Client,
    ec2: aws_sdk_ec2::Client,
    iam: aws_sdk_iam::Client,
    cfn: aws_sdk_cloudformation::Client,
}

impl CloudClient {
    pub async fn new(region: String, access_key: &str, secret_key: &str) -> Self {
        let credentials = aws_credential_types::Credentials::new(
            access_key,
            secret_key,
            None,
            None,
            "eks-operator-credential-ref",
        );
        let shared = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(region.clone()))
            .credentials_provider(credentials)
            .load()
            .await;
        Self {
            region,
            eks: aws_sdk_eks::Client::new(&shared),
            ec2: aws_sdk_ec2::Client::new(&shared),
            iam: aws_sdk_iam::Client::new(&shared),
            cfn: aws_sdk_cloudformation::Client::new(&shared),
        }
    }

    // ---- EKS: cluster ----

    pub async fn describe_cluster(&self, name: &str) -> Result<Option<Cluster>> {
        match self.eks.describe_cluster().name(name).send().await {
            Ok(out) => Ok(out.cluster),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(Error::EksError(e.to_string())),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn create_cluster(
        &self,
        name: &str,
        role_arn: &str,
        version: Option<&str>,
        subnets: &[String],
        security_groups: &[String],
        public_access: bool,
        private_access: bool,
        public_access_sources: &[String],
        logging_types: &[String],
        tags: &HashMap<String, String>,
        secrets_encryption_kms_key: Option<&str>,
    ) -> Result<()> {
        let vpc_config = aws_sdk_eks::types::VpcConfigRequest::builder()
            .set_subnet_ids(Some(subnets.to_vec()))
            .set_security_group_ids(Some(security_groups.to_vec()))
            .endpoint_public_access(public_access)
            .endpoint_private_access(private_access)
            .set_public_access_cidrs(Some(public_access_sources.to_vec()))
            .build();

        let mut req = self
            .eks
            .create_cluster()
            .name(name)
            .role_arn(role_arn)
            .resources_vpc_config(vpc_config)
            .set_tags(Some(tags.clone()));
        if let Some(v) = version {
            req = req.version(v);
        }
        if !logging_types.is_empty() {
            let types = logging_types
                .iter()
                .map(|t| aws_sdk_eks::types::LogType::from(t.as_str()))
                .collect::<Vec<_>>();
            let enabled = aws_sdk_eks::types::LogSetup::builder()
                .set_types(Some(types))
                .enabled(true)
                .build();
            req = req.logging(
                aws_sdk_eks::types::Logging::builder()
                    .cluster_logging(enabled)
                    .build(),
            );
        }
        if let Some(kms) = secrets_encryption_kms_key {
            let provider = aws_sdk_eks::types::Provider::builder().key_arn(kms).build();
            let enc = aws_sdk_eks::types::EncryptionConfig::builder()
                .resources("secrets".to_string())
                .provider(provider)
                .build();
            req = req.encryption_config(enc);
        }

        req.send().await.map_err(|e| Error::EksError(e.to_string()))?;
        Ok(())
    }

    pub async fn update_cluster_version(&self, name: &str, version: &str) -> Result<()> {
        self.eks
            .update_cluster_version()
            .name(name)
            .version(version)
            .send()
            .await
            .map_err(|e| Error::EksError(e.to_string()))?;
        Ok(())
    }

    pub async fn update_cluster_config_access(
        &self,
        name: &str,
        public_access: bool,
        private_access: bool,
        public_access_sources: Option<&[String]>,
    ) -> Result<()> {
        let mut vpc = aws_sdk_eks::types::VpcConfigRequest::builder()
            .endpoint_public_access(public_access)
            .endpoint_private_access(private_access);
        if let Some(sources) = public_access_sources {
            vpc = vpc.set_public_access_cidrs(Some(sources.to_vec()));
        }
        self.eks
            .update_cluster_config()
            .name(name)
            .resources_vpc_config(vpc.build())
            .send()
            .await
            .map_err(|e| Error::EksError(e.to_string()))?;
        Ok(())
    }

    pub async fn update_cluster_logging(
        &self,
        name: &str,
        enable: &[String],
        disable: &[String],
    ) -> Result<()> {
        let mut setups = Vec::new();
        if !enable.is_empty() {
            let types = enable
                .iter()
                .map(|t| aws_sdk_eks::types::LogType::from(t.as_str()))
                .collect();
            setups.push(
                aws_sdk_eks::types::LogSetup::builder()
                    .set_types(Some(types))
                    .enabled(true)
                    .build(),
            );
        }
        if !disable.is_empty() {
            let types = disable
                .iter()
                .map(|t| aws_sdk_eks::types::LogType::from(t.as_str()))
                .collect();
            setups.push(
                aws_sdk_eks::types::LogSetup::builder()
                    .set_types(Some(types))
                    .enabled(false)
                    .build(),
            );
        }
        self.eks
            .update_cluster_config()
            .name(name)
            .logging(
                aws_sdk_eks::types::Logging::builder()
                    .set_cluster_logging(Some(setups))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| Error::EksError(e.to_string()))?;
        Ok(())
    }

    pub async fn tag_resource(&self, arn: &str, tags: &HashMap<String, String>) -> Result<()> {
        if tags.is_empty() {
            return Ok(());
        }
        self.eks
            .tag_resource()
            .resource_arn(arn)
            .set_tags(Some(tags.clone()))
            .send()
            .await
            .map_err(|e| Error::EksError(e.to_string()))?;
        Ok(())
    }

    pub async fn untag_resource(&self, arn: &str, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        self.eks
            .untag_resource()
            .resource_arn(arn)
            .set_tag_keys(Some(keys.to_vec()))
            .send()
            .await
            .map_err(|e| Error::EksError(e.to_string()))?;
        Ok(())
    }

    pub async fn delete_cluster(&self, name: &str) -> Result<()> {
        match self.eks.delete_cluster().name(name).send().await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(Error::EksError(e.to_string())),
        }
    }

    // ---- EKS: node groups ----

    pub async fn describe_nodegroup(
        &self,
        cluster: &str,
        name: &str,
    ) -> Result<Option<Nodegroup>> {
        match self
            .eks
            .describe_nodegroup()
            .cluster_name(cluster)
            .nodegroup_name(name)
            .send()
            .await
        {
            Ok(out) => Ok(out.nodegroup),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(Error::EksError(e.to_string())),
        }
    }

    pub async fn list_nodegroups(&self, cluster: &str) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut next_token = None;
        loop {
            let mut req = self.eks.list_nodegroups().cluster_name(cluster);
            if let Some(t) = &next_token {
                req = req.next_token(t);
            }
            let out = req.send().await.map_err(|e| Error::EksError(e.to_string()))?;
            names.extend(out.nodegroups.unwrap_or_default());
            next_token = out.next_token;
            if next_token.is_none() {
                break;
            }
        }
        Ok(names)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn create_nodegroup(
        &self,
        cluster: &str,
        name: &str,
        node_role: &str,
        subnets: &[String],
        scaling: (i32, i32, i32),
        ami_type: &str,
        capacity_type: &str,
        disk_size: i32,
        labels: &HashMap<String, String>,
        tags: &HashMap<String, String>,
        launch_template_id: Option<&str>,
        launch_template_version: Option<&str>,
    ) -> Result<()> {
        let (min, max, desired) = scaling;
        let scaling_config = NodegroupScalingConfig::builder()
            .min_size(min)
            .max_size(max)
            .desired_size(desired)
            .build();

        let mut req = self
            .eks
            .create_nodegroup()
            .cluster_name(cluster)
            .nodegroup_name(name)
            .node_role(node_role)
            .set_subnets(Some(subnets.to_vec()))
            .scaling_config(scaling_config)
            .capacity_type(if capacity_type.is_empty() {
                aws_sdk_eks::types::CapacityTypes::OnDemand
            } else {
                aws_sdk_eks::types::CapacityTypes::from(capacity_type)
            })
            .set_labels(Some(labels.clone()))
            .set_tags(Some(tags.clone()));

        // `amiType` selects the EKS-optimized AMI baked into a managed launch
        // template; it must stay unset when the template (or its image)
        // carries a custom AMI, since the two are mutually exclusive.
        if ami_type != "CUSTOM" {
            req = req.ami_type(if ami_type.is_empty() {
                aws_sdk_eks::types::AmiTypes::Al2023X8664Standard
            } else {
                aws_sdk_eks::types::AmiTypes::from(ami_type)
            });
        }

        if let Some(lt_id) = launch_template_id {
            let mut spec = aws_sdk_eks::types::LaunchTemplateSpecification::builder().id(lt_id);
            if let Some(v) = launch_template_version {
                spec = spec.version(v);
            }
            req = req.launch_template(spec.build());
        } else {
            req = req.disk_size(disk_size);
        }

        req.send().await.map_err(|e| Error::EksError(e.to_string()))?;
        Ok(())
    }

    pub async fn update_nodegroup_version(
        &self,
        cluster: &str,
        name: &str,
        version: &str,
        launch_template_id: Option<&str>,
        launch_template_version: Option<&str>,
    ) -> Result<()> {
        let mut req = self
            .eks
            .update_nodegroup_version()
            .cluster_name(cluster)
            .nodegroup_name(name)
            .version(version);
        if let Some(lt_id) = launch_template_id {
            let mut spec = aws_sdk_eks::types::LaunchTemplateSpecification::builder().id(lt_id);
            if let Some(v) = launch_template_version {
                spec = spec.version(v);
            }
            req = req.launch_template(spec.build());
        }
        req.send().await.map_err(|e| Error::EksError(e.to_string()))?;
        Ok(())
    }

    pub async fn update_nodegroup_config(
        &self,
        cluster: &str,
        name: &str,
        add_labels: &HashMap<String, String>,
        remove_labels: &[String],
        scaling: Option<(i32, i32, i32)>,
    ) -> Result<()> {
        let labels_update = aws_sdk_eks::types::UpdateLabelsPayload::builder()
            .set_add_or_update_labels(Some(add_labels.clone()))
            .set_remove_labels(Some(remove_labels.to_vec()))
            .build();
        let mut req = self
            .eks
            .update_nodegroup_config()
            .cluster_name(cluster)
            .nodegroup_name(name)
            .labels(labels_update);
        if let Some((min, max, desired)) = scaling {
            req = req.scaling_config(
                NodegroupScalingConfig::builder()
                    .min_size(min)
                    .max_size(max)
                    .desired_size(desired)
                    .build(),
            );
        }
        req.send().await.map_err(|e| Error::EksError(e.to_string()))?;
        Ok(())
    }

    pub async fn delete_nodegroup(&self, cluster: &str, name: &str) -> Result<()> {
        match self
            .eks
            .delete_nodegroup()
            .cluster_name(cluster)
            .nodegroup_name(name)
            .send()
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(Error::EksError(e.to_string())),
        }
    }

    // ---- EKS: add-ons ----

    pub async fn describe_addon(&self, cluster: &str, name: &str) -> Result<Option<Addon>> {
        match self
            .eks
            .describe_addon()
            .cluster_name(cluster)
            .addon_name(name)
            .send()
            .await
        {
            Ok(out) => Ok(out.addon),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(Error::EksError(e.to_string())),
        }
    }

    pub async fn create_addon(
        &self,
        cluster: &str,
        name: &str,
        version: Option<&str>,
        service_account_role_arn: &str,
    ) -> Result<()> {
        let mut req = self
            .eks
            .create_addon()
            .cluster_name(cluster)
            .addon_name(name)
            .service_account_role_arn(service_account_role_arn);
        if let Some(v) = version {
            req = req.addon_version(v);
        }
        req.send().await.map_err(|e| Error::EksError(e.to_string()))?;
        Ok(())
    }

    // ---- IAM: OIDC providers ----

    pub async fn list_oidc_providers(&self) -> Result<Vec<OpenIdConnectProviderListEntry>> {
        let out = self
            .iam
            .list_open_id_connect_providers()
            .send()
            .await
            .map_err(|e| Error::IamError(e.to_string()))?;
        Ok(out.open_id_connect_provider_list.unwrap_or_default())
    }

    pub async fn create_oidc_provider(
        &self,
        issuer_url: &str,
        client_id: &str,
        thumbprint: &str,
    ) -> Result<String> {
        let out = self
            .iam
            .create_open_id_connect_provider()
            .url(issuer_url)
            .client_id_list(client_id)
            .thumbprint_list(thumbprint)
            .send()
            .await
            .map_err(|e| Error::IamError(e.to_string()))?;
        out.open_id_connect_provider_arn
            .ok_or_else(|| Error::OidcError("create_open_id_connect_provider returned no arn".into()))
    }

    // ---- EC2: images ----

    pub async fn describe_image(&self, image_id: &str) -> Result<Option<Image>> {
        let out = self
            .ec2
            .describe_images()
            .image_ids(image_id)
            .send()
            .await
            .map_err(|e| Error::Ec2Error(e.to_string()))?;
        Ok(out.images.unwrap_or_default().into_iter().next())
    }

    // ---- EC2: launch templates ----

    pub async fn describe_launch_template(
        &self,
        id: &str,
    ) -> Result<Option<aws_sdk_ec2::types::LaunchTemplate>> {
        match self
            .ec2
            .describe_launch_templates()
            .launch_template_ids(id)
            .send()
            .await
        {
            Ok(out) => Ok(out.launch_templates.unwrap_or_default().into_iter().next()),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(Error::Ec2Error(e.to_string())),
        }
    }

    pub async fn describe_launch_template_version(
        &self,
        id: &str,
        version: &str,
    ) -> Result<Option<aws_sdk_ec2::types::LaunchTemplateVersion>> {
        match self
            .ec2
            .describe_launch_template_versions()
            .launch_template_id(id)
            .versions(version)
            .send()
            .await
        {
            Ok(out) => Ok(out
                .launch_template_versions
                .unwrap_or_default()
                .into_iter()
                .next()),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(Error::Ec2Error(e.to_string())),
        }
    }

    pub async fn create_launch_template(
        &self,
        name: &str,
        data: aws_sdk_ec2::types::RequestLaunchTemplateData,
        tags: &HashMap<String, String>,
    ) -> Result<String> {
        let tag_spec = aws_sdk_ec2::types::TagSpecification::builder()
            .resource_type(aws_sdk_ec2::types::ResourceType::LaunchTemplate)
            .set_tags(Some(
                tags.iter()
                    .map(|(k, v)| {
                        aws_sdk_ec2::types::Tag::builder()
                            .key(k)
                            .value(v)
                            .build()
                    })
                    .collect(),
            ))
            .build();
        let out = self
            .ec2
            .create_launch_template()
            .launch_template_name(name)
            .launch_template_data(data)
            .tag_specifications(tag_spec)
            .send()
            .await
            .map_err(|e| Error::Ec2Error(e.to_string()))?;
        out.launch_template
            .and_then(|lt| lt.launch_template_id)
            .ok_or_else(|| Error::Ec2Error("create_launch_template returned no id".into()))
    }

    pub async fn create_launch_template_version(
        &self,
        launch_template_id: &str,
        data: aws_sdk_ec2::types::RequestLaunchTemplateData,
    ) -> Result<String> {
        let out = self
            .ec2
            .create_launch_template_version()
            .launch_template_id(launch_template_id)
            .launch_template_data(data)
            .send()
            .await
            .map_err(|e| Error::Ec2Error(e.to_string()))?;
        out.launch_template_version
            .and_then(|v| v.version_number)
            .map(|n| n.to_string())
            .ok_or_else(|| Error::Ec2Error("create_launch_template_version returned no version".into()))
    }

    pub async fn delete_launch_template_versions(
        &self,
        launch_template_id: &str,
        versions: &[String],
    ) -> Result<()> {
        if versions.is_empty() {
            return Ok(());
        }
        self.ec2
            .delete_launch_template_versions()
            .launch_template_id(launch_template_id)
            .set_versions(Some(versions.to_vec()))
            .send()
            .await
            .map_err(|e| Error::Ec2Error(e.to_string()))?;
        Ok(())
    }

    pub async fn delete_launch_template(&self, launch_template_id: &str) -> Result<()> {
        match self
            .ec2
            .delete_launch_template()
            .launch_template_id(launch_template_id)
            .send()
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(Error::Ec2Error(e.to_string())),
        }
    }

    // ---- CloudFormation ----

    pub async fn create_stack(
        &self,
        name: &str,
        template_body: &str,
        capabilities: &[Capability],
        params: &HashMap<String, String>,
    ) -> Result<()> {
        let parameters: Vec<Parameter> = params
            .iter()
            .map(|(k, v)| {
                Parameter::builder()
                    .parameter_key(k)
                    .parameter_value(v)
                    .build()
            })
            .collect();
        match self
            .cfn
            .create_stack()
            .stack_name(name)
            .template_body(template_body)
            .set_capabilities(Some(capabilities.to_vec()))
            .set_parameters(Some(parameters))
            .send()
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.to_string().contains("already exists") => Ok(()),
            Err(e) => Err(Error::StackError(e.to_string())),
        }
    }

    pub async fn describe_stack_status(
        &self,
        name: &str,
    ) -> Result<Option<(aws_sdk_cloudformation::types::StackStatus, HashMap<String, String>)>> {
        match self.cfn.describe_stacks().stack_name(name).send().await {
            Ok(out) => {
                let stack = out.stacks.unwrap_or_default().into_iter().next();
                Ok(stack.map(|s| {
                    let outputs = s
                        .outputs
                        .unwrap_or_default()
                        .into_iter()
                        .filter_map(|o| Some((o.output_key?, o.output_value?)))
                        .collect();
                    (
                        s.stack_status
                            .unwrap_or_else(|| aws_sdk_cloudformation::types::StackStatus::from("")),
                        outputs,
                    )
                }))
            }
            Err(e) if e.to_string().contains("does not exist") => Ok(None),
            Err(e) => Err(Error::StackError(e.to_string())),
        }
    }

    pub async fn describe_stack_events(&self, name: &str) -> Result<Vec<StackEvent>> {
        let out = self
            .cfn
            .describe_stack_events()
            .stack_name(name)
            .send()
            .await
            .map_err(|e| Error::StackError(e.to_string()))?;
        Ok(out.stack_events.unwrap_or_default())
    }

    pub async fn delete_stack(&self, name: &str) -> Result<()> {
        self.cfn
            .delete_stack()
            .stack_name(name)
            .send()
            .await
            .map_err(|e| Error::StackError(e.to_string()))?;
        Ok(())
    }
}

fn is_not_found<E: std::fmt::Display>(e: &E) -> bool {
    let s = e.to_string();
    s.contains("ResourceNotFoundException") || s.contains("not found") || s.contains("does not exist")
}
