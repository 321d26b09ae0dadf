//! Launch-template manager (§4.3)
//!
//! Owns the single managed launch template per cluster that node groups
//! without a user-supplied template attach to. Version 1 is a throwaway
//! (default versions can't be deleted individually — see §9), so every real
//! node-group machine-field change gets its own version.

use std::collections::HashMap;
use std::time::Duration;

use base64::Engine;

use crate::aws::client::CloudClient;
use crate::error::{Error, Result};

/// Tag applied to every managed template so the deleter (§4.9) and the
/// ensure-exists check (§4.3) can recognize templates this operator owns.
pub const MANAGED_TEMPLATE_TAG_KEY: &str = "managed-template";
pub const MANAGED_TEMPLATE_TAG_VALUE: &str = "do-not-delete";

const DELETE_RETRIES: u32 = 5;
const DELETE_BACKOFF: Duration = Duration::from_secs(10);

/// The machine-level fields compared between desired and upstream-projected
/// node groups to decide whether a new launch-template version is needed.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MachineFields {
    pub user_data: Option<String>,
    pub ssh_key: Option<String>,
    pub disk_size: i32,
    pub image_id: Option<String>,
    pub instance_type: Option<String>,
    pub resource_tags: HashMap<String, String>,
}

/// Returns the existing managed template id if `status_template_id` still
/// describes successfully, otherwise creates one named
/// `rancher-managed-lt-<display_name>` with a single throwaway version.
pub async fn ensure_managed_template_exists(
    client: &CloudClient,
    display_name: &str,
    status_template_id: Option<&str>,
) -> Result<String> {
    if let Some(id) = status_template_id {
        if client.describe_launch_template(id).await?.is_some() {
            return Ok(id.to_string());
        }
    }

    let name = format!("rancher-managed-lt-{display_name}");
    let data = aws_sdk_ec2::types::RequestLaunchTemplateData::builder().build();
    let mut tags = HashMap::new();
    tags.insert(
        MANAGED_TEMPLATE_TAG_KEY.to_string(),
        MANAGED_TEMPLATE_TAG_VALUE.to_string(),
    );
    client.create_launch_template(&name, data, &tags).await
}

/// True when any machine field the launch template expresses differs
/// between desired and upstream. `instance_type` is only compared for
/// on-demand node groups — spot node groups select from `spotInstanceTypes`
/// instead (§4.4).
fn machine_fields_differ(desired: &MachineFields, upstream: &MachineFields, spot: bool) -> bool {
    desired.user_data != upstream.user_data
        || desired.ssh_key != upstream.ssh_key
        || desired.disk_size != upstream.disk_size
        || desired.image_id != upstream.image_id
        || desired.resource_tags != upstream.resource_tags
        || (!spot && desired.instance_type != upstream.instance_type)
}

/// Creates a new launch-template version if `desired` differs from
/// `upstream` on any machine field. Returns the new version number, or
/// `None` when no new version was required.
pub async fn create_new_version_if_needed(
    client: &CloudClient,
    template_id: &str,
    desired: &MachineFields,
    upstream: &MachineFields,
    spot: bool,
) -> Result<Option<String>> {
    if !machine_fields_differ(desired, upstream, spot) {
        return Ok(None);
    }

    let user_data_b64 = match &desired.user_data {
        Some(raw) => {
            if !looks_like_mime_multipart(raw) {
                return Err(Error::ValidationError(
                    "node group userData must be a MIME multipart/mixed document".into(),
                ));
            }
            Some(base64::engine::general_purpose::STANDARD.encode(raw.as_bytes()))
        }
        None => None,
    };

    let root_device_name = resolve_root_device_name(client, desired.image_id.as_deref()).await?;

    let mut block_device = aws_sdk_ec2::types::LaunchTemplateBlockDeviceMappingRequest::builder()
        .device_name(&root_device_name);
    block_device = block_device.ebs(
        aws_sdk_ec2::types::LaunchTemplateEbsBlockDeviceRequest::builder()
            .volume_size(desired.disk_size)
            .build(),
    );

    let mut builder = aws_sdk_ec2::types::RequestLaunchTemplateData::builder()
        .block_device_mappings(block_device.build());

    if let Some(data) = &user_data_b64 {
        builder = builder.user_data(data);
    }
    if let Some(key) = &desired.ssh_key {
        builder = builder.key_name(key);
    }
    if let Some(image_id) = &desired.image_id {
        builder = builder.image_id(image_id);
    }
    if !spot {
        if let Some(instance_type) = &desired.instance_type {
            if !instance_type.is_empty() {
                builder = builder.instance_type(aws_sdk_ec2::types::InstanceType::from(instance_type.as_str()));
            }
        }
    }

    if !desired.resource_tags.is_empty() {
        let tag_spec = aws_sdk_ec2::types::LaunchTemplateTagSpecificationRequest::builder()
            .resource_type(aws_sdk_ec2::types::ResourceType::Instance)
            .set_tags(Some(
                desired
                    .resource_tags
                    .iter()
                    .map(|(k, v)| aws_sdk_ec2::types::Tag::builder().key(k).value(v).build())
                    .collect(),
            ))
            .build();
        builder = builder.tag_specifications(tag_spec);
    }

    let version = client
        .create_launch_template_version(template_id, builder.build())
        .await?;
    Ok(Some(version))
}

/// Very small MIME sniff: EKS's own bootstrap tooling requires user-data to
/// already be a `multipart/mixed` document so it can append its own part.
fn looks_like_mime_multipart(raw: &str) -> bool {
    raw.contains("Content-Type: multipart/mixed") || raw.contains("MIME-Version: 1.0")
}

async fn resolve_root_device_name(client: &CloudClient, image_id: Option<&str>) -> Result<String> {
    if let Some(id) = image_id {
        if let Some(image) = client.describe_image(id).await? {
            if let Some(name) = image.root_device_name() {
                return Ok(name.to_string());
            }
        }
    }
    Ok("/dev/xvda".to_string())
}

/// Best-effort delete of a batch of template versions, tolerating
/// already-gone versions/templates, with up to 5 retries and a 10s backoff
/// between passes (§4.3).
pub async fn delete_versions(client: &CloudClient, template_id: &str, versions: &[String]) -> Result<()> {
    let mut remaining = versions.to_vec();
    for attempt in 0..DELETE_RETRIES {
        if remaining.is_empty() {
            return Ok(());
        }
        match client.delete_launch_template_versions(template_id, &remaining).await {
            Ok(()) => return Ok(()),
            Err(e) if is_already_gone(&e) => return Ok(()),
            Err(e) if attempt + 1 == DELETE_RETRIES => return Err(e),
            Err(_) => tokio::time::sleep(DELETE_BACKOFF).await,
        }
    }
    Ok(())
}

fn is_already_gone(e: &Error) -> bool {
    let s = e.to_string();
    s.contains("version does not exist") || s.contains("template id does not exist")
}
