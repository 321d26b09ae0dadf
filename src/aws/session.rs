//! Per-reconcile AWS session construction (§6, §9 "credential staleness")
//!
//! Sessions are built fresh every reconcile from the credential secret and
//! never cached, so rotating credentials in the secret takes effect on the
//! very next reconcile without restarting the operator.

use k8s_openapi::api::core::v1::Secret;
use kube::api::Api;

use crate::aws::client::CloudClient;
use crate::error::{Error, Result};

const ACCESS_KEY_FIELD: &str = "amazonec2credentialConfig-accessKey";
const SECRET_KEY_FIELD: &str = "amazonec2credentialConfig-secretKey";

/// Resolves `spec.credentialRef` (`"namespace:name"`, namespace optional —
/// defaults to the ClusterConfig's own namespace) and builds a session for
/// `region`.
pub async fn build_client(
    k8s_client: &kube::Client,
    default_namespace: &str,
    credential_ref: &str,
    region: &str,
) -> Result<CloudClient> {
    let (namespace, name) = match credential_ref.split_once(':') {
        Some((ns, name)) => (ns, name),
        None => (default_namespace, credential_ref),
    };

    let secrets: Api<Secret> = Api::namespaced(k8s_client.clone(), namespace);
    let secret = secrets
        .get(name)
        .await
        .map_err(|e| Error::CredentialError(format!("fetching credential secret {namespace}/{name}: {e}")))?;

    let data = secret
        .data
        .ok_or_else(|| Error::CredentialError(format!("credential secret {namespace}/{name} has no data")))?;

    let access_key = decode_field(&data, ACCESS_KEY_FIELD, namespace, name)?;
    let secret_key = decode_field(&data, SECRET_KEY_FIELD, namespace, name)?;

    Ok(CloudClient::new(region.to_string(), &access_key, &secret_key).await)
}

fn decode_field(
    data: &std::collections::BTreeMap<String, k8s_openapi::ByteString>,
    field: &str,
    namespace: &str,
    name: &str,
) -> Result<String> {
    let bytes = data
        .get(field)
        .ok_or_else(|| Error::CredentialError(format!("credential secret {namespace}/{name} missing {field}")))?;
    String::from_utf8(bytes.0.clone())
        .map_err(|_| Error::CredentialError(format!("credential secret {namespace}/{name} field {field} is not valid utf-8")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_ref_without_namespace_falls_back_to_default() {
        let credential_ref = "my-secret";
        let (namespace, name) = match credential_ref.split_once(':') {
            Some((ns, name)) => (ns, name),
            None => ("eks-operator-system", credential_ref),
        };
        assert_eq!(namespace, "eks-operator-system");
        assert_eq!(name, "my-secret");
    }

    #[test]
    fn credential_ref_with_namespace_splits_on_colon() {
        let credential_ref = "other-ns:my-secret";
        let (namespace, name) = credential_ref.split_once(':').unwrap();
        assert_eq!(namespace, "other-ns");
        assert_eq!(name, "my-secret");
    }
}
