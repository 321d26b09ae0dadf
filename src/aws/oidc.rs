//! OIDC provider + IAM role + add-on enablement (§4.6)
//!
//! Implements the EBS CSI driver bring-up sequence: register (or reuse) an
//! IAM OIDC provider for the cluster's issuer, apply the IRSA role stack,
//! then call `createAddon`.

use std::collections::HashMap;
use std::sync::Arc;

use aws_sdk_cloudformation::types::Capability;
use sha1::{Digest, Sha1};
use tokio::net::TcpStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};

use crate::aws::arn::RegionContext;
use crate::aws::client::CloudClient;
use crate::aws::stack;
use crate::aws::templates::EBS_CSI_DRIVER_ROLE_TEMPLATE;
use crate::error::{Error, Result};

const EBS_CSI_ADDON_NAME: &str = "aws-ebs-csi-driver";

/// Ensures an OIDC provider exists for `issuer_url`, then runs the IRSA role
/// stack + `createAddon` call for the EBS CSI driver (§4.6 steps 1-4).
pub async fn enable_ebs_csi_driver(
    client: &CloudClient,
    region_ctx: &RegionContext,
    cluster_name: &str,
    display_name: &str,
    issuer_url: &str,
    addon_version: Option<&str>,
) -> Result<()> {
    let provider_id = parse_provider_id(issuer_url)?;

    let existing = client
        .list_oidc_providers()
        .await?
        .into_iter()
        .find(|p| p.arn().is_some_and(|arn| arn.contains(&provider_id)));

    if existing.is_none() {
        let thumbprint = fetch_root_thumbprint(issuer_url).await?;
        client
            .create_oidc_provider(issuer_url, &region_ctx.sts_audience(), &thumbprint)
            .await?;
    }

    let mut params = HashMap::new();
    params.insert("ClusterName".to_string(), display_name.to_string());
    params.insert("Region".to_string(), region_ctx.region.clone());
    params.insert("OidcProviderId".to_string(), provider_id);
    params.insert("DnsSuffix".to_string(), region_ctx.dns_suffix().to_string());
    params.insert("ArnPrefix".to_string(), region_ctx.arn_prefix().to_string());

    let stack_name = format!("eks-ebs-csi-driver-role-{display_name}");
    let outputs = stack::apply_stack(
        client,
        &stack_name,
        EBS_CSI_DRIVER_ROLE_TEMPLATE,
        &[Capability::CapabilityNamedIam],
        &params,
    )
    .await?;
    let role_arn = outputs
        .get("EBSCSIDriverRole")
        .ok_or_else(|| Error::StackError("stack did not produce EBSCSIDriverRole output".into()))?;

    client
        .create_addon(cluster_name, EBS_CSI_ADDON_NAME, addon_version, role_arn)
        .await
}

/// The provider id is the last path segment of the issuer URL.
fn parse_provider_id(issuer_url: &str) -> Result<String> {
    issuer_url
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| Error::OidcError(format!("cannot parse provider id from issuer url {issuer_url}")))
}

/// Connects to the issuer's TLS endpoint, takes the last certificate in the
/// presented chain (the root), and returns the lowercase-hex SHA-1 of its
/// DER bytes.
async fn fetch_root_thumbprint(issuer_url: &str) -> Result<String> {
    let host = issuer_url
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .split('/')
        .next()
        .unwrap_or_default();
    let (hostname, port) = match host.split_once(':') {
        Some((h, p)) => (h.to_string(), p.parse().unwrap_or(443)),
        None => (host.to_string(), 443u16),
    };

    let config = ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyVerifier))
        .with_no_client_auth();
    let connector = tokio_rustls::TlsConnector::from(Arc::new(config));

    let server_name = ServerName::try_from(hostname.clone())
        .map_err(|e| Error::OidcError(format!("invalid OIDC issuer hostname {hostname}: {e}")))?;

    let tcp = TcpStream::connect((hostname.as_str(), port))
        .await
        .map_err(|e| Error::OidcError(format!("connecting to OIDC issuer {issuer_url}: {e}")))?;
    let tls = connector
        .connect(server_name, tcp)
        .await
        .map_err(|e| Error::OidcError(format!("TLS handshake with OIDC issuer {issuer_url}: {e}")))?;

    let (_, session) = tls.get_ref();
    let chain = session
        .peer_certificates()
        .ok_or_else(|| Error::OidcError("OIDC issuer presented no certificate chain".into()))?;
    let root = chain
        .last()
        .ok_or_else(|| Error::OidcError("OIDC issuer certificate chain was empty".into()))?;

    let mut hasher = Sha1::new();
    hasher.update(root.as_ref());
    Ok(hex::encode(hasher.finalize()))
}

/// Thumbprinting needs the chain the issuer actually presents, not a chain
/// validated against a trust store, so certificate verification is
/// deliberately skipped here.
#[derive(Debug)]
struct AcceptAnyVerifier;

impl tokio_rustls::rustls::client::danger::ServerCertVerifier for AcceptAnyVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &tokio_rustls::rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[tokio_rustls::rustls::pki_types::CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: tokio_rustls::rustls::pki_types::UnixTime,
    ) -> std::result::Result<
        tokio_rustls::rustls::client::danger::ServerCertVerified,
        tokio_rustls::rustls::Error,
    > {
        Ok(tokio_rustls::rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &tokio_rustls::rustls::pki_types::CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<
        tokio_rustls::rustls::client::danger::HandshakeSignatureValid,
        tokio_rustls::rustls::Error,
    > {
        Ok(tokio_rustls::rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &tokio_rustls::rustls::pki_types::CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<
        tokio_rustls::rustls::client::danger::HandshakeSignatureValid,
        tokio_rustls::rustls::Error,
    > {
        Ok(tokio_rustls::rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ED25519,
            SignatureScheme::RSA_PSS_SHA256,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_provider_id_from_issuer_url() {
        let id = parse_provider_id("https://oidc.eks.us-east-1.amazonaws.com/id/ABCDEF123456").unwrap();
        assert_eq!(id, "ABCDEF123456");
    }

    #[test]
    fn parses_provider_id_with_trailing_slash() {
        let id = parse_provider_id("https://oidc.eks.us-east-1.amazonaws.com/id/ABCDEF123456/").unwrap();
        assert_eq!(id, "ABCDEF123456");
    }
}
