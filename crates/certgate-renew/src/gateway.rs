//! Gateway certificate slot installation
//!
//! The gateway exposes no partial-update API for certificate slots: the full
//! configuration document is fetched, the one slot is rewritten in place, and
//! the whole document is written back. Installation runs only after the
//! firewall window has been closed, so a failure here leaves the perimeter
//! closed and the previous certificate serving.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use openssl::asn1::Asn1Time;
use openssl::x509::X509;
use thiserror::Error;
use tracing::info;

use crate::package::CertificatePackage;
use crate::request::GatewayTarget;

/// Errors from gateway configuration management
#[derive(Debug, Error)]
pub enum GatewayUpdateError {
    #[error("Certificate slot not found in gateway configuration: {0}")]
    SlotNotFound(String),

    #[error("Gateway configuration is malformed: {0}")]
    MalformedConfig(String),

    #[error("Gateway API error: {0}")]
    Api(String),
}

/// Full gateway configuration document. Opaque to the capability; the
/// installer mutates the certificate slot inside it.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub document: serde_json::Value,
}

/// Gateway capability: whole-resource read and write.
#[async_trait]
pub trait GatewayApi: Send + Sync {
    async fn fetch_config(&self, target: &GatewayTarget) -> Result<GatewayConfig, GatewayUpdateError>;

    async fn apply_config(
        &self,
        target: &GatewayTarget,
        config: GatewayConfig,
    ) -> Result<(), GatewayUpdateError>;
}

/// Swaps the contents of one named certificate slot.
pub struct GatewayInstaller<'a, G: GatewayApi> {
    api: &'a G,
}

impl<'a, G: GatewayApi> GatewayInstaller<'a, G> {
    pub fn new(api: &'a G) -> Self {
        Self { api }
    }

    /// Read-modify-write the gateway configuration, replacing the slot's
    /// package data and secret.
    pub async fn install(
        &self,
        target: &GatewayTarget,
        package: &CertificatePackage,
        secret: &str,
    ) -> Result<(), GatewayUpdateError> {
        let mut config = self.api.fetch_config(target).await?;
        set_slot(&mut config, &target.certificate_slot, package, secret)?;
        self.api.apply_config(target, config).await?;
        info!(
            gateway = %target.name,
            slot = %target.certificate_slot,
            "renewed certificate installed"
        );
        Ok(())
    }
}

/// Replace the named slot's `data`/`password` pair inside the document.
fn set_slot(
    config: &mut GatewayConfig,
    slot: &str,
    package: &CertificatePackage,
    secret: &str,
) -> Result<(), GatewayUpdateError> {
    let slots = config
        .document
        .pointer_mut("/properties/sslCertificates")
        .and_then(|v| v.as_array_mut())
        .ok_or_else(|| {
            GatewayUpdateError::MalformedConfig(
                "document has no properties.sslCertificates array".to_string(),
            )
        })?;

    let entry = slots
        .iter_mut()
        .find(|e| e.get("name").and_then(|n| n.as_str()) == Some(slot))
        .ok_or_else(|| GatewayUpdateError::SlotNotFound(slot.to_string()))?;

    let properties = entry
        .as_object_mut()
        .ok_or_else(|| {
            GatewayUpdateError::MalformedConfig(format!("slot {slot} is not an object"))
        })?
        .entry("properties")
        .or_insert_with(|| serde_json::json!({}));
    let properties = properties.as_object_mut().ok_or_else(|| {
        GatewayUpdateError::MalformedConfig(format!("slot {slot} properties is not an object"))
    })?;

    properties.insert(
        "data".to_string(),
        serde_json::Value::String(BASE64.encode(&package.der)),
    );
    properties.insert(
        "password".to_string(),
        serde_json::Value::String(secret.to_string()),
    );
    Ok(())
}

/// Whether the certificate currently in the slot expires within
/// `within_days`. `None` when the slot exposes no public certificate data
/// (e.g. a slot that was never populated), in which case renewal should
/// proceed.
pub fn slot_renewal_due(
    config: &GatewayConfig,
    slot: &str,
    within_days: u32,
) -> Result<Option<bool>, GatewayUpdateError> {
    let slots = config
        .document
        .pointer("/properties/sslCertificates")
        .and_then(|v| v.as_array())
        .ok_or_else(|| {
            GatewayUpdateError::MalformedConfig(
                "document has no properties.sslCertificates array".to_string(),
            )
        })?;
    let entry = slots
        .iter()
        .find(|e| e.get("name").and_then(|n| n.as_str()) == Some(slot))
        .ok_or_else(|| GatewayUpdateError::SlotNotFound(slot.to_string()))?;

    let Some(data) = entry
        .pointer("/properties/publicCertData")
        .and_then(|v| v.as_str())
    else {
        return Ok(None);
    };

    let der = BASE64
        .decode(data)
        .map_err(|e| GatewayUpdateError::MalformedConfig(format!("publicCertData: {e}")))?;
    let cert = X509::from_der(&der)
        .or_else(|_| X509::from_pem(&der))
        .map_err(|e| GatewayUpdateError::MalformedConfig(format!("publicCertData: {e}")))?;

    let horizon = Asn1Time::days_from_now(within_days)
        .map_err(|e| GatewayUpdateError::Api(e.to_string()))?;
    let remaining = cert
        .not_after()
        .diff(&horizon)
        .map_err(|e| GatewayUpdateError::MalformedConfig(format!("notAfter: {e}")))?;

    // diff is horizon minus notAfter: positive means expiry inside horizon
    Ok(Some(remaining.days > 0 || (remaining.days == 0 && remaining.secs > 0)))
}
