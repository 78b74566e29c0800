//! Azure adapters for the renewal core's cloud capabilities
//!
//! Thin REST clients over the three resource families a renewal touches:
//! blob storage (challenge objects), network security group rules (the
//! perimeter firewall), and the application gateway (certificate slots).
//! Authentication uses a caller-supplied bearer token; acquiring one is the
//! operator's concern, not this crate's.

pub mod blob;
pub mod gateway;
pub mod network;

pub use blob::AzureBlobStore;
pub use gateway::AzureApplicationGateway;
pub use network::AzureNsgFirewall;

use thiserror::Error;

pub(crate) const ARM_BASE: &str = "https://management.azure.com";
pub(crate) const NETWORK_API_VERSION: &str = "2023-09-01";

/// Low-level failure talking to the ARM control plane
#[derive(Debug, Error)]
pub(crate) enum ArmError {
    #[error("resource not found")]
    NotFound,

    #[error("request failed: {0}")]
    Request(String),

    #[error("unexpected status {code}: {body}")]
    Status { code: u16, body: String },
}

/// Shared ARM control-plane client: one subscription, one bearer token.
#[derive(Clone)]
pub struct ArmClient {
    pub(crate) http: reqwest::Client,
    pub(crate) token: String,
    pub(crate) subscription: String,
}

impl ArmClient {
    pub fn new(token: String, subscription: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            token,
            subscription,
        }
    }

    pub(crate) async fn get_json(&self, url: &str) -> Result<serde_json::Value, ArmError> {
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| ArmError::Request(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 404 {
            return Err(ArmError::NotFound);
        }
        let body = response
            .text()
            .await
            .map_err(|e| ArmError::Request(e.to_string()))?;
        if !status.is_success() {
            return Err(ArmError::Status {
                code: status.as_u16(),
                body,
            });
        }
        serde_json::from_str(&body).map_err(|e| ArmError::Request(e.to_string()))
    }

    pub(crate) async fn put_json(
        &self,
        url: &str,
        document: &serde_json::Value,
    ) -> Result<(), ArmError> {
        let response = self
            .http
            .put(url)
            .bearer_auth(&self.token)
            .json(document)
            .send()
            .await
            .map_err(|e| ArmError::Request(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 404 {
            return Err(ArmError::NotFound);
        }
        if !status.is_success() {
            let body = response
                .text()
                .await
                .map_err(|e| ArmError::Request(e.to_string()))?;
            return Err(ArmError::Status {
                code: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}
