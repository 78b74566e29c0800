//! Application gateway backend for certificate slot installation

use async_trait::async_trait;
use tracing::debug;

use certgate_renew::{GatewayApi, GatewayConfig, GatewayTarget, GatewayUpdateError};

use crate::{ArmClient, ArmError, ARM_BASE, NETWORK_API_VERSION};

/// Whole-resource reader/writer for one application gateway. Slot surgery
/// happens in the renewal core; this client only moves the document.
pub struct AzureApplicationGateway {
    arm: ArmClient,
}

impl AzureApplicationGateway {
    pub fn new(arm: ArmClient) -> Self {
        Self { arm }
    }

    fn gateway_url(&self, target: &GatewayTarget) -> String {
        format!(
            "{ARM_BASE}/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Network/applicationGateways/{}?api-version={NETWORK_API_VERSION}",
            self.arm.subscription, target.resource_group, target.name
        )
    }
}

fn map_error(err: ArmError, target: &GatewayTarget) -> GatewayUpdateError {
    match err {
        ArmError::NotFound => {
            GatewayUpdateError::Api(format!("application gateway {} not found", target.name))
        }
        other => GatewayUpdateError::Api(other.to_string()),
    }
}

#[async_trait]
impl GatewayApi for AzureApplicationGateway {
    async fn fetch_config(&self, target: &GatewayTarget) -> Result<GatewayConfig, GatewayUpdateError> {
        debug!(gateway = %target.name, "fetching gateway configuration");
        let document = self
            .arm
            .get_json(&self.gateway_url(target))
            .await
            .map_err(|e| map_error(e, target))?;
        Ok(GatewayConfig { document })
    }

    async fn apply_config(
        &self,
        target: &GatewayTarget,
        config: GatewayConfig,
    ) -> Result<(), GatewayUpdateError> {
        debug!(gateway = %target.name, "applying gateway configuration");
        self.arm
            .put_json(&self.gateway_url(target), &config.document)
            .await
            .map_err(|e| map_error(e, target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_url_layout() {
        let gateway = AzureApplicationGateway::new(ArmClient::new(
            "token".to_string(),
            "sub-id".to_string(),
        ));
        let target = GatewayTarget {
            resource_group: "prod-rg".to_string(),
            name: "edge-gw".to_string(),
            certificate_slot: "gateway-https".to_string(),
        };
        let url = gateway.gateway_url(&target);
        assert!(url.contains("/resourceGroups/prod-rg/"));
        assert!(url.contains("applicationGateways/edge-gw?api-version="));
    }
}
