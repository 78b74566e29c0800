//! Network security group rule backend for the firewall window

use async_trait::async_trait;
use tracing::debug;

use certgate_renew::{FirewallApi, FirewallTarget, FirewallUpdateError, RuleAction};

use crate::{ArmClient, ArmError, ARM_BASE, NETWORK_API_VERSION};

/// Toggles one security rule between Allow and Deny. Rule updates are
/// whole-rule PUTs, so the current rule body is fetched and written back
/// with only the access field changed.
pub struct AzureNsgFirewall {
    arm: ArmClient,
}

impl AzureNsgFirewall {
    pub fn new(arm: ArmClient) -> Self {
        Self { arm }
    }

    fn rule_url(&self, target: &FirewallTarget) -> String {
        format!(
            "{ARM_BASE}/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Network/networkSecurityGroups/{}/securityRules/{}?api-version={NETWORK_API_VERSION}",
            self.arm.subscription, target.resource_group, target.group, target.rule
        )
    }
}

fn map_error(err: ArmError, target: &FirewallTarget) -> FirewallUpdateError {
    match err {
        ArmError::NotFound => {
            FirewallUpdateError::RuleNotFound(format!("{}/{}", target.group, target.rule))
        }
        other => FirewallUpdateError::Api(other.to_string()),
    }
}

fn parse_access(document: &serde_json::Value) -> Result<RuleAction, FirewallUpdateError> {
    let access = document
        .pointer("/properties/access")
        .and_then(|v| v.as_str())
        .ok_or_else(|| {
            FirewallUpdateError::Api("security rule has no properties.access field".to_string())
        })?;
    match access {
        a if a.eq_ignore_ascii_case("allow") => Ok(RuleAction::Allow),
        a if a.eq_ignore_ascii_case("deny") => Ok(RuleAction::Deny),
        other => Err(FirewallUpdateError::Api(format!(
            "unexpected access value: {other}"
        ))),
    }
}

#[async_trait]
impl FirewallApi for AzureNsgFirewall {
    async fn rule_action(&self, target: &FirewallTarget) -> Result<RuleAction, FirewallUpdateError> {
        let document = self
            .arm
            .get_json(&self.rule_url(target))
            .await
            .map_err(|e| map_error(e, target))?;
        parse_access(&document)
    }

    async fn set_rule_action(
        &self,
        target: &FirewallTarget,
        action: RuleAction,
    ) -> Result<(), FirewallUpdateError> {
        let url = self.rule_url(target);
        let mut document = self
            .arm
            .get_json(&url)
            .await
            .map_err(|e| map_error(e, target))?;

        let access = match action {
            RuleAction::Allow => "Allow",
            RuleAction::Deny => "Deny",
        };
        let properties = document
            .pointer_mut("/properties")
            .and_then(|v| v.as_object_mut())
            .ok_or_else(|| {
                FirewallUpdateError::Api("security rule document has no properties".to_string())
            })?;
        properties.insert(
            "access".to_string(),
            serde_json::Value::String(access.to_string()),
        );

        debug!(rule = %target.rule, access = %access, "updating security rule");
        self.arm
            .put_json(&url, &document)
            .await
            .map_err(|e| map_error(e, target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_access() {
        let doc = json!({ "properties": { "access": "Allow" } });
        assert_eq!(parse_access(&doc).unwrap(), RuleAction::Allow);

        let doc = json!({ "properties": { "access": "deny" } });
        assert_eq!(parse_access(&doc).unwrap(), RuleAction::Deny);

        let doc = json!({ "properties": {} });
        assert!(parse_access(&doc).is_err());
    }

    #[test]
    fn test_rule_url_layout() {
        let firewall = AzureNsgFirewall::new(ArmClient::new(
            "token".to_string(),
            "sub-id".to_string(),
        ));
        let target = FirewallTarget {
            resource_group: "prod-rg".to_string(),
            group: "edge-nsg".to_string(),
            rule: "allow-acme-http".to_string(),
        };
        let url = firewall.rule_url(&target);
        assert!(url.starts_with(
            "https://management.azure.com/subscriptions/sub-id/resourceGroups/prod-rg"
        ));
        assert!(url.contains("networkSecurityGroups/edge-nsg/securityRules/allow-acme-http"));
    }
}
