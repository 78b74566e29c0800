//! Immutable input for one renewal run
//!
//! A `RenewalRequest` is constructed once at process start (from the CLI
//! config surface) and passed by reference through the whole run. Components
//! never read ambient configuration.

use serde::{Deserialize, Serialize};

/// Everything one renewal run needs to know.
#[derive(Clone, Serialize, Deserialize)]
pub struct RenewalRequest {
    /// Domain the certificate is issued for
    pub domain: String,
    /// Contact email registered with the ACME account
    pub contact_email: String,
    /// Gateway whose certificate slot receives the renewed certificate
    pub gateway: GatewayTarget,
    /// Object storage location serving the HTTP-01 challenge path
    pub storage: StorageTarget,
    /// Perimeter rule to relax during validation. `None` disables firewall
    /// management entirely; partial firewall configuration is
    /// unrepresentable.
    #[serde(default)]
    pub firewall: Option<FirewallTarget>,
    /// Secret protecting the exported certificate package
    pub package_secret: String,
}

impl std::fmt::Debug for RenewalRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenewalRequest")
            .field("domain", &self.domain)
            .field("contact_email", &self.contact_email)
            .field("gateway", &self.gateway)
            .field("storage", &self.storage)
            .field("firewall", &self.firewall)
            .field("package_secret", &"<redacted>")
            .finish()
    }
}

/// Named certificate slot inside a gateway resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayTarget {
    pub resource_group: String,
    pub name: String,
    pub certificate_slot: String,
}

/// Container that serves `/.well-known/acme-challenge/` objects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageTarget {
    pub account: String,
    pub container: String,
}

/// Perimeter rule relaxed for the duration of the validation window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirewallTarget {
    pub resource_group: String,
    /// Rule group (e.g. network security group) containing the rule
    pub group: String,
    /// Name of the rule whose action is toggled
    pub rule: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_parses_without_firewall() {
        let json = r#"{
            "domain": "example.org",
            "contact_email": "admin@example.org",
            "gateway": {
                "resource_group": "prod-rg",
                "name": "edge-gw",
                "certificate_slot": "gateway-https"
            },
            "storage": { "account": "challenges", "container": "$web" },
            "package_secret": "hunter2"
        }"#;

        let request: RenewalRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.domain, "example.org");
        assert!(request.firewall.is_none());
    }

    #[test]
    fn test_request_parses_with_firewall() {
        let json = r#"{
            "domain": "example.org",
            "contact_email": "admin@example.org",
            "gateway": {
                "resource_group": "prod-rg",
                "name": "edge-gw",
                "certificate_slot": "gateway-https"
            },
            "storage": { "account": "challenges", "container": "$web" },
            "firewall": {
                "resource_group": "prod-rg",
                "group": "edge-nsg",
                "rule": "allow-acme-http"
            },
            "package_secret": "hunter2"
        }"#;

        let request: RenewalRequest = serde_json::from_str(json).unwrap();
        let firewall = request.firewall.expect("firewall target");
        assert_eq!(firewall.rule, "allow-acme-http");
    }

    #[test]
    fn test_debug_redacts_package_secret() {
        let request = RenewalRequest {
            domain: "example.org".to_string(),
            contact_email: "admin@example.org".to_string(),
            gateway: GatewayTarget {
                resource_group: "rg".to_string(),
                name: "gw".to_string(),
                certificate_slot: "slot".to_string(),
            },
            storage: StorageTarget {
                account: "acct".to_string(),
                container: "web".to_string(),
            },
            firewall: None,
            package_secret: "hunter2".to_string(),
        };

        let debug = format!("{:?}", request);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("<redacted>"));
    }
}
