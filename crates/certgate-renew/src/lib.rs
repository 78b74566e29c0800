//! Certificate renewal orchestration for internet-facing gateways
//!
//! Coordinates an ACME HTTP-01 renewal across the certificate authority, an
//! object-storage challenge responder, a perimeter firewall, and the
//! gateway's certificate slot, with the guarantee that the firewall window
//! opened for validation is closed on every exit path. The external systems
//! are reached through capability traits; concrete clients live in sibling
//! crates.

pub mod acme;
pub mod challenge;
pub mod firewall;
pub mod gateway;
pub mod orchestrator;
pub mod package;
pub mod request;

pub use acme::{AcmeAuthority, AcmeOrderDriver, AcmeOrderError, IssuedOrder, OrderPhase, PollingPolicy};
pub use challenge::{
    ChallengeArtifact, ChallengeChannel, ObjectStore, PublishError, CHALLENGE_CONTENT_TYPE,
};
pub use firewall::{
    FirewallApi, FirewallUpdateError, FirewallWindow, RuleAction, DEFAULT_PROPAGATION_WAIT,
};
pub use gateway::{
    slot_renewal_due, GatewayApi, GatewayConfig, GatewayInstaller, GatewayUpdateError,
};
pub use orchestrator::{RenewalError, RenewalOrchestrator, RenewalPolicy, RenewalReport};
pub use package::{package, CertificatePackage, PackagingError};
pub use request::{FirewallTarget, GatewayTarget, RenewalRequest, StorageTarget};
