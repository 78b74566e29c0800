//! Renewal run orchestration
//!
//! Sequences the components and owns the rollback discipline: a firewall
//! window that was opened is closed exactly once on every exit path, before
//! the run reports its outcome. Gateway installation happens strictly after
//! closure, so installer failures never leave the perimeter exposed.

use std::time::Duration;

use thiserror::Error;
use tracing::{error, info};

use crate::acme::{AcmeAuthority, AcmeOrderDriver, AcmeOrderError, PollingPolicy};
use crate::challenge::{ChallengeChannel, ObjectStore, PublishError};
use crate::firewall::{FirewallApi, FirewallUpdateError, FirewallWindow, DEFAULT_PROPAGATION_WAIT};
use crate::gateway::{GatewayApi, GatewayInstaller, GatewayUpdateError};
use crate::package::{self, CertificatePackage, PackagingError};
use crate::request::RenewalRequest;

/// Any failure a renewal run can end with, tagged by component of origin.
#[derive(Debug, Error)]
pub enum RenewalError {
    #[error(transparent)]
    Firewall(#[from] FirewallUpdateError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error(transparent)]
    Acme(#[from] AcmeOrderError),

    #[error(transparent)]
    Packaging(#[from] PackagingError),

    #[error(transparent)]
    Gateway(#[from] GatewayUpdateError),
}

/// Timing knobs for one run. Defaults match production behavior; tests zero
/// the waits.
#[derive(Debug, Clone)]
pub struct RenewalPolicy {
    pub firewall_propagation_wait: Duration,
    pub polling: PollingPolicy,
}

impl Default for RenewalPolicy {
    fn default() -> Self {
        Self {
            firewall_propagation_wait: DEFAULT_PROPAGATION_WAIT,
            polling: PollingPolicy::default(),
        }
    }
}

/// Outcome of a successful run, for reporting.
#[derive(Debug)]
pub struct RenewalReport {
    pub domain: String,
    pub certificate_slot: String,
    pub chain_length: usize,
    pub not_after: String,
}

/// Drives one complete renewal: firewall window, order, packaging, challenge
/// retraction, window closure, gateway installation.
pub struct RenewalOrchestrator<A, S, F, G>
where
    A: AcmeAuthority,
    S: ObjectStore,
    F: FirewallApi,
    G: GatewayApi,
{
    authority: A,
    store: S,
    firewall: F,
    gateway: G,
    policy: RenewalPolicy,
}

impl<A, S, F, G> RenewalOrchestrator<A, S, F, G>
where
    A: AcmeAuthority,
    S: ObjectStore,
    F: FirewallApi,
    G: GatewayApi,
{
    pub fn new(authority: A, store: S, firewall: F, gateway: G) -> Self {
        Self {
            authority,
            store,
            firewall,
            gateway,
            policy: RenewalPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: RenewalPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Run one renewal to completion.
    pub async fn run(&mut self, request: &RenewalRequest) -> Result<RenewalReport, RenewalError> {
        info!(domain = %request.domain, "starting certificate renewal");

        let channel = ChallengeChannel::new(&self.store, request.storage.clone());
        let window = FirewallWindow::open(
            &self.firewall,
            request.firewall.as_ref(),
            self.policy.firewall_propagation_wait,
        )
        .await?;

        let mut driver = AcmeOrderDriver::new(&mut self.authority, self.policy.polling.clone());
        let outcome = run_validation_phase(&mut driver, request, &channel).await;

        // The proof is retracted whether or not the order succeeded; a stale
        // challenge object is harmless but there is no reason to keep it.
        if let Some(artifact) = driver.published_artifact() {
            channel.retract(artifact).await;
        }

        let package = match outcome {
            Ok(package) => {
                window.close().await?;
                package
            }
            Err(err) => {
                // Best-effort closure; the original failure is what the
                // caller needs to see.
                if let Err(close_err) = window.close().await {
                    error!(
                        error = %close_err,
                        "firewall window could not be closed after failed run"
                    );
                }
                return Err(err);
            }
        };

        let installer = GatewayInstaller::new(&self.gateway);
        installer
            .install(&request.gateway, &package, &request.package_secret)
            .await?;

        let report = RenewalReport {
            domain: request.domain.clone(),
            certificate_slot: request.gateway.certificate_slot.clone(),
            chain_length: package.chain_length,
            not_after: package.not_after.clone(),
        };
        info!(
            domain = %report.domain,
            slot = %report.certificate_slot,
            not_after = %report.not_after,
            "certificate renewal complete"
        );
        Ok(report)
    }
}

/// Everything that must succeed while the firewall window is open.
async fn run_validation_phase<A, S>(
    driver: &mut AcmeOrderDriver<'_, A>,
    request: &RenewalRequest,
    channel: &ChallengeChannel<'_, S>,
) -> Result<CertificatePackage, RenewalError>
where
    A: AcmeAuthority,
    S: ObjectStore,
{
    let issued = driver
        .run(&request.domain, &request.contact_email, channel)
        .await?;
    let package = package::package(&issued, &request.domain, &request.package_secret)?;
    Ok(package)
}
