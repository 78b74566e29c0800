//! ACME order progression for one domain
//!
//! `AcmeOrderDriver` owns the order state machine: place the order, publish
//! the HTTP-01 proof, signal readiness, poll the authority until the order
//! leaves `pending`, finalize, and poll again until the certificate chain is
//! downloadable. Protocol framing (JWS, nonces, CSR signing) lives behind
//! the [`AcmeAuthority`] capability.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use crate::challenge::{ChallengeArtifact, ChallengeChannel, ObjectStore};
use crate::orchestrator::RenewalError;

/// ACME protocol errors. All variants are fatal for the current run; the
/// scheduled next run is the retry mechanism.
#[derive(Debug, Error)]
pub enum AcmeOrderError {
    #[error("Directory discovery failed: {0}")]
    Directory(String),

    #[error("Account setup failed: {0}")]
    Account(String),

    #[error("Order creation failed: {0}")]
    Order(String),

    #[error("Authorization failed: {0}")]
    Authorization(String),

    #[error("Challenge failed: {0}")]
    Challenge(String),

    #[error("Order finalization failed: {0}")]
    Finalization(String),

    #[error("Timed out waiting on the authority after {0:?}")]
    PollingTimeout(Duration),
}

/// Order status as reported by the authority
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderPhase {
    Pending,
    Processing,
    Ready,
    Invalid,
    Valid,
}

/// ACME authority capability. One implementation drives one order at a time;
/// every method past [`AcmeAuthority::place_order`] refers to that order.
#[async_trait]
pub trait AcmeAuthority: Send + Sync {
    /// Directory discovery, account registration, order creation and http-01
    /// challenge selection, up to the point where the proof can be published.
    async fn place_order(
        &mut self,
        domain: &str,
        contact_email: &str,
    ) -> Result<ChallengeArtifact, AcmeOrderError>;

    /// Tell the authority the proof is in place and validation may start.
    async fn accept_challenge(&mut self) -> Result<(), AcmeOrderError>;

    /// Re-fetch the order and report its current phase.
    async fn refresh_status(&mut self) -> Result<OrderPhase, AcmeOrderError>;

    /// Submit the CSR. Returns the PEM private key the certificate was
    /// requested for.
    async fn finalize(&mut self) -> Result<String, AcmeOrderError>;

    /// Fetch the issued certificate chain (PEM), or `None` while the
    /// authority is still assembling it.
    async fn certificate(&mut self) -> Result<Option<String>, AcmeOrderError>;
}

/// Polling cadence and the deadline bounding both polling loops.
#[derive(Debug, Clone)]
pub struct PollingPolicy {
    /// Interval between order status checks after challenge acceptance
    pub status_poll_interval: Duration,
    /// Interval between certificate availability checks after finalization
    pub certificate_poll_interval: Duration,
    /// Upper bound for each polling loop; exceeding it aborts the run with
    /// [`AcmeOrderError::PollingTimeout`] instead of blocking on an
    /// authority outage
    pub poll_timeout: Duration,
}

impl Default for PollingPolicy {
    fn default() -> Self {
        Self {
            status_poll_interval: Duration::from_secs(10),
            certificate_poll_interval: Duration::from_secs(15),
            poll_timeout: Duration::from_secs(600),
        }
    }
}

/// Result of a completed order: issued chain, its private key, and the
/// challenge artifact that is still published and awaiting retraction.
#[derive(Debug)]
pub struct IssuedOrder {
    pub chain_pem: String,
    pub key_pem: String,
    pub challenge: ChallengeArtifact,
}

/// Drives one domain's order from creation to issuance.
pub struct AcmeOrderDriver<'a, A: AcmeAuthority> {
    authority: &'a mut A,
    policy: PollingPolicy,
    published: Option<ChallengeArtifact>,
}

impl<'a, A: AcmeAuthority> AcmeOrderDriver<'a, A> {
    pub fn new(authority: &'a mut A, policy: PollingPolicy) -> Self {
        Self {
            authority,
            policy,
            published: None,
        }
    }

    /// The artifact published during [`AcmeOrderDriver::run`], if the run got
    /// that far. The orchestrator retracts it on success and failure alike.
    pub fn published_artifact(&self) -> Option<&ChallengeArtifact> {
        self.published.as_ref()
    }

    /// Run the order to completion.
    pub async fn run<S: ObjectStore>(
        &mut self,
        domain: &str,
        contact_email: &str,
        channel: &ChallengeChannel<'_, S>,
    ) -> Result<IssuedOrder, RenewalError> {
        let artifact = self.authority.place_order(domain, contact_email).await?;
        info!(domain = %domain, token = %artifact.token, "order placed, publishing challenge");

        channel.publish(&artifact).await?;
        self.published = Some(artifact.clone());

        self.authority.accept_challenge().await?;
        debug!(domain = %domain, "challenge accepted, polling order status");

        let deadline = Instant::now() + self.policy.poll_timeout;
        loop {
            if Instant::now() >= deadline {
                return Err(AcmeOrderError::PollingTimeout(self.policy.poll_timeout).into());
            }
            sleep(self.policy.status_poll_interval).await;

            match self.authority.refresh_status().await? {
                OrderPhase::Pending | OrderPhase::Processing => {
                    debug!(domain = %domain, "order not yet validated");
                }
                OrderPhase::Ready | OrderPhase::Valid => break,
                OrderPhase::Invalid => {
                    return Err(AcmeOrderError::Authorization(format!(
                        "authority marked the order for {domain} invalid"
                    ))
                    .into());
                }
            }
        }

        info!(domain = %domain, "order validated, finalizing");
        let key_pem = self.authority.finalize().await?;

        let deadline = Instant::now() + self.policy.poll_timeout;
        let chain_pem = loop {
            if Instant::now() >= deadline {
                return Err(AcmeOrderError::PollingTimeout(self.policy.poll_timeout).into());
            }
            sleep(self.policy.certificate_poll_interval).await;

            if let Some(pem) = self.authority.certificate().await? {
                break pem;
            }
            debug!(domain = %domain, "certificate not yet available");
        };

        info!(domain = %domain, "certificate issued");
        Ok(IssuedOrder {
            chain_pem,
            key_pem,
            challenge: artifact,
        })
    }
}
