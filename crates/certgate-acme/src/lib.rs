//! Let's Encrypt authority backed by `instant-acme`
//!
//! Implements the `AcmeAuthority` capability for RFC 8555 directories. All
//! protocol framing (JWS signing, nonce handling, CSR generation) is
//! delegated to `instant-acme`; this crate only maps the client's calls and
//! failures onto the renewal core's order state machine.

use async_trait::async_trait;
use instant_acme::{
    Account, AuthorizationStatus, ChallengeType, Identifier, LetsEncrypt, NewAccount, NewOrder,
    Order, OrderStatus,
};
use tracing::{debug, info, warn};

use certgate_renew::{AcmeAuthority, AcmeOrderError, ChallengeArtifact, OrderPhase};

/// One ACME order against a Let's Encrypt style directory. Holds the
/// account and order for the duration of a run; nothing is persisted across
/// runs (a fresh account is registered each time).
pub struct LetsEncryptAuthority {
    directory_url: String,
    order: Option<Order>,
}

impl LetsEncryptAuthority {
    /// Authority against the Let's Encrypt production directory.
    pub fn production() -> Self {
        Self::with_directory(LetsEncrypt::Production.url().to_string())
    }

    /// Authority against the Let's Encrypt staging directory (for testing;
    /// issues untrusted certificates without production rate limits).
    pub fn staging() -> Self {
        Self::with_directory(LetsEncrypt::Staging.url().to_string())
    }

    /// Authority against an arbitrary ACME directory URL (e.g. a local
    /// Pebble instance).
    pub fn with_directory(directory_url: String) -> Self {
        Self {
            directory_url,
            order: None,
        }
    }

    fn active_order(&mut self) -> Result<&mut Order, AcmeOrderError> {
        self.order
            .as_mut()
            .ok_or_else(|| AcmeOrderError::Order("no active order".to_string()))
    }
}

#[async_trait]
impl AcmeAuthority for LetsEncryptAuthority {
    async fn place_order(
        &mut self,
        domain: &str,
        contact_email: &str,
    ) -> Result<ChallengeArtifact, AcmeOrderError> {
        let builder =
            Account::builder().map_err(|e| AcmeOrderError::Directory(e.to_string()))?;
        let contact = format!("mailto:{contact_email}");
        let (account, _credentials) = builder
            .create(
                &NewAccount {
                    contact: &[&contact],
                    terms_of_service_agreed: true,
                    only_return_existing: false,
                },
                self.directory_url.clone(),
                None,
            )
            .await
            .map_err(|e| AcmeOrderError::Account(e.to_string()))?;
        info!(directory = %self.directory_url, "acme account registered");

        let identifiers = [Identifier::Dns(domain.to_string())];
        let mut order = account
            .new_order(&NewOrder::new(&identifiers))
            .await
            .map_err(|e| AcmeOrderError::Order(e.to_string()))?;

        let artifact = {
            let mut authorizations = order.authorizations();
            let mut found = None;
            while let Some(result) = authorizations.next().await {
                let mut authorization =
                    result.map_err(|e| AcmeOrderError::Authorization(e.to_string()))?;
                match authorization.status {
                    AuthorizationStatus::Valid => {
                        debug!(domain = %domain, "authorization already valid");
                        continue;
                    }
                    AuthorizationStatus::Pending => {
                        let challenge = authorization
                            .challenge(ChallengeType::Http01)
                            .ok_or_else(|| {
                                AcmeOrderError::Challenge(
                                    "authority offered no http-01 challenge".to_string(),
                                )
                            })?;
                        let key_authorization = challenge.key_authorization();
                        found = Some(ChallengeArtifact {
                            token: challenge.token.clone(),
                            content: key_authorization.as_str().to_string(),
                        });
                        break;
                    }
                    status => {
                        return Err(AcmeOrderError::Authorization(format!(
                            "unexpected authorization status {status:?}"
                        )));
                    }
                }
            }
            found.ok_or_else(|| {
                AcmeOrderError::Authorization("order contained no pending authorization".to_string())
            })?
        };

        self.order = Some(order);
        Ok(artifact)
    }

    async fn accept_challenge(&mut self) -> Result<(), AcmeOrderError> {
        let order = self.active_order()?;
        let mut authorizations = order.authorizations();
        while let Some(result) = authorizations.next().await {
            let mut authorization =
                result.map_err(|e| AcmeOrderError::Authorization(e.to_string()))?;
            if !matches!(authorization.status, AuthorizationStatus::Pending) {
                continue;
            }
            let mut challenge = authorization
                .challenge(ChallengeType::Http01)
                .ok_or_else(|| {
                    AcmeOrderError::Challenge("authority offered no http-01 challenge".to_string())
                })?;
            challenge
                .set_ready()
                .await
                .map_err(|e| AcmeOrderError::Challenge(e.to_string()))?;
            return Ok(());
        }
        Err(AcmeOrderError::Challenge(
            "no pending authorization left to signal".to_string(),
        ))
    }

    async fn refresh_status(&mut self) -> Result<OrderPhase, AcmeOrderError> {
        let order = self.active_order()?;
        let state = order
            .refresh()
            .await
            .map_err(|e| AcmeOrderError::Order(e.to_string()))?;
        Ok(match state.status {
            OrderStatus::Pending => OrderPhase::Pending,
            OrderStatus::Processing => OrderPhase::Processing,
            OrderStatus::Ready => OrderPhase::Ready,
            OrderStatus::Invalid => OrderPhase::Invalid,
            OrderStatus::Valid => OrderPhase::Valid,
        })
    }

    async fn finalize(&mut self) -> Result<String, AcmeOrderError> {
        let order = self.active_order()?;
        let key_pem = order
            .finalize()
            .await
            .map_err(|e| AcmeOrderError::Finalization(e.to_string()))?;
        Ok(key_pem)
    }

    async fn certificate(&mut self) -> Result<Option<String>, AcmeOrderError> {
        let order = self.active_order()?;
        match order.certificate().await {
            Ok(chain) => Ok(chain),
            Err(e) => {
                // Transient download failures are retried by the driver's
                // polling loop until its deadline expires
                warn!(error = %e, "certificate download attempt failed");
                Ok(None)
            }
        }
    }
}
