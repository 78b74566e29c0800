//! HTTP-01 challenge publication over object storage
//!
//! The validation traffic for `http://<domain>/.well-known/acme-challenge/`
//! is redirected to a public object storage container, so publishing a
//! challenge response is a single object write and retracting it is a single
//! delete.

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use crate::request::StorageTarget;

/// Content type the challenge object is served with. The authority follows
/// the redirect and must receive a plain-text body.
pub const CHALLENGE_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Errors from the storage layer while managing challenge objects
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Challenge write failed: {0}")]
    WriteFailed(String),

    #[error("Challenge delete failed: {0}")]
    DeleteFailed(String),
}

/// Object storage capability. Implementations cover the single write/delete
/// pair the challenge lifecycle needs; everything else about the storage
/// account is out of scope.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put_object(
        &self,
        target: &StorageTarget,
        path: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<(), PublishError>;

    async fn delete_object(&self, target: &StorageTarget, path: &str) -> Result<(), PublishError>;
}

/// One HTTP-01 proof: the authority-assigned token and the key authorization
/// derived from it. Published once, retracted once, never reused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeArtifact {
    pub token: String,
    pub content: String,
}

impl ChallengeArtifact {
    /// Well-known path the authority fetches the proof from
    pub fn object_path(&self) -> String {
        format!(".well-known/acme-challenge/{}", self.token)
    }
}

/// Publishes and retracts challenge artifacts in one storage container.
pub struct ChallengeChannel<'a, S: ObjectStore> {
    store: &'a S,
    target: StorageTarget,
}

impl<'a, S: ObjectStore> ChallengeChannel<'a, S> {
    pub fn new(store: &'a S, target: StorageTarget) -> Self {
        Self { store, target }
    }

    /// Write the proof object. Storage failures are fatal for the run.
    pub async fn publish(&self, artifact: &ChallengeArtifact) -> Result<(), PublishError> {
        let path = artifact.object_path();
        debug!(path = %path, "publishing http-01 challenge object");
        self.store
            .put_object(
                &self.target,
                &path,
                artifact.content.as_bytes(),
                CHALLENGE_CONTENT_TYPE,
            )
            .await
    }

    /// Delete the proof object. Best-effort: a stale challenge object is not
    /// a correctness risk once the order is resolved, so failures are logged
    /// and never escalated.
    pub async fn retract(&self, artifact: &ChallengeArtifact) {
        let path = artifact.object_path();
        match self.store.delete_object(&self.target, &path).await {
            Ok(()) => debug!(path = %path, "retracted http-01 challenge object"),
            Err(err) => warn!(path = %path, error = %err, "failed to retract challenge object"),
        }
    }
}
