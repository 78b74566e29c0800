//! Blob storage backend for the challenge channel

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use tracing::debug;

use certgate_renew::{ObjectStore, PublishError, StorageTarget};

const STORAGE_API_VERSION: &str = "2021-12-02";

/// Serves the `.well-known/acme-challenge/` container over blob storage.
/// The token must carry a storage data-plane audience.
pub struct AzureBlobStore {
    http: reqwest::Client,
    token: String,
}

impl AzureBlobStore {
    pub fn new(token: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            token,
        }
    }

    fn object_url(target: &StorageTarget, path: &str) -> String {
        format!(
            "https://{}.blob.core.windows.net/{}/{}",
            target.account, target.container, path
        )
    }
}

#[async_trait]
impl ObjectStore for AzureBlobStore {
    async fn put_object(
        &self,
        target: &StorageTarget,
        path: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<(), PublishError> {
        let url = Self::object_url(target, path);
        debug!(url = %url, "uploading challenge blob");

        let response = self
            .http
            .put(&url)
            .bearer_auth(&self.token)
            .header("x-ms-version", STORAGE_API_VERSION)
            .header("x-ms-blob-type", "BlockBlob")
            .header(CONTENT_TYPE, content_type)
            .body(bytes.to_vec())
            .send()
            .await
            .map_err(|e| PublishError::WriteFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PublishError::WriteFailed(format!(
                "{url}: status {status}: {body}"
            )));
        }
        Ok(())
    }

    async fn delete_object(&self, target: &StorageTarget, path: &str) -> Result<(), PublishError> {
        let url = Self::object_url(target, path);
        debug!(url = %url, "deleting challenge blob");

        let response = self
            .http
            .delete(&url)
            .bearer_auth(&self.token)
            .header("x-ms-version", STORAGE_API_VERSION)
            .send()
            .await
            .map_err(|e| PublishError::DeleteFailed(e.to_string()))?;

        let status = response.status();
        // A missing blob means the artifact is already gone
        if !status.is_success() && status.as_u16() != 404 {
            let body = response.text().await.unwrap_or_default();
            return Err(PublishError::DeleteFailed(format!(
                "{url}: status {status}: {body}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_url_layout() {
        let target = StorageTarget {
            account: "challenges".to_string(),
            container: "$web".to_string(),
        };
        assert_eq!(
            AzureBlobStore::object_url(&target, ".well-known/acme-challenge/tok-1"),
            "https://challenges.blob.core.windows.net/$web/.well-known/acme-challenge/tok-1"
        );
    }
}
