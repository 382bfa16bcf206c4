use reqwest::{Client as HttpClient, StatusCode};
use std::path::PathBuf;

use crate::error::{AppError, AppResult};

/// Remote home of trained artifacts
///
/// Paths are slash-separated and relative to the store root, e.g.
/// `latest/tfidf_vectorizer.json`.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetches an object, `None` when it does not exist
    async fn get(&self, path: &str) -> AppResult<Option<Vec<u8>>>;

    /// Creates or replaces an object
    async fn put(&self, path: &str, bytes: Vec<u8>) -> AppResult<()>;
}

/// Object store backed by a local directory tree
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> AppResult<PathBuf> {
        if path.split('/').any(|segment| segment == "..") {
            return Err(AppError::InvalidInput(format!("Invalid object path: {}", path)));
        }
        Ok(self.root.join(path))
    }
}

#[async_trait::async_trait]
impl ObjectStore for FsObjectStore {
    async fn get(&self, path: &str) -> AppResult<Option<Vec<u8>>> {
        match tokio::fs::read(self.resolve(path)?).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, path: &str, bytes: Vec<u8>) -> AppResult<()> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(target, bytes).await?;
        Ok(())
    }
}

/// Object store backed by an HTTP blob container authorised with a SAS token
#[derive(Clone)]
pub struct BlobHttpStore {
    http_client: HttpClient,
    account_url: String,
    container: String,
    sas_token: String,
}

impl BlobHttpStore {
    pub fn new(account_url: String, container: String, sas_token: String) -> Self {
        Self {
            http_client: HttpClient::new(),
            account_url,
            container,
            sas_token,
        }
    }

    fn blob_url(&self, path: &str) -> String {
        format!(
            "{}/{}/{}?{}",
            self.account_url.trim_end_matches('/'),
            self.container,
            path.trim_start_matches('/'),
            self.sas_token.trim_start_matches('?')
        )
    }
}

#[async_trait::async_trait]
impl ObjectStore for BlobHttpStore {
    async fn get(&self, path: &str) -> AppResult<Option<Vec<u8>>> {
        let response = self.http_client.get(self.blob_url(path)).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::ExternalApi(format!(
                "Blob download of {} returned status {}: {}",
                path, status, body
            )));
        }

        Ok(Some(response.bytes().await?.to_vec()))
    }

    async fn put(&self, path: &str, bytes: Vec<u8>) -> AppResult<()> {
        let response = self
            .http_client
            .put(self.blob_url(path))
            .header("x-ms-blob-type", "BlockBlob")
            .body(bytes)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::ExternalApi(format!(
                "Blob upload of {} returned status {}: {}",
                path, status, body
            )));
        }
        Ok(())
    }
}
