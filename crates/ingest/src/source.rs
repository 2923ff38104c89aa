use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;

/// Where raw documents come from. The pipeline only ever asks for bytes
/// by reference; bucket layout and auth live behind this seam.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn fetch(&self, document_ref: &str) -> Result<Vec<u8>>;
}

/// Object store reachable over plain HTTP (MinIO-style path addressing).
pub struct HttpDocumentSource {
    base_url: String,
    client: reqwest::Client,
}

impl HttpDocumentSource {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl DocumentSource for HttpDocumentSource {
    async fn fetch(&self, document_ref: &str) -> Result<Vec<u8>> {
        let url = format!("{}/{}", self.base_url, document_ref.trim_start_matches('/'));

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to send document fetch request")?;

        if !response.status().is_success() {
            anyhow::bail!("Document fetch failed for '{}': {}", document_ref, response.status());
        }

        let bytes = response
            .bytes()
            .await
            .context("Failed to read document body")?;

        Ok(bytes.to_vec())
    }
}

/// Local filesystem source, mostly for development and tests.
pub struct FsDocumentSource {
    root: PathBuf,
}

impl FsDocumentSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl DocumentSource for FsDocumentSource {
    async fn fetch(&self, document_ref: &str) -> Result<Vec<u8>> {
        let path = self.root.join(document_ref);
        tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read document {}", path.display()))
    }
}
