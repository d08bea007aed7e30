//! REST client for the job tracker HTTP endpoints.
//!
//! Every request carries the `X-API-KEY` header. Downloads are streamed to
//! disk chunk by chunk so large databases never sit in memory.

use std::path::Path;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT};
use reqwest::multipart::{Form, Part};
use scanny_core::types::{DbId, Percent};
use tokio::io::AsyncWriteExt;

use crate::error::TrackerError;
use crate::JobTracker;

/// Header carrying the tracker API key (`X-API-KEY`).
pub const API_KEY_HEADER: &str = "x-api-key";

/// Multipart field name of the uploaded results archive.
pub const PROD_FIELD: &str = "prod_file";

/// MIME type of the uploaded results archive.
pub const PROD_MIME: &str = "application/gzip";

/// HTTP client for one job tracker.
#[derive(Debug, Clone)]
pub struct TrackerApi {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
}

impl TrackerApi {
    /// Create a client.
    ///
    /// * `api_url` - Base URL including any prefix, e.g.
    ///   `http://127.0.0.1:8000/api`.
    pub fn new(api_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), api_url, api_key)
    }

    /// Create a client reusing an existing [`reqwest::Client`].
    pub fn with_client(
        client: reqwest::Client,
        api_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        let api_url = api_url.into().trim_end_matches('/').to_string();
        Self {
            client,
            api_url,
            api_key: api_key.into(),
        }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_url, path)
    }

    fn headers(&self, accept: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(accept));
        if let Ok(key) = HeaderValue::from_str(&self.api_key) {
            headers.insert(HeaderName::from_static(API_KEY_HEADER), key);
        } else {
            tracing::warn!("API key contains characters not allowed in a header; sending none");
        }
        headers
    }

    async fn patch(&self, path: &str) -> Result<(), TrackerError> {
        let response = self
            .client
            .patch(self.url(path))
            .headers(self.headers("application/json"))
            .send()
            .await?;
        Self::ensure_success(response).await?;
        Ok(())
    }

    async fn download(&self, path: &str, dest: &Path) -> Result<u64, TrackerError> {
        let mut response = self
            .client
            .get(self.url(path))
            .headers(self.headers("*/*"))
            .send()
            .await?;
        response = Self::ensure_success(response).await?;

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| TrackerError::io(dest, e))?;
        let mut written = 0u64;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk)
                .await
                .map_err(|e| TrackerError::io(dest, e))?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(|e| TrackerError::io(dest, e))?;

        tracing::debug!(path, dest = %dest.display(), bytes = written, "Download finished");
        Ok(written)
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or a [`TrackerError::Api`]
    /// containing the status and body text on failure.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, TrackerError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(TrackerError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, TrackerError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl JobTracker for TrackerApi {
    async fn fetch_seqs(&self, scan_id: DbId) -> Result<serde_json::Value, TrackerError> {
        let response = self
            .client
            .get(self.url(&format!("/scans/{scan_id}/seqs")))
            .headers(self.headers("application/json"))
            .send()
            .await?;
        Self::parse_response(response).await
    }

    async fn set_job_running(&self, job_id: DbId) -> Result<(), TrackerError> {
        self.patch(&format!("/jobs/{job_id}/set-run")).await
    }

    async fn increment_progress(
        &self,
        job_id: DbId,
        increment: Percent,
    ) -> Result<(), TrackerError> {
        self.patch(&format!("/jobs/{job_id}/progress/increment/{increment}"))
            .await
    }

    async fn download_hmm(&self, hmm_id: DbId, dest: &Path) -> Result<u64, TrackerError> {
        self.download(&format!("/hmms/{hmm_id}/download"), dest).await
    }

    async fn download_db(&self, db_id: DbId, dest: &Path) -> Result<u64, TrackerError> {
        self.download(&format!("/dbs/{db_id}/download"), dest).await
    }

    async fn upload_prod(
        &self,
        scan_id: DbId,
        archive: &Path,
    ) -> Result<serde_json::Value, TrackerError> {
        let bytes = tokio::fs::read(archive)
            .await
            .map_err(|e| TrackerError::io(archive, e))?;
        let file_name = archive
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "prod.tar.gz".to_string());
        let size = bytes.len();
        let part = Part::bytes(bytes).file_name(file_name).mime_str(PROD_MIME)?;
        let form = Form::new().part(PROD_FIELD, part);

        let response = self
            .client
            .post(self.url(&format!("/scans/{scan_id}/prods/")))
            .headers(self.headers("application/json"))
            .multipart(form)
            .send()
            .await?;
        let body = Self::parse_response(response).await?;
        tracing::info!(scan_id, bytes = size, "Results uploaded");
        Ok(body)
    }
}
