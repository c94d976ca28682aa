//! Delivery of capture payloads to a collector

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::payload::{CapturePayload, SavedCapture};

/// Default collector endpoint
pub const DEFAULT_COLLECTOR_URL: &str = "http://localhost:7659";

/// Somewhere finished captures go
#[async_trait]
pub trait Sink: Send + Sync {
    /// Hand over one payload; no retry on failure
    async fn deliver(&self, payload: &CapturePayload) -> Result<()>;

    /// Liveness check, echoing `message`
    async fn ping(&self, message: &str) -> Result<()>;
}

/// Acknowledgement returned by `POST /upload`.
///
/// The stock collector answers with an empty object; other collectors may
/// report where the capture landed.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UploadAck {
    pub json_path: Option<PathBuf>,
    pub image_path: Option<PathBuf>,
}

/// Posts payloads to a running collector server
#[derive(Debug, Clone)]
pub struct HttpCollector {
    client: reqwest::Client,
    base: url::Url,
}

impl HttpCollector {
    /// Client for the collector at `base`.
    ///
    /// Endpoints resolve below the base path, so `http://host/api` posts to
    /// `http://host/api/upload`. Requests carry no timeout.
    pub fn new(base: &str) -> Result<Self> {
        let mut base = url::Url::parse(base)
            .map_err(|e| Error::Collector(format!("invalid collector URL {:?}: {}", base, e)))?;
        if base.cannot_be_a_base() {
            return Err(Error::Collector(format!("invalid collector URL {}", base)));
        }
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let client = reqwest::Client::builder().build()?;
        Ok(Self { client, base })
    }

    pub fn base_url(&self) -> &url::Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> Result<url::Url> {
        self.base
            .join(path)
            .map_err(|e| Error::Collector(format!("bad endpoint {}: {}", path, e)))
    }

    /// Post a payload and return the collector's acknowledgement
    pub async fn upload(&self, payload: &CapturePayload) -> Result<UploadAck> {
        let response = self
            .client
            .post(self.endpoint("upload")?)
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Collector(format!("upload rejected ({}): {}", status, body)));
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl Sink for HttpCollector {
    async fn deliver(&self, payload: &CapturePayload) -> Result<()> {
        let ack = self.upload(payload).await?;
        match ack.json_path {
            Some(path) => tracing::info!("Collector stored capture at {}", path.display()),
            None => tracing::info!("Collector accepted capture of {}", payload.url),
        }
        Ok(())
    }

    async fn ping(&self, message: &str) -> Result<()> {
        let response = self
            .client
            .post(self.endpoint("ping")?)
            .json(&serde_json::json!({ "message": message }))
            .send()
            .await?
            .error_for_status()?;
        let body: serde_json::Value = response.json().await?;
        tracing::info!("Collector answered ping: {}", body);
        Ok(())
    }
}

/// Writes validated captures straight into a dataset directory
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Validate and save under a fresh uuid name
    pub fn store(&self, payload: &CapturePayload) -> Result<SavedCapture> {
        payload.validate()?;
        let name = uuid::Uuid::new_v4().to_string();
        payload.save_to_dir(&self.dir, &name)
    }
}

#[async_trait]
impl Sink for DirectorySink {
    async fn deliver(&self, payload: &CapturePayload) -> Result<()> {
        let this = self.clone();
        let payload = payload.clone();
        let saved = tokio::task::spawn_blocking(move || this.store(&payload))
            .await
            .map_err(|e| Error::Collector(format!("store task failed: {}", e)))??;
        tracing::info!("Saved capture to {}", saved.json_path.display());
        Ok(())
    }

    async fn ping(&self, message: &str) -> Result<()> {
        tracing::info!("Ping ({}): {}", self.dir.display(), message);
        Ok(())
    }
}
