//! HTTP plumbing for the pollers and the location reporter.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, Result};

/// Source of JSON documents, usually `GET <endpoint>`.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, endpoint: &str) -> Result<Value>;
}

/// Body of a location upload.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LocationUpload {
    pub bus_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub speed: f64,
    pub heading: f64,
}

/// Sink for location uploads, usually `POST <endpoint>`.
#[async_trait]
pub trait Upload: Send + Sync {
    /// Sends one upload and returns the acknowledgement body.
    async fn upload(&self, endpoint: &str, payload: &LocationUpload) -> Result<Value>;
}

/// Supplies extra headers (anti-forgery token, auth) for each upload.
pub type HeaderHook = Arc<dyn Fn() -> HeaderMap + Send + Sync>;

#[derive(Clone)]
pub struct HttpClient {
    inner: reqwest::Client,
    headers: Option<HeaderHook>,
}

impl HttpClient {
    /// # Errors
    ///
    /// Returns an error when the underlying client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self> {
        let inner = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { inner, headers: None })
    }

    #[must_use]
    pub fn with_header_hook(mut self, hook: HeaderHook) -> Self {
        self.headers = Some(hook);
        self
    }
}

#[async_trait]
impl Fetch for HttpClient {
    async fn fetch(&self, endpoint: &str) -> Result<Value> {
        let response = self.inner.get(endpoint).send().await?.error_for_status()?;
        let body = response.json::<Value>().await?;
        Ok(body)
    }
}

#[async_trait]
impl Upload for HttpClient {
    async fn upload(&self, endpoint: &str, payload: &LocationUpload) -> Result<Value> {
        let mut request = self.inner.post(endpoint).json(payload);
        if let Some(hook) = &self.headers {
            request = request.headers(hook());
        }

        let response = request.send().await?.error_for_status()?;
        let ack = response.json::<Value>().await?;
        if ack.is_null() {
            return Err(Error::NetworkFailure(format!("empty acknowledgement from {endpoint}")));
        }
        Ok(ack)
    }
}
