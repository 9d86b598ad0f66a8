//! HTTP implementation of the remote job client.
//!
//! `POST {api_url}` with a `CalculationRequest` body answers `{"job_id": ...}`.
//! `GET {api_url}/{job_id}` answers a `StatusReport`.
//!
//! Status failures split two ways: connection problems, timeouts and 5xx
//! are `RemoteStatus` (worth polling again); 4xx and unreadable bodies are
//! `RemoteRejected` (the answer will not change).

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use tracing::debug;

use crate::client::{RemoteJobClient, StatusReport};
use crate::request::CalculationRequest;
use moluni_core::{Error, RemoteConfig, Result};

pub struct HttpJobClient {
    client: Client,
    config: RemoteConfig,
}

impl HttpJobClient {
    pub fn new(config: RemoteConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::Config(format!("HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &RemoteConfig {
        &self.config
    }

    fn status_url(&self, job_id: &str) -> String {
        format!("{}/{}", self.config.api_url.trim_end_matches('/'), job_id)
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.config.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }
}

/// Job ids come back as strings from most deployments, numbers from some.
fn extract_job_id(body: &serde_json::Value) -> Option<String> {
    match body.get("job_id")? {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[async_trait]
impl RemoteJobClient for HttpJobClient {
    async fn submit(&self, request: &CalculationRequest) -> Result<String> {
        debug!(
            "Submitting {} ({}) to {}",
            request.metadata.smiles, request.calculation.kind, self.config.api_url
        );
        let response = self
            .authorize(self.client.post(&self.config.api_url))
            .json(request)
            .send()
            .await
            .map_err(|e| Error::Submission(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Submission(format!("API error {}: {}", status, body)));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::Submission(format!("Invalid response body: {}", e)))?;
        extract_job_id(&body)
            .ok_or_else(|| Error::Submission(format!("Response has no job_id: {}", body)))
    }

    async fn status(&self, job_id: &str) -> Result<StatusReport> {
        let url = self.status_url(job_id);
        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(|e| transport_error(job_id, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let msg = format!("{}: API error {}: {}", job_id, status, body);
            return Err(if is_definitive(status) {
                Error::RemoteRejected(msg)
            } else {
                Error::RemoteStatus(msg)
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| transport_error(job_id, e))?;
        serde_json::from_slice::<StatusReport>(&body).map_err(|e| {
            Error::RemoteRejected(format!("{}: invalid status body: {}", job_id, e))
        })
    }
}

fn transport_error(job_id: &str, e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::RemoteStatus(format!("{}: timed out", job_id))
    } else {
        Error::RemoteStatus(format!("{}: request failed: {}", job_id, e))
    }
}

/// Client errors are final, except the two that ask the caller to come back.
fn is_definitive(status: StatusCode) -> bool {
    status.is_client_error()
        && status != StatusCode::REQUEST_TIMEOUT
        && status != StatusCode::TOO_MANY_REQUESTS
}
