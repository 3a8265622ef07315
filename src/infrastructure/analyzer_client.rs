use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

const REQUEST_TIMEOUT_SECONDS: u64 = 120;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartAuthResponse {
    pub auth_url: String,
    pub state: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AnalyzeResponse {
    /// The analyzer persisted `n` items on its side.
    Inserted(u64),
    /// Accounts that must finish the OAuth hand-off first.
    MissingAuth(Vec<String>),
    /// Raw account -> items mapping for this application to ingest.
    Extracted(serde_json::Value),
}

#[async_trait]
pub trait AnalyzerClient: Send + Sync {
    async fn start_auth(&self, email: &str) -> Result<StartAuthResponse, InfraError>;

    async fn analyze(&self, emails: &[String]) -> Result<AnalyzeResponse, InfraError>;

    async fn email_state(&self) -> Result<serde_json::Value, InfraError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestAnalyzerClient {
    client: Client,
    base_url: Url,
}

impl ReqwestAnalyzerClient {
    pub fn new(base_url: &str) -> Result<Self, InfraError> {
        let mut base_url = Url::parse(base_url.trim()).map_err(|error| {
            InfraError::InvalidConfig(format!("invalid analyzer base url: {error}"))
        })?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECONDS))
            .build()
            .map_err(|error| InfraError::InvalidConfig(format!("http client setup failed: {error}")))?;
        Ok(Self { client, base_url })
    }

    fn endpoint(&self, path: &str) -> Result<Url, InfraError> {
        self.base_url
            .join(path)
            .map_err(|error| InfraError::InvalidConfig(format!("invalid analyzer endpoint {path}: {error}")))
    }

    async fn send_json(&self, request: RequestBuilder) -> Result<serde_json::Value, InfraError> {
        let response = request
            .send()
            .await
            .map_err(|error| InfraError::AnalyzerUnavailable(format!("request failed: {error}")))?;

        let status = response.status();
        let body = response.text().await.map_err(|error| {
            InfraError::AnalyzerUnavailable(format!("failed reading analyzer response: {error}"))
        })?;

        if !status.is_success() {
            return Err(http_error(status, &body));
        }

        serde_json::from_str(&body).map_err(|error| {
            InfraError::Analyzer(format!("invalid analyzer payload: {error}; body={body}"))
        })
    }
}

fn http_error(status: StatusCode, body: &str) -> InfraError {
    let detail = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| value.get("error").and_then(serde_json::Value::as_str).map(ToOwned::to_owned))
        .unwrap_or_else(|| body.trim().to_string());
    let message = if detail.is_empty() {
        format!("analyzer http {}", status.as_u16())
    } else {
        format!("analyzer http {}; {detail}", status.as_u16())
    };
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        InfraError::AnalyzerUnavailable(message)
    } else {
        InfraError::Analyzer(message)
    }
}

pub fn parse_analyze_payload(payload: serde_json::Value) -> Result<AnalyzeResponse, InfraError> {
    if let Some(missing) = payload.get("missing_auth").and_then(serde_json::Value::as_array) {
        if !missing.is_empty() {
            return Ok(AnalyzeResponse::MissingAuth(
                missing
                    .iter()
                    .filter_map(serde_json::Value::as_str)
                    .map(ToOwned::to_owned)
                    .collect(),
            ));
        }
    }
    if let Some(inserted) = payload.get("inserted").and_then(serde_json::Value::as_u64) {
        return Ok(AnalyzeResponse::Inserted(inserted));
    }
    if let Some(message) = payload.get("error").and_then(serde_json::Value::as_str) {
        return Err(InfraError::Analyzer(message.to_string()));
    }
    if payload.is_object() || payload.is_array() {
        return Ok(AnalyzeResponse::Extracted(payload));
    }
    Err(InfraError::Analyzer(format!(
        "unexpected analyze payload: {payload}"
    )))
}

#[async_trait]
impl AnalyzerClient for ReqwestAnalyzerClient {
    async fn start_auth(&self, email: &str) -> Result<StartAuthResponse, InfraError> {
        let url = self.endpoint("start_auth")?;
        let payload = self
            .send_json(self.client.post(url).json(&serde_json::json!({ "email": email })))
            .await?;
        serde_json::from_value(payload)
            .map_err(|error| InfraError::Analyzer(format!("invalid start_auth payload: {error}")))
    }

    async fn analyze(&self, emails: &[String]) -> Result<AnalyzeResponse, InfraError> {
        let url = self.endpoint("analyze")?;
        let payload = self
            .send_json(self.client.post(url).json(&serde_json::json!({ "emails": emails })))
            .await?;
        parse_analyze_payload(payload)
    }

    async fn email_state(&self) -> Result<serde_json::Value, InfraError> {
        let url = self.endpoint("email_state")?;
        self.send_json(self.client.get(url)).await
    }
}
