use crate::application::commands::{connect_account_impl, normalize_optional, required_email, AppState};
use crate::application::extracted::ingest_extracted_impl;
use crate::infrastructure::analyzer_client::{AnalyzeResponse, StartAuthResponse};
use crate::infrastructure::error::InfraError;
use serde::{Deserialize, Serialize};
use std::future::Future;
use tokio::time::{sleep, Duration as TokioDuration};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u8,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnalyzeRequest {
    #[serde(default)]
    pub emails: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeResult {
    pub accounts: Vec<String>,
    pub inserted: u64,
    pub updated: u64,
    pub failed: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing_auth: Vec<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AuthCallbackResponse {
    pub connected: bool,
    pub email: Option<String>,
}

/// Starts the analyzer's OAuth hand-off for `email`. The account is
/// registered locally before the URL is returned.
pub async fn start_auth_impl(state: &AppState, email: String) -> Result<StartAuthResponse, InfraError> {
    let email = required_email(&email)?;
    let client = state.analyzer()?;
    connect_account_impl(state, email.clone())?;

    let response = with_retry(state, "start_auth", || client.start_auth(&email)).await?;
    tracing::info!(email = %email, "started analyzer auth");
    Ok(response)
}

pub async fn analyze_impl(state: &AppState, request: AnalyzeRequest) -> Result<AnalyzeResult, InfraError> {
    let mut emails = Vec::new();
    for email in request.emails {
        let email = required_email(&email)?;
        if !emails.contains(&email) {
            emails.push(email);
        }
    }
    if emails.is_empty() {
        emails = state
            .accounts
            .list()?
            .into_iter()
            .map(|account| account.email)
            .collect();
    }
    if emails.is_empty() {
        return Err(InfraError::validation(
            "no accounts to analyze; connect an account first",
        ));
    }

    let client = state.analyzer()?;
    let response = with_retry(state, "analyze", || client.analyze(&emails)).await?;

    let mut result = AnalyzeResult {
        accounts: emails,
        ..AnalyzeResult::default()
    };
    match response {
        AnalyzeResponse::Inserted(count) => result.inserted = count,
        AnalyzeResponse::MissingAuth(missing) => {
            tracing::info!(missing = ?missing, "analyzer requires auth");
            result.missing_auth = missing;
        }
        AnalyzeResponse::Extracted(payload) => {
            let ingested = ingest_extracted_impl(state, payload)?;
            result.inserted = ingested.inserted;
            result.updated = ingested.updated;
            result.failed = ingested.failed;
        }
    }
    tracing::info!(
        accounts = result.accounts.len(),
        inserted = result.inserted,
        updated = result.updated,
        "analyze finished"
    );
    Ok(result)
}

pub async fn email_state_impl(state: &AppState) -> Result<serde_json::Value, InfraError> {
    let client = state.analyzer()?;
    with_retry(state, "email_state", || client.email_state()).await
}

/// Target of the analyzer's post-OAuth redirect
/// (`?auth=success&email=...`).
pub fn auth_callback_impl(
    state: &AppState,
    auth: Option<String>,
    email: Option<String>,
) -> Result<AuthCallbackResponse, InfraError> {
    let email = normalize_optional(email);
    if normalize_optional(auth).as_deref() != Some("success") {
        tracing::info!(email = ?email, "analyzer auth did not succeed");
        return Ok(AuthCallbackResponse {
            connected: false,
            email,
        });
    }

    let Some(email) = email else {
        return Err(InfraError::validation("email is required"));
    };
    let account = connect_account_impl(state, email)?;
    Ok(AuthCallbackResponse {
        connected: true,
        email: Some(account.email),
    })
}

async fn with_retry<T, F, Fut>(state: &AppState, operation: &str, mut call: F) -> Result<T, InfraError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, InfraError>>,
{
    let policy = state.retry_policy();
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt: u8 = 0;

    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(error) if should_retry(&error) && attempt + 1 < max_attempts => {
                let delay = policy
                    .base_delay_ms
                    .saturating_mul(2u64.saturating_pow(attempt as u32));
                tracing::warn!(operation, attempt = attempt + 1, delay_ms = delay, %error, "retrying analyzer call");
                sleep(TokioDuration::from_millis(delay)).await;
                attempt = attempt.saturating_add(1);
            }
            Err(error) => return Err(error),
        }
    }
}

fn should_retry(error: &InfraError) -> bool {
    matches!(error, InfraError::AnalyzerUnavailable(_))
}
