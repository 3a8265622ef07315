use crate::infrastructure::error::InfraError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::Path;

const APP_JSON: &str = "app.json";
const DEFAULT_LISTEN: &str = "127.0.0.1:8080";
const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppConfigFile {
    schema: u8,
    #[serde(default = "default_listen")]
    listen: String,
    #[serde(default)]
    analyzer_base_url: Option<String>,
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default)]
    log_format: LogFormat,
    #[serde(default)]
    cors_origins: Vec<String>,
}

fn default_listen() -> String {
    DEFAULT_LISTEN.to_string()
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub listen: SocketAddr,
    pub analyzer_base_url: Option<String>,
    pub log_level: String,
    pub log_format: LogFormat,
    pub cors_origins: Vec<String>,
}

fn default_app_json() -> serde_json::Value {
    serde_json::json!({
        "schema": 1,
        "appName": "Daybook",
        "listen": DEFAULT_LISTEN,
        "analyzerBaseUrl": null,
        "logLevel": DEFAULT_LOG_LEVEL,
        "logFormat": "text",
        "corsOrigins": ["http://localhost:3000"]
    })
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    let path = config_dir.join(APP_JSON);
    if !path.exists() {
        let formatted = serde_json::to_string_pretty(&default_app_json())?;
        fs::write(path, format!("{formatted}\n"))?;
    }
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != 1 {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

pub fn load_app_config(config_dir: &Path) -> Result<AppConfig, InfraError> {
    load_app_config_with_lookup(config_dir, |key| std::env::var(key).ok())
}

/// Reads `config/app.json` and applies environment overrides resolved
/// through `lookup`.
pub fn load_app_config_with_lookup<F>(config_dir: &Path, lookup: F) -> Result<AppConfig, InfraError>
where
    F: Fn(&str) -> Option<String>,
{
    let path = config_dir.join(APP_JSON);
    let file: AppConfigFile = serde_json::from_value(read_config(&path)?).map_err(|error| {
        InfraError::InvalidConfig(format!("invalid {}: {error}", path.display()))
    })?;

    let listen_raw =
        optional_lookup_value(&lookup, &["DAYBOOK_LISTEN"]).unwrap_or(file.listen);
    let listen = listen_raw.parse::<SocketAddr>().map_err(|error| {
        InfraError::InvalidConfig(format!("listen must be ip:port, got '{listen_raw}': {error}"))
    })?;

    let analyzer_base_url =
        optional_lookup_value(&lookup, &["DAYBOOK_ANALYZER_URL", "ANALYZER_URL"]).or_else(|| {
            file.analyzer_base_url
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(ToOwned::to_owned)
        });
    if let Some(base_url) = &analyzer_base_url {
        url::Url::parse(base_url).map_err(|error| {
            InfraError::InvalidConfig(format!("invalid analyzer base url '{base_url}': {error}"))
        })?;
    }

    let log_level = optional_lookup_value(&lookup, &["DAYBOOK_LOG"]).unwrap_or(file.log_level);

    Ok(AppConfig {
        listen,
        analyzer_base_url,
        log_level,
        log_format: file.log_format,
        cors_origins: file
            .cors_origins
            .into_iter()
            .map(|origin| origin.trim().to_string())
            .filter(|origin| !origin.is_empty())
            .collect(),
    })
}

pub fn optional_lookup_value<F>(lookup: &F, keys: &[&str]) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    for key in keys {
        if let Some(value) = lookup(key) {
            let normalized = value.trim();
            if !normalized.is_empty() {
                return Some(normalized.to_string());
            }
        }
    }
    None
}
