//! Node configuration.
//!
//! The configuration is a single JSON document. String values may reference
//! environment variables as `${NAME}`, which keeps secrets such as the
//! mnemonic and API keys in the environment (or a `.env` file).

pub mod chains;
pub mod ois;

use std::path::{Path, PathBuf};
use std::time::Duration;

use ethers::abi::{self, Token};
use ethers::types::H256;
use ethers::utils::keccak256;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use chains::{ChainConfig, ChainOptions, ProviderConfig};
pub use ois::Ois;

use crate::retry::{Backoff, RetryPolicy};

pub const DEFAULT_CONFIG_FILE: &str = "config.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("environment variable {0} referenced in configuration is not set")]
    MissingVariable(String),
    #[error("unterminated ${{...}} placeholder in {0:?}")]
    UnterminatedPlaceholder(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub node_settings: NodeSettings,
    pub chains: Vec<ChainConfig>,
    #[serde(default)]
    pub triggers: Triggers,
    #[serde(default)]
    pub ois: Vec<Ois>,
    #[serde(default)]
    pub api_credentials: Vec<ApiCredentials>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSettings {
    pub airnode_wallet_mnemonic: String,
    #[serde(default = "default_cron_schedule")]
    pub cron_schedule: String,
    #[serde(default = "default_run_timeout_ms")]
    pub run_timeout_ms: u64,
    #[serde(default = "default_api_call_timeout_ms")]
    pub api_call_timeout_ms: u64,
    #[serde(default = "default_provider_timeout_ms")]
    pub provider_timeout_ms: u64,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_max_concurrent_api_calls")]
    pub max_concurrent_api_calls: usize,
}

impl NodeSettings {
    pub fn run_timeout(&self) -> Duration {
        Duration::from_millis(self.run_timeout_ms)
    }

    /// Retry policy for HTTP calls to external APIs.
    pub fn api_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retries, Duration::from_millis(self.api_call_timeout_ms))
            .with_backoff(self.backoff())
    }

    /// Retry policy for chain reads.
    pub fn provider_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retries, Duration::from_millis(self.provider_timeout_ms))
            .with_backoff(self.backoff())
    }

    fn backoff(&self) -> Backoff {
        Backoff::Exponential {
            base: Duration::from_millis(self.retry_backoff_ms),
            max: Duration::from_millis(self.retry_backoff_ms.saturating_mul(8)),
        }
    }
}

fn default_cron_schedule() -> String {
    // sec min hour day month weekday
    "0 * * * * *".to_string()
}

fn default_run_timeout_ms() -> u64 {
    29_000
}

fn default_api_call_timeout_ms() -> u64 {
    20_000
}

fn default_provider_timeout_ms() -> u64 {
    10_000
}

fn default_retries() -> u32 {
    2
}

fn default_retry_backoff_ms() -> u64 {
    200
}

fn default_max_concurrent_api_calls() -> usize {
    10
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Triggers {
    #[serde(default)]
    pub rrp: Vec<RrpTrigger>,
}

/// Routes an on-chain endpoint id to the OIS endpoint serving it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RrpTrigger {
    pub endpoint_id: H256,
    pub ois_title: String,
    pub endpoint_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiCredentials {
    pub ois_title: String,
    pub security_scheme_name: String,
    pub security_scheme_value: String,
}

impl Config {
    /// Loads the file named by `CONFIG_FILE`, falling back to `config.json`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let path =
            std::env::var("CONFIG_FILE").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::from_file(path)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw, |name| std::env::var(name).ok())
    }

    /// Parses a configuration document, resolving `${NAME}` through `lookup`.
    pub fn from_json_str<F>(raw: &str, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut document: Value = serde_json::from_str(raw)?;
        interpolate_value(&mut document, &lookup)?;
        Ok(serde_json::from_value(document)?)
    }

    pub fn ois(&self, title: &str) -> Option<&Ois> {
        self.ois.iter().find(|ois| ois.title == title)
    }

    pub fn trigger(&self, endpoint_id: &H256) -> Option<&RrpTrigger> {
        self.triggers
            .rrp
            .iter()
            .find(|trigger| trigger.endpoint_id == *endpoint_id)
    }

    pub fn credentials(&self, ois_title: &str, scheme_name: &str) -> Option<&ApiCredentials> {
        self.api_credentials.iter().find(|credentials| {
            credentials.ois_title == ois_title && credentials.security_scheme_name == scheme_name
        })
    }
}

/// `keccak256(abi.encode(oisTitle, endpointName))`.
pub fn derive_endpoint_id(ois_title: &str, endpoint_name: &str) -> H256 {
    let encoded = abi::encode(&[
        Token::String(ois_title.to_string()),
        Token::String(endpoint_name.to_string()),
    ]);
    H256::from(keccak256(encoded))
}

fn interpolate_value<F>(value: &mut Value, lookup: &F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match value {
        Value::String(text) => {
            if text.contains("${") {
                *text = interpolate(text, lookup)?;
            }
        }
        Value::Array(items) => {
            for item in items {
                interpolate_value(item, lookup)?;
            }
        }
        Value::Object(map) => {
            for item in map.values_mut() {
                interpolate_value(item, lookup)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn interpolate<F>(text: &str, lookup: &F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find('}')
            .ok_or_else(|| ConfigError::UnterminatedPlaceholder(text.to_string()))?;
        let name = after[..end].trim();
        let resolved = lookup(name).ok_or_else(|| ConfigError::MissingVariable(name.to_string()))?;
        out.push_str(&resolved);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}
