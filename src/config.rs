//! Resolver configuration stored in ~/.wikiresolve/config.json.
//!
//! Every field has a serde default, so an absent file or a partial file both
//! produce a usable configuration. Two environment variables override the
//! file: `WIKIRESOLVE_ENDPOINT` and `WIKIRESOLVE_LANGUAGES` (comma list of
//! fallback languages).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ResolveError;
use crate::sparql::client::RetryPolicy;
use crate::sparql::query::validate_language;

pub const DEFAULT_ENDPOINT: &str = "https://query.wikidata.org/sparql";
const DEFAULT_USER_AGENT: &str =
    concat!("wikiresolve/", env!("CARGO_PKG_VERSION"), " (entity reconciliation)");

pub const ENV_ENDPOINT: &str = "WIKIRESOLVE_ENDPOINT";
pub const ENV_LANGUAGES: &str = "WIKIRESOLVE_LANGUAGES";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolverConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_language")]
    pub default_language: String,
    /// Tried in order during the language fallback round.
    #[serde(default = "default_fallback_languages")]
    pub fallback_languages: Vec<String>,
    /// Maximum names per batch query.
    #[serde(default = "default_batch_chunk_size")]
    pub batch_chunk_size: usize,
    /// Minimum spacing between the starts of two requests, across all workers.
    #[serde(default = "default_min_request_interval_ms")]
    pub min_request_interval_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Worker count for the per-name rounds. 1 keeps them sequential.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

fn default_language() -> String {
    "en".to_string()
}

fn default_fallback_languages() -> Vec<String> {
    ["fr", "de", "es", "it", "nl"]
        .iter()
        .map(|l| l.to_string())
        .collect()
}

fn default_batch_chunk_size() -> usize {
    150
}

fn default_min_request_interval_ms() -> u64 {
    250
}

fn default_request_timeout_secs() -> u64 {
    65
}

fn default_concurrency() -> usize {
    1
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            user_agent: default_user_agent(),
            default_language: default_language(),
            fallback_languages: default_fallback_languages(),
            batch_chunk_size: default_batch_chunk_size(),
            min_request_interval_ms: default_min_request_interval_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            concurrency: default_concurrency(),
            retry: RetryPolicy::default(),
        }
    }
}

impl ResolverConfig {
    pub fn min_request_interval(&self) -> Duration {
        Duration::from_millis(self.min_request_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Reject configurations the resolver cannot run with.
    pub fn validate(&self) -> Result<(), ResolveError> {
        let url = url::Url::parse(&self.endpoint).map_err(|e| {
            ResolveError::Configuration(format!("endpoint {:?}: {}", self.endpoint, e))
        })?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ResolveError::Configuration(format!(
                "endpoint must be http(s): {}",
                self.endpoint
            )));
        }
        validate_language(&self.default_language)?;
        for lang in &self.fallback_languages {
            validate_language(lang)?;
        }
        if self.batch_chunk_size == 0 {
            return Err(ResolveError::Configuration(
                "batchChunkSize must be at least 1".to_string(),
            ));
        }
        if self.concurrency == 0 {
            return Err(ResolveError::Configuration(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if self.user_agent.trim().is_empty() {
            return Err(ResolveError::Configuration(
                "userAgent must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Apply `WIKIRESOLVE_*` overrides from an environment lookup.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(endpoint) = lookup(ENV_ENDPOINT).filter(|v| !v.trim().is_empty()) {
            log::debug!("config: endpoint overridden by {}", ENV_ENDPOINT);
            self.endpoint = endpoint.trim().to_string();
        }
        if let Some(languages) = lookup(ENV_LANGUAGES) {
            self.fallback_languages = languages
                .split(',')
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty())
                .collect();
        }
    }
}

/// Get the canonical config file path (~/.wikiresolve/config.json)
pub fn config_path() -> Result<PathBuf, ResolveError> {
    let home = dirs::home_dir().ok_or_else(|| {
        ResolveError::Configuration("Could not find home directory".to_string())
    })?;
    Ok(home.join(".wikiresolve").join("config.json"))
}

/// Load configuration from a specific file. A missing file yields defaults.
pub fn load_config_from(path: &Path) -> Result<ResolverConfig, ResolveError> {
    if !path.exists() {
        log::debug!("config: {} not found, using defaults", path.display());
        return Ok(ResolverConfig::default());
    }

    let content = fs::read_to_string(path).map_err(|e| {
        ResolveError::Configuration(format!("Failed to read {}: {}", path.display(), e))
    })?;
    let config: ResolverConfig = serde_json::from_str(&content).map_err(|e| {
        ResolveError::Configuration(format!("Failed to parse {}: {}", path.display(), e))
    })?;
    config.validate()?;
    Ok(config)
}

/// Load configuration from ~/.wikiresolve/config.json plus environment overrides.
pub fn load_config() -> Result<ResolverConfig, ResolveError> {
    let mut config = load_config_from(&config_path()?)?;
    config.apply_env_overrides(|key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}
