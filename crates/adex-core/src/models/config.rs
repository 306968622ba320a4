//! Configuration structures for the extraction pipeline.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::AdexError;
use crate::oracle::Usage;

/// Main configuration for the adex pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdexConfig {
    /// Rule store configuration.
    pub cache: CacheConfig,

    /// Extraction and rule generation configuration.
    pub extraction: ExtractionConfig,

    /// Oracle (LLM endpoint) configuration.
    pub oracle: OracleConfig,

    /// PDF processing configuration.
    pub pdf: PdfConfig,
}

/// Rule store configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Use learned rules before asking the oracle. Disabled means oracle-only.
    pub enabled: bool,

    /// Where the rule store lives. `None` keeps rules in memory only.
    pub path: Option<PathBuf>,

    /// Persist the store after every rule that gets added.
    pub save_after_each_rule: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
            save_after_each_rule: true,
        }
    }
}

/// Extraction and rule generation configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Proposals requested per field before giving up (1-10).
    pub max_attempts: u32,

    /// Normalize document text before extraction.
    pub normalize: bool,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            normalize: true,
        }
    }
}

/// OpenAI-compatible endpoint settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    /// Base URL of the chat completions API.
    pub base_url: String,

    /// Model name sent with each request.
    pub model: String,

    /// Environment variable holding the API key.
    pub api_key_env: String,

    /// Per-request timeout in seconds (5-120).
    pub timeout_secs: u64,

    /// Retries after a failed request (0-10).
    pub max_retries: u32,

    /// Token prices used to cost each document.
    pub pricing: Pricing,
}

/// Token prices in USD per million tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Pricing {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

impl Default for Pricing {
    // gpt-5-mini list prices
    fn default() -> Self {
        Self {
            input_per_million: 0.25,
            output_per_million: 2.00,
        }
    }
}

impl Pricing {
    /// Cost in USD of `usage`.
    pub fn cost(&self, usage: &Usage) -> f64 {
        (usage.prompt_tokens as f64 * self.input_per_million
            + usage.completion_tokens as f64 * self.output_per_million)
            / 1_000_000.0
    }
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-5-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_secs: 90,
            max_retries: 0,
            pricing: Pricing::default(),
        }
    }
}

/// PDF processing configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PdfConfig {
    /// Maximum pages to accept (0 = unlimited).
    pub max_pages: usize,
}

impl Default for PdfConfig {
    fn default() -> Self {
        Self { max_pages: 1 }
    }
}

impl AdexConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &std::path::Path) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &std::path::Path) -> Result<(), std::io::Error> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
        std::fs::write(path, content)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), AdexError> {
        if !(1..=10).contains(&self.extraction.max_attempts) {
            return Err(AdexError::Config(format!(
                "extraction.max_attempts must be between 1 and 10, got {}",
                self.extraction.max_attempts
            )));
        }
        if !(5..=120).contains(&self.oracle.timeout_secs) {
            return Err(AdexError::Config(format!(
                "oracle.timeout_secs must be between 5 and 120, got {}",
                self.oracle.timeout_secs
            )));
        }
        let pricing = &self.oracle.pricing;
        if !(pricing.input_per_million >= 0.0 && pricing.output_per_million >= 0.0) {
            return Err(AdexError::Config(format!(
                "oracle.pricing must be non-negative, got {} / {}",
                pricing.input_per_million, pricing.output_per_million
            )));
        }
        if self.oracle.max_retries > 10 {
            return Err(AdexError::Config(format!(
                "oracle.max_retries must be at most 10, got {}",
                self.oracle.max_retries
            )));
        }
        Ok(())
    }
}
