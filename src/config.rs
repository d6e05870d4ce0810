//! Configuration types for submarket table extraction.
//!
//! All pipeline behaviour is controlled through [`PipelineConfig`], built via
//! its [`PipelineConfigBuilder`]. The same config is shared by every document
//! of a batch; nothing in it is mutated while documents are processed.

use crate::error::PipelineError;
use crate::oracle::Oracle;
use crate::progress::BatchProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Configuration for extracting canonical submarket records.
///
/// # Example
/// ```rust
/// use submarket_extract::{MappingMode, PipelineConfig};
///
/// let config = PipelineConfig::builder()
///     .mode(MappingMode::Rules)
///     .concurrency(4)
///     .max_stage_invocations(8)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// How the selected table becomes canonical records. Default: [`MappingMode::Rules`].
    pub mode: MappingMode,

    /// Retry budget: ceiling on stage invocations plus oracle re-asks per
    /// document. Default: 8.
    ///
    /// A clean rules-mode run uses 5 (one per stage), leaving room for three
    /// re-asks after unparseable oracle answers.
    pub max_stage_invocations: u32,

    /// Number of documents processed at once by the batch driver. Default: 4.
    pub concurrency: usize,

    /// Wall-clock limit for one document, in seconds. Default: 300.
    pub document_timeout_secs: u64,

    /// Per-oracle-call timeout in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Transport retries inside a single oracle call (5xx, timeouts). Default: 2.
    ///
    /// These are not charged to the retry budget; only a call that still
    /// fails after them is.
    pub oracle_retries: u32,

    /// Initial transport retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Sampling temperature for oracle calls. Default: 0.0.
    pub temperature: f32,

    /// Maximum tokens the oracle may generate per call. Default: 4096.
    pub max_tokens: usize,

    /// LLM model identifier, e.g. "gpt-4.1-mini", "gemini-2.5-pro".
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "gemini", "anthropic").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Pre-constructed oracle. Takes precedence over every provider setting;
    /// tests inject a deterministic stub here.
    pub oracle: Option<Arc<dyn Oracle>>,

    /// Geographic context override. If None, derived from the document id.
    pub metro: Option<String>,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Optional progress callback for batch runs.
    pub progress_callback: Option<Arc<dyn BatchProgressCallback>>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            mode: MappingMode::default(),
            max_stage_invocations: 8,
            concurrency: 4,
            document_timeout_secs: 300,
            api_timeout_secs: 60,
            oracle_retries: 2,
            retry_backoff_ms: 500,
            temperature: 0.0,
            max_tokens: 4096,
            model: None,
            provider_name: None,
            provider: None,
            oracle: None,
            metro: None,
            download_timeout_secs: 120,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("mode", &self.mode)
            .field("max_stage_invocations", &self.max_stage_invocations)
            .field("concurrency", &self.concurrency)
            .field("document_timeout_secs", &self.document_timeout_secs)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("oracle_retries", &self.oracle_retries)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("oracle", &self.oracle.as_ref().map(|_| "<dyn Oracle>"))
            .field("metro", &self.metro)
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn mode(mut self, mode: MappingMode) -> Self {
        self.config.mode = mode;
        self
    }

    pub fn max_stage_invocations(mut self, n: u32) -> Self {
        self.config.max_stage_invocations = n;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn document_timeout_secs(mut self, secs: u64) -> Self {
        self.config.document_timeout_secs = secs;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn oracle_retries(mut self, n: u32) -> Self {
        self.config.oracle_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn oracle(mut self, oracle: Arc<dyn Oracle>) -> Self {
        self.config.oracle = Some(oracle);
        self
    }

    pub fn metro(mut self, metro: impl Into<String>) -> Self {
        self.config.metro = Some(metro.into());
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: Arc<dyn BatchProgressCallback>) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, PipelineError> {
        let c = &self.config;
        // Five stages must fit in the budget for a run to ever succeed.
        if c.max_stage_invocations < 5 {
            return Err(PipelineError::InvalidConfig(format!(
                "Retry budget must allow at least 5 stage invocations, got {}",
                c.max_stage_invocations
            )));
        }
        if c.document_timeout_secs == 0 {
            return Err(PipelineError::InvalidConfig(
                "Document timeout must be ≥ 1 second".into(),
            ));
        }
        if c.api_timeout_secs == 0 {
            return Err(PipelineError::InvalidConfig(
                "Oracle call timeout must be ≥ 1 second".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// How the selected table is turned into canonical records.
///
/// | Mode | Map stage | Oracle use |
/// |------|-----------|------------|
/// | `Rules` | synonym table, deterministic | table selection only |
/// | `Generative` | oracle writes the CSV, rules re-applied afterwards | selection + mapping |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingMode {
    /// Deterministic column mapping and cleaning. (default)
    #[default]
    Rules,
    /// The oracle generates the canonical CSV from the selected table.
    Generative,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = PipelineConfig::default();
        assert_eq!(c.mode, MappingMode::Rules);
        assert_eq!(c.max_stage_invocations, 8);
        assert_eq!(c.concurrency, 4);
        assert_eq!(c.temperature, 0.0);
    }

    #[test]
    fn builder_clamps_concurrency() {
        let c = PipelineConfig::builder().concurrency(0).build().unwrap();
        assert_eq!(c.concurrency, 1);
    }

    #[test]
    fn builder_rejects_tiny_budget() {
        let err = PipelineConfig::builder()
            .max_stage_invocations(3)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("at least 5"));
    }

    #[test]
    fn debug_hides_provider() {
        let c = PipelineConfig::builder().metro("Dallas").build().unwrap();
        let s = format!("{c:?}");
        assert!(s.contains("Dallas"));
        assert!(s.contains("oracle: None"));
    }
}
