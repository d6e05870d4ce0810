//! The semantic-judgment capability ("oracle").
//!
//! The pipeline asks the oracle only for calls a rule cannot make: whether a
//! place name is a subdivision of the report's metro, and, in
//! [`MappingMode::Generative`](crate::config::MappingMode), the whole mapped
//! CSV. Everything else is deterministic.
//!
//! The oracle is injected as an `Arc<dyn Oracle>` so tests can substitute a
//! scripted stub. [`LlmOracle`] is the production implementation on top of an
//! `edgequake_llm` provider.
//!
//! Answers are treated as untrusted text: [`parse_yes_no`] checks a
//! classification before anything downstream sees it, and generated CSV goes
//! through the finalizer.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use std::sync::Arc;
use thiserror::Error;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// The two call shapes the pipeline uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Short context, single discrete answer (YES/NO, an index).
    Classification,
    /// Larger context, structured text answer.
    Generation,
}

/// A bounded prompt for the oracle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleRequest {
    pub kind: RequestKind,
    pub system: String,
    pub user: String,
}

impl OracleRequest {
    pub fn classification(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            kind: RequestKind::Classification,
            system: system.into(),
            user: user.into(),
        }
    }

    pub fn generation(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            kind: RequestKind::Generation,
            system: system.into(),
            user: user.into(),
        }
    }
}

/// The oracle's raw answer plus token accounting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OracleReply {
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl OracleReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }
}

/// Transport-level failure of a single oracle call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OracleError {
    #[error("oracle call timed out after {secs}s")]
    Timeout { secs: u64 },
    #[error("oracle provider error: {0}")]
    Provider(String),
    /// No provider could be set up; asking again will not help.
    #[error("oracle provider '{provider}' is not configured")]
    NotConfigured { provider: String, hint: String },
}

/// A semantic-judgment capability. Calls are independent of each other.
#[async_trait]
pub trait Oracle: Send + Sync {
    async fn ask(&self, request: &OracleRequest) -> Result<OracleReply, OracleError>;
}

// ── LLM-backed oracle ────────────────────────────────────────────────────

/// An [`Oracle`] backed by an `edgequake_llm` chat provider.
///
/// Transient failures (timeouts, 5xx) are retried with exponential backoff
/// (`retry_backoff_ms * 2^attempt`) before the call is reported as failed.
pub struct LlmOracle {
    provider: Arc<dyn LLMProvider>,
    temperature: f32,
    max_tokens: usize,
    retries: u32,
    backoff_ms: u64,
    timeout_secs: u64,
}

impl LlmOracle {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &PipelineConfig) -> Self {
        Self {
            provider,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            retries: config.oracle_retries,
            backoff_ms: config.retry_backoff_ms,
            timeout_secs: config.api_timeout_secs,
        }
    }

    fn build_options(&self, kind: RequestKind) -> CompletionOptions {
        // A classification answer is a word or a number.
        let max_tokens = match kind {
            RequestKind::Classification => self.max_tokens.min(16),
            RequestKind::Generation => self.max_tokens,
        };
        CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(max_tokens),
            ..Default::default()
        }
    }
}

#[async_trait]
impl Oracle for LlmOracle {
    async fn ask(&self, request: &OracleRequest) -> Result<OracleReply, OracleError> {
        let messages = vec![
            ChatMessage::system(&request.system),
            ChatMessage::user(&request.user),
        ];
        let options = self.build_options(request.kind);
        let mut last_err = OracleError::Provider("no attempt made".into());

        for attempt in 0..=self.retries {
            if attempt > 0 {
                let backoff = self.backoff_ms * 2u64.pow(attempt - 1);
                warn!(
                    "Oracle retry {}/{} after {}ms",
                    attempt, self.retries, backoff
                );
                sleep(Duration::from_millis(backoff)).await;
            }

            let call = self.provider.chat(&messages, Some(&options));
            match timeout(Duration::from_secs(self.timeout_secs), call).await {
                Ok(Ok(response)) => {
                    debug!(
                        "Oracle {:?}: {} input tokens, {} output tokens",
                        request.kind, response.prompt_tokens, response.completion_tokens
                    );
                    return Ok(OracleReply {
                        text: response.content,
                        input_tokens: response.prompt_tokens as u64,
                        output_tokens: response.completion_tokens as u64,
                    });
                }
                Ok(Err(e)) => {
                    warn!("Oracle attempt {} failed: {}", attempt + 1, e);
                    last_err = OracleError::Provider(e.to_string());
                }
                Err(_) => {
                    warn!(
                        "Oracle attempt {} timed out after {}s",
                        attempt + 1,
                        self.timeout_secs
                    );
                    last_err = OracleError::Timeout {
                        secs: self.timeout_secs,
                    };
                }
            }
        }

        Err(last_err)
    }
}

/// Stands in when no provider could be resolved. Every call fails with
/// [`OracleError::NotConfigured`].
pub struct UnavailableOracle {
    provider: String,
    hint: String,
}

impl UnavailableOracle {
    pub fn new(provider: impl Into<String>, hint: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            hint: hint.into(),
        }
    }
}

#[async_trait]
impl Oracle for UnavailableOracle {
    async fn ask(&self, _request: &OracleRequest) -> Result<OracleReply, OracleError> {
        Err(OracleError::NotConfigured {
            provider: self.provider.clone(),
            hint: self.hint.clone(),
        })
    }
}

// ── Resolution ───────────────────────────────────────────────────────────

fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, PipelineError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        PipelineError::OracleNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the oracle, from most-specific to least-specific:
///
/// 1. `config.oracle`: used as-is (tests, custom middleware).
/// 2. `config.provider`: wrapped in an [`LlmOracle`].
/// 3. `config.provider_name` (+ `config.model`).
/// 4. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL` when both are set.
/// 5. `OPENAI_API_KEY` present → OpenAI.
/// 6. `ProviderFactory::from_env()` auto-detection.
pub fn resolve_oracle(config: &PipelineConfig) -> Result<Arc<dyn Oracle>, PipelineError> {
    if let Some(ref oracle) = config.oracle {
        return Ok(Arc::clone(oracle));
    }

    let provider = resolve_provider(config)?;
    Ok(Arc::new(LlmOracle::new(provider, config)))
}

fn resolve_provider(config: &PipelineConfig) -> Result<Arc<dyn LLMProvider>, PipelineError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return create_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| PipelineError::OracleNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, GEMINI_API_KEY, or ANTHROPIC_API_KEY, or pass --provider.\n\
                Error: {e}"
            ),
        })?;

    Ok(llm_provider)
}

/// Model used when a provider is named without a model.
pub const DEFAULT_MODEL: &str = "gpt-4.1-mini";

// ── Response validation ──────────────────────────────────────────────────

fn first_word(text: &str) -> String {
    text.trim()
        .trim_start_matches(['`', '*', '"', '\''])
        .split(|c: char| !c.is_ascii_alphanumeric())
        .find(|w| !w.is_empty())
        .unwrap_or_default()
        .to_ascii_uppercase()
}

/// Parse a YES/NO classification answer. Anything else is `None`.
pub fn parse_yes_no(text: &str) -> Option<bool> {
    match first_word(text).as_str() {
        "YES" => Some(true),
        "NO" => Some(false),
        _ => None,
    }
}
