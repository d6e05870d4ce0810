//! Pipeline controller: run one document through every stage.
//!
//! ```text
//! Rules:       Extract(+normalize) ─▶ Select ─▶ Map ─▶ Clean ─▶ Finalize
//! Generative:  Extract(+normalize) ─▶ Select ─▶ Map ─▶ Finalize ─▶ Clean
//!                                       (oracle)  (oracle)
//! ```
//!
//! Every stage entry and every oracle re-ask is charged to a [`RetryBudget`].
//! When the budget runs out the run stops with
//! [`PipelineError::RetryBudgetExhausted`] carrying the last error; a run
//! never returns partial output as success.

use crate::config::{MappingMode, PipelineConfig};
use crate::error::PipelineError;
use crate::model::{Document, TableCandidateSet};
use crate::oracle::{resolve_oracle, Oracle, OracleError, OracleRequest, UnavailableOracle};
use crate::output::{DocumentOutput, RunStats};
use crate::pipeline::source::{AutoSource, DocumentSource};
use crate::pipeline::{clean, extract, input, map, normalize, select};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Controller states, in rules-mode order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Extract,
    Select,
    Map,
    Clean,
    Finalize,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Extract => "extract",
            Stage::Select => "select",
            Stage::Map => "map",
            Stage::Clean => "clean",
            Stage::Finalize => "finalize",
        })
    }
}

// ── Retry budget ─────────────────────────────────────────────────────────

/// Ceiling on stage invocations plus oracle re-asks for one document.
#[derive(Debug, Clone)]
pub struct RetryBudget {
    limit: u32,
    used: u32,
    last_error: Option<String>,
}

impl RetryBudget {
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            used: 0,
            last_error: None,
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn used(&self) -> u32 {
        self.used
    }

    pub fn remaining(&self) -> u32 {
        self.limit.saturating_sub(self.used)
    }

    /// Remember the error reported if the budget later runs out.
    pub fn record_error(&mut self, error: &PipelineError) {
        self.last_error = Some(error.to_string());
    }

    /// Consume one unit, or fail if none is left.
    pub fn charge(&mut self, stage: Stage) -> Result<(), PipelineError> {
        if self.used >= self.limit {
            return Err(PipelineError::RetryBudgetExhausted {
                stage,
                limit: self.limit,
                last_error: self
                    .last_error
                    .clone()
                    .unwrap_or_else(|| "none".to_string()),
            });
        }
        self.used += 1;
        Ok(())
    }
}

// ── Per-document run state ───────────────────────────────────────────────

/// State owned by one document's run: oracle handle, budget, counters and
/// the geographic-judgement cache. Never shared between documents.
pub struct RunContext {
    oracle: Arc<dyn Oracle>,
    budget: RetryBudget,
    stats: RunStats,
    judgements: HashMap<(String, String), bool>,
}

impl RunContext {
    pub fn new(oracle: Arc<dyn Oracle>, max_stage_invocations: u32) -> Self {
        Self {
            oracle,
            budget: RetryBudget::new(max_stage_invocations),
            stats: RunStats::default(),
            judgements: HashMap::new(),
        }
    }

    /// Charge the budget for entering `stage`.
    pub fn enter(&mut self, stage: Stage) -> Result<(), PipelineError> {
        self.budget.charge(stage)?;
        debug!(
            "Stage {} ({}/{} budget used)",
            stage,
            self.budget.used(),
            self.budget.limit()
        );
        Ok(())
    }

    /// Ask the oracle and validate the reply.
    ///
    /// Transport failures and replies that `validate` rejects with a
    /// retryable error are re-asked, one budget unit each. Other validation
    /// errors are returned as-is.
    pub async fn ask<T, F>(
        &mut self,
        stage: Stage,
        request: &OracleRequest,
        validate: F,
    ) -> Result<T, PipelineError>
    where
        F: Fn(&str) -> Result<T, PipelineError>,
    {
        loop {
            self.stats.oracle_calls += 1;
            let error = match self.oracle.ask(request).await {
                Ok(reply) => {
                    self.stats.input_tokens += reply.input_tokens;
                    self.stats.output_tokens += reply.output_tokens;
                    match validate(&reply.text) {
                        Ok(value) => return Ok(value),
                        Err(e) if e.is_retryable() => e,
                        Err(e) => return Err(e),
                    }
                }
                Err(OracleError::NotConfigured { provider, hint }) => {
                    return Err(PipelineError::OracleNotConfigured { provider, hint });
                }
                Err(e) => PipelineError::Oracle {
                    stage,
                    detail: e.to_string(),
                },
            };

            warn!("{}; re-asking", error);
            self.budget.record_error(&error);
            self.budget.charge(stage)?;
        }
    }

    pub(crate) fn cached_judgement(&mut self, metro: &str, token: &str) -> Option<bool> {
        let answer = self
            .judgements
            .get(&judgement_key(metro, token))
            .copied();
        if answer.is_some() {
            self.stats.cache_hits += 1;
        }
        answer
    }

    pub(crate) fn remember_judgement(&mut self, metro: &str, token: &str, answer: bool) {
        self.judgements.insert(judgement_key(metro, token), answer);
    }

    pub fn budget(&self) -> &RetryBudget {
        &self.budget
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    fn into_stats(self) -> RunStats {
        RunStats {
            stage_invocations: self.budget.used(),
            ..self.stats
        }
    }
}

fn judgement_key(metro: &str, token: &str) -> (String, String) {
    (metro.trim().to_lowercase(), token.trim().to_lowercase())
}

// ── Pipeline ─────────────────────────────────────────────────────────────

/// The per-document controller. Cheap to share: `process*` take `&self`.
///
/// # Example
/// ```rust,no_run
/// use submarket_extract::{Pipeline, PipelineConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let pipeline = Pipeline::new(PipelineConfig::default())?;
/// let output = pipeline.process("Dallas_Industrial_Q2_2025.pdf").await?;
/// print!("{}", output.result.to_csv()?);
/// # Ok(())
/// # }
/// ```
pub struct Pipeline {
    config: PipelineConfig,
    oracle: Arc<dyn Oracle>,
    source: Arc<dyn DocumentSource>,
}

impl Pipeline {
    /// Build a pipeline, resolving the oracle once.
    ///
    /// In [`MappingMode::Rules`] a missing provider is not fatal: documents
    /// whose selection never needs the oracle still succeed, the others fail
    /// with [`PipelineError::OracleNotConfigured`].
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        let oracle = match resolve_oracle(&config) {
            Ok(oracle) => oracle,
            Err(PipelineError::OracleNotConfigured { provider, hint })
                if config.mode == MappingMode::Rules =>
            {
                warn!("No oracle available ({}); continuing with rules only", provider);
                Arc::new(UnavailableOracle::new(provider, hint)) as Arc<dyn Oracle>
            }
            Err(e) => return Err(e),
        };
        Ok(Self {
            config,
            oracle,
            source: Arc::new(AutoSource::default()),
        })
    }

    /// Replace the document source (default: [`AutoSource`]).
    pub fn with_source(mut self, source: Arc<dyn DocumentSource>) -> Self {
        self.source = source;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Process one local path or URL.
    pub async fn process(&self, input_str: impl AsRef<str>) -> Result<DocumentOutput, PipelineError> {
        let input_str = input_str.as_ref();
        let resolved = input::resolve_input(input_str, self.config.download_timeout_secs).await?;

        // pdfium is blocking; keep it off the async workers.
        let source = Arc::clone(&self.source);
        let path = resolved.path().to_path_buf();
        let document = tokio::task::spawn_blocking(move || source.load(&path))
            .await
            .map_err(|e| PipelineError::Internal(format!("document load task failed: {e}")))??;

        self.process_document(&document).await
    }

    /// Process a document that is already in memory.
    pub async fn process_document(&self, document: &Document) -> Result<DocumentOutput, PipelineError> {
        let started = Instant::now();
        let metro = self
            .config
            .metro
            .clone()
            .unwrap_or_else(|| document.metro_context());
        info!(
            "Processing '{}' (metro: '{}', mode: {:?})",
            document.id, metro, self.config.mode
        );

        let mut run = RunContext::new(Arc::clone(&self.oracle), self.config.max_stage_invocations);

        // ── Extract + normalize ──────────────────────────────────────────
        run.enter(Stage::Extract)?;
        let extracted = extract::extract(document);
        let candidates = TableCandidateSet {
            tables: extracted.tables.iter().map(normalize::normalize).collect(),
            skipped: extracted.skipped,
        };

        // ── Select ───────────────────────────────────────────────────────
        run.enter(Stage::Select)?;
        let selected = select::select(&candidates, &document.id, &metro, &mut run).await?;

        // ── Map, clean, finalize ─────────────────────────────────────────
        let result = match self.config.mode {
            MappingMode::Rules => {
                run.enter(Stage::Map)?;
                let mapped = map::map(&selected);
                run.enter(Stage::Clean)?;
                let cleaned = clean::clean(&mapped);
                // Already canonical: every mapped row is kept, blank ones included.
                run.enter(Stage::Finalize)?;
                cleaned
            }
            MappingMode::Generative => {
                run.enter(Stage::Map)?;
                run.enter(Stage::Finalize)?;
                let parsed = map::map_with_oracle(&selected, &metro, &mut run).await?;
                run.enter(Stage::Clean)?;
                clean::clean_result(&parsed)
            }
        };

        let mut stats = run.into_stats();
        stats.candidate_tables = candidates.len();
        stats.skipped_tables = candidates.skipped.len();
        stats.duration_ms = started.elapsed().as_millis() as u64;

        info!(
            "Finished '{}': {} record(s) from page {} in {}ms ({} oracle call(s))",
            document.id,
            result.len(),
            selected.page(),
            stats.duration_ms,
            stats.oracle_calls
        );

        Ok(DocumentOutput {
            document_id: document.id.clone(),
            source_page: selected.page(),
            result,
            stats,
        })
    }

    /// Synchronous wrapper around [`Pipeline::process`].
    ///
    /// Creates a temporary tokio runtime internally.
    pub fn process_sync(&self, input_str: impl AsRef<str>) -> Result<DocumentOutput, PipelineError> {
        tokio::runtime::Runtime::new()
            .map_err(|e| PipelineError::Internal(format!("Failed to create tokio runtime: {e}")))?
            .block_on(self.process(input_str))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_display_is_lowercase() {
        assert_eq!(Stage::Finalize.to_string(), "finalize");
        assert_eq!(Stage::Select.to_string(), "select");
    }

    #[test]
    fn budget_charges_until_limit() {
        let mut budget = RetryBudget::new(2);
        assert!(budget.charge(Stage::Extract).is_ok());
        budget.record_error(&PipelineError::HeaderNotFound {
            preview: "nope".into(),
        });
        assert!(budget.charge(Stage::Map).is_ok());
        assert_eq!(budget.remaining(), 0);
        let err = budget.charge(Stage::Map).unwrap_err();
        match err {
            PipelineError::RetryBudgetExhausted {
                stage,
                limit,
                last_error,
            } => {
                assert_eq!(stage, Stage::Map);
                assert_eq!(limit, 2);
                assert!(last_error.contains("nope"));
            }
            other => panic!("unexpected: {other}"),
        }
        assert_eq!(budget.used(), 2);
    }

    #[test]
    fn judgement_keys_ignore_case() {
        assert_eq!(
            judgement_key("Dallas ", "Collin County"),
            judgement_key("dallas", " COLLIN COUNTY")
        );
    }
}
