//! # submarket-extract
//!
//! Extract industrial real-estate submarket statistics from market report
//! PDFs into one fixed, ten-column CSV schema.
//!
//! Reports carry several similar-looking tables (by size, by class, notable
//! projects, submarket statistics) with inconsistent headers. This crate
//! finds the submarket table, maps its columns onto the canonical schema and
//! cleans every value with deterministic rules. A language model ("oracle")
//! is consulted only for genuinely semantic calls, such as whether
//! "Las Colinas" is a part of Dallas.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF / JSON
//!  │
//!  ├─ 1. Input     resolve local file or download from URL
//!  ├─ 2. Source    text layer → cell grids (pdfium, spawn_blocking)
//!  ├─ 3. Extract   ordered candidate tables, header repair
//!  ├─ 4. Select    denylist + first-column geography (oracle for unknown names)
//!  ├─ 5. Map       header synonyms → canonical columns
//!  ├─ 6. Clean     %, (negatives), currency, N/A
//!  └─ 7. Finalize  canonical CSV, header first
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use submarket_extract::{process_batch, Pipeline, PipelineConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Oracle auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let pipeline = Pipeline::new(PipelineConfig::default())?;
//!     let inputs = vec!["Dallas_Q2_2025.pdf".to_string(), "Austin_Q2_2025.pdf".to_string()];
//!     let batch = process_batch(&pipeline, &inputs).await;
//!     for (input, error) in batch.failed() {
//!         eprintln!("skipped {input}: {error}");
//!     }
//!     batch.write_merged_csv("master_output.csv").await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `submarket2csv` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! submarket-extract = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod batch;
pub mod config;
pub mod error;
pub mod model;
pub mod oracle;
pub mod output;
pub mod pipeline;
pub mod process;
pub mod progress;
pub mod prompts;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use batch::{expand_inputs, process_batch, process_batch_stream, OutcomeStream};
pub use config::{MappingMode, PipelineConfig, PipelineConfigBuilder};
pub use error::{PipelineError, TableError};
pub use model::{Document, Page, RawTable, SelectedTable, SourceTable, TableCandidateSet};
pub use oracle::{LlmOracle, Oracle, OracleError, OracleReply, OracleRequest, RequestKind};
pub use output::{
    BatchOutput, CanonicalColumn, CanonicalRecord, CanonicalResult, DocumentOutcome,
    DocumentOutput, RunStats, CANONICAL_HEADER,
};
pub use pipeline::source::{AutoSource, DocumentSource, JsonSource, PdfiumSource};
pub use process::{Pipeline, RetryBudget, RunContext, Stage};
pub use progress::{BatchProgressCallback, NoopProgressCallback};
