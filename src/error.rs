//! Error types for the submarket-extract library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`PipelineError`]: **Fatal for one document**: the run for that
//!   document cannot produce a result (unreadable file, no usable table,
//!   retry budget exhausted). Returned as `Err(PipelineError)` from
//!   [`crate::process::Pipeline::process`]. A batch keeps going; the caller
//!   decides whether the document is skipped or the whole batch aborts.
//!
//! * [`TableError`]: **Non-fatal**: a single candidate table was malformed
//!   and has been dropped from the candidate set. Stored on
//!   [`crate::model::TableCandidateSet`] so callers can see what was skipped.
//!
//! A per-document failure is never reported as an empty success: a table with
//! zero data rows is a valid `Ok`, a failure is always an `Err`.

use std::path::PathBuf;
use thiserror::Error;

use crate::process::Stage;

/// All per-document fatal errors returned by the pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The document could not be opened or read. No partial extraction is
    /// attempted.
    #[error("Cannot read document '{path}': {reason}")]
    DocumentAccess { path: PathBuf, reason: String },

    /// The input string is neither a readable path nor an HTTP/HTTPS URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    // ── Selection errors ──────────────────────────────────────────────────
    /// Extraction produced no candidate table with a header and a data row.
    #[error("No candidate tables found in '{document}'")]
    NoCandidateTables { document: String },

    /// None of the candidate tables looks like a submarket statistics table.
    #[error("No submarket statistics table among {candidates} candidates in '{document}'")]
    AmbiguousSelection { document: String, candidates: usize },

    // ── Output errors ─────────────────────────────────────────────────────
    /// The canonical header `primary_submarket` does not occur in the text.
    #[error("Canonical header 'primary_submarket' not found in output (starts with {preview:?})")]
    HeaderNotFound { preview: String },

    // ── Oracle errors ─────────────────────────────────────────────────────
    /// The oracle answered, but the answer does not have the expected shape.
    #[error("Oracle returned an invalid response during {stage}: {response:?}")]
    OracleResponseInvalid { stage: Stage, response: String },

    /// The oracle call itself failed (transport, provider, timeout).
    #[error("Oracle call failed during {stage}: {detail}")]
    Oracle { stage: Stage, detail: String },

    /// The configured oracle provider could not be initialised.
    #[error("Oracle provider '{provider}' is not configured.\n{hint}")]
    OracleNotConfigured { provider: String, hint: String },

    /// Stage invocations plus oracle re-asks exceeded the configured ceiling.
    #[error("Retry budget of {limit} stage invocations exhausted during {stage}; last error: {last_error}")]
    RetryBudgetExhausted {
        stage: Stage,
        limit: u32,
        last_error: String,
    },

    /// The document exceeded its wall-clock budget and was abandoned.
    #[error("Processing '{document}' timed out after {secs}s")]
    Timeout { document: String, secs: u64 },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the merged CSV file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Whether a batch driver should skip this document and continue.
    ///
    /// Access, configuration and budget failures are still per-document, but
    /// they usually indicate a setup problem worth surfacing loudly.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PipelineError::NoCandidateTables { .. }
                | PipelineError::AmbiguousSelection { .. }
                | PipelineError::HeaderNotFound { .. }
                | PipelineError::Timeout { .. }
        )
    }

    /// Whether this error should be retried within the retry budget.
    pub(crate) fn is_retryable(&self) -> bool {
        matches!(
            self,
            PipelineError::OracleResponseInvalid { .. }
                | PipelineError::Oracle { .. }
                | PipelineError::HeaderNotFound { .. }
        )
    }
}

/// A non-fatal error for a single candidate table.
///
/// The table is skipped and extraction continues with the remaining tables.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum TableError {
    /// The grid has no rows or every cell is blank.
    #[error("Page {page}, table {position}: table is empty")]
    Empty { page: usize, position: usize },

    /// The grid is a single column, so there is nothing to map.
    #[error("Page {page}, table {position}: fewer than two columns")]
    NoColumns { page: usize, position: usize },
}
