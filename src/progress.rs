//! Progress-callback trait for per-document batch events.
//!
//! Inject an [`Arc<dyn BatchProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to receive
//! events as the batch driver works through its inputs.
//!
//! # Example
//!
//! ```rust
//! use submarket_extract::{BatchProgressCallback, PipelineConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     rows: Arc<AtomicUsize>,
//! }
//!
//! impl BatchProgressCallback for CountingCallback {
//!     fn on_document_complete(&self, input: &str, rows: usize) {
//!         self.rows.fetch_add(rows, Ordering::SeqCst);
//!         eprintln!("{input}: {rows} rows");
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback {
//!     rows: Arc::new(AtomicUsize::new(0)),
//! });
//!
//! let config = PipelineConfig::builder()
//!     .progress_callback(counter as Arc<dyn BatchProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the batch driver as it processes each document.
///
/// Documents run concurrently, so `on_document_*` methods may be called from
/// different tasks at the same time. All methods default to no-ops.
pub trait BatchProgressCallback: Send + Sync {
    /// Called once before any document is opened.
    fn on_batch_start(&self, total_documents: usize) {
        let _ = total_documents;
    }

    /// Called when a document's pipeline run begins.
    fn on_document_start(&self, input: &str) {
        let _ = input;
    }

    /// Called when a document produced a canonical result.
    ///
    /// `rows` may be zero: a selected table with only a header is valid.
    fn on_document_complete(&self, input: &str, rows: usize) {
        let _ = (input, rows);
    }

    /// Called when a document failed and was skipped.
    fn on_document_error(&self, input: &str, error: &str) {
        let _ = (input, error);
    }

    /// Called once after every document has been attempted.
    fn on_batch_complete(&self, total_documents: usize, success_count: usize) {
        let _ = (total_documents, success_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl BatchProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn BatchProgressCallback>;
