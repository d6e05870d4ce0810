//! Batch driver: many documents, one merged canonical table.
//!
//! Documents run on a bounded pool (`buffer_unordered(concurrency)`), each
//! under its own wall-clock timeout. A failing document is reported in its
//! [`DocumentOutcome`] and never affects its siblings.
//!
//! [`process_batch`] waits for everything and restores input order;
//! [`process_batch_stream`] yields outcomes as they complete.

use crate::error::PipelineError;
use crate::output::{BatchOutput, DocumentOutcome};
use crate::process::Pipeline;
use futures::stream::{self, StreamExt};
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{timeout, Duration};
use tokio_stream::Stream;
use tracing::{error, info, warn};

/// A boxed stream of per-document outcomes, in completion order.
pub type OutcomeStream = Pin<Box<dyn Stream<Item = DocumentOutcome> + Send>>;

/// Process every input and collect the outcomes in input order.
pub async fn process_batch(pipeline: &Pipeline, inputs: &[String]) -> BatchOutput {
    let started = Instant::now();
    let config = pipeline.config();
    info!(
        "Starting batch of {} document(s), concurrency {}",
        inputs.len(),
        config.concurrency
    );
    if let Some(ref cb) = config.progress_callback {
        cb.on_batch_start(inputs.len());
    }

    let mut outcomes: Vec<DocumentOutcome> = stream::iter(
        inputs
            .iter()
            .enumerate()
            .map(|(position, input)| run_one(pipeline, position, input.clone())),
    )
    .buffer_unordered(config.concurrency)
    .collect()
    .await;
    outcomes.sort_by_key(|o| o.position);

    let output = BatchOutput {
        outcomes,
        duration_ms: started.elapsed().as_millis() as u64,
    };
    info!(
        "Batch complete: {}/{} document(s) succeeded in {}ms",
        output.success_count(),
        inputs.len(),
        output.duration_ms
    );
    if let Some(ref cb) = config.progress_callback {
        cb.on_batch_complete(inputs.len(), output.success_count());
    }
    output
}

/// Process every input, yielding outcomes as soon as each finishes.
///
/// Only per-document progress events fire; there is no batch-complete event
/// because the caller owns the end of the stream.
pub fn process_batch_stream(pipeline: Arc<Pipeline>, inputs: Vec<String>) -> OutcomeStream {
    let concurrency = pipeline.config().concurrency;
    if let Some(ref cb) = pipeline.config().progress_callback {
        cb.on_batch_start(inputs.len());
    }
    let s = stream::iter(inputs.into_iter().enumerate().map(move |(position, input)| {
        let pipeline = Arc::clone(&pipeline);
        async move { run_one(&pipeline, position, input).await }
    }))
    .buffer_unordered(concurrency);
    Box::pin(s)
}

async fn run_one(pipeline: &Pipeline, position: usize, input: String) -> DocumentOutcome {
    let config = pipeline.config();
    if let Some(ref cb) = config.progress_callback {
        cb.on_document_start(&input);
    }

    let secs = config.document_timeout_secs;
    let result = match timeout(Duration::from_secs(secs), pipeline.process(&input)).await {
        Ok(result) => result,
        Err(_) => Err(PipelineError::Timeout {
            document: input.clone(),
            secs,
        }),
    };

    match &result {
        Ok(output) => {
            if let Some(ref cb) = config.progress_callback {
                cb.on_document_complete(&input, output.result.len());
            }
        }
        Err(e) => {
            if e.is_recoverable() {
                warn!("Skipping '{}': {}", input, e);
            } else {
                error!("Failed '{}': {}", input, e);
            }
            if let Some(ref cb) = config.progress_callback {
                cb.on_document_error(&input, &e.to_string());
            }
        }
    }

    DocumentOutcome {
        input,
        position,
        result,
    }
}

/// Expand directories into their `.pdf` / `.json` files, sorted by name.
/// URLs and file paths pass through unchanged.
pub fn expand_inputs(inputs: &[String]) -> Result<Vec<String>, PipelineError> {
    let mut expanded = Vec::new();
    for input in inputs {
        let path = Path::new(input);
        if !path.is_dir() {
            expanded.push(input.clone());
            continue;
        }
        let entries = std::fs::read_dir(path).map_err(|e| PipelineError::DocumentAccess {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let mut files: Vec<String> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|p| p.is_file() && has_document_extension(p))
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        files.sort();
        expanded.extend(files);
    }
    Ok(expanded)
}

fn has_document_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("pdf") || e.eq_ignore_ascii_case("json"))
}
