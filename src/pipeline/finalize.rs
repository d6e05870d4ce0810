//! Output finalization: cut the canonical CSV out of arbitrary text.
//!
//! Generated text often arrives wrapped in prose or a ```` ```csv ```` fence.
//! The finalizer starts at the first `primary_submarket`, stops at a closing
//! fence, and parses what is left by header name.

use crate::error::PipelineError;
use crate::output::{CanonicalColumn, CanonicalRecord, CanonicalResult};
use crate::process::Stage;
use csv::{ReaderBuilder, Trim};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

/// The token the canonical header starts with.
pub const HEADER_TOKEN: &str = "primary_submarket";

static RE_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*```[A-Za-z]*\s*$").unwrap());

fn preview(text: &str) -> String {
    text.chars().take(80).collect()
}

/// Byte offset of the canonical header in `text`.
pub fn locate_header(text: &str) -> Result<usize, PipelineError> {
    text.find(HEADER_TOKEN)
        .ok_or_else(|| PipelineError::HeaderNotFound {
            preview: preview(text.trim_start()),
        })
}

/// The CSV body: from the header token up to a closing fence, without
/// blank lines and with `\n` line endings.
pub fn extract_csv(text: &str) -> Result<String, PipelineError> {
    let start = locate_header(text)?;
    let body = text[start..].replace("\r\n", "\n").replace('\r', "\n");

    let lines: Vec<&str> = body
        .lines()
        .take_while(|line| !RE_FENCE.is_match(line))
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .collect();

    Ok(lines.join("\n") + "\n")
}

/// Parse canonical CSV text out of `text`.
///
/// Columns are matched by header name: unknown columns are ignored and
/// missing ones stay empty. The header row must name `primary_submarket`
/// as a column of its own. Fully empty lines are dropped.
pub fn finalize(text: &str) -> Result<CanonicalResult, PipelineError> {
    let csv_text = extract_csv(text)?;
    let invalid = |e: csv::Error| PipelineError::OracleResponseInvalid {
        stage: Stage::Finalize,
        response: e.to_string(),
    };

    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(csv_text.as_bytes());

    let columns: Vec<Option<CanonicalColumn>> = reader
        .headers()
        .map_err(invalid)?
        .iter()
        .map(CanonicalColumn::from_name)
        .collect();
    if !columns.contains(&Some(CanonicalColumn::PrimarySubmarket)) {
        return Err(PipelineError::OracleResponseInvalid {
            stage: Stage::Finalize,
            response: format!("no primary_submarket column in '{}'", preview(&csv_text)),
        });
    }

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row.map_err(invalid)?;
        if row.iter().all(|f| f.is_empty()) {
            continue;
        }
        let mut record = CanonicalRecord::default();
        for (value, column) in row.iter().zip(&columns) {
            if let Some(column) = column {
                *record.get_mut(*column) = value.to_string();
            }
        }
        records.push(record);
    }

    debug!("Finalized {} canonical record(s)", records.len());
    Ok(CanonicalResult::new(records))
}
