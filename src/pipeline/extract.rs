//! Table extraction: document pages → ordered candidate tables.
//!
//! Purely structural. Candidates keep page order, then their position on the
//! page, so selection downstream is deterministic.

use crate::error::TableError;
use crate::model::{Document, RawTable, SourceTable, TableCandidateSet};
use tracing::{debug, warn};

/// Turn every usable grid of the document into a [`RawTable`] candidate.
///
/// Grids with fewer than two non-blank rows are discarded; a malformed grid
/// is recorded as a [`TableError`] and skipped.
pub fn extract(document: &Document) -> TableCandidateSet {
    let mut set = TableCandidateSet::default();

    for page in &document.pages {
        for (position, source) in page.tables.iter().enumerate() {
            match to_raw_table(page.index, position, source) {
                Ok(Some(table)) => set.tables.push(table),
                Ok(None) => debug!(
                    "Page {}, table {}: fewer than 2 rows, discarded",
                    page.index, position
                ),
                Err(e) => {
                    warn!("Skipping table: {}", e);
                    set.skipped.push(e);
                }
            }
        }
    }

    debug!(
        "Extracted {} candidate(s) from '{}' ({} skipped)",
        set.tables.len(),
        document.id,
        set.skipped.len()
    );
    set
}

fn to_raw_table(
    page: usize,
    position: usize,
    source: &SourceTable,
) -> Result<Option<RawTable>, TableError> {
    let mut rows: Vec<Vec<String>> = source
        .rows
        .iter()
        .map(|row| {
            row.iter()
                .map(|cell| cell.as_deref().unwrap_or_default().trim().to_string())
                .collect::<Vec<_>>()
        })
        .filter(|row| row.iter().any(|c| !c.is_empty()))
        .collect();

    if rows.is_empty() {
        return Err(TableError::Empty { page, position });
    }

    // A leading title row spanning the grid (one filled cell, more columns
    // below) is not the header; keep it as the caption instead.
    let mut caption = source.caption.clone();
    while rows.len() > 2 && is_title_row(&rows[0], &rows[1]) {
        let title = rows.remove(0).into_iter().find(|c| !c.is_empty());
        if caption.is_none() {
            caption = title;
        }
    }

    if rows.iter().all(|row| row.len() < 2) {
        return Err(TableError::NoColumns { page, position });
    }
    if rows.len() < 2 {
        return Ok(None);
    }

    Ok(Some(RawTable {
        page,
        position,
        caption,
        rows,
    }))
}

fn is_title_row(row: &[String], next: &[String]) -> bool {
    let filled = row.iter().filter(|c| !c.is_empty()).count();
    let next_filled = next.iter().filter(|c| !c.is_empty()).count();
    filled == 1 && next_filled > 2
}
