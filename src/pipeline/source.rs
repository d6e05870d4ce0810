//! Document sources: turn a file on disk into a [`Document`] of cell grids.
//!
//! The pipeline only needs pages and, per page, raw cell grids. Two sources
//! provide them:
//!
//! * [`PdfiumSource`] reads each page's text layer through pdfium and groups
//!   consecutive multi-cell lines into grids.
//! * [`JsonSource`] loads a document someone already extracted (with another
//!   parser, or by hand for tests).
//!
//! [`AutoSource`] picks one by file extension. Sources are blocking; the
//! controller calls them inside `spawn_blocking` because pdfium is not
//! async-safe.

use crate::error::PipelineError;
use crate::model::{Document, Page, SourceTable};
use crate::pipeline::input::is_json_document;
use pdfium_render::prelude::*;
use std::path::Path;
use tracing::{debug, info, warn};

/// Supplies a [`Document`] for a local path.
pub trait DocumentSource: Send + Sync {
    /// Load the whole document. Any failure to open or read it is fatal.
    fn load(&self, path: &Path) -> Result<Document, PipelineError>;
}

/// Document id: the file stem.
pub fn document_id(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn access_error(path: &Path, reason: impl Into<String>) -> PipelineError {
    PipelineError::DocumentAccess {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

// ── JSON ─────────────────────────────────────────────────────────────────

/// Loads a pre-extracted document from JSON:
///
/// ```json
/// {"id": "Dallas_Q2_2025",
///  "pages": [{"index": 1, "tables": [{"caption": "Submarket Statistics",
///                                     "rows": [[null, "Vacancy %"], ["North", "5.4%"]]}]}]}
/// ```
///
/// `id` defaults to the file stem when empty.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSource;

impl DocumentSource for JsonSource {
    fn load(&self, path: &Path) -> Result<Document, PipelineError> {
        let text = std::fs::read_to_string(path).map_err(|e| access_error(path, e.to_string()))?;
        let mut document: Document = serde_json::from_str(&text)
            .map_err(|e| access_error(path, format!("invalid document JSON: {e}")))?;
        if document.id.trim().is_empty() {
            document.id = document_id(path);
        }
        debug!(
            "Loaded JSON document '{}' ({} pages, {} tables)",
            document.id,
            document.pages.len(),
            document.table_count()
        );
        Ok(document)
    }
}

// ── PDF ──────────────────────────────────────────────────────────────────

/// Reads tables from a PDF's text layer.
#[derive(Debug, Clone)]
pub struct PdfiumSource {
    /// Minimum cells a line needs to count as a table row.
    pub min_cols: usize,
    pub password: Option<String>,
}

impl Default for PdfiumSource {
    fn default() -> Self {
        Self {
            min_cols: 3,
            password: None,
        }
    }
}

impl DocumentSource for PdfiumSource {
    fn load(&self, path: &Path) -> Result<Document, PipelineError> {
        let pdfium = Pdfium::default();
        let document = pdfium
            .load_pdf_from_file(path, self.password.as_deref())
            .map_err(|e| access_error(path, format!("{e:?}")))?;

        let id = document_id(path);
        let mut pages = Vec::new();
        for (idx, page) in document.pages().iter().enumerate() {
            let index = idx + 1;
            let text = match page.text() {
                Ok(text) => text.all(),
                Err(e) => {
                    warn!("Page {}: text layer unreadable, skipping: {:?}", index, e);
                    continue;
                }
            };
            let tables = detect_tables(&text, self.min_cols);
            debug!("Page {}: {} table(s) detected", index, tables.len());
            pages.push(Page { index, tables });
        }

        info!("PDF '{}' loaded: {} pages", id, pages.len());
        Ok(Document { id, pages })
    }
}

/// Chooses [`JsonSource`] for `.json` files and [`PdfiumSource`] otherwise.
#[derive(Debug, Clone, Default)]
pub struct AutoSource {
    pub pdf: PdfiumSource,
}

impl DocumentSource for AutoSource {
    fn load(&self, path: &Path) -> Result<Document, PipelineError> {
        if is_json_document(path) {
            JsonSource.load(path)
        } else {
            self.pdf.load(path)
        }
    }
}

// ── Text layout → grids ──────────────────────────────────────────────────

/// Split a line into cells on tabs and runs of two or more spaces.
pub(crate) fn split_line_into_cells(line: &str) -> Vec<String> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    let mut cells = Vec::new();
    let mut current = String::new();
    let mut whitespace_run = 0_usize;

    let flush = |current: &mut String, cells: &mut Vec<String>| {
        if !current.trim().is_empty() {
            cells.push(current.trim().to_string());
        }
        current.clear();
    };

    for ch in trimmed.chars() {
        if ch == '\t' {
            flush(&mut current, &mut cells);
            whitespace_run = 0;
        } else if ch.is_whitespace() {
            whitespace_run += 1;
            if whitespace_run == 2 {
                flush(&mut current, &mut cells);
            } else if whitespace_run == 1 {
                current.push(' ');
            }
        } else {
            whitespace_run = 0;
            current.push(ch);
        }
    }
    flush(&mut current, &mut cells);

    cells
}

/// Split a single-spaced line into a leading label and trailing numeric cells.
///
/// `Southeast 12,345,678 5.4% (1,234)` → `["Southeast", "12,345,678", "5.4%", "(1,234)"]`.
///
/// A line without a label or without numbers stays one cell, so prose and
/// single-spaced headings never turn into rows.
pub(crate) fn split_label_and_numbers(line: &str) -> Vec<String> {
    let words: Vec<&str> = line.split_whitespace().collect();
    if words.is_empty() {
        return Vec::new();
    }
    let first_numeric = words.iter().position(|w| looks_numeric(w));
    match first_numeric {
        Some(0) | None => vec![words.join(" ")],
        Some(pos) => {
            let mut cells = vec![words[..pos].join(" ")];
            cells.extend(words[pos..].iter().map(|w| w.to_string()));
            cells
        }
    }
}

fn looks_numeric(word: &str) -> bool {
    let core = word.trim_matches(|c: char| "()$%-+".contains(c));
    !core.is_empty()
        && core.chars().any(|c| c.is_ascii_digit())
        && core.chars().all(|c| c.is_ascii_digit() || c == ',' || c == '.')
        || matches!(word, "-" | "N/A" | "n/a" | "--")
}

/// Group consecutive row-like lines into grids.
///
/// A line is row-like when it splits into at least `min_cols` cells. The last
/// short, non-row line before a grid becomes its caption. Runs of fewer than
/// two rows are discarded.
pub(crate) fn detect_tables(text: &str, min_cols: usize) -> Vec<SourceTable> {
    let mut tables = Vec::new();
    let mut current: Vec<Vec<String>> = Vec::new();
    let mut caption: Option<String> = None;
    let mut last_text_line: Option<String> = None;

    for line in text.lines() {
        let mut cells = split_line_into_cells(line);
        if cells.len() < min_cols {
            let soft = split_label_and_numbers(line);
            let looks_like_sentence = line.trim_end().ends_with(['.', '!', '?']);
            if soft.len() >= min_cols && !looks_like_sentence {
                cells = soft;
            }
        }

        if cells.len() >= min_cols {
            if current.is_empty() {
                caption = last_text_line.take();
            }
            current.push(cells);
            continue;
        }

        flush_table(&mut current, &mut caption, &mut tables);
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            last_text_line = Some(trimmed.to_string());
        }
    }
    flush_table(&mut current, &mut caption, &mut tables);

    tables
}

fn flush_table(
    rows: &mut Vec<Vec<String>>,
    caption: &mut Option<String>,
    tables: &mut Vec<SourceTable>,
) {
    if rows.len() >= 2 {
        let mut table = SourceTable::from_rows(std::mem::take(rows));
        table.caption = caption.take();
        tables.push(table);
    } else {
        rows.clear();
        *caption = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn splits_double_space_separated_cells() {
        assert_eq!(
            split_line_into_cells("North Fort Worth  12,000  5.4%"),
            vec!["North Fort Worth", "12,000", "5.4%"]
        );
    }

    #[test]
    fn splits_tab_separated_cells() {
        assert_eq!(split_line_into_cells("A\tB\t\tC"), vec!["A", "B", "C"]);
    }

    #[test]
    fn label_then_numbers() {
        assert_eq!(
            split_label_and_numbers("Great Southwest 12,345 5.4% (1,234) -"),
            vec!["Great Southwest", "12,345", "5.4%", "(1,234)", "-"]
        );
    }

    #[test]
    fn words_without_numbers_stay_one_cell() {
        assert_eq!(
            split_label_and_numbers("Industrial Market Report Overview"),
            vec!["Industrial Market Report Overview"]
        );
        assert_eq!(
            split_label_and_numbers("Submarket Net Rentable Area Vacancy Rate"),
            vec!["Submarket Net Rentable Area Vacancy Rate"]
        );
        assert_eq!(split_label_and_numbers("2,000 5.0% 1.2%"), vec!["2,000 5.0% 1.2%"]);
    }

    #[test]
    fn title_line_above_grid_is_caption_not_header() {
        let text = "Industrial Market Report Overview\n\
                    Submarket  Inventory  Vacancy Rate\n\
                    North  1,000  5.0%\n\
                    South  2,000  6.0%";
        let tables = detect_tables(text, 3);
        assert_eq!(tables.len(), 1);
        assert_eq!(
            tables[0].caption.as_deref(),
            Some("Industrial Market Report Overview")
        );
        assert_eq!(tables[0].rows.len(), 3);
        let header: Vec<&str> = tables[0].rows[0]
            .iter()
            .map(|c| c.as_deref().unwrap_or(""))
            .collect();
        assert_eq!(header, vec!["Submarket", "Inventory", "Vacancy Rate"]);
    }

    #[test]
    fn single_spaced_label_rows_join_a_grid() {
        let text = "Submarket  Inventory  Vacancy\n\
                    Great Southwest 1,000 5.0%\n\
                    North  2,000  6.0%";
        let tables = detect_tables(text, 3);
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].rows[1][0].as_deref(), Some("Great Southwest"));
    }

    #[test]
    fn detects_grid_with_caption() {
        let text = "Industrial Market Report\n\
                    Submarket Statistics\n\
                    Submarket  Inventory  Vacancy\n\
                    North  1,000  5.0%\n\
                    South  2,000  6.0%\n\
                    \n\
                    Vacancy rose this quarter.";
        let tables = detect_tables(text, 3);
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].caption.as_deref(), Some("Submarket Statistics"));
        assert_eq!(tables[0].rows.len(), 3);
        assert_eq!(tables[0].rows[1][0].as_deref(), Some("North"));
    }

    #[test]
    fn single_row_runs_are_dropped() {
        let text = "Alpha  Beta  Gamma\nplain text line";
        assert!(detect_tables(text, 3).is_empty());
    }

    #[test]
    fn json_source_defaults_id_to_stem() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Austin_Q2_2025.json");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(br#"{"id": "", "pages": [{"index": 1, "tables": []}]}"#)
            .unwrap();
        let doc = JsonSource.load(&path).expect("loads");
        assert_eq!(doc.id, "Austin_Q2_2025");
        assert_eq!(doc.pages.len(), 1);
    }

    #[test]
    fn json_source_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "not json").unwrap();
        let err = JsonSource.load(&path).unwrap_err();
        assert!(matches!(err, PipelineError::DocumentAccess { .. }));
    }
}
