//! Document and table data model shared by every pipeline stage.
//!
//! ```text
//! Document ─▶ Page ─▶ SourceTable        (what the document source produced)
//!                         │ extract
//!                         ▼
//!                     RawTable ─▶ TableCandidateSet ─▶ SelectedTable
//! ```
//!
//! Every stage allocates a new artifact; nothing here is mutated after it is
//! handed to the next stage.

use serde::{Deserialize, Serialize};

use crate::error::TableError;

/// A loaded report: ordered pages, read-only once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Identifier used for logs and for deriving the metro context,
    /// normally the file stem (e.g. `Dallas_Industrial_2025Q2`).
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub pages: Vec<Page>,
}

impl Document {
    pub fn new(id: impl Into<String>, pages: Vec<Page>) -> Self {
        Self {
            id: id.into(),
            pages,
        }
    }

    /// Geographic context of the report, taken from the identifier prefix.
    ///
    /// `Dallas-Fort-Worth_Q2_2025` → `Dallas Fort Worth`.
    pub fn metro_context(&self) -> String {
        self.id
            .split('_')
            .next()
            .unwrap_or_default()
            .replace('-', " ")
            .trim()
            .to_string()
    }

    /// Total number of tables over all pages, before any filtering.
    pub fn table_count(&self) -> usize {
        self.pages.iter().map(|p| p.tables.len()).sum()
    }
}

/// One page of a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    /// 1-based page index.
    pub index: usize,
    #[serde(default)]
    pub tables: Vec<SourceTable>,
}

/// A cell grid exactly as the document source produced it.
///
/// Cells may be missing (`None`) and rows may be ragged.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SourceTable {
    /// Text line found directly above the grid, if any.
    #[serde(default)]
    pub caption: Option<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl SourceTable {
    /// Build a grid from plain string rows (every cell present).
    pub fn from_rows<R, C>(rows: R) -> Self
    where
        R: IntoIterator<Item = C>,
        C: IntoIterator,
        C::Item: Into<String>,
    {
        Self {
            caption: None,
            rows: rows
                .into_iter()
                .map(|row| row.into_iter().map(|c| Some(c.into())).collect())
                .collect(),
        }
    }

    pub fn with_caption(mut self, caption: impl Into<String>) -> Self {
        self.caption = Some(caption.into());
        self
    }
}

/// A candidate table: row 0 is the header candidate, the rest are data rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTable {
    /// 1-based index of the page the table came from.
    pub page: usize,
    /// 0-based position of the table on its page.
    pub position: usize,
    pub caption: Option<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    pub fn header(&self) -> &[String] {
        self.rows.first().map(Vec::as_slice).unwrap_or_default()
    }

    pub fn data_rows(&self) -> &[Vec<String>] {
        self.rows.get(1..).unwrap_or_default()
    }

    pub fn width(&self) -> usize {
        self.header().len()
    }

    /// First-column values of the data rows.
    pub fn first_column(&self) -> impl Iterator<Item = &str> {
        self.data_rows()
            .iter()
            .map(|row| row.first().map(String::as_str).unwrap_or(""))
    }

    /// Whether every row has the header's width.
    pub fn is_rectangular(&self) -> bool {
        let width = self.width();
        self.rows.iter().all(|row| row.len() == width)
    }
}

/// Ordered candidates for one document: page order, then position on page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableCandidateSet {
    pub tables: Vec<RawTable>,
    /// Tables dropped during extraction because they were malformed.
    #[serde(default)]
    pub skipped: Vec<TableError>,
}

impl TableCandidateSet {
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, RawTable> {
        self.tables.iter()
    }
}

/// The single table chosen as the submarket statistics table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectedTable {
    pub table: RawTable,
    /// Index of the table within its [`TableCandidateSet`].
    pub candidate_index: usize,
}

impl SelectedTable {
    /// 1-based page the table was found on.
    pub fn page(&self) -> usize {
        self.table.page
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metro_context_from_identifier() {
        let doc = Document::new("Dallas-Fort-Worth_Industrial_Q2", vec![]);
        assert_eq!(doc.metro_context(), "Dallas Fort Worth");
        let doc = Document::new("Phoenix", vec![]);
        assert_eq!(doc.metro_context(), "Phoenix");
    }

    #[test]
    fn raw_table_accessors() {
        let t = RawTable {
            page: 1,
            position: 0,
            caption: None,
            rows: vec![
                vec!["Submarket".into(), "Vacancy".into()],
                vec!["North".into(), "5%".into()],
                vec![],
            ],
        };
        assert_eq!(t.width(), 2);
        assert_eq!(t.data_rows().len(), 2);
        assert_eq!(t.first_column().collect::<Vec<_>>(), vec!["North", ""]);
        assert!(!t.is_rectangular());
    }

    #[test]
    fn source_table_json_accepts_null_cells() {
        let json = r#"{"rows": [[null, "Vacancy %"], ["Southeast", "5.4%"]]}"#;
        let t: SourceTable = serde_json::from_str(json).expect("valid json");
        assert_eq!(t.rows[0][0], None);
        assert_eq!(t.caption, None);
    }
}
