//! Output types: the canonical schema, per-document results, batch results.

use std::fmt;
use std::path::PathBuf;

use csv::{QuoteStyle, WriterBuilder};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// The fixed canonical header line.
pub const CANONICAL_HEADER: &str = "primary_submarket,secondary_submarket,property_type,total_inventory_q,vacancy_q,net_absorption_q,under_construction_q,rent_q,delivered_q,leasing_activity_q";

/// The ten canonical columns, in output order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalColumn {
    PrimarySubmarket,
    SecondarySubmarket,
    PropertyType,
    TotalInventoryQ,
    VacancyQ,
    NetAbsorptionQ,
    UnderConstructionQ,
    RentQ,
    DeliveredQ,
    LeasingActivityQ,
}

impl CanonicalColumn {
    pub const ALL: [CanonicalColumn; 10] = [
        CanonicalColumn::PrimarySubmarket,
        CanonicalColumn::SecondarySubmarket,
        CanonicalColumn::PropertyType,
        CanonicalColumn::TotalInventoryQ,
        CanonicalColumn::VacancyQ,
        CanonicalColumn::NetAbsorptionQ,
        CanonicalColumn::UnderConstructionQ,
        CanonicalColumn::RentQ,
        CanonicalColumn::DeliveredQ,
        CanonicalColumn::LeasingActivityQ,
    ];

    pub fn name(self) -> &'static str {
        match self {
            CanonicalColumn::PrimarySubmarket => "primary_submarket",
            CanonicalColumn::SecondarySubmarket => "secondary_submarket",
            CanonicalColumn::PropertyType => "property_type",
            CanonicalColumn::TotalInventoryQ => "total_inventory_q",
            CanonicalColumn::VacancyQ => "vacancy_q",
            CanonicalColumn::NetAbsorptionQ => "net_absorption_q",
            CanonicalColumn::UnderConstructionQ => "under_construction_q",
            CanonicalColumn::RentQ => "rent_q",
            CanonicalColumn::DeliveredQ => "delivered_q",
            CanonicalColumn::LeasingActivityQ => "leasing_activity_q",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|c| c.name() == name)
    }

    /// Position in the canonical header.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Columns that hold a decimal string (or nothing).
    pub fn is_numeric(self) -> bool {
        !matches!(
            self,
            CanonicalColumn::PrimarySubmarket
                | CanonicalColumn::SecondarySubmarket
                | CanonicalColumn::PropertyType
        )
    }
}

impl fmt::Display for CanonicalColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One row of the canonical schema. Every field is text; empty means missing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub primary_submarket: String,
    pub secondary_submarket: String,
    pub property_type: String,
    pub total_inventory_q: String,
    pub vacancy_q: String,
    pub net_absorption_q: String,
    pub under_construction_q: String,
    pub rent_q: String,
    pub delivered_q: String,
    pub leasing_activity_q: String,
}

impl CanonicalRecord {
    pub fn fields(&self) -> [&str; 10] {
        [
            &self.primary_submarket,
            &self.secondary_submarket,
            &self.property_type,
            &self.total_inventory_q,
            &self.vacancy_q,
            &self.net_absorption_q,
            &self.under_construction_q,
            &self.rent_q,
            &self.delivered_q,
            &self.leasing_activity_q,
        ]
    }

    pub fn get(&self, column: CanonicalColumn) -> &str {
        self.fields()[column.index()]
    }

    pub fn get_mut(&mut self, column: CanonicalColumn) -> &mut String {
        match column {
            CanonicalColumn::PrimarySubmarket => &mut self.primary_submarket,
            CanonicalColumn::SecondarySubmarket => &mut self.secondary_submarket,
            CanonicalColumn::PropertyType => &mut self.property_type,
            CanonicalColumn::TotalInventoryQ => &mut self.total_inventory_q,
            CanonicalColumn::VacancyQ => &mut self.vacancy_q,
            CanonicalColumn::NetAbsorptionQ => &mut self.net_absorption_q,
            CanonicalColumn::UnderConstructionQ => &mut self.under_construction_q,
            CanonicalColumn::RentQ => &mut self.rent_q,
            CanonicalColumn::DeliveredQ => &mut self.delivered_q,
            CanonicalColumn::LeasingActivityQ => &mut self.leasing_activity_q,
        }
    }
}

/// The pipeline's terminal artifact: canonical records under the fixed header.
///
/// Zero records is a valid result (the selected table had only a header).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalResult {
    pub records: Vec<CanonicalRecord>,
}

impl CanonicalResult {
    pub fn new(records: Vec<CanonicalRecord>) -> Self {
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Render as canonical CSV text: header line first, no quoted fields.
    ///
    /// Commas and line breaks inside a field are replaced by spaces so the
    /// field never needs quoting.
    pub fn to_csv(&self) -> Result<String, PipelineError> {
        let mut writer = WriterBuilder::new()
            .quote_style(QuoteStyle::Never)
            .from_writer(Vec::<u8>::new());
        let csv_err = |e: csv::Error| PipelineError::Internal(format!("csv write: {e}"));

        writer
            .write_record(CanonicalColumn::ALL.iter().map(|c| c.name()))
            .map_err(csv_err)?;
        for record in &self.records {
            writer
                .write_record(record.fields().iter().map(|f| unquotable(f)))
                .map_err(csv_err)?;
        }
        writer
            .flush()
            .map_err(|e| PipelineError::Internal(format!("csv flush: {e}")))?;

        let bytes = writer
            .into_inner()
            .map_err(|e| PipelineError::Internal(format!("csv buffer: {}", e.error())))?;
        String::from_utf8(bytes).map_err(|e| PipelineError::Internal(format!("csv utf-8: {e}")))
    }

    /// Concatenate several results, preserving order.
    pub fn concat<'a>(results: impl IntoIterator<Item = &'a CanonicalResult>) -> Self {
        Self {
            records: results
                .into_iter()
                .flat_map(|r| r.records.iter().cloned())
                .collect(),
        }
    }
}

fn unquotable(field: &str) -> String {
    let replaced = field.replace([',', '\n', '\r'], " ");
    replaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Counters collected while one document runs through the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    /// Stage entries plus oracle re-asks charged to the retry budget.
    pub stage_invocations: u32,
    /// Oracle requests actually sent.
    pub oracle_calls: u32,
    /// Geographic lookups answered from the per-run cache.
    pub cache_hits: u32,
    pub candidate_tables: usize,
    pub skipped_tables: usize,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub duration_ms: u64,
}

/// Everything produced for one successfully processed document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentOutput {
    pub document_id: String,
    /// 1-based page of the selected table.
    pub source_page: usize,
    pub result: CanonicalResult,
    pub stats: RunStats,
}

/// Outcome for one input of a batch.
#[derive(Debug)]
pub struct DocumentOutcome {
    /// The input as given (path or URL).
    pub input: String,
    /// Position of the input in the batch, used to restore input order.
    pub position: usize,
    pub result: Result<DocumentOutput, PipelineError>,
}

/// Aggregated results of a batch run.
#[derive(Debug, Default)]
pub struct BatchOutput {
    /// Outcomes sorted by input position.
    pub outcomes: Vec<DocumentOutcome>,
    pub duration_ms: u64,
}

impl BatchOutput {
    pub fn succeeded(&self) -> impl Iterator<Item = &DocumentOutput> {
        self.outcomes.iter().filter_map(|o| o.result.as_ref().ok())
    }

    pub fn failed(&self) -> impl Iterator<Item = (&str, &PipelineError)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (o.input.as_str(), e)))
    }

    /// Failures that point at the setup (access, provider, budget) rather
    /// than at the document's content.
    pub fn hard_failures(&self) -> impl Iterator<Item = (&str, &PipelineError)> {
        self.failed().filter(|(_, e)| !e.is_recoverable())
    }

    pub fn success_count(&self) -> usize {
        self.succeeded().count()
    }

    pub fn failure_count(&self) -> usize {
        self.failed().count()
    }

    /// All successful results merged into one, in input order.
    pub fn merged(&self) -> CanonicalResult {
        CanonicalResult::concat(self.succeeded().map(|o| &o.result))
    }

    /// Write the merged CSV atomically (temp file + rename).
    pub async fn write_merged_csv(&self, path: impl Into<PathBuf>) -> Result<usize, PipelineError> {
        let path = path.into();
        let merged = self.merged();
        let text = merged.to_csv()?;
        let write_err = |source| PipelineError::OutputWriteFailed {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
        }
        let tmp_path = path.with_extension("csv.tmp");
        tokio::fs::write(&tmp_path, text).await.map_err(write_err)?;
        tokio::fs::rename(&tmp_path, &path).await.map_err(write_err)?;
        Ok(merged.len())
    }
}
