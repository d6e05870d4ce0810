//! Schema mapping: selected table → canonical columns.
//!
//! Each canonical column has an ordered list of header rules. Columns are
//! resolved in canonical order; within a column the first rule that matches
//! any still-unclaimed source header wins, scanning headers left to right.
//! A source column feeds at most one canonical column.
//!
//! Headers are compared after [`normalize_header`], with whole-word phrase
//! matching, so "Avg. Asking Rent ($/SF)" matches the phrase `asking rent`.

use crate::error::PipelineError;
use crate::model::SelectedTable;
use crate::oracle::OracleRequest;
use crate::output::{CanonicalColumn, CanonicalRecord, CanonicalResult};
use crate::pipeline::finalize::finalize;
use crate::process::{RunContext, Stage};
use crate::prompts::{mapping_request, MAPPING_SYSTEM_PROMPT};
use once_cell::sync::Lazy;
use tracing::debug;

/// Which reporting period a rule accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Period {
    /// Header names the current quarter.
    Quarterly,
    /// Header does not say year-to-date.
    NotYtd,
    Any,
}

const QUARTER_MARKERS: &[&str] = &[
    "q1", "q2", "q3", "q4", "1q", "2q", "3q", "4q", "qtr", "qtd", "quarter", "quarterly",
    "current",
];
const YTD_MARKERS: &[&str] = &["ytd", "year to date"];

#[derive(Debug, Clone, Copy)]
struct Rule {
    all: &'static [&'static str],
    none: &'static [&'static str],
    period: Period,
}

const fn rule(all: &'static [&'static str], none: &'static [&'static str]) -> Rule {
    Rule {
        all,
        none,
        period: Period::Any,
    }
}

/// Quarterly first, then anything not marked YTD, then YTD.
fn by_period(terms: &[&'static [&'static str]], none: &'static [&'static str]) -> Vec<Rule> {
    [Period::Quarterly, Period::NotYtd, Period::Any]
        .into_iter()
        .flat_map(|period| terms.iter().map(move |&all| Rule { all, none, period }))
        .collect()
}

static RULES: Lazy<Vec<(CanonicalColumn, Vec<Rule>)>> = Lazy::new(|| {
    use CanonicalColumn::*;
    vec![
        (
            PrimarySubmarket,
            vec![
                rule(&["primary submarket"], &[]),
                rule(&["submarket"], &["secondary"]),
                rule(&["county"], &[]),
            ],
        ),
        (
            SecondarySubmarket,
            vec![
                rule(&["secondary submarket"], &[]),
                rule(&["city"], &[]),
                rule(&["secondary"], &[]),
            ],
        ),
        (
            PropertyType,
            vec![
                rule(&["property type"], &[]),
                rule(&["product type"], &[]),
                rule(&["building type"], &[]),
                rule(&["type"], &["size"]),
            ],
        ),
        (
            TotalInventoryQ,
            vec![
                rule(&["net rentable area"], &["vacant"]),
                rule(&["nra"], &[]),
                rule(&["rba"], &[]),
                rule(&["bldg sf"], &[]),
                rule(&["building sf"], &[]),
                rule(&["total inventory"], &["pct"]),
                rule(&["inventory"], &["construction", "pct", "deliver"]),
            ],
        ),
        (
            VacancyQ,
            vec![
                rule(&["total vacancy"], &["sf"]),
                rule(&["vacancy rate"], &[]),
                rule(&["vacancy pct"], &[]),
                rule(&["vacant pct"], &[]),
                rule(&["vacancy"], &["sf", "availability", "change"]),
            ],
        ),
        (
            NetAbsorptionQ,
            [
                by_period(&[&["net absorption"]], &["pct"]),
                vec![rule(&["absorption"], &["gross", "pct"])],
            ]
            .concat(),
        ),
        (
            UnderConstructionQ,
            vec![
                rule(&["under construction"], &["pct"]),
                rule(&["under const"], &["pct"]),
                rule(&["under constr"], &["pct"]),
                rule(&["construction"], &["pct", "deliver", "completed"]),
            ],
        ),
        (
            RentQ,
            vec![
                rule(&["industrial", "rent"], &["flex", "office"]),
                rule(&["warehouse", "rent"], &["flex", "office"]),
                rule(&["whs", "rent"], &["flex", "office"]),
                rule(&["w d", "rent"], &["flex", "office"]),
                rule(&["asking rent"], &["flex", "office"]),
                rule(&["rent"], &["flex", "office", "pct"]),
            ],
        ),
        (
            DeliveredQ,
            by_period(
                &[&["deliveries"], &["delivered"], &["completions"]],
                &["pct"],
            ),
        ),
        (
            LeasingActivityQ,
            vec![
                rule(&["sq ft leased"], &[]),
                rule(&["sf leased"], &[]),
                rule(&["square feet leased"], &[]),
                rule(&["gross absorption"], &[]),
                rule(&["gross activity"], &[]),
                rule(&["leasing activity"], &[]),
                rule(&["leasing"], &[]),
            ],
        ),
    ]
});

/// Lowercase, `%` → `pct`, punctuation → spaces, single-spaced, with a
/// leading and trailing space so phrases can be matched as whole words.
pub fn normalize_header(header: &str) -> String {
    let replaced: String = header
        .to_lowercase()
        .replace('%', " pct ")
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    format!(" {} ", replaced.split_whitespace().collect::<Vec<_>>().join(" "))
}

fn contains_phrase(normalized: &str, phrase: &str) -> bool {
    normalized.contains(&format!(" {phrase} "))
}

impl Rule {
    fn matches(&self, normalized: &str) -> bool {
        let period_ok = match self.period {
            Period::Quarterly => QUARTER_MARKERS.iter().any(|m| contains_phrase(normalized, m)),
            Period::NotYtd => !YTD_MARKERS.iter().any(|m| contains_phrase(normalized, m)),
            Period::Any => true,
        };
        period_ok
            && self.all.iter().all(|p| contains_phrase(normalized, p))
            && !self.none.iter().any(|p| contains_phrase(normalized, p))
    }
}

/// Source column index per canonical column.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnMapping {
    sources: [Option<usize>; 10],
}

impl ColumnMapping {
    /// Resolve every canonical column against a header row.
    pub fn resolve(header: &[String]) -> Self {
        let normalized: Vec<String> = header.iter().map(|h| normalize_header(h)).collect();
        let mut claimed = vec![false; header.len()];
        let mut mapping = ColumnMapping::default();

        for (column, rules) in RULES.iter() {
            let found = rules.iter().find_map(|rule| {
                normalized
                    .iter()
                    .enumerate()
                    .find(|(i, h)| !claimed[*i] && rule.matches(h))
                    .map(|(i, _)| i)
            });
            // The first column is the geography even without a recognised name.
            let found = match (column, found) {
                (CanonicalColumn::PrimarySubmarket, None) if !header.is_empty() => Some(0),
                (_, found) => found,
            };
            if let Some(i) = found {
                claimed[i] = true;
                mapping.sources[column.index()] = Some(i);
                debug!("{} <- '{}'", column, header[i]);
            } else {
                debug!("{} unresolved", column);
            }
        }
        mapping
    }

    pub fn source(&self, column: CanonicalColumn) -> Option<usize> {
        self.sources[column.index()]
    }

    /// Canonical columns that found no source header.
    pub fn unresolved(&self) -> Vec<CanonicalColumn> {
        CanonicalColumn::ALL
            .into_iter()
            .filter(|c| self.source(*c).is_none())
            .collect()
    }
}

/// The selected table re-expressed in canonical columns, values still raw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedTable {
    pub records: Vec<CanonicalRecord>,
    pub mapping: ColumnMapping,
}

/// Map every data row of the selected table. Rows are never dropped.
pub fn map(selected: &SelectedTable) -> MappedTable {
    let table = &selected.table;
    let mapping = ColumnMapping::resolve(table.header());

    let records = table
        .data_rows()
        .iter()
        .map(|row| {
            let mut record = CanonicalRecord::default();
            for column in CanonicalColumn::ALL {
                if let Some(value) = mapping.source(column).and_then(|i| row.get(i)) {
                    *record.get_mut(column) = value.clone();
                }
            }
            record
        })
        .collect();

    MappedTable { records, mapping }
}

/// Ask the oracle to write the canonical CSV for the selected table.
///
/// The reply is finalized as it is validated: a reply without a usable
/// canonical header counts as invalid and is re-asked within the run's
/// retry budget.
pub async fn map_with_oracle(
    selected: &SelectedTable,
    metro: &str,
    run: &mut RunContext,
) -> Result<CanonicalResult, PipelineError> {
    let request =
        OracleRequest::generation(MAPPING_SYSTEM_PROMPT, mapping_request(metro, &selected.table));
    run.ask(Stage::Map, &request, finalize).await
}
