//! Table selection: pick the submarket statistics table among the candidates.
//!
//! 1. Candidates from known non-target families ("by size", "notable
//!    projects", ...) are set aside while any other candidate exists.
//! 2. A candidate is a *strong match* when more than half of its first-column
//!    values are geographic subdivisions of the report's metro.
//! 3. Directional and downtown-style names count as geographic and aggregate
//!    rows ("Total", "Overall") are ignored, both without asking the oracle.
//!    Only the remaining names go to the oracle, once per run.
//! 4. The first strong match in document order wins.

use crate::error::PipelineError;
use crate::model::{RawTable, SelectedTable, TableCandidateSet};
use crate::oracle::{parse_yes_no, OracleRequest};
use crate::process::{RunContext, Stage};
use crate::prompts::{geography_question, GEOGRAPHY_SYSTEM_PROMPT};
use tracing::{debug, info, warn};

/// Header/caption fragments of table families that are never the target.
pub const DENYLIST: &[&str] = &[
    "by size",
    "by building size",
    "by class",
    "by property type",
    "size range",
    "size class",
    "notable project",
    "notable lease",
    "notable sale",
    "top transaction",
    "top lease",
    "largest lease",
    "lease transaction",
    "sales transaction",
    "construction pipeline",
    "under construction project",
];

/// Names that are geographic in every metro.
const GENERIC_GEOGRAPHY: &[&str] = &[
    "north", "south", "east", "west", "northeast", "northwest", "southeast", "southwest",
    "northern", "southern", "eastern", "western", "central", "cbd", "downtown", "midtown",
    "uptown", "n", "s", "e", "w", "ne", "nw", "se", "sw",
];

/// Row labels that summarise other rows.
const AGGREGATES: &[&str] = &["overall", "market", "metro", "all", "average", "avg"];

/// How a first-column value counts towards a strong match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirstColumnValue {
    /// Blank or aggregate: not counted.
    Ignored,
    Geographic,
    NotGeographic,
    /// Needs the oracle.
    Unknown,
}

fn words(value: &str) -> Vec<String> {
    value
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(String::from)
        .collect()
}

/// Classify a first-column value without consulting the oracle.
pub fn classify_first_column_value(value: &str) -> FirstColumnValue {
    let words = words(value);
    if words.is_empty() {
        return FirstColumnValue::Ignored;
    }
    if words.iter().any(|w| w.contains("total"))
        || (words.len() == 1 && AGGREGATES.contains(&words[0].as_str()))
    {
        return FirstColumnValue::Ignored;
    }

    let alnum: Vec<char> = value.chars().filter(|c| c.is_alphanumeric()).collect();
    let digits = alnum.iter().filter(|c| c.is_ascii_digit()).count();
    if digits * 2 > alnum.len() {
        return FirstColumnValue::NotGeographic;
    }

    if words.iter().all(|w| GENERIC_GEOGRAPHY.contains(&w.as_str())) {
        return FirstColumnValue::Geographic;
    }
    FirstColumnValue::Unknown
}

/// Whether the header or caption names a non-target table family.
pub fn is_denylisted(table: &RawTable) -> bool {
    let mut text = table.header().join(" ").to_lowercase();
    if let Some(caption) = &table.caption {
        text.push(' ');
        text.push_str(&caption.to_lowercase());
    }
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    DENYLIST.iter().any(|pattern| text.contains(pattern))
}

/// Choose the submarket statistics table.
///
/// `document` is used for error messages, `metro` as the geographic context
/// for oracle questions.
pub async fn select(
    candidates: &TableCandidateSet,
    document: &str,
    metro: &str,
    run: &mut RunContext,
) -> Result<SelectedTable, PipelineError> {
    if candidates.is_empty() {
        return Err(PipelineError::NoCandidateTables {
            document: document.to_string(),
        });
    }

    let allowed: Vec<usize> = candidates
        .iter()
        .enumerate()
        .filter(|(_, t)| !is_denylisted(t))
        .map(|(i, _)| i)
        .collect();
    let order: Vec<usize> = if allowed.is_empty() {
        warn!(
            "Every candidate in '{}' matches the denylist; evaluating all of them",
            document
        );
        (0..candidates.len()).collect()
    } else {
        allowed
    };

    for index in order {
        let table = &candidates.tables[index];
        if is_strong_match(table, metro, run).await? {
            info!(
                "Selected table {} (page {}, position {}) of '{}'",
                index, table.page, table.position, document
            );
            return Ok(SelectedTable {
                table: table.clone(),
                candidate_index: index,
            });
        }
        debug!(
            "Candidate {} (page {}) is not a submarket table",
            index, table.page
        );
    }

    Err(PipelineError::AmbiguousSelection {
        document: document.to_string(),
        candidates: candidates.len(),
    })
}

/// Majority test over the table's first column.
async fn is_strong_match(
    table: &RawTable,
    metro: &str,
    run: &mut RunContext,
) -> Result<bool, PipelineError> {
    let values: Vec<(&str, FirstColumnValue)> = table
        .first_column()
        .map(|v| (v.trim(), classify_first_column_value(v)))
        .filter(|(_, class)| *class != FirstColumnValue::Ignored)
        .collect();
    let counted = values.len();
    if counted == 0 {
        return Ok(false);
    }

    let (mut geographic, mut other) = (0_usize, 0_usize);
    for (value, class) in values {
        let is_geo = match class {
            FirstColumnValue::Geographic => true,
            FirstColumnValue::NotGeographic | FirstColumnValue::Ignored => false,
            FirstColumnValue::Unknown => is_geographic(value, metro, run).await?,
        };
        if is_geo {
            geographic += 1;
        } else {
            other += 1;
        }
        // Stop once the outcome can no longer change.
        if geographic * 2 > counted {
            return Ok(true);
        }
        if other * 2 >= counted {
            return Ok(false);
        }
    }
    Ok(false)
}

async fn is_geographic(
    name: &str,
    metro: &str,
    run: &mut RunContext,
) -> Result<bool, PipelineError> {
    if let Some(answer) = run.cached_judgement(metro, name) {
        return Ok(answer);
    }

    let request =
        OracleRequest::classification(GEOGRAPHY_SYSTEM_PROMPT, geography_question(metro, name));
    let answer = run
        .ask(Stage::Select, &request, |text| {
            parse_yes_no(text).ok_or_else(|| PipelineError::OracleResponseInvalid {
                stage: Stage::Select,
                response: text.to_string(),
            })
        })
        .await?;

    debug!("Oracle: '{}' in '{}' geographic = {}", name, metro, answer);
    run.remember_judgement(metro, name, answer);
    Ok(answer)
}
