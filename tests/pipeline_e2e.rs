//! End-to-end tests for submarket-extract.
//!
//! Documents are written as pre-extracted JSON into temp directories and the
//! oracle is a scripted stub, so these run offline and need no pdfium library.
//!
//! Run with:
//!   cargo test --test pipeline_e2e -- --nocapture

use async_trait::async_trait;
use serde_json::json;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use submarket_extract::oracle::UnavailableOracle;
use submarket_extract::{
    process_batch, BatchProgressCallback, CanonicalColumn, CanonicalRecord, MappingMode, Oracle, OracleError,
    OracleReply, OracleRequest, Pipeline, PipelineConfig, PipelineError, CANONICAL_HEADER,
};

// ── Test helpers ─────────────────────────────────────────────────────────────

/// Answers from a script, then `fallback` forever.
struct ScriptedOracle {
    replies: Mutex<VecDeque<String>>,
    fallback: String,
    calls: AtomicUsize,
}

impl ScriptedOracle {
    fn new(replies: &[&str], fallback: &str) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            fallback: fallback.to_string(),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Oracle for ScriptedOracle {
    async fn ask(&self, _request: &OracleRequest) -> Result<OracleReply, OracleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.replies.lock().unwrap().pop_front();
        Ok(OracleReply {
            text: next.unwrap_or_else(|| self.fallback.clone()),
            input_tokens: 10,
            output_tokens: 2,
        })
    }
}

fn pipeline(oracle: Arc<dyn Oracle>, mode: MappingMode) -> Pipeline {
    let config = PipelineConfig::builder()
        .mode(mode)
        .oracle(oracle)
        .build()
        .unwrap();
    Pipeline::new(config).unwrap()
}

fn write_doc(dir: &Path, name: &str, pages: serde_json::Value) -> String {
    let path = dir.join(name);
    let doc = json!({ "pages": pages });
    std::fs::write(&path, serde_json::to_string_pretty(&doc).unwrap()).unwrap();
    path.to_string_lossy().into_owned()
}

/// The submarket statistics table used across tests.
fn submarket_table() -> serde_json::Value {
    json!({
        "caption": "Industrial Submarket Statistics",
        "rows": [
            [null, "Inventory (SF)", "Vacancy %", "Net Absorption", "Under Construction", "Asking Rent", "Deliveries"],
            ["Southeast", "12,500,000", "5.4%", "(120,000)", "300,000", "$7.25", "0"],
            ["Southwest", "8,000,000", "7.1%", "50,000", "N/A", "$6.10", "100,000"],
            ["Total", "20,500,000", "6.1%", "(70,000)", "300,000", "$6.80", "100,000"]
        ]
    })
}

fn by_size_table() -> serde_json::Value {
    json!({
        "caption": "Industrial Market by Size",
        "rows": [
            ["Size", "Inventory", "Vacancy %"],
            ["0-100k", "1,000", "5%"],
            ["100-250k", "2,000", "6%"]
        ]
    })
}

/// Route pipeline logs to the test harness (`RUST_LOG=debug` to see them).
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn fixture_dir() -> tempfile::TempDir {
    tempfile::tempdir().unwrap()
}

// ── Rules mode ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_two_page_report_selects_submarket_table() {
    init_tracing();
    let dir = fixture_dir();
    let input = write_doc(
        dir.path(),
        "Dallas_Industrial_Q2_2025.json",
        json!([
            { "index": 1, "tables": [by_size_table()] },
            { "index": 2, "tables": [submarket_table()] }
        ]),
    );
    let oracle = ScriptedOracle::new(&[], "YES");
    let p = pipeline(oracle.clone(), MappingMode::Rules);

    let out = p.process(&input).await.unwrap();

    assert_eq!(out.document_id, "Dallas_Industrial_Q2_2025");
    assert_eq!(out.source_page, 2);
    assert_eq!(out.result.len(), 3, "subtotal rows are kept");

    let first = &out.result.records[0];
    assert_eq!(first.get(CanonicalColumn::PrimarySubmarket), "Southeast");
    assert_eq!(first.get(CanonicalColumn::TotalInventoryQ), "12500000");
    assert_eq!(first.get(CanonicalColumn::VacancyQ), "0.054");
    assert_eq!(first.get(CanonicalColumn::NetAbsorptionQ), "-120000");
    assert_eq!(first.get(CanonicalColumn::UnderConstructionQ), "300000");
    assert_eq!(first.get(CanonicalColumn::RentQ), "7.25");
    assert_eq!(first.get(CanonicalColumn::DeliveredQ), "0");
    assert_eq!(first.get(CanonicalColumn::LeasingActivityQ), "");

    assert_eq!(
        out.result.records[1].get(CanonicalColumn::UnderConstructionQ),
        "",
        "N/A becomes empty"
    );
    assert_eq!(
        out.result.records[2].get(CanonicalColumn::PrimarySubmarket),
        "Total"
    );

    // Generic direction names never reach the oracle.
    assert_eq!(oracle.calls(), 0);
    assert_eq!(out.stats.oracle_calls, 0);
    assert_eq!(out.stats.candidate_tables, 2);

    let csv = out.result.to_csv().unwrap();
    assert_eq!(csv.lines().next().unwrap(), CANONICAL_HEADER);
    assert!(csv.lines().nth(1).unwrap().starts_with("Southeast,"));
}

#[tokio::test]
async fn test_denylisted_table_loses_even_when_geographic() {
    let dir = fixture_dir();
    let input = write_doc(
        dir.path(),
        "Austin_Q2_2025.json",
        json!([
            { "index": 1, "tables": [{
                "caption": "Leasing Activity by Building Size",
                "rows": [
                    ["Submarket", "Leasing"],
                    ["North", "100"],
                    ["South", "200"]
                ]
            }]},
            { "index": 2, "tables": [submarket_table()] }
        ]),
    );
    let p = pipeline(ScriptedOracle::new(&[], "YES"), MappingMode::Rules);

    let out = p.process(&input).await.unwrap();

    assert_eq!(out.source_page, 2);
    assert_eq!(
        out.result.records[0].get(CanonicalColumn::PrimarySubmarket),
        "Southeast"
    );
}

#[tokio::test]
async fn test_earliest_strong_match_wins() {
    let dir = fixture_dir();
    let early = json!({
        "rows": [
            ["Submarket", "Vacancy Rate"],
            ["Northeast", "4.0%"],
            ["Northwest", "4.5%"]
        ]
    });
    let input = write_doc(
        dir.path(),
        "Houston_Q2_2025.json",
        json!([
            { "index": 1, "tables": [early] },
            { "index": 2, "tables": [submarket_table()] }
        ]),
    );
    let p = pipeline(ScriptedOracle::new(&[], "YES"), MappingMode::Rules);

    let out = p.process(&input).await.unwrap();

    assert_eq!(out.source_page, 1);
    assert_eq!(
        out.result.records[0].get(CanonicalColumn::PrimarySubmarket),
        "Northeast"
    );
    assert_eq!(out.result.records[0].get(CanonicalColumn::VacancyQ), "0.04");
}

#[tokio::test]
async fn test_unknown_names_are_judged_by_oracle() {
    let dir = fixture_dir();
    let input = write_doc(
        dir.path(),
        "Dallas_Q2_2025.json",
        json!([{ "index": 1, "tables": [{
            "rows": [
                ["Submarket", "Vacancy %"],
                ["Las Colinas", "5.0%"],
                ["Great Southwest", "6.0%"],
                ["Valwood", "7.0%"]
            ]
        }]}]),
    );
    let oracle = ScriptedOracle::new(&["YES", "YES"], "YES");
    let p = pipeline(oracle.clone(), MappingMode::Rules);

    let out = p.process(&input).await.unwrap();

    assert_eq!(out.result.len(), 3);
    // Majority reached after two answers.
    assert_eq!(oracle.calls(), 2);
    assert_eq!(out.stats.oracle_calls, 2);
    assert_eq!(out.stats.input_tokens, 20);
}

#[tokio::test]
async fn test_invalid_answers_exhaust_retry_budget() {
    init_tracing();
    let dir = fixture_dir();
    let input = write_doc(
        dir.path(),
        "Dallas_Q2_2025.json",
        json!([{ "index": 1, "tables": [{
            "rows": [
                ["Submarket", "Vacancy %"],
                ["Las Colinas", "5.0%"],
                ["Valwood", "7.0%"]
            ]
        }]}]),
    );
    let oracle = ScriptedOracle::new(&[], "It depends on the source.");
    let p = pipeline(oracle.clone(), MappingMode::Rules);

    let err = p.process(&input).await.unwrap_err();

    assert!(
        matches!(err, PipelineError::RetryBudgetExhausted { limit: 8, .. }),
        "got {err:?}"
    );
    // Bounded: never more calls than the budget allows.
    assert!(oracle.calls() <= 8, "calls = {}", oracle.calls());
}

#[tokio::test]
async fn test_no_strong_match_is_ambiguous() {
    let dir = fixture_dir();
    let input = write_doc(
        dir.path(),
        "Phoenix_Q2_2025.json",
        json!([{ "index": 1, "tables": [{
            "rows": [
                ["Building", "Size"],
                ["Logistics Center 10", "500,000"],
                ["Commerce Park", "250,000"]
            ]
        }]}]),
    );
    let p = pipeline(ScriptedOracle::new(&[], "NO"), MappingMode::Rules);

    let err = p.process(&input).await.unwrap_err();

    assert!(
        matches!(err, PipelineError::AmbiguousSelection { candidates: 1, .. }),
        "got {err:?}"
    );
}

#[tokio::test]
async fn test_document_without_tables_is_no_candidates() {
    let dir = fixture_dir();
    let input = write_doc(dir.path(), "Reno_Q2_2025.json", json!([{ "index": 1 }]));
    let p = pipeline(ScriptedOracle::new(&[], "YES"), MappingMode::Rules);

    let err = p.process(&input).await.unwrap_err();

    assert!(matches!(err, PipelineError::NoCandidateTables { .. }));
}

#[tokio::test]
async fn test_missing_file_is_document_access() {
    let dir = fixture_dir();
    let missing = dir.path().join("Nowhere_Q2_2025.pdf");
    let p = pipeline(ScriptedOracle::new(&[], "YES"), MappingMode::Rules);

    let err = p.process(missing.to_string_lossy()).await.unwrap_err();

    assert!(matches!(err, PipelineError::DocumentAccess { .. }), "got {err:?}");
}

#[tokio::test]
async fn test_rules_mode_runs_without_oracle_for_generic_names() {
    let dir = fixture_dir();
    let input = write_doc(
        dir.path(),
        "Dallas_Q2_2025.json",
        json!([{ "index": 1, "tables": [submarket_table()] }]),
    );
    let unavailable = Arc::new(UnavailableOracle::new("auto", "set OPENAI_API_KEY"));
    let p = pipeline(unavailable.clone(), MappingMode::Rules);
    assert_eq!(p.process(&input).await.unwrap().result.len(), 3);

    let input = write_doc(
        dir.path(),
        "Dallas_Q3_2025.json",
        json!([{ "index": 1, "tables": [{
            "rows": [["Submarket", "Vacancy %"], ["Las Colinas", "5.0%"]]
        }]}]),
    );
    let err = p.process(&input).await.unwrap_err();
    assert!(matches!(err, PipelineError::OracleNotConfigured { .. }), "got {err:?}");
}

#[tokio::test]
async fn test_rules_mode_keeps_rows_without_values() {
    let dir = fixture_dir();
    let input = write_doc(
        dir.path(),
        "Dallas_Q2_2025.json",
        json!([{ "index": 1, "tables": [{
            "rows": [
                [null, "Vacancy %", "Asking Rent"],
                ["Southeast", "5.4%", "$7.25"],
                ["", "N/A", "-"],
                ["Southwest", "6.0%", "$ -"],
                ["Total", "5.7%", "$6.70"]
            ]
        }]}]),
    );
    let p = pipeline(ScriptedOracle::new(&[], "YES"), MappingMode::Rules);

    let out = p.process(&input).await.unwrap();

    assert_eq!(out.result.len(), 4, "one record per source data row");
    assert_eq!(out.result.records[1], CanonicalRecord::default());
    assert_eq!(out.result.records[2].get(CanonicalColumn::RentQ), "");
    assert_eq!(out.result.records[3].get(CanonicalColumn::PrimarySubmarket), "Total");

    let csv = out.result.to_csv().unwrap();
    assert_eq!(csv.lines().count(), 5);
    assert_eq!(csv.lines().nth(2), Some(",,,,,,,,,"));
}

// ── Generative mode ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_generative_mapping_reasks_then_cleans() {
    let dir = fixture_dir();
    let input = write_doc(
        dir.path(),
        "Dallas_Q2_2025.json",
        json!([{ "index": 1, "tables": [submarket_table()] }]),
    );
    let good = format!(
        "Here is the table:\n```csv\n{CANONICAL_HEADER}\n\
         Southeast,,Industrial,12500000,5.4%,(120000),300000,$7.25,0,\n\
         Total,,Industrial,20500000,6.1%,(70000),300000,$6.80,100000,\n```\nLet me know!"
    );
    let oracle = ScriptedOracle::new(&["I could not find a table.", good.as_str()], "NO");
    let p = pipeline(oracle.clone(), MappingMode::Generative);

    let out = p.process(&input).await.unwrap();

    assert_eq!(oracle.calls(), 2, "one re-ask after the missing header");
    assert_eq!(out.result.len(), 2);
    let first = &out.result.records[0];
    assert_eq!(first.get(CanonicalColumn::PrimarySubmarket), "Southeast");
    assert_eq!(first.get(CanonicalColumn::PropertyType), "Industrial");
    assert_eq!(first.get(CanonicalColumn::VacancyQ), "0.054");
    assert_eq!(first.get(CanonicalColumn::NetAbsorptionQ), "-120000");
    assert_eq!(first.get(CanonicalColumn::RentQ), "7.25");
    assert_eq!(out.result.records[1].get(CanonicalColumn::PrimarySubmarket), "Total");
}

#[tokio::test]
async fn test_generative_reply_without_header_column_is_reasked() {
    let dir = fixture_dir();
    let input = write_doc(
        dir.path(),
        "Dallas_Q2_2025.json",
        json!([{ "index": 1, "tables": [submarket_table()] }]),
    );
    let good = format!("{CANONICAL_HEADER}\nSoutheast,,,12500000,5.4%,,,,,\n");
    let oracle = ScriptedOracle::new(
        &["The primary_submarket column could not be filled.", good.as_str()],
        "NO",
    );
    let p = pipeline(oracle.clone(), MappingMode::Generative);

    let out = p.process(&input).await.unwrap();

    assert_eq!(oracle.calls(), 2);
    assert_eq!(out.result.len(), 1);
    assert_eq!(out.result.records[0].get(CanonicalColumn::VacancyQ), "0.054");
}

#[test]
fn test_rules_mode_builds_with_unusable_provider() {
    let config = PipelineConfig::builder()
        .mode(MappingMode::Rules)
        .provider_name("no-such-provider")
        .build()
        .unwrap();
    assert!(Pipeline::new(config).is_ok());
}

// ── Batch ────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct CountingCallback {
    started: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
    finished: Mutex<Option<(usize, usize)>>,
}

impl BatchProgressCallback for CountingCallback {
    fn on_document_start(&self, _input: &str) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }
    fn on_document_complete(&self, _input: &str, _rows: usize) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }
    fn on_document_error(&self, _input: &str, _error: &str) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }
    fn on_batch_complete(&self, total: usize, success: usize) {
        *self.finished.lock().unwrap() = Some((total, success));
    }
}

#[tokio::test]
async fn test_batch_merges_in_input_order_and_skips_failures() {
    init_tracing();
    let dir = fixture_dir();
    let dallas = write_doc(
        dir.path(),
        "Dallas_Q2_2025.json",
        json!([{ "index": 1, "tables": [submarket_table()] }]),
    );
    let houston = write_doc(
        dir.path(),
        "Houston_Q2_2025.json",
        json!([{ "index": 1, "tables": [{
            "rows": [["Submarket", "Vacancy Rate"], ["Northwest", "4.5%"]]
        }]}]),
    );
    let missing = dir.path().join("Missing_Q2_2025.json").to_string_lossy().into_owned();
    let inputs = vec![houston.clone(), missing.clone(), dallas.clone()];

    let callback = Arc::new(CountingCallback::default());
    let config = PipelineConfig::builder()
        .oracle(ScriptedOracle::new(&[], "YES"))
        .concurrency(3)
        .progress_callback(callback.clone())
        .build()
        .unwrap();
    let p = Pipeline::new(config).unwrap();

    let batch = process_batch(&p, &inputs).await;

    assert_eq!(batch.success_count(), 2);
    assert_eq!(batch.failure_count(), 1);
    let failed: Vec<&str> = batch.failed().map(|(input, _)| input).collect();
    assert_eq!(failed, vec![missing.as_str()]);

    let merged = batch.merged();
    let names: Vec<&str> = merged
        .records
        .iter()
        .map(|r| r.get(CanonicalColumn::PrimarySubmarket))
        .collect();
    assert_eq!(names, vec!["Northwest", "Southeast", "Southwest", "Total"]);

    assert_eq!(callback.started.load(Ordering::SeqCst), 3);
    assert_eq!(callback.completed.load(Ordering::SeqCst), 2);
    assert_eq!(callback.failed.load(Ordering::SeqCst), 1);
    assert_eq!(*callback.finished.lock().unwrap(), Some((3, 2)));

    let out_path: PathBuf = dir.path().join("out").join("master_output.csv");
    let rows = batch.write_merged_csv(&out_path).await.unwrap();
    assert_eq!(rows, 4);
    let text = std::fs::read_to_string(&out_path).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 5);
    assert_eq!(lines[0], CANONICAL_HEADER);
    assert!(lines[1].starts_with("Northwest,"));
    assert!(!out_path.with_extension("csv.tmp").exists());
}
