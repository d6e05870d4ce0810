//! CLI binary for submarket-extract.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `PipelineConfig`, runs the batch and writes the merged CSV.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use submarket_extract::{
    expand_inputs, process_batch, BatchOutput, BatchProgressCallback, CanonicalResult,
    MappingMode, Pipeline, PipelineConfig, RunStats,
};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress: one bar over documents plus a log line per document.
/// Documents finish out of order, so start times are keyed by input.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<String, Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} documents  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Extracting");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn elapsed(&self, input: &str) -> String {
        let ms = self
            .start_times
            .lock()
            .ok()
            .and_then(|mut times| times.remove(input))
            .map(|t| t.elapsed().as_millis())
            .unwrap_or(0);
        format!("{:.1}s", ms as f64 / 1000.0)
    }
}

fn short_name(input: &str) -> &str {
    input.rsplit(['/', '\\']).next().unwrap_or(input)
}

impl BatchProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total_documents: usize) {
        self.bar.set_length(total_documents as u64);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Extracting submarket tables from {total_documents} document(s)…"))
        ));
    }

    fn on_document_start(&self, input: &str) {
        if let Ok(mut times) = self.start_times.lock() {
            times.insert(input.to_string(), Instant::now());
        }
        self.bar.set_message(short_name(input).to_string());
    }

    fn on_document_complete(&self, input: &str, rows: usize) {
        let elapsed = self.elapsed(input);
        self.bar.println(format!(
            "  {} {:<40}  {}  {}",
            green("✓"),
            short_name(input),
            dim(&format!("{rows:>4} rows")),
            dim(&elapsed),
        ));
        self.bar.inc(1);
    }

    fn on_document_error(&self, input: &str, error: &str) {
        let elapsed = self.elapsed(input);
        self.errors.fetch_add(1, Ordering::SeqCst);

        // Truncate very long error messages to keep output tidy.
        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} {:<40}  {}  {}",
            red("✗"),
            short_name(input),
            red(&msg),
            dim(&elapsed),
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, total_documents: usize, success_count: usize) {
        let failed = total_documents.saturating_sub(success_count);
        self.bar.finish_and_clear();

        if failed == 0 {
            eprintln!(
                "{} {} document(s) extracted successfully",
                green("✔"),
                bold(&success_count.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} document(s) extracted  ({} skipped)",
                if failed == total_documents {
                    red("✘")
                } else {
                    cyan("⚠")
                },
                bold(&success_count.to_string()),
                total_documents,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # One report, CSV on stdout
  submarket2csv Dallas_Industrial_Q2_2025.pdf

  # A folder of reports merged into one file
  submarket2csv reports/ -o master_output.csv

  # Let the model write the mapping, rules still clean the values
  submarket2csv --mode generative --model gpt-4.1 reports/ -o out.csv

  # Pre-extracted tables (JSON) and a fixed metro name
  submarket2csv --metro "Inland Empire" tables.json

  # Per-document results and statistics as JSON
  submarket2csv --json reports/ > report.json

OUTPUT:
  primary_submarket,secondary_submarket,property_type,total_inventory_q,vacancy_q,
  net_absorption_q,under_construction_q,rent_q,delivered_q,leasing_activity_q

  vacancy_q is a decimal fraction (5.4% → 0.054). Negative values use a leading
  minus. Empty means the report had no value. Subtotal and total rows are kept.

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  RUST_LOG                Log filter, overrides --verbose / --quiet

  The metro name is the file name up to the first underscore
  (Dallas-Fort-Worth_Q2_2025.pdf → "Dallas Fort Worth") unless --metro is set.
"#;

/// Extract submarket statistics tables from real-estate market reports.
#[derive(Parser, Debug)]
#[command(
    name = "submarket2csv",
    version,
    about = "Extract industrial submarket statistics from market report PDFs into one canonical CSV",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// PDF or JSON files, directories of them, or HTTP/HTTPS URLs.
    #[arg(required = true)]
    inputs: Vec<String>,

    /// Write the merged CSV to this file instead of stdout.
    #[arg(short, long, env = "SUBMARKET_OUTPUT")]
    output: Option<PathBuf>,

    /// How columns are mapped: rules (deterministic) or generative (LLM).
    #[arg(long, env = "SUBMARKET_MODE", value_enum, default_value = "rules")]
    mode: ModeArg,

    /// Number of documents processed at once.
    #[arg(short, long, env = "SUBMARKET_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Stage invocations plus oracle re-asks allowed per document.
    #[arg(long, env = "SUBMARKET_BUDGET", default_value_t = 8,
          value_parser = clap::value_parser!(u32).range(5..))]
    budget: u32,

    /// Wall-clock limit per document, in seconds.
    #[arg(long, env = "SUBMARKET_TIMEOUT", default_value_t = 300)]
    timeout: u64,

    /// LLM model ID (e.g. gpt-4.1-mini, claude-sonnet-4-20250514).
    #[arg(long, env = "SUBMARKET_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "SUBMARKET_PROVIDER")]
    provider: Option<String>,

    /// Metro name used as geographic context for every document.
    #[arg(long, env = "SUBMARKET_METRO")]
    metro: Option<String>,

    /// Per-oracle-call timeout in seconds.
    #[arg(long, env = "SUBMARKET_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "SUBMARKET_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Print per-document results and statistics as JSON.
    #[arg(long, env = "SUBMARKET_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "SUBMARKET_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "SUBMARKET_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "SUBMARKET_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum ModeArg {
    Rules,
    Generative,
}

impl From<ModeArg> for MappingMode {
    fn from(v: ModeArg) -> Self {
        match v {
            ModeArg::Rules => MappingMode::Rules,
            ModeArg::Generative => MappingMode::Generative,
        }
    }
}

/// One line of the `--json` report.
#[derive(Serialize)]
struct DocumentReport<'a> {
    input: &'a str,
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    document_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    source_page: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    /// Failed because of the report's content, not the setup.
    #[serde(skip_serializing_if = "Option::is_none")]
    recoverable: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stats: Option<&'a RunStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<&'a CanonicalResult>,
}

fn json_report(batch: &BatchOutput) -> Vec<DocumentReport<'_>> {
    batch
        .outcomes
        .iter()
        .map(|o| match &o.result {
            Ok(out) => DocumentReport {
                input: &o.input,
                ok: true,
                document_id: Some(out.document_id.as_str()),
                source_page: Some(out.source_page),
                error: None,
                recoverable: None,
                stats: Some(&out.stats),
                result: Some(&out.result),
            },
            Err(e) => DocumentReport {
                input: &o.input,
                ok: false,
                document_id: None,
                source_page: None,
                error: Some(e.to_string()),
                recoverable: Some(e.is_recoverable()),
                stats: None,
                result: None,
            },
        })
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Library INFO logs are noise next to the progress bar.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Inputs ───────────────────────────────────────────────────────────
    let inputs = expand_inputs(&cli.inputs).context("Failed to list inputs")?;
    if inputs.is_empty() {
        anyhow::bail!("No PDF or JSON documents found in the given inputs");
    }

    // ── Build pipeline ───────────────────────────────────────────────────
    let progress_cb: Option<Arc<dyn BatchProgressCallback>> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn BatchProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;
    let pipeline = Pipeline::new(config).context("Failed to set up the pipeline")?;

    // ── Run batch ────────────────────────────────────────────────────────
    let batch = process_batch(&pipeline, &inputs).await;

    if !show_progress && !cli.quiet {
        for (input, error) in batch.failed() {
            if error.is_recoverable() {
                eprintln!("{} skipped {}: {}", cyan("⚠"), input, error);
            } else {
                eprintln!("{} failed {}: {}", red("✗"), input, error);
            }
        }
    }
    let hard = batch.hard_failures().count();
    if hard > 0 && !cli.quiet {
        eprintln!(
            "{} {} document(s) failed for reasons outside the report itself \
             (access, provider or retry budget); rerun with --verbose",
            red("✗"),
            hard
        );
    }

    // ── Write output ─────────────────────────────────────────────────────
    if cli.json {
        let json = serde_json::to_string_pretty(&json_report(&batch))
            .context("Failed to serialise report")?;
        println!("{json}");
    }

    if let Some(ref output_path) = cli.output {
        let rows = batch
            .write_merged_csv(output_path)
            .await
            .context("Failed to write merged CSV")?;
        if !cli.quiet {
            eprintln!(
                "{}  {} rows from {}/{} document(s)  {}ms  →  {}",
                if batch.failure_count() == 0 {
                    green("✔")
                } else {
                    cyan("⚠")
                },
                rows,
                batch.success_count(),
                inputs.len(),
                batch.duration_ms,
                bold(&output_path.display().to_string()),
            );
        }
    } else if !cli.json {
        let csv = batch.merged().to_csv().context("Failed to render CSV")?;
        io::stdout()
            .lock()
            .write_all(csv.as_bytes())
            .context("Failed to write to stdout")?;
    }

    if !cli.quiet && !cli.json {
        let (input_tokens, output_tokens) = batch
            .succeeded()
            .fold((0, 0), |(i, o), d| (i + d.stats.input_tokens, o + d.stats.output_tokens));
        eprintln!(
            "   {} tokens in  /  {} tokens out",
            dim(&input_tokens.to_string()),
            dim(&output_tokens.to_string()),
        );
    }

    if batch.success_count() == 0 {
        anyhow::bail!("All {} document(s) failed", inputs.len());
    }
    Ok(())
}

/// Map CLI args to `PipelineConfig`.
fn build_config(
    cli: &Cli,
    progress: Option<Arc<dyn BatchProgressCallback>>,
) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .mode(cli.mode.clone().into())
        .concurrency(cli.concurrency)
        .max_stage_invocations(cli.budget)
        .document_timeout_secs(cli.timeout)
        .api_timeout_secs(cli.api_timeout)
        .download_timeout_secs(cli.download_timeout);

    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(ref metro) = cli.metro {
        builder = builder.metro(metro);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
