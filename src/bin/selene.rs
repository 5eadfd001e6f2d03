//! CLI binary for selene.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ReviewConfig`, runs one session and prints the findings.

use anyhow::{bail, Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use selene::{
    detect_mime, CompletionStatus, ProgressCallback, ReviewClient, ReviewConfig, ReviewFocus,
    ReviewProgressCallback, ReviewResult, ReviewSession, SessionPhase, Severity,
};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
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

const TICKS: [&str; 11] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress: a spinner through extraction, then a bar over chunks.
/// Chunks may finish out of order when `--parallelism` > 1.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&TICKS);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Opening document…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
        })
    }

    fn elapsed_secs(&self, chunk: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&chunk))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl ReviewProgressCallback for CliProgressCallback {
    fn on_phase_change(&self, phase: SessionPhase) {
        match phase {
            SessionPhase::Extracting => self.bar.set_message("Extracting text…"),
            SessionPhase::Chunking => self.bar.set_message("Chunking…"),
            SessionPhase::Reconciling => self.bar.set_message("Reconciling findings…"),
            SessionPhase::Done | SessionPhase::Cancelled | SessionPhase::Failed => {
                self.bar.finish_and_clear()
            }
            _ => {}
        }
    }

    fn on_review_start(&self, total_chunks: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} chunks  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&TICKS);

        self.bar.set_length(total_chunks as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Reviewing");
        self.bar.reset_eta();
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Reviewing {total_chunks} chunk(s)…"))
        ));
    }

    fn on_chunk_start(&self, chunk: usize, _total: usize) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(chunk, Instant::now());
        }
        self.bar.set_message(format!("chunk {}", chunk + 1));
    }

    fn on_chunk_complete(&self, chunk: usize, total: usize, findings: usize) {
        let secs = self.elapsed_secs(chunk);
        self.bar.println(format!(
            "  {} Chunk {:>3}/{:<3}  {:<12}  {}",
            green("✓"),
            chunk + 1,
            total,
            dim(&format!("{findings:>3} findings")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_chunk_error(&self, chunk: usize, total: usize, error: &str) {
        let secs = self.elapsed_secs(chunk);
        let msg: String = if error.chars().count() > 80 {
            format!("{}…", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} Chunk {:>3}/{:<3}  {}  {}",
            red("✗"),
            chunk + 1,
            total,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Review a schematic with the default model (llava on localhost)
  selene power_board.pdf

  # Focus on the power tree, two requests at a time
  selene --focus power --parallelism 2 power_board.pdf

  # Ask a specific question
  selene --question "Is the USB D+/D- pair ESD protected?" main.pdf

  # Check component values against the regulator's datasheet
  selene --focus components --datasheet lm317.pdf power_board.pdf

  # Scanned sheet, JSON for another tool
  selene --json scan_03.png > findings.json

  # Check that the endpoint and model are ready
  selene --check

ENVIRONMENT VARIABLES:
  SELENE_ENDPOINT     Review endpoint base URL (default http://localhost:11434)
  SELENE_MODEL        Model name (default llava)
  PDFIUM_LIB_PATH     Path to libpdfium; otherwise the system library is used
  RUST_LOG            Log filter, e.g. selene=debug
"#;

/// Review electronic schematics with a local vision model.
#[derive(Parser, Debug)]
#[command(
    name = "selene",
    version,
    about = "Review electronic schematics with a local vision model",
    long_about = "Review schematic PDFs and scanned schematic images with an Ollama-compatible \
vision model. Findings are deduplicated across pages and printed by page, or emitted as JSON.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Schematic file: PDF, PNG, JPEG or BMP.
    #[arg(required_unless_present = "check")]
    input: Option<PathBuf>,

    /// MIME type of the input; sniffed from the file when omitted.
    #[arg(long, env = "SELENE_MIME")]
    mime: Option<String>,

    /// Write the report to this file instead of stdout.
    #[arg(short, long, env = "SELENE_OUTPUT")]
    output: Option<PathBuf>,

    /// Review endpoint base URL.
    #[arg(long, env = "SELENE_ENDPOINT", default_value = "http://localhost:11434")]
    endpoint: String,

    /// Model name on the endpoint.
    #[arg(long, env = "SELENE_MODEL", default_value = "llava")]
    model: String,

    /// Review focus preset.
    #[arg(long, env = "SELENE_FOCUS", value_enum, default_value = "general")]
    focus: FocusArg,

    /// Free-form question; overrides --focus.
    #[arg(long, env = "SELENE_QUESTION")]
    question: Option<String>,

    /// Path to a file with a custom instruction template (`{pages}` is
    /// replaced with the chunk's page range). Overrides --focus and --question.
    #[arg(long, env = "SELENE_INSTRUCTIONS")]
    instructions: Option<PathBuf>,

    /// Characters of page text per request.
    #[arg(long, env = "SELENE_BUDGET", default_value_t = 4000)]
    budget: usize,

    /// Concurrent review requests.
    #[arg(short, long, env = "SELENE_PARALLELISM", default_value_t = 2)]
    parallelism: usize,

    /// Retries per chunk on transient failure.
    #[arg(long, env = "SELENE_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Base backoff between retries, doubled each attempt.
    #[arg(long, env = "SELENE_RETRY_BACKOFF_MS", default_value_t = 500)]
    retry_backoff_ms: u64,

    /// Per-request timeout in seconds.
    #[arg(long, env = "SELENE_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// Sampling temperature (0.0–2.0).
    #[arg(long, env = "SELENE_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Token overlap above which two findings are merged (0–1].
    #[arg(long, env = "SELENE_THRESHOLD", default_value_t = 0.9)]
    threshold: f32,

    /// Ask the endpoint to stream its response.
    #[arg(long, env = "SELENE_STREAM")]
    stream: bool,

    /// Send page text only, no page images.
    #[arg(long, env = "SELENE_NO_IMAGES")]
    no_images: bool,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "SELENE_PASSWORD")]
    password: Option<String>,

    /// Component datasheet (PDF) to review the schematic against.
    #[arg(long, env = "SELENE_DATASHEET")]
    datasheet: Option<PathBuf>,

    /// Maximum characters of datasheet text sent with each chunk.
    #[arg(long, env = "SELENE_DATASHEET_BUDGET", default_value_t = 3000)]
    datasheet_budget: usize,

    /// Output the full ReviewResult as JSON.
    #[arg(long, env = "SELENE_JSON")]
    json: bool,

    /// Check the endpoint and model, then exit.
    #[arg(long)]
    check: bool,

    /// Disable progress bar.
    #[arg(long, env = "SELENE_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "SELENE_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "SELENE_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum FocusArg {
    General,
    Components,
    Pins,
    Power,
    Compliance,
    Missing,
}

impl From<FocusArg> for ReviewFocus {
    fn from(v: FocusArg) -> Self {
        match v {
            FocusArg::General => ReviewFocus::General,
            FocusArg::Components => ReviewFocus::ComponentVerification,
            FocusArg::Pins => ReviewFocus::PinConfiguration,
            FocusArg::Power => ReviewFocus::PowerSupply,
            FocusArg::Compliance => ReviewFocus::DesignCompliance,
            FocusArg::Missing => ReviewFocus::MissingComponents,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs unless --verbose is given.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !cli.check;
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

    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn ReviewProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb).await?;

    // ── Check-only mode ──────────────────────────────────────────────────
    if cli.check {
        let client = ReviewClient::new(Arc::new(config)).context("Failed to build HTTP client")?;
        let status = client.check_connection().await;
        if cli.json {
            println!("{}", serde_json::to_string_pretty(&status)?);
        } else if !status.reachable {
            eprintln!(
                "{} {} unreachable: {}",
                red("✘"),
                cli.endpoint,
                status.detail.as_deref().unwrap_or("unknown error")
            );
        } else {
            eprintln!("{} {} reachable", green("✔"), cli.endpoint);
            eprintln!(
                "  model {}: {}",
                bold(&cli.model),
                if status.model_available {
                    green("available")
                } else {
                    red("not installed")
                }
            );
            for name in &status.available_models {
                eprintln!("  {}", dim(name));
            }
        }
        if !(status.reachable && status.model_available) {
            std::process::exit(1);
        }
        return Ok(());
    }

    // ── Run review ───────────────────────────────────────────────────────
    let Some(input) = cli.input.clone() else {
        bail!("No input file given");
    };
    let mime = match &cli.mime {
        Some(m) => m.clone(),
        None => detect_mime(&input)
            .with_context(|| format!("Could not determine the type of {}", input.display()))?,
    };

    let mut session = ReviewSession::new(config, &input, mime).context("Invalid configuration")?;

    let cancel = session.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n{} Cancelling; waiting for in-flight requests…", yellow("⚠"));
            cancel.cancel();
        }
    });

    let result = session.run().await.context("Review failed")?;

    let report = if cli.json {
        serde_json::to_string_pretty(&result).context("Failed to serialise result")?
    } else {
        format_report(&result, &input.display().to_string())
    };

    match &cli.output {
        Some(path) => tokio::fs::write(path, report.as_bytes())
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?,
        None => println!("{report}"),
    }

    if !cli.quiet {
        let s = &result.summary;
        let mark = match result.status {
            CompletionStatus::Complete => green("✔"),
            CompletionStatus::Partial => yellow("⚠"),
            CompletionStatus::Failed => red("✘"),
        };
        eprintln!(
            "{}  {} finding(s): {} error, {} warning, {} info  ({} duplicate(s) merged, {}ms)",
            mark,
            bold(&s.total().to_string()),
            s.error,
            s.warning,
            s.info,
            s.duplicates_discarded,
            result.stats.total_duration_ms,
        );
        if result.status == CompletionStatus::Partial {
            let failed = result.chunks.iter().filter(|c| c.error.is_some()).count();
            eprintln!("   {} of {} chunk(s) not reviewed", failed, result.chunks.len());
        }
    }

    Ok(())
}

/// Map CLI args to `ReviewConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ReviewConfig> {
    let focus = match &cli.question {
        Some(q) => ReviewFocus::Custom(q.clone()),
        None => cli.focus.clone().into(),
    };

    let mut builder = ReviewConfig::builder()
        .endpoint(&cli.endpoint)
        .model(&cli.model)
        .focus(focus)
        .budget(cli.budget)
        .parallelism(cli.parallelism)
        .max_retries(cli.max_retries)
        .retry_backoff_ms(cli.retry_backoff_ms)
        .api_timeout_secs(cli.api_timeout)
        .temperature(cli.temperature)
        .stream(cli.stream)
        .similarity_threshold(cli.threshold)
        .datasheet_budget(cli.datasheet_budget)
        .embed_images(!cli.no_images);

    if let Some(path) = &cli.instructions {
        let template = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read instructions from {:?}", path))?;
        builder = builder.instructions(template);
    }
    if let Some(pw) = &cli.password {
        builder = builder.password(pw);
    }
    if let Some(path) = &cli.datasheet {
        builder = builder.datasheet(path);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Human-readable report, grouped by page.
fn format_report(result: &ReviewResult, source: &str) -> String {
    let mut out = String::new();
    out.push_str(&format!("SCHEMATIC REVIEW: {}\n", source));
    out.push_str(&format!("{}\n", "=".repeat(60)));

    if result.findings.is_empty() {
        out.push_str("\nNo findings.\n");
        return out;
    }

    let mut current_page = None;
    for f in &result.findings {
        if current_page != Some(f.page_index) {
            current_page = Some(f.page_index);
            out.push_str(&format!("\nPage {}\n", f.page_index + 1));
        }
        let label = match f.severity {
            Severity::Error => red("ERROR  "),
            Severity::Warning => yellow("WARNING"),
            Severity::Info => cyan("INFO   "),
        };
        let id = f.id.map(|id| id.to_string()).unwrap_or_default();
        out.push_str(&format!("  {} {}  {}\n", dim(&id), label, f.message));
    }
    out
}
