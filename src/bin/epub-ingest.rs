//! CLI binary for epub-ingest.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `IngestConfig`, runs the four-stage pipeline against in-memory
//! backends, and prints results. Useful for inspecting containers and
//! validating that a book ingests cleanly before wiring real backends.

use anyhow::{Context, Result};
use clap::Parser;
use epub_ingest::{
    inspect, ConnectionPool, IngestConfig, IngestProgressCallback, IngestionPipeline,
    MemoryGateway, MemoryObjectStore, ProgressCallback, StaticTokenVerifier,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

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

/// Terminal progress callback: a single bar tracking the 30/50/70/100
/// stage progression, with per-item log lines above it. Per-item events
/// arrive out of order from concurrent workers; every line carries its own
/// index so interleaving stays readable.
struct CliProgressCallback {
    bar: ProgressBar,
    warnings: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(100);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}%  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        bar.set_style(style);
        bar.set_prefix("Ingesting");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            warnings: AtomicUsize::new(0),
        })
    }

    fn warning_count(&self) -> usize {
        self.warnings.load(Ordering::SeqCst)
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl IngestProgressCallback for CliProgressCallback {
    fn on_stage_start(&self, stage: u8, book_id: Uuid) {
        let name = match stage {
            1 => "initialise",
            2 => "store asset",
            3 => "resources",
            _ => "content",
        };
        self.bar.set_message(format!("stage {stage}: {name}"));
        if stage == 1 {
            self.bar
                .println(format!("{} {}", cyan("◆"), bold(&format!("Book {book_id}"))));
        }
    }

    fn on_stage_complete(&self, stage: u8, progress: u8) {
        self.bar.set_position(progress as u64);
        self.bar.println(format!(
            "  {} Stage {stage} complete  {}",
            green("✓"),
            dim(&format!("{progress}%"))
        ));
    }

    fn on_resource_resolved(&self, original_path: &str, done: usize, total: usize) {
        self.bar.println(format!(
            "  {} Resource {:>3}/{:<3}  {}",
            green("✓"),
            done,
            total,
            dim(original_path),
        ));
    }

    fn on_resource_failed(&self, href: &str, detail: &str) {
        self.warnings.fetch_add(1, Ordering::SeqCst);
        let msg = truncate(detail, 80);
        self.bar
            .println(format!("  {} Resource '{href}'  {}", red("✗"), red(&msg)));
    }

    fn on_chapter_persisted(&self, order_index: u32, total: usize, block_count: usize) {
        self.bar.println(format!(
            "  {} Chapter {:>3}/{:<3}  {}",
            green("✓"),
            order_index + 1,
            total,
            dim(&format!("{block_count:>4} blocks")),
        ));
    }

    fn on_chapter_failed(&self, order_index: u32, total: usize, detail: &str) {
        self.warnings.fetch_add(1, Ordering::SeqCst);
        let msg = truncate(detail, 80);
        self.bar.println(format!(
            "  {} Chapter {:>3}/{:<3}  {}",
            red("✗"),
            order_index + 1,
            total,
            red(&msg),
        ));
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let cut: String = s.chars().take(max - 1).collect();
        format!("{cut}\u{2026}")
    } else {
        s.to_string()
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Ingest a local EPUB (in-memory dry run, summary to stderr)
  epub-ingest book.epub

  # Ingest from a URL
  epub-ingest https://example.com/books/moby-dick.epub

  # Structured JSON report
  epub-ingest --json book.epub > report.json

  # Inspect container structure without ingesting
  epub-ingest --inspect-only book.epub

  # Tune concurrency and retry behaviour
  epub-ingest --concurrency 4 --max-retries 5 --backoff-ms 250 book.epub

  # Extra content-root fallbacks for nonstandard containers
  epub-ingest --content-roots OEBPS,OPS,Text book.epub

STAGES:
  1  Initialise   validate the announced upload, mint a book id      30%
  2  Store asset  upload raw container, create the book record       50%
  3  Resources    resolve manifest images, rehome to object storage  70%
  4  Content      normalise, segment, persist chapters and blocks   100%

Each stage is independently re-invocable: a failed stage preserves the
progress of completed stages and can be retried without restarting the
whole ingestion.
"#;

/// Ingest EPUB files and URLs into structured book content.
#[derive(Parser, Debug)]
#[command(
    name = "epub-ingest",
    version,
    about = "Ingest EPUB files and URLs into structured book content",
    long_about = "Parse an EPUB container, extract metadata and spine-ordered chapters, \
normalise markup into deterministic Markdown, segment it into typed content blocks, and \
rehome embedded resources. The CLI runs against in-memory backends, making it a dry-run \
and inspection tool for the library pipeline.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local EPUB file path or HTTP/HTTPS URL.
    input: String,

    /// Bearer token presented to the pipeline's auth seam.
    #[arg(long, env = "EPUB_INGEST_TOKEN", default_value = "local-dev")]
    token: String,

    /// Number of concurrent workers for resources and chapters.
    #[arg(short, long, env = "EPUB_INGEST_CONCURRENCY", default_value_t = 8)]
    concurrency: usize,

    /// Retries per backend call on transient failure.
    #[arg(long, env = "EPUB_INGEST_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Initial retry backoff in milliseconds (doubles per attempt).
    #[arg(long, env = "EPUB_INGEST_BACKOFF_MS", default_value_t = 500)]
    backoff_ms: u64,

    /// Max content blocks per datastore batch.
    #[arg(long, env = "EPUB_INGEST_BATCH_SIZE", default_value_t = 200)]
    batch_size: usize,

    /// Streaming chunk size in bytes for container entries.
    #[arg(long, env = "EPUB_INGEST_CHUNK_BYTES", default_value_t = 65536)]
    chunk_bytes: usize,

    /// Wall-clock budget per stage in seconds.
    #[arg(long, env = "EPUB_INGEST_STAGE_TIMEOUT", default_value_t = 30)]
    stage_timeout: u64,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "EPUB_INGEST_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Comma-separated content-root directories probed as href fallbacks.
    #[arg(long, env = "EPUB_INGEST_CONTENT_ROOTS", default_value = "OEBPS,OPS,EPUB,content")]
    content_roots: String,

    /// Output structured JSON (IngestOutput) instead of a summary.
    #[arg(long, env = "EPUB_INGEST_JSON")]
    json: bool,

    /// Print container structure only, no ingestion.
    #[arg(long)]
    inspect_only: bool,

    /// Disable progress bar.
    #[arg(long, env = "EPUB_INGEST_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "EPUB_INGEST_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "EPUB_INGEST_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs when the progress bar is active;
    // the bar provides all the feedback that matters to the user.
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

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        let report = inspect(&cli.input, cli.download_timeout)
            .await
            .context("Failed to inspect container")?;

        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("Failed to serialise report")?
            );
        } else {
            println!("File:       {}", cli.input);
            println!("Title:      {}", report.metadata.title);
            if let Some(ref a) = report.metadata.author {
                println!("Author:     {}", a);
            }
            if let Some(ref l) = report.metadata.language {
                println!("Language:   {}", l);
            }
            if let Some(ref p) = report.metadata.publisher {
                println!("Publisher:  {}", p);
            }
            if let Some(ref c) = report.cover_path {
                println!("Cover:      {}", c);
            }
            println!("Entries:    {}", report.entry_count);
            println!("Images:     {}", report.image_count);
            println!("Spine:      {} entries", report.spine.len());
            for (i, href) in report.spine.iter().enumerate() {
                println!("  {:>3}  {}", i, href);
            }
        }
        return Ok(());
    }

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb = if show_progress {
        Some(CliProgressCallback::new())
    } else {
        None
    };

    let mut builder = IngestConfig::builder()
        .concurrency(cli.concurrency)
        .max_retries(cli.max_retries)
        .retry_backoff_ms(cli.backoff_ms)
        .block_batch_size(cli.batch_size)
        .resource_chunk_bytes(cli.chunk_bytes)
        .stage_timeout_secs(cli.stage_timeout)
        .download_timeout_secs(cli.download_timeout)
        .content_roots(
            cli.content_roots
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        );
    if let Some(ref cb) = progress_cb {
        builder = builder.progress_callback(Arc::clone(cb) as ProgressCallback);
    }
    let config = builder.build().context("Invalid configuration")?;

    // ── Build pipeline (in-memory backends) ──────────────────────────────
    let gateway = Arc::new(MemoryGateway::new());
    let pool = ConnectionPool::new(cli.concurrency, || ());
    let pipeline = IngestionPipeline::new(
        Arc::clone(&gateway) as Arc<dyn epub_ingest::PersistenceGateway>,
        Arc::new(MemoryObjectStore::new()),
        Arc::new(StaticTokenVerifier::single(cli.token.clone(), "cli")),
        config,
    )
    .with_pool(pool);

    // ── Run ingestion ────────────────────────────────────────────────────
    let result = pipeline.ingest(&cli.token, &cli.input).await;
    if let Some(ref cb) = progress_cb {
        cb.finish();
    }
    let output = result.context("Ingestion failed")?;

    if cli.json {
        let json = serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
        println!("{json}");
        return Ok(());
    }

    // ── Summary ──────────────────────────────────────────────────────────
    let warning_count = progress_cb
        .as_ref()
        .map(|cb| cb.warning_count())
        .unwrap_or(output.warnings.len());
    if !cli.quiet {
        eprintln!(
            "{}  {}  {} chapters  {} blocks  {} resources  {}ms",
            if warning_count == 0 {
                green("✔")
            } else {
                cyan("⚠")
            },
            bold(&output.title),
            output.chapters_written,
            output.blocks_written,
            output.resources_written,
            output.stats.total_duration_ms,
        );
        for warning in &output.warnings {
            eprintln!("   {} {}", red("✗"), warning);
        }
    }

    // Chapter listing to stdout, pipe-friendly.
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    for chapter in gateway.chapters_for(output.book_id) {
        writeln!(
            handle,
            "{:>4}  {}  [{} blocks]",
            chapter.order_index,
            chapter.title,
            gateway.blocks_for(chapter.id).len()
        )
        .context("Failed to write to stdout")?;
    }

    Ok(())
}
