//! CLI binary for imgrehost.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `RehostConfig`, stores images in a local directory served under a public
//! base URL, and prints the rewritten Markdown.

use anyhow::{Context, Result};
use clap::Parser;
use imgrehost::{
    FileType, ImageService, LocalDirSink, ProgressCallback, RehostConfig, RehostProgressCallback,
    RewriteOutput, UploadedImage,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
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
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one bar for the batch plus a log line per
/// image. Images settle out of order in concurrent mode, so lines carry
/// their position.
struct CliProgressCallback {
    bar: ProgressBar,
    failures: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  [{bar:32.green/238}] {pos:>3}/{len} images  ⏱ {elapsed}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  "),
        );
        bar.set_prefix("Rehosting");
        Arc::new(Self {
            bar,
            failures: AtomicUsize::new(0),
        })
    }
}

impl RehostProgressCallback for CliProgressCallback {
    fn on_rewrite_start(&self, total_images: usize) {
        self.bar.set_length(total_images as u64);
        self.bar.enable_steady_tick(Duration::from_millis(80));
    }

    fn on_image_complete(&self, index: usize, total: usize, final_url: &str) {
        self.bar.println(format!(
            "  {} Image {:>3}/{:<3}  {}",
            green("✓"),
            index + 1,
            total,
            dim(final_url)
        ));
        self.bar.inc(1);
    }

    fn on_image_failed(&self, index: usize, total: usize, url: &str) {
        self.failures.fetch_add(1, Ordering::SeqCst);
        self.bar.println(format!(
            "  {} Image {:>3}/{:<3}  {}",
            red("✗"),
            index + 1,
            total,
            red(url)
        ));
        self.bar.inc(1);
    }

    fn on_image_timeout(&self, index: usize, total: usize, url: &str) {
        self.failures.fetch_add(1, Ordering::SeqCst);
        self.bar.println(format!(
            "  {} Image {:>3}/{:<3}  {} {}",
            yellow("⏱"),
            index + 1,
            total,
            yellow(url),
            dim("(timed out)")
        ));
        self.bar.inc(1);
    }

    fn on_rewrite_complete(&self, total_images: usize, rehosted: usize) {
        self.bar.finish_and_clear();
        let failed = self.failures.load(Ordering::SeqCst);
        if failed == 0 {
            eprintln!("{} {} of {} images rehosted", green("✔"), bold(&rehosted.to_string()), total_images);
        } else {
            eprintln!(
                "{} {} of {} images rehosted  ({} failed)",
                yellow("⚠"),
                bold(&rehosted.to_string()),
                total_images,
                red(&failed.to_string())
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Rewrite an article, images stored under ./public/img
  imgrehost post.md --store-dir ./public/img --public-url https://cdn.example.com/img

  # Write to a file instead of stdout
  imgrehost post.md -o post.published.md --store-dir ./img --public-url https://cdn.example.com/img

  # Read from stdin, print a per-image JSON report
  cat post.md | imgrehost - --json --store-dir ./img --public-url https://cdn.example.com/img

  # Store a single local image and print its URL
  imgrehost --upload cat.jpg --store-dir ./img --public-url https://cdn.example.com/img

FAILED IMAGES:
  An image that cannot be fetched, is not png/jpg/webp/gif, or does not
  finish within the batch budget keeps its source URL with
  "cause=saveError!" appended to the query string.

ENVIRONMENT VARIABLES:
  IMGREHOST_STORE_DIR     Default for --store-dir
  IMGREHOST_PUBLIC_URL    Default for --public-url
  RUST_LOG                Overrides the log filter (e.g. imgrehost=debug)
"#;

/// Re-host the external images of a Markdown document.
#[derive(Parser, Debug)]
#[command(
    name = "imgrehost",
    version,
    about = "Re-host the external images of a Markdown document onto your own storage",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Markdown file to rewrite, or `-` for stdin.
    #[arg(required_unless_present = "upload")]
    input: Option<String>,

    /// Write the rewritten Markdown to this file instead of stdout.
    #[arg(short, long, env = "IMGREHOST_OUTPUT")]
    output: Option<PathBuf>,

    /// Store a local image file directly and print its hosted URL.
    #[arg(long, conflicts_with = "input")]
    upload: Option<PathBuf>,

    /// Directory that receives stored images.
    #[arg(long, env = "IMGREHOST_STORE_DIR")]
    store_dir: PathBuf,

    /// Public base URL under which `--store-dir` is served.
    #[arg(long, env = "IMGREHOST_PUBLIC_URL")]
    public_url: String,

    /// How long a multi-image batch may wait for its rehosts (ms).
    #[arg(long, env = "IMGREHOST_BUDGET_MS", default_value_t = 3000)]
    budget_ms: u64,

    /// Overall deadline before the content is published as-is (ms).
    #[arg(long, env = "IMGREHOST_DEADLINE_MS", default_value_t = 5000)]
    deadline_ms: u64,

    /// Per-image HTTP timeout in seconds.
    #[arg(long, env = "IMGREHOST_FETCH_TIMEOUT", default_value_t = 10)]
    fetch_timeout: u64,

    /// Largest accepted image in MiB.
    #[arg(long, env = "IMGREHOST_MAX_IMAGE_MB", default_value_t = 20)]
    max_image_mb: usize,

    /// Always dispatch concurrently, even for a single image.
    #[arg(long)]
    no_fast_path: bool,

    /// Print a JSON report of every image instead of the Markdown.
    #[arg(long, env = "IMGREHOST_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "IMGREHOST_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "IMGREHOST_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "IMGREHOST_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs; verbose mode always wins.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && cli.upload.is_none();
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(io::stderr)
        .init();

    // ── Build service ────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn RehostProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;
    let sink = LocalDirSink::new(&cli.store_dir, &cli.public_url);
    let service = ImageService::builder(config)
        .sink(Arc::new(sink))
        .build()
        .context("Failed to initialise image service")?;

    // ── Direct upload mode ───────────────────────────────────────────────
    if let Some(ref path) = cli.upload {
        let url = upload_file(&service, path).await?;
        println!("{url}");
        return Ok(());
    }

    // ── Rewrite ──────────────────────────────────────────────────────────
    let input = cli.input.as_deref().unwrap_or("-");
    let output = match (&cli.output, input) {
        (Some(out), path) if path != "-" => service
            .rewrite_file(path, out)
            .await
            .context("Rewrite failed")?,
        (out, _) => {
            let content = read_input(input).await?;
            let output = service.rewrite_for_publish_detailed(&content).await;
            match out {
                Some(path) => output.write_to(path).await?,
                None if !cli.json => write_stdout(&output.content)?,
                None => {}
            }
            output
        }
    };

    if cli.json {
        println!("{}", output.report_json().context("Failed to serialise report")?);
    }
    if !cli.quiet {
        print_summary(&output, &service, show_progress);
    }

    Ok(())
}

/// Map CLI args to `RehostConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<RehostConfig> {
    let mut builder = RehostConfig::builder()
        .batch_budget_ms(cli.budget_ms)
        .publish_deadline_ms(cli.deadline_ms)
        .fetch_timeout_secs(cli.fetch_timeout)
        .max_image_bytes(cli.max_image_mb.saturating_mul(1024 * 1024))
        .single_image_fast_path(!cli.no_fast_path);

    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

async fn read_input(input: &str) -> Result<String> {
    if input == "-" {
        let mut buf = String::new();
        tokio::io::stdin()
            .read_to_string(&mut buf)
            .await
            .context("Failed to read stdin")?;
        Ok(buf)
    } else {
        tokio::fs::read_to_string(input)
            .await
            .with_context(|| format!("Failed to read {input}"))
    }
}

fn write_stdout(content: &str) -> Result<()> {
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    handle
        .write_all(content.as_bytes())
        .context("Failed to write to stdout")?;
    if !content.ends_with('\n') {
        handle.write_all(b"\n").ok();
    }
    Ok(())
}

async fn upload_file(service: &ImageService, path: &Path) -> Result<String> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let content_type = path
        .extension()
        .and_then(|e| e.to_str())
        .and_then(FileType::from_extension)
        .map(|t| t.mime())
        .unwrap_or("application/octet-stream");
    service
        .save_upload(Some(UploadedImage::new(bytes, content_type)))
        .await
        .with_context(|| format!("Failed to store {}", path.display()))
}

fn print_summary(output: &RewriteOutput, service: &ImageService, show_progress: bool) {
    let stats = &output.stats;
    if stats.deadline_exceeded {
        eprintln!(
            "{} publish deadline exceeded after {}ms; content left unchanged",
            yellow("⚠"),
            stats.duration_ms
        );
        return;
    }
    if !show_progress && stats.total_images > 0 {
        eprintln!(
            "Rewrote {} images in {}ms: {} rehosted, {} passed through, {} failed, {} timed out",
            stats.total_images,
            stats.duration_ms,
            stats.rehosted,
            stats.passed_through,
            stats.failed,
            stats.timed_out
        );
    }
    eprintln!("   {}", dim(&service.cache().stats().to_string()));
}
