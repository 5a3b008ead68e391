//! CLI binary for docphoto.
//!
//! A thin shim over the library crate that maps CLI flags to `PhotoConfig`
//! and prints results.

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};
use docphoto::{
    batch, FontChoice, PaddingStrategy, PhotoConfig, PhotoPipeline, PipelineProgressCallback,
    PipelineWarning, ProducedPhoto, ProgressCallback, Reply, SearchStrategy, SegmenterChoice,
    Session, SessionInput, Stage, TargetSpec,
};
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
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

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Spinner that names the running stage and logs one line per finished stage.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(Stage::ALL.len() as u64);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:20.green/238}] {pos}/{len}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);
        bar.set_style(style);
        bar.set_prefix("Photo");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl PipelineProgressCallback for CliProgressCallback {
    fn on_stage_start(&self, stage: Stage) {
        self.bar.set_message(format!("{stage}…"));
    }

    fn on_stage_complete(&self, stage: Stage, elapsed_ms: u64) {
        self.bar.println(format!(
            "  {} {:<8} {}",
            green("✓"),
            stage.to_string(),
            dim(&format!("{elapsed_ms}ms"))
        ));
        self.bar.inc(1);
    }

    fn on_stage_error(&self, stage: Stage, error: &docphoto::DocPhotoError) {
        self.bar.println(format!(
            "  {} {:<8} {}",
            red("✗"),
            stage.to_string(),
            red(&error.to_string())
        ));
    }

    fn on_warning(&self, warning: &PipelineWarning) {
        self.bar.println(format!("  {} {}", yellow("⚠"), warning));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # One photo, written next to you as Photograph-<id>.jpg
  docphoto make portrait.jpg --name "A. Kumar"

  # Explicit output path and a pinned caption date
  docphoto make portrait.jpg --name "A. Kumar" --date 19-10-2026 -o kumar.jpg

  # Also write the blurred preview
  docphoto make portrait.jpg --name "A. Kumar" -o kumar.jpg --preview kumar-preview.jpg

  # Neural background removal (build with --features onnx)
  docphoto make portrait.jpg --name "A. Kumar" --segmenter onnx --model u2netp

  # Many photos from a manifest, 4 at a time
  docphoto batch jobs.json --out-dir out/ -c 4

  # Interactive conversation on stdin
  docphoto chat --payment-url https://pay.example/abc

  # Print the pixel geometry for the current settings
  docphoto geometry --dpi 300

MANIFEST FORMAT (batch):
  [ { "photo": "uploads/kumar.jpg", "name": "A. Kumar" },
    { "id": "r-17", "photo": "uploads/devi.png", "name": "S. Devi" } ]

CHAT COMMANDS:
  /start            begin (or restart) a conversation
  /photo <path>     send a photo
  <any text>        send your name
  /paid             confirm payment
  /cancel           cancel
  /quit             leave

ENVIRONMENT VARIABLES:
  DOCPHOTO_*                 every flag has an env fallback (see --help)
  DOCPHOTO_MODEL_PATH        existing .onnx model; skips download
  DOCPHOTO_MODEL_CACHE_DIR   override the model cache directory
  RUST_LOG                   override log filtering
"#;

/// Turn portraits into ID-document photographs.
#[derive(Parser, Debug)]
#[command(
    name = "docphoto",
    version,
    about = "Turn portraits into ID-document photographs",
    long_about = "Replace the background with white, fit the subject onto a fixed-size canvas, \
caption it with the applicant's name and the date, and encode it as a JPEG inside a byte window.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Output structured JSON instead of human-readable text.
    #[arg(long, global = true, env = "DOCPHOTO_JSON")]
    json: bool,

    /// Disable progress output.
    #[arg(long, global = true, env = "DOCPHOTO_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "DOCPHOTO_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "DOCPHOTO_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Produce one photograph.
    Make {
        /// Portrait to process (JPEG, PNG or WebP).
        photo: PathBuf,

        /// Applicant name for the caption.
        #[arg(long, env = "DOCPHOTO_NAME")]
        name: String,

        /// Write the photograph to this file.
        #[arg(short, long, env = "DOCPHOTO_OUTPUT", conflicts_with = "out_dir")]
        output: Option<PathBuf>,

        /// Write `Photograph-<id>.jpg` into this directory.
        #[arg(long, env = "DOCPHOTO_OUT_DIR")]
        out_dir: Option<PathBuf>,

        /// Also write a blurred preview to this file.
        #[arg(long, env = "DOCPHOTO_PREVIEW")]
        preview: Option<PathBuf>,

        #[command(flatten)]
        pipeline: PipelineArgs,
    },

    /// Produce every photograph listed in a JSON manifest.
    Batch {
        /// Manifest file (see --help for the format).
        manifest: PathBuf,

        /// Directory for the photographs.
        #[arg(long, env = "DOCPHOTO_OUT_DIR", default_value = ".")]
        out_dir: PathBuf,

        /// Photographs produced in parallel.
        #[arg(short, long, env = "DOCPHOTO_CONCURRENCY", default_value_t = 4)]
        concurrency: usize,

        #[command(flatten)]
        pipeline: PipelineArgs,
    },

    /// Run the photo conversation interactively on stdin.
    Chat {
        /// Link shown with the payment prompt.
        #[arg(long, env = "DOCPHOTO_PAYMENT_URL")]
        payment_url: String,

        /// Where delivered photographs are copied.
        #[arg(long, env = "DOCPHOTO_OUT_DIR", default_value = ".")]
        out_dir: PathBuf,

        #[command(flatten)]
        pipeline: PipelineArgs,
    },

    /// Print the pixel geometry for the current settings.
    Geometry {
        #[command(flatten)]
        pipeline: PipelineArgs,
    },
}

/// Flags shared by every subcommand that builds a pipeline.
#[derive(Args, Debug, Clone)]
struct PipelineArgs {
    /// Resolution in dots per inch.
    #[arg(long, env = "DOCPHOTO_DPI", default_value_t = 200,
          value_parser = clap::value_parser!(u32).range(50..=1200))]
    dpi: u32,

    /// Smallest output size in bytes.
    #[arg(long, env = "DOCPHOTO_MIN_BYTES", default_value_t = 35 * 1024)]
    min_bytes: usize,

    /// Largest output size in bytes.
    #[arg(long, env = "DOCPHOTO_MAX_BYTES", default_value_t = 49 * 1024)]
    max_bytes: usize,

    /// Caption font file (TrueType/OpenType). Default: a system bold serif.
    #[arg(long, env = "DOCPHOTO_FONT", conflicts_with = "builtin_font")]
    font: Option<PathBuf>,

    /// Always use the embedded caption font.
    #[arg(long, env = "DOCPHOTO_BUILTIN_FONT")]
    builtin_font: bool,

    /// Background removal backend.
    #[arg(long, env = "DOCPHOTO_SEGMENTER", value_enum, default_value = "border-key")]
    segmenter: SegmenterArg,

    /// ONNX model: a registry name (u2net, u2netp, u2net_human_seg, silueta)
    /// or a path to an .onnx file.
    #[arg(long, env = "DOCPHOTO_MODEL", default_value = "u2net")]
    model: String,

    /// Quality search strategy.
    #[arg(long, env = "DOCPHOTO_SEARCH", value_enum, default_value = "descending")]
    search: SearchArg,

    /// How undersized files are padded to the floor.
    #[arg(long, env = "DOCPHOTO_PADDING", value_enum, default_value = "comment")]
    padding: PaddingArg,

    /// Caption date as DD-MM-YYYY. Default: today.
    #[arg(long, env = "DOCPHOTO_DATE")]
    date: Option<String>,
}

#[derive(ValueEnum, Clone, Debug)]
enum SegmenterArg {
    BorderKey,
    Onnx,
}

#[derive(ValueEnum, Clone, Debug)]
enum SearchArg {
    Descending,
    Binary,
}

impl From<SearchArg> for SearchStrategy {
    fn from(v: SearchArg) -> Self {
        match v {
            SearchArg::Descending => SearchStrategy::Descending,
            SearchArg::Binary => SearchStrategy::Binary,
        }
    }
}

#[derive(ValueEnum, Clone, Debug)]
enum PaddingArg {
    Comment,
    Zeros,
}

impl From<PaddingArg> for PaddingStrategy {
    fn from(v: PaddingArg) -> Self {
        match v {
            PaddingArg::Comment => PaddingStrategy::CommentSegment,
            PaddingArg::Zeros => PaddingStrategy::TrailingZeros,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // INFO-level library logs are suppressed while a progress display is
    // active; the display carries the same information.
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

    match &cli.command {
        Command::Make {
            photo,
            name,
            output,
            out_dir,
            preview,
            pipeline,
        } => {
            run_make(
                &cli,
                photo,
                name,
                output.as_deref(),
                out_dir.as_deref(),
                preview.as_deref(),
                pipeline,
                show_progress,
            )
            .await
        }
        Command::Batch {
            manifest,
            out_dir,
            concurrency,
            pipeline,
        } => run_batch(&cli, manifest, out_dir, *concurrency, pipeline, show_progress).await,
        Command::Chat {
            payment_url,
            out_dir,
            pipeline,
        } => tokio::task::block_in_place(|| run_chat(&cli, payment_url, out_dir, pipeline)),
        Command::Geometry { pipeline } => run_geometry(&cli, pipeline),
    }
}

// ── Subcommands ──────────────────────────────────────────────────────────────

#[allow(clippy::too_many_arguments)]
async fn run_make(
    cli: &Cli,
    photo: &Path,
    name: &str,
    output: Option<&Path>,
    out_dir: Option<&Path>,
    preview: Option<&Path>,
    args: &PipelineArgs,
    show_progress: bool,
) -> Result<()> {
    let source = docphoto::pipeline::input::read_source_async(photo)
        .await
        .with_context(|| format!("Failed to read {}", photo.display()))?;

    let progress = show_progress.then(CliProgressCallback::new);
    let config = build_config(
        args,
        progress
            .clone()
            .map(|cb| cb as Arc<dyn PipelineProgressCallback>),
    )?;
    ensure_model(args, cli.quiet)?;
    let pipeline = PhotoPipeline::new(config).context("Failed to set up the pipeline")?;

    let result = tokio::task::block_in_place(|| match output {
        Some(path) => pipeline
            .produce_to_file(&source, name, path)
            .map(|p| (path.to_path_buf(), p)),
        None => pipeline.produce_to_dir(&source, name, out_dir.unwrap_or(Path::new("."))),
    });
    if let Some(ref cb) = progress {
        cb.finish();
    }
    let (path, produced) = result.context("Photo production failed")?;

    if let Some(preview_path) = preview {
        let bytes = docphoto::make_preview(&produced.bytes, args.dpi)
            .context("Failed to build preview")?;
        std::fs::write(preview_path, bytes)
            .with_context(|| format!("Failed to write {}", preview_path.display()))?;
    }

    if cli.json {
        print_json(&path, &produced)?;
    } else if !cli.quiet {
        print_summary(&path, &produced);
    }
    Ok(())
}

async fn run_batch(
    cli: &Cli,
    manifest: &Path,
    out_dir: &Path,
    concurrency: usize,
    args: &PipelineArgs,
    show_progress: bool,
) -> Result<()> {
    let jobs = batch::load_manifest(manifest)
        .await
        .with_context(|| format!("Failed to load manifest {}", manifest.display()))?;
    if jobs.is_empty() {
        bail!("Manifest {} lists no photos", manifest.display());
    }
    tokio::fs::create_dir_all(out_dir)
        .await
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;

    ensure_model(args, cli.quiet)?;
    let config = build_config(args, None)?;
    let pipeline = Arc::new(PhotoPipeline::new(config).context("Failed to set up the pipeline")?);

    let bar = if show_progress {
        let bar = ProgressBar::new(jobs.len() as u64);
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}/{len} photos  ⏱ {elapsed_precise}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(TICKS),
        );
        bar.set_prefix("Batch");
        bar.enable_steady_tick(Duration::from_millis(80));
        Some(bar)
    } else {
        None
    };

    let total = jobs.len();
    let mut failed = 0usize;
    let mut stream = batch::produce_stream(pipeline, jobs, concurrency);
    while let Some(job) = stream.next().await {
        let line = match job.result {
            Ok(produced) => {
                let path = out_dir.join(format!("{}.jpg", job.id));
                std::fs::write(&path, &produced.bytes)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                if cli.json {
                    print_json(&path, &produced)?;
                }
                let mark = if produced.is_clean() { green("✓") } else { yellow("⚠") };
                format!(
                    "  {} {:<16} {} bytes  {}",
                    mark,
                    job.id,
                    produced.byte_len,
                    dim(&path.display().to_string())
                )
            }
            Err(e) => {
                failed += 1;
                format!("  {} {:<16} {}", red("✗"), job.id, red(&e.to_string()))
            }
        };
        match bar {
            Some(ref b) => {
                b.println(line);
                b.inc(1);
            }
            None if !cli.quiet && !cli.json => eprintln!("{line}"),
            None => {}
        }
    }
    if let Some(b) = bar {
        b.finish_and_clear();
    }

    if !cli.quiet {
        eprintln!(
            "{} {}/{} photos produced",
            if failed == 0 { green("✔") } else { yellow("⚠") },
            bold(&(total - failed).to_string()),
            total
        );
    }
    if failed == total {
        bail!("Every photo in the batch failed");
    }
    Ok(())
}

fn run_chat(cli: &Cli, payment_url: &str, out_dir: &Path, args: &PipelineArgs) -> Result<()> {
    ensure_model(args, cli.quiet)?;
    let config = build_config(args, None)?;
    let pipeline = Arc::new(PhotoPipeline::new(config).context("Failed to set up the pipeline")?);
    let mut session = Session::new(pipeline, payment_url).context("Failed to start session")?;

    eprintln!("{}", dim("Type /start to begin, /quit to leave."));
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line.context("Failed to read stdin")?;
        let line = line.trim();
        let input = match line.split_once(' ').unwrap_or((line, "")) {
            ("/quit", _) | ("/exit", _) => break,
            ("/start", _) => SessionInput::Start,
            ("/cancel", _) => SessionInput::Cancel,
            ("/paid", _) => SessionInput::PaymentConfirmed,
            ("/photo", path) => match std::fs::read(path.trim()) {
                Ok(bytes) => SessionInput::Photo(bytes),
                Err(e) => {
                    eprintln!("{} cannot read '{}': {e}", red("✗"), path.trim());
                    continue;
                }
            },
            _ if line.is_empty() => continue,
            _ => SessionInput::Text(line.to_string()),
        };

        for reply in session.handle(input) {
            match reply {
                Reply::Text(t) => println!("{t}"),
                Reply::Preview { path, caption } => {
                    println!("[preview] {}  {}", path.display(), dim(&caption))
                }
                Reply::PaymentPrompt { url, label } => {
                    println!("[pay] {url}   (type /paid for \"{label}\")")
                }
                Reply::Document { path } => {
                    let dest = out_dir.join(path.file_name().unwrap_or_default());
                    std::fs::create_dir_all(out_dir)
                        .with_context(|| format!("Failed to create {}", out_dir.display()))?;
                    std::fs::copy(&path, &dest)
                        .with_context(|| format!("Failed to copy to {}", dest.display()))?;
                    println!("[document] {}", bold(&dest.display().to_string()));
                }
            }
        }
        io::stdout().flush().ok();
    }
    Ok(())
}

fn run_geometry(cli: &Cli, args: &PipelineArgs) -> Result<()> {
    let config = build_config(args, None)?;
    let g = config.target.geometry();
    if cli.json {
        let json = serde_json::json!({
            "target": config.target,
            "geometry": g,
            "footer_px": g.footer_px(),
        });
        println!("{}", serde_json::to_string_pretty(&json)?);
    } else {
        println!("Canvas:  {} x {} px", g.width_px, g.height_px);
        println!("Head:    {} px", g.head_px);
        println!("Footer:  {} px", g.footer_px());
        println!(
            "Bytes:   {} ..= {}",
            config.target.min_bytes, config.target.max_bytes
        );
    }
    Ok(())
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Map CLI args to `PhotoConfig`.
fn build_config(args: &PipelineArgs, progress: Option<ProgressCallback>) -> Result<PhotoConfig> {
    let font = if args.builtin_font {
        FontChoice::Builtin
    } else if let Some(ref path) = args.font {
        FontChoice::Path(path.clone())
    } else {
        FontChoice::System
    };

    let mut builder = PhotoConfig::builder()
        .target(TargetSpec::default())
        .dpi(args.dpi)
        .byte_window(args.min_bytes, args.max_bytes)
        .search(args.search.clone().into())
        .padding(args.padding.clone().into())
        .font(font)
        .segmenter(segmenter_choice(args));

    if let Some(ref date) = args.date {
        let date = NaiveDate::parse_from_str(date, "%d-%m-%Y")
            .with_context(|| format!("Invalid --date '{date}', expected DD-MM-YYYY"))?;
        builder = builder.caption_date(date);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

fn segmenter_choice(args: &PipelineArgs) -> SegmenterChoice {
    match args.segmenter {
        SegmenterArg::BorderKey => SegmenterChoice::BorderKey,
        SegmenterArg::Onnx => {
            let p = Path::new(&args.model);
            if p.extension().is_some_and(|e| e == "onnx") || p.is_file() {
                SegmenterChoice::OnnxFile(p.to_path_buf())
            } else {
                SegmenterChoice::OnnxAuto(args.model.clone())
            }
        }
    }
}

/// Download the ONNX model up front so the progress bar is not mixed into
/// stage output.
#[cfg(feature = "onnx")]
fn ensure_model(args: &PipelineArgs, quiet: bool) -> Result<()> {
    let SegmenterChoice::OnnxAuto(model) = segmenter_choice(args) else {
        return Ok(());
    };
    if quiet || segmodel_auto::cached_model_path(&model).is_some() {
        return Ok(());
    }

    let dl_bar = ProgressBar::new(0);
    dl_bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {bytes}/{total_bytes}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS),
    );
    dl_bar.set_prefix("Model");
    dl_bar.enable_steady_tick(Duration::from_millis(80));

    let bar = dl_bar.clone();
    let on_progress = move |downloaded: u64, total: Option<u64>| {
        if let Some(t) = total {
            if bar.length().unwrap_or(0) != t {
                bar.set_length(t);
            }
        }
        bar.set_position(downloaded);
    };
    tokio::task::block_in_place(|| {
        segmodel_auto::ensure_model(&model, Some(&on_progress as &dyn Fn(u64, Option<u64>)))
    })
    .with_context(|| format!("Failed to download segmentation model '{model}'"))?;

    dl_bar.finish_with_message("ready ✓");
    Ok(())
}

#[cfg(not(feature = "onnx"))]
fn ensure_model(args: &PipelineArgs, _quiet: bool) -> Result<()> {
    if matches!(args.segmenter, SegmenterArg::Onnx) {
        bail!("--segmenter onnx needs a build with `--features onnx`");
    }
    Ok(())
}

fn print_json(path: &Path, produced: &ProducedPhoto) -> Result<()> {
    let json = serde_json::json!({
        "path": path,
        "photo": produced,
    });
    println!(
        "{}",
        serde_json::to_string(&json).context("Failed to serialise output")?
    );
    Ok(())
}

fn print_summary(path: &Path, produced: &ProducedPhoto) {
    eprintln!(
        "{}  {}x{}  {} bytes  q{}  {}ms  →  {}",
        if produced.is_clean() {
            green("✔")
        } else {
            yellow("⚠")
        },
        produced.width,
        produced.height,
        produced.byte_len,
        produced.quality,
        produced.stats.total_ms,
        bold(&path.display().to_string()),
    );
    eprintln!(
        "   {}  /  {}  at {}px",
        dim(&produced.caption.name),
        dim(&produced.caption.date),
        produced.caption.font_size
    );
    for w in &produced.warnings {
        eprintln!("   {} {}", yellow("⚠"), w);
    }
}
