//! CLI binary for edgequake-cards.
//!
//! A thin shim over the library crate: flags map onto `ForgeConfig`, each
//! subcommand calls one library operation and prints the result.

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use edgequake_cards::{
    App, Card, CardStatus, ForgeConfig, GenerationProgressCallback, PageSelection, PromptType,
    ProgressCallback, RejectionType, Session,
};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
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
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one bar per run plus a log line per batch.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    /// Spinner only; the bar length is set by `on_generation_start`.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Planning batches…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} batches  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Generating");
        self.bar.reset_eta();
    }

    fn elapsed_secs(&self, batch: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut times| times.remove(&batch))
            .map(|t| t.elapsed().as_millis() as f64 / 1000.0)
            .unwrap_or(0.0)
    }
}

impl GenerationProgressCallback for CliProgressCallback {
    fn on_generation_start(&self, session_id: i64, total_batches: usize) {
        self.activate_bar(total_batches);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!(
                "Session {session_id}: generating from {total_batches} batches…"
            ))
        ));
    }

    fn on_batch_start(&self, _session_id: i64, batch: usize, _total: usize) {
        if let Ok(mut times) = self.start_times.lock() {
            times.insert(batch, Instant::now());
        }
        self.bar.set_message(format!("batch {batch}"));
    }

    fn on_batch_complete(&self, _session_id: i64, batch: usize, total: usize, cards: usize) {
        let secs = self.elapsed_secs(batch);
        self.bar.println(format!(
            "  {} Batch {:>3}/{:<3}  {:<10}  {}",
            green("✓"),
            batch,
            total,
            dim(&format!("{cards:>3} cards")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_batch_error(&self, _session_id: i64, batch: usize, total: usize, error: &str) {
        let secs = self.elapsed_secs(batch);
        self.errors.fetch_add(1, Ordering::SeqCst);

        let msg = if error.chars().count() > 80 {
            let cut: String = error.chars().take(79).collect();
            format!("{cut}\u{2026}")
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} Batch {:>3}/{:<3}  {}  {}",
            red("✗"),
            batch,
            total,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_generation_complete(&self, _session_id: i64, total_batches: usize, new_cards: usize) {
        let failed = self.errors.load(Ordering::SeqCst);
        self.bar.finish_and_clear();

        if failed == 0 {
            eprintln!(
                "{} {} new cards from {} batches",
                green("✔"),
                bold(&new_cards.to_string()),
                total_batches
            );
        } else {
            eprintln!(
                "{} {} new cards  ({}/{} batches failed)",
                if failed == total_batches {
                    red("✘")
                } else {
                    cyan("⚠")
                },
                bold(&new_cards.to_string()),
                red(&failed.to_string()),
                total_batches,
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Look at a PDF before committing to it (no API key needed)
  cards inspect biology.pdf

  # Register chapters 2 and 3, then generate
  cards register pdf biology.pdf --chapters 2,3
  cards generate 1

  # Markdown notes with images next to the file
  cards register md notes/week3.md
  cards generate 2

  # Fill gaps on pages 40-60, focusing on enzyme kinetics
  cards continue 1 --pages 40-60 --focus "enzyme kinetics"

  # Review
  cards list cards 1 --status pending
  cards approve 12 13 14
  cards reject 15 --type unclear --reason "two questions in one"
  cards auto-correct 15
  cards finalize 1

  # Prompt evolution
  cards suggestions
  cards suggestions approve 3

PROVIDERS:
  anthropic   Sends page batches as native PDF documents (best for figures)
  openai, gemini, ollama, azure, ...
              Extracted page text in chunks; Markdown images as attachments

ENVIRONMENT VARIABLES:
  ANTHROPIC_API_KEY       Anthropic API key (preferred when set)
  OPENAI_API_KEY          OpenAI API key
  EDGEQUAKE_PROVIDER      Override provider
  EDGEQUAKE_MODEL         Override model ID
  CARDS_DATA_DIR          Database and image directory (default ./data)
  RUST_LOG                Log filter, overrides --verbose/--quiet
"#;

/// Turn PDF and Markdown documents into reviewed flashcards.
#[derive(Parser, Debug)]
#[command(
    name = "cards",
    version,
    about = "Turn PDF and Markdown documents into reviewed flashcards with LLMs",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory holding the database and stored images.
    #[arg(long, global = true, env = "CARDS_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,

    /// LLM provider: anthropic, openai, gemini, ollama, azure.
    #[arg(long, global = true, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// LLM model ID.
    #[arg(long, global = true, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// Pages per native-document batch.
    #[arg(long, global = true, env = "CARDS_BATCH_SIZE", default_value_t = 10)]
    batch_size: usize,

    /// Pages repeated between consecutive batches.
    #[arg(long, global = true, env = "CARDS_BATCH_OVERLAP", default_value_t = 1)]
    batch_overlap: usize,

    /// Character ceiling for text and Markdown chunks.
    #[arg(long, global = true, env = "CARDS_CHUNK_CHARS", default_value_t = 3000)]
    chunk_chars: usize,

    /// Images smaller than this in both dimensions are skipped.
    #[arg(long, global = true, env = "CARDS_MIN_IMAGE_SIZE", default_value_t = 50)]
    min_image_size: u32,

    /// LLM temperature (0.0–2.0).
    #[arg(long, global = true, env = "CARDS_TEMPERATURE", default_value_t = 0.3)]
    temperature: f32,

    /// Max LLM output tokens per request.
    #[arg(long, global = true, env = "CARDS_MAX_TOKENS", default_value_t = 4096)]
    max_tokens: usize,

    /// Per-request LLM timeout in seconds.
    #[arg(long, global = true, env = "CARDS_API_TIMEOUT", default_value_t = 300)]
    api_timeout: u64,

    /// Print machine-readable JSON instead of text.
    #[arg(long, global = true, env = "CARDS_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, global = true, env = "CARDS_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "CARDS_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "CARDS_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print PDF metadata and outline chapters.
    Inspect { input: PathBuf },

    /// Register a document as a new session.
    #[command(subcommand)]
    Register(RegisterCommand),

    /// Run initial generation for a session and wait for it.
    Generate { session: i64 },

    /// Generate more cards for a READY session without repeating existing ones.
    Continue {
        session: i64,

        /// Topic to concentrate on.
        #[arg(long)]
        focus: Option<String>,

        /// Restrict this pass to pages: all, 5, 3-15, or 1,3,5.
        #[arg(long)]
        pages: Option<String>,
    },

    /// List sessions or cards.
    #[command(subcommand)]
    List(ListCommand),

    /// Card counts and the latest error for a session.
    Stats { session: i64 },

    /// Approve one or more cards.
    Approve {
        #[arg(required = true)]
        ids: Vec<i64>,
    },

    /// Reject one or more cards with a reason.
    Reject(RejectArgs),

    /// Replace a card's text.
    Edit {
        id: i64,
        #[arg(long)]
        front: String,
        #[arg(long)]
        back: String,
        /// Comma-separated tags.
        #[arg(long)]
        tags: Option<String>,
    },

    /// Rewrite a rejected card from its rejection feedback.
    AutoCorrect { id: i64 },

    /// Ask the model to review a session's pending cards (suggestions only).
    Validate { session: i64 },

    /// Finalize a session and derive a prompt suggestion from its reviews.
    Finalize { session: i64 },

    /// Delete a session and everything attached to it.
    Delete { session: i64 },

    /// Pending prompt suggestions, or approve / reject one.
    Suggestions {
        #[command(subcommand)]
        action: Option<SuggestionCommand>,
    },

    /// Version history of a prompt type.
    Prompts {
        #[arg(long = "type", value_enum, default_value = "generation")]
        kind: PromptTypeArg,
    },
}

#[derive(Subcommand, Debug)]
enum RegisterCommand {
    /// A PDF document.
    Pdf {
        input: PathBuf,
        /// Page selection: all, 5, 3-15, or 1,3,5,7.
        #[arg(long, default_value = "all", conflicts_with = "chapters")]
        pages: String,
        /// Outline chapters (1-indexed), e.g. 2,3.
        #[arg(long)]
        chapters: Option<String>,
    },
    /// A Markdown file with local images.
    Md {
        input: PathBuf,
        /// Directory image references resolve against (default: the file's directory).
        #[arg(long)]
        base_dir: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum ListCommand {
    Sessions,
    Cards {
        session: i64,
        #[arg(long, value_enum)]
        status: Option<CardStatusArg>,
    },
}

#[derive(Args, Debug)]
struct RejectArgs {
    #[arg(required = true)]
    ids: Vec<i64>,
    #[arg(long)]
    reason: String,
    #[arg(long = "type", value_enum, default_value = "other")]
    kind: RejectionTypeArg,
}

#[derive(Subcommand, Debug)]
enum SuggestionCommand {
    /// Activate a suggestion as the next prompt version.
    Approve { id: i64 },
    /// Discard a suggestion.
    Reject { id: i64 },
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum CardStatusArg {
    Pending,
    Approved,
    Rejected,
    Edited,
}

impl From<CardStatusArg> for CardStatus {
    fn from(v: CardStatusArg) -> Self {
        match v {
            CardStatusArg::Pending => CardStatus::Pending,
            CardStatusArg::Approved => CardStatus::Approved,
            CardStatusArg::Rejected => CardStatus::Rejected,
            CardStatusArg::Edited => CardStatus::Edited,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum RejectionTypeArg {
    Unclear,
    Incorrect,
    TooComplex,
    Duplicate,
    Other,
}

impl From<RejectionTypeArg> for RejectionType {
    fn from(v: RejectionTypeArg) -> Self {
        match v {
            RejectionTypeArg::Unclear => RejectionType::Unclear,
            RejectionTypeArg::Incorrect => RejectionType::Incorrect,
            RejectionTypeArg::TooComplex => RejectionType::TooComplex,
            RejectionTypeArg::Duplicate => RejectionType::Duplicate,
            RejectionTypeArg::Other => RejectionType::Other,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum PromptTypeArg {
    Generation,
    Validation,
}

impl From<PromptTypeArg> for PromptType {
    fn from(v: PromptTypeArg) -> Self {
        match v {
            PromptTypeArg::Generation => PromptType::Generation,
            PromptTypeArg::Validation => PromptType::Validation,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs while a run is in flight.
    let runs_generation = matches!(cli.command, Command::Generate { .. } | Command::Continue { .. });
    let show_progress = runs_generation && !cli.quiet && !cli.no_progress && !cli.json;
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
        let cb = CliProgressCallback::new_dynamic();
        Some(cb as Arc<dyn GenerationProgressCallback>)
    } else {
        None
    };

    let config = build_config(&cli, progress_cb)?;
    let app = App::open(config).context("Failed to open the card store")?;
    let result = run(&cli, &app).await;
    app.shutdown().await;
    result
}

/// Map CLI args to `ForgeConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ForgeConfig> {
    let mut builder = ForgeConfig::builder()
        .data_dir(&cli.data_dir)
        .batch_size(cli.batch_size)
        .batch_overlap(cli.batch_overlap)
        .chunk_chars(cli.chunk_chars)
        .min_image_size(cli.min_image_size)
        .temperature(cli.temperature)
        .max_tokens(cli.max_tokens)
        .api_timeout_secs(cli.api_timeout);

    if let Some(ref name) = cli.provider {
        builder = builder.provider_name(name);
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

async fn run(cli: &Cli, app: &App) -> Result<()> {
    match &cli.command {
        Command::Inspect { input } => {
            let info = app
                .generator()
                .inspect_pdf(input)
                .await
                .context("Failed to inspect PDF")?;
            if cli.json {
                return print_json(&info);
            }
            println!("File:         {}", input.display());
            if let Some(ref t) = info.title {
                println!("Title:        {}", t);
            }
            if let Some(ref a) = info.author {
                println!("Author:       {}", a);
            }
            if let Some(ref s) = info.subject {
                println!("Subject:      {}", s);
            }
            println!("Pages:        {}", info.page_count);
            println!("Size:         {} bytes", info.file_size);
            if !info.chapters.is_empty() {
                println!("Chapters:");
                for (i, ch) in info.chapters.iter().enumerate() {
                    println!(
                        "  {:>3}. {}  {}",
                        i + 1,
                        ch.title,
                        dim(&format!("pp. {}-{}", ch.start_page, ch.end_page))
                    );
                }
            }
        }

        Command::Register(RegisterCommand::Pdf {
            input,
            pages,
            chapters,
        }) => {
            let selection = match chapters {
                Some(list) => PageSelection::Chapters(parse_number_list(list, "chapter")?),
                None => parse_pages(pages)?,
            };
            let session = app
                .generator()
                .register_pdf(input, selection, cli.provider.as_deref())
                .await
                .context("Failed to register PDF")?;
            print_registered(cli, &session)?;
        }

        Command::Register(RegisterCommand::Md { input, base_dir }) => {
            let session = app
                .generator()
                .register_markdown(input, base_dir.as_deref(), cli.provider.as_deref())
                .await
                .context("Failed to register Markdown")?;
            print_registered(cli, &session)?;
        }

        Command::Generate { session } => {
            app.start_generation(*session)?
                .wait()
                .await
                .map_err(|e| anyhow!(e))
                .context("Generation failed")?;
            print_session_outcome(cli, app, *session)?;
        }

        Command::Continue {
            session,
            focus,
            pages,
        } => {
            let pages = pages.as_deref().map(parse_pages).transpose()?;
            app.continue_generation(*session, focus.clone(), pages)?
                .wait()
                .await
                .map_err(|e| anyhow!(e))
                .context("Continuation failed")?;
            print_session_outcome(cli, app, *session)?;
        }

        Command::List(ListCommand::Sessions) => {
            let sessions = app.store().list_sessions()?;
            if cli.json {
                return print_json(&sessions);
            }
            for s in &sessions {
                println!(
                    "{:>4}  {:<10}  {:>3}/{:<3}  {}  {}",
                    s.id,
                    s.status.as_str(),
                    s.batches_completed,
                    s.total_batches,
                    bold(&s.filename),
                    dim(&s.created_at.format("%Y-%m-%d %H:%M").to_string()),
                );
            }
        }

        Command::List(ListCommand::Cards { session, status }) => {
            let cards = app
                .store()
                .list_cards(*session, status.map(CardStatus::from))?;
            if cli.json {
                return print_json(&cards);
            }
            for card in &cards {
                print_card(card);
            }
        }

        Command::Stats { session } => {
            let s = app.store().require_session(*session)?;
            let stats = app.store().session_stats(*session)?;
            if cli.json {
                #[derive(Serialize)]
                struct Report<'a> {
                    session: &'a Session,
                    stats: &'a edgequake_cards::SessionStats,
                }
                return print_json(&Report {
                    session: &s,
                    stats: &stats,
                });
            }
            println!("Session:   {} ({})", s.id, s.filename);
            println!("Status:    {}", s.status);
            println!("Batches:   {}/{}", s.batches_completed, s.total_batches);
            println!(
                "Cards:     {} total, {} pending, {} approved, {} rejected, {} edited",
                stats.total, stats.pending, stats.approved, stats.rejected, stats.edited
            );
            println!("Images:    {}", stats.images);
            if let Some(ref e) = stats.last_error {
                println!("Error:     {}", red(e));
            }
        }

        Command::Approve { ids } => {
            if let [id] = ids.as_slice() {
                let card = app.review().approve(*id)?;
                report_card(cli, &card)?;
            } else {
                let outcome = app.review().batch_approve(ids);
                report_outcome(cli, &outcome)?;
            }
        }

        Command::Reject(args) => {
            let kind = RejectionType::from(args.kind);
            if let [id] = args.ids.as_slice() {
                let rejection = app.review().reject(*id, &args.reason, kind)?;
                if cli.json {
                    return print_json(&rejection);
                }
                eprintln!("{} card {} rejected ({})", green("✔"), id, kind);
            } else {
                let outcome = app.review().batch_reject(&args.ids, &args.reason, kind);
                report_outcome(cli, &outcome)?;
            }
        }

        Command::Edit {
            id,
            front,
            back,
            tags,
        } => {
            let tags: Option<Vec<String>> = tags.as_ref().map(|t| {
                t.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            });
            let card = app.review().edit(*id, front, back, tags.as_deref())?;
            report_card(cli, &card)?;
        }

        Command::AutoCorrect { id } => {
            let card = app
                .review()
                .auto_correct(*id)
                .await
                .context("Auto-correct failed")?;
            report_card(cli, &card)?;
        }

        Command::Validate { session } => {
            let improved = app
                .review()
                .validate_cards(*session)
                .await
                .context("Validation failed")?;
            if cli.json {
                return print_json(&improved);
            }
            if improved.is_empty() {
                eprintln!("{} no improvements suggested", green("✔"));
            }
            for card in &improved {
                let id = card
                    .id
                    .map(|id| format!("#{id}"))
                    .unwrap_or_else(|| "new".to_string());
                println!("{} {}\n  Q: {}\n  A: {}\n", cyan("◆"), id, card.front, card.back);
            }
        }

        Command::Finalize { session } => {
            let (finalized, evolve) = app.finalize(*session)?;
            eprintln!("{} session {} finalized", green("✔"), finalized.id);
            if let Err(e) = evolve.wait().await {
                eprintln!("{} prompt analysis failed: {}", cyan("⚠"), e);
            }
            let pending: Vec<_> = app
                .advisor()
                .pending_suggestions()?
                .into_iter()
                .filter(|s| s.session_id == finalized.id)
                .collect();
            if cli.json {
                return print_json(&pending);
            }
            for s in &pending {
                println!(
                    "{} suggestion {} ({} rejections)\n  {}",
                    cyan("◆"),
                    s.id,
                    s.patterns.total_rejections,
                    s.reasoning
                );
            }
        }

        Command::Delete { session } => {
            if !app.store().delete_session(*session)? {
                anyhow::bail!("Session {} not found", session);
            }
            eprintln!("{} session {} deleted", green("✔"), session);
        }

        Command::Suggestions { action: None } => {
            let pending = app.advisor().pending_suggestions()?;
            if cli.json {
                return print_json(&pending);
            }
            for s in &pending {
                println!(
                    "{:>4}  session {:<4}  {}",
                    s.id,
                    s.session_id,
                    dim(&s.reasoning)
                );
            }
        }

        Command::Suggestions {
            action: Some(SuggestionCommand::Approve { id }),
        } => {
            let version = app.advisor().approve_suggestion(*id)?;
            if cli.json {
                return print_json(&version);
            }
            eprintln!(
                "{} {} prompt v{} is now active",
                green("✔"),
                version.prompt_type,
                version.version
            );
        }

        Command::Suggestions {
            action: Some(SuggestionCommand::Reject { id }),
        } => {
            app.advisor().reject_suggestion(*id)?;
            eprintln!("{} suggestion {} rejected", green("✔"), id);
        }

        Command::Prompts { kind } => {
            let history = app.advisor().prompt_history((*kind).into())?;
            if cli.json {
                return print_json(&history);
            }
            for v in &history {
                let rate = v
                    .approval_rate
                    .map(|r| format!("{:.0}%", r * 100.0))
                    .unwrap_or_else(|| "n/a".to_string());
                println!(
                    "v{:<3} {}  generated {:>5}  approved {:>5}  rejected {:>5}  rate {}",
                    v.version,
                    if v.is_active { green("active") } else { dim("      ") },
                    v.cards_generated,
                    v.cards_approved,
                    v.cards_rejected,
                    rate
                );
            }
        }
    }
    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to serialise output")?
    );
    Ok(())
}

fn print_card(card: &Card) {
    println!(
        "{} {:<5} {}",
        dim(&format!("#{:<5}", card.id)),
        card.status.as_str(),
        dim(&card.tags.join(","))
    );
    println!("  Q: {}", card.front);
    println!("  A: {}\n", card.back);
}

fn report_card(cli: &Cli, card: &Card) -> Result<()> {
    if cli.json {
        return print_json(card);
    }
    print_card(card);
    Ok(())
}

fn report_outcome(cli: &Cli, outcome: &edgequake_cards::BatchOutcome) -> Result<()> {
    if cli.json {
        return print_json(outcome);
    }
    eprintln!(
        "{} {} processed, {} failed",
        if outcome.failed == 0 {
            green("✔")
        } else {
            cyan("⚠")
        },
        outcome.processed,
        outcome.failed
    );
    for (id, e) in &outcome.errors {
        eprintln!("  {} card {}: {}", red("✗"), id, e);
    }
    Ok(())
}

fn print_registered(cli: &Cli, session: &Session) -> Result<()> {
    if cli.json {
        return print_json(session);
    }
    println!("{}", session.id);
    if !cli.quiet {
        eprintln!(
            "{} registered '{}' as session {} ({}, {})",
            green("✔"),
            session.filename,
            session.id,
            session.provider,
            if session.metadata.use_native_document {
                "native PDF"
            } else {
                "text"
            }
        );
    }
    Ok(())
}

fn print_session_outcome(cli: &Cli, app: &App, session_id: i64) -> Result<()> {
    let session = app.store().require_session(session_id)?;
    if cli.json {
        return print_json(&session);
    }
    let stats = app.store().session_stats(session_id)?;
    if !cli.quiet {
        eprintln!(
            "Session {}: {}  {} cards ({} pending)",
            session.id,
            bold(session.status.as_str()),
            stats.total,
            stats.pending
        );
        for e in &session.metadata.errors {
            eprintln!("  {} {}", red("✗"), e);
        }
    }
    if let Some(ref e) = session.metadata.error {
        anyhow::bail!("Session {} failed: {}", session.id, e);
    }
    Ok(())
}

/// Parse `--pages` into a `PageSelection`.
fn parse_pages(s: &str) -> Result<PageSelection> {
    let s = s.trim().to_lowercase();

    if s == "all" {
        return Ok(PageSelection::All);
    }

    // Range: "3-15"
    if let Some((start, end)) = s.split_once('-') {
        let start: usize = start
            .trim()
            .parse()
            .context("Invalid start page in range")?;
        let end: usize = end.trim().parse().context("Invalid end page in range")?;

        if start < 1 {
            anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", start);
        }
        if start > end {
            anyhow::bail!(
                "Invalid page range '{}-{}': start must be <= end",
                start,
                end
            );
        }
        return Ok(PageSelection::Range(start, end));
    }

    // Set: "1,3,5,7" or a single page
    Ok(PageSelection::Set(parse_number_list(&s, "page")?))
}

fn parse_number_list(s: &str, what: &str) -> Result<Vec<usize>> {
    let numbers: Vec<usize> = s
        .split(',')
        .map(|p| {
            p.trim()
                .parse::<usize>()
                .with_context(|| format!("Invalid {} number: '{}'", what, p.trim()))
        })
        .collect::<Result<Vec<_>>>()?;
    if let Some(&n) = numbers.iter().find(|&&n| n < 1) {
        anyhow::bail!("{}s are 1-indexed, minimum is 1 (got {})", what, n);
    }
    Ok(numbers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_page_selections() {
        assert_eq!(parse_pages("all").unwrap(), PageSelection::All);
        assert_eq!(parse_pages("3-15").unwrap(), PageSelection::Range(3, 15));
        assert_eq!(parse_pages("5").unwrap(), PageSelection::Set(vec![5]));
        assert_eq!(
            parse_pages("1, 3,5").unwrap(),
            PageSelection::Set(vec![1, 3, 5])
        );
        assert!(parse_pages("0-3").is_err());
        assert!(parse_pages("9-2").is_err());
        assert!(parse_pages("x").is_err());
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
