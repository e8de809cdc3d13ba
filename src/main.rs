//! CLI entry point for `notedrop`.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{CommandFactory, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use notedrop::config::Config;
use notedrop::model::identity::UserIdentity;
use notedrop::pipeline::rewrite::ReferenceRewriter;
use notedrop::pipeline::{submit_web_note, IngestReport, Ingestor};
use notedrop::store::fs::{FsNoteStore, FsObjectStore, FsTokenStore};
use notedrop::store::NoteStore;

#[derive(Parser)]
#[command(name = "notedrop", version, about = "Turn inbound email into notes")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Directory holding tokens, notes and objects (overrides the config file)
    #[arg(long, global = true, env = "NOTEDROP_DATA_DIR", value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest raw RFC 822 messages (reads stdin when no file is given)
    Ingest {
        files: Vec<PathBuf>,
        /// Print one JSON report per message
        #[arg(long)]
        json: bool,
    },
    /// Print (minting on first use) the mailbox token of a user
    Token { identity: String },
    /// Save a note as if submitted through the web form
    Post {
        /// Author identity; anonymous when omitted
        #[arg(long)]
        author: Option<String>,
        text: String,
    },
    /// List a user's most recent notes
    Notes {
        identity: String,
        #[arg(short = 'n', long, default_value_t = 10)]
        limit: usize,
        #[arg(long)]
        json: bool,
    },
    /// Show the effective configuration
    Config {
        /// Write it to the config file
        #[arg(long)]
        init: bool,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate a man page
    Manpage,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = notedrop::config::load_config();
    if let Some(dir) = cli.data_dir {
        config.general.data_dir = Some(dir);
    }

    // Configure logging: stderr + optional log file
    let log_level = match cli.verbose {
        0 => config.general.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    setup_logging(log_level, &config);

    match cli.command {
        Commands::Ingest { files, json } => cmd_ingest(&config, &files, json),
        Commands::Token { identity } => cmd_token(&config, &identity),
        Commands::Post { author, text } => cmd_post(&config, author.as_deref(), &text),
        Commands::Notes {
            identity,
            limit,
            json,
        } => cmd_notes(&config, &identity, limit, json),
        Commands::Config { init } => cmd_config(&config, init),
        Commands::Completions { shell } => cmd_completions(shell),
        Commands::Manpage => cmd_manpage(),
    }
}

/// Set up tracing with stderr output and optional file logging.
fn setup_logging(level: &str, config: &Config) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    // Try to set up file logging
    let log_path = notedrop::config::log_file_path(config);
    let log_dir = log_path.parent().unwrap_or(Path::new("."));
    let log_name = log_path
        .file_name()
        .unwrap_or_else(|| std::ffi::OsStr::new("notedrop.log"));
    if std::fs::create_dir_all(log_dir).is_ok() {
        let file_appender = tracing_appender::rolling::never(log_dir, log_name);
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        // Fall back to stderr only
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
    }
}

/// Local stores rooted in the configured data directory.
struct Stores {
    tokens: FsTokenStore,
    notes: FsNoteStore,
    objects: FsObjectStore,
}

impl Stores {
    fn open(config: &Config) -> anyhow::Result<Self> {
        let root = notedrop::config::data_dir(config);
        Ok(Self {
            tokens: FsTokenStore::open(&root)?,
            notes: FsNoteStore::open(&root)?,
            objects: FsObjectStore::open(&root, config.storage.bucket.as_str())?,
        })
    }

    fn ingestor(&self, config: &Config) -> Ingestor<'_> {
        Ingestor::new(
            &self.tokens,
            &self.notes,
            &self.objects,
            ReferenceRewriter::new(&config.storage.public_base_url),
        )
    }
}

/// Result of one input: a report, or the reason the message was dropped.
#[derive(serde::Serialize)]
struct IngestOutcome {
    source: String,
    size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    report: Option<IngestReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dropped: Option<String>,
}

/// Ingest each file (or stdin) and print a summary.
fn cmd_ingest(config: &Config, files: &[PathBuf], json: bool) -> anyhow::Result<()> {
    let stores = Stores::open(config)?;
    let ingestor = stores.ingestor(config);
    let limit = config.limits.max_message_size;
    let start = Instant::now();

    let mut outcomes = Vec::new();
    if files.is_empty() {
        let raw = read_limited(std::io::stdin().lock(), limit)?;
        outcomes.push(ingest_one(&ingestor, "<stdin>".into(), raw));
    } else {
        let pb = if files.len() > 1 {
            let pb = ProgressBar::new(files.len() as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} Ingesting [{bar:40.cyan/blue}] {pos}/{len}")?
                    .progress_chars("#>-"),
            );
            pb
        } else {
            ProgressBar::hidden()
        };

        for path in files {
            let source = path.display().to_string();
            let outcome = match read_message(path, limit) {
                Ok(raw) => ingest_one(&ingestor, source, raw),
                Err(e) => IngestOutcome {
                    source,
                    size: 0,
                    report: None,
                    dropped: Some(e.to_string()),
                },
            };
            outcomes.push(outcome);
            pb.inc(1);
        }
        pb.finish_and_clear();
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&outcomes)?);
    } else {
        print_ingest_summary(&outcomes, start.elapsed());
    }

    if outcomes.iter().all(|o| o.report.is_none()) {
        anyhow::bail!("No message was ingested");
    }
    Ok(())
}

fn ingest_one(ingestor: &Ingestor<'_>, source: String, raw: Vec<u8>) -> IngestOutcome {
    let size = raw.len() as u64;
    match ingestor.ingest(&raw) {
        Ok(report) => IngestOutcome {
            source,
            size,
            report: Some(report),
            dropped: None,
        },
        Err(e) => IngestOutcome {
            source,
            size,
            report: None,
            dropped: Some(e.to_string()),
        },
    }
}

fn read_message(path: &Path, limit: u64) -> anyhow::Result<Vec<u8>> {
    let size = std::fs::metadata(path)?.len();
    if size > limit {
        anyhow::bail!("{}: message is {size} bytes, limit is {limit}", path.display());
    }
    Ok(notedrop::parser::envelope::read_eml(path)?)
}

fn read_limited(reader: impl Read, limit: u64) -> anyhow::Result<Vec<u8>> {
    let mut raw = Vec::new();
    reader.take(limit.saturating_add(1)).read_to_end(&mut raw)?;
    if raw.len() as u64 > limit {
        anyhow::bail!("message exceeds the {limit} byte limit");
    }
    Ok(raw)
}

/// Print the mailbox token of a user.
fn cmd_token(config: &Config, identity: &str) -> anyhow::Result<()> {
    let stores = Stores::open(config)?;
    let identity = UserIdentity::new(identity);
    let token = stores.ingestor(config).token_for(&identity)?;
    println!("{token}");
    Ok(())
}

/// Store a web-form note.
fn cmd_post(config: &Config, author: Option<&str>, text: &str) -> anyhow::Result<()> {
    let stores = Stores::open(config)?;
    let note = submit_web_note(&stores.notes, author.map(UserIdentity::new), text)?;
    println!("  Saved note at {}", note.created_at.to_rfc3339());
    Ok(())
}

/// List the newest notes of a user.
fn cmd_notes(config: &Config, identity: &str, limit: usize, json: bool) -> anyhow::Result<()> {
    let stores = Stores::open(config)?;
    let notes = stores
        .notes
        .recent_by_author(&UserIdentity::new(identity), limit)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&notes)?);
        return Ok(());
    }

    println!();
    println!("  {} note(s)", notes.len());
    println!();
    for note in &notes {
        let first_line: String = note
            .content
            .lines()
            .next()
            .unwrap_or_default()
            .chars()
            .take(60)
            .collect();
        println!(
            "  {:<17} {:<5} {}",
            note.created_at.format("%Y-%m-%d %H:%M"),
            format!("{:?}", note.source).to_lowercase(),
            first_line
        );
    }
    println!();
    Ok(())
}

/// Generate shell completions and print to stdout.
fn cmd_config(config: &Config, init: bool) -> anyhow::Result<()> {
    if init {
        notedrop::config::save_config(config)?;
    }
    match notedrop::config::config_file_path() {
        Some(path) => println!("# {}", path.display()),
        None => println!("# no config file location"),
    }
    println!("# log: {}", notedrop::config::log_file_path(config).display());
    print!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

fn cmd_completions(shell: clap_complete::Shell) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "notedrop", &mut std::io::stdout());
    Ok(())
}

/// Generate a man page and print to stdout.
fn cmd_manpage() -> anyhow::Result<()> {
    let cmd = Cli::command();
    let man = clap_mangen::Man::new(cmd);
    let mut buf = Vec::new();
    man.render(&mut buf)?;
    std::io::Write::write_all(&mut std::io::stdout(), &buf)?;
    Ok(())
}

/// Print ingestion totals in a human-readable table.
fn print_ingest_summary(outcomes: &[IngestOutcome], elapsed: std::time::Duration) {
    use humansize::{format_size, BINARY};

    let reports: Vec<&IngestReport> = outcomes.iter().filter_map(|o| o.report.as_ref()).collect();
    let total_size: u64 = outcomes.iter().map(|o| o.size).sum();
    let notes: usize = reports.iter().map(|r| r.notes).sum();
    let attachments: usize = reports.iter().map(|r| r.attachments.len()).sum();
    let failures: usize = reports.iter().map(|r| r.failures.len()).sum();

    println!();
    println!("  {:<20} {}", "Messages", outcomes.len());
    println!("  {:<20} {}", "Total size", format_size(total_size, BINARY));
    println!("  {:<20} {}", "Notes", notes);
    println!("  {:<20} {}", "Attachments", attachments);
    println!("  {:<20} {}", "Failed parts", failures);
    println!("  {:<20} {}", "Dropped", outcomes.len() - reports.len());
    println!("  {:<20} {:.2?}", "Time", elapsed);

    for outcome in outcomes {
        if let Some(reason) = &outcome.dropped {
            println!("    dropped {}: {reason}", outcome.source);
        }
    }
    println!();
}
