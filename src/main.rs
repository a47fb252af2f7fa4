//! CLI entry point for `listrelay`.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use clap::{CommandFactory, Parser, Subcommand};

use listrelay::config::Config;
use listrelay::lists::ListResolver;
use listrelay::mime::Message;
use listrelay::model::list::Recipient;
use listrelay::moderation::{needs_moderation, Verdicts};
use listrelay::relay::queue::QueueDir;
use listrelay::relay::{personalize, Driver, RelayContext};
use listrelay::tracking::MailMetadata;

#[derive(Parser)]
#[command(name = "listrelay", version, about = "Mailing-list relay and moderation pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (overrides $LISTRELAY_CONFIG)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Process every pending message in the queue
    Run {
        /// Capture outgoing mail in the log instead of sending it
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        json: bool,
    },
    /// Resolve a list name and show its members
    Resolve {
        name: String,
        #[arg(long)]
        json: bool,
    },
    /// Show whether a message would be held for a list, and why
    Check {
        file: PathBuf,
        #[arg(short, long)]
        list: String,
    },
    /// Print the copy of a message one recipient of a list would get
    Preview {
        file: PathBuf,
        #[arg(short, long)]
        list: String,
        #[arg(short, long)]
        to: String,
    },
    /// Add a message to the queue ("-" reads standard input)
    Enqueue {
        file: PathBuf,
        /// Queue ID to use instead of a generated one
        #[arg(long)]
        id: Option<String>,
    },
    /// Show the replayed tracking state of a queued message
    Tracking {
        id: String,
        #[arg(long)]
        json: bool,
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

    let config = listrelay::config::load_config(cli.config.as_deref())?;

    // Configure logging: stderr + optional log file
    let log_level = match cli.verbose {
        0 => config.general.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    setup_logging(log_level, &config);

    match cli.command {
        Commands::Run { dry_run, json } => cmd_run(config, dry_run, json),
        Commands::Resolve { name, json } => cmd_resolve(&config, &name, json),
        Commands::Check { file, list } => cmd_check(&config, &file, &list),
        Commands::Preview { file, list, to } => cmd_preview(&config, &file, &list, &to),
        Commands::Enqueue { file, id } => cmd_enqueue(&config, &file, id.as_deref()),
        Commands::Tracking { id, json } => cmd_tracking(&config, &id, json),
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
    let log_dir = listrelay::config::log_dir(config);
    if std::fs::create_dir_all(&log_dir).is_ok() {
        let file_appender = tracing_appender::rolling::never(&log_dir, "listrelay.log");
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
    }
}

/// Generate shell completions and print to stdout.
fn cmd_completions(shell: clap_complete::Shell) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "listrelay", &mut std::io::stdout());
    Ok(())
}

/// Generate a man page and print to stdout.
fn cmd_manpage() -> anyhow::Result<()> {
    let cmd = Cli::command();
    let man = clap_mangen::Man::new(cmd);
    let mut buf = Vec::new();
    man.render(&mut buf)?;
    std::io::stdout().write_all(&buf)?;
    Ok(())
}

/// Process the queue once.
fn cmd_run(config: Config, dry_run: bool, json: bool) -> anyhow::Result<()> {
    let ctx = RelayContext::open(config, dry_run)?;
    let summary = Driver::new(&ctx).run()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!();
        println!("  {:<22} {}", "Handled", summary.handled);
        println!("  {:<22} {}", "Completed", summary.completed);
        println!("  {:<22} {}", "Awaiting moderation", summary.awaiting_moderation);
        println!("  {:<22} {}", "To retry", summary.retried);
        println!("  {:<22} {}", "Failed", summary.failed);
        println!("  {:<22} {}", "Reclaimed", summary.reclaimed);
        println!();
    }
    if summary.failed > 0 {
        anyhow::bail!("{} message(s) could not be processed", summary.failed);
    }
    Ok(())
}

/// Resolve a list and print it.
fn cmd_resolve(config: &Config, name: &str, json: bool) -> anyhow::Result<()> {
    let resolver = ListResolver::open(config)?;
    let Some(list) = resolver.resolve(name)? else {
        anyhow::bail!("No such mailing list: {name}");
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&list)?);
        return Ok(());
    }

    println!();
    println!("  {:<14} {}", "List", config.site.list_address(&list.name));
    println!("  {:<14} {}", "Display name", list.display_name);
    println!("  {:<14} {}", "Reason", list.reason);
    println!(
        "  {:<14} {}",
        "Unsubscribe",
        if list.no_unsubscribe { "no" } else { "yes" }
    );
    println!(
        "  {:<14} {}",
        "Senders",
        list.senders.iter().cloned().collect::<Vec<_>>().join(", ")
    );
    println!(
        "  {:<14} {}",
        "Moderators",
        list.moderators.iter().cloned().collect::<Vec<_>>().join(", ")
    );
    println!();
    println!("  {} recipient(s), {} blind copy", list.recipients.len(), list.bcc.len());
    println!("  {}", "-".repeat(60));
    for (address, recipient, bcc) in list.deliveries() {
        let marker = if bcc { "bcc" } else { "" };
        println!("  {:<4} {:<32} {}", marker, address, recipient.name);
    }
    println!();
    Ok(())
}

/// Run a message through the moderation gate of one list.
fn cmd_check(config: &Config, file: &Path, list_name: &str) -> anyhow::Result<()> {
    let raw = read_input(file)?;
    let message = Message::parse(&raw);
    let resolver = ListResolver::open(config)?;
    let Some(list) = resolver.resolve(list_name)? else {
        anyhow::bail!("No such mailing list: {list_name}");
    };

    let verdicts = Verdicts::from_headers(message.header());
    let from = message.from_header();
    let (held, reasons) = needs_moderation(&verdicts, &list.senders, from.as_deref());

    println!();
    println!("  {:<10} {}", "From", from.as_deref().unwrap_or("(none)"));
    println!("  {:<10} {}", "Subject", message.subject());
    println!("  {:<10} {}", "Verdicts", verdicts);
    println!(
        "  {:<10} {}",
        "Result",
        if held { "held for moderation" } else { "delivered" }
    );
    for reason in &reasons {
        println!("    - {reason}");
    }
    println!();
    Ok(())
}

/// Print the rewritten copy for one recipient.
fn cmd_preview(config: &Config, file: &Path, list_name: &str, to: &str) -> anyhow::Result<()> {
    let raw = read_input(file)?;
    let message = Message::parse(&raw);
    let resolver = ListResolver::open(config)?;
    let Some(list) = resolver.resolve(list_name)? else {
        anyhow::bail!("No such mailing list: {list_name}");
    };

    let address = listrelay::model::address::canonical(to);
    let (recipient, bcc) = match (list.recipients.get(&address), list.bcc.get(&address)) {
        (Some(r), _) => (r.clone(), false),
        (None, Some(r)) => (r.clone(), true),
        (None, None) => {
            tracing::warn!(list = %list.name, to = %address, "Not a member of the list");
            (Recipient::default(), true)
        }
    };

    let (header, footer) =
        personalize(&message, &list, &config.site, &address, &recipient, bcc);
    let data = message.render(&header, footer.as_ref())?;
    std::io::stdout().write_all(&data)?;
    Ok(())
}

/// Add a message to the queue and print its ID.
fn cmd_enqueue(config: &Config, file: &Path, id: Option<&str>) -> anyhow::Result<()> {
    let raw = read_input(file)?;
    let queue = QueueDir::new(&config.queue.dir);
    let id = queue.enqueue(&raw, id)?;
    println!("{id}");
    Ok(())
}

/// Print the tracking state of a queued message without locking it.
fn cmd_tracking(config: &Config, id: &str, json: bool) -> anyhow::Result<()> {
    if !QueueDir::valid_id(id) {
        anyhow::bail!("Invalid queue ID: {id}");
    }
    let queue = QueueDir::new(&config.queue.dir);
    let path = queue.tracking_path(id);
    let text = std::fs::read_to_string(&path)
        .map_err(|e| anyhow::anyhow!("{}: {e}", path.display()))?;
    let metadata =
        MailMetadata::replay(&text).map_err(|e| anyhow::anyhow!("{}: {e}", path.display()))?;
    let pending = queue.is_pending(id)?;

    if json {
        let out = serde_json::json!({
            "id": id,
            "pending": pending,
            "complete": metadata.is_complete(),
            "metadata": metadata,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    let join = |set: &std::collections::BTreeSet<String>| {
        set.iter().cloned().collect::<Vec<_>>().join(", ")
    };
    println!();
    println!("  {:<14} {}", "ID", id);
    println!("  {:<14} {}", "Pending", pending);
    println!("  {:<14} {}", "Lists", metadata.lists.join(", "));
    if let Some(v) = &metadata.verdicts {
        println!("  {:<14} {}", "Verdicts", v);
    }
    println!("  {:<14} {}", "Moderating", join(&metadata.moderating));
    println!("  {:<14} {}", "Approved", join(&metadata.approved));
    println!("  {:<14} {}", "Rejected", join(&metadata.rejects));
    println!("  {:<14} {}", "Lists sent", join(&metadata.sent_to_list));
    println!("  {:<14} {}", "Copies sent", metadata.sent.len());
    println!();
    Ok(())
}

/// Read a file, or standard input for "-".
fn read_input(path: &Path) -> anyhow::Result<Vec<u8>> {
    if path == Path::new("-") {
        let mut buf = Vec::new();
        std::io::stdin().read_to_end(&mut buf)?;
        return Ok(buf);
    }
    if !path.exists() {
        anyhow::bail!("File not found: {}", path.display());
    }
    Ok(std::fs::read(path)?)
}
