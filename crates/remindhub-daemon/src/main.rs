use std::sync::Arc;

use clap::{Parser, Subcommand};
use remindhub_core::config::{parse_utc_offset, HubConfig};
use remindhub_core::{Clock, OwnerId, ReminderId, SystemClock};
use remindhub_scheduler::{DispatchEvent, RetryPolicy, SchedulerEngine, SqliteStore};
use tracing::{info, warn};

mod delivery;

use delivery::LogDelivery;

#[derive(Parser, Debug)]
#[command(name = "remindhubd", about = "Natural-language reminder scheduler")]
struct Args {
    /// Config file (defaults to REMINDHUB_CONFIG, then ~/.remindhub/remindhub.toml)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the dispatch loop until Ctrl-C.
    Run,
    /// Interpret a phrase and schedule it.
    Add {
        text: String,
        #[arg(long)]
        owner: String,
        /// UTC offset of the phrase, e.g. "+02:00"; defaults to parser.default_utc_offset
        #[arg(long, allow_hyphen_values = true)]
        offset: Option<String>,
    },
    /// List an owner's reminders.
    List {
        #[arg(long)]
        owner: String,
    },
    /// Cancel a pending or failed reminder.
    Cancel { id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "remindhubd=info,remindhub_scheduler=info".into()),
        )
        .init();

    let args = Args::parse();

    // explicit --config > REMINDHUB_CONFIG env > ~/.remindhub/remindhub.toml
    let config_path = args
        .config
        .clone()
        .or_else(|| std::env::var("REMINDHUB_CONFIG").ok());
    let config = HubConfig::load(config_path.as_deref())?;

    let db_path = &config.database.path;
    ensure_parent_dir(db_path);
    info!(path = %db_path, "opening SQLite database");
    let store = Arc::new(SqliteStore::open(db_path)?);

    let engine = SchedulerEngine::new(store, Arc::new(LogDelivery), Arc::new(SystemClock))
        .with_config(config.scheduler.clone())
        .with_retry_policy(RetryPolicy::from(&config.retry));

    match args.command {
        Command::Run => run(engine).await,
        Command::Add {
            text,
            owner,
            offset,
        } => {
            let tz = match offset {
                Some(raw) => parse_utc_offset(&raw)?,
                None => config.parser.default_offset()?,
            };
            let reminder = remindhub_parser::interpret(
                &text,
                SystemClock.now(),
                tz,
                OwnerId::from(owner.as_str()),
                &config.parser,
            )?;
            engine.handle().schedule(&reminder)?;
            println!(
                "{}\t{}\t{}",
                reminder.id,
                reminder.next_fire_at.with_timezone(&tz).to_rfc3339(),
                reminder.subject
            );
            Ok(())
        }
        Command::List { owner } => {
            let reminders = engine
                .handle()
                .list_for_owner(&OwnerId::from(owner.as_str()))?;
            for r in reminders {
                let tags = if r.tags.is_empty() {
                    String::new()
                } else {
                    format!(" #{}", r.tags.join(" #"))
                };
                println!(
                    "{}\t{}\t{}\t{}\t{}{}",
                    r.id,
                    r.status,
                    r.next_fire_at.to_rfc3339(),
                    r.priority,
                    r.subject,
                    tags
                );
            }
            Ok(())
        }
        Command::Cancel { id } => {
            let reminder = engine.handle().cancel(&ReminderId::from(id.as_str()))?;
            println!("{}\t{}", reminder.id, reminder.status);
            Ok(())
        }
    }
}

async fn run(engine: SchedulerEngine) -> anyhow::Result<()> {
    let (events_tx, mut events_rx) = tokio::sync::mpsc::channel::<DispatchEvent>(256);
    let running = engine.with_events(events_tx).start();

    tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            match event {
                DispatchEvent::Failed {
                    id,
                    attempts,
                    error,
                } => warn!(reminder_id = %id, attempts, "reminder failed: {error}"),
                other => info!(?other, "dispatch"),
            }
        }
    });

    info!("scheduler running; Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    running.stop().await;
    Ok(())
}

fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
