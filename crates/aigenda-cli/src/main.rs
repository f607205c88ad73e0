//! AIGENDA CLI - drive the sync engine from the terminal
//!
//! Queue changes while offline, inspect the pending log, and run sync
//! cycles against a configured endpoint. Stands in for the app UI.

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use aigenda_sync::{
    connectivity_channel, ChangeAction, ChangeEntry, CycleOutcome, HttpTransport, JsonFileStore,
    MutationLog, StateStore, SyncEngine, SyncSettings,
};

#[derive(Parser)]
#[command(name = "aigenda")]
#[command(about = "Offline-first sync for AIGENDA agendas, from the command line")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Optional path to the local sync state directory
    #[arg(long, value_name = "PATH")]
    state_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Queue a local change for the next sync
    Queue {
        /// Entity type the change belongs to (e.g. tasks, activities)
        entity_type: String,
        /// Mutation kind
        #[arg(long, value_enum)]
        action: ActionArg,
        /// Entity payload as a JSON object
        #[arg(long)]
        data: String,
    },
    /// List queued changes
    Pending {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Drop a server-rejected change from the queue
    Discard {
        /// Entity type of the rejected change
        entity_type: String,
        /// Id of the rejected change
        id: String,
    },
    /// Run one pull+push cycle against the configured endpoint
    Sync,
    /// Show queue counts and the last-sync checkpoint
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
enum ActionArg {
    Create,
    Update,
    Delete,
}

impl From<ActionArg> for ChangeAction {
    fn from(action: ActionArg) -> Self {
        match action {
            ActionArg::Create => Self::Create,
            ActionArg::Update => Self::Update,
            ActionArg::Delete => Self::Delete,
        }
    }
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Sync(#[from] aigenda_sync::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Change payload must be a JSON object: {0}")]
    InvalidPayload(String),
    #[error("No errored entry {id} under {entity_type}")]
    NoSuchErroredEntry { entity_type: String, id: String },
    #[error(
        "Sync is not configured. Set AIGENDA_SYNC_URL and AIGENDA_SYNC_TOKEN to enable `aigenda sync`."
    )]
    SyncNotConfigured,
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("aigenda=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    let state_dir = resolve_state_dir(cli.state_dir);

    match cli.command {
        Commands::Queue {
            entity_type,
            action,
            data,
        } => run_queue(&entity_type, action.into(), &data, &state_dir),
        Commands::Pending { json } => run_pending(json, &state_dir),
        Commands::Discard { entity_type, id } => run_discard(&entity_type, &id, &state_dir),
        Commands::Sync => run_sync(&state_dir).await,
        Commands::Status { json } => run_status(json, &state_dir),
    }
}

fn open_store(state_dir: &Path) -> Result<Arc<JsonFileStore>, CliError> {
    Ok(Arc::new(JsonFileStore::new(state_dir)?))
}

fn run_queue(
    entity_type: &str,
    action: ChangeAction,
    raw_data: &str,
    state_dir: &Path,
) -> Result<(), CliError> {
    let data = parse_payload(raw_data)?;
    let store = open_store(state_dir)?;
    let mut log = MutationLog::load(store);

    let id = log.enqueue(entity_type, action, data)?;
    println!("{id}");
    Ok(())
}

#[derive(Debug, Serialize)]
struct PendingItem {
    entity_type: String,
    id: String,
    action: String,
    timestamp: i64,
    status: String,
}

fn run_pending(as_json: bool, state_dir: &Path) -> Result<(), CliError> {
    let store = open_store(state_dir)?;
    let log = MutationLog::load(store);

    let items: Vec<PendingItem> = log
        .entries()
        .iter()
        .flat_map(|(entity_type, entries)| {
            entries
                .iter()
                .map(|entry| pending_item(entity_type, entry))
                .collect::<Vec<_>>()
        })
        .collect();

    if as_json {
        println!("{}", serde_json::to_string_pretty(&items)?);
    } else if items.is_empty() {
        println!("No queued changes.");
    } else {
        for line in format_pending_lines(&items) {
            println!("{line}");
        }
    }
    Ok(())
}

fn run_discard(entity_type: &str, id: &str, state_dir: &Path) -> Result<(), CliError> {
    let store = open_store(state_dir)?;
    let mut log = MutationLog::load(store);

    if log.discard_errored(entity_type, id) {
        println!("{id}");
        Ok(())
    } else {
        Err(CliError::NoSuchErroredEntry {
            entity_type: entity_type.to_string(),
            id: id.to_string(),
        })
    }
}

async fn run_sync(state_dir: &Path) -> Result<(), CliError> {
    let settings = sync_settings_from_env()?;
    let transport = HttpTransport::new(&settings)?;
    let store = open_store(state_dir)?;
    let (_handle, connectivity) = connectivity_channel(true);

    let engine = SyncEngine::new(transport, store as Arc<dyn StateStore>, connectivity);
    match engine.sync_cycle().await? {
        CycleOutcome::Completed {
            pulled_types,
            pushed,
        } => {
            println!("Sync completed: pulled {pulled_types} type(s), pushed {pushed} change(s)");
            if engine.errored_count() > 0 {
                println!(
                    "{} change(s) rejected by the server; see `aigenda pending`",
                    engine.errored_count()
                );
            }
        }
        CycleOutcome::SkippedOffline | CycleOutcome::AlreadyRunning => {
            println!("Sync skipped");
        }
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct StatusReport {
    pending: usize,
    errored: usize,
    last_sync_timestamp: i64,
    state_dir: String,
}

fn run_status(as_json: bool, state_dir: &Path) -> Result<(), CliError> {
    let store = open_store(state_dir)?;
    let checkpoint = store.load_checkpoint()?;
    let log = MutationLog::load(store);

    let report = StatusReport {
        pending: log.pending_count(),
        errored: log.errored_count(),
        last_sync_timestamp: checkpoint,
        state_dir: state_dir.display().to_string(),
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Pending changes:  {}", report.pending);
        println!("Rejected changes: {}", report.errored);
        if report.last_sync_timestamp == 0 {
            println!("Last sync:        never");
        } else {
            println!("Last sync:        {}", report.last_sync_timestamp);
        }
        println!("State directory:  {}", report.state_dir);
    }
    Ok(())
}

fn pending_item(entity_type: &str, entry: &ChangeEntry) -> PendingItem {
    let status = entry.error.as_ref().map_or_else(
        || {
            if entry.synced {
                "synced".to_string()
            } else {
                "pending".to_string()
            }
        },
        |error| format!("error:{}", error.code),
    );

    PendingItem {
        entity_type: entity_type.to_string(),
        id: entry.id.clone(),
        action: entry.action.to_string(),
        timestamp: entry.timestamp,
        status,
    }
}

fn format_pending_lines(items: &[PendingItem]) -> Vec<String> {
    items
        .iter()
        .map(|item| {
            format!(
                "{:<12}  {:<8}  {:<42}  {}",
                item.entity_type, item.action, item.id, item.status
            )
        })
        .collect()
}

fn parse_payload(raw: &str) -> Result<Value, CliError> {
    let value: Value =
        serde_json::from_str(raw).map_err(|error| CliError::InvalidPayload(error.to_string()))?;
    if value.is_object() {
        Ok(value)
    } else {
        Err(CliError::InvalidPayload(format!(
            "expected an object, got {value}"
        )))
    }
}

fn sync_settings_from_env() -> Result<SyncSettings, CliError> {
    let url = env::var("AIGENDA_SYNC_URL").ok().filter(|v| !v.is_empty());
    let token = env::var("AIGENDA_SYNC_TOKEN")
        .ok()
        .filter(|v| !v.is_empty());

    match (url, token) {
        (Some(url), Some(token)) => Ok(SyncSettings::new(url, token)?),
        _ => Err(CliError::SyncNotConfigured),
    }
}

fn resolve_state_dir(cli_state_dir: Option<PathBuf>) -> PathBuf {
    cli_state_dir
        .or_else(|| env::var_os("AIGENDA_STATE_DIR").map(PathBuf::from))
        .unwrap_or_else(default_state_dir)
}

fn default_state_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("aigenda")
        .join("sync")
}
