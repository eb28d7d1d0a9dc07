mod config;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use msf_backfill::{
    BackfillReport, Collaborators, Dispatch, MediaFilesize, RecomputeOutcome, ScheduleOutcome,
};
use msf_core::{
    size_format, ItemId, ItemStatus, SortOrder, SystemClock, ATTACHMENT_METADATA_KEY, META_KEY,
};
use msf_storage::{LibraryStore, MetadataWrite, NewItem};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "msf")]
#[command(about = "Media library file size index", long_about = None)]
struct Cli {
    /// Config file (defaults to the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Library database, overrides the config file
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    #[arg(long, global = true)]
    uploads_root: Option<PathBuf>,
    #[arg(long, global = true, default_value_t = false)]
    debug: bool,
    /// Print results as JSON
    #[arg(long, global = true, default_value_t = false)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register files as attachments
    Import {
        paths: Vec<PathBuf>,
        #[arg(long, default_value = "inherit")]
        status: ItemStatus,
    },
    /// Replace an item's attachment metadata (JSON) and store its size
    SetMetadata { id: ItemId, metadata: String },
    /// Schedule the backfill to run as soon as possible
    Index,
    /// Run every scheduled job that is due
    Cron,
    /// Run the backfill right now, bypassing the scheduler
    Backfill,
    /// Recompute one item's size from its file
    Recompute { id: ItemId },
    /// Recompute sizes for explicit items, then schedule a recount
    Bulk {
        #[arg(required = true)]
        ids: Vec<ItemId>,
    },
    /// Show index progress
    Progress,
    /// List items still missing a size
    Missing {
        #[arg(long, default_value_t = false)]
        cached: bool,
    },
    /// List items ordered by size
    List {
        #[arg(long, default_value = "desc")]
        order: SortOrder,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Show the file size column for one item
    Show { id: ItemId },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut app = config::load_config(cli.config.as_deref())?;
    if let Some(db) = &cli.db {
        app.database = Some(db.clone());
    }
    if let Some(root) = &cli.uploads_root {
        app.uploads_root = Some(root.clone());
    }

    init_logging(cli.debug, app.log_level.as_deref());

    let db_path = app.database_path();
    if let Some(parent) = db_path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let mut store = LibraryStore::open(&db_path)
        .with_context(|| format!("Failed to open library {}", db_path.display()))?;
    if let Some(root) = &app.uploads_root {
        store = store.with_uploads_root(root);
    }
    debug!(db = %db_path.display(), "library opened");

    let clock = SystemClock;
    let media = MediaFilesize::new(
        Collaborators::from_host(&store, &clock),
        app.filesize.clone(),
    );
    let json = cli.json;

    match cli.command {
        Commands::Import { paths, status } => {
            let mut imported = Vec::new();
            for path in paths {
                let stored_path = attachment_path(&path, store.uploads_root())?;
                let item = NewItem::attachment(stored_path).with_status(status);
                let id = store.insert_item(&item, Utc::now())?;
                info!(item = %id, path = %path.display(), "attachment imported");
                imported.push(id);
            }
            emit(json, &imported, || {
                for id in &imported {
                    println!("imported {id}");
                }
            })?;
        }
        Commands::SetMetadata { id, metadata } => {
            let value: serde_json::Value =
                serde_json::from_str(&metadata).context("Failed to parse metadata JSON")?;
            let outcome = write_metadata(&store, &media, id, &value)?;
            emit(json, &outcome, || {
                if let Some(outcome) = &outcome {
                    print_recompute(id, outcome);
                }
            })?;
        }
        Commands::Index => {
            let outcome = media.trigger_backfill_now()?;
            emit(json, &outcome, || match &outcome {
                ScheduleOutcome::Scheduled { run_at } => {
                    println!("Backfill scheduled for {run_at}")
                }
                ScheduleOutcome::AlreadyPending { run_at } => {
                    println!("Backfill already pending for {run_at}")
                }
            })?;
        }
        Commands::Cron => {
            let dispatched = media.run_due()?;
            emit(json, &dispatched, || {
                if dispatched.is_empty() {
                    println!("Nothing due");
                }
                for dispatch in &dispatched {
                    match dispatch {
                        Dispatch::Backfill(report) => print_backfill(report),
                        Dispatch::Recount { missing } => {
                            println!("Recounted: {missing} items missing a size")
                        }
                        Dispatch::Ignored { name } => println!("Ignored hook {name}"),
                    }
                }
            })?;
        }
        Commands::Backfill => {
            let report = media.run_backfill()?;
            emit(json, &report, || print_backfill(&report))?;
        }
        Commands::Recompute { id } => {
            let outcome = media.recompute_single(id)?;
            emit(json, &outcome, || print_recompute(id, &outcome))?;
        }
        Commands::Bulk { ids } => {
            let report = media.bulk_generate(&ids)?;
            emit(json, &report, || {
                for (id, bytes) in &report.stored {
                    println!("- [{id}] {}", size_format(*bytes, 0));
                }
                for id in &report.skipped {
                    println!("- [{id}] File not found");
                }
                println!("Recount pending at {}", report.recount.run_at());
            })?;
        }
        Commands::Progress => {
            let snapshot = media.progress_snapshot()?;
            emit(json, &snapshot, || match snapshot.missing_estimate {
                Some(missing) => println!("Index Media (Total: {missing}/{})", snapshot.total),
                None => println!("Index Media (count pending, {} items)", snapshot.total),
            })?;
        }
        Commands::Missing { cached } => {
            let ids = media.missing_items(cached)?;
            emit(json, &ids, || {
                println!("{} items missing a size", ids.len());
                for id in &ids {
                    println!("- [{id}]");
                }
            })?;
        }
        Commands::List { order, limit } => {
            let config = media.config();
            let rows = store.items_by_meta_value(
                &config.item_kind,
                config.active_status,
                META_KEY,
                order,
                limit,
            )?;
            emit(json, &rows, || {
                for (id, bytes) in &rows {
                    let bytes = u64::try_from(*bytes).unwrap_or_default();
                    println!("- [{id}] {}", size_format(bytes, 0));
                }
            })?;
        }
        Commands::Show { id } => {
            if store.item(id)?.is_none() {
                bail!("No item {id}");
            }
            let cell = media.column_cell(id)?;
            emit(json, &cell, || {
                let warning = if cell.needs_index() { "! " } else { "" };
                println!("[{id}] {warning}{}", cell.size_text());
                if let Some(extra) = cell.intermediate_text() {
                    println!("      {extra}");
                }
            })?;
        }
    }

    Ok(())
}

fn init_logging(debug: bool, configured: Option<&str>) {
    let level = log_level(debug, std::env::var("MSF_LOG_LEVEL").ok(), configured);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// Only the first metadata write for an item counts as an upload.
fn write_metadata(
    store: &LibraryStore,
    media: &MediaFilesize<'_>,
    id: ItemId,
    metadata: &serde_json::Value,
) -> Result<Option<RecomputeOutcome>> {
    match store.set_item_metadata(id, metadata)? {
        None => bail!("No item {id}"),
        Some(MetadataWrite::Added) => Ok(media.on_metadata_added(id, ATTACHMENT_METADATA_KEY)?),
        Some(MetadataWrite::Replaced) => {
            debug!(item = %id, "metadata replaced, size left as stored");
            Ok(None)
        }
    }
}

/// Fallback level when `RUST_LOG` is unset.
fn log_level(debug: bool, env_level: Option<String>, configured: Option<&str>) -> String {
    if debug {
        return "debug".to_string();
    }
    env_level
        .filter(|level| !level.trim().is_empty())
        .or_else(|| configured.map(str::to_string))
        .unwrap_or_else(|| "info".to_string())
}

/// Paths under the uploads root are stored relative to it, like the host does.
fn attachment_path(path: &Path, uploads_root: Option<&Path>) -> Result<String> {
    let absolute = fs::canonicalize(path)
        .with_context(|| format!("Failed to resolve {}", path.display()))?;
    if let Some(root) = uploads_root.and_then(|root| fs::canonicalize(root).ok()) {
        if let Ok(relative) = absolute.strip_prefix(&root) {
            return Ok(relative.to_string_lossy().into_owned());
        }
    }
    Ok(absolute.to_string_lossy().into_owned())
}

fn emit<T: Serialize>(json: bool, value: &T, human: impl FnOnce()) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        human();
    }
    Ok(())
}

fn print_recompute(id: ItemId, outcome: &RecomputeOutcome) {
    match outcome {
        RecomputeOutcome::Stored { bytes } => {
            println!("[{id}] {} ({bytes} bytes)", size_format(*bytes, 0))
        }
        RecomputeOutcome::NotFound { reason } => println!("[{id}] File not found: {reason}"),
    }
}

fn print_backfill(report: &BackfillReport) {
    println!(
        "Backfill {:?}: {} of {} candidates written, {} skipped, {} not found, {} left",
        report.state,
        report.written,
        report.candidates,
        report.skipped_existing,
        report.errors.len(),
        report.remaining,
    );
    for error in report.errors.iter() {
        println!("- [{}] {}", error.item_id, error.message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_typed_arguments() {
        let cli = Cli::try_parse_from(["msf", "list", "--order", "asc", "--limit", "3", "--json"])
            .expect("parse");
        assert!(cli.json);
        match cli.command {
            Commands::List { order, limit } => {
                assert_eq!(order, SortOrder::Asc);
                assert_eq!(limit, Some(3));
            }
            _ => panic!("expected list"),
        }

        assert!(Cli::try_parse_from(["msf", "bulk"]).is_err());
        assert!(Cli::try_parse_from(["msf", "show", "abc"]).is_err());
    }

    #[test]
    fn only_the_first_metadata_write_stores_a_size() {
        let dir = std::env::temp_dir().join(format!("msf-cli-meta-{}", std::process::id()));
        fs::create_dir_all(&dir).expect("mkdir");
        fs::write(dir.join("a.jpg"), [1u8; 12]).expect("write");
        let store = LibraryStore::open_in_memory()
            .expect("open db")
            .with_uploads_root(dir.clone());
        let id = store
            .insert_item(&NewItem::attachment("a.jpg"), Utc::now())
            .expect("insert");
        let clock = SystemClock;
        let media = MediaFilesize::new(
            Collaborators::from_host(&store, &clock),
            msf_core::FilesizeConfig::default(),
        );
        let metadata = serde_json::json!({"filesize": 12});

        assert_eq!(
            write_metadata(&store, &media, id, &metadata).expect("first"),
            Some(RecomputeOutcome::Stored { bytes: 12 })
        );
        fs::write(dir.join("a.jpg"), [1u8; 40]).expect("rewrite");
        assert_eq!(
            write_metadata(&store, &media, id, &metadata).expect("second"),
            None
        );
        assert_eq!(media.attributes().get(id).expect("get"), Some(12));
        assert!(write_metadata(&store, &media, ItemId(404), &metadata).is_err());

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn log_level_prefers_debug_flag_then_env_then_config() {
        assert_eq!(log_level(true, Some("warn".into()), Some("error")), "debug");
        assert_eq!(log_level(false, Some("warn".into()), Some("error")), "warn");
        assert_eq!(log_level(false, Some(" ".into()), Some("error")), "error");
        assert_eq!(log_level(false, None, None), "info");
    }

    #[test]
    fn files_inside_uploads_root_are_stored_relative() {
        let dir = std::env::temp_dir().join(format!("msf-cli-import-{}", std::process::id()));
        fs::create_dir_all(dir.join("2026")).expect("mkdir");
        let file = dir.join("2026/cat.jpg");
        fs::write(&file, b"meow").expect("write");

        assert_eq!(
            attachment_path(&file, Some(dir.as_path())).expect("relative"),
            Path::new("2026").join("cat.jpg").to_string_lossy()
        );
        assert!(Path::new(&attachment_path(&file, None).expect("absolute")).is_absolute());

        let _ = fs::remove_dir_all(dir);
    }
}
