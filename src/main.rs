//! schemadump CLI
//!
//! Dumps the schema of a PostgreSQL or SQLite database and manages the
//! retained snapshot history.
//!
//! Configuration comes from an optional `schemadump.toml`, `.env` and
//! `SCHEMADUMP__*` environment variables; command-line flags override the
//! run settings.

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use schemadump::config::{StoreBackend, StoreSettings};
use schemadump::connection::{create_pool, open_sqlite};
use schemadump::{
    CatalogAdapter, Dialect, Dumper, FileSnapshotStore, MemorySnapshotStore, ObjectKind,
    OutputMode, PostgresAdapter, PostgresSnapshotStore, Settings, SnapshotStore, SqliteAdapter,
};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "schemadump", version, about = "Deterministic database schema snapshots")]
struct Cli {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, global = true, value_enum, env = "SCHEMADUMP_LOG_FORMAT", default_value = "compact")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Compact,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Dump the schema and record a snapshot
    Dump {
        /// Output file, or directory with --multi-file
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Write one file per section/table plus manifest.json
        #[arg(long)]
        multi_file: bool,
        /// Also write the gzip tar archive here (multi-file only)
        #[arg(long)]
        archive: Option<PathBuf>,
        /// Schema (namespace) to dump
        #[arg(short, long)]
        namespace: Option<String>,
        /// Number of snapshots to retain
        #[arg(long)]
        retention: Option<usize>,
        /// Object kinds to leave out, e.g. --skip trigger --skip function
        #[arg(long, value_parser = parse_kind)]
        skip: Vec<ObjectKind>,
    },
    /// List retained snapshots, newest first
    List {
        #[arg(long)]
        json: bool,
    },
    /// Print one snapshot
    Show {
        id: Uuid,
        /// Print the metadata as JSON instead of the content
        #[arg(long)]
        json: bool,
    },
    /// Delete all but the newest N snapshots
    Prune {
        #[arg(long)]
        keep: usize,
    },
}

fn parse_kind(value: &str) -> Result<ObjectKind, String> {
    let wanted = value.trim().to_ascii_lowercase().replace(['-', ' '], "_");
    ObjectKind::ALL
        .into_iter()
        .find(|kind| {
            let name = kind.as_str().replace(' ', "_");
            name == wanted || format!("{}s", name) == wanted || format!("{}es", name) == wanted
        })
        .ok_or_else(|| format!("unknown object kind '{}'", value))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let settings = Settings::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Command::Dump {
            output,
            multi_file,
            archive,
            namespace,
            retention,
            skip,
        } => {
            let mut run = settings.run.clone();
            if let Some(output) = output {
                run.output_path = output;
            }
            if multi_file {
                run.output_mode = OutputMode::MultiFile;
            }
            if archive.is_some() {
                run.archive_path = archive;
            }
            if namespace.is_some() {
                run.namespace = namespace;
            }
            if let Some(retention) = retention {
                run.retention = retention;
            }
            for kind in skip {
                run.toggles.set(kind, false);
            }

            let adapter = open_adapter(&settings).await?;
            let store = open_store(&settings).await?;
            let outcome = Dumper::new(adapter.as_ref(), store.as_ref(), &run).run().await?;

            for path in &outcome.artifacts {
                println!("wrote {}", path.display());
            }
            println!(
                "snapshot {} #{} {} ({} objects, {})",
                outcome.snapshot.id,
                outcome.snapshot.sequence,
                outcome.content_hash,
                outcome.object_count,
                if outcome.changed { "changed" } else { "unchanged" }
            );
            if outcome.evicted > 0 {
                info!("Evicted {} snapshot(s) beyond retention", outcome.evicted);
            }
        }
        Command::List { json } => {
            let store = open_store(&settings).await?;
            let summaries = store.list().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summaries)?);
            } else {
                for s in summaries {
                    println!(
                        "{}  #{:<4} {}  {}  {} bytes  {} lines  {}",
                        s.id,
                        s.sequence,
                        s.created_at.format("%Y-%m-%d %H:%M:%S"),
                        &s.content_hash[..12.min(s.content_hash.len())],
                        s.size,
                        s.line_count,
                        s.output_mode.as_str()
                    );
                }
            }
        }
        Command::Show { id, json } => {
            let store = open_store(&settings).await?;
            let snapshot = store
                .get(id)
                .await?
                .ok_or_else(|| anyhow!("snapshot {} not found", id))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&snapshot.summary())?);
            } else {
                print!("{}", snapshot.content);
            }
        }
        Command::Prune { keep } => {
            if keep == 0 {
                bail!("--keep must be at least 1");
            }
            let store = open_store(&settings).await?;
            let lock = store.lock().await?;
            let removed = store.delete_oldest(keep).await;
            if let Err(e) = lock.release().await {
                warn!("Failed to release snapshot store lock: {}", e);
            }
            println!("removed {} snapshot(s)", removed?);
        }
    }

    Ok(())
}

/// Initialize tracing with structured logging
fn init_tracing(format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,schemadump=info"));

    let registry = tracing_subscriber::registry().with(env_filter);
    match format {
        LogFormat::Compact => registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_level(true)
                    .compact(),
            )
            .init(),
        LogFormat::Json => registry
            .with(fmt::layer().with_writer(std::io::stderr).json())
            .init(),
    }
}

async fn open_adapter(settings: &Settings) -> anyhow::Result<Box<dyn CatalogAdapter>> {
    match Dialect::from_url(&settings.database_url) {
        Some(Dialect::Postgres) => {
            let pool = create_pool(&settings.database_url, settings.max_pool_size).await?;
            Ok(Box::new(PostgresAdapter::new(pool)))
        }
        Some(Dialect::Sqlite) => Ok(Box::new(SqliteAdapter::new(open_sqlite(
            &settings.database_url,
        )?))),
        None => bail!("unsupported database url"),
    }
}

async fn open_store(settings: &Settings) -> anyhow::Result<Box<dyn SnapshotStore>> {
    let StoreSettings {
        backend,
        path,
        table,
        url,
    } = &settings.store;

    match backend {
        StoreBackend::Memory => {
            warn!("Memory snapshot store keeps no history between invocations");
            Ok(Box::new(MemorySnapshotStore::new()))
        }
        StoreBackend::File => Ok(Box::new(FileSnapshotStore::open(path.clone())?)),
        StoreBackend::Postgres => {
            let url = url.as_deref().unwrap_or(&settings.database_url);
            if Dialect::from_url(url) != Some(Dialect::Postgres) {
                bail!("the postgres snapshot store needs a postgres:// url (store.url)");
            }
            let pool = create_pool(url, settings.max_pool_size).await?;
            Ok(Box::new(PostgresSnapshotStore::open(pool, table).await?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_kind() {
        assert_eq!(parse_kind("trigger"), Ok(ObjectKind::Trigger));
        assert_eq!(parse_kind("Foreign-Keys"), Ok(ObjectKind::ForeignKey));
        assert_eq!(parse_kind("indexes"), Ok(ObjectKind::Index));
        assert!(parse_kind("rule").is_err());
    }

    #[test]
    fn test_cli_parses_dump_flags() {
        let cli = Cli::try_parse_from([
            "schemadump",
            "dump",
            "--multi-file",
            "--output",
            "db/schema",
            "--skip",
            "function",
            "--skip",
            "trigger",
        ])
        .unwrap();
        match cli.command {
            Command::Dump { multi_file, skip, .. } => {
                assert!(multi_file);
                assert_eq!(skip, vec![ObjectKind::Function, ObjectKind::Trigger]);
            }
            _ => panic!("expected dump"),
        }
    }
}
