//! Change-data-capture engine entry point
//!
//! Ensures the configured replication slot exists, then repeatedly runs one
//! Item Generator batch at a time, dispatching each table's rows to stdout.
//! The libpq-driven stream is synchronous, so each batch runs inside
//! `tokio::task::spawn_blocking`, following the teacher's own
//! blocking-task wrapper around its replication loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use indexmap::IndexMap;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use pg_cdc_engine::core::EngineConfig;
use pg_cdc_engine::dispatch::sinks::StdoutSink;
use pg_cdc_engine::dispatch::Dispatcher;
use pg_cdc_engine::protocol::Lsn;
use pg_cdc_engine::replication::{ItemGenerator, PgConnection, SlotManager};
use pg_cdc_engine::schema::TableSchema;

/// Operator-facing CLI overrides for [`EngineConfig::from_env`].
#[derive(Parser, Debug)]
#[command(name = "pg_cdc_engine", about = "PostgreSQL logical replication CDC engine", version)]
struct Args {
    /// PostgreSQL connection string. Falls back to `DATABASE_URL`.
    #[arg(long, env = "DATABASE_URL")]
    connection_string: Option<String>,

    /// Schema the replicated tables live in. Falls back to `PG_SCHEMA`.
    #[arg(long, env = "PG_SCHEMA")]
    schema: Option<String>,

    /// Replication slot name.
    #[arg(long)]
    slot_name: Option<String>,

    /// Comma-separated table allow-list.
    #[arg(long, value_delimiter = ',')]
    table_names: Option<Vec<String>>,

    /// Rows buffered per batch before a forced flush.
    #[arg(long)]
    target_batch_size: Option<usize>,

    /// Drop and recreate the slot before starting.
    #[arg(long, default_value_t = false)]
    reset: bool,

    /// Out of scope for this engine; rejected with a clear error.
    #[arg(long, default_value_t = false)]
    take_snapshots: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_target(false).with_thread_ids(false).with_thread_names(false).init();

    let args = Args::parse();
    let config = build_config(args)?;

    if config.take_snapshots {
        bail!("take_snapshots is out of scope for this engine; run an external snapshot reader instead");
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown signal received");
                shutdown.store(true, Ordering::SeqCst);
            }
        });
    }

    run_engine(config, shutdown).await
}

fn build_config(args: Args) -> Result<EngineConfig> {
    let mut config = EngineConfig::from_env().context("failed to load configuration")?;

    if let Some(connection_string) = args.connection_string {
        config.connection_string = connection_string;
    }
    if let Some(schema) = args.schema {
        config.schema = schema;
    }
    if let Some(slot_name) = args.slot_name {
        config.slot_name = slot_name;
    }
    if let Some(table_names) = args.table_names {
        config.table_names = table_names;
    }
    if let Some(target_batch_size) = args.target_batch_size {
        config.target_batch_size = target_batch_size;
    }
    config.reset = config.reset || args.reset;
    config.take_snapshots = config.take_snapshots || args.take_snapshots;

    Ok(config)
}

async fn run_engine(config: EngineConfig, shutdown: Arc<AtomicBool>) -> Result<()> {
    let table_qnames: std::collections::HashSet<String> = config.table_qnames().into_iter().collect();
    let connection_string = config.connection_string.clone();
    let slot_name = config.slot_name.clone();

    let server_version = {
        let conn = PgConnection::connect(&connection_string)?;
        let manager = SlotManager::new(&conn);
        manager
            .ensure(&slot_name, config.reset)
            .context("failed to ensure replication slot exists")?;
        conn.server_version()
    };
    info!(%slot_name, server_version, "replication slot ready");

    let sink = Arc::new(StdoutSink::new());
    let mut last_table_schema: HashMap<String, TableSchema> = HashMap::new();
    let mut last_table_hashes: HashMap<String, u64> = HashMap::new();
    let mut start_lsn = Lsn::ZERO;

    while !shutdown.load(Ordering::SeqCst) {
        let upto_lsn = peek_upto_lsn(&connection_string, &slot_name, server_version)?;
        if upto_lsn == Lsn::ZERO {
            tokio::time::sleep(Duration::from_secs(config.feedback_interval_secs)).await;
            continue;
        }

        let generator = ItemGenerator::new(
            connection_string.clone(),
            slot_name.clone(),
            table_qnames.clone(),
            upto_lsn,
            start_lsn,
            config.target_batch_size,
            included_columns(&config),
        );

        let mut schema_cache = last_table_schema.clone();
        let mut hash_cache = last_table_hashes.clone();
        let batch = tokio::task::spawn_blocking(move || {
            let result = generator.run_batch(&mut schema_cache, &mut hash_cache);
            (result, schema_cache, hash_cache)
        })
        .await
        .context("replication batch task panicked")?;

        let (result, schema_cache, hash_cache) = batch;
        last_table_schema = schema_cache;
        last_table_hashes = hash_cache;

        match result {
            Ok(Some(batch)) => {
                start_lsn = batch.last_commit_lsn;
                for group in batch.groups {
                    let options = config.table_options.get(&group.table).cloned().unwrap_or_default();
                    let dispatcher = Dispatcher::new(group.table.clone(), IndexMap::new(), options);
                    dispatcher.dispatch(group, sink.as_ref()).await?;
                }

                if batch.generated_all {
                    let conn = PgConnection::connect(&connection_string)?;
                    SlotManager::new(&conn).advance(&slot_name, batch.last_commit_lsn, server_version)?;
                }
            }
            Ok(None) => {
                warn!("batch produced no commit, skipping acknowledgement");
            }
            Err(err) => {
                error!(error = %err, "fatal error in replication batch");
                return Err(err.into());
            }
        }
    }

    info!("replication engine shut down cleanly");
    Ok(())
}

fn peek_upto_lsn(connection_string: &str, slot_name: &str, server_version: i32) -> Result<Lsn> {
    let conn = PgConnection::connect(connection_string)?;
    let manager = SlotManager::new(&conn);
    Ok(manager.max_lsn(slot_name, server_version)?.unwrap_or(Lsn::ZERO))
}

fn included_columns(config: &EngineConfig) -> HashMap<String, std::collections::HashSet<String>> {
    config
        .table_options
        .iter()
        .filter_map(|(table, options)| {
            options
                .included_columns
                .as_ref()
                .map(|cols| (table.clone(), cols.iter().cloned().collect()))
        })
        .collect()
}
