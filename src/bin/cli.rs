//! DriftKV CLI
//!
//! Offline maintenance for a DriftKV data directory.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use driftkv::{rdb, Config, Engine};
use tracing_subscriber::{fmt, EnvFilter};

/// DriftKV CLI
#[derive(Parser, Debug)]
#[command(name = "driftkv-cli")]
#[command(about = "Maintenance tool for DriftKV data directories")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Recover a data directory and rewrite its AOF into an RDB snapshot
    Rewrite {
        /// Data directory
        #[arg(short, long, default_value = "./driftkv_data")]
        data_dir: PathBuf,

        /// Snapshot path (defaults to <data-dir>/dump.rdb)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Number of logical databases
        #[arg(long, default_value = "16")]
        databases: usize,

        /// Disable string compression in the snapshot
        #[arg(long)]
        no_compression: bool,
    },

    /// Print the aux fields and per-database counts of a snapshot
    Inspect {
        /// Snapshot file
        path: PathBuf,
    },
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,driftkv=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    if let Err(e) = run(args.command) {
        tracing::error!("{}", e);
        process::exit(1);
    }
}

fn run(command: Commands) -> driftkv::Result<()> {
    match command {
        Commands::Rewrite {
            data_dir,
            output,
            databases,
            no_compression,
        } => {
            tracing::info!("DriftKV v{}", driftkv::VERSION);
            tracing::info!("Data directory: {}", data_dir.display());

            let config = Config::builder()
                .data_dir(&data_dir)
                .databases(databases)
                .rdb_compression(!no_compression)
                .build();
            let target = output.unwrap_or_else(|| config.rdb_path());

            let engine = Engine::open(config)?;
            let outcome = engine.snapshot_to(&target)?;
            engine.close()?;

            println!(
                "wrote {} keys to {} (AOF boundary {} bytes)",
                outcome.keys_written,
                target.display(),
                outcome.boundary
            );
        }
        Commands::Inspect { path } => {
            let snapshot = rdb::load(&path)?;

            let mut aux: Vec<_> = snapshot.aux.iter().collect();
            aux.sort();
            for (key, value) in aux {
                println!("aux {} = {}", key, value);
            }
            for db in &snapshot.databases {
                println!("db {}: {} keys, {} with ttl", db.index, db.key_count, db.ttl_count);
            }
            println!("total: {} keys", snapshot.record_count());
        }
    }
    Ok(())
}
