//! segkv CLI
//!
//! Runs a single command against a local data directory.

use std::collections::HashMap;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use segkv::config::DEFAULT_SEGMENT_SIZE_LIMIT;
use segkv::{Config, Datastore, KvError};
use tracing_subscriber::{fmt, EnvFilter};

/// segkv CLI
#[derive(Parser, Debug)]
#[command(name = "segkv-cli")]
#[command(about = "CLI for the segkv key-value store")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./segkv_data")]
    data_dir: String,

    /// Active segment rotation threshold in bytes
    #[arg(short, long, default_value_t = DEFAULT_SEGMENT_SIZE_LIMIT)]
    segment_size: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get a value by key
    Get {
        /// The key to get
        key: String,
    },

    /// Set a key-value pair
    Put {
        /// The key to set
        key: String,

        /// The value to set
        value: String,
    },

    /// Delete a key
    Del {
        /// The key to delete
        key: String,
    },

    /// Merge sealed segments now
    Compact,

    /// Print segment statistics
    Stats,

    /// Print every live key and value
    Dump,
}

fn main() -> ExitCode {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,segkv=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config = Config::builder()
        .data_dir(&args.data_dir)
        .segment_size_limit(args.segment_size)
        .merge_enabled(false)
        .build();

    let store = match Datastore::open(config) {
        Ok(store) => store,
        Err(e) => {
            tracing::error!("Failed to open store: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let code = match run(&store, args.command) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("Command failed: {}", e);
            ExitCode::FAILURE
        }
    };

    if let Err(e) = store.close() {
        tracing::error!("Failed to close store: {}", e);
        return ExitCode::FAILURE;
    }

    code
}

fn run(store: &Datastore, command: Commands) -> segkv::Result<ExitCode> {
    match command {
        Commands::Get { key } => match store.get(key.as_bytes()) {
            Ok(value) => println!("{}", String::from_utf8_lossy(&value)),
            Err(KvError::KeyNotFound) => {
                println!("(nil)");
                return Ok(ExitCode::FAILURE);
            }
            Err(e) => return Err(e),
        },
        Commands::Put { key, value } => {
            store.put(key.as_bytes(), value.as_bytes())?;
            println!("OK");
        }
        Commands::Del { key } => {
            store.delete(key.as_bytes())?;
            println!("OK");
        }
        Commands::Compact => match store.compact()? {
            Some(stats) => println!(
                "merged {} segments: {} keys kept, {} tombstones dropped, {} -> {} bytes",
                stats.segments_merged,
                stats.keys_written,
                stats.tombstones_dropped,
                stats.bytes_before,
                stats.bytes_after
            ),
            None => println!("nothing to merge"),
        },
        Commands::Stats => {
            let stats = store.stats();
            println!("segments:      {}", stats.segment_count);
            println!("sealed:        {}", stats.sealed_count);
            println!("active bytes:  {}", stats.active_size);
            println!("active keys:   {}", stats.active_keys);
            println!("total bytes:   {}", stats.total_size);
        }
        Commands::Dump => {
            // Oldest first so newer segments overwrite
            let mut live: HashMap<Vec<u8>, Option<Vec<u8>>> = HashMap::new();
            for segment in store.manager().segments().iter().rev() {
                live.extend(segment.snapshot()?);
            }

            let mut entries: Vec<_> = live
                .into_iter()
                .filter_map(|(key, value)| value.map(|v| (key, v)))
                .collect();
            entries.sort();

            for (key, value) in entries {
                println!(
                    "{} = {}",
                    String::from_utf8_lossy(&key),
                    String::from_utf8_lossy(&value)
                );
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}
