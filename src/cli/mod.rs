use clap::{Parser, Subcommand};
use std::path::PathBuf;
use crate::error::{Result, StorageError};

#[derive(Parser)]
#[command(name = "seqkv")]
#[command(about = "Log-structured key-value storage with group commit", long_about = None)]
pub struct Command {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize storage at specified path
    Init {
        /// Data directory path
        #[arg(short, long)]
        path: PathBuf,

        /// Largest log mapping in MB
        #[arg(short, long, default_value = "64")]
        max_map_size: usize,

        /// Largest group commit in KB
        #[arg(short, long, default_value = "4096")]
        group_size: usize,

        /// Skip syncing the log after each group commit
        #[arg(long, default_value = "false")]
        no_sync: bool,
    },

    /// Put a key-value pair
    Put {
        /// Key to store
        key: String,

        /// Value to store
        value: String,

        /// Data directory path
        #[arg(short, long, default_value = "./data")]
        path: PathBuf,
    },

    /// Get value for a key
    Get {
        /// Key to retrieve
        key: String,

        /// Data directory path
        #[arg(short, long, default_value = "./data")]
        path: PathBuf,
    },

    /// Delete a key
    Delete {
        /// Key to delete
        key: String,

        /// Data directory path
        #[arg(short, long, default_value = "./data")]
        path: PathBuf,
    },

    /// Scan key range
    Scan {
        /// Start key (inclusive)
        start: String,

        /// End key (exclusive)
        end: String,

        /// Data directory path
        #[arg(short, long, default_value = "./data")]
        path: PathBuf,
    },

    /// Print every stored version, tombstones included
    Dump {
        /// Data directory path
        #[arg(short, long, default_value = "./data")]
        path: PathBuf,
    },

    /// Run concurrent write benchmark
    Bench {
        /// Number of concurrent writers
        #[arg(short, long, default_value = "8")]
        writers: usize,

        /// Batches written by each writer
        #[arg(short, long, default_value = "10000")]
        ops: u64,

        /// Entries per batch
        #[arg(short, long, default_value = "1")]
        batch_size: usize,

        /// Value size in bytes
        #[arg(short, long, default_value = "100")]
        value_size: usize,

        /// Data directory path
        #[arg(short, long, default_value = "./data")]
        path: PathBuf,
    },
}

pub async fn execute_command(cmd: Command) -> Result<()> {
    match cmd.command {
        Commands::Init { path, max_map_size, group_size, no_sync } => {
            execute_init_command(path, max_map_size, group_size, no_sync).await
        }
        Commands::Put { key, value, path } => {
            execute_put_command(key, value, path).await
        }
        Commands::Get { key, path } => {
            execute_get_command(key, path).await
        }
        Commands::Delete { key, path } => {
            execute_delete_command(key, path).await
        }
        Commands::Scan { start, end, path } => {
            execute_scan_command(start, end, path).await
        }
        Commands::Dump { path } => {
            execute_dump_command(path).await
        }
        Commands::Bench { writers, ops, batch_size, value_size, path } => {
            execute_bench_command(writers, ops, batch_size, value_size, path).await
        }
    }
}

async fn execute_init_command(
    path: PathBuf,
    max_map_size: usize,
    group_size: usize,
    no_sync: bool,
) -> Result<()> {
    use crate::config::Config;
    use crate::checksum::ChecksumAlgorithm;

    std::fs::create_dir_all(&path)?;

    let config = Config::new(path.clone())
        .with_max_map_size(max_map_size * 1024 * 1024) // Convert MB to bytes
        .with_max_group_bytes(group_size * 1024) // Convert KB to bytes
        .with_sync_on_commit(!no_sync)
        .with_checksum_algorithm(ChecksumAlgorithm::CRC32);

    config.validate()?;

    let config_path = path.join("config.json");
    std::fs::write(&config_path, serde_json::to_string_pretty(&config)?)?;

    println!(
        "initialized {} (log mappings up to {} MB, groups up to {} KB, sync {})",
        path.display(),
        max_map_size,
        group_size,
        if no_sync { "off" } else { "on" }
    );

    Ok(())
}

async fn execute_put_command(key: String, value: String, path: PathBuf) -> Result<()> {
    let engine = open_engine(path).await?;

    engine.put(key.as_bytes(), value.as_bytes()).await?;
    println!("put {} @{}", key, engine.snapshot().sequence());

    engine.close().await?;
    Ok(())
}

async fn execute_get_command(key: String, path: PathBuf) -> Result<()> {
    let engine = open_engine(path).await?;

    match engine.get(key.as_bytes()).await? {
        Some(value) => println!("{}", String::from_utf8_lossy(&value)),
        None => println!("{}: not found", key),
    }

    engine.close().await?;
    Ok(())
}

async fn execute_delete_command(key: String, path: PathBuf) -> Result<()> {
    let engine = open_engine(path).await?;

    engine.delete(key.as_bytes()).await?;
    println!("deleted {} @{}", key, engine.snapshot().sequence());

    engine.close().await?;
    Ok(())
}

async fn execute_scan_command(start: String, end: String, path: PathBuf) -> Result<()> {
    let engine = open_engine(path).await?;

    let results = engine.scan(start.as_bytes(), end.as_bytes()).await?;

    for (key, value) in &results {
        println!("{} = {}", String::from_utf8_lossy(key), String::from_utf8_lossy(value));
    }
    println!("({} live keys)", results.len());

    engine.close().await?;
    Ok(())
}

async fn execute_dump_command(path: PathBuf) -> Result<()> {
    use crate::entry::ValueType;

    let engine = open_engine(path).await?;

    let versions = engine.versions();
    println!("{} versions (last sequence {}):", versions.len(), engine.snapshot().sequence());
    for (key, value) in versions {
        match key.value_type {
            ValueType::Value => println!(
                "  {} @{} = {}",
                key.user_key.to_string_lossy(),
                key.sequence,
                value.to_string_lossy()
            ),
            ValueType::Delete => println!(
                "  {} @{} <deleted>",
                key.user_key.to_string_lossy(),
                key.sequence
            ),
            ValueType::Unknown => println!(
                "  {} @{} <unknown type>",
                key.user_key.to_string_lossy(),
                key.sequence
            ),
        }
    }

    engine.close().await?;
    Ok(())
}

async fn execute_bench_command(
    writers: usize,
    ops: u64,
    batch_size: usize,
    value_size: usize,
    path: PathBuf,
) -> Result<()> {
    use crate::batch::WriteBatch;
    use crate::engine::StorageEngine;
    use rand::Rng;
    use std::sync::Arc;
    use std::time::Instant;

    if writers == 0 || batch_size == 0 {
        return Err(StorageError::ConfigError(
            "writers and batch_size must be at least 1".to_string()
        ));
    }

    let config = load_config_from_path(path)?;
    let group_limit = config.max_group_bytes;
    let engine = Arc::new(StorageEngine::new(config).await?);

    println!(
        "bench: {} writers x {} batches of {} x {}-byte values (group limit {} bytes)",
        writers, ops, batch_size, value_size, group_limit
    );
    let start_time = Instant::now();

    let mut handles = Vec::with_capacity(writers);
    for writer in 0..writers {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            let value: Vec<u8> = {
                let mut rng = rand::thread_rng();
                (0..value_size).map(|_| rng.gen()).collect()
            };
            for op in 0..ops {
                let mut batch = WriteBatch::new();
                for entry in 0..batch_size {
                    let key = format!("bench_{:04}_{:010}_{:04}", writer, op, entry);
                    batch.put(key.into_bytes(), value.clone());
                }
                engine.write(batch).await?;
            }
            Ok::<(), StorageError>(())
        }));
    }

    for handle in handles {
        handle
            .await
            .map_err(|e| StorageError::BackgroundTask(e.to_string()))??;
    }

    let elapsed = start_time.elapsed().as_secs_f64();
    let total_batches = writers as u64 * ops;
    let total_entries = total_batches * batch_size as u64;

    let report = engine.metrics().report();
    let batches_per_sync = if report.sync_count == 0 {
        0.0
    } else {
        report.grouped_batches as f64 / report.sync_count as f64
    };

    println!(
        "committed {} batches ({} entries) in {:.2}s, {:.0} batches/sec",
        total_batches,
        total_entries,
        elapsed,
        total_batches as f64 / elapsed
    );
    println!(
        "groups: {}  batches/group: {:.2}  batches/sync: {:.2}  failed: {}",
        report.group_commits,
        report.average_group_size(),
        batches_per_sync,
        report.failed_groups
    );
    println!(
        "log: {} bytes appended, {} syncs",
        report.bytes_appended, report.sync_count
    );

    engine.close().await?;
    Ok(())
}

async fn open_engine(path: PathBuf) -> Result<crate::engine::StorageEngine> {
    crate::engine::StorageEngine::new(load_config_from_path(path)?).await
}

fn load_config_from_path(data_dir: PathBuf) -> Result<crate::config::Config> {
    let config_path = data_dir.join("config.json");

    if config_path.exists() {
        let config_json = std::fs::read_to_string(&config_path)?;
        let config: crate::config::Config = serde_json::from_str(&config_json)?;
        Ok(config)
    } else {
        Err(StorageError::ConfigError(
            format!("Configuration file not found at {}. Run 'seqkv init --path {}' first.",
                config_path.display(), data_dir.display())
        ))
    }
}
