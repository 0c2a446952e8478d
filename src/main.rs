use clap::Parser;
use seqkv::cli::Command;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging, RUST_LOG overrides the default level
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    // Parse CLI arguments
    let cmd = Command::parse();

    // Execute command
    seqkv::cli::execute_command(cmd).await?;

    Ok(())
}
