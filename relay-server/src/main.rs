use clap::Parser;
use relay_server::{cli::Args, init_logging, RelayServer};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Args::parse().into_config();

    // keep the file writer alive until exit
    let _log_guard = init_logging(&config.logging)?;

    let storage = match &config.data_dir {
        Some(dir) => dir.display().to_string(),
        None => "in-memory".to_string(),
    };
    info!(
        port = config.port,
        storage = %storage,
        intercept = config.relay.intercept_enabled,
        "Starting capture relay"
    );

    println!("🚀 Capture relay starting...");
    println!("📡 Capture API: http://127.0.0.1:{}/capture", config.port);
    println!("🛠  Admin API:   http://127.0.0.1:{}/admin", config.port);
    println!("💾 Storage: {}", storage);
    println!();

    RelayServer::new(config).await?.start().await?;

    Ok(())
}
