//! Keyward - local WebCrypto service

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};

use keyward::{
    config::Args,
    logging::{self, UsageLogger},
    provider::ProviderDirectory,
    server::{self, AppState},
    service::ServiceSet,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    logging::init_tracing(&args.log_level);

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    let usage = UsageLogger::new(args.server_id.to_string());
    if let Some(path) = &args.usage_log {
        match usage.init_file(path.clone()).await {
            Ok(()) => info!("Usage log: {}", path.display()),
            Err(e) => warn!("Usage log disabled, cannot open {}: {}", path.display(), e),
        }
    }

    info!("======================================");
    info!("  Keyward - local WebCrypto service");
    info!("======================================");
    info!("Server ID: {}", args.server_id);
    info!("Listen: {}", args.listen);
    info!(
        "Storage: {}",
        args.storage_dir
            .as_ref()
            .map(|d| d.display().to_string())
            .unwrap_or_else(|| "in-memory".to_string())
    );
    info!("Max handles: {}", args.max_handles);

    let directory = ProviderDirectory::from_args(&args).await?;
    info!("Providers: {}", directory.ids().join(", "));
    info!("======================================");

    let services = ServiceSet::standard()?;
    let state = Arc::new(AppState::new(args, directory, services, usage));

    server::run(state).await?;
    Ok(())
}
