//! Archway - signed envelope registry gateway

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use archway::{
    config::Args,
    keyring::{InMemoryKeyRegistry, KeyRegistry},
    server,
    store::{CouchStore, EnvelopeStore, MemoryStore},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    // Parse command line arguments
    let args = Args::parse();

    // Initialize tracing/logging
    let log_level = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("archway={},info", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Validate configuration
    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    // Print startup banner
    info!("======================================");
    info!("  Archway - Envelope Registry Gateway");
    info!("======================================");
    info!("Node ID: {}", args.node_id);
    info!("Listen: {}", args.listen);
    info!(
        "Mode: {}",
        if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" }
    );
    info!("Store: {} (db: {})", args.store_url, args.store_db);
    info!("Page size: {}", args.page_size);
    info!("======================================");

    // Load the keyring
    let keys: Arc<dyn KeyRegistry> = match &args.keys_file {
        Some(path) => {
            let registry = InMemoryKeyRegistry::load_from_file(path).map_err(|e| {
                error!("Failed to load keyring from {}: {}", path.display(), e);
                anyhow::anyhow!("Keyring load failed")
            })?;
            info!(
                "Keyring loaded from {} ({} users)",
                path.display(),
                registry.user_count()
            );
            Arc::new(registry)
        }
        None => {
            if !args.dev_mode {
                warn!("No KEYS_FILE configured - gateway cannot sign or verify for any user");
            }
            Arc::new(InMemoryKeyRegistry::new())
        }
    };

    // Connect to the document store (in-memory fallback in dev mode)
    let store: Arc<dyn EnvelopeStore> = if args.dev_mode {
        info!("Using in-memory store (dev mode)");
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(CouchStore::new(
            &args.store_url,
            &args.store_db,
            args.request_timeout_ms,
        )?)
    };

    // Create application state
    let state = Arc::new(server::AppState::new(args, store, keys)?);

    // Run the server
    if let Err(e) = server::run(state).await {
        error!("Server error: {:?}", e);
        std::process::exit(1);
    }

    Ok(())
}
