//! Configuration for Archway
//!
//! CLI arguments and environment variable handling using clap.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use uuid::Uuid;

/// Archway - signed envelope registry gateway
#[derive(Parser, Debug, Clone)]
#[command(name = "archway")]
#[command(about = "HTTP gateway for a signed metadata envelope registry")]
pub struct Args {
    /// Unique node identifier for this gateway instance
    #[arg(long, env = "NODE_ID", default_value_t = Uuid::new_v4())]
    pub node_id: Uuid,

    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8000")]
    pub listen: SocketAddr,

    /// Base URL of the backing document store
    #[arg(long, env = "STORE_URL", default_value = "http://localhost:5984")]
    pub store_url: String,

    /// Database name within the store
    #[arg(long, env = "STORE_DB", default_value = "envelopes")]
    pub store_db: String,

    /// Enable development mode (X-Remote-User auth, in-memory store fallback)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// JWT secret for token verification (required in production)
    #[arg(long, env = "JWT_SECRET")]
    pub jwt_secret: Option<String>,

    /// JWT token expiry in seconds
    #[arg(long, env = "JWT_EXPIRY_SECONDS", default_value = "3600")]
    pub jwt_expiry_seconds: u64,

    /// Harvest page size (documents per page)
    #[arg(long, env = "PAGE_SIZE", default_value = "25")]
    pub page_size: u64,

    /// Path to a JSON keyring file to load signing keys from at startup
    #[arg(long, env = "KEYS_FILE")]
    pub keys_file: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Request timeout in milliseconds for store calls
    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value = "30000")]
    pub request_timeout_ms: u64,

    /// Public base URL of this gateway, used to build key_location URLs
    /// (e.g. "https://registry.example.org")
    #[arg(long, env = "PUBLIC_URL")]
    pub public_url: Option<String>,
}

impl Args {
    /// Get effective JWT secret (uses a fixed insecure value in dev mode)
    pub fn jwt_secret(&self) -> Option<String> {
        if self.dev_mode {
            Some(
                self.jwt_secret
                    .clone()
                    .unwrap_or_else(|| "dev-only-insecure-secret-0123456789ab".to_string()),
            )
        } else {
            self.jwt_secret.clone()
        }
    }

    /// Public base URL, falling back to the listen address
    pub fn public_url(&self) -> String {
        self.public_url
            .clone()
            .unwrap_or_else(|| format!("http://{}", self.listen))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if !self.dev_mode {
            match &self.jwt_secret {
                None => return Err("JWT_SECRET is required in production mode".to_string()),
                Some(s) if s.len() < 32 => {
                    return Err("JWT_SECRET must be at least 32 characters".to_string())
                }
                _ => {}
            }
        }

        if self.page_size == 0 {
            return Err("PAGE_SIZE must be at least 1".to_string());
        }

        Ok(())
    }
}
