//! Server configuration
//!
//! Configuration is loaded from environment variables, with `.env` support
//! for local development. Database pool settings live in [`crate::db`] and
//! ingestion settings in [`crate::ingest::config`].

use anyhow::Result;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CORS_MAX_AGE_SECS: u64 = 3600;

/// Top-level server configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub cors: CorsConfig,
}

/// HTTP listener settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub graceful_shutdown_timeout_secs: u64,
}

/// CORS settings applied to the API router
#[derive(Debug, Clone)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
    pub allow_credentials: bool,
    pub max_age_secs: u64,
}

impl Config {
    /// Load configuration from the environment
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let server = ServerConfig {
            host: std::env::var("SERVER_HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string()),
            port: std::env::var("SERVER_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_PORT),
            graceful_shutdown_timeout_secs: std::env::var("SERVER_SHUTDOWN_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
        };

        let cors = CorsConfig {
            allowed_origins: std::env::var("CORS_ALLOWED_ORIGINS")
                .map(|s| {
                    s.split(',')
                        .map(|o| o.trim().to_string())
                        .filter(|o| !o.is_empty())
                        .collect()
                })
                .unwrap_or_else(|_| vec!["*".to_string()]),
            allow_credentials: std::env::var("CORS_ALLOW_CREDENTIALS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(false),
            max_age_secs: std::env::var("CORS_MAX_AGE_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_CORS_MAX_AGE_SECS),
        };

        let config = Self { server, cors };
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.server.host.is_empty() {
            anyhow::bail!("SERVER_HOST must not be empty");
        }
        if self.server.port == 0 {
            anyhow::bail!("SERVER_PORT must be non-zero");
        }
        if self.cors.allowed_origins.is_empty() {
            anyhow::bail!("CORS_ALLOWED_ORIGINS must contain at least one origin");
        }
        // A wildcard origin cannot be combined with credentials.
        if self.cors.allow_credentials && self.cors.allowed_origins.iter().any(|o| o == "*") {
            anyhow::bail!("CORS_ALLOW_CREDENTIALS requires explicit allowed origins");
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: DEFAULT_HOST.to_string(),
                port: DEFAULT_PORT,
                graceful_shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            },
            cors: CorsConfig {
                allowed_origins: vec!["*".to_string()],
                allow_credentials: false,
                max_age_secs: DEFAULT_CORS_MAX_AGE_SECS,
            },
        }
    }
}
