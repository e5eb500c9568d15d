use anyhow::{Context, Result};
use std::{str::FromStr, time::Duration};

/// Which `UrlStore` implementation to run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Sqlite,
    DynamoDb,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "dynamodb" | "dynamo" => Ok(Self::DynamoDb),
            "memory" => Ok(Self::Memory),
            other => anyhow::bail!(
                "unknown STORE_BACKEND {other:?}; use `sqlite`, `dynamodb` or `memory`"
            ),
        }
    }
}

/// Whether resolution honours `expire_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryMode {
    /// Expired records resolve to `Expired`.
    Strict,
    /// Records resolve regardless of `expire_at`.
    Lenient,
}

impl FromStr for ExpiryMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "lenient" => Ok(Self::Lenient),
            other => anyhow::bail!("unknown EXPIRY_MODE {other:?}; use `strict` or `lenient`"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DynamoConfig {
    /// AWS region, required when the DynamoDB backend is selected.
    pub region: Option<String>,

    pub table: String,

    /// Endpoint override, e.g. "http://localhost:8000" for DynamoDB Local.
    pub endpoint: Option<String>,
}

/// Knobs for key allocation, expiry and store retries.
#[derive(Debug, Clone)]
pub struct ShortenerConfig {
    /// Public base URL used when building short links. No trailing slash.
    pub base_url: String,

    /// Length of generated keys before widening on collision.
    pub key_length: usize,

    /// Insert attempts per key length.
    pub collision_retries: usize,

    pub expiry_mode: ExpiryMode,

    /// Extra attempts for idempotent store calls that fail.
    pub store_retries: u32,

    /// Backoff before the first retry; doubled on every further attempt.
    pub store_retry_backoff: Duration,
}

impl Default for ShortenerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".into(),
            key_length: 6,
            collision_retries: 5,
            expiry_mode: ExpiryMode::Strict,
            store_retries: 2,
            store_retry_backoff: Duration::from_millis(50),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Host both listeners bind to, e.g. "0.0.0.0"
    pub host: String,

    /// Port for the RPC API
    pub rpc_port: u16,

    /// Port for the public redirect server
    pub http_port: u16,

    pub store_backend: StoreBackend,

    /// SQLite connection string, e.g. "sqlite:./snip.db"
    pub database_url: String,

    pub dynamo: DynamoConfig,

    pub shortener: ShortenerConfig,

    /// Origins allowed by the CORS layer. `["*"]` allows any origin.
    pub cors_allowed_origins: Vec<String>,
}

impl AppConfig {
    /// Load configuration from environment variables (populated by dotenvy before this is called).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from any key lookup; `from_env` passes the
    /// process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_owned());

        let rpc_port = var("SERVER_PORT", "50051")
            .parse::<u16>()
            .context("SERVER_PORT must be a valid port number (1–65535)")?;

        let http_port = var("HTTP_PORT", "8080")
            .parse::<u16>()
            .context("HTTP_PORT must be a valid port number (1–65535)")?;

        let base_url = lookup("BASE_URL")
            .unwrap_or_else(|| format!("http://localhost:{http_port}"))
            .trim_end_matches('/')
            .to_owned();

        let key_length = var("KEY_LENGTH", "6")
            .parse::<usize>()
            .context("KEY_LENGTH must be a positive integer")?;
        if !(4..=32).contains(&key_length) {
            anyhow::bail!("KEY_LENGTH must be between 4 and 32, got {key_length}");
        }

        let collision_retries = var("COLLISION_RETRIES", "5")
            .parse::<usize>()
            .context("COLLISION_RETRIES must be a non-negative integer")?
            .max(1);

        let store_retries = var("STORE_RETRIES", "2")
            .parse::<u32>()
            .context("STORE_RETRIES must be a non-negative integer")?;

        let store_retry_backoff_ms = var("STORE_RETRY_BACKOFF_MS", "50")
            .parse::<u64>()
            .context("STORE_RETRY_BACKOFF_MS must be a non-negative integer")?;

        let cors_allowed_origins = var("CORS_ALLOWED_ORIGINS", "*")
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect();

        Ok(Self {
            host: var("HOST", "0.0.0.0"),
            rpc_port,
            http_port,
            store_backend: var("STORE_BACKEND", "sqlite").parse()?,
            database_url: var("DATABASE_URL", "sqlite:./snip.db"),
            dynamo: DynamoConfig {
                region: lookup("AWS_REGION").filter(|s| !s.trim().is_empty()),
                table: var("DYNAMODB_TABLE", "Urls"),
                endpoint: lookup("DYNAMODB_ENDPOINT").filter(|s| !s.trim().is_empty()),
            },
            shortener: ShortenerConfig {
                base_url,
                key_length,
                collision_retries,
                expiry_mode: var("EXPIRY_MODE", "strict").parse()?,
                store_retries,
                store_retry_backoff: Duration::from_millis(store_retry_backoff_ms),
            },
            cors_allowed_origins,
        })
    }
}
