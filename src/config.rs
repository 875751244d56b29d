use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::retry::{RetryPolicy, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY_MS};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub postgres: PostgresConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
}

/// Storage backend a worker proxies requests to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Postgres,
    Redis,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Postgres => "postgres",
            BackendKind::Redis => "redis",
        }
    }
}

impl Default for BackendKind {
    fn default() -> Self {
        BackendKind::Redis
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PostgresConfig {
    /// Database host
    #[serde(default = "default_pg_host")]
    pub host: String,
    /// Database port
    #[serde(default = "default_pg_port")]
    pub port: u16,
    /// Database user
    #[serde(default = "default_pg_user")]
    pub user: String,
    /// Database password
    #[serde(default)]
    pub password: Option<String>,
    /// Database name
    #[serde(default = "default_pg_database")]
    pub database: String,
    /// Require TLS for the connection
    #[serde(default)]
    pub ssl: bool,
    /// Table holding auth records
    #[serde(default = "default_table_name")]
    pub table_name: String,
    /// Session namespace within the table
    #[serde(default = "default_pg_session")]
    pub session: String,
    /// Delay between retry attempts in milliseconds
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Maximum attempts per storage operation
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Maximum connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_pg_host() -> String {
    "localhost".to_string()
}

fn default_pg_port() -> u16 {
    5432
}

fn default_pg_user() -> String {
    "postgres".to_string()
}

fn default_pg_database() -> String {
    "base".to_string()
}

fn default_table_name() -> String {
    "auth".to_string()
}

fn default_pg_session() -> String {
    "default".to_string()
}

fn default_retry_delay_ms() -> u64 {
    DEFAULT_RETRY_DELAY_MS
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_max_connections() -> u32 {
    5
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            host: default_pg_host(),
            port: default_pg_port(),
            user: default_pg_user(),
            password: None,
            database: default_pg_database(),
            ssl: false,
            table_name: default_table_name(),
            session: default_pg_session(),
            retry_delay_ms: default_retry_delay_ms(),
            max_retries: default_max_retries(),
            max_connections: default_max_connections(),
        }
    }
}

impl PostgresConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from_millis(self.max_retries, self.retry_delay_ms)
    }

    /// The table name is interpolated into SQL, so it must be a bare
    /// identifier: leading letter or underscore, alphanumerics after,
    /// at most 63 bytes.
    pub fn table_name_valid(&self) -> bool {
        let name = self.table_name.as_str();
        !name.is_empty()
            && name.len() <= 63
            && name
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Redis host
    #[serde(default = "default_redis_host")]
    pub host: String,
    /// Redis port
    #[serde(default = "default_redis_port")]
    pub port: u16,
    /// Optional ACL username
    #[serde(default)]
    pub username: Option<String>,
    /// Optional password
    #[serde(default)]
    pub password: Option<String>,
    /// Logical database index
    #[serde(default)]
    pub db: i64,
    /// Connect over TLS
    #[serde(default)]
    pub tls: bool,
    /// Session namespace; required, there is no safe default for a
    /// shared keyspace
    #[serde(default)]
    pub session: String,
    /// Delay between retry attempts in milliseconds
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Maximum attempts per storage operation
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_redis_host() -> String {
    "127.0.0.1".to_string()
}

fn default_redis_port() -> u16 {
    6379
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: default_redis_host(),
            port: default_redis_port(),
            username: None,
            password: None,
            db: 0,
            tls: false,
            session: String::new(),
            retry_delay_ms: default_retry_delay_ms(),
            max_retries: default_max_retries(),
        }
    }
}

impl RedisConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from_millis(self.max_retries, self.retry_delay_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Worker host
    #[serde(default = "default_worker_host")]
    pub host: String,
    /// Worker port; required
    #[serde(default)]
    pub port: u16,
    /// Backend the worker should proxy to
    #[serde(default)]
    pub backend: BackendKind,
    /// Session namespace; required
    #[serde(default)]
    pub session: String,
    /// Delay between retry attempts in milliseconds
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Maximum attempts per storage operation
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_worker_host() -> String {
    "127.0.0.1".to_string()
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            host: default_worker_host(),
            port: 0,
            backend: BackendKind::default(),
            session: String::new(),
            retry_delay_ms: default_retry_delay_ms(),
            max_retries: default_max_retries(),
        }
    }
}

impl WorkerConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from_millis(self.max_retries, self.retry_delay_ms)
    }
}

impl AuthConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("AUTHKEEP_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (AUTHKEEP_POSTGRES__HOST, etc.)
            .add_source(
                Environment::with_prefix("AUTHKEEP")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Validate configuration values for every backend section at once
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        // Validate postgres params
        if !self.postgres.table_name_valid() {
            errors.push(format!(
                "postgres.table_name {:?} must be a bare SQL identifier",
                self.postgres.table_name
            ));
        }

        if self.postgres.session.is_empty() {
            errors.push("postgres.session must not be empty".to_string());
        }

        if self.postgres.port == 0 {
            errors.push("postgres.port must be non-zero".to_string());
        }

        // Validate redis params
        if self.redis.session.is_empty() {
            errors.push("redis.session must not be empty".to_string());
        }

        if self.redis.port == 0 {
            errors.push("redis.port must be non-zero".to_string());
        }

        // Validate worker params
        if self.worker.session.is_empty() {
            errors.push("worker.session must not be empty".to_string());
        }

        if self.worker.port == 0 {
            errors.push("worker.port must be non-zero".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
