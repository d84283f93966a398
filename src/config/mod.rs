use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::env;

use crate::storage::StorageKind;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub storage: StorageConfig,
    pub filter: FilterConfig,
    pub database: DatabaseConfig,
    pub catalog: CatalogConfig,
    pub idempotency: IdempotencyConfig,
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// The single backend switch
    pub kind: StorageKind,
    pub database_url: Option<String>,
    /// Optional database name swapped into the path of `database_url`
    pub database_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    pub max_limit: u32,
    pub default_limit: u32,
    pub max_nested_depth: u32,
    pub like_case_insensitive: bool,
    pub debug_logging: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub max_connections: u32,
    pub connection_timeout: u64,
    pub enable_slow_query_warning: bool,
    pub slow_query_threshold_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    pub enabled: bool,
    /// Index fields on a spawned task instead of inline after the write
    pub deferred: bool,
    pub validate_queries: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyConfig {
    /// How long a stored result is replayed
    pub retention_secs: u64,
    /// Per-key locks kept in this process before idle ones are pruned
    pub max_entries: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub port: u16,
    pub enable_request_logging: bool,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let environment = match env::var("APP_ENV").as_deref() {
            Ok("production") | Ok("prod") => Environment::Production,
            Ok("staging") | Ok("stage") => Environment::Staging,
            _ => Environment::Development,
        };

        // Set defaults based on environment, then override with specific env vars
        match environment {
            Environment::Production => Self::production(),
            Environment::Staging => Self::staging(),
            Environment::Development => Self::development(),
        }
        .with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Self {
        // Storage overrides
        if let Ok(v) = env::var("FIMIDX_STORAGE") {
            match v.parse() {
                Ok(kind) => self.storage.kind = kind,
                Err(e) => tracing::warn!("Ignoring FIMIDX_STORAGE: {}", e),
            }
        }
        if let Ok(v) = env::var("DATABASE_URL") {
            self.storage.database_url = Some(v);
        }
        if let Ok(v) = env::var("FIMIDX_DATABASE_NAME") {
            self.storage.database_name = Some(v);
        }

        // Filter overrides
        if let Ok(v) = env::var("FILTER_MAX_LIMIT") {
            self.filter.max_limit = v.parse().unwrap_or(self.filter.max_limit);
        }
        if let Ok(v) = env::var("FILTER_DEFAULT_LIMIT") {
            self.filter.default_limit = v.parse().unwrap_or(self.filter.default_limit);
        }
        if let Ok(v) = env::var("FILTER_MAX_NESTED_DEPTH") {
            self.filter.max_nested_depth = v.parse().unwrap_or(self.filter.max_nested_depth);
        }
        if let Ok(v) = env::var("FILTER_LIKE_CASE_INSENSITIVE") {
            self.filter.like_case_insensitive = v.parse().unwrap_or(self.filter.like_case_insensitive);
        }
        if let Ok(v) = env::var("FILTER_DEBUG_LOGGING") {
            self.filter.debug_logging = v.parse().unwrap_or(self.filter.debug_logging);
        }

        // Database overrides
        if let Ok(v) = env::var("DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = v.parse().unwrap_or(self.database.max_connections);
        }
        if let Ok(v) = env::var("DATABASE_CONNECTION_TIMEOUT") {
            self.database.connection_timeout = v.parse().unwrap_or(self.database.connection_timeout);
        }
        if let Ok(v) = env::var("DATABASE_ENABLE_SLOW_QUERY_WARNING") {
            self.database.enable_slow_query_warning = v.parse().unwrap_or(self.database.enable_slow_query_warning);
        }
        if let Ok(v) = env::var("DATABASE_SLOW_QUERY_THRESHOLD_MS") {
            self.database.slow_query_threshold_ms = v.parse().unwrap_or(self.database.slow_query_threshold_ms);
        }

        // Catalog overrides
        if let Ok(v) = env::var("CATALOG_ENABLED") {
            self.catalog.enabled = v.parse().unwrap_or(self.catalog.enabled);
        }
        if let Ok(v) = env::var("CATALOG_DEFERRED") {
            self.catalog.deferred = v.parse().unwrap_or(self.catalog.deferred);
        }
        if let Ok(v) = env::var("CATALOG_VALIDATE_QUERIES") {
            self.catalog.validate_queries = v.parse().unwrap_or(self.catalog.validate_queries);
        }

        // Idempotency overrides
        if let Ok(v) = env::var("IDEMPOTENCY_RETENTION_SECS") {
            self.idempotency.retention_secs = v.parse().unwrap_or(self.idempotency.retention_secs);
        }
        if let Ok(v) = env::var("IDEMPOTENCY_MAX_ENTRIES") {
            self.idempotency.max_entries = v.parse().unwrap_or(self.idempotency.max_entries);
        }

        // API overrides
        if let Some(v) = env::var("FIMIDX_API_PORT").ok().or_else(|| env::var("PORT").ok()) {
            self.api.port = v.parse().unwrap_or(self.api.port);
        }
        if let Ok(v) = env::var("API_ENABLE_REQUEST_LOGGING") {
            self.api.enable_request_logging = v.parse().unwrap_or(self.api.enable_request_logging);
        }

        self
    }

    pub fn development() -> Self {
        Self {
            environment: Environment::Development,
            storage: StorageConfig {
                kind: StorageKind::Memory,
                database_url: None,
                database_name: None,
            },
            filter: FilterConfig {
                max_limit: 1000,
                default_limit: 50,
                max_nested_depth: 10,
                like_case_insensitive: true,
                debug_logging: true,
            },
            database: DatabaseConfig {
                max_connections: 10,
                connection_timeout: 30,
                enable_slow_query_warning: true,
                slow_query_threshold_ms: 100,
            },
            catalog: CatalogConfig {
                enabled: true,
                deferred: false,
                validate_queries: true,
            },
            idempotency: IdempotencyConfig {
                retention_secs: 60 * 60,
                max_entries: 10_000,
            },
            api: ApiConfig {
                port: 3000,
                enable_request_logging: true,
            },
        }
    }

    fn staging() -> Self {
        Self {
            environment: Environment::Staging,
            storage: StorageConfig {
                kind: StorageKind::Postgres,
                database_url: None,
                database_name: None,
            },
            filter: FilterConfig {
                max_limit: 500,
                default_limit: 50,
                max_nested_depth: 5,
                like_case_insensitive: true,
                debug_logging: false,
            },
            database: DatabaseConfig {
                max_connections: 20,
                connection_timeout: 10,
                enable_slow_query_warning: true,
                slow_query_threshold_ms: 500,
            },
            catalog: CatalogConfig {
                enabled: true,
                deferred: false,
                validate_queries: true,
            },
            idempotency: IdempotencyConfig {
                retention_secs: 6 * 60 * 60,
                max_entries: 50_000,
            },
            api: ApiConfig {
                port: 3000,
                enable_request_logging: true,
            },
        }
    }

    fn production() -> Self {
        Self {
            environment: Environment::Production,
            storage: StorageConfig {
                kind: StorageKind::Postgres,
                database_url: None,
                database_name: None,
            },
            filter: FilterConfig {
                max_limit: 100,
                default_limit: 20,
                max_nested_depth: 5,
                like_case_insensitive: true,
                debug_logging: false,
            },
            database: DatabaseConfig {
                max_connections: 50,
                connection_timeout: 5,
                enable_slow_query_warning: true,
                slow_query_threshold_ms: 1000,
            },
            catalog: CatalogConfig {
                enabled: true,
                deferred: true,
                validate_queries: true,
            },
            idempotency: IdempotencyConfig {
                retention_secs: 24 * 60 * 60,
                max_entries: 100_000,
            },
            api: ApiConfig {
                port: 3000,
                enable_request_logging: false,
            },
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::development()
    }
}

// Loaded from the environment on first access
pub static CONFIG: Lazy<AppConfig> = Lazy::new(AppConfig::from_env);

pub fn config() -> &'static AppConfig {
    &CONFIG
}
