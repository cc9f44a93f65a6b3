// Configuration handed to `TitleCore::init` by the host.
//
// The core never reads configuration files itself. The host's loader
// deserializes whatever format it favors (YAML, JSON, TOML) into these
// structs and passes them in once at startup.

use serde::Deserialize;
use std::time::Duration;

/// Which relational engine backs the title store.
///
/// Engine choice is resolved once at startup and never leaks past the
/// storage trait.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "engine", rename_all = "lowercase")]
pub enum StorageSettings {
    /// Embedded file-backed engine. The default; no external service needed.
    Sqlite(SqliteSettings),
    /// Networked engine shared by every server in a cluster.
    Mysql(MysqlSettings),
}

#[derive(Debug, Clone, Deserialize)]
pub struct SqliteSettings {
    /// Path to the database file. Created on first start.
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MysqlSettings {
    pub host: String,
    #[serde(default = "default_mysql_port")]
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
}

fn default_mysql_port() -> u16 {
    3306
}

/// Connection pool bounds shared by both engines.
#[derive(Debug, Clone, Deserialize)]
pub struct PoolSettings {
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Seconds to wait for a pooled connection before the operation fails
    /// instead of blocking without bound.
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
}

impl PoolSettings {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            acquire_timeout_secs: default_acquire_timeout_secs(),
        }
    }
}

fn default_max_connections() -> u32 {
    5
}

fn default_acquire_timeout_secs() -> u64 {
    10
}

/// One candidate currency backend.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProviderSettings {
    /// Wallet table owned by a companion currency plugin, reached through
    /// its database file.
    WalletDb { url: String },
    /// Remote economy service speaking JSON over HTTP.
    Http {
        base_url: String,
        #[serde(default)]
        api_token: Option<String>,
    },
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EconomySettings {
    /// Candidates in priority order; the first that initializes wins and the
    /// rest are never probed. Empty means purchases are rejected while
    /// administrative grants keep working.
    #[serde(default)]
    pub providers: Vec<ProviderSettings>,
}

/// Bounds for the worker pool behind the async execution boundary.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatcherSettings {
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Operations submitted beyond this are rejected immediately rather than
    /// queued without bound.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// How long `shutdown` waits for in-flight operations before abandoning
    /// them.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

impl DispatcherSettings {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

fn default_workers() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    256
}

fn default_shutdown_timeout_secs() -> u64 {
    10
}

/// Everything `TitleCore::init` needs, in one struct.
#[derive(Debug, Clone, Deserialize)]
pub struct CoreConfig {
    pub storage: StorageSettings,
    #[serde(default)]
    pub pool: PoolSettings,
    #[serde(default)]
    pub economy: EconomySettings,
    #[serde(default)]
    pub dispatcher: DispatcherSettings,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlite_config_with_defaults() {
        let raw = r#"
        {
            "storage": { "engine": "sqlite", "path": "data/titles.db" }
        }
        "#;
        let config: CoreConfig = serde_json::from_str(raw).unwrap();

        match config.storage {
            StorageSettings::Sqlite(ref s) => assert_eq!(s.path, "data/titles.db"),
            _ => panic!("expected sqlite storage"),
        }
        assert_eq!(config.pool.max_connections, 5);
        assert!(config.economy.providers.is_empty());
        assert_eq!(config.dispatcher.queue_capacity, 256);
    }

    #[test]
    fn test_mysql_config_with_provider_priority() {
        let raw = r#"
        {
            "storage": {
                "engine": "mysql",
                "host": "db.internal",
                "database": "titles",
                "username": "titles",
                "password": "hunter2"
            },
            "economy": {
                "providers": [
                    { "kind": "http", "base_url": "http://economy:8080" },
                    { "kind": "wallet_db", "url": "sqlite://wallets.db" }
                ]
            }
        }
        "#;
        let config: CoreConfig = serde_json::from_str(raw).unwrap();

        match config.storage {
            StorageSettings::Mysql(ref s) => {
                assert_eq!(s.port, 3306);
                assert_eq!(s.database, "titles");
            }
            _ => panic!("expected mysql storage"),
        }
        assert_eq!(config.economy.providers.len(), 2);
        match &config.economy.providers[0] {
            ProviderSettings::Http { base_url, api_token } => {
                assert_eq!(base_url, "http://economy:8080");
                assert!(api_token.is_none());
            }
            _ => panic!("expected http provider first"),
        }
    }
}
