//! Daemon configuration.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{DaemonError, DaemonResult};

// =============================================================================
// Configuration
// =============================================================================

/// Daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Durable store configuration
    pub store: StoreConfig,

    /// Exchange boundary configuration
    pub exchange: ExchangeConfig,

    /// Reconciliation cadence and tuning
    pub reconcile: ReconcileSettings,

    /// Worker tick cadence
    pub worker: WorkerSettings,

    /// Environment (test, development, production)
    pub environment: Environment,
}

/// Durable store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Path to the database file
    pub path: PathBuf,
    /// Connection pool bound
    pub max_connections: u32,
}

/// Exchange boundary configuration.
#[derive(Debug, Clone)]
pub struct ExchangeConfig {
    /// Process-wide request budget per second
    pub requests_per_second: usize,
    /// Venue API key (production only)
    pub api_key: Option<String>,
    /// Venue API secret (production only)
    pub api_secret: Option<String>,
}

/// Reconciliation settings.
#[derive(Debug, Clone)]
pub struct ReconcileSettings {
    /// How often to re-run reconciliation after startup
    pub interval: Duration,
    /// Consecutive missing snapshots before a phantom close
    pub phantom_confirmations: u32,
}

/// Worker settings.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Interval between strategy ticks
    pub tick_interval: Duration,
}

/// Environment type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// Test environment (uses the stub venue)
    Test,
    /// Development environment (stub venue)
    Development,
    /// Production environment (real venue, credentials required)
    Production,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> DaemonResult<Self> {
        // Load .env file if present (ignore errors)
        let _ = dotenvy::dotenv();

        let environment = Self::load_environment()?;

        let store = StoreConfig {
            path: PathBuf::from(
                env::var("KEEPER_DB_PATH").unwrap_or_else(|_| "keeper.db".to_string()),
            ),
            max_connections: Self::load_u32("KEEPER_DB_MAX_CONNECTIONS", 8)?,
        };

        let exchange = ExchangeConfig {
            requests_per_second: Self::load_u32("KEEPER_REQUESTS_PER_SECOND", 10)? as usize,
            api_key: env::var("KEEPER_BINANCE_API_KEY").ok(),
            api_secret: env::var("KEEPER_BINANCE_API_SECRET").ok(),
        };

        let reconcile = ReconcileSettings {
            interval: Duration::from_secs(Self::load_u32("KEEPER_RECONCILE_INTERVAL_SECS", 300)? as u64),
            phantom_confirmations: Self::load_u32("KEEPER_PHANTOM_CONFIRMATIONS", 2)?,
        };

        let worker = WorkerSettings {
            tick_interval: Duration::from_millis(Self::load_u32("KEEPER_TICK_INTERVAL_MS", 1000)? as u64),
        };

        Ok(Self { store, exchange, reconcile, worker, environment })
    }

    /// Create test configuration over the given database path.
    pub fn test(db_path: impl Into<PathBuf>) -> Self {
        Self {
            store: StoreConfig { path: db_path.into(), max_connections: 4 },
            exchange: ExchangeConfig {
                requests_per_second: 100,
                api_key: None,
                api_secret: None,
            },
            reconcile: ReconcileSettings {
                interval: Duration::from_secs(60),
                phantom_confirmations: 1,
            },
            worker: WorkerSettings { tick_interval: Duration::from_millis(10) },
            environment: Environment::Test,
        }
    }

    fn load_environment() -> DaemonResult<Environment> {
        let env_str = env::var("KEEPER_ENV").unwrap_or_else(|_| "development".to_string());

        match env_str.to_lowercase().as_str() {
            "test" => Ok(Environment::Test),
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(DaemonError::Config(format!(
                "Invalid KEEPER_ENV: {}. Expected: test, development, production",
                other
            ))),
        }
    }

    fn load_u32(key: &str, default: u32) -> DaemonResult<u32> {
        match env::var(key) {
            Ok(val) => val
                .parse::<u32>()
                .map_err(|_| DaemonError::Config(format!("Invalid {} value: {}", key, val))),
            Err(_) => Ok(default),
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Test => write!(f, "test"),
            Environment::Development => write!(f, "development"),
            Environment::Production => write!(f, "production"),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_test_config() {
        let config = Config::test("/tmp/test.db");

        assert_eq!(config.environment, Environment::Test);
        assert_eq!(config.reconcile.phantom_confirmations, 1);
        assert_eq!(config.store.max_connections, 4);
    }

    #[test]
    fn test_environment_display() {
        assert_eq!(Environment::Test.to_string(), "test");
        assert_eq!(Environment::Development.to_string(), "development");
        assert_eq!(Environment::Production.to_string(), "production");
    }
}
