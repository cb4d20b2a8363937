use alloy::primitives::Address;
use eyre::{eyre, Result, WrapErr};
use serde::Deserialize;
use std::env;
use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;

/// Default L1StandardBridge proxy
pub const DEFAULT_L1_BRIDGE_ADDRESS: &str = "0x54d6c1435ac7b90a5d46d01ee2f22ed6ff270ed3";
/// L2StandardBridge predeploy
pub const DEFAULT_L2_BRIDGE_ADDRESS: &str = "0x4200000000000000000000000000000000000010";

/// Main configuration for the reconciler
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub l1: ChainConfig,
    pub l2: ChainConfig,
    pub scan: ScanConfig,
    pub api: ApiConfig,
}

/// Database configuration
#[derive(Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

/// Custom Debug that redacts the database URL (may contain credentials).
impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &"<redacted>")
            .finish()
    }
}

/// One side of the bridge
#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    /// Execution-layer JSON-RPC endpoint
    pub rpc_url: String,
    pub bridge_address: String,
}

impl ChainConfig {
    pub fn bridge_address(&self) -> Result<Address> {
        Address::from_str(&self.bridge_address)
            .wrap_err_with(|| format!("Invalid bridge address {}", self.bridge_address))
    }
}

/// Backfill configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ScanConfig {
    /// Blocks per `eth_getLogs` request
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
}

/// Read-only HTTP API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_enabled")]
    pub enabled: bool,
    #[serde(default = "default_api_addr")]
    pub addr: String,
}

impl ApiConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        self.addr
            .parse()
            .wrap_err_with(|| format!("Invalid API_ADDR {}", self.addr))
    }
}

/// Default functions
fn default_database_url() -> String {
    "sqlite://bridge-reconciler.db".to_string()
}

fn default_chunk_size() -> u64 {
    10_000
}

fn default_api_enabled() -> bool {
    true
}

fn default_api_addr() -> String {
    "0.0.0.0:8085".to_string()
}

impl Config {
    /// Load configuration from environment variables
    /// Loads .env file if present, then reads from environment
    pub fn load() -> Result<Self> {
        Self::load_from_file(".env")
    }

    /// Load from a specific .env file path
    pub fn load_from_file(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            dotenvy::from_filename(path)
                .wrap_err_with(|| format!("Failed to load .env file from {}", path))?;
        }
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Build the configuration from a variable lookup
    pub fn from_vars<F>(var: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            var(key).ok_or_else(|| eyre!("{} environment variable is required", key))
        };

        let database = DatabaseConfig {
            url: var("DATABASE_URL").unwrap_or_else(default_database_url),
        };

        let l1 = ChainConfig {
            rpc_url: required("L1_EXECUTION_URL")?,
            bridge_address: var("L1_BRIDGE_ADDRESS")
                .unwrap_or_else(|| DEFAULT_L1_BRIDGE_ADDRESS.to_string()),
        };

        let l2 = ChainConfig {
            rpc_url: required("L2_EXECUTION_URL")?,
            bridge_address: var("L2_BRIDGE_ADDRESS")
                .unwrap_or_else(|| DEFAULT_L2_BRIDGE_ADDRESS.to_string()),
        };

        let scan = ScanConfig {
            chunk_size: match var("CHUNK_SIZE") {
                Some(v) => v.parse().wrap_err("CHUNK_SIZE must be a valid u64")?,
                None => default_chunk_size(),
            },
        };

        let api = ApiConfig {
            enabled: var("API_ENABLED")
                .and_then(|v| v.parse().ok())
                .unwrap_or(default_api_enabled()),
            addr: var("API_ADDR").unwrap_or_else(default_api_addr),
        };

        let config = Config {
            database,
            l1,
            l2,
            scan,
            api,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        if self.database.url.is_empty() {
            return Err(eyre!("database.url cannot be empty"));
        }

        if self.l1.rpc_url.is_empty() {
            return Err(eyre!("l1.rpc_url cannot be empty"));
        }

        if self.l2.rpc_url.is_empty() {
            return Err(eyre!("l2.rpc_url cannot be empty"));
        }

        for (name, chain) in [("l1", &self.l1), ("l2", &self.l2)] {
            if chain.bridge_address.len() != 42 || !chain.bridge_address.starts_with("0x") {
                return Err(eyre!(
                    "{}.bridge_address must be a valid hex address (42 chars with 0x prefix)",
                    name
                ));
            }
            chain.bridge_address()?;
        }

        if self.scan.chunk_size == 0 {
            return Err(eyre!("scan.chunk_size must be greater than zero"));
        }

        if self.api.enabled {
            self.api.socket_addr()?;
        }

        Ok(())
    }
}
