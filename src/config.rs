use crate::compile::CompileSettings;
use crate::domain::{Address, Network};
use std::collections::HashMap;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_path: String,
    pub networks: Vec<Network>,
    /// Fallback price API queried when the price store has no usable price.
    pub price_api_url: Option<String>,
    pub fanout_workers: usize,
    pub run_interval_secs: u64,
    pub report_proximity_blocks: i64,
    pub vault_cache_capacity: usize,
    /// Staking contracts per network. Share transfers to or from them are
    /// not tracked.
    pub rewarders: HashMap<Network, Vec<Address>>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let port = parse_or(&env_map, "PORT", 8080u16, "must be a valid u16")?;

        let database_path = env_map
            .get("DATABASE_PATH")
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnv("DATABASE_PATH".to_string()))?;

        let networks = parse_networks(
            env_map
                .get("NETWORKS")
                .map(|s| s.as_str())
                .unwrap_or("ethereum"),
        )?;

        let price_api_url = env_map
            .get("PRICE_API_URL")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let fanout_workers: usize =
            parse_or(&env_map, "FANOUT_WORKERS", 8, "must be a positive integer")?;
        if fanout_workers == 0 {
            return Err(ConfigError::InvalidValue(
                "FANOUT_WORKERS".to_string(),
                "must be a positive integer".to_string(),
            ));
        }

        let run_interval_secs =
            parse_or(&env_map, "RUN_INTERVAL_SECS", 600u64, "must be a valid u64")?;
        let report_proximity_blocks =
            parse_or(&env_map, "REPORT_PROXIMITY_BLOCKS", 30i64, "must be a valid i64")?;
        let vault_cache_capacity =
            parse_or(&env_map, "VAULT_CACHE_CAPACITY", 4096usize, "must be a valid usize")?;

        let rewarders = match env_map.get("REWARDERS") {
            Some(raw) => parse_rewarders(raw)?,
            None => HashMap::new(),
        };

        Ok(Config {
            port,
            database_path,
            networks,
            price_api_url,
            fanout_workers,
            run_interval_secs,
            report_proximity_blocks,
            vault_cache_capacity,
            rewarders,
        })
    }

    pub fn compile_settings(&self) -> CompileSettings {
        CompileSettings {
            fanout_workers: self.fanout_workers,
            report_proximity_blocks: self.report_proximity_blocks,
        }
    }
}

fn parse_or<T: FromStr>(
    env_map: &HashMap<String, String>,
    key: &str,
    default: T,
    expected: &str,
) -> Result<T, ConfigError> {
    match env_map.get(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidValue(key.to_string(), expected.to_string())),
        None => Ok(default),
    }
}

fn parse_networks(raw: &str) -> Result<Vec<Network>, ConfigError> {
    let networks = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            Network::from_str(s).map_err(|e| ConfigError::InvalidValue("NETWORKS".to_string(), e))
        })
        .collect::<Result<Vec<_>, _>>()?;
    if networks.is_empty() {
        return Err(ConfigError::InvalidValue(
            "NETWORKS".to_string(),
            "at least one network is required".to_string(),
        ));
    }
    Ok(networks)
}

/// Parse `network=0xa|0xb;network2=0xc`.
fn parse_rewarders(raw: &str) -> Result<HashMap<Network, Vec<Address>>, ConfigError> {
    let invalid = |msg: String| ConfigError::InvalidValue("REWARDERS".to_string(), msg);
    let mut rewarders: HashMap<Network, Vec<Address>> = HashMap::new();

    for entry in raw.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        let (network, addresses) = entry
            .split_once('=')
            .ok_or_else(|| invalid(format!("expected network=addresses, got {}", entry)))?;
        let network = Network::from_str(network.trim()).map_err(invalid)?;
        for address in addresses.split('|').map(str::trim).filter(|s| !s.is_empty()) {
            let address = Address::from_str(address).map_err(|e| invalid(e.to_string()))?;
            rewarders.entry(network).or_default().push(address);
        }
    }
    Ok(rewarders)
}
