//! Tool configuration.

use crate::Args;
use anyhow::{anyhow, Context, Result};
use etchash_chain::FinalityConfig;
use etchash_consensus::{ChainParams, ChainParamsConfig};
use etchash_mining::MinerConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Complete configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliConfig {
    /// Network preset (classic, mordor).
    pub network: String,
    /// Chain parameters; the network preset is used when absent.
    #[serde(default)]
    pub chain: Option<ChainParamsConfig>,
    /// Mining configuration.
    #[serde(default)]
    pub mining: MiningSection,
    /// Artificial finality configuration.
    #[serde(default)]
    pub finality: FinalitySection,
}

/// Mining configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MiningSection {
    /// Use internal CPU mining.
    #[serde(default = "default_true")]
    pub internal: bool,
    /// Hand out work to external miners.
    #[serde(default)]
    pub external: bool,
    /// Number of mining threads (0 = one per CPU).
    #[serde(default)]
    pub threads: usize,
}

fn default_true() -> bool {
    true
}

impl Default for MiningSection {
    fn default() -> Self {
        Self {
            internal: true,
            external: false,
            threads: 0,
        }
    }
}

/// Artificial finality configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FinalitySection {
    /// Peers required for the reorg guard to be on.
    pub min_peers: usize,
    /// Head older than this many seconds turns the guard off.
    pub max_head_age_secs: u64,
    /// Seconds between checks.
    pub poll_interval_secs: u64,
}

impl Default for FinalitySection {
    fn default() -> Self {
        let defaults = FinalityConfig::default();
        Self {
            min_peers: defaults.min_peers,
            max_head_age_secs: defaults.max_head_age.as_secs(),
            poll_interval_secs: defaults.poll_interval.as_secs(),
        }
    }
}

impl CliConfig {
    /// Load configuration from file and CLI args.
    pub fn load(config_path: &Path, args: &Args) -> Result<Self> {
        let mut config = if config_path.exists() {
            let content =
                std::fs::read_to_string(config_path).context("Failed to read config file")?;
            toml::from_str(&content).context("Failed to parse config file")?
        } else {
            Self::default_for_network(args.network.as_deref().unwrap_or("classic"))
        };

        if let Some(ref network) = args.network {
            config.network = network.clone();
        }
        if let Some(threads) = args.threads {
            config.mining.threads = threads;
        }

        Ok(config)
    }

    /// Create default config for a network.
    pub fn default_for_network(network: &str) -> Self {
        Self {
            network: network.to_string(),
            chain: None,
            mining: MiningSection::default(),
            finality: FinalitySection::default(),
        }
    }

    /// Resolve chain parameters, validating any explicit `[chain]` section.
    pub fn chain_params(&self) -> Result<ChainParams> {
        match &self.chain {
            Some(chain) => ChainParams::from_config(chain)
                .with_context(|| format!("Invalid [chain] section for {}", self.network)),
            None => ChainParams::for_network(&self.network)
                .ok_or_else(|| anyhow!("Unknown network '{}'", self.network)),
        }
    }

    /// Miner settings.
    pub fn miner_config(&self) -> MinerConfig {
        let threads = match self.mining.threads {
            0 => std::thread::available_parallelism().map_or(1, |n| n.get()),
            n => n,
        };
        MinerConfig {
            internal_mining: self.mining.internal,
            external_mining: self.mining.external,
            threads,
        }
    }

    /// Finality monitor settings.
    pub fn finality_config(&self) -> FinalityConfig {
        FinalityConfig {
            min_peers: self.finality.min_peers,
            max_head_age: Duration::from_secs(self.finality.max_head_age_secs),
            poll_interval: Duration::from_secs(self.finality.poll_interval_secs.max(1)),
        }
    }

    /// Save configuration to file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use tempfile::TempDir;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["etchash"];
        argv.extend_from_slice(extra);
        argv.extend_from_slice(&["info", "0"]);
        Args::parse_from(argv)
    }

    #[test]
    fn test_default_config() {
        let config = CliConfig::default_for_network("classic");
        assert_eq!(config.network, "classic");
        assert_eq!(config.chain_params().unwrap(), ChainParams::classic());
        assert!(config.mining.internal);
    }

    #[test]
    fn test_missing_file_uses_network_preset() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("missing.toml");
        let config = CliConfig::load(&path, &args(&["--network", "mordor"])).unwrap();
        assert_eq!(config.chain_params().unwrap(), ChainParams::mordor());
    }

    #[test]
    fn test_unknown_network_rejected() {
        let config = CliConfig::default_for_network("ropsten");
        assert!(config.chain_params().is_err());
    }

    #[test]
    fn test_file_with_chain_section() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("etchash.toml");
        std::fs::write(
            &path,
            r#"
network = "devnet"

[chain]
era_length = 100
ecip1099_block = 0
genesis_difficulty_hex = "0x20000"
fixed_difficulty_hex = "0x1"

[mining]
threads = 3

[finality]
min_peers = 2
"#,
        )
        .unwrap();

        let config = CliConfig::load(&path, &args(&[])).unwrap();
        let params = config.chain_params().unwrap();
        assert_eq!(params.era_length, 100);
        assert_eq!(params.fixed_difficulty().map(|d| d.to_string()), Some("1".to_string()));
        assert_eq!(config.miner_config().threads, 3);
        assert_eq!(config.finality_config().min_peers, 2);
        assert_eq!(config.finality.max_head_age_secs, 600);
    }

    #[test]
    fn test_invalid_chain_section_fails_fast() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("etchash.toml");
        std::fs::write(&path, "network = \"devnet\"\n[chain]\nera_length = 0\n").unwrap();

        let config = CliConfig::load(&path, &args(&[])).unwrap();
        let err = config.chain_params().unwrap_err();
        assert!(format!("{:#}", err).contains("era_length"));
    }

    #[test]
    fn test_cli_overrides() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("etchash.toml");
        CliConfig::default_for_network("classic").save(&path).unwrap();

        let config = CliConfig::load(&path, &args(&["--network", "mordor", "--threads", "7"])).unwrap();
        assert_eq!(config.network, "mordor");
        assert_eq!(config.mining.threads, 7);
    }

    #[test]
    fn test_save_round_trip_with_chain() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("etchash.toml");
        let mut config = CliConfig::default_for_network("mordor");
        config.chain = Some(ChainParams::mordor().to_config());
        config.save(&path).unwrap();

        let loaded = CliConfig::load(&path, &args(&[])).unwrap();
        assert_eq!(loaded.chain_params().unwrap(), ChainParams::mordor());
    }
}
