//! Chain parameters for Etchash networks.
//!
//! Fork transitions, the monetary era length and the difficulty ruleset are
//! fixed per network and never change at runtime.
//! - `ChainParams::classic()` and `ChainParams::mordor()` for the public networks
//! - `ChainParams::from_config()` for private networks and overrides
//!
//! A broken configuration is rejected when the params are built, never
//! lazily while processing blocks.

use crate::params::{
    CLASSIC_ECIP1099_BLOCK, CLASSIC_ERA_LENGTH, MORDOR_ECIP1099_BLOCK, MORDOR_ERA_LENGTH,
};
use num_bigint::BigUint;
use num_traits::Zero;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default difficulty bound divisor (2048).
pub const DEFAULT_DIFFICULTY_BOUND_DIVISOR: u64 = 2048;

/// Default lower bound for any block's difficulty (131072).
pub const DEFAULT_MINIMUM_DIFFICULTY: u64 = 131_072;

/// Error when constructing ChainParams from configuration.
#[derive(Debug, Clone)]
pub struct ChainParamsError {
    /// The field that is missing or invalid.
    pub field: &'static str,
    /// Description of the error.
    pub message: String,
}

impl fmt::Display for ChainParamsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChainParams error for '{}': {}", self.field, self.message)
    }
}

impl std::error::Error for ChainParamsError {}

impl ChainParamsError {
    fn missing(field: &'static str) -> Self {
        Self {
            field,
            message: "required field missing".to_string(),
        }
    }
}

/// Configuration for loading ChainParams from TOML.
///
/// All fields are optional so partial configs can be validated with clear errors.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainParamsConfig {
    /// Blocks per monetary era.
    pub era_length: Option<u64>,
    /// ECIP-1099 epoch-doubling transition block.
    pub ecip1099_block: Option<u64>,
    /// DieHard (bomb pause) activation block.
    pub die_hard_block: Option<u64>,
    /// Gotham (bomb delay) activation block.
    pub gotham_block: Option<u64>,
    /// ECIP-1041 (bomb removal) activation block.
    pub ecip1041_block: Option<u64>,
    /// Block from which the 13 second duration limit applies.
    pub frontier_block: Option<u64>,
    /// Homestead (EIP-2) difficulty formula activation block.
    pub eip2_block: Option<u64>,
    /// Uncle-aware (EIP-100) difficulty formula activation block.
    pub eip100_block: Option<u64>,
    /// Difficulty bound divisor, defaults to 2048.
    pub difficulty_bound_divisor: Option<u64>,
    /// Minimum difficulty, defaults to 131072.
    pub minimum_difficulty: Option<u64>,
    /// Genesis difficulty as hex string, optional `0x` prefix.
    pub genesis_difficulty_hex: Option<String>,
    /// Fixed difficulty for every non-genesis block (development chains).
    pub fixed_difficulty_hex: Option<String>,
}

/// Network-specific consensus parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainParams {
    /// Blocks per monetary era (era 0 spans blocks 1..=era_length).
    pub era_length: u64,

    /// ECIP-1099 transition: from this block epochs are 60000 blocks long.
    pub ecip1099_block: u64,

    /// DieHard: bomb frozen from this block. `None` means the chain never had a bomb.
    pub die_hard_block: Option<u64>,

    /// Gotham: bomb resumes, delayed by the DieHard pause length.
    pub gotham_block: Option<u64>,

    /// ECIP-1041: bomb removed from this block on.
    pub ecip1041_block: Option<u64>,

    /// Post-Olympic duration limit (13 s) from this block; 7 s before it.
    pub frontier_block: Option<u64>,

    /// EIP-2 difficulty formula from this block.
    pub eip2_block: Option<u64>,

    /// EIP-100 difficulty formula from this block.
    pub eip100_block: Option<u64>,

    /// Divisor applied to the parent difficulty for each adjustment step.
    pub difficulty_bound_divisor: u64,

    /// Floor for every computed difficulty.
    pub minimum_difficulty: BigUint,

    genesis_difficulty: BigUint,

    fixed_difficulty: Option<BigUint>,
}

impl ChainParams {
    /// Ethereum Classic mainnet.
    pub fn classic() -> Self {
        Self {
            era_length: CLASSIC_ERA_LENGTH,
            ecip1099_block: CLASSIC_ECIP1099_BLOCK,
            die_hard_block: Some(3_000_000),
            gotham_block: Some(5_000_000),
            ecip1041_block: Some(5_900_000),
            frontier_block: Some(0),
            eip2_block: Some(1_150_000),
            eip100_block: Some(8_772_000),
            difficulty_bound_divisor: DEFAULT_DIFFICULTY_BOUND_DIVISOR,
            minimum_difficulty: BigUint::from(DEFAULT_MINIMUM_DIFFICULTY),
            genesis_difficulty: BigUint::from(0x4_0000_0000u64),
            fixed_difficulty: None,
        }
    }

    /// Mordor testnet. No difficulty bomb ever existed on this chain.
    pub fn mordor() -> Self {
        Self {
            era_length: MORDOR_ERA_LENGTH,
            ecip1099_block: MORDOR_ECIP1099_BLOCK,
            die_hard_block: None,
            gotham_block: None,
            ecip1041_block: None,
            frontier_block: Some(0),
            eip2_block: Some(0),
            eip100_block: Some(0),
            difficulty_bound_divisor: DEFAULT_DIFFICULTY_BOUND_DIVISOR,
            minimum_difficulty: BigUint::from(DEFAULT_MINIMUM_DIFFICULTY),
            genesis_difficulty: BigUint::from(0x2_0000u64),
            fixed_difficulty: None,
        }
    }

    /// Look up a preset by network name.
    pub fn for_network(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "classic" | "mainnet" | "etc" => Some(Self::classic()),
            "mordor" => Some(Self::mordor()),
            _ => None,
        }
    }

    /// Create ChainParams from configuration.
    ///
    /// Returns an error naming the specific field if any required field is missing or invalid.
    pub fn from_config(config: &ChainParamsConfig) -> Result<Self, ChainParamsError> {
        let era_length = config
            .era_length
            .ok_or_else(|| ChainParamsError::missing("era_length"))?;
        if era_length == 0 {
            return Err(ChainParamsError {
                field: "era_length",
                message: "era length must be positive".to_string(),
            });
        }

        let ecip1099_block = config
            .ecip1099_block
            .ok_or_else(|| ChainParamsError::missing("ecip1099_block"))?;

        match (config.die_hard_block, config.gotham_block) {
            (None, Some(_)) => {
                return Err(ChainParamsError {
                    field: "gotham_block",
                    message: "gotham requires die_hard_block".to_string(),
                })
            }
            (Some(die_hard), Some(gotham)) if gotham < die_hard => {
                return Err(ChainParamsError {
                    field: "gotham_block",
                    message: format!("gotham ({gotham}) precedes die hard ({die_hard})"),
                })
            }
            _ => {}
        }

        let difficulty_bound_divisor = config
            .difficulty_bound_divisor
            .unwrap_or(DEFAULT_DIFFICULTY_BOUND_DIVISOR);
        if difficulty_bound_divisor == 0 {
            return Err(ChainParamsError {
                field: "difficulty_bound_divisor",
                message: "divisor cannot be zero".to_string(),
            });
        }

        let genesis_hex = config
            .genesis_difficulty_hex
            .as_ref()
            .ok_or_else(|| ChainParamsError::missing("genesis_difficulty_hex"))?;
        let genesis_difficulty = parse_difficulty_hex("genesis_difficulty_hex", genesis_hex)?;

        let fixed_difficulty = config
            .fixed_difficulty_hex
            .as_ref()
            .map(|hex| parse_difficulty_hex("fixed_difficulty_hex", hex))
            .transpose()?;

        Ok(Self {
            era_length,
            ecip1099_block,
            die_hard_block: config.die_hard_block,
            gotham_block: config.gotham_block,
            ecip1041_block: config.ecip1041_block,
            frontier_block: config.frontier_block,
            eip2_block: config.eip2_block,
            eip100_block: config.eip100_block,
            difficulty_bound_divisor,
            minimum_difficulty: BigUint::from(
                config.minimum_difficulty.unwrap_or(DEFAULT_MINIMUM_DIFFICULTY),
            ),
            genesis_difficulty,
            fixed_difficulty,
        })
    }

    /// Render these params back into a config (used to write default files).
    pub fn to_config(&self) -> ChainParamsConfig {
        ChainParamsConfig {
            era_length: Some(self.era_length),
            ecip1099_block: Some(self.ecip1099_block),
            die_hard_block: self.die_hard_block,
            gotham_block: self.gotham_block,
            ecip1041_block: self.ecip1041_block,
            frontier_block: self.frontier_block,
            eip2_block: self.eip2_block,
            eip100_block: self.eip100_block,
            difficulty_bound_divisor: Some(self.difficulty_bound_divisor),
            minimum_difficulty: u64::try_from(&self.minimum_difficulty).ok(),
            genesis_difficulty_hex: Some(format!("0x{}", self.genesis_difficulty.to_str_radix(16))),
            fixed_difficulty_hex: self
                .fixed_difficulty
                .as_ref()
                .map(|d| format!("0x{}", d.to_str_radix(16))),
        }
    }

    /// Difficulty of the genesis block.
    pub fn genesis_difficulty(&self) -> &BigUint {
        &self.genesis_difficulty
    }

    /// Fixed difficulty for non-genesis blocks, if the chain uses one.
    pub fn fixed_difficulty(&self) -> Option<&BigUint> {
        self.fixed_difficulty.as_ref()
    }

    /// Whether ECIP-1099 epoch doubling is active at `block`.
    pub fn is_ecip1099_active(&self, block: u64) -> bool {
        block >= self.ecip1099_block
    }
}

fn parse_difficulty_hex(field: &'static str, raw: &str) -> Result<BigUint, ChainParamsError> {
    // Hex hygiene: trim whitespace and strip optional 0x prefix
    let cleaned = raw.trim();
    let cleaned = cleaned
        .strip_prefix("0x")
        .or_else(|| cleaned.strip_prefix("0X"))
        .unwrap_or(cleaned);

    let value = BigUint::parse_bytes(cleaned.as_bytes(), 16).ok_or_else(|| ChainParamsError {
        field,
        message: format!("invalid hex string: '{}'", raw),
    })?;

    if value.is_zero() {
        return Err(ChainParamsError {
            field,
            message: "difficulty cannot be zero".to_string(),
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_config() -> ChainParamsConfig {
        ChainParams::classic().to_config()
    }

    #[test]
    fn test_classic_params() {
        let params = ChainParams::classic();
        assert_eq!(params.era_length, 5_000_000);
        assert_eq!(params.ecip1099_block, 11_700_000);
        assert_eq!(params.die_hard_block, Some(3_000_000));
        assert_eq!(params.gotham_block, Some(5_000_000));
        assert_eq!(params.ecip1041_block, Some(5_900_000));
        assert_eq!(params.genesis_difficulty(), &BigUint::from(17_179_869_184u64));
    }

    #[test]
    fn test_mordor_has_no_bomb() {
        let params = ChainParams::mordor();
        assert_eq!(params.era_length, 2_000_000);
        assert!(params.die_hard_block.is_none());
        assert!(params.gotham_block.is_none());
        assert!(params.ecip1041_block.is_none());
    }

    #[test]
    fn test_config_roundtrip_preserves_params() {
        let params = ChainParams::classic();
        let rebuilt = ChainParams::from_config(&params.to_config()).unwrap();
        assert_eq!(params, rebuilt);
    }

    #[test]
    fn test_from_config_missing_field_returns_error() {
        let config = ChainParamsConfig {
            era_length: Some(5_000_000),
            ..Default::default()
        };

        let err = ChainParams::from_config(&config).unwrap_err();
        assert_eq!(err.field, "ecip1099_block");
    }

    #[test]
    fn test_from_config_rejects_zero_era_length() {
        let config = ChainParamsConfig {
            era_length: Some(0),
            ..full_config()
        };
        let err = ChainParams::from_config(&config).unwrap_err();
        assert_eq!(err.field, "era_length");
    }

    #[test]
    fn test_from_config_rejects_gotham_without_die_hard() {
        let config = ChainParamsConfig {
            die_hard_block: None,
            ..full_config()
        };
        let err = ChainParams::from_config(&config).unwrap_err();
        assert_eq!(err.field, "gotham_block");
    }

    #[test]
    fn test_from_config_hex_hygiene() {
        let config = ChainParamsConfig {
            genesis_difficulty_hex: Some("  0X20000 ".to_string()),
            ..full_config()
        };
        let params = ChainParams::from_config(&config).unwrap();
        assert_eq!(params.genesis_difficulty(), &BigUint::from(131_072u32));
    }

    #[test]
    fn test_from_config_rejects_zero_difficulty() {
        let config = ChainParamsConfig {
            genesis_difficulty_hex: Some("0x0".to_string()),
            ..full_config()
        };
        assert!(ChainParams::from_config(&config).is_err());
    }

    #[test]
    fn test_for_network() {
        assert_eq!(ChainParams::for_network("Mordor"), Some(ChainParams::mordor()));
        assert_eq!(ChainParams::for_network("classic"), Some(ChainParams::classic()));
        assert!(ChainParams::for_network("ropsten").is_none());
    }
}
