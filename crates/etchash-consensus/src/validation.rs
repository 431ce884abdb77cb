//! Header seal and header-chain validation.

use crate::cache::EpochCache;
use crate::chain_params::{ChainParams, ChainParamsError};
use crate::difficulty::DifficultyCalculator;
use crate::ethash::{hashimoto, meets_target, target_for, HashimotoOutput};
use crate::header::BlockHeader;
use crate::params::MAX_EXTRA_DATA_SIZE;
use crate::{ConsensusError, ConsensusResult};
use num_traits::Zero;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Ethash seal checks backed by a shared working-set cache.
#[derive(Clone)]
pub struct EthashVerifier {
    cache: Arc<EpochCache>,
}

impl EthashVerifier {
    /// Create a verifier over `cache`.
    pub fn new(cache: Arc<EpochCache>) -> Self {
        Self { cache }
    }

    /// The working-set cache.
    pub fn cache(&self) -> &Arc<EpochCache> {
        &self.cache
    }

    fn run(&self, header: &BlockHeader) -> ConsensusResult<HashimotoOutput> {
        let working_set = self.cache.get(header.number)?;
        Ok(hashimoto(
            working_set.size(),
            &working_set,
            &header.pow_hash(),
            Some(&header.mix_digest),
            header.nonce,
        ))
    }

    /// Whether the header's mix digest matches the one recomputed from its
    /// nonce.
    ///
    /// A working set that cannot be produced fails the header instead of
    /// raising.
    pub fn validate(&self, header: &BlockHeader) -> bool {
        match self.run(header) {
            Ok(output) => output.valid,
            Err(e) => {
                warn!(number = header.number, "Seal check skipped: {}", e);
                false
            }
        }
    }

    /// Full seal check: mix digest and difficulty target.
    ///
    /// A zero difficulty has no meaningful target and is rejected outright.
    #[instrument(skip(self, header), fields(number = header.number))]
    pub fn verify_seal(&self, header: &BlockHeader) -> ConsensusResult<()> {
        if header.difficulty.is_zero() {
            return Err(ConsensusError::InvalidDifficulty {
                got: "0".to_string(),
                expected: "a positive difficulty".to_string(),
            });
        }

        let output = self.run(header)?;

        if !output.valid {
            return Err(ConsensusError::InvalidMixDigest {
                number: header.number,
                got: hex::encode(header.mix_digest),
                expected: hex::encode(output.mix_digest),
            });
        }

        if !meets_target(&output.result, &target_for(&header.difficulty)) {
            return Err(ConsensusError::InsufficientWork {
                number: header.number,
                digest: hex::encode(output.result),
            });
        }

        debug!("Seal valid");
        Ok(())
    }
}

/// Header validation trait.
pub trait HeaderValidator {
    /// Validate a header against its parent.
    fn validate_header(&self, header: &BlockHeader, parent: &BlockHeader) -> ConsensusResult<()>;
}

/// Validates linkage, timestamp, difficulty and seal of Ethash headers.
pub struct EthashHeaderValidator {
    params: ChainParams,
    verifier: EthashVerifier,
}

impl EthashHeaderValidator {
    /// Create a validator for a chain.
    ///
    /// The verifier's epoch schedule must switch epoch length at the chain's
    /// ECIP-1099 block.
    pub fn new(params: ChainParams, verifier: EthashVerifier) -> ConsensusResult<Self> {
        let transition = verifier.cache().schedule().transition_block();
        if transition != params.ecip1099_block {
            return Err(ChainParamsError {
                field: "ecip1099_block",
                message: format!(
                    "chain transitions at {} but the epoch cache at {}",
                    params.ecip1099_block, transition
                ),
            }
            .into());
        }
        Ok(Self { params, verifier })
    }

    /// Chain parameters in use.
    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    /// Check the declared difficulty against the parent.
    pub fn validate_difficulty(
        &self,
        header: &BlockHeader,
        parent: &BlockHeader,
    ) -> ConsensusResult<()> {
        DifficultyCalculator::new(&self.params).validate(header, parent)
    }
}

impl HeaderValidator for EthashHeaderValidator {
    #[instrument(skip(self, header, parent), fields(number = header.number))]
    fn validate_header(&self, header: &BlockHeader, parent: &BlockHeader) -> ConsensusResult<()> {
        if header.number != parent.number + 1 {
            return Err(ConsensusError::InvalidHeader(format!(
                "number {} does not follow parent {}",
                header.number, parent.number
            )));
        }

        if header.parent_hash != parent.hash() {
            return Err(ConsensusError::InvalidHeader(format!(
                "parent hash {} does not match parent {}",
                hex::encode(header.parent_hash),
                hex::encode(parent.hash())
            )));
        }

        if header.timestamp <= parent.timestamp {
            return Err(ConsensusError::InvalidTimestamp {
                block_time: header.timestamp,
                parent_time: parent.timestamp,
            });
        }

        if header.extra_data.len() > MAX_EXTRA_DATA_SIZE {
            return Err(ConsensusError::InvalidHeader(format!(
                "extra data too long: {} > {}",
                header.extra_data.len(),
                MAX_EXTRA_DATA_SIZE
            )));
        }

        self.validate_difficulty(header, parent)?;
        self.verifier.verify_seal(header)
    }
}
