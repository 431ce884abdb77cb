//! Block header model consumed by the consensus rules.
//!
//! Headers are owned by the storage layer; this crate only reads them. The
//! byte encoding below is the one hashed for the PoW seal: it is not a wire
//! or storage format.

use num_bigint::BigUint;
use sha3::{Digest, Keccak256};
use std::fmt;

/// 32-byte hash.
pub type H256 = [u8; 32];

/// 20-byte account address.
pub type Address = [u8; 20];

/// The all-zero hash.
pub const ZERO_HASH: H256 = [0u8; 32];

/// A block header.
#[derive(Clone, PartialEq, Eq)]
pub struct BlockHeader {
    /// Block number (height). Genesis is 0.
    pub number: u64,
    /// Block timestamp in seconds.
    pub timestamp: u64,
    /// Hash of the parent header.
    pub parent_hash: H256,
    /// Required difficulty.
    pub difficulty: BigUint,
    /// Accumulated difficulty up to and including this block, if known.
    pub total_difficulty: Option<BigUint>,
    /// Reward recipient.
    pub beneficiary: Address,
    /// PoW nonce.
    pub nonce: u64,
    /// PoW mix digest.
    pub mix_digest: H256,
    /// Hash of the uncle list.
    pub uncles_hash: H256,
    /// Arbitrary miner data.
    pub extra_data: Vec<u8>,
    /// Included uncle headers.
    pub uncles: Vec<BlockHeader>,
}

impl Default for BlockHeader {
    fn default() -> Self {
        Self {
            number: 0,
            timestamp: 0,
            parent_hash: ZERO_HASH,
            difficulty: BigUint::from(0u32),
            total_difficulty: None,
            beneficiary: [0u8; 20],
            nonce: 0,
            mix_digest: ZERO_HASH,
            uncles_hash: ZERO_HASH,
            extra_data: Vec::new(),
            uncles: Vec::new(),
        }
    }
}

impl fmt::Debug for BlockHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockHeader")
            .field("number", &self.number)
            .field("timestamp", &self.timestamp)
            .field("parent_hash", &hex::encode(self.parent_hash))
            .field("difficulty", &self.difficulty)
            .field("total_difficulty", &self.total_difficulty)
            .field("beneficiary", &hex::encode(self.beneficiary))
            .field("nonce", &format_args!("{:#018x}", self.nonce))
            .field("mix_digest", &hex::encode(self.mix_digest))
            .field("uncles", &self.uncles.len())
            .finish()
    }
}

impl BlockHeader {
    /// Whether this is the genesis header.
    pub fn is_genesis(&self) -> bool {
        self.number == 0
    }

    /// Serialize the header fields covered by the PoW seal.
    fn encode_unsealed(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(32 + 32 + 20 + 32 + 8 + 8 + 4 + self.extra_data.len());
        out.extend_from_slice(&self.parent_hash);
        out.extend_from_slice(&self.uncles_hash);
        out.extend_from_slice(&self.beneficiary);
        out.extend_from_slice(&to_be_32(&self.difficulty));
        out.extend_from_slice(&self.number.to_be_bytes());
        out.extend_from_slice(&self.timestamp.to_be_bytes());
        out.extend_from_slice(&(self.extra_data.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.extra_data);
        out
    }

    /// Hash of the header excluding nonce and mix digest; the value mined on.
    pub fn pow_hash(&self) -> H256 {
        Keccak256::digest(self.encode_unsealed()).into()
    }

    /// Full header hash including the seal.
    pub fn hash(&self) -> H256 {
        let mut data = self.encode_unsealed();
        data.extend_from_slice(&self.mix_digest);
        data.extend_from_slice(&self.nonce.to_be_bytes());
        Keccak256::digest(data).into()
    }

    /// Copy of this header carrying the given seal.
    pub fn with_seal(&self, nonce: u64, mix_digest: H256) -> Self {
        Self {
            nonce,
            mix_digest,
            ..self.clone()
        }
    }
}

/// Left-pad a big integer to 32 big-endian bytes, keeping the low 256 bits.
pub fn to_be_32(value: &BigUint) -> [u8; 32] {
    let bytes = value.to_bytes_be();
    let mut out = [0u8; 32];
    if bytes.len() >= 32 {
        out.copy_from_slice(&bytes[bytes.len() - 32..]);
    } else {
        out[32 - bytes.len()..].copy_from_slice(&bytes);
    }
    out
}
