use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::hash::{double_sha256, H256};
use crate::network::NetworkParams;
use crate::u256::U256;

pub type Target = U256;

/// Number of blocks per difficulty-adjustment chunk.
pub const BLOCKS_PER_CHUNK: u64 = 2016;
/// Intended wall-clock duration of one chunk.
pub const TARGET_TIMESPAN_SECS: u64 = 14 * 24 * 60 * 60;
/// A retarget may move the target by at most this factor in either direction.
pub const MAX_ADJUSTMENT_FACTOR: u64 = 4;

/// Wire bytes ahead of the solution:
/// major_version, version, three 32-byte roots, time, bits, 32-byte nonce.
pub const HDR_FIXED_SIZE: usize = 1 + 4 + 32 + 32 + 32 + 4 + 4 + 32;

/// Serialized length of the pre-fork Bitcoin header, still used as the
/// hashing pre-image for `major_version == 0` records.
pub const LEGACY_HDR_SIZE: usize = 80;

#[derive(Debug, PartialEq, Eq)]
pub enum CodecError {
    InvalidSol,
    InvalidLength { expected: usize, got: usize },
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::InvalidSol => write!(f, "invalid header sol"),
            CodecError::InvalidLength { expected, got } => {
                write!(f, "invalid length: expected {expected} bytes, got {got}")
            }
        }
    }
}

impl std::error::Error for CodecError {}

#[derive(BorshDeserialize, BorshSerialize, Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Header {
    /// Hard-fork generation marker; 0 for blocks inherited from the legacy chain.
    pub major_version: u8,
    /// Block version, repurposed for soft fork signalling.
    pub version: u32,
    /// Reference to the previous block in the chain.
    pub prev_block_hash: H256,
    /// The root hash of the merkle tree of transactions in the block.
    pub merkle_root: H256,
    /// The root hash of the witness merkle tree.
    pub witness_merkle_root: H256,
    /// The timestamp of the block, as claimed by the miner.
    pub time: u32,
    /// The target value below which the blockhash must lie.
    pub bits: u32,
    /// The 32-byte nonce; legacy blocks only ever used the first four bytes.
    pub nonce: H256,
    /// The equihash-style solution, led by its own compact-size byte.
    #[serde(with = "hex::serde")]
    pub sol: Vec<u8>,
    /// Absolute height; tracked alongside the record, never part of the wire form.
    pub block_height: u64,
}

impl Header {
    /// Serializes the header.
    ///
    /// With `for_hash` set, a `major_version == 0` header produces the
    /// 80-byte legacy pre-image instead of the full record, so hashes of
    /// pre-fork blocks keep matching the legacy chain.
    pub fn serialize(&self, params: &NetworkParams, for_hash: bool) -> Result<Vec<u8>, CodecError> {
        if self.sol.len() != params.sol_length
            || self.sol.first() != Some(&(params.sol_length as u8 - 1))
        {
            return Err(CodecError::InvalidSol);
        }

        let legacy = for_hash && self.major_version == 0;
        let buf = if legacy {
            let mut b = Vec::with_capacity(LEGACY_HDR_SIZE);
            b.extend_from_slice(&self.version.to_le_bytes());
            b.extend(self.prev_block_hash.0);
            b.extend(self.merkle_root.0);
            b.extend_from_slice(&self.time.to_le_bytes());
            b.extend_from_slice(&self.bits.to_le_bytes());
            b.extend_from_slice(&self.nonce.0[..4]);
            b
        } else {
            let mut b = Vec::with_capacity(params.hdr_size());
            b.push(self.major_version);
            b.extend_from_slice(&self.version.to_le_bytes());
            b.extend(self.prev_block_hash.0);
            b.extend(self.merkle_root.0);
            b.extend(self.witness_merkle_root.0);
            b.extend_from_slice(&self.time.to_le_bytes());
            b.extend_from_slice(&self.bits.to_le_bytes());
            b.extend_from_slice(&self.nonce.0);
            b.extend_from_slice(&self.sol);
            b
        };

        let expected = if legacy {
            LEGACY_HDR_SIZE
        } else {
            params.hdr_size()
        };
        if buf.len() != expected {
            return Err(CodecError::InvalidLength {
                expected,
                got: buf.len(),
            });
        }
        Ok(buf)
    }

    /// Parses a full wire record, attaching the externally-known height.
    pub fn deserialize(
        data: &[u8],
        params: &NetworkParams,
        height: u64,
    ) -> Result<Self, CodecError> {
        if data.len() != params.hdr_size() {
            return Err(CodecError::InvalidLength {
                expected: params.hdr_size(),
                got: data.len(),
            });
        }

        Ok(Header {
            major_version: data[0],
            version: read_u32(&data[1..5]),
            prev_block_hash: read_h256(&data[5..37]),
            merkle_root: read_h256(&data[37..69]),
            witness_merkle_root: read_h256(&data[69..101]),
            time: read_u32(&data[101..105]),
            bits: read_u32(&data[105..109]),
            nonce: read_h256(&data[109..141]),
            sol: data[141..].to_vec(),
            block_height: height,
        })
    }

    #[must_use = "this returns the hash, without modifying the header"]
    pub fn block_hash(&self, params: &NetworkParams) -> Result<H256, CodecError> {
        let pre_image = self.serialize(params, true)?;
        Ok(double_sha256(&pre_image))
    }
}

fn read_u32(data: &[u8]) -> u32 {
    u32::from_le_bytes([data[0], data[1], data[2], data[3]])
}

fn read_h256(data: &[u8]) -> H256 {
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&data[..32]);
    H256(bytes)
}
