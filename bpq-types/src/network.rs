use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::hash::H256;
use crate::header::{Target, HDR_FIXED_SIZE};
use crate::u256::U256;

/// Solution length on every BPQ network: a 68-byte equihash(96,5) solution
/// preceded by its one-byte compact size.
pub const SOL_LENGTH: usize = 69;

/// Highest target any BPQ block may carry.
pub const MAX_TARGET: U256 = U256::new(0x0000_0000_ffff_0000_0000_0000_0000_0000, 0);

// Genesis block hashes in raw digest order; the display form is the usual
// reversed hex. BPQ keeps the legacy chain history below the fork height,
// so these are the legacy genesis blocks.
const GENESIS_MAINNET: [u8; 32] = [
    0x6f, 0xe2, 0x8c, 0x0a, 0xb6, 0xf1, 0xb3, 0x72, 0xc1, 0xa6, 0xa2, 0x46, 0xae, 0x63, 0xf7,
    0x4f, 0x93, 0x1e, 0x83, 0x65, 0xe1, 0x5a, 0x08, 0x9c, 0x68, 0xd6, 0x19, 0x00, 0x00, 0x00,
    0x00, 0x00,
];
const GENESIS_TESTNET: [u8; 32] = [
    0x43, 0x49, 0x7f, 0xd7, 0xf8, 0x26, 0x95, 0x71, 0x08, 0xf4, 0xa3, 0x0f, 0xd9, 0xce, 0xc3,
    0xae, 0xba, 0x79, 0x97, 0x20, 0x84, 0xe9, 0x0e, 0xad, 0x01, 0xea, 0x33, 0x09, 0x00, 0x00,
    0x00, 0x00,
];
const GENESIS_REGTEST: [u8; 32] = [
    0x06, 0x22, 0x6e, 0x46, 0x11, 0x1a, 0x0b, 0x59, 0xca, 0xaf, 0x12, 0x60, 0x43, 0xeb, 0x5b,
    0xbf, 0x28, 0xc3, 0x4f, 0x3a, 0x5e, 0x33, 0x2a, 0x1f, 0xc7, 0xb2, 0xb7, 0x3c, 0xf1, 0x88,
    0x91, 0x0f,
];

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
    Regtest,
}

#[derive(Clone, Debug)]
pub struct NetworkParams {
    pub network: Network,
    pub sol_length: usize,
    pub genesis: H256,
    /// Per-chunk `(hash, target)` entries committed by the release binary.
    pub checkpoints: Vec<(H256, Target)>,
    pub pow_enabled: bool,
    pub max_target: Target,
}

impl NetworkParams {
    pub fn new(network: Network) -> Self {
        match network {
            Network::Mainnet => NetworkParams {
                network,
                sol_length: SOL_LENGTH,
                genesis: H256(GENESIS_MAINNET),
                checkpoints: Vec::new(),
                pow_enabled: true,
                max_target: MAX_TARGET,
            },
            Network::Testnet => NetworkParams {
                network,
                sol_length: SOL_LENGTH,
                genesis: H256(GENESIS_TESTNET),
                checkpoints: Vec::new(),
                pow_enabled: false,
                max_target: MAX_TARGET,
            },
            Network::Regtest => NetworkParams {
                network,
                sol_length: SOL_LENGTH,
                genesis: H256(GENESIS_REGTEST),
                checkpoints: Vec::new(),
                pow_enabled: false,
                max_target: MAX_TARGET,
            },
        }
    }

    /// Constant wire length of one header record on this network.
    pub fn hdr_size(&self) -> usize {
        HDR_FIXED_SIZE + self.sol_length
    }
}
