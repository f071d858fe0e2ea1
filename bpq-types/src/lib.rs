pub mod hash;
pub mod header;
pub mod network;
pub mod u256;

pub use hash::{double_sha256, H256};
pub use header::{CodecError, Header, Target};
pub use network::{Network, NetworkParams};
pub use u256::U256;
