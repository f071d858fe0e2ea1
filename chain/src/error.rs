use bpq_types::{CodecError, H256};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid header field: {0}")]
    InvalidField(&'static str),
    #[error("bad length: expected {expected} bytes, got {got}")]
    LengthMismatch { expected: usize, got: usize },
    #[error("prev hash mismatch: expected {expected}, found {found}")]
    Linkage { expected: H256, found: H256 },
    #[error("bits mismatch: expected {expected:#010x}, found {found:#010x}")]
    BitsMismatch { expected: u32, found: u32 },
    #[error("insufficient proof of work: {hash} over target")]
    PowNotMet { hash: H256 },
    #[error("checkpoint mismatch at height {height}: expected {expected}, found {found}")]
    CheckpointMismatch {
        height: u64,
        expected: H256,
        found: H256,
    },
    #[error("append at height {got}, branch expects {expected}")]
    OutOfOrder { expected: u64, got: u64 },
    #[error("no header at height {0}")]
    NotFound(u64),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<CodecError> for Error {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::InvalidSol => Error::InvalidField("sol"),
            CodecError::InvalidLength { expected, got } => Error::LengthMismatch { expected, got },
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
