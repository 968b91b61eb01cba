use std::fmt;

use votad_primitives::hash::hex_encode;
use votad_primitives::Hash256;
use votad_storage::StoreError;

#[derive(Debug)]
pub enum ChainstateError {
    Store(StoreError),
    /// A persisted record failed to parse; `context` names the table and key.
    Corrupt {
        context: String,
    },
    /// Proof-of-work validation failed while loading the block index.
    BadProofOfWork(Hash256),
    /// The pending head-blocks pair does not match the transition being applied.
    TipMismatch {
        pending: Hash256,
        applying: Hash256,
    },
}

impl ChainstateError {
    pub fn corrupt(table: &str, key: &[u8], detail: impl fmt::Display) -> Self {
        ChainstateError::Corrupt {
            context: format!("{table}[{}]: {detail}", hex_encode(key)),
        }
    }
}

impl fmt::Display for ChainstateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainstateError::Store(err) => write!(f, "store error: {err}"),
            ChainstateError::Corrupt { context } => write!(f, "corrupt record: {context}"),
            ChainstateError::BadProofOfWork(hash) => {
                write!(f, "proof of work check failed for {}", hex_encode(hash))
            }
            ChainstateError::TipMismatch { pending, applying } => write!(
                f,
                "pending transition targets {} but {} is being applied",
                hex_encode(pending),
                hex_encode(applying)
            ),
        }
    }
}

impl std::error::Error for ChainstateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ChainstateError::Store(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StoreError> for ChainstateError {
    fn from(err: StoreError) -> Self {
        ChainstateError::Store(err)
    }
}
