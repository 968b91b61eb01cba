//! Crash-consistent chain-state storage: coin set, block index, transaction
//! positions and the vote/balance ledger.

pub mod blockindex;
pub mod coins;
pub mod error;
pub mod filemeta;
pub mod ledger;
pub mod progress;
pub mod txindex;
pub mod upgrade;

pub use error::ChainstateError;
