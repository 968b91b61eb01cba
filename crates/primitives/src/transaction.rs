//! Structured transaction view consumed by the ledger.
//!
//! Wire decoding and script evaluation happen upstream; by the time a block
//! reaches the chain-state store, each transaction has already been resolved
//! into the address/amount shape below.

use crate::Hash256;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TxKind {
    /// Plain value transfer (includes the coinbase at the head of a block).
    Value,
    /// Declares or revokes the sender's candidacy.
    Enroll,
    /// Moves the sender's voting support to or from a target address.
    Vote,
    /// Toggles the frozen flag of the referenced asset type.
    FreezeAsset,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TxOutput {
    pub address: String,
    pub value: i64,
    pub asset: String,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Transaction {
    pub txid: Hash256,
    pub kind: TxKind,
    pub is_coinbase: bool,
    /// Address recovered from the single input; absent for coinbase.
    pub sender: Option<String>,
    pub outputs: Vec<TxOutput>,
    /// Asset type declared by a freeze-asset transaction.
    pub asset_type: Option<String>,
}

impl Transaction {
    /// Distinct output addresses in first-seen order.
    pub fn output_addresses(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::with_capacity(self.outputs.len());
        for output in &self.outputs {
            if !seen.contains(&output.address.as_str()) {
                seen.push(&output.address);
            }
        }
        seen
    }
}
