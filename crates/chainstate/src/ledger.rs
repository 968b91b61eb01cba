//! Per-address vote and balance ledger.
//!
//! Vote weight is the voter's balance split evenly across the candidates it
//! backs, so every balance or list change redistributes weight incrementally.
//! All reads during a block go through an in-memory overlay and the resulting
//! writes commit as a single batch, so a crash mid-block never leaves a
//! half-applied ledger.

use std::collections::{BTreeMap, BTreeSet};

use votad_primitives::block::Block;
use votad_primitives::transaction::{Transaction, TxKind};
use votad_primitives::NATIVE_ASSET;
use votad_storage::{Column, KeyValueStore, WriteBatch};

use crate::error::ChainstateError;

/// Enrollment state of an address.
///
/// Absent from the tally table means the address was never enrolled; a
/// retired candidate keeps an explicit `Retiring` record so re-enrollment is
/// distinguishable from first enrollment.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum VoteState {
    Candidate(i64),
    Retiring,
}

impl VoteState {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            VoteState::Retiring => vec![0],
            VoteState::Candidate(weight) => {
                let mut out = Vec::with_capacity(9);
                out.push(1);
                out.extend_from_slice(&weight.to_le_bytes());
                out
            }
        }
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        match bytes.split_first()? {
            (0, rest) if rest.is_empty() => Some(VoteState::Retiring),
            (1, rest) => {
                let raw: [u8; 8] = rest.try_into().ok()?;
                Some(VoteState::Candidate(i64::from_le_bytes(raw)))
            }
            _ => None,
        }
    }

    pub fn weight(&self) -> Option<i64> {
        match self {
            VoteState::Candidate(weight) => Some(*weight),
            VoteState::Retiring => None,
        }
    }
}

pub struct VoteLedger<S> {
    store: S,
}

impl<S> VoteLedger<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

impl<S: KeyValueStore> VoteLedger<S> {
    pub fn tally(&self, address: &str) -> Result<Option<VoteState>, ChainstateError> {
        read_tally(&self.store, address)
    }

    pub fn balance(&self, address: &str) -> Result<i64, ChainstateError> {
        read_balance(&self.store, address)
    }

    pub fn candidates_of(&self, voter: &str) -> Result<Vec<String>, ChainstateError> {
        read_list(&self.store, Column::VoterCandidates, voter)
    }

    pub fn voters_of(&self, candidate: &str) -> Result<Vec<String>, ChainstateError> {
        read_list(&self.store, Column::CandidateVoters, candidate)
    }

    pub fn is_frozen(&self, asset: &str) -> Result<bool, ChainstateError> {
        match self.store.get(Column::AssetFrozen, asset.as_bytes())? {
            Some(bytes) => Ok(matches!(bytes.as_slice(), [1])),
            None => Ok(false),
        }
    }

    /// Apply one block's ledger effects, transactions in block order, as a
    /// single atomic batch.
    pub fn apply_block(&self, block: &Block) -> Result<(), ChainstateError> {
        let mut overlay = Overlay::new(&self.store);
        for tx in &block.txs {
            if tx.is_coinbase {
                overlay.apply_coinbase(tx)?;
                continue;
            }
            match tx.kind {
                TxKind::Enroll => overlay.apply_enroll(tx)?,
                TxKind::Vote => overlay.apply_vote(tx)?,
                TxKind::Value => overlay.apply_value(tx)?,
                TxKind::FreezeAsset => overlay.apply_freeze(tx)?,
            }
        }
        overlay.commit()
    }
}

fn read_tally<S: KeyValueStore>(
    store: &S,
    address: &str,
) -> Result<Option<VoteState>, ChainstateError> {
    match store.get(Column::VoteTally, address.as_bytes())? {
        Some(bytes) => VoteState::decode(&bytes)
            .ok_or_else(|| {
                ChainstateError::corrupt("vote_tally", address.as_bytes(), "invalid vote state")
            })
            .map(Some),
        None => Ok(None),
    }
}

fn read_balance<S: KeyValueStore>(store: &S, address: &str) -> Result<i64, ChainstateError> {
    match store.get(Column::AddressBalance, address.as_bytes())? {
        Some(bytes) => {
            let raw: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                ChainstateError::corrupt("address_balance", address.as_bytes(), "invalid length")
            })?;
            Ok(i64::from_le_bytes(raw))
        }
        None => Ok(0),
    }
}

fn read_list<S: KeyValueStore>(
    store: &S,
    column: Column,
    address: &str,
) -> Result<Vec<String>, ChainstateError> {
    match store.get(column, address.as_bytes())? {
        Some(bytes) => {
            let joined = String::from_utf8(bytes).map_err(|_| {
                ChainstateError::corrupt(column.as_str(), address.as_bytes(), "invalid utf-8 list")
            })?;
            Ok(decode_list(&joined))
        }
        None => Ok(Vec::new()),
    }
}

fn decode_list(joined: &str) -> Vec<String> {
    joined
        .split(',')
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

/// Read-through cache of the ledger tables plus the dirty set accumulated
/// while applying one block.
struct Overlay<'a, S> {
    store: &'a S,
    tallies: BTreeMap<String, Option<VoteState>>,
    candidates: BTreeMap<String, Vec<String>>,
    voters: BTreeMap<String, Vec<String>>,
    balances: BTreeMap<String, i64>,
    frozen: BTreeMap<String, Option<bool>>,
    dirty_tallies: BTreeSet<String>,
    dirty_candidates: BTreeSet<String>,
    dirty_voters: BTreeSet<String>,
    dirty_balances: BTreeSet<String>,
    dirty_frozen: BTreeSet<String>,
}

impl<'a, S: KeyValueStore> Overlay<'a, S> {
    fn new(store: &'a S) -> Self {
        Self {
            store,
            tallies: BTreeMap::new(),
            candidates: BTreeMap::new(),
            voters: BTreeMap::new(),
            balances: BTreeMap::new(),
            frozen: BTreeMap::new(),
            dirty_tallies: BTreeSet::new(),
            dirty_candidates: BTreeSet::new(),
            dirty_voters: BTreeSet::new(),
            dirty_balances: BTreeSet::new(),
            dirty_frozen: BTreeSet::new(),
        }
    }

    fn tally(&mut self, address: &str) -> Result<Option<VoteState>, ChainstateError> {
        if let Some(state) = self.tallies.get(address) {
            return Ok(*state);
        }
        let state = read_tally(self.store, address)?;
        self.tallies.insert(address.to_string(), state);
        Ok(state)
    }

    fn balance(&mut self, address: &str) -> Result<i64, ChainstateError> {
        if let Some(balance) = self.balances.get(address) {
            return Ok(*balance);
        }
        let balance = read_balance(self.store, address)?;
        self.balances.insert(address.to_string(), balance);
        Ok(balance)
    }

    fn candidates_of(&mut self, voter: &str) -> Result<Vec<String>, ChainstateError> {
        if let Some(list) = self.candidates.get(voter) {
            return Ok(list.clone());
        }
        let list = read_list(self.store, Column::VoterCandidates, voter)?;
        self.candidates.insert(voter.to_string(), list.clone());
        Ok(list)
    }

    fn voters_of(&mut self, candidate: &str) -> Result<Vec<String>, ChainstateError> {
        if let Some(list) = self.voters.get(candidate) {
            return Ok(list.clone());
        }
        let list = read_list(self.store, Column::CandidateVoters, candidate)?;
        self.voters.insert(candidate.to_string(), list.clone());
        Ok(list)
    }

    /// `None` means no frozen record exists for the asset yet.
    fn frozen_record(&mut self, asset: &str) -> Result<Option<bool>, ChainstateError> {
        if let Some(frozen) = self.frozen.get(asset) {
            return Ok(*frozen);
        }
        let frozen = self
            .store
            .get(Column::AssetFrozen, asset.as_bytes())?
            .map(|bytes| matches!(bytes.as_slice(), [1]));
        self.frozen.insert(asset.to_string(), frozen);
        Ok(frozen)
    }

    fn set_state(&mut self, address: &str, state: VoteState) {
        self.tallies.insert(address.to_string(), Some(state));
        self.dirty_tallies.insert(address.to_string());
    }

    /// Shift an address's weight. Retired candidates keep their state; an
    /// address with no record becomes a candidate carrying the delta, which
    /// lets weight accrue to addresses voted for before they enroll.
    fn add_tally(&mut self, address: &str, delta: i64) -> Result<(), ChainstateError> {
        let state = match self.tally(address)? {
            Some(VoteState::Retiring) => return Ok(()),
            Some(VoteState::Candidate(weight)) => VoteState::Candidate(weight.saturating_add(delta)),
            None => VoteState::Candidate(delta),
        };
        self.set_state(address, state);
        Ok(())
    }

    fn zero_tally(&mut self, address: &str) -> Result<(), ChainstateError> {
        if let Some(VoteState::Retiring) = self.tally(address)? {
            return Ok(());
        }
        self.set_state(address, VoteState::Candidate(0));
        Ok(())
    }

    fn set_candidates(&mut self, voter: &str, list: Vec<String>) {
        self.candidates.insert(voter.to_string(), list);
        self.dirty_candidates.insert(voter.to_string());
    }

    fn set_voters(&mut self, candidate: &str, list: Vec<String>) {
        self.voters.insert(candidate.to_string(), list);
        self.dirty_voters.insert(candidate.to_string());
    }

    fn add_balance(&mut self, address: &str, delta: i64) -> Result<(), ChainstateError> {
        let balance = self.balance(address)?.saturating_add(delta);
        self.balances.insert(address.to_string(), balance);
        self.dirty_balances.insert(address.to_string());
        Ok(())
    }

    fn set_frozen(&mut self, asset: &str, frozen: bool) {
        self.frozen.insert(asset.to_string(), Some(frozen));
        self.dirty_frozen.insert(asset.to_string());
    }

    fn apply_coinbase(&mut self, tx: &Transaction) -> Result<(), ChainstateError> {
        let Some(output) = tx.outputs.first() else {
            return Ok(());
        };
        if output.value <= 0 {
            return Ok(());
        }
        let address = output.address.clone();
        self.add_tally(&address, output.value)?;
        self.add_balance(&address, output.value)
    }

    /// Enrollment toggles: a fresh or retired address becomes a candidate at
    /// zero weight; an active candidate retires, which releases every backing
    /// voter and redistributes their weight across their remaining picks.
    fn apply_enroll(&mut self, tx: &Transaction) -> Result<(), ChainstateError> {
        let Some(sender) = tx.sender.clone() else {
            return Ok(());
        };
        match self.tally(&sender)? {
            None | Some(VoteState::Retiring) => {
                self.set_state(&sender, VoteState::Candidate(0));
                return Ok(());
            }
            Some(VoteState::Candidate(_)) => {}
        }
        self.set_state(&sender, VoteState::Retiring);
        for voter in self.voters_of(&sender)? {
            let mut picks = self.candidates_of(&voter)?;
            let old_count = picks.len();
            picks.retain(|candidate| candidate != &sender);
            let new_count = picks.len();
            if new_count == old_count {
                continue;
            }
            if new_count > 0 {
                let balance = self.balance(&voter)?;
                let delta = balance / new_count as i64 - balance / old_count as i64;
                for candidate in picks.clone() {
                    self.add_tally(&candidate, delta)?;
                }
            }
            self.set_candidates(&voter, picks);
        }
        self.set_voters(&sender, Vec::new());
        Ok(())
    }

    /// A vote transaction pays the sender's own address plus the target; any
    /// other output shape is ignored. Voting for an address already in the
    /// sender's list retracts that vote instead.
    fn apply_vote(&mut self, tx: &Transaction) -> Result<(), ChainstateError> {
        let Some(sender) = tx.sender.clone() else {
            return Ok(());
        };
        let addresses = tx.output_addresses();
        if addresses.len() != 2 {
            return Ok(());
        }
        let Some(target) = addresses
            .iter()
            .find(|address| **address != sender)
            .map(|address| address.to_string())
        else {
            return Ok(());
        };

        let mut picks = self.candidates_of(&sender)?;
        let balance = self.balance(&sender)?;

        if let Some(position) = picks.iter().position(|pick| *pick == target) {
            // Retract: the target gives up the sender's share and whatever
            // remains of the balance is respread over the surviving picks.
            let old_count = picks.len() as i64;
            picks.remove(position);
            let new_count = picks.len() as i64;
            if new_count == 0 {
                self.zero_tally(&target)?;
            } else {
                self.add_tally(&target, -(balance / old_count))?;
                let delta = balance / new_count - balance / old_count;
                for pick in picks.clone() {
                    self.add_tally(&pick, delta)?;
                }
            }
            self.set_candidates(&sender, picks);
            let mut voters = self.voters_of(&target)?;
            voters.retain(|voter| voter != &sender);
            self.set_voters(&target, voters);
        } else {
            let prior_count = picks.len() as i64;
            picks.push(target.clone());
            let new_count = prior_count + 1;
            self.add_tally(&target, balance / new_count)?;
            if prior_count > 0 {
                let delta = balance / new_count - balance / prior_count;
                for pick in picks[..prior_count as usize].to_vec() {
                    self.add_tally(&pick, delta)?;
                }
            }
            self.set_candidates(&sender, picks);
            let mut voters = self.voters_of(&target)?;
            if !voters.iter().any(|voter| voter == &sender) {
                voters.push(sender);
            }
            self.set_voters(&target, voters);
        }
        Ok(())
    }

    /// Spending moves balance and, with it, vote weight: the sender's picks
    /// lose the spent share and each recipient gains its amount split by the
    /// sender's pick count.
    fn apply_value(&mut self, tx: &Transaction) -> Result<(), ChainstateError> {
        let Some(sender) = tx.sender.clone() else {
            return Ok(());
        };
        let picks = self.candidates_of(&sender)?;
        let pick_count = picks.len() as i64;

        let mut total = 0i64;
        for output in &tx.outputs {
            if output.asset != NATIVE_ASSET || output.address == sender || output.value <= 0 {
                continue;
            }
            total += output.value;
            let recipient = output.address.clone();
            self.add_balance(&recipient, output.value)?;
            if pick_count > 0 {
                self.add_tally(&recipient, output.value / pick_count)?;
            }
        }
        if total == 0 {
            return Ok(());
        }
        self.add_balance(&sender, -total)?;
        if pick_count > 0 {
            let share = total / pick_count;
            for pick in picks {
                self.add_tally(&pick, -share)?;
            }
        }
        Ok(())
    }

    /// Flip the asset's frozen flag when a record already exists and an
    /// output pays the asset's own declared type address; otherwise rewrite
    /// the current value. The first freeze of an asset creates the record
    /// unfrozen, so a flag can never flip before it exists.
    fn apply_freeze(&mut self, tx: &Transaction) -> Result<(), ChainstateError> {
        let Some(asset) = tx.asset_type.clone() else {
            return Ok(());
        };
        let existing = self.frozen_record(&asset)?;
        let current = existing.unwrap_or(false);
        let flip =
            existing.is_some() && tx.outputs.iter().any(|output| output.address == asset);
        self.set_frozen(&asset, if flip { !current } else { current });
        Ok(())
    }

    fn commit(self) -> Result<(), ChainstateError> {
        let mut batch = WriteBatch::new();
        for address in &self.dirty_tallies {
            if let Some(Some(state)) = self.tallies.get(address) {
                batch.put(Column::VoteTally, address.as_bytes(), state.encode());
            }
        }
        for (column, lists, dirty) in [
            (Column::VoterCandidates, &self.candidates, &self.dirty_candidates),
            (Column::CandidateVoters, &self.voters, &self.dirty_voters),
        ] {
            for address in dirty {
                match lists.get(address) {
                    Some(list) if !list.is_empty() => {
                        batch.put(column, address.as_bytes(), list.join(","))
                    }
                    _ => batch.delete(column, address.as_bytes()),
                }
            }
        }
        for address in &self.dirty_balances {
            if let Some(balance) = self.balances.get(address) {
                batch.put(
                    Column::AddressBalance,
                    address.as_bytes(),
                    balance.to_le_bytes(),
                );
            }
        }
        for asset in &self.dirty_frozen {
            if let Some(Some(frozen)) = self.frozen.get(asset) {
                let value: &[u8] = if *frozen { &[1] } else { &[0] };
                batch.put(Column::AssetFrozen, asset.as_bytes(), value);
            }
        }
        self.store.write_batch(&batch)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vote_state_roundtrip() {
        for state in [
            VoteState::Retiring,
            VoteState::Candidate(0),
            VoteState::Candidate(-75),
            VoteState::Candidate(i64::MAX),
        ] {
            assert_eq!(VoteState::decode(&state.encode()), Some(state));
        }
        assert_eq!(VoteState::decode(&[]), None);
        assert_eq!(VoteState::decode(&[2]), None);
        assert_eq!(VoteState::decode(&[0, 0]), None);
        assert_eq!(VoteState::decode(&[1, 0, 0]), None);
    }

    #[test]
    fn list_decoding_skips_empty_parts() {
        assert_eq!(decode_list(""), Vec::<String>::new());
        assert_eq!(decode_list("a"), vec!["a"]);
        assert_eq!(decode_list("a,b,c"), vec!["a", "b", "c"]);
        assert_eq!(decode_list("a,,b"), vec!["a", "b"]);
    }
}
