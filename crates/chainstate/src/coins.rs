//! Per-output coin set backed by the storage trait, with a crash-safe
//! two-phase commit for applying one block's changes.

use votad_primitives::encoding::{DecodeError, Decoder, Encoder};
use votad_primitives::outpoint::OutPoint;
use votad_primitives::{money_range, Hash256};
use votad_storage::{Column, KeyValueStore, WriteBatch};

use crate::error::ChainstateError;

pub const OUTPOINT_KEY_LEN: usize = 36;

/// Default flush threshold for one staged commit batch.
pub const DEFAULT_BATCH_BYTES: usize = 16 << 20;

pub(crate) const META_BEST_BLOCK_KEY: &[u8] = b"coins:best_block";
pub(crate) const META_HEAD_BLOCKS_KEY: &[u8] = b"coins:head_blocks";

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CoinRecord {
    pub value: i64,
    pub script_pubkey: Vec<u8>,
    pub height: u32,
    pub is_coinbase: bool,
}

impl CoinRecord {
    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.write_i64_le(self.value);
        encoder.write_var_bytes(&self.script_pubkey);
        encoder.write_u32_le(self.height);
        encoder.write_u8(if self.is_coinbase { 1 } else { 0 });
        encoder.into_inner()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let value = decoder.read_i64_le()?;
        if !money_range(value) {
            return Err(DecodeError::InvalidData("coin value out of range"));
        }
        let script_pubkey = decoder.read_var_bytes()?;
        let height = decoder.read_u32_le()?;
        let is_coinbase = decoder.read_u8()? != 0;
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(Self {
            value,
            script_pubkey,
            height,
            is_coinbase,
        })
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct OutPointKey([u8; OUTPOINT_KEY_LEN]);

impl OutPointKey {
    pub fn new(outpoint: &OutPoint) -> Self {
        let mut bytes = [0u8; OUTPOINT_KEY_LEN];
        bytes[..32].copy_from_slice(&outpoint.txid);
        bytes[32..].copy_from_slice(&outpoint.vout.to_le_bytes());
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != OUTPOINT_KEY_LEN {
            return None;
        }
        let mut out = [0u8; OUTPOINT_KEY_LEN];
        out.copy_from_slice(bytes);
        Some(Self(out))
    }

    pub fn outpoint(&self) -> OutPoint {
        let mut txid = [0u8; 32];
        txid.copy_from_slice(&self.0[..32]);
        let mut vout = [0u8; 4];
        vout.copy_from_slice(&self.0[32..]);
        OutPoint {
            txid,
            vout: u32::from_le_bytes(vout),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_slice()
    }
}

/// One entry of a block's dirty coin set.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CoinUpdate {
    Write(CoinRecord),
    Spent,
}

pub struct CoinsStore<S> {
    store: S,
    batch_bytes: usize,
}

impl<S> CoinsStore<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            batch_bytes: DEFAULT_BATCH_BYTES,
        }
    }

    pub fn with_batch_size(store: S, batch_bytes: usize) -> Self {
        Self { store, batch_bytes }
    }
}

impl<S: KeyValueStore> CoinsStore<S> {
    pub fn get(&self, outpoint: &OutPoint) -> Result<Option<CoinRecord>, ChainstateError> {
        let key = OutPointKey::new(outpoint);
        match self.store.get(Column::Coin, key.as_bytes())? {
            Some(bytes) => CoinRecord::decode(&bytes)
                .map(Some)
                .map_err(|err| ChainstateError::corrupt("coin", key.as_bytes(), err)),
            None => Ok(None),
        }
    }

    pub fn contains(&self, outpoint: &OutPoint) -> Result<bool, ChainstateError> {
        let key = OutPointKey::new(outpoint);
        Ok(self.store.contains(Column::Coin, key.as_bytes())?)
    }

    /// Hash of the block the coin set is consistent with, absent while a
    /// commit is in flight (or before the first commit).
    pub fn best_block(&self) -> Result<Option<Hash256>, ChainstateError> {
        match self.store.get(Column::Meta, META_BEST_BLOCK_KEY)? {
            Some(bytes) => decode_hash(&bytes)
                .map(Some)
                .map_err(|err| ChainstateError::corrupt("meta", META_BEST_BLOCK_KEY, err)),
            None => Ok(None),
        }
    }

    /// The `(new_tip, old_tip)` pair of an in-flight commit, if one was
    /// interrupted.
    pub fn head_blocks(&self) -> Result<Option<(Hash256, Hash256)>, ChainstateError> {
        let bytes = match self.store.get(Column::Meta, META_HEAD_BLOCKS_KEY)? {
            Some(bytes) => bytes,
            None => return Ok(None),
        };
        let mut decoder = Decoder::new(&bytes);
        let new_tip = decoder
            .read_hash()
            .map_err(|err| ChainstateError::corrupt("meta", META_HEAD_BLOCKS_KEY, err))?;
        let old_tip = decoder
            .read_hash()
            .map_err(|err| ChainstateError::corrupt("meta", META_HEAD_BLOCKS_KEY, err))?;
        if !decoder.is_empty() {
            return Err(ChainstateError::corrupt(
                "meta",
                META_HEAD_BLOCKS_KEY,
                DecodeError::TrailingBytes,
            ));
        }
        Ok(Some((new_tip, old_tip)))
    }

    /// Apply one block transition's dirty coin set atomically with the
    /// best-block marker update.
    ///
    /// The first batch replaces the best-block marker with the head-blocks
    /// pair; the final batch reverses that. A crash in between leaves the
    /// pair behind, which [`head_blocks`](CoinsStore::head_blocks) exposes so
    /// the caller can replay from the old tip. Re-applying a transition whose
    /// best-block marker is already `new_tip` is a no-op.
    pub fn apply_block_changes<I>(&self, changes: I, new_tip: &Hash256) -> Result<(), ChainstateError>
    where
        I: IntoIterator<Item = (OutPoint, CoinUpdate)>,
    {
        if self.best_block()?.as_ref() == Some(new_tip) {
            return Ok(());
        }

        let old_tip = match self.best_block()? {
            Some(tip) => tip,
            None => match self.head_blocks()? {
                // We may be resuming an interrupted transition.
                Some((pending, old_tip)) => {
                    if &pending != new_tip {
                        return Err(ChainstateError::TipMismatch {
                            pending,
                            applying: *new_tip,
                        });
                    }
                    old_tip
                }
                None => [0u8; 32],
            },
        };

        let mut batch = WriteBatch::new();
        batch.delete(Column::Meta, META_BEST_BLOCK_KEY);
        batch.put(
            Column::Meta,
            META_HEAD_BLOCKS_KEY,
            encode_head_blocks(new_tip, &old_tip),
        );

        let mut changed = 0usize;
        for (outpoint, update) in changes {
            let key = OutPointKey::new(&outpoint);
            match update {
                CoinUpdate::Spent => batch.delete(Column::Coin, key.as_bytes()),
                CoinUpdate::Write(record) => {
                    batch.put(Column::Coin, key.as_bytes(), record.encode())
                }
            }
            changed += 1;
            if batch.size_estimate() > self.batch_bytes {
                votad_log::log_debug!(
                    "Writing partial coin batch of {:.2} MiB",
                    batch.size_estimate() as f64 / (1 << 20) as f64
                );
                self.store.write_batch(&batch)?;
                batch.clear();
            }
        }

        batch.delete(Column::Meta, META_HEAD_BLOCKS_KEY);
        batch.put(Column::Meta, META_BEST_BLOCK_KEY, *new_tip);
        votad_log::log_debug!(
            "Writing final coin batch of {:.2} MiB",
            batch.size_estimate() as f64 / (1 << 20) as f64
        );
        self.store.write_batch(&batch)?;
        votad_log::log_debug!("Committed {changed} changed outputs to the coin database");
        Ok(())
    }

    /// Visit every coin record in key order.
    pub fn for_each(
        &self,
        visitor: &mut dyn FnMut(OutPoint, CoinRecord) -> Result<(), ChainstateError>,
    ) -> Result<(), ChainstateError> {
        let mut start = Vec::new();
        loop {
            let page = self.store.scan_from(Column::Coin, &start, COIN_SCAN_PAGE)?;
            let Some((last_key, _)) = page.last() else {
                return Ok(());
            };
            start = next_key(last_key);
            for (key, value) in &page {
                let outpoint_key = OutPointKey::from_slice(key).ok_or_else(|| {
                    ChainstateError::corrupt("coin", key, "invalid outpoint key length")
                })?;
                let record = CoinRecord::decode(value)
                    .map_err(|err| ChainstateError::corrupt("coin", key, err))?;
                visitor(outpoint_key.outpoint(), record)?;
            }
        }
    }
}

const COIN_SCAN_PAGE: usize = 4096;

/// Smallest key strictly greater than `key`.
pub(crate) fn next_key(key: &[u8]) -> Vec<u8> {
    let mut next = Vec::with_capacity(key.len() + 1);
    next.extend_from_slice(key);
    next.push(0);
    next
}

fn encode_head_blocks(new_tip: &Hash256, old_tip: &Hash256) -> Vec<u8> {
    let mut encoder = Encoder::new();
    encoder.write_hash(new_tip);
    encoder.write_hash(old_tip);
    encoder.into_inner()
}

fn decode_hash(bytes: &[u8]) -> Result<Hash256, DecodeError> {
    if bytes.len() != 32 {
        return Err(DecodeError::InvalidData("invalid hash length"));
    }
    let mut hash = [0u8; 32];
    hash.copy_from_slice(bytes);
    Ok(hash)
}
