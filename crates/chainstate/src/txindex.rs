//! Transaction-position index and its online migration out of the block-tree
//! store.

use std::sync::atomic::{AtomicBool, Ordering};

use votad_primitives::encoding::{DecodeError, Decoder, Encoder};
use votad_primitives::Hash256;
use votad_storage::{Column, KeyValueStore, WriteBatch};

use crate::blockindex::{read_flag, write_flag};
use crate::coins::next_key;
use crate::error::ChainstateError;
use crate::progress::{keyspace_percent, ProgressSink};

pub const FLAG_TXINDEX: &str = "txindex";

pub(crate) const META_TXINDEX_BEST_KEY: &[u8] = b"txindex:best_block";
pub(crate) const META_TXINDEX_MIGRATION_KEY: &[u8] = b"txindex:migration_block";

const TX_POSITION_LEN: usize = 12;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TxPosition {
    pub file: u32,
    pub offset: u64,
}

impl TxPosition {
    pub fn encode(&self) -> [u8; TX_POSITION_LEN] {
        let mut out = [0u8; TX_POSITION_LEN];
        out[0..4].copy_from_slice(&self.file.to_le_bytes());
        out[4..12].copy_from_slice(&self.offset.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != TX_POSITION_LEN {
            return None;
        }
        let file = u32::from_le_bytes(bytes[0..4].try_into().ok()?);
        let offset = u64::from_le_bytes(bytes[4..12].try_into().ok()?);
        Some(Self { file, offset })
    }
}

/// Compact reference to a chain position, newest hash first.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ChainLocator {
    pub hashes: Vec<Hash256>,
}

impl ChainLocator {
    pub fn new(hashes: Vec<Hash256>) -> Self {
        Self { hashes }
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.write_varint(self.hashes.len() as u64);
        for hash in &self.hashes {
            encoder.write_hash(hash);
        }
        encoder.into_inner()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let count = decoder.read_varint()?;
        let mut hashes = Vec::with_capacity(count as usize);
        for _ in 0..count {
            hashes.push(decoder.read_hash()?);
        }
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(Self { hashes })
    }
}

pub struct TxIndexStore<S> {
    store: S,
}

impl<S> TxIndexStore<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

impl<S: KeyValueStore> TxIndexStore<S> {
    pub fn read_tx_pos(&self, txid: &Hash256) -> Result<Option<TxPosition>, ChainstateError> {
        let bytes = match self.store.get(Column::TxIndex, txid)? {
            Some(bytes) => bytes,
            None => return Ok(None),
        };
        TxPosition::decode(&bytes)
            .ok_or_else(|| ChainstateError::corrupt("tx_index", txid, "invalid position record"))
            .map(Some)
    }

    pub fn write_txs(&self, positions: &[(Hash256, TxPosition)]) -> Result<(), ChainstateError> {
        let mut batch = WriteBatch::new();
        for (txid, position) in positions {
            batch.put(Column::TxIndex, *txid, position.encode());
        }
        self.store.write_batch(&batch)?;
        Ok(())
    }

    pub fn read_best_block(&self) -> Result<Option<ChainLocator>, ChainstateError> {
        match self.store.get(Column::Meta, META_TXINDEX_BEST_KEY)? {
            Some(bytes) => ChainLocator::decode(&bytes)
                .map(Some)
                .map_err(|err| ChainstateError::corrupt("meta", META_TXINDEX_BEST_KEY, err)),
            None => Ok(None),
        }
    }

    pub fn write_best_block(&self, locator: &ChainLocator) -> Result<(), ChainstateError> {
        self.store
            .put(Column::Meta, META_TXINDEX_BEST_KEY, &locator.encode())?;
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MigrationStatus {
    Completed,
    /// Shutdown was requested; staged work is flushed and the resume marker
    /// retained, so the next run picks up where this one stopped.
    Interrupted,
}

#[derive(Clone, Copy, Debug)]
pub struct MigrationConfig {
    pub batch_bytes: usize,
    pub page_size: usize,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            batch_bytes: 16 << 20,
            page_size: 4096,
        }
    }
}

/// Move all legacy tx-index entries out of the block-tree store into the
/// dedicated store, resumable across restarts.
///
/// The legacy boolean flag is first converted into a resume marker holding
/// `best_locator`; from then on the marker alone drives resumption. Entries
/// are copied in key order, with the new store's batch synced to durable
/// storage before the matching legacy erases are applied, so a crash can
/// never lose entries that have already been removed from the legacy side.
pub fn migrate_tx_index<N, L>(
    new_store: &N,
    legacy_store: &L,
    best_locator: &ChainLocator,
    shutdown: &AtomicBool,
    progress: &dyn ProgressSink,
    config: &MigrationConfig,
) -> Result<MigrationStatus, ChainstateError>
where
    N: KeyValueStore,
    L: KeyValueStore,
{
    if read_flag(legacy_store, FLAG_TXINDEX)? == Some(true) {
        legacy_store.put(
            Column::Meta,
            META_TXINDEX_MIGRATION_KEY,
            &best_locator.encode(),
        )?;
        write_flag(legacy_store, FLAG_TXINDEX, false)?;
    }

    let locator = match legacy_store.get(Column::Meta, META_TXINDEX_MIGRATION_KEY)? {
        Some(bytes) => ChainLocator::decode(&bytes)
            .map_err(|err| ChainstateError::corrupt("meta", META_TXINDEX_MIGRATION_KEY, err))?,
        None => return Ok(MigrationStatus::Completed),
    };

    votad_log::log_info!("Upgrading txindex database... [0%]");
    progress.progress("Upgrading txindex database", 0);

    let mut batch_new = WriteBatch::new();
    let mut batch_old = WriteBatch::new();
    let mut compact_from: Vec<u8> = Vec::new();
    let mut resume: Vec<u8> = Vec::new();
    let mut last_key: Vec<u8> = Vec::new();
    let mut count = 0u64;
    let mut report_done = 0u32;
    let mut interrupted = false;

    'copy: loop {
        let page = legacy_store.scan_from(Column::TxIndexLegacy, &resume, config.page_size)?;
        if page.is_empty() {
            break;
        }
        for (key, value) in &page {
            if shutdown.load(Ordering::Relaxed) {
                interrupted = true;
                break 'copy;
            }

            count += 1;
            if count % 256 == 0 {
                // Txids are uniformly distributed, so the high bits of the
                // key approximate linear progress through the table.
                let percent = keyspace_percent(key);
                progress.progress("Upgrading txindex database", percent);
                if report_done < percent / 10 {
                    votad_log::log_info!("Upgrading txindex database... [{percent}%]");
                    report_done = percent / 10;
                }
            }

            if TxPosition::decode(value).is_none() {
                return Err(ChainstateError::corrupt(
                    "tx_index_legacy",
                    key,
                    "invalid position record",
                ));
            }
            batch_new.put(Column::TxIndex, key.as_slice(), value.as_slice());
            batch_old.delete(Column::TxIndexLegacy, key.as_slice());
            last_key.clone_from(key);

            if batch_new.size_estimate() > config.batch_bytes
                || batch_old.size_estimate() > config.batch_bytes
            {
                write_migration_batches(
                    new_store,
                    legacy_store,
                    &mut batch_new,
                    &mut batch_old,
                    &compact_from,
                    key,
                )?;
                compact_from.clone_from(key);
            }
        }
        resume = next_key(&last_key);
    }

    if !interrupted {
        batch_old.delete(Column::Meta, META_TXINDEX_MIGRATION_KEY);
        batch_new.put(Column::Meta, META_TXINDEX_BEST_KEY, locator.encode());
    }

    write_migration_batches(
        new_store,
        legacy_store,
        &mut batch_new,
        &mut batch_old,
        &compact_from,
        &last_key,
    )?;

    if interrupted {
        votad_log::log_info!("Upgrading txindex database... [CANCELLED]");
        return Ok(MigrationStatus::Interrupted);
    }

    progress.progress("Upgrading txindex database", 100);
    votad_log::log_info!("Upgrading txindex database... [DONE]");
    Ok(MigrationStatus::Completed)
}

/// Persist one slice of migrated entries: the new store's batch is synced
/// before the legacy erases land, then the erased range is compacted.
fn write_migration_batches<N, L>(
    new_store: &N,
    legacy_store: &L,
    batch_new: &mut WriteBatch,
    batch_old: &mut WriteBatch,
    begin_key: &[u8],
    end_key: &[u8],
) -> Result<(), ChainstateError>
where
    N: KeyValueStore,
    L: KeyValueStore,
{
    new_store.write_batch_durable(batch_new)?;
    legacy_store.write_batch(batch_old)?;
    legacy_store.compact_range(Column::TxIndexLegacy, begin_key, end_key)?;
    batch_new.clear();
    batch_old.clear();
    Ok(())
}
