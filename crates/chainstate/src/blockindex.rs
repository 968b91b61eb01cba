//! Block index metadata store and startup load.

use votad_primitives::encoding::{DecodeError, Decoder, Encoder};
use votad_primitives::Hash256;
use votad_storage::{Column, KeyValueStore, WriteBatch};

use crate::coins::next_key;
use crate::error::ChainstateError;
use crate::filemeta::{block_file_key, BlockFileInfo, META_LAST_BLOCK_FILE_KEY, META_REINDEXING_KEY};

pub const STATUS_HAVE_DATA: u32 = 1 << 0;
pub const STATUS_HAVE_UNDO: u32 = 1 << 1;

/// Checks a block hash against its encoded difficulty target. Supplied by
/// the consensus layer; the store only consumes the verdict.
pub trait ProofOfWorkChecker {
    fn check_proof_of_work(&self, hash: &Hash256, bits: u32) -> bool;
}

impl<F: Fn(&Hash256, u32) -> bool> ProofOfWorkChecker for F {
    fn check_proof_of_work(&self, hash: &Hash256, bits: u32) -> bool {
        self(hash, bits)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BlockIndexEntry {
    pub prev_hash: Hash256,
    pub height: i32,
    pub file: u32,
    pub data_pos: u64,
    pub undo_pos: u64,
    pub version: i32,
    pub merkle_root: Hash256,
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
    pub status: u32,
    pub tx_count: u32,
}

impl BlockIndexEntry {
    pub fn has_data(&self) -> bool {
        (self.status & STATUS_HAVE_DATA) != 0
    }

    pub fn has_undo(&self) -> bool {
        (self.status & STATUS_HAVE_UNDO) != 0
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.write_hash(&self.prev_hash);
        encoder.write_i32_le(self.height);
        encoder.write_u32_le(self.file);
        encoder.write_u64_le(self.data_pos);
        encoder.write_u64_le(self.undo_pos);
        encoder.write_i32_le(self.version);
        encoder.write_hash(&self.merkle_root);
        encoder.write_u32_le(self.time);
        encoder.write_u32_le(self.bits);
        encoder.write_u32_le(self.nonce);
        encoder.write_u32_le(self.status);
        encoder.write_u32_le(self.tx_count);
        encoder.into_inner()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let prev_hash = decoder.read_hash()?;
        let height = decoder.read_i32_le()?;
        let file = decoder.read_u32_le()?;
        let data_pos = decoder.read_u64_le()?;
        let undo_pos = decoder.read_u64_le()?;
        let version = decoder.read_i32_le()?;
        let merkle_root = decoder.read_hash()?;
        let time = decoder.read_u32_le()?;
        let bits = decoder.read_u32_le()?;
        let nonce = decoder.read_u32_le()?;
        let status = decoder.read_u32_le()?;
        let tx_count = decoder.read_u32_le()?;
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(Self {
            prev_hash,
            height,
            file,
            data_pos,
            undo_pos,
            version,
            merkle_root,
            time,
            bits,
            nonce,
            status,
            tx_count,
        })
    }
}

pub fn write_flag<S: KeyValueStore>(
    store: &S,
    name: &str,
    value: bool,
) -> Result<(), ChainstateError> {
    let value = if value { b"1" } else { b"0" };
    store.put(Column::Flags, name.as_bytes(), value)?;
    Ok(())
}

pub fn read_flag<S: KeyValueStore>(store: &S, name: &str) -> Result<Option<bool>, ChainstateError> {
    match store.get(Column::Flags, name.as_bytes())? {
        Some(bytes) => Ok(Some(bytes.as_slice() == b"1")),
        None => Ok(None),
    }
}

pub struct BlockIndexStore<S> {
    store: S,
}

impl<S> BlockIndexStore<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

const BLOCK_INDEX_SCAN_PAGE: usize = 4096;

impl<S: KeyValueStore> BlockIndexStore<S> {
    /// Persist a batch of file infos, the last-file marker and new block
    /// entries as one durable write.
    pub fn write_batch_sync(
        &self,
        file_infos: &[(u32, BlockFileInfo)],
        last_file: u32,
        entries: &[(Hash256, BlockIndexEntry)],
    ) -> Result<(), ChainstateError> {
        let mut batch = WriteBatch::new();
        for (file_id, info) in file_infos {
            batch.put(Column::BlockFiles, block_file_key(*file_id), info.encode());
        }
        batch.put(Column::Meta, META_LAST_BLOCK_FILE_KEY, last_file.to_le_bytes());
        for (hash, entry) in entries {
            batch.put(Column::BlockIndex, *hash, entry.encode());
        }
        self.store.write_batch_durable(&batch)?;
        Ok(())
    }

    pub fn get(&self, hash: &Hash256) -> Result<Option<BlockIndexEntry>, ChainstateError> {
        match self.store.get(Column::BlockIndex, hash)? {
            Some(bytes) => BlockIndexEntry::decode(&bytes)
                .map(Some)
                .map_err(|err| ChainstateError::corrupt("block_index", hash, err)),
            None => Ok(None),
        }
    }

    /// Walk every stored entry in key order, validate its proof of work and
    /// hand it to the caller's (memoizing) graph constructor.
    ///
    /// The first proof-of-work failure or undecodable record aborts the load.
    pub fn load_all<C, F>(&self, checker: &C, mut insert: F) -> Result<(), ChainstateError>
    where
        C: ProofOfWorkChecker,
        F: FnMut(Hash256, BlockIndexEntry),
    {
        let mut start = Vec::new();
        loop {
            let page = self
                .store
                .scan_from(Column::BlockIndex, &start, BLOCK_INDEX_SCAN_PAGE)?;
            let Some((last_key, _)) = page.last() else {
                return Ok(());
            };
            start = next_key(last_key);
            for (key, value) in &page {
                let hash: Hash256 = key.as_slice().try_into().map_err(|_| {
                    ChainstateError::corrupt("block_index", key, "invalid block hash key")
                })?;
                let entry = BlockIndexEntry::decode(value)
                    .map_err(|err| ChainstateError::corrupt("block_index", key, err))?;
                if !checker.check_proof_of_work(&hash, entry.bits) {
                    return Err(ChainstateError::BadProofOfWork(hash));
                }
                insert(hash, entry);
            }
        }
    }

    pub fn read_block_file_info(&self, file_id: u32) -> Result<Option<BlockFileInfo>, ChainstateError> {
        let key = block_file_key(file_id);
        match self.store.get(Column::BlockFiles, &key)? {
            Some(bytes) => BlockFileInfo::decode(&bytes)
                .map(Some)
                .map_err(|err| ChainstateError::corrupt("block_files", &key, err)),
            None => Ok(None),
        }
    }

    pub fn read_last_block_file(&self) -> Result<Option<u32>, ChainstateError> {
        match self.store.get(Column::Meta, META_LAST_BLOCK_FILE_KEY)? {
            Some(bytes) => {
                let raw: [u8; 4] = bytes.as_slice().try_into().map_err(|_| {
                    ChainstateError::corrupt("meta", META_LAST_BLOCK_FILE_KEY, "invalid length")
                })?;
                Ok(Some(u32::from_le_bytes(raw)))
            }
            None => Ok(None),
        }
    }

    /// Reindexing marker: presence means a reindex is in progress.
    pub fn set_reindexing(&self, reindexing: bool) -> Result<(), ChainstateError> {
        if reindexing {
            self.store.put(Column::Meta, META_REINDEXING_KEY, b"1")?;
        } else {
            self.store.delete(Column::Meta, META_REINDEXING_KEY)?;
        }
        Ok(())
    }

    pub fn is_reindexing(&self) -> Result<bool, ChainstateError> {
        Ok(self.store.contains(Column::Meta, META_REINDEXING_KEY)?)
    }

    pub fn write_flag(&self, name: &str, value: bool) -> Result<(), ChainstateError> {
        write_flag(&self.store, name, value)
    }

    pub fn read_flag(&self, name: &str) -> Result<Option<bool>, ChainstateError> {
        read_flag(&self.store, name)
    }
}
