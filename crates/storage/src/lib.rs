use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;

pub mod memory;

#[cfg(feature = "fjall")]
pub mod fjall;

#[derive(Debug)]
pub enum StoreError {
    Backend(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Backend(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Logical tables of the chain-state store. Each column maps to one sorted
/// keyspace in the engine; single-valued markers live under named keys in
/// [`Column::Meta`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum Column {
    Coin,
    CoinsLegacy,
    BlockIndex,
    BlockFiles,
    TxIndex,
    TxIndexLegacy,
    VoteTally,
    VoterCandidates,
    CandidateVoters,
    AddressBalance,
    AssetFrozen,
    Flags,
    Meta,
}

impl Column {
    pub const ALL: [Column; 13] = [
        Column::Coin,
        Column::CoinsLegacy,
        Column::BlockIndex,
        Column::BlockFiles,
        Column::TxIndex,
        Column::TxIndexLegacy,
        Column::VoteTally,
        Column::VoterCandidates,
        Column::CandidateVoters,
        Column::AddressBalance,
        Column::AssetFrozen,
        Column::Flags,
        Column::Meta,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Column::Coin => "coin",
            Column::CoinsLegacy => "coins_legacy",
            Column::BlockIndex => "block_index",
            Column::BlockFiles => "block_files",
            Column::TxIndex => "tx_index",
            Column::TxIndexLegacy => "tx_index_legacy",
            Column::VoteTally => "vote_tally",
            Column::VoterCandidates => "voter_candidates",
            Column::CandidateVoters => "candidate_voters",
            Column::AddressBalance => "address_balance",
            Column::AssetFrozen => "asset_frozen",
            Column::Flags => "flags",
            Column::Meta => "meta",
        }
    }
}

#[derive(Clone, Debug)]
pub struct WriteKey(SmallVec<[u8; 64]>);

impl WriteKey {
    pub fn as_slice(&self) -> &[u8] {
        self.0.as_slice()
    }
}

impl AsRef<[u8]> for WriteKey {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl From<Vec<u8>> for WriteKey {
    fn from(value: Vec<u8>) -> Self {
        Self(SmallVec::from_vec(value))
    }
}

impl From<&[u8]> for WriteKey {
    fn from(value: &[u8]) -> Self {
        Self(SmallVec::from_slice(value))
    }
}

impl<const N: usize> From<[u8; N]> for WriteKey {
    fn from(value: [u8; N]) -> Self {
        Self(SmallVec::from_slice(&value))
    }
}

impl<const N: usize> From<&[u8; N]> for WriteKey {
    fn from(value: &[u8; N]) -> Self {
        Self(SmallVec::from_slice(value))
    }
}

impl From<String> for WriteKey {
    fn from(value: String) -> Self {
        Self(SmallVec::from_vec(value.into_bytes()))
    }
}

impl From<&str> for WriteKey {
    fn from(value: &str) -> Self {
        Self(SmallVec::from_slice(value.as_bytes()))
    }
}

#[derive(Clone, Debug)]
pub struct WriteValue(SmallVec<[u8; 32]>);

impl WriteValue {
    pub fn as_slice(&self) -> &[u8] {
        self.0.as_slice()
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.0.into_vec()
    }
}

impl AsRef<[u8]> for WriteValue {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl From<Vec<u8>> for WriteValue {
    fn from(value: Vec<u8>) -> Self {
        Self(SmallVec::from_vec(value))
    }
}

impl From<&[u8]> for WriteValue {
    fn from(value: &[u8]) -> Self {
        Self(SmallVec::from_slice(value))
    }
}

impl<const N: usize> From<[u8; N]> for WriteValue {
    fn from(value: [u8; N]) -> Self {
        Self(SmallVec::from_slice(&value))
    }
}

impl<const N: usize> From<&[u8; N]> for WriteValue {
    fn from(value: &[u8; N]) -> Self {
        Self(SmallVec::from_slice(value))
    }
}

impl From<String> for WriteValue {
    fn from(value: String) -> Self {
        Self(SmallVec::from_vec(value.into_bytes()))
    }
}

impl From<&str> for WriteValue {
    fn from(value: &str) -> Self {
        Self(SmallVec::from_slice(value.as_bytes()))
    }
}

#[derive(Clone, Debug)]
pub enum WriteOp {
    Put {
        column: Column,
        key: WriteKey,
        value: WriteValue,
    },
    Delete {
        column: Column,
        key: WriteKey,
    },
}

/// Per-op bookkeeping overhead used by the size estimate, mirroring the
/// engine's own per-entry framing cost.
const OP_OVERHEAD_BYTES: usize = 16;

#[derive(Clone, Debug, Default)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
    estimated_bytes: usize,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, column: Column, key: impl Into<WriteKey>, value: impl Into<WriteValue>) {
        let key = key.into();
        let value = value.into();
        self.estimated_bytes += OP_OVERHEAD_BYTES + key.as_slice().len() + value.as_slice().len();
        self.ops.push(WriteOp::Put { column, key, value });
    }

    pub fn delete(&mut self, column: Column, key: impl Into<WriteKey>) {
        let key = key.into();
        self.estimated_bytes += OP_OVERHEAD_BYTES + key.as_slice().len();
        self.ops.push(WriteOp::Delete { column, key });
    }

    pub fn iter(&self) -> impl Iterator<Item = &WriteOp> {
        self.ops.iter()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Approximate staged size in bytes; callers flush once this crosses
    /// their batch threshold.
    pub fn size_estimate(&self) -> usize {
        self.estimated_bytes
    }

    pub fn clear(&mut self) {
        self.ops.clear();
        self.estimated_bytes = 0;
    }
}

pub type ScanResult = Vec<(Vec<u8>, Vec<u8>)>;
pub type PrefixVisitor<'a> = dyn FnMut(&[u8], &[u8]) -> Result<(), StoreError> + 'a;

pub trait KeyValueStore: Send + Sync {
    fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;
    fn contains(&self, column: Column, key: &[u8]) -> Result<bool, StoreError> {
        Ok(self.get(column, key)?.is_some())
    }
    fn put(&self, column: Column, key: &[u8], value: &[u8]) -> Result<(), StoreError>;
    fn delete(&self, column: Column, key: &[u8]) -> Result<(), StoreError>;
    fn scan_prefix(&self, column: Column, prefix: &[u8]) -> Result<ScanResult, StoreError>;
    fn for_each_prefix<'a>(
        &self,
        column: Column,
        prefix: &[u8],
        visitor: &mut PrefixVisitor<'a>,
    ) -> Result<(), StoreError>;
    /// Ordered page of at most `limit` entries whose keys are `>= start`.
    /// Drives resumable table walks without holding a cursor open across
    /// interleaved writes.
    fn scan_from(&self, column: Column, start: &[u8], limit: usize)
        -> Result<ScanResult, StoreError>;
    fn write_batch(&self, batch: &WriteBatch) -> Result<(), StoreError>;
    /// Like [`write_batch`](KeyValueStore::write_batch) but synced to durable
    /// storage before returning. Engines without a weaker default mode may
    /// alias the two.
    fn write_batch_durable(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        self.write_batch(batch)
    }
    /// Advisory compaction of an erased key range. Engines that compact on
    /// their own may treat this as a hint.
    fn compact_range(&self, column: Column, start: &[u8], end: &[u8]) -> Result<(), StoreError>;
}

impl<T: KeyValueStore + ?Sized> KeyValueStore for Arc<T> {
    fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.as_ref().get(column, key)
    }

    fn contains(&self, column: Column, key: &[u8]) -> Result<bool, StoreError> {
        self.as_ref().contains(column, key)
    }

    fn put(&self, column: Column, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.as_ref().put(column, key, value)
    }

    fn delete(&self, column: Column, key: &[u8]) -> Result<(), StoreError> {
        self.as_ref().delete(column, key)
    }

    fn scan_prefix(&self, column: Column, prefix: &[u8]) -> Result<ScanResult, StoreError> {
        self.as_ref().scan_prefix(column, prefix)
    }

    fn for_each_prefix<'a>(
        &self,
        column: Column,
        prefix: &[u8],
        visitor: &mut PrefixVisitor<'a>,
    ) -> Result<(), StoreError> {
        self.as_ref().for_each_prefix(column, prefix, visitor)
    }

    fn scan_from(
        &self,
        column: Column,
        start: &[u8],
        limit: usize,
    ) -> Result<ScanResult, StoreError> {
        self.as_ref().scan_from(column, start, limit)
    }

    fn write_batch(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        self.as_ref().write_batch(batch)
    }

    fn write_batch_durable(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        self.as_ref().write_batch_durable(batch)
    }

    fn compact_range(&self, column: Column, start: &[u8], end: &[u8]) -> Result<(), StoreError> {
        self.as_ref().compact_range(column, start, end)
    }
}
