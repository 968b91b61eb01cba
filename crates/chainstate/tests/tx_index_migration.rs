use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use votad_chainstate::blockindex::{read_flag, write_flag};
use votad_chainstate::progress::{NullProgress, ProgressSink};
use votad_chainstate::txindex::{
    migrate_tx_index, ChainLocator, MigrationConfig, MigrationStatus, TxIndexStore, TxPosition,
    FLAG_TXINDEX,
};
use votad_primitives::Hash256;
use votad_storage::memory::MemoryStore;
use votad_storage::{Column, KeyValueStore};

fn txid(n: u16) -> Hash256 {
    let mut hash = [0u8; 32];
    hash[..2].copy_from_slice(&n.to_be_bytes());
    hash
}

fn position(n: u16) -> TxPosition {
    TxPosition {
        file: n as u32 / 100,
        offset: 8 + n as u64 * 300,
    }
}

fn seed_legacy(store: &MemoryStore, count: u16) {
    for n in 0..count {
        store
            .put(Column::TxIndexLegacy, &txid(n), &position(n).encode())
            .unwrap();
    }
    write_flag(store, FLAG_TXINDEX, true).unwrap();
}

fn legacy_len(store: &MemoryStore) -> usize {
    store.scan_from(Column::TxIndexLegacy, &[], usize::MAX).unwrap().len()
}

fn locator() -> ChainLocator {
    ChainLocator::new(vec![[0xAA; 32], [0xBB; 32]])
}

/// Raises the shutdown signal on its second report, partway into the copy.
struct CancelOnSecondReport<'a> {
    shutdown: &'a AtomicBool,
    calls: AtomicUsize,
}

impl ProgressSink for CancelOnSecondReport<'_> {
    fn progress(&self, _title: &str, _percent: u32) {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 1 {
            self.shutdown.store(true, Ordering::SeqCst);
        }
    }
}

#[test]
fn locator_roundtrip() {
    let locator = locator();
    assert_eq!(ChainLocator::decode(&locator.encode()), Ok(locator));
    assert!(ChainLocator::default().is_empty());
}

#[test]
fn migration_moves_every_entry() {
    let legacy = Arc::new(MemoryStore::new());
    let new = Arc::new(MemoryStore::new());
    seed_legacy(&legacy, 300);

    let status = migrate_tx_index(
        &new,
        &legacy,
        &locator(),
        &AtomicBool::new(false),
        &NullProgress,
        &MigrationConfig::default(),
    )
    .unwrap();
    assert_eq!(status, MigrationStatus::Completed);

    let index = TxIndexStore::new(new.clone());
    for n in 0..300 {
        assert_eq!(index.read_tx_pos(&txid(n)).unwrap(), Some(position(n)));
    }
    assert_eq!(index.read_best_block().unwrap(), Some(locator()));
    assert_eq!(legacy_len(&legacy), 0);
    assert_eq!(read_flag(legacy.as_ref(), FLAG_TXINDEX).unwrap(), Some(false));
}

#[test]
fn migration_without_flag_or_marker_is_a_no_op() {
    let legacy = Arc::new(MemoryStore::new());
    let new = Arc::new(MemoryStore::new());

    let status = migrate_tx_index(
        &new,
        &legacy,
        &locator(),
        &AtomicBool::new(false),
        &NullProgress,
        &MigrationConfig::default(),
    )
    .unwrap();
    assert_eq!(status, MigrationStatus::Completed);
    assert_eq!(TxIndexStore::new(new).read_best_block().unwrap(), None);
}

#[test]
fn interrupted_migration_resumes_without_reprocessing() {
    let legacy = Arc::new(MemoryStore::new());
    let new = Arc::new(MemoryStore::new());
    seed_legacy(&legacy, 600);

    let shutdown = AtomicBool::new(false);
    let sink = CancelOnSecondReport {
        shutdown: &shutdown,
        calls: AtomicUsize::new(0),
    };
    let status = migrate_tx_index(
        &new,
        &legacy,
        &locator(),
        &shutdown,
        &sink,
        &MigrationConfig::default(),
    )
    .unwrap();
    assert_eq!(status, MigrationStatus::Interrupted);

    // Partial progress is flushed: some entries moved, none lost, and the
    // resume marker plus the cleared flag survive the restart.
    let moved = 600 - legacy_len(&legacy);
    assert!(moved > 0 && moved < 600, "moved {moved} entries");
    assert_eq!(read_flag(legacy.as_ref(), FLAG_TXINDEX).unwrap(), Some(false));
    let index = TxIndexStore::new(new.clone());
    assert_eq!(index.read_best_block().unwrap(), None);

    let status = migrate_tx_index(
        &new,
        &legacy,
        &locator(),
        &AtomicBool::new(false),
        &NullProgress,
        &MigrationConfig::default(),
    )
    .unwrap();
    assert_eq!(status, MigrationStatus::Completed);

    for n in 0..600 {
        assert_eq!(index.read_tx_pos(&txid(n)).unwrap(), Some(position(n)));
    }
    assert_eq!(index.read_best_block().unwrap(), Some(locator()));
    assert_eq!(legacy_len(&legacy), 0);

    // A third run finds no marker and changes nothing.
    let status = migrate_tx_index(
        &new,
        &legacy,
        &locator(),
        &AtomicBool::new(false),
        &NullProgress,
        &MigrationConfig::default(),
    )
    .unwrap();
    assert_eq!(status, MigrationStatus::Completed);
    assert_eq!(legacy_len(&legacy), 0);
}

#[test]
fn write_txs_are_readable_back() {
    let index = TxIndexStore::new(Arc::new(MemoryStore::new()));
    index
        .write_txs(&[(txid(1), position(1)), (txid(2), position(2))])
        .unwrap();
    assert_eq!(index.read_tx_pos(&txid(1)).unwrap(), Some(position(1)));
    assert_eq!(index.read_tx_pos(&txid(3)).unwrap(), None);

    index.write_best_block(&locator()).unwrap();
    assert_eq!(index.read_best_block().unwrap(), Some(locator()));
}
