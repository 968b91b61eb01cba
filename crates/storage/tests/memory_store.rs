use votad_storage::memory::MemoryStore;
use votad_storage::{Column, KeyValueStore, WriteBatch};

#[test]
fn batch_applies_atomically() {
    let store = MemoryStore::new();
    store.put(Column::Meta, b"stale", b"x").expect("put");

    let mut batch = WriteBatch::new();
    batch.put(Column::Meta, b"fresh", b"y");
    batch.delete(Column::Meta, b"stale");
    store.write_batch(&batch).expect("commit");

    assert_eq!(
        store.get(Column::Meta, b"fresh").expect("get"),
        Some(b"y".to_vec())
    );
    assert!(store.get(Column::Meta, b"stale").expect("get").is_none());
}

#[test]
fn scan_from_pages_in_key_order() {
    let store = MemoryStore::new();
    for key in [b"a".as_slice(), b"b", b"c", b"d"] {
        store.put(Column::TxIndexLegacy, key, b"v").expect("put");
    }
    // A different column must not bleed into the scan.
    store.put(Column::TxIndex, b"bb", b"other").expect("put");

    let page = store
        .scan_from(Column::TxIndexLegacy, b"b", 2)
        .expect("scan");
    let keys: Vec<&[u8]> = page.iter().map(|(key, _)| key.as_slice()).collect();
    assert_eq!(keys, vec![b"b".as_slice(), b"c".as_slice()]);

    let rest = store
        .scan_from(Column::TxIndexLegacy, b"d", 16)
        .expect("scan");
    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0].0, b"d".to_vec());
}

#[test]
fn scan_prefix_is_column_scoped() {
    let store = MemoryStore::new();
    store.put(Column::VoterCandidates, b"addr1", b"x").expect("put");
    store.put(Column::CandidateVoters, b"addr1", b"y").expect("put");

    let entries = store
        .scan_prefix(Column::VoterCandidates, b"addr")
        .expect("scan");
    assert_eq!(entries, vec![(b"addr1".to_vec(), b"x".to_vec())]);
}

#[test]
fn size_estimate_grows_with_staged_bytes() {
    let mut batch = WriteBatch::new();
    assert_eq!(batch.size_estimate(), 0);
    batch.put(Column::Coin, b"key", b"value");
    let after_put = batch.size_estimate();
    assert!(after_put > b"key".len() + b"value".len());
    batch.delete(Column::Coin, b"key");
    assert!(batch.size_estimate() > after_put);
    batch.clear();
    assert_eq!(batch.size_estimate(), 0);
    assert!(batch.is_empty());
}
