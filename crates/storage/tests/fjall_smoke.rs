#![cfg(feature = "fjall")]

use walletd_storage::fjall::FjallStore;
use walletd_storage::{Column, KeyValueStore, WriteBatch};

#[test]
fn fjall_roundtrip_survives_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");

    {
        let store = FjallStore::open(dir.path()).expect("open fjall");
        store.put(Column::Meta, b"key", b"value").expect("put");
        store
            .put(Column::ScanProgress, b"prefix:1", b"a")
            .expect("put prefix");
        store
            .put(Column::ScanProgress, b"prefix:2", b"b")
            .expect("put prefix");

        let mut batch = WriteBatch::new();
        batch.put(Column::Meta, b"batch", b"ok");
        batch.delete(Column::Meta, b"key");
        store.write_batch(&batch).expect("batch commit");
    }

    let store = FjallStore::open(dir.path()).expect("reopen fjall");
    assert!(store.get(Column::Meta, b"key").expect("get").is_none());
    assert_eq!(
        store.get(Column::Meta, b"batch").expect("get"),
        Some(b"ok".to_vec())
    );
    let found = store
        .scan_prefix(Column::ScanProgress, b"prefix:")
        .expect("scan");
    assert_eq!(
        found,
        vec![
            (b"prefix:1".to_vec(), b"a".to_vec()),
            (b"prefix:2".to_vec(), b"b".to_vec()),
        ]
    );
}
