use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::{Column, KeyValueStore, PrefixVisitor, ScanResult, StoreError, WriteBatch, WriteOp};

type MemoryStoreMap = BTreeMap<(Column, Vec<u8>), Vec<u8>>;

/// Ordered in-memory store. Batches apply under one write lock, so readers
/// never observe half of a batch.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryStoreMap>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.read().map(|guard| guard.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryStoreMap>, StoreError> {
        self.inner
            .read()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryStoreMap>, StoreError> {
        self.inner
            .write()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".to_string()))
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let guard = self.read()?;
        Ok(guard.get(&(column, key.to_vec())).cloned())
    }

    fn put(&self, column: Column, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        let mut guard = self.write()?;
        guard.insert((column, key.to_vec()), value.to_vec());
        Ok(())
    }

    fn delete(&self, column: Column, key: &[u8]) -> Result<(), StoreError> {
        let mut guard = self.write()?;
        guard.remove(&(column, key.to_vec()));
        Ok(())
    }

    fn scan_prefix(&self, column: Column, prefix: &[u8]) -> Result<ScanResult, StoreError> {
        let guard = self.read()?;
        let results = guard
            .range((column, prefix.to_vec())..)
            .take_while(|((entry_column, key), _)| {
                *entry_column == column && key.starts_with(prefix)
            })
            .map(|((_, key), value)| (key.clone(), value.clone()))
            .collect();
        Ok(results)
    }

    fn for_each_prefix<'a>(
        &self,
        column: Column,
        prefix: &[u8],
        visitor: &mut PrefixVisitor<'a>,
    ) -> Result<(), StoreError> {
        let guard = self.read()?;
        for ((entry_column, key), value) in guard.range((column, prefix.to_vec())..) {
            if *entry_column != column || !key.starts_with(prefix) {
                break;
            }
            visitor(key.as_slice(), value.as_slice())?;
        }
        Ok(())
    }

    fn write_batch(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        let mut guard = self.write()?;
        for op in batch.iter() {
            match op {
                WriteOp::Put { column, key, value } => {
                    guard.insert(
                        (*column, key.as_slice().to_vec()),
                        value.as_slice().to_vec(),
                    );
                }
                WriteOp::Delete { column, key } => {
                    guard.remove(&(*column, key.as_slice().to_vec()));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_scan_stays_inside_column() {
        let store = MemoryStore::new();
        store.put(Column::Meta, b"a:1", b"x").expect("put");
        store.put(Column::Meta, b"a:2", b"y").expect("put");
        store.put(Column::Meta, b"b:1", b"z").expect("put");
        store.put(Column::ScanProgress, b"a:3", b"w").expect("put");

        let found = store.scan_prefix(Column::Meta, b"a:").expect("scan");
        assert_eq!(
            found,
            vec![
                (b"a:1".to_vec(), b"x".to_vec()),
                (b"a:2".to_vec(), b"y".to_vec())
            ]
        );

        let mut visited = 0;
        store
            .for_each_prefix(Column::Meta, b"", &mut |_: &[u8], _: &[u8]| {
                visited += 1;
                Ok(())
            })
            .expect("visit");
        assert_eq!(visited, 3);
    }

    #[test]
    fn batch_applies_in_order() {
        let store = MemoryStore::new();
        let mut batch = WriteBatch::new();
        batch.put(Column::Meta, b"k", b"v1");
        batch.put(Column::Meta, b"k", b"v2");
        batch.put(Column::Meta, b"gone", b"v");
        batch.delete(Column::Meta, b"gone");
        store.write_batch(&batch).expect("batch");
        assert_eq!(store.get(Column::Meta, b"k").expect("get"), Some(b"v2".to_vec()));
        assert_eq!(store.get(Column::Meta, b"gone").expect("get"), None);
        assert_eq!(store.len(), 1);
    }
}
