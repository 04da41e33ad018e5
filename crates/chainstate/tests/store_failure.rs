use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use walletd_chainstate::{
    ChainView, HeaderOracle, HeaderState, OracleError, Position, ReorgEvent, ReorgListener,
    TrustedHeaders,
};
use walletd_consensus::params::{chain_params, ChainParams, Network};
use walletd_primitives::block::{genesis_header, BlockHeader};
use walletd_storage::memory::MemoryStore;
use walletd_storage::{
    Column, KeyValueStore, PrefixVisitor, ScanResult, StoreError, WriteBatch,
};

/// Memory store whose batch writes can be switched to fail.
#[derive(Default)]
struct FlakyStore {
    inner: MemoryStore,
    fail_writes: AtomicBool,
}

impl FlakyStore {
    fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl KeyValueStore for FlakyStore {
    fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.inner.get(column, key)
    }

    fn put(&self, column: Column, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.inner.put(column, key, value)
    }

    fn delete(&self, column: Column, key: &[u8]) -> Result<(), StoreError> {
        self.inner.delete(column, key)
    }

    fn scan_prefix(&self, column: Column, prefix: &[u8]) -> Result<ScanResult, StoreError> {
        self.inner.scan_prefix(column, prefix)
    }

    fn for_each_prefix<'a>(
        &self,
        column: Column,
        prefix: &[u8],
        visitor: &mut PrefixVisitor<'a>,
    ) -> Result<(), StoreError> {
        self.inner.for_each_prefix(column, prefix, visitor)
    }

    fn write_batch(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("disk full".to_string()));
        }
        self.inner.write_batch(batch)
    }
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<ReorgEvent>>,
}

impl ReorgListener for Recorder {
    fn on_reorg(&self, event: &ReorgEvent) {
        self.events.lock().expect("events").push(event.clone());
    }
}

fn params() -> ChainParams {
    chain_params(Network::Regtest)
}

fn open(store: &Arc<FlakyStore>) -> HeaderOracle<FlakyStore> {
    HeaderOracle::open(Arc::clone(store), params(), Arc::new(TrustedHeaders)).expect("open oracle")
}

fn chain(from: &BlockHeader, len: usize) -> Vec<BlockHeader> {
    let mut out: Vec<BlockHeader> = Vec::with_capacity(len);
    for _ in 0..len {
        let prev = out.last().unwrap_or(from).clone();
        out.push(BlockHeader {
            version: 4,
            prev_block: prev.hash(),
            merkle_root: [0u8; 32],
            time: prev.time + 60,
            bits: 0x207f_ffff,
            nonce: 0,
        });
    }
    out
}

#[test]
fn failed_commit_hides_the_unpersisted_tip_and_poisons() {
    let store = Arc::new(FlakyStore::default());
    let oracle = open(&store);
    let recorder = Arc::new(Recorder::default());
    oracle.add_listener(recorder.clone());
    let genesis = genesis_header(&params());
    let headers = chain(&genesis, 3);

    store.fail_writes(true);
    assert!(matches!(
        oracle.add_headers(&headers),
        Err(OracleError::Store(_))
    ));

    assert!(oracle.is_poisoned());
    assert!(recorder.events.lock().expect("events").is_empty());
    assert_eq!(oracle.best_chain(), Position::none());
    assert_eq!(oracle.best_hash(3), None);
    assert!(oracle.best_positions(0, 3).is_empty());
    assert!(!oracle.is_in_best_chain(&Position::new(3, headers[2].hash())));
    assert_eq!(oracle.header_state(&headers[2].hash()), HeaderState::Unknown);
    assert!(oracle.load_header(&headers[2].hash()).is_none());

    store.fail_writes(false);
    assert!(matches!(
        oracle.add_headers(&headers),
        Err(OracleError::Poisoned)
    ));
    assert!(matches!(
        oracle.invalidate(&headers[0].hash()),
        Err(OracleError::Poisoned)
    ));
    assert!(recorder.events.lock().expect("events").is_empty());

    let reopened = open(&store);
    assert_eq!(reopened.best_chain(), Position::new(0, genesis.hash()));
    reopened.add_headers(&headers).expect("add after reopen");
    assert_eq!(reopened.best_chain(), Position::new(3, headers[2].hash()));
}

#[test]
fn failed_checkpoint_commit_leaves_no_checkpoint_visible() {
    let store = Arc::new(FlakyStore::default());
    let oracle = open(&store);
    let genesis = genesis_header(&params());
    let headers = chain(&genesis, 2);
    oracle.add_headers(&headers).expect("add");

    store.fail_writes(true);
    let result = oracle.add_checkpoint(Position::new(2, headers[1].hash()), headers[0].hash());
    assert!(matches!(result, Err(OracleError::Store(_))));
    assert!(oracle.is_poisoned());
    assert_eq!(oracle.checkpoint(), None);

    store.fail_writes(false);
    let reopened = open(&store);
    assert_eq!(reopened.checkpoint(), None);
    assert_eq!(reopened.best_chain(), Position::new(2, headers[1].hash()));
}
