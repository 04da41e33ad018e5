use std::sync::{Arc, Mutex};

use walletd_chainstate::{
    ChainView, HeaderOracle, Position, ReorgEvent, ReorgListener, TrustedHeaders,
};
use walletd_consensus::params::{chain_params, ChainParams, Network};
use walletd_primitives::block::{genesis_header, BlockHeader};
use walletd_storage::memory::MemoryStore;
use walletd_wallet::{ScanTracker, SubaccountId, Subchain};

fn params() -> ChainParams {
    chain_params(Network::Regtest)
}

fn child(prev: &BlockHeader, nonce: u32) -> BlockHeader {
    BlockHeader {
        version: 4,
        prev_block: prev.hash(),
        merkle_root: [0u8; 32],
        time: prev.time + 60,
        bits: 0x207f_ffff,
        nonce,
    }
}

fn extend(from: &BlockHeader, len: usize, tag: u32) -> Vec<BlockHeader> {
    let mut out: Vec<BlockHeader> = Vec::with_capacity(len);
    for _ in 0..len {
        let prev = out.last().unwrap_or(from).clone();
        out.push(child(&prev, tag));
    }
    out
}

fn positions(from_height: i64, headers: &[BlockHeader]) -> Vec<Position> {
    headers
        .iter()
        .enumerate()
        .map(|(offset, header)| Position::new(from_height + offset as i64, header.hash()))
        .collect()
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

struct Setup {
    store: Arc<MemoryStore>,
    oracle: Arc<HeaderOracle<MemoryStore>>,
    genesis: BlockHeader,
    chain: Vec<BlockHeader>,
}

fn setup(len: usize) -> Setup {
    let store = Arc::new(MemoryStore::new());
    let oracle = Arc::new(
        HeaderOracle::open(Arc::clone(&store), params(), Arc::new(TrustedHeaders))
            .expect("oracle"),
    );
    let genesis = genesis_header(&params());
    let chain = extend(&genesis, len, 0);
    oracle.add_headers(&chain).expect("headers");
    Setup {
        store,
        oracle,
        genesis,
        chain,
    }
}

impl Setup {
    fn genesis_position(&self) -> Position {
        Position::new(0, self.genesis.hash())
    }

    fn at(&self, height: i64) -> Position {
        Position::new(height, self.chain[(height - 1) as usize].hash())
    }

    fn tracker(&self, subchain: Subchain) -> Arc<ScanTracker<MemoryStore>> {
        let view: Arc<dyn ChainView> = Arc::clone(&self.oracle) as Arc<dyn ChainView>;
        Arc::new(ScanTracker::new(
            SubaccountId(1),
            subchain,
            self.genesis_position(),
            view,
            Arc::clone(&self.store),
        ))
    }
}

#[test]
fn init_marks_every_block_above_birth_dirty() {
    let s = setup(10);
    let tracker = s.tracker(Subchain::External);
    tracker.init().expect("init");

    let progress = tracker.progress().expect("progress");
    assert_eq!(progress.clean_tip, s.genesis_position());
    assert_eq!(progress.dirty, positions(1, &s.chain));
    assert!(progress.resolved_ahead.is_empty());
    assert_eq!(tracker.dirty(), Some(s.at(1)));
    assert_eq!(tracker.dirty_batch(3), vec![s.at(1), s.at(2), s.at(3)]);
}

#[test]
fn scan_and_process_advance_the_clean_tip() {
    let s = setup(10);
    let tracker = s.tracker(Subchain::External);
    tracker.init().expect("init");

    tracker.update_scan(Some(s.at(6)), &[s.at(3)]).expect("scan");
    let progress = tracker.progress().expect("progress");
    assert_eq!(progress.clean_tip, s.at(6));
    assert_eq!(
        progress.dirty,
        vec![s.at(3), s.at(7), s.at(8), s.at(9), s.at(10)]
    );

    tracker.update_process(&[s.at(3)]).expect("process");
    tracker.update_process(&[s.at(8)]).expect("process");
    let progress = tracker.progress().expect("progress");
    assert_eq!(progress.clean_tip, s.at(6));
    assert_eq!(progress.resolved_ahead, vec![s.at(8)]);

    tracker.update_process(&[s.at(7)]).expect("process");
    let progress = tracker.progress().expect("progress");
    assert_eq!(progress.clean_tip, s.at(8));
    assert_eq!(progress.dirty, vec![s.at(9), s.at(10)]);
    assert!(progress.resolved_ahead.is_empty());

    tracker.update_process(&[s.at(7), s.at(3)]).expect("repeat");
    assert_eq!(tracker.progress().expect("progress").clean_tip, s.at(8));
}

#[test]
fn clean_tip_never_moves_back_or_off_chain() {
    let s = setup(10);
    let tracker = s.tracker(Subchain::Internal);
    tracker.init().expect("init");
    tracker.update_scan(Some(s.at(5)), &[]).expect("scan");

    tracker.update_scan(Some(s.at(2)), &[]).expect("lower");
    assert_eq!(tracker.progress().expect("progress").clean_tip, s.at(5));

    let stranger = Position::new(9, [0xab; 32]);
    tracker.update_scan(Some(stranger), &[stranger]).expect("off chain");
    let progress = tracker.progress().expect("progress");
    assert_eq!(progress.clean_tip, s.at(5));
    assert!(!progress.dirty.contains(&stranger));

    tracker.update_scan(None, &[s.at(2)]).expect("rescan");
    assert_eq!(tracker.dirty(), Some(s.at(2)));
}

#[test]
fn reorg_rolls_back_and_is_idempotent() {
    let s = setup(10);
    let tracker = s.tracker(Subchain::External);
    tracker.init().expect("init");
    tracker.update_scan(Some(s.at(8)), &[]).expect("scan");
    s.oracle
        .add_listener(Arc::clone(&tracker) as Arc<dyn ReorgListener>);
    let recorder = Arc::new(Recorder::default());
    s.oracle
        .add_listener(Arc::clone(&recorder) as Arc<dyn ReorgListener>);

    let fork = extend(&s.chain[4], 6, 9);
    s.oracle.add_headers(&fork).expect("fork");
    let events = recorder.events.lock().expect("events").clone();
    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event.fork_point, s.at(5));

    let expected = positions(6, &fork);
    let progress = tracker.progress().expect("progress");
    assert_eq!(progress.clean_tip, s.at(5));
    assert_eq!(progress.dirty, expected);

    tracker.reorg(event).expect("again");
    assert_eq!(tracker.progress().expect("progress"), progress);
}

#[test]
fn reorg_below_clean_tip_keeps_lower_dirty_blocks() {
    let s = setup(10);
    let tracker = s.tracker(Subchain::Notification);
    tracker.init().expect("init");
    tracker.update_scan(Some(s.at(4)), &[s.at(2)]).expect("scan");
    tracker.update_process(&[s.at(7)]).expect("ahead");
    s.oracle
        .add_listener(Arc::clone(&tracker) as Arc<dyn ReorgListener>);

    let fork = extend(&s.chain[5], 6, 3);
    s.oracle.add_headers(&fork).expect("fork");

    let progress = tracker.progress().expect("progress");
    assert_eq!(progress.clean_tip, s.at(4));
    let mut expected = vec![s.at(2), s.at(5), s.at(6)];
    expected.extend(positions(7, &fork));
    assert_eq!(progress.dirty, expected);
    assert!(progress.resolved_ahead.is_empty());
}

#[test]
fn persisted_tip_is_reconciled_on_init() {
    let s = setup(10);
    {
        let tracker = s.tracker(Subchain::External);
        tracker.init().expect("init");
        tracker.update_scan(Some(s.at(8)), &[]).expect("scan");
    }

    let reopened = s.tracker(Subchain::External);
    reopened.init().expect("reopen");
    let progress = reopened.progress().expect("progress");
    assert_eq!(progress.clean_tip, s.at(8));
    assert_eq!(progress.dirty, vec![s.at(9), s.at(10)]);

    let other = s.tracker(Subchain::Outgoing);
    other.init().expect("other subchain");
    assert_eq!(
        other.progress().expect("progress").clean_tip,
        s.genesis_position()
    );

    let fork = extend(&s.chain[4], 7, 5);
    s.oracle.add_headers(&fork).expect("fork");
    let after_fork = s.tracker(Subchain::External);
    after_fork.init().expect("init after fork");
    let progress = after_fork.progress().expect("progress");
    assert_eq!(progress.clean_tip, s.at(5));
    assert_eq!(progress.dirty, positions(6, &fork));
}

#[test]
fn reset_rescans_from_birth() {
    let s = setup(6);
    let tracker = s.tracker(Subchain::Incoming);
    tracker.init().expect("init");
    tracker.update_scan(Some(s.at(6)), &[]).expect("scan");
    assert_eq!(tracker.dirty(), None);

    tracker.reset().expect("reset");
    let progress = tracker.progress().expect("progress");
    assert_eq!(progress.clean_tip, s.genesis_position());
    assert_eq!(progress.dirty, positions(1, &s.chain));

    let reopened = s.tracker(Subchain::Incoming);
    reopened.init().expect("reopen");
    assert_eq!(
        reopened.progress().expect("progress").clean_tip,
        s.genesis_position()
    );
}

struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        self.0 >> 33
    }

    fn below(&mut self, bound: u64) -> u64 {
        self.next() % bound.max(1)
    }
}

fn assert_accounted(oracle: &HeaderOracle<MemoryStore>, tracker: &ScanTracker<MemoryStore>) {
    let tip = oracle.best_chain();
    let progress = tracker.progress().expect("progress");
    assert!(progress.clean_tip.height <= tip.height);
    assert!(oracle.is_in_best_chain(&progress.clean_tip));
    for position in oracle.best_positions(progress.clean_tip.height, tip.height) {
        assert!(progress.accounts_for(&position), "gap at {position}");
    }
    for position in progress.dirty.iter().chain(&progress.resolved_ahead) {
        assert!(oracle.is_in_best_chain(position), "stale {position}");
    }
}

#[test]
fn no_best_chain_block_is_ever_skipped() {
    for seed in 1..=10u64 {
        let s = setup(5);
        let tracker = s.tracker(Subchain::External);
        tracker.init().expect("init");
        s.oracle
            .add_listener(Arc::clone(&tracker) as Arc<dyn ReorgListener>);
        let mut rng = Lcg(seed);
        let mut tag = 100u32;

        for _ in 0..40 {
            let tip = s.oracle.best_chain();
            match rng.below(4) {
                0 => {
                    let from = s.oracle.load_header(&tip.hash).expect("tip header");
                    let len = 1 + rng.below(3) as usize;
                    tag += 1;
                    s.oracle.add_headers(&extend(&from, len, tag)).expect("extend");
                }
                1 => {
                    let height = rng.below(tip.height as u64 + 1) as i64;
                    let hash = s.oracle.best_hash(height).expect("best hash");
                    let from = s.oracle.load_header(&hash).expect("fork base");
                    let len = (tip.height - height) as usize + 1 + rng.below(2) as usize;
                    tag += 1;
                    s.oracle.add_headers(&extend(&from, len, tag)).expect("fork");
                }
                2 => {
                    let clean = tracker.progress().expect("progress").clean_tip;
                    let span = (tip.height - clean.height).max(0) as u64;
                    let target = clean.height + 1 + rng.below(span) as i64;
                    let dirty: Vec<Position> = s
                        .oracle
                        .best_positions(clean.height, target)
                        .into_iter()
                        .filter(|_| rng.below(3) == 0)
                        .collect();
                    let target = s
                        .oracle
                        .best_hash(target)
                        .map(|hash| Position::new(target, hash));
                    tracker.update_scan(target, &dirty).expect("scan");
                }
                _ => {
                    let batch: Vec<Position> = tracker
                        .dirty_batch(4)
                        .into_iter()
                        .filter(|_| rng.below(2) == 0)
                        .collect();
                    tracker.update_process(&batch).expect("process");
                }
            }
            assert_accounted(&s.oracle, &tracker);
        }
    }
}
