//! Header tree, best-chain selection and reorg detection.

use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use primitive_types::U256;
use rayon::prelude::*;
use smallvec::SmallVec;
use walletd_consensus::{hash256_to_hex, ChainParams, Hash256, NULL_HASH};
use walletd_pow::difficulty::block_proof;
use walletd_primitives::block::{genesis_header, BlockHeader};
use walletd_storage::{KeyValueStore, WriteBatch};

use crate::checkpoint::{check_chain, Checkpoint, Compatibility};
use crate::error::{HeaderError, OracleError};
use crate::index::{status_with_failed, status_with_failed_child, ChainIndex, HeaderRecord};
use crate::pool::{DisconnectedPool, DEFAULT_DISCONNECTED_CAPACITY};
use crate::position::Position;
use crate::reorg::{ListenerId, Listeners, ReorgEvent, ReorgListener};
use crate::validation::{check_header_structure, HeaderValidator};
use crate::view::ChainView;

/// Outcome for one accepted header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeaderStatus {
    Connected { height: i64 },
    /// Parent unknown; buffered until it arrives.
    Disconnected,
    Duplicate,
}

pub type HeaderResult = Result<HeaderStatus, HeaderError>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeaderState {
    Unknown,
    Disconnected,
    BestChain,
    Stale,
    Failed,
}

#[derive(Clone, Copy, Debug)]
pub struct OracleOptions {
    pub disconnected_capacity: usize,
}

impl Default for OracleOptions {
    fn default() -> Self {
        Self {
            disconnected_capacity: DEFAULT_DISCONNECTED_CAPACITY,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct Candidate {
    work: Reverse<U256>,
    seq: u64,
    hash: Hash256,
}

impl Candidate {
    fn of(hash: Hash256, record: &HeaderRecord) -> Self {
        Self {
            work: Reverse(record.chainwork),
            seq: record.seq,
            hash,
        }
    }
}

struct Tree {
    genesis: Hash256,
    records: HashMap<Hash256, HeaderRecord>,
    children: HashMap<Hash256, SmallVec<[Hash256; 2]>>,
    /// Connected, non-failed headers ordered by descending work then
    /// first-seen order.
    candidates: BTreeSet<Candidate>,
    /// Best chain hashes indexed by height.
    best: Vec<Hash256>,
    checkpoint: Option<Checkpoint>,
    pool: DisconnectedPool,
    next_seq: u64,
}

impl Tree {
    fn new(genesis: Hash256, checkpoint: Option<Checkpoint>, capacity: usize) -> Self {
        Self {
            genesis,
            records: HashMap::new(),
            children: HashMap::new(),
            candidates: BTreeSet::new(),
            best: vec![genesis],
            checkpoint,
            pool: DisconnectedPool::new(capacity),
            next_seq: 0,
        }
    }

    fn tip(&self) -> Position {
        let height = self.best.len() as i64 - 1;
        let hash = self.best.last().copied().unwrap_or(self.genesis);
        Position::new(height, hash)
    }

    fn best_hash(&self, height: i64) -> Option<Hash256> {
        if height < 0 {
            return None;
        }
        self.best.get(height as usize).copied()
    }

    fn on_best(&self, hash: &Hash256, height: i64) -> bool {
        self.best_hash(height).as_ref() == Some(hash)
    }

    fn insert_record(&mut self, hash: Hash256, record: HeaderRecord) {
        self.next_seq = self.next_seq.max(record.seq + 1);
        if hash != self.genesis {
            self.children
                .entry(record.prev_hash())
                .or_default()
                .push(hash);
        }
        if !record.is_failed() {
            self.candidates.insert(Candidate::of(hash, &record));
        }
        self.records.insert(hash, record);
    }

    fn ancestor(&self, hash: &Hash256, height: i64) -> Option<Hash256> {
        let mut cursor = *hash;
        let mut record = self.records.get(&cursor)?;
        if height < 0 || height > record.height {
            return None;
        }
        loop {
            if record.height == height {
                return Some(cursor);
            }
            if self.on_best(&cursor, record.height) {
                return self.best_hash(height);
            }
            cursor = record.prev_hash();
            record = self.records.get(&cursor)?;
        }
    }

    fn compatible(&self, hash: &Hash256, record: &HeaderRecord) -> bool {
        let Some(checkpoint) = self.checkpoint.as_ref() else {
            return true;
        };
        let parent_known = self.records.contains_key(&checkpoint.parent);
        let verdict = check_chain(
            checkpoint,
            record.height,
            *hash,
            |height| self.ancestor(hash, height),
            |height| {
                if parent_known {
                    self.ancestor(&checkpoint.parent, height)
                } else {
                    None
                }
            },
        );
        verdict == Compatibility::Compatible
    }

    /// Heaviest checkpoint-compatible header; first seen wins ties.
    fn select(&self) -> Hash256 {
        for candidate in &self.candidates {
            let Some(record) = self.records.get(&candidate.hash) else {
                continue;
            };
            if self.compatible(&candidate.hash, record) {
                return candidate.hash;
            }
        }
        self.genesis
    }

    /// Moves the best chain to `new_tip`, returning the transition.
    fn apply_best(&mut self, new_tip: Hash256) -> Result<Option<ReorgEvent>, OracleError> {
        let old_tip = self.tip();
        if new_tip == old_tip.hash {
            return Ok(None);
        }

        let mut connected = Vec::new();
        let mut cursor = new_tip;
        let fork_height = loop {
            let record = self
                .records
                .get(&cursor)
                .ok_or(OracleError::CorruptIndex("best chain walks into unknown header"))?;
            if self.on_best(&cursor, record.height) {
                break record.height;
            }
            if cursor == self.genesis {
                return Err(OracleError::CorruptIndex("genesis missing from best chain"));
            }
            connected.push(Position::new(record.height, cursor));
            cursor = record.prev_hash();
        };
        connected.reverse();

        let fork_point = Position::new(fork_height, cursor);
        let mut disconnected = Vec::new();
        for height in ((fork_height + 1)..=old_tip.height).rev() {
            if let Some(hash) = self.best_hash(height) {
                disconnected.push(Position::new(height, hash));
            }
        }

        self.best.truncate(fork_height as usize + 1);
        self.best
            .extend(connected.iter().map(|position| position.hash));

        Ok(Some(ReorgEvent {
            fork_point,
            disconnected,
            connected,
        }))
    }

    fn checkpoint_allows(&self, hash: &Hash256, height: i64) -> Result<(), HeaderError> {
        match self.checkpoint.as_ref() {
            Some(checkpoint)
                if checkpoint.height() == height && checkpoint.position.hash != *hash =>
            {
                Err(HeaderError::CheckpointMismatch)
            }
            _ => Ok(()),
        }
    }

    fn connect(
        &mut self,
        hash: Hash256,
        header: BlockHeader,
        parent: (i64, U256),
        touched: &mut Vec<Hash256>,
    ) -> Result<i64, HeaderError> {
        let (parent_height, parent_work) = parent;
        let height = parent_height + 1;
        self.checkpoint_allows(&hash, height)?;
        let chainwork = parent_work.saturating_add(block_proof(header.bits)?);
        let record = HeaderRecord {
            header,
            height,
            chainwork,
            status: 0,
            seq: self.next_seq,
        };
        self.insert_record(hash, record);
        touched.push(hash);
        Ok(height)
    }

    /// Connects buffered descendants of `parent`, breadth first.
    fn promote(&mut self, parent: Hash256, touched: &mut Vec<Hash256>) {
        let mut queue = VecDeque::from([parent]);
        while let Some(next) = queue.pop_front() {
            let Some(record) = self.records.get(&next) else {
                continue;
            };
            let parent_info = (record.height, record.chainwork);
            for (child_hash, child) in self.pool.take_children(&next) {
                match self.connect(child_hash, child, parent_info, touched) {
                    Ok(height) => {
                        walletd_log::log_trace!(
                            "promoted header {} at height {}",
                            hash256_to_hex(&child_hash),
                            height
                        );
                        queue.push_back(child_hash);
                    }
                    Err(err) => {
                        walletd_log::log_debug!(
                            "dropping buffered header {}: {}",
                            hash256_to_hex(&child_hash),
                            err
                        );
                    }
                }
            }
        }
    }

    fn integrate(
        &mut self,
        hash: Hash256,
        header: &BlockHeader,
        touched: &mut Vec<Hash256>,
    ) -> HeaderResult {
        if let Some(existing) = self.records.get(&hash) {
            if existing.is_failed() {
                return Err(HeaderError::Failed);
            }
            return Ok(HeaderStatus::Duplicate);
        }
        if self.pool.contains(&hash) {
            return Ok(HeaderStatus::Disconnected);
        }
        if header.prev_block == NULL_HASH {
            return Err(HeaderError::UnknownGenesis);
        }

        let parent_info = match self.records.get(&header.prev_block) {
            Some(parent) if parent.is_failed() => return Err(HeaderError::FailedAncestor),
            Some(parent) => (parent.height, parent.chainwork),
            None => {
                if self.pool.would_cycle(&hash, &header.prev_block) {
                    return Err(HeaderError::Cycle);
                }
                if let Some(evicted) = self.pool.insert(hash, header.clone()) {
                    walletd_log::log_debug!(
                        "disconnected header pool full; evicted {}",
                        hash256_to_hex(&evicted)
                    );
                }
                return Ok(HeaderStatus::Disconnected);
            }
        };

        let height = self.connect(hash, header.clone(), parent_info, touched)?;
        self.promote(hash, touched);
        Ok(HeaderStatus::Connected { height })
    }

    fn mark_failed(&mut self, hash: Hash256, touched: &mut Vec<Hash256>) {
        let mut stack = vec![(hash, true)];
        while let Some((next, root)) = stack.pop() {
            let Some(record) = self.records.get_mut(&next) else {
                continue;
            };
            let was_failed = record.is_failed();
            record.status = if root {
                status_with_failed(record.status)
            } else {
                status_with_failed_child(record.status)
            };
            let candidate = Candidate::of(next, record);
            if !was_failed {
                self.candidates.remove(&candidate);
            }
            touched.push(next);
            if let Some(children) = self.children.get(&next) {
                stack.extend(children.iter().map(|child| (*child, false)));
            }
        }
    }
}

/// Owns the header tree and the best-chain pointer. Readers get snapshots;
/// mutations are serialised and followed by synchronous reorg delivery.
pub struct HeaderOracle<S> {
    params: ChainParams,
    index: ChainIndex<S>,
    validator: Arc<dyn HeaderValidator>,
    tree: RwLock<Tree>,
    update: Mutex<()>,
    listeners: Listeners,
    poisoned: AtomicBool,
}

impl<S: KeyValueStore> HeaderOracle<S> {
    pub fn open(
        store: Arc<S>,
        params: ChainParams,
        validator: Arc<dyn HeaderValidator>,
    ) -> Result<Self, OracleError> {
        Self::open_with_options(store, params, validator, OracleOptions::default())
    }

    pub fn open_with_options(
        store: Arc<S>,
        params: ChainParams,
        validator: Arc<dyn HeaderValidator>,
        options: OracleOptions,
    ) -> Result<Self, OracleError> {
        let index = ChainIndex::new(store);
        let genesis = genesis_header(&params);
        let genesis_hash = genesis.hash();
        let checkpoint = match index.checkpoint()? {
            Some(checkpoint) => Some(checkpoint),
            None => params.checkpoint.as_ref().map(Checkpoint::from),
        };
        let mut tree = Tree::new(genesis_hash, checkpoint, options.disconnected_capacity);

        let mut stored = index.scan_records()?;
        let mut batch = WriteBatch::new();
        if stored.is_empty() {
            let record = HeaderRecord {
                chainwork: block_proof(genesis.bits)
                    .map_err(|_| OracleError::CorruptIndex("genesis has invalid bits"))?,
                header: genesis,
                height: 0,
                status: 0,
                seq: 0,
            };
            index.put_record(&mut batch, &genesis_hash, &record);
            index.set_height_hash(&mut batch, 0, &genesis_hash);
            index.set_best_tip(&mut batch, &Position::new(0, genesis_hash));
            tree.insert_record(genesis_hash, record);
        } else {
            stored.sort_by_key(|(_, record)| record.seq);
            for (hash, record) in stored {
                if hash == genesis_hash {
                    if record.height != 0 {
                        return Err(OracleError::CorruptIndex("genesis stored at nonzero height"));
                    }
                } else {
                    let parent = tree
                        .records
                        .get(&record.prev_hash())
                        .ok_or(OracleError::CorruptIndex("header record without parent"))?;
                    if parent.height + 1 != record.height {
                        return Err(OracleError::CorruptIndex(
                            "header height does not follow parent",
                        ));
                    }
                }
                tree.insert_record(hash, record);
            }
            if !tree.records.contains_key(&genesis_hash) {
                return Err(OracleError::CorruptIndex("genesis header missing"));
            }
            let stored_tip = index.best_tip()?;
            let best = tree.select();
            tree.apply_best(best)?;
            let tip = tree.tip();
            if stored_tip != Some(tip) {
                if let Some(stale) = stored_tip {
                    for height in (tip.height + 1)..=stale.height {
                        index.clear_height_hash(&mut batch, height);
                    }
                }
                for (height, hash) in tree.best.iter().enumerate() {
                    index.set_height_hash(&mut batch, height as i64, hash);
                }
                index.set_best_tip(&mut batch, &tip);
                walletd_log::log_warn!("best chain index rebuilt at {}", tip);
            }
        }
        if !batch.is_empty() {
            index.commit(&batch)?;
        }

        let tip = tree.tip();
        walletd_log::log_info!(
            "header oracle open on {}: best chain {} ({} headers)",
            params.network.as_str(),
            tip,
            tree.records.len()
        );

        Ok(Self {
            params,
            index,
            validator,
            tree: RwLock::new(tree),
            update: Mutex::new(()),
            listeners: Listeners::default(),
            poisoned: AtomicBool::new(false),
        })
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::Acquire)
    }

    pub fn add_listener(&self, listener: Arc<dyn ReorgListener>) -> ListenerId {
        self.listeners.add(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    /// Integrates `headers` in any order. Each header gets its own result;
    /// a rejected header never aborts the batch. Any best-chain change is
    /// delivered to listeners before this returns.
    pub fn add_headers(&self, headers: &[BlockHeader]) -> Result<Vec<HeaderResult>, OracleError> {
        self.ensure_usable()?;
        let now = unix_now();
        let checked: Vec<(Hash256, Result<(), HeaderError>)> = headers
            .par_iter()
            .map(|header| {
                let hash = header.hash();
                let verdict = check_header_structure(header, &self.params, now)
                    .and_then(|()| self.validator.validate(header, &self.params));
                (hash, verdict)
            })
            .collect();

        let _update = self.update_lock()?;
        let mut touched = Vec::new();
        let (results, event) = {
            let mut tree = self.write_tree()?;
            let mut results = Vec::with_capacity(headers.len());
            for (header, (hash, verdict)) in headers.iter().zip(checked) {
                let result = verdict.and_then(|()| tree.integrate(hash, header, &mut touched));
                if let Err(err) = &result {
                    walletd_log::log_debug!(
                        "rejected header {}: {}",
                        hash256_to_hex(&hash),
                        err
                    );
                }
                results.push(result);
            }
            let (event, batch) = self.reselect(&mut tree, &touched)?;
            self.commit(&batch)?;
            (results, event)
        };

        self.announce(event);
        Ok(results)
    }

    pub fn add_header(&self, header: &BlockHeader) -> Result<HeaderResult, OracleError> {
        let mut results = self.add_headers(std::slice::from_ref(header))?;
        results
            .pop()
            .ok_or(OracleError::CorruptIndex("missing header result"))
    }

    /// Pins the best chain to `position`. Fails when the current best chain
    /// already holds a different header at that height or below it at the
    /// parent height.
    pub fn add_checkpoint(&self, position: Position, parent: Hash256) -> Result<(), OracleError> {
        self.ensure_usable()?;
        if position.height < 0 {
            return Err(OracleError::CheckpointConflict("checkpoint height out of range"));
        }

        let _update = self.update_lock()?;
        let event = {
            let mut tree = self.write_tree()?;
            if let Some(existing) = tree.best_hash(position.height) {
                if existing != position.hash {
                    return Err(OracleError::CheckpointConflict(
                        "best chain holds a different header at the checkpoint height",
                    ));
                }
            }
            if position.height > 0 {
                if let Some(existing) = tree.best_hash(position.height - 1) {
                    if existing != parent {
                        return Err(OracleError::CheckpointConflict(
                            "best chain holds a different checkpoint parent",
                        ));
                    }
                }
            }
            if let Some(record) = tree.records.get(&position.hash) {
                if record.height != position.height || record.prev_hash() != parent {
                    return Err(OracleError::CheckpointConflict(
                        "checkpoint does not match the known header",
                    ));
                }
            }

            let checkpoint = Checkpoint::new(position, parent);
            tree.checkpoint = Some(checkpoint);
            let (event, mut batch) = self.reselect(&mut tree, &[])?;
            self.index.put_checkpoint(&mut batch, &checkpoint);
            self.commit(&batch)?;
            event
        };

        walletd_log::log_info!("checkpoint set at {}", position);
        self.announce(event);
        Ok(())
    }

    /// Reverts to the network's built-in checkpoint, if any.
    pub fn delete_checkpoint(&self) -> Result<(), OracleError> {
        self.ensure_usable()?;
        let _update = self.update_lock()?;
        let event = {
            let mut tree = self.write_tree()?;
            tree.checkpoint = self.params.checkpoint.as_ref().map(Checkpoint::from);
            let (event, mut batch) = self.reselect(&mut tree, &[])?;
            self.index.delete_checkpoint(&mut batch);
            self.commit(&batch)?;
            event
        };
        walletd_log::log_info!("checkpoint reverted to network default");
        self.announce(event);
        Ok(())
    }

    pub fn checkpoint(&self) -> Option<Checkpoint> {
        self.read_tree().ok().and_then(|tree| tree.checkpoint)
    }

    /// Marks `hash` and all of its descendants failed and reselects.
    pub fn invalidate(&self, hash: &Hash256) -> Result<(), OracleError> {
        self.ensure_usable()?;
        let _update = self.update_lock()?;
        let event = {
            let mut tree = self.write_tree()?;
            if *hash == tree.genesis {
                return Err(OracleError::InvalidGenesis);
            }
            if !tree.records.contains_key(hash) {
                return Err(OracleError::NotFound);
            }
            let mut touched = Vec::new();
            tree.mark_failed(*hash, &mut touched);
            walletd_log::log_warn!(
                "invalidated header {} and {} descendant(s)",
                hash256_to_hex(hash),
                touched.len().saturating_sub(1)
            );
            let (event, batch) = self.reselect(&mut tree, &touched)?;
            self.commit(&batch)?;
            event
        };
        self.announce(event);
        Ok(())
    }

    pub fn best_chain(&self) -> Position {
        match self.read_tree() {
            Ok(tree) => tree.tip(),
            Err(_) => Position::none(),
        }
    }

    pub fn load_header(&self, hash: &Hash256) -> Option<BlockHeader> {
        let tree = self.read_tree().ok()?;
        tree.records.get(hash).map(|record| record.header.clone())
    }

    pub fn header_height(&self, hash: &Hash256) -> Option<i64> {
        let tree = self.read_tree().ok()?;
        tree.records.get(hash).map(|record| record.height)
    }

    pub fn chainwork(&self, hash: &Hash256) -> Option<U256> {
        let tree = self.read_tree().ok()?;
        tree.records.get(hash).map(|record| record.chainwork)
    }

    pub fn header_state(&self, hash: &Hash256) -> HeaderState {
        let Ok(tree) = self.read_tree() else {
            return HeaderState::Unknown;
        };
        match tree.records.get(hash) {
            Some(record) if record.is_failed() => HeaderState::Failed,
            Some(record) if tree.on_best(hash, record.height) => HeaderState::BestChain,
            Some(_) => HeaderState::Stale,
            None if tree.pool.contains(hash) => HeaderState::Disconnected,
            None => HeaderState::Unknown,
        }
    }

    pub fn disconnected_count(&self) -> usize {
        self.read_tree().map(|tree| tree.pool.len()).unwrap_or(0)
    }

    /// Block locator: the ten most recent best-chain hashes, then
    /// exponentially sparser, always ending at genesis.
    pub fn recent_hashes(&self) -> Vec<Hash256> {
        let Ok(tree) = self.read_tree() else {
            return Vec::new();
        };
        let mut out = Vec::new();
        let mut height = tree.tip().height;
        let mut step = 1i64;
        while height > 0 {
            if let Some(hash) = tree.best_hash(height) {
                out.push(hash);
            }
            if out.len() >= 10 {
                step = step.saturating_mul(2);
            }
            height -= step;
        }
        out.push(tree.genesis);
        out
    }

    fn ensure_usable(&self) -> Result<(), OracleError> {
        if self.is_poisoned() {
            return Err(OracleError::Poisoned);
        }
        Ok(())
    }

    fn poison(&self, reason: &str) {
        if !self.poisoned.swap(true, Ordering::AcqRel) {
            walletd_log::log_error!("header oracle poisoned: {reason}");
        }
    }

    fn update_lock(&self) -> Result<std::sync::MutexGuard<'_, ()>, OracleError> {
        self.update.lock().map_err(|_| {
            self.poison("update lock poisoned");
            OracleError::Poisoned
        })
    }

    /// Refuses once poisoned: the tree may hold changes that never reached
    /// the store.
    fn read_tree(&self) -> Result<RwLockReadGuard<'_, Tree>, OracleError> {
        let tree = self.tree.read().map_err(|_| OracleError::Poisoned)?;
        self.ensure_usable()?;
        Ok(tree)
    }

    fn write_tree(&self) -> Result<RwLockWriteGuard<'_, Tree>, OracleError> {
        self.tree.write().map_err(|_| {
            self.poison("header tree lock poisoned");
            OracleError::Poisoned
        })
    }

    /// Recomputes the best chain and stages everything that changed.
    fn reselect(
        &self,
        tree: &mut Tree,
        touched: &[Hash256],
    ) -> Result<(Option<ReorgEvent>, WriteBatch), OracleError> {
        let mut batch = WriteBatch::new();
        for hash in touched {
            if let Some(record) = tree.records.get(hash) {
                self.index.put_record(&mut batch, hash, record);
            }
        }
        let best = tree.select();
        let event = tree.apply_best(best).map_err(|err| {
            self.poison("best chain walk failed");
            err
        })?;
        if let Some(event) = event.as_ref() {
            persist_best_chain(&self.index, &mut batch, event);
        }
        Ok((event, batch))
    }

    /// Called with the tree write guard held so no reader sees a tip that
    /// failed to persist.
    fn commit(&self, batch: &WriteBatch) -> Result<(), OracleError> {
        if batch.is_empty() {
            return Ok(());
        }
        self.index.commit(batch).map_err(|err| {
            self.poison("failed to persist header index");
            OracleError::Store(err)
        })
    }

    fn announce(&self, event: Option<ReorgEvent>) {
        if let Some(event) = event {
            if event.is_extension() {
                walletd_log::log_debug!(
                    "best chain extended to {} (+{})",
                    event.new_tip(),
                    event.connected.len()
                );
            } else {
                walletd_log::log_info!(
                    "reorg at {}: disconnected {}, connected {}, new tip {}",
                    event.fork_point,
                    event.disconnected.len(),
                    event.connected.len(),
                    event.new_tip()
                );
            }
            self.listeners.notify(&event);
        }
    }
}

fn persist_best_chain<S: KeyValueStore>(
    index: &ChainIndex<S>,
    batch: &mut WriteBatch,
    event: &ReorgEvent,
) {
    for position in &event.disconnected {
        index.clear_height_hash(batch, position.height);
    }
    for position in &event.connected {
        index.set_height_hash(batch, position.height, &position.hash);
    }
    index.set_best_tip(batch, &event.new_tip());
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or_default()
}

impl<S: KeyValueStore> ChainView for HeaderOracle<S> {
    fn best_chain(&self) -> Position {
        HeaderOracle::best_chain(self)
    }

    fn best_hash(&self, height: i64) -> Option<Hash256> {
        self.read_tree().ok()?.best_hash(height)
    }

    fn common_parent(&self, position: &Position) -> Position {
        if position.is_none() {
            return Position::none();
        }
        let Ok(tree) = self.read_tree() else {
            return Position::none();
        };
        let mut cursor = position.hash;
        while let Some(record) = tree.records.get(&cursor) {
            if tree.on_best(&cursor, record.height) {
                return Position::new(record.height, cursor);
            }
            cursor = record.prev_hash();
        }
        Position::new(0, tree.genesis)
    }

    fn best_positions(&self, from: i64, to: i64) -> Vec<Position> {
        let Ok(tree) = self.read_tree() else {
            return Vec::new();
        };
        let start = from.saturating_add(1).max(0);
        let end = to.min(tree.tip().height);
        (start..=end)
            .filter_map(|height| tree.best_hash(height).map(|hash| Position::new(height, hash)))
            .collect()
    }
}
