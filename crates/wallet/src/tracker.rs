//! Per-subchain scan progress: a clean tip plus the best-chain blocks that
//! still need (re)processing.

use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use walletd_chainstate::{ChainView, Position, ReorgEvent, ReorgListener};
use walletd_storage::{Column, KeyValueStore, StoreError};

use crate::subchain::{subchain_key, SubaccountId, Subchain};

#[derive(Debug)]
pub enum TrackerError {
    Store(StoreError),
    Corrupt(&'static str),
    Poisoned,
}

impl std::fmt::Display for TrackerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackerError::Store(err) => write!(f, "{err}"),
            TrackerError::Corrupt(message) => write!(f, "corrupt scan progress: {message}"),
            TrackerError::Poisoned => write!(f, "scan tracker lock poisoned"),
        }
    }
}

impl std::error::Error for TrackerError {}

impl From<StoreError> for TrackerError {
    fn from(err: StoreError) -> Self {
        TrackerError::Store(err)
    }
}

/// Point-in-time copy of a tracker's state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScanProgress {
    pub clean_tip: Position,
    /// Ascending.
    pub dirty: Vec<Position>,
    /// Processed blocks above the clean tip, ascending.
    pub resolved_ahead: Vec<Position>,
}

impl ScanProgress {
    /// True when `position` is still owed work or was already handled ahead
    /// of the clean tip.
    pub fn accounts_for(&self, position: &Position) -> bool {
        self.dirty.binary_search(position).is_ok()
            || self.resolved_ahead.binary_search(position).is_ok()
    }
}

#[derive(Default)]
struct Progress {
    clean: Position,
    dirty: BTreeSet<Position>,
    resolved: BTreeSet<Position>,
}

impl Progress {
    fn discard_above(&mut self, height: i64) {
        self.dirty.retain(|position| position.height <= height);
        self.resolved.retain(|position| position.height <= height);
    }

    /// Moves the clean tip over a contiguous run of resolved blocks.
    fn absorb_resolved(&mut self) -> bool {
        let mut moved = false;
        while let Some(next) = self.resolved.first().copied() {
            if next.height <= self.clean.height {
                self.resolved.remove(&next);
                continue;
            }
            if next.height != self.clean.height + 1 || self.dirty.contains(&next) {
                break;
            }
            self.resolved.remove(&next);
            self.clean = next;
            moved = true;
        }
        moved
    }
}

pub struct ScanTracker<S> {
    subaccount: SubaccountId,
    subchain: Subchain,
    birth: Position,
    view: Arc<dyn ChainView>,
    store: Arc<S>,
    state: Mutex<Progress>,
}

impl<S: KeyValueStore> ScanTracker<S> {
    /// `birth` is where scanning starts when nothing has been persisted; use
    /// `Position::none()` to scan from genesis.
    pub fn new(
        subaccount: SubaccountId,
        subchain: Subchain,
        birth: Position,
        view: Arc<dyn ChainView>,
        store: Arc<S>,
    ) -> Self {
        Self {
            subaccount,
            subchain,
            birth,
            view,
            store,
            state: Mutex::new(Progress {
                clean: birth,
                ..Progress::default()
            }),
        }
    }

    pub fn subaccount(&self) -> SubaccountId {
        self.subaccount
    }

    pub fn subchain(&self) -> Subchain {
        self.subchain
    }

    /// Loads the persisted clean tip, reconciles it with the current best
    /// chain and marks every best-chain block above it dirty.
    pub fn init(&self) -> Result<(), TrackerError> {
        let stored = self.load_clean_tip()?;
        let mut state = self.lock()?;
        let start = stored.unwrap_or(self.birth);
        let clean = self.view.common_parent(&start);
        if clean != start {
            walletd_log::log_warn!(
                "{} {} clean tip {} left the best chain; rolled back to {}",
                self.subaccount,
                self.subchain,
                start,
                clean
            );
        }
        self.restart_from(&mut state, clean);
        self.save_clean_tip(&state.clean)?;
        walletd_log::log_debug!(
            "{} {} scan tracker at {} with {} dirty block(s)",
            self.subaccount,
            self.subchain,
            state.clean,
            state.dirty.len()
        );
        Ok(())
    }

    /// Rewinds to the birth position for a full rescan.
    pub fn reset(&self) -> Result<(), TrackerError> {
        let mut state = self.lock()?;
        let clean = self.view.common_parent(&self.birth);
        self.restart_from(&mut state, clean);
        self.save_clean_tip(&state.clean)?;
        walletd_log::log_info!(
            "{} {} scan progress reset to {}",
            self.subaccount,
            self.subchain,
            state.clean
        );
        Ok(())
    }

    /// Applies a best-chain change. Applying the same event twice leaves the
    /// state as it was after the first application.
    pub fn reorg(&self, event: &ReorgEvent) -> Result<(), TrackerError> {
        let mut state = self.lock()?;
        let fork = event.fork_point;
        let rolled_back = state.clean.height > fork.height;
        if rolled_back {
            walletd_log::log_info!(
                "{} {} clean tip {} rolled back to {}",
                self.subaccount,
                self.subchain,
                state.clean,
                fork
            );
            state.clean = fork;
        }
        state.discard_above(fork.height);
        let clean_height = state.clean.height;
        for position in &event.connected {
            if position.height > clean_height {
                state.dirty.insert(*position);
            }
        }
        if rolled_back {
            self.save_clean_tip(&state.clean)?;
        }
        Ok(())
    }

    /// Records the outcome of a scan pass. The clean tip only moves forward,
    /// and only onto the current best chain; blocks passed over that are not
    /// listed in `dirty_blocks` count as resolved.
    pub fn update_scan(
        &self,
        highest_clean: Option<Position>,
        dirty_blocks: &[Position],
    ) -> Result<(), TrackerError> {
        let mut state = self.lock()?;
        let flagged: HashSet<Position> = dirty_blocks
            .iter()
            .filter(|position| self.view.is_in_best_chain(position))
            .copied()
            .collect();

        let mut moved = false;
        if let Some(target) = highest_clean {
            if target.height > state.clean.height && self.view.is_in_best_chain(&target) {
                let from = state.clean.height;
                state.dirty.retain(|position| {
                    position.height <= from
                        || position.height > target.height
                        || flagged.contains(position)
                });
                state.resolved.retain(|position| position.height > target.height);
                state.clean = target;
                moved = true;
            } else if target.height > state.clean.height {
                walletd_log::log_debug!(
                    "{} {} ignoring clean tip {} off the best chain",
                    self.subaccount,
                    self.subchain,
                    target
                );
            }
        }

        for position in flagged {
            state.resolved.remove(&position);
            state.dirty.insert(position);
        }
        moved |= state.absorb_resolved();
        if moved {
            self.save_clean_tip(&state.clean)?;
        }
        Ok(())
    }

    /// Removes processed blocks from the dirty set. Blocks that are not
    /// dirty are ignored, so repeated delivery is harmless.
    pub fn update_process(&self, processed: &[Position]) -> Result<(), TrackerError> {
        let mut state = self.lock()?;
        for position in processed {
            if state.dirty.remove(position) && position.height > state.clean.height {
                state.resolved.insert(*position);
            }
        }
        if state.absorb_resolved() {
            self.save_clean_tip(&state.clean)?;
        }
        Ok(())
    }

    /// Lowest dirty block, if any.
    pub fn dirty(&self) -> Option<Position> {
        let state = self.lock().ok()?;
        state.dirty.first().copied()
    }

    pub fn dirty_batch(&self, limit: usize) -> Vec<Position> {
        match self.lock() {
            Ok(state) => state.dirty.iter().take(limit).copied().collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn progress(&self) -> Result<ScanProgress, TrackerError> {
        let state = self.lock()?;
        Ok(ScanProgress {
            clean_tip: state.clean,
            dirty: state.dirty.iter().copied().collect(),
            resolved_ahead: state.resolved.iter().copied().collect(),
        })
    }

    fn restart_from(&self, state: &mut Progress, clean: Position) {
        let tip = self.view.best_chain();
        state.clean = clean;
        state.resolved.clear();
        state.dirty = self
            .view
            .best_positions(clean.height, tip.height)
            .into_iter()
            .collect();
    }

    fn lock(&self) -> Result<MutexGuard<'_, Progress>, TrackerError> {
        self.state.lock().map_err(|_| TrackerError::Poisoned)
    }

    fn key(&self) -> [u8; 5] {
        subchain_key(self.subaccount, self.subchain)
    }

    fn load_clean_tip(&self) -> Result<Option<Position>, TrackerError> {
        match self.store.get(Column::ScanProgress, &self.key())? {
            Some(bytes) => Position::from_bytes(&bytes)
                .map(Some)
                .ok_or(TrackerError::Corrupt("clean tip record")),
            None => Ok(None),
        }
    }

    fn save_clean_tip(&self, clean: &Position) -> Result<(), TrackerError> {
        self.store
            .put(Column::ScanProgress, &self.key(), &clean.to_bytes())?;
        Ok(())
    }
}

impl<S: KeyValueStore> ReorgListener for ScanTracker<S> {
    fn on_reorg(&self, event: &ReorgEvent) {
        if let Err(err) = self.reorg(event) {
            walletd_log::log_error!(
                "{} {} failed to apply reorg at {}: {}",
                self.subaccount,
                self.subchain,
                event.fork_point,
                err
            );
        }
    }
}
