//! Best-chain change notifications.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::position::Position;

/// One best-chain transition. A plain extension is an event with no
/// disconnected positions whose fork point is the previous tip.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReorgEvent {
    pub fork_point: Position,
    /// Old branch, highest first.
    pub disconnected: Vec<Position>,
    /// New branch, lowest first.
    pub connected: Vec<Position>,
}

impl ReorgEvent {
    pub fn previous_tip(&self) -> Position {
        self.disconnected.first().copied().unwrap_or(self.fork_point)
    }

    pub fn new_tip(&self) -> Position {
        self.connected.last().copied().unwrap_or(self.fork_point)
    }

    pub fn is_extension(&self) -> bool {
        self.disconnected.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.disconnected.len()
    }
}

/// Receives reorg events synchronously, in best-chain order. Listeners may
/// read the oracle but must not submit headers from inside the callback.
pub trait ReorgListener: Send + Sync {
    fn on_reorg(&self, event: &ReorgEvent);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
pub(crate) struct Listeners {
    next_id: AtomicU64,
    entries: RwLock<Vec<(ListenerId, Arc<dyn ReorgListener>)>>,
}

impl Listeners {
    pub(crate) fn add(&self, listener: Arc<dyn ReorgListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        if let Ok(mut guard) = self.entries.write() {
            guard.push((id, listener));
        }
        id
    }

    pub(crate) fn remove(&self, id: ListenerId) -> bool {
        let Ok(mut guard) = self.entries.write() else {
            return false;
        };
        let before = guard.len();
        guard.retain(|(entry_id, _)| *entry_id != id);
        guard.len() != before
    }

    pub(crate) fn notify(&self, event: &ReorgEvent) {
        let snapshot: Vec<Arc<dyn ReorgListener>> = match self.entries.read() {
            Ok(guard) => guard.iter().map(|(_, listener)| Arc::clone(listener)).collect(),
            Err(_) => return,
        };
        for listener in snapshot {
            listener.on_reorg(event);
        }
    }
}
