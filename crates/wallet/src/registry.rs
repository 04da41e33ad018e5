//! Pending proposals and the run loop that drives them to a result.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crossbeam_channel::Sender;
use rayon::prelude::*;

use crate::builder::TxBuilder;
use crate::proposal::{unix_now, Proposal, ProposalHandle, ProposalId, SendResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProposalError {
    DuplicateProposal(ProposalId),
    Poisoned,
}

impl std::fmt::Display for ProposalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProposalError::DuplicateProposal(id) => write!(f, "proposal {id} already exists"),
            ProposalError::Poisoned => write!(f, "proposal registry lock poisoned"),
        }
    }
}

impl std::error::Error for ProposalError {}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Slot {
    Pending,
    Building,
    Resolved(SendResult),
}

struct Entry {
    proposal: Arc<Proposal>,
    slot: Slot,
    completion: Sender<SendResult>,
}

impl Entry {
    fn resolve(&mut self, result: SendResult) {
        let _ = self.completion.try_send(result.clone());
        self.slot = Slot::Resolved(result);
    }
}

/// Registry of proposals keyed by id. Each `run` claims every pending
/// proposal exactly once and builds the claimed set in parallel.
pub struct Proposals {
    builder: Arc<TxBuilder>,
    entries: Mutex<HashMap<ProposalId, Entry>>,
}

impl Proposals {
    pub fn new(builder: Arc<TxBuilder>) -> Self {
        Self {
            builder,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn add(&self, proposal: Proposal) -> Result<ProposalHandle, ProposalError> {
        let mut entries = self.lock()?;
        if entries.contains_key(&proposal.id) {
            return Err(ProposalError::DuplicateProposal(proposal.id));
        }
        let id = proposal.id;
        let (completion, receiver) = crossbeam_channel::bounded(1);
        entries.insert(
            id,
            Entry {
                proposal: Arc::new(proposal),
                slot: Slot::Pending,
                completion,
            },
        );
        walletd_log::log_debug!("proposal {id} queued");
        Ok(ProposalHandle::new(id, receiver))
    }

    /// One build pass. Returns true while any proposal is still pending.
    pub fn run(&self) -> bool {
        let claimed = match self.claim() {
            Ok(claimed) => claimed,
            Err(err) => {
                walletd_log::log_error!("proposal run aborted: {err}");
                return false;
            }
        };

        let results: Vec<(ProposalId, SendResult)> = claimed
            .par_iter()
            .map(|proposal| (proposal.id, self.builder.build(proposal)))
            .collect();

        let Ok(mut entries) = self.lock() else {
            walletd_log::log_error!("proposal registry lock poisoned after build");
            return false;
        };
        for (id, result) in results {
            let Some(entry) = entries.get_mut(&id) else {
                continue;
            };
            if result.is_sent() {
                walletd_log::log_info!("proposal {id} resolved: {result}");
            } else {
                walletd_log::log_warn!("proposal {id} resolved: {result}");
            }
            entry.resolve(result);
        }
        entries
            .values()
            .any(|entry| entry.slot == Slot::Pending)
    }

    /// Resolves expired proposals and moves the rest to `Building`.
    fn claim(&self) -> Result<Vec<Arc<Proposal>>, ProposalError> {
        let now = unix_now();
        let mut entries = self.lock()?;
        let mut claimed = Vec::new();
        for (id, entry) in entries.iter_mut() {
            if entry.slot != Slot::Pending {
                continue;
            }
            if entry.proposal.is_expired_at(now) {
                walletd_log::log_info!("proposal {id} expired before it was built");
                entry.resolve(SendResult::Expired);
                continue;
            }
            entry.slot = Slot::Building;
            claimed.push(Arc::clone(&entry.proposal));
        }
        Ok(claimed)
    }

    /// Result of a resolved proposal. Never blocks.
    pub fn check(&self, id: &ProposalId) -> Option<SendResult> {
        let entries = self.lock().ok()?;
        match &entries.get(id)?.slot {
            Slot::Resolved(result) => Some(result.clone()),
            Slot::Pending | Slot::Building => None,
        }
    }

    /// Removes a resolved proposal and returns its result. Pending and
    /// building proposals stay registered.
    pub fn take(&self, id: &ProposalId) -> Option<SendResult> {
        let mut entries = self.lock().ok()?;
        if !matches!(entries.get(id)?.slot, Slot::Resolved(_)) {
            return None;
        }
        match entries.remove(id)?.slot {
            Slot::Resolved(result) => Some(result),
            Slot::Pending | Slot::Building => None,
        }
    }

    /// Drops every resolved proposal. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let Ok(mut entries) = self.lock() else {
            return 0;
        };
        let before = entries.len();
        entries.retain(|_, entry| !matches!(entry.slot, Slot::Resolved(_)));
        let removed = before - entries.len();
        if removed > 0 {
            walletd_log::log_debug!("pruned {removed} resolved proposal(s)");
        }
        removed
    }

    /// Cancels a proposal that has not started building.
    pub fn cancel(&self, id: &ProposalId) -> bool {
        let Ok(mut entries) = self.lock() else {
            return false;
        };
        match entries.get_mut(id) {
            Some(entry) if entry.slot == Slot::Pending => {
                entry.resolve(SendResult::Cancelled);
                walletd_log::log_info!("proposal {id} cancelled");
                true
            }
            _ => false,
        }
    }

    pub fn is_expired(&self, id: &ProposalId) -> Option<bool> {
        let entries = self.lock().ok()?;
        entries.get(id).map(|entry| entry.proposal.is_expired())
    }

    pub fn pending(&self) -> usize {
        self.lock()
            .map(|entries| {
                entries
                    .values()
                    .filter(|entry| entry.slot == Slot::Pending)
                    .count()
            })
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<ProposalId, Entry>>, ProposalError> {
        self.entries.lock().map_err(|_| ProposalError::Poisoned)
    }
}
