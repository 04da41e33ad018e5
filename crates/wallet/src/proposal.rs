//! Spend proposals and their typed outcomes.

use std::fmt;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use rand::RngCore;
use walletd_consensus::money::Amount;
use walletd_primitives::{OutPoint, Transaction};

use crate::subchain::SubaccountId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProposalId(pub [u8; 16]);

impl ProposalId {
    pub fn random() -> Self {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }
}

impl fmt::Display for ProposalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Recipient {
    pub address: String,
    pub amount: Amount,
}

impl Recipient {
    pub fn new(address: impl Into<String>, amount: Amount) -> Self {
        Self {
            address: address.into(),
            amount,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SpendPolicy {
    /// Overrides the configured fee rate (per 1000 bytes).
    pub fee_per_kb: Option<Amount>,
    /// Outputs that must be spent, ahead of any others.
    pub required_inputs: Vec<OutPoint>,
    /// Spend every spendable output to the single recipient.
    pub sweep: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Proposal {
    pub id: ProposalId,
    pub sender: String,
    pub subaccount: SubaccountId,
    pub recipients: Vec<Recipient>,
    /// Payment-code notification payloads, carried in data-carrier outputs.
    pub notifications: Vec<Vec<u8>>,
    pub policy: SpendPolicy,
    /// Unix seconds after which the proposal is never built.
    pub expires_at: u64,
}

impl Proposal {
    pub fn new(
        sender: impl Into<String>,
        subaccount: SubaccountId,
        recipients: Vec<Recipient>,
        lifetime: Duration,
    ) -> Self {
        Self {
            id: ProposalId::random(),
            sender: sender.into(),
            subaccount,
            recipients,
            notifications: Vec::new(),
            policy: SpendPolicy::default(),
            expires_at: unix_now().saturating_add(lifetime.as_secs()),
        }
    }

    pub fn with_policy(mut self, policy: SpendPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_notification(mut self, payload: Vec<u8>) -> Self {
        self.notifications.push(payload);
        self
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(unix_now())
    }

    pub fn is_expired_at(&self, now: u64) -> bool {
        now >= self.expires_at
    }

    pub fn target(&self) -> Option<Amount> {
        self.recipients
            .iter()
            .try_fold(0i64, |total, recipient| total.checked_add(recipient.amount))
    }
}

/// Terminal outcome of a proposal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SendResult {
    Sent(Transaction),
    InvalidSenderNym,
    MissingRecipients,
    AddressNotValidForChain,
    InsufficientConfirmedFunds,
    InsufficientFunds,
    OutputCreationError,
    ChangeError,
    SignatureError,
    SerializationError,
    SendFailed,
    InvalidSweep,
    DatabaseError,
    Expired,
    Cancelled,
}

impl SendResult {
    pub fn is_sent(&self) -> bool {
        matches!(self, SendResult::Sent(_))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SendResult::Sent(_) => "sent",
            SendResult::InvalidSenderNym => "invalid sender nym",
            SendResult::MissingRecipients => "missing recipients",
            SendResult::AddressNotValidForChain => "address not valid for chain",
            SendResult::InsufficientConfirmedFunds => "insufficient confirmed funds",
            SendResult::InsufficientFunds => "insufficient funds",
            SendResult::OutputCreationError => "output creation error",
            SendResult::ChangeError => "change error",
            SendResult::SignatureError => "signature error",
            SendResult::SerializationError => "serialization error",
            SendResult::SendFailed => "send failed",
            SendResult::InvalidSweep => "invalid sweep",
            SendResult::DatabaseError => "database error",
            SendResult::Expired => "expired",
            SendResult::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for SendResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller's end of a proposal's completion channel.
pub struct ProposalHandle {
    id: ProposalId,
    receiver: Receiver<SendResult>,
    outcome: Mutex<Option<SendResult>>,
}

impl ProposalHandle {
    pub(crate) fn new(id: ProposalId, receiver: Receiver<SendResult>) -> Self {
        Self {
            id,
            receiver,
            outcome: Mutex::new(None),
        }
    }

    pub fn id(&self) -> ProposalId {
        self.id
    }

    /// Outcome if the proposal has resolved. Never blocks.
    pub fn check(&self) -> Option<SendResult> {
        let mut outcome = self.outcome.lock().ok()?;
        if outcome.is_none() {
            match self.receiver.try_recv() {
                Ok(result) => *outcome = Some(result),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {}
            }
        }
        outcome.clone()
    }

    /// Blocks until the proposal resolves or `timeout` passes.
    pub fn wait(&self, timeout: Duration) -> Option<SendResult> {
        let mut outcome = self.outcome.lock().ok()?;
        if outcome.is_none() {
            match self.receiver.recv_timeout(timeout) {
                Ok(result) => *outcome = Some(result),
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {}
            }
        }
        outcome.clone()
    }
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}
