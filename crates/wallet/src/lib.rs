//! Wallet side of the daemon: scan progress per subchain, the output ledger
//! and the proposal pipeline that turns spend requests into broadcast
//! transactions.

pub mod builder;
pub mod config;
pub mod fees;
pub mod ledger;
pub mod proposal;
pub mod registry;
pub mod sighash;
pub mod signing;
pub mod subchain;
pub mod tracker;

pub use builder::{
    BroadcastError, Broadcaster, Selection, SelectionRequest, SpendModel, TransparentSpend,
    TxBuilder,
};
pub use config::{ConfigError, WalletConfig};
pub use fees::FeePolicy;
pub use ledger::{
    LedgerError, Maturity, OutputFilter, TxoState, UtxoLedger, WalletLedger, WalletOutput,
};
pub use proposal::{
    Proposal, ProposalHandle, ProposalId, Recipient, SendResult, SpendPolicy,
};
pub use registry::{ProposalError, Proposals};
pub use signing::{InputSignature, LocalKeys, SignError, SigningService};
pub use subchain::{SubaccountId, Subchain};
pub use tracker::{ScanProgress, ScanTracker, TrackerError};
