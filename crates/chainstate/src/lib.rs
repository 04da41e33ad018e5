//! Header oracle: the header tree, best-chain selection by accumulated work,
//! checkpoint enforcement and reorg notification.

pub mod checkpoint;
pub mod error;
pub mod index;
pub mod oracle;
pub mod pool;
pub mod position;
pub mod reorg;
pub mod validation;
pub mod view;

pub use checkpoint::Checkpoint;
pub use error::{HeaderError, OracleError};
pub use oracle::{HeaderOracle, HeaderResult, HeaderState, HeaderStatus, OracleOptions};
pub use position::Position;
pub use reorg::{ListenerId, ReorgEvent, ReorgListener};
pub use validation::{HeaderValidator, ProofOfWorkValidator, TrustedHeaders};
pub use view::ChainView;
