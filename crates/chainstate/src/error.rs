use walletd_pow::difficulty::CompactError;
use walletd_pow::validation::PowError;
use walletd_storage::StoreError;

/// Why a single header was refused. The rest of its batch is unaffected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderError {
    TimeTooNew,
    InvalidBits(&'static str),
    ProofOfWork(PowError),
    CheckpointMismatch,
    UnknownGenesis,
    FailedAncestor,
    Failed,
    Cycle,
}

impl std::fmt::Display for HeaderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HeaderError::TimeTooNew => write!(f, "block timestamp too far in the future"),
            HeaderError::InvalidBits(message) => write!(f, "{message}"),
            HeaderError::ProofOfWork(err) => write!(f, "{err}"),
            HeaderError::CheckpointMismatch => write!(f, "checkpoint mismatch"),
            HeaderError::UnknownGenesis => write!(f, "header claims an unknown genesis"),
            HeaderError::FailedAncestor => write!(f, "header descends from a failed header"),
            HeaderError::Failed => write!(f, "header previously marked failed"),
            HeaderError::Cycle => write!(f, "header parent chain loops back on itself"),
        }
    }
}

impl std::error::Error for HeaderError {}

impl From<PowError> for HeaderError {
    fn from(err: PowError) -> Self {
        HeaderError::ProofOfWork(err)
    }
}

impl From<CompactError> for HeaderError {
    fn from(_: CompactError) -> Self {
        HeaderError::InvalidBits("invalid difficulty target")
    }
}

#[derive(Debug)]
pub enum OracleError {
    Store(StoreError),
    CorruptIndex(&'static str),
    /// A previous failure left memory and disk out of step; the oracle no
    /// longer accepts mutations.
    Poisoned,
    NotFound,
    CheckpointConflict(&'static str),
    InvalidGenesis,
}

impl std::fmt::Display for OracleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OracleError::Store(err) => write!(f, "{err}"),
            OracleError::CorruptIndex(message) => write!(f, "corrupt header index: {message}"),
            OracleError::Poisoned => write!(f, "header oracle refuses mutation after corruption"),
            OracleError::NotFound => write!(f, "header not found"),
            OracleError::CheckpointConflict(message) => write!(f, "{message}"),
            OracleError::InvalidGenesis => write!(f, "genesis header cannot be changed"),
        }
    }
}

impl std::error::Error for OracleError {}

impl From<StoreError> for OracleError {
    fn from(err: StoreError) -> Self {
        OracleError::Store(err)
    }
}
