use primitive_types::U256;
use walletd_primitives::block::BlockHeader;

use crate::difficulty::{compact_to_u256, CompactError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowError {
    InvalidBits(&'static str),
    HashMismatch,
    Compact(CompactError),
}

impl std::fmt::Display for PowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PowError::InvalidBits(message) => write!(f, "{message}"),
            PowError::HashMismatch => write!(f, "pow hash does not meet target"),
            PowError::Compact(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for PowError {}

impl From<CompactError> for PowError {
    fn from(err: CompactError) -> Self {
        PowError::Compact(err)
    }
}

/// Checks that `header` claims a sane target no easier than `pow_limit_bits`
/// and that its hash meets that target.
pub fn validate_pow_header(header: &BlockHeader, pow_limit_bits: u32) -> Result<(), PowError> {
    let target = compact_to_u256(header.bits)?;
    if target.is_zero() {
        return Err(PowError::InvalidBits("pow target is zero"));
    }

    let pow_limit = compact_to_u256(pow_limit_bits)?;
    if target > pow_limit {
        return Err(PowError::InvalidBits("pow target above limit"));
    }

    let hash_value = U256::from_little_endian(&header.hash());
    if hash_value > target {
        return Err(PowError::HashMismatch);
    }

    Ok(())
}
