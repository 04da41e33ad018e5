//! Difficulty and compact target utilities.

use primitive_types::U256;
use walletd_consensus::Hash256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactError {
    Negative,
    Overflow,
}

impl std::fmt::Display for CompactError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompactError::Negative => write!(f, "compact target has negative sign bit"),
            CompactError::Overflow => write!(f, "compact target overflows 256-bit range"),
        }
    }
}

impl std::error::Error for CompactError {}

pub fn compact_to_u256(bits: u32) -> Result<U256, CompactError> {
    let size = bits >> 24;
    let mut word = bits & 0x007f_ffff;
    let negative = (bits & 0x0080_0000) != 0;

    if negative {
        return Err(CompactError::Negative);
    }

    let value = if size <= 3 {
        let shift = 8 * (3 - size);
        word >>= shift;
        U256::from(word)
    } else {
        let shift = 8 * (size - 3);
        U256::from(word) << shift
    };

    if word != 0 {
        let overflow = size > 34 || (word > 0xff && size > 33) || (word > 0xffff && size > 32);
        if overflow {
            return Err(CompactError::Overflow);
        }
    }

    Ok(value)
}

pub fn u256_to_compact(value: U256) -> u32 {
    if value.is_zero() {
        return 0;
    }

    let mut size = value.bits().div_ceil(8) as u32;
    let mut compact: u32;

    if size <= 3 {
        compact = value.low_u32() << (8 * (3 - size));
    } else {
        let shift = 8 * (size - 3);
        compact = (value >> shift).low_u32();
    }

    if (compact & 0x0080_0000) != 0 {
        compact >>= 8;
        size += 1;
    }

    (size << 24) | (compact & 0x007f_ffff)
}

pub fn compact_to_target(bits: u32) -> Result<Hash256, CompactError> {
    let value = compact_to_u256(bits)?;
    Ok(u256_to_hash(value))
}

pub fn target_to_compact(target: &Hash256) -> u32 {
    let value = U256::from_little_endian(target);
    u256_to_compact(value)
}

pub fn hash_meets_target(hash: &Hash256, target: &Hash256) -> bool {
    let hash_value = U256::from_little_endian(hash);
    let target_value = U256::from_little_endian(target);
    hash_value <= target_value
}

/// Expected number of hashes needed to meet the target encoded by `bits`.
pub fn block_proof(bits: u32) -> Result<U256, CompactError> {
    let target = compact_to_u256(bits)?;
    if target.is_zero() {
        return Ok(U256::zero());
    }
    let one = U256::from(1u64);
    Ok((!target / (target + one)) + one)
}

fn u256_to_hash(value: U256) -> Hash256 {
    value.to_little_endian()
}

/// Chain work as stored on disk: 32 big-endian bytes.
pub fn work_to_bytes(work: U256) -> [u8; 32] {
    work.to_big_endian()
}

pub fn work_from_bytes(bytes: &[u8; 32]) -> U256 {
    U256::from_big_endian(bytes)
}
