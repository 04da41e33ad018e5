//! Context-free header checks.

use walletd_consensus::ChainParams;
use walletd_pow::difficulty::compact_to_u256;
use walletd_pow::validation::validate_pow_header;
use walletd_primitives::block::BlockHeader;

use crate::error::HeaderError;

/// Verifies the proof a header carries. Runs before the header touches the
/// tree and may run on several headers in parallel.
pub trait HeaderValidator: Send + Sync {
    fn validate(&self, header: &BlockHeader, params: &ChainParams) -> Result<(), HeaderError>;
}

/// Checks that the header hash meets its claimed target.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProofOfWorkValidator;

impl HeaderValidator for ProofOfWorkValidator {
    fn validate(&self, header: &BlockHeader, params: &ChainParams) -> Result<(), HeaderError> {
        validate_pow_header(header, params.pow_limit_bits)?;
        Ok(())
    }
}

/// Accepts every header. For header sources that were already verified.
#[derive(Clone, Copy, Debug, Default)]
pub struct TrustedHeaders;

impl HeaderValidator for TrustedHeaders {
    fn validate(&self, _header: &BlockHeader, _params: &ChainParams) -> Result<(), HeaderError> {
        Ok(())
    }
}

/// Structural rules the oracle enforces itself: a bounded timestamp and a
/// target no easier than the network limit.
pub fn check_header_structure(
    header: &BlockHeader,
    params: &ChainParams,
    now: i64,
) -> Result<(), HeaderError> {
    if header.time as i64 > now + params.max_future_block_time {
        return Err(HeaderError::TimeTooNew);
    }

    let target = compact_to_u256(header.bits)?;
    if target.is_zero() {
        return Err(HeaderError::InvalidBits("pow target is zero"));
    }
    let limit = compact_to_u256(params.pow_limit_bits)?;
    if target > limit {
        return Err(HeaderError::InvalidBits("pow target above limit"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use walletd_consensus::{chain_params, Network};
    use walletd_primitives::genesis_header;

    #[test]
    fn rejects_far_future_and_easy_targets() {
        let params = chain_params(Network::Regtest);
        let mut header = genesis_header(&params);
        let now = header.time as i64;
        assert_eq!(check_header_structure(&header, &params, now), Ok(()));

        header.time = (now + params.max_future_block_time + 1) as u32;
        assert_eq!(
            check_header_structure(&header, &params, now),
            Err(HeaderError::TimeTooNew)
        );

        header.time = now as u32;
        header.bits = 0x2100_ffff;
        assert!(matches!(
            check_header_structure(&header, &params, now),
            Err(HeaderError::InvalidBits(_))
        ));

        header.bits = 0x0300_0000;
        assert_eq!(
            check_header_structure(&header, &params, now),
            Err(HeaderError::InvalidBits("pow target is zero"))
        );
    }
}
