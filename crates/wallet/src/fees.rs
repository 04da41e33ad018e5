//! Fee-rate policy and the dust rule for outputs the wallet creates.

use walletd_consensus::money::Amount;
use walletd_primitives::encoding::varint_len;

/// Serialized size of a P2PKH input carrying a compressed key and a
/// maximum-length DER signature.
pub const P2PKH_INPUT_SIZE: usize = 148;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FeePolicy {
    /// Rate applied to the estimated size, per 1000 bytes.
    pub fee_per_kb: Amount,
    /// Floor for any fee and basis of the dust threshold, per 1000 bytes.
    pub min_relay_fee_per_kb: Amount,
}

impl FeePolicy {
    pub fn new(fee_per_kb: Amount, min_relay_fee_per_kb: Amount) -> Self {
        Self {
            fee_per_kb,
            min_relay_fee_per_kb,
        }
    }

    pub fn with_rate(self, fee_per_kb: Amount) -> Self {
        Self { fee_per_kb, ..self }
    }

    /// Fee for a transaction of `size` bytes; never below the relay minimum.
    pub fn fee_for_size(&self, size: usize) -> Amount {
        let floor = min_relay_fee_for_size(self.min_relay_fee_per_kb, size);
        rate_for_size(self.fee_per_kb, size).max(floor)
    }

    /// Outputs below this value cost more to spend than they are worth.
    pub fn dust_threshold(&self, script_pubkey: &[u8]) -> Amount {
        if self.min_relay_fee_per_kb <= 0 {
            return 0;
        }
        let spend_size = output_size(script_pubkey).saturating_add(P2PKH_INPUT_SIZE);
        min_relay_fee_for_size(self.min_relay_fee_per_kb, spend_size).saturating_mul(3)
    }

    pub fn is_dust(&self, value: Amount, script_pubkey: &[u8]) -> bool {
        value < self.dust_threshold(script_pubkey)
    }
}

/// Serialized size of an output paying `script_pubkey`.
pub fn output_size(script_pubkey: &[u8]) -> usize {
    8usize
        .saturating_add(varint_len(script_pubkey.len() as u64))
        .saturating_add(script_pubkey.len())
}

fn rate_for_size(fee_per_kb: Amount, size: usize) -> Amount {
    if fee_per_kb <= 0 {
        return 0;
    }
    let size = i64::try_from(size).unwrap_or(i64::MAX);
    fee_per_kb.saturating_mul(size).saturating_div(1000)
}

fn min_relay_fee_for_size(min_fee_per_kb: Amount, size: usize) -> Amount {
    let fee = rate_for_size(min_fee_per_kb, size);
    if fee == 0 {
        min_fee_per_kb.max(0)
    } else {
        fee
    }
}
