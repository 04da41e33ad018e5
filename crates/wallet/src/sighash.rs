//! Legacy signature hashing for transparent inputs.

use walletd_consensus::Hash256;
use walletd_primitives::hash::sha256d;
use walletd_primitives::transaction::{Transaction, TransactionEncodeError};

pub const SIGHASH_ALL: u32 = 0x01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SighashError {
    InputIndexOutOfRange,
    Encoding(TransactionEncodeError),
}

impl std::fmt::Display for SighashError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SighashError::InputIndexOutOfRange => write!(f, "input index out of range"),
            SighashError::Encoding(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for SighashError {}

impl From<TransactionEncodeError> for SighashError {
    fn from(err: TransactionEncodeError) -> Self {
        SighashError::Encoding(err)
    }
}

/// SIGHASH_ALL digest for `input_index`: every other input's script is
/// emptied, the signed input carries `script_code`, and the hash type is
/// appended before double hashing.
pub fn signature_hash(
    tx: &Transaction,
    input_index: usize,
    script_code: &[u8],
) -> Result<Hash256, SighashError> {
    if input_index >= tx.vin.len() {
        return Err(SighashError::InputIndexOutOfRange);
    }
    let mut copy = tx.clone();
    for (index, input) in copy.vin.iter_mut().enumerate() {
        input.script_sig = if index == input_index {
            script_code.to_vec()
        } else {
            Vec::new()
        };
    }
    let mut bytes = copy.consensus_encode()?;
    bytes.extend_from_slice(&SIGHASH_ALL.to_le_bytes());
    Ok(sha256d(&bytes))
}
