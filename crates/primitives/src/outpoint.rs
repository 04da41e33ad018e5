//! Transaction outpoint type.

use walletd_consensus::Hash256;

use crate::encoding::{Decodable, DecodeError, Decoder, Encodable, Encoder};

pub const OUTPOINT_KEY_LEN: usize = 36;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct OutPoint {
    pub hash: Hash256,
    pub index: u32,
}

impl OutPoint {
    pub fn new(hash: Hash256, index: u32) -> Self {
        Self { hash, index }
    }

    /// Fixed-width storage key: txid followed by the little-endian index.
    pub fn key(&self) -> [u8; OUTPOINT_KEY_LEN] {
        let mut bytes = [0u8; OUTPOINT_KEY_LEN];
        bytes[..32].copy_from_slice(&self.hash);
        bytes[32..].copy_from_slice(&self.index.to_le_bytes());
        bytes
    }

    pub fn from_key(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != OUTPOINT_KEY_LEN {
            return None;
        }
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&bytes[..32]);
        let index = u32::from_le_bytes(bytes[32..].try_into().ok()?);
        Some(Self { hash, index })
    }
}

impl Encodable for OutPoint {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_hash_le(&self.hash);
        encoder.write_u32_le(self.index);
    }
}

impl Decodable for OutPoint {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let hash = decoder.read_hash_le()?;
        let index = decoder.read_u32_le()?;
        Ok(Self { hash, index })
    }
}
