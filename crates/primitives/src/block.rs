//! Block header and block types.

use walletd_consensus::{ChainParams, Hash256};

use crate::encoding::{Decodable, DecodeError, Decoder, Encodable, Encoder};
use crate::hash::sha256d;
use crate::transaction::{Transaction, TransactionDecodeError, TransactionEncodeError};

pub const HEADER_SIZE: usize = 80;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockHeader {
    pub version: i32,
    pub prev_block: Hash256,
    pub merkle_root: Hash256,
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
}

impl BlockHeader {
    pub fn consensus_encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::with_capacity(HEADER_SIZE);
        Encodable::consensus_encode(self, &mut encoder);
        encoder.into_inner()
    }

    pub fn hash(&self) -> Hash256 {
        sha256d(&self.consensus_encode())
    }

    pub fn consensus_decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let header = <Self as Decodable>::consensus_decode(&mut decoder)?;
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(header)
    }
}

impl Encodable for BlockHeader {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_i32_le(self.version);
        encoder.write_hash_le(&self.prev_block);
        encoder.write_hash_le(&self.merkle_root);
        encoder.write_u32_le(self.time);
        encoder.write_u32_le(self.bits);
        encoder.write_u32_le(self.nonce);
    }
}

impl Decodable for BlockHeader {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        Ok(Self {
            version: decoder.read_i32_le()?,
            prev_block: decoder.read_hash_le()?,
            merkle_root: decoder.read_hash_le()?,
            time: decoder.read_u32_le()?,
            bits: decoder.read_u32_le()?,
            nonce: decoder.read_u32_le()?,
        })
    }
}

/// Header of the first block of `params`' chain.
pub fn genesis_header(params: &ChainParams) -> BlockHeader {
    BlockHeader {
        version: params.genesis.version,
        prev_block: [0u8; 32],
        merkle_root: params.genesis.merkle_root,
        time: params.genesis.time,
        bits: params.genesis.bits,
        nonce: params.genesis.nonce,
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn consensus_encode(&self) -> Result<Vec<u8>, TransactionEncodeError> {
        let mut encoder = Encoder::new();
        Encodable::consensus_encode(&self.header, &mut encoder);
        encoder.write_varint(self.transactions.len() as u64);
        for tx in &self.transactions {
            let bytes = tx.consensus_encode()?;
            encoder.write_bytes(&bytes);
        }
        Ok(encoder.into_inner())
    }

    pub fn consensus_decode(bytes: &[u8]) -> Result<Self, TransactionDecodeError> {
        let mut decoder = Decoder::new(bytes);
        let header = <BlockHeader as Decodable>::consensus_decode(&mut decoder)?;
        let count = decoder.read_varint()?;
        let mut transactions = Vec::new();
        for _ in 0..count {
            transactions.push(Transaction::decode_from(&mut decoder)?);
        }
        if !decoder.is_empty() {
            return Err(TransactionDecodeError::Decode(DecodeError::TrailingBytes));
        }
        Ok(Self {
            header,
            transactions,
        })
    }
}
