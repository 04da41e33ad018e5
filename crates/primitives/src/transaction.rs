//! Transparent transaction types and serialization.

use walletd_consensus::Hash256;

use crate::encoding::{Decodable, DecodeError, Decoder, Encodable, Encoder};
use crate::hash::sha256d;
use crate::outpoint::OutPoint;

pub const CURRENT_TX_VERSION: i32 = 1;
pub const SEQUENCE_FINAL: u32 = 0xffff_ffff;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxIn {
    pub prevout: OutPoint,
    pub script_sig: Vec<u8>,
    pub sequence: u32,
}

impl TxIn {
    pub fn unsigned(prevout: OutPoint) -> Self {
        Self {
            prevout,
            script_sig: Vec::new(),
            sequence: SEQUENCE_FINAL,
        }
    }
}

impl Encodable for TxIn {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        self.prevout.consensus_encode(encoder);
        encoder.write_var_bytes(&self.script_sig);
        encoder.write_u32_le(self.sequence);
    }
}

impl Decodable for TxIn {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let prevout = OutPoint::consensus_decode(decoder)?;
        let script_sig = decoder.read_var_bytes()?;
        let sequence = decoder.read_u32_le()?;
        Ok(Self {
            prevout,
            script_sig,
            sequence,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxOut {
    pub value: i64,
    pub script_pubkey: Vec<u8>,
}

impl Encodable for TxOut {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_i64_le(self.value);
        encoder.write_var_bytes(&self.script_pubkey);
    }
}

impl Decodable for TxOut {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let value = decoder.read_i64_le()?;
        let script_pubkey = decoder.read_var_bytes()?;
        Ok(Self {
            value,
            script_pubkey,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    pub version: i32,
    pub vin: Vec<TxIn>,
    pub vout: Vec<TxOut>,
    pub lock_time: u32,
}

impl Transaction {
    pub fn new() -> Self {
        Self {
            version: CURRENT_TX_VERSION,
            vin: Vec::new(),
            vout: Vec::new(),
            lock_time: 0,
        }
    }

    pub fn consensus_encode(&self) -> Result<Vec<u8>, TransactionEncodeError> {
        if self.vin.is_empty() {
            return Err(TransactionEncodeError::MissingInputs);
        }
        if self.vout.is_empty() {
            return Err(TransactionEncodeError::MissingOutputs);
        }
        let mut encoder = Encoder::new();
        encoder.write_i32_le(self.version);
        write_vec(&mut encoder, &self.vin);
        write_vec(&mut encoder, &self.vout);
        encoder.write_u32_le(self.lock_time);
        Ok(encoder.into_inner())
    }

    pub fn txid(&self) -> Result<Hash256, TransactionEncodeError> {
        Ok(sha256d(&self.consensus_encode()?))
    }

    pub fn consensus_decode(bytes: &[u8]) -> Result<Self, TransactionDecodeError> {
        let mut decoder = Decoder::new(bytes);
        let tx = Self::decode_from(&mut decoder)?;
        if !decoder.is_empty() {
            return Err(TransactionDecodeError::Decode(DecodeError::TrailingBytes));
        }
        Ok(tx)
    }

    pub(crate) fn decode_from(decoder: &mut Decoder) -> Result<Self, TransactionDecodeError> {
        let version = decoder.read_i32_le()?;
        let vin: Vec<TxIn> = read_vec(decoder)?;
        if vin.is_empty() {
            return Err(TransactionDecodeError::Invalid("transaction has no inputs"));
        }
        let vout: Vec<TxOut> = read_vec(decoder)?;
        if vout.is_empty() {
            return Err(TransactionDecodeError::Invalid("transaction has no outputs"));
        }
        let lock_time = decoder.read_u32_le()?;
        Ok(Self {
            version,
            vin,
            vout,
            lock_time,
        })
    }
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new()
    }
}

fn write_vec<T: Encodable>(encoder: &mut Encoder, values: &[T]) {
    encoder.write_varint(values.len() as u64);
    for value in values {
        value.consensus_encode(encoder);
    }
}

fn read_vec<T: Decodable>(decoder: &mut Decoder) -> Result<Vec<T>, DecodeError> {
    let len = decoder.read_varint()?;
    let mut values = Vec::new();
    for _ in 0..len {
        values.push(T::consensus_decode(decoder)?);
    }
    Ok(values)
}

#[derive(Debug)]
pub enum TransactionDecodeError {
    Decode(DecodeError),
    Invalid(&'static str),
}

impl From<DecodeError> for TransactionDecodeError {
    fn from(error: DecodeError) -> Self {
        TransactionDecodeError::Decode(error)
    }
}

impl std::fmt::Display for TransactionDecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionDecodeError::Decode(err) => write!(f, "{err}"),
            TransactionDecodeError::Invalid(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for TransactionDecodeError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionEncodeError {
    MissingInputs,
    MissingOutputs,
}

impl std::fmt::Display for TransactionEncodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionEncodeError::MissingInputs => write!(f, "transaction has no inputs"),
            TransactionEncodeError::MissingOutputs => write!(f, "transaction has no outputs"),
        }
    }
}

impl std::error::Error for TransactionEncodeError {}
