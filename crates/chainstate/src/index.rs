use std::sync::Arc;

use primitive_types::U256;
use walletd_consensus::Hash256;
use walletd_pow::difficulty::{work_from_bytes, work_to_bytes};
use walletd_primitives::block::{BlockHeader, HEADER_SIZE};
use walletd_primitives::encoding::{Decoder, Encoder};
use walletd_storage::{Column, KeyValueStore, StoreError, WriteBatch};

use crate::checkpoint::Checkpoint;
use crate::position::Position;

const META_BEST_TIP_KEY: &[u8] = b"best_tip";
const CHECKPOINT_KEY: &[u8] = b"active";

const STATUS_FAILED: u8 = 1 << 0;
const STATUS_FAILED_CHILD: u8 = 1 << 1;
const STATUS_FAILED_MASK: u8 = STATUS_FAILED | STATUS_FAILED_CHILD;

/// Everything the oracle knows about one connected header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeaderRecord {
    pub header: BlockHeader,
    pub height: i64,
    pub chainwork: U256,
    pub status: u8,
    /// Order in which the header connected to the tree. Breaks work ties.
    pub seq: u64,
}

impl HeaderRecord {
    pub fn prev_hash(&self) -> Hash256 {
        self.header.prev_block
    }

    pub fn is_failed(&self) -> bool {
        is_failed(self.status)
    }
}

/// Persistent mirror of the header tree.
pub struct ChainIndex<S> {
    store: Arc<S>,
}

impl<S: KeyValueStore> ChainIndex<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn get_record(&self, hash: &Hash256) -> Result<Option<HeaderRecord>, StoreError> {
        let bytes = match self.store.get(Column::HeaderIndex, hash)? {
            Some(bytes) => bytes,
            None => return Ok(None),
        };
        decode_record(&bytes).map(Some).map_err(StoreError::Backend)
    }

    pub fn put_record(&self, batch: &mut WriteBatch, hash: &Hash256, record: &HeaderRecord) {
        batch.put(Column::HeaderIndex, hash, encode_record(record));
    }

    pub fn scan_records(&self) -> Result<Vec<(Hash256, HeaderRecord)>, StoreError> {
        let entries = self.store.scan_prefix(Column::HeaderIndex, &[])?;
        let mut out = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            let hash = decode_hash(&key).map_err(StoreError::Backend)?;
            let record = decode_record(&value).map_err(StoreError::Backend)?;
            out.push((hash, record));
        }
        Ok(out)
    }

    pub fn set_best_tip(&self, batch: &mut WriteBatch, tip: &Position) {
        batch.put(Column::Meta, META_BEST_TIP_KEY, tip.to_bytes());
    }

    pub fn best_tip(&self) -> Result<Option<Position>, StoreError> {
        match self.store.get(Column::Meta, META_BEST_TIP_KEY)? {
            Some(bytes) => Position::from_bytes(&bytes)
                .map(Some)
                .ok_or_else(|| StoreError::Backend("invalid best tip record".to_string())),
            None => Ok(None),
        }
    }

    pub fn height_hash(&self, height: i64) -> Result<Option<Hash256>, StoreError> {
        let bytes = match self.store.get(Column::HeightIndex, &height_key(height))? {
            Some(bytes) => bytes,
            None => return Ok(None),
        };
        decode_hash(&bytes).map(Some).map_err(StoreError::Backend)
    }

    pub fn set_height_hash(&self, batch: &mut WriteBatch, height: i64, hash: &Hash256) {
        batch.put(Column::HeightIndex, height_key(height), *hash);
    }

    pub fn clear_height_hash(&self, batch: &mut WriteBatch, height: i64) {
        batch.delete(Column::HeightIndex, height_key(height));
    }

    pub fn checkpoint(&self) -> Result<Option<Checkpoint>, StoreError> {
        match self.store.get(Column::Checkpoint, CHECKPOINT_KEY)? {
            Some(bytes) => Checkpoint::decode(&bytes)
                .map(Some)
                .map_err(|err| StoreError::Backend(format!("invalid checkpoint record: {err}"))),
            None => Ok(None),
        }
    }

    pub fn put_checkpoint(&self, batch: &mut WriteBatch, checkpoint: &Checkpoint) {
        batch.put(Column::Checkpoint, CHECKPOINT_KEY, checkpoint.encode());
    }

    pub fn delete_checkpoint(&self, batch: &mut WriteBatch) {
        batch.delete(Column::Checkpoint, CHECKPOINT_KEY);
    }

    pub fn commit(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        self.store.write_batch(batch)
    }
}

/// Big-endian so that a prefix scan walks heights in order.
pub fn height_key(height: i64) -> [u8; 8] {
    (height as u64).to_be_bytes()
}

fn encode_record(record: &HeaderRecord) -> Vec<u8> {
    let mut encoder = Encoder::with_capacity(HEADER_SIZE + 8 + 32 + 1 + 8);
    encoder.write_bytes(&record.header.consensus_encode());
    encoder.write_i64_le(record.height);
    encoder.write_bytes(&work_to_bytes(record.chainwork));
    encoder.write_u8(record.status);
    encoder.write_u64_le(record.seq);
    encoder.into_inner()
}

pub(crate) fn decode_record(bytes: &[u8]) -> Result<HeaderRecord, String> {
    if bytes.len() < HEADER_SIZE {
        return Err("truncated header record".to_string());
    }
    let header =
        BlockHeader::consensus_decode(&bytes[..HEADER_SIZE]).map_err(|err| err.to_string())?;
    let mut decoder = Decoder::new(&bytes[HEADER_SIZE..]);
    let height = decoder.read_i64_le().map_err(|err| err.to_string())?;
    let chainwork = decoder.read_fixed::<32>().map_err(|err| err.to_string())?;
    let status = decoder.read_u8().map_err(|err| err.to_string())?;
    let seq = decoder.read_u64_le().map_err(|err| err.to_string())?;
    if !decoder.is_empty() {
        return Err("trailing bytes in header record".to_string());
    }
    Ok(HeaderRecord {
        header,
        height,
        chainwork: work_from_bytes(&chainwork),
        status,
        seq,
    })
}

fn decode_hash(bytes: &[u8]) -> Result<Hash256, String> {
    <Hash256>::try_from(bytes).map_err(|_| "invalid hash length".to_string())
}

pub fn status_with_failed(status: u8) -> u8 {
    status | STATUS_FAILED
}

pub fn status_with_failed_child(status: u8) -> u8 {
    status | STATUS_FAILED_CHILD
}

pub fn is_failed(status: u8) -> bool {
    (status & STATUS_FAILED_MASK) != 0
}
