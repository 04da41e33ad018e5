//! Pinned chain positions.

use walletd_consensus::{CheckpointParams, Hash256};
use walletd_primitives::encoding::{DecodeError, Decoder, Encoder};

use crate::position::Position;

/// A position every best chain must pass through. Any branch whose ancestor
/// at `position.height` differs is disqualified regardless of work.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Checkpoint {
    pub position: Position,
    pub parent: Hash256,
    pub filter_header: Hash256,
}

impl Checkpoint {
    pub fn new(position: Position, parent: Hash256) -> Self {
        Self {
            position,
            parent,
            filter_header: [0u8; 32],
        }
    }

    pub fn height(&self) -> i64 {
        self.position.height
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::with_capacity(104);
        encoder.write_i64_le(self.position.height);
        encoder.write_hash_le(&self.position.hash);
        encoder.write_hash_le(&self.parent);
        encoder.write_hash_le(&self.filter_header);
        encoder.into_inner()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let height = decoder.read_i64_le()?;
        let hash = decoder.read_hash_le()?;
        let parent = decoder.read_hash_le()?;
        let filter_header = decoder.read_hash_le()?;
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        if height < 0 {
            return Err(DecodeError::InvalidData("negative checkpoint height"));
        }
        Ok(Self {
            position: Position::new(height, hash),
            parent,
            filter_header,
        })
    }
}

impl From<&CheckpointParams> for Checkpoint {
    fn from(params: &CheckpointParams) -> Self {
        Self {
            position: Position::new(params.height, params.hash),
            parent: params.parent,
            filter_header: params.filter_header,
        }
    }
}

/// Verdict for a chain ending at a given header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Compatibility {
    Compatible,
    Diverges,
}

/// Decides whether a chain ending at height `tip_height` is allowed, given
/// lookups for its own ancestors and, when known, for the ancestors of the
/// checkpoint's parent.
pub fn check_chain(
    checkpoint: &Checkpoint,
    tip_height: i64,
    tip_hash: Hash256,
    own_ancestor: impl Fn(i64) -> Option<Hash256>,
    checkpoint_ancestor: impl Fn(i64) -> Option<Hash256>,
) -> Compatibility {
    let cp_height = checkpoint.height();
    let verdict = if tip_height >= cp_height {
        own_ancestor(cp_height) == Some(checkpoint.position.hash)
            && (cp_height == 0 || own_ancestor(cp_height - 1) == Some(checkpoint.parent))
    } else if tip_height == cp_height - 1 {
        tip_hash == checkpoint.parent
    } else {
        match checkpoint_ancestor(tip_height) {
            Some(expected) => expected == tip_hash,
            None => true,
        }
    };
    if verdict {
        Compatibility::Compatible
    } else {
        Compatibility::Diverges
    }
}
