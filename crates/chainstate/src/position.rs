//! Chain positions.

use std::fmt;

use walletd_consensus::{hash256_to_hex, Hash256, NULL_HASH};

pub const POSITION_LEN: usize = 40;

/// A block identified by height and hash. Ordered by height, then hash bytes;
/// the hash ordering only makes the order total.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Position {
    pub height: i64,
    pub hash: Hash256,
}

impl Position {
    pub const fn new(height: i64, hash: Hash256) -> Self {
        Self { height, hash }
    }

    /// The pre-genesis position: height -1 with the null hash.
    pub const fn none() -> Self {
        Self {
            height: -1,
            hash: NULL_HASH,
        }
    }

    pub fn is_none(&self) -> bool {
        self.height < 0
    }

    pub fn to_bytes(&self) -> [u8; POSITION_LEN] {
        let mut out = [0u8; POSITION_LEN];
        out[..8].copy_from_slice(&self.height.to_le_bytes());
        out[8..].copy_from_slice(&self.hash);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != POSITION_LEN {
            return None;
        }
        let mut height = [0u8; 8];
        height.copy_from_slice(&bytes[..8]);
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&bytes[8..]);
        let height = i64::from_le_bytes(height);
        if height < -1 {
            return None;
        }
        Some(Self { height, hash })
    }
}

impl Default for Position {
    fn default() -> Self {
        Self::none()
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.height, hash256_to_hex(&self.hash))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orders_by_height_first() {
        let low = Position::new(4, [0xff; 32]);
        let high = Position::new(5, [0x00; 32]);
        assert!(low < high);
        assert!(Position::none() < Position::new(0, [0u8; 32]));
    }

    #[test]
    fn bytes_roundtrip_and_reject_garbage() {
        let position = Position::new(123_456, [7u8; 32]);
        assert_eq!(Position::from_bytes(&position.to_bytes()), Some(position));
        assert_eq!(
            Position::from_bytes(&Position::none().to_bytes()),
            Some(Position::none())
        );
        assert_eq!(Position::from_bytes(&[0u8; 12]), None);
        let mut bad = position.to_bytes();
        bad[..8].copy_from_slice(&(-5i64).to_le_bytes());
        assert_eq!(Position::from_bytes(&bad), None);
    }
}
