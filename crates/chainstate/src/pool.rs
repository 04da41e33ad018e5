//! Headers waiting for their parent.

use std::collections::{HashMap, HashSet, VecDeque};

use smallvec::SmallVec;
use walletd_consensus::Hash256;
use walletd_primitives::block::BlockHeader;

pub const DEFAULT_DISCONNECTED_CAPACITY: usize = 8_192;

/// Bounded buffer of orphan headers keyed by the parent they wait for.
/// When full the oldest arrival is evicted.
pub struct DisconnectedPool {
    headers: HashMap<Hash256, BlockHeader>,
    by_parent: HashMap<Hash256, SmallVec<[Hash256; 2]>>,
    order: VecDeque<Hash256>,
    capacity: usize,
}

impl DisconnectedPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            headers: HashMap::new(),
            by_parent: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    pub fn contains(&self, hash: &Hash256) -> bool {
        self.headers.contains_key(hash)
    }

    /// True when following parent links from `prev` through buffered headers
    /// leads back to `hash`.
    pub fn would_cycle(&self, hash: &Hash256, prev: &Hash256) -> bool {
        if hash == prev {
            return true;
        }
        let mut seen = HashSet::new();
        let mut cursor = *prev;
        while let Some(header) = self.headers.get(&cursor) {
            if !seen.insert(cursor) {
                return true;
            }
            if header.prev_block == *hash {
                return true;
            }
            cursor = header.prev_block;
        }
        false
    }

    /// Buffers `header` under `hash`. Returns the hash evicted to make room.
    pub fn insert(&mut self, hash: Hash256, header: BlockHeader) -> Option<Hash256> {
        if self.headers.contains_key(&hash) {
            return None;
        }
        let mut evicted = None;
        if self.headers.len() >= self.capacity {
            while let Some(oldest) = self.order.pop_front() {
                if self.remove(&oldest).is_some() {
                    evicted = Some(oldest);
                    break;
                }
            }
        }
        self.by_parent
            .entry(header.prev_block)
            .or_default()
            .push(hash);
        self.headers.insert(hash, header);
        self.order.push_back(hash);
        if self.order.len() > self.capacity.saturating_mul(2) {
            let headers = &self.headers;
            self.order.retain(|queued| headers.contains_key(queued));
        }
        evicted
    }

    /// Removes and returns every header waiting directly on `parent`, in
    /// arrival order.
    pub fn take_children(&mut self, parent: &Hash256) -> Vec<(Hash256, BlockHeader)> {
        let Some(children) = self.by_parent.remove(parent) else {
            return Vec::new();
        };
        children
            .into_iter()
            .filter_map(|hash| self.headers.remove(&hash).map(|header| (hash, header)))
            .collect()
    }

    fn remove(&mut self, hash: &Hash256) -> Option<BlockHeader> {
        let header = self.headers.remove(hash)?;
        if let Some(siblings) = self.by_parent.get_mut(&header.prev_block) {
            siblings.retain(|candidate| candidate != hash);
            if siblings.is_empty() {
                self.by_parent.remove(&header.prev_block);
            }
        }
        Some(header)
    }
}

impl Default for DisconnectedPool {
    fn default() -> Self {
        Self::new(DEFAULT_DISCONNECTED_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(prev: u8) -> BlockHeader {
        BlockHeader {
            version: 4,
            prev_block: [prev; 32],
            merkle_root: [0u8; 32],
            time: 0,
            bits: 0x207f_ffff,
            nonce: 0,
        }
    }

    #[test]
    fn children_come_out_in_arrival_order() {
        let mut pool = DisconnectedPool::new(8);
        pool.insert([2; 32], header(1));
        pool.insert([3; 32], header(1));
        pool.insert([4; 32], header(3));
        let children: Vec<Hash256> = pool
            .take_children(&[1; 32])
            .into_iter()
            .map(|(hash, _)| hash)
            .collect();
        assert_eq!(children, vec![[2; 32], [3; 32]]);
        assert_eq!(pool.len(), 1);
        assert!(pool.take_children(&[1; 32]).is_empty());
    }

    #[test]
    fn evicts_oldest_when_full() {
        let mut pool = DisconnectedPool::new(2);
        assert_eq!(pool.insert([2; 32], header(1)), None);
        assert_eq!(pool.insert([3; 32], header(2)), None);
        assert_eq!(pool.insert([4; 32], header(3)), Some([2; 32]));
        assert!(!pool.contains(&[2; 32]));
        assert!(pool.contains(&[4; 32]));
        assert!(pool.take_children(&[1; 32]).is_empty());
    }

    #[test]
    fn detects_parent_loops() {
        let mut pool = DisconnectedPool::new(8);
        // 0x0b waits on 0x0a, 0x0c waits on 0x0b.
        pool.insert([0x0b; 32], header(0x0a));
        pool.insert([0x0c; 32], header(0x0b));
        // A header 0x0a whose parent is 0x0c closes the loop.
        assert!(pool.would_cycle(&[0x0a; 32], &[0x0c; 32]));
        assert!(!pool.would_cycle(&[0x0d; 32], &[0x0c; 32]));
        assert!(pool.would_cycle(&[0x0e; 32], &[0x0e; 32]));
    }
}
