use walletd_consensus::Hash256;

use crate::position::Position;

/// Read-only snapshot access to the best chain, shared by everything that
/// follows the oracle without mutating it.
pub trait ChainView: Send + Sync {
    fn best_chain(&self) -> Position;

    fn best_hash(&self, height: i64) -> Option<Hash256>;

    /// Highest best-chain position that is an ancestor of `position`, or
    /// `position` itself when it is on the best chain.
    fn common_parent(&self, position: &Position) -> Position;

    /// Best-chain positions with `from < height <= to`, lowest first.
    fn best_positions(&self, from: i64, to: i64) -> Vec<Position>;

    fn is_in_best_chain(&self, position: &Position) -> bool {
        if position.is_none() {
            return true;
        }
        self.best_hash(position.height) == Some(position.hash)
    }
}
