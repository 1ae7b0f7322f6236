//! Pending transaction pool.
//!
//! Transactions wait here until a block confirms them. The pool keeps
//! insertion order, refuses duplicates by id, and bumps a version counter
//! on every change so forgers can tell when their candidate's
//! transaction set went stale.

use std::collections::HashSet;

use crate::types::{Transaction, TxId};

#[derive(Debug, Default)]
pub struct PendingPool {
    txs: Vec<Transaction>,
    ids: HashSet<TxId>,
    version: u64,
}

impl PendingPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.txs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.txs.is_empty()
    }

    pub fn contains(&self, id: TxId) -> bool {
        self.ids.contains(&id)
    }

    /// Monotonic change counter.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Pending transactions in pool order.
    pub fn transactions(&self) -> &[Transaction] {
        &self.txs
    }

    /// Adds a transaction. Returns `false` if it is already pending.
    pub fn add(&mut self, tx: Transaction) -> bool {
        if !self.ids.insert(tx.id()) {
            return false;
        }
        self.txs.push(tx);
        self.version += 1;
        true
    }

    /// Returns popped-block transactions to the pool, in the given order,
    /// skipping any already pending.
    pub fn requeue(&mut self, txs: impl IntoIterator<Item = Transaction>) -> usize {
        txs.into_iter().filter(|tx| self.add(tx.clone())).count()
    }

    /// Drops transactions a block just confirmed.
    pub fn remove_confirmed<'a>(&mut self, confirmed: impl IntoIterator<Item = &'a Transaction>) {
        let ids: HashSet<TxId> = confirmed.into_iter().map(Transaction::id).collect();
        self.remove_ids(&ids);
    }

    /// Evicts one transaction, typically one that sank a block.
    pub fn evict(&mut self, id: TxId) -> bool {
        let removed = self.remove_ids(&HashSet::from([id]));
        removed > 0
    }

    fn remove_ids(&mut self, ids: &HashSet<TxId>) -> usize {
        let before = self.txs.len();
        self.txs.retain(|tx| !ids.contains(&tx.id()));
        for id in ids {
            self.ids.remove(id);
        }
        let removed = before - self.txs.len();
        if removed > 0 {
            self.version += 1;
        }
        removed
    }

    /// Selects transactions for a new block, in pool order, within the
    /// given limits and without two transactions sharing a duplicate key.
    pub fn select_for_block(&self, max_txs: usize, max_bytes: usize) -> Vec<Transaction> {
        let mut selected = Vec::new();
        let mut keys = HashSet::new();
        let mut bytes = 0usize;

        for tx in &self.txs {
            if selected.len() >= max_txs {
                break;
            }
            let size = tx.size();
            if bytes + size > max_bytes {
                continue;
            }
            if let Some(key) = tx.duplicate_key() {
                if !keys.insert(key) {
                    continue;
                }
            }
            bytes += size;
            selected.push(tx.clone());
        }
        selected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto;
    use crate::test_support;

    #[test]
    fn add_refuses_duplicates_and_bumps_version() {
        let mut pool = PendingPool::new();
        let tx = test_support::payment("a", "b", 1, 0);
        assert!(pool.add(tx.clone()));
        let v = pool.version();
        assert!(!pool.add(tx));
        assert_eq!(pool.version(), v);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn select_respects_limits_and_duplicate_keys() {
        let mut pool = PendingPool::new();
        let key = crypto::signing_key("a");
        let pk = crypto::public_key(&key);
        pool.add(Transaction::alias_assignment(pk.clone(), "x", 0, 1).signed(&key));
        pool.add(Transaction::alias_assignment(pk, "X", 0, 2).signed(&key));
        pool.add(test_support::payment("a", "b", 1, 0));
        pool.add(test_support::payment("a", "b", 2, 0));

        let selected = pool.select_for_block(10, usize::MAX);
        assert_eq!(selected.len(), 3);

        let selected = pool.select_for_block(2, usize::MAX);
        assert_eq!(selected.len(), 2);

        let one = pool.transactions()[2].size();
        let selected = pool.select_for_block(10, one);
        assert_eq!(selected.len(), 1);
    }

    #[test]
    fn requeue_skips_pending_and_keeps_order() {
        let mut pool = PendingPool::new();
        let a = test_support::payment("a", "b", 1, 0);
        let b = test_support::payment("a", "b", 2, 0);
        pool.add(a.clone());
        assert_eq!(pool.requeue(vec![b.clone(), a.clone()]), 1);
        assert_eq!(pool.transactions(), &[a.clone(), b.clone()]);

        pool.remove_confirmed([&a]);
        assert!(!pool.contains(a.id()));
        assert!(pool.evict(b.id()));
        assert!(!pool.evict(b.id()));
        assert!(pool.is_empty());
    }
}
