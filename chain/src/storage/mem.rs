//! In-memory block store.
//!
//! This implementation is useful for unit tests and small devnets. Blocks
//! live in a `BTreeMap` keyed by height with a side index from id to
//! height. Transaction scopes are implemented with an undo journal.

use std::collections::{BTreeMap, HashMap};

use crate::consensus::store::BlockStore;
use crate::types::{Block, BlockId};

use super::StorageError;

#[derive(Debug)]
enum Undo {
    Inserted { height: u64, replaced: Option<Block> },
    Removed(Block),
}

/// In-memory implementation of [`BlockStore`].
#[derive(Debug, Default)]
pub struct InMemoryBlockStore {
    blocks: BTreeMap<u64, Block>,
    ids: HashMap<BlockId, u64>,
    journal: Option<Vec<Undo>>,
}

impl InMemoryBlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of blocks currently stored.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    fn insert(&mut self, block: Block) -> Option<Block> {
        let (id, height) = (block.id(), block.height());
        let replaced = self.blocks.insert(height, block);
        if let Some(old) = &replaced {
            self.ids.remove(&old.id());
        }
        self.ids.insert(id, height);
        replaced
    }

    fn remove(&mut self, height: u64) -> Option<Block> {
        let block = self.blocks.remove(&height)?;
        self.ids.remove(&block.id());
        Some(block)
    }

    fn record(&mut self, undo: Undo) {
        if let Some(journal) = self.journal.as_mut() {
            journal.push(undo);
        }
    }
}

impl BlockStore for InMemoryBlockStore {
    fn save_block(&mut self, block: &Block) -> Result<(), StorageError> {
        let height = block.height();
        let replaced = self.insert(block.clone());
        self.record(Undo::Inserted { height, replaced });
        Ok(())
    }

    fn has_block(&self, id: BlockId) -> Result<bool, StorageError> {
        Ok(self.ids.contains_key(&id))
    }

    fn has_block_at_height(&self, height: u64) -> Result<bool, StorageError> {
        Ok(self.blocks.contains_key(&height))
    }

    fn find_block(&self, id: BlockId) -> Result<Option<Block>, StorageError> {
        Ok(self
            .ids
            .get(&id)
            .and_then(|height| self.blocks.get(height))
            .cloned())
    }

    fn find_block_at_height(&self, height: u64) -> Result<Option<Block>, StorageError> {
        Ok(self.blocks.get(&height).cloned())
    }

    fn find_last_block(&self) -> Result<Option<Block>, StorageError> {
        Ok(self.blocks.last_key_value().map(|(_, b)| b.clone()))
    }

    fn delete_blocks_from(&mut self, id: BlockId) -> Result<Vec<Block>, StorageError> {
        let Some(&from) = self.ids.get(&id) else {
            return Ok(Vec::new());
        };
        let heights: Vec<u64> = self.blocks.range(from..).map(|(h, _)| *h).collect();
        let mut deleted = Vec::with_capacity(heights.len());
        for height in heights {
            if let Some(block) = self.remove(height) {
                self.record(Undo::Removed(block.clone()));
                deleted.push(block);
            }
        }
        Ok(deleted)
    }

    fn delete_all(&mut self) -> Result<(), StorageError> {
        let blocks = std::mem::take(&mut self.blocks);
        self.ids.clear();
        if let Some(journal) = self.journal.as_mut() {
            journal.extend(blocks.into_values().map(Undo::Removed));
        }
        Ok(())
    }

    fn begin(&mut self) -> Result<(), StorageError> {
        if self.journal.is_some() {
            return Err(StorageError::TransactionState("begin inside open transaction"));
        }
        self.journal = Some(Vec::new());
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        self.journal
            .take()
            .map(|_| ())
            .ok_or(StorageError::TransactionState("commit without begin"))
    }

    fn rollback(&mut self) -> Result<(), StorageError> {
        let journal = self
            .journal
            .take()
            .ok_or(StorageError::TransactionState("rollback without begin"))?;
        for undo in journal.into_iter().rev() {
            match undo {
                Undo::Inserted { height, replaced } => {
                    self.remove(height);
                    if let Some(block) = replaced {
                        self.insert(block);
                    }
                }
                Undo::Removed(block) => {
                    self.insert(block);
                }
            }
        }
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.journal.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;

    fn filled(len: usize) -> (InMemoryBlockStore, Vec<Block>) {
        let chain = test_support::work_chain(len);
        let mut store = InMemoryBlockStore::new();
        for block in &chain {
            store.save_block(block).unwrap();
        }
        (store, chain)
    }

    #[test]
    fn lookups_by_id_and_height() {
        let (store, chain) = filled(4);
        assert_eq!(store.len(), 4);
        assert!(store.has_block(chain[2].id()).unwrap());
        assert!(store.has_block_at_height(3).unwrap());
        assert!(!store.has_block_at_height(4).unwrap());
        assert_eq!(store.find_block(chain[1].id()).unwrap(), Some(chain[1].clone()));
        assert_eq!(store.find_last_block().unwrap().map(|b| b.height()), Some(3));
    }

    #[test]
    fn delete_from_returns_ascending_suffix() {
        let (mut store, chain) = filled(5);
        let deleted = store.delete_blocks_from(chain[2].id()).unwrap();
        let heights: Vec<u64> = deleted.iter().map(Block::height).collect();
        assert_eq!(heights, vec![2, 3, 4]);
        assert!(!store.has_block(chain[3].id()).unwrap());
        assert_eq!(store.find_last_block().unwrap().map(|b| b.height()), Some(1));
        assert!(store.delete_blocks_from(chain[4].id()).unwrap().is_empty());
    }

    #[test]
    fn rollback_discards_scoped_writes() {
        let (mut store, chain) = filled(3);
        let longer = test_support::work_chain(5);

        store.begin().unwrap();
        store.delete_blocks_from(chain[1].id()).unwrap();
        store.save_block(&longer[4]).unwrap();
        store.delete_all().unwrap();
        assert!(store.is_empty());
        store.rollback().unwrap();

        assert_eq!(store.len(), 3);
        for block in &chain {
            assert!(store.has_block(block.id()).unwrap());
        }
        assert!(!store.has_block(longer[4].id()).unwrap());
        assert!(!store.in_transaction());
    }

    #[test]
    fn scopes_do_not_nest() {
        let mut store = InMemoryBlockStore::new();
        store.begin().unwrap();
        assert!(store.begin().is_err());
        store.commit().unwrap();
        assert!(store.commit().is_err());
        assert!(store.rollback().is_err());
    }
}
