//! Storage abstraction used by the chain processor.

use crate::storage::StorageError;
use crate::types::{Block, BlockId};

/// Abstract persistence interface for blocks.
///
/// Implementations can be backed by in-memory maps, RocksDB, etc. Blocks
/// are stored by height along the canonical chain; the store holds at
/// most one block per height and always a gap-free prefix starting at
/// genesis.
///
/// Writes made between [`BlockStore::begin`] and [`BlockStore::commit`]
/// must become durable atomically. Outside a transaction scope each write
/// commits on its own.
pub trait BlockStore: Send {
    /// Persists `block` at its height.
    fn save_block(&mut self, block: &Block) -> Result<(), StorageError>;

    fn has_block(&self, id: BlockId) -> Result<bool, StorageError>;

    fn has_block_at_height(&self, height: u64) -> Result<bool, StorageError>;

    fn find_block(&self, id: BlockId) -> Result<Option<Block>, StorageError>;

    fn find_block_at_height(&self, height: u64) -> Result<Option<Block>, StorageError>;

    /// Highest stored block.
    fn find_last_block(&self) -> Result<Option<Block>, StorageError>;

    /// Deletes the block `id` and every block above it.
    ///
    /// Returns the deleted blocks in ascending height order; an unknown id
    /// deletes nothing.
    fn delete_blocks_from(&mut self, id: BlockId) -> Result<Vec<Block>, StorageError>;

    fn delete_all(&mut self) -> Result<(), StorageError>;

    /// Opens a transaction scope. Scopes do not nest.
    fn begin(&mut self) -> Result<(), StorageError>;

    fn commit(&mut self) -> Result<(), StorageError>;

    /// Discards every write made since `begin`.
    fn rollback(&mut self) -> Result<(), StorageError>;

    fn in_transaction(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryBlockStore;

    #[test]
    fn block_store_trait_is_object_safe() {
        fn use_trait_object(store: &mut dyn BlockStore) {
            let _ = store.find_last_block();
        }

        let mut store = InMemoryBlockStore::new();
        use_trait_object(&mut store);
    }
}
