//! RocksDB-backed block store.
//!
//! Blocks are persisted in two column families:
//!
//! - `"blocks"`: height (8 bytes, big endian) -> wire-encoded block,
//! - `"ids"`:    block id (8 bytes, big endian) -> height.
//!
//! Big-endian height keys keep the `blocks` family ordered by height, so
//! the last block is the last key. Writes are staged in memory and land
//! in a single `WriteBatch` on commit; writes outside a transaction scope
//! commit immediately.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, IteratorMode, Options, WriteBatch};
use serde::Deserialize;
use tracing::debug;

use crate::consensus::store::BlockStore;
use crate::types::{Block, BlockId};

use super::StorageError;

const CF_BLOCKS: &str = "blocks";
const CF_IDS: &str = "ids";

/// Configuration for [`RocksDbBlockStore`].
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RocksDbConfig {
    /// Filesystem path to the RocksDB database directory.
    pub path: String,
    /// Whether to create the database and missing column families if they
    /// do not yet exist.
    pub create_if_missing: bool,
}

impl Default for RocksDbConfig {
    fn default() -> Self {
        Self {
            path: "data/chain-db".to_string(),
            create_if_missing: true,
        }
    }
}

/// Uncommitted writes. `None` entries are deletions.
#[derive(Debug, Default)]
struct Staged {
    blocks: BTreeMap<u64, Option<Block>>,
    ids: HashMap<BlockId, Option<u64>>,
    cleared: bool,
}

/// RocksDB-backed implementation of [`BlockStore`].
pub struct RocksDbBlockStore {
    db: DB,
    staged: Option<Staged>,
}

impl RocksDbBlockStore {
    /// Opens (or creates) a RocksDB-backed block store at the configured
    /// path.
    pub fn open(cfg: &RocksDbConfig) -> Result<Self, StorageError> {
        let path = Path::new(&cfg.path);

        let mut opts = Options::default();
        opts.create_if_missing(cfg.create_if_missing);
        opts.create_missing_column_families(cfg.create_if_missing);

        let cfs = vec![
            ColumnFamilyDescriptor::new("default", Options::default()),
            ColumnFamilyDescriptor::new(CF_BLOCKS, Options::default()),
            ColumnFamilyDescriptor::new(CF_IDS, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&opts, path, cfs)?;
        debug!(path = %cfg.path, "opened rocksdb block store");

        Ok(Self { db, staged: None })
    }

    fn cf(&self, name: &'static str) -> Result<&ColumnFamily, StorageError> {
        self.db
            .cf_handle(name)
            .ok_or(StorageError::MissingColumnFamily(name))
    }

    fn decode_u64(bytes: &[u8]) -> Result<u64, StorageError> {
        let arr: [u8; 8] = bytes
            .try_into()
            .map_err(|_| StorageError::Corrupted(format!("expected 8 bytes, got {}", bytes.len())))?;
        Ok(u64::from_be_bytes(arr))
    }

    fn stored_block_at(&self, height: u64) -> Result<Option<Block>, StorageError> {
        match self.db.get_cf(self.cf(CF_BLOCKS)?, height.to_be_bytes())? {
            Some(bytes) => Ok(Some(Block::from_wire(&bytes)?)),
            None => Ok(None),
        }
    }

    fn stored_height_of(&self, id: BlockId) -> Result<Option<u64>, StorageError> {
        self.db
            .get_cf(self.cf(CF_IDS)?, id.0.to_be_bytes())?
            .map(|bytes| Self::decode_u64(&bytes))
            .transpose()
    }

    fn stored_last_height(&self) -> Result<Option<u64>, StorageError> {
        match self.db.iterator_cf(self.cf(CF_BLOCKS)?, IteratorMode::End).next() {
            Some(entry) => {
                let (key, _) = entry?;
                Ok(Some(Self::decode_u64(&key)?))
            }
            None => Ok(None),
        }
    }

    fn height_of(&self, id: BlockId) -> Result<Option<u64>, StorageError> {
        if let Some(staged) = &self.staged {
            if let Some(height) = staged.ids.get(&id) {
                return Ok(*height);
            }
            if staged.cleared {
                return Ok(None);
            }
        }
        self.stored_height_of(id)
    }

    fn block_at(&self, height: u64) -> Result<Option<Block>, StorageError> {
        if let Some(staged) = &self.staged {
            if let Some(block) = staged.blocks.get(&height) {
                return Ok(block.clone());
            }
            if staged.cleared {
                return Ok(None);
            }
        }
        self.stored_block_at(height)
    }

    fn last_height(&self) -> Result<Option<u64>, StorageError> {
        let (stored, staged_max) = match &self.staged {
            Some(staged) => (
                if staged.cleared { None } else { self.stored_last_height()? },
                staged.blocks.last_key_value().map(|(h, _)| *h),
            ),
            None => return self.stored_last_height(),
        };
        let Some(mut height) = stored.max(staged_max) else {
            return Ok(None);
        };
        // Deletions only ever cut the tail, so walk down to the first live height.
        loop {
            if self.block_at(height)?.is_some() {
                return Ok(Some(height));
            }
            if height == 0 {
                return Ok(None);
            }
            height -= 1;
        }
    }

    /// Runs `write` against the staging area, committing on the spot when
    /// no transaction scope is open.
    fn staged_write<T>(
        &mut self,
        write: impl FnOnce(&mut Self) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        if self.staged.is_some() {
            return write(self);
        }
        self.staged = Some(Staged::default());
        match write(self) {
            Ok(value) => {
                self.commit()?;
                Ok(value)
            }
            Err(e) => {
                self.staged = None;
                Err(e)
            }
        }
    }

    fn staging(&mut self) -> Result<&mut Staged, StorageError> {
        self.staged
            .as_mut()
            .ok_or(StorageError::TransactionState("no staging area"))
    }
}

impl BlockStore for RocksDbBlockStore {
    fn save_block(&mut self, block: &Block) -> Result<(), StorageError> {
        self.staged_write(|store| {
            let height = block.height();
            let replaced = store.block_at(height)?;
            let staged = store.staging()?;
            if let Some(old) = replaced {
                staged.ids.insert(old.id(), None);
            }
            staged.blocks.insert(height, Some(block.clone()));
            staged.ids.insert(block.id(), Some(height));
            Ok(())
        })
    }

    fn has_block(&self, id: BlockId) -> Result<bool, StorageError> {
        Ok(self.height_of(id)?.is_some())
    }

    fn has_block_at_height(&self, height: u64) -> Result<bool, StorageError> {
        Ok(self.block_at(height)?.is_some())
    }

    fn find_block(&self, id: BlockId) -> Result<Option<Block>, StorageError> {
        match self.height_of(id)? {
            Some(height) => self.block_at(height),
            None => Ok(None),
        }
    }

    fn find_block_at_height(&self, height: u64) -> Result<Option<Block>, StorageError> {
        self.block_at(height)
    }

    fn find_last_block(&self) -> Result<Option<Block>, StorageError> {
        match self.last_height()? {
            Some(height) => self.block_at(height),
            None => Ok(None),
        }
    }

    fn delete_blocks_from(&mut self, id: BlockId) -> Result<Vec<Block>, StorageError> {
        self.staged_write(|store| {
            let (Some(from), Some(last)) = (store.height_of(id)?, store.last_height()?) else {
                return Ok(Vec::new());
            };
            let mut deleted = Vec::new();
            for height in from..=last {
                if let Some(block) = store.block_at(height)? {
                    let staged = store.staging()?;
                    staged.blocks.insert(height, None);
                    staged.ids.insert(block.id(), None);
                    deleted.push(block);
                }
            }
            Ok(deleted)
        })
    }

    fn delete_all(&mut self) -> Result<(), StorageError> {
        self.staged_write(|store| {
            *store.staging()? = Staged {
                cleared: true,
                ..Staged::default()
            };
            Ok(())
        })
    }

    fn begin(&mut self) -> Result<(), StorageError> {
        if self.staged.is_some() {
            return Err(StorageError::TransactionState("begin inside open transaction"));
        }
        self.staged = Some(Staged::default());
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        let staged = self
            .staged
            .take()
            .ok_or(StorageError::TransactionState("commit without begin"))?;
        let cf_blocks = self.cf(CF_BLOCKS)?;
        let cf_ids = self.cf(CF_IDS)?;

        let mut batch = WriteBatch::default();
        if staged.cleared {
            for cf in [cf_blocks, cf_ids] {
                for entry in self.db.iterator_cf(cf, IteratorMode::Start) {
                    let (key, _) = entry?;
                    batch.delete_cf(cf, key);
                }
            }
        }
        for (height, block) in &staged.blocks {
            match block {
                Some(block) => batch.put_cf(cf_blocks, height.to_be_bytes(), block.to_wire()?),
                None => batch.delete_cf(cf_blocks, height.to_be_bytes()),
            }
        }
        for (id, height) in &staged.ids {
            match height {
                Some(height) => batch.put_cf(cf_ids, id.0.to_be_bytes(), height.to_be_bytes()),
                None => batch.delete_cf(cf_ids, id.0.to_be_bytes()),
            }
        }
        self.db.write(batch)?;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), StorageError> {
        self.staged
            .take()
            .map(|_| ())
            .ok_or(StorageError::TransactionState("rollback without begin"))
    }

    fn in_transaction(&self) -> bool {
        self.staged.is_some()
    }
}
