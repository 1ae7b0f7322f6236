//! Canonical chain index.
//!
//! Block bodies live in the [`BlockStore`](super::store::BlockStore); the
//! index only tracks which id sits at which height on the canonical path
//! plus a copy of the head block. It is owned by the chain processor and
//! mutated only under the chain lock.

use std::collections::HashMap;

use crate::types::{Block, BlockId};

#[derive(Debug, Default)]
pub struct Chain {
    head: Option<Block>,
    ids_by_height: Vec<BlockId>,
    heights_by_id: HashMap<BlockId, u64>,
}

impl Chain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn head(&self) -> Option<&Block> {
        self.head.as_ref()
    }

    pub fn height(&self) -> Option<u64> {
        self.head.as_ref().map(Block::height)
    }

    pub fn genesis_id(&self) -> Option<BlockId> {
        self.ids_by_height.first().copied()
    }

    pub fn contains(&self, id: BlockId) -> bool {
        self.heights_by_id.contains_key(&id)
    }

    pub fn height_of(&self, id: BlockId) -> Option<u64> {
        self.heights_by_id.get(&id).copied()
    }

    pub fn id_at(&self, height: u64) -> Option<BlockId> {
        usize::try_from(height)
            .ok()
            .and_then(|h| self.ids_by_height.get(h))
            .copied()
    }

    /// Up to `limit` canonical ids following `id`, ascending.
    pub fn ids_after(&self, id: BlockId, limit: usize) -> Vec<BlockId> {
        let Some(height) = self.height_of(id) else {
            return Vec::new();
        };
        self.ids_by_height
            .iter()
            .skip(height as usize + 1)
            .take(limit)
            .copied()
            .collect()
    }

    /// Makes `block` the new head. The caller has checked linkage.
    pub fn advance(&mut self, block: &Block) {
        debug_assert_eq!(block.height() as usize, self.ids_by_height.len());
        self.ids_by_height.push(block.id());
        self.heights_by_id.insert(block.id(), block.height());
        self.head = Some(block.clone());
    }

    /// Drops every entry above `head`, which becomes the new head.
    pub fn truncate_to(&mut self, head: &Block) {
        let keep = head.height() as usize + 1;
        for id in self.ids_by_height.drain(keep.min(self.ids_by_height.len())..) {
            self.heights_by_id.remove(&id);
        }
        self.head = Some(head.clone());
    }

    pub fn clear(&mut self) {
        self.head = None;
        self.ids_by_height.clear();
        self.heights_by_id.clear();
    }
}
