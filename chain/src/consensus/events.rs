//! Observer interface for chain events.

use std::collections::HashMap;
use std::fmt;

use crate::types::Block;

/// Points in the block lifecycle that listeners can hook.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ChainEvent {
    /// A verified block is about to be saved.
    BeforeAccept,
    /// A block became the new head.
    BlockPushed,
    /// A block was removed from the head.
    BlockPopped,
    /// Transactions of a block are about to be applied.
    BeforeApply,
    /// Transactions of a block were applied.
    AfterApply,
    RescanBegin,
    RescanEnd,
    /// A stored block was replayed during a rescan.
    BlockScanned,
}

pub type Listener = Box<dyn Fn(&Block) + Send + Sync>;

/// Listener registry keyed by event.
#[derive(Default)]
pub struct Listeners {
    by_event: HashMap<ChainEvent, Vec<Listener>>,
}

impl Listeners {
    pub fn add(&mut self, event: ChainEvent, listener: Listener) {
        self.by_event.entry(event).or_default().push(listener);
    }

    pub fn notify(&self, event: ChainEvent, block: &Block) {
        if let Some(listeners) = self.by_event.get(&event) {
            for listener in listeners {
                listener(block);
            }
        }
    }
}

impl fmt::Debug for Listeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: HashMap<_, _> = self.by_event.iter().map(|(e, l)| (*e, l.len())).collect();
        f.debug_struct("Listeners").field("by_event", &counts).finish()
    }
}
