//! Ledger collaborator interfaces.
//!
//! The chain processor does not interpret transactions itself. It drives
//! a [`Ledger`] through `validate` / `apply_unconfirmed` / `apply` while
//! accepting a block, and rolls every [`DerivedTable`] back when blocks
//! are popped.

use crate::types::{AccountId, Transaction};

pub mod balances;

pub use balances::BalanceLedger;

/// State derived from the canonical chain that can be rewound.
pub trait DerivedTable: Send {
    fn name(&self) -> &str;

    /// Undoes every change made at heights above `height`.
    fn rollback(&mut self, height: u64);

    /// Drops all derived state, as before genesis.
    fn truncate(&mut self);

    /// Forgets history at or below `height`; rollbacks below it are no
    /// longer supported afterwards.
    fn trim(&mut self, _height: u64) {}
}

/// Transaction semantics the chain processor depends on.
pub trait Ledger: DerivedTable {
    /// Stateless and state-dependent validity, without side effects.
    fn validate(&self, tx: &Transaction) -> Result<(), String>;

    /// Reserves the sender's funds. `false` means the sender cannot cover
    /// the transaction (a double spend against earlier transactions).
    fn apply_unconfirmed(&mut self, tx: &Transaction, height: u64) -> bool;

    /// Applies the transaction's effects at `height`.
    fn apply(&mut self, tx: &Transaction, height: u64) -> Result<(), String>;

    /// Stake weight of `account` for proof-of-stake eligibility.
    fn effective_stake(&self, account: &AccountId) -> u64;
}
