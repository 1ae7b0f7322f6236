//! In-memory account ledger.
//!
//! Tracks confirmed and unconfirmed balances per account plus alias
//! ownership. Every mutation is journaled with the height it was made at,
//! which makes `rollback(height)` an exact inverse of the blocks above
//! `height`. Fees are burned.

use std::collections::HashMap;

use crate::types::{AccountId, Transaction, TxBody};
use crate::types::tx::MAX_ALIAS_LEN;

use super::{DerivedTable, Ledger};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
struct Balance {
    confirmed: i128,
    unconfirmed: i128,
}

#[derive(Clone, Debug)]
enum Change {
    Confirmed { account: AccountId, delta: i128 },
    Unconfirmed { account: AccountId, delta: i128 },
    Alias { key: String, previous: Option<AccountId> },
}

#[derive(Clone, Debug)]
struct Entry {
    height: u64,
    change: Change,
}

/// Balance and alias ledger.
///
/// The genesis creator account issues the initial allocations and is the
/// only account allowed to go negative.
#[derive(Debug)]
pub struct BalanceLedger {
    creator: AccountId,
    accounts: HashMap<AccountId, Balance>,
    aliases: HashMap<String, AccountId>,
    journal: Vec<Entry>,
}

impl BalanceLedger {
    pub fn new(creator: AccountId) -> Self {
        Self {
            creator,
            accounts: HashMap::new(),
            aliases: HashMap::new(),
            journal: Vec::new(),
        }
    }

    pub fn balance(&self, account: &AccountId) -> i128 {
        self.accounts.get(account).map_or(0, |b| b.confirmed)
    }

    pub fn unconfirmed_balance(&self, account: &AccountId) -> i128 {
        self.accounts.get(account).map_or(0, |b| b.unconfirmed)
    }

    pub fn alias_owner(&self, alias: &str) -> Option<AccountId> {
        self.aliases.get(&alias.to_lowercase()).copied()
    }

    /// Number of journal entries still available for rollback.
    pub fn journal_len(&self) -> usize {
        self.journal.len()
    }

    fn cost(tx: &Transaction) -> i128 {
        i128::from(tx.amount) + i128::from(tx.fee)
    }

    fn record(&mut self, height: u64, change: Change) {
        self.apply_change(&change, false);
        self.journal.push(Entry { height, change });
    }

    fn apply_change(&mut self, change: &Change, undo: bool) {
        match change {
            Change::Confirmed { account, delta } => {
                let delta = if undo { -delta } else { *delta };
                self.accounts.entry(*account).or_default().confirmed += delta;
            }
            Change::Unconfirmed { account, delta } => {
                let delta = if undo { -delta } else { *delta };
                self.accounts.entry(*account).or_default().unconfirmed += delta;
            }
            Change::Alias { .. } if !undo => {}
            Change::Alias { key, previous } => match previous {
                Some(owner) => {
                    self.aliases.insert(key.clone(), *owner);
                }
                None => {
                    self.aliases.remove(key);
                }
            },
        }
    }
}

impl DerivedTable for BalanceLedger {
    fn name(&self) -> &str {
        "balances"
    }

    fn rollback(&mut self, height: u64) {
        while self.journal.last().is_some_and(|e| e.height > height) {
            if let Some(entry) = self.journal.pop() {
                self.apply_change(&entry.change, true);
            }
        }
    }

    fn truncate(&mut self) {
        self.accounts.clear();
        self.aliases.clear();
        self.journal.clear();
    }

    fn trim(&mut self, height: u64) {
        self.journal.retain(|e| e.height > height);
    }
}

impl Ledger for BalanceLedger {
    fn validate(&self, tx: &Transaction) -> Result<(), String> {
        if !tx.verify_signature() {
            return Err("bad signature".to_string());
        }
        let sender = tx.sender();
        match &tx.body {
            TxBody::Payment => {
                if tx.amount == 0 {
                    return Err("payment amount must be positive".to_string());
                }
            }
            TxBody::AliasAssignment { alias } => {
                if alias.is_empty() || alias.chars().count() > MAX_ALIAS_LEN {
                    return Err(format!("alias must be 1..={MAX_ALIAS_LEN} characters"));
                }
                if !alias.chars().all(|c| c.is_ascii_alphanumeric()) {
                    return Err("alias must be ascii alphanumeric".to_string());
                }
                if tx.recipient != sender {
                    return Err("alias recipient must be the sender".to_string());
                }
                if let Some(owner) = self.alias_owner(alias) {
                    if owner != sender {
                        return Err(format!("alias {alias} already owned by {owner}"));
                    }
                }
            }
        }
        if sender != self.creator && self.balance(&sender) < Self::cost(tx) {
            return Err(format!(
                "insufficient balance: {} < {}",
                self.balance(&sender),
                Self::cost(tx)
            ));
        }
        Ok(())
    }

    fn apply_unconfirmed(&mut self, tx: &Transaction, height: u64) -> bool {
        let sender = tx.sender();
        let cost = Self::cost(tx);
        if sender != self.creator && self.unconfirmed_balance(&sender) < cost {
            return false;
        }
        self.record(
            height,
            Change::Unconfirmed {
                account: sender,
                delta: -cost,
            },
        );
        true
    }

    fn apply(&mut self, tx: &Transaction, height: u64) -> Result<(), String> {
        let sender = tx.sender();
        let amount = i128::from(tx.amount);
        self.record(
            height,
            Change::Confirmed {
                account: sender,
                delta: -Self::cost(tx),
            },
        );
        if amount != 0 {
            for change in [
                Change::Confirmed {
                    account: tx.recipient,
                    delta: amount,
                },
                Change::Unconfirmed {
                    account: tx.recipient,
                    delta: amount,
                },
            ] {
                self.record(height, change);
            }
        }
        if let TxBody::AliasAssignment { alias } = &tx.body {
            let key = alias.to_lowercase();
            let previous = self.aliases.insert(key.clone(), sender);
            self.journal.push(Entry {
                height,
                change: Change::Alias { key, previous },
            });
        }
        Ok(())
    }

    fn effective_stake(&self, account: &AccountId) -> u64 {
        u64::try_from(self.balance(account).max(0)).unwrap_or(u64::MAX)
    }
}
