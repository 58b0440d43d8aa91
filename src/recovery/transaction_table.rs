use crate::common::config::{Lsn, PageId, TxnId, NO_LSN};
use crate::common::exception::{RecoveryError, Result};
use crate::concurrency::transaction::{Transaction, TransactionStatus};
use dashmap::DashMap;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

/// Per-transaction recovery state.
#[derive(Debug)]
pub struct TransactionTableEntry {
    pub transaction: Arc<Transaction>,
    pub last_lsn: Lsn,
    pub touched_pages: HashSet<PageId>,
    savepoints: HashMap<String, Lsn>,
}

impl TransactionTableEntry {
    pub fn new(transaction: Arc<Transaction>) -> Self {
        Self {
            transaction,
            last_lsn: NO_LSN,
            touched_pages: HashSet::new(),
            savepoints: HashMap::new(),
        }
    }

    /// Saves the current lastLSN under `name`, replacing any savepoint of the
    /// same name.
    pub fn add_savepoint(&mut self, name: &str) {
        self.savepoints.insert(name.to_string(), self.last_lsn);
    }

    pub fn get_savepoint(&self, name: &str) -> Option<Lsn> {
        self.savepoints.get(name).copied()
    }

    pub fn delete_savepoint(&mut self, name: &str) -> Option<Lsn> {
        self.savepoints.remove(name)
    }
}

/// Status, lastLSN and touched pages of one transaction, copied out of the
/// table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionSnapshotEntry {
    pub status: TransactionStatus,
    pub last_lsn: Lsn,
    pub touched_pages: Vec<PageId>,
}

/// Transaction table: transaction number → recovery state.
#[derive(Debug, Default)]
pub struct TransactionTable {
    entries: DashMap<TxnId, TransactionTableEntry>,
}

impl TransactionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, entry: TransactionTableEntry) {
        self.entries
            .insert(entry.transaction.get_transaction_id(), entry);
    }

    /// Returns `true` if a new entry was created.
    pub fn insert_if_absent(
        &self,
        txn_id: TxnId,
        create: impl FnOnce() -> Arc<Transaction>,
    ) -> bool {
        let mut created = false;
        self.entries.entry(txn_id).or_insert_with(|| {
            created = true;
            TransactionTableEntry::new(create())
        });
        created
    }

    pub fn remove(&self, txn_id: TxnId) -> Option<TransactionTableEntry> {
        self.entries.remove(&txn_id).map(|(_, entry)| entry)
    }

    pub fn contains(&self, txn_id: TxnId) -> bool {
        self.entries.contains_key(&txn_id)
    }

    /// Runs `f` against the entry of `txn_id`.
    ///
    /// The entry stays locked while `f` runs, so `f` must not touch the
    /// transaction table itself.
    pub fn with_entry<R>(
        &self,
        txn_id: TxnId,
        f: impl FnOnce(&mut TransactionTableEntry) -> R,
    ) -> Result<R> {
        let mut entry = self
            .entries
            .get_mut(&txn_id)
            .ok_or(RecoveryError::TransactionNotFound(txn_id))?;
        Ok(f(entry.value_mut()))
    }

    pub fn get_last_lsn(&self, txn_id: TxnId) -> Result<Lsn> {
        self.with_entry(txn_id, |entry| entry.last_lsn)
    }

    pub fn get_transaction(&self, txn_id: TxnId) -> Result<Arc<Transaction>> {
        self.with_entry(txn_id, |entry| Arc::clone(&entry.transaction))
    }

    pub fn txn_ids(&self) -> Vec<TxnId> {
        let mut txn_ids: Vec<TxnId> = self.entries.iter().map(|entry| *entry.key()).collect();
        txn_ids.sort_unstable();
        txn_ids
    }

    /// Copies every entry. Each entry is read atomically; the table as a
    /// whole is not frozen.
    pub fn snapshot(&self) -> BTreeMap<TxnId, TransactionSnapshotEntry> {
        self.entries
            .iter()
            .map(|entry| {
                let mut touched_pages: Vec<PageId> =
                    entry.touched_pages.iter().copied().collect();
                touched_pages.sort_unstable();
                (
                    *entry.key(),
                    TransactionSnapshotEntry {
                        status: entry.transaction.get_status(),
                        last_lsn: entry.last_lsn,
                        touched_pages,
                    },
                )
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}
