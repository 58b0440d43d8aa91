use crate::common::config::{TxnId, TXN_START_ID};
use crate::concurrency::lock_manager::LockManager;
use crate::concurrency::transaction::Transaction;
use log::{debug, info};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Hands out transaction numbers and builds transaction objects.
#[derive(Debug)]
pub struct TransactionManager {
    next_txn_id: AtomicU64,
    lock_manager: Arc<LockManager>,
}

impl TransactionManager {
    pub fn new(lock_manager: Arc<LockManager>) -> Self {
        info!("TransactionManager initialized");
        Self {
            next_txn_id: AtomicU64::new(TXN_START_ID),
            lock_manager,
        }
    }

    /// Begins a new transaction with the next unused transaction number.
    pub fn begin(&self) -> Arc<Transaction> {
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        debug!("Beginning txn {}", txn_id);
        Arc::new(Transaction::new(txn_id, Arc::clone(&self.lock_manager)))
    }

    /// Builds the transaction object for a transaction found in the log during
    /// restart recovery. New transactions will never reuse its number.
    pub fn new_recovery_transaction(&self, txn_id: TxnId) -> Arc<Transaction> {
        self.update_transaction_counter(txn_id.saturating_add(1));
        debug!("Recreated txn {} for recovery", txn_id);
        Arc::new(Transaction::new(txn_id, Arc::clone(&self.lock_manager)))
    }

    /// Raises the next transaction number to at least `at_least`.
    pub fn update_transaction_counter(&self, at_least: TxnId) {
        self.next_txn_id.fetch_max(at_least, Ordering::SeqCst);
    }

    /// Returns the number the next transaction will receive.
    pub fn get_transaction_counter(&self) -> TxnId {
        self.next_txn_id.load(Ordering::SeqCst)
    }

    pub fn get_lock_manager(&self) -> Arc<LockManager> {
        Arc::clone(&self.lock_manager)
    }
}
