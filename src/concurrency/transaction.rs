use crate::common::config::TxnId;
use crate::concurrency::lock_manager::LockManager;
use bincode::{Decode, Encode};
use log::debug;
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Transaction status as tracked by the recovery manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Encode, Decode)]
pub enum TransactionStatus {
    Running,
    Committing,
    Aborting,
    RecoveryAborting,
    Complete,
}

impl TransactionStatus {
    /// Position of the status in a transaction's lifecycle. A transaction only
    /// ever moves to a status of equal or higher progress.
    pub fn progress(self) -> u8 {
        match self {
            TransactionStatus::Running => 0,
            TransactionStatus::Committing
            | TransactionStatus::Aborting
            | TransactionStatus::RecoveryAborting => 1,
            TransactionStatus::Complete => 2,
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionStatus::Running => "RUNNING",
            TransactionStatus::Committing => "COMMITTING",
            TransactionStatus::Aborting => "ABORTING",
            TransactionStatus::RecoveryAborting => "RECOVERY_ABORTING",
            TransactionStatus::Complete => "COMPLETE",
        };
        write!(f, "{}", name)
    }
}

/// A transaction shared between the transaction table and its callers.
pub struct Transaction {
    txn_id: TxnId,
    status: RwLock<TransactionStatus>,
    lock_manager: Arc<LockManager>,
    cleaned_up: AtomicBool,
}

impl Transaction {
    /// Creates a new running transaction.
    ///
    /// # Parameters
    /// - `txn_id`: The transaction number.
    /// - `lock_manager`: Lock manager whose locks are released on cleanup.
    ///
    /// # Returns
    /// A new `Transaction` in the `Running` status.
    pub fn new(txn_id: TxnId, lock_manager: Arc<LockManager>) -> Self {
        Self {
            txn_id,
            status: RwLock::new(TransactionStatus::Running),
            lock_manager,
            cleaned_up: AtomicBool::new(false),
        }
    }

    pub fn get_transaction_id(&self) -> TxnId {
        self.txn_id
    }

    pub fn get_status(&self) -> TransactionStatus {
        *self.status.read()
    }

    pub fn set_status(&self, status: TransactionStatus) {
        *self.status.write() = status;
    }

    /// Releases every resource the transaction holds. Only the first call has
    /// an effect.
    pub fn cleanup(&self) {
        if self.cleaned_up.swap(true, Ordering::SeqCst) {
            return;
        }
        self.lock_manager.release_all(self.txn_id);
        debug!("Cleaned up txn {}", self.txn_id);
    }

    pub fn is_cleaned_up(&self) -> bool {
        self.cleaned_up.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("txn_id", &self.txn_id)
            .field("status", &self.get_status())
            .field("cleaned_up", &self.is_cleaned_up())
            .finish()
    }
}
