use crate::common::config::{Lsn, PageId, TxnId, MASTER_RECORD_LSN, NO_LSN};
use crate::common::exception::{RecoveryError, Result};
use crate::concurrency::lock_manager::{LockMode, ResourceName};
use crate::concurrency::transaction::{Transaction, TransactionStatus};
use crate::recovery::log_record::{
    DirtyPageSnapshot, LogRecord, TouchedPagesSnapshot, TransactionSnapshot,
};
use crate::recovery::recovery_manager::{next_lsn_to_undo, RecoveryManager};
use crate::recovery::transaction_table::TransactionTableEntry;
use log::{debug, info, warn};
use std::collections::{BinaryHeap, HashSet};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// The undo phase of a restart, handed back to the caller once analysis and
/// redo have finished so new transactions can start while it runs.
#[must_use = "restart recovery is incomplete until the pending undo runs"]
pub struct PendingUndo {
    recovery_manager: Arc<RecoveryManager>,
}

impl PendingUndo {
    /// Rolls back every transaction left unfinished by the crash, then takes
    /// a checkpoint so a later crash does not repeat the work.
    pub fn run(self) -> Result<()> {
        self.recovery_manager.restart_undo()?;
        self.recovery_manager.checkpoint()?;
        info!("Restart recovery complete");
        Ok(())
    }

    /// Runs the undo phase on a background thread.
    pub fn spawn(self) -> JoinHandle<Result<()>> {
        thread::spawn(move || self.run())
    }
}

impl RecoveryManager {
    /// Recovers the database after a crash.
    ///
    /// Runs analysis and redo to completion and prunes the dirty page table.
    /// Pages that still need undo stay exclusively locked by their recovering
    /// transactions, so new transactions that touch them block until the
    /// returned `PendingUndo` finishes.
    ///
    /// # Returns
    /// The undo phase, which the caller must run or spawn.
    pub fn restart(self: &Arc<Self>) -> Result<PendingUndo> {
        info!("Starting restart recovery");
        let checkpoint_lsn = self.restart_analysis()?;
        self.restart_redo(checkpoint_lsn)?;
        self.prune_dirty_page_table()?;
        info!(
            "Analysis and redo complete: {} dirty pages, {} transactions to undo",
            self.dirty_page_table.len(),
            self.transaction_table.len()
        );
        Ok(PendingUndo {
            recovery_manager: Arc::clone(self),
        })
    }

    /// Rebuilds the dirty page table and the transaction table from the log,
    /// starting at the last checkpoint.
    ///
    /// Afterwards committing transactions have been ended, and every other
    /// transaction is `RecoveryAborting`.
    ///
    /// # Returns
    /// The LSN the scan started from.
    pub(crate) fn restart_analysis(&self) -> Result<Lsn> {
        let checkpoint_lsn = match self.log_manager.fetch_log_record(MASTER_RECORD_LSN) {
            Ok(LogRecord::Master {
                last_checkpoint_lsn,
            }) => last_checkpoint_lsn,
            _ => return Err(RecoveryError::MasterRecordMissing),
        };
        info!("Starting analysis from checkpoint at LSN {}", checkpoint_lsn);

        self.dirty_page_table.clear();
        self.transaction_table.clear();
        let mut ended: HashSet<TxnId> = HashSet::new();

        for (lsn, record) in self.log_manager.scan_from(checkpoint_lsn) {
            if let Some(txn_id) = record.get_txn_id() {
                self.analyze_transaction_record(txn_id, lsn, &record)?;
            }

            match record {
                LogRecord::CommitTransaction { txn_id, .. } => {
                    self.transaction_table
                        .get_transaction(txn_id)?
                        .set_status(TransactionStatus::Committing);
                }
                LogRecord::AbortTransaction { txn_id, .. } => {
                    self.transaction_table
                        .get_transaction(txn_id)?
                        .set_status(TransactionStatus::Aborting);
                }
                LogRecord::EndTransaction { txn_id, .. } => {
                    if let Some(entry) = self.transaction_table.remove(txn_id) {
                        entry.transaction.cleanup();
                        entry.transaction.set_status(TransactionStatus::Complete);
                    }
                    ended.insert(txn_id);
                }
                LogRecord::BeginCheckpoint { max_txn_num } => {
                    self.transaction_manager
                        .update_transaction_counter(max_txn_num);
                }
                LogRecord::EndCheckpoint {
                    dirty_page_table,
                    transaction_table,
                    touched_pages,
                } => {
                    self.merge_checkpoint(
                        dirty_page_table,
                        transaction_table,
                        touched_pages,
                        &mut ended,
                    )?;
                }
                _ => {}
            }
        }

        for txn_id in self.transaction_table.txn_ids() {
            let transaction = self.transaction_table.get_transaction(txn_id)?;
            match transaction.get_status() {
                TransactionStatus::Committing => {
                    self.finish_transaction(txn_id)?;
                }
                TransactionStatus::Running => {
                    self.append_for_txn(txn_id, |prev_lsn| LogRecord::AbortTransaction {
                        txn_id,
                        prev_lsn,
                    })?;
                    transaction.set_status(TransactionStatus::RecoveryAborting);
                }
                TransactionStatus::Aborting => {
                    transaction.set_status(TransactionStatus::RecoveryAborting);
                }
                TransactionStatus::RecoveryAborting => {}
                TransactionStatus::Complete => {
                    self.transaction_table.remove(txn_id);
                }
            }
        }

        debug!(
            "Analysis rebuilt {} dirty pages and {} transactions",
            self.dirty_page_table.len(),
            self.transaction_table.len()
        );
        Ok(checkpoint_lsn)
    }

    fn analyze_transaction_record(
        &self,
        txn_id: TxnId,
        lsn: Lsn,
        record: &LogRecord,
    ) -> Result<()> {
        let transaction = self.recovered_transaction(txn_id, |entry| {
            entry.last_lsn = lsn;
            if let Some(page_id) = record.get_page_id() {
                entry.touched_pages.insert(page_id);
            }
        })?;

        if let Some(page_id) = record.get_page_id() {
            self.relock_page(&transaction, page_id)?;
            if record.is_allocation() {
                self.dirty_page_table.remove(page_id);
            } else {
                self.dirty_page_table.insert_if_absent(page_id, lsn);
            }
        }
        Ok(())
    }

    /// Returns the transaction for `txn_id`, creating its table entry if
    /// needed, after applying `update` to the entry.
    fn recovered_transaction(
        &self,
        txn_id: TxnId,
        update: impl FnOnce(&mut TransactionTableEntry),
    ) -> Result<Arc<Transaction>> {
        self.transaction_table.insert_if_absent(txn_id, || {
            self.transaction_manager.new_recovery_transaction(txn_id)
        });
        self.transaction_table.with_entry(txn_id, |entry| {
            update(entry);
            Arc::clone(&entry.transaction)
        })
    }

    fn relock_page(&self, transaction: &Transaction, page_id: PageId) -> Result<()> {
        self.lock_manager
            .reacquire_lock(transaction, ResourceName::Page(page_id), LockMode::Exclusive)?;
        Ok(())
    }

    fn merge_checkpoint(
        &self,
        dirty_page_table: DirtyPageSnapshot,
        transaction_table: TransactionSnapshot,
        touched_pages: TouchedPagesSnapshot,
        ended: &mut HashSet<TxnId>,
    ) -> Result<()> {
        for (page_id, rec_lsn) in dirty_page_table {
            self.dirty_page_table.insert(page_id, rec_lsn);
        }

        for (txn_id, (status, last_lsn)) in transaction_table {
            if ended.contains(&txn_id) {
                continue;
            }
            let transaction = self.recovered_transaction(txn_id, |entry| {
                entry.last_lsn = entry.last_lsn.max(last_lsn);
            })?;

            if status == TransactionStatus::Complete {
                transaction.cleanup();
                transaction.set_status(TransactionStatus::Complete);
                self.transaction_table.remove(txn_id);
                ended.insert(txn_id);
                continue;
            }
            let status = match status {
                TransactionStatus::RecoveryAborting => TransactionStatus::Aborting,
                other => other,
            };
            if status.progress() > transaction.get_status().progress() {
                transaction.set_status(status);
            }
        }

        for (txn_id, page_ids) in touched_pages {
            if ended.contains(&txn_id) || !self.transaction_table.contains(txn_id) {
                continue;
            }
            let transaction = self.transaction_table.with_entry(txn_id, |entry| {
                entry.touched_pages.extend(page_ids.iter().copied());
                Arc::clone(&entry.transaction)
            })?;
            if transaction.get_status() == TransactionStatus::Complete {
                continue;
            }
            for page_id in page_ids {
                self.relock_page(&transaction, page_id)?;
            }
        }
        Ok(())
    }

    /// Repeats history from the smallest recLSN in the dirty page table.
    ///
    /// # Parameters
    /// - `checkpoint_lsn`: Where to start when no page is dirty, so partition
    ///   changes logged after the checkpoint are still replayed.
    pub(crate) fn restart_redo(&self, checkpoint_lsn: Lsn) -> Result<()> {
        let start_lsn = self
            .dirty_page_table
            .min_rec_lsn()
            .unwrap_or(checkpoint_lsn);
        info!("Starting redo from LSN {}", start_lsn);

        let mut redone = 0;
        for (lsn, record) in self.log_manager.scan_from(start_lsn) {
            if !record.is_redoable() || !self.should_redo(lsn, &record)? {
                continue;
            }
            record.redo(lsn, &self.disk_manager, &self.buffer_pool_manager)?;
            redone += 1;
        }
        debug!("Redo reapplied {} records", redone);
        Ok(())
    }

    fn should_redo(&self, lsn: Lsn, record: &LogRecord) -> Result<bool> {
        let Some(page_id) = record.get_page_id() else {
            return Ok(record.get_part_id().is_some());
        };
        match self.dirty_page_table.get_rec_lsn(page_id) {
            Some(rec_lsn) if lsn >= rec_lsn => {}
            _ => return Ok(false),
        }
        if record.is_allocation() {
            return Ok(true);
        }
        if !self.disk_manager.is_page_allocated(page_id) {
            return Ok(false);
        }
        let page = self.buffer_pool_manager.fetch_page(page_id)?;
        Ok(page.get_page_lsn() < lsn)
    }

    /// Drops pages whose contents are already durable from the dirty page
    /// table.
    fn prune_dirty_page_table(&self) -> Result<()> {
        let flushed_lsn = self.log_manager.get_flushed_lsn();
        for page_id in self.dirty_page_table.page_ids() {
            let durable = !self.disk_manager.is_page_allocated(page_id)
                || !self.buffer_pool_manager.is_page_dirty(page_id)
                || Some(self.disk_manager.page_lsn_on_disk(page_id)?) >= flushed_lsn;
            if durable {
                self.dirty_page_table.remove(page_id);
            }
        }
        Ok(())
    }

    /// Rolls back every `RecoveryAborting` transaction, always undoing the
    /// record with the largest LSN across all of them next.
    pub(crate) fn restart_undo(&self) -> Result<()> {
        let mut to_undo: BinaryHeap<(Lsn, TxnId)> = BinaryHeap::new();
        for txn_id in self.transaction_table.txn_ids() {
            let transaction = self.transaction_table.get_transaction(txn_id)?;
            if transaction.get_status() == TransactionStatus::RecoveryAborting {
                to_undo.push((self.transaction_table.get_last_lsn(txn_id)?, txn_id));
            }
        }
        info!("Starting undo of {} transactions", to_undo.len());

        while let Some((lsn, txn_id)) = to_undo.pop() {
            let record = self.log_manager.fetch_log_record(lsn)?;
            if record.get_txn_id() != Some(txn_id) {
                warn!("LSN {} does not belong to txn {}: {}", lsn, txn_id, record);
            }
            if record.is_undoable() {
                self.undo_record(txn_id, lsn, &record)?;
            }

            match next_lsn_to_undo(&record) {
                NO_LSN => {
                    self.finish_transaction(txn_id)?;
                }
                next_lsn => to_undo.push((next_lsn, txn_id)),
            }
        }
        Ok(())
    }
}
