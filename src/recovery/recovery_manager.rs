use crate::buffer::buffer_pool_manager::{BufferPoolManager, PageFlushHooks};
use crate::common::config::{
    part_num, Lsn, PageId, PartId, TxnId, EFFECTIVE_PAGE_SIZE, LOG_PARTITION, NO_LSN,
};
use crate::common::exception::{RecoveryError, Result};
use crate::concurrency::lock_manager::LockManager;
use crate::concurrency::transaction::{Transaction, TransactionStatus};
use crate::concurrency::transaction_manager::TransactionManager;
use crate::recovery::dirty_page_table::DirtyPageTable;
use crate::recovery::log_manager::LogManager;
use crate::recovery::log_record::LogRecord;
use crate::recovery::transaction_table::{TransactionTable, TransactionTableEntry};
use crate::storage::disk::disk_space_manager::DiskSpaceManager;
use log::{debug, info, trace};
use std::sync::Arc;

/// RecoveryManager implements ARIES forward processing.
///
/// It logs every change a transaction makes, keeps the dirty page table and
/// the transaction table current, and rolls transactions back through
/// compensation log records. Checkpointing lives in `checkpoint_manager`,
/// restart recovery in `log_recovery`.
pub struct RecoveryManager {
    pub(crate) log_manager: Arc<LogManager>,
    pub(crate) buffer_pool_manager: Arc<BufferPoolManager>,
    pub(crate) disk_manager: Arc<DiskSpaceManager>,
    pub(crate) lock_manager: Arc<LockManager>,
    pub(crate) transaction_manager: Arc<TransactionManager>,
    pub(crate) dirty_page_table: DirtyPageTable,
    pub(crate) transaction_table: TransactionTable,
}

impl RecoveryManager {
    /// Creates a new `RecoveryManager` and registers it as the buffer pool's
    /// flush hooks.
    ///
    /// # Parameters
    /// - `log_manager`: The write-ahead log.
    /// - `buffer_pool_manager`: Buffer pool holding page contents.
    /// - `disk_manager`: Disk holding allocation state.
    /// - `transaction_manager`: Source of transaction numbers and objects.
    ///
    /// # Returns
    /// The shared `RecoveryManager`.
    pub fn new(
        log_manager: Arc<LogManager>,
        buffer_pool_manager: Arc<BufferPoolManager>,
        disk_manager: Arc<DiskSpaceManager>,
        transaction_manager: Arc<TransactionManager>,
    ) -> Arc<Self> {
        let recovery_manager = Arc::new(Self {
            log_manager,
            lock_manager: transaction_manager.get_lock_manager(),
            buffer_pool_manager,
            disk_manager,
            transaction_manager,
            dirty_page_table: DirtyPageTable::new(),
            transaction_table: TransactionTable::new(),
        });
        let hooks: std::sync::Weak<RecoveryManager> = Arc::downgrade(&recovery_manager);
        recovery_manager.buffer_pool_manager.set_flush_hooks(hooks);
        recovery_manager
    }

    /// Sets up the log of a fresh database: the master record at LSN 0,
    /// followed by a first checkpoint.
    pub fn initialize(&self) -> Result<()> {
        let lsn = self.log_manager.append_log_record(LogRecord::Master {
            last_checkpoint_lsn: NO_LSN,
        });
        debug!("Wrote master record at LSN {}", lsn);
        self.checkpoint()?;
        info!("Initialized recovery log");
        Ok(())
    }

    /// Registers a new transaction.
    pub fn start_transaction(&self, transaction: Arc<Transaction>) {
        debug!("Txn {} started", transaction.get_transaction_id());
        self.transaction_table
            .insert(TransactionTableEntry::new(transaction));
    }

    /// Appends a record built from the transaction's lastLSN and makes it the
    /// new lastLSN.
    pub(crate) fn append_for_txn(
        &self,
        txn_id: TxnId,
        build: impl FnOnce(Lsn) -> LogRecord,
    ) -> Result<Lsn> {
        self.transaction_table.with_entry(txn_id, |entry| {
            let lsn = self.log_manager.append_log_record(build(entry.last_lsn));
            entry.last_lsn = lsn;
            lsn
        })
    }

    /// Commits a transaction. Returns once the commit record is durable.
    ///
    /// # Returns
    /// The LSN of the commit record.
    pub fn commit(&self, txn_id: TxnId) -> Result<Lsn> {
        let lsn = self.append_for_txn(txn_id, |prev_lsn| LogRecord::CommitTransaction {
            txn_id,
            prev_lsn,
        })?;
        self.log_manager.flush_to_lsn(lsn)?;
        self.transaction_table
            .get_transaction(txn_id)?
            .set_status(TransactionStatus::Committing);
        info!("Txn {} committed at LSN {}", txn_id, lsn);
        Ok(lsn)
    }

    /// Marks a transaction as aborting. Its changes are rolled back by `end`.
    pub fn abort(&self, txn_id: TxnId) -> Result<Lsn> {
        let lsn = self.append_for_txn(txn_id, |prev_lsn| LogRecord::AbortTransaction {
            txn_id,
            prev_lsn,
        })?;
        self.transaction_table
            .get_transaction(txn_id)?
            .set_status(TransactionStatus::Aborting);
        info!("Txn {} aborting at LSN {}", txn_id, lsn);
        Ok(lsn)
    }

    /// Ends a transaction, rolling it back first if it is aborting.
    ///
    /// # Returns
    /// The LSN of the end record.
    pub fn end(&self, txn_id: TxnId) -> Result<Lsn> {
        let transaction = self.transaction_table.get_transaction(txn_id)?;
        if transaction.get_status() == TransactionStatus::Aborting {
            self.rollback_to_lsn(txn_id, NO_LSN)?;
        }
        self.finish_transaction(txn_id)
    }

    /// Cleans a transaction up, marks it complete, writes its end record and
    /// drops it from the transaction table.
    pub(crate) fn finish_transaction(&self, txn_id: TxnId) -> Result<Lsn> {
        let transaction = self.transaction_table.get_transaction(txn_id)?;
        transaction.cleanup();
        transaction.set_status(TransactionStatus::Complete);
        let lsn = self.append_for_txn(txn_id, |prev_lsn| LogRecord::EndTransaction {
            txn_id,
            prev_lsn,
        })?;
        self.transaction_table.remove(txn_id);
        debug!("Txn {} ended at LSN {}", txn_id, lsn);
        Ok(lsn)
    }

    /// Logs a write of `after` over `before` at `offset` on a page.
    ///
    /// Writes that together exceed half a page are logged as an undo-only
    /// record followed by a redo-only record. The page's recLSN is the LSN of
    /// the first record written.
    ///
    /// # Parameters
    /// - `txn_id`: The writing transaction.
    /// - `page_id`: The page written.
    /// - `offset`: Offset of the write within the page's usable area.
    /// - `before`: Bytes at the range before the write.
    /// - `after`: Bytes at the range after the write.
    ///
    /// # Returns
    /// The LSN of the last record written.
    pub fn log_page_write(
        &self,
        txn_id: TxnId,
        page_id: PageId,
        offset: u16,
        before: &[u8],
        after: &[u8],
    ) -> Result<Lsn> {
        if before.len() != after.len() {
            return Err(RecoveryError::ImageLengthMismatch {
                before: before.len(),
                after: after.len(),
            });
        }
        if offset as usize + after.len() > EFFECTIVE_PAGE_SIZE {
            return Err(RecoveryError::InvalidByteRange {
                offset: offset as usize,
                len: after.len(),
                capacity: EFFECTIVE_PAGE_SIZE,
            });
        }

        let split = before.len() + after.len() > EFFECTIVE_PAGE_SIZE / 2;
        let (first_lsn, last_lsn) = self.transaction_table.with_entry(txn_id, |entry| {
            let (first_lsn, last_lsn) = if split {
                let undo_lsn = self.log_manager.append_log_record(LogRecord::UpdatePage {
                    txn_id,
                    page_id,
                    prev_lsn: entry.last_lsn,
                    offset,
                    before: Some(before.to_vec()),
                    after: None,
                });
                let redo_lsn = self.log_manager.append_log_record(LogRecord::UpdatePage {
                    txn_id,
                    page_id,
                    prev_lsn: undo_lsn,
                    offset,
                    before: None,
                    after: Some(after.to_vec()),
                });
                (undo_lsn, redo_lsn)
            } else {
                let lsn = self.log_manager.append_log_record(LogRecord::UpdatePage {
                    txn_id,
                    page_id,
                    prev_lsn: entry.last_lsn,
                    offset,
                    before: Some(before.to_vec()),
                    after: Some(after.to_vec()),
                });
                (lsn, lsn)
            };
            entry.last_lsn = last_lsn;
            entry.touched_pages.insert(page_id);
            (first_lsn, last_lsn)
        })?;

        self.dirty_page_table.insert_if_absent(page_id, first_lsn);
        trace!(
            "Txn {} logged write of {} bytes to page {} at LSN {}",
            txn_id,
            after.len(),
            page_id,
            last_lsn
        );
        Ok(last_lsn)
    }

    /// Logs the allocation of a partition and flushes the log through it.
    ///
    /// # Returns
    /// The record's LSN, or `None` for the log partition, which is never logged.
    pub fn log_alloc_part(&self, txn_id: TxnId, part_id: PartId) -> Result<Option<Lsn>> {
        if part_id == LOG_PARTITION {
            return Ok(None);
        }
        let lsn = self.append_for_txn(txn_id, |prev_lsn| LogRecord::AllocPart {
            txn_id,
            part_id,
            prev_lsn,
        })?;
        self.log_manager.flush_to_lsn(lsn)?;
        Ok(Some(lsn))
    }

    /// Logs the release of a partition and flushes the log through it.
    pub fn log_free_part(&self, txn_id: TxnId, part_id: PartId) -> Result<Option<Lsn>> {
        if part_id == LOG_PARTITION {
            return Ok(None);
        }
        let lsn = self.append_for_txn(txn_id, |prev_lsn| LogRecord::FreePart {
            txn_id,
            part_id,
            prev_lsn,
        })?;
        self.log_manager.flush_to_lsn(lsn)?;
        Ok(Some(lsn))
    }

    /// Logs the allocation of a page and flushes the log through it.
    pub fn log_alloc_page(&self, txn_id: TxnId, page_id: PageId) -> Result<Option<Lsn>> {
        self.log_page_allocation(txn_id, page_id, |prev_lsn| LogRecord::AllocPage {
            txn_id,
            page_id,
            prev_lsn,
        })
    }

    /// Logs the release of a page and flushes the log through it.
    pub fn log_free_page(&self, txn_id: TxnId, page_id: PageId) -> Result<Option<Lsn>> {
        self.log_page_allocation(txn_id, page_id, |prev_lsn| LogRecord::FreePage {
            txn_id,
            page_id,
            prev_lsn,
        })
    }

    fn log_page_allocation(
        &self,
        txn_id: TxnId,
        page_id: PageId,
        build: impl FnOnce(Lsn) -> LogRecord,
    ) -> Result<Option<Lsn>> {
        if part_num(page_id) == LOG_PARTITION {
            return Ok(None);
        }
        let lsn = self.transaction_table.with_entry(txn_id, |entry| {
            let lsn = self.log_manager.append_log_record(build(entry.last_lsn));
            entry.last_lsn = lsn;
            entry.touched_pages.insert(page_id);
            lsn
        })?;
        self.dirty_page_table.remove(page_id);
        self.log_manager.flush_to_lsn(lsn)?;
        Ok(Some(lsn))
    }

    /// Saves the transaction's current lastLSN under `name`.
    pub fn savepoint(&self, txn_id: TxnId, name: &str) -> Result<()> {
        self.transaction_table
            .with_entry(txn_id, |entry| entry.add_savepoint(name))
    }

    pub fn release_savepoint(&self, txn_id: TxnId, name: &str) -> Result<()> {
        self.transaction_table
            .with_entry(txn_id, |entry| entry.delete_savepoint(name))?
            .map(|_| ())
            .ok_or_else(|| RecoveryError::SavepointNotFound {
                txn_id,
                name: name.to_string(),
            })
    }

    /// Undoes every change the transaction made after the savepoint. The
    /// transaction keeps its status.
    pub fn rollback_to_savepoint(&self, txn_id: TxnId, name: &str) -> Result<()> {
        let savepoint_lsn = self
            .transaction_table
            .with_entry(txn_id, |entry| entry.get_savepoint(name))?
            .ok_or_else(|| RecoveryError::SavepointNotFound {
                txn_id,
                name: name.to_string(),
            })?;
        info!(
            "Rolling txn {} back to savepoint '{}' at LSN {}",
            txn_id, name, savepoint_lsn
        );
        self.rollback_to_lsn(txn_id, savepoint_lsn)
    }

    /// Walks the transaction's chain back from its lastLSN, undoing every
    /// undoable record with an LSN greater than `target_lsn`.
    pub(crate) fn rollback_to_lsn(&self, txn_id: TxnId, target_lsn: Lsn) -> Result<()> {
        let mut current_lsn = self.transaction_table.get_last_lsn(txn_id)?;
        while current_lsn > target_lsn {
            let record = self.log_manager.fetch_log_record(current_lsn)?;
            if record.is_undoable() {
                self.undo_record(txn_id, current_lsn, &record)?;
            }
            current_lsn = next_lsn_to_undo(&record);
        }
        Ok(())
    }

    /// Writes and applies the compensation record for `record`.
    ///
    /// The page keeps its dirty page table entry: later changes by other
    /// transactions may still be unflushed behind the same recLSN.
    ///
    /// # Returns
    /// The LSN of the compensation record.
    pub(crate) fn undo_record(&self, txn_id: TxnId, lsn: Lsn, record: &LogRecord) -> Result<Lsn> {
        let (clr_lsn, clr, flush) = self.transaction_table.with_entry(txn_id, |entry| {
            let (clr, flush) = record.undo(entry.last_lsn)?;
            let clr_lsn = self.log_manager.append_log_record(clr.clone());
            entry.last_lsn = clr_lsn;
            Ok::<_, RecoveryError>((clr_lsn, clr, flush))
        })??;

        if flush {
            self.log_manager.flush_to_lsn(clr_lsn)?;
        }
        self.apply_clr(clr_lsn, &clr)?;
        debug!("Txn {} undid LSN {} with CLR {}", txn_id, lsn, clr_lsn);
        Ok(clr_lsn)
    }

    /// Applies a compensation record and updates the dirty page table.
    fn apply_clr(&self, clr_lsn: Lsn, clr: &LogRecord) -> Result<()> {
        // The page keeps its DPT entry even when the undone record set its
        // recLSN: later committed changes to the page may still be unflushed.
        if let LogRecord::UndoUpdatePage { page_id, .. } = clr {
            self.dirty_page_table.insert_if_absent(*page_id, clr_lsn);
        }
        clr.redo(clr_lsn, &self.disk_manager, &self.buffer_pool_manager)?;
        if let (true, Some(page_id)) = (clr.is_allocation(), clr.get_page_id()) {
            self.dirty_page_table.remove(page_id);
        }
        Ok(())
    }

    /// Takes a final checkpoint and flushes the log.
    pub fn close(&self) -> Result<()> {
        self.checkpoint()?;
        self.log_manager.flush_all()?;
        info!("Recovery manager closed");
        Ok(())
    }

    pub fn get_dirty_page_table(&self) -> &DirtyPageTable {
        &self.dirty_page_table
    }

    pub fn get_transaction_table(&self) -> &TransactionTable {
        &self.transaction_table
    }

    pub fn get_log_manager(&self) -> &Arc<LogManager> {
        &self.log_manager
    }
}

/// Next record of the same transaction to consider during undo.
pub(crate) fn next_lsn_to_undo(record: &LogRecord) -> Lsn {
    record
        .get_undo_next_lsn()
        .or_else(|| record.get_prev_lsn())
        .unwrap_or(NO_LSN)
}

impl PageFlushHooks for RecoveryManager {
    fn page_flush_hook(&self, page_lsn: Lsn) -> Result<()> {
        self.log_manager.flush_to_lsn(page_lsn)
    }

    fn disk_io_hook(&self, page_id: PageId) {
        if self.dirty_page_table.remove(page_id).is_some() {
            trace!("Page {} is clean", page_id);
        }
    }
}
