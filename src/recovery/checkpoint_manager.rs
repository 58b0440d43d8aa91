use crate::common::config::{Lsn, PageId, TxnId};
use crate::common::exception::Result;
use crate::concurrency::transaction::TransactionStatus;
use crate::recovery::log_manager::LogManager;
use crate::recovery::log_record::{
    DirtyPageSnapshot, LogRecord, TouchedPagesSnapshot, TransactionSnapshot,
};
use crate::recovery::recovery_manager::RecoveryManager;
use log::{debug, info};

/// Collects checkpoint entries and cuts a new end-checkpoint record whenever
/// the next entry would push the current one past a page.
struct CheckpointAccumulator<'a> {
    log_manager: &'a LogManager,
    dirty_page_table: DirtyPageSnapshot,
    transaction_table: TransactionSnapshot,
    touched_pages: TouchedPagesSnapshot,
    touched_page_count: usize,
    last_lsn: Option<Lsn>,
    records_written: usize,
}

impl<'a> CheckpointAccumulator<'a> {
    fn new(log_manager: &'a LogManager) -> Self {
        Self {
            log_manager,
            dirty_page_table: DirtyPageSnapshot::new(),
            transaction_table: TransactionSnapshot::new(),
            touched_pages: TouchedPagesSnapshot::new(),
            touched_page_count: 0,
            last_lsn: None,
            records_written: 0,
        }
    }

    fn fits(&self, dpt: usize, txns: usize, touched_txns: usize, touched_pages: usize) -> bool {
        LogRecord::fits_in_one_record(
            self.dirty_page_table.len() + dpt,
            self.transaction_table.len() + txns,
            self.touched_pages.len() + touched_txns,
            self.touched_page_count + touched_pages,
        )
    }

    fn add_dirty_page(&mut self, page_id: PageId, rec_lsn: Lsn) {
        if !self.fits(1, 0, 0, 0) {
            self.emit();
        }
        self.dirty_page_table.insert(page_id, rec_lsn);
    }

    fn add_transaction(&mut self, txn_id: TxnId, status: TransactionStatus, last_lsn: Lsn) {
        if !self.fits(0, 1, 0, 0) {
            self.emit();
        }
        self.transaction_table.insert(txn_id, (status, last_lsn));
    }

    fn add_touched_page(&mut self, txn_id: TxnId, page_id: PageId) {
        let new_txn = usize::from(!self.touched_pages.contains_key(&txn_id));
        if !self.fits(0, 0, new_txn, 1) {
            self.emit();
        }
        self.touched_pages.entry(txn_id).or_default().push(page_id);
        self.touched_page_count += 1;
    }

    fn emit(&mut self) {
        let record = LogRecord::EndCheckpoint {
            dirty_page_table: std::mem::take(&mut self.dirty_page_table),
            transaction_table: std::mem::take(&mut self.transaction_table),
            touched_pages: std::mem::take(&mut self.touched_pages),
        };
        self.touched_page_count = 0;
        self.last_lsn = Some(self.log_manager.append_log_record(record));
        self.records_written += 1;
    }

    /// Writes the final end-checkpoint record.
    ///
    /// # Returns
    /// The LSN of the last end-checkpoint record and the number written.
    fn finish(mut self) -> (Lsn, usize) {
        self.emit();
        (self.last_lsn.unwrap_or_default(), self.records_written)
    }
}

impl RecoveryManager {
    /// Takes a fuzzy checkpoint.
    ///
    /// Writes a begin-checkpoint record, then the dirty page table, the
    /// transaction table and the touched pages of every transaction packed
    /// into as few end-checkpoint records as fit. Once those are durable the
    /// master record is pointed at the begin-checkpoint record.
    ///
    /// # Returns
    /// The LSN of the begin-checkpoint record.
    pub fn checkpoint(&self) -> Result<Lsn> {
        let begin_lsn = self.log_manager.append_log_record(LogRecord::BeginCheckpoint {
            max_txn_num: self.transaction_manager.get_transaction_counter(),
        });

        let mut accumulator = CheckpointAccumulator::new(&self.log_manager);
        for (page_id, rec_lsn) in self.dirty_page_table.snapshot() {
            accumulator.add_dirty_page(page_id, rec_lsn);
        }
        let transactions = self.transaction_table.snapshot();
        for (&txn_id, entry) in &transactions {
            accumulator.add_transaction(txn_id, entry.status, entry.last_lsn);
        }
        for (&txn_id, entry) in &transactions {
            for &page_id in &entry.touched_pages {
                accumulator.add_touched_page(txn_id, page_id);
            }
        }
        let (end_lsn, records_written) = accumulator.finish();

        self.log_manager.flush_to_lsn(end_lsn)?;
        self.log_manager.rewrite_master_record(begin_lsn)?;
        debug!(
            "Checkpoint wrote {} end-checkpoint records through LSN {}",
            records_written, end_lsn
        );
        info!("Checkpoint taken at LSN {}", begin_lsn);
        Ok(begin_lsn)
    }
}
