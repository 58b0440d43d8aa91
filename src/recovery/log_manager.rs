use crate::common::config::{Lsn, MASTER_RECORD_LSN};
use crate::common::exception::{RecoveryError, Result};
use crate::recovery::log_iterator::LogIterator;
use crate::recovery::log_record::LogRecord;
use crate::storage::disk::disk_space_manager::DiskSpaceManager;
use log::{debug, info, trace};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// LogManager owns the write-ahead log.
///
/// Appended records stay in an in-memory tail until `flush_to_lsn` encodes
/// them into the disk's log partition. Only the flushed prefix survives a
/// crash; `open` rebuilds the log from it.
#[derive(Debug)]
pub struct LogManager {
    disk_manager: Arc<DiskSpaceManager>,
    records: RwLock<Vec<LogRecord>>,
    persistent_count: AtomicU64,
    flush_latch: Mutex<()>,
}

impl LogManager {
    /// Opens the log stored on `disk_manager`.
    ///
    /// # Parameters
    /// - `disk_manager`: The disk holding the durable log.
    ///
    /// # Returns
    /// A `LogManager` whose records are exactly the durable ones.
    pub fn open(disk_manager: Arc<DiskSpaceManager>) -> Result<Self> {
        let records = disk_manager
            .read_log()
            .iter()
            .map(|bytes| LogRecord::from_bytes(bytes))
            .collect::<Result<Vec<_>>>()?;
        info!("Opened log with {} durable records", records.len());

        Ok(Self {
            disk_manager,
            persistent_count: AtomicU64::new(records.len() as u64),
            records: RwLock::new(records),
            flush_latch: Mutex::new(()),
        })
    }

    /// Appends a log record to the log tail.
    ///
    /// # Parameters
    /// - `log_record`: The log record to append.
    ///
    /// # Returns
    /// The log sequence number (LSN) of the appended log record.
    pub fn append_log_record(&self, log_record: LogRecord) -> Lsn {
        let mut records = self.records.write();
        let lsn = records.len() as Lsn;
        trace!("Appending LSN {}: {}", lsn, log_record);
        records.push(log_record);
        lsn
    }

    /// Makes every record up to and including `lsn` durable. Blocks until the
    /// records are written.
    pub fn flush_to_lsn(&self, lsn: Lsn) -> Result<()> {
        let _guard = self.flush_latch.lock();
        let start = self.persistent_count.load(Ordering::SeqCst);
        if lsn < start {
            return Ok(());
        }

        let records = self.records.read();
        let end = (lsn + 1).min(records.len() as u64);
        for slot in start..end {
            let bytes = records[slot as usize].to_bytes()?;
            self.disk_manager.write_log_record(slot, bytes);
        }
        self.persistent_count.store(end.max(start), Ordering::SeqCst);

        if end > start {
            debug!("Flushed log through LSN {}", end - 1);
        }
        Ok(())
    }

    /// Flushes every appended record.
    pub fn flush_all(&self) -> Result<()> {
        match self.get_next_lsn().checked_sub(1) {
            Some(last) => self.flush_to_lsn(last),
            None => Ok(()),
        }
    }

    pub fn fetch_log_record(&self, lsn: Lsn) -> Result<LogRecord> {
        self.records
            .read()
            .get(lsn as usize)
            .cloned()
            .ok_or(RecoveryError::LogRecordNotFound(lsn))
    }

    /// Returns a forward iterator over the records starting at `lsn`.
    pub fn scan_from(&self, lsn: Lsn) -> LogIterator<'_> {
        LogIterator::new(self, lsn)
    }

    /// Returns the LSN of the last durable record, or `None` if nothing has
    /// been flushed.
    pub fn get_flushed_lsn(&self) -> Option<Lsn> {
        self.persistent_count.load(Ordering::SeqCst).checked_sub(1)
    }

    /// Returns the LSN the next appended record will receive.
    pub fn get_next_lsn(&self) -> Lsn {
        self.records.read().len() as Lsn
    }

    /// Points the master record at a new checkpoint and writes it durably.
    pub fn rewrite_master_record(&self, last_checkpoint_lsn: Lsn) -> Result<()> {
        let _guard = self.flush_latch.lock();
        let master = LogRecord::Master {
            last_checkpoint_lsn,
        };

        let mut records = self.records.write();
        let slot = records
            .get_mut(MASTER_RECORD_LSN as usize)
            .ok_or(RecoveryError::MasterRecordMissing)?;
        *slot = master.clone();
        drop(records);

        self.disk_manager
            .write_log_record(MASTER_RECORD_LSN, master.to_bytes()?);
        self.persistent_count.fetch_max(1, Ordering::SeqCst);
        debug!("Master record now points at LSN {}", last_checkpoint_lsn);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::logger::initialize_logger;

    struct TestContext {
        disk_manager: Arc<DiskSpaceManager>,
        log_manager: LogManager,
    }

    impl TestContext {
        fn new() -> Self {
            initialize_logger();
            let disk_manager = Arc::new(DiskSpaceManager::new());
            let log_manager = LogManager::open(Arc::clone(&disk_manager)).unwrap();
            Self {
                disk_manager,
                log_manager,
            }
        }

        fn reopen(&self) -> LogManager {
            LogManager::open(Arc::clone(&self.disk_manager)).unwrap()
        }
    }

    fn commit(txn_id: u64, prev_lsn: Lsn) -> LogRecord {
        LogRecord::CommitTransaction { txn_id, prev_lsn }
    }

    #[test]
    fn test_append_assigns_sequential_lsns() {
        let ctx = TestContext::new();
        assert_eq!(
            ctx.log_manager.append_log_record(LogRecord::Master {
                last_checkpoint_lsn: 0
            }),
            0
        );
        assert_eq!(ctx.log_manager.append_log_record(commit(1, 0)), 1);
        assert_eq!(ctx.log_manager.get_next_lsn(), 2);
        assert_eq!(ctx.log_manager.fetch_log_record(1).unwrap(), commit(1, 0));
        assert!(matches!(
            ctx.log_manager.fetch_log_record(5),
            Err(RecoveryError::LogRecordNotFound(5))
        ));
    }

    #[test]
    fn test_unflushed_tail_is_lost_on_reopen() {
        let ctx = TestContext::new();
        ctx.log_manager.append_log_record(LogRecord::Master {
            last_checkpoint_lsn: 0,
        });
        ctx.log_manager.append_log_record(commit(1, 0));
        ctx.log_manager.append_log_record(commit(2, 0));
        assert_eq!(ctx.log_manager.get_flushed_lsn(), None);

        ctx.log_manager.flush_to_lsn(1).unwrap();
        assert_eq!(ctx.log_manager.get_flushed_lsn(), Some(1));

        let reopened = ctx.reopen();
        assert_eq!(reopened.get_next_lsn(), 2);
        assert_eq!(reopened.get_flushed_lsn(), Some(1));
        assert_eq!(reopened.fetch_log_record(1).unwrap(), commit(1, 0));
    }

    #[test]
    fn test_rewrite_master_record_is_durable() {
        let ctx = TestContext::new();
        assert!(matches!(
            ctx.log_manager.rewrite_master_record(3),
            Err(RecoveryError::MasterRecordMissing)
        ));

        ctx.log_manager.append_log_record(LogRecord::Master {
            last_checkpoint_lsn: 0,
        });
        ctx.log_manager.rewrite_master_record(3).unwrap();

        let reopened = ctx.reopen();
        assert_eq!(
            reopened.fetch_log_record(MASTER_RECORD_LSN).unwrap(),
            LogRecord::Master {
                last_checkpoint_lsn: 3
            }
        );
    }

    #[test]
    fn test_scan_from_is_restartable() {
        let ctx = TestContext::new();
        for txn_id in 0..5 {
            ctx.log_manager.append_log_record(commit(txn_id, 0));
        }

        let lsns: Vec<Lsn> = ctx.log_manager.scan_from(2).map(|(lsn, _)| lsn).collect();
        assert_eq!(lsns, vec![2, 3, 4]);
        let again: Vec<Lsn> = ctx.log_manager.scan_from(2).map(|(lsn, _)| lsn).collect();
        assert_eq!(lsns, again);
        assert_eq!(ctx.log_manager.scan_from(9).count(), 0);
    }
}
