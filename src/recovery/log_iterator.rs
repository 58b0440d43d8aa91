use crate::common::config::Lsn;
use crate::recovery::log_manager::LogManager;
use crate::recovery::log_record::LogRecord;
use log::trace;

/// `LogIterator` walks the log forward from a starting LSN.
///
/// It reads one record per step, so records appended while the scan is in
/// progress are visited as well. The scan ends at the first LSN with no
/// record. Restarting a scan means creating a new iterator.
pub struct LogIterator<'a> {
    log_manager: &'a LogManager,
    next_lsn: Lsn,
}

impl<'a> LogIterator<'a> {
    /// Creates a new `LogIterator`.
    ///
    /// # Parameters
    /// - `log_manager`: The log to read.
    /// - `start_lsn`: LSN of the first record returned.
    ///
    /// # Returns
    /// A new `LogIterator` instance.
    pub fn new(log_manager: &'a LogManager, start_lsn: Lsn) -> Self {
        Self {
            log_manager,
            next_lsn: start_lsn,
        }
    }
}

impl Iterator for LogIterator<'_> {
    type Item = (Lsn, LogRecord);

    fn next(&mut self) -> Option<Self::Item> {
        let lsn = self.next_lsn;
        let record = self.log_manager.fetch_log_record(lsn).ok()?;
        trace!("Scanned LSN {}", lsn);
        self.next_lsn += 1;
        Some((lsn, record))
    }
}
