use std::collections::BTreeMap;
use std::fmt;

use bincode::{Decode, Encode};
use log::trace;

use crate::buffer::buffer_pool_manager::BufferPoolManager;
use crate::common::config::{
    part_num, storage_bincode_config, Lsn, PageId, PartId, TxnId, EFFECTIVE_PAGE_SIZE,
};
use crate::common::exception::{RecoveryError, Result};
use crate::concurrency::transaction::TransactionStatus;
use crate::storage::disk::disk_space_manager::DiskSpaceManager;

/// The type of the log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogRecordType {
    Master,
    BeginCheckpoint,
    EndCheckpoint,
    CommitTransaction,
    AbortTransaction,
    EndTransaction,
    UpdatePage,
    UndoUpdatePage,
    AllocPage,
    UndoAllocPage,
    FreePage,
    UndoFreePage,
    AllocPart,
    UndoAllocPart,
    FreePart,
    UndoFreePart,
}

/// Snapshot of the dirty page table carried by an EndCheckpoint record.
pub type DirtyPageSnapshot = BTreeMap<PageId, Lsn>;
/// Snapshot of transaction status and lastLSN carried by an EndCheckpoint record.
pub type TransactionSnapshot = BTreeMap<TxnId, (TransactionStatus, Lsn)>;
/// Snapshot of touched pages carried by an EndCheckpoint record.
pub type TouchedPagesSnapshot = BTreeMap<TxnId, Vec<PageId>>;

/// A record in the write-ahead log.
///
/// Every record a transaction writes carries `prev_lsn`, the LSN of that
/// transaction's previous record, or `NO_LSN` for its first record.
/// Compensation records (the `Undo*` variants) also carry `undo_next_lsn`,
/// the next record of the transaction that still has to be undone.
///
/// Encoded size of an EndCheckpoint record, with the fixed-width bincode
/// configuration:
///---------------------------------------------------------------------------
/// | tag (4) | dpt len (8) | 16 per page | txns len (8) | 20 per txn |
/// | touched len (8) | 16 per txn with touched pages | 8 per touched page |
///---------------------------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub enum LogRecord {
    Master {
        last_checkpoint_lsn: Lsn,
    },
    BeginCheckpoint {
        max_txn_num: TxnId,
    },
    EndCheckpoint {
        dirty_page_table: DirtyPageSnapshot,
        transaction_table: TransactionSnapshot,
        touched_pages: TouchedPagesSnapshot,
    },
    CommitTransaction {
        txn_id: TxnId,
        prev_lsn: Lsn,
    },
    AbortTransaction {
        txn_id: TxnId,
        prev_lsn: Lsn,
    },
    EndTransaction {
        txn_id: TxnId,
        prev_lsn: Lsn,
    },
    UpdatePage {
        txn_id: TxnId,
        page_id: PageId,
        prev_lsn: Lsn,
        offset: u16,
        before: Option<Vec<u8>>,
        after: Option<Vec<u8>>,
    },
    UndoUpdatePage {
        txn_id: TxnId,
        page_id: PageId,
        prev_lsn: Lsn,
        undo_next_lsn: Lsn,
        offset: u16,
        after: Vec<u8>,
    },
    AllocPage {
        txn_id: TxnId,
        page_id: PageId,
        prev_lsn: Lsn,
    },
    UndoAllocPage {
        txn_id: TxnId,
        page_id: PageId,
        prev_lsn: Lsn,
        undo_next_lsn: Lsn,
    },
    FreePage {
        txn_id: TxnId,
        page_id: PageId,
        prev_lsn: Lsn,
    },
    UndoFreePage {
        txn_id: TxnId,
        page_id: PageId,
        prev_lsn: Lsn,
        undo_next_lsn: Lsn,
    },
    AllocPart {
        txn_id: TxnId,
        part_id: PartId,
        prev_lsn: Lsn,
    },
    UndoAllocPart {
        txn_id: TxnId,
        part_id: PartId,
        prev_lsn: Lsn,
        undo_next_lsn: Lsn,
    },
    FreePart {
        txn_id: TxnId,
        part_id: PartId,
        prev_lsn: Lsn,
    },
    UndoFreePart {
        txn_id: TxnId,
        part_id: PartId,
        prev_lsn: Lsn,
        undo_next_lsn: Lsn,
    },
}

impl LogRecord {
    const TAG_SIZE: usize = 4;
    const LEN_SIZE: usize = 8;
    const DPT_ENTRY_SIZE: usize = 16;
    const TXN_ENTRY_SIZE: usize = 20;
    const TOUCHED_TXN_SIZE: usize = 16;
    const TOUCHED_PAGE_SIZE: usize = 8;

    pub fn get_log_record_type(&self) -> LogRecordType {
        match self {
            LogRecord::Master { .. } => LogRecordType::Master,
            LogRecord::BeginCheckpoint { .. } => LogRecordType::BeginCheckpoint,
            LogRecord::EndCheckpoint { .. } => LogRecordType::EndCheckpoint,
            LogRecord::CommitTransaction { .. } => LogRecordType::CommitTransaction,
            LogRecord::AbortTransaction { .. } => LogRecordType::AbortTransaction,
            LogRecord::EndTransaction { .. } => LogRecordType::EndTransaction,
            LogRecord::UpdatePage { .. } => LogRecordType::UpdatePage,
            LogRecord::UndoUpdatePage { .. } => LogRecordType::UndoUpdatePage,
            LogRecord::AllocPage { .. } => LogRecordType::AllocPage,
            LogRecord::UndoAllocPage { .. } => LogRecordType::UndoAllocPage,
            LogRecord::FreePage { .. } => LogRecordType::FreePage,
            LogRecord::UndoFreePage { .. } => LogRecordType::UndoFreePage,
            LogRecord::AllocPart { .. } => LogRecordType::AllocPart,
            LogRecord::UndoAllocPart { .. } => LogRecordType::UndoAllocPart,
            LogRecord::FreePart { .. } => LogRecordType::FreePart,
            LogRecord::UndoFreePart { .. } => LogRecordType::UndoFreePart,
        }
    }

    /// Returns the transaction that wrote the record, if any.
    pub fn get_txn_id(&self) -> Option<TxnId> {
        match self {
            LogRecord::Master { .. }
            | LogRecord::BeginCheckpoint { .. }
            | LogRecord::EndCheckpoint { .. } => None,
            LogRecord::CommitTransaction { txn_id, .. }
            | LogRecord::AbortTransaction { txn_id, .. }
            | LogRecord::EndTransaction { txn_id, .. }
            | LogRecord::UpdatePage { txn_id, .. }
            | LogRecord::UndoUpdatePage { txn_id, .. }
            | LogRecord::AllocPage { txn_id, .. }
            | LogRecord::UndoAllocPage { txn_id, .. }
            | LogRecord::FreePage { txn_id, .. }
            | LogRecord::UndoFreePage { txn_id, .. }
            | LogRecord::AllocPart { txn_id, .. }
            | LogRecord::UndoAllocPart { txn_id, .. }
            | LogRecord::FreePart { txn_id, .. }
            | LogRecord::UndoFreePart { txn_id, .. } => Some(*txn_id),
        }
    }

    /// Returns the LSN of the writing transaction's previous record, if the
    /// record belongs to a transaction.
    pub fn get_prev_lsn(&self) -> Option<Lsn> {
        match self {
            LogRecord::Master { .. }
            | LogRecord::BeginCheckpoint { .. }
            | LogRecord::EndCheckpoint { .. } => None,
            LogRecord::CommitTransaction { prev_lsn, .. }
            | LogRecord::AbortTransaction { prev_lsn, .. }
            | LogRecord::EndTransaction { prev_lsn, .. }
            | LogRecord::UpdatePage { prev_lsn, .. }
            | LogRecord::UndoUpdatePage { prev_lsn, .. }
            | LogRecord::AllocPage { prev_lsn, .. }
            | LogRecord::UndoAllocPage { prev_lsn, .. }
            | LogRecord::FreePage { prev_lsn, .. }
            | LogRecord::UndoFreePage { prev_lsn, .. }
            | LogRecord::AllocPart { prev_lsn, .. }
            | LogRecord::UndoAllocPart { prev_lsn, .. }
            | LogRecord::FreePart { prev_lsn, .. }
            | LogRecord::UndoFreePart { prev_lsn, .. } => Some(*prev_lsn),
        }
    }

    pub fn get_page_id(&self) -> Option<PageId> {
        match self {
            LogRecord::UpdatePage { page_id, .. }
            | LogRecord::UndoUpdatePage { page_id, .. }
            | LogRecord::AllocPage { page_id, .. }
            | LogRecord::UndoAllocPage { page_id, .. }
            | LogRecord::FreePage { page_id, .. }
            | LogRecord::UndoFreePage { page_id, .. } => Some(*page_id),
            _ => None,
        }
    }

    pub fn get_part_id(&self) -> Option<PartId> {
        match self {
            LogRecord::AllocPart { part_id, .. }
            | LogRecord::UndoAllocPart { part_id, .. }
            | LogRecord::FreePart { part_id, .. }
            | LogRecord::UndoFreePart { part_id, .. } => Some(*part_id),
            _ => self.get_page_id().map(part_num),
        }
    }

    /// Returns the next LSN to undo for compensation records.
    pub fn get_undo_next_lsn(&self) -> Option<Lsn> {
        match self {
            LogRecord::UndoUpdatePage { undo_next_lsn, .. }
            | LogRecord::UndoAllocPage { undo_next_lsn, .. }
            | LogRecord::UndoFreePage { undo_next_lsn, .. }
            | LogRecord::UndoAllocPart { undo_next_lsn, .. }
            | LogRecord::UndoFreePart { undo_next_lsn, .. } => Some(*undo_next_lsn),
            _ => None,
        }
    }

    /// Returns `true` for records that allocate, free, or modify a page or
    /// partition inside a transaction.
    pub fn is_transaction_operation(&self) -> bool {
        self.get_page_id().is_some()
            || matches!(
                self,
                LogRecord::AllocPart { .. }
                    | LogRecord::UndoAllocPart { .. }
                    | LogRecord::FreePart { .. }
                    | LogRecord::UndoFreePart { .. }
            )
    }

    /// Returns `true` for records whose effect on disk is made durable as soon
    /// as the record is logged.
    pub fn is_allocation(&self) -> bool {
        self.is_transaction_operation()
            && !matches!(
                self,
                LogRecord::UpdatePage { .. } | LogRecord::UndoUpdatePage { .. }
            )
    }

    pub fn is_redoable(&self) -> bool {
        match self {
            LogRecord::UpdatePage { after, .. } => after.is_some(),
            _ => self.is_transaction_operation(),
        }
    }

    pub fn is_undoable(&self) -> bool {
        match self {
            LogRecord::UpdatePage { before, .. } => before.is_some(),
            LogRecord::AllocPage { .. }
            | LogRecord::FreePage { .. }
            | LogRecord::AllocPart { .. }
            | LogRecord::FreePart { .. } => true,
            _ => false,
        }
    }

    /// Builds the compensation record that reverses this record.
    ///
    /// # Parameters
    /// - `last_lsn`: The current lastLSN of the transaction, used as the
    ///   compensation record's `prev_lsn`.
    ///
    /// # Returns
    /// The compensation record, and whether the log must be flushed through
    /// it before its effect is applied.
    pub fn undo(&self, last_lsn: Lsn) -> Result<(LogRecord, bool)> {
        let clr = match self {
            LogRecord::UpdatePage {
                txn_id,
                page_id,
                prev_lsn,
                offset,
                before: Some(before),
                ..
            } => {
                return Ok((
                    LogRecord::UndoUpdatePage {
                        txn_id: *txn_id,
                        page_id: *page_id,
                        prev_lsn: last_lsn,
                        undo_next_lsn: *prev_lsn,
                        offset: *offset,
                        after: before.clone(),
                    },
                    false,
                ))
            }
            LogRecord::AllocPage {
                txn_id,
                page_id,
                prev_lsn,
            } => LogRecord::UndoAllocPage {
                txn_id: *txn_id,
                page_id: *page_id,
                prev_lsn: last_lsn,
                undo_next_lsn: *prev_lsn,
            },
            LogRecord::FreePage {
                txn_id,
                page_id,
                prev_lsn,
            } => LogRecord::UndoFreePage {
                txn_id: *txn_id,
                page_id: *page_id,
                prev_lsn: last_lsn,
                undo_next_lsn: *prev_lsn,
            },
            LogRecord::AllocPart {
                txn_id,
                part_id,
                prev_lsn,
            } => LogRecord::UndoAllocPart {
                txn_id: *txn_id,
                part_id: *part_id,
                prev_lsn: last_lsn,
                undo_next_lsn: *prev_lsn,
            },
            LogRecord::FreePart {
                txn_id,
                part_id,
                prev_lsn,
            } => LogRecord::UndoFreePart {
                txn_id: *txn_id,
                part_id: *part_id,
                prev_lsn: last_lsn,
                undo_next_lsn: *prev_lsn,
            },
            _ => return Err(RecoveryError::NotUndoable(self.to_string())),
        };
        Ok((clr, true))
    }

    /// Reapplies the record's physical effect.
    ///
    /// Page updates are written through the buffer pool and stamp the page
    /// with `lsn`. Allocation effects go straight to disk and tolerate having
    /// already been applied.
    ///
    /// # Parameters
    /// - `lsn`: LSN of this record.
    /// - `disk_manager`: Disk holding allocation state.
    /// - `buffer_pool_manager`: Buffer pool holding page contents.
    pub fn redo(
        &self,
        lsn: Lsn,
        disk_manager: &DiskSpaceManager,
        buffer_pool_manager: &BufferPoolManager,
    ) -> Result<()> {
        trace!("Redoing LSN {}: {}", lsn, self);
        match self {
            LogRecord::UpdatePage {
                page_id,
                offset,
                after: Some(after),
                ..
            }
            | LogRecord::UndoUpdatePage {
                page_id,
                offset,
                after,
                ..
            } => {
                let page = buffer_pool_manager.fetch_page(*page_id)?;
                let mut page_data = page.write();
                page_data.write_bytes(*offset as usize, after)?;
                page_data.set_page_lsn(lsn);
                Ok(())
            }
            LogRecord::AllocPage { page_id, .. } | LogRecord::UndoFreePage { page_id, .. } => {
                match disk_manager.alloc_page(*page_id) {
                    Err(RecoveryError::PageAlreadyAllocated(_))
                    | Err(RecoveryError::PartitionNotAllocated(_)) => Ok(()),
                    other => other,
                }
            }
            LogRecord::FreePage { page_id, .. } | LogRecord::UndoAllocPage { page_id, .. } => {
                buffer_pool_manager.discard_page(*page_id);
                match disk_manager.free_page(*page_id) {
                    Err(RecoveryError::PageNotAllocated(_)) => Ok(()),
                    other => other,
                }
            }
            LogRecord::AllocPart { part_id, .. } | LogRecord::UndoFreePart { part_id, .. } => {
                match disk_manager.alloc_part(*part_id) {
                    Err(RecoveryError::PartitionAlreadyAllocated(_)) => Ok(()),
                    other => other,
                }
            }
            LogRecord::FreePart { part_id, .. } | LogRecord::UndoAllocPart { part_id, .. } => {
                buffer_pool_manager.discard_partition(*part_id);
                match disk_manager.free_part(*part_id) {
                    Err(RecoveryError::PartitionNotAllocated(_)) => Ok(()),
                    other => other,
                }
            }
            _ => Ok(()),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::encode_to_vec(self, storage_bincode_config())?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<LogRecord> {
        let (record, _) = bincode::decode_from_slice(bytes, storage_bincode_config())?;
        Ok(record)
    }

    /// Encoded size of an EndCheckpoint record with the given entry counts.
    ///
    /// # Parameters
    /// - `dpt_entries`: Dirty page table entries.
    /// - `txn_entries`: Transaction status/lastLSN entries.
    /// - `touched_txns`: Transactions with a touched-pages entry.
    /// - `touched_pages`: Total touched pages across those transactions.
    pub fn end_checkpoint_size(
        dpt_entries: usize,
        txn_entries: usize,
        touched_txns: usize,
        touched_pages: usize,
    ) -> usize {
        Self::TAG_SIZE
            + 3 * Self::LEN_SIZE
            + Self::DPT_ENTRY_SIZE * dpt_entries
            + Self::TXN_ENTRY_SIZE * txn_entries
            + Self::TOUCHED_TXN_SIZE * touched_txns
            + Self::TOUCHED_PAGE_SIZE * touched_pages
    }

    /// Returns `true` if an EndCheckpoint record with these entry counts fits
    /// in one record.
    pub fn fits_in_one_record(
        dpt_entries: usize,
        txn_entries: usize,
        touched_txns: usize,
        touched_pages: usize,
    ) -> bool {
        Self::end_checkpoint_size(dpt_entries, txn_entries, touched_txns, touched_pages)
            <= EFFECTIVE_PAGE_SIZE
    }
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogRecord::Master {
                last_checkpoint_lsn,
            } => write!(f, "Master(last_checkpoint_lsn={})", last_checkpoint_lsn),
            LogRecord::BeginCheckpoint { max_txn_num } => {
                write!(f, "BeginCheckpoint(max_txn_num={})", max_txn_num)
            }
            LogRecord::EndCheckpoint {
                dirty_page_table,
                transaction_table,
                touched_pages,
            } => write!(
                f,
                "EndCheckpoint(dpt={}, txns={}, touched={})",
                dirty_page_table.len(),
                transaction_table.len(),
                touched_pages.len()
            ),
            LogRecord::UpdatePage {
                txn_id,
                page_id,
                prev_lsn,
                offset,
                before,
                after,
            } => write!(
                f,
                "UpdatePage(txn={}, page={}, prev={}, offset={}, before={:?}, after={:?})",
                txn_id,
                page_id,
                prev_lsn,
                offset,
                before.as_ref().map(Vec::len),
                after.as_ref().map(Vec::len)
            ),
            other => {
                write!(f, "{:?}(txn={:?}", other.get_log_record_type(), other.get_txn_id())?;
                if let Some(page_id) = other.get_page_id() {
                    write!(f, ", page={}", page_id)?;
                } else if let Some(part_id) = other.get_part_id() {
                    write!(f, ", part={}", part_id)?;
                }
                if let Some(prev_lsn) = other.get_prev_lsn() {
                    write!(f, ", prev={}", prev_lsn)?;
                }
                if let Some(undo_next_lsn) = other.get_undo_next_lsn() {
                    write!(f, ", undo_next={}", undo_next_lsn)?;
                }
                write!(f, ")")
            }
        }
    }
}
