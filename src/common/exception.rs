use thiserror::Error;

use crate::common::config::{Lsn, PageId, PartId, TxnId};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    #[error("Transaction {0} has finished and can no longer acquire locks")]
    TransactionFinished(TxnId),
}

/// Errors surfaced by forward processing, checkpointing and restart recovery.
#[derive(Error, Debug)]
pub enum RecoveryError {
    #[error("Transaction {0} not found in transaction table")]
    TransactionNotFound(TxnId),

    #[error("No log record at LSN {0}")]
    LogRecordNotFound(Lsn),

    #[error("Master record missing or malformed at LSN 0")]
    MasterRecordMissing,

    #[error("Before image ({before} bytes) and after image ({after} bytes) differ in length")]
    ImageLengthMismatch { before: usize, after: usize },

    #[error("Access of {len} bytes at offset {offset} exceeds page capacity {capacity}")]
    InvalidByteRange {
        offset: usize,
        len: usize,
        capacity: usize,
    },

    #[error("Page {0} is not allocated")]
    PageNotAllocated(PageId),

    #[error("Page {0} is already allocated")]
    PageAlreadyAllocated(PageId),

    #[error("Partition {0} is not allocated")]
    PartitionNotAllocated(PartId),

    #[error("Partition {0} is already allocated")]
    PartitionAlreadyAllocated(PartId),

    #[error("Savepoint '{name}' not found for transaction {txn_id}")]
    SavepointNotFound { txn_id: TxnId, name: String },

    #[error("Log record {0} cannot be undone")]
    NotUndoable(String),

    #[error("Buffer pool has no evictable frame")]
    BufferPoolFull,

    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    #[error("Failed to encode log record: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("Failed to decode log record: {0}")]
    Decode(#[from] bincode::error::DecodeError),
}

pub type Result<T> = std::result::Result<T, RecoveryError>;
