use bincode::config as bincode_config;

pub type FrameId = usize; // frame id type
pub type PageId = u64; // page id type
pub type PartId = u32; // partition id type
pub type TxnId = u64; // transaction id type
pub type Lsn = u64; // log sequence number type

pub const DB_PAGE_SIZE: usize = 4096; // size of a data page in bytes
pub const PAGE_RESERVED_SIZE: usize = 36; // page header; the first 8 bytes hold the pageLSN
pub const EFFECTIVE_PAGE_SIZE: usize = DB_PAGE_SIZE - PAGE_RESERVED_SIZE;

/// Number of page numbers reserved for each partition. A page number encodes its
/// partition as `page_id / PARTITION_PAGE_COUNT`.
pub const PARTITION_PAGE_COUNT: u64 = 10_000_000_000;

/// Partition holding the log. Operations on it are never logged.
pub const LOG_PARTITION: PartId = 0;

pub const MASTER_RECORD_LSN: Lsn = 0; // the master record always lives at LSN 0
pub const NO_LSN: Lsn = 0; // terminates every per-transaction prevLSN chain

pub const BUFFER_POOL_SIZE: usize = 64; // default number of frames
pub const TXN_START_ID: TxnId = 1; // first txn id

/// Returns the partition a page number belongs to.
pub fn part_num(page_id: PageId) -> PartId {
    (page_id / PARTITION_PAGE_COUNT) as PartId
}

/// Builds a page number from a partition and the page's index inside it.
pub fn page_id_of(part_id: PartId, page_index: u64) -> PageId {
    part_id as u64 * PARTITION_PAGE_COUNT + page_index
}

/// Bincode configuration for every log record that reaches the log partition.
///
/// Fixed-width integers keep record sizes predictable, which the checkpoint
/// packing relies on.
/// NOTE: Changing this is an on-disk format change.
#[inline]
pub(crate) fn storage_bincode_config() -> impl bincode_config::Config {
    bincode_config::standard()
        .with_little_endian()
        .with_fixed_int_encoding()
}
