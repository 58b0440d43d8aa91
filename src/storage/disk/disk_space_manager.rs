use crate::common::config::{
    page_id_of, part_num, Lsn, PageId, PartId, DB_PAGE_SIZE, LOG_PARTITION, NO_LSN,
};
use crate::common::exception::{RecoveryError, Result};
use log::{debug, trace};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

type PageBytes = Box<[u8; DB_PAGE_SIZE]>;

/// DiskSpaceManager is the durable half of the engine, held in memory.
///
/// Everything stored here survives a simulated crash: the partition and page
/// allocation maps, the bytes of every written page and the flushed portion of
/// the log (kept in the reserved log partition, one encoded record per LSN).
/// Buffer frames and the unflushed log tail live elsewhere and are lost when
/// the owning instance is dropped.
///
/// Partition numbers are never handed out twice. Redo replays partition
/// records without a pageLSN check, so a freed number must not come back as
/// a new partition whose pages a replayed free would wipe.
#[derive(Debug)]
pub struct DiskSpaceManager {
    partitions: RwLock<BTreeSet<PartId>>,
    next_part: AtomicU32,
    pages: RwLock<HashMap<PageId, PageBytes>>,
    log: RwLock<Vec<Vec<u8>>>,
    page_writes: AtomicU64,
}

impl DiskSpaceManager {
    /// Creates an empty disk. Only the log partition exists.
    pub fn new() -> Self {
        let mut partitions = BTreeSet::new();
        partitions.insert(LOG_PARTITION);
        Self {
            partitions: RwLock::new(partitions),
            next_part: AtomicU32::new(LOG_PARTITION + 1),
            pages: RwLock::new(HashMap::new()),
            log: RwLock::new(Vec::new()),
            page_writes: AtomicU64::new(0),
        }
    }

    pub fn alloc_part(&self, part_id: PartId) -> Result<()> {
        let mut partitions = self.partitions.write();
        if !partitions.insert(part_id) {
            return Err(RecoveryError::PartitionAlreadyAllocated(part_id));
        }
        self.next_part
            .fetch_max(part_id.saturating_add(1), Ordering::SeqCst);
        debug!("Allocated partition {}", part_id);
        Ok(())
    }

    /// Frees a partition together with every page still allocated in it.
    pub fn free_part(&self, part_id: PartId) -> Result<()> {
        if part_id == LOG_PARTITION || !self.partitions.write().remove(&part_id) {
            return Err(RecoveryError::PartitionNotAllocated(part_id));
        }
        self.pages.write().retain(|&page_id, _| part_num(page_id) != part_id);
        debug!("Freed partition {}", part_id);
        Ok(())
    }

    pub fn alloc_page(&self, page_id: PageId) -> Result<()> {
        let part_id = part_num(page_id);
        if !self.is_partition_allocated(part_id) {
            return Err(RecoveryError::PartitionNotAllocated(part_id));
        }
        let mut pages = self.pages.write();
        if pages.contains_key(&page_id) {
            return Err(RecoveryError::PageAlreadyAllocated(page_id));
        }
        pages.insert(page_id, Box::new([0; DB_PAGE_SIZE]));
        debug!("Allocated page {}", page_id);
        Ok(())
    }

    pub fn free_page(&self, page_id: PageId) -> Result<()> {
        match self.pages.write().remove(&page_id) {
            Some(_) => {
                debug!("Freed page {}", page_id);
                Ok(())
            }
            None => Err(RecoveryError::PageNotAllocated(page_id)),
        }
    }

    pub fn is_partition_allocated(&self, part_id: PartId) -> bool {
        self.partitions.read().contains(&part_id)
    }

    pub fn is_page_allocated(&self, page_id: PageId) -> bool {
        self.pages.read().contains_key(&page_id)
    }

    /// Allocates a partition number above every number allocated so far,
    /// freed ones included.
    pub fn alloc_next_part(&self) -> PartId {
        let mut partitions = self.partitions.write();
        let part_id = self.next_part.fetch_add(1, Ordering::SeqCst);
        partitions.insert(part_id);
        debug!("Allocated partition {}", part_id);
        part_id
    }

    /// Allocates the first unused page number inside `part_id`.
    pub fn alloc_next_page(&self, part_id: PartId) -> Result<PageId> {
        if !self.is_partition_allocated(part_id) {
            return Err(RecoveryError::PartitionNotAllocated(part_id));
        }
        let mut pages = self.pages.write();
        let page_id = (0..)
            .map(|index| page_id_of(part_id, index))
            .find(|page_id| !pages.contains_key(page_id))
            .ok_or(RecoveryError::PartitionNotAllocated(part_id))?;
        pages.insert(page_id, Box::new([0; DB_PAGE_SIZE]));
        debug!("Allocated page {}", page_id);
        Ok(page_id)
    }

    pub fn read_page(&self, page_id: PageId, buf: &mut [u8; DB_PAGE_SIZE]) -> Result<()> {
        let pages = self.pages.read();
        let page = pages
            .get(&page_id)
            .ok_or(RecoveryError::PageNotAllocated(page_id))?;
        buf.copy_from_slice(&page[..]);
        trace!("Read page {}", page_id);
        Ok(())
    }

    pub fn write_page(&self, page_id: PageId, buf: &[u8; DB_PAGE_SIZE]) -> Result<()> {
        let mut pages = self.pages.write();
        let page = pages
            .get_mut(&page_id)
            .ok_or(RecoveryError::PageNotAllocated(page_id))?;
        page.copy_from_slice(buf);
        self.page_writes.fetch_add(1, Ordering::Relaxed);
        trace!("Wrote page {}", page_id);
        Ok(())
    }

    /// Returns the pageLSN stamped on the durable copy of a page.
    pub fn page_lsn_on_disk(&self, page_id: PageId) -> Result<Lsn> {
        let pages = self.pages.read();
        let page = pages
            .get(&page_id)
            .ok_or(RecoveryError::PageNotAllocated(page_id))?;
        let mut lsn = [0u8; 8];
        lsn.copy_from_slice(&page[..8]);
        Ok(Lsn::from_le_bytes(lsn))
    }

    pub fn get_page_write_count(&self) -> u64 {
        self.page_writes.load(Ordering::Relaxed)
    }

    /// Writes an encoded log record into the log partition at its LSN slot.
    pub fn write_log_record(&self, lsn: Lsn, bytes: Vec<u8>) {
        let mut log = self.log.write();
        let slot = lsn as usize;
        if slot < log.len() {
            log[slot] = bytes;
        } else {
            debug_assert_eq!(slot, log.len(), "log records must be written contiguously");
            log.push(bytes);
        }
    }

    /// Returns every durable encoded log record, indexed by LSN.
    pub fn read_log(&self) -> Vec<Vec<u8>> {
        self.log.read().clone()
    }

    /// LSN of the last durable log record, or `NO_LSN` for an empty log.
    pub fn last_durable_lsn(&self) -> Lsn {
        let len = self.log.read().len() as Lsn;
        len.checked_sub(1).unwrap_or(NO_LSN)
    }
}

impl Default for DiskSpaceManager {
    fn default() -> Self {
        Self::new()
    }
}
