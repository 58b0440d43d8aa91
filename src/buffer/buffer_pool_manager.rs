use crate::common::config::{
    part_num, FrameId, Lsn, PageId, PartId, DB_PAGE_SIZE, EFFECTIVE_PAGE_SIZE, PAGE_RESERVED_SIZE,
};
use crate::common::exception::{RecoveryError, Result};
use crate::storage::disk::disk_space_manager::DiskSpaceManager;
use log::{debug, info, trace, warn};
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};

/// Callbacks the buffer pool makes around every page write-back.
pub trait PageFlushHooks: Send + Sync {
    /// Called before a page is written to disk. Must not return until the log
    /// is durable through `page_lsn`.
    fn page_flush_hook(&self, page_lsn: Lsn) -> Result<()>;

    /// Called after a page write has completed.
    fn disk_io_hook(&self, page_id: PageId);
}

/// In-memory contents of a buffered page.
#[derive(Debug)]
pub struct PageData {
    data: Box<[u8; DB_PAGE_SIZE]>,
    is_dirty: bool,
}

impl PageData {
    /// Returns the LSN of the last change applied to the page.
    pub fn get_page_lsn(&self) -> Lsn {
        let mut lsn = [0u8; 8];
        lsn.copy_from_slice(&self.data[..8]);
        Lsn::from_le_bytes(lsn)
    }

    pub fn set_page_lsn(&mut self, lsn: Lsn) {
        self.data[..8].copy_from_slice(&lsn.to_le_bytes());
        self.is_dirty = true;
    }

    /// Reads `len` bytes at `offset` within the usable area of the page.
    ///
    /// # Parameters
    /// - `offset`: Offset from the start of the usable area.
    /// - `len`: Number of bytes to read.
    ///
    /// # Returns
    /// The bytes, or an error if the range leaves the usable area.
    pub fn read_bytes(&self, offset: usize, len: usize) -> Result<Vec<u8>> {
        let start = Self::checked_range(offset, len)?;
        Ok(self.data[start..start + len].to_vec())
    }

    /// Overwrites bytes at `offset` within the usable area and marks the page dirty.
    pub fn write_bytes(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        let start = Self::checked_range(offset, bytes.len())?;
        self.data[start..start + bytes.len()].copy_from_slice(bytes);
        self.is_dirty = true;
        Ok(())
    }

    fn checked_range(offset: usize, len: usize) -> Result<usize> {
        match offset.checked_add(len) {
            Some(end) if end <= EFFECTIVE_PAGE_SIZE => Ok(PAGE_RESERVED_SIZE + offset),
            _ => Err(RecoveryError::InvalidByteRange {
                offset,
                len,
                capacity: EFFECTIVE_PAGE_SIZE,
            }),
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.is_dirty
    }

    pub fn get_data(&self) -> &[u8; DB_PAGE_SIZE] {
        &self.data
    }
}

/// A page resident in the buffer pool, latched by an internal `RwLock`.
#[derive(Debug)]
pub struct Page {
    page_id: PageId,
    inner: RwLock<PageData>,
}

impl Page {
    fn new(page_id: PageId, data: Box<[u8; DB_PAGE_SIZE]>) -> Self {
        Self {
            page_id,
            inner: RwLock::new(PageData {
                data,
                is_dirty: false,
            }),
        }
    }

    pub fn get_page_id(&self) -> PageId {
        self.page_id
    }

    pub fn get_page_lsn(&self) -> Lsn {
        self.inner.read().get_page_lsn()
    }

    pub fn read(&self) -> RwLockReadGuard<'_, PageData> {
        self.inner.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, PageData> {
        self.inner.write()
    }
}

struct Frames {
    pages: Vec<Option<Arc<Page>>>,
    page_table: HashMap<PageId, FrameId>,
    free_list: Vec<FrameId>,
    fifo: VecDeque<FrameId>,
}

/// The `BufferPoolManager` caches disk pages in a fixed number of frames.
///
/// A page is pinned for as long as a caller holds its `Arc`; only unpinned
/// pages are evicted, oldest load first. Every write-back of a dirty page is
/// bracketed by the registered `PageFlushHooks`.
pub struct BufferPoolManager {
    pool_size: usize,
    disk_manager: Arc<DiskSpaceManager>,
    frames: Mutex<Frames>,
    hooks: RwLock<Option<Weak<dyn PageFlushHooks>>>,
}

impl BufferPoolManager {
    /// Creates a new `BufferPoolManager`.
    ///
    /// # Parameters
    /// - `pool_size`: The number of frames in the buffer pool.
    /// - `disk_manager`: The disk that pages are read from and written to.
    ///
    /// # Returns
    /// A new `BufferPoolManager` instance.
    pub fn new(pool_size: usize, disk_manager: Arc<DiskSpaceManager>) -> Self {
        info!("BufferPoolManager initialized with pool size: {}", pool_size);
        Self {
            pool_size,
            disk_manager,
            frames: Mutex::new(Frames {
                pages: vec![None; pool_size],
                page_table: HashMap::new(),
                free_list: (0..pool_size).rev().collect(),
                fifo: VecDeque::new(),
            }),
            hooks: RwLock::new(None),
        }
    }

    pub fn get_pool_size(&self) -> usize {
        self.pool_size
    }

    /// Registers the callbacks made around page write-backs.
    pub fn set_flush_hooks(&self, hooks: Weak<dyn PageFlushHooks>) {
        *self.hooks.write() = Some(hooks);
    }

    fn get_hooks(&self) -> Option<Arc<dyn PageFlushHooks>> {
        self.hooks.read().as_ref().and_then(Weak::upgrade)
    }

    /// Fetches a page, loading it from disk if it is not resident.
    ///
    /// # Parameters
    /// - `page_id`: The page to fetch.
    ///
    /// # Returns
    /// The pinned page, or an error if the page is not allocated or no frame
    /// could be freed.
    pub fn fetch_page(&self, page_id: PageId) -> Result<Arc<Page>> {
        let mut frames = self.frames.lock();

        if let Some(&frame_id) = frames.page_table.get(&page_id) {
            if let Some(page) = frames.pages[frame_id].as_ref() {
                trace!("Page {} found in frame {}", page_id, frame_id);
                return Ok(Arc::clone(page));
            }
        }

        let mut data = Box::new([0u8; DB_PAGE_SIZE]);
        self.disk_manager.read_page(page_id, &mut data)?;

        let frame_id = match frames.free_list.pop() {
            Some(frame_id) => frame_id,
            None => self.evict(&mut frames)?,
        };

        let page = Arc::new(Page::new(page_id, data));
        frames.pages[frame_id] = Some(Arc::clone(&page));
        frames.page_table.insert(page_id, frame_id);
        frames.fifo.push_back(frame_id);
        debug!("Loaded page {} from disk into frame {}", page_id, frame_id);

        Ok(page)
    }

    fn evict(&self, frames: &mut Frames) -> Result<FrameId> {
        let position = frames
            .fifo
            .iter()
            .position(|&frame_id| {
                frames.pages[frame_id]
                    .as_ref()
                    .is_some_and(|page| Arc::strong_count(page) == 1)
            })
            .ok_or_else(|| {
                warn!("No evictable frame among {} pages", self.pool_size);
                RecoveryError::BufferPoolFull
            })?;
        let frame_id = frames.fifo[position];
        if let Some(page) = frames.pages[frame_id].as_ref() {
            self.write_back(page)?;
        }

        frames.fifo.remove(position);
        if let Some(page) = frames.pages[frame_id].take() {
            frames.page_table.remove(&page.get_page_id());
            debug!("Evicted page {} from frame {}", page.get_page_id(), frame_id);
        }
        Ok(frame_id)
    }

    fn write_back(&self, page: &Page) -> Result<()> {
        let mut page_data = page.write();
        if !page_data.is_dirty() {
            return Ok(());
        }

        let hooks = self.get_hooks();
        if let Some(hooks) = &hooks {
            hooks.page_flush_hook(page_data.get_page_lsn())?;
        }
        self.disk_manager
            .write_page(page.get_page_id(), page_data.get_data())?;
        page_data.is_dirty = false;
        if let Some(hooks) = &hooks {
            hooks.disk_io_hook(page.get_page_id());
        }
        debug!(
            "Flushed page {} with pageLSN {}",
            page.get_page_id(),
            page_data.get_page_lsn()
        );
        Ok(())
    }

    /// Writes a page back to disk if it is resident and dirty.
    pub fn flush_page(&self, page_id: PageId) -> Result<()> {
        let page = {
            let frames = self.frames.lock();
            frames
                .page_table
                .get(&page_id)
                .and_then(|&frame_id| frames.pages[frame_id].clone())
        };
        match page {
            Some(page) => self.write_back(&page),
            None => Ok(()),
        }
    }

    /// Writes every dirty resident page back to disk.
    pub fn flush_all_pages(&self) -> Result<()> {
        let pages: Vec<Arc<Page>> = {
            let frames = self.frames.lock();
            frames.pages.iter().flatten().cloned().collect()
        };
        for page in pages {
            self.write_back(&page)?;
        }
        Ok(())
    }

    /// Drops a page from the pool without writing it back.
    pub fn discard_page(&self, page_id: PageId) {
        let mut frames = self.frames.lock();
        if let Some(frame_id) = frames.page_table.remove(&page_id) {
            frames.pages[frame_id] = None;
            frames.fifo.retain(|&f| f != frame_id);
            frames.free_list.push(frame_id);
            debug!("Discarded page {} from frame {}", page_id, frame_id);
        }
    }

    /// Drops every resident page of a partition without writing them back.
    pub fn discard_partition(&self, part_id: PartId) {
        let page_ids: Vec<PageId> = {
            let frames = self.frames.lock();
            frames
                .page_table
                .keys()
                .copied()
                .filter(|&page_id| part_num(page_id) == part_id)
                .collect()
        };
        for page_id in page_ids {
            self.discard_page(page_id);
        }
    }

    /// Returns `true` if the page currently occupies a frame.
    pub fn is_resident(&self, page_id: PageId) -> bool {
        self.frames.lock().page_table.contains_key(&page_id)
    }

    /// Returns `true` if the page is resident and holds changes not yet on disk.
    pub fn is_page_dirty(&self, page_id: PageId) -> bool {
        let page = {
            let frames = self.frames.lock();
            frames
                .page_table
                .get(&page_id)
                .and_then(|&frame_id| frames.pages[frame_id].clone())
        };
        page.is_some_and(|page| page.read().is_dirty())
    }
}
