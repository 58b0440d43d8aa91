use crate::buffer::buffer_pool_manager::BufferPoolManager;
use crate::common::config::{Lsn, PageId, PartId, BUFFER_POOL_SIZE};
use crate::common::exception::Result;
use crate::concurrency::lock_manager::{LockManager, LockMode, ResourceName};
use crate::concurrency::transaction::Transaction;
use crate::concurrency::transaction_manager::TransactionManager;
use crate::recovery::log_manager::LogManager;
use crate::recovery::log_recovery::PendingUndo;
use crate::recovery::recovery_manager::RecoveryManager;
use crate::storage::disk::disk_space_manager::DiskSpaceManager;
use log::{debug, info, warn};
use std::sync::Arc;

/// Configuration options for a DB instance
#[derive(Debug, Clone)]
pub struct DBConfig {
    pub buffer_pool_size: usize,
    /// When disabled, lock requests are granted at once and recorded as
    /// strings by the lock manager.
    pub enable_locking: bool,
}

impl Default for DBConfig {
    fn default() -> Self {
        DBConfig {
            buffer_pool_size: BUFFER_POOL_SIZE,
            enable_locking: true,
        }
    }
}

/// A database: disk, log, buffer pool, locks and transactions, with every
/// change routed through the recovery manager.
pub struct DBInstance {
    config: DBConfig,
    disk_manager: Arc<DiskSpaceManager>,
    log_manager: Arc<LogManager>,
    buffer_pool_manager: Arc<BufferPoolManager>,
    lock_manager: Arc<LockManager>,
    transaction_manager: Arc<TransactionManager>,
    recovery_manager: Arc<RecoveryManager>,
}

impl DBInstance {
    /// Creates a new, empty database.
    pub fn create(config: DBConfig) -> Result<Self> {
        let db = Self::build(config, Arc::new(DiskSpaceManager::new()))?;
        db.recovery_manager.initialize()?;
        info!("Created new database");
        Ok(db)
    }

    /// Opens the database stored on `disk_manager` and runs analysis and redo.
    ///
    /// # Parameters
    /// - `config`: Instance configuration.
    /// - `disk_manager`: Disk left behind by a previous instance.
    ///
    /// # Returns
    /// The instance, ready for new transactions, and the undo phase of
    /// recovery, which the caller must run or spawn.
    pub fn open(
        config: DBConfig,
        disk_manager: Arc<DiskSpaceManager>,
    ) -> Result<(Self, PendingUndo)> {
        let db = Self::build(config, disk_manager)?;
        let pending = db.recovery_manager.restart()?;
        info!("Opened database");
        Ok((db, pending))
    }

    fn build(config: DBConfig, disk_manager: Arc<DiskSpaceManager>) -> Result<Self> {
        let log_manager = Arc::new(LogManager::open(Arc::clone(&disk_manager))?);
        let buffer_pool_manager = Arc::new(BufferPoolManager::new(
            config.buffer_pool_size,
            Arc::clone(&disk_manager),
        ));
        let lock_manager = Arc::new(if config.enable_locking {
            LockManager::new()
        } else {
            LockManager::new_disabled()
        });
        let transaction_manager = Arc::new(TransactionManager::new(Arc::clone(&lock_manager)));
        let recovery_manager = RecoveryManager::new(
            Arc::clone(&log_manager),
            Arc::clone(&buffer_pool_manager),
            Arc::clone(&disk_manager),
            Arc::clone(&transaction_manager),
        );

        Ok(Self {
            config,
            disk_manager,
            log_manager,
            buffer_pool_manager,
            lock_manager,
            transaction_manager,
            recovery_manager,
        })
    }

    pub fn begin_transaction(&self) -> Arc<Transaction> {
        let txn = self.transaction_manager.begin();
        self.recovery_manager.start_transaction(Arc::clone(&txn));
        txn
    }

    fn lock(&self, txn: &Transaction, resource: ResourceName, lock_mode: LockMode) -> Result<()> {
        self.lock_manager
            .ensure_sufficient_lock_held(txn, resource, lock_mode)?;
        Ok(())
    }

    /// Allocates a new partition on behalf of `txn`.
    ///
    /// The allocator picks the number, so the partition exists on disk before
    /// it is locked and logged. It is freed again if either step fails.
    pub fn alloc_part(&self, txn: &Transaction) -> Result<PartId> {
        let part_id = self.disk_manager.alloc_next_part();
        let logged = self
            .lock(txn, ResourceName::Partition(part_id), LockMode::Exclusive)
            .and_then(|()| {
                self.recovery_manager
                    .log_alloc_part(txn.get_transaction_id(), part_id)
            });
        if let Err(e) = logged {
            warn!("Releasing unlogged partition {}: {}", part_id, e);
            self.disk_manager.free_part(part_id)?;
            return Err(e);
        }
        debug!(
            "Txn {} allocated partition {}",
            txn.get_transaction_id(),
            part_id
        );
        Ok(part_id)
    }

    /// Frees a partition and every page in it.
    pub fn free_part(&self, txn: &Transaction, part_id: PartId) -> Result<()> {
        self.lock(txn, ResourceName::Partition(part_id), LockMode::Exclusive)?;
        self.recovery_manager
            .log_free_part(txn.get_transaction_id(), part_id)?;
        self.buffer_pool_manager.discard_partition(part_id);
        self.disk_manager.free_part(part_id)
    }

    /// Allocates a new page in `part_id`. Like `alloc_part`, the page is
    /// freed again if it cannot be locked and logged.
    pub fn alloc_page(&self, txn: &Transaction, part_id: PartId) -> Result<PageId> {
        let page_id = self.disk_manager.alloc_next_page(part_id)?;
        let logged = self
            .lock(txn, ResourceName::Page(page_id), LockMode::Exclusive)
            .and_then(|()| {
                self.recovery_manager
                    .log_alloc_page(txn.get_transaction_id(), page_id)
            });
        if let Err(e) = logged {
            warn!("Releasing unlogged page {}: {}", page_id, e);
            self.disk_manager.free_page(page_id)?;
            return Err(e);
        }
        debug!("Txn {} allocated page {}", txn.get_transaction_id(), page_id);
        Ok(page_id)
    }

    pub fn free_page(&self, txn: &Transaction, page_id: PageId) -> Result<()> {
        self.lock(txn, ResourceName::Page(page_id), LockMode::Exclusive)?;
        self.recovery_manager
            .log_free_page(txn.get_transaction_id(), page_id)?;
        self.buffer_pool_manager.discard_page(page_id);
        self.disk_manager.free_page(page_id)
    }

    /// Writes `bytes` at `offset` within a page's usable area.
    ///
    /// The change is logged before it is applied, while the page is latched.
    ///
    /// # Returns
    /// The LSN of the log record describing the write.
    pub fn write(
        &self,
        txn: &Transaction,
        page_id: PageId,
        offset: u16,
        bytes: &[u8],
    ) -> Result<Lsn> {
        self.lock(txn, ResourceName::Page(page_id), LockMode::Exclusive)?;
        let page = self.buffer_pool_manager.fetch_page(page_id)?;
        let mut page_data = page.write();
        let before = page_data.read_bytes(offset as usize, bytes.len())?;
        let lsn = self.recovery_manager.log_page_write(
            txn.get_transaction_id(),
            page_id,
            offset,
            &before,
            bytes,
        )?;
        page_data.write_bytes(offset as usize, bytes)?;
        page_data.set_page_lsn(lsn);
        Ok(lsn)
    }

    pub fn read(
        &self,
        txn: &Transaction,
        page_id: PageId,
        offset: usize,
        len: usize,
    ) -> Result<Vec<u8>> {
        self.lock(txn, ResourceName::Page(page_id), LockMode::Shared)?;
        let page = self.buffer_pool_manager.fetch_page(page_id)?;
        let page_data = page.read();
        page_data.read_bytes(offset, len)
    }

    /// Commits and ends `txn`.
    pub fn commit(&self, txn: &Transaction) -> Result<()> {
        let txn_id = txn.get_transaction_id();
        self.recovery_manager.commit(txn_id)?;
        self.recovery_manager.end(txn_id)?;
        Ok(())
    }

    /// Aborts `txn`, rolling back all of its changes.
    pub fn abort(&self, txn: &Transaction) -> Result<()> {
        let txn_id = txn.get_transaction_id();
        self.recovery_manager.abort(txn_id)?;
        self.recovery_manager.end(txn_id)?;
        Ok(())
    }

    pub fn savepoint(&self, txn: &Transaction, name: &str) -> Result<()> {
        self.recovery_manager
            .savepoint(txn.get_transaction_id(), name)
    }

    pub fn release_savepoint(&self, txn: &Transaction, name: &str) -> Result<()> {
        self.recovery_manager
            .release_savepoint(txn.get_transaction_id(), name)
    }

    pub fn rollback_to_savepoint(&self, txn: &Transaction, name: &str) -> Result<()> {
        self.recovery_manager
            .rollback_to_savepoint(txn.get_transaction_id(), name)
    }

    pub fn checkpoint(&self) -> Result<Lsn> {
        self.recovery_manager.checkpoint()
    }

    pub fn flush_page(&self, page_id: PageId) -> Result<()> {
        self.buffer_pool_manager.flush_page(page_id)
    }

    pub fn flush_all_pages(&self) -> Result<()> {
        self.buffer_pool_manager.flush_all_pages()
    }

    /// Stops the instance without flushing anything. Only what already
    /// reached the disk survives.
    pub fn crash(self) -> Arc<DiskSpaceManager> {
        info!("Simulating crash");
        self.disk_manager
    }

    /// Flushes every page, takes a final checkpoint and shuts down.
    pub fn close(self) -> Result<Arc<DiskSpaceManager>> {
        self.buffer_pool_manager.flush_all_pages()?;
        self.recovery_manager.close()?;
        info!("Closed database");
        Ok(self.disk_manager)
    }

    pub fn get_config(&self) -> &DBConfig {
        &self.config
    }

    pub fn get_disk_manager(&self) -> &Arc<DiskSpaceManager> {
        &self.disk_manager
    }

    pub fn get_log_manager(&self) -> &Arc<LogManager> {
        &self.log_manager
    }

    pub fn get_buffer_pool_manager(&self) -> &Arc<BufferPoolManager> {
        &self.buffer_pool_manager
    }

    pub fn get_lock_manager(&self) -> &Arc<LockManager> {
        &self.lock_manager
    }

    pub fn get_transaction_manager(&self) -> &Arc<TransactionManager> {
        &self.transaction_manager
    }

    pub fn get_recovery_manager(&self) -> &Arc<RecoveryManager> {
        &self.recovery_manager
    }
}
