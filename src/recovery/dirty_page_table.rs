use crate::common::config::{Lsn, PageId};
use crate::recovery::log_record::DirtyPageSnapshot;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::trace;

/// Dirty page table: page number → recLSN, the LSN of the first record that
/// dirtied the page since it was last written to disk.
#[derive(Debug, Default)]
pub struct DirtyPageTable {
    entries: DashMap<PageId, Lsn>,
}

impl DirtyPageTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `rec_lsn` for the page unless it is already dirty.
    ///
    /// # Returns
    /// The recLSN in effect after the call.
    pub fn insert_if_absent(&self, page_id: PageId, rec_lsn: Lsn) -> Lsn {
        match self.entries.entry(page_id) {
            Entry::Occupied(entry) => *entry.get(),
            Entry::Vacant(entry) => {
                trace!("Page {} dirtied at LSN {}", page_id, rec_lsn);
                entry.insert(rec_lsn);
                rec_lsn
            }
        }
    }

    /// Sets the page's recLSN, replacing any earlier value.
    pub fn insert(&self, page_id: PageId, rec_lsn: Lsn) {
        self.entries.insert(page_id, rec_lsn);
    }

    pub fn remove(&self, page_id: PageId) -> Option<Lsn> {
        self.entries.remove(&page_id).map(|(_, rec_lsn)| rec_lsn)
    }

    pub fn get_rec_lsn(&self, page_id: PageId) -> Option<Lsn> {
        self.entries.get(&page_id).map(|entry| *entry)
    }

    pub fn contains(&self, page_id: PageId) -> bool {
        self.entries.contains_key(&page_id)
    }

    /// Returns the smallest recLSN in the table.
    pub fn min_rec_lsn(&self) -> Option<Lsn> {
        self.entries.iter().map(|entry| *entry.value()).min()
    }

    pub fn page_ids(&self) -> Vec<PageId> {
        self.entries.iter().map(|entry| *entry.key()).collect()
    }

    /// Copies the table, entry by entry.
    pub fn snapshot(&self) -> DirtyPageSnapshot {
        self.entries
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}
