use ferrite_aries::common::config::{PageId, PartId};
use ferrite_aries::common::db_instance::{DBConfig, DBInstance};

pub fn test_db_config(enable_locking: bool) -> DBConfig {
    DBConfig {
        buffer_pool_size: 32,
        enable_locking,
    }
}

/// A fresh database with one partition of `pages` zeroed pages, committed.
pub fn db_with_pages(config: DBConfig, pages: usize) -> (DBInstance, PartId, Vec<PageId>) {
    let db = DBInstance::create(config).unwrap();
    let txn = db.begin_transaction();
    let part_id = db.alloc_part(&txn).unwrap();
    let page_ids = (0..pages)
        .map(|_| db.alloc_page(&txn, part_id).unwrap())
        .collect();
    db.commit(&txn).unwrap();
    (db, part_id, page_ids)
}
