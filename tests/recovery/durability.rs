use crate::assert_ok;
use crate::common::logger::init_test_logger;
use crate::common::tempdb::{db_with_pages, test_db_config};
use ferrite_aries::common::db_instance::DBInstance;
use ferrite_aries::concurrency::transaction::TransactionStatus;

#[test]
fn committed_writes_survive_crash_without_page_flush() {
    init_test_logger();
    let (db, _, pages) = db_with_pages(test_db_config(false), 3);

    for (index, &page_id) in pages.iter().enumerate() {
        let txn = db.begin_transaction();
        db.write(&txn, page_id, 4, &[index as u8 + 1; 4]).unwrap();
        db.commit(&txn).unwrap();
    }
    let writes_before_crash = db.get_disk_manager().get_page_write_count();
    let disk = db.crash();
    assert_eq!(disk.get_page_write_count(), writes_before_crash);

    let (db, pending) = assert_ok!(DBInstance::open(test_db_config(false), disk));
    pending.run().unwrap();

    let reader = db.begin_transaction();
    for (index, &page_id) in pages.iter().enumerate() {
        assert_eq!(
            db.read(&reader, page_id, 4, 4).unwrap(),
            vec![index as u8 + 1; 4]
        );
    }
}

#[test]
fn commit_is_durable_before_it_returns() {
    init_test_logger();
    let (db, _, pages) = db_with_pages(test_db_config(false), 1);

    let txn = db.begin_transaction();
    db.write(&txn, pages[0], 0, &[1]).unwrap();
    let commit_lsn = db
        .get_recovery_manager()
        .commit(txn.get_transaction_id())
        .unwrap();
    assert_eq!(txn.get_status(), TransactionStatus::Committing);
    assert!(db.get_log_manager().get_flushed_lsn() >= Some(commit_lsn));
    assert!(db.get_disk_manager().last_durable_lsn() >= commit_lsn);

    // Crash before the end record is written: restart still finishes the commit.
    let disk = db.crash();
    let (db, pending) = DBInstance::open(test_db_config(false), disk).unwrap();
    assert!(db.get_recovery_manager().get_transaction_table().is_empty());
    pending.run().unwrap();

    let reader = db.begin_transaction();
    assert_eq!(db.read(&reader, pages[0], 0, 1).unwrap(), vec![1]);
}

#[test]
fn recovery_survives_crash_during_recovery() {
    init_test_logger();
    let (db, _, pages) = db_with_pages(test_db_config(false), 2);

    let winner = db.begin_transaction();
    db.write(&winner, pages[0], 0, &[1, 2, 3]).unwrap();
    db.commit(&winner).unwrap();

    let loser = db.begin_transaction();
    db.write(&loser, pages[1], 0, &[9, 9, 9]).unwrap();
    db.write(&loser, pages[0], 3, &[9]).unwrap();
    db.get_log_manager().flush_all().unwrap();
    let disk = db.crash();

    // First restart stops before undo runs.
    let (db, pending) = DBInstance::open(test_db_config(false), disk).unwrap();
    drop(pending);
    let disk = db.crash();

    let (db, pending) = DBInstance::open(test_db_config(false), disk).unwrap();
    pending.run().unwrap();
    let disk = db.close().unwrap();

    let (db, pending) = DBInstance::open(test_db_config(false), disk).unwrap();
    assert!(db.get_recovery_manager().get_transaction_table().is_empty());
    pending.run().unwrap();

    let reader = db.begin_transaction();
    assert_eq!(db.read(&reader, pages[0], 0, 4).unwrap(), vec![1, 2, 3, 0]);
    assert_eq!(db.read(&reader, pages[1], 0, 3).unwrap(), vec![0, 0, 0]);
}

#[test]
fn transaction_numbers_are_not_reused_after_restart() {
    init_test_logger();
    let (db, _, pages) = db_with_pages(test_db_config(false), 1);
    let txn = db.begin_transaction();
    db.write(&txn, pages[0], 0, &[1]).unwrap();
    db.commit(&txn).unwrap();
    let last_txn_id = txn.get_transaction_id();
    let disk = db.crash();

    let (db, pending) = DBInstance::open(test_db_config(false), disk).unwrap();
    pending.run().unwrap();
    assert!(db.begin_transaction().get_transaction_id() > last_txn_id);
}

#[test]
fn redo_of_freed_partition_keeps_later_partitions() {
    init_test_logger();
    let (db, _, pages) = db_with_pages(test_db_config(false), 1);

    // An unflushed committed write keeps redo starting before the free.
    let early = db.begin_transaction();
    db.write(&early, pages[0], 0, &[1, 1]).unwrap();
    db.commit(&early).unwrap();

    let creator = db.begin_transaction();
    let freed_part = db.alloc_part(&creator).unwrap();
    db.commit(&creator).unwrap();
    let dropper = db.begin_transaction();
    db.free_part(&dropper, freed_part).unwrap();
    db.commit(&dropper).unwrap();

    let writer = db.begin_transaction();
    let part_id = db.alloc_part(&writer).unwrap();
    assert_ne!(part_id, freed_part);
    let page_id = db.alloc_page(&writer, part_id).unwrap();
    db.write(&writer, page_id, 0, &[9, 9]).unwrap();
    db.commit(&writer).unwrap();
    db.flush_page(page_id).unwrap();

    let disk = db.crash();
    let (db, pending) = DBInstance::open(test_db_config(false), disk).unwrap();
    pending.run().unwrap();

    let disk = db.get_disk_manager();
    assert!(!disk.is_partition_allocated(freed_part));
    assert!(disk.is_partition_allocated(part_id));
    assert!(disk.is_page_allocated(page_id));
    let reader = db.begin_transaction();
    assert_eq!(db.read(&reader, page_id, 0, 2).unwrap(), vec![9, 9]);
    assert_eq!(db.read(&reader, pages[0], 0, 2).unwrap(), vec![1, 1]);
}
