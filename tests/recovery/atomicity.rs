use crate::assert_ok;
use crate::common::logger::init_test_logger;
use crate::common::tempdb::{db_with_pages, test_db_config};
use ferrite_aries::common::config::EFFECTIVE_PAGE_SIZE;
use ferrite_aries::common::db_instance::DBInstance;
use ferrite_aries::recovery::log_record::{LogRecord, LogRecordType};

#[test]
fn aborted_write_is_rolled_back_in_place() {
    init_test_logger();
    let (db, _, pages) = db_with_pages(test_db_config(true), 1);

    let txn = db.begin_transaction();
    db.write(&txn, pages[0], 0, &[1, 1]).unwrap();
    db.abort(&txn).unwrap();

    let reader = db.begin_transaction();
    assert_eq!(db.read(&reader, pages[0], 0, 2).unwrap(), vec![0, 0]);
}

#[test]
fn uncommitted_write_is_rolled_back_after_crash() {
    init_test_logger();
    let (db, _, pages) = db_with_pages(test_db_config(false), 1);

    let txn = db.begin_transaction();
    db.write(&txn, pages[0], 0, &[1, 1]).unwrap();
    // The page reaches disk, so its log record must be durable too.
    db.flush_page(pages[0]).unwrap();
    let disk = db.crash();
    assert_eq!(disk.page_lsn_on_disk(pages[0]).map(|lsn| lsn > 0).ok(), Some(true));

    let (db, pending) = assert_ok!(DBInstance::open(test_db_config(false), disk));
    assert_ok!(pending.run());

    let reader = db.begin_transaction();
    assert_eq!(db.read(&reader, pages[0], 0, 2).unwrap(), vec![0, 0]);
}

#[test]
fn split_write_rolls_back_completely() {
    init_test_logger();
    let (db, _, pages) = db_with_pages(test_db_config(false), 1);
    let len = EFFECTIVE_PAGE_SIZE / 2;

    let committed = db.begin_transaction();
    let redo_lsn = db.write(&committed, pages[0], 0, &vec![3u8; len]).unwrap();
    db.commit(&committed).unwrap();
    match db.get_log_manager().fetch_log_record(redo_lsn).unwrap() {
        LogRecord::UpdatePage {
            prev_lsn,
            before: None,
            after: Some(after),
            ..
        } => {
            assert_eq!(prev_lsn, redo_lsn - 1);
            assert_eq!(after.len(), len);
        }
        other => panic!("expected a redo-only record, got {}", other),
    }

    let loser = db.begin_transaction();
    db.write(&loser, pages[0], 0, &vec![8u8; len]).unwrap();
    db.get_log_manager().flush_all().unwrap();
    let disk = db.crash();

    let (db, pending) = DBInstance::open(test_db_config(false), disk).unwrap();
    pending.run().unwrap();
    let reader = db.begin_transaction();
    assert_eq!(db.read(&reader, pages[0], 0, len).unwrap(), vec![3u8; len]);
}

#[test]
fn rollback_writes_one_clr_per_undoable_record() {
    init_test_logger();
    let (db, _, pages) = db_with_pages(test_db_config(false), 2);

    let txn = db.begin_transaction();
    db.write(&txn, pages[0], 0, &[1]).unwrap();
    db.write(&txn, pages[1], 0, &[2]).unwrap();
    db.write(&txn, pages[0], 1, &[3]).unwrap();
    let start = db.get_log_manager().get_next_lsn();
    db.abort(&txn).unwrap();

    let kinds: Vec<LogRecordType> = db
        .get_log_manager()
        .scan_from(start)
        .map(|(_, record)| record.get_log_record_type())
        .collect();
    assert_eq!(
        kinds,
        vec![
            LogRecordType::AbortTransaction,
            LogRecordType::UndoUpdatePage,
            LogRecordType::UndoUpdatePage,
            LogRecordType::UndoUpdatePage,
            LogRecordType::EndTransaction,
        ]
    );
}

#[test]
fn freed_page_comes_back_when_free_is_undone() {
    init_test_logger();
    let (db, _, pages) = db_with_pages(test_db_config(false), 1);

    let writer = db.begin_transaction();
    db.write(&writer, pages[0], 0, &[6]).unwrap();
    db.commit(&writer).unwrap();
    db.flush_all_pages().unwrap();

    let txn = db.begin_transaction();
    db.free_page(&txn, pages[0]).unwrap();
    assert!(!db.get_disk_manager().is_page_allocated(pages[0]));
    let disk = db.crash();

    let (db, pending) = DBInstance::open(test_db_config(false), disk).unwrap();
    pending.run().unwrap();
    assert!(db.get_disk_manager().is_page_allocated(pages[0]));
}
