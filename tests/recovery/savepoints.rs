use crate::common::logger::init_test_logger;
use crate::common::tempdb::{db_with_pages, test_db_config};
use ferrite_aries::common::db_instance::DBInstance;
use ferrite_aries::common::exception::RecoveryError;

#[test]
fn rollback_to_savepoint_then_commit() {
    init_test_logger();
    let (db, _, pages) = db_with_pages(test_db_config(true), 2);

    let txn = db.begin_transaction();
    db.write(&txn, pages[0], 0, &[1]).unwrap();
    db.savepoint(&txn, "before_second").unwrap();
    db.write(&txn, pages[0], 1, &[2]).unwrap();
    db.write(&txn, pages[1], 0, &[3]).unwrap();
    db.rollback_to_savepoint(&txn, "before_second").unwrap();
    db.write(&txn, pages[1], 1, &[4]).unwrap();
    db.commit(&txn).unwrap();

    let disk = db.crash();
    let (db, pending) = DBInstance::open(test_db_config(true), disk).unwrap();
    pending.run().unwrap();

    let reader = db.begin_transaction();
    assert_eq!(db.read(&reader, pages[0], 0, 2).unwrap(), vec![1, 0]);
    assert_eq!(db.read(&reader, pages[1], 0, 2).unwrap(), vec![0, 4]);
}

#[test]
fn abort_after_partial_rollback_undoes_everything_once() {
    init_test_logger();
    let (db, _, pages) = db_with_pages(test_db_config(false), 1);

    let txn = db.begin_transaction();
    db.savepoint(&txn, "start").unwrap();
    db.write(&txn, pages[0], 0, &[1]).unwrap();
    db.savepoint(&txn, "middle").unwrap();
    db.write(&txn, pages[0], 0, &[2]).unwrap();
    db.rollback_to_savepoint(&txn, "middle").unwrap();

    let reader_view = db.get_buffer_pool_manager().fetch_page(pages[0]).unwrap();
    assert_eq!(reader_view.read().read_bytes(0, 1).unwrap(), vec![1]);
    drop(reader_view);

    db.abort(&txn).unwrap();
    let reader = db.begin_transaction();
    assert_eq!(db.read(&reader, pages[0], 0, 1).unwrap(), vec![0]);
}

#[test]
fn released_savepoint_cannot_be_used() {
    init_test_logger();
    let (db, _, _) = db_with_pages(test_db_config(false), 1);

    let txn = db.begin_transaction();
    db.savepoint(&txn, "sp").unwrap();
    db.release_savepoint(&txn, "sp").unwrap();
    assert!(matches!(
        db.rollback_to_savepoint(&txn, "sp"),
        Err(RecoveryError::SavepointNotFound { .. })
    ));
    assert!(matches!(
        db.release_savepoint(&txn, "sp"),
        Err(RecoveryError::SavepointNotFound { .. })
    ));
}
