use crate::common::logger::init_test_logger;
use crate::common::tempdb::{db_with_pages, test_db_config};
use ferrite_aries::common::db_instance::DBInstance;
use ferrite_aries::concurrency::lock_manager::{LockMode, ResourceName};
use ferrite_aries::concurrency::transaction::TransactionStatus;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
fn new_writer_waits_for_undo_of_locked_page() {
    init_test_logger();
    let (db, _, pages) = db_with_pages(test_db_config(true), 2);
    let (pending_page, free_page) = (pages[0], pages[1]);

    let loser = db.begin_transaction();
    let loser_id = loser.get_transaction_id();
    db.write(&loser, pending_page, 0, &[7, 7]).unwrap();
    db.get_log_manager().flush_all().unwrap();
    let disk = db.crash();

    let (db, pending) = DBInstance::open(test_db_config(true), disk).unwrap();
    let db = Arc::new(db);
    assert_eq!(
        db.get_lock_manager()
            .get_lock_mode(loser_id, &ResourceName::Page(pending_page)),
        Some(LockMode::Exclusive)
    );

    // Pages untouched by the crashed transaction are available right away.
    let early = db.begin_transaction();
    db.write(&early, free_page, 0, &[1]).unwrap();
    db.commit(&early).unwrap();

    let written = Arc::new(AtomicBool::new(false));
    let writer = {
        let db = Arc::clone(&db);
        let written = Arc::clone(&written);
        thread::spawn(move || {
            let txn = db.begin_transaction();
            db.write(&txn, pending_page, 1, &[5]).unwrap();
            written.store(true, Ordering::SeqCst);
            db.commit(&txn).unwrap();
        })
    };

    thread::sleep(Duration::from_millis(100));
    assert!(!written.load(Ordering::SeqCst));

    pending.spawn().join().unwrap().unwrap();
    writer.join().unwrap();
    assert!(written.load(Ordering::SeqCst));

    let reader = db.begin_transaction();
    assert_eq!(db.read(&reader, pending_page, 0, 2).unwrap(), vec![0, 5]);
    assert_eq!(db.read(&reader, free_page, 0, 1).unwrap(), vec![1]);
}

#[test]
fn restart_reacquires_locks_for_recovering_transactions() {
    init_test_logger();
    let (db, part_id, pages) = db_with_pages(test_db_config(false), 1);

    let loser = db.begin_transaction();
    let loser_id = loser.get_transaction_id();
    db.write(&loser, pages[0], 0, &[1]).unwrap();
    db.get_log_manager().flush_all().unwrap();
    let disk = db.crash();

    let (db, pending) = DBInstance::open(test_db_config(false), disk).unwrap();
    let requests = db.get_lock_manager().get_lock_requests();
    let page = ResourceName::Page(pages[0]);
    assert!(requests.contains(&format!("request {} IX(database)", loser_id)));
    assert!(requests.contains(&format!("request {} IX(database/{})", loser_id, part_id)));
    assert!(requests.contains(&format!("request {} X({})", loser_id, page)));

    let recovering = db
        .get_recovery_manager()
        .get_transaction_table()
        .get_transaction(loser_id)
        .unwrap();
    assert_eq!(recovering.get_status(), TransactionStatus::RecoveryAborting);

    pending.run().unwrap();
    assert_eq!(recovering.get_status(), TransactionStatus::Complete);
    assert!(db.get_lock_manager().get_locks_held(loser_id).is_empty());
}
