use crate::common::logger::init_test_logger;
use crate::common::tempdb::db_with_pages;
use ferrite_aries::common::config::MASTER_RECORD_LSN;
use ferrite_aries::common::db_instance::{DBConfig, DBInstance};
use ferrite_aries::recovery::log_record::{LogRecord, LogRecordType};

fn large_pool_config() -> DBConfig {
    DBConfig {
        buffer_pool_size: 512,
        enable_locking: false,
    }
}

#[test]
fn large_checkpoint_spans_several_records_and_recovers() {
    init_test_logger();
    let (db, _, pages) = db_with_pages(large_pool_config(), 300);

    let winner = db.begin_transaction();
    for (index, &page_id) in pages.iter().enumerate() {
        db.write(&winner, page_id, 0, &(index as u32).to_le_bytes())
            .unwrap();
    }
    db.commit(&winner).unwrap();

    let loser = db.begin_transaction();
    for &page_id in pages.iter().take(20) {
        db.write(&loser, page_id, 8, &[0xff; 4]).unwrap();
    }

    let begin_lsn = db.checkpoint().unwrap();
    assert_eq!(
        db.get_log_manager()
            .fetch_log_record(MASTER_RECORD_LSN)
            .unwrap(),
        LogRecord::Master {
            last_checkpoint_lsn: begin_lsn
        }
    );
    let end_records: Vec<LogRecord> = db
        .get_log_manager()
        .scan_from(begin_lsn + 1)
        .map(|(_, record)| record)
        .take_while(|record| record.get_log_record_type() == LogRecordType::EndCheckpoint)
        .collect();
    assert_eq!(end_records.len(), 2);
    let dirty_pages: usize = end_records
        .iter()
        .map(|record| match record {
            LogRecord::EndCheckpoint {
                dirty_page_table, ..
            } => dirty_page_table.len(),
            _ => 0,
        })
        .sum();
    assert_eq!(dirty_pages, pages.len());

    let disk = db.crash();
    let (db, pending) = DBInstance::open(large_pool_config(), disk).unwrap();
    pending.run().unwrap();

    let reader = db.begin_transaction();
    for (index, &page_id) in pages.iter().enumerate() {
        assert_eq!(
            db.read(&reader, page_id, 0, 12).unwrap(),
            [(index as u32).to_le_bytes(), [0; 4], [0; 4]].concat()
        );
    }
}

#[test]
fn analysis_starts_from_latest_checkpoint() {
    init_test_logger();
    let (db, _, pages) = db_with_pages(large_pool_config(), 1);

    let txn = db.begin_transaction();
    db.write(&txn, pages[0], 0, &[1]).unwrap();
    db.commit(&txn).unwrap();
    db.flush_all_pages().unwrap();
    let begin_lsn = db.checkpoint().unwrap();
    let disk = db.crash();

    let (db, pending) = DBInstance::open(large_pool_config(), disk).unwrap();
    let recovery_manager = db.get_recovery_manager();
    assert!(recovery_manager.get_dirty_page_table().is_empty());
    assert!(recovery_manager.get_transaction_table().is_empty());
    pending.run().unwrap();

    let master = db
        .get_log_manager()
        .fetch_log_record(MASTER_RECORD_LSN)
        .unwrap();
    match master {
        LogRecord::Master {
            last_checkpoint_lsn,
        } => assert!(last_checkpoint_lsn > begin_lsn),
        other => panic!("unexpected master record {}", other),
    }
}
