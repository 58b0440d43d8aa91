pub mod checkpoint_manager;
pub mod dirty_page_table;
pub mod log_iterator;
pub mod log_manager;
pub mod log_record;
pub mod log_recovery;
pub mod recovery_manager;
pub mod transaction_table;
