use ferrite_aries::common::logger as core_logger;
use std::sync::Once;

static INIT: Once = Once::new();

pub fn init_test_logger() {
    INIT.call_once(|| {
        // RUST_LOG overrides the default INFO level
        core_logger::initialize_logger();
    });
}
