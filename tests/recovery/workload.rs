use crate::common::logger::init_test_logger;
use crate::common::tempdb::db_with_pages;
use ferrite_aries::common::config::PageId;
use ferrite_aries::common::db_instance::{DBConfig, DBInstance};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const PAGES: usize = 8;
const TRACKED_BYTES: usize = 64;

/// Committed contents of the first `TRACKED_BYTES` of every page.
struct Model {
    pages: Vec<[u8; TRACKED_BYTES]>,
}

impl Model {
    fn new() -> Self {
        Self {
            pages: vec![[0; TRACKED_BYTES]; PAGES],
        }
    }

    fn apply(&mut self, writes: &[(usize, usize, Vec<u8>)]) {
        for (page, offset, bytes) in writes {
            self.pages[*page][*offset..*offset + bytes.len()].copy_from_slice(bytes);
        }
    }

    fn verify(&self, db: &DBInstance, page_ids: &[PageId]) {
        let reader = db.begin_transaction();
        for (index, &page_id) in page_ids.iter().enumerate() {
            assert_eq!(
                db.read(&reader, page_id, 0, TRACKED_BYTES).unwrap(),
                self.pages[index].to_vec(),
                "page {} differs from committed state",
                index
            );
        }
        db.commit(&reader).unwrap();
    }
}

fn config() -> DBConfig {
    // Small enough that pages are evicted and written back mid-transaction.
    DBConfig {
        buffer_pool_size: 4,
        enable_locking: false,
    }
}

fn random_writes(rng: &mut StdRng, page: Option<usize>) -> Vec<(usize, usize, Vec<u8>)> {
    (0..rng.gen_range(1..5))
        .map(|_| {
            let len = rng.gen_range(1..8);
            let offset = rng.gen_range(0..TRACKED_BYTES - len);
            let bytes = (0..len).map(|_| rng.gen()).collect();
            let page = page.unwrap_or_else(|| rng.gen_range(0..PAGES));
            (page, offset, bytes)
        })
        .collect()
}

fn run_workload(seed: u64) {
    init_test_logger();
    let mut rng = StdRng::seed_from_u64(seed);
    let mut model = Model::new();
    let (mut db, _, page_ids) = db_with_pages(config(), PAGES);

    for round in 0..3 {
        for _ in 0..30 {
            let txn = db.begin_transaction();
            let writes = random_writes(&mut rng, None);
            for (page, offset, bytes) in &writes {
                db.write(&txn, page_ids[*page], *offset as u16, bytes)
                    .unwrap();
            }
            if rng.gen_bool(0.7) {
                db.commit(&txn).unwrap();
                model.apply(&writes);
            } else {
                db.abort(&txn).unwrap();
            }
            if rng.gen_bool(0.1) {
                db.checkpoint().unwrap();
            }
        }

        // Leave one transaction per page in flight, each on its own page.
        for page in 0..PAGES {
            let txn = db.begin_transaction();
            for (page, offset, bytes) in random_writes(&mut rng, Some(page)) {
                db.write(&txn, page_ids[page], offset as u16, &bytes)
                    .unwrap();
            }
            if rng.gen_bool(0.5) {
                db.flush_page(page_ids[page]).unwrap();
            }
        }

        let disk = db.crash();
        let (reopened, pending) = DBInstance::open(config(), disk).unwrap();
        if round == 1 {
            // Crash again before undo has run.
            drop(pending);
            let disk = reopened.crash();
            let (again, pending) = DBInstance::open(config(), disk).unwrap();
            pending.run().unwrap();
            db = again;
        } else {
            pending.run().unwrap();
            db = reopened;
        }
        model.verify(&db, &page_ids);
    }
}

#[test]
fn random_workload_recovers_committed_state() {
    for seed in [1, 7, 42] {
        run_workload(seed);
    }
}
