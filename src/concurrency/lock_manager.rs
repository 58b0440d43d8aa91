use crate::common::config::{part_num, PageId, PartId, TxnId};
use crate::common::exception::LockError;
use crate::concurrency::lock_manager::LockMode::{
    Exclusive, IntentionExclusive, IntentionShared, Shared, SharedIntentionExclusive,
};
use crate::concurrency::transaction::{Transaction, TransactionStatus};
use log::{debug, trace};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::fmt;

/// [LOCK_NOTE]
///
/// # Hierarchy
/// Resources form a three level tree: the database, its partitions, and the
/// pages inside each partition. Before a page lock is granted the requesting
/// transaction must hold an intention lock on the partition and on the
/// database; `ensure_sufficient_lock_held` acquires those top-down.
///
/// # Blocking
/// Lock acquisition blocks on a condition variable until no other
/// transaction holds an incompatible mode on the resource. Releasing locks
/// wakes every waiter so it can re-check compatibility.
///
/// # Upgrades
/// Requesting a mode on a resource that is already locked keeps the held
/// lock when it substitutes for the request, and otherwise upgrades:
/// - IS -> [S, X, IX, SIX]
/// - S -> [X, SIX]
/// - IX -> [X, SIX]
/// - SIX -> [X]
///
/// S combined with IX (in either order) becomes SIX.
///
/// # Disabled mode
/// A disabled lock manager grants every request immediately and records
/// each new grant as `request <txn> <mode>(<resource>)` so tests can assert
/// on the lock traffic produced by recovery.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LockMode {
    Shared,
    Exclusive,
    IntentionShared,
    IntentionExclusive,
    SharedIntentionExclusive,
}

impl LockMode {
    /// Returns the intention mode an ancestor must hold for this mode.
    pub fn parent_mode(self) -> LockMode {
        match self {
            Shared | IntentionShared => IntentionShared,
            Exclusive | IntentionExclusive | SharedIntentionExclusive => IntentionExclusive,
        }
    }

    /// Returns `true` if holding `self` already grants everything `requested` would.
    pub fn substitutes(self, requested: LockMode) -> bool {
        match (self, requested) {
            (Exclusive, _) => true,
            (SharedIntentionExclusive, Exclusive) => false,
            (SharedIntentionExclusive, _) => true,
            (Shared, Shared) | (Shared, IntentionShared) => true,
            (IntentionExclusive, IntentionExclusive) | (IntentionExclusive, IntentionShared) => {
                true
            }
            (IntentionShared, IntentionShared) => true,
            _ => false,
        }
    }

    /// Mode that results from upgrading a held `self` to cover `requested`.
    fn upgrade_to(self, requested: LockMode) -> LockMode {
        match (self, requested) {
            (Shared, IntentionExclusive) | (IntentionExclusive, Shared) => {
                SharedIntentionExclusive
            }
            _ => requested,
        }
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Shared => "S",
            Exclusive => "X",
            IntentionShared => "IS",
            IntentionExclusive => "IX",
            SharedIntentionExclusive => "SIX",
        };
        write!(f, "{}", name)
    }
}

/// A lockable resource in the database → partition → page hierarchy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceName {
    Database,
    Partition(PartId),
    Page(PageId),
}

impl ResourceName {
    pub fn parent(&self) -> Option<ResourceName> {
        match self {
            ResourceName::Database => None,
            ResourceName::Partition(_) => Some(ResourceName::Database),
            ResourceName::Page(page_id) => Some(ResourceName::Partition(part_num(*page_id))),
        }
    }

    /// Returns the path from the database down to this resource.
    pub fn lineage(&self) -> Vec<ResourceName> {
        let mut path = vec![*self];
        let mut current = *self;
        while let Some(parent) = current.parent() {
            path.push(parent);
            current = parent;
        }
        path.reverse();
        path
    }
}

impl fmt::Display for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceName::Database => write!(f, "database"),
            ResourceName::Partition(part_id) => write!(f, "database/{}", part_id),
            ResourceName::Page(page_id) => {
                write!(f, "database/{}/{}", part_num(*page_id), page_id)
            }
        }
    }
}

/// LockManager grants hierarchical locks to transactions.
#[derive(Debug)]
pub struct LockManager {
    enabled: bool,
    lock_table: Mutex<HashMap<ResourceName, HashMap<TxnId, LockMode>>>,
    cv: Condvar,
    lock_requests: Mutex<Vec<String>>,
}

impl LockManager {
    /// Creates a lock manager that blocks on conflicting requests.
    pub fn new() -> Self {
        Self::with_enabled(true)
    }

    /// Creates a lock manager that grants everything and records requests.
    pub fn new_disabled() -> Self {
        Self::with_enabled(false)
    }

    fn with_enabled(enabled: bool) -> Self {
        Self {
            enabled,
            lock_table: Mutex::new(HashMap::new()),
            cv: Condvar::new(),
            lock_requests: Mutex::new(Vec::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Checks if two locks are compatible.
    ///
    /// # Parameters
    /// - `l1`: The first lock mode.
    /// - `l2`: The second lock mode.
    ///
    /// # Returns
    /// `true` if the locks can be held by two transactions at once.
    pub fn are_locks_compatible(&self, l1: LockMode, l2: LockMode) -> bool {
        match (l1, l2) {
            // IS is compatible with everything except X
            (IntentionShared, Exclusive) | (Exclusive, IntentionShared) => false,
            (IntentionShared, _) | (_, IntentionShared) => true,

            // IX is compatible with IX only among the rest
            (IntentionExclusive, IntentionExclusive) => true,

            // S is compatible with S only among the rest
            (Shared, Shared) => true,

            // SIX and X are compatible with nothing but IS
            _ => false,
        }
    }

    /// Makes sure `txn` holds at least `lock_mode` on `resource`, acquiring
    /// intention locks on every ancestor first.
    ///
    /// # Parameters
    /// - `txn`: The transaction requesting the lock.
    /// - `resource`: The resource to lock.
    /// - `lock_mode`: The least mode the transaction must end up holding.
    ///
    /// # Returns
    /// An error if the transaction has already completed.
    pub fn ensure_sufficient_lock_held(
        &self,
        txn: &Transaction,
        resource: ResourceName,
        lock_mode: LockMode,
    ) -> Result<(), LockError> {
        let txn_id = txn.get_transaction_id();
        if txn.get_status() == TransactionStatus::Complete {
            return Err(LockError::TransactionFinished(txn_id));
        }

        for ancestor in resource.lineage() {
            let mode = if ancestor == resource {
                lock_mode
            } else {
                lock_mode.parent_mode()
            };
            self.lock(txn_id, ancestor, mode, self.enabled);
        }
        Ok(())
    }

    /// Grants `lock_mode` on `resource` and its intention locks without
    /// waiting on other holders.
    ///
    /// Used by restart recovery, where every holder is a transaction rebuilt
    /// from the log and their remaining undo work never overlaps.
    pub fn reacquire_lock(
        &self,
        txn: &Transaction,
        resource: ResourceName,
        lock_mode: LockMode,
    ) -> Result<(), LockError> {
        let txn_id = txn.get_transaction_id();
        if txn.get_status() == TransactionStatus::Complete {
            return Err(LockError::TransactionFinished(txn_id));
        }
        for ancestor in resource.lineage() {
            let mode = if ancestor == resource {
                lock_mode
            } else {
                lock_mode.parent_mode()
            };
            self.lock(txn_id, ancestor, mode, false);
        }
        Ok(())
    }

    fn lock(&self, txn_id: TxnId, resource: ResourceName, requested: LockMode, wait: bool) {
        let mut lock_table = self.lock_table.lock();

        let held = lock_table
            .get(&resource)
            .and_then(|holders| holders.get(&txn_id))
            .copied();
        let target = match held {
            Some(held) if held.substitutes(requested) => {
                trace!(
                    "Txn {} already holds {} on {}, covering {}",
                    txn_id,
                    held,
                    resource,
                    requested
                );
                return;
            }
            Some(held) => held.upgrade_to(requested),
            None => requested,
        };

        if wait {
            self.cv.wait_while(&mut lock_table, |lock_table| {
                lock_table.get(&resource).is_some_and(|holders| {
                    holders.iter().any(|(&holder, &mode)| {
                        holder != txn_id && !self.are_locks_compatible(mode, target)
                    })
                })
            });
        }
        if !self.enabled {
            self.lock_requests
                .lock()
                .push(format!("request {} {}({})", txn_id, target, resource));
        }

        lock_table.entry(resource).or_default().insert(txn_id, target);
        debug!("Granted {} on {} to txn {}", target, resource, txn_id);
    }

    /// Releases every lock held by a transaction and wakes all waiters.
    pub fn release_all(&self, txn_id: TxnId) {
        let mut lock_table = self.lock_table.lock();
        let mut released = 0;
        lock_table.retain(|_, holders| {
            if holders.remove(&txn_id).is_some() {
                released += 1;
            }
            !holders.is_empty()
        });
        drop(lock_table);

        if released > 0 {
            debug!("Released {} locks held by txn {}", released, txn_id);
        }
        self.cv.notify_all();
    }

    /// Returns the mode `txn_id` holds on `resource`, if any.
    pub fn get_lock_mode(&self, txn_id: TxnId, resource: &ResourceName) -> Option<LockMode> {
        self.lock_table
            .lock()
            .get(resource)
            .and_then(|holders| holders.get(&txn_id))
            .copied()
    }

    /// Returns every lock held by `txn_id`, ordered by resource.
    pub fn get_locks_held(&self, txn_id: TxnId) -> Vec<(ResourceName, LockMode)> {
        let mut locks: Vec<_> = self
            .lock_table
            .lock()
            .iter()
            .filter_map(|(resource, holders)| holders.get(&txn_id).map(|mode| (*resource, *mode)))
            .collect();
        locks.sort_by_key(|(resource, _)| *resource);
        locks
    }

    /// Returns the requests recorded while disabled, oldest first.
    pub fn get_lock_requests(&self) -> Vec<String> {
        self.lock_requests.lock().clone()
    }

    pub fn clear_lock_requests(&self) {
        self.lock_requests.lock().clear();
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}
