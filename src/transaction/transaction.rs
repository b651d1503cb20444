use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use parking_lot::{Mutex, MutexGuard};
use thiserror::Error;

use crate::common::types::{Rid, TableOid, TxnId};
use crate::transaction::lock_manager::LockManager;

/// Transaction isolation levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
}

/// Two-phase-locking transaction states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

/// Why the lock manager aborted a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    LockOnShrinking,
    LockSharedOnReadUncommitted,
    IncompatibleUpgrade,
    UpgradeConflict,
    TableUnlockedBeforeUnlockingRows,
    AttemptedUnlockButNoLockHeld,
    AttemptedIntentionLockOnRow,
    TableLockNotPresent,
    Deadlock,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            AbortReason::LockOnShrinking => "lock requested in the shrinking phase",
            AbortReason::LockSharedOnReadUncommitted => {
                "shared lock requested under READ_UNCOMMITTED"
            }
            AbortReason::IncompatibleUpgrade => "incompatible lock upgrade",
            AbortReason::UpgradeConflict => "another upgrade is already pending",
            AbortReason::TableUnlockedBeforeUnlockingRows => {
                "table unlocked while row locks are still held"
            }
            AbortReason::AttemptedUnlockButNoLockHeld => "unlock without a held lock",
            AbortReason::AttemptedIntentionLockOnRow => "intention lock requested on a row",
            AbortReason::TableLockNotPresent => "row lock without the required table lock",
            AbortReason::Deadlock => "chosen as deadlock victim",
        };
        f.write_str(text)
    }
}

#[derive(Error, Debug)]
#[error("transaction {txn_id} aborted: {reason}")]
pub struct TransactionAbortError {
    pub txn_id: TxnId,
    pub reason: AbortReason,
}

/// Every lock a transaction currently holds, one set per mode and
/// granularity. Rows only ever take S or X; the intention modes exist at
/// table granularity alone.
#[derive(Default)]
pub(crate) struct LockSets {
    pub shared_tables: HashSet<TableOid>,
    pub exclusive_tables: HashSet<TableOid>,
    pub intention_shared_tables: HashSet<TableOid>,
    pub intention_exclusive_tables: HashSet<TableOid>,
    pub shared_intention_exclusive_tables: HashSet<TableOid>,
    pub shared_rows: HashMap<TableOid, HashSet<Rid>>,
    pub exclusive_rows: HashMap<TableOid, HashSet<Rid>>,
}

/// An active transaction as seen by the lock manager: identity, isolation
/// level, 2PL phase, and the lock bookkeeping.
pub struct Transaction {
    id: TxnId,
    isolation_level: IsolationLevel,
    state: Mutex<TransactionState>,
    locks: Mutex<LockSets>,
}

impl Transaction {
    pub fn new(id: TxnId, isolation_level: IsolationLevel) -> Self {
        Self {
            id,
            isolation_level,
            state: Mutex::new(TransactionState::Growing),
            locks: Mutex::new(LockSets::default()),
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    pub fn state(&self) -> TransactionState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: TransactionState) {
        *self.state.lock() = state;
    }

    pub(crate) fn locks(&self) -> MutexGuard<'_, LockSets> {
        self.locks.lock()
    }

    /// Whether the transaction holds any row lock on `oid`.
    pub fn holds_row_locks_on(&self, oid: TableOid) -> bool {
        let locks = self.locks.lock();
        locks.shared_rows.get(&oid).is_some_and(|s| !s.is_empty())
            || locks.exclusive_rows.get(&oid).is_some_and(|s| !s.is_empty())
    }
}

/// Hands out transactions with monotonically increasing ids and drives the
/// commit/abort paths, releasing all locks through the lock manager.
pub struct TransactionManager {
    next_txn_id: AtomicU32,
    lock_manager: Arc<LockManager>,
    active_transactions: Mutex<HashMap<TxnId, Arc<Transaction>>>,
}

impl TransactionManager {
    pub fn new(lock_manager: Arc<LockManager>) -> Self {
        Self {
            next_txn_id: AtomicU32::new(1),
            lock_manager,
            active_transactions: Mutex::new(HashMap::new()),
        }
    }

    pub fn begin(&self, isolation_level: IsolationLevel) -> Arc<Transaction> {
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let txn = Arc::new(Transaction::new(txn_id, isolation_level));
        self.active_transactions.lock().insert(txn_id, txn.clone());
        txn
    }

    pub fn commit(&self, txn: &Arc<Transaction>) {
        self.lock_manager.release_all(txn);
        txn.set_state(TransactionState::Committed);
        self.active_transactions.lock().remove(&txn.id());
    }

    pub fn abort(&self, txn: &Arc<Transaction>) {
        self.lock_manager.release_all(txn);
        txn.set_state(TransactionState::Aborted);
        self.active_transactions.lock().remove(&txn.id());
    }

    pub fn get_transaction(&self, txn_id: TxnId) -> Option<Arc<Transaction>> {
        self.active_transactions.lock().get(&txn_id).cloned()
    }
}
