use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;
use log::{debug, warn};
use parking_lot::{Condvar, Mutex};

use crate::common::types::{Rid, TableOid, TxnId};
use crate::transaction::transaction::{
    AbortReason, IsolationLevel, Transaction, TransactionAbortError, TransactionState,
};

/// Multi-granularity lock modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    IntentionShared,
    IntentionExclusive,
    Shared,
    SharedIntentionExclusive,
    Exclusive,
}

impl LockMode {
    /// Standard compatibility matrix:
    ///
    /// ```text
    ///       IS   IX   S    SIX  X
    /// IS    y    y    y    y    n
    /// IX    y    y    n    n    n
    /// S     y    n    y    n    n
    /// SIX   y    n    n    n    n
    /// X     n    n    n    n    n
    /// ```
    pub fn compatible_with(self, other: LockMode) -> bool {
        use LockMode::*;
        match (self, other) {
            (IntentionShared, Exclusive) | (Exclusive, IntentionShared) => false,
            (IntentionShared, _) | (_, IntentionShared) => true,
            (IntentionExclusive, IntentionExclusive) => true,
            (Exclusive, _) | (_, Exclusive) => false,
            (IntentionExclusive, _) | (_, IntentionExclusive) => false,
            (Shared, Shared) => true,
            _ => false,
        }
    }

    /// Legal upgrade paths: IS -> {S, X, IX, SIX}, S -> {X, SIX},
    /// IX -> {X, SIX}, SIX -> X.
    fn upgrade_allowed(self, to: LockMode) -> bool {
        use LockMode::*;
        match self {
            IntentionShared => !matches!(to, IntentionShared),
            Shared | IntentionExclusive => matches!(to, Exclusive | SharedIntentionExclusive),
            SharedIntentionExclusive => matches!(to, Exclusive),
            Exclusive => false,
        }
    }
}

impl std::fmt::Display for LockMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            LockMode::IntentionShared => "IS",
            LockMode::IntentionExclusive => "IX",
            LockMode::Shared => "S",
            LockMode::SharedIntentionExclusive => "SIX",
            LockMode::Exclusive => "X",
        };
        f.write_str(text)
    }
}

struct LockRequest {
    txn_id: TxnId,
    mode: LockMode,
    granted: bool,
}

#[derive(Default)]
struct QueueState {
    requests: VecDeque<LockRequest>,
    /// The at-most-one transaction currently promoting its lock here.
    upgrading: Option<TxnId>,
}

#[derive(Default)]
struct LockRequestQueue {
    state: Mutex<QueueState>,
    cv: Condvar,
}

#[derive(Default)]
struct LockManagerInner {
    table_lock_map: Mutex<HashMap<TableOid, Arc<LockRequestQueue>>>,
    row_lock_map: Mutex<HashMap<(TableOid, Rid), Arc<LockRequestQueue>>>,
    /// Transactions seen by lock calls, so the deadlock detector can mark
    /// victims aborted.
    txns: Mutex<HashMap<TxnId, Weak<Transaction>>>,
}

/// Hierarchical two-phase-locking lock manager with FIFO grant order, one
/// upgrade lane per resource queue, and a background deadlock detector.
///
/// Lock acquisition order inside the manager is always map latch then queue
/// latch, and queue latches are never held across a condition-variable wait
/// of another queue.
pub struct LockManager {
    inner: Arc<LockManagerInner>,
    shutdown: Arc<(Mutex<bool>, Condvar)>,
    detector: Option<JoinHandle<()>>,
}

impl LockManager {
    /// Start the lock manager and its cycle-detection worker.
    pub fn new(cycle_detection_interval: Duration) -> Self {
        let inner = Arc::new(LockManagerInner::default());
        let shutdown = Arc::new((Mutex::new(false), Condvar::new()));

        let worker_inner = inner.clone();
        let worker_shutdown = shutdown.clone();
        let detector = std::thread::Builder::new()
            .name("deadlock-detector".to_string())
            .spawn(move || {
                loop {
                    {
                        let (stop, cv) = &*worker_shutdown;
                        let mut stop = stop.lock();
                        if !*stop {
                            cv.wait_for(&mut stop, cycle_detection_interval);
                        }
                        if *stop {
                            return;
                        }
                    }
                    worker_inner.detect_deadlocks();
                }
            })
            .expect("failed to spawn deadlock detector");

        Self {
            inner,
            shutdown,
            detector: Some(detector),
        }
    }

    // ------------------------------------------------------------------
    // Table locks
    // ------------------------------------------------------------------

    pub fn lock_table(
        &self,
        txn: &Arc<Transaction>,
        mode: LockMode,
        oid: TableOid,
    ) -> Result<(), TransactionAbortError> {
        self.inner.register_txn(txn);
        self.check_isolation_policy(txn, mode)?;

        let old_mode = Self::table_lock_mode(txn, oid);
        if let Some(old) = old_mode {
            if old == mode {
                return Ok(());
            }
            if !old.upgrade_allowed(mode) {
                return Err(Self::abort(txn, AbortReason::IncompatibleUpgrade));
            }
        }

        let queue = {
            let mut map = self.inner.table_lock_map.lock();
            map.entry(oid).or_default().clone()
        };

        self.wait_for_grant(txn, &queue, mode, old_mode, |txn, old| {
            Self::remove_table_lock(txn, old, oid)
        })?;

        Self::add_table_lock(txn, mode, oid);
        debug!("txn {} granted {} on table {}", txn.id(), mode, oid);
        Ok(())
    }

    pub fn unlock_table(
        &self,
        txn: &Arc<Transaction>,
        oid: TableOid,
    ) -> Result<(), TransactionAbortError> {
        if txn.holds_row_locks_on(oid) {
            return Err(Self::abort(
                txn,
                AbortReason::TableUnlockedBeforeUnlockingRows,
            ));
        }

        let mode = Self::table_lock_mode(txn, oid)
            .ok_or_else(|| Self::abort(txn, AbortReason::AttemptedUnlockButNoLockHeld))?;

        let queue = self.inner.table_lock_map.lock().get(&oid).cloned();
        let queue =
            queue.ok_or_else(|| Self::abort(txn, AbortReason::AttemptedUnlockButNoLockHeld))?;
        Self::remove_granted_request(txn, &queue)?;

        Self::remove_table_lock(txn, mode, oid);
        Self::transition_on_unlock(txn, mode);
        debug!("txn {} released {} on table {}", txn.id(), mode, oid);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Row locks
    // ------------------------------------------------------------------

    pub fn lock_row(
        &self,
        txn: &Arc<Transaction>,
        mode: LockMode,
        oid: TableOid,
        rid: Rid,
    ) -> Result<(), TransactionAbortError> {
        if !matches!(mode, LockMode::Shared | LockMode::Exclusive) {
            return Err(Self::abort(txn, AbortReason::AttemptedIntentionLockOnRow));
        }
        self.inner.register_txn(txn);
        self.check_isolation_policy(txn, mode)?;

        // Row locks presuppose the matching table intent.
        let table_mode = Self::table_lock_mode(txn, oid);
        let table_ok = match mode {
            LockMode::Exclusive => matches!(
                table_mode,
                Some(LockMode::Exclusive)
                    | Some(LockMode::IntentionExclusive)
                    | Some(LockMode::SharedIntentionExclusive)
            ),
            _ => table_mode.is_some(),
        };
        if !table_ok {
            return Err(Self::abort(txn, AbortReason::TableLockNotPresent));
        }

        let old_mode = Self::row_lock_mode(txn, oid, rid);
        if let Some(old) = old_mode {
            if old == mode {
                return Ok(());
            }
            if !old.upgrade_allowed(mode) {
                return Err(Self::abort(txn, AbortReason::IncompatibleUpgrade));
            }
        }

        let queue = {
            let mut map = self.inner.row_lock_map.lock();
            map.entry((oid, rid)).or_default().clone()
        };

        self.wait_for_grant(txn, &queue, mode, old_mode, |txn, old| {
            Self::remove_row_lock(txn, old, oid, rid)
        })?;

        Self::add_row_lock(txn, mode, oid, rid);
        debug!("txn {} granted {} on row {}/{}", txn.id(), mode, oid, rid);
        Ok(())
    }

    pub fn unlock_row(
        &self,
        txn: &Arc<Transaction>,
        oid: TableOid,
        rid: Rid,
    ) -> Result<(), TransactionAbortError> {
        let mode = Self::row_lock_mode(txn, oid, rid)
            .ok_or_else(|| Self::abort(txn, AbortReason::AttemptedUnlockButNoLockHeld))?;

        let queue = self.inner.row_lock_map.lock().get(&(oid, rid)).cloned();
        let queue =
            queue.ok_or_else(|| Self::abort(txn, AbortReason::AttemptedUnlockButNoLockHeld))?;
        Self::remove_granted_request(txn, &queue)?;

        Self::remove_row_lock(txn, mode, oid, rid);
        Self::transition_on_unlock(txn, mode);
        debug!("txn {} released {} on row {}/{}", txn.id(), mode, oid, rid);
        Ok(())
    }

    /// Release every lock the transaction still holds, in row-then-table
    /// order. Used by commit and abort; performs no 2PL transitions.
    pub fn release_all(&self, txn: &Arc<Transaction>) {
        let (rows, tables) = {
            let mut locks = txn.locks();
            let mut rows: Vec<(TableOid, Rid)> = Vec::new();
            for (oid, rids) in locks.shared_rows.drain() {
                rows.extend(rids.into_iter().map(|rid| (oid, rid)));
            }
            for (oid, rids) in locks.exclusive_rows.drain() {
                rows.extend(rids.into_iter().map(|rid| (oid, rid)));
            }
            let mut tables: Vec<TableOid> = Vec::new();
            tables.extend(locks.shared_tables.drain());
            tables.extend(locks.exclusive_tables.drain());
            tables.extend(locks.intention_shared_tables.drain());
            tables.extend(locks.intention_exclusive_tables.drain());
            tables.extend(locks.shared_intention_exclusive_tables.drain());
            (rows, tables)
        };

        for (oid, rid) in rows {
            if let Some(queue) = self.inner.row_lock_map.lock().get(&(oid, rid)).cloned() {
                Self::drop_requests_of(txn.id(), &queue);
            }
        }
        for oid in tables {
            if let Some(queue) = self.inner.table_lock_map.lock().get(&oid).cloned() {
                Self::drop_requests_of(txn.id(), &queue);
            }
        }
    }

    /// Current waits-for edges, deterministic order. Exposed for tests and
    /// debugging.
    pub fn waits_for_edges(&self) -> Vec<(TxnId, TxnId)> {
        self.inner
            .build_waits_for()
            .into_iter()
            .flat_map(|(from, tos)| tos.into_iter().map(move |to| (from, to)))
            .collect()
    }

    // ------------------------------------------------------------------
    // Grant machinery
    // ------------------------------------------------------------------

    /// Enqueue a request (repositioning it for an upgrade) and block until
    /// it is compatible with everything ahead of it, or the transaction is
    /// aborted under us.
    fn wait_for_grant(
        &self,
        txn: &Arc<Transaction>,
        queue: &Arc<LockRequestQueue>,
        mode: LockMode,
        old_mode: Option<LockMode>,
        remove_old_lock: impl FnOnce(&Transaction, LockMode),
    ) -> Result<(), TransactionAbortError> {
        let txn_id = txn.id();
        let mut state = queue.state.lock();

        if let Some(old) = old_mode {
            if state.upgrading.is_some() {
                drop(state);
                return Err(Self::abort(txn, AbortReason::UpgradeConflict));
            }
            state.upgrading = Some(txn_id);

            let pos = state
                .requests
                .iter()
                .position(|r| r.txn_id == txn_id && r.granted)
                .expect("upgrading transaction must hold a granted request");
            state.requests.remove(pos);
            remove_old_lock(txn, old);

            // The upgrade passes every waiter but no granted holder.
            let insert_at = state
                .requests
                .iter()
                .position(|r| !r.granted)
                .unwrap_or(state.requests.len());
            state.requests.insert(
                insert_at,
                LockRequest {
                    txn_id,
                    mode,
                    granted: false,
                },
            );
            queue.cv.notify_all();
        } else {
            state.requests.push_back(LockRequest {
                txn_id,
                mode,
                granted: false,
            });
        }

        loop {
            if txn.state() == TransactionState::Aborted {
                let pos = state
                    .requests
                    .iter()
                    .position(|r| r.txn_id == txn_id && !r.granted)
                    .expect("waiting request must still be queued");
                state.requests.remove(pos);
                if state.upgrading == Some(txn_id) {
                    state.upgrading = None;
                }
                queue.cv.notify_all();
                drop(state);
                return Err(TransactionAbortError {
                    txn_id,
                    reason: AbortReason::Deadlock,
                });
            }

            let pos = state
                .requests
                .iter()
                .position(|r| r.txn_id == txn_id)
                .expect("request must still be queued");
            let compatible = state.requests.iter().take(pos).all(|r| {
                r.mode.compatible_with(mode)
            });
            if compatible {
                state.requests[pos].granted = true;
                if state.upgrading == Some(txn_id) {
                    state.upgrading = None;
                }
                // A fresh grant may unblock compatible waiters behind us.
                queue.cv.notify_all();
                return Ok(());
            }

            queue.cv.wait(&mut state);
        }
    }

    fn remove_granted_request(
        txn: &Arc<Transaction>,
        queue: &Arc<LockRequestQueue>,
    ) -> Result<(), TransactionAbortError> {
        let mut state = queue.state.lock();
        let pos = state
            .requests
            .iter()
            .position(|r| r.txn_id == txn.id() && r.granted);
        match pos {
            Some(pos) => {
                state.requests.remove(pos);
                queue.cv.notify_all();
                Ok(())
            }
            None => Err(Self::abort(txn, AbortReason::AttemptedUnlockButNoLockHeld)),
        }
    }

    fn drop_requests_of(txn_id: TxnId, queue: &Arc<LockRequestQueue>) {
        let mut state = queue.state.lock();
        state.requests.retain(|r| r.txn_id != txn_id);
        if state.upgrading == Some(txn_id) {
            state.upgrading = None;
        }
        queue.cv.notify_all();
    }

    /// Isolation-level policing on every lock request.
    fn check_isolation_policy(
        &self,
        txn: &Arc<Transaction>,
        mode: LockMode,
    ) -> Result<(), TransactionAbortError> {
        let state = txn.state();
        match txn.isolation_level() {
            IsolationLevel::RepeatableRead => {
                if state == TransactionState::Shrinking {
                    return Err(Self::abort(txn, AbortReason::LockOnShrinking));
                }
            }
            IsolationLevel::ReadCommitted => {
                if state == TransactionState::Shrinking
                    && !matches!(mode, LockMode::IntentionShared | LockMode::Shared)
                {
                    return Err(Self::abort(txn, AbortReason::LockOnShrinking));
                }
            }
            IsolationLevel::ReadUncommitted => {
                if matches!(
                    mode,
                    LockMode::Shared
                        | LockMode::IntentionShared
                        | LockMode::SharedIntentionExclusive
                ) {
                    return Err(Self::abort(txn, AbortReason::LockSharedOnReadUncommitted));
                }
                if state == TransactionState::Shrinking {
                    return Err(Self::abort(txn, AbortReason::LockOnShrinking));
                }
            }
        }
        Ok(())
    }

    /// 2PL: the first qualifying unlock flips GROWING to SHRINKING. Under
    /// REPEATABLE_READ any unlock counts; READ_COMMITTED counts S and X;
    /// READ_UNCOMMITTED counts X.
    fn transition_on_unlock(txn: &Arc<Transaction>, mode: LockMode) {
        if txn.state() != TransactionState::Growing {
            return;
        }
        let shrink = match txn.isolation_level() {
            IsolationLevel::RepeatableRead => true,
            IsolationLevel::ReadCommitted => {
                matches!(mode, LockMode::Shared | LockMode::Exclusive)
            }
            IsolationLevel::ReadUncommitted => matches!(mode, LockMode::Exclusive),
        };
        if shrink {
            txn.set_state(TransactionState::Shrinking);
        }
    }

    fn abort(txn: &Arc<Transaction>, reason: AbortReason) -> TransactionAbortError {
        txn.set_state(TransactionState::Aborted);
        warn!("transaction {} aborted: {}", txn.id(), reason);
        TransactionAbortError {
            txn_id: txn.id(),
            reason,
        }
    }

    // ------------------------------------------------------------------
    // Lock-set bookkeeping
    // ------------------------------------------------------------------

    fn table_lock_mode(txn: &Arc<Transaction>, oid: TableOid) -> Option<LockMode> {
        let locks = txn.locks();
        if locks.shared_tables.contains(&oid) {
            Some(LockMode::Shared)
        } else if locks.exclusive_tables.contains(&oid) {
            Some(LockMode::Exclusive)
        } else if locks.intention_shared_tables.contains(&oid) {
            Some(LockMode::IntentionShared)
        } else if locks.intention_exclusive_tables.contains(&oid) {
            Some(LockMode::IntentionExclusive)
        } else if locks.shared_intention_exclusive_tables.contains(&oid) {
            Some(LockMode::SharedIntentionExclusive)
        } else {
            None
        }
    }

    fn row_lock_mode(txn: &Arc<Transaction>, oid: TableOid, rid: Rid) -> Option<LockMode> {
        let locks = txn.locks();
        if locks
            .shared_rows
            .get(&oid)
            .is_some_and(|s| s.contains(&rid))
        {
            Some(LockMode::Shared)
        } else if locks
            .exclusive_rows
            .get(&oid)
            .is_some_and(|s| s.contains(&rid))
        {
            Some(LockMode::Exclusive)
        } else {
            None
        }
    }

    fn add_table_lock(txn: &Arc<Transaction>, mode: LockMode, oid: TableOid) {
        let mut locks = txn.locks();
        match mode {
            LockMode::Shared => locks.shared_tables.insert(oid),
            LockMode::Exclusive => locks.exclusive_tables.insert(oid),
            LockMode::IntentionShared => locks.intention_shared_tables.insert(oid),
            LockMode::IntentionExclusive => locks.intention_exclusive_tables.insert(oid),
            LockMode::SharedIntentionExclusive => {
                locks.shared_intention_exclusive_tables.insert(oid)
            }
        };
    }

    fn remove_table_lock(txn: &Transaction, mode: LockMode, oid: TableOid) {
        let mut locks = txn.locks();
        match mode {
            LockMode::Shared => locks.shared_tables.remove(&oid),
            LockMode::Exclusive => locks.exclusive_tables.remove(&oid),
            LockMode::IntentionShared => locks.intention_shared_tables.remove(&oid),
            LockMode::IntentionExclusive => locks.intention_exclusive_tables.remove(&oid),
            LockMode::SharedIntentionExclusive => {
                locks.shared_intention_exclusive_tables.remove(&oid)
            }
        };
    }

    fn add_row_lock(txn: &Arc<Transaction>, mode: LockMode, oid: TableOid, rid: Rid) {
        let mut locks = txn.locks();
        match mode {
            LockMode::Shared => locks.shared_rows.entry(oid).or_default().insert(rid),
            LockMode::Exclusive => locks.exclusive_rows.entry(oid).or_default().insert(rid),
            _ => unreachable!("row locks are S or X only"),
        };
    }

    fn remove_row_lock(txn: &Transaction, mode: LockMode, oid: TableOid, rid: Rid) {
        let mut locks = txn.locks();
        match mode {
            LockMode::Shared => {
                if let Some(rids) = locks.shared_rows.get_mut(&oid) {
                    rids.remove(&rid);
                }
            }
            LockMode::Exclusive => {
                if let Some(rids) = locks.exclusive_rows.get_mut(&oid) {
                    rids.remove(&rid);
                }
            }
            _ => unreachable!("row locks are S or X only"),
        }
    }
}

impl Drop for LockManager {
    fn drop(&mut self) {
        {
            let (stop, cv) = &*self.shutdown;
            *stop.lock() = true;
            cv.notify_all();
        }
        if let Some(handle) = self.detector.take() {
            let _ = handle.join();
        }
    }
}

impl LockManagerInner {
    fn register_txn(&self, txn: &Arc<Transaction>) {
        let mut txns = self.txns.lock();
        txns.retain(|_, weak| weak.strong_count() > 0);
        txns.insert(txn.id(), Arc::downgrade(txn));
    }

    /// Edges from every waiting request to each granted request that blocks
    /// it, over all table and row queues.
    fn build_waits_for(&self) -> BTreeMap<TxnId, BTreeSet<TxnId>> {
        let queues: Vec<Arc<LockRequestQueue>> = {
            let tables = self.table_lock_map.lock();
            let rows = self.row_lock_map.lock();
            tables.values().chain(rows.values()).cloned().collect()
        };

        let mut graph: BTreeMap<TxnId, BTreeSet<TxnId>> = BTreeMap::new();
        for queue in &queues {
            let state = queue.state.lock();
            for waiter in state.requests.iter().filter(|r| !r.granted) {
                for holder in state.requests.iter().filter(|r| r.granted) {
                    if !holder.mode.compatible_with(waiter.mode) {
                        graph.entry(waiter.txn_id).or_default().insert(holder.txn_id);
                    }
                }
            }
        }
        graph
    }

    /// One detector pass: abort the youngest member of every cycle, then
    /// wake all waiters so victims notice.
    fn detect_deadlocks(&self) {
        let mut graph = self.build_waits_for();
        let mut victims: Vec<TxnId> = Vec::new();

        while let Some(cycle) = find_cycle(&graph) {
            let victim = *cycle.iter().max().expect("cycle cannot be empty");
            warn!("deadlock cycle {:?}, aborting transaction {}", cycle, victim);
            victims.push(victim);
            graph.remove(&victim);
            for targets in graph.values_mut() {
                targets.remove(&victim);
            }
        }

        if victims.is_empty() {
            return;
        }

        {
            let txns = self.txns.lock();
            for victim in &victims {
                if let Some(txn) = txns.get(victim).and_then(Weak::upgrade) {
                    txn.set_state(TransactionState::Aborted);
                }
            }
        }

        let queues: Vec<Arc<LockRequestQueue>> = {
            let tables = self.table_lock_map.lock();
            let rows = self.row_lock_map.lock();
            tables.values().chain(rows.values()).cloned().collect()
        };
        for queue in queues {
            queue.cv.notify_all();
        }
    }
}

/// Deterministic cycle search: DFS from the lowest transaction id, visiting
/// neighbors in ascending order. Returns the members of the first cycle
/// found.
fn find_cycle(graph: &BTreeMap<TxnId, BTreeSet<TxnId>>) -> Option<Vec<TxnId>> {
    let mut visited: BTreeSet<TxnId> = BTreeSet::new();

    for &start in graph.keys() {
        if visited.contains(&start) {
            continue;
        }
        let mut path: Vec<TxnId> = Vec::new();
        let mut on_path: BTreeSet<TxnId> = BTreeSet::new();
        if let Some(cycle) = dfs(start, graph, &mut path, &mut on_path, &mut visited) {
            return Some(cycle);
        }
    }
    None
}

fn dfs(
    node: TxnId,
    graph: &BTreeMap<TxnId, BTreeSet<TxnId>>,
    path: &mut Vec<TxnId>,
    on_path: &mut BTreeSet<TxnId>,
    visited: &mut BTreeSet<TxnId>,
) -> Option<Vec<TxnId>> {
    path.push(node);
    on_path.insert(node);

    if let Some(neighbors) = graph.get(&node) {
        for &next in neighbors {
            if on_path.contains(&next) {
                let pos = path
                    .iter()
                    .position(|&n| n == next)
                    .expect("cycle entry must be on the path");
                return Some(path[pos..].to_vec());
            }
            if !visited.contains(&next) {
                if let Some(cycle) = dfs(next, graph, path, on_path, visited) {
                    return Some(cycle);
                }
            }
        }
    }

    path.pop();
    on_path.remove(&node);
    visited.insert(node);
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compatibility_matrix() {
        use LockMode::*;
        let modes = [
            IntentionShared,
            IntentionExclusive,
            Shared,
            SharedIntentionExclusive,
            Exclusive,
        ];
        // Row-major truth table in the order above.
        let expected = [
            [true, true, true, true, false],
            [true, true, false, false, false],
            [true, false, true, false, false],
            [true, false, false, false, false],
            [false, false, false, false, false],
        ];
        for (i, &a) in modes.iter().enumerate() {
            for (j, &b) in modes.iter().enumerate() {
                assert_eq!(
                    a.compatible_with(b),
                    expected[i][j],
                    "{} vs {}",
                    a,
                    b
                );
            }
        }
    }

    #[test]
    fn test_upgrade_paths() {
        use LockMode::*;
        assert!(IntentionShared.upgrade_allowed(Shared));
        assert!(IntentionShared.upgrade_allowed(Exclusive));
        assert!(IntentionShared.upgrade_allowed(IntentionExclusive));
        assert!(IntentionShared.upgrade_allowed(SharedIntentionExclusive));
        assert!(Shared.upgrade_allowed(Exclusive));
        assert!(Shared.upgrade_allowed(SharedIntentionExclusive));
        assert!(!Shared.upgrade_allowed(IntentionExclusive));
        assert!(IntentionExclusive.upgrade_allowed(Exclusive));
        assert!(SharedIntentionExclusive.upgrade_allowed(Exclusive));
        assert!(!SharedIntentionExclusive.upgrade_allowed(Shared));
        assert!(!Exclusive.upgrade_allowed(Shared));
    }

    #[test]
    fn test_find_cycle_deterministic() {
        let mut graph: BTreeMap<TxnId, BTreeSet<TxnId>> = BTreeMap::new();
        graph.entry(1).or_default().insert(2);
        graph.entry(2).or_default().insert(1);
        graph.entry(3).or_default().insert(1);

        let cycle = find_cycle(&graph).unwrap();
        assert_eq!(cycle.len(), 2);
        assert!(cycle.contains(&1) && cycle.contains(&2));
        assert_eq!(*cycle.iter().max().unwrap(), 2);
    }

    #[test]
    fn test_find_cycle_none_in_dag() {
        let mut graph: BTreeMap<TxnId, BTreeSet<TxnId>> = BTreeMap::new();
        graph.entry(1).or_default().insert(2);
        graph.entry(2).or_default().insert(3);
        graph.entry(1).or_default().insert(3);
        assert!(find_cycle(&graph).is_none());
    }
}
