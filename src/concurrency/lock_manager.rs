use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use super::transaction::{
    AbortReason, IsolationLevel, Transaction, TransactionAbortError, TransactionState,
};
use crate::common::config::TxnId;
use crate::common::rid::Rid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// One transaction's standing in a lock queue.
struct LockRequest {
    txn: Arc<Transaction>,
    mode: LockMode,
    granted: bool,
}

/// FIFO-by-arrival queue of requests for one row, with the condition
/// variable its waiters sleep on.
#[derive(Default)]
struct LockRequestQueue {
    requests: Mutex<VecDeque<LockRequest>>,
    cv: Condvar,
}

/// `Ok(true)`: lock granted. `Ok(false)`: the call failed because the
/// transaction is (or just became) aborted, typically wounded by an older
/// transaction. `Err(_)`: the call itself aborted the transaction.
pub type LockResult = Result<bool, TransactionAbortError>;

/// Row-level lock manager implementing shared/exclusive locks, lock
/// upgrade, two-phase locking and Wound-Wait deadlock prevention.
///
/// Wound-Wait: transaction ids grow monotonically, so a smaller id means an
/// older, higher-priority transaction. On conflict the older requester
/// aborts ("wounds") every younger conflicting holder and proceeds; it only
/// ever waits on transactions older than itself. Since waits-for edges thus
/// always point at older transactions, no cycle can form.
pub struct LockManager {
    lock_table: Mutex<HashMap<Rid, Arc<LockRequestQueue>>>,
}

impl LockManager {
    pub fn new() -> LockManager {
        Self {
            lock_table: Mutex::new(HashMap::new()),
        }
    }

    /// Takes a shared lock on the row.
    ///
    /// Illegal under READ_UNCOMMITTED and while SHRINKING; both abort the
    /// transaction. Re-locking a row already held in either mode succeeds
    /// immediately.
    pub fn lock_shared(&self, txn: &Arc<Transaction>, rid: Rid) -> LockResult {
        match txn.get_state() {
            TransactionState::Aborted => return Ok(false),
            TransactionState::Shrinking => {
                return Err(Self::abort(txn, AbortReason::LockOnShrinking))
            }
            _ => {}
        }
        if txn.get_isolation_level() == IsolationLevel::ReadUncommitted {
            return Err(Self::abort(txn, AbortReason::LockSharedOnReadUncommitted));
        }
        if txn.is_shared_locked(rid) || txn.is_exclusive_locked(rid) {
            return Ok(true);
        }

        let queue = self.queue_for(rid);
        let mut requests = queue.requests.lock();
        requests.push_back(LockRequest {
            txn: txn.clone(),
            mode: LockMode::Shared,
            granted: false,
        });
        txn.shared_lock_set().insert(rid);
        txn.set_state(TransactionState::Growing);

        while Self::shared_need_wait(txn, &requests, &queue.cv) {
            queue.cv.wait(&mut requests);
            if txn.get_state() == TransactionState::Aborted {
                return Ok(false);
            }
        }
        Self::mark_granted(&mut requests, txn.get_id());
        Ok(true)
    }

    /// Takes an exclusive lock on the row, upgrading in place if the
    /// transaction already holds it shared.
    pub fn lock_exclusive(&self, txn: &Arc<Transaction>, rid: Rid) -> LockResult {
        match txn.get_state() {
            TransactionState::Aborted => return Ok(false),
            TransactionState::Shrinking => {
                return Err(Self::abort(txn, AbortReason::LockOnShrinking))
            }
            _ => {}
        }
        if txn.is_exclusive_locked(rid) {
            return Ok(true);
        }
        if txn.is_shared_locked(rid) {
            return self.lock_upgrade(txn, rid);
        }

        let queue = self.queue_for(rid);
        let mut requests = queue.requests.lock();
        requests.push_back(LockRequest {
            txn: txn.clone(),
            mode: LockMode::Exclusive,
            granted: false,
        });
        txn.exclusive_lock_set().insert(rid);
        txn.set_state(TransactionState::Growing);

        while Self::exclusive_need_wait(txn, &requests, &queue.cv) {
            queue.cv.wait(&mut requests);
            if txn.get_state() == TransactionState::Aborted {
                return Ok(false);
            }
        }
        Self::mark_granted(&mut requests, txn.get_id());
        Ok(true)
    }

    /// Upgrades a held shared lock to exclusive. Waits until the
    /// transaction's own request is the only one left in the queue, wounding
    /// younger peers along the way.
    pub fn lock_upgrade(&self, txn: &Arc<Transaction>, rid: Rid) -> LockResult {
        match txn.get_state() {
            TransactionState::Aborted => return Ok(false),
            TransactionState::Shrinking => {
                // The exclusive path has already thrown before delegating
                // here; a direct upgrade on a shrinking transaction just
                // kills it quietly.
                txn.set_state(TransactionState::Aborted);
                return Ok(false);
            }
            _ => {}
        }
        if txn.is_exclusive_locked(rid) {
            return Ok(true);
        }

        let queue = self.queue_for(rid);
        let mut requests = queue.requests.lock();
        while Self::upgrade_need_wait(txn, &requests, &queue.cv) {
            queue.cv.wait(&mut requests);
            if txn.get_state() == TransactionState::Aborted {
                return Ok(false);
            }
        }
        if let Some(own) = requests
            .iter_mut()
            .find(|request| request.txn.get_id() == txn.get_id())
        {
            own.mode = LockMode::Exclusive;
            own.granted = true;
        }
        txn.shared_lock_set().remove(&rid);
        txn.exclusive_lock_set().insert(rid);
        Ok(true)
    }

    /// Releases whatever lock the transaction holds on the row and wakes
    /// the queue. Under REPEATABLE_READ this ends the growing phase (strict
    /// two-phase locking); under READ_COMMITTED shared locks may come and go
    /// while the transaction keeps growing.
    pub fn unlock(&self, txn: &Arc<Transaction>, rid: Rid) -> bool {
        if !txn.is_shared_locked(rid) && !txn.is_exclusive_locked(rid) {
            return false;
        }

        let queue = self.queue_for(rid);
        {
            let mut requests = queue.requests.lock();
            if let Some(pos) = requests
                .iter()
                .position(|request| request.txn.get_id() == txn.get_id())
            {
                requests.remove(pos);
            }
            queue.cv.notify_all();
        }

        if txn.get_isolation_level() == IsolationLevel::RepeatableRead
            && txn.get_state() == TransactionState::Growing
        {
            txn.set_state(TransactionState::Shrinking);
        }
        txn.shared_lock_set().remove(&rid);
        txn.exclusive_lock_set().remove(&rid);
        true
    }

    /// Wound-Wait scan for a shared request: only exclusive requests ahead
    /// of ours conflict. Younger conflicting transactions are wounded and
    /// the queue woken; an older one forces us to wait.
    fn shared_need_wait(
        txn: &Arc<Transaction>,
        requests: &VecDeque<LockRequest>,
        cv: &Condvar,
    ) -> bool {
        let mut need_wait = false;
        let mut wounded = false;
        for request in requests.iter() {
            if request.txn.get_id() == txn.get_id() {
                break;
            }
            if request.mode == LockMode::Exclusive {
                if request.txn.get_id() > txn.get_id() {
                    debug!("txn {} wounds txn {}", txn.get_id(), request.txn.get_id());
                    request.txn.set_state(TransactionState::Aborted);
                    wounded = true;
                } else {
                    need_wait = true;
                }
            }
        }
        if wounded {
            cv.notify_all();
        }
        need_wait
    }

    /// Wound-Wait scan for an exclusive request: every request ahead of
    /// ours conflicts, whatever its mode.
    fn exclusive_need_wait(
        txn: &Arc<Transaction>,
        requests: &VecDeque<LockRequest>,
        cv: &Condvar,
    ) -> bool {
        let mut need_wait = false;
        let mut wounded = false;
        for request in requests.iter() {
            if request.txn.get_id() == txn.get_id() {
                break;
            }
            if request.txn.get_id() > txn.get_id() {
                debug!("txn {} wounds txn {}", txn.get_id(), request.txn.get_id());
                request.txn.set_state(TransactionState::Aborted);
                wounded = true;
            } else {
                need_wait = true;
            }
        }
        if wounded {
            cv.notify_all();
        }
        need_wait
    }

    /// Wound-Wait scan for an upgrade: every other request in the queue
    /// conflicts, granted or not, before or behind ours.
    fn upgrade_need_wait(
        txn: &Arc<Transaction>,
        requests: &VecDeque<LockRequest>,
        cv: &Condvar,
    ) -> bool {
        let mut need_wait = false;
        let mut wounded = false;
        for request in requests.iter() {
            if request.txn.get_id() == txn.get_id() {
                continue;
            }
            if request.txn.get_id() > txn.get_id() {
                debug!("txn {} wounds txn {}", txn.get_id(), request.txn.get_id());
                request.txn.set_state(TransactionState::Aborted);
                wounded = true;
            } else {
                need_wait = true;
            }
        }
        if wounded {
            cv.notify_all();
        }
        need_wait
    }

    fn mark_granted(requests: &mut VecDeque<LockRequest>, txn_id: TxnId) {
        if let Some(own) = requests
            .iter_mut()
            .find(|request| request.txn.get_id() == txn_id)
        {
            own.granted = true;
        }
    }

    fn abort(txn: &Arc<Transaction>, reason: AbortReason) -> TransactionAbortError {
        txn.set_state(TransactionState::Aborted);
        TransactionAbortError {
            txn_id: txn.get_id(),
            reason,
        }
    }

    fn queue_for(&self, rid: Rid) -> Arc<LockRequestQueue> {
        self.lock_table.lock().entry(rid).or_default().clone()
    }
}

impl Default for LockManager {
    fn default() -> LockManager {
        LockManager::new()
    }
}
