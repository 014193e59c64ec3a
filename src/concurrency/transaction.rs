use std::collections::HashSet;

use parking_lot::{Mutex, MutexGuard};
use thiserror::Error;

use crate::common::config::TxnId;
use crate::common::rid::Rid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
}

/// Why a transaction was forcibly aborted by the lock manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AbortReason {
    #[error("lock requested while in the shrinking phase")]
    LockOnShrinking,
    #[error("shared lock requested under READ_UNCOMMITTED")]
    LockSharedOnReadUncommitted,
    #[error("aborted to break a deadlock")]
    Deadlock,
}

/// Raised when a lock call itself aborts the requesting transaction, as
/// opposed to the transaction having been wounded by somebody else (which
/// surfaces as a plain `false` return).
#[derive(Debug, Clone, Copy, Error)]
#[error("transaction {txn_id} aborted: {reason}")]
pub struct TransactionAbortError {
    pub txn_id: TxnId,
    pub reason: AbortReason,
}

/// A transaction as the lock manager sees it: an id establishing age
/// (smaller id = older = higher Wound-Wait priority), the two-phase-locking
/// state machine, and the sets of row locks currently held.
///
/// Shared as `Arc<Transaction>` between its executor thread and the lock
/// manager, which must be able to wound it from another thread.
#[derive(Debug)]
pub struct Transaction {
    id: TxnId,
    isolation_level: IsolationLevel,
    state: Mutex<TransactionState>,
    shared_lock_set: Mutex<HashSet<Rid>>,
    exclusive_lock_set: Mutex<HashSet<Rid>>,
}

impl Transaction {
    pub fn new(id: TxnId, isolation_level: IsolationLevel) -> Transaction {
        Self {
            id,
            isolation_level,
            state: Mutex::new(TransactionState::Growing),
            shared_lock_set: Mutex::new(HashSet::new()),
            exclusive_lock_set: Mutex::new(HashSet::new()),
        }
    }

    pub fn get_id(&self) -> TxnId {
        self.id
    }

    pub fn get_isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    pub fn get_state(&self) -> TransactionState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: TransactionState) {
        *self.state.lock() = state;
    }

    pub fn is_shared_locked(&self, rid: Rid) -> bool {
        self.shared_lock_set.lock().contains(&rid)
    }

    pub fn is_exclusive_locked(&self, rid: Rid) -> bool {
        self.exclusive_lock_set.lock().contains(&rid)
    }

    /// Row locks held in shared mode.
    pub fn shared_lock_set(&self) -> MutexGuard<'_, HashSet<Rid>> {
        self.shared_lock_set.lock()
    }

    /// Row locks held in exclusive mode.
    pub fn exclusive_lock_set(&self) -> MutexGuard<'_, HashSet<Rid>> {
        self.exclusive_lock_set.lock()
    }
}
