use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::debug;

use crate::types::{Result, VellumError, Xid};

/// Reserved transaction id for engine-internal writes; it is never active.
pub const SUPER_XID: Xid = 0;

/// Source of truth for whether a transaction committed.
///
/// The storage engine only asks whether a transaction is still active and,
/// during recovery, asks the oracle to abort transactions it rolled back.
pub trait TransactionStatus: Send + Sync {
    /// Returns true if `xid` has neither committed nor aborted.
    fn is_active(&self, xid: Xid) -> Result<bool>;
    /// Records `xid` as aborted.
    fn abort(&self, xid: Xid) -> Result<()>;
}

/// Lifecycle state of a transaction tracked by [`MemoryTransactions`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TxnState {
    /// Begun and not yet finished.
    Active,
    /// Committed.
    Committed,
    /// Aborted by the caller or by recovery.
    Aborted,
}

struct TxnTable {
    next: Xid,
    states: HashMap<Xid, TxnState>,
}

/// In-memory transaction-status oracle.
///
/// Share one instance across a close/reopen (or simulated crash) to keep
/// transaction outcomes visible to recovery.
pub struct MemoryTransactions {
    table: Mutex<TxnTable>,
}

impl MemoryTransactions {
    /// Creates an oracle with no transactions.
    pub fn new() -> Self {
        Self {
            table: Mutex::new(TxnTable {
                next: SUPER_XID + 1,
                states: HashMap::new(),
            }),
        }
    }

    /// Starts a new transaction.
    pub fn begin(&self) -> Xid {
        let mut table = self.table.lock();
        let xid = table.next;
        table.next += 1;
        table.states.insert(xid, TxnState::Active);
        debug!(xid, "txn.begin");
        xid
    }

    /// Marks an active transaction committed.
    pub fn commit(&self, xid: Xid) -> Result<()> {
        self.finish(xid, TxnState::Committed)
    }

    /// Returns the state of `xid`, or `None` if it was never begun.
    pub fn state(&self, xid: Xid) -> Option<TxnState> {
        self.table.lock().states.get(&xid).copied()
    }

    fn finish(&self, xid: Xid, to: TxnState) -> Result<()> {
        let mut table = self.table.lock();
        match table.states.get_mut(&xid) {
            Some(state) if *state == TxnState::Active => {
                *state = to;
                debug!(xid, state = ?to, "txn.finish");
                Ok(())
            }
            Some(_) => Err(VellumError::Invalid("transaction already finished")),
            None => Err(VellumError::NotFound),
        }
    }
}

impl Default for MemoryTransactions {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionStatus for MemoryTransactions {
    fn is_active(&self, xid: Xid) -> Result<bool> {
        if xid == SUPER_XID {
            return Ok(false);
        }
        Ok(self.state(xid) == Some(TxnState::Active))
    }

    fn abort(&self, xid: Xid) -> Result<()> {
        self.finish(xid, TxnState::Aborted)
    }
}
