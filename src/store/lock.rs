//! Advisory locks on the ledger channel shared with a peer.
//!
//! A lock only guards the right to propose a reallocation. Waiting processes
//! are served in the order they asked.

use super::ProcessId;
use alloc::{collections::VecDeque, string::String};

/// Proof of holding the ledger lock for `peer`. Must be handed back to
/// [release_ledger][super::Store::release_ledger].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken {
    pub peer: String,
    pub id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockStatus {
    Granted(LockToken),
    /// The lock is held by someone else, a `LockGranted` event follows once
    /// it is handed over.
    Queued,
}

#[derive(Debug, Default)]
pub(super) struct LedgerLock {
    pub holder: Option<(LockToken, ProcessId)>,
    pub waiting: VecDeque<ProcessId>,
}

impl LedgerLock {
    pub fn is_idle(&self) -> bool {
        self.holder.is_none() && self.waiting.is_empty()
    }

    pub fn is_waiting(&self, process: ProcessId) -> bool {
        self.waiting.contains(&process)
    }
}
