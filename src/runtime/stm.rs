//! Transactions as single scheduling events.
//!
//! A transaction is a re-runnable closure over a [`StmCtx`]. The executor
//! runs it against a scratch write set: reads see the transaction's own
//! writes first, then the heap; nothing touches the heap until the closure
//! returns [`StmOutcome::Done`], at which point the write set commits
//! atomically. Returning [`StmOutcome::Retry`] discards the write set and
//! blocks the thread on everything the attempt read — a later commit that
//! writes any of those tvars wakes it to try again.
//!
//! Interleaving *inside* a transaction is deliberately out of scope: the
//! whole attempt is one step, and dependency between transactions is
//! footprint intersection.

use crate::runtime::heap::Heap;
use crate::types::{TVarId, Val};
use std::collections::{BTreeMap, BTreeSet};

/// How a transaction attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StmOutcome {
    /// Commit the write set and return this value.
    Done(Val),
    /// Discard the attempt and block until a read tvar changes.
    Retry,
}

/// The view a transaction closure runs against.
#[derive(Debug)]
pub struct StmCtx<'h> {
    heap: &'h mut Heap,
    writes: BTreeMap<TVarId, Val>,
    reads: BTreeSet<TVarId>,
}

impl<'h> StmCtx<'h> {
    fn new(heap: &'h mut Heap) -> Self {
        Self {
            heap,
            writes: BTreeMap::new(),
            reads: BTreeSet::new(),
        }
    }

    /// Reads a tvar, seeing this transaction's own writes first.
    pub fn read(&mut self, tvar: TVarId) -> Val {
        self.reads.insert(tvar);
        match self.writes.get(&tvar) {
            Some(value) => *value,
            None => self.heap.tvar(tvar),
        }
    }

    /// Writes a tvar into the transaction's write set.
    pub fn write(&mut self, tvar: TVarId, value: Val) {
        self.writes.insert(tvar, value);
    }

    /// Allocates a fresh tvar visible after commit.
    ///
    /// If the attempt retries the allocation is discarded; the identifier
    /// is not reused.
    pub fn new_tvar(&mut self, init: Val) -> TVarId {
        let id = self.heap.alloc_tvar_id();
        self.writes.insert(id, init);
        id
    }
}

/// The executor-facing result of running one transaction attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxResult {
    /// The attempt committed.
    Committed {
        /// The transaction's return value.
        value: Val,
        /// Every tvar the attempt read or wrote.
        touched: BTreeSet<TVarId>,
        /// The tvars whose values changed; commits waking retriers key off
        /// this set.
        written: BTreeSet<TVarId>,
    },
    /// The attempt retried; the thread blocks on this read set.
    Blocked {
        /// Every tvar the attempt read before retrying.
        reads: BTreeSet<TVarId>,
    },
}

/// Runs one transaction attempt to completion against the heap.
pub fn run_transaction(heap: &mut Heap, tx: &dyn Fn(&mut StmCtx<'_>) -> StmOutcome) -> TxResult {
    let mut ctx = StmCtx::new(heap);
    match tx(&mut ctx) {
        StmOutcome::Done(value) => {
            let StmCtx { writes, reads, .. } = ctx;
            let written: BTreeSet<TVarId> = writes.keys().copied().collect();
            let touched: BTreeSet<TVarId> = written.union(&reads).copied().collect();
            for (tvar, value) in writes {
                heap.set_tvar(tvar, value);
            }
            TxResult::Committed {
                value,
                touched,
                written,
            }
        }
        StmOutcome::Retry => TxResult::Blocked { reads: ctx.reads },
    }
}
