//! Thread actions and lookaheads.
//!
//! A [`ThreadAction`] describes what a thread *just did*; a [`Lookahead`]
//! projects what a thread *will do next*, with runtime-only detail (woken
//! threads, transaction footprints) erased. Dependency analysis and sleep
//! sets reason over these, so both are plain ordered data.

use crate::types::{MVarId, RefId, ThreadId, TVarId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// What a thread did in one primitive step.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ThreadAction {
    /// Forked a new thread.
    Fork(ThreadId),
    /// Yielded the scheduler voluntarily.
    Yield,
    /// Allocated a new ref.
    NewRef(RefId),
    /// Read from a ref.
    ReadRef(RefId),
    /// Wrote to a ref. Under a buffered memory model the write entered a
    /// store buffer rather than the shared heap.
    WriteRef {
        /// The ref written.
        to: RefId,
        /// Whether the write was buffered rather than immediately visible.
        buffered: bool,
    },
    /// Atomically read-modify-wrote a ref. Acts as a full barrier.
    ModifyRef(RefId),
    /// A commit thread flushed the oldest buffered write of `by` to a ref.
    CommitRef {
        /// The user thread whose buffer was flushed.
        by: ThreadId,
        /// The ref committed.
        to: RefId,
    },
    /// Allocated a new MVar.
    NewMVar(MVarId),
    /// Put into an MVar, waking the listed threads.
    PutMVar(MVarId, Vec<ThreadId>),
    /// Attempted to put into a full MVar and blocked.
    BlockedPutMVar(MVarId),
    /// Took from an MVar, waking the listed threads.
    TakeMVar(MVarId, Vec<ThreadId>),
    /// Attempted to take from an empty MVar and blocked.
    BlockedTakeMVar(MVarId),
    /// Committed a transaction touching the given footprint, waking the
    /// listed retriers.
    Stm {
        /// Every tvar the transaction read or wrote.
        touched: BTreeSet<TVarId>,
        /// Threads unblocked by the commit.
        woken: Vec<ThreadId>,
    },
    /// A transaction retried and the thread blocked on its read set.
    BlockedStm(BTreeSet<TVarId>),
    /// Threw an exception, terminating the thread.
    Throw,
    /// Terminated normally.
    Stop,
}

impl ThreadAction {
    /// True for yield-like actions.
    #[must_use]
    pub const fn will_yield(&self) -> bool {
        matches!(self, Self::Yield)
    }

    /// True for actions that can unblock other threads.
    #[must_use]
    pub const fn will_release(&self) -> bool {
        matches!(
            self,
            Self::PutMVar(..) | Self::TakeMVar(..) | Self::Stm { .. } | Self::Throw | Self::Stop
        )
    }

    /// True if this action is a commit of a buffered write.
    #[must_use]
    pub const fn is_commit_ref(&self) -> bool {
        matches!(self, Self::CommitRef { .. })
    }

    /// True if the thread blocked performing this action.
    #[must_use]
    pub const fn is_blocked(&self) -> bool {
        matches!(
            self,
            Self::BlockedPutMVar(_) | Self::BlockedTakeMVar(_) | Self::BlockedStm(_)
        )
    }

    /// True if the thread ceased to exist after this action.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Throw | Self::Stop)
    }
}

/// What a thread will do next, with runtime-unknown values erased.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Lookahead {
    /// Will fork a new thread.
    WillFork,
    /// Will yield.
    WillYield,
    /// Will allocate a ref.
    WillNewRef,
    /// Will read the given ref.
    WillReadRef(RefId),
    /// Will write the given ref.
    WillWriteRef(RefId),
    /// Will atomically modify the given ref.
    WillModifyRef(RefId),
    /// A commit thread will flush a buffered write of `by` to a ref.
    WillCommitRef {
        /// The user thread whose buffer will be flushed.
        by: ThreadId,
        /// The ref to commit.
        to: RefId,
    },
    /// Will allocate an MVar.
    WillNewMVar,
    /// Will put into the given MVar (possibly blocking).
    WillPutMVar(MVarId),
    /// Will take from the given MVar (possibly blocking).
    WillTakeMVar(MVarId),
    /// Will run a transaction. The footprint is unknown until it runs.
    WillStm,
    /// Will throw an exception.
    WillThrow,
    /// Will terminate.
    WillStop,
}

impl Lookahead {
    /// True for yield-like steps.
    #[must_use]
    pub const fn will_yield(&self) -> bool {
        matches!(self, Self::WillYield)
    }

    /// True for steps that can unblock other threads.
    #[must_use]
    pub const fn will_release(&self) -> bool {
        matches!(
            self,
            Self::WillPutMVar(_)
                | Self::WillTakeMVar(_)
                | Self::WillStm
                | Self::WillThrow
                | Self::WillStop
        )
    }

    /// True if the step is a commit of a buffered write.
    #[must_use]
    pub const fn is_commit_ref(&self) -> bool {
        matches!(self, Self::WillCommitRef { .. })
    }
}
