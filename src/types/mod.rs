//! Core identifier and outcome types for the exploration engine.
//!
//! Everything in this module is plain data: copyable identifiers with a
//! total order, the scheduler's decision alphabet, the failure taxonomy for
//! programs that cannot continue, and the memory-model selector. The
//! exploration machinery keys maps and deduplicates results with these
//! types, so all of them derive `Ord` and serialize cleanly.
//!
//! # Thread identity
//!
//! [`ThreadId`] is a totally ordered integer. The first user thread is
//! [`ThreadId::initial`] (zero); forked threads count upwards from one.
//! Identifiers strictly below the initial thread denote *commit threads*:
//! internal phantoms that flush buffered writes under relaxed memory. The
//! engine relies on this ordering — `is_commit` is just a sign test, and
//! "lowest runnable thread" naturally prefers commits over user threads.

use core::fmt;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Observable values held in shared cells and returned by programs.
///
/// Programs may compute arbitrary things in their closures; everything the
/// engine can *observe* (ref contents, MVar payloads, results) is word-sized.
pub type Val = i64;

/// Identifier for a thread of the program under test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ThreadId(i32);

impl ThreadId {
    /// The first user thread of every program.
    #[must_use]
    pub const fn initial() -> Self {
        Self(0)
    }

    /// Creates a thread identifier from a raw value.
    #[must_use]
    pub const fn new(raw: i32) -> Self {
        Self(raw)
    }

    /// Returns the raw identifier value.
    #[must_use]
    pub const fn raw(self) -> i32 {
        self.0
    }

    /// True if this is a commit thread (a phantom flushing buffered writes).
    #[must_use]
    pub const fn is_commit(self) -> bool {
        self.0 < 0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_commit() {
            write!(f, "C{}", -self.0)
        } else {
            write!(f, "T{}", self.0)
        }
    }
}

/// Identifier for a mutable shared reference cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RefId(pub(crate) u32);

impl RefId {
    /// Returns the raw identifier value.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for RefId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// Identifier for an MVar (a one-slot blocking channel).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MVarId(pub(crate) u32);

impl MVarId {
    /// Returns the raw identifier value.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for MVarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m{}", self.0)
    }
}

/// Identifier for a transactional variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TVarId(pub(crate) u32);

impl TVarId {
    /// Returns the raw identifier value.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for TVarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// A scheduling decision, relative to the previously running thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Decision {
    /// Schedule the very first thread of the execution.
    Start(ThreadId),
    /// Keep running the thread that ran the previous step.
    Continue,
    /// Switch to a different thread.
    SwitchTo(ThreadId),
}

impl Decision {
    /// The thread this decision schedules, given the previously running one.
    ///
    /// Returns `None` only for `Continue` with no prior thread, which a
    /// well-formed trace never contains.
    #[must_use]
    pub fn target(self, prior: Option<ThreadId>) -> Option<ThreadId> {
        match self {
            Self::Start(tid) | Self::SwitchTo(tid) => Some(tid),
            Self::Continue => prior,
        }
    }

    /// The decision that schedules `tid` after `prior` ran.
    #[must_use]
    pub fn relative(prior: Option<ThreadId>, tid: ThreadId) -> Self {
        match prior {
            None => Self::Start(tid),
            Some(p) if p == tid => Self::Continue,
            Some(_) => Self::SwitchTo(tid),
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start(tid) => write!(f, "start {tid}"),
            Self::Continue => write!(f, "continue"),
            Self::SwitchTo(tid) => write!(f, "switch {tid}"),
        }
    }
}

/// Why an execution of the program under test could not continue normally.
///
/// Failures are *data*, not engine errors: the engine records them as the
/// outcome of one interleaving and keeps exploring.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Error,
)]
pub enum Failure {
    /// Every thread is blocked on an MVar and no progress is possible.
    #[error("deadlock: every thread is blocked")]
    Deadlock,
    /// Every thread is blocked and the main thread is inside a retrying
    /// transaction.
    #[error("STM deadlock: every thread is blocked in a transaction")]
    StmDeadlock,
    /// The engine reached a state it believes impossible; report upstream.
    #[error("internal error in the exploration engine")]
    InternalError,
    /// The scheduler declined to schedule anything and the execution was
    /// cut short.
    #[error("execution aborted by the scheduler")]
    Abort,
    /// Nested exploration was misused. Reserved for embedding layers; this
    /// crate's primitive set never produces it.
    #[error("illegal use of nested exploration")]
    IllegalSubconcurrency,
    /// An exception escaped the main thread.
    #[error("uncaught exception in the main thread")]
    UncaughtException,
}

/// The result of one execution: the program's value or a [`Failure`].
pub type ExecResult = Result<Val, Failure>;

/// The memory model the executor simulates for shared reference cells.
///
/// MVar and transaction operations are sequentially consistent under every
/// model; the model only governs plain ref reads and writes.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum MemType {
    /// Writes are immediately visible to every thread.
    #[default]
    SequentialConsistency,
    /// Writes enter a per-thread FIFO buffer and commit later.
    TotalStoreOrder,
    /// Writes enter a per-thread, per-ref FIFO buffer and commit later.
    PartialStoreOrder,
}

impl MemType {
    /// True if this model buffers writes at all.
    #[must_use]
    pub const fn is_buffered(self) -> bool {
        !matches!(self, Self::SequentialConsistency)
    }
}
