//! Programs under test: a continuation-passing primitive DSL.
//!
//! A program is a tree of [`Action`] nodes. Each node is one primitive
//! step — fork, ref access, MVar access, transaction, yield, stop — whose
//! continuation is a closure receiving whatever the step produced. The
//! executor interprets exactly one node per scheduling point, which is what
//! makes every interleaving reachable by decision replay.
//!
//! Programs must be re-runnable: the engine executes them hundreds of
//! times, so [`Program`] wraps a *factory* closure that rebuilds the action
//! tree from scratch for every execution.
//!
//! # Setup prefixes and snapshots
//!
//! Most programs start with a deterministic, scheduling-free prefix that
//! allocates shared state. Declaring it through [`Program::with_setup`]
//! lets the engine run the prefix once, snapshot the heap, and replay every
//! subsequent execution from the snapshot.
//!
//! ```ignore
//! use weft::program::{self, Program};
//!
//! let program = Program::with_setup(
//!     |setup| setup.new_ref(0),
//!     |&counter| {
//!         program::fork(
//!             program::modify_ref(counter, |v| v + 1, |_| program::stop(0)),
//!             move |_child| program::read_ref(counter, program::stop),
//!         )
//!     },
//! );
//! ```

use crate::runtime::heap::Heap;
use crate::runtime::stm::{StmCtx, StmOutcome};
use crate::trace::Lookahead;
use crate::types::{MVarId, RefId, ThreadId, TVarId, Val};
use core::fmt;
use std::any::Any;
use std::rc::Rc;
use thiserror::Error;

/// A continuation consuming a produced value.
pub type Cont = Box<dyn FnOnce(Val) -> Action>;

/// A transaction body, re-runnable across retry attempts.
pub type Transaction = Rc<dyn Fn(&mut StmCtx<'_>) -> StmOutcome>;

/// One primitive step of a program, with its continuation.
pub enum Action {
    /// Start a new thread running the first action, then continue with the
    /// child's identifier.
    Fork(Box<Action>, Box<dyn FnOnce(ThreadId) -> Action>),
    /// Allocate a ref with an initial value.
    NewRef(Val, Box<dyn FnOnce(RefId) -> Action>),
    /// Read a ref.
    ReadRef(RefId, Cont),
    /// Write a value to a ref.
    WriteRef(RefId, Val, Box<Action>),
    /// Atomically apply a function to a ref, continuing with the old value.
    ModifyRef(RefId, Box<dyn FnOnce(Val) -> Val>, Cont),
    /// Allocate an empty MVar.
    NewMVar(Box<dyn FnOnce(MVarId) -> Action>),
    /// Put a value into an MVar, blocking while it is full.
    PutMVar(MVarId, Val, Box<Action>),
    /// Take the value out of an MVar, blocking while it is empty.
    TakeMVar(MVarId, Cont),
    /// Run a transaction as one atomic step.
    Atomically(Transaction, Cont),
    /// Yield the scheduler.
    Yield(Box<Action>),
    /// Throw an exception, terminating this thread.
    Throw,
    /// Terminate this thread, yielding a value (observed only for the
    /// initial thread).
    Stop(Val),
}

impl Action {
    /// Projects the action this thread will perform next.
    #[must_use]
    pub fn lookahead(&self) -> Lookahead {
        match self {
            Self::Fork(..) => Lookahead::WillFork,
            Self::NewRef(..) => Lookahead::WillNewRef,
            Self::ReadRef(r, _) => Lookahead::WillReadRef(*r),
            Self::WriteRef(r, ..) => Lookahead::WillWriteRef(*r),
            Self::ModifyRef(r, ..) => Lookahead::WillModifyRef(*r),
            Self::NewMVar(_) => Lookahead::WillNewMVar,
            Self::PutMVar(m, ..) => Lookahead::WillPutMVar(*m),
            Self::TakeMVar(m, _) => Lookahead::WillTakeMVar(*m),
            Self::Atomically(..) => Lookahead::WillStm,
            Self::Yield(_) => Lookahead::WillYield,
            Self::Throw => Lookahead::WillThrow,
            Self::Stop(_) => Lookahead::WillStop,
        }
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Action({:?})", self.lookahead())
    }
}

/// Starts a child thread, continuing with its identifier.
#[must_use]
pub fn fork(child: Action, then: impl FnOnce(ThreadId) -> Action + 'static) -> Action {
    Action::Fork(Box::new(child), Box::new(then))
}

/// Allocates a ref holding `init`.
#[must_use]
pub fn new_ref(init: Val, then: impl FnOnce(RefId) -> Action + 'static) -> Action {
    Action::NewRef(init, Box::new(then))
}

/// Reads a ref.
#[must_use]
pub fn read_ref(r: RefId, then: impl FnOnce(Val) -> Action + 'static) -> Action {
    Action::ReadRef(r, Box::new(then))
}

/// Writes `value` to a ref.
#[must_use]
pub fn write_ref(r: RefId, value: Val, then: Action) -> Action {
    Action::WriteRef(r, value, Box::new(then))
}

/// Atomically applies `f` to a ref, continuing with the old value. A full
/// memory barrier under every model.
#[must_use]
pub fn modify_ref(
    r: RefId,
    f: impl FnOnce(Val) -> Val + 'static,
    then: impl FnOnce(Val) -> Action + 'static,
) -> Action {
    Action::ModifyRef(r, Box::new(f), Box::new(then))
}

/// Allocates an empty MVar.
#[must_use]
pub fn new_mvar(then: impl FnOnce(MVarId) -> Action + 'static) -> Action {
    Action::NewMVar(Box::new(then))
}

/// Puts `value` into an MVar, blocking while it is full.
#[must_use]
pub fn put_mvar(m: MVarId, value: Val, then: Action) -> Action {
    Action::PutMVar(m, value, Box::new(then))
}

/// Takes the value out of an MVar, blocking while it is empty.
#[must_use]
pub fn take_mvar(m: MVarId, then: impl FnOnce(Val) -> Action + 'static) -> Action {
    Action::TakeMVar(m, Box::new(then))
}

/// Runs a transaction atomically, continuing with its result.
#[must_use]
pub fn atomically(
    tx: impl Fn(&mut StmCtx<'_>) -> StmOutcome + 'static,
    then: impl FnOnce(Val) -> Action + 'static,
) -> Action {
    Action::Atomically(Rc::new(tx), Box::new(then))
}

/// Yields the scheduler before continuing.
#[must_use]
pub fn yield_now(then: Action) -> Action {
    Action::Yield(Box::new(then))
}

/// Throws an exception, terminating this thread.
#[must_use]
pub fn throw() -> Action {
    Action::Throw
}

/// Terminates this thread with a value.
#[must_use]
pub fn stop(value: Val) -> Action {
    Action::Stop(value)
}

/// The allocation interface a setup prefix runs against.
///
/// Setup runs single-threaded before any scheduling, so allocations here
/// are deterministic and snapshot-safe.
#[derive(Debug)]
pub struct SetupCtx<'h> {
    heap: &'h mut Heap,
}

impl SetupCtx<'_> {
    /// Allocates a ref holding `init`.
    pub fn new_ref(&mut self, init: Val) -> RefId {
        self.heap.alloc_ref(init)
    }

    /// Allocates an empty MVar.
    pub fn new_mvar(&mut self) -> MVarId {
        self.heap.alloc_mvar(None)
    }

    /// Allocates an MVar already holding `value`.
    pub fn new_mvar_filled(&mut self, value: Val) -> MVarId {
        self.heap.alloc_mvar(Some(value))
    }

    /// Allocates a transactional variable holding `init`.
    pub fn new_tvar(&mut self, init: Val) -> TVarId {
        self.heap.alloc_tvar(init)
    }
}

type ErasedSetup = dyn Fn(&mut SetupCtx<'_>) -> Rc<dyn Any>;
type ErasedMain = dyn Fn(&dyn Any) -> Action;

#[derive(Clone)]
enum ProgramKind {
    Basic(Rc<dyn Fn() -> Action>),
    WithSetup {
        setup: Rc<ErasedSetup>,
        main: Rc<ErasedMain>,
    },
}

/// A re-runnable program under test.
#[derive(Clone)]
pub struct Program {
    kind: ProgramKind,
}

impl Program {
    /// Wraps a factory that rebuilds the whole action tree per execution.
    #[must_use]
    pub fn new(body: impl Fn() -> Action + 'static) -> Self {
        Self {
            kind: ProgramKind::Basic(Rc::new(body)),
        }
    }

    /// Declares a deterministic setup prefix plus the concurrent body.
    ///
    /// `setup` allocates shared state and returns an environment the body
    /// closes over; the engine may run it once, snapshot the resulting
    /// heap, and replay every execution from there.
    #[must_use]
    pub fn with_setup<E, S, M>(setup: S, main: M) -> Self
    where
        E: Clone + 'static,
        S: Fn(&mut SetupCtx<'_>) -> E + 'static,
        M: Fn(&E) -> Action + 'static,
    {
        let setup: Rc<ErasedSetup> =
            Rc::new(move |cx: &mut SetupCtx<'_>| -> Rc<dyn Any> { Rc::new(setup(cx)) });
        let main: Rc<ErasedMain> = Rc::new(move |env: &dyn Any| -> Action {
            let env = env
                .downcast_ref::<E>()
                .expect("snapshot environment carries the setup's type");
            main(env)
        });
        Self {
            kind: ProgramKind::WithSetup { setup, main },
        }
    }

    /// True if this program declares a snapshot-capable setup prefix.
    #[must_use]
    pub fn can_snapshot(&self) -> bool {
        matches!(self.kind, ProgramKind::WithSetup { .. })
    }

    /// Runs the setup prefix once and captures the resulting heap.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::Unsupported`] for programs without a setup
    /// prefix.
    pub fn snapshot(&self) -> Result<Snapshot, SnapshotError> {
        match &self.kind {
            ProgramKind::Basic(_) => Err(SnapshotError::Unsupported),
            ProgramKind::WithSetup { setup, main } => {
                let mut heap = Heap::default();
                let env = setup(&mut SetupCtx { heap: &mut heap });
                Ok(Snapshot {
                    heap,
                    env,
                    main: Rc::clone(main),
                })
            }
        }
    }

    /// Builds the initial thread's action tree, running setup into `heap`.
    pub(crate) fn instantiate(&self, heap: &mut Heap) -> Action {
        match &self.kind {
            ProgramKind::Basic(body) => body(),
            ProgramKind::WithSetup { setup, main } => {
                let env = setup(&mut SetupCtx { heap });
                main(env.as_ref())
            }
        }
    }

    /// The initial thread's first step.
    pub(crate) fn initial_lookahead(&self) -> Lookahead {
        let mut heap = Heap::default();
        self.instantiate(&mut heap).lookahead()
    }
}

impl fmt::Debug for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ProgramKind::Basic(_) => f.write_str("Program::new(..)"),
            ProgramKind::WithSetup { .. } => f.write_str("Program::with_setup(..)"),
        }
    }
}

/// Why a snapshot could not be captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SnapshotError {
    /// The program has no setup prefix to capture.
    #[error("program has no setup prefix to snapshot")]
    Unsupported,
}

/// A captured post-setup heap, replayable for every execution.
#[derive(Clone)]
pub struct Snapshot {
    heap: Heap,
    env: Rc<dyn Any>,
    main: Rc<ErasedMain>,
}

impl Snapshot {
    /// The captured heap.
    pub(crate) fn heap(&self) -> &Heap {
        &self.heap
    }

    /// Rebuilds the initial thread's action tree from the captured
    /// environment.
    pub(crate) fn root_action(&self) -> Action {
        (self.main)(self.env.as_ref())
    }

    /// The initial thread's first step.
    pub(crate) fn initial_lookahead(&self) -> Lookahead {
        self.root_action().lookahead()
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot").field("heap", &self.heap).finish_non_exhaustive()
    }
}
