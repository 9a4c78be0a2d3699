//! The deterministic executor.
//!
//! One execution advances the program one primitive step at a time. At
//! every scheduling point the executor presents the runnable set (user
//! threads plus phantom commit threads) with lookaheads to the
//! [`Scheduler`], performs one step of the chosen thread, and records the
//! decision, the alternatives, and the resulting action in the trace.
//! Given the same scheduler decisions the execution is bit-for-bit
//! identical, which is what exploration and replay rely on.
//!
//! The executor owns all per-execution state — thread table, heap, store
//! buffers — and discards it when the execution ends. Nothing leaks across
//! executions except what the caller keeps.

use crate::runtime::heap::{Heap, WriteBuffers};
use crate::runtime::program::{Action, Program, Snapshot};
use crate::runtime::stm::{run_transaction, TxResult};
use crate::trace::{Lookahead, ThreadAction, Trace, TraceItem};
use crate::types::{Decision, ExecResult, Failure, MVarId, MemType, ThreadId, TVarId};
use smallvec::SmallVec;
use std::collections::{BTreeMap, BTreeSet};

/// Picks the next thread to run.
///
/// The executor calls this once per primitive step with what just happened
/// and who can run next. Returning `None` aborts the execution (the result
/// becomes [`Failure::Abort`] with the trace so far). Scheduler state
/// threads through `&mut self`.
pub trait Scheduler {
    /// Chooses a thread from `runnable`.
    ///
    /// `prior` is the previously scheduled thread and its action, `None`
    /// for the first step of an execution.
    fn schedule(
        &mut self,
        prior: Option<(ThreadId, &ThreadAction)>,
        runnable: &BTreeMap<ThreadId, Lookahead>,
    ) -> Option<ThreadId>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum BlockedOn {
    Put(MVarId),
    Take(MVarId),
    Stm(BTreeSet<TVarId>),
}

struct ThreadState {
    cont: Action,
    blocked: Option<BlockedOn>,
}

enum StepOutcome {
    Continue,
    Finished(ExecResult),
}

/// Runs the program once under the given scheduler and memory model.
pub fn run_concurrent<S: Scheduler + ?Sized>(
    sched: &mut S,
    memtype: MemType,
    program: &Program,
) -> (ExecResult, Trace) {
    let mut heap = Heap::default();
    let root = program.instantiate(&mut heap);
    run_from(sched, memtype, heap, root)
}

/// Runs one execution from a captured setup snapshot, skipping the setup
/// prefix.
pub fn run_with_snapshot<S: Scheduler + ?Sized>(
    sched: &mut S,
    memtype: MemType,
    snapshot: &Snapshot,
) -> (ExecResult, Trace) {
    let heap = snapshot.heap().clone();
    let root = snapshot.root_action();
    run_from(sched, memtype, heap, root)
}

fn run_from<S: Scheduler + ?Sized>(
    sched: &mut S,
    memtype: MemType,
    mut heap: Heap,
    root: Action,
) -> (ExecResult, Trace) {
    let mut threads: BTreeMap<ThreadId, ThreadState> = BTreeMap::new();
    threads.insert(
        ThreadId::initial(),
        ThreadState {
            cont: root,
            blocked: None,
        },
    );
    let mut buffers = WriteBuffers::default();
    let mut trace: Trace = Vec::new();
    let mut prior: Option<(ThreadId, ThreadAction)> = None;
    let mut next_user: i32 = 1;

    loop {
        let mut runnable: BTreeMap<ThreadId, Lookahead> = threads
            .iter()
            .filter(|(_, state)| state.blocked.is_none())
            .map(|(tid, state)| (*tid, state.cont.lookahead()))
            .collect();
        for pending in buffers.pending_commits() {
            runnable.insert(
                pending.commit_tid,
                Lookahead::WillCommitRef {
                    by: pending.owner,
                    to: pending.target,
                },
            );
        }

        if runnable.is_empty() {
            let main_in_stm = matches!(
                threads
                    .get(&ThreadId::initial())
                    .and_then(|state| state.blocked.as_ref()),
                Some(BlockedOn::Stm(_))
            );
            let failure = if main_in_stm {
                Failure::StmDeadlock
            } else {
                Failure::Deadlock
            };
            return (Err(failure), trace);
        }

        let prior_view = prior.as_ref().map(|(tid, action)| (*tid, action));
        let Some(chosen) = sched.schedule(prior_view, &runnable) else {
            return (Err(Failure::Abort), trace);
        };
        if !runnable.contains_key(&chosen) {
            tracing::debug!(thread = %chosen, "scheduler chose a non-runnable thread");
            return (Err(Failure::InternalError), trace);
        }

        let prior_tid = prior.as_ref().map(|(tid, _)| *tid);
        let decision = Decision::relative(prior_tid, chosen);
        let alternatives: SmallVec<[Decision; 4]> = runnable
            .keys()
            .filter(|tid| **tid != chosen)
            .map(|tid| Decision::relative(prior_tid, *tid))
            .collect();

        let (action, outcome) = execute_step(
            chosen,
            &mut threads,
            &mut heap,
            &mut buffers,
            memtype,
            &mut next_user,
        );
        trace.push(TraceItem {
            decision,
            alternatives,
            action: action.clone(),
        });
        if let StepOutcome::Finished(result) = outcome {
            return (result, trace);
        }
        prior = Some((chosen, action));
    }
}

fn execute_step(
    chosen: ThreadId,
    threads: &mut BTreeMap<ThreadId, ThreadState>,
    heap: &mut Heap,
    buffers: &mut WriteBuffers,
    memtype: MemType,
    next_user: &mut i32,
) -> (ThreadAction, StepOutcome) {
    if chosen.is_commit() {
        let committed = buffers
            .commit_one(chosen, heap)
            .expect("commit thread has a pending write");
        return (
            ThreadAction::CommitRef {
                by: committed.owner,
                to: committed.target,
            },
            StepOutcome::Continue,
        );
    }

    let mut state = threads.remove(&chosen).expect("scheduled thread exists");
    match state.cont {
        Action::Fork(child, then) => {
            let child_tid = ThreadId::new(*next_user);
            *next_user += 1;
            threads.insert(
                child_tid,
                ThreadState {
                    cont: *child,
                    blocked: None,
                },
            );
            state.cont = then(child_tid);
            threads.insert(chosen, state);
            (ThreadAction::Fork(child_tid), StepOutcome::Continue)
        }
        Action::NewRef(init, then) => {
            let id = heap.alloc_ref(init);
            state.cont = then(id);
            threads.insert(chosen, state);
            (ThreadAction::NewRef(id), StepOutcome::Continue)
        }
        Action::ReadRef(r, then) => {
            // Store forwarding: a thread sees its own buffered writes.
            let value = buffers
                .newest(chosen, r)
                .unwrap_or_else(|| heap.ref_value(r));
            state.cont = then(value);
            threads.insert(chosen, state);
            (ThreadAction::ReadRef(r), StepOutcome::Continue)
        }
        Action::WriteRef(r, value, then) => {
            let buffered = memtype.is_buffered();
            if buffered {
                buffers.buffer_write(memtype, chosen, r, value);
            } else {
                heap.set_ref(r, value);
            }
            state.cont = *then;
            threads.insert(chosen, state);
            (
                ThreadAction::WriteRef { to: r, buffered },
                StepOutcome::Continue,
            )
        }
        Action::ModifyRef(r, f, then) => {
            buffers.flush_all(heap);
            let old = heap.ref_value(r);
            heap.set_ref(r, f(old));
            state.cont = then(old);
            threads.insert(chosen, state);
            (ThreadAction::ModifyRef(r), StepOutcome::Continue)
        }
        Action::NewMVar(then) => {
            let id = heap.alloc_mvar(None);
            state.cont = then(id);
            threads.insert(chosen, state);
            (ThreadAction::NewMVar(id), StepOutcome::Continue)
        }
        Action::PutMVar(m, value, then) => {
            buffers.flush_all(heap);
            if heap.mvar(m).is_some() {
                state.cont = Action::PutMVar(m, value, then);
                state.blocked = Some(BlockedOn::Put(m));
                threads.insert(chosen, state);
                (ThreadAction::BlockedPutMVar(m), StepOutcome::Continue)
            } else {
                heap.set_mvar(m, Some(value));
                let woken = wake(threads, |blocked| *blocked == BlockedOn::Take(m));
                state.cont = *then;
                threads.insert(chosen, state);
                (ThreadAction::PutMVar(m, woken), StepOutcome::Continue)
            }
        }
        Action::TakeMVar(m, then) => {
            buffers.flush_all(heap);
            if let Some(value) = heap.mvar(m) {
                heap.set_mvar(m, None);
                let woken = wake(threads, |blocked| *blocked == BlockedOn::Put(m));
                state.cont = then(value);
                threads.insert(chosen, state);
                (ThreadAction::TakeMVar(m, woken), StepOutcome::Continue)
            } else {
                state.cont = Action::TakeMVar(m, then);
                state.blocked = Some(BlockedOn::Take(m));
                threads.insert(chosen, state);
                (ThreadAction::BlockedTakeMVar(m), StepOutcome::Continue)
            }
        }
        Action::Atomically(tx, then) => {
            buffers.flush_all(heap);
            match run_transaction(heap, tx.as_ref()) {
                TxResult::Committed {
                    value,
                    touched,
                    written,
                } => {
                    let woken = wake(threads, |blocked| match blocked {
                        BlockedOn::Stm(reads) => reads.iter().any(|v| written.contains(v)),
                        _ => false,
                    });
                    state.cont = then(value);
                    threads.insert(chosen, state);
                    (ThreadAction::Stm { touched, woken }, StepOutcome::Continue)
                }
                TxResult::Blocked { reads } => {
                    state.cont = Action::Atomically(tx, then);
                    state.blocked = Some(BlockedOn::Stm(reads.clone()));
                    threads.insert(chosen, state);
                    (ThreadAction::BlockedStm(reads), StepOutcome::Continue)
                }
            }
        }
        Action::Yield(then) => {
            state.cont = *then;
            threads.insert(chosen, state);
            (ThreadAction::Yield, StepOutcome::Continue)
        }
        Action::Throw => {
            let outcome = if chosen == ThreadId::initial() {
                StepOutcome::Finished(Err(Failure::UncaughtException))
            } else {
                StepOutcome::Continue
            };
            (ThreadAction::Throw, outcome)
        }
        Action::Stop(value) => {
            let outcome = if chosen == ThreadId::initial() {
                StepOutcome::Finished(Ok(value))
            } else {
                StepOutcome::Continue
            };
            (ThreadAction::Stop, outcome)
        }
    }
}

fn wake(
    threads: &mut BTreeMap<ThreadId, ThreadState>,
    matches: impl Fn(&BlockedOn) -> bool,
) -> Vec<ThreadId> {
    let mut woken = Vec::new();
    for (tid, state) in threads.iter_mut() {
        if state.blocked.as_ref().is_some_and(&matches) {
            state.blocked = None;
            woken.push(*tid);
        }
    }
    woken
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::program::{
        atomically, fork, new_ref, put_mvar, read_ref, stop, take_mvar, throw, write_ref,
        yield_now, Program,
    };
    use crate::runtime::stm::StmOutcome;
    use crate::trace::scheduled_threads;

    /// Always schedules the lowest runnable thread.
    struct Lowest;

    impl Scheduler for Lowest {
        fn schedule(
            &mut self,
            _prior: Option<(ThreadId, &ThreadAction)>,
            runnable: &BTreeMap<ThreadId, Lookahead>,
        ) -> Option<ThreadId> {
            runnable.keys().next().copied()
        }
    }

    /// Always schedules the highest runnable thread.
    struct Highest;

    impl Scheduler for Highest {
        fn schedule(
            &mut self,
            _prior: Option<(ThreadId, &ThreadAction)>,
            runnable: &BTreeMap<ThreadId, Lookahead>,
        ) -> Option<ThreadId> {
            runnable.keys().next_back().copied()
        }
    }

    /// Refuses to schedule anything.
    struct Refuse;

    impl Scheduler for Refuse {
        fn schedule(
            &mut self,
            _prior: Option<(ThreadId, &ThreadAction)>,
            _runnable: &BTreeMap<ThreadId, Lookahead>,
        ) -> Option<ThreadId> {
            None
        }
    }

    #[test]
    fn trivial_program_returns_its_value() {
        let program = Program::new(|| stop(42));
        let (result, trace) = run_concurrent(&mut Lowest, MemType::SequentialConsistency, &program);
        assert_eq!(result, Ok(42));
        assert_eq!(trace.len(), 1);
        assert_eq!(trace[0].action, ThreadAction::Stop);
    }

    #[test]
    fn fork_and_read_under_sc() {
        let program = Program::new(|| {
            new_ref(0, |r| {
                fork(write_ref(r, 1, stop(0)), move |_child| {
                    read_ref(r, stop)
                })
            })
        });
        // Lowest runs main to completion first: read sees 0.
        let (result, _) = run_concurrent(&mut Lowest, MemType::SequentialConsistency, &program);
        assert_eq!(result, Ok(0));
        // Highest runs the child first after the fork: read sees 1.
        let (result, _) = run_concurrent(&mut Highest, MemType::SequentialConsistency, &program);
        assert_eq!(result, Ok(1));
    }

    #[test]
    fn tso_read_sees_own_buffered_write() {
        let program = Program::new(|| {
            new_ref(0, |r| write_ref(r, 5, read_ref(r, stop)))
        });
        let (result, trace) = run_concurrent(&mut Lowest, MemType::TotalStoreOrder, &program);
        assert_eq!(result, Ok(5));
        // The write was buffered, and a commit thread flushed it eventually
        // or the execution ended with it pending; either way the write step
        // itself is marked buffered.
        let write = trace
            .iter()
            .find(|item| matches!(item.action, ThreadAction::WriteRef { .. }))
            .expect("trace records the write");
        assert_eq!(
            write.action,
            ThreadAction::WriteRef {
                to: crate::types::RefId(0),
                buffered: true
            }
        );
    }

    #[test]
    fn commit_thread_appears_in_alternatives_under_tso() {
        let program = Program::new(|| {
            new_ref(0, |r| write_ref(r, 1, yield_now(stop(0))))
        });
        let (result, trace) = run_concurrent(&mut Lowest, MemType::TotalStoreOrder, &program);
        assert_eq!(result, Ok(0));
        // After the buffered write, a commit thread becomes runnable; the
        // lowest-first scheduler prefers it (commit ids sort below users).
        let tids = scheduled_threads(&trace);
        assert!(
            tids.iter().any(|tid| tid.is_commit()),
            "lowest-first schedule runs the commit thread: {tids:?}"
        );
        assert!(trace.iter().any(|item| item.action.is_commit_ref()));
    }

    #[test]
    fn blocked_take_wakes_on_put() {
        let program = Program::new(|| {
            new_mvar_program()
        });
        fn new_mvar_program() -> Action {
            crate::runtime::program::new_mvar(|m| {
                fork(put_mvar(m, 9, stop(0)), move |_child| take_mvar(m, stop))
            })
        }
        // Main blocks on take first, the child puts and wakes it.
        let (result, trace) = run_concurrent(&mut Lowest, MemType::SequentialConsistency, &program);
        assert_eq!(result, Ok(9));
        assert!(trace
            .iter()
            .any(|item| matches!(item.action, ThreadAction::BlockedTakeMVar(_))));
        let put = trace
            .iter()
            .find(|item| matches!(item.action, ThreadAction::PutMVar(..)))
            .expect("put recorded");
        match &put.action {
            ThreadAction::PutMVar(_, woken) => assert_eq!(woken, &vec![ThreadId::initial()]),
            _ => unreachable!(),
        }
    }

    #[test]
    fn deadlock_when_everyone_blocks() {
        let program = Program::new(|| crate::runtime::program::new_mvar(|m| take_mvar(m, stop)));
        let (result, trace) = run_concurrent(&mut Lowest, MemType::SequentialConsistency, &program);
        assert_eq!(result, Err(Failure::Deadlock));
        assert_eq!(trace.len(), 2);
    }

    #[test]
    fn stm_retry_blocks_then_commit_wakes() {
        let program = Program::with_setup(
            |setup| setup.new_tvar(0),
            |&flag| {
                fork(
                    atomically(
                        move |cx: &mut crate::runtime::stm::StmCtx<'_>| {
                            cx.write(flag, 1);
                            StmOutcome::Done(0)
                        },
                        |_| stop(0),
                    ),
                    move |_child| {
                        atomically(
                            move |cx: &mut crate::runtime::stm::StmCtx<'_>| {
                                if cx.read(flag) == 0 {
                                    StmOutcome::Retry
                                } else {
                                    StmOutcome::Done(cx.read(flag))
                                }
                            },
                            stop,
                        )
                    },
                )
            },
        );
        // Main retries first, the child's commit wakes it.
        let (result, trace) = run_concurrent(&mut Lowest, MemType::SequentialConsistency, &program);
        assert_eq!(result, Ok(1));
        assert!(trace
            .iter()
            .any(|item| matches!(item.action, ThreadAction::BlockedStm(_))));
    }

    #[test]
    fn stm_deadlock_when_main_retries_forever() {
        let program = Program::with_setup(
            |setup| setup.new_tvar(0),
            |&v| {
                atomically(
                    move |cx: &mut crate::runtime::stm::StmCtx<'_>| {
                        let _ = cx.read(v);
                        StmOutcome::Retry
                    },
                    stop,
                )
            },
        );
        let (result, _) = run_concurrent(&mut Lowest, MemType::SequentialConsistency, &program);
        assert_eq!(result, Err(Failure::StmDeadlock));
    }

    #[test]
    fn scheduler_refusal_aborts() {
        let program = Program::new(|| stop(0));
        let (result, trace) = run_concurrent(&mut Refuse, MemType::SequentialConsistency, &program);
        assert_eq!(result, Err(Failure::Abort));
        assert!(trace.is_empty());
    }

    #[test]
    fn uncaught_exception_in_main_ends_the_execution() {
        let program = Program::new(throw);
        let (result, _) = run_concurrent(&mut Lowest, MemType::SequentialConsistency, &program);
        assert_eq!(result, Err(Failure::UncaughtException));
    }

    #[test]
    fn child_exception_only_kills_the_child() {
        let program = Program::new(|| fork(throw(), |_child| stop(3)));
        let (result, _) = run_concurrent(&mut Highest, MemType::SequentialConsistency, &program);
        assert_eq!(result, Ok(3));
    }

    #[test]
    fn snapshot_replay_matches_full_replay() {
        let program = Program::with_setup(
            |setup| setup.new_ref(11),
            |&r| read_ref(r, stop),
        );
        let snapshot = program.snapshot().expect("setup prefix snapshots");
        let (full, full_trace) =
            run_concurrent(&mut Lowest, MemType::SequentialConsistency, &program);
        let (snap, snap_trace) =
            run_with_snapshot(&mut Lowest, MemType::SequentialConsistency, &snapshot);
        assert_eq!(full, snap);
        assert_eq!(full, Ok(11));
        assert_eq!(full_trace, snap_trace);
    }
}
