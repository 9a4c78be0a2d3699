//! Weft: systematic concurrency testing.
//!
//! Weft runs a small concurrent program — written against an explicit
//! primitive DSL of threads, shared refs, MVars, and transactions — under
//! *every* meaningfully different interleaving, or under a random sample
//! of them, and reports each distinct outcome together with the schedule
//! that produced it. Redundant interleavings are pruned with bounded
//! dynamic partial-order reduction: two executions that differ only in the
//! order of independent steps count as one.
//!
//! # How it fits together
//!
//! - [`program`]: the DSL programs are written in, plus setup snapshots
//! - [`runtime`]: the deterministic executor and memory-model simulation
//!   (sequential consistency, TSO, PSO with phantom commit threads)
//! - [`trace`]: recorded executions and the dependency relation
//! - [`sct`]: the DPOR tree, bounds, schedulers, and the exploration
//!   driver behind [`run_sct`] and friends
//!
//! # Example
//!
//! ```ignore
//! use weft::program::{self, Program};
//! use weft::{results_set, Bounds, MemType, Way};
//!
//! // Two threads increment a shared ref non-atomically; the main thread
//! // reads it. Depending on scheduling the read sees 0, 1, or 2.
//! let program = Program::with_setup(
//!     |setup| setup.new_ref(0),
//!     |&r| {
//!         let incr = |r| program::read_ref(r, move |v| program::write_ref(r, v + 1, program::stop(0)));
//!         program::fork(incr(r), move |_| {
//!             program::fork(incr(r), move |_| program::read_ref(r, program::stop))
//!         })
//!     },
//! );
//!
//! let results = results_set(Way::systematic(Bounds::NONE), MemType::default(), program);
//! assert_eq!(results.len(), 3);
//! ```
//!
//! # Determinism
//!
//! Everything is deterministic: the executor is single-threaded and
//! cooperative, random ways draw from a seeded generator, and every
//! reported trace replays to its reported result (see
//! [`ReplayScheduler`]).

pub mod runtime;
pub mod sct;
pub mod trace;
pub mod types;
pub mod util;

pub use runtime::program;
pub use runtime::{run_concurrent, run_with_snapshot, Program, Scheduler, Snapshot, SnapshotError};
pub use sct::{
    results_set, run_sct, run_sct_discard, run_sct_discard_strict, run_sct_strict,
    run_sct_with_settings, run_sct_with_settings_strict, sct_bound, sct_uniform_random,
    sct_weighted_random, Bounds, Discard, DporScheduler, RandomScheduler, ReplayScheduler,
    SctRunner, Settings, Way, WeightedScheduler,
};
pub use trace::{Lookahead, ThreadAction, Trace, TraceItem};
pub use types::{Decision, ExecResult, Failure, MVarId, MemType, RefId, TVarId, ThreadId, Val};
pub use util::{DetRng, RandSource};
