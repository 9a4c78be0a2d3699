//! Systematic concurrency testing: the exploration layer.
//!
//! This module ties the pieces together: the DPOR tree ([`dpor`]), bound
//! functions ([`bounds`]), scheduler strategies ([`schedule`]), the lazy
//! driver ([`driver`]), and configuration ([`settings`]), behind the entry
//! points callers actually use:
//!
//! - [`run_sct`] / [`run_sct_discard`] / [`run_sct_with_settings`] — lazy
//!   sequences of `(result, trace)` pairs;
//! - [`results_set`] — deduplicated results only;
//! - [`sct_bound`], [`sct_uniform_random`], [`sct_weighted_random`] —
//!   sugar for the three ways;
//! - `*_strict` variants that collect the whole sequence before returning.
//!
//! ```ignore
//! use weft::program::{self, Program};
//! use weft::{results_set, Bounds, MemType, Way};
//!
//! let program = Program::with_setup(
//!     |setup| setup.new_ref(0),
//!     |&r| program::read_ref(r, program::stop),
//! );
//! let results = results_set(Way::systematic(Bounds::NONE), MemType::default(), program);
//! assert_eq!(results.into_iter().collect::<Vec<_>>(), vec![Ok(0)]);
//! ```

pub mod bounds;
pub mod dpor;
pub mod driver;
pub mod schedule;
pub mod settings;

pub use bounds::{BoundKey, Bounds};
pub use dpor::{
    backtrack_at, backtrack_contexts, find_backtrack_steps, BacktrackCtx, BacktrackFunc,
    BacktrackStep, DporTree, SchedulePrefix,
};
pub use driver::SctRunner;
pub use schedule::{DporScheduler, RandomScheduler, ReplayScheduler, WeightedScheduler};
pub use settings::{Discard, DiscardFn, Settings, Way};

use crate::runtime::Program;
use crate::trace::Trace;
use crate::types::{ExecResult, MemType};
use std::collections::BTreeSet;

/// Explores the program, yielding every reportable `(result, trace)` pair
/// lazily.
#[must_use]
pub fn run_sct(way: Way, memtype: MemType, program: Program) -> SctRunner {
    run_sct_with_settings(Settings::new(way, memtype), program)
}

/// [`run_sct`] with a discard policy applied before yielding.
#[must_use]
pub fn run_sct_discard(
    discard: impl Fn(&ExecResult) -> Option<Discard> + 'static,
    way: Way,
    memtype: MemType,
    program: Program,
) -> SctRunner {
    run_sct_with_settings(Settings::new(way, memtype).with_discard(discard), program)
}

/// The primitive form: explore under explicit [`Settings`].
#[must_use]
pub fn run_sct_with_settings(settings: Settings, program: Program) -> SctRunner {
    SctRunner::new(settings, program)
}

/// The set of distinct results, traces dropped.
#[must_use]
pub fn results_set(way: Way, memtype: MemType, program: Program) -> BTreeSet<ExecResult> {
    run_sct_discard(|_| Some(Discard::Trace), way, memtype, program)
        .map(|(result, _)| result)
        .collect()
}

/// Systematic exploration under the given bounds.
#[must_use]
pub fn sct_bound(memtype: MemType, bounds: Bounds, program: Program) -> SctRunner {
    run_sct(Way::Systematic(bounds), memtype, program)
}

/// `n` executions under uniform random scheduling.
#[must_use]
pub fn sct_uniform_random(memtype: MemType, seed: u64, n: usize, program: Program) -> SctRunner {
    run_sct(Way::uniform(seed, n), memtype, program)
}

/// `n` executions under weighted random scheduling, redrawing weights
/// every `reuse` executions.
#[must_use]
pub fn sct_weighted_random(
    memtype: MemType,
    seed: u64,
    n: usize,
    reuse: usize,
    program: Program,
) -> SctRunner {
    run_sct(Way::weighted(seed, n, reuse), memtype, program)
}

// Strict variants: in a strict language the lazy/strict distinction is
// collect-on-return.

/// [`run_sct`], fully evaluated before returning.
#[must_use]
pub fn run_sct_strict(way: Way, memtype: MemType, program: Program) -> Vec<(ExecResult, Trace)> {
    run_sct(way, memtype, program).collect()
}

/// [`run_sct_discard`], fully evaluated before returning.
#[must_use]
pub fn run_sct_discard_strict(
    discard: impl Fn(&ExecResult) -> Option<Discard> + 'static,
    way: Way,
    memtype: MemType,
    program: Program,
) -> Vec<(ExecResult, Trace)> {
    run_sct_discard(discard, way, memtype, program).collect()
}

/// [`run_sct_with_settings`], fully evaluated before returning.
#[must_use]
pub fn run_sct_with_settings_strict(
    settings: Settings,
    program: Program,
) -> Vec<(ExecResult, Trace)> {
    run_sct_with_settings(settings, program).collect()
}
