//! Bound functions: pruning the search space while keeping it honest.
//!
//! Unbounded DPOR is exhaustive but can be astronomically large; bounds
//! trade completeness for budget. Each bound is an incremental check
//! threaded through one execution — given what just happened and what a
//! candidate step would do, it either accepts with an updated accumulator
//! or rejects the step. A step is permitted iff every *enabled* bound
//! accepts.
//!
//! Bounding can hide interleavings plain DPOR would reach, so each bound
//! also augments backtrack placement with *conservative* points that
//! recover reachability at the cost of some redundancy (Coons et al.,
//! "Bounded partial-order reduction").

use crate::sct::dpor::{backtrack_at, place_backtrack, BacktrackCtx, BacktrackFunc, BacktrackStep};
use crate::trace::{Lookahead, ThreadAction};
use crate::types::ThreadId;
use std::collections::BTreeMap;

/// Which bounds are in force. `None` disables a bound.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Bounds {
    /// Maximum number of preemptive context switches.
    pub preemption: Option<usize>,
    /// Maximum difference between any two threads' yield counts.
    pub fair: Option<usize>,
    /// Maximum execution length in primitive steps.
    pub length: Option<usize>,
}

impl Bounds {
    /// No bounds: plain exhaustive DPOR.
    pub const NONE: Self = Self {
        preemption: None,
        fair: None,
        length: None,
    };

    /// True if every bound is disabled.
    #[must_use]
    pub const fn is_unbounded(&self) -> bool {
        self.preemption.is_none() && self.fair.is_none() && self.length.is_none()
    }

    /// The backtrack placement for the composite bound: the first enabled
    /// bound's augmentation wins (preemption, then fair, then length — the
    /// length bound's augmentation is the plain placement).
    #[must_use]
    pub fn backtrack_func(&self) -> BacktrackFunc {
        if self.preemption.is_some() {
            backtrack_preemption
        } else if self.fair.is_some() {
            backtrack_fair
        } else {
            backtrack_at
        }
    }

    /// Checks one candidate step against every enabled bound.
    ///
    /// `prior` is the last executed step, `None` at the start of an
    /// execution. Returns the updated accumulator if the step is within
    /// bounds; `None` rejects it.
    #[must_use]
    pub fn step(
        &self,
        key: &BoundKey,
        prior: Option<(ThreadId, &ThreadAction)>,
        next_tid: ThreadId,
        next: &Lookahead,
    ) -> Option<BoundKey> {
        let mut k = key.clone();

        k.preemptions += preemption_cost(&k, prior, next_tid);
        if !next_tid.is_commit() {
            k.last_user = Some(next_tid);
        }
        if let Some(pb) = self.preemption {
            if k.preemptions > pb {
                return None;
            }
        }

        if !next_tid.is_commit() {
            let count = k.yields.entry(next_tid).or_insert(0);
            if next.will_yield() {
                *count += 1;
            }
        }
        if let Some(fb) = self.fair {
            let max = k.yields.values().max().copied().unwrap_or(0);
            let min = k.yields.values().min().copied().unwrap_or(0);
            if max - min > fb {
                return None;
            }
        }

        k.length += 1;
        if let Some(lb) = self.length {
            if k.length > lb {
                return None;
            }
        }

        Some(k)
    }
}

/// The compound accumulator threaded through one execution:
/// preemption count with the last non-commit thread, yields per thread,
/// and the step count.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoundKey {
    preemptions: usize,
    last_user: Option<ThreadId>,
    yields: BTreeMap<ThreadId, usize>,
    length: usize,
}

impl BoundKey {
    /// Registers threads in the fairness accounting with zero yields.
    ///
    /// The fair bound compares the busiest yielder against the *least*
    /// yielded thread, so threads that exist but have never been scheduled
    /// must still weigh the minimum down. The DPOR scheduler feeds every
    /// runnable user thread through here each step.
    pub fn observe(&mut self, tids: impl IntoIterator<Item = ThreadId>) {
        for tid in tids {
            if !tid.is_commit() {
                self.yields.entry(tid).or_insert(0);
            }
        }
    }

    /// The preemption count so far.
    #[must_use]
    pub const fn preemptions(&self) -> usize {
        self.preemptions
    }

    /// The step count so far.
    #[must_use]
    pub const fn length(&self) -> usize {
        self.length
    }
}

/// Does scheduling `next_tid` cost a preemption?
///
/// A preemption is a switch to a different thread while the previous one
/// could have continued — it neither blocked, yielded, nor terminated.
/// Commit threads are special: entering one is free; leaving one back to
/// the thread it interrupted is free, leaving to anyone else costs one.
fn preemption_cost(
    key: &BoundKey,
    prior: Option<(ThreadId, &ThreadAction)>,
    next_tid: ThreadId,
) -> usize {
    let Some((prior_tid, prior_action)) = prior else {
        return 0;
    };
    if next_tid.is_commit() {
        return 0;
    }
    if prior_tid.is_commit() {
        return usize::from(key.last_user != Some(next_tid));
    }
    if prior_tid == next_tid
        || prior_action.is_blocked()
        || prior_action.will_yield()
        || prior_action.is_terminal()
    {
        0
    } else {
        1
    }
}

/// Preemption-bound placement: every requested point also places a
/// conservative companion at the most recent context-switch boundary — an
/// index whose immediate predecessor ran a different thread, neither frame
/// a commit. Switching there is no costlier than the switch that already
/// happened, so the companion stays within bound.
pub fn backtrack_preemption(ctxs: &mut [BacktrackCtx], steps: &[BacktrackStep]) {
    for step in steps {
        place_backtrack(ctxs, step.index, step.thread, step.conservative);
        if let Some(j) = latest_switch_at_or_before(ctxs, step.index) {
            place_backtrack(ctxs, j, step.thread, true);
        }
    }
}

fn latest_switch_at_or_before(ctxs: &[BacktrackCtx], index: usize) -> Option<usize> {
    (1..=index).rev().find(|&j| {
        let before = ctxs[j - 1].tid;
        let here = ctxs[j].tid;
        before != here && !before.is_commit() && !here.is_commit()
    })
}

/// Fair-bound placement: a requested point whose executed action released
/// a shared resource backtracks to *every* thread runnable there, so
/// fairness cannot hide starvation behind the bound.
pub fn backtrack_fair(ctxs: &mut [BacktrackCtx], steps: &[BacktrackStep]) {
    for step in steps {
        if ctxs[step.index].action.will_release() {
            let runnable: Vec<ThreadId> = ctxs[step.index]
                .runnable
                .keys()
                .filter(|t| **t != ctxs[step.index].tid)
                .copied()
                .collect();
            for thread in runnable {
                place_backtrack(ctxs, step.index, thread, step.conservative);
            }
        } else {
            place_backtrack(ctxs, step.index, step.thread, step.conservative);
        }
    }
}
