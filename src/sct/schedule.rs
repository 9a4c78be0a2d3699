//! Scheduler strategies.
//!
//! Four [`Scheduler`] implementations share the executor:
//!
//! - [`DporScheduler`] replays a schedule prefix chosen from the DPOR tree
//!   and then explores freely — lowest eligible thread first — while
//!   maintaining the sleep set, threading the bound accumulator, and
//!   logging runnable sets for backtrack analysis;
//! - [`RandomScheduler`] draws uniformly from the runnable set;
//! - [`WeightedScheduler`] draws proportionally to per-thread weights
//!   assigned on first sighting, yielding a fixed scheduling policy per
//!   weight generation (a *swarm* member);
//! - [`ReplayScheduler`] replays a recorded schedule verbatim, which is how
//!   a reported trace is reproduced.

use crate::runtime::Scheduler;
use crate::sct::bounds::{BoundKey, Bounds};
use crate::sct::dpor::RunnableMap;
use crate::trace::{dependent, ThreadAction, TraceItem};
use crate::trace::scheduled_threads;
use crate::types::ThreadId;
use crate::util::RandSource;
use std::collections::{BTreeMap, VecDeque};

/// The DPOR-driven scheduler: prefix replay, then bounded free exploration.
#[derive(Debug)]
pub struct DporScheduler {
    prefix: VecDeque<ThreadId>,
    sleep: BTreeMap<ThreadId, ThreadAction>,
    bounds: Bounds,
    key: BoundKey,
    runnable_log: Vec<RunnableMap>,
    ignore: bool,
    abandoned: bool,
    kill_index: Option<usize>,
}

impl DporScheduler {
    /// A scheduler that replays `prefix` with `sleep` in force afterwards.
    #[must_use]
    pub fn new(
        prefix: Vec<ThreadId>,
        sleep: BTreeMap<ThreadId, ThreadAction>,
        bounds: Bounds,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            sleep,
            bounds,
            key: BoundKey::default(),
            runnable_log: Vec::new(),
            ignore: false,
            abandoned: false,
            kill_index: None,
        }
    }

    /// True if the execution should be discarded without being reported:
    /// the prefix was abandoned or every awake thread was asleep.
    #[must_use]
    pub const fn ignore(&self) -> bool {
        self.ignore
    }

    /// True if the prefix could not be replayed — a decision was not
    /// runnable, or a replayed step fell outside the bound. The driver
    /// retires the alternative instead of folding the execution.
    #[must_use]
    pub const fn abandoned(&self) -> bool {
        self.abandoned
    }

    /// The index at which the bound killed the execution, if it did.
    #[must_use]
    pub const fn kill_index(&self) -> Option<usize> {
        self.kill_index
    }

    /// The per-step runnable snapshots recorded during the execution.
    #[must_use]
    pub fn runnable_log(&self) -> &[RunnableMap] {
        &self.runnable_log
    }
}

impl Scheduler for DporScheduler {
    fn schedule(
        &mut self,
        prior: Option<(ThreadId, &ThreadAction)>,
        runnable: &RunnableMap,
    ) -> Option<ThreadId> {
        self.runnable_log.push(runnable.clone());
        self.key.observe(runnable.keys().copied());

        if let Some(tid) = self.prefix.pop_front() {
            if !runnable.contains_key(&tid) {
                tracing::debug!(
                    thread = %tid,
                    "schedule prefix expects a thread that is not runnable; discarding execution"
                );
                self.ignore = true;
                self.abandoned = true;
                return None;
            }
            // A backtrack point can ask for a switch the bound excludes;
            // such a prefix is retired rather than explored over-bound.
            let Some(key) = self.bounds.step(&self.key, prior, tid, &runnable[&tid]) else {
                tracing::debug!(
                    thread = %tid,
                    "replayed prefix step falls outside the bound; discarding execution"
                );
                self.ignore = true;
                self.abandoned = true;
                return None;
            };
            self.key = key;
            return Some(tid);
        }

        // A bound kill took its one extra step last time; end the
        // execution here.
        if self.kill_index.is_some() {
            return None;
        }

        // Free exploration: the sleep set shrinks as executed steps
        // conflict with sleeping entries.
        if let Some((prior_tid, prior_action)) = prior {
            self.sleep
                .retain(|tid, action| !dependent(prior_tid, prior_action, *tid, action));
        }

        let mut fallback = None;
        for (tid, look) in runnable {
            if self.sleep.contains_key(tid) {
                continue;
            }
            if fallback.is_none() {
                fallback = Some(*tid);
            }
            if let Some(key) = self.bounds.step(&self.key, prior, *tid, look) {
                self.key = key;
                return Some(*tid);
            }
        }

        if fallback.is_none() {
            // Every runnable thread leads somewhere already explored.
            self.ignore = true;
            return None;
        }

        // Bound exhausted: mark the kill but pick anyway, so the killed
        // step still lands in the trace for state folding. The execution
        // is dropped after this step.
        self.kill_index = Some(self.runnable_log.len() - 1);
        tracing::debug!(
            step = self.runnable_log.len() - 1,
            "no runnable thread within bounds; taking one step and dropping the execution"
        );
        fallback
    }
}

/// Uniform random scheduling.
#[derive(Debug)]
pub struct RandomScheduler<R> {
    rng: R,
}

impl<R: RandSource> RandomScheduler<R> {
    /// A scheduler drawing uniformly from the runnable set.
    #[must_use]
    pub fn new(rng: R) -> Self {
        Self { rng }
    }
}

impl<R: RandSource> Scheduler for RandomScheduler<R> {
    fn schedule(
        &mut self,
        _prior: Option<(ThreadId, &ThreadAction)>,
        runnable: &RunnableMap,
    ) -> Option<ThreadId> {
        if runnable.is_empty() {
            return None;
        }
        let pick = self.rng.next_in_range(0, runnable.len() as u64 - 1) as usize;
        runnable.keys().nth(pick).copied()
    }
}

/// The weight range threads draw from on first sighting.
const WEIGHT_RANGE: (u64, u64) = (1, 50);

/// Weighted random scheduling with persistent per-thread weights.
#[derive(Debug)]
pub struct WeightedScheduler<R> {
    rng: R,
    weights: BTreeMap<ThreadId, u64>,
}

impl<R: RandSource> WeightedScheduler<R> {
    /// A scheduler with no weights assigned yet.
    #[must_use]
    pub fn new(rng: R) -> Self {
        Self {
            rng,
            weights: BTreeMap::new(),
        }
    }

    /// Discards every weight; the next execution redraws them. The driver
    /// calls this between weight generations.
    pub fn reset_weights(&mut self) {
        self.weights.clear();
    }
}

impl<R: RandSource> Scheduler for WeightedScheduler<R> {
    fn schedule(
        &mut self,
        _prior: Option<(ThreadId, &ThreadAction)>,
        runnable: &RunnableMap,
    ) -> Option<ThreadId> {
        if runnable.is_empty() {
            return None;
        }
        // Weights are drawn the first time a thread shows up runnable.
        for tid in runnable.keys() {
            self.weights
                .entry(*tid)
                .or_insert_with(|| self.rng.next_in_range(WEIGHT_RANGE.0, WEIGHT_RANGE.1));
        }
        let total: u64 = runnable.keys().map(|tid| self.weights[tid]).sum();
        let mut draw = self.rng.next_in_range(1, total);
        for tid in runnable.keys() {
            let weight = self.weights[tid];
            if draw <= weight {
                return Some(*tid);
            }
            draw -= weight;
        }
        // Unreachable: the draw is within the total by construction.
        runnable.keys().next_back().copied()
    }
}

/// Replays a recorded schedule decision-for-decision.
#[derive(Debug)]
pub struct ReplayScheduler {
    decisions: VecDeque<ThreadId>,
    diverged: bool,
}

impl ReplayScheduler {
    /// Replays the scheduled threads of a recorded trace.
    #[must_use]
    pub fn from_trace(trace: &[TraceItem]) -> Self {
        Self::new(scheduled_threads(trace))
    }

    /// Replays an explicit thread sequence.
    #[must_use]
    pub fn new(decisions: Vec<ThreadId>) -> Self {
        Self {
            decisions: decisions.into(),
            diverged: false,
        }
    }

    /// True if replay hit a decision that was not runnable.
    #[must_use]
    pub const fn diverged(&self) -> bool {
        self.diverged
    }
}

impl Scheduler for ReplayScheduler {
    fn schedule(
        &mut self,
        _prior: Option<(ThreadId, &ThreadAction)>,
        runnable: &RunnableMap,
    ) -> Option<ThreadId> {
        let tid = self.decisions.pop_front()?;
        if runnable.contains_key(&tid) {
            Some(tid)
        } else {
            self.diverged = true;
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::Lookahead;
    use crate::util::DetRng;

    fn t(n: i32) -> ThreadId {
        ThreadId::new(n)
    }

    fn runnable(tids: &[i32]) -> RunnableMap {
        tids.iter().map(|n| (t(*n), Lookahead::WillStop)).collect()
    }

    #[test]
    fn dpor_scheduler_replays_its_prefix() {
        let mut sched = DporScheduler::new(vec![t(1), t(0)], BTreeMap::new(), Bounds::NONE);
        assert_eq!(sched.schedule(None, &runnable(&[0, 1])), Some(t(1)));
        let action = ThreadAction::Yield;
        assert_eq!(
            sched.schedule(Some((t(1), &action)), &runnable(&[0, 1])),
            Some(t(0))
        );
        assert_eq!(sched.runnable_log().len(), 2);
        assert!(!sched.ignore());
    }

    #[test]
    fn dpor_scheduler_ignores_on_bad_prefix() {
        let mut sched = DporScheduler::new(vec![t(7)], BTreeMap::new(), Bounds::NONE);
        assert_eq!(sched.schedule(None, &runnable(&[0])), None);
        assert!(sched.ignore());
        assert!(sched.abandoned());
    }

    #[test]
    fn dpor_scheduler_picks_lowest_awake_thread() {
        let mut sleep = BTreeMap::new();
        sleep.insert(t(0), ThreadAction::Yield);
        let mut sched = DporScheduler::new(Vec::new(), sleep, Bounds::NONE);
        assert_eq!(sched.schedule(None, &runnable(&[0, 1, 2])), Some(t(1)));
    }

    #[test]
    fn dpor_scheduler_ignores_when_everyone_sleeps() {
        let mut sleep = BTreeMap::new();
        sleep.insert(t(0), ThreadAction::Yield);
        let mut sched = DporScheduler::new(Vec::new(), sleep, Bounds::NONE);
        assert_eq!(sched.schedule(None, &runnable(&[0])), None);
        assert!(sched.ignore());
        assert!(!sched.abandoned());
        assert!(sched.kill_index().is_none());
    }

    #[test]
    fn sleeping_thread_wakes_on_dependent_step() {
        let mut sleep = BTreeMap::new();
        sleep.insert(t(1), ThreadAction::ReadRef(crate::types::RefId(0)));
        let mut sched = DporScheduler::new(Vec::new(), sleep, Bounds::NONE);
        // A write to the same ref is dependent with the sleeping read, so
        // t1 wakes and is schedulable again.
        let write = ThreadAction::WriteRef {
            to: crate::types::RefId(0),
            buffered: false,
        };
        assert_eq!(
            sched.schedule(Some((t(0), &write)), &runnable(&[1])),
            Some(t(1))
        );
    }

    #[test]
    fn bound_kill_picks_anyway_then_ends_the_execution() {
        let bounds = Bounds {
            length: Some(0),
            ..Bounds::NONE
        };
        let mut sched = DporScheduler::new(Vec::new(), BTreeMap::new(), bounds);
        // The killed step is still scheduled so it lands in the trace.
        assert_eq!(sched.schedule(None, &runnable(&[0])), Some(t(0)));
        assert!(!sched.ignore());
        assert_eq!(sched.kill_index(), Some(0));
        // The next scheduling point ends the execution.
        let action = ThreadAction::Yield;
        assert_eq!(sched.schedule(Some((t(0), &action)), &runnable(&[0])), None);
        assert_eq!(sched.kill_index(), Some(0));
    }

    #[test]
    fn over_bound_prefix_is_abandoned() {
        let bounds = Bounds {
            preemption: Some(0),
            ..Bounds::NONE
        };
        let mut sched = DporScheduler::new(vec![t(0), t(1)], BTreeMap::new(), bounds);
        assert_eq!(sched.schedule(None, &runnable(&[0, 1])), Some(t(0)));
        // Replaying the switch to t1 would cost a preemption the bound
        // does not allow; the prefix is retired, not explored.
        let read = ThreadAction::ReadRef(crate::types::RefId(0));
        assert_eq!(sched.schedule(Some((t(0), &read)), &runnable(&[0, 1])), None);
        assert!(sched.abandoned());
        assert!(sched.ignore());
        assert!(sched.kill_index().is_none());
    }

    #[test]
    fn uniform_scheduler_stays_in_range_and_is_deterministic() {
        let runnable = runnable(&[0, 1, 2]);
        let mut a = RandomScheduler::new(DetRng::new(11));
        let mut b = RandomScheduler::new(DetRng::new(11));
        for _ in 0..50 {
            let pick_a = a.schedule(None, &runnable).expect("non-empty");
            let pick_b = b.schedule(None, &runnable).expect("non-empty");
            assert_eq!(pick_a, pick_b);
            assert!(runnable.contains_key(&pick_a));
        }
    }

    #[test]
    fn weighted_scheduler_same_seed_same_choices() {
        let runnable = runnable(&[0, 1, 2]);
        let mut a = WeightedScheduler::new(DetRng::new(5));
        let mut b = WeightedScheduler::new(DetRng::new(5));
        for _ in 0..50 {
            assert_eq!(a.schedule(None, &runnable), b.schedule(None, &runnable));
        }
    }

    #[test]
    fn weight_reset_changes_the_policy_stream() {
        let runnable = runnable(&[0, 1, 2]);
        let mut a = WeightedScheduler::new(DetRng::new(5));
        let mut b = WeightedScheduler::new(DetRng::new(5));
        let _ = a.schedule(None, &runnable);
        let _ = b.schedule(None, &runnable);
        b.reset_weights();
        // After a reset the rng redraws weights, so the streams diverge in
        // general; at minimum both stay within the runnable set.
        for _ in 0..10 {
            assert!(runnable.contains_key(&b.schedule(None, &runnable).expect("non-empty")));
        }
    }

    #[test]
    fn replay_scheduler_follows_the_recording() {
        let mut sched = ReplayScheduler::new(vec![t(0), t(1)]);
        assert_eq!(sched.schedule(None, &runnable(&[0, 1])), Some(t(0)));
        let action = ThreadAction::Yield;
        assert_eq!(
            sched.schedule(Some((t(0), &action)), &runnable(&[0, 1])),
            Some(t(1))
        );
        assert!(!sched.diverged());
    }

    #[test]
    fn replay_scheduler_flags_divergence() {
        let mut sched = ReplayScheduler::new(vec![t(5)]);
        assert_eq!(sched.schedule(None, &runnable(&[0])), None);
        assert!(sched.diverged());
    }
}
