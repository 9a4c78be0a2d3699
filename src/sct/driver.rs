//! The exploration driver.
//!
//! [`SctRunner`] is a lazy iterator over `(result, trace)` pairs: each
//! `next()` call runs executions until one is reportable, so the caller
//! controls how many executions actually happen by how far it consumes the
//! sequence. The driver owns everything that survives between executions —
//! the DPOR tree for systematic exploration, the generator and weights for
//! the random ways — and folds every finished trace back into that state
//! before deciding whether to yield it.
//!
//! Executions can be *suppressed*: a structurally failed or over-bound
//! prefix replay, a sleep-blocked run, or a bound-killed run produce
//! nothing reportable, and the driver moves on after recording what it
//! learned. A bound kill still takes one extra step — the scheduler picks
//! a thread anyway so the killed step lands in the trace — and the trace
//! folds into the tree with backtrack computation pruned at the kill
//! index, but the execution itself is silently dropped with a diagnostic
//! rather than reported.

use crate::runtime::{run_concurrent, run_with_snapshot, Program, Scheduler, Snapshot};
use crate::sct::bounds::Bounds;
use crate::sct::dpor::{backtrack_contexts, find_backtrack_steps, DporTree, RunnableMap};
use crate::sct::schedule::{DporScheduler, RandomScheduler, WeightedScheduler};
use crate::sct::settings::{Discard, Settings, Way};
use crate::trace::Trace;
use crate::types::{ExecResult, MemType, ThreadId};
use crate::util::DetRng;

enum ExecSource {
    Full(Program),
    Snapshot(Snapshot),
}

enum Strategy {
    Systematic {
        tree: DporTree,
        bounds: Bounds,
    },
    Uniform {
        sched: RandomScheduler<DetRng>,
        remaining: usize,
    },
    Weighted {
        sched: WeightedScheduler<DetRng>,
        remaining: usize,
        reuse: usize,
        ran: usize,
    },
}

enum StepResult {
    Exhausted,
    Suppressed,
    Produced(ExecResult, Trace),
}

/// A lazy sequence of explored executions.
pub struct SctRunner {
    settings: Settings,
    source: ExecSource,
    strategy: Strategy,
}

impl SctRunner {
    /// Builds a runner for the program under the given settings.
    #[must_use]
    pub fn new(settings: Settings, program: Program) -> Self {
        let source = if program.can_snapshot() {
            match program.snapshot() {
                Ok(snapshot) => ExecSource::Snapshot(snapshot),
                Err(err) => {
                    settings.debug(&format!(
                        "snapshot capture failed ({err}); falling back to full replay"
                    ));
                    ExecSource::Full(program)
                }
            }
        } else {
            ExecSource::Full(program)
        };

        let strategy = match settings.way() {
            Way::Systematic(bounds) => Strategy::Systematic {
                tree: DporTree::new(initial_runnable(&source)),
                bounds,
            },
            Way::Uniform { seed, limit } => Strategy::Uniform {
                sched: RandomScheduler::new(DetRng::new(seed)),
                remaining: limit,
            },
            Way::Weighted { seed, limit, reuse } => Strategy::Weighted {
                sched: WeightedScheduler::new(DetRng::new(seed)),
                remaining: limit,
                reuse: reuse.max(1),
                ran: 0,
            },
        };

        Self {
            settings,
            source,
            strategy,
        }
    }
}

fn initial_runnable(source: &ExecSource) -> RunnableMap {
    let lookahead = match source {
        ExecSource::Full(program) => program.initial_lookahead(),
        ExecSource::Snapshot(snapshot) => snapshot.initial_lookahead(),
    };
    let mut map = RunnableMap::new();
    map.insert(ThreadId::initial(), lookahead);
    map
}

fn run_once<S: Scheduler>(
    source: &ExecSource,
    memtype: MemType,
    sched: &mut S,
) -> (ExecResult, Trace) {
    match source {
        ExecSource::Full(program) => run_concurrent(sched, memtype, program),
        ExecSource::Snapshot(snapshot) => run_with_snapshot(sched, memtype, snapshot),
    }
}

fn systematic_step(
    settings: &Settings,
    source: &ExecSource,
    tree: &mut DporTree,
    bounds: Bounds,
) -> StepResult {
    let Some(sp) = tree.find_schedule_prefix() else {
        return StepResult::Exhausted;
    };
    let mut sched = DporScheduler::new(sp.prefix.clone(), sp.sleep.clone(), bounds);
    let (result, trace) = run_once(source, settings.memtype(), &mut sched);

    if sched.abandoned() || trace.len() < sp.prefix.len() {
        // The chosen alternative never executed, so folding the trace
        // would not retire it; move it to done directly.
        settings.debug("schedule prefix did not complete; abandoning it");
        tree.abandon_prefix(&sp.prefix);
        return StepResult::Suppressed;
    }

    let runnables = sched.runnable_log();
    tree.incorporate_trace(sp.conservative, &trace, runnables);
    let mut ctxs = backtrack_contexts(&trace, runnables);
    find_backtrack_steps(&mut ctxs, bounds.backtrack_func(), sched.kill_index());
    tree.incorporate_backtrack_steps(&ctxs);

    if sched.ignore() {
        return StepResult::Suppressed;
    }
    if let Some(index) = sched.kill_index() {
        settings.debug(&format!("bound exhausted at step {index}; dropping execution"));
        return StepResult::Suppressed;
    }
    StepResult::Produced(result, trace)
}

impl Iterator for SctRunner {
    type Item = (ExecResult, Trace);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let produced = match &mut self.strategy {
                Strategy::Systematic { tree, bounds } => {
                    let bounds = *bounds;
                    systematic_step(&self.settings, &self.source, tree, bounds)
                }
                Strategy::Uniform { sched, remaining } => {
                    if *remaining == 0 {
                        StepResult::Exhausted
                    } else {
                        *remaining -= 1;
                        let (result, trace) =
                            run_once(&self.source, self.settings.memtype(), sched);
                        StepResult::Produced(result, trace)
                    }
                }
                Strategy::Weighted {
                    sched,
                    remaining,
                    reuse,
                    ran,
                } => {
                    if *remaining == 0 {
                        StepResult::Exhausted
                    } else {
                        *remaining -= 1;
                        if *ran > 0 && *ran % *reuse == 0 {
                            sched.reset_weights();
                        }
                        *ran += 1;
                        let (result, trace) =
                            run_once(&self.source, self.settings.memtype(), sched);
                        StepResult::Produced(result, trace)
                    }
                }
            };

            match produced {
                StepResult::Exhausted => return None,
                StepResult::Suppressed => continue,
                StepResult::Produced(result, trace) => match self.settings.discard_of(&result) {
                    Some(Discard::ResultAndTrace) => {
                        self.settings
                            .debug(&format!("discarding {}", self.settings.show(&result)));
                        continue;
                    }
                    Some(Discard::Trace) => return Some((result, Vec::new())),
                    None => return Some((result, trace)),
                },
            }
        }
    }
}

impl core::fmt::Debug for SctRunner {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SctRunner")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
