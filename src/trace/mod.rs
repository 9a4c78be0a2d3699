//! Execution traces.
//!
//! A [`Trace`] is the ordered record of one execution: for every primitive
//! step, the scheduling decision that was taken, the alternative decisions
//! that were available, and the action the scheduled thread performed.
//! Traces are both the engine's output (each reported result carries the
//! schedule that produced it) and its input for analysis: backtrack
//! computation walks them, and replaying a trace's decisions reproduces its
//! result exactly.
//!
//! # Submodules
//!
//! - [`action`]: what threads do ([`ThreadAction`]) and are about to do
//!   ([`Lookahead`])
//! - [`dependency`]: the commutativity relation partial-order reduction
//!   prunes with

pub mod action;
pub mod dependency;

pub use action::{Lookahead, ThreadAction};
pub use dependency::{dependent, dependent_lookahead};

use crate::types::{Decision, ThreadId};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// One recorded step of an execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceItem {
    /// The decision the scheduler took.
    pub decision: Decision,
    /// Decisions that were available but not taken, lowest thread first.
    pub alternatives: SmallVec<[Decision; 4]>,
    /// What the scheduled thread did.
    pub action: ThreadAction,
}

/// The ordered record of one execution.
pub type Trace = Vec<TraceItem>;

/// Resolves each step's decision to the concrete thread it scheduled.
///
/// The returned sequence has one entry per trace item. Feeding it back as a
/// schedule prefix reproduces the execution.
#[must_use]
pub fn scheduled_threads(trace: &[TraceItem]) -> Vec<ThreadId> {
    let mut prior = None;
    let mut tids = Vec::with_capacity(trace.len());
    for item in trace {
        // A well-formed trace starts with Start, so target always resolves.
        let tid = item
            .decision
            .target(prior)
            .expect("trace begins with a Start decision");
        tids.push(tid);
        prior = Some(tid);
    }
    tids
}

/// A JSON summary of a trace, for artifact capture and debugging.
///
/// The summary carries the resolved schedule and per-step actions; it is a
/// human-oriented projection, not a replay format (the trace itself
/// round-trips through serde for that).
#[must_use]
pub fn trace_to_json(trace: &[TraceItem]) -> serde_json::Value {
    use serde_json::json;

    let tids = scheduled_threads(trace);
    json!({
        "len": trace.len(),
        "schedule": tids.iter().map(|t| t.to_string()).collect::<Vec<_>>(),
        "steps": trace
            .iter()
            .zip(&tids)
            .map(|(item, tid)| {
                json!({
                    "thread": tid.to_string(),
                    "decision": item.decision.to_string(),
                    "alternatives": item.alternatives.len(),
                    "action": format!("{:?}", item.action),
                })
            })
            .collect::<Vec<_>>(),
    })
}
