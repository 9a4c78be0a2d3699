//! The DPOR exploration tree.
//!
//! Dynamic partial-order reduction explores one execution, analyses its
//! trace for *races* — pairs of dependent steps that could have run in the
//! other order — and schedules alternative executions from the points where
//! the order mattered. This module holds the state that survives between
//! executions:
//!
//! - the **tree**: a trie keyed by decision prefixes, where each node
//!   remembers who was runnable, which alternatives still need exploring
//!   (*to-do*), which were already explored (*done*/*taken*), and which are
//!   known redundant (*sleep*);
//! - **backtrack computation**: walking a finished trace to find, per
//!   index, the threads whose pending step conflicts with something that
//!   ran later, and merging those requirements back into the tree.
//!
//! Nodes live in a growable arena; edges are thread-keyed maps. Exhausted
//! subtrees are unlinked during prefix search, which keeps the live tree at
//! the frontier of exploration.
//!
//! # References
//!
//! - Flanagan & Godefroid, "Dynamic partial-order reduction" (POPL 2005)
//! - Coons, Musuvathi & McKinley, "Bounded partial-order reduction"
//!   (OOPSLA 2013)

use crate::trace::{dependent, dependent_lookahead, scheduled_threads, Lookahead, ThreadAction};
use crate::trace::TraceItem;
use crate::types::ThreadId;
use std::collections::{BTreeMap, BTreeSet};

/// A runnable-set snapshot per scheduling point, tid → lookahead.
pub type RunnableMap = BTreeMap<ThreadId, Lookahead>;

/// A backtrack requirement: explore `thread` from trace index `index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BacktrackStep {
    /// Index into the trace this requirement applies to.
    pub index: usize,
    /// Whether the requirement came from a bound's conservative
    /// augmentation rather than an observed race.
    pub conservative: bool,
    /// The thread to explore from that index.
    pub thread: ThreadId,
}

/// Per-index context for backtrack placement: what ran, who could have.
#[derive(Debug, Clone)]
pub struct BacktrackCtx {
    /// The thread that executed this step.
    pub tid: ThreadId,
    /// The action it performed.
    pub action: ThreadAction,
    /// The runnable set before the step.
    pub runnable: RunnableMap,
    /// Requirements placed at this index, thread → conservative flag.
    pub backtracks: BTreeMap<ThreadId, bool>,
}

/// Builds backtrack contexts by pairing a trace with the scheduler's
/// runnable-set log. The log may run one entry long (a final scheduling
/// call that produced no step); the extra entry is ignored.
#[must_use]
pub fn backtrack_contexts(trace: &[TraceItem], runnables: &[RunnableMap]) -> Vec<BacktrackCtx> {
    let tids = scheduled_threads(trace);
    trace
        .iter()
        .zip(runnables)
        .zip(tids)
        .map(|((item, runnable), tid)| BacktrackCtx {
            tid,
            action: item.action.clone(),
            runnable: runnable.clone(),
            backtracks: BTreeMap::new(),
        })
        .collect()
}

/// Places one backtrack requirement, honouring runnability.
///
/// If the requested thread is not runnable at the index, the requirement
/// widens to every other runnable thread there — someone has to run first
/// before the requested thread can.
pub fn place_backtrack(ctxs: &mut [BacktrackCtx], index: usize, thread: ThreadId, conservative: bool) {
    let ctx = &mut ctxs[index];
    if ctx.runnable.contains_key(&thread) {
        ctx.backtracks
            .entry(thread)
            .and_modify(|c| *c = *c && conservative)
            .or_insert(conservative);
    } else {
        let others: Vec<ThreadId> = ctx
            .runnable
            .keys()
            .filter(|t| **t != ctx.tid)
            .copied()
            .collect();
        for t in others {
            ctx.backtracks
                .entry(t)
                .and_modify(|c| *c = *c && conservative)
                .or_insert(conservative);
        }
    }
}

/// The plain backtrack function: place every requirement as requested.
pub fn backtrack_at(ctxs: &mut [BacktrackCtx], steps: &[BacktrackStep]) {
    for step in steps {
        place_backtrack(ctxs, step.index, step.thread, step.conservative);
    }
}

/// A function that places requirements into contexts, possibly augmenting
/// them (bounds add conservative companions).
pub type BacktrackFunc = fn(&mut [BacktrackCtx], &[BacktrackStep]);

/// Computes backtrack requirements for a finished trace and places them.
///
/// For each index `i` and each thread `u` runnable but not chosen there,
/// `u` must be explored from `i` if its pending step is dependent with an
/// action another thread executed at `j ≥ i` before `u` next ran. The
/// initial thread's terminal step counts as dependent with every pending
/// step: it ends the execution, cutting those steps off, so behaviour
/// reachable only by letting the thread run first would otherwise never be
/// discovered. A bound kill at `kill_index` prunes indices at or past it —
/// the bound proved them unreachable within budget.
pub fn find_backtrack_steps(
    ctxs: &mut [BacktrackCtx],
    backtrack: BacktrackFunc,
    kill_index: Option<usize>,
) {
    let limit = kill_index.unwrap_or(ctxs.len()).min(ctxs.len());
    let mut steps = Vec::new();
    for i in 0..limit {
        let chosen = ctxs[i].tid;
        for (&u, look) in &ctxs[i].runnable {
            if u == chosen {
                continue;
            }
            for ctx in &ctxs[i..] {
                if ctx.tid == u {
                    break;
                }
                let cuts_off = ctx.tid == ThreadId::initial() && ctx.action.is_terminal();
                if cuts_off || dependent_lookahead(u, look, ctx.tid, &ctx.action) {
                    steps.push(BacktrackStep {
                        index: i,
                        conservative: false,
                        thread: u,
                    });
                    break;
                }
            }
        }
    }
    backtrack(ctxs, &steps);
}

/// The prefix chosen for the next execution.
#[derive(Debug, Clone)]
pub struct SchedulePrefix {
    /// Decisions to replay, ending with the to-do alternative.
    pub prefix: Vec<ThreadId>,
    /// Whether the alternative is a bound-conservative point.
    pub conservative: bool,
    /// The sleep set in force once the prefix has been replayed.
    pub sleep: BTreeMap<ThreadId, ThreadAction>,
}

#[derive(Debug, Default)]
struct Node {
    runnable: RunnableMap,
    children: BTreeMap<ThreadId, usize>,
    todo: BTreeMap<ThreadId, bool>,
    done: BTreeSet<ThreadId>,
    taken: BTreeMap<ThreadId, ThreadAction>,
    sleep: BTreeMap<ThreadId, ThreadAction>,
}

/// The exploration tree: a trie over decision prefixes.
#[derive(Debug)]
pub struct DporTree {
    nodes: Vec<Node>,
}

impl DporTree {
    const ROOT: usize = 0;

    /// A fresh tree whose root will explore the initial thread first.
    #[must_use]
    pub fn new(initial: RunnableMap) -> Self {
        let mut root = Node {
            runnable: initial,
            ..Node::default()
        };
        root.todo.insert(ThreadId::initial(), false);
        Self { nodes: vec![root] }
    }

    fn alloc(&mut self, runnable: RunnableMap, sleep: BTreeMap<ThreadId, ThreadAction>) -> usize {
        self.nodes.push(Node {
            runnable,
            sleep,
            ..Node::default()
        });
        self.nodes.len() - 1
    }

    /// Picks the leftmost-deepest unexplored alternative, or `None` when
    /// the tree is exhausted. Exhausted subtrees are unlinked on the way.
    pub fn find_schedule_prefix(&mut self) -> Option<SchedulePrefix> {
        let mut path = Vec::new();
        self.search(Self::ROOT, &mut path)
    }

    fn search(&mut self, node: usize, path: &mut Vec<ThreadId>) -> Option<SchedulePrefix> {
        let children: Vec<(ThreadId, usize)> = self.nodes[node]
            .children
            .iter()
            .map(|(tid, idx)| (*tid, *idx))
            .collect();
        for (tid, child) in children {
            path.push(tid);
            if let Some(found) = self.search(child, path) {
                return Some(found);
            }
            path.pop();
            // Subtree exhausted: unlink it so search stays at the frontier.
            self.nodes[node].children.remove(&tid);
        }
        let here = &self.nodes[node];
        if let Some((&tid, &conservative)) = here.todo.iter().next() {
            let mut sleep = here.sleep.clone();
            for (t, action) in &here.taken {
                sleep.entry(*t).or_insert_with(|| action.clone());
            }
            sleep.remove(&tid);
            let mut prefix = path.clone();
            prefix.push(tid);
            return Some(SchedulePrefix {
                prefix,
                conservative,
                sleep,
            });
        }
        None
    }

    /// Folds one executed trace into the tree.
    ///
    /// Walks the decision path, materialising nodes for the novel suffix.
    /// The taken decision at each node moves from to-do to taken/done, and
    /// the sleep set threads down the novel suffix, dropping entries that
    /// are dependent with each executed step. Conservative explorations
    /// start the threaded sleep empty — sleep reasoning is not sound
    /// across bound-induced branches.
    pub fn incorporate_trace(
        &mut self,
        conservative: bool,
        trace: &[TraceItem],
        runnables: &[RunnableMap],
    ) {
        let tids = scheduled_threads(trace);
        let mut cur = Self::ROOT;
        let mut diverged = false;
        let mut sleep: BTreeMap<ThreadId, ThreadAction> = BTreeMap::new();

        for (i, item) in trace.iter().enumerate() {
            let tid = tids[i];
            let action = &item.action;

            self.nodes[cur].todo.remove(&tid);
            self.nodes[cur].done.insert(tid);
            self.nodes[cur]
                .taken
                .entry(tid)
                .or_insert_with(|| action.clone());

            let next = match self.nodes[cur].children.get(&tid) {
                Some(&idx) => idx,
                None => {
                    if !diverged {
                        diverged = true;
                        sleep = if conservative {
                            BTreeMap::new()
                        } else {
                            let node = &self.nodes[cur];
                            let mut s = node.sleep.clone();
                            for (t, a) in &node.taken {
                                if *t != tid {
                                    s.entry(*t).or_insert_with(|| a.clone());
                                }
                            }
                            s.remove(&tid);
                            s
                        };
                    }
                    sleep.retain(|t, a| !dependent(tid, action, *t, a));
                    let runnable = runnables.get(i + 1).cloned().unwrap_or_default();
                    let idx = self.alloc(runnable, sleep.clone());
                    self.nodes[cur].children.insert(tid, idx);
                    idx
                }
            };
            cur = next;
        }
    }

    /// Merges placed backtrack requirements into to-do sets along the
    /// trace's node path, honouring the sleep-set discipline: threads
    /// already explored, sleeping, or unrunnable at a node are skipped.
    /// Conservative flags combine by AND, so an observed race upgrades a
    /// conservative entry.
    pub fn incorporate_backtrack_steps(&mut self, ctxs: &[BacktrackCtx]) {
        let mut cur = Self::ROOT;
        for ctx in ctxs {
            let node = &mut self.nodes[cur];
            for (&thread, &conservative) in &ctx.backtracks {
                if node.done.contains(&thread)
                    || node.sleep.contains_key(&thread)
                    || !node.runnable.contains_key(&thread)
                {
                    continue;
                }
                node.todo
                    .entry(thread)
                    .and_modify(|c| *c = *c && conservative)
                    .or_insert(conservative);
            }
            let Some(&next) = self.nodes[cur].children.get(&ctx.tid) else {
                break;
            };
            cur = next;
        }
    }

    /// Retires a prefix whose execution produced nothing to fold: the
    /// chosen alternative moves straight to done so it is never re-picked.
    /// Used when prefix replay failed structurally or a bound killed the
    /// execution before its first step.
    pub fn abandon_prefix(&mut self, prefix: &[ThreadId]) {
        let Some((last, path)) = prefix.split_last() else {
            return;
        };
        let mut cur = Self::ROOT;
        for tid in path {
            let Some(&next) = self.nodes[cur].children.get(tid) else {
                return;
            };
            cur = next;
        }
        self.nodes[cur].todo.remove(last);
        self.nodes[cur].done.insert(*last);
    }

    /// Number of materialised nodes (diagnostics).
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}
