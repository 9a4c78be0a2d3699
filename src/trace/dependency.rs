//! The dependency relation between thread actions.
//!
//! Two actions are *dependent* when swapping their order could change what
//! either observes; independent actions commute, and interleavings that
//! differ only in the order of independent actions belong to the same
//! equivalence class. Partial-order reduction explores one representative
//! per class, so the quality of this relation decides how much pruning is
//! sound: over-approximating dependency costs redundant executions,
//! under-approximating it loses bugs. Everything here over-approximates.
//!
//! The rules:
//!
//! - steps of the same thread are dependent (program order);
//! - a fork is dependent with every step of the forked thread;
//! - two ref accesses are dependent when they target the same ref and at
//!   least one is a write, modify, or commit — commits are dependent *only*
//!   with accesses of their own ref;
//! - any two operations on the same MVar are dependent (both sides mutate
//!   the slot or the waiter set);
//! - two transactions are dependent when their footprints intersect.

use crate::trace::action::{Lookahead, ThreadAction};
use crate::types::{MVarId, RefId, ThreadId, TVarId};
use std::collections::BTreeSet;

/// A ref access: the target and whether it can change the cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RefAccess {
    target: RefId,
    writes: bool,
    commit: bool,
}

fn ref_access(action: &ThreadAction) -> Option<RefAccess> {
    match action {
        ThreadAction::ReadRef(r) => Some(RefAccess {
            target: *r,
            writes: false,
            commit: false,
        }),
        ThreadAction::NewRef(r) | ThreadAction::ModifyRef(r) => Some(RefAccess {
            target: *r,
            writes: true,
            commit: false,
        }),
        ThreadAction::WriteRef { to, .. } => Some(RefAccess {
            target: *to,
            writes: true,
            commit: false,
        }),
        ThreadAction::CommitRef { to, .. } => Some(RefAccess {
            target: *to,
            writes: true,
            commit: true,
        }),
        _ => None,
    }
}

fn ref_access_lookahead(look: &Lookahead) -> Option<RefAccess> {
    match look {
        Lookahead::WillReadRef(r) => Some(RefAccess {
            target: *r,
            writes: false,
            commit: false,
        }),
        Lookahead::WillWriteRef(r) | Lookahead::WillModifyRef(r) => Some(RefAccess {
            target: *r,
            writes: true,
            commit: false,
        }),
        Lookahead::WillCommitRef { to, .. } => Some(RefAccess {
            target: *to,
            writes: true,
            commit: true,
        }),
        _ => None,
    }
}

fn refs_conflict(a: RefAccess, b: RefAccess) -> bool {
    a.target == b.target && (a.writes || b.writes)
}

fn mvar_of(action: &ThreadAction) -> Option<MVarId> {
    match action {
        ThreadAction::NewMVar(m)
        | ThreadAction::PutMVar(m, _)
        | ThreadAction::BlockedPutMVar(m)
        | ThreadAction::TakeMVar(m, _)
        | ThreadAction::BlockedTakeMVar(m) => Some(*m),
        _ => None,
    }
}

fn mvar_of_lookahead(look: &Lookahead) -> Option<MVarId> {
    match look {
        Lookahead::WillPutMVar(m) | Lookahead::WillTakeMVar(m) => Some(*m),
        _ => None,
    }
}

fn stm_footprint(action: &ThreadAction) -> Option<&BTreeSet<TVarId>> {
    match action {
        ThreadAction::Stm { touched, .. } => Some(touched),
        ThreadAction::BlockedStm(reads) => Some(reads),
        _ => None,
    }
}

/// Are two executed actions, by the given threads, dependent?
#[must_use]
pub fn dependent(t1: ThreadId, a1: &ThreadAction, t2: ThreadId, a2: &ThreadAction) -> bool {
    if t1 == t2 {
        return true;
    }
    if matches!(a1, ThreadAction::Fork(c) if *c == t2)
        || matches!(a2, ThreadAction::Fork(c) if *c == t1)
    {
        return true;
    }
    if let (Some(ra), Some(rb)) = (ref_access(a1), ref_access(a2)) {
        // A commit conflicts only through its ref, which refs_conflict
        // already captures; nothing else about a commit is observable.
        if refs_conflict(ra, rb) {
            return true;
        }
    }
    if let (Some(ma), Some(mb)) = (mvar_of(a1), mvar_of(a2)) {
        if ma == mb {
            return true;
        }
    }
    if let (Some(fa), Some(fb)) = (stm_footprint(a1), stm_footprint(a2)) {
        if fa.iter().any(|v| fb.contains(v)) {
            return true;
        }
    }
    false
}

/// Is a thread's *next* step dependent with an executed action?
///
/// Used when deciding backtrack points: the candidate thread has not run
/// yet, so only its lookahead is known. Transaction footprints are unknown
/// before execution, so a pending transaction is conservatively dependent
/// with every transactional action.
#[must_use]
pub fn dependent_lookahead(
    t1: ThreadId,
    look: &Lookahead,
    t2: ThreadId,
    action: &ThreadAction,
) -> bool {
    if t1 == t2 {
        return true;
    }
    if matches!(action, ThreadAction::Fork(c) if *c == t1) {
        return true;
    }
    if let (Some(ra), Some(rb)) = (ref_access_lookahead(look), ref_access(action)) {
        if refs_conflict(ra, rb) {
            return true;
        }
    }
    if let (Some(ma), Some(mb)) = (mvar_of_lookahead(look), mvar_of(action)) {
        if ma == mb {
            return true;
        }
    }
    if matches!(look, Lookahead::WillStm) && stm_footprint(action).is_some() {
        return true;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(n: i32) -> ThreadId {
        ThreadId::new(n)
    }

    #[test]
    fn same_thread_is_always_dependent() {
        assert!(dependent(
            t(1),
            &ThreadAction::Yield,
            t(1),
            &ThreadAction::Yield
        ));
    }

    #[test]
    fn read_read_commutes() {
        let r = RefId(0);
        assert!(!dependent(
            t(1),
            &ThreadAction::ReadRef(r),
            t(2),
            &ThreadAction::ReadRef(r)
        ));
    }

    #[test]
    fn write_read_conflicts_on_same_ref_only() {
        let w = ThreadAction::WriteRef {
            to: RefId(0),
            buffered: false,
        };
        assert!(dependent(t(1), &w, t(2), &ThreadAction::ReadRef(RefId(0))));
        assert!(!dependent(t(1), &w, t(2), &ThreadAction::ReadRef(RefId(1))));
    }

    #[test]
    fn commit_conflicts_only_through_its_ref() {
        let commit = ThreadAction::CommitRef {
            by: t(1),
            to: RefId(0),
        };
        assert!(dependent(
            t(-1),
            &commit,
            t(2),
            &ThreadAction::ReadRef(RefId(0))
        ));
        assert!(!dependent(
            t(-1),
            &commit,
            t(2),
            &ThreadAction::PutMVar(MVarId(0), Vec::new())
        ));
        assert!(!dependent(t(-1), &commit, t(2), &ThreadAction::Yield));
    }

    #[test]
    fn mvar_operations_on_one_mvar_conflict() {
        let m = MVarId(3);
        assert!(dependent(
            t(1),
            &ThreadAction::PutMVar(m, Vec::new()),
            t(2),
            &ThreadAction::BlockedTakeMVar(m)
        ));
        assert!(!dependent(
            t(1),
            &ThreadAction::PutMVar(m, Vec::new()),
            t(2),
            &ThreadAction::TakeMVar(MVarId(4), Vec::new())
        ));
    }

    #[test]
    fn transactions_conflict_on_overlapping_footprints() {
        let a = ThreadAction::Stm {
            touched: [TVarId(0), TVarId(1)].into_iter().collect(),
            woken: Vec::new(),
        };
        let b = ThreadAction::BlockedStm([TVarId(1)].into_iter().collect());
        let c = ThreadAction::BlockedStm([TVarId(2)].into_iter().collect());
        assert!(dependent(t(1), &a, t(2), &b));
        assert!(!dependent(t(1), &a, t(2), &c));
    }

    #[test]
    fn fork_is_dependent_with_the_child() {
        assert!(dependent(
            t(0),
            &ThreadAction::Fork(t(1)),
            t(1),
            &ThreadAction::Yield
        ));
        assert!(dependent_lookahead(
            t(1),
            &Lookahead::WillYield,
            t(0),
            &ThreadAction::Fork(t(1))
        ));
    }

    #[test]
    fn pending_transaction_is_conservatively_dependent() {
        let committed = ThreadAction::Stm {
            touched: [TVarId(0)].into_iter().collect(),
            woken: Vec::new(),
        };
        assert!(dependent_lookahead(
            t(1),
            &Lookahead::WillStm,
            t(2),
            &committed
        ));
        assert!(!dependent_lookahead(
            t(1),
            &Lookahead::WillStm,
            t(2),
            &ThreadAction::ReadRef(RefId(0))
        ));
    }

    #[test]
    fn lookahead_write_conflicts_with_commit() {
        assert!(dependent_lookahead(
            t(2),
            &Lookahead::WillWriteRef(RefId(1)),
            t(-1),
            &ThreadAction::CommitRef {
                by: t(1),
                to: RefId(1)
            }
        ));
    }
}
