//! Shared state for one execution: the heap and the store buffers.
//!
//! The [`Heap`] holds every shared object a program can allocate — refs,
//! MVars, tvars — keyed by the identifiers handed to the program. It is
//! plain clonable data so a snapshot of the post-setup state can be
//! captured once and replayed for every subsequent execution.
//!
//! [`WriteBuffers`] simulates relaxed memory. Under total store order a
//! thread's ref writes queue in one per-thread FIFO; under partial store
//! order they queue per thread *and* ref. Every non-empty queue is
//! represented to the scheduler as a phantom *commit thread* whose only
//! possible step flushes the oldest buffered write. Commit threads get
//! identifiers below [`ThreadId::initial`], allocated descending in order
//! of first buffering, which keeps them stable for a given schedule prefix.

use crate::types::{MVarId, MemType, RefId, ThreadId, TVarId, Val};
use std::collections::{BTreeMap, VecDeque};

/// Every shared object a program under test can observe.
#[derive(Debug, Clone, Default)]
pub struct Heap {
    refs: BTreeMap<RefId, Val>,
    mvars: BTreeMap<MVarId, Option<Val>>,
    tvars: BTreeMap<TVarId, Val>,
    next_ref: u32,
    next_mvar: u32,
    next_tvar: u32,
}

impl Heap {
    /// Allocates a ref with the given initial value.
    pub fn alloc_ref(&mut self, init: Val) -> RefId {
        let id = RefId(self.next_ref);
        self.next_ref += 1;
        self.refs.insert(id, init);
        id
    }

    /// Allocates an MVar, empty or holding a value.
    pub fn alloc_mvar(&mut self, contents: Option<Val>) -> MVarId {
        let id = MVarId(self.next_mvar);
        self.next_mvar += 1;
        self.mvars.insert(id, contents);
        id
    }

    /// Allocates a transactional variable with the given initial value.
    pub fn alloc_tvar(&mut self, init: Val) -> TVarId {
        let id = self.alloc_tvar_id();
        self.tvars.insert(id, init);
        id
    }

    /// Reserves a tvar identifier without materialising the cell.
    ///
    /// Transactions stage their allocations in the write set so a retry can
    /// discard them; the identifier itself is never reused either way.
    pub fn alloc_tvar_id(&mut self) -> TVarId {
        let id = TVarId(self.next_tvar);
        self.next_tvar += 1;
        id
    }

    /// Reads a ref's globally visible value.
    pub fn ref_value(&mut self, id: RefId) -> Val {
        *self.refs.entry(id).or_default()
    }

    /// Writes a ref's globally visible value.
    pub fn set_ref(&mut self, id: RefId, value: Val) {
        self.refs.insert(id, value);
    }

    /// Reads an MVar's slot.
    pub fn mvar(&mut self, id: MVarId) -> Option<Val> {
        *self.mvars.entry(id).or_default()
    }

    /// Writes an MVar's slot.
    pub fn set_mvar(&mut self, id: MVarId, contents: Option<Val>) {
        self.mvars.insert(id, contents);
    }

    /// Reads a tvar.
    pub fn tvar(&mut self, id: TVarId) -> Val {
        *self.tvars.entry(id).or_default()
    }

    /// Writes a tvar.
    pub fn set_tvar(&mut self, id: TVarId, value: Val) {
        self.tvars.insert(id, value);
    }
}

/// The key a buffered write queues under.
///
/// TSO keys by thread alone (one FIFO per thread); PSO keys by thread and
/// ref (one FIFO per pair).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct BufferKey {
    owner: ThreadId,
    per_ref: Option<RefId>,
}

impl BufferKey {
    fn for_write(memtype: MemType, owner: ThreadId, target: RefId) -> Self {
        match memtype {
            MemType::PartialStoreOrder => Self {
                owner,
                per_ref: Some(target),
            },
            _ => Self {
                owner,
                per_ref: None,
            },
        }
    }
}

/// A commit thread visible in the runnable set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingCommit {
    /// The phantom thread's identifier.
    pub commit_tid: ThreadId,
    /// The user thread whose write will be flushed.
    pub owner: ThreadId,
    /// The ref the oldest buffered write targets.
    pub target: RefId,
}

/// Per-thread store buffers plus the commit-thread registry.
#[derive(Debug, Clone, Default)]
pub struct WriteBuffers {
    queues: BTreeMap<BufferKey, VecDeque<(RefId, Val)>>,
    commit_ids: BTreeMap<BufferKey, ThreadId>,
    commit_count: i32,
}

impl WriteBuffers {
    /// Buffers a write by `owner` to `target`.
    pub fn buffer_write(&mut self, memtype: MemType, owner: ThreadId, target: RefId, value: Val) {
        let key = BufferKey::for_write(memtype, owner, target);
        self.commit_ids.entry(key).or_insert_with(|| {
            self.commit_count += 1;
            ThreadId::new(-self.commit_count)
        });
        self.queues.entry(key).or_default().push_back((target, value));
    }

    /// The newest buffered value `owner` has for `target`, if any.
    ///
    /// A thread always sees its own writes (store forwarding), so reads
    /// consult this before the heap.
    #[must_use]
    pub fn newest(&self, owner: ThreadId, target: RefId) -> Option<Val> {
        self.queues
            .iter()
            .filter(|(key, _)| key.owner == owner)
            .flat_map(|(_, queue)| queue.iter().rev())
            .find(|(r, _)| *r == target)
            .map(|(_, v)| *v)
    }

    /// Every non-empty buffer, as a commit thread with its next target.
    #[must_use]
    pub fn pending_commits(&self) -> Vec<PendingCommit> {
        self.queues
            .iter()
            .filter_map(|(key, queue)| {
                let (target, _) = queue.front()?;
                Some(PendingCommit {
                    commit_tid: self.commit_ids[key],
                    owner: key.owner,
                    target: *target,
                })
            })
            .collect()
    }

    /// Flushes the oldest write of the buffer behind `commit_tid` into the
    /// heap. Returns what was committed, or `None` if no such buffer.
    pub fn commit_one(&mut self, commit_tid: ThreadId, heap: &mut Heap) -> Option<PendingCommit> {
        let key = *self
            .commit_ids
            .iter()
            .find(|(_, tid)| **tid == commit_tid)
            .map(|(key, _)| key)?;
        let queue = self.queues.get_mut(&key)?;
        let (target, value) = queue.pop_front()?;
        if queue.is_empty() {
            self.queues.remove(&key);
        }
        heap.set_ref(target, value);
        Some(PendingCommit {
            commit_tid,
            owner: key.owner,
            target,
        })
    }

    /// Flushes every buffered write, oldest-first per buffer, buffers in
    /// key order. Synchronising operations call this as a full barrier.
    pub fn flush_all(&mut self, heap: &mut Heap) {
        let queues = std::mem::take(&mut self.queues);
        for (_, queue) in queues {
            for (target, value) in queue {
                heap.set_ref(target, value);
            }
        }
    }

    /// True if no writes are buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(n: i32) -> ThreadId {
        ThreadId::new(n)
    }

    #[test]
    fn heap_allocations_are_sequential() {
        let mut heap = Heap::default();
        assert_eq!(heap.alloc_ref(1).raw(), 0);
        assert_eq!(heap.alloc_ref(2).raw(), 1);
        assert_eq!(heap.alloc_mvar(None).raw(), 0);
        assert_eq!(heap.alloc_tvar(9).raw(), 0);
    }

    #[test]
    fn tso_keeps_one_buffer_per_thread() {
        let mut buffers = WriteBuffers::default();
        let mut heap = Heap::default();
        let r0 = heap.alloc_ref(0);
        let r1 = heap.alloc_ref(0);
        buffers.buffer_write(MemType::TotalStoreOrder, t(1), r0, 10);
        buffers.buffer_write(MemType::TotalStoreOrder, t(1), r1, 20);

        // One buffer, so one commit thread, whose next target is the oldest write.
        let pending = buffers.pending_commits();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].owner, t(1));
        assert_eq!(pending[0].target, r0);
        assert!(pending[0].commit_tid.is_commit());
    }

    #[test]
    fn pso_splits_buffers_per_ref() {
        let mut buffers = WriteBuffers::default();
        let mut heap = Heap::default();
        let r0 = heap.alloc_ref(0);
        let r1 = heap.alloc_ref(0);
        buffers.buffer_write(MemType::PartialStoreOrder, t(1), r0, 10);
        buffers.buffer_write(MemType::PartialStoreOrder, t(1), r1, 20);
        assert_eq!(buffers.pending_commits().len(), 2);
    }

    #[test]
    fn store_forwarding_sees_newest_own_write() {
        let mut buffers = WriteBuffers::default();
        let mut heap = Heap::default();
        let r = heap.alloc_ref(0);
        buffers.buffer_write(MemType::TotalStoreOrder, t(1), r, 1);
        buffers.buffer_write(MemType::TotalStoreOrder, t(1), r, 2);
        assert_eq!(buffers.newest(t(1), r), Some(2));
        assert_eq!(buffers.newest(t(2), r), None);
    }

    #[test]
    fn commit_one_flushes_fifo_order() {
        let mut buffers = WriteBuffers::default();
        let mut heap = Heap::default();
        let r = heap.alloc_ref(0);
        buffers.buffer_write(MemType::TotalStoreOrder, t(1), r, 1);
        buffers.buffer_write(MemType::TotalStoreOrder, t(1), r, 2);
        let commit_tid = buffers.pending_commits()[0].commit_tid;

        buffers.commit_one(commit_tid, &mut heap);
        assert_eq!(heap.ref_value(r), 1);
        buffers.commit_one(commit_tid, &mut heap);
        assert_eq!(heap.ref_value(r), 2);
        assert!(buffers.is_empty());
    }

    #[test]
    fn commit_ids_stay_stable_for_a_key() {
        let mut buffers = WriteBuffers::default();
        let mut heap = Heap::default();
        let r = heap.alloc_ref(0);
        buffers.buffer_write(MemType::TotalStoreOrder, t(1), r, 1);
        let first = buffers.pending_commits()[0].commit_tid;
        buffers.commit_one(first, &mut heap);
        buffers.buffer_write(MemType::TotalStoreOrder, t(1), r, 2);
        assert_eq!(buffers.pending_commits()[0].commit_tid, first);
    }

    #[test]
    fn flush_all_empties_every_buffer() {
        let mut buffers = WriteBuffers::default();
        let mut heap = Heap::default();
        let r0 = heap.alloc_ref(0);
        let r1 = heap.alloc_ref(0);
        buffers.buffer_write(MemType::PartialStoreOrder, t(1), r0, 7);
        buffers.buffer_write(MemType::PartialStoreOrder, t(2), r1, 8);
        buffers.flush_all(&mut heap);
        assert!(buffers.is_empty());
        assert_eq!(heap.ref_value(r0), 7);
        assert_eq!(heap.ref_value(r1), 8);
    }
}
