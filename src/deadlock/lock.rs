// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    deadlock::{
        graph::{
            LockId,
            SharedLockGraph,
        },
        recovery::ForceToken,
    },
    runtime::{
        fail::Fail,
        scheduler::{
            Yielder,
            YielderHandle,
        },
        SharedObject,
        SharedUltRuntime,
    },
    scheduling::task::TaskId,
};
use ::std::{
    collections::VecDeque,
    ops::{
        Deref,
        DerefMut,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// A binary semaphore whose every operation is recorded in the shared lock graph. This is the laboratory's
/// deadlock-capable lock: agents may hold several at once, and the detector reasons about the resulting ownership
/// and wait edges.
pub struct TrackedLock {
    id: LockId,
    name: String,
    owner: Option<TaskId>,
    waiters: VecDeque<(TaskId, YielderHandle)>,
    graph: SharedLockGraph,
    rt: SharedUltRuntime,
}

#[derive(Clone)]
pub struct SharedTrackedLock(SharedObject<TrackedLock>);

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl SharedTrackedLock {
    pub fn new(id: LockId, name: &str, graph: SharedLockGraph, rt: SharedUltRuntime) -> Self {
        Self(SharedObject::<TrackedLock>::new(TrackedLock {
            id,
            name: name.to_string(),
            owner: None,
            waiters: VecDeque::new(),
            graph,
            rt,
        }))
    }

    pub fn id(&self) -> LockId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The semaphore value: 1 when free, 0 when held.
    pub fn value(&self) -> u8 {
        match self.owner {
            Some(_) => 0,
            None => 1,
        }
    }

    pub fn holder(&self) -> Option<TaskId> {
        self.owner
    }

    pub fn held_by(&self, tid: TaskId) -> bool {
        self.owner == Some(tid)
    }

    /// Acquire the lock, recording a wait edge and suspending if it is held.
    pub async fn acquire(&mut self, tid: TaskId, yielder: &Yielder) -> Result<(), Fail> {
        if self.owner.is_none() && self.waiters.is_empty() {
            trace!("acquire(): granted (lock={:?}, tid={:?})", self.id, tid);
            self.owner = Some(tid);
            let id: LockId = self.id;
            self.graph.record_acquire(tid, id);
            return Ok(());
        }

        debug!(
            "acquire(): contended, suspending (lock={:?} {:?}, tid={:?}, owner={:?})",
            self.id, self.name, tid, self.owner
        );
        let id: LockId = self.id;
        self.graph.record_wait(tid, id);
        self.waiters.push_back((tid, yielder.get_handle()));
        self.rt.block(tid);
        yielder.yield_until_wake().await?;

        if self.owner != Some(tid) {
            let cause: String = format!("woken without ownership (lock={:?}, tid={:?})", self.id, tid);
            error!("acquire(): {}", cause);
            return Err(Fail::sync_violation(&cause));
        }
        Ok(())
    }

    /// Acquire the lock without suspending. Returns [true] on success. A failed attempt leaves no wait edge behind.
    pub fn try_acquire(&mut self, tid: TaskId) -> bool {
        if self.owner.is_none() && self.waiters.is_empty() {
            trace!("try_acquire(): granted (lock={:?}, tid={:?})", self.id, tid);
            self.owner = Some(tid);
            let id: LockId = self.id;
            self.graph.record_acquire(tid, id);
            return true;
        }
        false
    }

    /// Release the lock. Only the owner may release through this path; the preemption controller uses
    /// [Self::force_release] instead.
    pub fn release(&mut self, tid: TaskId) -> Result<(), Fail> {
        if self.owner != Some(tid) {
            let cause: String = format!(
                "release by non-owner outside the preemption path (lock={:?}, tid={:?}, owner={:?})",
                self.id, tid, self.owner
            );
            error!("release(): {}", cause);
            return Err(Fail::sync_violation(&cause));
        }
        self.hand_over();
        Ok(())
    }

    /// Revoke the lock from `victim` without its cooperation. Deliberately unsafe locking-wise: only the preemption
    /// controller can construct the [ForceToken] that gates this path. Returns whether the victim actually held the
    /// lock.
    pub(crate) fn force_release(&mut self, victim: TaskId, _token: &ForceToken) -> bool {
        if self.owner != Some(victim) {
            return false;
        }
        warn!(
            "force_release(): revoking lock from victim (lock={:?} {:?}, victim={:?})",
            self.id, self.name, victim
        );
        self.hand_over();
        true
    }

    /// Passes ownership to the next waiter, or frees the lock. Keeps the graph in step.
    pub(crate) fn hand_over(&mut self) {
        if let Some((next, mut handle)) = self.waiters.pop_front() {
            trace!("hand_over(): ownership to tid={:?} (lock={:?})", next, self.id);
            self.owner = Some(next);
            let id: LockId = self.id;
            self.graph.record_acquire(next, id);
            self.rt.unblock(next);
            handle.wake_with(Ok(()));
        } else {
            self.owner = None;
            let id: LockId = self.id;
            self.graph.record_release(id);
        }
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Deref for SharedTrackedLock {
    type Target = TrackedLock;

    fn deref(&self) -> &Self::Target {
        self.0.deref()
    }
}

impl DerefMut for SharedTrackedLock {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.0.deref_mut()
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[cfg(test)]
mod tests {
    use super::SharedTrackedLock;
    use crate::{
        deadlock::graph::SharedLockGraph,
        runtime::SharedUltRuntime,
        scheduling::task::TaskId,
    };
    use ::anyhow::Result;

    #[test]
    fn try_acquire_on_a_held_lock_leaves_no_wait_edge() -> Result<()> {
        let graph: SharedLockGraph = SharedLockGraph::default();
        let rt: SharedUltRuntime = SharedUltRuntime::default();
        let mut lock: SharedTrackedLock = SharedTrackedLock::new(1.into(), "L", graph.clone(), rt);

        crate::ensure_eq!(lock.try_acquire(TaskId(1)), true);
        crate::ensure_eq!(lock.value(), 0);
        crate::ensure_eq!(lock.try_acquire(TaskId(2)), false);
        crate::ensure_eq!(graph.wait_for().is_empty(), true);
        Ok(())
    }

    #[test]
    fn release_is_owner_only() -> Result<()> {
        let graph: SharedLockGraph = SharedLockGraph::default();
        let rt: SharedUltRuntime = SharedUltRuntime::default();
        let mut lock: SharedTrackedLock = SharedTrackedLock::new(1.into(), "L", graph.clone(), rt);

        crate::ensure_eq!(lock.try_acquire(TaskId(1)), true);
        let e = lock.release(TaskId(2)).unwrap_err();
        crate::ensure_eq!(e.errno, libc::EPERM);
        crate::ensure_eq!(lock.release(TaskId(1)).is_ok(), true);
        crate::ensure_eq!(lock.value(), 1);
        crate::ensure_eq!(graph.owner_of(1.into()), None);
        Ok(())
    }
}
