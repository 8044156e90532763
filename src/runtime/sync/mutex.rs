// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
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

/// User-space mutex integrated with the cooperative runtime. Blocking on a held mutex suspends the running coroutine
/// and moves it out of the active ready structure; releasing hands ownership to the head of the wait queue in FIFO
/// order and marks it ready again.
pub struct Mutex {
    /// Owning task, if held.
    owner: Option<TaskId>,
    /// Tasks suspended on this mutex, oldest first.
    waiters: VecDeque<(TaskId, YielderHandle)>,
    /// Shared runtime bookkeeping.
    rt: SharedUltRuntime,
}

#[derive(Clone)]
pub struct SharedMutex(SharedObject<Mutex>);

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl SharedMutex {
    pub fn new(rt: SharedUltRuntime) -> Self {
        Self(SharedObject::<Mutex>::new(Mutex {
            owner: None,
            waiters: VecDeque::new(),
            rt,
        }))
    }

    /// Acquire this mutex. If it is free, the caller becomes the owner and continues; otherwise the caller is
    /// appended to the wait queue and suspends until ownership is handed to it. May only be called by the running
    /// task.
    pub async fn lock(&mut self, tid: TaskId, yielder: &Yielder) -> Result<(), Fail> {
        if self.rt.current() != Some(tid) {
            let cause: String = format!("lock issued by a task that is not running (tid={:?})", tid);
            error!("lock(): {}", cause);
            return Err(Fail::sync_violation(&cause));
        }

        if self.owner.is_none() && self.waiters.is_empty() {
            trace!("lock(): granted (tid={:?})", tid);
            self.owner = Some(tid);
            return Ok(());
        }

        trace!("lock(): contended, suspending (tid={:?}, owner={:?})", tid, self.owner);
        self.waiters.push_back((tid, yielder.get_handle()));
        self.rt.block(tid);
        yielder.yield_until_wake().await?;

        // Ownership is handed over by the releasing task before we are woken.
        if self.owner != Some(tid) {
            let cause: String = format!("woken without ownership (tid={:?}, owner={:?})", tid, self.owner);
            error!("lock(): {}", cause);
            return Err(Fail::sync_violation(&cause));
        }
        Ok(())
    }

    /// Try to acquire this mutex without suspending. Returns [true] if successful.
    pub fn try_lock(&mut self, tid: TaskId) -> bool {
        if self.owner.is_none() && self.waiters.is_empty() {
            self.owner = Some(tid);
            return true;
        }
        false
    }

    /// Release this mutex. Only the owner may release; ownership transfers to the head of the wait queue, which is
    /// marked ready.
    pub fn unlock(&mut self, tid: TaskId) -> Result<(), Fail> {
        if self.owner != Some(tid) {
            let cause: String = format!("unlock by non-owner (tid={:?}, owner={:?})", tid, self.owner);
            error!("unlock(): {}", cause);
            return Err(Fail::sync_violation(&cause));
        }
        self.hand_over();
        Ok(())
    }

    /// Returns the current owner, if any.
    pub fn owner(&self) -> Option<TaskId> {
        self.owner
    }

    /// Transfers ownership to the next waiter, or frees the mutex.
    pub(crate) fn hand_over(&mut self) {
        if let Some((next, mut handle)) = self.waiters.pop_front() {
            trace!("hand_over(): ownership to tid={:?}", next);
            self.owner = Some(next);
            self.rt.unblock(next);
            handle.wake_with(Ok(()));
        } else {
            self.owner = None;
        }
    }

    /// Grants a free mutex to `tid` directly. Used by the condition variable's signal path.
    pub(crate) fn grant(&mut self, tid: TaskId) {
        debug_assert!(self.owner.is_none() && self.waiters.is_empty());
        self.owner = Some(tid);
    }

    /// Appends a waiter transferred from a condition variable. The task stays blocked until ownership reaches it.
    pub(crate) fn enqueue_waiter(&mut self, tid: TaskId, handle: YielderHandle) {
        self.waiters.push_back((tid, handle));
    }

    /// Whether the mutex is free and nothing is queued on it.
    pub(crate) fn is_free(&self) -> bool {
        self.owner.is_none() && self.waiters.is_empty()
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Deref for SharedMutex {
    type Target = Mutex;

    fn deref(&self) -> &Self::Target {
        self.0.deref()
    }
}

impl DerefMut for SharedMutex {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.0.deref_mut()
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[cfg(test)]
mod tests {
    use super::SharedMutex;
    use crate::runtime::SharedUltRuntime;
    use crate::scheduling::task::TaskId;
    use ::anyhow::Result;

    #[test]
    fn mutex_try_lock_and_unlock() -> Result<()> {
        let rt: SharedUltRuntime = SharedUltRuntime::default();
        let mut mutex: SharedMutex = SharedMutex::new(rt);
        let tid: TaskId = TaskId::from(1);

        crate::ensure_eq!(mutex.try_lock(tid), true);
        crate::ensure_eq!(mutex.owner(), Some(tid));
        crate::ensure_eq!(mutex.try_lock(TaskId::from(2)), false);
        crate::ensure_eq!(mutex.unlock(tid).is_ok(), true);
        crate::ensure_eq!(mutex.owner(), None);

        Ok(())
    }

    #[test]
    fn mutex_unlock_by_non_owner_is_a_violation() -> Result<()> {
        let rt: SharedUltRuntime = SharedUltRuntime::default();
        let mut mutex: SharedMutex = SharedMutex::new(rt);

        crate::ensure_eq!(mutex.try_lock(TaskId::from(1)), true);
        let e = mutex.unlock(TaskId::from(2)).unwrap_err();
        crate::ensure_eq!(e.errno, libc::EPERM);

        Ok(())
    }

    #[test]
    fn mutex_unlock_without_lock_is_a_violation() -> Result<()> {
        let rt: SharedUltRuntime = SharedUltRuntime::default();
        let mut mutex: SharedMutex = SharedMutex::new(rt);

        crate::ensure_eq!(mutex.unlock(TaskId::from(1)).is_err(), true);

        Ok(())
    }
}
