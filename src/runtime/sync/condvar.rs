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
        sync::mutex::SharedMutex,
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

/// User-space condition variable. Waiting atomically releases the associated mutex and suspends the caller; a signal
/// moves one waiter onto the mutex wait queue (or grants a free mutex directly), so a woken waiter always holds the
/// mutex again before `wait` returns. There are no spurious wakeups.
pub struct ConditionVariable {
    /// Suspended waiters, oldest first, each remembering the mutex it released.
    waiters: VecDeque<(TaskId, YielderHandle, SharedMutex)>,
    /// Shared runtime bookkeeping.
    rt: SharedUltRuntime,
}

#[derive(Clone)]
pub struct SharedConditionVariable(SharedObject<ConditionVariable>);

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl SharedConditionVariable {
    pub fn new(rt: SharedUltRuntime) -> Self {
        Self(SharedObject::<ConditionVariable>::new(ConditionVariable {
            waiters: VecDeque::new(),
            rt,
        }))
    }

    /// Wait until signalled. The caller must hold `mutex`; it is released for the duration of the wait and held
    /// again when this returns. Callers still wrap this in a predicate loop.
    pub async fn wait(&mut self, mutex: &mut SharedMutex, tid: TaskId, yielder: &Yielder) -> Result<(), Fail> {
        if mutex.owner() != Some(tid) {
            let cause: String = format!("wait without holding the mutex (tid={:?}, owner={:?})", tid, mutex.owner());
            error!("wait(): {}", cause);
            return Err(Fail::sync_violation(&cause));
        }

        trace!("wait(): suspending (tid={:?})", tid);
        self.waiters.push_back((tid, yielder.get_handle(), mutex.clone()));
        mutex.unlock(tid)?;
        self.rt.block(tid);
        yielder.yield_until_wake().await?;

        // The signal path hands the mutex to us before waking.
        if mutex.owner() != Some(tid) {
            let cause: String = format!("woken without mutex ownership (tid={:?})", tid);
            error!("wait(): {}", cause);
            return Err(Fail::sync_violation(&cause));
        }
        Ok(())
    }

    /// Wake the next waiting task.
    pub fn signal(&mut self) {
        if let Some((tid, handle, mutex)) = self.waiters.pop_front() {
            self.transfer(tid, handle, mutex);
        }
    }

    /// Wake all waiting tasks.
    pub fn broadcast(&mut self) {
        while let Some((tid, handle, mutex)) = self.waiters.pop_front() {
            self.transfer(tid, handle, mutex);
        }
    }

    /// Number of tasks currently waiting.
    pub fn waiter_count(&self) -> usize {
        self.waiters.len()
    }

    /// Moves a waiter onto its mutex: if the mutex is free it is granted directly and the task becomes ready,
    /// otherwise the task queues on the mutex and wakes when ownership reaches it.
    fn transfer(&mut self, tid: TaskId, mut handle: YielderHandle, mut mutex: SharedMutex) {
        if mutex.is_free() {
            trace!("transfer(): waking directly (tid={:?})", tid);
            mutex.grant(tid);
            self.rt.unblock(tid);
            handle.wake_with(Ok(()));
        } else {
            trace!("transfer(): requeueing on mutex (tid={:?})", tid);
            mutex.enqueue_waiter(tid, handle);
        }
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Deref for SharedConditionVariable {
    type Target = ConditionVariable;

    fn deref(&self) -> &Self::Target {
        self.0.deref()
    }
}

impl DerefMut for SharedConditionVariable {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.0.deref_mut()
    }
}
