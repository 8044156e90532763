// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Coroutine executor for user-level threads.
//!
//! Contexts are stackful only conceptually: each one is a boxed, fused coroutine stored in a slab, and a context
//! switch is a targeted poll of the chosen coroutine. The policy engine decides which context runs; the executor
//! dispatches it and reports how the dispatch ended.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    runtime::{
        fail::Fail,
        scheduler::task::AgentTask,
        SharedUltRuntime,
    },
    scheduling::task::TaskId,
};
use ::futures::{
    future::FusedFuture,
    task::noop_waker_ref,
};
use ::slab::Slab;
use ::std::{
    collections::HashMap,
    future::Future,
    pin::Pin,
    task::{
        Context,
        Poll,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// How a dispatch ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollOutcome {
    /// The coroutine reached a quantum-boundary yield point.
    Yielded,
    /// The coroutine suspended inside a synchronization primitive.
    Blocked,
    /// The coroutine ran to completion.
    Completed,
}

/// Coroutine executor. Owns the contexts of every user-level thread in one scheduler instance.
pub struct UltExecutor {
    /// Stores all the coroutine contexts held by this executor.
    contexts: Slab<AgentTask>,
    /// Translates scheduling task ids to slab keys.
    ids: HashMap<TaskId, usize>,
    /// Maximum number of live contexts.
    capacity: usize,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl UltExecutor {
    /// Creates an executor that can hold up to `capacity` live contexts.
    pub fn new(capacity: usize) -> Self {
        Self {
            contexts: Slab::with_capacity(capacity),
            ids: HashMap::new(),
            capacity,
        }
    }

    /// Creates a context for `task`. Fails with `ResourceExhausted` when the context arena is full.
    pub fn spawn(&mut self, task: AgentTask) -> Result<(), Fail> {
        let tid: TaskId = task.get_tid();
        if self.ids.contains_key(&tid) {
            let cause: String = format!("context already exists (tid={:?})", tid);
            error!("spawn(): {}", cause);
            return Err(Fail::new(libc::EEXIST, &cause));
        }
        if self.contexts.len() >= self.capacity {
            let cause: String = format!("context arena is full (capacity={})", self.capacity);
            error!("spawn(): {}", cause);
            return Err(Fail::resource_exhausted(&cause));
        }
        trace!("spawn(): name={:?}, tid={:?}", task.get_name(), tid);
        let key: usize = self.contexts.insert(task);
        self.ids.insert(tid, key);
        Ok(())
    }

    /// Dispatches the context of `tid` for one slice: polls the coroutine once, so it advances to its next
    /// suspension point, and classifies how the dispatch ended.
    pub fn poll_task(&mut self, tid: TaskId, rt: &mut SharedUltRuntime) -> Result<PollOutcome, Fail> {
        let key: usize = match self.ids.get(&tid) {
            Some(key) => *key,
            None => {
                let cause: String = format!("no such context (tid={:?})", tid);
                error!("poll_task(): {}", cause);
                return Err(Fail::new(libc::ESRCH, &cause));
            },
        };

        rt.set_current(tid);
        let poll_result: Poll<()> = {
            let task: &mut AgentTask = &mut self.contexts[key];
            let mut ctx: Context = Context::from_waker(noop_waker_ref());
            Future::poll(Pin::new(task), &mut ctx)
        };
        rt.clear_current();

        match poll_result {
            Poll::Ready(()) => Ok(PollOutcome::Completed),
            Poll::Pending if rt.is_blocked(tid) => Ok(PollOutcome::Blocked),
            Poll::Pending => Ok(PollOutcome::Yielded),
        }
    }

    /// Destroys the context of `tid`, returning the task so the caller may inspect its result.
    pub fn destroy(&mut self, tid: TaskId) -> Option<AgentTask> {
        let key: usize = self.ids.remove(&tid)?;
        let task: AgentTask = self.contexts.remove(key);
        trace!("destroy(): name={:?}, tid={:?}", task.get_name(), tid);
        Some(task)
    }

    pub fn contains(&self, tid: TaskId) -> bool {
        self.ids.contains_key(&tid)
    }

    /// Whether the coroutine of `tid` has run to completion. Expects the context to exist.
    pub fn has_completed(&self, tid: TaskId) -> bool {
        match self.ids.get(&tid) {
            Some(key) => self.contexts[*key].is_terminated(),
            None => true,
        }
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[cfg(test)]
mod tests {
    use super::{
        PollOutcome,
        UltExecutor,
    };
    use crate::runtime::{
        scheduler::{
            task::AgentTask,
            Yielder,
        },
        SharedUltRuntime,
    };
    use crate::scheduling::task::TaskId;
    use ::anyhow::Result;
    use ::futures::FutureExt;

    /// A coroutine that yields `n` times and then completes.
    fn yielding_agent(tid: TaskId, n: usize) -> AgentTask {
        let yielder: Yielder = Yielder::new();
        let coroutine = Box::pin(
            async move {
                for _ in 0..n {
                    yielder.yield_once().await?;
                }
                Ok(())
            }
            .fuse(),
        );
        AgentTask::new(format!("test-agent-{:?}", tid), tid, coroutine)
    }

    #[test]
    fn executor_polls_to_completion() -> Result<()> {
        let mut rt: SharedUltRuntime = SharedUltRuntime::default();
        let mut executor: UltExecutor = UltExecutor::new(4);
        let tid: TaskId = TaskId::from(1);
        executor.spawn(yielding_agent(tid, 2))?;

        crate::ensure_eq!(executor.poll_task(tid, &mut rt)?, PollOutcome::Yielded);
        crate::ensure_eq!(executor.poll_task(tid, &mut rt)?, PollOutcome::Yielded);
        crate::ensure_eq!(executor.poll_task(tid, &mut rt)?, PollOutcome::Completed);
        crate::ensure_eq!(executor.has_completed(tid), true);

        Ok(())
    }

    #[test]
    fn executor_rejects_overflow() -> Result<()> {
        let mut executor: UltExecutor = UltExecutor::new(1);
        executor.spawn(yielding_agent(TaskId::from(1), 0))?;

        crate::ensure_eq!(executor.spawn(yielding_agent(TaskId::from(2), 0)).is_err(), true);

        Ok(())
    }

    #[test]
    fn executor_rejects_duplicate_context() -> Result<()> {
        let mut executor: UltExecutor = UltExecutor::new(4);
        executor.spawn(yielding_agent(TaskId::from(1), 0))?;

        crate::ensure_eq!(executor.spawn(yielding_agent(TaskId::from(1), 0)).is_err(), true);

        Ok(())
    }
}
