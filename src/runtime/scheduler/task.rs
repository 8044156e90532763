// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    runtime::fail::Fail,
    scheduling::task::TaskId,
};
use ::futures::future::FusedFuture;
use ::std::{
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

/// The coroutine type run by every agent. Workload factories build these with `FutureExt::fuse`.
pub type AgentCoroutine = Pin<Box<dyn FusedFuture<Output = Result<(), Fail>>>>;

/// AgentTask runs a single workload coroutine to completion and stores its terminal result for later. Thus, it
/// implements Future but never directly returns anything.
pub struct AgentTask {
    /// Task name. Used for logging only.
    name: String,
    /// The scheduling task this coroutine belongs to.
    tid: TaskId,
    /// Underlying coroutine to run.
    coroutine: AgentCoroutine,
    /// Terminal result of the underlying coroutine.
    result: Option<Result<(), Fail>>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl AgentTask {
    /// Instantiates a new agent task.
    pub fn new(name: String, tid: TaskId, coroutine: AgentCoroutine) -> Self {
        Self {
            name,
            tid,
            coroutine,
            result: None,
        }
    }

    pub fn get_name(&self) -> String {
        self.name.clone()
    }

    pub fn get_tid(&self) -> TaskId {
        self.tid
    }

    /// Returns the result of the coroutine once it completes. Returns None if the coroutine is still running.
    pub fn get_result(&self) -> Option<&Result<(), Fail>> {
        self.result.as_ref()
    }

    pub fn has_completed(&self) -> bool {
        self.result.is_some()
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

/// The Future trait for agent tasks.
impl Future for AgentTask {
    type Output = ();

    /// Polls the coroutine.
    fn poll(self: Pin<&mut Self>, ctx: &mut Context) -> Poll<()> {
        let self_: &mut Self = self.get_mut();
        if self_.result.is_some() {
            debug!("poll(): task already completed (name={:?})", self_.name);
            return Poll::Ready(());
        }
        let result: Result<(), Fail> = match Future::poll(self_.coroutine.as_mut(), ctx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(r) => r,
        };
        if let Err(e) = &result {
            warn!("poll(): coroutine failed (name={:?}, error={:?})", self_.name, e);
        }
        self_.result = Some(result);
        Poll::Ready(())
    }
}

impl FusedFuture for AgentTask {
    fn is_terminated(&self) -> bool {
        self.result.is_some()
    }
}
