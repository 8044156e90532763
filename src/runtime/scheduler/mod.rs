// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

mod scheduler;
mod task;
mod yielder;

//======================================================================================================================
// Exports
//======================================================================================================================

pub use self::{
    scheduler::{
        PollOutcome,
        UltExecutor,
    },
    task::{
        AgentCoroutine,
        AgentTask,
    },
    yielder::{
        Yielder,
        YielderHandle,
    },
};
