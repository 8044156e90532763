// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

pub mod engine;
pub mod metrics;
pub mod policy;
pub mod task;
pub mod timeline;

//======================================================================================================================
// Exports
//======================================================================================================================

pub use self::{
    engine::{
        Engine,
        RunOutcome,
        RunReport,
        ThreadedParts,
    },
    metrics::{
        AnalysisReport,
        MetricsSummary,
    },
    policy::Policy,
    task::{
        Task,
        TaskId,
        TaskSet,
        TaskState,
    },
    timeline::{
        Timeline,
        TimelineEntry,
    },
};
