// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! A pedagogical scheduling laboratory: a battery of classical CPU-scheduling policies over a common task model and
//! timeline recorder, a cooperative user-level thread runtime with user-space mutexes and condition variables, and a
//! deadlock laboratory that detects wait-for cycles and recovers by forced preemption.

#[macro_use]
extern crate log;

pub mod collections;
pub mod deadlock;
pub mod events;
pub mod runtime;
pub mod schedlab;
pub mod scheduling;

//======================================================================================================================
// Exports
//======================================================================================================================

pub use crate::{
    runtime::fail::Fail,
    schedlab::{
        config::LabConfig,
        CancelHandle,
        Laboratory,
        RunHandle,
    },
    scheduling::{
        engine::{
            RunOutcome,
            RunReport,
        },
        policy::Policy,
        task::{
            Task,
            TaskId,
            TaskSet,
        },
        timeline::TimelineEntry,
    },
};

//======================================================================================================================
// Macros
//======================================================================================================================

/// Ensures that two expressions are equal, bailing out of the calling test with a descriptive error otherwise.
#[macro_export]
macro_rules! ensure_eq {
    ($left:expr, $right:expr) => {{
        match (&$left, &$right) {
            (left_val, right_val) => {
                if !(*left_val == *right_val) {
                    ::anyhow::bail!(
                        "ensure_eq failed: `(left == right)`\nleft: `{:?}`\nright: `{:?}`",
                        left_val,
                        right_val
                    );
                }
            },
        }
    }};
}

/// Ensures that two expressions are not equal, bailing out of the calling test otherwise.
#[macro_export]
macro_rules! ensure_neq {
    ($left:expr, $right:expr) => {{
        match (&$left, &$right) {
            (left_val, right_val) => {
                if *left_val == *right_val {
                    ::anyhow::bail!(
                        "ensure_neq failed: `(left != right)`\nleft: `{:?}`\nright: `{:?}`",
                        left_val,
                        right_val
                    );
                }
            },
        }
    }};
}
