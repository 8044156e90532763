// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::scheduling::task::{
    TaskId,
    TaskState,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// One contiguous stretch of virtual time granted to a task. Adjacent entries for the same task are deliberately not
/// merged; callers may depend on quantum boundaries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimelineEntry {
    pub task: TaskId,
    pub start: u64,
    pub end: u64,
    pub state_at_start: TaskState,
}

/// Append-only record of every slice of a run. Exposed read-only once the run completes.
#[derive(Clone, Debug, Default)]
pub struct Timeline {
    entries: Vec<TimelineEntry>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl Timeline {
    /// Appends a slice. Slices arrive in dispatch order, so starts are monotone and entries for one task never
    /// overlap.
    pub fn record_slice(&mut self, task: TaskId, start: u64, end: u64, state: TaskState) {
        debug_assert!(start < end, "empty or inverted slice");
        if let Some(last) = self.entries.last() {
            debug_assert!(start >= last.end, "slices must not overlap");
        }
        trace!("record_slice(): task={:?}, start={}, end={}", task, start, end);
        self.entries.push(TimelineEntry {
            task,
            start,
            end,
            state_at_start: state,
        });
    }

    /// The ordered sequence of recorded slices.
    pub fn entries(&self) -> &[TimelineEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// First time `task` was dispatched, if ever.
    pub fn first_start(&self, task: TaskId) -> Option<u64> {
        self.entries.iter().filter(|e| e.task == task).map(|e| e.start).min()
    }

    /// Last time `task` released the executor, if ever dispatched.
    pub fn completion(&self, task: TaskId) -> Option<u64> {
        self.entries.iter().filter(|e| e.task == task).map(|e| e.end).max()
    }

    /// Total virtual time granted to `task`.
    pub fn total_runtime(&self, task: TaskId) -> u64 {
        self.entries
            .iter()
            .filter(|e| e.task == task)
            .map(|e| e.end - e.start)
            .sum()
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[cfg(test)]
mod tests {
    use super::Timeline;
    use crate::scheduling::task::{
        TaskId,
        TaskState,
    };
    use ::anyhow::Result;

    #[test]
    fn timeline_aggregates_per_task() -> Result<()> {
        let mut timeline: Timeline = Timeline::default();
        timeline.record_slice(TaskId(1), 0, 4, TaskState::Running);
        timeline.record_slice(TaskId(2), 4, 8, TaskState::Running);
        timeline.record_slice(TaskId(1), 8, 10, TaskState::Running);

        crate::ensure_eq!(timeline.first_start(TaskId(1)), Some(0));
        crate::ensure_eq!(timeline.completion(TaskId(1)), Some(10));
        crate::ensure_eq!(timeline.total_runtime(TaskId(1)), 6);
        crate::ensure_eq!(timeline.total_runtime(TaskId(2)), 4);
        crate::ensure_eq!(timeline.first_start(TaskId(3)), None);

        Ok(())
    }
}
