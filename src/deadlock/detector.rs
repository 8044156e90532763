// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    deadlock::graph::LockGraph,
    scheduling::task::{
        TaskArena,
        TaskId,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// The outcome of one detection pass that found a cycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeadlockReport {
    pub cycle: Vec<TaskId>,
    /// The task recovery should preempt: lowest priority in the cycle, ties broken towards the highest id.
    pub victim: TaskId,
}

/// Periodic cycle detector over the shared lock graph. Runs at most once per `period` units of virtual time; the
/// engine polls it every iteration.
pub struct DeadlockDetector {
    period: u64,
    last_check: u64,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl DeadlockDetector {
    pub fn new(period: u64) -> Self {
        Self {
            period: period.max(1),
            last_check: 0,
        }
    }

    /// Runs a detection pass if a full period has elapsed since the last one.
    pub fn poll(&mut self, now: u64, graph: &LockGraph, arena: &TaskArena) -> Option<DeadlockReport> {
        if now < self.last_check + self.period {
            return None;
        }
        self.last_check = now;

        let cycle: Vec<TaskId> = graph.find_cycle()?;
        let victim: TaskId = Self::choose_victim(&cycle, arena);
        debug!("poll(): cycle={:?}, victim={:?}", cycle, victim);
        Some(DeadlockReport { cycle, victim })
    }

    /// Picks the task with the lowest dynamic priority; among equals, the highest id loses.
    fn choose_victim(cycle: &[TaskId], arena: &TaskArena) -> TaskId {
        let mut victim: TaskId = cycle[0];
        let mut victim_priority: u32 = Self::priority_of(victim, arena);
        for tid in &cycle[1..] {
            let priority: u32 = Self::priority_of(*tid, arena);
            if priority < victim_priority || (priority == victim_priority && *tid > victim) {
                victim = *tid;
                victim_priority = priority;
            }
        }
        victim
    }

    fn priority_of(tid: TaskId, arena: &TaskArena) -> u32 {
        if arena.contains(tid) {
            arena.get(tid).priority()
        } else {
            0
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[cfg(test)]
mod tests {
    use super::DeadlockDetector;
    use crate::{
        deadlock::graph::LockGraph,
        scheduling::task::{
            Task,
            TaskArena,
            TaskId,
            TaskSet,
        },
    };
    use ::anyhow::Result;

    fn two_task_cycle() -> LockGraph {
        let mut graph: LockGraph = LockGraph::default();
        graph.record_acquire(TaskId(1), 10.into());
        graph.record_acquire(TaskId(2), 20.into());
        graph.record_wait(TaskId(1), 20.into());
        graph.record_wait(TaskId(2), 10.into());
        graph
    }

    #[test]
    fn detector_honors_its_period() -> Result<()> {
        let set: TaskSet = TaskSet::new(vec![Task::new(1, 1, 10, 0), Task::new(2, 5, 10, 0)])?;
        let arena: TaskArena = TaskArena::new(&set);
        let graph: LockGraph = two_task_cycle();
        let mut detector: DeadlockDetector = DeadlockDetector::new(2);

        crate::ensure_eq!(detector.poll(1, &graph, &arena).is_none(), true);
        let report = detector.poll(2, &graph, &arena).unwrap();
        crate::ensure_eq!(report.cycle, vec![TaskId(1), TaskId(2)]);
        // Cooldown: the next pass may not run before another full period.
        crate::ensure_eq!(detector.poll(3, &graph, &arena).is_none(), true);
        crate::ensure_eq!(detector.poll(4, &graph, &arena).is_some(), true);
        Ok(())
    }

    #[test]
    fn victim_is_lowest_priority_then_highest_id() -> Result<()> {
        let set: TaskSet = TaskSet::new(vec![Task::new(1, 1, 10, 0), Task::new(2, 5, 10, 0)])?;
        let arena: TaskArena = TaskArena::new(&set);
        let graph: LockGraph = two_task_cycle();
        let mut detector: DeadlockDetector = DeadlockDetector::new(2);

        let report = detector.poll(2, &graph, &arena).unwrap();
        crate::ensure_eq!(report.victim, TaskId(1));

        // Equal priorities: the higher id is sacrificed.
        let set: TaskSet = TaskSet::new(vec![Task::new(1, 5, 10, 0), Task::new(2, 5, 10, 0)])?;
        let arena: TaskArena = TaskArena::new(&set);
        let mut detector: DeadlockDetector = DeadlockDetector::new(2);
        let report = detector.poll(2, &graph, &arena).unwrap();
        crate::ensure_eq!(report.victim, TaskId(2));
        Ok(())
    }
}
