// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::scheduling::{
    policy::{
        Discipline,
        Policy,
    },
    task::{
        Task,
        TaskId,
    },
};
use ::std::{
    cmp::Reverse,
    collections::{
        BTreeSet,
        VecDeque,
    },
};

//======================================================================================================================
// Constants
//======================================================================================================================

/// Number of static bands for multilevel-queue scheduling.
pub const MLQ_BANDS: usize = 3;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Per-policy ready structure. Holds task ids only; key material is read from the arena task at insertion time, so
/// callers must reinsert a task after mutating any field its key derives from.
pub enum ReadyQueue {
    /// Arrival-ordered FIFO (FCFS, RR).
    Fifo(VecDeque<TaskId>),
    /// Ordered by (remaining, id) ascending (SJF).
    Shortest(BTreeSet<(u64, TaskId)>),
    /// Ordered by (priority descending, id ascending).
    Priority(BTreeSet<(Reverse<u32>, TaskId)>),
    /// Static priority bands, FIFO within each; index 0 is the highest band (MLQ).
    Banded(Vec<VecDeque<TaskId>>),
    /// Feedback levels, FIFO within each; index 0 is the highest level (MLFQ).
    Leveled(Vec<VecDeque<TaskId>>),
    /// Ordered by (deadline, id) ascending (EDF).
    Deadline(BTreeSet<(u64, TaskId)>),
    /// Ordered by (vruntime, id) ascending (CFS).
    Fair(BTreeSet<(u64, TaskId)>),
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

/// The static band a priority value falls into: high > 20, 10 < medium <= 20, low <= 10.
pub fn band_of(priority: u32) -> usize {
    if priority > 20 {
        0
    } else if priority > 10 {
        1
    } else {
        2
    }
}

impl ReadyQueue {
    /// Creates the ready structure matching `policy`. `levels` sizes the feedback hierarchy for MLFQ.
    pub fn for_policy(policy: Policy, levels: usize) -> Self {
        match policy.discipline() {
            Discipline::Fcfs | Discipline::Rr => ReadyQueue::Fifo(VecDeque::new()),
            Discipline::Sjf => ReadyQueue::Shortest(BTreeSet::new()),
            Discipline::Priority => ReadyQueue::Priority(BTreeSet::new()),
            Discipline::Mlq => ReadyQueue::Banded((0..MLQ_BANDS).map(|_| VecDeque::new()).collect()),
            Discipline::Mlfq => ReadyQueue::Leveled((0..levels.max(1)).map(|_| VecDeque::new()).collect()),
            Discipline::Edf => ReadyQueue::Deadline(BTreeSet::new()),
            Discipline::Cfs => ReadyQueue::Fair(BTreeSet::new()),
        }
    }

    /// Inserts `task` keyed by the fields the active discipline orders on.
    pub fn insert(&mut self, task: &Task) {
        let tid: TaskId = task.id();
        match self {
            ReadyQueue::Fifo(queue) => queue.push_back(tid),
            ReadyQueue::Shortest(set) => {
                set.insert((task.remaining(), tid));
            },
            ReadyQueue::Priority(set) => {
                set.insert((Reverse(task.priority()), tid));
            },
            ReadyQueue::Banded(bands) => bands[band_of(task.priority())].push_back(tid),
            ReadyQueue::Leveled(levels) => {
                let level: usize = task.level().min(levels.len() - 1);
                levels[level].push_back(tid);
            },
            ReadyQueue::Deadline(set) => {
                set.insert((task.deadline().unwrap_or(u64::MAX), tid));
            },
            ReadyQueue::Fair(set) => {
                set.insert((task.vruntime(), tid));
            },
        }
    }

    /// Removes and returns the next task to dispatch.
    pub fn pop_next(&mut self) -> Option<TaskId> {
        match self {
            ReadyQueue::Fifo(queue) => queue.pop_front(),
            ReadyQueue::Shortest(set) => set.pop_first().map(|(_, tid)| tid),
            ReadyQueue::Priority(set) => set.pop_first().map(|(_, tid)| tid),
            ReadyQueue::Banded(bands) | ReadyQueue::Leveled(bands) => {
                bands.iter_mut().find(|q| !q.is_empty())?.pop_front()
            },
            ReadyQueue::Deadline(set) => set.pop_first().map(|(_, tid)| tid),
            ReadyQueue::Fair(set) => set.pop_first().map(|(_, tid)| tid),
        }
    }

    /// The next task to dispatch, without removing it.
    pub fn peek(&self) -> Option<TaskId> {
        match self {
            ReadyQueue::Fifo(queue) => queue.front().copied(),
            ReadyQueue::Shortest(set) => set.first().map(|(_, tid)| *tid),
            ReadyQueue::Priority(set) => set.first().map(|(_, tid)| *tid),
            ReadyQueue::Banded(bands) | ReadyQueue::Leveled(bands) => {
                bands.iter().find(|q| !q.is_empty())?.front().copied()
            },
            ReadyQueue::Deadline(set) => set.first().map(|(_, tid)| *tid),
            ReadyQueue::Fair(set) => set.first().map(|(_, tid)| *tid),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn len(&self) -> usize {
        match self {
            ReadyQueue::Fifo(queue) => queue.len(),
            ReadyQueue::Shortest(set) => set.len(),
            ReadyQueue::Priority(set) => set.len(),
            ReadyQueue::Banded(bands) | ReadyQueue::Leveled(bands) => bands.iter().map(|q| q.len()).sum(),
            ReadyQueue::Deadline(set) => set.len(),
            ReadyQueue::Fair(set) => set.len(),
        }
    }

    /// Whether `task` is present. The ordered variants answer in O(log n) by recomputing the key; `task` must not
    /// have been mutated since insertion.
    pub fn contains(&self, task: &Task) -> bool {
        let tid: TaskId = task.id();
        match self {
            ReadyQueue::Fifo(queue) => queue.contains(&tid),
            ReadyQueue::Shortest(set) => set.contains(&(task.remaining(), tid)),
            ReadyQueue::Priority(set) => set.contains(&(Reverse(task.priority()), tid)),
            ReadyQueue::Banded(bands) | ReadyQueue::Leveled(bands) => bands.iter().any(|q| q.contains(&tid)),
            ReadyQueue::Deadline(set) => set.contains(&(task.deadline().unwrap_or(u64::MAX), tid)),
            ReadyQueue::Fair(set) => set.contains(&(task.vruntime(), tid)),
        }
    }

    /// Removes `task`, keyed by its current field values. Returns whether it was present.
    pub fn remove(&mut self, task: &Task) -> bool {
        let tid: TaskId = task.id();
        match self {
            ReadyQueue::Fifo(queue) => match queue.iter().position(|t| *t == tid) {
                Some(pos) => {
                    queue.remove(pos);
                    true
                },
                None => false,
            },
            ReadyQueue::Shortest(set) => set.remove(&(task.remaining(), tid)),
            ReadyQueue::Priority(set) => set.remove(&(Reverse(task.priority()), tid)),
            ReadyQueue::Banded(bands) | ReadyQueue::Leveled(bands) => {
                for queue in bands.iter_mut() {
                    if let Some(pos) = queue.iter().position(|t| *t == tid) {
                        queue.remove(pos);
                        return true;
                    }
                }
                false
            },
            ReadyQueue::Deadline(set) => set.remove(&(task.deadline().unwrap_or(u64::MAX), tid)),
            ReadyQueue::Fair(set) => set.remove(&(task.vruntime(), tid)),
        }
    }

    /// Snapshot of the queued ids in selection order.
    pub fn ids(&self) -> Vec<TaskId> {
        match self {
            ReadyQueue::Fifo(queue) => queue.iter().copied().collect(),
            ReadyQueue::Shortest(set) => set.iter().map(|(_, tid)| *tid).collect(),
            ReadyQueue::Priority(set) => set.iter().map(|(_, tid)| *tid).collect(),
            ReadyQueue::Banded(bands) | ReadyQueue::Leveled(bands) => {
                bands.iter().flat_map(|q| q.iter().copied()).collect()
            },
            ReadyQueue::Deadline(set) => set.iter().map(|(_, tid)| *tid).collect(),
            ReadyQueue::Fair(set) => set.iter().map(|(_, tid)| *tid).collect(),
        }
    }

    /// Smallest queued vruntime, for seeding late arrivals in fair scheduling.
    pub fn min_vruntime(&self) -> Option<u64> {
        match self {
            ReadyQueue::Fair(set) => set.first().map(|(vruntime, _)| *vruntime),
            _ => None,
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
