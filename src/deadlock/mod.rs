// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

pub mod detector;
pub mod graph;
pub mod lock;
pub mod recovery;

//======================================================================================================================
// Exports
//======================================================================================================================

pub use self::{
    detector::{
        DeadlockDetector,
        DeadlockReport,
    },
    graph::{
        LockId,
        SharedLockGraph,
    },
    lock::SharedTrackedLock,
    recovery::{
        PauseFlag,
        PreemptionController,
    },
};

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    events::Event,
    runtime::{
        fail::Fail,
        SharedUltRuntime,
    },
    scheduling::task::{
        TaskArena,
        TaskId,
    },
};
use ::std::collections::HashMap;

//======================================================================================================================
// Structures
//======================================================================================================================

/// The deadlock laboratory around one threaded run: the shared lock graph, the tracked locks agents contend on, the
/// periodic detector, and the recovery controller. The engine ticks it once per loop iteration.
pub struct DeadlockLab {
    graph: SharedLockGraph,
    locks: HashMap<LockId, SharedTrackedLock>,
    next_lock_id: u32,
    detector: DeadlockDetector,
    controller: PreemptionController,
    recovery_enabled: bool,
    rt: SharedUltRuntime,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl DeadlockLab {
    pub fn new(detector_period: u64, grace: u64, recovery_enabled: bool, rt: SharedUltRuntime) -> Self {
        Self {
            graph: SharedLockGraph::default(),
            locks: HashMap::new(),
            next_lock_id: 1,
            detector: DeadlockDetector::new(detector_period),
            controller: PreemptionController::new(grace),
            recovery_enabled,
            rt,
        }
    }

    /// Creates a tracked lock registered with this laboratory.
    pub fn create_lock(&mut self, name: &str) -> SharedTrackedLock {
        let id: LockId = LockId(self.next_lock_id);
        self.next_lock_id += 1;
        let lock: SharedTrackedLock = SharedTrackedLock::new(id, name, self.graph.clone(), self.rt.clone());
        self.locks.insert(id, lock.clone());
        lock
    }

    /// Registers an agent with the recovery controller, returning its pause flag.
    pub fn register_agent(&mut self, tid: TaskId) -> PauseFlag {
        self.controller.register(tid)
    }

    /// Scripts a preemption of `victim` at virtual time `at`, independent of detection.
    pub fn schedule_preemption(&mut self, victim: TaskId, at: u64) {
        self.controller.schedule(victim, at);
    }

    pub fn graph(&self) -> &SharedLockGraph {
        &self.graph
    }

    /// One laboratory step at virtual time `now`: run the detector if due, arm recovery on a detected cycle, and
    /// drive any recovery in progress. Returns the events to publish.
    pub fn tick(&mut self, now: u64, arena: &TaskArena) -> Result<Vec<Event>, Fail> {
        let mut events: Vec<Event> = Vec::new();

        if !self.controller.in_progress() {
            if let Some(report) = self.detector.poll(now, &self.graph, arena) {
                events.push(Event::DeadlockDetected {
                    cycle: report.cycle.clone(),
                });
                if !self.recovery_enabled {
                    let cause: String = format!("deadlock detected and recovery is disabled (cycle={:?})", report.cycle);
                    error!("tick(): {}", cause);
                    return Err(Fail::deadlock(&cause));
                }
                self.controller.begin(report.victim, now);
            }
        }

        self.controller.poll(now, &mut self.locks, &mut events);
        Ok(events)
    }

    /// Called when a context is destroyed. A well-behaved agent has released everything; anything left is revoked so
    /// waiters are not stranded.
    pub fn on_task_finished(&mut self, tid: TaskId) {
        let held: Vec<LockId> = self.graph.holdings(tid);
        for lock_id in held {
            warn!("on_task_finished(): task {:?} finished still holding {:?}", tid, lock_id);
            if let Some(lock) = self.locks.get_mut(&lock_id) {
                lock.hand_over();
            }
        }
        self.graph.clear_wait(tid);
    }
}
