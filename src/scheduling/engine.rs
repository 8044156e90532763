// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! The policy engine. One driver loop serves all eight disciplines: it advances a virtual clock, admits arrivals,
//! asks the ready structure for the next task, records the granted slice, and runs the discipline's post-slice
//! hooks. In threaded mode the same loop additionally dispatches the task's coroutine context and integrates with
//! the user-space synchronization primitives and the deadlock laboratory.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    collections::ready_queue::ReadyQueue,
    deadlock::DeadlockLab,
    events::{
        Event,
        EventSink,
    },
    runtime::{
        fail::Fail,
        scheduler::{
            PollOutcome,
            UltExecutor,
        },
        SharedUltRuntime,
    },
    schedlab::config::{
        CfsArrival,
        LabConfig,
    },
    scheduling::{
        metrics,
        metrics::MetricsSummary,
        policy::{
            Discipline,
            Policy,
        },
        task::{
            FinishReason,
            TaskArena,
            TaskId,
            TaskSet,
            TaskState,
        },
        timeline::Timeline,
    },
};
use ::std::{
    collections::{
        HashMap,
        VecDeque,
    },
    sync::{
        atomic::{
            AtomicBool,
            Ordering,
        },
        Arc,
    },
    thread,
    time::{
        Duration,
        Instant,
    },
};

//======================================================================================================================
// Constants
//======================================================================================================================

/// Idle iterations (ready empty, tasks blocked) tolerated before the run is declared unrecoverable.
const IDLE_LIMIT: usize = 100_000;

/// Zero-length wind-down dispatches tolerated per task after its burst is consumed.
const DRAIN_LIMIT: u32 = 128;

//======================================================================================================================
// Structures
//======================================================================================================================

/// How a run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Cancelled,
    TimedOut,
}

/// Everything a finished run hands back to the driver.
#[derive(Debug)]
pub struct RunReport {
    pub policy: Policy,
    pub timeline: Timeline,
    pub metrics: MetricsSummary,
    pub events: Vec<Event>,
    pub outcome: RunOutcome,
}

/// The threaded half of a run: the shared runtime bookkeeping, the coroutine executor with all contexts already
/// spawned, and optionally the deadlock laboratory.
pub struct ThreadedParts {
    pub rt: SharedUltRuntime,
    pub executor: UltExecutor,
    pub lab: Option<DeadlockLab>,
}

/// One scheduler instance. Owns its arena, ready structure and timeline; independent instances share nothing.
pub struct Engine {
    policy: Policy,
    cfg: LabConfig,
    set: TaskSet,
    arena: TaskArena,
    /// Not-yet-arrived tasks, ordered by (arrival, id).
    pending: VecDeque<TaskId>,
    ready: ReadyQueue,
    timeline: Timeline,
    clock: u64,
    last_boost: u64,
    drains: HashMap<TaskId, u32>,
    events: Vec<Event>,
    sink: Box<dyn EventSink>,
    cancel: Arc<AtomicBool>,
    threaded: Option<ThreadedParts>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl Engine {
    pub fn new(
        set: TaskSet,
        policy: Policy,
        cfg: LabConfig,
        sink: Box<dyn EventSink>,
        cancel: Arc<AtomicBool>,
        threaded: Option<ThreadedParts>,
    ) -> Result<Self, Fail> {
        if policy.discipline() == Discipline::Edf {
            for task in set.tasks() {
                if task.deadline().is_none() {
                    let cause: String = format!("deadline scheduling needs a deadline on every task (id={:?})", task.id());
                    error!("new(): {}", cause);
                    return Err(Fail::invalid_task(&cause));
                }
            }
        }
        if policy.is_threaded() != threaded.is_some() {
            let cause: String = format!("policy {:?} and dispatch mode do not match", policy);
            error!("new(): {}", cause);
            return Err(Fail::new(libc::EINVAL, &cause));
        }

        let mut arena: TaskArena = TaskArena::new(&set);
        for task in arena.iter_mut() {
            task.assign_weight(cfg.base_weight);
        }
        let mut order: Vec<TaskId> = arena.ids();
        order.sort_by_key(|tid| (arena.get(*tid).arrival_time(), *tid));

        Ok(Self {
            ready: ReadyQueue::for_policy(policy, cfg.mlfq_levels),
            policy,
            cfg,
            set,
            arena,
            pending: order.into(),
            timeline: Timeline::default(),
            clock: 0,
            last_boost: 0,
            drains: HashMap::new(),
            events: Vec::new(),
            sink,
            cancel,
            threaded,
        })
    }

    /// Runs the policy to completion (or cancellation, timeout, unrecoverable deadlock) and reports.
    pub fn run(mut self) -> Result<RunReport, Fail> {
        info!("run(): policy={} tasks={}", self.policy, self.arena.len());
        self.emit(Event::PolicyStart {
            policy: self.policy.name().to_string(),
            time: 0,
        });

        let outcome: RunOutcome = self.drive()?;

        self.emit(Event::PolicyEnd {
            policy: self.policy.name().to_string(),
            time: self.clock,
        });
        let summary: MetricsSummary = metrics::compute(self.policy.name(), &self.timeline, &self.set);
        Ok(RunReport {
            policy: self.policy,
            timeline: self.timeline,
            metrics: summary,
            events: self.events,
            outcome,
        })
    }

    /// The shared driver loop.
    fn drive(&mut self) -> Result<RunOutcome, Fail> {
        let started: Instant = Instant::now();
        let mut idle_steps: usize = 0;

        loop {
            // Cancellation and the wall-clock cap are honored between slices only; an in-flight slice completes.
            if self.cancel.load(Ordering::Acquire) {
                warn!("drive(): run cancelled at t={}", self.clock);
                return Ok(RunOutcome::Cancelled);
            }
            if let Some(cap) = self.cfg.wall_clock_cap {
                if started.elapsed() >= cap {
                    warn!("drive(): wall-clock cap exceeded at t={}", self.clock);
                    self.mark_survivors_timed_out()?;
                    return Ok(RunOutcome::TimedOut);
                }
            }

            self.drain_unblocked();
            self.admit_arrivals();

            let tid: TaskId = match self.ready.pop_next() {
                Some(tid) => {
                    idle_steps = 0;
                    tid
                },
                None => {
                    if let Some(next) = self.next_arrival() {
                        // Idle gap: jump to the next arrival.
                        self.clock = self.clock.max(next);
                        continue;
                    }
                    if self.blocked_tasks_exist() {
                        idle_steps += 1;
                        if idle_steps > IDLE_LIMIT {
                            let cause: &str = "all runnable work is blocked and nothing is unblocking";
                            error!("drive(): {}", cause);
                            return Err(Fail::deadlock(cause));
                        }
                        self.clock += 1;
                        self.lab_tick()?;
                        continue;
                    }
                    break;
                },
            };

            self.dispatch(tid)?;
            self.maybe_boost();
            self.lab_tick()?;
        }
        Ok(RunOutcome::Completed)
    }

    /// Grants one slice to `tid`, dispatches its context in threaded mode, and applies the discipline's hooks.
    fn dispatch(&mut self, tid: TaskId) -> Result<(), Fail> {
        let quantum: u64 = self.quantum_for(tid);
        let run: u64 = self.arena.get(tid).remaining().min(quantum);
        let start: u64 = self.clock;

        if run > 0 {
            self.arena.get_mut(tid).state = TaskState::Running;
            self.timeline.record_slice(tid, start, start + run, TaskState::Running);
            self.emit(Event::SliceRecorded {
                task: tid,
                start,
                end: start + run,
            });
            if self.cfg.visualize {
                // Observability concession only; recorded times are untouched.
                thread::sleep(Duration::from_millis(run / 10));
            }
            self.clock = start + run;
            let task = self.arena.get_mut(tid);
            task.remaining -= run;
            task.time_in_level += run;
            if task.remaining == 0 {
                if let Some(parts) = &mut self.threaded {
                    parts.rt.mark_finished(tid);
                }
            }
        }

        let outcome: PollOutcome = if let Some(parts) = &mut self.threaded {
            parts.executor.poll_task(tid, &mut parts.rt)?
        } else if self.arena.get(tid).remaining() == 0 {
            PollOutcome::Completed
        } else {
            PollOutcome::Yielded
        };

        // Arrivals that occurred during the slice queue ahead of any requeue of the running task.
        self.admit_arrivals();
        self.run_hooks(tid, run);

        match outcome {
            PollOutcome::Completed => self.finish_task(tid, FinishReason::Completed)?,
            PollOutcome::Blocked => {
                self.arena.get_mut(tid).state = TaskState::Blocked;
            },
            PollOutcome::Yielded => {
                if self.arena.get(tid).remaining() == 0 {
                    // Burst consumed but the coroutine has not wound down yet; give it zero-length dispatches.
                    let drains: &mut u32 = self.drains.entry(tid).or_insert(0);
                    *drains += 1;
                    if *drains > DRAIN_LIMIT {
                        warn!("dispatch(): task {:?} refuses to wind down, destroying its context", tid);
                        self.finish_task(tid, FinishReason::Completed)?;
                        return Ok(());
                    }
                }
                self.arena.get_mut(tid).state = TaskState::Ready;
                let task = self.arena.get(tid);
                self.ready.insert(task);
            },
        }
        Ok(())
    }

    /// Discipline-specific bookkeeping after a slice of length `run`.
    fn run_hooks(&mut self, tid: TaskId, run: u64) {
        if run == 0 {
            return;
        }
        match self.policy.discipline() {
            Discipline::Priority => {
                // Feedback: the task that just ran pays for its slice.
                let decrement: u32 = (run / self.cfg.feedback_factor) as u32;
                if decrement > 0 {
                    let task = self.arena.get_mut(tid);
                    let from: u32 = task.priority;
                    task.priority = task.priority.saturating_sub(decrement).max(1);
                    let to: u32 = task.priority;
                    if from != to {
                        self.emit(Event::PriorityAdjusted { task: tid, from, to });
                    }
                }
                // Aging: every other ready task moves up, capped above its base priority.
                for other in self.ready.ids() {
                    if other == tid {
                        continue;
                    }
                    let removed: bool = self.ready.remove(self.arena.get(other));
                    let task = self.arena.get_mut(other);
                    let cap: u32 = task.base_priority() + self.cfg.aging_cap;
                    task.priority = (task.priority + self.cfg.aging_increment).min(cap);
                    if removed {
                        self.ready.insert(self.arena.get(other));
                    }
                }
            },
            Discipline::Mlfq => {
                let levels: usize = self.cfg.mlfq_levels;
                let task = self.arena.get_mut(tid);
                if task.remaining > 0 {
                    // Quantum exhausted without completion: demote.
                    let demoted: usize = (task.level + 1).min(levels - 1);
                    if demoted != task.level {
                        task.level = demoted;
                        task.time_in_level = 0;
                        self.emit(Event::Demoted {
                            task: tid,
                            level: demoted,
                        });
                    }
                }
            },
            Discipline::Cfs => {
                let task = self.arena.get_mut(tid);
                task.vruntime += run * self.cfg.base_weight / task.weight;
            },
            Discipline::Fcfs | Discipline::Rr | Discipline::Sjf | Discipline::Mlq | Discipline::Edf => (),
        }
    }

    /// Global priority boost for threaded MLFQ: every `boost_interval` units, every unfinished task returns to the
    /// top level with its per-level time cleared.
    fn maybe_boost(&mut self) {
        if !self.policy.is_threaded()
            || self.policy.discipline() != Discipline::Mlfq
            || self.cfg.boost_interval == 0
            || self.clock < self.last_boost + self.cfg.boost_interval
        {
            return;
        }
        let queued: Vec<TaskId> = self.ready.ids();
        for tid in &queued {
            self.ready.remove(self.arena.get(*tid));
        }
        for task in self.arena.iter_mut() {
            if task.finish.is_none() {
                task.level = 0;
                task.time_in_level = 0;
            }
        }
        for tid in queued {
            self.ready.insert(self.arena.get(tid));
        }
        self.emit(Event::Boosted { time: self.clock });
        self.last_boost = self.clock;
    }

    fn finish_task(&mut self, tid: TaskId, reason: FinishReason) -> Result<(), Fail> {
        debug!("finish_task(): tid={:?} at t={} ({:?})", tid, self.clock, reason);
        {
            let task = self.arena.get_mut(tid);
            task.state = TaskState::Finished;
            task.finish = Some(reason);
        }
        self.emit(Event::TaskFinished {
            task: tid,
            time: self.clock,
            reason,
        });
        if self.policy.discipline() == Discipline::Edf {
            let deadline: u64 = self.arena.get(tid).deadline().unwrap_or(u64::MAX);
            if let Some(completion) = self.timeline.completion(tid) {
                if completion > deadline {
                    self.emit(Event::DeadlineMiss {
                        task: tid,
                        completion,
                        deadline,
                    });
                }
            }
        }
        let mut fault: Option<Fail> = None;
        if let Some(parts) = &mut self.threaded {
            if let Some(agent) = parts.executor.destroy(tid) {
                if let Some(Err(e)) = agent.get_result() {
                    // A coroutine that died on a synchronization violation takes the run down with it.
                    fault = Some(e.clone());
                }
            }
            if let Some(lab) = &mut parts.lab {
                lab.on_task_finished(tid);
            }
        }
        match fault {
            Some(e) => {
                error!("finish_task(): aborting run, task {:?} failed: {:?}", tid, e);
                Err(e)
            },
            None => Ok(()),
        }
    }

    /// Moves everything released by the synchronization primitives back into the ready structure.
    fn drain_unblocked(&mut self) {
        loop {
            let tid: Option<TaskId> = match &mut self.threaded {
                Some(parts) => parts.rt.pop_unblocked(),
                None => None,
            };
            match tid {
                Some(tid) if self.arena.get(tid).finish().is_none() => {
                    self.arena.get_mut(tid).state = TaskState::Ready;
                    self.ready.insert(self.arena.get(tid));
                },
                Some(tid) => trace!("drain_unblocked(): dropping wake for finished task {:?}", tid),
                None => break,
            }
        }
    }

    /// Admits every pending task with `arrival_time <= clock`, in (arrival, id) order.
    fn admit_arrivals(&mut self) {
        while let Some(tid) = self.pending.front().copied() {
            if self.arena.get(tid).arrival_time() > self.clock {
                break;
            }
            self.pending.pop_front();
            if self.policy.discipline() == Discipline::Cfs && self.cfg.cfs_arrival == CfsArrival::MinVruntime {
                let seed: u64 = self.ready.min_vruntime().unwrap_or(0);
                self.arena.get_mut(tid).vruntime = seed;
            }
            trace!("admit_arrivals(): tid={:?} at t={}", tid, self.clock);
            self.arena.get_mut(tid).state = TaskState::Ready;
            self.ready.insert(self.arena.get(tid));
        }
    }

    fn next_arrival(&self) -> Option<u64> {
        self.pending.front().map(|tid| self.arena.get(*tid).arrival_time())
    }

    fn blocked_tasks_exist(&self) -> bool {
        match &self.threaded {
            Some(parts) => parts.rt.blocked_count() > 0,
            None => false,
        }
    }

    fn quantum_for(&self, tid: TaskId) -> u64 {
        match self.policy.discipline() {
            Discipline::Fcfs | Discipline::Sjf | Discipline::Mlq => u64::MAX,
            Discipline::Rr | Discipline::Priority | Discipline::Edf | Discipline::Cfs => self.cfg.quantum.max(1),
            Discipline::Mlfq => {
                let level: u32 = self.arena.get(tid).level() as u32;
                self.cfg.quantum.max(1).saturating_mul(1u64 << level.min(32))
            },
        }
    }

    /// Drives the detector and the recovery controller one step.
    fn lab_tick(&mut self) -> Result<(), Fail> {
        let lab_events: Vec<Event> = match &mut self.threaded {
            Some(ThreadedParts {
                lab: Some(lab), ..
            }) => lab.tick(self.clock, &self.arena)?,
            _ => return Ok(()),
        };
        for event in lab_events {
            self.emit(event);
        }
        Ok(())
    }

    /// Wall-clock expiry: everything unfinished is marked with the distinguished timeout reason.
    fn mark_survivors_timed_out(&mut self) -> Result<(), Fail> {
        for tid in self.arena.ids() {
            if self.arena.get(tid).finish().is_none() {
                self.finish_task(tid, FinishReason::TimedOut)?;
            }
        }
        Ok(())
    }

    fn emit(&mut self, event: Event) {
        self.sink.emit(&event);
        self.events.push(event);
    }
}
