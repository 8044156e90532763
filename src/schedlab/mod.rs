// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! The driver-facing surface of the laboratory: task sets go in, timelines, metrics and events come out.

pub mod config;

//======================================================================================================================
// Exports
//======================================================================================================================

pub use self::config::{
    CfsArrival,
    LabConfig,
};

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    deadlock::{
        DeadlockLab,
        PauseFlag,
        SharedTrackedLock,
    },
    events::{
        EventSink,
        NullSink,
    },
    runtime::{
        fail::Fail,
        logging,
        scheduler::{
            AgentCoroutine,
            AgentTask,
            UltExecutor,
            Yielder,
        },
        sync::{
            SharedConditionVariable,
            SharedMutex,
        },
        SharedObject,
        SharedUltRuntime,
    },
    scheduling::{
        engine::{
            Engine,
            RunReport,
            ThreadedParts,
        },
        metrics::AnalysisReport,
        policy::Policy,
        task::{
            Task,
            TaskId,
            TaskSet,
        },
    },
};
use ::futures::FutureExt;
use ::std::{
    collections::HashSet,
    sync::{
        atomic::{
            AtomicBool,
            Ordering,
        },
        Arc,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Entry point for external collaborators.
pub struct Laboratory {
    config: LabConfig,
}

/// A validated, ready-to-run submission.
pub struct RunHandle {
    engine: Engine,
    cancel: Arc<AtomicBool>,
}

impl ::std::fmt::Debug for RunHandle {
    fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
        f.debug_struct("RunHandle").finish_non_exhaustive()
    }
}

/// Cancels the associated run from another thread; the in-flight slice completes first.
#[derive(Clone)]
pub struct CancelHandle(Arc<AtomicBool>);

/// Everything a workload coroutine needs to cooperate with the runtime it runs under.
pub struct AgentContext {
    pub tid: TaskId,
    pub yielder: Yielder,
    pub rt: SharedUltRuntime,
    pub pause: PauseFlag,
}

/// Hands a scenario builder the pieces it needs to assemble agents and tracked locks for a threaded run.
pub struct LabToolkit<'a> {
    rt: SharedUltRuntime,
    lab: &'a mut DeadlockLab,
}

/// State shared by the default workload of one threaded run.
struct WorkloadBoard {
    data_ready: bool,
    counter: u64,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl Laboratory {
    pub fn new(config: LabConfig) -> Self {
        logging::initialize();
        Self { config }
    }

    /// Validates `set` against `policy` and prepares a run. Threaded policies get one context per task running the
    /// default workload: a condition-variable handshake followed by a mutex-protected counter bump per slice.
    pub fn submit(&self, set: TaskSet, policy: Policy, sink: Option<Box<dyn EventSink>>) -> Result<RunHandle, Fail> {
        let sink: Box<dyn EventSink> = sink.unwrap_or_else(|| Box::new(NullSink));
        let cancel: Arc<AtomicBool> = Arc::new(AtomicBool::new(false));

        let threaded: Option<ThreadedParts> = if policy.is_threaded() {
            Some(self.assemble_default_agents(&set)?)
        } else {
            None
        };
        let engine: Engine = Engine::new(set, policy, self.config.clone(), sink, cancel.clone(), threaded)?;
        Ok(RunHandle { engine, cancel })
    }

    /// Prepares a threaded run whose agents are built by `scenario`. The builder receives a [LabToolkit] to create
    /// tracked locks and agent contexts, and returns one coroutine per task in the set.
    pub fn submit_threaded<F>(
        &self,
        set: TaskSet,
        policy: Policy,
        sink: Option<Box<dyn EventSink>>,
        scenario: F,
    ) -> Result<RunHandle, Fail>
    where
        F: FnOnce(&mut LabToolkit) -> Result<Vec<(TaskId, AgentCoroutine)>, Fail>,
    {
        if !policy.is_threaded() {
            let cause: String = format!("policy {} does not dispatch contexts", policy);
            error!("submit_threaded(): {}", cause);
            return Err(Fail::new(libc::EINVAL, &cause));
        }
        let sink: Box<dyn EventSink> = sink.unwrap_or_else(|| Box::new(NullSink));
        let cancel: Arc<AtomicBool> = Arc::new(AtomicBool::new(false));

        let rt: SharedUltRuntime = SharedUltRuntime::default();
        let mut lab: DeadlockLab = self.new_lab(rt.clone());
        let mut executor: UltExecutor = UltExecutor::new(self.config.context_capacity);

        let agents: Vec<(TaskId, AgentCoroutine)> = {
            let mut toolkit: LabToolkit = LabToolkit {
                rt: rt.clone(),
                lab: &mut lab,
            };
            scenario(&mut toolkit)?
        };

        let expected: HashSet<TaskId> = set.tasks().iter().map(|t| t.id()).collect();
        let mut provided: HashSet<TaskId> = HashSet::with_capacity(agents.len());
        for (tid, coroutine) in agents {
            if !expected.contains(&tid) {
                let cause: String = format!("workload for unknown task (tid={:?})", tid);
                error!("submit_threaded(): {}", cause);
                return Err(Fail::invalid_task(&cause));
            }
            provided.insert(tid);
            executor.spawn(AgentTask::new(format!("agent-{}", tid), tid, coroutine))?;
        }
        if provided.len() != expected.len() {
            let cause: &str = "every task in the set needs a workload coroutine";
            error!("submit_threaded(): {}", cause);
            return Err(Fail::invalid_task(cause));
        }

        let parts: ThreadedParts = ThreadedParts {
            rt,
            executor,
            lab: Some(lab),
        };
        let engine: Engine = Engine::new(set, policy, self.config.clone(), sink, cancel.clone(), Some(parts))?;
        Ok(RunHandle { engine, cancel })
    }

    /// Runs the same task set across a battery of policies and tabulates the averages.
    pub fn analyze(&self, set: &TaskSet, policies: &[Policy]) -> Result<AnalysisReport, Fail> {
        let mut report: AnalysisReport = AnalysisReport::default();
        for policy in policies {
            let handle: RunHandle = self.submit(set.clone(), *policy, None)?;
            let run: RunReport = handle.run()?;
            report.rows.push(run.metrics);
        }
        Ok(report)
    }

    /// One context per task, all running the default workload. The leader (earliest arrival, lowest id) publishes
    /// the shared board and broadcasts; everyone else waits on the predicate first.
    fn assemble_default_agents(&self, set: &TaskSet) -> Result<ThreadedParts, Fail> {
        let rt: SharedUltRuntime = SharedUltRuntime::default();
        let mut lab: DeadlockLab = self.new_lab(rt.clone());
        let mut executor: UltExecutor = UltExecutor::new(self.config.context_capacity);

        let mutex: SharedMutex = SharedMutex::new(rt.clone());
        let cv: SharedConditionVariable = SharedConditionVariable::new(rt.clone());
        let board: SharedObject<WorkloadBoard> = SharedObject::new(WorkloadBoard {
            data_ready: false,
            counter: 0,
        });

        let mut order: Vec<&Task> = set.tasks().iter().collect();
        order.sort_by_key(|t| (t.arrival_time(), t.id()));
        let leader: Option<TaskId> = order.first().map(|t| t.id());

        for task in set.tasks() {
            let tid: TaskId = task.id();
            let ctx: AgentContext = AgentContext {
                tid,
                yielder: Yielder::new(),
                rt: rt.clone(),
                pause: lab.register_agent(tid),
            };
            let coroutine: AgentCoroutine =
                default_workload(ctx, mutex.clone(), cv.clone(), board.clone(), leader == Some(tid));
            executor.spawn(AgentTask::new(format!("agent-{}", tid), tid, coroutine))?;
        }

        Ok(ThreadedParts {
            rt,
            executor,
            lab: Some(lab),
        })
    }

    fn new_lab(&self, rt: SharedUltRuntime) -> DeadlockLab {
        DeadlockLab::new(
            self.config.detector_period,
            self.config.preemption_grace,
            self.config.recovery_enabled,
            rt,
        )
    }
}

impl RunHandle {
    /// Runs the policy to completion and reports. Consumes the handle; resubmit to run again.
    pub fn run(self) -> Result<RunReport, Fail> {
        self.engine.run()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(self.cancel.clone())
    }
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }
}

impl LabToolkit<'_> {
    /// A handle to the run's shared runtime bookkeeping, for wiring up untracked primitives.
    pub fn rt(&self) -> SharedUltRuntime {
        self.rt.clone()
    }

    /// A fresh tracked lock wired into this run's graph.
    pub fn lock(&mut self, name: &str) -> SharedTrackedLock {
        self.lab.create_lock(name)
    }

    /// The context for one agent, with its pause flag registered at the recovery controller.
    pub fn agent(&mut self, tid: TaskId) -> AgentContext {
        AgentContext {
            tid,
            yielder: Yielder::new(),
            rt: self.rt.clone(),
            pause: self.lab.register_agent(tid),
        }
    }

    /// Scripts a preemption of `victim` at virtual time `at`, as an external preemptor would.
    pub fn schedule_preemption(&mut self, victim: TaskId, at: u64) {
        self.lab.schedule_preemption(victim, at);
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// The default workload: a one-shot condition-variable handshake, then one mutex-protected counter bump per slice
/// until the engine signals that the burst is consumed.
fn default_workload(
    ctx: AgentContext,
    mut mutex: SharedMutex,
    mut cv: SharedConditionVariable,
    mut board: SharedObject<WorkloadBoard>,
    leader: bool,
) -> AgentCoroutine {
    Box::pin(
        async move {
            let AgentContext { tid, yielder, rt, .. } = ctx;

            mutex.lock(tid, &yielder).await?;
            if leader {
                board.data_ready = true;
                cv.broadcast();
            } else {
                while !board.data_ready {
                    cv.wait(&mut mutex, tid, &yielder).await?;
                }
            }
            mutex.unlock(tid)?;

            while !rt.is_finished(tid) {
                mutex.lock(tid, &yielder).await?;
                board.counter += 1;
                mutex.unlock(tid)?;
                yielder.yield_once().await?;
            }
            Ok(())
        }
        .fuse(),
    )
}

/// An agent that takes `first`, lets the scheduler run someone else, then blocks hard on `second` while still
/// holding `first`. Two of these with swapped locks deadlock. After the wait ends it re-acquires anything the
/// recovery controller revoked, spins its burst down, and releases in reverse order.
pub fn hold_and_wait_agent(
    ctx: AgentContext,
    mut first: SharedTrackedLock,
    mut second: SharedTrackedLock,
) -> AgentCoroutine {
    Box::pin(
        async move {
            let AgentContext { tid, yielder, rt, .. } = ctx;

            first.acquire(tid, &yielder).await?;
            yielder.yield_once().await?;
            second.acquire(tid, &yielder).await?;
            if !first.held_by(tid) {
                // Our first lock was revoked while we waited; take it back through the normal protocol.
                first.acquire(tid, &yielder).await?;
            }
            while !rt.is_finished(tid) {
                yielder.yield_once().await?;
            }
            second.release(tid)?;
            first.release(tid)?;
            Ok(())
        }
        .fuse(),
    )
}

/// An agent that never blocks on `second`: it spins with `try_acquire`, checking its pause flag each round. When
/// paused it releases `first`, parks until resumed, and re-acquires. This is the cooperative half of the preemption
/// protocol.
pub fn backoff_agent(
    ctx: AgentContext,
    mut first: SharedTrackedLock,
    mut second: SharedTrackedLock,
) -> AgentCoroutine {
    Box::pin(
        async move {
            let AgentContext {
                tid,
                yielder,
                rt,
                pause,
            } = ctx;

            first.acquire(tid, &yielder).await?;
            yielder.yield_once().await?;
            loop {
                if pause.is_paused() {
                    if first.held_by(tid) {
                        first.release(tid)?;
                    }
                    while pause.is_paused() {
                        yielder.yield_once().await?;
                    }
                    first.acquire(tid, &yielder).await?;
                    continue;
                }
                if second.try_acquire(tid) {
                    break;
                }
                yielder.yield_once().await?;
            }
            while !rt.is_finished(tid) {
                yielder.yield_once().await?;
            }
            second.release(tid)?;
            first.release(tid)?;
            Ok(())
        }
        .fuse(),
    )
}
