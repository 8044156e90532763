// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use ::anyhow::Result;
use ::futures::FutureExt;
use ::schedlab::{
    events::Event,
    runtime::{
        scheduler::AgentCoroutine,
        sync::SharedMutex,
        SharedObject,
    },
    schedlab::AgentContext,
    LabConfig,
    Laboratory,
    Policy,
    RunOutcome,
    RunReport,
    Task,
    TaskId,
    TaskSet,
};

//======================================================================================================================
// Helpers
//======================================================================================================================

/// The three-task set the threaded battery traditionally runs on.
fn threaded_set() -> Result<TaskSet> {
    Ok(TaskSet::new(vec![
        Task::new(1, 5, 200, 0),
        Task::new(2, 3, 150, 50),
        Task::new(3, 8, 300, 100),
    ])?)
}

fn check_burst_coverage(report: &RunReport, set: &TaskSet) -> Result<()> {
    for task in set.tasks() {
        schedlab::ensure_eq!(report.timeline.total_runtime(task.id()), task.burst());
    }
    let finished: usize = report
        .events
        .iter()
        .filter(|e| matches!(e, Event::TaskFinished { .. }))
        .count();
    schedlab::ensure_eq!(finished, set.len());
    Ok(())
}

//======================================================================================================================
// Default workload across the threaded battery
//======================================================================================================================

#[test]
fn threaded_fcfs_runs_each_context_in_one_slice() -> Result<()> {
    let set: TaskSet = threaded_set()?;
    let lab: Laboratory = Laboratory::new(LabConfig::default());
    let report: RunReport = lab.submit(set.clone(), Policy::TFcfs, None)?.run()?;

    schedlab::ensure_eq!(report.outcome, RunOutcome::Completed);
    schedlab::ensure_eq!(report.timeline.len(), 3);
    check_burst_coverage(&report, &set)
}

#[test]
fn threaded_rr_dispatches_within_the_quantum() -> Result<()> {
    let set: TaskSet = threaded_set()?;
    let lab: Laboratory = Laboratory::new(LabConfig::default());
    let report: RunReport = lab.submit(set.clone(), Policy::TRr, None)?.run()?;

    for entry in report.timeline.entries() {
        schedlab::ensure_eq!(entry.end - entry.start <= 100, true);
    }
    check_burst_coverage(&report, &set)
}

#[test]
fn threaded_priority_completes_the_battery() -> Result<()> {
    let set: TaskSet = threaded_set()?;
    let lab: Laboratory = Laboratory::new(LabConfig::default());
    let report: RunReport = lab.submit(set.clone(), Policy::TPriority, None)?.run()?;

    schedlab::ensure_eq!(report.outcome, RunOutcome::Completed);
    check_burst_coverage(&report, &set)
}

#[test]
fn threaded_cfs_completes_the_battery() -> Result<()> {
    let set: TaskSet = threaded_set()?;
    let lab: Laboratory = Laboratory::new(LabConfig::default());
    let report: RunReport = lab.submit(set.clone(), Policy::TCfs, None)?.run()?;

    schedlab::ensure_eq!(report.outcome, RunOutcome::Completed);
    check_burst_coverage(&report, &set)
}

#[test]
fn threaded_mlfq_boosts_periodically() -> Result<()> {
    // Two long tasks with a small quantum: by the boost interval both have been demoted at least once.
    let set: TaskSet = TaskSet::new(vec![Task::new(1, 1, 600, 0), Task::new(2, 1, 600, 0)])?;
    let config: LabConfig = LabConfig {
        quantum: 50,
        boost_interval: 500,
        ..LabConfig::default()
    };
    let lab: Laboratory = Laboratory::new(config);
    let report: RunReport = lab.submit(set.clone(), Policy::TMlfq, None)?.run()?;

    let demotions: usize = report
        .events
        .iter()
        .filter(|e| matches!(e, Event::Demoted { .. }))
        .count();
    let boosts: usize = report
        .events
        .iter()
        .filter(|e| matches!(e, Event::Boosted { .. }))
        .count();
    schedlab::ensure_eq!(demotions > 0, true);
    schedlab::ensure_eq!(boosts > 0, true);
    check_burst_coverage(&report, &set)
}

#[test]
fn context_capacity_is_enforced_at_submit() -> Result<()> {
    let set: TaskSet = TaskSet::new(vec![Task::new(1, 1, 100, 0), Task::new(2, 1, 100, 0)])?;
    let config: LabConfig = LabConfig {
        context_capacity: 1,
        ..LabConfig::default()
    };
    let lab: Laboratory = Laboratory::new(config);
    let err = lab.submit(set, Policy::TRr, None).unwrap_err();
    schedlab::ensure_eq!(err.errno, libc::ENOMEM);
    Ok(())
}

//======================================================================================================================
// Custom workloads: blocking, handover, violations
//======================================================================================================================

/// Holds the mutex across a yield so the other agent must block on it, recording the interleaving.
fn hold_across_yield(ctx: AgentContext, mut mutex: SharedMutex, mut journal: SharedObject<Vec<String>>) -> AgentCoroutine {
    Box::pin(
        async move {
            let AgentContext { tid, yielder, rt, .. } = ctx;
            mutex.lock(tid, &yielder).await?;
            journal.push(format!("{}-locked", tid));
            yielder.yield_once().await?;
            journal.push(format!("{}-unlocking", tid));
            mutex.unlock(tid)?;
            while !rt.is_finished(tid) {
                yielder.yield_once().await?;
            }
            Ok(())
        }
        .fuse(),
    )
}

fn lock_once(ctx: AgentContext, mut mutex: SharedMutex, mut journal: SharedObject<Vec<String>>) -> AgentCoroutine {
    Box::pin(
        async move {
            let AgentContext { tid, yielder, rt, .. } = ctx;
            mutex.lock(tid, &yielder).await?;
            journal.push(format!("{}-locked", tid));
            mutex.unlock(tid)?;
            while !rt.is_finished(tid) {
                yielder.yield_once().await?;
            }
            Ok(())
        }
        .fuse(),
    )
}

#[test]
fn contended_mutex_blocks_and_hands_over_in_fifo_order() -> Result<()> {
    let set: TaskSet = TaskSet::new(vec![Task::new(1, 1, 300, 0), Task::new(2, 1, 300, 0)])?;
    let lab: Laboratory = Laboratory::new(LabConfig::default());
    let journal: SharedObject<Vec<String>> = SharedObject::new(Vec::new());
    let probe: SharedObject<Vec<String>> = journal.clone();

    let handle = lab.submit_threaded(set.clone(), Policy::TRr, None, move |kit| {
        let mutex: SharedMutex = SharedMutex::new(kit.rt());
        Ok(vec![
            (TaskId(1), hold_across_yield(kit.agent(TaskId(1)), mutex.clone(), journal.clone())),
            (TaskId(2), lock_once(kit.agent(TaskId(2)), mutex, journal.clone())),
        ])
    })?;
    let report: RunReport = handle.run()?;

    schedlab::ensure_eq!(report.outcome, RunOutcome::Completed);
    schedlab::ensure_eq!(
        probe.as_slice(),
        ["1-locked".to_string(), "1-unlocking".to_string(), "2-locked".to_string()].as_slice()
    );
    check_burst_coverage(&report, &set)
}

#[test]
fn unlock_by_non_owner_aborts_the_run() -> Result<()> {
    let set: TaskSet = TaskSet::new(vec![Task::new(1, 1, 100, 0)])?;
    let lab: Laboratory = Laboratory::new(LabConfig::default());

    let handle = lab.submit_threaded(set, Policy::TRr, None, |kit| {
        let ctx: AgentContext = kit.agent(TaskId(1));
        let mut mutex: SharedMutex = SharedMutex::new(kit.rt());
        let coroutine: AgentCoroutine = Box::pin(
            async move {
                // Releasing a mutex we never took is a synchronization violation.
                mutex.unlock(ctx.tid)?;
                Ok(())
            }
            .fuse(),
        );
        Ok(vec![(TaskId(1), coroutine)])
    })?;
    let err = handle.run().unwrap_err();
    schedlab::ensure_eq!(err.errno, libc::EPERM);
    Ok(())
}

#[test]
fn every_task_needs_a_workload() -> Result<()> {
    let set: TaskSet = TaskSet::new(vec![Task::new(1, 1, 100, 0), Task::new(2, 1, 100, 0)])?;
    let lab: Laboratory = Laboratory::new(LabConfig::default());

    let result = lab.submit_threaded(set, Policy::TRr, None, |kit| {
        let ctx: AgentContext = kit.agent(TaskId(1));
        let mutex: SharedMutex = SharedMutex::new(ctx.rt.clone());
        let journal: SharedObject<Vec<String>> = SharedObject::new(Vec::new());
        Ok(vec![(TaskId(1), lock_once(ctx, mutex, journal))])
    });
    schedlab::ensure_eq!(result.is_err(), true);
    Ok(())
}
