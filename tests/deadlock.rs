// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use ::anyhow::Result;
use ::schedlab::{
    deadlock::LockId,
    events::Event,
    schedlab::{
        backoff_agent,
        hold_and_wait_agent,
    },
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
// Scenarios
//======================================================================================================================

/// Two agents, two locks, opposite acquisition order: the classic cycle. The low-priority agent is the victim; its
/// first lock is revoked, the survivor completes, and the victim re-acquires and completes too.
#[test]
fn deadlock_is_detected_and_recovered_by_forced_preemption() -> Result<()> {
    let set: TaskSet = TaskSet::new(vec![Task::new(1, 1, 400, 0), Task::new(2, 5, 400, 0)])?;
    let lab: Laboratory = Laboratory::new(LabConfig::default());

    let handle = lab.submit_threaded(set.clone(), Policy::TRr, None, |kit| {
        let a = kit.lock("A");
        let b = kit.lock("B");
        Ok(vec![
            (TaskId(1), hold_and_wait_agent(kit.agent(TaskId(1)), a.clone(), b.clone())),
            (TaskId(2), hold_and_wait_agent(kit.agent(TaskId(2)), b, a)),
        ])
    })?;
    let report: RunReport = handle.run()?;

    schedlab::ensure_eq!(report.outcome, RunOutcome::Completed);

    // The cycle is reported with both agents in it.
    let detected: Vec<&Event> = report
        .events
        .iter()
        .filter(|e| matches!(e, Event::DeadlockDetected { .. }))
        .collect();
    schedlab::ensure_eq!(
        detected.first(),
        Some(&&Event::DeadlockDetected {
            cycle: vec![TaskId(1), TaskId(2)]
        })
    );

    // The victim is the low-priority agent and only its lock is revoked.
    let forced: Vec<&Event> = report
        .events
        .iter()
        .filter(|e| matches!(e, Event::ForcedRelease { .. }))
        .collect();
    schedlab::ensure_eq!(
        forced,
        vec![&Event::ForcedRelease {
            lock: LockId(1),
            victim: TaskId(1)
        }]
    );

    // Both agents still account for their full bursts and finish.
    for task in set.tasks() {
        schedlab::ensure_eq!(report.timeline.total_runtime(task.id()), task.burst());
    }
    let finished: usize = report
        .events
        .iter()
        .filter(|e| matches!(e, Event::TaskFinished { .. }))
        .count();
    schedlab::ensure_eq!(finished, 2);
    Ok(())
}

#[test]
fn detection_happens_within_one_detector_period() -> Result<()> {
    let set: TaskSet = TaskSet::new(vec![Task::new(1, 1, 400, 0), Task::new(2, 5, 400, 0)])?;
    let lab: Laboratory = Laboratory::new(LabConfig::default());

    let handle = lab.submit_threaded(set, Policy::TRr, None, |kit| {
        let a = kit.lock("A");
        let b = kit.lock("B");
        Ok(vec![
            (TaskId(1), hold_and_wait_agent(kit.agent(TaskId(1)), a.clone(), b.clone())),
            (TaskId(2), hold_and_wait_agent(kit.agent(TaskId(2)), b, a)),
        ])
    })?;
    let report: RunReport = handle.run()?;

    // The cycle closes when the second agent blocks, at the end of its second slice (t = 400). With a period of 2,
    // the report must land within 2 units of that.
    let detection_time: u64 = report
        .events
        .iter()
        .enumerate()
        .find_map(|(i, e)| match e {
            Event::DeadlockDetected { .. } => {
                // Find the last slice recorded before the detection.
                report.events[..i].iter().rev().find_map(|prior| match prior {
                    Event::SliceRecorded { end, .. } => Some(*end),
                    _ => None,
                })
            },
            _ => None,
        })
        .unwrap();
    schedlab::ensure_eq!(detection_time, 400);
    Ok(())
}

#[test]
fn deadlock_without_recovery_is_unrecoverable() -> Result<()> {
    let set: TaskSet = TaskSet::new(vec![Task::new(1, 1, 400, 0), Task::new(2, 5, 400, 0)])?;
    let config: LabConfig = LabConfig {
        recovery_enabled: false,
        ..LabConfig::default()
    };
    let lab: Laboratory = Laboratory::new(config);

    let handle = lab.submit_threaded(set, Policy::TRr, None, |kit| {
        let a = kit.lock("A");
        let b = kit.lock("B");
        Ok(vec![
            (TaskId(1), hold_and_wait_agent(kit.agent(TaskId(1)), a.clone(), b.clone())),
            (TaskId(2), hold_and_wait_agent(kit.agent(TaskId(2)), b, a)),
        ])
    })?;
    let err = handle.run().unwrap_err();
    schedlab::ensure_eq!(err.errno, libc::EDEADLK);
    Ok(())
}

/// A scripted preemption against an agent that spins with `try_acquire`: the agent observes its pause flag, releases
/// its lock on its own during the grace window, and nothing has to be revoked.
#[test]
fn cooperative_release_during_the_grace_window_avoids_forcing() -> Result<()> {
    let set: TaskSet = TaskSet::new(vec![Task::new(1, 1, 2000, 0), Task::new(2, 5, 400, 0)])?;
    let lab: Laboratory = Laboratory::new(LabConfig::default());

    let handle = lab.submit_threaded(set.clone(), Policy::TRr, None, |kit| {
        let a = kit.lock("A");
        let b = kit.lock("B");
        // An external preemptor pauses the spinning agent shortly after both locks are taken.
        kit.schedule_preemption(TaskId(1), 300);
        Ok(vec![
            (TaskId(1), backoff_agent(kit.agent(TaskId(1)), a.clone(), b.clone())),
            (TaskId(2), hold_and_wait_agent(kit.agent(TaskId(2)), b, a)),
        ])
    })?;
    let report: RunReport = handle.run()?;

    schedlab::ensure_eq!(report.outcome, RunOutcome::Completed);
    let forced: usize = report
        .events
        .iter()
        .filter(|e| matches!(e, Event::ForcedRelease { .. }))
        .count();
    schedlab::ensure_eq!(forced, 0);
    for task in set.tasks() {
        schedlab::ensure_eq!(report.timeline.total_runtime(task.id()), task.burst());
    }
    Ok(())
}
