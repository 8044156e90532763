// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    deadlock::{
        graph::LockId,
        lock::SharedTrackedLock,
    },
    events::Event,
    runtime::SharedObject,
    scheduling::task::TaskId,
};
use ::std::{
    collections::HashMap,
    sync::atomic::{
        AtomicBool,
        Ordering,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Capability gating the release-by-non-owner path. Only the preemption controller can construct one, so no other
/// component can revoke a lock it does not own.
pub struct ForceToken(());

/// Per-agent pause flag. The controller raises it; the agent's run loop observes it at its suspension points and is
/// expected to release held locks and park until resumed.
#[derive(Clone)]
pub struct PauseFlag(SharedObject<AtomicBool>);

/// An armed recovery: the victim has been paused and will be forcibly preempted once the grace window closes.
struct PendingRecovery {
    victim: TaskId,
    force_at: u64,
}

/// Carries out the forced-preemption protocol: pause the victim, give it a grace window to release cooperatively,
/// revoke whatever it still holds, then resume it.
pub struct PreemptionController {
    grace: u64,
    token: ForceToken,
    flags: HashMap<TaskId, PauseFlag>,
    pending: Option<PendingRecovery>,
    /// Externally scripted preemptions (victim, due time), latest first so due entries pop off the back.
    scripted: Vec<(u64, TaskId)>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl PauseFlag {
    fn new() -> Self {
        Self(SharedObject::new(AtomicBool::new(false)))
    }

    pub fn is_paused(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn set(&self, paused: bool) {
        self.0.store(paused, Ordering::Release);
    }
}

impl PreemptionController {
    pub fn new(grace: u64) -> Self {
        Self {
            grace,
            token: ForceToken(()),
            flags: HashMap::new(),
            pending: None,
            scripted: Vec::new(),
        }
    }

    /// Registers an agent and returns the flag its run loop should observe.
    pub fn register(&mut self, tid: TaskId) -> PauseFlag {
        self.flags.entry(tid).or_insert_with(PauseFlag::new).clone()
    }

    /// Whether a recovery is currently armed.
    pub fn in_progress(&self) -> bool {
        self.pending.is_some()
    }

    /// Schedules a preemption of `victim` at virtual time `at`, regardless of what the detector sees.
    pub fn schedule(&mut self, victim: TaskId, at: u64) {
        self.scripted.push((at, victim));
        self.scripted.sort_by(|a, b| b.0.cmp(&a.0));
    }

    /// Step 1 of the protocol: raise the victim's pause flag and open the grace window.
    pub fn begin(&mut self, victim: TaskId, now: u64) {
        if self.pending.is_some() {
            return;
        }
        info!("begin(): pausing victim {:?} (grace={})", victim, self.grace);
        if let Some(flag) = self.flags.get(&victim) {
            flag.set(true);
        } else {
            warn!("begin(): victim {:?} has no registered pause flag", victim);
        }
        self.pending = Some(PendingRecovery {
            victim,
            force_at: now + self.grace,
        });
    }

    /// Steps 2 through 4, driven by the virtual clock: once the grace window has closed, revoke every lock the
    /// victim still holds, then resume it. Emits one `ForcedRelease` per revoked lock.
    pub fn poll(&mut self, now: u64, locks: &mut HashMap<LockId, SharedTrackedLock>, events: &mut Vec<Event>) {
        while let Some((due, victim)) = self.scripted.last().copied() {
            if due > now {
                break;
            }
            self.scripted.pop();
            self.begin(victim, now);
        }

        let victim: TaskId = match &self.pending {
            Some(pending) if pending.force_at <= now => pending.victim,
            _ => return,
        };

        let mut lock_ids: Vec<LockId> = locks.keys().copied().collect();
        lock_ids.sort();
        for lock_id in lock_ids {
            let lock: &mut SharedTrackedLock = locks.get_mut(&lock_id).unwrap();
            if lock.force_release(victim, &self.token) {
                events.push(Event::ForcedRelease {
                    lock: lock_id,
                    victim,
                });
            }
        }

        info!("poll(): resuming victim {:?}", victim);
        if let Some(flag) = self.flags.get(&victim) {
            flag.set(false);
        }
        self.pending = None;
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[cfg(test)]
mod tests {
    use super::PreemptionController;
    use crate::scheduling::task::TaskId;
    use ::anyhow::Result;
    use ::std::collections::HashMap;

    #[test]
    fn pause_flag_follows_the_protocol() -> Result<()> {
        let mut controller: PreemptionController = PreemptionController::new(300);
        let flag = controller.register(TaskId(1));
        crate::ensure_eq!(flag.is_paused(), false);

        controller.begin(TaskId(1), 100);
        crate::ensure_eq!(flag.is_paused(), true);
        crate::ensure_eq!(controller.in_progress(), true);

        // Grace window still open: nothing is forced and the victim stays paused.
        let mut events = Vec::new();
        let mut locks = HashMap::new();
        controller.poll(200, &mut locks, &mut events);
        crate::ensure_eq!(flag.is_paused(), true);

        // Window closed: the victim is resumed (it held no locks, so nothing is emitted).
        controller.poll(400, &mut locks, &mut events);
        crate::ensure_eq!(flag.is_paused(), false);
        crate::ensure_eq!(controller.in_progress(), false);
        crate::ensure_eq!(events.is_empty(), true);
        Ok(())
    }
}
