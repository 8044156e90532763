// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

pub mod fail;
pub mod logging;
pub mod scheduler;
pub mod sync;

//======================================================================================================================
// Exports
//======================================================================================================================

pub use self::fail::Fail;

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::scheduling::task::TaskId;
use ::std::{
    collections::{
        HashSet,
        VecDeque,
    },
    ops::{
        Deref,
        DerefMut,
    },
    rc::Rc,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// The SharedObject wraps an object that will be shared across coroutines.
pub struct SharedObject<T>(Rc<T>);

/// Bookkeeping shared between the policy engine, the coroutine executor and the user-space synchronization
/// primitives. This value replaces the process-wide tables (`g_current_idx`, `ready_queue`) that a global-state
/// design would use: every operation that touches this state goes through an explicit handle to it.
pub struct UltRuntime {
    /// The task currently dispatched on the single logical executor, if any.
    current: Option<TaskId>,
    /// Tasks suspended inside a synchronization primitive.
    blocked: HashSet<TaskId>,
    /// Tasks released by a synchronization primitive since the last time the engine drained this list. The engine
    /// moves them back into the ready structure of the active policy.
    unblocked: VecDeque<TaskId>,
    /// Tasks whose burst has been fully consumed. Workload coroutines observe this set to wind down.
    finished: HashSet<TaskId>,
}

/// Handle to the shared [UltRuntime] bookkeeping.
#[derive(Clone)]
pub struct SharedUltRuntime(SharedObject<UltRuntime>);

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl<T> SharedObject<T> {
    pub fn new(object: T) -> Self {
        Self(Rc::new(object))
    }
}

/// Associate Functions for the shared runtime bookkeeping.
impl SharedUltRuntime {
    /// Returns the task currently dispatched, if any.
    pub fn current(&self) -> Option<TaskId> {
        self.current
    }

    /// Marks `tid` as the dispatched task. Called by the executor around every poll.
    pub fn set_current(&mut self, tid: TaskId) {
        debug_assert!(self.current.is_none());
        self.current = Some(tid);
    }

    /// Clears the dispatched task.
    pub fn clear_current(&mut self) {
        self.current = None;
    }

    /// Marks `tid` as suspended inside a synchronization primitive.
    pub fn block(&mut self, tid: TaskId) {
        trace!("block(): tid={:?}", tid);
        self.blocked.insert(tid);
    }

    /// Releases `tid` from a synchronization primitive. The engine picks it up on its next drain.
    pub fn unblock(&mut self, tid: TaskId) {
        trace!("unblock(): tid={:?}", tid);
        if self.blocked.remove(&tid) {
            self.unblocked.push_back(tid);
        } else {
            warn!("unblock(): tid={:?} was not blocked", tid);
        }
    }

    pub fn is_blocked(&self, tid: TaskId) -> bool {
        self.blocked.contains(&tid)
    }

    pub fn blocked_count(&self) -> usize {
        self.blocked.len()
    }

    /// Takes the next task released by a synchronization primitive, if any.
    pub fn pop_unblocked(&mut self) -> Option<TaskId> {
        self.unblocked.pop_front()
    }

    /// Marks the burst of `tid` as fully consumed.
    pub fn mark_finished(&mut self, tid: TaskId) {
        self.finished.insert(tid);
    }

    /// Queried by workload coroutines to decide whether to wind down.
    pub fn is_finished(&self, tid: TaskId) -> bool {
        self.finished.contains(&tid)
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

/// Dereferences a shared object for use.
impl<T> Deref for SharedObject<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        self.0.deref()
    }
}

/// Dereferences a mutable reference to a shared object for use. This breaks Rust's ownership model because it allows
/// more than one mutable dereference of a shared object at a time. The laboratory requires this because multiple
/// coroutines hold mutable references to shared objects at the same time; however, the runtime also ensures that only
/// one coroutine runs at a time. Due to this design, Rust's static borrow checker is not able to ensure memory safety
/// and we have chosen not to use the dynamic borrow checker. Instead, shared objects should be used judiciously across
/// coroutines with the understanding that the shared object may change/be mutated whenever the coroutine yields.
impl<T> DerefMut for SharedObject<T> {
    fn deref_mut<'a>(&'a mut self) -> &'a mut Self::Target {
        let ptr: *mut T = Rc::as_ptr(&self.0) as *mut T;
        unsafe { &mut *ptr }
    }
}

impl<T> Clone for SharedObject<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl Default for SharedUltRuntime {
    fn default() -> Self {
        Self(SharedObject::<UltRuntime>::new(UltRuntime {
            current: None,
            blocked: HashSet::new(),
            unblocked: VecDeque::new(),
            finished: HashSet::new(),
        }))
    }
}

impl Deref for SharedUltRuntime {
    type Target = UltRuntime;

    fn deref(&self) -> &Self::Target {
        self.0.deref()
    }
}

impl DerefMut for SharedUltRuntime {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.0.deref_mut()
    }
}
