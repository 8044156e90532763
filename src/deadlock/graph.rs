// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    runtime::SharedObject,
    scheduling::task::TaskId,
};
use ::serde::{
    Deserialize,
    Serialize,
};
use ::std::{
    collections::{
        HashMap,
        HashSet,
    },
    fmt,
    ops::{
        Deref,
        DerefMut,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Identifier of a tracked lock.
#[derive(Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Debug, Serialize, Deserialize)]
pub struct LockId(pub u32);

/// Ownership and wait bookkeeping over every tracked lock. The wait-for graph is derived on demand: an edge `t -> u`
/// exists when `t` waits on a lock owned by `u`. Tasks and locks appear here by id only.
#[derive(Default)]
pub struct LockGraph {
    /// Which task owns each held lock.
    owner: HashMap<LockId, TaskId>,
    /// Which lock each suspended task waits on. A task waits on at most one lock at a time.
    waiting: HashMap<TaskId, LockId>,
}

/// Handle to the graph shared between the tracked locks, the detector and the recovery controller.
#[derive(Clone)]
pub struct SharedLockGraph(SharedObject<LockGraph>);

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl LockGraph {
    pub fn record_wait(&mut self, tid: TaskId, lock: LockId) {
        trace!("record_wait(): tid={:?}, lock={:?}", tid, lock);
        self.waiting.insert(tid, lock);
    }

    pub fn clear_wait(&mut self, tid: TaskId) {
        self.waiting.remove(&tid);
    }

    pub fn record_acquire(&mut self, tid: TaskId, lock: LockId) {
        trace!("record_acquire(): tid={:?}, lock={:?}", tid, lock);
        self.owner.insert(lock, tid);
        self.waiting.remove(&tid);
    }

    pub fn record_release(&mut self, lock: LockId) {
        trace!("record_release(): lock={:?}", lock);
        self.owner.remove(&lock);
    }

    pub fn owner_of(&self, lock: LockId) -> Option<TaskId> {
        self.owner.get(&lock).copied()
    }

    /// All locks currently held by `tid`, ascending.
    pub fn holdings(&self, tid: TaskId) -> Vec<LockId> {
        let mut held: Vec<LockId> = self
            .owner
            .iter()
            .filter(|(_, owner)| **owner == tid)
            .map(|(lock, _)| *lock)
            .collect();
        held.sort();
        held
    }

    /// Drops every record that mentions `tid`. Used when a context is destroyed.
    pub fn purge_task(&mut self, tid: TaskId) {
        self.waiting.remove(&tid);
        self.owner.retain(|_, owner| *owner != tid);
    }

    /// Derives the wait-for edges: `t -> owner(waiting(t))`.
    pub fn wait_for(&self) -> HashMap<TaskId, TaskId> {
        let mut edges: HashMap<TaskId, TaskId> = HashMap::with_capacity(self.waiting.len());
        for (tid, lock) in &self.waiting {
            if let Some(owner) = self.owner.get(lock) {
                edges.insert(*tid, *owner);
            }
        }
        edges
    }

    /// Searches the wait-for graph for a cycle. Every node has at most one outgoing edge, so an iterative walk with
    /// a per-walk path and a global visited set covers the graph in O(V + E). The returned cycle is rotated so its
    /// smallest id leads, making detection deterministic.
    pub fn find_cycle(&self) -> Option<Vec<TaskId>> {
        let edges: HashMap<TaskId, TaskId> = self.wait_for();
        let mut starts: Vec<TaskId> = edges.keys().copied().collect();
        starts.sort();

        let mut visited: HashSet<TaskId> = HashSet::with_capacity(edges.len());
        for start in starts {
            if visited.contains(&start) {
                continue;
            }
            let mut path: Vec<TaskId> = Vec::new();
            let mut on_path: HashSet<TaskId> = HashSet::new();
            let mut node: TaskId = start;
            loop {
                if on_path.contains(&node) {
                    // Found a cycle: everything from the first occurrence of `node` onward.
                    let pos: usize = path.iter().position(|t| *t == node).unwrap();
                    let mut cycle: Vec<TaskId> = path[pos..].to_vec();
                    let min_pos: usize = cycle
                        .iter()
                        .enumerate()
                        .min_by_key(|(_, t)| **t)
                        .map(|(i, _)| i)
                        .unwrap();
                    cycle.rotate_left(min_pos);
                    return Some(cycle);
                }
                if !visited.insert(node) {
                    break;
                }
                on_path.insert(node);
                path.push(node);
                node = match edges.get(&node) {
                    Some(next) => *next,
                    None => break,
                };
            }
        }
        None
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl From<u32> for LockId {
    fn from(val: u32) -> Self {
        LockId(val)
    }
}

impl From<LockId> for u32 {
    fn from(val: LockId) -> Self {
        val.0
    }
}

impl fmt::Display for LockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

impl Default for SharedLockGraph {
    fn default() -> Self {
        Self(SharedObject::<LockGraph>::new(LockGraph::default()))
    }
}

impl Deref for SharedLockGraph {
    type Target = LockGraph;

    fn deref(&self) -> &Self::Target {
        self.0.deref()
    }
}

impl DerefMut for SharedLockGraph {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.0.deref_mut()
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[cfg(test)]
mod tests {
    use super::LockGraph;
    use crate::scheduling::task::TaskId;
    use ::anyhow::Result;

    #[test]
    fn no_cycle_on_a_simple_chain() -> Result<()> {
        let mut graph: LockGraph = LockGraph::default();
        graph.record_acquire(TaskId(1), 10.into());
        graph.record_acquire(TaskId(2), 20.into());
        graph.record_wait(TaskId(2), 10.into());

        crate::ensure_eq!(graph.find_cycle(), None);
        Ok(())
    }

    #[test]
    fn two_task_cycle_is_found() -> Result<()> {
        let mut graph: LockGraph = LockGraph::default();
        graph.record_acquire(TaskId(1), 10.into());
        graph.record_acquire(TaskId(2), 20.into());
        graph.record_wait(TaskId(1), 20.into());
        graph.record_wait(TaskId(2), 10.into());

        crate::ensure_eq!(graph.find_cycle(), Some(vec![TaskId(1), TaskId(2)]));
        Ok(())
    }

    #[test]
    fn three_task_cycle_with_outside_waiter() -> Result<()> {
        let mut graph: LockGraph = LockGraph::default();
        graph.record_acquire(TaskId(1), 10.into());
        graph.record_acquire(TaskId(2), 20.into());
        graph.record_acquire(TaskId(3), 30.into());
        graph.record_wait(TaskId(1), 20.into());
        graph.record_wait(TaskId(2), 30.into());
        graph.record_wait(TaskId(3), 10.into());
        // Task 4 waits into the cycle but is not part of it.
        graph.record_wait(TaskId(4), 10.into());

        crate::ensure_eq!(graph.find_cycle(), Some(vec![TaskId(1), TaskId(2), TaskId(3)]));
        Ok(())
    }

    #[test]
    fn purge_removes_all_traces() -> Result<()> {
        let mut graph: LockGraph = LockGraph::default();
        graph.record_acquire(TaskId(1), 10.into());
        graph.record_wait(TaskId(1), 20.into());
        graph.purge_task(TaskId(1));

        crate::ensure_eq!(graph.owner_of(10.into()), None);
        crate::ensure_eq!(graph.wait_for().is_empty(), true);
        Ok(())
    }
}
