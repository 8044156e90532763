// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::fail::Fail;
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
};

//======================================================================================================================
// Constants
//======================================================================================================================

/// Nice values are clamped to this range so weight shifts stay in `u64`.
const NICE_RANGE: (i32, i32) = (-20, 20);

//======================================================================================================================
// Structures
//======================================================================================================================

/// Externally visible task identifier.
#[derive(Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Debug, Serialize, Deserialize)]
pub struct TaskId(pub u32);

/// Lifecycle state of a task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    New,
    Ready,
    Running,
    Blocked,
    Finished,
}

/// Why a task reached the FINISHED state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Completed,
    TimedOut,
}

/// A schedulable task. Identity fields are fixed at construction; the scheduling fields below them are mutated by
/// the policy engine as the run progresses.
#[derive(Clone, Debug)]
pub struct Task {
    id: TaskId,
    arrival_time: u64,
    burst: u64,
    base_priority: u32,
    deadline: Option<u64>,
    nice: i32,

    /// Work still to be done. Monotonically non-increasing; zero exactly when FINISHED.
    pub(crate) remaining: u64,
    /// Dynamic priority (feedback and aging move it; higher number means higher priority).
    pub(crate) priority: u32,
    /// Current queue level for the leveled policies. Only grows, except at a priority boost.
    pub(crate) level: usize,
    /// Virtual time consumed at the current level.
    pub(crate) time_in_level: u64,
    /// Accumulated weighted runtime for fair scheduling.
    pub(crate) vruntime: u64,
    /// Fair-share weight, `W0 / 2^nice`.
    pub(crate) weight: u64,
    pub(crate) state: TaskState,
    pub(crate) finish: Option<FinishReason>,
}

/// A validated set of tasks as submitted by the driver.
#[derive(Clone, Debug)]
pub struct TaskSet {
    tasks: Vec<Task>,
}

/// Owned storage for the tasks of one scheduler run. Every other structure (ready queues, wait queues, graph maps)
/// refers to tasks by id only and resolves them here.
pub struct TaskArena {
    tasks: Vec<Task>,
    index: HashMap<TaskId, usize>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl Task {
    /// Creates a task with no deadline and default nice.
    pub fn new(id: u32, priority: u32, burst: u64, arrival: u64) -> Self {
        Self {
            id: TaskId(id),
            arrival_time: arrival,
            burst,
            base_priority: priority,
            deadline: None,
            nice: 0,
            remaining: burst,
            priority,
            level: 0,
            time_in_level: 0,
            vruntime: 0,
            weight: 1,
            state: TaskState::New,
            finish: None,
        }
    }

    pub fn with_deadline(mut self, deadline: u64) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_nice(mut self, nice: i32) -> Self {
        self.nice = nice.clamp(NICE_RANGE.0, NICE_RANGE.1);
        self
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn arrival_time(&self) -> u64 {
        self.arrival_time
    }

    pub fn burst(&self) -> u64 {
        self.burst
    }

    pub fn base_priority(&self) -> u32 {
        self.base_priority
    }

    pub fn deadline(&self) -> Option<u64> {
        self.deadline
    }

    pub fn nice(&self) -> i32 {
        self.nice
    }

    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    pub fn priority(&self) -> u32 {
        self.priority
    }

    pub fn level(&self) -> usize {
        self.level
    }

    pub fn vruntime(&self) -> u64 {
        self.vruntime
    }

    pub fn weight(&self) -> u64 {
        self.weight
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn finish(&self) -> Option<FinishReason> {
        self.finish
    }

    /// Computes the fair-share weight for this task given the base weight `w0`.
    pub(crate) fn assign_weight(&mut self, w0: u64) {
        self.weight = if self.nice >= 0 {
            (w0 >> self.nice as u32).max(1)
        } else {
            w0 << (-self.nice) as u32
        };
    }
}

impl TaskSet {
    /// Validates and wraps a set of tasks. Admission checks: ids are unique, bursts are positive, and any deadline
    /// leaves room for the full burst after arrival.
    pub fn new(tasks: Vec<Task>) -> Result<Self, Fail> {
        let mut seen: HashSet<TaskId> = HashSet::with_capacity(tasks.len());
        for task in &tasks {
            if task.burst == 0 {
                let cause: String = format!("non-positive burst (id={:?})", task.id);
                error!("new(): {}", cause);
                return Err(Fail::invalid_task(&cause));
            }
            if !seen.insert(task.id) {
                let cause: String = format!("duplicate task id (id={:?})", task.id);
                error!("new(): {}", cause);
                return Err(Fail::invalid_task(&cause));
            }
            if let Some(deadline) = task.deadline {
                if deadline < task.arrival_time + task.burst {
                    let cause: String = format!(
                        "deadline precedes arrival plus burst (id={:?}, deadline={}, arrival={}, burst={})",
                        task.id, deadline, task.arrival_time, task.burst
                    );
                    error!("new(): {}", cause);
                    return Err(Fail::invalid_task(&cause));
                }
            }
        }
        Ok(Self { tasks })
    }

    /// Parses the serialized task-set format: a CSV header `id,priority,burst,arrival,deadline[,nice]` followed by
    /// one row of integers per task. An empty `nice` cell defaults to zero; a zero deadline means none.
    pub fn from_csv(text: &str) -> Result<Self, Fail> {
        let mut lines = text.lines().filter(|l| !l.trim().is_empty());
        let header: &str = match lines.next() {
            Some(h) => h,
            None => return Err(Fail::invalid_task("empty task set")),
        };
        let has_nice: bool = match header.trim() {
            "id,priority,burst,arrival,deadline" => false,
            "id,priority,burst,arrival,deadline,nice" => true,
            other => {
                let cause: String = format!("malformed task set header: {:?}", other);
                error!("from_csv(): {}", cause);
                return Err(Fail::invalid_task(&cause));
            },
        };

        let mut tasks: Vec<Task> = Vec::new();
        for (lineno, line) in lines.enumerate() {
            let fields: Vec<&str> = line.trim().split(',').collect();
            let expected: usize = if has_nice { 6 } else { 5 };
            if fields.len() != expected {
                let cause: String = format!("row {} has {} fields, expected {}", lineno + 2, fields.len(), expected);
                error!("from_csv(): {}", cause);
                return Err(Fail::invalid_task(&cause));
            }
            let parse = |field: &str, what: &str| -> Result<u64, Fail> {
                field.trim().parse::<u64>().map_err(|_| {
                    let cause: String = format!("row {}: bad {} value {:?}", lineno + 2, what, field);
                    error!("from_csv(): {}", cause);
                    Fail::invalid_task(&cause)
                })
            };
            let id: u64 = parse(fields[0], "id")?;
            let priority: u64 = parse(fields[1], "priority")?;
            let burst: u64 = parse(fields[2], "burst")?;
            let arrival: u64 = parse(fields[3], "arrival")?;
            let deadline: u64 = parse(fields[4], "deadline")?;
            let nice: i32 = if has_nice && !fields[5].trim().is_empty() {
                fields[5].trim().parse::<i32>().map_err(|_| {
                    let cause: String = format!("row {}: bad nice value {:?}", lineno + 2, fields[5]);
                    error!("from_csv(): {}", cause);
                    Fail::invalid_task(&cause)
                })?
            } else {
                0
            };

            let mut task: Task = Task::new(id as u32, priority as u32, burst, arrival).with_nice(nice);
            if deadline != 0 {
                task = task.with_deadline(deadline);
            }
            tasks.push(task);
        }
        Self::new(tasks)
    }

    /// Serializes this task set back into its CSV form.
    pub fn to_csv(&self) -> String {
        let mut out: String = String::from("id,priority,burst,arrival,deadline,nice\n");
        for task in &self.tasks {
            out.push_str(&format!(
                "{},{},{},{},{},{}\n",
                u32::from(task.id),
                task.base_priority,
                task.burst,
                task.arrival_time,
                task.deadline.unwrap_or(0),
                task.nice,
            ));
        }
        out
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl TaskArena {
    pub fn new(set: &TaskSet) -> Self {
        let tasks: Vec<Task> = set.tasks().to_vec();
        let index: HashMap<TaskId, usize> = tasks.iter().enumerate().map(|(i, t)| (t.id, i)).collect();
        Self { tasks, index }
    }

    /// Looks up a task. Expects the id to be valid: all ids flowing through the engine come from this arena.
    pub fn get(&self, tid: TaskId) -> &Task {
        &self.tasks[self.index[&tid]]
    }

    pub fn get_mut(&mut self, tid: TaskId) -> &mut Task {
        &mut self.tasks[self.index[&tid]]
    }

    pub fn contains(&self, tid: TaskId) -> bool {
        self.index.contains_key(&tid)
    }

    /// All task ids, ascending.
    pub fn ids(&self) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self.index.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Task> {
        self.tasks.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl From<u32> for TaskId {
    /// Converts a [u32] to a [TaskId].
    fn from(val: u32) -> Self {
        TaskId(val)
    }
}

impl From<TaskId> for u32 {
    /// Converts a [TaskId] to a [u32].
    fn from(val: TaskId) -> Self {
        val.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[cfg(test)]
mod tests {
    use super::{
        Task,
        TaskSet,
    };
    use ::anyhow::Result;

    #[test]
    fn task_set_roundtrips_through_csv() -> Result<()> {
        let set: TaskSet = TaskSet::new(vec![
            Task::new(1, 5, 250, 0),
            Task::new(2, 3, 100, 50).with_deadline(400).with_nice(2),
            Task::new(3, 8, 300, 100).with_nice(-1),
        ])?;

        let csv: String = set.to_csv();
        let reparsed: TaskSet = TaskSet::from_csv(&csv)?;

        crate::ensure_eq!(reparsed.len(), set.len());
        for (a, b) in set.tasks().iter().zip(reparsed.tasks()) {
            crate::ensure_eq!(a.id(), b.id());
            crate::ensure_eq!(a.base_priority(), b.base_priority());
            crate::ensure_eq!(a.burst(), b.burst());
            crate::ensure_eq!(a.arrival_time(), b.arrival_time());
            crate::ensure_eq!(a.deadline(), b.deadline());
            crate::ensure_eq!(a.nice(), b.nice());
        }
        Ok(())
    }

    #[test]
    fn task_set_accepts_empty_nice_cell() -> Result<()> {
        let set: TaskSet = TaskSet::from_csv("id,priority,burst,arrival,deadline,nice\n1,1,10,0,0,\n")?;
        crate::ensure_eq!(set.tasks()[0].nice(), 0);
        Ok(())
    }

    #[test]
    fn task_set_rejects_duplicate_ids() -> Result<()> {
        let result = TaskSet::new(vec![Task::new(1, 1, 10, 0), Task::new(1, 1, 20, 0)]);
        crate::ensure_eq!(result.is_err(), true);
        Ok(())
    }

    #[test]
    fn task_set_rejects_zero_burst() -> Result<()> {
        crate::ensure_eq!(TaskSet::new(vec![Task::new(1, 1, 0, 0)]).is_err(), true);
        Ok(())
    }

    #[test]
    fn task_set_rejects_tight_deadline() -> Result<()> {
        let result = TaskSet::new(vec![Task::new(1, 1, 10, 5).with_deadline(14)]);
        crate::ensure_eq!(result.is_err(), true);
        Ok(())
    }

    #[test]
    fn weight_follows_nice() -> Result<()> {
        let mut a: Task = Task::new(1, 1, 10, 0);
        let mut b: Task = Task::new(2, 1, 10, 0).with_nice(2);
        let mut c: Task = Task::new(3, 1, 10, 0).with_nice(-2);
        a.assign_weight(1024);
        b.assign_weight(1024);
        c.assign_weight(1024);

        crate::ensure_eq!(a.weight(), 1024);
        crate::ensure_eq!(b.weight(), 256);
        crate::ensure_eq!(c.weight(), 4096);
        Ok(())
    }
}
