// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::scheduling::{
    task::{
        TaskId,
        TaskSet,
    },
    timeline::Timeline,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Per-task figures derived from a timeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TaskMetrics {
    pub task: TaskId,
    /// First dispatch minus arrival.
    pub response: i64,
    /// Completion minus arrival.
    pub turnaround: i64,
    /// Turnaround minus burst.
    pub waiting: i64,
}

/// Aggregate figures for one policy run.
#[derive(Clone, Debug)]
pub struct MetricsSummary {
    pub policy: String,
    pub avg_response: f64,
    pub avg_turnaround: f64,
    pub avg_waiting: f64,
    pub per_task: Vec<TaskMetrics>,
}

/// The per-policy metric table produced by `analyze`.
#[derive(Clone, Debug, Default)]
pub struct AnalysisReport {
    pub rows: Vec<MetricsSummary>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

/// Computes the metric summary of one run. Tasks that never received a slice (cancelled or timed-out runs) are left
/// out of the averages.
pub fn compute(policy: &str, timeline: &Timeline, set: &TaskSet) -> MetricsSummary {
    let mut per_task: Vec<TaskMetrics> = Vec::with_capacity(set.len());
    for task in set.tasks() {
        let first_start: u64 = match timeline.first_start(task.id()) {
            Some(start) => start,
            None => continue,
        };
        let completion: u64 = match timeline.completion(task.id()) {
            Some(end) => end,
            None => continue,
        };
        let response: i64 = first_start as i64 - task.arrival_time() as i64;
        let turnaround: i64 = completion as i64 - task.arrival_time() as i64;
        per_task.push(TaskMetrics {
            task: task.id(),
            response,
            turnaround,
            waiting: turnaround - task.burst() as i64,
        });
    }

    let n: f64 = per_task.len().max(1) as f64;
    MetricsSummary {
        policy: policy.to_string(),
        avg_response: per_task.iter().map(|m| m.response as f64).sum::<f64>() / n,
        avg_turnaround: per_task.iter().map(|m| m.turnaround as f64).sum::<f64>() / n,
        avg_waiting: per_task.iter().map(|m| m.waiting as f64).sum::<f64>() / n,
        per_task,
    }
}

impl AnalysisReport {
    /// Renders the table in its serialized form: `algorithm,response,turnaround,waiting` at two-decimal fixed
    /// precision.
    pub fn to_csv(&self) -> String {
        let mut out: String = String::from("algorithm,response,turnaround,waiting\n");
        for row in &self.rows {
            out.push_str(&format!(
                "{},{:.2},{:.2},{:.2}\n",
                row.policy, row.avg_response, row.avg_turnaround, row.avg_waiting
            ));
        }
        out
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[cfg(test)]
mod tests {
    use super::{
        compute,
        AnalysisReport,
        MetricsSummary,
    };
    use crate::scheduling::{
        task::{
            Task,
            TaskId,
            TaskSet,
            TaskState,
        },
        timeline::Timeline,
    };
    use ::anyhow::Result;

    #[test]
    fn metrics_match_hand_computation() -> Result<()> {
        // Three tasks, bursts 10/5/3, all arriving at zero, run back to back.
        let set: TaskSet = TaskSet::new(vec![
            Task::new(1, 1, 10, 0),
            Task::new(2, 1, 5, 0),
            Task::new(3, 1, 3, 0),
        ])?;
        let mut timeline: Timeline = Timeline::default();
        timeline.record_slice(TaskId(1), 0, 10, TaskState::Running);
        timeline.record_slice(TaskId(2), 10, 15, TaskState::Running);
        timeline.record_slice(TaskId(3), 15, 18, TaskState::Running);

        let summary: MetricsSummary = compute("FCFS", &timeline, &set);
        crate::ensure_eq!(summary.per_task.len(), 3);
        crate::ensure_eq!(summary.per_task[1].response, 10);
        crate::ensure_eq!(summary.per_task[2].turnaround, 18);
        crate::ensure_eq!(format!("{:.2}", summary.avg_response), "8.33");
        crate::ensure_eq!(format!("{:.2}", summary.avg_turnaround), "14.33");
        crate::ensure_eq!(format!("{:.2}", summary.avg_waiting), "8.33");
        Ok(())
    }

    #[test]
    fn csv_report_uses_two_decimals() -> Result<()> {
        let report: AnalysisReport = AnalysisReport {
            rows: vec![MetricsSummary {
                policy: "RR".to_string(),
                avg_response: 1.0,
                avg_turnaround: 2.5,
                avg_waiting: 0.333,
                per_task: vec![],
            }],
        };
        crate::ensure_eq!(
            report.to_csv(),
            "algorithm,response,turnaround,waiting\nRR,1.00,2.50,0.33\n".to_string()
        );
        Ok(())
    }
}
