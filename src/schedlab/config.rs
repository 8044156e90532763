// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::fail::Fail;
use ::std::{
    fs::File,
    io::Read,
    time::Duration,
};
use ::yaml_rust::{
    Yaml,
    YamlLoader,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// How a late arrival seeds its vruntime under fair scheduling.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CfsArrival {
    /// Start from zero, giving latecomers a scheduling advantage.
    Zero,
    /// Inherit the smallest vruntime currently queued.
    MinVruntime,
}

/// Tunables for one laboratory run. The defaults are the canonical ones; a YAML file can override any of them.
#[derive(Clone, Debug)]
pub struct LabConfig {
    /// Time quantum Q.
    pub quantum: u64,
    /// Feedback factor FF: a task that ran `r` units loses `r / FF` priority.
    pub feedback_factor: u64,
    /// Aging increment AG added to every waiting ready task per scheduling decision.
    pub aging_increment: u32,
    /// Cap on aging growth above the base priority.
    pub aging_cap: u32,
    /// Number of feedback levels L for MLFQ.
    pub mlfq_levels: usize,
    /// Priority-boost interval B for threaded MLFQ; zero disables boosting.
    pub boost_interval: u64,
    /// Base fair-share weight W0.
    pub base_weight: u64,
    /// Virtual time between deadlock-detection passes.
    pub detector_period: u64,
    /// Virtual time a paused victim gets to release its locks before they are revoked.
    pub preemption_grace: u64,
    /// Whether forced preemption runs at all when a cycle is found.
    pub recovery_enabled: bool,
    /// Seeding rule for fair-scheduling arrivals.
    pub cfs_arrival: CfsArrival,
    /// Maximum number of live coroutine contexts per run.
    pub context_capacity: usize,
    /// Sleep `run_duration / 10` real milliseconds per slice so humans can follow along. Never affects recorded
    /// virtual times.
    pub visualize: bool,
    /// Wall-clock cap on a run; on expiry the in-flight slice completes and the rest is marked timed out.
    pub wall_clock_cap: Option<Duration>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl LabConfig {
    /// Reads overrides from a YAML file. Keys live under a `schedlab` section; anything absent keeps its default.
    pub fn from_file(path: &str) -> Result<Self, Fail> {
        let mut text: String = String::new();
        File::open(path)?.read_to_string(&mut text)?;
        Self::from_yaml_str(&text)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, Fail> {
        let docs: Vec<Yaml> = match YamlLoader::load_from_str(text) {
            Ok(docs) => docs,
            Err(e) => {
                let cause: String = format!("malformed YAML config: {:?}", e);
                error!("from_yaml_str(): {}", cause);
                return Err(Fail::new(libc::EINVAL, &cause));
            },
        };
        let root: &Yaml = match docs.first() {
            Some(doc) => doc,
            None => return Ok(Self::default()),
        };
        let section: &Yaml = &root["schedlab"];

        let mut config: LabConfig = Self::default();
        if let Some(value) = section["quantum"].as_i64() {
            config.quantum = value as u64;
        }
        if let Some(value) = section["feedback_factor"].as_i64() {
            config.feedback_factor = value as u64;
        }
        if let Some(value) = section["aging_increment"].as_i64() {
            config.aging_increment = value as u32;
        }
        if let Some(value) = section["aging_cap"].as_i64() {
            config.aging_cap = value as u32;
        }
        if let Some(value) = section["mlfq"]["levels"].as_i64() {
            config.mlfq_levels = (value as usize).max(1);
        }
        if let Some(value) = section["mlfq"]["boost_interval"].as_i64() {
            config.boost_interval = value as u64;
        }
        if let Some(value) = section["cfs"]["base_weight"].as_i64() {
            config.base_weight = value as u64;
        }
        if let Some(value) = section["cfs"]["arrival"].as_str() {
            config.cfs_arrival = match value {
                "zero" => CfsArrival::Zero,
                "min_vruntime" => CfsArrival::MinVruntime,
                other => {
                    let cause: String = format!("unknown cfs arrival policy: {:?}", other);
                    error!("from_yaml_str(): {}", cause);
                    return Err(Fail::new(libc::EINVAL, &cause));
                },
            };
        }
        if let Some(value) = section["deadlock"]["detector_period"].as_i64() {
            config.detector_period = (value as u64).max(1);
        }
        if let Some(value) = section["deadlock"]["preemption_grace"].as_i64() {
            config.preemption_grace = value as u64;
        }
        if let Some(value) = section["deadlock"]["recovery"].as_bool() {
            config.recovery_enabled = value;
        }
        if let Some(value) = section["context_capacity"].as_i64() {
            config.context_capacity = value as usize;
        }
        if let Some(value) = section["visualize"].as_bool() {
            config.visualize = value;
        }
        if let Some(value) = section["wall_clock_cap_ms"].as_i64() {
            config.wall_clock_cap = Some(Duration::from_millis(value as u64));
        }
        Ok(config)
    }

    /// Convenience for tests and small scenarios: same defaults, different quantum.
    pub fn with_quantum(quantum: u64) -> Self {
        Self {
            quantum,
            ..Self::default()
        }
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Default for LabConfig {
    fn default() -> Self {
        Self {
            quantum: 100,
            feedback_factor: 50,
            aging_increment: 1,
            aging_cap: 20,
            mlfq_levels: 3,
            boost_interval: 500,
            base_weight: 1024,
            detector_period: 2,
            preemption_grace: 300,
            recovery_enabled: true,
            cfs_arrival: CfsArrival::Zero,
            context_capacity: 64,
            visualize: false,
            wall_clock_cap: None,
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[cfg(test)]
mod tests {
    use super::{
        CfsArrival,
        LabConfig,
    };
    use ::anyhow::Result;

    #[test]
    fn yaml_overrides_defaults() -> Result<()> {
        let text: &str = "
schedlab:
  quantum: 50
  mlfq:
    levels: 4
  cfs:
    arrival: min_vruntime
  deadlock:
    recovery: false
";
        let config: LabConfig = LabConfig::from_yaml_str(text)?;
        crate::ensure_eq!(config.quantum, 50);
        crate::ensure_eq!(config.mlfq_levels, 4);
        crate::ensure_eq!(config.cfs_arrival, CfsArrival::MinVruntime);
        crate::ensure_eq!(config.recovery_enabled, false);
        // Untouched keys keep their defaults.
        crate::ensure_eq!(config.feedback_factor, 50);
        crate::ensure_eq!(config.detector_period, 2);
        Ok(())
    }

    #[test]
    fn bad_yaml_is_rejected() -> Result<()> {
        crate::ensure_eq!(LabConfig::from_yaml_str("schedlab: [unbalanced").is_err(), true);
        Ok(())
    }
}
