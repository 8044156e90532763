// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::fail::Fail;
use ::std::{
    fmt,
    str::FromStr,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// The scheduling disciplines the laboratory supports. The `T`-prefixed variants run the same discipline in
/// user-level-thread mode, dispatching coroutine contexts instead of merely simulating slices.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Policy {
    Fcfs,
    Rr,
    Priority,
    Sjf,
    Mlq,
    Mlfq,
    Edf,
    Cfs,
    TFcfs,
    TRr,
    TPriority,
    TMlfq,
    TCfs,
}

/// The underlying discipline of a policy, with the threading mode stripped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Discipline {
    Fcfs,
    Rr,
    Priority,
    Sjf,
    Mlq,
    Mlfq,
    Edf,
    Cfs,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl Policy {
    /// The canonical, case-insensitive policy names.
    pub const ALL: [Policy; 13] = [
        Policy::Fcfs,
        Policy::Rr,
        Policy::Priority,
        Policy::Sjf,
        Policy::Mlq,
        Policy::Mlfq,
        Policy::Edf,
        Policy::Cfs,
        Policy::TFcfs,
        Policy::TRr,
        Policy::TPriority,
        Policy::TMlfq,
        Policy::TCfs,
    ];

    /// The simulation-only battery, in canonical order.
    pub const SIMULATED: [Policy; 8] = [
        Policy::Fcfs,
        Policy::Rr,
        Policy::Priority,
        Policy::Sjf,
        Policy::Mlq,
        Policy::Mlfq,
        Policy::Edf,
        Policy::Cfs,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Policy::Fcfs => "FCFS",
            Policy::Rr => "RR",
            Policy::Priority => "PRIORITY",
            Policy::Sjf => "SJF",
            Policy::Mlq => "MLQ",
            Policy::Mlfq => "MLFQ",
            Policy::Edf => "EDF",
            Policy::Cfs => "CFS",
            Policy::TFcfs => "T_FCFS",
            Policy::TRr => "T_RR",
            Policy::TPriority => "T_PRIORITY",
            Policy::TMlfq => "T_MLFQ",
            Policy::TCfs => "T_CFS",
        }
    }

    /// Whether this policy dispatches real coroutine contexts.
    pub fn is_threaded(&self) -> bool {
        matches!(
            self,
            Policy::TFcfs | Policy::TRr | Policy::TPriority | Policy::TMlfq | Policy::TCfs
        )
    }

    /// The discipline that drives selection and post-slice hooks.
    pub fn discipline(&self) -> Discipline {
        match self {
            Policy::Fcfs | Policy::TFcfs => Discipline::Fcfs,
            Policy::Rr | Policy::TRr => Discipline::Rr,
            Policy::Priority | Policy::TPriority => Discipline::Priority,
            Policy::Sjf => Discipline::Sjf,
            Policy::Mlq => Discipline::Mlq,
            Policy::Mlfq | Policy::TMlfq => Discipline::Mlfq,
            Policy::Edf => Discipline::Edf,
            Policy::Cfs | Policy::TCfs => Discipline::Cfs,
        }
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl FromStr for Policy {
    type Err = Fail;

    fn from_str(name: &str) -> Result<Self, Fail> {
        let canonical: String = name.trim().to_ascii_uppercase();
        for policy in Policy::ALL {
            if policy.name() == canonical {
                return Ok(policy);
            }
        }
        let cause: String = format!("unknown policy name: {:?}", name);
        error!("from_str(): {}", cause);
        Err(Fail::new(libc::EINVAL, &cause))
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[cfg(test)]
mod tests {
    use super::{
        Discipline,
        Policy,
    };
    use ::anyhow::Result;

    #[test]
    fn policy_names_parse_case_insensitively() -> Result<()> {
        crate::ensure_eq!("fcfs".parse::<Policy>()?, Policy::Fcfs);
        crate::ensure_eq!("t_mlfq".parse::<Policy>()?, Policy::TMlfq);
        crate::ensure_eq!("Cfs".parse::<Policy>()?, Policy::Cfs);
        crate::ensure_eq!("nope".parse::<Policy>().is_err(), true);
        Ok(())
    }

    #[test]
    fn threaded_policies_share_disciplines() -> Result<()> {
        crate::ensure_eq!(Policy::TRr.discipline(), Discipline::Rr);
        crate::ensure_eq!(Policy::TRr.is_threaded(), true);
        crate::ensure_eq!(Policy::Rr.is_threaded(), false);
        Ok(())
    }
}
