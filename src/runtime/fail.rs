// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use ::libc::c_int;
use ::std::{
    error,
    fmt,
    io,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Failure
#[derive(Clone)]
pub struct Fail {
    /// Error code.
    pub errno: c_int,
    /// Cause.
    pub cause: String,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

/// Associate Functions for Failures
impl Fail {
    /// Creates a new Failure
    pub fn new(errno: i32, cause: &str) -> Self {
        Self {
            errno,
            cause: cause.to_string(),
        }
    }

    /// A task set that does not pass admission validation.
    pub fn invalid_task(cause: &str) -> Self {
        Self::new(libc::EINVAL, cause)
    }

    /// Context allocation failure.
    pub fn resource_exhausted(cause: &str) -> Self {
        Self::new(libc::ENOMEM, cause)
    }

    /// Run cancelled by external request.
    pub fn cancelled(cause: &str) -> Self {
        Self::new(libc::ECANCELED, cause)
    }

    /// Wall-clock cap exceeded.
    pub fn timeout(cause: &str) -> Self {
        Self::new(libc::ETIMEDOUT, cause)
    }

    /// A cycle was detected but recovery is disabled or no victim can be chosen.
    pub fn deadlock(cause: &str) -> Self {
        Self::new(libc::EDEADLK, cause)
    }

    /// A synchronization operation issued by a task that may not issue it.
    pub fn sync_violation(cause: &str) -> Self {
        Self::new(libc::EPERM, cause)
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

/// Display Trait Implementation for Failures
impl fmt::Display for Fail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error {:?}: {:?}", self.errno, self.cause)
    }
}

/// Debug trait Implementation for Failures
impl fmt::Debug for Fail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error {:?}: {:?}", self.errno, self.cause)
    }
}

/// Error Trait Implementation for Failures
impl error::Error for Fail {}

/// Conversion Trait Implementation for Fail
impl From<io::Error> for Fail {
    fn from(e: io::Error) -> Self {
        Self {
            errno: e.raw_os_error().unwrap_or(libc::EIO),
            cause: format!("I/O error: {}", e),
        }
    }
}
