// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

mod condvar;
mod mutex;

//======================================================================================================================
// Exports
//======================================================================================================================

pub use self::{
    condvar::SharedConditionVariable,
    mutex::SharedMutex,
};
