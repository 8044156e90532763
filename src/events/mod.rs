// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    deadlock::graph::LockId,
    scheduling::task::{
        FinishReason,
        TaskId,
    },
};
use ::serde::{
    Deserialize,
    Serialize,
};
use ::std::io::Write;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Everything the core reports to the outside world. No free-form strings: external collaborators match on the
/// variants; the textual rendering below is a presentation concern.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum Event {
    PolicyStart {
        policy: String,
        time: u64,
    },
    PolicyEnd {
        policy: String,
        time: u64,
    },
    SliceRecorded {
        task: TaskId,
        start: u64,
        end: u64,
    },
    TaskFinished {
        task: TaskId,
        time: u64,
        reason: FinishReason,
    },
    PriorityAdjusted {
        task: TaskId,
        from: u32,
        to: u32,
    },
    Demoted {
        task: TaskId,
        level: usize,
    },
    Boosted {
        time: u64,
    },
    DeadlineMiss {
        task: TaskId,
        completion: u64,
        deadline: u64,
    },
    DeadlockDetected {
        cycle: Vec<TaskId>,
    },
    ForcedRelease {
        lock: LockId,
        victim: TaskId,
    },
}

/// Sink interface handed to a run by the driver.
pub trait EventSink {
    fn emit(&mut self, event: &Event);
}

/// Discards every event.
pub struct NullSink;

/// Serializes one JSON object per line for machine consumption.
pub struct JsonLineSink<W: Write> {
    writer: W,
}

/// Renders events through the logging facade.
pub struct LogSink;

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl<W: Write> JsonLineSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl EventSink for NullSink {
    fn emit(&mut self, _event: &Event) {}
}

impl<W: Write> EventSink for JsonLineSink<W> {
    fn emit(&mut self, event: &Event) {
        match serde_json::to_string(event) {
            Ok(line) => {
                if let Err(e) = writeln!(self.writer, "{}", line) {
                    warn!("emit(): failed to write event: {:?}", e);
                }
            },
            Err(e) => warn!("emit(): failed to serialize event: {:?}", e),
        }
    }
}

impl EventSink for LogSink {
    fn emit(&mut self, event: &Event) {
        debug!("{:?}", event);
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[cfg(test)]
mod tests {
    use super::{
        Event,
        EventSink,
        JsonLineSink,
    };
    use crate::scheduling::task::TaskId;
    use ::anyhow::Result;

    #[test]
    fn events_serialize_one_json_object_per_line() -> Result<()> {
        let mut sink: JsonLineSink<Vec<u8>> = JsonLineSink::new(Vec::new());
        sink.emit(&Event::SliceRecorded {
            task: TaskId(1),
            start: 0,
            end: 4,
        });
        sink.emit(&Event::DeadlockDetected {
            cycle: vec![TaskId(1), TaskId(2)],
        });

        let text: String = String::from_utf8(sink.into_inner())?;
        let lines: Vec<&str> = text.lines().collect();
        crate::ensure_eq!(lines.len(), 2);

        let first: Event = serde_json::from_str(lines[0])?;
        crate::ensure_eq!(
            first,
            Event::SliceRecorded {
                task: TaskId(1),
                start: 0,
                end: 4
            }
        );
        Ok(())
    }
}
