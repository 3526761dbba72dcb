//! Typed decoding of GDB/MI out-of-band records

use crate::gdb::types::*;
use serde::Serialize;

/// What subscribers receive, in arrival order
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Record(MiOutputRecord),
    /// Final event of a session; nothing follows it.
    Disconnected { reason: String },
}

impl SessionEvent {
    pub fn decode(&self) -> Option<GdbEvent> {
        match self {
            SessionEvent::Record(record) => GdbEvent::from_record(record),
            SessionEvent::Disconnected { reason } => Some(GdbEvent::Disconnected {
                reason: reason.clone(),
            }),
        }
    }
}

/// GDB event types
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum GdbEvent {
    Stopped {
        reason: StopReason,
        frame: Option<Frame>,
        thread_id: Option<String>,
    },
    Running {
        thread_id: Option<String>,
    },
    ThreadCreated {
        id: String,
        group_id: Option<String>,
    },
    ThreadExited {
        id: String,
        group_id: Option<String>,
    },
    ThreadSelected {
        id: String,
    },
    ThreadGroupStarted {
        id: String,
        pid: Option<String>,
    },
    ThreadGroupExited {
        id: String,
        exit_code: Option<String>,
    },
    LibraryLoaded {
        id: String,
        target_name: Option<String>,
    },
    LibraryUnloaded {
        id: String,
    },
    BreakpointCreated {
        breakpoint: Breakpoint,
    },
    BreakpointModified {
        breakpoint: Breakpoint,
    },
    BreakpointDeleted {
        id: String,
    },
    /// Any async record without a dedicated variant
    Notification {
        kind: AsyncKind,
        class: String,
        results: Vec<MiResult>,
    },
    Output {
        channel: OutputChannel,
        content: String,
    },
    Disconnected {
        reason: String,
    },
}

fn owned(results: &[MiResult], variable: &str) -> Option<String> {
    results.const_of(variable).map(str::to_string)
}

fn breakpoint(results: &[MiResult]) -> Option<Breakpoint> {
    Breakpoint::from_tuple(results.value_of("bkpt")?.as_tuple()?)
}

impl GdbEvent {
    /// Decode an out-of-band record. Result records are not events.
    pub fn from_record(record: &MiOutputRecord) -> Option<GdbEvent> {
        match record {
            MiOutputRecord::Result(_) => None,
            MiOutputRecord::Stream(s) => Some(GdbEvent::Output {
                channel: s.channel,
                content: s.content.clone(),
            }),
            MiOutputRecord::Async(a) => Some(Self::from_async(a)),
        }
    }

    fn from_async(record: &MiAsyncRecord) -> GdbEvent {
        let results = record.results.as_slice();
        let decoded = match (record.kind, record.class.as_str()) {
            (AsyncKind::Exec, "stopped") => Some(GdbEvent::Stopped {
                reason: results
                    .const_of("reason")
                    .map(StopReason::from)
                    .unwrap_or_else(|| StopReason::Unknown("unknown".to_string())),
                frame: results
                    .value_of("frame")
                    .and_then(MiValue::as_tuple)
                    .and_then(Frame::from_tuple),
                thread_id: owned(results, "thread-id"),
            }),
            (AsyncKind::Exec, "running") => Some(GdbEvent::Running {
                thread_id: owned(results, "thread-id"),
            }),
            (AsyncKind::Notify, "thread-created") => owned(results, "id").map(|id| {
                GdbEvent::ThreadCreated {
                    id,
                    group_id: owned(results, "group-id"),
                }
            }),
            (AsyncKind::Notify, "thread-exited") => owned(results, "id").map(|id| {
                GdbEvent::ThreadExited {
                    id,
                    group_id: owned(results, "group-id"),
                }
            }),
            (AsyncKind::Notify, "thread-selected") => {
                owned(results, "id").map(|id| GdbEvent::ThreadSelected { id })
            }
            (AsyncKind::Notify, "thread-group-started") => owned(results, "id").map(|id| {
                GdbEvent::ThreadGroupStarted {
                    id,
                    pid: owned(results, "pid"),
                }
            }),
            (AsyncKind::Notify, "thread-group-exited") => owned(results, "id").map(|id| {
                GdbEvent::ThreadGroupExited {
                    id,
                    exit_code: owned(results, "exit-code"),
                }
            }),
            (AsyncKind::Notify, "library-loaded") => owned(results, "id").map(|id| {
                GdbEvent::LibraryLoaded {
                    id,
                    target_name: owned(results, "target-name"),
                }
            }),
            (AsyncKind::Notify, "library-unloaded") => {
                owned(results, "id").map(|id| GdbEvent::LibraryUnloaded { id })
            }
            (AsyncKind::Notify, "breakpoint-created") => {
                breakpoint(results).map(|breakpoint| GdbEvent::BreakpointCreated { breakpoint })
            }
            (AsyncKind::Notify, "breakpoint-modified") => {
                breakpoint(results).map(|breakpoint| GdbEvent::BreakpointModified { breakpoint })
            }
            (AsyncKind::Notify, "breakpoint-deleted") => {
                owned(results, "id").map(|id| GdbEvent::BreakpointDeleted { id })
            }
            _ => None,
        };

        decoded.unwrap_or_else(|| GdbEvent::Notification {
            kind: record.kind,
            class: record.class.clone(),
            results: record.results.clone(),
        })
    }
}
