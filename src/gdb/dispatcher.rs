//! Token correlation between outgoing MI commands and incoming result records
//!
//! The dispatcher:
//! - assigns session-unique tokens and writes the wire line
//! - resolves the pending command whose token a result record carries
//! - accumulates out-of-band records that arrive while a command is in flight
//! - broadcasts out-of-band records to subscribers in arrival order

use crate::gdb::commands::{RenderedCommand, TokenSpacing};
use crate::gdb::error::{GdbError, Result};
use crate::gdb::events::SessionEvent;
use crate::gdb::types::*;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};
use uuid::Uuid;

/// Out-of-band records kept for the next result record
pub const MAX_OOB_RECORDS: usize = 20;

type Completion = Box<dyn FnOnce(Result<MiOutput>) + Send>;

struct PendingCommand {
    command: String,
    complete: Completion,
}

impl PendingCommand {
    fn resolve(self, output: MiOutput) {
        let result = if output.record.class == ResultClass::Error {
            Err(GdbError::Protocol {
                command: self.command,
                message: error_message(&output.record),
            })
        } else {
            Ok(output)
        };
        (self.complete)(result);
    }

    fn fail(self, error: GdbError) {
        (self.complete)(Err(error));
    }
}

struct DispatcherState {
    next_token: u64,
    pending: HashMap<u64, PendingCommand>,
    /// The one outstanding command written without a token
    raw: Option<PendingCommand>,
    oob: VecDeque<MiOutputRecord>,
    subscribers: Vec<mpsc::UnboundedSender<SessionEvent>>,
    terminated: bool,
}

/// A queued command: its token (`None` for raw commands) and the decoded reply.
pub struct Submitted<T> {
    pub token: Option<u64>,
    pub reply: oneshot::Receiver<Result<T>>,
}

pub struct Dispatcher {
    session_id: Uuid,
    state: Mutex<DispatcherState>,
    outgoing: mpsc::UnboundedSender<String>,
}

impl Dispatcher {
    /// Lines to write to the debugger arrive on the receiving end of `outgoing`.
    pub fn new(session_id: Uuid, outgoing: mpsc::UnboundedSender<String>) -> Self {
        Self::with_first_token(session_id, outgoing, 1)
    }

    pub fn with_first_token(
        session_id: Uuid,
        outgoing: mpsc::UnboundedSender<String>,
        first_token: u64,
    ) -> Self {
        Self {
            session_id,
            state: Mutex::new(DispatcherState {
                next_token: first_token.max(1),
                pending: HashMap::new(),
                raw: None,
                oob: VecDeque::with_capacity(MAX_OOB_RECORDS),
                subscribers: Vec::new(),
                terminated: false,
            }),
            outgoing,
        }
    }

    fn lock(&self) -> MutexGuard<'_, DispatcherState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue a command. Token assignment, registration and the write happen
    /// under one lock so wire order matches token order. Out-of-band records
    /// seen before the write do not belong to this command and are discarded.
    pub fn submit<T, F>(&self, command: RenderedCommand, decode: F) -> Submitted<T>
    where
        T: Send + 'static,
        F: FnOnce(&MiOutput) -> Result<T> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let complete: Completion = Box::new(move |result: Result<MiOutput>| {
            let _ = tx.send(result.and_then(|output| decode(&output)));
        });
        let pending = PendingCommand {
            command: command.text.clone(),
            complete,
        };

        let mut state = self.lock();
        if state.terminated {
            drop(state);
            pending.fail(GdbError::SessionTerminated);
            return Submitted {
                token: None,
                reply: rx,
            };
        }

        let (token, line) = if command.raw {
            if state.raw.is_some() {
                drop(state);
                pending.fail(GdbError::Protocol {
                    command: command.text,
                    message: "another untokened command is outstanding".to_string(),
                });
                return Submitted {
                    token: None,
                    reply: rx,
                };
            }
            state.raw = Some(pending);
            (None, format!("{}\n", command.text))
        } else {
            let token = Self::allocate_token(&mut state);
            let line = match command.spacing {
                TokenSpacing::Attached => format!("{}{}\n", token, command.text),
                TokenSpacing::Spaced => format!("{} {}\n", token, command.text),
            };
            state.pending.insert(token, pending);
            (Some(token), line)
        };

        state.oob.clear();
        debug!(session = %self.session_id, token = ?token, "-> {}", line.trim_end());
        if self.outgoing.send(line).is_err() {
            let orphan = match token {
                Some(t) => state.pending.remove(&t),
                None => state.raw.take(),
            };
            drop(state);
            if let Some(orphan) = orphan {
                orphan.fail(GdbError::SessionTerminated);
            }
        }

        Submitted { token, reply: rx }
    }

    fn allocate_token(state: &mut DispatcherState) -> u64 {
        loop {
            let token = state.next_token;
            state.next_token = token.checked_add(1).unwrap_or(1);
            if !state.pending.contains_key(&token) {
                return token;
            }
        }
    }

    /// Route one parsed record.
    pub fn handle_record(&self, record: MiOutputRecord) {
        trace!(session = %self.session_id, "<- {}", record);
        match record {
            MiOutputRecord::Result(result) => self.handle_result(result),
            other => {
                let mut state = self.lock();
                if state.oob.len() == MAX_OOB_RECORDS {
                    state.oob.pop_front();
                }
                state.oob.push_back(other.clone());
                broadcast(&mut state, SessionEvent::Record(other));
            }
        }
    }

    fn handle_result(&self, record: MiResultRecord) {
        let mut state = self.lock();
        let pending = match record.token {
            Some(token) => state.pending.remove(&token),
            None => state.raw.take(),
        };

        let Some(pending) = pending else {
            match record.token {
                Some(token) => {
                    // output of a retired command ends with its result
                    state.oob.clear();
                    warn!(session = %self.session_id, token, "Dropping result record for unknown token")
                }
                None => broadcast(&mut state, SessionEvent::Record(MiOutputRecord::Result(record))),
            }
            return;
        };

        let oob = state.oob.drain(..).collect();
        drop(state);
        pending.resolve(MiOutput { record, oob });
    }

    /// Fail a pending command with `Cancelled` and retire its token; `None`
    /// names the outstanding raw command. Returns false when nothing was
    /// waiting.
    pub fn cancel(&self, token: Option<u64>) -> bool {
        let pending = {
            let mut state = self.lock();
            match token {
                Some(token) => state.pending.remove(&token),
                None => state.raw.take(),
            }
        };
        match pending {
            Some(pending) => {
                debug!(session = %self.session_id, token = ?token, "Retired token");
                pending.fail(GdbError::Cancelled);
                true
            }
            None => false,
        }
    }

    /// Fail every outstanding command with `SessionTerminated` and send the
    /// final disconnect event. Later submissions fail immediately.
    pub fn terminate(&self, reason: &str) {
        let mut state = self.lock();
        if state.terminated {
            return;
        }
        state.terminated = true;
        let mut outstanding: Vec<PendingCommand> =
            state.pending.drain().map(|(_, pending)| pending).collect();
        outstanding.extend(state.raw.take());
        broadcast(
            &mut state,
            SessionEvent::Disconnected {
                reason: reason.to_string(),
            },
        );
        state.subscribers.clear();
        drop(state);

        debug!(
            session = %self.session_id,
            failed = outstanding.len(),
            "Session terminated: {}", reason
        );
        for pending in outstanding {
            pending.fail(GdbError::SessionTerminated);
        }
    }

    /// Every record received from now on, then one `Disconnected`.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<SessionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.lock();
        if state.terminated {
            let _ = tx.send(SessionEvent::Disconnected {
                reason: "session already terminated".to_string(),
            });
        } else {
            state.subscribers.retain(|existing| !existing.is_closed());
            state.subscribers.push(tx);
        }
        rx
    }

    pub fn pending_count(&self) -> usize {
        let state = self.lock();
        state.pending.len() + usize::from(state.raw.is_some())
    }

    pub fn is_terminated(&self) -> bool {
        self.lock().terminated
    }
}

fn broadcast(state: &mut DispatcherState, event: SessionEvent) {
    state
        .subscribers
        .retain(|subscriber| subscriber.send(event.clone()).is_ok());
}

/// Message of an `^error` record: `msg`, else `message`, with `{N}`
/// placeholders filled from a `parameters` list.
pub fn error_message(record: &MiResultRecord) -> String {
    let results = record.results.as_slice();
    let Some(message) = results.const_of("msg").or_else(|| results.const_of("message")) else {
        return if record.payload.is_empty() {
            "unknown error".to_string()
        } else {
            record.payload.clone()
        };
    };

    let mut message = message.to_string();
    if let Some(parameters) = results.value_of("parameters").and_then(MiValue::as_list) {
        for (i, parameter) in parameters.values().enumerate() {
            if let Some(text) = parameter.as_const() {
                message = message.replace(&format!("{{{}}}", i), text);
            }
        }
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gdb::parser::MiParser;
    use tokio_test::{assert_err, assert_ok};

    fn dispatcher() -> (Dispatcher, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Dispatcher::new(Uuid::new_v4(), tx), rx)
    }

    fn record(line: &str) -> MiOutputRecord {
        MiParser::new().parse_line(line).unwrap().unwrap()
    }

    fn passthrough(output: &MiOutput) -> Result<MiOutput> {
        Ok(output.clone())
    }

    #[tokio::test]
    async fn test_tokens_are_distinct_and_increasing() {
        let (dispatcher, mut wire) = dispatcher();
        let mut last = 0;
        for _ in 0..50 {
            let submitted = dispatcher.submit(RenderedCommand::mi("-gdb-version"), passthrough);
            let token = submitted.token.unwrap();
            assert!(token > last);
            last = token;
            assert_eq!(wire.recv().await.unwrap(), format!("{}-gdb-version\n", token));
        }
        assert_eq!(dispatcher.pending_count(), 50);
    }

    #[tokio::test]
    async fn test_spaced_and_raw_wire_format() {
        let (dispatcher, mut wire) = dispatcher();
        dispatcher.submit(RenderedCommand::mi("-thread-list-ids").spaced(), passthrough);
        dispatcher.submit(RenderedCommand::raw("info pid"), passthrough);
        assert_eq!(wire.recv().await.unwrap(), "1 -thread-list-ids\n");
        assert_eq!(wire.recv().await.unwrap(), "info pid\n");
    }

    #[tokio::test]
    async fn test_token_wraps_to_one() {
        let (tx, mut wire) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher::with_first_token(Uuid::new_v4(), tx, u64::MAX);
        let first = dispatcher.submit(RenderedCommand::mi("-a"), passthrough);
        let second = dispatcher.submit(RenderedCommand::mi("-b"), passthrough);
        assert_eq!(first.token, Some(u64::MAX));
        assert_eq!(second.token, Some(1));
        wire.recv().await.unwrap();
        assert_eq!(wire.recv().await.unwrap(), "1-b\n");
    }

    #[tokio::test]
    async fn test_result_resolves_matching_token_once() {
        let (dispatcher, _wire) = dispatcher();
        let submitted = dispatcher.submit(RenderedCommand::cli("info proc"), |output| {
            Ok(output.record.results.len())
        });
        dispatcher.handle_record(record("1^done,process-id=\"89643\""));
        // duplicate is dropped without effect
        dispatcher.handle_record(record("1^done"));
        assert_eq!(assert_ok!(submitted.reply.await.unwrap()), 1);
        assert_eq!(dispatcher.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_error_record_carries_message() {
        let (dispatcher, _wire) = dispatcher();
        let submitted = dispatcher.submit(RenderedCommand::mi("-exec-run"), passthrough);
        dispatcher.handle_record(record("1^error,msg=\"No executable file specified.\""));
        let err = assert_err!(submitted.reply.await.unwrap());
        assert_eq!(
            err,
            GdbError::Protocol {
                command: "-exec-run".to_string(),
                message: "No executable file specified.".to_string(),
            }
        );
    }

    #[test]
    fn test_error_message_substitutes_parameters() {
        let rec = match record("^error,message=\"Cannot find {0} in {1}\",parameters=[\"foo\",\"bar.c\"]") {
            MiOutputRecord::Result(r) => r,
            other => panic!("Expected result record, got {:?}", other),
        };
        assert_eq!(error_message(&rec), "Cannot find foo in bar.c");
    }

    #[tokio::test]
    async fn test_oob_records_attach_to_next_result() {
        let (dispatcher, _wire) = dispatcher();
        let mut events = dispatcher.subscribe();
        let submitted = dispatcher.submit(RenderedCommand::cli("ptype x"), passthrough);
        dispatcher.handle_record(record("~\"type = int\\n\""));
        dispatcher.handle_record(record("=thread-created,id=\"1\",group-id=\"i1\""));
        dispatcher.handle_record(record("1^done"));

        let output = assert_ok!(submitted.reply.await.unwrap());
        assert_eq!(output.oob.len(), 2);
        assert_eq!(output.console_text(), "type = int\n");

        let first = events.recv().await.unwrap();
        let second = events.recv().await.unwrap();
        assert_eq!(first, SessionEvent::Record(record("~\"type = int\\n\"")));
        assert!(matches!(second, SessionEvent::Record(MiOutputRecord::Async(_))));
    }

    #[tokio::test]
    async fn test_oob_is_bounded() {
        let (dispatcher, _wire) = dispatcher();
        let submitted = dispatcher.submit(RenderedCommand::mi("-gdb-version"), passthrough);
        for i in 0..(MAX_OOB_RECORDS + 5) {
            dispatcher.handle_record(record(&format!("~\"line {}\"", i)));
        }
        dispatcher.handle_record(record("1^done"));
        let output = assert_ok!(submitted.reply.await.unwrap());
        assert_eq!(output.oob.len(), MAX_OOB_RECORDS);
        assert_eq!(output.console_lines().next(), Some("line 5"));
    }

    #[tokio::test]
    async fn test_oob_before_write_is_not_attached() {
        let (dispatcher, _wire) = dispatcher();
        let mut events = dispatcher.subscribe();
        dispatcher.handle_record(record("*stopped,reason=\"breakpoint-hit\""));
        dispatcher.handle_record(record("~\"  2 Thread 0x7f (LWP 8) main () at a.c:3\\n\""));
        let submitted = dispatcher.submit(RenderedCommand::cli("info threads"), passthrough);
        dispatcher.handle_record(record("~\"* 1 Thread 0x7e (LWP 7) main () at a.c:9\\n\""));
        dispatcher.handle_record(record("1^done"));

        let output = assert_ok!(submitted.reply.await.unwrap());
        assert_eq!(output.oob.len(), 1);
        assert_eq!(output.console_text(), "* 1 Thread 0x7e (LWP 7) main () at a.c:9\n");
        // subscribers still saw everything
        for _ in 0..3 {
            assert!(matches!(events.recv().await, Some(SessionEvent::Record(_))));
        }
    }

    #[tokio::test]
    async fn test_retired_command_output_does_not_leak() {
        let (dispatcher, _wire) = dispatcher();
        let slow = dispatcher.submit(RenderedCommand::cli("ptype a"), passthrough);
        assert!(dispatcher.cancel(slow.token));

        let next = dispatcher.submit(RenderedCommand::cli("ptype b"), passthrough);
        dispatcher.handle_record(record("~\"type = struct big\\n\""));
        dispatcher.handle_record(record("1^done"));
        dispatcher.handle_record(record("~\"type = int\\n\""));
        dispatcher.handle_record(record("2^done"));

        let output = assert_ok!(next.reply.await.unwrap());
        assert_eq!(output.console_text(), "type = int\n");
    }

    #[tokio::test]
    async fn test_every_subscriber_sees_every_record_in_order() {
        let (dispatcher, _wire) = dispatcher();
        let mut a = dispatcher.subscribe();
        let mut b = dispatcher.subscribe();
        for i in 0..5 {
            dispatcher.handle_record(record(&format!("=thread-created,id=\"{}\"", i)));
        }
        for rx in [&mut a, &mut b] {
            for i in 0..5 {
                match rx.recv().await.unwrap() {
                    SessionEvent::Record(r) => {
                        assert_eq!(r.results().const_of("id"), Some(i.to_string().as_str()))
                    }
                    other => panic!("Unexpected event {:?}", other),
                }
            }
        }
    }

    #[tokio::test]
    async fn test_raw_command_resolved_by_untokened_result() {
        let (dispatcher, _wire) = dispatcher();
        let submitted = dispatcher.submit(RenderedCommand::raw("info pid"), passthrough);
        assert_eq!(submitted.token, None);
        dispatcher.handle_record(record("^done,process-id=\"42\""));
        let output = assert_ok!(submitted.reply.await.unwrap());
        assert_eq!(output.results().const_of("process-id"), Some("42"));
    }

    #[tokio::test]
    async fn test_cancel_retires_token() {
        let (dispatcher, _wire) = dispatcher();
        let submitted = dispatcher.submit(RenderedCommand::mi("-exec-next"), passthrough);
        let token = submitted.token.unwrap();
        assert!(dispatcher.cancel(Some(token)));
        assert!(!dispatcher.cancel(Some(token)));
        assert_eq!(submitted.reply.await.unwrap(), Err(GdbError::Cancelled));

        // a late reply for the retired token is dropped
        dispatcher.handle_record(record(&format!("{}^done", token)));
        let next = dispatcher.submit(RenderedCommand::mi("-gdb-version"), passthrough);
        assert_ne!(next.token, Some(token));
    }

    #[tokio::test]
    async fn test_terminate_fails_pending_and_disconnects() {
        let (dispatcher, _wire) = dispatcher();
        let mut events = dispatcher.subscribe();
        let a = dispatcher.submit(RenderedCommand::mi("-exec-continue"), passthrough);
        let b = dispatcher.submit(RenderedCommand::raw("info pid"), passthrough);
        dispatcher.terminate("debugger exited");

        assert_eq!(a.reply.await.unwrap(), Err(GdbError::SessionTerminated));
        assert_eq!(b.reply.await.unwrap(), Err(GdbError::SessionTerminated));
        assert_eq!(
            events.recv().await,
            Some(SessionEvent::Disconnected {
                reason: "debugger exited".to_string()
            })
        );
        assert_eq!(events.recv().await, None);

        let late = dispatcher.submit(RenderedCommand::mi("-gdb-exit"), passthrough);
        assert_eq!(late.reply.await.unwrap(), Err(GdbError::SessionTerminated));
    }

    #[tokio::test]
    async fn test_closed_writer_fails_submission() {
        let (dispatcher, wire) = dispatcher();
        drop(wire);
        let submitted = dispatcher.submit(RenderedCommand::mi("-gdb-version"), passthrough);
        assert_eq!(submitted.reply.await.unwrap(), Err(GdbError::SessionTerminated));
        assert_eq!(dispatcher.pending_count(), 0);
    }
}
