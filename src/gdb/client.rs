//! GDB Client Implementation
//!
//! Owns the debugger process and its stdin/stdout pair. Commands are executed
//! one at a time through a session queue; out-of-band records are delivered
//! to subscribers as they arrive.

use crate::gdb::commands::{GdbExit, MiCommand};
use crate::gdb::config::SessionConfig;
use crate::gdb::dialect::CommandSet;
use crate::gdb::dispatcher::Dispatcher;
use crate::gdb::error::{GdbError, Result};
use crate::gdb::events::SessionEvent;
use crate::gdb::parser::MiParser;
use crate::gdb::toolchain::Toolchain;
use std::process::Stdio;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Grace period for `-gdb-exit` before the process is killed
const EXIT_GRACE: Duration = Duration::from_secs(2);

/// GDB Client for managing debugging sessions
pub struct GdbClient {
    session_id: Uuid,
    dispatcher: Arc<Dispatcher>,
    commands: CommandSet,
    timeout: Option<Duration>,
    /// Held for the whole round-trip of one command
    queue: Mutex<()>,
    process: Mutex<Option<Child>>,
    tasks: Vec<JoinHandle<()>>,
}

impl GdbClient {
    /// Start the debugger and attach a session to its pipes.
    pub async fn spawn(
        config: &SessionConfig,
        toolchain: &Toolchain,
        commands: CommandSet,
    ) -> Result<Self> {
        info!("Starting GDB: {}", toolchain.gdb.display());

        let mut process = Command::new(&toolchain.gdb)
            .args(&config.gdb_args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| GdbError::Spawn {
                program: toolchain.gdb.display().to_string(),
                message: e.to_string(),
            })?;

        let stdin = process
            .stdin
            .take()
            .ok_or_else(|| GdbError::Io("Failed to get stdin".to_string()))?;
        let stdout = process
            .stdout
            .take()
            .ok_or_else(|| GdbError::Io("Failed to get stdout".to_string()))?;
        let stderr = process
            .stderr
            .take()
            .ok_or_else(|| GdbError::Io("Failed to get stderr".to_string()))?;

        let mut client = Self::from_streams(stdout, stdin, commands, config.command_timeout());
        let session_id = client.session_id;
        client.tasks.push(tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(session = %session_id, "GDB stderr: {}", line);
            }
        }));
        *client.process.get_mut() = Some(process);

        info!(session = %session_id, pid = ?client.pid().await, "GDB started");
        Ok(client)
    }

    /// Run a session over arbitrary streams: `reader` carries the debugger's
    /// output, `writer` its input.
    pub fn from_streams<R, W>(
        reader: R,
        writer: W,
        commands: CommandSet,
        timeout: Option<Duration>,
    ) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let session_id = Uuid::new_v4();
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let dispatcher = Arc::new(Dispatcher::new(session_id, outgoing_tx));

        let reader_task = Self::spawn_reader_task(reader, Arc::clone(&dispatcher));
        let writer_task = Self::spawn_writer_task(writer, outgoing_rx, Arc::downgrade(&dispatcher));

        debug!(session = %session_id, dialect = ?commands.dialect, "Session created");
        Self {
            session_id,
            dispatcher,
            commands,
            timeout,
            queue: Mutex::new(()),
            process: Mutex::new(None),
            tasks: vec![reader_task, writer_task],
        }
    }

    fn spawn_reader_task<R>(mut reader: R, dispatcher: Arc<Dispatcher>) -> JoinHandle<()>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        tokio::spawn(async move {
            let mut parser = MiParser::new();
            let mut buf = vec![0u8; 8192];
            let reason = loop {
                match reader.read(&mut buf).await {
                    Ok(0) => break "debugger output closed".to_string(),
                    Ok(n) => {
                        for record in parser.feed(&buf[..n]) {
                            dispatcher.handle_record(record);
                        }
                    }
                    Err(e) => {
                        error!("Error reading GDB output: {}", e);
                        break format!("read error: {}", e);
                    }
                }
            };
            if let Some(record) = parser.flush() {
                dispatcher.handle_record(record);
            }
            info!("GDB output reader stopped");
            dispatcher.terminate(&reason);
        })
    }

    fn spawn_writer_task<W>(
        mut writer: W,
        mut outgoing: mpsc::UnboundedReceiver<String>,
        dispatcher: Weak<Dispatcher>,
    ) -> JoinHandle<()>
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        tokio::spawn(async move {
            while let Some(line) = outgoing.recv().await {
                let written = async {
                    writer.write_all(line.as_bytes()).await?;
                    writer.flush().await
                }
                .await;
                if let Err(e) = written {
                    warn!("Failed to write to GDB: {}", e);
                    if let Some(dispatcher) = dispatcher.upgrade() {
                        dispatcher.terminate(&format!("write error: {}", e));
                    }
                    break;
                }
            }
        })
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// The dialect's command table, fixed for the life of the session.
    pub fn commands(&self) -> &CommandSet {
        &self.commands
    }

    pub async fn pid(&self) -> Option<u32> {
        self.process.lock().await.as_ref().and_then(Child::id)
    }

    /// Execute one command and wait for its typed result. Calls are served
    /// in order; the next command is not written until this one resolves.
    /// Dropping the returned future retires the command's token.
    pub async fn execute<C: MiCommand>(&self, command: C) -> Result<C::Output> {
        let _turn = self.queue.lock().await;

        let rendered = command.render();
        let text = rendered.text.clone();
        let submitted = self
            .dispatcher
            .submit(rendered, move |output| command.decode(output));
        let token = submitted.token;
        let mut in_flight = InFlight {
            dispatcher: &self.dispatcher,
            token,
            answered: false,
        };

        let reply = match self.timeout {
            None => submitted.reply.await,
            Some(limit) => match tokio::time::timeout(limit, submitted.reply).await {
                Ok(reply) => reply,
                Err(_) => {
                    let ms = limit.as_millis() as u64;
                    warn!(session = %self.session_id, token = ?token, command = %text, "Command timed out after {}ms", ms);
                    return Err(GdbError::Timeout(ms));
                }
            },
        };
        in_flight.answered = true;
        reply.map_err(|_| GdbError::SessionTerminated)?
    }

    /// Every out-of-band record from now on, then a final `Disconnected`.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<SessionEvent> {
        self.dispatcher.subscribe()
    }

    pub fn is_alive(&self) -> bool {
        !self.dispatcher.is_terminated()
    }

    /// Ask the debugger to exit, then release the session. Outstanding
    /// commands fail with `SessionTerminated`.
    pub async fn shutdown(&self) -> Result<()> {
        if self.is_alive() {
            match tokio::time::timeout(EXIT_GRACE, self.execute(GdbExit)).await {
                Ok(Ok(())) | Ok(Err(GdbError::SessionTerminated)) => {}
                Ok(Err(e)) => warn!(session = %self.session_id, "-gdb-exit failed: {}", e),
                Err(_) => warn!(session = %self.session_id, "-gdb-exit not acknowledged"),
            }
        }
        self.dispatcher.terminate("session shut down");

        if let Some(mut process) = self.process.lock().await.take() {
            match tokio::time::timeout(EXIT_GRACE, process.wait()).await {
                Ok(status) => debug!(session = %self.session_id, "GDB exited: {:?}", status),
                Err(_) => {
                    warn!(session = %self.session_id, "GDB did not exit, killing it");
                    process.kill().await?;
                }
            }
        }
        info!(session = %self.session_id, "Session closed");
        Ok(())
    }
}

/// A submitted command whose reply has not been received yet
struct InFlight<'a> {
    dispatcher: &'a Dispatcher,
    token: Option<u64>,
    answered: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.answered && self.dispatcher.cancel(self.token) {
            debug!(token = ?self.token, "Caller stopped waiting, token retired");
        }
    }
}

impl Drop for GdbClient {
    fn drop(&mut self) {
        self.dispatcher.terminate("session dropped");
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gdb::commands::*;
    use crate::gdb::dialect::Dialect;
    use crate::gdb::events::GdbEvent;
    use tokio::io::{duplex, DuplexStream, Lines};
    use tokio_test::{assert_err, assert_ok};

    /// The debugger side of an in-memory session.
    struct FakeGdb {
        commands: Lines<BufReader<DuplexStream>>,
        output: DuplexStream,
    }

    impl FakeGdb {
        async fn next_command(&mut self) -> String {
            self.commands.next_line().await.unwrap().unwrap()
        }

        async fn send(&mut self, line: &str) {
            self.output.write_all(line.as_bytes()).await.unwrap();
            self.output.write_all(b"\n").await.unwrap();
        }

        /// Read one command and split off its numeric token.
        async fn next_tokened(&mut self) -> (String, String) {
            let line = self.next_command().await;
            let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
            (line[..digits].to_string(), line[digits..].to_string())
        }
    }

    fn session(dialect: Dialect, timeout: Option<Duration>) -> (GdbClient, FakeGdb) {
        let (client_out, gdb_in) = duplex(4096);
        let (gdb_out, client_in) = duplex(4096);
        let client = GdbClient::from_streams(
            client_in,
            client_out,
            CommandSet::for_dialect(dialect),
            timeout,
        );
        let fake = FakeGdb {
            commands: BufReader::new(gdb_in).lines(),
            output: gdb_out,
        };
        (client, fake)
    }

    #[tokio::test]
    async fn test_apple_info_pid_round_trip() {
        let (client, mut gdb) = session(Dialect::AppleGdb, None);
        let command = client.commands().info_pid();
        let (pid, line) = tokio::join!(client.execute(command), async {
            let line = gdb.next_command().await;
            let token: String = line.chars().take_while(|c| c.is_ascii_digit()).collect();
            gdb.send(&format!("{}^done,process-id=\"89643\"", token)).await;
            line
        });
        assert_eq!(assert_ok!(pid), 89643);
        assert_eq!(line, "1info pid");
    }

    #[tokio::test]
    async fn test_spaced_token_on_the_wire() {
        let (client, mut gdb) = session(Dialect::AppleGdb, None);
        let command = client.commands().list_threads();
        let (ids, _) = tokio::join!(client.execute(command), async {
            let line = gdb.next_command().await;
            assert_eq!(line, "1 -thread-list-ids");
            gdb.send("(gdb)").await;
            gdb.send("1^done,thread-ids={thread-id=\"2\",thread-id=\"1\"},number-of-threads=\"2\"")
                .await;
        });
        assert_eq!(assert_ok!(ids).ids, vec![2, 1]);
    }

    #[tokio::test]
    async fn test_pipe_delimited_reply() {
        let (client, mut gdb) = session(Dialect::Gdb, None);
        let command = DataCommand {
            command: "data".to_string(),
        };
        let (values, _) = tokio::join!(client.execute(command), async {
            let (token, text) = gdb.next_tokened().await;
            assert_eq!(text, "data");
            gdb.send(&format!("{}^done,{{value 1}}|{{value 2}}|", token)).await;
        });
        assert_eq!(assert_ok!(values).values, vec!["{value 2}".to_string()]);
    }

    #[tokio::test]
    async fn test_commands_are_serialized() {
        let (client, mut gdb) = session(Dialect::Gdb, None);
        let first = client.execute(GdbSet::new("pagination", "off"));
        let second = client.execute(GdbSet::new("confirm", "off"));
        let (a, b, _) = tokio::join!(first, second, async {
            let (t1, c1) = gdb.next_tokened().await;
            // nothing else is written until the first command resolves
            let early = tokio::time::timeout(Duration::from_millis(50), gdb.next_command()).await;
            assert!(early.is_err());
            gdb.send(&format!("{}^done", t1)).await;
            let (t2, c2) = gdb.next_tokened().await;
            gdb.send(&format!("{}^done", t2)).await;
            assert!(t2.parse::<u64>().unwrap() > t1.parse::<u64>().unwrap());
            assert_eq!(c1, "-gdb-set pagination off");
            assert_eq!(c2, "-gdb-set confirm off");
        });
        assert_ok!(a);
        assert_ok!(b);
    }

    #[tokio::test]
    async fn test_timeout_keeps_session_usable() {
        let (client, mut gdb) = session(Dialect::Gdb, Some(Duration::from_millis(100)));
        let (slow, _) = tokio::join!(client.execute(ExecContinue), async {
            gdb.next_command().await;
        });
        assert_eq!(slow, Err(GdbError::Timeout(100)));

        // the late reply for the retired token is ignored
        gdb.send("1^running").await;
        let (version, _) = tokio::join!(client.execute(GdbVersion), async {
            let (token, _) = gdb.next_tokened().await;
            assert_eq!(token, "2");
            gdb.send("~\"GNU gdb (GDB) 14.2\\n\"").await;
            gdb.send("2^done").await;
        });
        assert_eq!(assert_ok!(version), "GNU gdb (GDB) 14.2\n");
        assert!(client.is_alive());
    }

    #[tokio::test]
    async fn test_late_output_after_timeout_is_discarded() {
        let (client, mut gdb) = session(Dialect::Gdb, Some(Duration::from_millis(100)));
        let slow = client.commands().ptype("a");
        let (slow, _) = tokio::join!(client.execute(slow), async {
            gdb.next_command().await;
        });
        assert_eq!(slow, Err(GdbError::Timeout(100)));

        let next = client.commands().ptype("b");
        let (ty, _) = tokio::join!(client.execute(next), async {
            let (token, text) = gdb.next_tokened().await;
            assert_eq!((token.as_str(), text.as_str()), ("2", "ptype b"));
            gdb.send("~\"type = struct big\\n\"").await;
            gdb.send("1^done").await;
            gdb.send("~\"type = int\\n\"").await;
            gdb.send("2^done").await;
        });
        assert_eq!(assert_ok!(ty), "int");
    }

    #[tokio::test]
    async fn test_dropped_call_retires_token() {
        let (client, mut gdb) = session(Dialect::Gdb, None);
        let (abandoned, _) = tokio::join!(
            tokio::time::timeout(Duration::from_millis(50), client.execute(ExecContinue)),
            async {
                gdb.next_command().await;
            }
        );
        assert!(abandoned.is_err());
        assert_eq!(client.dispatcher.pending_count(), 0);

        gdb.send("1^running").await;
        let (version, _) = tokio::join!(client.execute(GdbVersion), async {
            let (token, _) = gdb.next_tokened().await;
            assert_eq!(token, "2");
            gdb.send("~\"GNU gdb (GDB) 14.2\\n\"").await;
            gdb.send("2^done").await;
        });
        assert_eq!(assert_ok!(version), "GNU gdb (GDB) 14.2\n");
    }

    #[tokio::test]
    async fn test_error_reply_surfaces_message() {
        let (client, mut gdb) = session(Dialect::Gdb, None);
        let (result, _) = tokio::join!(client.execute(ExecRun), async {
            let (token, _) = gdb.next_tokened().await;
            gdb.send(&format!("{}^error,msg=\"No executable file specified.\"", token))
                .await;
        });
        let err = assert_err!(result);
        assert!(matches!(err, GdbError::Protocol { ref message, .. } if message == "No executable file specified."));
    }

    #[tokio::test]
    async fn test_process_exit_fails_pending_and_disconnects() {
        let (client, mut gdb) = session(Dialect::Gdb, None);
        let mut events = client.subscribe();
        let (result, _) = tokio::join!(client.execute(ExecContinue), async {
            gdb.next_command().await;
            gdb.send("=thread-group-exited,id=\"i1\",exit-code=\"0\"").await;
            drop(gdb);
        });
        assert_eq!(result, Err(GdbError::SessionTerminated));

        let first = events.recv().await.unwrap();
        assert!(matches!(
            first.decode(),
            Some(GdbEvent::ThreadGroupExited { ref id, .. }) if id == "i1"
        ));
        assert!(matches!(
            events.recv().await,
            Some(SessionEvent::Disconnected { .. })
        ));
        assert!(!client.is_alive());
        assert_eq!(client.execute(GdbExit).await, Err(GdbError::SessionTerminated));
    }

    #[tokio::test]
    async fn test_shutdown_sends_gdb_exit() {
        let (client, mut gdb) = session(Dialect::Gdb, None);
        let (result, _) = tokio::join!(client.shutdown(), async {
            let (token, text) = gdb.next_tokened().await;
            assert_eq!(text, "-gdb-exit");
            gdb.send(&format!("{}^exit", token)).await;
        });
        assert_ok!(result);
        assert!(!client.is_alive());
    }
}
