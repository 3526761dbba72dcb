//! Typed MI commands
//!
//! Each command knows its wire text and how to turn the reply into a typed
//! value. Logical operations whose text or reply shape differs between
//! debugger dialects carry an explicit style chosen by
//! [`CommandSet`](crate::gdb::dialect::CommandSet).

use crate::gdb::error::{GdbError, Result};
use crate::gdb::parser::escape_c_string;
use crate::gdb::types::*;
use serde::{Deserialize, Serialize};

/// Separator between the token and the command text on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSpacing {
    /// `12-break-insert main`
    Attached,
    /// `12 -thread-list-ids`
    Spaced,
}

/// Wire form of one command, minus the token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedCommand {
    pub text: String,
    pub spacing: TokenSpacing,
    /// Written without a token; resolved by the next untokened result record.
    pub raw: bool,
}

impl RenderedCommand {
    pub fn mi(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            spacing: TokenSpacing::Attached,
            raw: false,
        }
    }

    /// CLI commands take a token the same way MI commands do.
    pub fn cli(text: impl Into<String>) -> Self {
        Self::mi(text)
    }

    pub fn raw(text: impl Into<String>) -> Self {
        Self {
            raw: true,
            ..Self::mi(text)
        }
    }

    pub fn spaced(mut self) -> Self {
        self.spacing = TokenSpacing::Spaced;
        self
    }
}

/// A command with a typed reply
pub trait MiCommand: Send + 'static {
    type Output: Send + 'static;

    fn render(&self) -> RenderedCommand;

    /// Interpret a non-error reply.
    fn decode(&self, output: &MiOutput) -> Result<Self::Output>;
}

/// Quote an argument for the MI command line when it needs it.
pub fn quote(arg: &str) -> String {
    let plain = !arg.is_empty()
        && !arg
            .chars()
            .any(|c| c.is_whitespace() || c == '"' || c == '\\' || c.is_control());
    if plain {
        arg.to_string()
    } else {
        format!("\"{}\"", escape_c_string(arg))
    }
}

fn missing(command: &RenderedCommand, field: &str) -> GdbError {
    GdbError::MalformedResult {
        command: command.text.clone(),
        field: field.to_string(),
    }
}

fn required<'a, C: MiCommand + ?Sized>(
    command: &C,
    output: &'a MiOutput,
    field: &str,
) -> Result<&'a MiValue> {
    output
        .results()
        .value_of(field)
        .ok_or_else(|| missing(&command.render(), field))
}

fn required_const<'a, C: MiCommand + ?Sized>(
    command: &C,
    output: &'a MiOutput,
    field: &str,
) -> Result<&'a str> {
    required(command, output, field)?
        .as_const()
        .ok_or_else(|| missing(&command.render(), field))
}

// ---------------------------------------------------------------------------
// Dialect-variant commands
// ---------------------------------------------------------------------------

/// How the inferior's process id is queried
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PidQuery {
    /// `info proc`, answered on the console as `process N`
    InfoProc,
    /// `info pid`, answered as `^done,process-id="N"`
    InfoPid,
}

#[derive(Debug, Clone)]
pub struct InfoPid {
    pub style: PidQuery,
}

impl MiCommand for InfoPid {
    type Output = u32;

    fn render(&self) -> RenderedCommand {
        match self.style {
            PidQuery::InfoProc => RenderedCommand::cli("info proc"),
            PidQuery::InfoPid => RenderedCommand::cli("info pid"),
        }
    }

    fn decode(&self, output: &MiOutput) -> Result<u32> {
        let pid = match self.style {
            PidQuery::InfoPid => required_const(self, output, "process-id")?.trim().to_string(),
            PidQuery::InfoProc => output
                .console_lines()
                .flat_map(str::lines)
                .find_map(|line| line.trim().strip_prefix("process "))
                .map(|rest| rest.trim().to_string())
                .ok_or_else(|| missing(&self.render(), "process"))?,
        };
        pid.parse()
            .map_err(|_| missing(&self.render(), "process-id"))
    }
}

/// How the thread list is queried
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ThreadQuery {
    /// `info threads` console table
    InfoThreads,
    /// `-thread-list-ids` with `thread-ids={thread-id="1",...}`
    ThreadListIds,
}

#[derive(Debug, Clone)]
pub struct ListThreads {
    pub style: ThreadQuery,
}

impl ListThreads {
    fn lenient_id(text: &str) -> i32 {
        text.trim().parse().unwrap_or(0)
    }
}

impl MiCommand for ListThreads {
    type Output = ThreadIds;

    fn render(&self) -> RenderedCommand {
        match self.style {
            ThreadQuery::InfoThreads => RenderedCommand::cli("info threads"),
            ThreadQuery::ThreadListIds => RenderedCommand::mi("-thread-list-ids").spaced(),
        }
    }

    fn decode(&self, output: &MiOutput) -> Result<ThreadIds> {
        match self.style {
            ThreadQuery::ThreadListIds => {
                // A malformed id stays in place as 0.
                let ids = match required(self, output, "thread-ids")? {
                    MiValue::Tuple(results) => results
                        .iter()
                        .map(|r| r.value.as_const().map(Self::lenient_id).unwrap_or(0))
                        .collect(),
                    MiValue::List(list) => list
                        .values()
                        .map(|v| v.as_const().map(Self::lenient_id).unwrap_or(0))
                        .collect(),
                    MiValue::Const(_) => Vec::new(),
                };
                Ok(ThreadIds { ids })
            }
            ThreadQuery::InfoThreads => {
                let ids = output
                    .console_lines()
                    .flat_map(str::lines)
                    .filter_map(|line| {
                        let line = line.trim_start();
                        let line = line.strip_prefix('*').unwrap_or(line);
                        line.split_whitespace().next()?.parse().ok()
                    })
                    .collect();
                Ok(ThreadIds { ids })
            }
        }
    }
}

/// How `ptype` reaches the CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PtypeStyle {
    Cli,
    /// `-interpreter-exec console "ptype X"`
    InterpreterExec,
}

#[derive(Debug, Clone)]
pub struct Ptype {
    pub expression: String,
    pub style: PtypeStyle,
}

impl MiCommand for Ptype {
    type Output = String;

    fn render(&self) -> RenderedCommand {
        let cli = format!("ptype {}", self.expression);
        match self.style {
            PtypeStyle::Cli => RenderedCommand::cli(cli),
            PtypeStyle::InterpreterExec => RenderedCommand::mi(format!(
                "-interpreter-exec console \"{}\"",
                escape_c_string(&cli)
            ))
            .spaced(),
        }
    }

    fn decode(&self, output: &MiOutput) -> Result<String> {
        let text = output.console_text();
        let text = text.trim();
        if text.is_empty() {
            return Err(missing(&self.render(), "type"));
        }
        Ok(text.strip_prefix("type = ").unwrap_or(text).to_string())
    }
}

/// Shape of the `-var-update` change list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VarUpdateShape {
    /// `changelist=[{name=...},...]`
    Tuples,
    /// `changelist=[varobj={name=...},...]`
    NamedResults,
}

#[derive(Debug, Clone)]
pub struct VarUpdate {
    pub name: String,
    pub shape: VarUpdateShape,
}

impl VarUpdate {
    fn change(tuple: &[MiResult]) -> Option<VarChange> {
        Some(VarChange {
            name: tuple.const_of("name")?.to_string(),
            value: tuple.const_of("value").map(str::to_string),
            in_scope: tuple.const_of("in_scope").map(|s| s == "true").unwrap_or(true),
            type_changed: tuple.const_of("type_changed") == Some("true"),
        })
    }
}

impl MiCommand for VarUpdate {
    type Output = Vec<VarChange>;

    fn render(&self) -> RenderedCommand {
        RenderedCommand::mi(format!("-var-update 1 {}", quote(&self.name)))
    }

    fn decode(&self, output: &MiOutput) -> Result<Vec<VarChange>> {
        let list = required(self, output, "changelist")?
            .as_list()
            .ok_or_else(|| missing(&self.render(), "changelist"))?;
        let changes = match self.shape {
            VarUpdateShape::Tuples => list
                .values()
                .filter_map(MiValue::as_tuple)
                .filter_map(Self::change)
                .collect(),
            VarUpdateShape::NamedResults => list
                .results()
                .filter_map(|r| r.value.as_tuple())
                .filter_map(Self::change)
                .collect(),
        };
        Ok(changes)
    }
}

/// A command answered with `|`-separated values instead of MI results.
///
/// The decoder consumes two tokens per value and keeps the second, so
/// `{a}|{b}|` yields only `{b}`. Existing consumers depend on that pairing.
#[derive(Debug, Clone)]
pub struct DataCommand {
    pub command: String,
}

impl MiCommand for DataCommand {
    type Output = DataValues;

    fn render(&self) -> RenderedCommand {
        RenderedCommand::mi(self.command.clone())
    }

    fn decode(&self, output: &MiOutput) -> Result<DataValues> {
        let tokens: Vec<&str> = output
            .record
            .payload
            .split('|')
            .filter(|t| !t.is_empty())
            .collect();
        let values = tokens
            .chunks(2)
            .filter_map(|pair| pair.get(1))
            .map(|v| v.to_string())
            .collect();
        Ok(DataValues { values })
    }
}

// ---------------------------------------------------------------------------
// Session and target commands
// ---------------------------------------------------------------------------

/// `-gdb-set <name> <value>`
#[derive(Debug, Clone)]
pub struct GdbSet {
    pub name: String,
    pub value: String,
}

impl GdbSet {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl MiCommand for GdbSet {
    type Output = ();

    fn render(&self) -> RenderedCommand {
        RenderedCommand::mi(format!("-gdb-set {} {}", self.name, self.value))
    }

    fn decode(&self, _output: &MiOutput) -> Result<()> {
        Ok(())
    }
}

/// `-gdb-version`; the banner arrives on the console stream.
#[derive(Debug, Clone)]
pub struct GdbVersion;

impl MiCommand for GdbVersion {
    type Output = String;

    fn render(&self) -> RenderedCommand {
        RenderedCommand::mi("-gdb-version")
    }

    fn decode(&self, output: &MiOutput) -> Result<String> {
        Ok(output.console_text())
    }
}

#[derive(Debug, Clone)]
pub struct FileExecAndSymbols {
    pub path: String,
}

impl MiCommand for FileExecAndSymbols {
    type Output = ();

    fn render(&self) -> RenderedCommand {
        RenderedCommand::mi(format!("-file-exec-and-symbols {}", quote(&self.path)))
    }

    fn decode(&self, _output: &MiOutput) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ExecArguments {
    pub arguments: Vec<String>,
}

impl MiCommand for ExecArguments {
    type Output = ();

    fn render(&self) -> RenderedCommand {
        let args: Vec<String> = self.arguments.iter().map(|a| quote(a)).collect();
        RenderedCommand::mi(format!("-exec-arguments {}", args.join(" ")).trim_end().to_string())
    }

    fn decode(&self, _output: &MiOutput) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct EnvironmentCd {
    pub directory: String,
}

impl MiCommand for EnvironmentCd {
    type Output = ();

    fn render(&self) -> RenderedCommand {
        RenderedCommand::mi(format!("-environment-cd {}", quote(&self.directory)))
    }

    fn decode(&self, _output: &MiOutput) -> Result<()> {
        Ok(())
    }
}

/// `-environment-directory`; answers with the resulting search path.
#[derive(Debug, Clone)]
pub struct EnvironmentDirectory {
    pub directories: Vec<String>,
}

impl MiCommand for EnvironmentDirectory {
    type Output = Option<String>;

    fn render(&self) -> RenderedCommand {
        let mut text = String::from("-environment-directory");
        for dir in &self.directories {
            text.push(' ');
            text.push_str(&quote(dir));
        }
        RenderedCommand::mi(text)
    }

    fn decode(&self, output: &MiOutput) -> Result<Option<String>> {
        Ok(output.results().const_of("source-path").map(str::to_string))
    }
}

#[derive(Debug, Clone, Default)]
pub struct BreakInsert {
    pub location: String,
    pub temporary: bool,
    pub condition: Option<String>,
}

impl BreakInsert {
    pub fn at(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            ..Default::default()
        }
    }

    pub fn temporary(mut self) -> Self {
        self.temporary = true;
        self
    }
}

impl MiCommand for BreakInsert {
    type Output = Breakpoint;

    fn render(&self) -> RenderedCommand {
        let mut text = String::from("-break-insert");
        if self.temporary {
            text.push_str(" -t");
        }
        if let Some(cond) = &self.condition {
            text.push_str(" -c ");
            text.push_str(&quote(cond));
        }
        text.push(' ');
        text.push_str(&quote(&self.location));
        RenderedCommand::mi(text)
    }

    fn decode(&self, output: &MiOutput) -> Result<Breakpoint> {
        required(self, output, "bkpt")?
            .as_tuple()
            .and_then(Breakpoint::from_tuple)
            .ok_or_else(|| missing(&self.render(), "bkpt"))
    }
}

#[derive(Debug, Clone)]
pub struct ExecRun;

impl MiCommand for ExecRun {
    type Output = ();

    fn render(&self) -> RenderedCommand {
        RenderedCommand::mi("-exec-run")
    }

    fn decode(&self, _output: &MiOutput) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ExecContinue;

impl MiCommand for ExecContinue {
    type Output = ();

    fn render(&self) -> RenderedCommand {
        RenderedCommand::mi("-exec-continue")
    }

    fn decode(&self, _output: &MiOutput) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ExecInterrupt;

impl MiCommand for ExecInterrupt {
    type Output = ();

    fn render(&self) -> RenderedCommand {
        RenderedCommand::mi("-exec-interrupt")
    }

    fn decode(&self, _output: &MiOutput) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct TargetAttach {
    pub pid: u32,
}

impl MiCommand for TargetAttach {
    type Output = ();

    fn render(&self) -> RenderedCommand {
        RenderedCommand::mi(format!("-target-attach {}", self.pid))
    }

    fn decode(&self, _output: &MiOutput) -> Result<()> {
        Ok(())
    }
}

/// `-target-select <kind> <parameters>`
#[derive(Debug, Clone)]
pub struct TargetSelect {
    pub kind: String,
    pub parameters: String,
}

impl TargetSelect {
    pub fn remote(target: &RemoteTargetConfig) -> Self {
        Self {
            kind: "remote".to_string(),
            parameters: target.to_target_string(),
        }
    }

    pub fn core(core_file: &str) -> Self {
        Self {
            kind: "core".to_string(),
            parameters: quote(core_file),
        }
    }
}

impl MiCommand for TargetSelect {
    type Output = ();

    fn render(&self) -> RenderedCommand {
        RenderedCommand::mi(format!("-target-select {} {}", self.kind, self.parameters))
    }

    fn decode(&self, _output: &MiOutput) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct StackListFrames;

impl MiCommand for StackListFrames {
    type Output = Vec<Frame>;

    fn render(&self) -> RenderedCommand {
        RenderedCommand::mi("-stack-list-frames")
    }

    fn decode(&self, output: &MiOutput) -> Result<Vec<Frame>> {
        let stack = required(self, output, "stack")?
            .as_list()
            .ok_or_else(|| missing(&self.render(), "stack"))?;
        Ok(stack
            .values()
            .filter_map(MiValue::as_tuple)
            .filter_map(Frame::from_tuple)
            .collect())
    }
}

#[derive(Debug, Clone)]
pub struct GdbExit;

impl MiCommand for GdbExit {
    type Output = ();

    fn render(&self) -> RenderedCommand {
        RenderedCommand::mi("-gdb-exit")
    }

    fn decode(&self, _output: &MiOutput) -> Result<()> {
        Ok(())
    }
}

/// Run a CLI command through the console interpreter and collect its output.
#[derive(Debug, Clone)]
pub struct ConsoleCommand {
    pub command: String,
}

impl MiCommand for ConsoleCommand {
    type Output = String;

    fn render(&self) -> RenderedCommand {
        RenderedCommand::mi(format!(
            "-interpreter-exec console \"{}\"",
            escape_c_string(&self.command)
        ))
    }

    fn decode(&self, output: &MiOutput) -> Result<String> {
        Ok(output.console_text())
    }
}
