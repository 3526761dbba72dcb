//! GDB Machine Interface (MI) Type Definitions

use crate::gdb::parser::escape_c_string;
use serde::{Deserialize, Serialize};
use std::fmt;

/// GDB/MI result class types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResultClass {
    Done,
    Running,
    Connected,
    Error,
    Exit,
}

impl ResultClass {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "done" => Some(ResultClass::Done),
            "running" => Some(ResultClass::Running),
            "connected" => Some(ResultClass::Connected),
            "error" => Some(ResultClass::Error),
            "exit" => Some(ResultClass::Exit),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResultClass::Done => "done",
            ResultClass::Running => "running",
            ResultClass::Connected => "connected",
            ResultClass::Error => "error",
            ResultClass::Exit => "exit",
        }
    }
}

/// Which of the seven MI record shapes a line carried
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecordKind {
    Result,
    ExecAsync,
    StatusAsync,
    NotifyAsync,
    ConsoleStream,
    TargetStream,
    LogStream,
}

/// Prefix family of an async record: `*`, `+` or `=`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AsyncKind {
    Exec,
    Status,
    Notify,
}

impl AsyncKind {
    pub fn prefix(&self) -> char {
        match self {
            AsyncKind::Exec => '*',
            AsyncKind::Status => '+',
            AsyncKind::Notify => '=',
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputChannel {
    Console,
    Target,
    Log,
}

impl OutputChannel {
    pub fn prefix(&self) -> char {
        match self {
            OutputChannel::Console => '~',
            OutputChannel::Target => '@',
            OutputChannel::Log => '&',
        }
    }
}

/// GDB/MI value: a C-string constant, a tuple of results, or a list
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MiValue {
    Const(String),
    Tuple(Vec<MiResult>),
    List(MiList),
}

impl MiValue {
    pub fn as_const(&self) -> Option<&str> {
        match self {
            MiValue::Const(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_tuple(&self) -> Option<&[MiResult]> {
        match self {
            MiValue::Tuple(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&MiList> {
        match self {
            MiValue::List(l) => Some(l),
            _ => None,
        }
    }

    /// Look up a named field when this value is a tuple.
    pub fn get(&self, variable: &str) -> Option<&MiValue> {
        self.as_tuple()?.value_of(variable)
    }

    pub fn get_const(&self, variable: &str) -> Option<&str> {
        self.get(variable)?.as_const()
    }
}

impl fmt::Display for MiValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MiValue::Const(s) => write!(f, "\"{}\"", escape_c_string(s)),
            MiValue::Tuple(results) => {
                f.write_str("{")?;
                write_separated(f, results)?;
                f.write_str("}")
            }
            MiValue::List(list) => write!(f, "{}", list),
        }
    }
}

/// One element of an MI list.
///
/// The grammar allows a list of values or a list of results. Some producers
/// (Apple's gdb fork in `-var-update`) put result-shaped elements where stock
/// GDB puts values, so both shapes are kept as they arrived.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MiListItem {
    Value(MiValue),
    Result(MiResult),
}

impl fmt::Display for MiListItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MiListItem::Value(v) => write!(f, "{}", v),
            MiListItem::Result(r) => write!(f, "{}", r),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct MiList {
    items: Vec<MiListItem>,
}

impl MiList {
    pub fn new(items: Vec<MiListItem>) -> Self {
        Self { items }
    }

    pub fn items(&self) -> &[MiListItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Every element viewed as a value; result elements yield their value.
    pub fn values(&self) -> impl Iterator<Item = &MiValue> {
        self.items.iter().map(|item| match item {
            MiListItem::Value(v) => v,
            MiListItem::Result(r) => &r.value,
        })
    }

    /// Only the result-shaped elements.
    pub fn results(&self) -> impl Iterator<Item = &MiResult> {
        self.items.iter().filter_map(|item| match item {
            MiListItem::Result(r) => Some(r),
            MiListItem::Value(_) => None,
        })
    }
}

impl fmt::Display for MiList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        write_separated(f, &self.items)?;
        f.write_str("]")
    }
}

/// GDB/MI result (variable=value pair)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MiResult {
    pub variable: String,
    pub value: MiValue,
}

impl MiResult {
    pub fn new(variable: impl Into<String>, value: MiValue) -> Self {
        Self {
            variable: variable.into(),
            value,
        }
    }
}

impl fmt::Display for MiResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.variable, self.value)
    }
}

/// Named lookups over an ordered result list
pub trait ResultsExt {
    fn value_of(&self, variable: &str) -> Option<&MiValue>;

    fn const_of(&self, variable: &str) -> Option<&str> {
        self.value_of(variable)?.as_const()
    }
}

impl ResultsExt for [MiResult] {
    fn value_of(&self, variable: &str) -> Option<&MiValue> {
        self.iter()
            .find(|r| r.variable == variable)
            .map(|r| &r.value)
    }
}

fn write_separated<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(",")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

/// `[token]^class[,results]`
#[derive(Debug, Clone, PartialEq)]
pub struct MiResultRecord {
    pub token: Option<u64>,
    pub class: ResultClass,
    pub results: Vec<MiResult>,
    /// Text after `class,` exactly as received. Replies that are not in
    /// `variable=value` form are only available through this field.
    pub payload: String,
}

impl fmt::Display for MiResultRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(token) = self.token {
            write!(f, "{}", token)?;
        }
        write!(f, "^{}", self.class.as_str())?;
        if !self.results.is_empty() {
            f.write_str(",")?;
            write_separated(f, &self.results)?;
        } else if !self.payload.is_empty() {
            write!(f, ",{}", self.payload)?;
        }
        Ok(())
    }
}

/// `[token]*class`, `[token]+class` or `[token]=class`, followed by results
#[derive(Debug, Clone, PartialEq)]
pub struct MiAsyncRecord {
    pub token: Option<u64>,
    pub kind: AsyncKind,
    pub class: String,
    pub results: Vec<MiResult>,
}

impl fmt::Display for MiAsyncRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(token) = self.token {
            write!(f, "{}", token)?;
        }
        write!(f, "{}{}", self.kind.prefix(), self.class)?;
        if !self.results.is_empty() {
            f.write_str(",")?;
            write_separated(f, &self.results)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MiStreamRecord {
    pub channel: OutputChannel,
    pub content: String,
}

/// GDB/MI output record
#[derive(Debug, Clone, PartialEq)]
pub enum MiOutputRecord {
    Result(MiResultRecord),
    Async(MiAsyncRecord),
    Stream(MiStreamRecord),
}

impl MiOutputRecord {
    pub fn token(&self) -> Option<u64> {
        match self {
            MiOutputRecord::Result(r) => r.token,
            MiOutputRecord::Async(a) => a.token,
            MiOutputRecord::Stream(_) => None,
        }
    }

    pub fn kind(&self) -> RecordKind {
        match self {
            MiOutputRecord::Result(_) => RecordKind::Result,
            MiOutputRecord::Async(a) => match a.kind {
                AsyncKind::Exec => RecordKind::ExecAsync,
                AsyncKind::Status => RecordKind::StatusAsync,
                AsyncKind::Notify => RecordKind::NotifyAsync,
            },
            MiOutputRecord::Stream(s) => match s.channel {
                OutputChannel::Console => RecordKind::ConsoleStream,
                OutputChannel::Target => RecordKind::TargetStream,
                OutputChannel::Log => RecordKind::LogStream,
            },
        }
    }

    pub fn results(&self) -> &[MiResult] {
        match self {
            MiOutputRecord::Result(r) => &r.results,
            MiOutputRecord::Async(a) => &a.results,
            MiOutputRecord::Stream(_) => &[],
        }
    }
}

impl fmt::Display for MiOutputRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MiOutputRecord::Result(r) => write!(f, "{}", r),
            MiOutputRecord::Async(a) => write!(f, "{}", a),
            MiOutputRecord::Stream(s) => {
                write!(f, "{}\"{}\"", s.channel.prefix(), escape_c_string(&s.content))
            }
        }
    }
}

/// A result record together with the out-of-band records that preceded it.
///
/// CLI commands answer through console stream records followed by a bare
/// `^done`, so their adapters decode from `oob`.
#[derive(Debug, Clone, PartialEq)]
pub struct MiOutput {
    pub record: MiResultRecord,
    pub oob: Vec<MiOutputRecord>,
}

impl MiOutput {
    pub fn new(record: MiResultRecord) -> Self {
        Self {
            record,
            oob: Vec::new(),
        }
    }

    pub fn results(&self) -> &[MiResult] {
        &self.record.results
    }

    /// Console stream text received ahead of the result, in arrival order.
    pub fn console_lines(&self) -> impl Iterator<Item = &str> {
        self.oob.iter().filter_map(|r| match r {
            MiOutputRecord::Stream(MiStreamRecord {
                channel: OutputChannel::Console,
                content,
            }) => Some(content.as_str()),
            _ => None,
        })
    }

    pub fn console_text(&self) -> String {
        self.console_lines().collect()
    }
}

/// Stop reason types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StopReason {
    BreakpointHit,
    WatchpointTrigger,
    ReadWatchpointTrigger,
    AccessWatchpointTrigger,
    FunctionFinished,
    LocationReached,
    WatchpointScope,
    EndSteppingRange,
    ExitedSignalled,
    Exited,
    ExitedNormally,
    SignalReceived,
    SolibEvent,
    Fork,
    Vfork,
    SyscallEntry,
    SyscallReturn,
    Unknown(String),
}

impl From<&str> for StopReason {
    fn from(s: &str) -> Self {
        match s {
            "breakpoint-hit" => StopReason::BreakpointHit,
            "watchpoint-trigger" => StopReason::WatchpointTrigger,
            "read-watchpoint-trigger" => StopReason::ReadWatchpointTrigger,
            "access-watchpoint-trigger" => StopReason::AccessWatchpointTrigger,
            "function-finished" => StopReason::FunctionFinished,
            "location-reached" => StopReason::LocationReached,
            "watchpoint-scope" => StopReason::WatchpointScope,
            "end-stepping-range" => StopReason::EndSteppingRange,
            "exited-signalled" => StopReason::ExitedSignalled,
            "exited" => StopReason::Exited,
            "exited-normally" => StopReason::ExitedNormally,
            "signal-received" => StopReason::SignalReceived,
            "solib-event" => StopReason::SolibEvent,
            "fork" => StopReason::Fork,
            "vfork" => StopReason::Vfork,
            "syscall-entry" => StopReason::SyscallEntry,
            "syscall-return" => StopReason::SyscallReturn,
            other => StopReason::Unknown(other.to_string()),
        }
    }
}

/// Breakpoint information
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Breakpoint {
    pub number: String,
    #[serde(rename = "type")]
    pub breakpoint_type: String,
    pub disposition: String,
    pub enabled: bool,
    #[serde(default)]
    pub addr: Option<String>,
    #[serde(default)]
    pub func: Option<String>,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub line: Option<u64>,
    #[serde(default)]
    pub times: u64,
    #[serde(default)]
    pub condition: Option<String>,
}

impl Breakpoint {
    /// Build from the fields of a `bkpt={...}` tuple. `number` is required.
    pub fn from_tuple(tuple: &[MiResult]) -> Option<Self> {
        Some(Breakpoint {
            number: tuple.const_of("number")?.to_string(),
            breakpoint_type: tuple.const_of("type").unwrap_or_default().to_string(),
            disposition: tuple.const_of("disp").unwrap_or_default().to_string(),
            enabled: tuple.const_of("enabled").map(|s| s == "y").unwrap_or(true),
            addr: tuple.const_of("addr").map(str::to_string),
            func: tuple.const_of("func").map(str::to_string),
            file: tuple.const_of("file").map(str::to_string),
            line: tuple.const_of("line").and_then(|s| s.parse().ok()),
            times: tuple
                .const_of("times")
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),
            condition: tuple.const_of("cond").map(str::to_string),
        })
    }
}

/// Frame information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub level: u64,
    pub addr: String,
    #[serde(default)]
    pub func: Option<String>,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub fullname: Option<String>,
    #[serde(default)]
    pub line: Option<u64>,
}

impl Frame {
    /// Build from a `frame={...}` tuple. `*stopped` frames carry no level and
    /// default to 0.
    pub fn from_tuple(tuple: &[MiResult]) -> Option<Self> {
        Some(Frame {
            level: tuple
                .const_of("level")
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),
            addr: tuple.const_of("addr")?.to_string(),
            func: tuple.const_of("func").map(str::to_string),
            file: tuple.const_of("file").map(str::to_string),
            fullname: tuple.const_of("fullname").map(str::to_string),
            line: tuple.const_of("line").and_then(|s| s.parse().ok()),
        })
    }
}

/// One entry of a `-var-update` change list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarChange {
    pub name: String,
    #[serde(default)]
    pub value: Option<String>,
    pub in_scope: bool,
    pub type_changed: bool,
}

/// Thread ids as reported by the debugger.
///
/// Entries that fail to parse are left as 0 rather than removed; the list
/// length always equals the number of ids the debugger sent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThreadIds {
    pub ids: Vec<i32>,
}

/// Values of a pipe-delimited data reply
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataValues {
    pub values: Vec<String>,
}

/// Remote target configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "lowercase")]
pub enum RemoteTargetConfig {
    Tcp {
        host: String,
        port: u16,
    },
    Serial {
        port: String,
        #[serde(default)]
        baud_rate: Option<u32>,
    },
}

impl RemoteTargetConfig {
    pub fn to_target_string(&self) -> String {
        match self {
            RemoteTargetConfig::Tcp { host, port } => format!("{}:{}", host, port),
            RemoteTargetConfig::Serial { port, .. } => port.clone(),
        }
    }
}
