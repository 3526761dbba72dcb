//! Session and launch configuration

use crate::gdb::error::{GdbError, Result};
use crate::gdb::types::RemoteTargetConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Facts about the host, captured once at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostInfo {
    pub os: String,
}

impl HostInfo {
    pub fn current() -> Self {
        Self::for_os(std::env::consts::OS)
    }

    pub fn for_os(os: &str) -> Self {
        Self { os: os.to_string() }
    }

    /// MinGW and Cygwin dialects only exist here.
    pub fn is_windows(&self) -> bool {
        self.os == "windows"
    }
}

impl Default for HostInfo {
    fn default() -> Self {
        Self::current()
    }
}

/// How the debugger process is started and driven
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub gdb_path: String,
    pub gdb_args: Vec<String>,
    /// Compiler probed for the MinGW and Cygwin markers
    pub gcc_path: String,
    /// Per-command limit; `None` waits indefinitely.
    pub timeout_ms: Option<u64>,
    /// Limit for each `--version` probe
    pub probe_timeout_ms: u64,
    /// Never read from the session file
    #[serde(skip)]
    pub host: HostInfo,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            gdb_path: "gdb".to_string(),
            gdb_args: vec!["--interpreter=mi2".to_string(), "--nx".to_string()],
            gcc_path: "gcc".to_string(),
            timeout_ms: None,
            probe_timeout_ms: 5000,
            host: HostInfo::current(),
        }
    }
}

impl SessionConfig {
    pub fn command_timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

/// What the launch sequence brings up
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum LaunchMode {
    Run,
    Attach { pid: u32 },
    Core { core_file: String },
    Remote { target: RemoteTargetConfig },
}

/// A breakpoint the caller wants installed during launch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakpointSpec {
    pub location: String,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub temporary: bool,
}

fn default_entry_symbol() -> String {
    "main".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchConfig {
    #[serde(flatten)]
    pub mode: LaunchMode,
    #[serde(default)]
    pub program: Option<String>,
    #[serde(default)]
    pub arguments: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub source_dirs: Vec<String>,
    #[serde(default)]
    pub breakpoints: Vec<BreakpointSpec>,
    #[serde(default = "default_true")]
    pub stop_at_entry: bool,
    #[serde(default = "default_entry_symbol")]
    pub entry_symbol: String,
    #[serde(default)]
    pub non_stop: bool,
}

impl LaunchConfig {
    pub fn run(program: impl Into<String>) -> Self {
        Self {
            mode: LaunchMode::Run,
            program: Some(program.into()),
            arguments: Vec::new(),
            working_dir: None,
            source_dirs: Vec::new(),
            breakpoints: Vec::new(),
            stop_at_entry: true,
            entry_symbol: default_entry_symbol(),
            non_stop: false,
        }
    }

    /// Checks that do not need the debugger.
    pub fn validate(&self) -> Result<()> {
        match &self.mode {
            LaunchMode::Run | LaunchMode::Core { .. } if self.program.is_none() => Err(
                GdbError::Config("a program is required for run and core launches".to_string()),
            ),
            LaunchMode::Attach { pid: 0 } => {
                Err(GdbError::Config("attach needs a non-zero pid".to_string()))
            }
            _ if self.stop_at_entry && self.entry_symbol.trim().is_empty() => Err(
                GdbError::Config("entry_symbol must not be empty".to_string()),
            ),
            _ => Ok(()),
        }
    }
}

/// The document the binary reads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionFile {
    #[serde(default)]
    pub session: SessionConfig,
    pub launch: LaunchConfig,
}

impl SessionFile {
    pub fn from_json(text: &str) -> Result<Self> {
        let file: SessionFile = serde_json::from_str(text)?;
        file.launch.validate()?;
        Ok(file)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            GdbError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&text)
    }
}
