//! Debugger dialects and the per-session command table

use crate::gdb::commands::*;
use crate::gdb::config::HostInfo;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Dialect {
    Gdb,
    AppleGdb,
    MinGw,
    Cygwin,
}

impl Dialect {
    /// Classify from `gdb --version` and `gcc --version` output. The gdb
    /// banner wins; the compiler banner only decides the Windows hosts.
    pub fn detect(gdb_version: &str, gcc_version: &str) -> Dialect {
        let gdb = gdb_version.to_lowercase();
        let gcc = gcc_version.to_lowercase();
        if gdb.contains("apple") {
            Dialect::AppleGdb
        } else if gcc.contains("mingw ") {
            Dialect::MinGw
        } else if gcc.contains("cygwin ") {
            Dialect::Cygwin
        } else {
            Dialect::Gdb
        }
    }
}

/// Version number from a `GNU gdb ...` banner, e.g. `12.1` or `6.3.50`.
pub fn gdb_version_number(banner: &str) -> Option<String> {
    static VERSION_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"GNU gdb(?: \([^)]*\))? (\d+(?:\.\d+)+)").expect("must compile")
    });

    VERSION_RE
        .captures(banner)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// What probing found out about the debugger
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DialectProfile {
    pub dialect: Dialect,
    pub gdb_version: Option<String>,
}

impl DialectProfile {
    /// The compiler banner is ignored off Windows, so a MinGW cross compiler
    /// on PATH does not turn on Windows path rewriting.
    pub fn from_probes(gdb_version: &str, gcc_version: &str, host: &HostInfo) -> Self {
        let gcc_version = if host.is_windows() { gcc_version } else { "" };
        Self {
            dialect: Dialect::detect(gdb_version, gcc_version),
            gdb_version: gdb_version_number(gdb_version),
        }
    }
}

/// Concrete command variants for one dialect. Chosen once per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CommandSet {
    pub dialect: Dialect,
    pub pid: PidQuery,
    pub threads: ThreadQuery,
    pub ptype: PtypeStyle,
    pub var_update: VarUpdateShape,
}

impl CommandSet {
    pub fn for_dialect(dialect: Dialect) -> Self {
        match dialect {
            Dialect::AppleGdb => Self {
                dialect,
                pid: PidQuery::InfoPid,
                threads: ThreadQuery::ThreadListIds,
                ptype: PtypeStyle::InterpreterExec,
                var_update: VarUpdateShape::NamedResults,
            },
            Dialect::Gdb | Dialect::MinGw | Dialect::Cygwin => Self {
                dialect,
                pid: PidQuery::InfoProc,
                threads: ThreadQuery::InfoThreads,
                ptype: PtypeStyle::Cli,
                var_update: VarUpdateShape::Tuples,
            },
        }
    }

    pub fn info_pid(&self) -> InfoPid {
        InfoPid { style: self.pid }
    }

    pub fn list_threads(&self) -> ListThreads {
        ListThreads {
            style: self.threads,
        }
    }

    pub fn ptype(&self, expression: impl Into<String>) -> Ptype {
        Ptype {
            expression: expression.into(),
            style: self.ptype,
        }
    }

    pub fn var_update(&self, name: impl Into<String>) -> VarUpdate {
        VarUpdate {
            name: name.into(),
            shape: self.var_update,
        }
    }

    /// Host path as the debugger expects to see it.
    pub fn translate_path(&self, path: &str) -> String {
        match self.dialect {
            Dialect::Cygwin => cygwin_path(path),
            Dialect::MinGw => path.replace('\\', "/"),
            Dialect::Gdb | Dialect::AppleGdb => path.to_string(),
        }
    }
}

impl Default for CommandSet {
    fn default() -> Self {
        Self::for_dialect(Dialect::Gdb)
    }
}

/// `C:\dir\file` -> `/cygdrive/c/dir/file`
fn cygwin_path(path: &str) -> String {
    let mut chars = path.chars();
    match (chars.next(), chars.next()) {
        (Some(drive), Some(':')) if drive.is_ascii_alphabetic() => {
            let rest = chars.as_str().replace('\\', "/");
            let rest = rest.trim_start_matches('/');
            format!("/cygdrive/{}/{}", drive.to_ascii_lowercase(), rest)
        }
        _ => path.replace('\\', "/"),
    }
}
