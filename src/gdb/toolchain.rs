//! Locating the debugger and compiler, and probing their versions

use crate::gdb::config::SessionConfig;
use crate::gdb::dialect::DialectProfile;
use crate::gdb::error::{GdbError, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Paths used to start the debugger, resolved once per session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    pub gdb: PathBuf,
    /// Absent when no compiler is installed; dialect detection then relies on
    /// the debugger banner alone.
    pub gcc: Option<PathBuf>,
}

/// Existing paths are used as given; bare names are looked up on `PATH`.
pub fn resolve_program(program: &str) -> Result<PathBuf> {
    let path = Path::new(program);
    if path.exists() {
        return Ok(path.to_path_buf());
    }
    which::which(program).map_err(|e| GdbError::Spawn {
        program: program.to_string(),
        message: e.to_string(),
    })
}

impl Toolchain {
    pub fn resolve(config: &SessionConfig) -> Result<Self> {
        let gdb = resolve_program(&config.gdb_path)?;
        let gcc = match resolve_program(&config.gcc_path) {
            Ok(path) => Some(path),
            Err(e) => {
                warn!("Compiler not found, skipping toolchain probe: {}", e);
                None
            }
        };
        debug!(gdb = %gdb.display(), gcc = ?gcc, "Resolved toolchain");
        Ok(Self { gdb, gcc })
    }

    /// Probe both programs and classify the debugger for this host.
    pub async fn detect_profile(&self, config: &SessionConfig) -> Result<DialectProfile> {
        let limit = config.probe_timeout();
        let gdb_version = probe_version(&self.gdb, limit).await?;
        let gcc_version = match &self.gcc {
            Some(gcc) => probe_version(gcc, limit).await.unwrap_or_else(|e| {
                warn!("Compiler version probe failed: {}", e);
                String::new()
            }),
            None => String::new(),
        };
        let profile = DialectProfile::from_probes(&gdb_version, &gcc_version, &config.host);
        info!(
            dialect = ?profile.dialect,
            host = %config.host.os,
            version = ?profile.gdb_version,
            "Detected debugger dialect"
        );
        Ok(profile)
    }
}

/// Stdout of `<program> --version`.
pub async fn probe_version(program: &Path, limit: Duration) -> Result<String> {
    let spawn_error = |message: String| GdbError::Spawn {
        program: program.display().to_string(),
        message,
    };

    let child = Command::new(program)
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| spawn_error(e.to_string()))?;

    let output = tokio::time::timeout(limit, child.wait_with_output())
        .await
        .map_err(|_| GdbError::Timeout(limit.as_millis() as u64))?
        .map_err(|e| spawn_error(e.to_string()))?;

    if !output.status.success() {
        return Err(spawn_error(format!("--version exited with {}", output.status)));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_missing_program() {
        let err = resolve_program("definitely-not-a-debugger-7f3a").unwrap_err();
        assert!(matches!(err, GdbError::Spawn { .. }));
    }

    #[test]
    fn test_resolve_existing_path_unchanged() {
        let exe = std::env::current_exe().unwrap();
        let resolved = resolve_program(exe.to_str().unwrap()).unwrap();
        assert_eq!(resolved, exe);
    }

    #[tokio::test]
    async fn test_probe_missing_program_fails() {
        let err = probe_version(Path::new("/nonexistent/gdb"), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, GdbError::Spawn { .. }));
    }
}
