//! Error types for GDB/MI sessions

use thiserror::Error;

pub type Result<T> = std::result::Result<T, GdbError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GdbError {
    /// A line from the debugger that does not follow the MI output grammar
    #[error("Parse error: {0}")]
    Parse(String),

    /// The debugger answered `^error` to a command
    #[error("Command '{command}' failed: {message}")]
    Protocol { command: String, message: String },

    /// A successful result record is missing a field the adapter requires
    #[error("Malformed result for '{command}': missing {field}")]
    MalformedResult { command: String, field: String },

    /// No result record arrived within the configured interval
    #[error("Command timed out after {0}ms")]
    Timeout(u64),

    /// The pending command was cancelled by its caller
    #[error("Command cancelled")]
    Cancelled,

    /// The debugger process went away while the command was outstanding
    #[error("Debug session terminated")]
    SessionTerminated,

    /// A launch step failed; the remaining steps were skipped
    #[error("Launch step '{step}' failed: {source}")]
    Sequence {
        step: String,
        #[source]
        source: Box<GdbError>,
    },

    /// Cancellation was observed before the named step started
    #[error("Launch cancelled before step '{step}'")]
    SequenceCancelled { step: String },

    /// Process I/O and channel failures
    #[error("I/O error: {0}")]
    Io(String),

    /// The debugger or probe executable could not be started
    #[error("Failed to spawn '{program}': {message}")]
    Spawn { program: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl GdbError {
    /// The error that started the failure, looking through step wrappers.
    pub fn root_cause(&self) -> &GdbError {
        match self {
            GdbError::Sequence { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

impl From<std::io::Error> for GdbError {
    fn from(err: std::io::Error) -> Self {
        GdbError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for GdbError {
    fn from(err: serde_json::Error) -> Self {
        GdbError::Config(err.to_string())
    }
}
