//! GDB (GNU Debugger) MI Interface Module

pub mod types;
pub mod parser;
pub mod error;
pub mod events;
pub mod commands;
pub mod dispatcher;
pub mod client;
pub mod config;
pub mod dialect;
pub mod toolchain;
pub mod sequence;
pub mod launch;

pub use types::*;
pub use client::GdbClient;
pub use config::{LaunchConfig, LaunchMode, SessionConfig, SessionFile};
pub use dialect::{CommandSet, Dialect, DialectProfile};
pub use error::{GdbError, Result};
pub use events::{GdbEvent, SessionEvent};
pub use launch::{launch, LaunchContext};
pub use sequence::{Sequence, Step};
pub use toolchain::Toolchain;
