//! GDB/MI session core
//!
//! Parses the debugger's MI output, correlates replies with the commands that
//! caused them, adapts commands to the debugger dialect in use, and drives
//! the launch sequence that brings a debug session up.

pub mod gdb;
