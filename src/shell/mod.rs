//! Shell execution and process management module.
//!
//! This module drives a long-lived interpreter as an ordered command queue:
//! batches are written to its stdin followed by a sentinel echo, and its
//! merged stdout/stderr is split back into per-command output and exit status.
//!
//! - `command`: commands, handles, sinks, and terminal statuses
//! - `sentinel`: the boundary line format
//! - `probe`: startup readiness check
//! - `dispatcher` / `demux`: the input and output threads
//! - `session` / `registry`: session lifecycle and per-kind singletons

mod capture;
mod command;
mod demux;
mod dispatcher;
mod error;
mod kind;
mod probe;
mod queue;
mod registry;
mod session;
mod stream;

pub mod sentinel;


pub use capture::{CommandRecord, LineBuffer};
pub use command::{Command, CommandHandle, CommandState, ExitStatus, OutputSink};
pub use error::ShellError;
pub use kind::{SessionKind, ShellProgram};
pub use probe::{DEFAULT_CANARY, DEFAULT_DENIAL_PATTERNS};
pub use queue::SessionState;
pub use registry::{SessionRegistry, StartOptions};
pub use session::ShellSession;
