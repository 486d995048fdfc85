//! rusty-shell - drive a long-lived shell subprocess as a command queue
//!
//! This library provides:
//! - Ordered submission of multi-line command batches to one interpreter
//! - Per-command output delivery and exit status, demultiplexed from the
//!   interpreter's merged stdout/stderr
//! - Startup probing that tells timeouts, refused escalation, and I/O failures apart
//! - A registry holding one plain, one elevated, and one custom session
//!
//! Every submitted command ends in exactly one terminal status. If the
//! interpreter dies, outstanding commands finish with
//! [`ExitStatus::Terminated`](shell::ExitStatus::Terminated) and nothing else
//! reports it, so always inspect the status.
//!
//! # Example
//!
//! ```no_run
//! use rusty_shell::config::SessionConfig;
//! use rusty_shell::shell::{Command, SessionKind, SessionRegistry, StartOptions};
//!
//! fn main() -> anyhow::Result<()> {
//!     let registry = SessionRegistry::new(SessionConfig::default())?;
//!     let shell = registry.start(SessionKind::Plain, &StartOptions::default())?;
//!
//!     let handle = shell.submit(Command::new(["cd /", "ls"], |id: usize, line: &str| {
//!         println!("[{}] {}", id, line);
//!     }))?;
//!     let status = handle.wait_for_finish(None)?;
//!     println!("finished: {}", status);
//!
//!     registry.close_all();
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod shell;
pub mod utils;

// Re-export commonly used types
pub use config::SessionConfig;
pub use shell::{
    Command, CommandHandle, CommandRecord, ExitStatus, SessionKind, SessionRegistry, ShellError,
    ShellSession, StartOptions,
};
