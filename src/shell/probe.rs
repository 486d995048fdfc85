//! Startup probe: proves a freshly spawned interpreter is answering.
//!
//! An elevated interpreter may print a refusal on its first line and never
//! reach a usable prompt, so readiness is never assumed. The probe writes
//! `echo <canary>` and reads until the canary comes back, a denial shows up,
//! or the streams close. The caller bounds the whole exchange with a timeout.

use std::io::{BufRead, Write};
use std::process::Child;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use super::ShellError;
use super::stream::{kill_and_reap, read_line};

/// Canary echoed back by a live shell.
pub const DEFAULT_CANARY: &str = "rusty-shell-started";

/// Output fragments (matched case-insensitively) meaning escalation was refused.
pub const DEFAULT_DENIAL_PATTERNS: &[&str] = &[
    "permission denied",
    "access denied",
    "authentication failure",
    "incorrect password",
    "not in the sudoers",
    "not allowed",
    "must be run from a terminal",
];

#[derive(Debug, Clone)]
pub(crate) struct ProbeSettings {
    pub canary: String,
    pub denial_patterns: Vec<String>,
    pub timeout: Duration,
}

fn is_denial(line: &str, patterns: &[String]) -> bool {
    let lower = line.to_lowercase();
    patterns.iter().any(|p| lower.contains(&p.to_lowercase()))
}

/// Runs the canary exchange on the current thread.
pub(crate) fn probe<R: BufRead, W: Write>(
    reader: &mut R,
    writer: &mut W,
    canary: &str,
    denial_patterns: &[String],
) -> Result<(), ShellError> {
    // A dying interpreter may reject the write after printing its refusal,
    // so a write failure only matters if nothing better shows up.
    let mut write_error = None;
    let written = writer
        .write_all(format!("echo {}\n", canary).as_bytes())
        .and_then(|_| writer.flush());
    if let Err(e) = written {
        warn!("Failed to write startup canary: {}", e);
        write_error = Some(e.to_string());
    }

    let mut buf = Vec::new();
    let mut last_output = None;
    loop {
        let line = match read_line(reader, &mut buf) {
            Ok(Some(line)) => line,
            Ok(None) => {
                let message = write_error.unwrap_or_else(|| match last_output {
                    Some(last) => format!("shell exited before answering the probe: {}", last),
                    None => "shell exited before answering the probe".to_string(),
                });
                return Err(ShellError::StartupIo { message });
            }
            Err(e) => return Err(ShellError::startup_io(e)),
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == canary {
            return Ok(());
        }
        if is_denial(line, denial_patterns) {
            return Err(ShellError::AccessDenied {
                message: line.to_string(),
            });
        }

        debug!("Startup output: {}", line);
        last_output = Some(line.to_string());
    }
}

/// Runs [`probe`] on a transient thread, bounded by `settings.timeout`.
///
/// On success the streams come back for the session loops, with anything
/// already buffered intact. On failure or timeout the child is killed and reaped.
pub(crate) fn run<R, W>(
    child: &mut Child,
    reader: R,
    writer: W,
    settings: &ProbeSettings,
) -> Result<(R, W), ShellError>
where
    R: BufRead + Send + 'static,
    W: Write + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    let canary = settings.canary.clone();
    let patterns = settings.denial_patterns.clone();

    let spawned = thread::Builder::new()
        .name("shell-probe".to_string())
        .spawn(move || {
            let mut reader = reader;
            let mut writer = writer;
            let outcome = probe(&mut reader, &mut writer, &canary, &patterns);
            if tx.send((outcome, reader, writer)).is_err() {
                debug!("Startup probe finished after its caller gave up");
            }
        });
    if let Err(e) = spawned {
        kill_and_reap(child);
        return Err(ShellError::startup_io(e));
    }

    let failure = match rx.recv_timeout(settings.timeout) {
        Ok((Ok(()), reader, writer)) => return Ok((reader, writer)),
        Ok((Err(e), _, _)) => e,
        Err(RecvTimeoutError::Timeout) => ShellError::StartupTimeout {
            timeout: settings.timeout,
        },
        Err(RecvTimeoutError::Disconnected) => {
            ShellError::startup_io("startup probe thread exited without a result")
        }
    };

    warn!("Startup probe of pid {} failed: {}", child.id(), failure);
    kill_and_reap(child);
    Err(failure)
}
