//! A live shell subprocess plus its input and output threads.

use std::fmt;
use std::process::Child;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::capture::{CommandRecord, LineBuffer};
use super::probe::{self, ProbeSettings};
use super::queue::{SessionState, Shared};
use super::stream::{Spawned, kill_and_reap, spawn_merged};
use super::{Command, CommandHandle, SessionKind, ShellError, ShellProgram, demux, dispatcher};

const REAP_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Everything needed to bring up one session.
#[derive(Debug, Clone)]
pub(crate) struct StartParams {
    pub kind: SessionKind,
    pub program: ShellProgram,
    pub token: String,
    pub probe: ProbeSettings,
}

/// One long-lived interpreter driven as an ordered command queue.
///
/// Commands are written in submission order by a dedicated input thread;
/// a dedicated output thread attributes the merged stdout/stderr back to
/// them. Dropping the session closes it.
pub struct ShellSession {
    kind: SessionKind,
    program: ShellProgram,
    pid: u32,
    shared: Arc<Shared>,
    child: Arc<Mutex<Child>>,
}

impl ShellSession {
    /// Spawns the interpreter, waits for it to answer the startup probe,
    /// then starts the input and output threads.
    pub(crate) fn start(params: &StartParams) -> Result<Self, ShellError> {
        info!("Starting {} shell: {}", params.kind, params.program);

        let Spawned {
            mut child,
            reader,
            writer,
        } = spawn_merged(&params.program).map_err(|e| ShellError::StartupIo {
            message: format!("failed to spawn {}: {}", params.program, e),
        })?;

        let (reader, writer) = probe::run(&mut child, reader, writer, &params.probe)?;

        let pid = child.id();
        let shared = Arc::new(Shared::new(params.token.clone()));
        let child = Arc::new(Mutex::new(child));

        let input = {
            let shared = shared.clone();
            thread::Builder::new()
                .name(format!("shell-input-{}", pid))
                .spawn(move || {
                    let mut writer = writer;
                    dispatcher::run(&shared, &mut writer);
                })
        };
        if let Err(e) = input {
            kill_and_reap(&mut child.lock().unwrap_or_else(|e| e.into_inner()));
            return Err(ShellError::startup_io(e));
        }

        let output = {
            let shared = shared.clone();
            let child = child.clone();
            thread::Builder::new()
                .name(format!("shell-output-{}", pid))
                .spawn(move || demux::run(&shared, reader, move || reap(&child)))
        };
        if let Err(e) = output {
            shared.close();
            kill_and_reap(&mut child.lock().unwrap_or_else(|e| e.into_inner()));
            return Err(ShellError::startup_io(e));
        }

        info!("{} shell ready (pid {})", params.kind, pid);
        Ok(Self {
            kind: params.kind,
            program: params.program.clone(),
            pid,
            shared,
            child,
        })
    }

    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    pub fn program(&self) -> &ShellProgram {
        &self.program
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// True until `close` is requested or the subprocess goes away.
    pub fn is_open(&self) -> bool {
        !self.shared.is_closing()
    }

    /// Number of commands submitted so far.
    pub fn submitted(&self) -> usize {
        self.shared.len()
    }

    /// Queues `command` behind everything already submitted.
    ///
    /// Fails with [`ShellError::SessionClosed`] once the session is closing.
    /// Success only means the command was queued: its outcome, including
    /// [`ExitStatus::Terminated`](super::ExitStatus::Terminated) if the shell
    /// dies, is reported solely through the returned handle and its sink.
    pub fn submit(&self, command: Command) -> Result<CommandHandle, ShellError> {
        let handle = self.shared.push(command)?;
        debug!("Queued command {} on {} shell", handle.id(), self.kind);
        Ok(handle)
    }

    /// Submits `lines`, waits for them, and returns the captured output.
    pub fn run<I, S>(&self, lines: I, timeout: Option<Duration>) -> Result<CommandRecord, ShellError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let lines: Vec<String> = lines.into_iter().map(Into::into).collect();
        let buffer = LineBuffer::default();
        let handle = self.submit(Command::new(lines.clone(), buffer.clone()))?;
        let status = handle.wait_for_finish(timeout)?;
        Ok(CommandRecord::new(handle.id(), lines, &buffer, status))
    }

    /// Stops accepting commands; queued ones still run, then the shell is told to exit.
    /// Idempotent.
    pub fn close(&self) {
        if self.shared.close() {
            info!("Closing {} shell (pid {})", self.kind, self.pid);
        }
    }

    /// Kills the subprocess. Every unfinished command is terminated once the
    /// output closes, which waits for any background job still holding it.
    pub fn kill(&self) {
        self.shared.close();
        let mut child = self.child.lock().unwrap_or_else(|e| e.into_inner());
        match child.kill() {
            Ok(()) => warn!("Killed {} shell (pid {})", self.kind, self.pid),
            Err(e) => debug!("Kill of pid {} failed: {}", self.pid, e),
        }
    }

    /// Blocks until the output thread has seen the subprocess exit.
    /// Returns false if `timeout` elapsed first.
    pub fn wait_closed(&self, timeout: Option<Duration>) -> bool {
        self.shared.wait_closed(timeout)
    }
}

impl Drop for ShellSession {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for ShellSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShellSession")
            .field("kind", &self.kind)
            .field("program", &self.program)
            .field("pid", &self.pid)
            .field("state", &self.state())
            .finish()
    }
}

/// Waits for the child without holding its lock across the wait, so `kill`
/// stays usable if the shell closed its output but kept running.
fn reap(child: &Mutex<Child>) {
    loop {
        let mut guard = child.lock().unwrap_or_else(|e| e.into_inner());
        match guard.try_wait() {
            Ok(Some(status)) => {
                debug!("Shell pid {} exited: {}", guard.id(), status);
                return;
            }
            Ok(None) => {}
            Err(e) => {
                warn!("Failed to wait for shell pid {}: {}", guard.id(), e);
                return;
            }
        }
        drop(guard);
        thread::sleep(REAP_POLL_INTERVAL);
    }
}
