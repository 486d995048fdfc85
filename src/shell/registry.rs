//! One live session per kind, created on demand and torn down explicitly.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::capture::CommandRecord;
use super::probe::ProbeSettings;
use super::session::StartParams;
use super::{Command, CommandHandle, SessionKind, ShellError, ShellProgram, ShellSession};
use crate::config::SessionConfig;

/// Per-call overrides for [`SessionRegistry::start`].
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    /// Startup probe deadline; defaults to the configured timeout.
    pub timeout: Option<Duration>,
    /// Extra construction attempts for elevated sessions. Ignored for other kinds.
    pub retries: Option<u32>,
    /// Interpreter to spawn instead of the configured one.
    pub program: Option<ShellProgram>,
}

/// Owns the plain, elevated and custom sessions.
///
/// `start` returns the live session for a kind or spawns one; a session that
/// was closed or whose subprocess died is replaced on the next `start`. Each
/// kind has its own startup lock, held while that kind's session starts, so
/// concurrent callers for one kind never spawn two subprocesses. The session
/// map lock is only held for lookups and swaps, never across a startup, so a
/// slow elevated prompt does not stall the other kinds.
pub struct SessionRegistry {
    config: SessionConfig,
    sessions: Mutex<HashMap<SessionKind, Arc<ShellSession>>>,
    starting: [Mutex<()>; SessionKind::ALL.len()],
}

impl SessionRegistry {
    pub fn new(config: SessionConfig) -> Result<Self, ShellError> {
        config.validate()?;
        Ok(Self {
            config,
            sessions: Mutex::new(HashMap::new()),
            starting: Default::default(),
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<SessionKind, Arc<ShellSession>>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn starting(&self, kind: SessionKind) -> MutexGuard<'_, ()> {
        self.starting[kind as usize]
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    /// Returns the open session for `kind`, starting one if needed.
    ///
    /// Only callers starting the same kind wait on each other. A `close` of
    /// this kind issued while it is still starting has nothing to close yet;
    /// the new session is registered once its startup probe succeeds.
    pub fn start(&self, kind: SessionKind, options: &StartOptions) -> Result<Arc<ShellSession>, ShellError> {
        let _starting = self.starting(kind);

        if let Some(existing) = self.sessions().get(&kind) {
            if existing.is_open() {
                debug!("Using existing {} shell", kind);
                return Ok(existing.clone());
            }
            debug!("Replacing closed {} shell", kind);
        }

        let params = self.start_params(kind, options)?;
        let attempts = match kind {
            SessionKind::Elevated => 1 + options.retries.unwrap_or(self.config.elevated_retries),
            _ => 1,
        };

        let session = Arc::new(start_with_retries(&params, attempts)?);
        self.sessions().insert(kind, session.clone());
        Ok(session)
    }

    fn start_params(&self, kind: SessionKind, options: &StartOptions) -> Result<StartParams, ShellError> {
        let program = options
            .program
            .clone()
            .or_else(|| self.config.program_for(kind).cloned())
            .ok_or(ShellError::NoInterpreter { kind })?;

        Ok(StartParams {
            kind,
            program,
            token: self.config.token.clone(),
            probe: ProbeSettings {
                canary: self.config.canary.clone(),
                denial_patterns: self.config.denial_patterns.clone(),
                timeout: options.timeout.unwrap_or_else(|| self.config.startup_timeout()),
            },
        })
    }

    /// Submits `command` to the `kind` session, starting it with defaults if needed.
    pub fn submit(&self, kind: SessionKind, command: Command) -> Result<CommandHandle, ShellError> {
        self.start(kind, &StartOptions::default())?.submit(command)
    }

    /// Runs `lines` on the `kind` session and returns the captured output.
    pub fn run<I, S>(
        &self,
        kind: SessionKind,
        lines: I,
        timeout: Option<Duration>,
    ) -> Result<CommandRecord, ShellError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.start(kind, &StartOptions::default())?.run(lines, timeout)
    }

    /// The open session for `kind`, if any.
    pub fn get(&self, kind: SessionKind) -> Option<Arc<ShellSession>> {
        self.sessions()
            .get(&kind)
            .filter(|session| session.is_open())
            .cloned()
    }

    pub fn is_open(&self, kind: SessionKind) -> bool {
        self.get(kind).is_some()
    }

    pub fn is_any_open(&self) -> bool {
        SessionKind::ALL.iter().any(|kind| self.is_open(*kind))
    }

    /// The preferred open session: custom, then elevated, then plain.
    pub fn open_session(&self) -> Option<Arc<ShellSession>> {
        [SessionKind::Custom, SessionKind::Elevated, SessionKind::Plain]
            .into_iter()
            .find_map(|kind| self.get(kind))
    }

    /// Closes the `kind` session. Returns false if there was none.
    pub fn close(&self, kind: SessionKind) -> bool {
        let removed = self.sessions().remove(&kind);
        match removed {
            Some(session) => {
                session.close();
                true
            }
            None => false,
        }
    }

    pub fn close_all(&self) {
        for kind in SessionKind::ALL {
            self.close(kind);
        }
    }

    /// Runs `id` in an elevated session and reports whether it ran as root.
    pub fn is_access_given(&self, options: &StartOptions) -> bool {
        info!("Checking for elevated access");
        let timeout = options.timeout.unwrap_or_else(|| self.config.startup_timeout());
        let record = self
            .start(SessionKind::Elevated, options)
            .and_then(|session| session.run(["id"], Some(timeout)));

        match record {
            Ok(record) => record.output.iter().any(|line| line.contains("uid=0")),
            Err(e) => {
                info!("Elevated access unavailable: {}", e);
                false
            }
        }
    }
}

impl Drop for SessionRegistry {
    fn drop(&mut self) {
        self.close_all();
    }
}

fn start_with_retries(params: &StartParams, attempts: u32) -> Result<ShellSession, ShellError> {
    let mut attempt = 1;
    loop {
        match ShellSession::start(params) {
            Ok(session) => return Ok(session),
            Err(e) if e.is_retryable() && attempt < attempts => {
                warn!(
                    "Attempt {}/{} to start {} shell failed: {}",
                    attempt, attempts, params.kind, e
                );
                attempt += 1;
            }
            Err(e) => {
                warn!("Could not start {} shell: {}", params.kind, e);
                return Err(e);
            }
        }
    }
}
