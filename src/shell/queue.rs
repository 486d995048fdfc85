//! The ordered command list shared by submitters and a session's loops.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::info;

use super::command::Tracked;
use super::{Command, CommandHandle, ExitStatus, ShellError};

/// Lifecycle of a running session.
///
/// A session only exists once its startup probe succeeded, so the
/// Unstarted and Starting phases live in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Ready,
    /// `close` was requested; queued commands are still being drained.
    Closing,
    /// The reader saw end of stream and the subprocess exited.
    Closed,
}

struct Queue {
    commands: Vec<Arc<Tracked>>,
    closing: bool,
    state: SessionState,
}

pub(crate) struct Shared {
    queue: Mutex<Queue>,
    /// Wakes the dispatcher on submission or close.
    wake: Condvar,
    /// Signals `state` changes to `wait_closed` callers.
    state_changed: Condvar,
    pub(crate) token: String,
}

impl Shared {
    pub(crate) fn new(token: impl Into<String>) -> Self {
        Self {
            queue: Mutex::new(Queue {
                commands: Vec::new(),
                closing: false,
                state: SessionState::Ready,
            }),
            wake: Condvar::new(),
            state_changed: Condvar::new(),
            token: token.into(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn state(&self) -> SessionState {
        self.lock().state
    }

    pub(crate) fn is_closing(&self) -> bool {
        self.lock().closing
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().commands.len()
    }

    /// Appends `command`, assigning it the next id.
    pub(crate) fn push(&self, command: Command) -> Result<CommandHandle, ShellError> {
        let mut queue = self.lock();
        if queue.closing {
            return Err(ShellError::SessionClosed);
        }
        let tracked = Arc::new(Tracked::new(queue.commands.len(), command));
        queue.commands.push(tracked.clone());
        drop(queue);

        self.wake.notify_all();
        Ok(CommandHandle::new(tracked))
    }

    /// Requests shutdown. Returns false if it was already requested.
    pub(crate) fn close(&self) -> bool {
        let mut queue = self.lock();
        if queue.closing {
            return false;
        }
        queue.closing = true;
        if queue.state == SessionState::Ready {
            queue.state = SessionState::Closing;
        }
        drop(queue);

        self.wake.notify_all();
        self.state_changed.notify_all();
        true
    }

    /// Blocks until command `next` exists. `None` once closing with nothing left to send.
    pub(crate) fn next_for_dispatch(&self, next: usize) -> Option<Arc<Tracked>> {
        let mut queue = self.lock();
        while !queue.closing && next >= queue.commands.len() {
            queue = self.wake.wait(queue).unwrap_or_else(|e| e.into_inner());
        }
        queue.commands.get(next).cloned()
    }

    pub(crate) fn command_at(&self, index: usize) -> Option<Arc<Tracked>> {
        self.lock().commands.get(index).cloned()
    }

    /// Called by the reader once the subprocess is gone: rejects further
    /// submissions, terminates every command from `read` on, and marks the
    /// session closed. Returns how many commands were terminated.
    pub(crate) fn finish_session(&self, read: usize) -> usize {
        let outstanding: Vec<Arc<Tracked>> = {
            let mut queue = self.lock();
            queue.closing = true;
            queue.commands.iter().skip(read).cloned().collect()
        };
        self.wake.notify_all();

        let mut terminated = 0;
        for command in outstanding {
            if !command.state().is_terminal() && command.complete(ExitStatus::Terminated) {
                terminated += 1;
            }
        }
        if terminated > 0 {
            info!("Terminated {} unfinished command(s)", terminated);
        }

        self.lock().state = SessionState::Closed;
        self.state_changed.notify_all();
        terminated
    }

    /// Blocks until the session is closed. Returns false if `timeout` elapsed first.
    /// A timeout too large to represent waits without a deadline.
    pub(crate) fn wait_closed(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let mut queue = self.lock();
        while queue.state != SessionState::Closed {
            queue = match deadline {
                None => self
                    .state_changed
                    .wait(queue)
                    .unwrap_or_else(|e| e.into_inner()),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    self.state_changed
                        .wait_timeout(queue, deadline - now)
                        .unwrap_or_else(|e| e.into_inner())
                        .0
                }
            };
        }
        true
    }
}
