//! Commands submitted to a shell session and their completion tracking.
//!
//! A [`Command`] is built by the caller and consumed by
//! [`ShellSession::submit`](super::ShellSession::submit), which assigns its id
//! and returns a [`CommandHandle`]. Every submitted command reaches exactly one
//! terminal status, including when the subprocess dies underneath it.

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, warn};

use super::ShellError;

/// Lifecycle of a submitted command. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandState {
    /// Queued, not yet written to the shell.
    Pending,
    /// Written to the shell, sentinel not yet seen.
    Dispatched,
    /// Sentinel seen.
    Finished,
    /// The shell went away before the sentinel arrived.
    Terminated,
}

impl CommandState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Terminated)
    }
}

/// Terminal outcome of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExitStatus {
    /// Exit status reported by the shell through the sentinel line.
    Code(i32),
    /// The sentinel arrived but its exit-code field did not parse.
    Unparsable,
    /// The subprocess closed its output before this command's sentinel.
    Terminated,
}

impl ExitStatus {
    /// Numeric code reported for [`ExitStatus::Terminated`].
    pub const TERMINATED_CODE: i32 = -1;
    /// Numeric code reported for [`ExitStatus::Unparsable`].
    pub const UNPARSABLE_CODE: i32 = -2;

    /// Flattens the status into a single integer for callers that want one.
    pub fn code(self) -> i32 {
        match self {
            Self::Code(code) => code,
            Self::Unparsable => Self::UNPARSABLE_CODE,
            Self::Terminated => Self::TERMINATED_CODE,
        }
    }

    pub fn success(self) -> bool {
        self == Self::Code(0)
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Code(code) => write!(f, "exit {}", code),
            Self::Unparsable => f.write_str("exit status unparsable"),
            Self::Terminated => f.write_str("unexpected termination"),
        }
    }
}

/// Receives a command's output, line by line, on the session's reader thread.
///
/// `output` is called zero or more times in order, then `finished` exactly once.
/// Waiters are woken just before `finished` runs, so a sink may wait on its
/// own command's handle from inside `finished`.
pub trait OutputSink: Send {
    fn output(&mut self, id: usize, line: &str);

    fn finished(&mut self, id: usize, status: ExitStatus) {
        debug!("Command {} finished: {}", id, status);
    }
}

impl<F> OutputSink for F
where
    F: FnMut(usize, &str) + Send,
{
    fn output(&mut self, id: usize, line: &str) {
        self(id, line)
    }
}

/// A batch of shell lines plus the sink that receives its output.
pub struct Command {
    lines: Vec<String>,
    sink: Box<dyn OutputSink>,
}

impl Command {
    pub fn new<I, S>(lines: I, sink: impl OutputSink + 'static) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
            sink: Box::new(sink),
        }
    }

    /// A command whose output is dropped; only the exit status is kept.
    pub fn discarding<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(lines, |_: usize, _: &str| {})
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command").field("lines", &self.lines).finish()
    }
}

struct Progress {
    state: CommandState,
    /// Set together with the terminal state, before the sink's `finished` runs.
    status: Option<ExitStatus>,
}

/// A command owned by a session, shared between the loops and every handle.
pub(crate) struct Tracked {
    id: usize,
    lines: Vec<String>,
    sink: Mutex<Box<dyn OutputSink>>,
    progress: Mutex<Progress>,
    changed: Condvar,
    status_tx: watch::Sender<Option<ExitStatus>>,
}

impl Tracked {
    pub(crate) fn new(id: usize, command: Command) -> Self {
        let (status_tx, _) = watch::channel(None);
        Self {
            id,
            lines: command.lines,
            sink: Mutex::new(command.sink),
            progress: Mutex::new(Progress {
                state: CommandState::Pending,
                status: None,
            }),
            changed: Condvar::new(),
            status_tx,
        }
    }

    pub(crate) fn id(&self) -> usize {
        self.id
    }

    pub(crate) fn lines(&self) -> &[String] {
        &self.lines
    }

    fn progress(&self) -> MutexGuard<'_, Progress> {
        self.progress.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn state(&self) -> CommandState {
        self.progress().state
    }

    pub(crate) fn status(&self) -> Option<ExitStatus> {
        self.progress().status
    }

    /// Pending → Dispatched. Returns false if the command already moved on.
    pub(crate) fn mark_dispatched(&self) -> bool {
        let mut progress = self.progress();
        if progress.state == CommandState::Pending {
            progress.state = CommandState::Dispatched;
            true
        } else {
            false
        }
    }

    pub(crate) fn deliver(&self, line: &str) {
        let mut sink = self.sink.lock().unwrap_or_else(|e| e.into_inner());
        sink.output(self.id, line);
    }

    /// Moves the command to its terminal state. Only the first call has any effect.
    pub(crate) fn complete(&self, status: ExitStatus) -> bool {
        {
            let mut progress = self.progress();
            if progress.state.is_terminal() {
                warn!(
                    "Command {} already {:?}, ignoring {}",
                    self.id, progress.state, status
                );
                return false;
            }
            progress.state = match status {
                ExitStatus::Terminated => CommandState::Terminated,
                _ => CommandState::Finished,
            };
            progress.status = Some(status);
        }
        self.changed.notify_all();
        self.status_tx.send_replace(Some(status));

        self.sink
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .finished(self.id, status);
        true
    }

    /// Blocks until a terminal status is published, or `timeout` elapses.
    /// A timeout too large to represent waits without a deadline.
    pub(crate) fn wait(&self, timeout: Option<Duration>) -> Option<ExitStatus> {
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let mut progress = self.progress();
        loop {
            if let Some(status) = progress.status {
                return Some(status);
            }
            progress = match deadline {
                None => self
                    .changed
                    .wait(progress)
                    .unwrap_or_else(|e| e.into_inner()),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return None;
                    }
                    self.changed
                        .wait_timeout(progress, deadline - now)
                        .unwrap_or_else(|e| e.into_inner())
                        .0
                }
            };
        }
    }

    pub(crate) async fn finished(&self) -> ExitStatus {
        let mut rx = self.status_tx.subscribe();
        match rx.wait_for(Option::is_some).await {
            Ok(status) => (*status).unwrap_or(ExitStatus::Terminated),
            // The sender lives in `self`, so it cannot be dropped while we wait.
            Err(_) => ExitStatus::Terminated,
        }
    }
}

/// Caller-side view of a submitted command. Cheap to clone; all clones
/// observe the same terminal status.
#[derive(Clone)]
pub struct CommandHandle {
    inner: Arc<Tracked>,
}

impl CommandHandle {
    pub(crate) fn new(inner: Arc<Tracked>) -> Self {
        Self { inner }
    }

    /// Position of the command in its session's submission order.
    pub fn id(&self) -> usize {
        self.inner.id()
    }

    pub fn lines(&self) -> &[String] {
        self.inner.lines()
    }

    pub fn state(&self) -> CommandState {
        self.inner.state()
    }

    /// The terminal status, once the command finished or was terminated.
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.inner.status()
    }

    pub fn is_finished(&self) -> bool {
        self.exit_status().is_some()
    }

    /// Blocks until the command finishes or is terminated.
    ///
    /// Returns immediately if that already happened. With a timeout, expiry
    /// yields [`ShellError::WaitTimeout`] and leaves the command running; the
    /// only way to abandon it is to close or kill the whole session.
    pub fn wait_for_finish(&self, timeout: Option<Duration>) -> Result<ExitStatus, ShellError> {
        self.inner
            .wait(timeout)
            .ok_or(ShellError::WaitTimeout { id: self.id() })
    }

    /// Async counterpart of [`wait_for_finish`](Self::wait_for_finish).
    /// Race it against `tokio::time::timeout` for a deadline.
    pub async fn finished(&self) -> ExitStatus {
        self.inner.finished().await
    }
}

impl fmt::Debug for CommandHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandHandle")
            .field("id", &self.id())
            .field("state", &self.state())
            .field("exit_status", &self.exit_status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn recording(lines: &[&str]) -> (Command, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = seen.clone();
        let command = Command::new(lines.iter().copied(), move |_: usize, line: &str| {
            sink_seen.lock().unwrap().push(line.to_string());
        });
        (command, seen)
    }

    #[test]
    fn test_exit_status_codes() {
        assert_eq!(ExitStatus::Code(3).code(), 3);
        assert_eq!(ExitStatus::Terminated.code(), -1);
        assert_eq!(ExitStatus::Unparsable.code(), -2);
        assert!(ExitStatus::Code(0).success());
        assert!(!ExitStatus::Unparsable.success());
    }

    #[test]
    fn test_states_only_move_forward() {
        let tracked = Tracked::new(0, Command::discarding(["true"]));
        assert_eq!(tracked.state(), CommandState::Pending);

        assert!(tracked.mark_dispatched());
        assert!(!tracked.mark_dispatched());
        assert_eq!(tracked.state(), CommandState::Dispatched);

        assert!(tracked.complete(ExitStatus::Code(0)));
        assert!(!tracked.complete(ExitStatus::Terminated));
        assert!(!tracked.mark_dispatched());
        assert_eq!(tracked.state(), CommandState::Finished);
        assert_eq!(tracked.status(), Some(ExitStatus::Code(0)));
    }

    #[test]
    fn test_pending_can_be_terminated() {
        let tracked = Tracked::new(4, Command::discarding(["sleep 1"]));
        assert!(tracked.complete(ExitStatus::Terminated));
        assert_eq!(tracked.state(), CommandState::Terminated);
    }

    #[test]
    fn test_sink_sees_output_then_one_finish() {
        struct Counting {
            lines: Arc<Mutex<Vec<String>>>,
            finishes: Arc<Mutex<Vec<ExitStatus>>>,
        }
        impl OutputSink for Counting {
            fn output(&mut self, _id: usize, line: &str) {
                self.lines.lock().unwrap().push(line.to_string());
            }
            fn finished(&mut self, _id: usize, status: ExitStatus) {
                self.finishes.lock().unwrap().push(status);
            }
        }

        let lines = Arc::new(Mutex::new(Vec::new()));
        let finishes = Arc::new(Mutex::new(Vec::new()));
        let tracked = Tracked::new(
            1,
            Command::new(
                ["ls"],
                Counting {
                    lines: lines.clone(),
                    finishes: finishes.clone(),
                },
            ),
        );

        tracked.deliver("a");
        tracked.deliver("b");
        tracked.complete(ExitStatus::Code(2));
        tracked.complete(ExitStatus::Code(0));

        assert_eq!(*lines.lock().unwrap(), vec!["a", "b"]);
        assert_eq!(*finishes.lock().unwrap(), vec![ExitStatus::Code(2)]);
    }

    #[test]
    fn test_wait_after_completion_does_not_block() {
        let (command, _) = recording(&["echo hi"]);
        let handle = CommandHandle::new(Arc::new(Tracked::new(0, command)));
        handle.inner.complete(ExitStatus::Code(0));

        assert_eq!(handle.wait_for_finish(None), Ok(ExitStatus::Code(0)));
    }

    #[test]
    fn test_wait_with_unbounded_timeout() {
        let handle = CommandHandle::new(Arc::new(Tracked::new(0, Command::discarding(["x"]))));
        let completer = handle.clone();
        let worker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            completer.inner.complete(ExitStatus::Code(1));
        });

        assert_eq!(handle.wait_for_finish(Some(Duration::MAX)), Ok(ExitStatus::Code(1)));
        worker.join().unwrap();
        // Already finished.
        assert_eq!(handle.wait_for_finish(Some(Duration::MAX)), Ok(ExitStatus::Code(1)));
    }

    #[test]
    fn test_sink_can_wait_on_its_own_command() {
        struct SelfWaiting {
            handle: Arc<Mutex<Option<CommandHandle>>>,
            seen: Arc<Mutex<Option<Result<ExitStatus, ShellError>>>>,
        }
        impl OutputSink for SelfWaiting {
            fn output(&mut self, _id: usize, _line: &str) {}
            fn finished(&mut self, _id: usize, _status: ExitStatus) {
                if let Some(handle) = self.handle.lock().unwrap().take() {
                    let result = handle.wait_for_finish(Some(Duration::from_secs(2)));
                    *self.seen.lock().unwrap() = Some(result);
                }
            }
        }

        let slot = Arc::new(Mutex::new(None));
        let seen = Arc::new(Mutex::new(None));
        let tracked = Arc::new(Tracked::new(
            0,
            Command::new(
                ["true"],
                SelfWaiting {
                    handle: slot.clone(),
                    seen: seen.clone(),
                },
            ),
        ));
        *slot.lock().unwrap() = Some(CommandHandle::new(tracked.clone()));

        let started = Instant::now();
        assert!(tracked.complete(ExitStatus::Code(0)));

        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(*seen.lock().unwrap(), Some(Ok(ExitStatus::Code(0))));
    }

    #[test]
    fn test_wait_times_out() {
        let handle = CommandHandle::new(Arc::new(Tracked::new(9, Command::discarding(["x"]))));
        assert_eq!(
            handle.wait_for_finish(Some(Duration::from_millis(20))),
            Err(ShellError::WaitTimeout { id: 9 })
        );
        assert_eq!(handle.state(), CommandState::Pending);
    }

    #[test]
    fn test_all_waiters_see_the_same_status() {
        let handle = CommandHandle::new(Arc::new(Tracked::new(0, Command::discarding(["x"]))));

        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let h = handle.clone();
                thread::spawn(move || h.wait_for_finish(Some(Duration::from_secs(5))))
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        handle.inner.complete(ExitStatus::Terminated);

        for waiter in waiters {
            assert_eq!(waiter.join().unwrap(), Ok(ExitStatus::Terminated));
        }
    }

    #[tokio::test]
    async fn test_async_finished() {
        let handle = CommandHandle::new(Arc::new(Tracked::new(0, Command::discarding(["x"]))));
        let completer = handle.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            completer.inner.complete(ExitStatus::Code(5));
        });

        let status = tokio::time::timeout(Duration::from_secs(5), handle.finished())
            .await
            .unwrap();
        assert_eq!(status, ExitStatus::Code(5));
        // Already finished: resolves immediately.
        assert_eq!(handle.finished().await, ExitStatus::Code(5));
    }
}
