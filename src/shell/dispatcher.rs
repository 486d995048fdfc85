//! Input side of a session: the only writer of the subprocess's stdin.

use std::io::{self, Write};

use tracing::{debug, error, info};

use super::command::Tracked;
use super::queue::Shared;
use super::sentinel;

/// Writes batches in id order until the session closes and the queue is drained,
/// then asks the shell to exit. A write failure ends the loop; the reader
/// terminates whatever is left once the subprocess goes away.
pub(crate) fn run<W: Write>(shared: &Shared, writer: &mut W) {
    let mut next = 0;
    while let Some(command) = shared.next_for_dispatch(next) {
        command.mark_dispatched();
        if let Err(e) = write_batch(writer, &shared.token, &command) {
            error!("Failed to write command {} to shell: {}", next, e);
            return;
        }
        next += 1;
    }

    info!("Closing shell after {} command(s)", next);
    if let Err(e) = writer.write_all(b"exit 0\n").and_then(|_| writer.flush()) {
        debug!("Failed to send exit to shell: {}", e);
    }
}

fn write_batch<W: Write>(writer: &mut W, token: &str, command: &Tracked) -> io::Result<()> {
    debug!("Sending command {}: {:?}", command.id(), command.lines());
    for line in command.lines() {
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
    }
    writer.write_all(sentinel::encode_echo(token, command.id()).as_bytes())?;
    writer.flush()
}
