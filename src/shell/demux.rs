//! Output side of a session: the only reader of the subprocess's merged output.
//!
//! One cursor, `read`, names the command expected to finish next. Every
//! ordinary line goes to that command's sink; its sentinel completes it and
//! advances the cursor, so batch *k* is terminal before anything is
//! attributed to batch *k+1*.

use std::io::BufRead;
use std::sync::Arc;

use tracing::{debug, error, trace, warn};

use super::command::Tracked;
use super::queue::Shared;
use super::sentinel::{self, Decoded};
use super::stream::read_line;
use super::ExitStatus;

/// Demultiplexes until end of stream, then calls `reap` to wait for the
/// subprocess, releases the reader, and terminates every unfinished command.
pub(crate) fn run<R: BufRead>(shared: &Shared, mut reader: R, reap: impl FnOnce()) {
    let read = demultiplex(shared, &mut reader);

    reap();
    drop(reader);
    debug!("Shell destroyed after {} finished command(s)", read);

    shared.finish_session(read);
}

fn forward(current: Option<&Arc<Tracked>>, line: &str) {
    match current {
        Some(command) => command.deliver(line),
        None => trace!("Discarding unattributed output: {}", line),
    }
}

/// Returns the cursor at end of stream: the number of commands that finished.
fn demultiplex<R: BufRead>(shared: &Shared, reader: &mut R) -> usize {
    let mut read = 0;
    let mut current: Option<Arc<Tracked>> = None;
    let mut buf = Vec::new();

    loop {
        let line = match read_line(reader, &mut buf) {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("Read all output");
                break;
            }
            Err(e) => {
                error!("Failed to read shell output: {}", e);
                break;
            }
        };

        if current.is_none() {
            current = shared.command_at(read);
        }

        match sentinel::decode(&line, &shared.token) {
            Decoded::Output(text) => forward(current.as_ref(), text),
            Decoded::Malformed(text) => {
                debug!("Sentinel-like line did not parse, treating as output: {}", text);
                forward(current.as_ref(), text);
            }
            Decoded::Boundary(boundary) if boundary.index == read => {
                let Some(command) = current.take() else {
                    warn!("Sentinel for command {} before it was submitted", read);
                    continue;
                };
                if !boundary.prefix.is_empty() {
                    command.deliver(boundary.prefix);
                }
                let status = match boundary.exit_code {
                    Some(code) => ExitStatus::Code(code),
                    None => {
                        warn!("Unparsable exit status for command {}: {}", read, line);
                        ExitStatus::Unparsable
                    }
                };
                debug!("Command {} finished: {}", read, status);
                command.complete(status);
                read += 1;
            }
            Decoded::Boundary(boundary) => {
                debug!(
                    "Sentinel for command {} while expecting {}, treating as output",
                    boundary.index, read
                );
                forward(current.as_ref(), &line);
            }
        }
    }

    read
}
