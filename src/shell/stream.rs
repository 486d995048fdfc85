//! Subprocess plumbing: spawning with stdout and stderr merged, and line reads.

use std::io::{self, BufRead, BufReader, BufWriter};
use std::process::{self, Child, ChildStdin, Stdio};

use os_pipe::PipeReader;
use tracing::debug;

use super::ShellProgram;

/// A freshly spawned interpreter and both ends of its conversation.
pub(crate) struct Spawned {
    pub child: Child,
    pub reader: BufReader<PipeReader>,
    pub writer: BufWriter<ChildStdin>,
}

/// Spawns `program` with stdout and stderr sharing a single pipe.
pub(crate) fn spawn_merged(program: &ShellProgram) -> io::Result<Spawned> {
    let (reader, writer) = os_pipe::pipe()?;

    let mut cmd = process::Command::new(&program.program);
    cmd.args(&program.args)
        .stdin(Stdio::piped())
        .stdout(writer.try_clone()?)
        .stderr(writer);

    let mut child = cmd.spawn()?;
    // Release our copies of the write end, or the reader never sees EOF.
    drop(cmd);

    let stdin = child.stdin.take().ok_or_else(|| {
        io::Error::new(io::ErrorKind::BrokenPipe, "child stdin was not captured")
    })?;

    debug!("Spawned {} as pid {}", program, child.id());
    Ok(Spawned {
        child,
        reader: BufReader::new(reader),
        writer: BufWriter::new(stdin),
    })
}

/// Reads one line, decoding invalid UTF-8 lossily and stripping `\n` / `\r\n`.
///
/// Returns `Ok(None)` at end of stream.
pub(crate) fn read_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> io::Result<Option<String>> {
    buf.clear();
    loop {
        match reader.read_until(b'\n', buf) {
            Ok(0) => return Ok(None),
            Ok(_) => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }

    if buf.last() == Some(&b'\n') {
        buf.pop();
    }
    if buf.last() == Some(&b'\r') {
        buf.pop();
    }
    Ok(Some(String::from_utf8_lossy(buf).into_owned()))
}

/// Kills the child if it is still running and reaps it.
pub(crate) fn kill_and_reap(child: &mut Child) {
    if let Err(e) = child.kill() {
        // InvalidInput means it already exited.
        debug!("Kill of pid {} failed: {}", child.id(), e);
    }
    match child.wait() {
        Ok(status) => debug!("Pid {} exited: {}", child.id(), status),
        Err(e) => debug!("Wait for pid {} failed: {}", child.id(), e),
    }
}
