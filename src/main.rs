//! Main entry point for the rusty-shell command-line tool.
//!
//! Starts one session of the requested kind, submits every command as its
//! own batch, prints output as it arrives (or one JSON record per command),
//! and exits with the last command's exit code.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};

use rusty_shell::config::{CONFIG_ENV, SessionConfig};
use rusty_shell::shell::{
    Command, CommandHandle, CommandRecord, ExitStatus, LineBuffer, SessionKind, SessionRegistry,
    ShellProgram, ShellSession, StartOptions,
};
use rusty_shell::utils::logger;

const CLOSE_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "rusty-shell", version, about = "Run commands through one long-lived shell")]
struct Cli {
    /// Commands to run, each as its own batch. Reads one per stdin line when omitted.
    commands: Vec<String>,

    /// Use the privilege-escalation interpreter.
    #[arg(long, conflicts_with = "shell")]
    elevated: bool,

    /// Spawn this interpreter instead of the system shell.
    #[arg(long, value_name = "PROGRAM")]
    shell: Option<String>,

    /// Argument passed to --shell (repeatable).
    #[arg(long = "arg", value_name = "ARG", requires = "shell", allow_hyphen_values = true)]
    shell_args: Vec<String>,

    /// JSON config file.
    #[arg(long, env = CONFIG_ENV)]
    config: Option<PathBuf>,

    /// Startup probe deadline in milliseconds.
    #[arg(long, value_name = "MS")]
    timeout_ms: Option<u64>,

    /// Extra startup attempts for --elevated.
    #[arg(long)]
    retries: Option<u32>,

    /// Per-command deadline in milliseconds; on expiry the shell is killed.
    #[arg(long, value_name = "MS")]
    wait_ms: Option<u64>,

    /// Print one JSON record per command instead of streaming output.
    #[arg(long)]
    json: bool,

    /// Write logs to a timestamped file in this directory instead of stderr.
    #[arg(long, value_name = "DIR")]
    log_dir: Option<PathBuf>,
}

impl Cli {
    fn kind_and_options(&self) -> (SessionKind, StartOptions) {
        let (kind, program) = match &self.shell {
            Some(program) => (
                SessionKind::Custom,
                Some(ShellProgram::with_args(program.clone(), self.shell_args.clone())),
            ),
            None if self.elevated => (SessionKind::Elevated, None),
            None => (SessionKind::Plain, None),
        };
        let options = StartOptions {
            timeout: self.timeout_ms.map(Duration::from_millis),
            retries: self.retries,
            program,
        };
        (kind, options)
    }
}

async fn read_stdin_lines() -> Result<Vec<String>> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut commands = Vec::new();
    while let Some(line) = lines
        .next_line()
        .await
        .context("Failed to read commands from stdin")?
    {
        if !line.trim().is_empty() {
            commands.push(line);
        }
    }
    Ok(commands)
}

async fn await_status(
    session: &ShellSession,
    handle: &CommandHandle,
    deadline: Option<Duration>,
) -> ExitStatus {
    let Some(deadline) = deadline else {
        return handle.finished().await;
    };
    match tokio::time::timeout(deadline, handle.finished()).await {
        Ok(status) => status,
        Err(_) => {
            tracing::warn!(
                "Command {} did not finish within {:?}, killing the shell",
                handle.id(),
                deadline
            );
            session.kill();
            handle.finished().await
        }
    }
}

async fn run(cli: Cli) -> Result<i32> {
    let config = match &cli.config {
        Some(path) => SessionConfig::load(path)?,
        None => SessionConfig::load_or_default()?,
    };
    let registry = SessionRegistry::new(config).context("Invalid configuration")?;

    let (kind, options) = cli.kind_and_options();
    let session: Arc<ShellSession> = registry
        .start(kind, &options)
        .with_context(|| format!("Could not start {} shell", kind))?;

    let batches = if cli.commands.is_empty() {
        read_stdin_lines().await?
    } else {
        cli.commands.clone()
    };

    // Queue everything up front so the shell runs the batches back to back.
    let mut submitted = Vec::with_capacity(batches.len());
    for line in batches {
        let buffer = cli.json.then(LineBuffer::default);
        let command = match &buffer {
            Some(buffer) => Command::new([line], buffer.clone()),
            None => Command::new([line], |_: usize, text: &str| println!("{}", text)),
        };
        submitted.push((session.submit(command)?, buffer));
    }

    let deadline = cli.wait_ms.map(Duration::from_millis);
    let mut last_code = 0;
    for (handle, buffer) in submitted {
        let status = await_status(&session, &handle, deadline).await;
        match buffer {
            Some(buffer) => {
                let record = CommandRecord::new(handle.id(), handle.lines().to_vec(), &buffer, status);
                println!("{}", serde_json::to_string(&record)?);
            }
            None if !status.success() => eprintln!("[{}] {}", handle.id(), status),
            None => {}
        }
        last_code = status.code();
    }

    registry.close_all();
    let closed = tokio::task::spawn_blocking(move || session.wait_closed(Some(CLOSE_GRACE)))
        .await
        .context("Close waiter panicked")?;
    if !closed {
        tracing::warn!("Shell did not exit within {:?}", CLOSE_GRACE);
    }

    Ok(last_code)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging before anything else
    let log_guard = logger::init_logging(cli.log_dir.as_deref())?;

    let code = run(cli).await?;

    // process::exit skips destructors, so flush the log writer first.
    drop(log_guard);
    std::process::exit(code);
}
