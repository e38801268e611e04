//! Streaming subprocess execution with a wall-clock timeout.
//!
//! Two reader threads forward stdout and stderr line by line over a channel, so
//! the caller sees output as it is produced and can stop waiting at the deadline.
//! On timeout the child is killed and the run classified as [`ExitKind::TimedOut`].
//!
//! The child is polled between lines. A descendant that inherited the pipes can
//! keep them open after the child exits; output is then drained for a short
//! grace period and the child's own exit status is used.

use super::types::{ExitKind, Invocation, OutputLine, Stream, ToolOutput};
use crate::error::{Result, SweepError};
use crate::ui::Reporter;
use std::io::{BufRead, BufReader, Read};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Which captured lines are echoed to the reporter. All lines are always kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Echo {
    All,
    Essential,
    Silent,
}

/// Lines worth showing when not in verbose mode.
pub fn is_essential_line(line: &str) -> bool {
    let lower = line.to_ascii_lowercase();
    let trimmed = lower.trim_start();
    (trimmed.starts_with("compiling .pio") && !trimmed.contains("framework"))
        || trimmed.starts_with("linking")
        || trimmed.starts_with("ram:")
        || trimmed.starts_with("flash:")
        || trimmed.contains("[success]")
        || trimmed.contains("[failed]")
        || trimmed.contains("error:")
        || trimmed.contains("warning:")
        || trimmed.contains("build mode")
        || trimmed.contains("building in")
}

/// Toolchain output refers to the copied library as `lib/src`; show it as `src`.
pub fn normalize_line(line: &str) -> String {
    line.replace("lib/src", "src").replace("lib\\src", "src")
}

fn spawn_reader<R>(source: R, stream: Stream, tx: Sender<OutputLine>) -> thread::JoinHandle<()>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut reader = BufReader::new(source);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let text = String::from_utf8_lossy(&buf).trim_end().to_string();
                    if tx.send(OutputLine { stream, text }).is_err() {
                        break;
                    }
                }
            }
        }
    })
}

/// Run `inv` to completion or until `timeout` elapses.
///
/// Launch failures are errors; everything after launch (including a non-zero
/// exit or a timeout) is a classified [`ToolOutput`].
pub fn run_streamed(
    inv: &Invocation,
    timeout: Duration,
    echo: Echo,
    reporter: &Reporter,
) -> Result<ToolOutput> {
    let mut cmd = Command::new(&inv.program);
    cmd.args(&inv.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(cwd) = &inv.cwd {
        cmd.current_dir(cwd);
    }

    tracing::debug!("spawning: {}", inv.display());
    let start = Instant::now();
    let mut child = cmd.spawn().map_err(|source| SweepError::Spawn {
        program: inv.program.clone(),
        source,
    })?;

    let (tx, rx) = mpsc::channel();
    let mut readers = Vec::new();
    if let Some(out) = child.stdout.take() {
        readers.push(spawn_reader(out, Stream::Stdout, tx.clone()));
    }
    if let Some(err) = child.stderr.take() {
        readers.push(spawn_reader(err, Stream::Stderr, tx.clone()));
    }
    drop(tx);

    let deadline = start + timeout;
    let mut lines = Vec::new();
    let mut timed_out = false;

    let record = |line: OutputLine, lines: &mut Vec<OutputLine>| {
        let text = normalize_line(&line.text);
        let show = match echo {
            Echo::All => true,
            Echo::Essential => is_essential_line(&text),
            Echo::Silent => false,
        };
        if show {
            reporter.line(format!("{:5.2} {}", start.elapsed().as_secs_f64(), text));
        }
        lines.push(OutputLine {
            stream: line.stream,
            text,
        });
    };

    let mut exited: Option<(ExitStatus, Instant)> = None;
    let mut pipes_closed = false;
    let mut next_poll = start + POLL_INTERVAL;

    loop {
        let now = Instant::now();
        let wait = match exited {
            Some((_, at)) => {
                let left = (at + DRAIN_GRACE).saturating_duration_since(now);
                if left.is_zero() {
                    tracing::debug!(
                        "`{}` exited but its output pipes are still open, not waiting further",
                        inv.program
                    );
                    break;
                }
                left
            }
            None => {
                let remaining = deadline.saturating_duration_since(now);
                if remaining.is_zero() {
                    timed_out = true;
                    break;
                }
                remaining.min(next_poll.saturating_duration_since(now))
            }
        };

        match rx.recv_timeout(wait) {
            Ok(line) => record(line, &mut lines),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                pipes_closed = true;
                break;
            }
        }

        if exited.is_none() && Instant::now() >= next_poll {
            next_poll = Instant::now() + POLL_INTERVAL;
            match child.try_wait() {
                Ok(Some(status)) => exited = Some((status, Instant::now())),
                Ok(None) => {}
                Err(e) => tracing::debug!("could not poll `{}`: {}", inv.program, e),
            }
        }
    }

    if timed_out {
        tracing::warn!(
            "`{}` exceeded {}s, killing it",
            inv.program,
            timeout.as_secs_f64()
        );
        let _ = child.kill();
        let _ = child.wait();
        // Readers may stay blocked on a pipe held by a grandchild; leave them be.
        for line in rx.try_iter() {
            record(line, &mut lines);
        }
        return Ok(ToolOutput {
            exit: ExitKind::TimedOut,
            lines,
            elapsed: start.elapsed(),
        });
    }

    for line in rx.try_iter() {
        record(line, &mut lines);
    }
    // Readers still blocked on a descendant's pipe are left detached.
    if pipes_closed {
        for reader in readers {
            let _ = reader.join();
        }
    }
    let status = match exited {
        Some((status, _)) => status,
        None => child
            .wait()
            .map_err(|e| SweepError::io(inv.cwd.clone().unwrap_or_default(), e))?,
    };

    let exit = if status.success() {
        ExitKind::Success
    } else {
        // Killed by a signal has no code.
        ExitKind::Failed(status.code().unwrap_or(-1))
    };

    Ok(ToolOutput {
        exit,
        lines,
        elapsed: start.elapsed(),
    })
}
