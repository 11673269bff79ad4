//! Subprocess execution with bounded timeouts and cancellation checkpoints.
//!
//! Every external collaborator (yt-dlp, ffmpeg, ffprobe, demucs, whisper-cli)
//! goes through this module so a hung child can never outlive its attempt
//! budget or the run deadline.

use std::path::Path;
use std::process::{Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{TsError, TsResult};
use crate::orchestrator::CancellationToken;

#[must_use]
pub fn command_exists(program: &str) -> bool {
    which::which(program).is_ok()
}

pub fn run_command(program: &str, args: &[String], cwd: Option<&Path>) -> TsResult<Output> {
    run_command_with_timeout(program, args, cwd, None)
}

pub fn run_command_with_timeout(
    program: &str,
    args: &[String],
    cwd: Option<&Path>,
    timeout: Option<Duration>,
) -> TsResult<Output> {
    run_command_inner(program, args, cwd, timeout, None)
}

/// Run a subprocess that also observes the run-level cancellation token.
///
/// The child is polled every 50ms; if the token's deadline has passed the
/// child is killed and `TsError::Cancelled` propagates. An optional hard
/// timeout is still respected as a per-attempt safety net.
pub fn run_command_cancellable(
    program: &str,
    args: &[String],
    cwd: Option<&Path>,
    token: &CancellationToken,
    hard_timeout: Option<Duration>,
) -> TsResult<Output> {
    run_command_inner(program, args, cwd, hard_timeout, Some(token))
}

fn run_command_inner(
    program: &str,
    args: &[String],
    cwd: Option<&Path>,
    timeout: Option<Duration>,
    token: Option<&CancellationToken>,
) -> TsResult<Output> {
    if !command_exists(program) {
        return Err(TsError::CommandMissing {
            command: program.to_owned(),
        });
    }

    let rendered = format!("{} {}", program, args.join(" "));
    let mut command = Command::new(program);
    command.args(args);
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }

    if timeout.is_none() && token.is_none() {
        let output = command.output()?;
        return validate_command_output(&rendered, output);
    }

    let mut child = command.spawn()?;
    let started_at = Instant::now();

    let (Some(mut stdout_pipe), Some(mut stderr_pipe)) =
        (child.stdout.take(), child.stderr.take())
    else {
        let _ = child.kill();
        let _ = child.wait();
        return Err(TsError::Io(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "child stdio was not captured",
        )));
    };

    let (stdout_tx, stdout_rx) = std::sync::mpsc::channel();
    let (stderr_tx, stderr_rx) = std::sync::mpsc::channel();

    thread::spawn(move || {
        use std::io::Read;
        let mut buf = Vec::new();
        let _ = stdout_pipe.read_to_end(&mut buf);
        let _ = stdout_tx.send(buf);
    });

    thread::spawn(move || {
        use std::io::Read;
        let mut buf = Vec::new();
        let _ = stderr_pipe.read_to_end(&mut buf);
        let _ = stderr_tx.send(buf);
    });

    loop {
        if let Some(status) = child.try_wait()? {
            let stdout = stdout_rx
                .recv_timeout(Duration::from_millis(100))
                .unwrap_or_default();
            let stderr = stderr_rx
                .recv_timeout(Duration::from_millis(100))
                .unwrap_or_default();
            return validate_command_output(
                &rendered,
                Output {
                    status,
                    stdout,
                    stderr,
                },
            );
        }

        if let Some(tok) = token {
            if let Err(err) = tok.checkpoint() {
                let _ = child.kill();
                let _ = child.wait();
                return Err(err);
            }
        }

        if let Some(limit) = timeout {
            if started_at.elapsed() >= limit {
                let _ = child.kill();
                let _ = child.wait();
                let stderr = stderr_rx
                    .recv_timeout(Duration::from_millis(100))
                    .unwrap_or_default();
                let stderr_str = String::from_utf8_lossy(&stderr).into_owned();
                return Err(TsError::from_command_timeout(
                    rendered,
                    saturating_duration_ms(limit),
                    stderr_str,
                ));
            }
        }

        thread::sleep(Duration::from_millis(50));
    }
}

fn validate_command_output(rendered: &str, output: Output) -> TsResult<Output> {
    if output.status.success() {
        return Ok(output);
    }
    let status = output.status.code().unwrap_or(-1);
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    Err(TsError::from_command_failure(
        rendered.to_owned(),
        status,
        stderr,
    ))
}

fn saturating_duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
