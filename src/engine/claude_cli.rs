//! [`QueryEngine`] backed by the Claude Code CLI.
//!
//! Spawns `claude --print --output-format stream-json --verbose ...`, writes
//! the prompt to stdin and parses one [`AgentEvent`] per stdout line. Stderr is
//! forwarded to the call's [`DiagnosticSink`].

use std::path::PathBuf;
use std::process::Stdio;

use async_stream::stream;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{AgentEvent, DiagnosticSink, EngineError, EventStream, QueryEngine, QueryOptions};
use crate::constants::STDERR_DRAIN_GRACE;

pub struct ClaudeCli {
    binary: PathBuf,
}

impl ClaudeCli {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn command(&self, options: &QueryOptions) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(build_args(options));
        if let Some(cwd) = &options.cwd {
            cmd.current_dir(cwd);
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

fn build_args(options: &QueryOptions) -> Vec<String> {
    let mut args: Vec<String> = [
        "--print",
        "--output-format",
        "stream-json",
        "--verbose",
        "--model",
        options.model.as_str(),
        "--permission-mode",
        options.permission_mode.as_str(),
    ]
    .into_iter()
    .map(String::from)
    .collect();

    if options.include_partial_messages {
        args.push("--include-partial-messages".to_string());
    }
    if let Some(session_id) = &options.resume {
        args.push("--resume".to_string());
        args.push(session_id.clone());
    }
    args
}

impl QueryEngine for ClaudeCli {
    fn query(&self, prompt: String, options: QueryOptions) -> EventStream {
        run_command(
            self.command(&options),
            prompt,
            options.abort.clone(),
            options.diagnostics.clone(),
        )
    }
}

/// Spawn `cmd` and stream its stdout as agent events until it exits or
/// `abort` fires, whichever comes first.
fn run_command(
    mut cmd: Command,
    prompt: String,
    abort: CancellationToken,
    diagnostics: DiagnosticSink,
) -> EventStream {
    Box::pin(stream! {
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                yield Err(EngineError::Spawn(e));
                return;
            }
        };

        if let Some(mut stdin) = child.stdin.take() {
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(prompt.as_bytes()).await {
                    tracing::warn!("Failed to write prompt to Claude Code stdin: {e}");
                }
                // Dropping stdin closes it, signalling end of prompt
            });
        }

        let mut stderr_task = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(forward_stderr(stderr, diagnostics)));

        let Some(stdout) = child.stdout.take() else {
            yield Err(EngineError::Io(std::io::Error::other("stdout not captured")));
            return;
        };
        let mut lines = BufReader::new(stdout).lines();

        loop {
            tokio::select! {
                _ = abort.cancelled() => {
                    kill(&mut child, stderr_task.take()).await;
                    yield Err(EngineError::Aborted);
                    return;
                }

                line = lines.next_line() => {
                    let line = match line {
                        Ok(Some(line)) => line,
                        Ok(None) => break,
                        Err(e) => {
                            yield Err(EngineError::Io(e));
                            return;
                        }
                    };

                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }

                    match serde_json::from_str::<AgentEvent>(line) {
                        Ok(event) => yield Ok(event),
                        Err(e) => tracing::debug!("Skipping unparsable engine line ({e}): {line}"),
                    }
                }
            }
        }

        // Stdout is closed but the process may linger; it still answers to abort
        let status = tokio::select! {
            _ = abort.cancelled() => {
                kill(&mut child, stderr_task.take()).await;
                yield Err(EngineError::Aborted);
                return;
            }
            status = child.wait() => status,
        };

        // Let stderr drain so the diagnostic buffer is complete before we report.
        // A grandchild that inherited the pipe can hold it open indefinitely.
        if let Some(mut task) = stderr_task.take()
            && tokio::time::timeout(STDERR_DRAIN_GRACE, &mut task).await.is_err()
        {
            tracing::debug!("Claude Code stderr still open after exit, no longer reading it");
            task.abort();
        }

        match status {
            Ok(status) if status.success() => {}
            Ok(status) => match status.code() {
                Some(code) => yield Err(EngineError::Exit { code }),
                None => yield Err(EngineError::Terminated),
            },
            Err(e) => yield Err(EngineError::Io(e)),
        }
    })
}

async fn kill(child: &mut Child, stderr_task: Option<JoinHandle<()>>) {
    let _ = child.start_kill();
    let _ = child.wait().await;
    if let Some(task) = stderr_task {
        task.abort();
    }
}

async fn forward_stderr(stderr: tokio::process::ChildStderr, diagnostics: DiagnosticSink) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        diagnostics.push(&line);
    }
}
