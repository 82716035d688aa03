//! External media tool invocation
//!
//! Every ffmpeg/ffprobe call in the pipeline goes through [`ProcessRunner`],
//! so tests can substitute a fake that never spawns anything.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

/// Maximum stdout or stderr captured per stream (4 MiB).
const MAX_OUTPUT_BYTES: u64 = 4 * 1024 * 1024;

/// Captured output of a successful tool run.
#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Tool invocation failures
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with code {exit_code}: {stderr}")]
    Exited {
        program: String,
        /// `-1` when the process was killed by a signal.
        exit_code: i32,
        stderr: String,
    },

    #[error("{program} timed out after {}s", timeout.as_secs_f64())]
    TimedOut { program: String, timeout: Duration },
}

impl ProcessError {
    /// Exit code of the failed process, if it ran to completion.
    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Exited { exit_code, .. } => Some(*exit_code),
            _ => None,
        }
    }
}

/// Runs a command-line tool with an argument list and a deadline.
///
/// No retries happen at this layer.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<ProcessOutput, ProcessError>;
}

/// [`ProcessRunner`] backed by `tokio::process`.
///
/// The child is killed when the deadline expires.
#[derive(Debug, Clone, Default)]
pub struct TokioProcessRunner;

impl TokioProcessRunner {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<ProcessOutput, ProcessError> {
        let start = Instant::now();
        tracing::debug!(program, ?args, "spawning tool");

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                program: program.to_string(),
                source,
            })?;

        // Drain both pipes concurrently so a chatty tool never blocks on a full pipe.
        let stdout_task = tokio::spawn(read_stream(child.stdout.take(), MAX_OUTPUT_BYTES));
        let stderr_task = tokio::spawn(read_stream(child.stderr.take(), MAX_OUTPUT_BYTES));

        let status = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(source)) => {
                return Err(ProcessError::Spawn {
                    program: program.to_string(),
                    source,
                })
            }
            Err(_) => {
                // `child` is dropped on return, which kills it.
                tracing::warn!(program, timeout_secs = timeout.as_secs(), "tool timed out");
                return Err(ProcessError::TimedOut {
                    program: program.to_string(),
                    timeout,
                });
            }
        };

        let stdout = String::from_utf8_lossy(&stdout_task.await.unwrap_or_default()).into_owned();
        let stderr = String::from_utf8_lossy(&stderr_task.await.unwrap_or_default()).into_owned();

        tracing::debug!(
            program,
            elapsed_ms = start.elapsed().as_millis() as u64,
            code = ?status.code(),
            "tool finished"
        );

        if !status.success() {
            return Err(ProcessError::Exited {
                program: program.to_string(),
                exit_code: status.code().unwrap_or(-1),
                stderr: stderr.trim().to_string(),
            });
        }

        Ok(ProcessOutput { stdout, stderr })
    }
}

/// Keep the first `limit` bytes of a pipe and discard the rest.
///
/// The pipe is read to EOF either way, so the tool never sees EPIPE.
async fn read_stream<R: AsyncRead + Unpin>(handle: Option<R>, limit: u64) -> Vec<u8> {
    let mut buf = Vec::new();
    let Some(mut h) = handle else {
        return buf;
    };
    if let Err(e) = (&mut h).take(limit).read_to_end(&mut buf).await {
        tracing::warn!("failed to read tool output: {e}");
        return buf;
    }
    match tokio::io::copy(&mut h, &mut tokio::io::sink()).await {
        Ok(0) => {}
        Ok(dropped) => tracing::debug!(dropped, "tool output truncated"),
        Err(e) => tracing::warn!("failed to drain tool output: {e}"),
    }
    buf
}

/// Resolve a tool binary: explicit path first, then `PATH`, then the bare name.
#[must_use]
pub fn resolve_tool(explicit: Option<&PathBuf>, name: &str) -> String {
    if let Some(path) = explicit {
        return path.to_string_lossy().to_string();
    }
    which::which(name).map_or_else(|_| name.to_string(), |p| p.to_string_lossy().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    #[tokio::test]
    async fn output_past_limit_is_drained_not_kept() {
        let data = vec![b'x'; 10_000];
        let mut reader: &[u8] = &data;

        let kept = read_stream(Some(&mut reader), 16).await;
        assert_eq!(kept.len(), 16);
        assert!(reader.is_empty());
        assert!(read_stream(None::<&[u8]>, 16).await.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn verbose_tool_is_not_killed_by_output_cap() {
        // head dies of SIGPIPE if the pipe closes before it finishes writing
        let out = TokioProcessRunner::new()
            .run(
                "sh",
                &args(&["-c", "head -c 6000000 /dev/zero || exit 7"]),
                Duration::from_secs(30),
            )
            .await
            .unwrap();
        assert_eq!(out.stdout.len() as u64, MAX_OUTPUT_BYTES);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn captures_stdout_of_successful_run() {
        let out = TokioProcessRunner::new()
            .run("sh", &args(&["-c", "printf hello"]), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out.stdout, "hello");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_is_reported_with_stderr() {
        let err = TokioProcessRunner::new()
            .run(
                "sh",
                &args(&["-c", "echo broken >&2; exit 3"]),
                Duration::from_secs(5),
            )
            .await
            .unwrap_err();
        assert_eq!(err.exit_code(), Some(3));
        assert!(err.to_string().contains("broken"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn deadline_kills_slow_tool() {
        let err = TokioProcessRunner::new()
            .run("sh", &args(&["-c", "sleep 5"]), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::TimedOut { .. }));
        assert_eq!(err.exit_code(), None);
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let err = TokioProcessRunner::new()
            .run(
                "veracity-definitely-not-a-real-tool",
                &[],
                Duration::from_secs(1),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::Spawn { .. }));
    }

    #[test]
    fn explicit_tool_path_wins() {
        let path = PathBuf::from("/opt/ffmpeg/bin/ffmpeg");
        assert_eq!(resolve_tool(Some(&path), "ffmpeg"), "/opt/ffmpeg/bin/ffmpeg");
    }
}
