//! Locating and invoking the scheduler's command-line tool.
//!
//! [`SchedulerCommand::run`] is the single place where scheduler processes
//! are spawned: piped output, a hard timeout, and kill-on-drop so a hung
//! command cannot outlive its caller.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

use super::GatewayError;

/// Maximum stdout or stderr size captured per stream (4 MiB).
const MAX_OUTPUT_BYTES: usize = 4 * 1024 * 1024;

#[cfg(windows)]
const EXECUTABLE_NAME: &str = "deadlinecommand.exe";
#[cfg(not(windows))]
const EXECUTABLE_NAME: &str = "deadlinecommand";

/// Well-known install locations, checked after the configured path.
const WELL_KNOWN_DIRS: &[&str] = &[
    r"C:\Program Files\Thinkbox\Deadline10\bin",
    r"C:\Program Files (x86)\Thinkbox\Deadline10\bin",
    "/opt/Thinkbox/Deadline10/bin",
    "/Applications/Thinkbox/Deadline10/Resources",
];

/// Captured result of a finished scheduler command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// Process exit code (`-1` if killed by signal).
    pub exit_code: i32,
    pub duration_ms: u64,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// A resolved path to the scheduler executable.
#[derive(Debug, Clone)]
pub struct SchedulerCommand {
    program: PathBuf,
}

impl SchedulerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Resolve the executable: configured path (file or directory), then
    /// well-known install locations, then `PATH`. Only checks existence.
    pub fn locate(configured: Option<&Path>) -> Option<Self> {
        if let Some(path) = configured {
            if path.is_file() {
                return Some(Self::new(path));
            }
            let candidate = path.join(EXECUTABLE_NAME);
            if candidate.is_file() {
                return Some(Self::new(candidate));
            }
            tracing::warn!(
                path = %path.display(),
                "Configured scheduler path does not contain the command-line tool",
            );
        }

        let well_known = WELL_KNOWN_DIRS
            .iter()
            .map(|dir| Path::new(dir).join(EXECUTABLE_NAME));
        let on_path = std::env::var_os("PATH")
            .map(|paths| {
                std::env::split_paths(&paths)
                    .map(|dir| dir.join(EXECUTABLE_NAME))
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        well_known
            .chain(on_path)
            .find(|candidate| candidate.is_file())
            .map(Self::new)
    }

    /// Run the tool with `args`, killing it if `timeout` elapses.
    pub async fn run(&self, args: &[&str], timeout: Duration) -> Result<CommandOutput, GatewayError> {
        let label = args.first().copied().unwrap_or_default().to_string();

        let mut cmd = Command::new(&self.program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let start = Instant::now();

        let mut child = cmd.spawn().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                GatewayError::Unavailable(self.program.display().to_string())
            }
            _ => GatewayError::Io(e),
        })?;

        let stdout_handle = child.stdout.take();
        let stderr_handle = child.stderr.take();
        let stdout_task = tokio::spawn(async move { read_stream(stdout_handle).await });
        let stderr_task = tokio::spawn(async move { read_stream(stderr_handle).await });

        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => {
                // A grandchild can inherit the pipes and keep them open after
                // the tool itself exits, so the reads share the same budget.
                let remaining = timeout.saturating_sub(start.elapsed());
                let abort_stdout = stdout_task.abort_handle();
                let abort_stderr = stderr_task.abort_handle();
                let streams = tokio::time::timeout(remaining, async {
                    (stdout_task.await, stderr_task.await)
                })
                .await;
                let (stdout_bytes, stderr_bytes) = match streams {
                    Ok((stdout, stderr)) => (stdout.unwrap_or_default(), stderr.unwrap_or_default()),
                    Err(_elapsed) => {
                        abort_stdout.abort();
                        abort_stderr.abort();
                        let elapsed_ms = start.elapsed().as_millis() as u64;
                        tracing::warn!(
                            command = %label,
                            elapsed_ms,
                            exit_code = status.code().unwrap_or(-1),
                            "Scheduler command exited but its output streams stayed open",
                        );
                        return Err(GatewayError::Timeout {
                            command: label,
                            elapsed_ms,
                        });
                    }
                };
                let output = CommandOutput {
                    stdout: String::from_utf8_lossy(&stdout_bytes).into_owned(),
                    stderr: String::from_utf8_lossy(&stderr_bytes).into_owned(),
                    exit_code: status.code().unwrap_or(-1),
                    duration_ms: start.elapsed().as_millis() as u64,
                };
                tracing::debug!(
                    command = %label,
                    exit_code = output.exit_code,
                    duration_ms = output.duration_ms,
                    stdout = %output.stdout.trim(),
                    stderr = %output.stderr.trim(),
                    "Scheduler command finished",
                );
                Ok(output)
            }
            Ok(Err(e)) => Err(GatewayError::Io(e)),
            Err(_elapsed) => {
                // `child` drops here and is killed.
                let elapsed_ms = start.elapsed().as_millis() as u64;
                tracing::warn!(command = %label, elapsed_ms, "Scheduler command timed out");
                Err(GatewayError::Timeout {
                    command: label,
                    elapsed_ms,
                })
            }
        }
    }
}

/// Read an entire output stream into a byte buffer, capped at [`MAX_OUTPUT_BYTES`].
async fn read_stream<R: AsyncRead + Unpin>(handle: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut h) = handle {
        let _ = (&mut h)
            .take(MAX_OUTPUT_BYTES as u64)
            .read_to_end(&mut buf)
            .await;
    }
    buf
}

#[cfg(all(test, unix))]
mod tests {
    use std::os::unix::fs::PermissionsExt;

    use assert_matches::assert_matches;

    use super::*;

    fn script(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join(EXECUTABLE_NAME);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn locate_accepts_directory_or_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = script(dir.path(), "exit 0");

        let from_dir = SchedulerCommand::locate(Some(dir.path())).unwrap();
        assert_eq!(from_dir.program(), path);
        let from_file = SchedulerCommand::locate(Some(&path)).unwrap();
        assert_eq!(from_file.program(), path);
    }

    #[tokio::test]
    async fn run_captures_output_and_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = SchedulerCommand::new(script(dir.path(), "echo \"args:$*\"; echo oops >&2; exit 3"));

        let out = cmd.run(&["-SubmitJob", "a"], Duration::from_secs(5)).await.unwrap();

        assert_eq!(out.exit_code, 3);
        assert!(!out.success());
        assert_eq!(out.stdout.trim(), "args:-SubmitJob a");
        assert_eq!(out.stderr.trim(), "oops");
    }

    #[tokio::test]
    async fn run_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = SchedulerCommand::new(script(dir.path(), "sleep 5"));

        let err = cmd
            .run(&["-GetSlaves"], Duration::from_millis(200))
            .await
            .unwrap_err();

        assert_matches!(err, GatewayError::Timeout { ref command, .. } if command == "-GetSlaves");
    }

    #[tokio::test]
    async fn run_times_out_when_detached_child_holds_output_open() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = SchedulerCommand::new(script(dir.path(), "(sleep 5 &); echo JobID=abc"));
        let started = Instant::now();

        let err = cmd
            .run(&["-SubmitJob"], Duration::from_millis(500))
            .await
            .unwrap_err();

        assert_matches!(err, GatewayError::Timeout { ref command, .. } if command == "-SubmitJob");
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn missing_program_is_unavailable() {
        let cmd = SchedulerCommand::new("/nonexistent/farmlink/deadlinecommand");
        let err = cmd.run(&["-GetSlaves"], Duration::from_secs(1)).await.unwrap_err();
        assert_matches!(err, GatewayError::Unavailable(_));
    }
}
