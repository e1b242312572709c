//! Streaming shell command execution.
//!
//! Runs one command under the user's shell, forwarding stdout and stderr to
//! the console as they arrive while capturing the combined output in arrival
//! order. Both pipes are drained concurrently in fixed-size chunks so the
//! streams interleave the way the child produced them, rather than stdout
//! draining before stderr.
//!
//! Ctrl+C during execution asks the child to terminate (SIGTERM), waits
//! briefly, force-kills if needed, and surfaces [`Error::Interrupted`].

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Pipe read chunk size.
const CHUNK_SIZE: usize = 1024;

/// Grace period between SIGTERM and SIGKILL on interrupt.
const TERMINATE_GRACE: Duration = Duration::from_secs(1);

/// Outcome of one command execution.
#[derive(Clone, Debug)]
pub struct ExecutionResult {
    pub exit_code: i32,
    /// Stdout and stderr, interleaved in observed arrival order.
    pub output: String,
}

/// The seam the lifecycle controller uses to run commands, so tests can
/// script execution outcomes.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &str) -> Result<ExecutionResult>;
}

/// Executes commands under a configured shell with live output streaming.
pub struct ShellRunner {
    shell: String,
}

impl ShellRunner {
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, command: &str) -> Result<ExecutionResult> {
        execute_streaming(&self.shell, command).await
    }
}

/// Run `shell -c command`, streaming both output pipes live.
pub async fn execute_streaming(shell: &str, command: &str) -> Result<ExecutionResult> {
    let mut child = Command::new(shell)
        .arg("-c")
        .arg(command)
        .stdin(Stdio::inherit())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| Error::Execution(format!("failed to spawn {shell}: {e}")))?;

    let mut child_stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::Execution("child stdout pipe missing".to_string()))?;
    let mut child_stderr = child
        .stderr
        .take()
        .ok_or_else(|| Error::Execution("child stderr pipe missing".to_string()))?;

    let mut console_out = tokio::io::stdout();
    let mut console_err = tokio::io::stderr();
    let mut out_buf = [0u8; CHUNK_SIZE];
    let mut err_buf = [0u8; CHUNK_SIZE];
    let mut out_open = true;
    let mut err_open = true;
    let mut combined = String::new();

    while out_open || err_open {
        tokio::select! {
            read = child_stdout.read(&mut out_buf), if out_open => {
                match read {
                    Ok(0) => out_open = false,
                    Ok(n) => {
                        // Lossy conversion: an unencodable byte becomes a
                        // replacement character instead of aborting the stream.
                        let text = String::from_utf8_lossy(&out_buf[..n]);
                        let _ = console_out.write_all(text.as_bytes()).await;
                        let _ = console_out.flush().await;
                        combined.push_str(&text);
                    }
                    Err(e) => {
                        warn!("stdout pipe read failed: {e}");
                        out_open = false;
                    }
                }
            }
            read = child_stderr.read(&mut err_buf), if err_open => {
                match read {
                    Ok(0) => err_open = false,
                    Ok(n) => {
                        let text = String::from_utf8_lossy(&err_buf[..n]);
                        let _ = console_err.write_all(text.as_bytes()).await;
                        let _ = console_err.flush().await;
                        combined.push_str(&text);
                    }
                    Err(e) => {
                        warn!("stderr pipe read failed: {e}");
                        err_open = false;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                return interrupt_child(child).await;
            }
        }
    }

    let status = child
        .wait()
        .await
        .map_err(|e| Error::Execution(format!("failed to await child: {e}")))?;
    let exit_code = status.code().unwrap_or(1);
    debug!("command exited with code {exit_code} ({} bytes captured)", combined.len());

    Ok(ExecutionResult {
        exit_code,
        output: combined,
    })
}

/// Graceful-then-forced teardown of an interrupted child.
async fn interrupt_child(mut child: Child) -> Result<ExecutionResult> {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        // SIGTERM first so the child can clean up.
        unsafe {
            libc::kill(pid as i32, libc::SIGTERM);
        }
    }
    if tokio::time::timeout(TERMINATE_GRACE, child.wait())
        .await
        .is_err()
    {
        warn!("child ignored SIGTERM, killing");
        let _ = child.kill().await;
    }
    eprintln!("\nCommand interrupted");
    Err(Error::Interrupted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout_and_exit_zero() {
        let result = execute_streaming("sh", "echo hello").await.unwrap();
        assert_eq!(result.exit_code, 0);
        assert!(result.output.contains("hello"));
    }

    #[tokio::test]
    async fn propagates_exit_code() {
        let result = execute_streaming("sh", "exit 7").await.unwrap();
        assert_eq!(result.exit_code, 7);
        assert!(result.output.is_empty());
    }

    #[tokio::test]
    async fn captures_stderr_too() {
        let result = execute_streaming("sh", "echo oops 1>&2; exit 2").await.unwrap();
        assert_eq!(result.exit_code, 2);
        assert!(result.output.contains("oops"));
    }

    #[tokio::test]
    async fn interleaves_streams_in_arrival_order() {
        // Deterministic ordering via separated sleeps between writes on
        // alternating streams.
        let result = execute_streaming(
            "sh",
            "echo one; sleep 0.2; echo two 1>&2; sleep 0.2; echo three",
        )
        .await
        .unwrap();
        let one = result.output.find("one").expect("missing 'one'");
        let two = result.output.find("two").expect("missing 'two'");
        let three = result.output.find("three").expect("missing 'three'");
        assert!(one < two, "stdout before stderr: {}", result.output);
        assert!(two < three, "stderr before second stdout: {}", result.output);
    }

    #[tokio::test]
    async fn missing_shell_is_an_execution_error() {
        let result = execute_streaming("/no/such/shell", "echo hi").await;
        assert!(matches!(result, Err(Error::Execution(_))));
    }

    #[tokio::test]
    async fn shell_runner_uses_configured_shell() {
        let runner = ShellRunner::new("sh");
        let result = runner.run("printf abc").await.unwrap();
        assert_eq!(result.output, "abc");
        assert_eq!(result.exit_code, 0);
    }
}
