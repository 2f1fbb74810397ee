use crate::trace::TraceWriter;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// The duration to wait after sending SIGINT before escalating to SIGTERM.
const SIGINT_TIMEOUT: Duration = Duration::from_millis(7500);
/// The duration to wait after sending SIGTERM before escalating to SIGKILL.
const SIGTERM_TIMEOUT: Duration = Duration::from_millis(2500);

/// Error returned when the process was stopped because its token was cancelled.
#[derive(Debug, thiserror::Error)]
#[error("process '{file_name}' was cancelled")]
pub struct ProcessCancelledError {
    pub file_name: String,
}

/// A line received from stdout or stderr.
#[derive(Debug, Clone)]
pub struct ProcessDataReceivedEventArgs {
    pub data: String,
}

/// Spawns a host process, reads stdout/stderr on separate tasks, supports
/// graceful cancellation (SIGINT → SIGTERM → SIGKILL) and delivers output
/// lines through channels.
pub struct ProcessInvoker {
    trace: Arc<dyn TraceWriter>,
    stdout_tx: mpsc::UnboundedSender<ProcessDataReceivedEventArgs>,
    stdout_rx: Option<mpsc::UnboundedReceiver<ProcessDataReceivedEventArgs>>,
    stderr_tx: mpsc::UnboundedSender<ProcessDataReceivedEventArgs>,
    stderr_rx: Option<mpsc::UnboundedReceiver<ProcessDataReceivedEventArgs>>,
}

impl ProcessInvoker {
    pub fn new(trace: Arc<dyn TraceWriter>) -> Self {
        let (stdout_tx, stdout_rx) = mpsc::unbounded_channel();
        let (stderr_tx, stderr_rx) = mpsc::unbounded_channel();
        Self {
            trace,
            stdout_tx,
            stdout_rx: Some(stdout_rx),
            stderr_tx,
            stderr_rx: Some(stderr_rx),
        }
    }

    /// Take the stdout receiver. Can only be called once.
    pub fn take_stdout_receiver(
        &mut self,
    ) -> Option<mpsc::UnboundedReceiver<ProcessDataReceivedEventArgs>> {
        self.stdout_rx.take()
    }

    /// Take the stderr receiver. Can only be called once.
    pub fn take_stderr_receiver(
        &mut self,
    ) -> Option<mpsc::UnboundedReceiver<ProcessDataReceivedEventArgs>> {
        self.stderr_rx.take()
    }

    /// Run `file_name` with `arguments` in `working_directory` and return its
    /// exit code.
    ///
    /// The child inherits the current environment plus `environment`. When
    /// `cancellation_token` fires the child is asked to stop and
    /// [`ProcessCancelledError`] is returned once it has exited. Dropping the
    /// returned future kills the child.
    pub async fn execute(
        &self,
        working_directory: &Path,
        file_name: &str,
        arguments: &[String],
        environment: &HashMap<String, String>,
        cancellation_token: CancellationToken,
    ) -> Result<i32> {
        if file_name.is_empty() {
            anyhow::bail!("file name must not be empty");
        }

        self.trace.info("Starting process:");
        self.trace.info(&format!("  File name: '{file_name}'"));
        self.trace
            .info(&format!("  Arguments: '{}'", arguments.join(" ")));
        self.trace.info(&format!(
            "  Working directory: '{}'",
            working_directory.display()
        ));

        let mut cmd = Command::new(file_name);
        cmd.args(arguments);
        if working_directory.is_dir() {
            cmd.current_dir(working_directory);
        }
        cmd.envs(environment);
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());
        cmd.stdin(std::process::Stdio::null());
        cmd.kill_on_drop(true);

        let start = std::time::Instant::now();
        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to start process '{file_name}'"))?;

        let pid = child.id().unwrap_or(0);
        self.trace.info(&format!(
            "Process started with process id {pid}, waiting for process exit."
        ));

        let stdout_task = spawn_line_reader(
            child.stdout.take(),
            self.stdout_tx.clone(),
            self.trace.clone(),
            "STDOUT",
        );
        let stderr_task = spawn_line_reader(
            child.stderr.take(),
            self.stderr_tx.clone(),
            self.trace.clone(),
            "STDERR",
        );

        let exit_code: i32;
        let was_cancelled;

        tokio::select! {
            status = child.wait() => {
                was_cancelled = false;
                exit_code = status
                    .context("failed to wait for process")?
                    .code()
                    .unwrap_or(-1);
            }
            _ = cancellation_token.cancelled() => {
                was_cancelled = true;
                self.trace.info("Cancellation requested.");
                exit_code = self.cancel_and_kill_process(&mut child).await;
            }
        }

        let _ = stdout_task.await;
        let _ = stderr_task.await;

        self.trace.info(&format!(
            "Finished process {pid} with exit code {exit_code}, and elapsed time {:.2?}.",
            start.elapsed()
        ));

        if was_cancelled {
            return Err(ProcessCancelledError {
                file_name: file_name.to_string(),
            }
            .into());
        }

        Ok(exit_code)
    }

    async fn cancel_and_kill_process(&self, child: &mut tokio::process::Child) -> i32 {
        if self
            .send_signal_and_wait(child, Signal::Int, SIGINT_TIMEOUT)
            .await
        {
            self.trace.info("Process cancelled successfully through SIGINT.");
            return wait_code(child).await;
        }

        if self
            .send_signal_and_wait(child, Signal::Term, SIGTERM_TIMEOUT)
            .await
        {
            self.trace
                .info("Process terminated successfully through SIGTERM.");
            return wait_code(child).await;
        }

        self.trace
            .info("Killing process since both interrupt and terminate signals were ignored.");
        let _ = child.kill().await;
        wait_code(child).await
    }

    /// Send a signal and wait up to `timeout` for the child to exit.
    #[cfg(unix)]
    async fn send_signal_and_wait(
        &self,
        child: &mut tokio::process::Child,
        signal: Signal,
        timeout: Duration,
    ) -> bool {
        let Some(pid) = child.id() else {
            return true;
        };

        let sig = match signal {
            Signal::Int => nix::sys::signal::Signal::SIGINT,
            Signal::Term => nix::sys::signal::Signal::SIGTERM,
        };

        self.trace.info(&format!("Sending {sig:?} to process {pid}."));
        if nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), sig).is_err() {
            self.trace
                .info(&format!("{sig:?} signal failed to send to process {pid}."));
            return false;
        }

        tokio::select! {
            result = child.wait() => result.is_ok(),
            _ = tokio::time::sleep(timeout) => {
                self.trace.info(&format!(
                    "Process did not honor {sig:?} within {:.1}s.",
                    timeout.as_secs_f64()
                ));
                false
            }
        }
    }

    #[cfg(not(unix))]
    async fn send_signal_and_wait(
        &self,
        child: &mut tokio::process::Child,
        _signal: Signal,
        timeout: Duration,
    ) -> bool {
        tokio::select! {
            result = child.wait() => result.is_ok(),
            _ = tokio::time::sleep(timeout) => false,
        }
    }
}

async fn wait_code(child: &mut tokio::process::Child) -> i32 {
    child
        .wait()
        .await
        .map(|s| s.code().unwrap_or(-1))
        .unwrap_or(-1)
}

fn spawn_line_reader<R>(
    stream: Option<R>,
    tx: mpsc::UnboundedSender<ProcessDataReceivedEventArgs>,
    trace: Arc<dyn TraceWriter>,
    name: &'static str,
) -> tokio::task::JoinHandle<()>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        if let Some(stream) = stream {
            let mut lines = BufReader::new(stream).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let _ = tx.send(ProcessDataReceivedEventArgs { data: line });
            }
        }
        trace.verbose(&format!("{name} stream read finished."));
    })
}

#[derive(Debug, Clone, Copy)]
enum Signal {
    Int,
    Term,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::NullTraceWriter;

    fn make_invoker() -> ProcessInvoker {
        ProcessInvoker::new(Arc::new(NullTraceWriter))
    }

    #[tokio::test]
    async fn execute_echo_streams_stdout() {
        let mut invoker = make_invoker();
        let mut rx = invoker.take_stdout_receiver().unwrap();

        let handle = tokio::spawn(async move {
            invoker
                .execute(
                    Path::new(""),
                    "echo",
                    &["hello".to_string()],
                    &HashMap::new(),
                    CancellationToken::new(),
                )
                .await
        });

        let mut lines = Vec::new();
        while let Some(evt) = rx.recv().await {
            lines.push(evt.data);
        }

        assert_eq!(handle.await.unwrap().unwrap(), 0);
        assert_eq!(lines, vec!["hello"]);
    }

    #[tokio::test]
    async fn execute_reports_nonzero_exit_code() {
        let invoker = make_invoker();
        let code = invoker
            .execute(
                Path::new(""),
                "sh",
                &["-c".to_string(), "exit 3".to_string()],
                &HashMap::new(),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(code, 3);
    }

    #[tokio::test]
    async fn execute_nonexistent_fails_to_start() {
        let invoker = make_invoker();
        let result = invoker
            .execute(
                Path::new(""),
                "nonexistent_command_xyz_123",
                &[],
                &HashMap::new(),
                CancellationToken::new(),
            )
            .await;
        let err = result.unwrap_err();
        assert!(format!("{err:#}").contains("failed to start process"));
    }

    #[tokio::test]
    async fn execute_passes_environment() {
        let mut env = HashMap::new();
        env.insert("MY_TEST_VAR".to_string(), "test_value_123".to_string());

        let mut invoker = make_invoker();
        let mut rx = invoker.take_stdout_receiver().unwrap();

        let handle = tokio::spawn(async move {
            invoker
                .execute(
                    Path::new(""),
                    "sh",
                    &["-c".to_string(), "echo $MY_TEST_VAR".to_string()],
                    &env,
                    CancellationToken::new(),
                )
                .await
        });

        let mut lines = Vec::new();
        while let Some(evt) = rx.recv().await {
            lines.push(evt.data);
        }
        assert_eq!(handle.await.unwrap().unwrap(), 0);
        assert_eq!(lines, vec!["test_value_123"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn execute_cancelled_returns_cancelled_error() {
        let invoker = make_invoker();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let err = invoker
            .execute(
                Path::new(""),
                "sleep",
                &["5".to_string()],
                &HashMap::new(),
                cancel,
            )
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<ProcessCancelledError>().is_some());
    }
}
