//! Supervision of one external process
//!
//! Spawns the program, pumps stdout and stderr into a [`LogSink`] as the
//! child produces them, and settles on exactly one [`Outcome`]: the child's
//! exit, a launch failure, or cancellation. There is no timeout; a hung child
//! runs until the cancellation token fires.

use crate::host::{LogSink, OutputStream};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How long to wait for the output pumps once the child is gone.
///
/// Grandchildren that inherited the pipes can keep them open after the
/// child exits; past this point their output is dropped.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The child ran and exited non-zero.
    ExitCode(i32),
    /// The child was killed by something other than us.
    Terminated(String),
    /// The child never started.
    Launch(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure(FailureReason),
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    /// Applied on top of the inherited environment.
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>, cwd: impl AsRef<Path>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.as_ref().to_path_buf(),
            env: Vec::new(),
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env_overrides(mut self, env: &[(String, String)]) -> Self {
        self.env.extend(env.iter().cloned());
        self
    }

    /// Shell-quoted `program arg1 arg2 ...` for logs and dry runs.
    pub fn display_line(&self) -> String {
        let program = self.program.display().to_string();
        std::iter::once(program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(|part| match shlex::try_quote(part) {
                Ok(quoted) => quoted.into_owned(),
                Err(_) => part.to_string(),
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone)]
pub struct ProcessSupervisor {
    drain_timeout: Duration,
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self {
            drain_timeout: DRAIN_TIMEOUT,
        }
    }
}

impl ProcessSupervisor {
    pub fn with_drain_timeout(drain_timeout: Duration) -> Self {
        Self { drain_timeout }
    }

    /// Run `spec` to completion or cancellation.
    ///
    /// `sink.finished` is called once, after every chunk of output has been
    /// appended, and the same outcome is returned.
    pub async fn run(
        &self,
        spec: &CommandSpec,
        sink: Arc<dyn LogSink>,
        cancel: &CancellationToken,
    ) -> Outcome {
        let outcome = self.supervise(spec, Arc::clone(&sink), cancel).await;
        sink.finished(&outcome);
        outcome
    }

    async fn supervise(
        &self,
        spec: &CommandSpec,
        sink: Arc<dyn LogSink>,
        cancel: &CancellationToken,
    ) -> Outcome {
        if cancel.is_cancelled() {
            return Outcome::Cancelled;
        }

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .current_dir(&spec.cwd)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(command = %spec.display_line(), cwd = %spec.cwd.display(), "spawning process");

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(err) => {
                warn!(program = %spec.program.display(), error = %err, "failed to start process");
                return Outcome::Failure(FailureReason::Launch(describe_launch_error(
                    &spec.program,
                    &err,
                )));
            }
        };
        info!(pid = ?child.id(), program = %spec.program.display(), "process started");

        let pumps: Vec<JoinHandle<()>> = [
            child
                .stdout
                .take()
                .map(|out| tokio::spawn(pump(out, OutputStream::Stdout, Arc::clone(&sink)))),
            child
                .stderr
                .take()
                .map(|err| tokio::spawn(pump(err, OutputStream::Stderr, Arc::clone(&sink)))),
        ]
        .into_iter()
        .flatten()
        .collect();

        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                info!(pid = ?child.id(), "cancellation requested; killing process");
                if let Err(err) = child.kill().await {
                    warn!(error = %err, "failed to kill cancelled process");
                }
                Outcome::Cancelled
            }
            status = child.wait() => match status {
                Ok(status) => outcome_from_status(status),
                Err(err) => {
                    warn!(error = %err, "failed waiting for process");
                    let _ = child.kill().await;
                    Outcome::Failure(FailureReason::Terminated(format!(
                        "lost track of process: {}",
                        err
                    )))
                }
            },
        };

        for handle in pumps {
            self.drain(handle).await;
        }

        info!(outcome = ?outcome, "process finished");
        outcome
    }

    async fn drain(&self, mut handle: JoinHandle<()>) {
        match tokio::time::timeout(self.drain_timeout, &mut handle).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(error = %err, "output pump failed"),
            Err(_) => {
                warn!("output still open after process exit; dropping the rest");
                handle.abort();
                let _ = handle.await;
            }
        }
    }
}

/// Forward one stream to the sink as bytes arrive, preserving order.
///
/// Progress lines rewritten with `\r` show up without waiting for a newline.
/// Only an incomplete UTF-8 sequence at the end of a read is held back.
async fn pump<R>(mut reader: R, stream: OutputStream, sink: Arc<dyn LogSink>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; 8192];
    let mut pending: Vec<u8> = Vec::new();
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                pending.extend_from_slice(&buf[..n]);
                let ready = utf8_boundary(&pending);
                if ready > 0 {
                    sink.append(stream, &String::from_utf8_lossy(&pending[..ready]));
                    pending.drain(..ready);
                }
            }
            Err(err) => {
                debug!(stream = ?stream, error = %err, "output stream closed with error");
                break;
            }
        }
    }
    if !pending.is_empty() {
        sink.append(stream, &String::from_utf8_lossy(&pending));
    }
}

/// Length of the prefix that can be decoded now. A truncated multi-byte
/// character at the end waits for the next read; invalid bytes do not.
fn utf8_boundary(bytes: &[u8]) -> usize {
    match std::str::from_utf8(bytes) {
        Ok(_) => bytes.len(),
        Err(err) if err.error_len().is_none() => err.valid_up_to(),
        Err(_) => bytes.len(),
    }
}

fn outcome_from_status(status: ExitStatus) -> Outcome {
    if status.success() {
        return Outcome::Success;
    }
    if let Some(code) = status.code() {
        return Outcome::Failure(FailureReason::ExitCode(code));
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return Outcome::Failure(FailureReason::Terminated(format!(
                "killed by signal {}",
                signal
            )));
        }
    }
    Outcome::Failure(FailureReason::Terminated(status.to_string()))
}

fn describe_launch_error(program: &Path, err: &std::io::Error) -> String {
    match err.kind() {
        std::io::ErrorKind::NotFound => format!("executable not found: {}", program.display()),
        std::io::ErrorKind::PermissionDenied => {
            format!("executable is not runnable: {}", program.display())
        }
        _ => format!("failed to start {}: {}", program.display(), err),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::host::testing::{RecordingSink, SinkEvent};
    use std::time::Instant;

    fn sh(script: &str) -> CommandSpec {
        CommandSpec::new("sh", std::env::temp_dir()).args(["-c", script])
    }

    fn finished_count(sink: &RecordingSink) -> usize {
        sink.events()
            .iter()
            .filter(|e| matches!(e, SinkEvent::Finished(_)))
            .count()
    }

    #[test]
    fn test_display_line_quotes_arguments() {
        let spec = CommandSpec::new("cover-agent", ".").args([
            "--test-command",
            "pytest tests/test_a.py --cov=.",
            "--model",
            "gpt-4o",
        ]);
        let line = spec.display_line();
        assert!(line.starts_with("cover-agent --test-command "));
        assert_eq!(
            shlex::split(&line).unwrap(),
            ["cover-agent", "--test-command", "pytest tests/test_a.py --cov=.", "--model", "gpt-4o"]
        );
    }

    #[tokio::test]
    async fn test_exit_zero_is_single_success() {
        let sink = Arc::new(RecordingSink::default());
        let outcome = ProcessSupervisor::default()
            .run(&sh("echo hello"), sink.clone(), &CancellationToken::new())
            .await;

        assert_eq!(outcome, Outcome::Success);
        let events = sink.events();
        assert_eq!(events.last(), Some(&SinkEvent::Finished(Outcome::Success)));
        assert_eq!(finished_count(&sink), 1);
        assert_eq!(sink.text(OutputStream::Stdout), "hello\n");
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_failure_with_code() {
        let sink = Arc::new(RecordingSink::default());
        let outcome = ProcessSupervisor::default()
            .run(&sh("echo oops >&2; exit 3"), sink.clone(), &CancellationToken::new())
            .await;

        assert_eq!(outcome, Outcome::Failure(FailureReason::ExitCode(3)));
        assert_eq!(sink.text(OutputStream::Stderr), "oops\n");
    }

    #[tokio::test]
    async fn test_missing_executable_is_launch_failure() {
        let sink = Arc::new(RecordingSink::default());
        let spec = CommandSpec::new("/definitely/not/here/cover-agent", std::env::temp_dir());
        let outcome = ProcessSupervisor::default()
            .run(&spec, sink.clone(), &CancellationToken::new())
            .await;

        match outcome {
            Outcome::Failure(FailureReason::Launch(reason)) => {
                assert!(reason.contains("not found"), "{}", reason)
            }
            other => panic!("expected launch failure, got {:?}", other),
        }
        assert_eq!(finished_count(&sink), 1);
    }

    #[tokio::test]
    async fn test_cancel_mid_run_kills_and_reports_once() {
        let sink = Arc::new(RecordingSink::default());
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let outcome = ProcessSupervisor::default()
            .run(&sh("echo started; exec sleep 10"), sink.clone(), &cancel)
            .await;

        assert_eq!(outcome, Outcome::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(finished_count(&sink), 1);
        assert_eq!(sink.events().last(), Some(&SinkEvent::Finished(Outcome::Cancelled)));
        assert_eq!(sink.text(OutputStream::Stdout), "started\n");
    }

    #[tokio::test]
    async fn test_partial_lines_forwarded_while_running() {
        let sink = Arc::new(RecordingSink::default());
        let cancel = CancellationToken::new();
        let run = {
            let sink = sink.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                ProcessSupervisor::default()
                    .run(&sh("printf '10%%\\r20%%\\r'; exec sleep 10"), sink, &cancel)
                    .await
            })
        };

        let deadline = Instant::now() + Duration::from_secs(5);
        while sink.text(OutputStream::Stdout) != "10%\r20%\r" {
            assert!(Instant::now() < deadline, "carriage-return output never arrived");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(finished_count(&sink), 0);

        cancel.cancel();
        assert_eq!(run.await.unwrap(), Outcome::Cancelled);
        assert_eq!(finished_count(&sink), 1);
    }

    #[test]
    fn test_utf8_boundary_holds_back_split_character() {
        let e_acute = "é".as_bytes();
        assert_eq!(utf8_boundary(b"plain"), 5);
        assert_eq!(utf8_boundary(&[b'a', e_acute[0]]), 1);
        assert_eq!(utf8_boundary(&[b'a', e_acute[0], e_acute[1]]), 3);
        assert_eq!(utf8_boundary(&[b'a', 0xff, b'b']), 3);
    }

    #[tokio::test]
    async fn test_already_cancelled_does_not_spawn() {
        let sink = Arc::new(RecordingSink::default());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("ran");
        let script = format!("touch {}", marker.display());

        let outcome = ProcessSupervisor::default()
            .run(&sh(&script), sink.clone(), &cancel)
            .await;

        assert_eq!(outcome, Outcome::Cancelled);
        assert!(!marker.exists());
        assert_eq!(sink.events(), vec![SinkEvent::Finished(Outcome::Cancelled)]);
    }

    #[tokio::test]
    async fn test_order_preserved_within_each_stream() {
        let sink = Arc::new(RecordingSink::default());
        let script = "i=1; while [ $i -le 200 ]; do echo out$i; echo err$i >&2; i=$((i+1)); done";
        let outcome = ProcessSupervisor::default()
            .run(&sh(script), sink.clone(), &CancellationToken::new())
            .await;

        assert_eq!(outcome, Outcome::Success);
        let expected_out: String = (1..=200).map(|i| format!("out{}\n", i)).collect();
        let expected_err: String = (1..=200).map(|i| format!("err{}\n", i)).collect();
        assert_eq!(sink.text(OutputStream::Stdout), expected_out);
        assert_eq!(sink.text(OutputStream::Stderr), expected_err);
    }

    #[tokio::test]
    async fn test_env_overrides_applied_over_inherited() {
        let sink = Arc::new(RecordingSink::default());
        let spec = sh("printf '%s|%s|%s' \"$OPENAI_API_KEY\" \"$OPENAI_API_BASE\" \"${PATH:+inherited}\"")
            .with_env_overrides(&[
                ("OPENAI_API_KEY".to_string(), "sk-test".to_string()),
                ("OPENAI_API_BASE".to_string(), "https://example.test".to_string()),
            ]);
        let outcome = ProcessSupervisor::default()
            .run(&spec, sink.clone(), &CancellationToken::new())
            .await;

        assert_eq!(outcome, Outcome::Success);
        assert_eq!(
            sink.text(OutputStream::Stdout),
            "sk-test|https://example.test|inherited"
        );
    }

    #[tokio::test]
    async fn test_killed_by_signal_is_failure() {
        let sink = Arc::new(RecordingSink::default());
        let outcome = ProcessSupervisor::default()
            .run(&sh("kill -9 $$"), sink, &CancellationToken::new())
            .await;

        assert_eq!(
            outcome,
            Outcome::Failure(FailureReason::Terminated("killed by signal 9".to_string()))
        );
    }
}
