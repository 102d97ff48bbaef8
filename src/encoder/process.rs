// src/encoder/process.rs
//! Encoder subprocess supervisor
//!
//! Thin wrapper over one external encoder process: feeds raw bytes to its
//! stdin, drains stderr into the log, exposes pause/resume/terminate as
//! OS-level signals, and surfaces the exit status through a watch channel.
//! The wrapper never interprets encoded output.

use crate::utils::errors::{EngineError, Result};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, Command};
use tokio::sync::{watch, Mutex};
use tracing::{debug, warn};

/// Supervisor for one running encoder process
pub struct EncoderProcess {
    pid: u32,
    stdin: Mutex<Option<ChildStdin>>,
    exit_rx: watch::Receiver<Option<ExitStatus>>,
}

impl EncoderProcess {
    /// Spawn the encoder with piped stdin and stderr.
    ///
    /// stderr lines are forwarded to the log; the process exit status is
    /// published on the watch channel returned by [`EncoderProcess::exit_watch`].
    pub fn spawn(program: &str, args: &[String]) -> Result<Self> {
        debug!("Spawning encoder: {} {:?}", program, args);

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| EngineError::EncoderLaunchFailed(format!("{}: {}", program, e)))?;

        let pid = child
            .id()
            .ok_or_else(|| EngineError::EncoderLaunchFailed("process exited on spawn".into()))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| EngineError::EncoderLaunchFailed("failed to capture stdin".into()))?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| EngineError::EncoderLaunchFailed("failed to capture stderr".into()))?;

        // Forward encoder diagnostics to the log
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                warn!(encoder_pid = pid, "encoder: {}", line);
            }
        });

        // Publish the exit status once the process ends
        let (exit_tx, exit_rx) = watch::channel(None);
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => {
                    debug!(encoder_pid = pid, "Encoder exited with {}", status);
                    let _ = exit_tx.send(Some(status));
                }
                Err(e) => {
                    warn!(encoder_pid = pid, "Failed to reap encoder: {}", e);
                }
            }
        });

        debug!("Encoder spawned with PID {}", pid);

        Ok(Self {
            pid,
            stdin: Mutex::new(Some(stdin)),
            exit_rx,
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Watch channel carrying the exit status once the process ends
    pub fn exit_watch(&self) -> watch::Receiver<Option<ExitStatus>> {
        self.exit_rx.clone()
    }

    /// Whether the process has not yet exited
    pub fn is_running(&self) -> bool {
        self.exit_rx.borrow().is_none()
    }

    /// Write one chunk to the encoder's stdin
    pub async fn write_chunk(&self, chunk: &[u8]) -> Result<()> {
        let mut guard = self.stdin.lock().await;
        let stdin = guard
            .as_mut()
            .ok_or_else(|| EngineError::EncoderCrashed("encoder input already closed".into()))?;

        stdin
            .write_all(chunk)
            .await
            .map_err(|e| EngineError::EncoderCrashed(format!("write to encoder failed: {}", e)))
    }

    /// Signal end-of-input by closing stdin
    pub async fn close_input(&self) {
        let mut guard = self.stdin.lock().await;
        if guard.take().is_some() {
            debug!(encoder_pid = self.pid, "Closed encoder input");
        }
    }

    /// Suspend the process (SIGSTOP). Valid only while it is alive.
    pub fn pause(&self) -> Result<()> {
        self.signal(Signal::SIGSTOP, "pause")
    }

    /// Continue a suspended process (SIGCONT). Valid only while it is alive.
    pub fn resume(&self) -> Result<()> {
        self.signal(Signal::SIGCONT, "resume")
    }

    fn signal(&self, signal: Signal, what: &str) -> Result<()> {
        if !self.is_running() {
            return Err(EngineError::EncoderCrashed(format!(
                "cannot {}: encoder process has exited",
                what
            )));
        }

        debug!(encoder_pid = self.pid, "Sending {} to encoder", signal);
        kill(Pid::from_raw(self.pid as i32), signal)
            .map_err(|e| EngineError::EncoderCrashed(format!("{} signal failed: {}", what, e)))
    }

    /// Wait up to `grace` for the process to exit on its own.
    ///
    /// Returns `Some(status)` on exit, `None` on timeout.
    pub async fn wait_exit(&self, grace: Duration) -> Option<ExitStatus> {
        let mut rx = self.exit_rx.clone();
        let waited = tokio::time::timeout(grace, rx.wait_for(|status| status.is_some())).await;

        match waited {
            Ok(Ok(status)) => *status,
            _ => None,
        }
    }

    /// Send SIGKILL without waiting for the process to be reaped.
    ///
    /// Safe to call from synchronous contexts (e.g. Drop).
    pub fn kill_now(&self) {
        if self.is_running() {
            // A stopped process cannot be killed until continued
            let _ = kill(Pid::from_raw(self.pid as i32), Signal::SIGCONT);
            if let Err(e) = kill(Pid::from_raw(self.pid as i32), Signal::SIGKILL) {
                warn!(encoder_pid = self.pid, "SIGKILL failed: {}", e);
            }
        }
    }

    /// Forcibly terminate the process (SIGKILL), then wait for the reaper
    pub async fn terminate(&self) {
        self.kill_now();
        let _ = self.wait_exit(Duration::from_secs(5)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cat() -> EncoderProcess {
        EncoderProcess::spawn("cat", &[]).unwrap()
    }

    #[tokio::test]
    async fn test_spawn_write_and_finish() {
        let encoder = cat();
        assert!(encoder.is_running());

        encoder.write_chunk(b"hello").await.unwrap();
        encoder.close_input().await;

        let status = encoder.wait_exit(Duration::from_secs(5)).await;
        assert!(status.unwrap().success());
        assert!(!encoder.is_running());
    }

    #[tokio::test]
    async fn test_write_after_close_fails() {
        let encoder = cat();
        encoder.close_input().await;

        let result = encoder.write_chunk(b"late").await;
        assert!(matches!(result, Err(EngineError::EncoderCrashed(_))));

        encoder.terminate().await;
    }

    #[tokio::test]
    async fn test_pause_resume_live_process() {
        let encoder = EncoderProcess::spawn("sleep", &["5".to_string()]).unwrap();

        encoder.pause().unwrap();
        encoder.resume().unwrap();

        encoder.terminate().await;
        assert!(!encoder.is_running());
    }

    #[tokio::test]
    async fn test_pause_after_exit_is_error() {
        let encoder = cat();
        encoder.close_input().await;
        encoder.wait_exit(Duration::from_secs(5)).await.unwrap();

        assert!(matches!(
            encoder.pause(),
            Err(EngineError::EncoderCrashed(_))
        ));
    }

    #[tokio::test]
    async fn test_spawn_missing_program_fails() {
        let result = EncoderProcess::spawn("definitely-not-an-encoder", &[]);
        assert!(matches!(
            result,
            Err(EngineError::EncoderLaunchFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_wait_exit_times_out() {
        let encoder = EncoderProcess::spawn("sleep", &["5".to_string()]).unwrap();
        let status = encoder.wait_exit(Duration::from_millis(100)).await;
        assert!(status.is_none());

        encoder.terminate().await;
    }
}
