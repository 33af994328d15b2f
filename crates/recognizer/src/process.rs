use std::ffi::OsString;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use log::{debug, info, warn};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use crate::error::{JobError, Result};

/// How a recognizer process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessExit {
    /// The process exited on its own
    Exited(ExitStatus),
    /// A stop was requested; the process was killed or never spawned
    Stopped,
}

/// Console output captured from the recognizer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConsoleOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Handle to one recognizer invocation.
///
/// Clones share the stop signal and the captured console, so one clone can
/// drive [`run`](Self::run) while another requests a stop.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    stop_tx: Arc<watch::Sender<bool>>,
    live: Arc<AtomicBool>,
    console: Arc<Mutex<ConsoleOutput>>,
}

impl Default for ProcessHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Keeps a handle marked live until dropped
#[derive(Debug)]
pub struct LiveGuard {
    live: Arc<AtomicBool>,
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.live.store(false, Ordering::SeqCst);
    }
}

impl ProcessHandle {
    pub fn new() -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            stop_tx: Arc::new(stop_tx),
            live: Arc::new(AtomicBool::new(false)),
            console: Arc::new(Mutex::new(ConsoleOutput::default())),
        }
    }

    /// Request the process to stop. Does not wait for it to exit.
    pub fn stop(&self) {
        if !self.stop_tx.send_replace(true) {
            debug!("Stop requested for recognizer process");
        }
    }

    pub fn is_stopped(&self) -> bool {
        *self.stop_tx.borrow()
    }

    /// True while a run holds the [`LiveGuard`] of this handle
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    /// Mark the handle live for as long as the returned guard exists
    pub fn claim(&self) -> LiveGuard {
        self.live.store(true, Ordering::SeqCst);
        LiveGuard {
            live: Arc::clone(&self.live),
        }
    }

    pub fn console(&self) -> ConsoleOutput {
        lock_console(&self.console).clone()
    }

    /// Spawn `program args...` and wait until it exits or a stop is requested.
    ///
    /// If a stop was requested before this call, nothing is spawned.
    pub async fn run(&self, program: &Path, args: &[OsString], capture: bool) -> Result<ProcessExit> {
        let mut stop_rx = self.stop_tx.subscribe();
        if *stop_rx.borrow_and_update() {
            info!("Recognizer stopped before launch");
            return Ok(ProcessExit::Stopped);
        }

        debug!("Executing {} with {} argument(s)", program.display(), args.len());

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if capture {
            cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        } else {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
        }

        let mut child = cmd.spawn().map_err(|source| JobError::Launch {
            program: program.to_path_buf(),
            source,
        })?;
        info!("Recognizer started (pid {})", child.id().map(|p| p.to_string()).unwrap_or_else(|| "?".to_string()));

        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(self.capture_lines(stdout, Stream::Stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(self.capture_lines(stderr, Stream::Stderr));
        }

        tokio::select! {
            status = child.wait() => {
                let status = status.map_err(JobError::Wait)?;
                for reader in readers {
                    if let Err(e) = reader.await {
                        warn!("Recognizer output reader failed: {}", e);
                    }
                }
                debug!("Recognizer exited with {}", status);
                Ok(ProcessExit::Exited(status))
            }
            _ = stop_requested(&mut stop_rx) => {
                if let Err(e) = child.start_kill() {
                    // Already exited between the stop and the kill
                    debug!("Kill after stop request failed: {}", e);
                }
                let status = child.wait().await.map_err(JobError::Wait)?;
                info!("Recognizer stopped ({})", status);
                Ok(ProcessExit::Stopped)
            }
        }
    }

    fn capture_lines<R>(&self, reader: R, stream: Stream) -> JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let console = Arc::clone(&self.console);
        tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!("recognizer {}: {}", stream.name(), line);
                let mut console = lock_console(&console);
                let buf = match stream {
                    Stream::Stdout => &mut console.stdout,
                    Stream::Stderr => &mut console.stderr,
                };
                buf.push_str(&line);
                buf.push('\n');
            }
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

impl Stream {
    fn name(self) -> &'static str {
        match self {
            Stream::Stdout => "stdout",
            Stream::Stderr => "stderr",
        }
    }
}

/// Resolves once a stop has been requested
async fn stop_requested(stop_rx: &mut watch::Receiver<bool>) {
    if stop_rx.wait_for(|stopped| *stopped).await.is_err() {
        // Sender dropped: nobody can request a stop anymore
        std::future::pending::<()>().await;
    }
}

fn lock_console(console: &Mutex<ConsoleOutput>) -> std::sync::MutexGuard<'_, ConsoleOutput> {
    console.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sh(script: &str) -> (std::path::PathBuf, Vec<OsString>) {
        (std::path::PathBuf::from("/bin/sh"), vec![OsString::from("-c"), OsString::from(script)])
    }

    #[tokio::test]
    async fn test_captures_console_output() {
        let handle = ProcessHandle::new();
        let (program, args) = sh("echo first; echo second; echo oops >&2");

        let exit = handle.run(&program, &args, true).await.unwrap();
        match exit {
            ProcessExit::Exited(status) => assert!(status.success()),
            ProcessExit::Stopped => panic!("process should have exited on its own"),
        }

        let console = handle.console();
        assert_eq!(console.stdout, "first\nsecond\n");
        assert_eq!(console.stderr, "oops\n");
    }

    #[tokio::test]
    async fn test_reports_failing_exit_status() {
        let handle = ProcessHandle::new();
        let (program, args) = sh("exit 3");

        match handle.run(&program, &args, false).await.unwrap() {
            ProcessExit::Exited(status) => assert_eq!(status.code(), Some(3)),
            ProcessExit::Stopped => panic!("process should have exited on its own"),
        }
        assert_eq!(handle.console(), ConsoleOutput::default());
    }

    #[tokio::test]
    async fn test_stop_kills_running_process() {
        let handle = ProcessHandle::new();
        let (program, args) = sh("exec sleep 30");

        let runner = handle.clone();
        let task = tokio::spawn(async move { runner.run(&program, &args, false).await });

        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.stop();

        let exit = tokio::time::timeout(Duration::from_secs(10), task)
            .await
            .expect("stop should end the run")
            .unwrap()
            .unwrap();
        assert_eq!(exit, ProcessExit::Stopped);
        assert!(handle.is_stopped());
    }

    #[tokio::test]
    async fn test_stop_before_launch_skips_spawn() {
        let handle = ProcessHandle::new();
        handle.stop();

        let exit = handle
            .run(Path::new("/nonexistent/recognizer"), &[], true)
            .await
            .unwrap();
        assert_eq!(exit, ProcessExit::Stopped);
    }

    #[tokio::test]
    async fn test_missing_binary_is_launch_error() {
        let handle = ProcessHandle::new();
        let err = handle
            .run(Path::new("/nonexistent/recognizer"), &[], true)
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::Launch { .. }));
    }

    #[test]
    fn test_live_guard() {
        let handle = ProcessHandle::new();
        assert!(!handle.is_live());
        {
            let _guard = handle.claim();
            assert!(handle.clone().is_live());
        }
        assert!(!handle.is_live());
    }
}
