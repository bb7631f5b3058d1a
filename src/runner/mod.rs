//! Execution controller - owns the lifecycle of one in-flight command.
//!
//! A run moves through spawn, streaming, and a finishing wait. Two reader
//! tasks perform line reads on the child's stdout and stderr, decode
//! every line through the fallback chain, and emit it as an [`OutputChunk`]
//! the moment it arrives, so long-running diagnostics stay visibly alive.
//! Timeout and cancellation both converge on a forced kill of the child's
//! process group, and exactly one [`ExecutionResult`] is delivered per run,
//! after every chunk emission has been attempted.

pub mod decode;
pub mod launcher;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub use decode::OutputDecoder;
pub use launcher::LaunchError;

/// Return code reported when no real exit code exists (timeout, kill by
/// signal, wait failure).
pub const FAILURE_SENTINEL: i32 = -1;

/// Marker prefixed to stderr when a cancelled run ends with a non-zero
/// return code.
pub const CANCEL_MARKER: &str = "Cancelled by user.";

/// How long the reader tasks may run on after a forced kill before the
/// result is delivered without them.
const READER_GRACE: Duration = Duration::from_millis(500);

/// One fully resolved command ready to run.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    /// Human-readable name for logging and the final report.
    pub display_name: String,
    /// The resolved expression handed to the launcher as opaque text.
    pub raw_command: String,
    /// Wall-clock budget for the run. Must be strictly positive.
    pub timeout: Duration,
}

/// One decoded piece of streamed output.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputChunk {
    pub text: String,
    pub is_error_stream: bool,
}

/// The terminal report for a run. Produced exactly once.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    /// Full captured stdout, decoded and trimmed. Empty on timeout.
    pub stdout: String,
    /// Full captured stderr, decoded and trimmed. Carries the cancellation
    /// marker when the run was cancelled and failed.
    pub stderr: String,
    /// The child's exit code, or [`FAILURE_SENTINEL`] when none exists.
    pub return_code: i32,
    pub timed_out: bool,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        self.return_code == 0 && !self.timed_out
    }
}

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("a command is already running")]
    Busy,

    #[error("timeout must be strictly positive")]
    ZeroTimeout,

    #[error(transparent)]
    Launch(#[from] LaunchError),

    #[error("execution task ended without reporting a result")]
    ResultLost,
}

/// Cooperative cancellation for one run. Cloneable; safe to trigger from any
/// task. Cancelling twice, or after the run finished, is a no-op.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancelHandle {
    fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Request cancellation. The flag records the request; the notification
    /// wakes the supervisor, which kills the child, because the flag alone
    /// cannot interrupt a blocking pipe read.
    pub fn cancel(&self) {
        if !self.flag.swap(true, Ordering::SeqCst) {
            self.notify.notify_one();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        self.notify.notified().await;
    }
}

/// Handle to one in-flight run: streamed chunks, the single-shot result, and
/// the cancellation lever.
pub struct RunHandle {
    /// Streamed output in arrival order, per stream. Closed once the run
    /// finishes.
    pub chunks: mpsc::UnboundedReceiver<OutputChunk>,
    result: oneshot::Receiver<ExecutionResult>,
    cancel: CancelHandle,
}

impl RunHandle {
    /// A cloneable cancellation handle for this run.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Wait for the terminal result, discarding any unconsumed chunks.
    pub async fn wait(self) -> Result<ExecutionResult, ExecError> {
        self.result.await.map_err(|_| ExecError::ResultLost)
    }
}

/// Runs commands one at a time. A second spawn while a run is active is
/// rejected rather than queued.
#[derive(Debug, Clone)]
pub struct Runner {
    decoder: OutputDecoder,
    active: Arc<AtomicBool>,
}

impl Default for Runner {
    fn default() -> Self {
        Self::new(OutputDecoder::default())
    }
}

impl Runner {
    pub fn new(decoder: OutputDecoder) -> Self {
        Self {
            decoder,
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start a run. Returns immediately with a [`RunHandle`] once the child
    /// process exists; a spawn failure is surfaced here and nothing is
    /// emitted. The background task owns the child for the run's duration.
    pub fn spawn(&self, request: ExecutionRequest) -> Result<RunHandle, ExecError> {
        if request.timeout.is_zero() {
            return Err(ExecError::ZeroTimeout);
        }
        if self.active.swap(true, Ordering::SeqCst) {
            return Err(ExecError::Busy);
        }

        let child = match launcher::launch(&request.raw_command) {
            Ok(child) => child,
            Err(e) => {
                self.active.store(false, Ordering::SeqCst);
                return Err(e.into());
            }
        };

        debug!(command = %request.display_name, "Execution started");

        let (chunk_tx, chunk_rx) = mpsc::unbounded_channel();
        let (result_tx, result_rx) = oneshot::channel();
        let cancel = CancelHandle::new();

        let decoder = self.decoder.clone();
        let active = Arc::clone(&self.active);
        let supervisor_cancel = cancel.clone();
        tokio::spawn(async move {
            let result =
                supervise(child, &request, decoder, chunk_tx, supervisor_cancel).await;
            active.store(false, Ordering::SeqCst);
            // The listener may have gone away; that is not our problem.
            let _ = result_tx.send(result);
        });

        Ok(RunHandle {
            chunks: chunk_rx,
            result: result_rx,
            cancel,
        })
    }
}

/// Drive one child process to a terminal result.
async fn supervise(
    mut child: Child,
    request: &ExecutionRequest,
    decoder: OutputDecoder,
    chunk_tx: mpsc::UnboundedSender<OutputChunk>,
    cancel: CancelHandle,
) -> ExecutionResult {
    let stdout_task = child
        .stdout
        .take()
        .map(|stream| read_stream(stream, false, decoder.clone(), chunk_tx.clone()));
    let stderr_task = child
        .stderr
        .take()
        .map(|stream| read_stream(stream, true, decoder.clone(), chunk_tx.clone()));
    drop(chunk_tx);

    let mut timed_out = false;
    let mut cancelled = false;
    let mut wait_error: Option<std::io::Error> = None;
    let mut status = None;

    tokio::select! {
        waited = child.wait() => match waited {
            Ok(s) => status = Some(s),
            Err(e) => wait_error = Some(e),
        },
        _ = tokio::time::sleep(request.timeout) => {
            timed_out = true;
        }
        _ = cancel.cancelled() => {
            cancelled = true;
        }
    }

    let forced = status.is_none();
    if forced {
        // Timeout, cancellation, and wait failure all converge on the same
        // termination primitive. The kill must cover the whole process
        // group: the interpreter's descendants inherit the pipe write ends
        // and would otherwise keep the readers alive past the deadline.
        kill_process_group(&child);
        if let Err(e) = child.start_kill() {
            debug!("Kill after abort failed (process already dead?): {}", e);
        }
        match child.wait().await {
            Ok(s) => {
                if wait_error.is_none() {
                    status = Some(s);
                }
            }
            Err(e) => {
                if wait_error.is_none() {
                    wait_error = Some(e);
                }
            }
        }
    }

    // Reap the reader tasks so every chunk emission has been attempted
    // before the result goes out. After a kill the join is bounded: a
    // straggler that survived the group kill must not delay the result.
    let grace = forced.then_some(READER_GRACE);
    let stdout_text = join_reader(stdout_task, grace).await;
    let stderr_text = join_reader(stderr_task, grace).await;

    if timed_out {
        let seconds = request.timeout.as_secs();
        warn!(command = %request.display_name, "Execution timed out after {}s", seconds);
        return ExecutionResult {
            stdout: String::new(),
            stderr: format!("Timed out after {seconds} seconds"),
            return_code: FAILURE_SENTINEL,
            timed_out: true,
        };
    }

    if let Some(e) = wait_error {
        warn!(command = %request.display_name, "Wait failed: {}", e);
        return ExecutionResult {
            stdout: String::new(),
            stderr: format!("Unexpected error while waiting for the process: {e}"),
            return_code: FAILURE_SENTINEL,
            timed_out: false,
        };
    }

    let return_code = status
        .and_then(|s| s.code())
        .unwrap_or(FAILURE_SENTINEL);

    let mut stderr = stderr_text.trim().to_string();
    if cancelled && return_code != 0 {
        stderr = if stderr.is_empty() {
            CANCEL_MARKER.to_string()
        } else {
            format!("{CANCEL_MARKER}\n{stderr}")
        };
    }

    debug!(
        command = %request.display_name,
        return_code,
        "Execution finished"
    );

    ExecutionResult {
        stdout: stdout_text.trim().to_string(),
        stderr,
        return_code,
        timed_out: false,
    }
}

/// Read one pipe line by line until end-of-data, emitting each decoded line
/// as a chunk and accumulating the full text for the final result.
fn read_stream<R>(
    stream: R,
    is_error_stream: bool,
    decoder: OutputDecoder,
    chunk_tx: mpsc::UnboundedSender<OutputChunk>,
) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut collected = String::new();
        let mut line = Vec::new();

        loop {
            line.clear();
            match reader.read_until(b'\n', &mut line).await {
                Ok(0) => break,
                Ok(_) => {
                    let text = decoder.decode(Some(&line));
                    collected.push_str(&text);
                    // A closed receiver means the listener stopped caring
                    // about the stream; keep accumulating for the result.
                    let _ = chunk_tx.send(OutputChunk {
                        text,
                        is_error_stream,
                    });
                }
                Err(e) => {
                    debug!("Stream read ended with error: {}", e);
                    break;
                }
            }
        }

        collected
    })
}

/// Kill every process in the child's group. The launcher started the
/// interpreter with its own group id equal to its pid.
#[cfg(unix)]
fn kill_process_group(child: &Child) {
    if let Some(pid) = child.id() {
        unsafe {
            libc::kill(-(pid as libc::pid_t), libc::SIGKILL);
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_child: &Child) {}

async fn join_reader(task: Option<JoinHandle<String>>, grace: Option<Duration>) -> String {
    let Some(mut handle) = task else {
        return String::new();
    };
    match grace {
        Some(grace) => match tokio::time::timeout(grace, &mut handle).await {
            Ok(joined) => joined.unwrap_or_default(),
            Err(_) => {
                handle.abort();
                String::new()
            }
        },
        None => handle.await.unwrap_or_default(),
    }
}
