//! Stdio process transport.
//!
//! A [`ProcessSession`] owns one child process and speaks newline-delimited
//! JSON-RPC over its stdin/stdout:
//!
//! - writes are serialized behind a mutex so request lines never interleave;
//! - a single reader task drains stdout and resolves the waiter registered
//!   for each response id, so any number of calls may be in flight at once;
//! - stderr is drained into a bounded tail buffer kept for diagnostics.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use th_domain::config::TransportConfig;

use crate::detect::Invocation;
use crate::protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, RequestId};

/// Upper bound on retained stderr output per session.
const MAX_STDERR_CHARS: usize = 16 * 1024;

/// How long a failed startup waits for the stderr pipe to drain.
const STDERR_FLUSH_WAIT: Duration = Duration::from_millis(500);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Errors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Errors that can occur during transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[error("`{command}` exited during startup (exit code {exit_code:?}): {stderr}")]
    SpawnFailure {
        command: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("timeout after {after:?} waiting for `{method}`")]
    Timeout { method: String, after: Duration },

    #[error("transport closed")]
    Closed,

    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("remote error: {0}")]
    Remote(JsonRpcError),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Options & state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How to start and stop a child.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub command: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub env: HashMap<String, String>,
    /// Fallback interpreter for targets that aren't directly runnable.
    pub interpreter: String,
    pub startup_grace: Duration,
    pub shutdown_grace: Duration,
}

impl ConnectOptions {
    pub fn new(command: impl Into<String>) -> Self {
        Self::from_config(command, &TransportConfig::default())
    }

    pub fn from_config(command: impl Into<String>, config: &TransportConfig) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            working_dir: None,
            env: HashMap::new(),
            interpreter: config.interpreter.clone(),
            startup_grace: config.startup_grace(),
            shutdown_grace: config.shutdown_grace(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn startup_grace(mut self, grace: Duration) -> Self {
        self.startup_grace = grace;
        self
    }

    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }
}

/// Liveness of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Starting,
    Running,
    Draining,
    Terminated,
}

type Waiter = oneshot::Sender<Result<Value, TransportError>>;

/// State shared with the reader task. One lock covers both fields so a
/// waiter can never be registered after the pending map was drained.
struct Inner {
    state: SessionState,
    pending: HashMap<String, Waiter>,
}

type Shared = Arc<Mutex<Inner>>;

/// Fail every pending waiter and move to `state`.
fn drain_pending(shared: &Shared, state: SessionState) {
    let pending = {
        let mut inner = shared.lock();
        inner.state = state;
        std::mem::take(&mut inner.pending)
    };
    if !pending.is_empty() {
        tracing::debug!(count = pending.len(), "failing pending calls: transport closed");
    }
    for (_, waiter) in pending {
        let _ = waiter.send(Err(TransportError::Closed));
    }
}

/// Removes a call's waiter when the call finishes or is cancelled.
struct PendingGuard<'a> {
    shared: &'a Shared,
    key: String,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.shared.lock().pending.remove(&self.key);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stderr tail
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Bounded buffer keeping the most recent child stderr output.
struct StderrTail {
    text: String,
    max_chars: usize,
}

impl StderrTail {
    fn new(max_chars: usize) -> Self {
        Self {
            text: String::new(),
            max_chars,
        }
    }

    fn push(&mut self, chunk: &str) {
        self.text.push_str(chunk);
        if self.text.len() > self.max_chars {
            let keep = self.max_chars * 3 / 4;
            let mut boundary = self.text.len() - keep;
            // Find a char boundary to avoid splitting a multi-byte character.
            while boundary < self.text.len() && !self.text.is_char_boundary(boundary) {
                boundary += 1;
            }
            self.text.drain(..boundary);
        }
    }
}

async fn drain_stderr<R: AsyncRead + Unpin>(stderr: R, tail: Arc<Mutex<StderrTail>>) {
    let mut reader = BufReader::new(stderr);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                tracing::debug!(line = %line.trim_end(), "child stderr");
                tail.lock().push(&line);
            }
            Err(e) => {
                tracing::debug!(error = %e, "stderr pipe closed");
                break;
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Reader
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Drain stdout until EOF, resolving waiters by id.
///
/// Framing is purely newline-based and independent of payload validity:
/// a malformed line is logged and skipped, never fatal.
async fn read_loop<R: AsyncBufRead + Unpin>(mut reader: R, shared: Shared) {
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => dispatch_line(&buf, &shared),
            Err(e) => {
                tracing::warn!(error = %e, "error reading child stdout");
                break;
            }
        }
    }
    tracing::debug!("child stdout closed");
    drain_pending(&shared, SessionState::Terminated);
}

fn dispatch_line(line: &[u8], shared: &Shared) {
    let line = line.trim_ascii();
    if line.is_empty() {
        return;
    }

    let message: Value = match serde_json::from_slice(line) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(
                error = %e,
                line = %String::from_utf8_lossy(line),
                "malformed frame from child, skipping"
            );
            return;
        }
    };

    let Some(key) = RequestId::key_of(&message) else {
        tracing::debug!("discarding message without id");
        return;
    };

    let waiter = shared.lock().pending.remove(&key);
    match waiter {
        Some(waiter) => {
            let _ = waiter.send(Ok(message));
        }
        None => tracing::debug!(id = %key, "no pending call for response id, discarding"),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One spawned child process and the JSON-RPC conversation with it.
pub struct ProcessSession {
    invocation: Invocation,
    working_dir: Option<PathBuf>,
    shared: Shared,
    stdin: tokio::sync::Mutex<Option<ChildStdin>>,
    child: tokio::sync::Mutex<Child>,
    pid: Option<u32>,
    next_id: AtomicU64,
    stderr: Arc<Mutex<StderrTail>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    shutdown_grace: Duration,
}

impl ProcessSession {
    /// Spawn the target and confirm it survives the startup grace period.
    pub async fn connect(opts: ConnectOptions) -> Result<Self, TransportError> {
        let invocation = Invocation::resolve(&opts.command, &opts.args, &opts.interpreter);
        let command_line = invocation.command_line();
        tracing::info!(
            command = %command_line,
            classification = ?invocation.classification,
            "spawning tool server"
        );

        let mut cmd = tokio::process::Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &opts.working_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &opts.env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|source| TransportError::Spawn {
            command: command_line.clone(),
            source,
        })?;

        let stdin = child.stdin.take().ok_or_else(|| broken_pipe("failed to capture child stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| broken_pipe("failed to capture child stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| broken_pipe("failed to capture child stderr"))?;

        let tail = Arc::new(Mutex::new(StderrTail::new(MAX_STDERR_CHARS)));
        let stderr_task = tokio::spawn(drain_stderr(stderr, tail.clone()));

        let shared: Shared = Arc::new(Mutex::new(Inner {
            state: SessionState::Starting,
            pending: HashMap::new(),
        }));

        tokio::time::sleep(opts.startup_grace).await;

        if let Some(status) = child.try_wait()? {
            let _ = tokio::time::timeout(STDERR_FLUSH_WAIT, stderr_task).await;
            let stderr = tail.lock().text.trim().to_owned();
            tracing::warn!(
                command = %command_line,
                exit_code = ?status.code(),
                "tool server exited during startup"
            );
            return Err(TransportError::SpawnFailure {
                command: command_line,
                exit_code: status.code(),
                stderr,
            });
        }

        shared.lock().state = SessionState::Running;
        let reader = tokio::spawn(read_loop(BufReader::new(stdout), shared.clone()));
        let pid = child.id();

        tracing::info!(command = %command_line, pid = ?pid, "tool server running");

        Ok(Self {
            invocation,
            working_dir: opts.working_dir,
            shared,
            stdin: tokio::sync::Mutex::new(Some(stdin)),
            child: tokio::sync::Mutex::new(child),
            pid,
            next_id: AtomicU64::new(1),
            stderr: tail,
            reader: Mutex::new(Some(reader)),
            shutdown_grace: opts.shutdown_grace,
        })
    }

    /// Send a request and wait up to `timeout` for its response.
    ///
    /// A timeout fails only this call; the session stays usable.
    pub async fn call(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, TransportError> {
        let id = RequestId::Text(self.next_id.fetch_add(1, Ordering::Relaxed).to_string());
        let (tx, rx) = oneshot::channel();
        {
            let mut inner = self.shared.lock();
            if inner.state != SessionState::Running {
                return Err(TransportError::Closed);
            }
            inner.pending.insert(id.key(), tx);
        }
        let _guard = PendingGuard {
            shared: &self.shared,
            key: id.key(),
        };

        tracing::debug!(id = %id, method, "sending request");
        let request = JsonRpcRequest::new(id, method, params);
        let line = serde_json::to_string(&request)?;

        // The timeout covers the write as well: a child that stops reading
        // stdin must not hold the caller past its deadline.
        let exchange = async {
            self.write_line(&line).await?;
            match rx.await {
                Ok(outcome) => into_result(outcome?),
                // The reader dropped our waiter without answering.
                Err(_) => Err(TransportError::Closed),
            }
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(method, ?timeout, "call timed out");
                Err(TransportError::Timeout {
                    method: method.to_owned(),
                    after: timeout,
                })
            }
        }
    }

    /// Write one request line.
    ///
    /// The pipe is taken out of its slot for the duration of the write and
    /// only put back once the whole line is out. If the write is cancelled
    /// part-way the pipe is dropped with it, so a half-written line can never
    /// be followed by another request; later calls fail with `Closed`.
    async fn write_line(&self, json: &str) -> Result<(), TransportError> {
        let mut guard = self.stdin.lock().await;
        let mut stdin = guard.take().ok_or(TransportError::Closed)?;

        let mut line = String::with_capacity(json.len() + 1);
        line.push_str(json);
        line.push('\n');

        let written = async {
            stdin.write_all(line.as_bytes()).await?;
            stdin.flush().await
        }
        .await;
        if written.is_ok() {
            *guard = Some(stdin);
        }

        written.map_err(|e| match e.kind() {
            std::io::ErrorKind::BrokenPipe => TransportError::Closed,
            _ => TransportError::Io(e),
        })
    }

    /// Stop the child: interrupt, wait the grace period, then kill.
    ///
    /// Pending calls fail with [`TransportError::Closed`]. The child is
    /// always reaped. Calling `close` again is harmless.
    pub async fn close(&self) {
        let next = match self.state() {
            SessionState::Terminated => SessionState::Terminated,
            _ => SessionState::Draining,
        };
        drain_pending(&self.shared, next);

        // Closing stdin alone is enough for well-behaved servers. A writer
        // blocked on a full pipe keeps the lock; the signals below break
        // the pipe under it instead.
        match self.stdin.try_lock() {
            Ok(mut stdin) => drop(stdin.take()),
            Err(_) => tracing::debug!("stdin busy with a blocked write, not waiting for it"),
        }

        let mut child = self.child.lock().await;
        match child.try_wait() {
            Ok(Some(status)) => tracing::debug!(?status, "tool server already exited"),
            _ => {
                interrupt(&mut child);
                match tokio::time::timeout(self.shutdown_grace, child.wait()).await {
                    Ok(Ok(status)) => tracing::debug!(?status, "tool server exited"),
                    Ok(Err(e)) => tracing::warn!(error = %e, "error waiting for tool server"),
                    Err(_) => {
                        tracing::warn!("tool server did not exit within grace period, killing");
                        if let Err(e) = child.kill().await {
                            tracing::warn!(error = %e, "failed to kill tool server");
                        }
                    }
                }
            }
        }
        drop(child);

        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
        self.shared.lock().state = SessionState::Terminated;
        tracing::info!(command = %self.invocation.command_line(), "session closed");
    }

    pub fn state(&self) -> SessionState {
        self.shared.lock().state
    }

    pub fn is_alive(&self) -> bool {
        self.state() == SessionState::Running
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn command_line(&self) -> String {
        self.invocation.command_line()
    }

    pub fn invocation(&self) -> &Invocation {
        &self.invocation
    }

    pub fn working_dir(&self) -> Option<&PathBuf> {
        self.working_dir.as_ref()
    }

    /// Most recent stderr output of the child.
    pub fn stderr_tail(&self) -> String {
        self.stderr.lock().text.clone()
    }

    /// Number of calls currently awaiting a response.
    pub fn pending_calls(&self) -> usize {
        self.shared.lock().pending.len()
    }

    /// Whether the child process has exited (and been reaped).
    pub async fn has_exited(&self) -> bool {
        let mut child = self.child.lock().await;
        !matches!(child.try_wait(), Ok(None))
    }
}

impl Drop for ProcessSession {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.get_mut().take() {
            reader.abort();
        }
    }
}

fn broken_pipe(msg: &str) -> TransportError {
    TransportError::Io(std::io::Error::new(std::io::ErrorKind::BrokenPipe, msg.to_owned()))
}

fn into_result(message: Value) -> Result<Value, TransportError> {
    let response: JsonRpcResponse = serde_json::from_value(message)
        .map_err(|e| TransportError::InvalidResponse(e.to_string()))?;
    response.into_result().map_err(TransportError::Remote)
}

#[cfg(unix)]
fn interrupt(child: &mut Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return;
    };
    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    if let Err(e) = kill(Pid::from_raw(raw), Signal::SIGINT) {
        tracing::debug!(error = %e, "failed to interrupt tool server");
    }
}

#[cfg(not(unix))]
fn interrupt(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        tracing::debug!(error = %e, "failed to terminate tool server");
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn shared() -> Shared {
        Arc::new(Mutex::new(Inner {
            state: SessionState::Running,
            pending: HashMap::new(),
        }))
    }

    fn register(shared: &Shared, key: &str) -> oneshot::Receiver<Result<Value, TransportError>> {
        let (tx, rx) = oneshot::channel();
        shared.lock().pending.insert(key.to_owned(), tx);
        rx
    }

    #[tokio::test]
    async fn reader_skips_malformed_line_and_resolves_next() {
        let shared = shared();
        let rx = register(&shared, "42");
        let input: &[u8] = b"this is {not json\n{\"id\":\"42\",\"result\":\"ok\"}\n";

        read_loop(BufReader::new(input), shared.clone()).await;

        let message = rx.await.unwrap().unwrap();
        assert_eq!(message["result"], "ok");
    }

    #[tokio::test]
    async fn reader_resolves_out_of_order_and_numeric_ids() {
        let shared = shared();
        let rx1 = register(&shared, "1");
        let rx2 = register(&shared, "2");
        let input: &[u8] = b"{\"id\":2,\"result\":\"two\"}\n\n{\"id\":\"1\",\"result\":\"one\"}\n";

        read_loop(BufReader::new(input), shared.clone()).await;

        assert_eq!(rx1.await.unwrap().unwrap()["result"], "one");
        assert_eq!(rx2.await.unwrap().unwrap()["result"], "two");
    }

    #[tokio::test]
    async fn eof_fails_remaining_waiters_with_closed() {
        let shared = shared();
        let rx = register(&shared, "9");
        let input: &[u8] = b"{\"id\":\"unknown\",\"result\":1}\n{\"method\":\"notify\"}\n";

        read_loop(BufReader::new(input), shared.clone()).await;

        assert!(matches!(rx.await.unwrap(), Err(TransportError::Closed)));
        assert_eq!(shared.lock().state, SessionState::Terminated);
    }

    #[tokio::test]
    async fn invalid_utf8_line_does_not_break_framing() {
        let shared = shared();
        let rx = register(&shared, "5");
        let mut input = vec![0xff, 0xfe, b'\n'];
        input.extend_from_slice(b"{\"id\":\"5\",\"result\":true}\n");

        read_loop(BufReader::new(input.as_slice()), shared.clone()).await;

        assert_eq!(rx.await.unwrap().unwrap()["result"], true);
    }

    #[test]
    fn remote_error_maps_to_remote_variant() {
        let message = serde_json::json!({
            "id": "3",
            "error": { "code": -32000, "message": "boom" }
        });
        match into_result(message) {
            Err(TransportError::Remote(err)) => assert_eq!(err.message, "boom"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn stderr_tail_is_bounded() {
        let mut tail = StderrTail::new(100);
        for _ in 0..50 {
            tail.push("0123456789");
        }
        assert!(tail.text.len() <= 100);
        assert!(tail.text.ends_with("0123456789"));
    }
}
