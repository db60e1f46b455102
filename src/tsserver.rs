//! The tsserver subprocess transport.
//!
//! Owns the child process and the duplex line-framed JSON channel to it:
//! - spawns tsserver (through `node` for a `.js` entry point, directly for a
//!   native executable),
//! - assigns every outbound message a strictly increasing `seq`,
//! - correlates responses (and `requestCompleted` events) back to pending
//!   requests through a table of one-shot channels,
//! - forwards every other event to the dispatcher,
//! - signals cancellation by touching `<cancellationPipeName><seq>` on disk.
//!
//! There is no request queue and no timeout here: the child serializes its
//! own work, and callers decide how long they are willing to wait.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command as ProcessCommand};
use tokio::sync::{mpsc, oneshot, Notify};

use crate::protocol::{
    Command, Event, Message, OutgoingRequest, RequestCompletedEventBody, Response,
    EVENT_REQUEST_COMPLETED,
};

/// How to launch the child process.
#[derive(Debug, Clone)]
pub struct TsServerOptions {
    pub path: PathBuf,
    pub log_file: Option<PathBuf>,
    pub log_verbosity: Option<String>,
    pub global_plugins: Vec<String>,
    pub plugin_probe_locations: Vec<String>,
    /// Prefix for cancellation marker files. The child is told to watch
    /// `<prefix>*`; request `seq` is cancelled by creating `<prefix><seq>`.
    pub cancellation_pipe_name: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum TsServerError {
    #[error("tsserver request `{command}` failed: {message}")]
    Request { command: String, message: String },
    #[error("tsserver process has exited")]
    ServerExited,
    #[error("failed to spawn tsserver at {path}: {source}")]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl TsServerError {
    /// tsserver answers completion requests in empty contexts with a failed
    /// response carrying this message; callers treat it as "no result".
    pub fn is_no_content(&self) -> bool {
        matches!(self, TsServerError::Request { message, .. }
            if message.starts_with("No content available"))
    }
}

/// Best-effort cancellation signal shared between a request waiter and the
/// code that decides to abandon it.
#[derive(Clone, Default)]
pub struct CancellationToken {
    inner: Arc<CancelState>,
}

#[derive(Default)]
struct CancelState {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    pub async fn cancelled(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register for the wakeup before re-checking the flag, so a
            // cancel between the check and the await cannot be lost.
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    pub(crate) fn same_as(&self, other: &CancellationToken) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Outstanding requests, keyed by `seq`. Resolved by the reader task,
/// failed wholesale when the child goes away.
struct PendingRequests {
    slots: Mutex<HashMap<i64, oneshot::Sender<Result<Option<Value>, TsServerError>>>>,
}

impl PendingRequests {
    fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn insert(&self, seq: i64, tx: oneshot::Sender<Result<Option<Value>, TsServerError>>) {
        self.slots.lock().unwrap().insert(seq, tx);
    }

    fn forget(&self, seq: i64) {
        self.slots.lock().unwrap().remove(&seq);
    }

    fn resolve(&self, response: Response) {
        let Some(tx) = self.slots.lock().unwrap().remove(&response.request_seq) else {
            tracing::warn!(
                request_seq = response.request_seq,
                command = %response.command,
                "response with no pending request"
            );
            return;
        };
        let result = if response.success {
            Ok(response.body)
        } else {
            Err(TsServerError::Request {
                command: response.command,
                message: response.message.unwrap_or_default(),
            })
        };
        let _ = tx.send(result);
    }

    /// `requestCompleted` closes out commands that never get a response of
    /// their own (`geterr` most importantly).
    fn complete(&self, seq: i64) {
        if let Some(tx) = self.slots.lock().unwrap().remove(&seq) {
            let _ = tx.send(Ok(None));
        }
    }

    fn fail_all(&self) {
        for (_, tx) in self.slots.lock().unwrap().drain() {
            let _ = tx.send(Err(TsServerError::ServerExited));
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.slots.lock().unwrap().len()
    }
}

struct Inner {
    writer: tokio::sync::Mutex<ChildStdin>,
    seq: AtomicI64,
    pending: PendingRequests,
    cancellation_pipe: Option<PathBuf>,
    alive: AtomicBool,
}

impl Inner {
    fn mark_dead(&self) {
        if self.alive.swap(false, Ordering::AcqRel) {
            tracing::error!("tsserver process has exited");
        }
        self.pending.fail_all();
    }
}

/// Cloneable handle to the running tsserver process.
#[derive(Clone)]
pub struct TsServer {
    inner: Arc<Inner>,
}

impl TsServer {
    /// Spawn the child and start its reader tasks. Events that are not part
    /// of request correlation are delivered through `event_tx`.
    pub fn spawn(
        options: &TsServerOptions,
        event_tx: mpsc::UnboundedSender<Event>,
    ) -> Result<TsServer, TsServerError> {
        let mut command = if options.path.extension().is_some_and(|ext| ext == "js") {
            let mut command = ProcessCommand::new("node");
            command.arg(&options.path);
            command
        } else {
            ProcessCommand::new(&options.path)
        };

        if let Some(log_file) = &options.log_file {
            command.arg("--logFile").arg(log_file);
        }
        if let Some(verbosity) = &options.log_verbosity {
            command.arg("--logVerbosity").arg(verbosity);
        }
        if !options.global_plugins.is_empty() {
            command
                .arg("--globalPlugins")
                .arg(options.global_plugins.join(","));
        }
        if !options.plugin_probe_locations.is_empty() {
            command
                .arg("--pluginProbeLocations")
                .arg(options.plugin_probe_locations.join(","));
        }
        if let Some(prefix) = &options.cancellation_pipe_name {
            command
                .arg("--cancellationPipeName")
                .arg(format!("{}*", prefix.display()));
        }

        command
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        tracing::info!(path = %options.path.display(), "spawning tsserver");
        let mut child = command.spawn().map_err(|source| TsServerError::Spawn {
            path: options.path.clone(),
            source,
        })?;

        let stdin = child.stdin.take().ok_or_else(|| {
            TsServerError::Io(std::io::Error::other("tsserver stdin not piped"))
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            TsServerError::Io(std::io::Error::other("tsserver stdout not piped"))
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            TsServerError::Io(std::io::Error::other("tsserver stderr not piped"))
        })?;

        let inner = Arc::new(Inner {
            writer: tokio::sync::Mutex::new(stdin),
            seq: AtomicI64::new(1),
            pending: PendingRequests::new(),
            cancellation_pipe: options.cancellation_pipe_name.clone(),
            alive: AtomicBool::new(true),
        });

        Self::spawn_reader(Arc::clone(&inner), stdout, event_tx);
        Self::spawn_stderr_reader(stderr);
        Self::spawn_reaper(Arc::clone(&inner), child);

        Ok(TsServer { inner })
    }

    pub fn is_alive(&self) -> bool {
        self.inner.alive.load(Ordering::Acquire)
    }

    /// Fire-and-forget message (`open`, `close`, `change`). Still consumes a
    /// sequence number so outbound numbering stays strictly increasing.
    pub async fn notify<A: Serialize>(
        &self,
        command: Command,
        arguments: A,
    ) -> Result<(), TsServerError> {
        if !self.is_alive() {
            return Err(TsServerError::ServerExited);
        }
        let seq = self.next_seq();
        self.write_request(seq, command, arguments).await
    }

    /// Send a request and wait for its correlated reply.
    pub async fn request<A: Serialize>(
        &self,
        command: Command,
        arguments: A,
    ) -> Result<Option<Value>, TsServerError> {
        self.request_impl(command, arguments, None).await
    }

    /// Like [`request`], but abandoned when `token` fires: an empty marker
    /// file `<pipe><seq>` is created for the child to notice, and the call
    /// keeps waiting for whichever reply still arrives. The marker is
    /// removed once the request settles.
    ///
    /// [`request`]: TsServer::request
    pub async fn request_cancellable<A: Serialize>(
        &self,
        command: Command,
        arguments: A,
        token: &CancellationToken,
    ) -> Result<Option<Value>, TsServerError> {
        self.request_impl(command, arguments, Some(token)).await
    }

    async fn request_impl<A: Serialize>(
        &self,
        command: Command,
        arguments: A,
        token: Option<&CancellationToken>,
    ) -> Result<Option<Value>, TsServerError> {
        if !self.is_alive() {
            return Err(TsServerError::ServerExited);
        }
        let seq = self.next_seq();
        let (tx, mut rx) = oneshot::channel();
        self.inner.pending.insert(seq, tx);

        if let Err(err) = self.write_request(seq, command, arguments).await {
            self.inner.pending.forget(seq);
            return Err(err);
        }

        let settled = match token {
            None => rx.await,
            Some(token) => {
                tokio::select! {
                    settled = &mut rx => settled,
                    _ = token.cancelled() => {
                        self.touch_cancellation_file(seq).await;
                        let settled = rx.await;
                        self.remove_cancellation_file(seq).await;
                        settled
                    }
                }
            }
        };

        settled.map_err(|_| TsServerError::ServerExited)?
    }

    /// Close the child's stdin; it exits once it notices EOF.
    pub async fn shutdown(&self) {
        let mut writer = self.inner.writer.lock().await;
        let _ = writer.shutdown().await;
    }

    fn next_seq(&self) -> i64 {
        self.inner.seq.fetch_add(1, Ordering::SeqCst)
    }

    async fn write_request<A: Serialize>(
        &self,
        seq: i64,
        command: Command,
        arguments: A,
    ) -> Result<(), TsServerError> {
        let request = OutgoingRequest {
            seq,
            msg_type: "request",
            command: command.as_str(),
            arguments: Some(serde_json::to_value(arguments)?),
        };
        let mut line = serde_json::to_string(&request)?;
        line.push('\n');
        tracing::trace!(seq, command = %command, "-> tsserver");

        let mut writer = self.inner.writer.lock().await;
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn touch_cancellation_file(&self, seq: i64) {
        if let Some(path) = self.cancellation_file(seq) {
            if let Err(err) = tokio::fs::File::create(&path).await {
                tracing::debug!(seq, error = %err, "could not create cancellation file");
            }
        }
    }

    async fn remove_cancellation_file(&self, seq: i64) {
        if let Some(path) = self.cancellation_file(seq) {
            let _ = tokio::fs::remove_file(&path).await;
        }
    }

    fn cancellation_file(&self, seq: i64) -> Option<PathBuf> {
        let prefix = self.inner.cancellation_pipe.as_ref()?;
        Some(PathBuf::from(format!("{}{}", prefix.display(), seq)))
    }

    fn spawn_reader(
        inner: Arc<Inner>,
        stdout: ChildStdout,
        event_tx: mpsc::UnboundedSender<Event>,
    ) {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => dispatch_line(&inner, &event_tx, &line),
                    Ok(None) => break,
                    Err(err) => {
                        tracing::error!(error = %err, "error reading tsserver stdout");
                        break;
                    }
                }
            }
            inner.mark_dead();
        });
    }

    fn spawn_stderr_reader(stderr: ChildStderr) {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::error!(target: "tsserver", "{line}");
            }
        });
    }

    fn spawn_reaper(inner: Arc<Inner>, mut child: Child) {
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => tracing::info!(%status, "tsserver exited"),
                Err(err) => tracing::error!(error = %err, "failed to wait for tsserver"),
            }
            inner.mark_dead();
        });
    }
}

/// Route one stdout line. Newer tsservers emit `Content-Length` header
/// frames; those and blank separators are skipped until a JSON object line
/// arrives.
fn dispatch_line(inner: &Inner, event_tx: &mpsc::UnboundedSender<Event>, line: &str) {
    let line = line.trim();
    if line.is_empty() || line.starts_with("Content-Length:") {
        return;
    }
    match serde_json::from_str::<Message>(line) {
        Ok(Message::Response(response)) => inner.pending.resolve(response),
        Ok(Message::Event(event)) => {
            if event.event == EVENT_REQUEST_COMPLETED {
                match event
                    .body
                    .map(serde_json::from_value::<RequestCompletedEventBody>)
                {
                    Some(Ok(body)) => inner.pending.complete(body.request_seq),
                    _ => tracing::warn!("requestCompleted event without a request_seq"),
                }
            } else {
                let _ = event_tx.send(event);
            }
        }
        Err(err) => {
            tracing::warn!(error = %err, line, "dropping malformed tsserver line");
        }
    }
}

/// Locate a tsserver entry point, preferring the workspace-local install.
/// The error message lists everything that was probed, in order.
pub fn find_tsserver(
    explicit: Option<&Path>,
    workspace_root: Option<&Path>,
) -> Result<PathBuf, String> {
    let mut probed = Vec::new();

    if let Some(path) = explicit {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        probed.push(path.to_path_buf());
    }
    if let Some(root) = workspace_root {
        let local = root.join("node_modules/typescript/lib/tsserver.js");
        if local.exists() {
            return Ok(local);
        }
        probed.push(local);
    }
    if let Ok(path_var) = std::env::var("PATH") {
        for dir in std::env::split_paths(&path_var) {
            let candidate = dir.join("tsserver");
            if candidate.exists() {
                return Ok(candidate);
            }
        }
    }
    probed.push(PathBuf::from("tsserver (on PATH)"));

    Err(format!(
        "could not find a tsserver executable; searched: {}",
        probed
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(request_seq: i64, success: bool) -> Response {
        Response {
            request_seq,
            command: "quickinfo".to_string(),
            success,
            message: if success {
                None
            } else {
                Some("No content available.".to_string())
            },
            body: success.then(|| serde_json::json!({"ok": true})),
        }
    }

    #[tokio::test]
    async fn responses_resolve_their_pending_slot() {
        let pending = PendingRequests::new();
        let (tx, rx) = oneshot::channel();
        pending.insert(4, tx);

        pending.resolve(response(4, true));
        let body = rx.await.unwrap().unwrap();
        assert_eq!(body, Some(serde_json::json!({"ok": true})));
        assert_eq!(pending.len(), 0);
    }

    #[tokio::test]
    async fn failed_responses_surface_the_message() {
        let pending = PendingRequests::new();
        let (tx, rx) = oneshot::channel();
        pending.insert(9, tx);

        pending.resolve(response(9, false));
        let err = rx.await.unwrap().unwrap_err();
        assert!(err.is_no_content());
    }

    #[tokio::test]
    async fn request_completed_resolves_without_a_body() {
        let pending = PendingRequests::new();
        let (tx, rx) = oneshot::channel();
        pending.insert(12, tx);

        pending.complete(12);
        assert_eq!(rx.await.unwrap().unwrap(), None);
    }

    #[tokio::test]
    async fn losing_the_child_fails_every_pending_request() {
        let pending = PendingRequests::new();
        let (tx1, rx1) = oneshot::channel();
        let (tx2, rx2) = oneshot::channel();
        pending.insert(1, tx1);
        pending.insert(2, tx2);

        pending.fail_all();
        assert!(matches!(
            rx1.await.unwrap(),
            Err(TsServerError::ServerExited)
        ));
        assert!(matches!(
            rx2.await.unwrap(),
            Err(TsServerError::ServerExited)
        ));
    }

    #[test]
    fn stray_responses_are_dropped() {
        let pending = PendingRequests::new();
        // No slot for seq 7; must not panic.
        pending.resolve(response(7, true));
    }

    #[tokio::test]
    async fn cancellation_token_wakes_existing_waiters() {
        let token = CancellationToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move { waiter.cancelled().await });
        tokio::task::yield_now().await;
        token.cancel();
        handle.await.unwrap();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn cancellation_token_is_immediate_once_cancelled() {
        let token = CancellationToken::new();
        token.cancel();
        token.cancelled().await;
    }

    #[test]
    fn missing_tsserver_lists_probed_locations() {
        let err = find_tsserver(
            Some(Path::new("/definitely/not/here.js")),
            Some(Path::new("/also/missing")),
        )
        .unwrap_err();
        assert!(err.contains("/definitely/not/here.js"));
        assert!(err.contains("/also/missing/node_modules/typescript/lib/tsserver.js"));
    }
}
