//! Persistent shell sessions with idle eviction
//!
//! One interactive shell per container, reused across invocations to avoid
//! per-command process startup. Invariants:
//!
//! - at most one live session per container (creation is serialized through
//!   the map lock)
//! - commands against one session never overlap (per-session handle mutex)
//! - the idle sweep never tears down a session whose handle is held by an
//!   in-flight command (`try_lock` discipline), and idleness is measured
//!   from the last *completed* command
//!
//! The command protocol is marker-based: the command is written to the shell
//! followed by an exit-code echo and a unique end marker, and output is
//! consumed until the marker appears. A command that times out leaves the
//! stream desynchronized, so the session is torn down rather than reused.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::error::{EngineError, Result};
use crate::execution::{ExecutionRequest, ExecutionResult, ExitDisposition};

const EXIT_CODE_PREFIX: &str = "__EXRUN_EXIT__";
const END_MARKER_PREFIX: &str = "__EXRUN_DONE_";

/// How long a single stdout read may block before re-checking the deadline
const READ_SLICE: Duration = Duration::from_secs(1);

/// Per-session usage counters
#[derive(Debug, Default, Clone, Serialize)]
pub struct SessionMetrics {
    pub commands_executed: u64,
    pub total_execution_ms: u64,
}

/// Snapshot of one session for status reporting
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub container: String,
    pub uptime_secs: u64,
    pub idle_secs: u64,
    pub metrics: SessionMetrics,
}

struct ShellHandle {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

/// One persistent shell bound to a container.
///
/// The underlying handle never leaves this module; all access goes through
/// `exec`, which serializes on the handle mutex.
pub struct Session {
    id: u64,
    container: String,
    created_at: Instant,
    handle: Mutex<ShellHandle>,
    closed: AtomicBool,
    /// Updated when a command completes; readable without the handle lock so
    /// the sweep can measure idleness while other sessions run.
    last_used: std::sync::Mutex<Instant>,
    metrics: std::sync::Mutex<SessionMetrics>,
    marker_seq: AtomicU64,
}

impl Session {
    /// Spawn the interactive shell and drain its greeting output.
    #[instrument(skip(exegol_path))]
    async fn start(id: u64, container: &str, exegol_path: &str) -> Result<Self> {
        info!(container, "starting persistent session");

        // stderr is discarded: an unread pipe would eventually block the
        // shell, and the interactive stream interleaves prompts with it
        // anyway. One-shot execution captures stderr; sessions trade that
        // for reuse.
        let mut child = Command::new(exegol_path)
            .arg("exec")
            .arg("-v")
            .arg(container)
            .arg("/bin/bash")
            .arg("-i")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    EngineError::ExegolNotFound {
                        path: exegol_path.to_string(),
                    }
                } else {
                    EngineError::Io(e)
                }
            })?;

        let stdin = child.stdin.take().expect("stdin is piped");
        let stdout = child.stdout.take().expect("stdout is piped");
        let mut stdout = BufReader::new(stdout);

        // Discard whatever the shell prints on startup (prompts, banners)
        let mut scratch = [0u8; 4096];
        loop {
            match tokio::time::timeout(Duration::from_millis(100), stdout.read(&mut scratch)).await
            {
                Ok(Ok(0)) | Err(_) => break,
                Ok(Ok(_)) => continue,
                Ok(Err(e)) => return Err(EngineError::Io(e)),
            }
        }

        Ok(Session {
            id,
            container: container.to_string(),
            created_at: Instant::now(),
            handle: Mutex::new(ShellHandle {
                child,
                stdin,
                stdout,
            }),
            closed: AtomicBool::new(false),
            last_used: std::sync::Mutex::new(Instant::now()),
            metrics: std::sync::Mutex::new(SessionMetrics::default()),
            marker_seq: AtomicU64::new(0),
        })
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn idle_for(&self) -> Duration {
        self.last_used.lock().expect("not poisoned").elapsed()
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            container: self.container.clone(),
            uptime_secs: self.created_at.elapsed().as_secs(),
            idle_secs: self.idle_for().as_secs(),
            metrics: self.metrics.lock().expect("not poisoned").clone(),
        }
    }

    /// Run one command through the shell. Serialized on the handle mutex:
    /// a concurrent caller waits here rather than interleaving output.
    pub async fn exec(&self, request: &ExecutionRequest, timeout: Duration) -> Result<ExecutionResult> {
        if self.is_closed() {
            return Err(EngineError::Session {
                container: self.container.clone(),
                reason: "session is closed".to_string(),
            });
        }

        let mut handle = self.handle.lock().await;

        let started_at = Utc::now();
        let start = Instant::now();
        let marker = format!(
            "{END_MARKER_PREFIX}{}_{}",
            self.id,
            self.marker_seq.fetch_add(1, Ordering::Relaxed)
        );

        debug!(container = %self.container, command = %request.command, "session exec");

        let payload = format!(
            "{}\necho {EXIT_CODE_PREFIX}$?\necho {marker}\n",
            request.command
        );
        if let Err(e) = handle.stdin.write_all(payload.as_bytes()).await {
            self.close_locked(&mut handle).await;
            return Err(EngineError::Session {
                container: self.container.clone(),
                reason: format!("failed to write to shell: {e}"),
            });
        }
        let _ = handle.stdin.flush().await;

        let mut stdout = String::new();
        let mut exit_code = 0i32;
        // Duration is captured at the verdict, before any teardown grace
        let (exit, duration) = loop {
            let elapsed = start.elapsed();
            if elapsed >= timeout {
                warn!(container = %self.container, "session command timed out, tearing session down");
                let duration = start.elapsed();
                self.close_locked(&mut handle).await;
                break (ExitDisposition::TimedOut, duration);
            }

            let mut line = String::new();
            let slice = READ_SLICE.min(timeout - elapsed);
            match tokio::time::timeout(slice, handle.stdout.read_line(&mut line)).await {
                Err(_) => continue, // no output yet, re-check deadline
                Ok(Ok(0)) => {
                    // EOF: the shell died (container stopped or was removed)
                    self.close_locked(&mut handle).await;
                    return Err(EngineError::Session {
                        container: self.container.clone(),
                        reason: "shell ended unexpectedly".to_string(),
                    });
                }
                Ok(Ok(_)) => {
                    if line.contains(&marker) {
                        break (ExitDisposition::Exited(exit_code), start.elapsed());
                    }
                    if let Some(rest) = line.trim().strip_prefix(EXIT_CODE_PREFIX) {
                        exit_code = rest.trim().parse().unwrap_or(-1);
                        continue;
                    }
                    stdout.push_str(&line);
                }
                Ok(Err(e)) => {
                    self.close_locked(&mut handle).await;
                    return Err(EngineError::Io(e));
                }
            }
        };

        drop(handle);

        *self.last_used.lock().expect("not poisoned") = Instant::now();
        {
            let mut metrics = self.metrics.lock().expect("not poisoned");
            metrics.commands_executed += 1;
            metrics.total_execution_ms += duration.as_millis() as u64;
        }

        Ok(ExecutionResult::new(
            request,
            stdout,
            String::new(),
            exit,
            started_at,
            duration,
        ))
    }

    /// Tear down the shell. Caller must hold the handle lock.
    async fn close_locked(&self, handle: &mut ShellHandle) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        // Ask for a clean exit, then force it
        let _ = handle.stdin.write_all(b"exit\n").await;
        let _ = handle.stdin.flush().await;
        if tokio::time::timeout(Duration::from_secs(2), handle.child.wait())
            .await
            .is_err()
        {
            handle.child.start_kill().ok();
            let _ = handle.child.wait().await;
        }
        info!(container = %self.container, "session closed");
    }

    async fn close(&self) {
        let mut handle = self.handle.lock().await;
        self.close_locked(&mut handle).await;
    }
}

/// Owns the container-to-session map and the idle-eviction sweep
pub struct SessionManager {
    exegol_path: String,
    idle_timeout: Duration,
    sessions: Mutex<HashMap<String, Arc<Session>>>,
    next_id: AtomicU64,
    sweeper: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl SessionManager {
    pub fn new(exegol_path: impl Into<String>, idle_timeout: Duration) -> Self {
        Self {
            exegol_path: exegol_path.into(),
            idle_timeout,
            sessions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            sweeper: std::sync::Mutex::new(None),
        }
    }

    /// Run a command through the container's session, creating it on first
    /// use. A session that dies or times out is dropped from the map so the
    /// next call starts fresh.
    pub async fn exec(&self, request: &ExecutionRequest, timeout: Duration) -> Result<ExecutionResult> {
        let session = self.get_or_create(&request.container).await?;
        let result = session.exec(request, timeout).await;
        if session.is_closed() {
            self.remove(&request.container, &session).await;
        }
        result
    }

    /// Idempotent per container: a second caller gets the existing live
    /// session instead of a duplicate. Creation happens under the map lock,
    /// which is what makes the one-session-per-container invariant hold.
    pub async fn get_or_create(&self, container: &str) -> Result<Arc<Session>> {
        let mut sessions = self.sessions.lock().await;

        if let Some(existing) = sessions.get(container) {
            if !existing.is_closed() {
                debug!(container, "reusing existing session");
                return Ok(Arc::clone(existing));
            }
            warn!(container, "dropping dead session");
            sessions.remove(container);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let session = Arc::new(Session::start(id, container, &self.exegol_path).await?);
        sessions.insert(container.to_string(), Arc::clone(&session));
        Ok(session)
    }

    async fn remove(&self, container: &str, session: &Arc<Session>) {
        let mut sessions = self.sessions.lock().await;
        // Only remove the exact session we worked with; a replacement may
        // already be live under the same name.
        if let Some(current) = sessions.get(container) {
            if Arc::ptr_eq(current, session) {
                sessions.remove(container);
            }
        }
    }

    /// Explicitly close and remove one container's session.
    pub async fn close_session(&self, container: &str) -> bool {
        let session = { self.sessions.lock().await.remove(container) };
        match session {
            Some(session) => {
                session.close().await;
                true
            }
            None => false,
        }
    }

    /// Close every session (shutdown path).
    pub async fn close_all(&self) {
        let sessions: Vec<Arc<Session>> =
            { self.sessions.lock().await.drain().map(|(_, s)| s).collect() };
        futures::future::join_all(sessions.iter().map(|s| s.close())).await;
    }

    /// One sweep pass: tear down sessions idle beyond the threshold.
    ///
    /// A session whose handle mutex is held has a command in flight and is
    /// skipped regardless of wall-clock age.
    pub async fn evict_idle(&self) -> usize {
        let mut sessions = self.sessions.lock().await;
        let mut evicted = 0usize;

        let containers: Vec<String> = sessions.keys().cloned().collect();
        for container in containers {
            let Some(session) = sessions.get(&container) else {
                continue;
            };
            let session = Arc::clone(session);

            let Ok(mut handle) = session.handle.try_lock() else {
                continue; // command in flight
            };
            if session.is_closed() {
                sessions.remove(&container);
                continue;
            }
            if session.idle_for() >= self.idle_timeout {
                info!(
                    container,
                    idle_secs = session.idle_for().as_secs(),
                    "evicting idle session"
                );
                session.close_locked(&mut handle).await;
                drop(handle);
                sessions.remove(&container);
                evicted += 1;
            }
        }

        evicted
    }

    /// Snapshot of live sessions for status reporting.
    pub async fn sessions_info(&self) -> Vec<SessionInfo> {
        let sessions = self.sessions.lock().await;
        sessions.values().map(|s| s.info()).collect()
    }

    /// Start the background sweep on a fixed interval. Idempotent.
    pub fn start_sweeper(self: &Arc<Self>, interval: Duration) {
        let mut slot = self.sweeper.lock().expect("not poisoned");
        if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        let manager = Arc::clone(self);
        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await; // first tick is immediate, skip it
            loop {
                ticker.tick().await;
                let evicted = manager.evict_idle().await;
                if evicted > 0 {
                    info!(evicted, "idle sweep closed sessions");
                }
            }
        }));
    }

    /// Stop the background sweep.
    pub fn stop_sweeper(&self) {
        if let Some(handle) = self.sweeper.lock().expect("not poisoned").take() {
            handle.abort();
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.stop_sweeper();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    /// Stub CLI: for `exec -v <container> /bin/bash -i` it just becomes a
    /// plain shell reading commands from stdin, which is exactly what the
    /// marker protocol needs.
    fn stub_cli(dir: &tempfile::TempDir) -> String {
        let path = dir.path().join("exegol");
        std::fs::write(&path, "#!/bin/sh\nexec /bin/sh\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_str().unwrap().to_string()
    }

    fn manager(dir: &tempfile::TempDir, idle: Duration) -> Arc<SessionManager> {
        Arc::new(SessionManager::new(stub_cli(dir), idle))
    }

    #[tokio::test]
    async fn exec_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(&dir, Duration::from_secs(60));
        let request = ExecutionRequest::new("box1", "echo session-hello");
        let result = manager.exec(&request, Duration::from_secs(5)).await.unwrap();
        assert!(result.is_success());
        assert!(result.stdout.contains("session-hello"));
    }

    #[tokio::test]
    async fn exit_codes_come_from_the_command() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(&dir, Duration::from_secs(60));
        let request = ExecutionRequest::new("box1", "false");
        let result = manager.exec(&request, Duration::from_secs(5)).await.unwrap();
        assert_eq!(result.exit.code(), Some(1));
        assert!(!result.is_success());
    }

    #[tokio::test]
    async fn session_is_reused_across_commands() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(&dir, Duration::from_secs(60));

        let set = ExecutionRequest::new("box1", "STATE=carried");
        manager.exec(&set, Duration::from_secs(5)).await.unwrap();

        let get = ExecutionRequest::new("box1", "echo value=$STATE");
        let result = manager.exec(&get, Duration::from_secs(5)).await.unwrap();
        assert!(
            result.stdout.contains("value=carried"),
            "shell state should survive between commands: {:?}",
            result.stdout
        );

        let infos = manager.sessions_info().await;
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].metrics.commands_executed, 2);
    }

    #[tokio::test]
    async fn at_most_one_session_per_container_under_contention() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(&dir, Duration::from_secs(60));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let manager = Arc::clone(&manager);
                tokio::spawn(async move { manager.get_or_create("box1").await.unwrap() })
            })
            .collect();

        let mut sessions = Vec::new();
        for handle in handles {
            sessions.push(handle.await.unwrap());
        }
        for pair in sessions.windows(2) {
            assert!(Arc::ptr_eq(&pair[0], &pair[1]), "duplicate session created");
        }
        assert_eq!(manager.sessions_info().await.len(), 1);
    }

    #[tokio::test]
    async fn timeout_tears_down_the_session() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(&dir, Duration::from_secs(60));

        let slow = ExecutionRequest::new("box1", "sleep 30");
        let result = manager.exec(&slow, Duration::from_millis(300)).await.unwrap();
        assert!(result.timed_out);

        // The poisoned session is gone; the next command gets a fresh shell
        assert_eq!(manager.sessions_info().await.len(), 0);
        let after = ExecutionRequest::new("box1", "echo recovered");
        let result = manager.exec(&after, Duration::from_secs(5)).await.unwrap();
        assert!(result.stdout.contains("recovered"));
    }

    #[tokio::test]
    async fn idle_sessions_are_evicted() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(&dir, Duration::from_millis(50));

        let request = ExecutionRequest::new("box1", "echo hi");
        manager.exec(&request, Duration::from_secs(5)).await.unwrap();
        assert_eq!(manager.sessions_info().await.len(), 1);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(manager.evict_idle().await, 1);
        assert_eq!(manager.sessions_info().await.len(), 0);
    }

    #[tokio::test]
    async fn eviction_skips_in_flight_commands() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(&dir, Duration::from_millis(10));

        let busy = Arc::clone(&manager);
        let worker = tokio::spawn(async move {
            let request = ExecutionRequest::new("box1", "sleep 1 && echo survived");
            busy.exec(&request, Duration::from_secs(10)).await.unwrap()
        });

        // Give the command time to start, then sweep while it runs
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(manager.evict_idle().await, 0, "in-flight session must not be evicted");

        let result = worker.await.unwrap();
        assert!(result.stdout.contains("survived"));
    }

    #[tokio::test]
    async fn close_session_is_explicit_teardown() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(&dir, Duration::from_secs(60));

        let request = ExecutionRequest::new("box1", "echo hi");
        manager.exec(&request, Duration::from_secs(5)).await.unwrap();
        assert!(manager.close_session("box1").await);
        assert!(!manager.close_session("box1").await);
        assert_eq!(manager.sessions_info().await.len(), 0);
    }
}
