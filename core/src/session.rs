//! Directory-rooted session catalog: one session is one PTY, one `stream-out` cast file, and a
//! `session.json` record living under the control path (default `~/.vibetunnel/control`).
//!
//! The manager itself only owns the set of session directories; each session's PTY-forwarding
//! task is the sole writer of its own `stream-out`/`session.json`/pipes (see module docs in
//! [`crate::cast`]).

use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex as AsyncMutex, RwLock};

use crate::cast::CastRecorder;
use crate::error::{CoreError, CoreResult};
use crate::pty::{self, PtyBridge};

/// Unique session identifier (UUID v4), used in the API, directory names, and cast-file paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub uuid::Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Option<Self> {
        uuid::Uuid::parse_str(s).ok().map(Self)
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Starting,
    Running,
    Exited,
}

/// Parameters for creating a new session.
#[derive(Debug, Clone)]
pub struct CreateSessionParams {
    pub command: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub name: Option<String>,
    pub cols: u16,
    pub rows: u16,
}

/// Persisted on disk as `session.json`; also what list/get return to the API layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: SessionId,
    pub command: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub name: Option<String>,
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub started_at: String,
    pub last_modified: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    pub cols: u16,
    pub rows: u16,
}

impl SessionRecord {
    fn touch(&mut self) {
        self.last_modified = chrono::Utc::now().to_rfc3339();
    }
}

/// Paths to the four files/pipes that make up one session directory.
pub struct SessionPaths {
    pub dir: PathBuf,
    pub session_json: PathBuf,
    pub stream_out: PathBuf,
    pub stdin_fifo: PathBuf,
    pub control_fifo: PathBuf,
}

impl SessionPaths {
    fn new(control_path: &Path, id: SessionId) -> Self {
        let dir = control_path.join(id.to_string());
        Self {
            session_json: dir.join("session.json"),
            stream_out: dir.join("stream-out"),
            stdin_fifo: dir.join("stdin"),
            control_fifo: dir.join("control"),
            dir,
        }
    }
}

/// Live, in-process half of a session: the PTY bridge, the broadcast sender that SSE subscribers
/// tail, and the mutable status shared with the exit-watcher task.
pub struct SessionHandle {
    pub bridge: Arc<PtyBridge>,
    pub live_tx: broadcast::Sender<Bytes>,
    pub status: Arc<RwLock<SessionStatus>>,
    pub paths: SessionPaths,
    /// Shared with the output-recording task, so `resize`/`send_input` append "r"/"i" events to
    /// the same cast file without a second writer ever touching it.
    pub recorder: Arc<AsyncMutex<CastRecorder>>,
}

/// Live broadcast capacity: messages buffered per subscriber before a slow reader starts missing
/// events (it will still catch up via the cast-file replay prefix).
pub const LIVE_BROADCAST_CAP: usize = 256;

/// Directory-rooted session catalog. Cheaply cloneable; shared as axum state.
#[derive(Clone)]
pub struct SessionManager {
    control_path: Arc<PathBuf>,
    live: Arc<DashMap<SessionId, SessionHandle>>,
}

impl SessionManager {
    pub fn new(control_path: PathBuf) -> CoreResult<Self> {
        std::fs::create_dir_all(&control_path)?;
        Ok(Self { control_path: Arc::new(control_path), live: Arc::new(DashMap::new()) })
    }

    pub fn control_path(&self) -> &Path {
        &self.control_path
    }

    fn paths_for(&self, id: SessionId) -> SessionPaths {
        SessionPaths::new(&self.control_path, id)
    }

    /// Spawn a new PTY-backed session: allocate an id, create its directory and pipes, start the
    /// PTY, and begin recording. On any spawn failure the partial directory is removed so no
    /// broken session persists.
    pub async fn create(&self, params: CreateSessionParams) -> CoreResult<SessionRecord> {
        if params.command.is_empty() {
            return Err(CoreError::InvalidRequest("command must not be empty".into()));
        }

        let id = SessionId::new();
        let paths = self.paths_for(id);
        std::fs::create_dir_all(&paths.dir)?;

        if let Err(e) = self.create_fifos(&paths) {
            let _ = std::fs::remove_dir_all(&paths.dir);
            return Err(e);
        }

        let env: Vec<(String, String)> = Vec::new();
        let spawn_result = pty::spawn_pty(
            &params.command,
            params.working_dir.as_deref(),
            &env,
            params.cols,
            params.rows,
        );
        let (bridge, mut out_rx, mut exit_rx) = match spawn_result {
            Ok(v) => v,
            Err(e) => {
                let _ = std::fs::remove_dir_all(&paths.dir);
                return Err(e);
            }
        };

        let now = chrono::Utc::now().to_rfc3339();
        let mut record = SessionRecord {
            id,
            command: params.command.clone(),
            working_dir: params.working_dir.clone(),
            name: params.name.clone(),
            status: SessionStatus::Running,
            exit_code: None,
            started_at: now.clone(),
            last_modified: now,
            pid: bridge.pid(),
            cols: params.cols,
            rows: params.rows,
        };
        write_record_atomic(&paths.session_json, &record)?;

        let recorder = Arc::new(AsyncMutex::new(CastRecorder::create(
            &paths.stream_out,
            params.cols as u32,
            params.rows as u32,
        )?));

        let (live_tx, _) = broadcast::channel::<Bytes>(LIVE_BROADCAST_CAP);
        let status = Arc::new(RwLock::new(SessionStatus::Running));
        let bridge = Arc::new(bridge);

        let out_tx = live_tx.clone();
        let out_recorder = Arc::clone(&recorder);
        tokio::spawn(async move {
            while let Some(chunk) = out_rx.recv().await {
                {
                    let mut rec = out_recorder.lock().await;
                    if let Ok(text) = std::str::from_utf8(&chunk) {
                        let _ = rec.record_output(text);
                    } else {
                        let _ = rec.record_output(&String::from_utf8_lossy(&chunk));
                    }
                }
                let _ = out_tx.send(Bytes::from(chunk));
            }
        });

        let session_json_path = paths.session_json.clone();
        let status_watch = Arc::clone(&status);
        tokio::spawn(async move {
            if let Some(exit) = exit_rx.recv().await {
                *status_watch.write().await = SessionStatus::Exited;
                if let Ok(data) = std::fs::read_to_string(&session_json_path) {
                    if let Ok(mut rec) = serde_json::from_str::<SessionRecord>(&data) {
                        rec.status = SessionStatus::Exited;
                        rec.exit_code = Some(exit.exit_code);
                        rec.touch();
                        let _ = write_record_atomic(&session_json_path, &rec);
                    }
                }
            }
        });

        self.spawn_fifo_readers(id, Arc::clone(&bridge), &paths);

        record.status = SessionStatus::Running;
        self.live.insert(id, SessionHandle { bridge, live_tx, status, paths, recorder });

        Ok(record)
    }

    /// Opens the session's `stdin`/`control` FIFOs on dedicated OS threads (opening a FIFO for
    /// read blocks until a writer connects, so these cannot run on the tokio runtime) and wires
    /// them into the PTY for the lifetime of the session. A FIFO yields EOF whenever its last
    /// writer disconnects; each loop reopens and waits for the next one rather than exiting, so a
    /// short-lived external writer (e.g. `echo resize >control`) doesn't sever the pipe.
    #[cfg(unix)]
    fn spawn_fifo_readers(&self, id: SessionId, bridge: Arc<PtyBridge>, paths: &SessionPaths) {
        let live = Arc::clone(&self.live);
        let stdin_path = paths.stdin_fifo.clone();
        let stdin_bridge = Arc::clone(&bridge);
        std::thread::spawn(move || {
            let mut buf = [0u8; 4096];
            loop {
                if !live.contains_key(&id) {
                    break;
                }
                let Ok(mut file) = std::fs::File::open(&stdin_path) else { break };
                loop {
                    match file.read(&mut buf) {
                        Ok(0) => break,
                        Ok(n) => {
                            let _ = stdin_bridge.write(&buf[..n]);
                        }
                        Err(_) => break,
                    }
                }
                if !live.contains_key(&id) {
                    break;
                }
            }
        });

        let live = Arc::clone(&self.live);
        let control_path = paths.control_fifo.clone();
        std::thread::spawn(move || loop {
            if !live.contains_key(&id) {
                break;
            }
            let Ok(file) = std::fs::File::open(&control_path) else { break };
            let mut reader = BufReader::new(file);
            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line) {
                    Ok(0) => break,
                    Ok(_) => {
                        if let Some(msg) = ControlMessage::parse(&line) {
                            apply_control_message(&bridge, msg);
                        }
                    }
                    Err(_) => break,
                }
            }
            if !live.contains_key(&id) {
                break;
            }
        });
    }

    #[cfg(not(unix))]
    fn spawn_fifo_readers(&self, _id: SessionId, _bridge: Arc<PtyBridge>, _paths: &SessionPaths) {}

    #[cfg(unix)]
    fn create_fifos(&self, paths: &SessionPaths) -> CoreResult<()> {
        for path in [&paths.stdin_fifo, &paths.control_fifo] {
            let c_path = std::ffi::CString::new(path.to_string_lossy().as_bytes())
                .map_err(|e| CoreError::internal(e.to_string()))?;
            let ret = unsafe { libc::mkfifo(c_path.as_ptr(), 0o600) };
            if ret != 0 {
                return Err(CoreError::Io(std::io::Error::last_os_error()));
            }
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn create_fifos(&self, _paths: &SessionPaths) -> CoreResult<()> {
        Ok(())
    }

    /// Look up a session's on-disk record by id, refreshing status if a zombie is detected.
    pub fn get(&self, id: SessionId) -> CoreResult<SessionRecord> {
        let paths = self.paths_for(id);
        self.load_record(&paths, id)
    }

    /// Resolves a raw id string the way the HTTP layer's session-scoped endpoints do: an exact
    /// UUID first, then (since the id didn't parse as one) a unique UUID-prefix match, then a
    /// unique exact match on the session's human `name`. Ambiguous prefix/name matches (more than
    /// one session qualifies) are treated as not-found rather than guessing.
    pub fn resolve(&self, raw: &str) -> CoreResult<SessionRecord> {
        if let Some(id) = SessionId::parse(raw) {
            return self.get(id);
        }
        let candidates = self.list()?;

        let prefix_matches: Vec<_> =
            candidates.iter().filter(|r| r.id.to_string().starts_with(raw)).collect();
        if prefix_matches.len() == 1 {
            return Ok(prefix_matches[0].clone());
        }

        let name_matches: Vec<_> =
            candidates.iter().filter(|r| r.name.as_deref() == Some(raw)).collect();
        if name_matches.len() == 1 {
            return Ok(name_matches[0].clone());
        }

        Err(CoreError::SessionNotFound(raw.to_string()))
    }

    /// Like [`Self::resolve`], but returns just the id — what every other catalog method
    /// (`send_input`, `resize`, `kill`, ...) actually keys its in-process `live` map on.
    pub fn resolve_id(&self, raw: &str) -> CoreResult<SessionId> {
        self.resolve(raw).map(|record| record.id)
    }

    fn load_record(&self, paths: &SessionPaths, id: SessionId) -> CoreResult<SessionRecord> {
        let data = std::fs::read_to_string(&paths.session_json)
            .map_err(|_| CoreError::SessionNotFound(id.to_string()))?;
        let mut record: SessionRecord = serde_json::from_str(&data)?;
        if record.status != SessionStatus::Exited && !self.live.contains_key(&id) {
            // No in-process handle for a supposedly running session: the process host restarted.
            record.status = SessionStatus::Exited;
            record.touch();
            let _ = write_record_atomic(&paths.session_json, &record);
        }
        Ok(record)
    }

    /// List all sessions, most recently modified first.
    pub fn list(&self) -> CoreResult<Vec<SessionRecord>> {
        let mut out = Vec::new();
        let entries = match std::fs::read_dir(&*self.control_path) {
            Ok(e) => e,
            Err(_) => return Ok(out),
        };
        for entry in entries.filter_map(|e| e.ok()) {
            let Some(id) = entry.file_name().to_str().and_then(SessionId::parse) else {
                continue;
            };
            let paths = self.paths_for(id);
            if let Ok(record) = self.load_record(&paths, id) {
                out.push(record);
            }
        }
        out.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));
        Ok(out)
    }

    /// Send input bytes to a running session's PTY, recording an "i" cast event.
    pub async fn send_input(&self, id: SessionId, data: &[u8]) -> CoreResult<()> {
        let handle = self.live.get(&id).ok_or_else(|| CoreError::SessionNotFound(id.to_string()))?;
        if *handle.status.read().await == SessionStatus::Exited {
            return Err(CoreError::SessionGone);
        }
        handle.bridge.write(data)?;
        let mut rec = handle.recorder.lock().await;
        let _ = rec.record_input(&String::from_utf8_lossy(data));
        Ok(())
    }

    /// Resize a running session's PTY, recording an "r" cast event.
    pub async fn resize(&self, id: SessionId, cols: u16, rows: u16) -> CoreResult<()> {
        let handle = self.live.get(&id).ok_or_else(|| CoreError::SessionNotFound(id.to_string()))?;
        if *handle.status.read().await == SessionStatus::Exited {
            return Err(CoreError::SessionGone);
        }
        handle.bridge.resize(cols, rows)?;
        {
            let mut rec = handle.recorder.lock().await;
            let _ = rec.record_resize(cols as u32, rows as u32);
        }

        let paths = self.paths_for(id);
        if let Ok(data) = std::fs::read_to_string(&paths.session_json) {
            if let Ok(mut record) = serde_json::from_str::<SessionRecord>(&data) {
                record.cols = cols;
                record.rows = rows;
                record.touch();
                let _ = write_record_atomic(&paths.session_json, &record);
            }
        }
        Ok(())
    }

    /// Subscribe to a session's live output broadcast, for the SSE streamer.
    pub fn subscribe(&self, id: SessionId) -> CoreResult<broadcast::Receiver<Bytes>> {
        let handle = self.live.get(&id).ok_or_else(|| CoreError::SessionNotFound(id.to_string()))?;
        Ok(handle.live_tx.subscribe())
    }

    pub fn stream_path(&self, id: SessionId) -> PathBuf {
        self.paths_for(id).stream_out
    }

    /// Graceful kill: SIGTERM, wait up to the PTY's deadline, then SIGKILL.
    pub async fn kill(&self, id: SessionId) -> CoreResult<()> {
        let Some(handle) = self.live.get(&id) else {
            return Err(CoreError::SessionNotFound(id.to_string()));
        };
        let status = Arc::clone(&handle.status);
        handle.bridge.graceful_kill(|| status_is_exited(&status)).await
    }

    /// Remove a session's directory. Refuses (returns `conflict`) if it is still running.
    pub async fn remove(&self, id: SessionId) -> CoreResult<()> {
        let record = self.get(id)?;
        if record.status != SessionStatus::Exited {
            return Err(CoreError::Conflict(format!("session {id} is still running")));
        }
        self.live.remove(&id);
        let paths = self.paths_for(id);
        std::fs::remove_dir_all(&paths.dir)?;
        Ok(())
    }

    /// Refresh status for all exited sessions (non-destructive).
    pub fn cleanup_exited(&self) -> CoreResult<Vec<SessionId>> {
        let mut touched = Vec::new();
        for record in self.list()? {
            if record.status == SessionStatus::Exited {
                touched.push(record.id);
            }
        }
        Ok(touched)
    }

    /// Remove the directories of all non-running sessions. Returns the removed ids.
    pub async fn remove_exited(&self) -> CoreResult<Vec<SessionId>> {
        let mut removed = Vec::new();
        for record in self.list()? {
            if record.status == SessionStatus::Exited {
                if self.remove(record.id).await.is_ok() {
                    removed.push(record.id);
                }
            }
        }
        Ok(removed)
    }
}

/// The only two messages the `control` FIFO recognizes, one JSON object per line.
#[cfg(unix)]
#[derive(Debug, Deserialize)]
#[serde(tag = "cmd", rename_all = "lowercase")]
enum ControlMessage {
    Resize { cols: u16, rows: u16 },
    Kill { signal: Option<i32> },
}

#[cfg(unix)]
impl ControlMessage {
    fn parse(line: &str) -> Option<Self> {
        serde_json::from_str(line.trim()).ok()
    }
}

#[cfg(unix)]
fn apply_control_message(bridge: &PtyBridge, msg: ControlMessage) {
    match msg {
        ControlMessage::Resize { cols, rows } => {
            let _ = bridge.resize(cols, rows);
        }
        ControlMessage::Kill { signal: Some(sig) } => {
            let _ = bridge.signal(sig);
        }
        ControlMessage::Kill { signal: None } => {
            let _ = bridge.kill();
        }
    }
}

/// Synchronously peek a `RwLock<SessionStatus>`'s current value from within the `graceful_kill`
/// poll closure (which is not itself async). `try_read` never blocks: the writer only holds the
/// lock across a single status flip, so contention here just means "still running, try again".
fn status_is_exited(status: &RwLock<SessionStatus>) -> bool {
    match status.try_read() {
        Ok(guard) => *guard == SessionStatus::Exited,
        Err(_) => false,
    }
}

fn write_record_atomic(path: &Path, record: &SessionRecord) -> CoreResult<()> {
    let tmp = path.with_extension("json.tmp");
    let data = serde_json::to_string_pretty(record)?;
    std::fs::write(&tmp, data)?;
    std::fs::rename(tmp, path)?;
    Ok(())
}

/// Unix timestamp for "now" (seconds). Used as the default cast-header timestamp.
pub fn unix_now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn wait_for_status(manager: &SessionManager, id: SessionId, want: SessionStatus) {
        for _ in 0..100 {
            if manager.get(id).unwrap().status == want {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
        panic!("session {id} never reached status {want:?}");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn create_list_resize_kill_remove_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SessionManager::new(dir.path().to_path_buf()).unwrap();

        let record = manager
            .create(CreateSessionParams {
                command: vec!["sh".into(), "-c".into(), "echo hi; sleep 30".into()],
                working_dir: None,
                name: Some("greeting".into()),
                cols: 80,
                rows: 24,
            })
            .await
            .unwrap();
        assert_eq!(record.status, SessionStatus::Running);
        assert_eq!(record.cols, 80);

        let listed = manager.list().unwrap();
        assert!(listed.iter().any(|r| r.id == record.id));

        manager.resize(record.id, 132, 43).await.unwrap();
        let resized = manager.get(record.id).unwrap();
        assert_eq!((resized.cols, resized.rows), (132, 43));

        let (header, events) = crate::cast::read_cast_file(&manager.stream_path(record.id)).unwrap();
        assert_eq!((header.width, header.height), (80, 24));
        assert!(events.iter().any(|e| e.kind == crate::cast::EventKind::Resize && e.data == "132x43"));

        manager.send_input(record.id, b"ignored since shell already running").await.unwrap();

        manager.kill(record.id).await.unwrap();
        wait_for_status(&manager, record.id, SessionStatus::Exited).await;

        manager.remove(record.id).await.unwrap();
        assert!(manager.get(record.id).is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn resolve_falls_back_to_unique_prefix_then_unique_name() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SessionManager::new(dir.path().to_path_buf()).unwrap();
        let record = manager
            .create(CreateSessionParams {
                command: vec!["sh".into(), "-c".into(), "sleep 30".into()],
                working_dir: None,
                name: Some("build-server".into()),
                cols: 80,
                rows: 24,
            })
            .await
            .unwrap();

        let by_exact = manager.resolve(&record.id.to_string()).unwrap();
        assert_eq!(by_exact.id, record.id);

        let prefix = &record.id.to_string()[..8];
        let by_prefix = manager.resolve(prefix).unwrap();
        assert_eq!(by_prefix.id, record.id);

        let by_name = manager.resolve("build-server").unwrap();
        assert_eq!(by_name.id, record.id);

        assert!(manager.resolve("no-such-session").is_err());

        manager.kill(record.id).await.unwrap();
        wait_for_status(&manager, record.id, SessionStatus::Exited).await;
        manager.remove(record.id).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn remove_refuses_while_running() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SessionManager::new(dir.path().to_path_buf()).unwrap();
        let record = manager
            .create(CreateSessionParams {
                command: vec!["sh".into(), "-c".into(), "sleep 30".into()],
                working_dir: None,
                name: None,
                cols: 80,
                rows: 24,
            })
            .await
            .unwrap();

        let err = manager.remove(record.id).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Conflict);

        manager.kill(record.id).await.unwrap();
        wait_for_status(&manager, record.id, SessionStatus::Exited).await;
        manager.remove(record.id).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn input_and_resize_fail_after_exit() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SessionManager::new(dir.path().to_path_buf()).unwrap();
        let record = manager
            .create(CreateSessionParams {
                command: vec!["sh".into(), "-c".into(), "true".into()],
                working_dir: None,
                name: None,
                cols: 80,
                rows: 24,
            })
            .await
            .unwrap();

        wait_for_status(&manager, record.id, SessionStatus::Exited).await;

        let err = manager.send_input(record.id, b"x").await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::SessionGone);

        let err = manager.resize(record.id, 10, 10).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::SessionGone);
    }
}
