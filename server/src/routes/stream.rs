//! `GET /api/sessions/{id}/stream`: the live SSE tail.
//!
//! A subscriber first gets the session's recorded history with every timestamp collapsed to 0 (so
//! a client renders the current screen instantly), then a live tail of the `stream-out` file with
//! timestamps rewritten to be relative to the moment it subscribed. Tailing runs on a blocking OS
//! thread via `notify::PollWatcher` (the same hot-reload pattern the wider example pack uses for
//! config files) because the file can be rewritten out from under us — a rename/truncate is
//! detected by its length going backwards, and the tailer reopens and resumes from byte 0,
//! suppressing the header that reappears at the top.

use std::convert::Infallible;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use axum::extract::{Path, State};
use axum::http::header;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use notify::{Config as NotifyConfig, PollWatcher, RecursiveMode, Watcher};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use vibetunnel_core::cast;

use crate::error::AppError;
use crate::state::AppState;

const SSE_IDLE_TIMEOUT: Duration = Duration::from_secs(60);
const POLL_INTERVAL: Duration = Duration::from_millis(200);

pub async fn stream_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let sid = state.sessions.resolve_id(&id)?;

    let stream_path = state.sessions.stream_path(sid);
    let (header, events) = cast::read_cast_file(&stream_path)?;

    let (tx, rx) = tokio::sync::mpsc::channel::<String>(512);

    let _ = tx.send(cast::header_json_line(&header)).await;
    for event in &events {
        if tx.send(cast::event_json_line_zeroed(event)).await.is_err() {
            break;
        }
    }

    tokio::task::spawn_blocking(move || tail_file(stream_path, tx));

    let out = ReceiverStream::new(rx).map(|line| Ok::<_, Infallible>(SseEvent::default().data(line)));
    let sse = Sse::new(out).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)).text("keep-alive"));

    let mut response = sse.into_response();
    response.headers_mut().insert(header::CACHE_CONTROL, header::HeaderValue::from_static("no-cache"));
    response.headers_mut().insert(header::CONNECTION, header::HeaderValue::from_static("keep-alive"));
    Ok(response)
}

/// Runs on a dedicated OS thread (opened via `spawn_blocking`): polls `stream_path` for growth,
/// forwards newly appended lines with rewritten timestamps, and exits once `out_tx`'s receiver
/// (the SSE subscriber) is gone or `SSE_IDLE_TIMEOUT` passes with no new bytes.
fn tail_file(stream_path: PathBuf, out_tx: tokio::sync::mpsc::Sender<String>) {
    let t0_stream = Instant::now();
    let mut offset = std::fs::metadata(&stream_path).map(|m| m.len()).unwrap_or(0);
    // Raw bytes, not a `String`: a read can land mid-codepoint when a line spans two reads, and
    // decoding eagerly would permanently replace the still-incomplete tail with U+FFFD.
    let mut partial: Vec<u8> = Vec::new();
    let mut header_already_sent = true;
    let mut last_progress = Instant::now();

    let (fs_tx, fs_rx) = std::sync::mpsc::channel::<notify::Result<notify::Event>>();
    let watcher = PollWatcher::new(
        move |res| {
            let _ = fs_tx.send(res);
        },
        NotifyConfig::default().with_poll_interval(POLL_INTERVAL),
    );
    let mut watcher = match watcher {
        Ok(w) => w,
        Err(e) => {
            tracing::warn!(error = %e, "failed to create SSE tail watcher");
            return;
        }
    };
    if watcher.watch(&stream_path, RecursiveMode::NonRecursive).is_err() {
        return;
    }

    loop {
        if out_tx.is_closed() {
            return;
        }
        if last_progress.elapsed() > SSE_IDLE_TIMEOUT {
            return;
        }

        match fs_rx.recv_timeout(POLL_INTERVAL) {
            Ok(_) | Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {}
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => return,
        }

        let Ok(metadata) = std::fs::metadata(&stream_path) else { continue };
        let len = metadata.len();
        if len < offset {
            // File was truncated or replaced (inode recycled): start over, treating whatever
            // header shows up first as a duplicate to suppress.
            offset = 0;
            partial.clear();
            header_already_sent = false;
        }
        if len == offset {
            continue;
        }

        let Ok(mut file) = std::fs::File::open(&stream_path) else { continue };
        if file.seek(SeekFrom::Start(offset)).is_err() {
            continue;
        }
        let mut buf = Vec::new();
        if file.read_to_end(&mut buf).is_err() {
            continue;
        }
        if buf.is_empty() {
            continue;
        }
        offset += buf.len() as u64;
        partial.extend_from_slice(&buf);
        last_progress = Instant::now();

        while let Some(pos) = partial.iter().position(|&b| b == b'\n') {
            // `\n` (0x0A) never occurs as a continuation or lead byte of a multi-byte UTF-8
            // sequence, so splitting on it is safe even with a codepoint mid-flight further
            // along in `partial`; only the bytes up to and including this newline are decoded.
            let line_bytes: Vec<u8> = partial.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line_bytes[..line_bytes.len() - 1]).into_owned();
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if !header_already_sent && cast::looks_like_header(line) {
                header_already_sent = true;
                continue;
            }
            let now_t = t0_stream.elapsed().as_secs_f64();
            let rewritten = cast::rewrite_tailed_line(line, now_t);
            if out_tx.blocking_send(rewritten).is_err() {
                return;
            }
        }
    }
}
