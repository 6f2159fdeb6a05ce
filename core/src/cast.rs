//! asciinema v2 cast recorder and reader.
//!
//! A cast file is one JSON header line followed by newline-delimited JSON events
//! `[elapsed_seconds, kind, data]`. We are the single writer for a given session's `stream-out`
//! file (see [`crate::session`]); readers (the SSE tailer, snapshot rebuilder) only ever append
//! to their own view of the file, never to the file itself.

use std::io::Write;
use std::path::Path;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Event kind, matching asciinema's single-character tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Output,
    Input,
    Resize,
    Marker,
}

impl EventKind {
    fn as_tag(&self) -> &'static str {
        match self {
            EventKind::Output => "o",
            EventKind::Input => "i",
            EventKind::Resize => "r",
            EventKind::Marker => "m",
        }
    }

    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "o" => Some(EventKind::Output),
            "i" => Some(EventKind::Input),
            "r" => Some(EventKind::Resize),
            "m" => Some(EventKind::Marker),
            _ => None,
        }
    }
}

/// First line of every cast file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CastHeader {
    pub version: u32,
    pub width: u32,
    pub height: u32,
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<serde_json::Value>,
}

impl CastHeader {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            version: 2,
            width,
            height,
            timestamp: crate::session::unix_now_secs(),
            env: None,
        }
    }
}

/// One parsed event line: `[t, kind, data]`.
#[derive(Debug, Clone)]
pub struct CastEvent {
    pub time: f64,
    pub kind: EventKind,
    pub data: String,
}

impl CastEvent {
    pub fn to_json_line(&self) -> String {
        serde_json::to_string(&(self.time, self.kind.as_tag(), &self.data))
            .unwrap_or_else(|_| "[0,\"o\",\"\"]".to_string())
    }
}

/// Appends events to a session's `stream-out` file. Holds the file open for the session's
/// lifetime; `t0` anchors all recorded timestamps to the moment recording started.
pub struct CastRecorder {
    file: std::fs::File,
    t0: Instant,
}

impl CastRecorder {
    /// Create (truncating) the cast file at `path` and write its header immediately.
    pub fn create(path: &Path, width: u32, height: u32) -> CoreResult<Self> {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        let header = CastHeader::new(width, height);
        writeln!(file, "{}", serde_json::to_string(&header)?)?;
        file.flush()?;
        Ok(Self { file, t0: Instant::now() })
    }

    fn elapsed(&self) -> f64 {
        self.t0.elapsed().as_secs_f64()
    }

    fn write_event(&mut self, kind: EventKind, data: &str) -> CoreResult<()> {
        let event = CastEvent { time: self.elapsed(), kind, data: data.to_string() };
        writeln!(self.file, "{}", event.to_json_line())?;
        self.file.flush()?;
        Ok(())
    }

    pub fn record_output(&mut self, data: &str) -> CoreResult<()> {
        self.write_event(EventKind::Output, data)
    }

    pub fn record_input(&mut self, data: &str) -> CoreResult<()> {
        self.write_event(EventKind::Input, data)
    }

    pub fn record_resize(&mut self, cols: u32, rows: u32) -> CoreResult<()> {
        self.write_event(EventKind::Resize, &format!("{}x{}", cols, rows))
    }

    pub fn record_marker(&mut self, label: &str) -> CoreResult<()> {
        self.write_event(EventKind::Marker, label)
    }
}

/// Reads a cast file into a header plus a vec of events, tolerating a truncated final line
/// (a crash mid-write leaves a partial JSON array on the last line; we drop it rather than fail).
pub fn read_cast_file(path: &Path) -> CoreResult<(CastHeader, Vec<CastEvent>)> {
    let data = std::fs::read_to_string(path)?;
    let mut lines = data.lines();

    let header_line = lines.next().ok_or_else(|| {
        CoreError::Internal(format!("cast file {} has no header", path.display()))
    })?;
    let header: CastHeader = serde_json::from_str(header_line)?;

    let mut events = Vec::new();
    for line in lines {
        if line.trim().is_empty() {
            continue;
        }
        if let Some(event) = parse_event_line(line) {
            events.push(event);
        }
        // else: partial/corrupt trailing line, skip silently.
    }
    Ok((header, events))
}

/// Parses one `[t, kind, data]` line. Non-JSON lines are wrapped as synthetic output events by
/// callers that need that behavior (the SSE tailer); this function itself only parses well-formed
/// asciinema event arrays.
fn parse_event_line(line: &str) -> Option<CastEvent> {
    let value: serde_json::Value = serde_json::from_str(line).ok()?;
    let arr = value.as_array()?;
    if arr.len() != 3 {
        return None;
    }
    let time = arr[0].as_f64()?;
    let tag = arr[1].as_str()?;
    let kind = EventKind::from_tag(tag)?;
    let data = arr[2].as_str()?.to_string();
    Some(CastEvent { time, kind, data })
}

/// Renders a header plus events back into cast-file text, with every timestamp collapsed to 0.
/// Used for the on-demand text snapshot endpoint and as the instant-replay prefix of the SSE
/// stream.
pub fn render_zeroed(header: &CastHeader, events: &[CastEvent]) -> String {
    let mut out = String::new();
    out.push_str(&serde_json::to_string(header).unwrap_or_default());
    out.push('\n');
    for event in events {
        let zeroed = CastEvent { time: 0.0, kind: event.kind, data: event.data.clone() };
        out.push_str(&zeroed.to_json_line());
        out.push('\n');
    }
    out
}

/// Renders just the header line, for the SSE streamer's initial frame.
pub fn header_json_line(header: &CastHeader) -> String {
    serde_json::to_string(header).unwrap_or_default()
}

/// Renders one already-recorded event with its timestamp collapsed to 0, for the SSE streamer's
/// instant-replay prefix.
pub fn event_json_line_zeroed(event: &CastEvent) -> String {
    CastEvent { time: 0.0, kind: event.kind, data: event.data.clone() }.to_json_line()
}

/// Rewrites one freshly-tailed line of a `stream-out` file for live SSE delivery: a well-formed
/// `[t, kind, data]` line gets its timestamp replaced with `now_t` (seconds since the subscriber
/// connected, not since session start); anything else (a non-JSON line, e.g. from a partial write)
/// is wrapped as a synthetic output event rather than dropped.
pub fn rewrite_tailed_line(line: &str, now_t: f64) -> String {
    match parse_event_line(line) {
        Some(event) => CastEvent { time: now_t, kind: event.kind, data: event.data }.to_json_line(),
        None => serde_json::to_string(&(now_t, "o", line)).unwrap_or_else(|_| "[0,\"o\",\"\"]".to_string()),
    }
}

/// True if `line` looks like a cast header (used by the SSE tailer to suppress a duplicate header
/// reappearing mid-file after the recorder's file was rewritten).
pub fn looks_like_header(line: &str) -> bool {
    serde_json::from_str::<CastHeader>(line.trim()).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recorder_writes_header_then_events_and_reader_parses_them_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stream-out");
        let mut recorder = CastRecorder::create(&path, 80, 24).unwrap();
        recorder.record_output("hello\r\n").unwrap();
        recorder.record_resize(132, 43).unwrap();
        recorder.record_input("x").unwrap();

        let (header, events) = read_cast_file(&path).unwrap();
        assert_eq!(header.width, 80);
        assert_eq!(header.height, 24);
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].kind, EventKind::Output);
        assert_eq!(events[1].kind, EventKind::Resize);
        assert_eq!(events[1].data, "132x43");
        assert_eq!(events[2].kind, EventKind::Input);
    }

    #[test]
    fn reader_tolerates_a_truncated_final_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stream-out");
        std::fs::write(&path, "{\"version\":2,\"width\":80,\"height\":24,\"timestamp\":0}\n[0.1,\"o\",\"ok\"]\n[0.2,\"o\",\"cu").unwrap();
        let (header, events) = read_cast_file(&path).unwrap();
        assert_eq!(header.version, 2);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "ok");
    }

    #[test]
    fn render_zeroed_collapses_every_event_timestamp() {
        let header = CastHeader { version: 2, width: 2, height: 1, timestamp: 0, env: None };
        let events = vec![
            CastEvent { time: 1.5, kind: EventKind::Output, data: "a".into() },
            CastEvent { time: 3.2, kind: EventKind::Resize, data: "2x1".into() },
        ];
        let rendered = render_zeroed(&header, &events);
        let mut lines = rendered.lines();
        assert_eq!(lines.next().unwrap(), serde_json::to_string(&header).unwrap());
        assert_eq!(lines.next().unwrap(), "[0.0,\"o\",\"a\"]");
        assert_eq!(lines.next().unwrap(), "[0.0,\"r\",\"2x1\"]");
        assert!(lines.next().is_none());
    }

    #[test]
    fn rewrite_tailed_line_reuses_now_t_for_well_formed_events() {
        let rewritten = rewrite_tailed_line("[5.0,\"o\",\"abc\"]", 42.0);
        assert_eq!(rewritten, "[42.0,\"o\",\"abc\"]");
    }

    #[test]
    fn rewrite_tailed_line_wraps_non_json_as_synthetic_output() {
        let rewritten = rewrite_tailed_line("not json at all", 1.0);
        assert_eq!(rewritten, serde_json::to_string(&(1.0, "o", "not json at all")).unwrap());
    }

    #[test]
    fn looks_like_header_distinguishes_header_from_event_lines() {
        let header = CastHeader::new(80, 24);
        assert!(looks_like_header(&serde_json::to_string(&header).unwrap()));
        assert!(!looks_like_header("[0.0,\"o\",\"abc\"]"));
    }
}
