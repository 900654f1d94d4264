//! Stream Reconstructor: turns an arbitrarily chunked event stream back into prose.
//!
//! Frames are blank-line delimited; a frame may be split across any number of
//! physical reads, and one read may carry several frames.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

use super::join::join_into;

pub const END_SENTINEL: &str = "[DONE]";
pub const ERROR_SENTINEL: &str = "[ERROR]";
const FRAME_DELIMITER: &str = "\n\n";

static ROLE_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*assistant\b\s*:?\s*").expect("role label regex"));

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamFailure {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("upstream returned status {0}")]
    Status(u16),
    #[error("stream read failed: {0}")]
    Read(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// No terminal state yet (including "no answer yet").
    Streaming,
    Completed,
    Failed(StreamFailure),
}

/// One prompt/response exchange. `text` only ever grows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSession {
    text: String,
    state: SessionState,
    errors: Vec<String>,
    payloads: usize,
}

impl Default for StreamSession {
    fn default() -> Self {
        Self {
            text: String::new(),
            state: SessionState::Streaming,
            errors: Vec::new(),
            payloads: 0,
        }
    }
}

impl StreamSession {
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    /// Number of payloads appended to `text`.
    pub fn payloads(&self) -> usize {
        self.payloads
    }

    pub fn is_terminal(&self) -> bool {
        self.state != SessionState::Streaming
    }
}

/// Receives incremental progress. The reconstructor also mirrors every update
/// to the `stream` tracing target.
pub trait ResultView: Send {
    fn on_text(&mut self, accumulated: &str);
    fn on_error(&mut self, _message: &str) {}
    fn on_finish(&mut self, _state: &SessionState) {}
}

/// View that ignores updates; the session itself still records everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullView;

impl ResultView for NullView {
    fn on_text(&mut self, _accumulated: &str) {}
}

/// View that keeps every published snapshot (handy for tests and batch callers).
#[derive(Debug, Default, Clone)]
pub struct RecordingView {
    pub snapshots: Vec<String>,
    pub errors: Vec<String>,
    pub finished: Option<SessionState>,
}

impl ResultView for RecordingView {
    fn on_text(&mut self, accumulated: &str) {
        self.snapshots.push(accumulated.to_string());
    }

    fn on_error(&mut self, message: &str) {
        self.errors.push(message.to_string());
    }

    fn on_finish(&mut self, state: &SessionState) {
        self.finished = Some(state.clone());
    }
}

enum Frame<'a> {
    Done,
    Error(String),
    Payload(std::borrow::Cow<'a, str>),
    Empty,
}

pub struct StreamReconstructor<V: ResultView> {
    buffer: String,
    pending: Vec<u8>,
    session: StreamSession,
    view: V,
}

impl<V: ResultView> StreamReconstructor<V> {
    pub fn new(view: V) -> Self {
        Self {
            buffer: String::new(),
            pending: Vec::new(),
            session: StreamSession::default(),
            view,
        }
    }

    pub fn session(&self) -> &StreamSession {
        &self.session
    }

    pub fn view(&self) -> &V {
        &self.view
    }

    pub fn into_parts(self) -> (StreamSession, V) {
        (self.session, self.view)
    }

    pub fn is_done(&self) -> bool {
        self.session.is_terminal()
    }

    /// Feed one physical read. Incomplete UTF-8 sequences are held until the next read.
    pub fn push_bytes(&mut self, bytes: &[u8]) {
        if self.is_done() {
            return;
        }
        let decoded = self.decode(bytes);
        self.push_str(&decoded);
    }

    pub fn push_str(&mut self, chunk: &str) {
        if self.is_done() {
            return;
        }
        self.buffer.push_str(chunk);
        if self.buffer.contains("\r\n") {
            self.buffer = self.buffer.replace("\r\n", "\n");
        }

        while let Some(idx) = self.buffer.find(FRAME_DELIMITER) {
            let frame: String = self.buffer.drain(..idx + FRAME_DELIMITER.len()).collect();
            self.handle_frame(&frame[..idx]);
            if self.is_done() {
                self.buffer.clear();
                return;
            }
        }
    }

    /// Apply one already-extracted payload (e.g. a whole non-streamed answer).
    pub fn push_payload(&mut self, payload: &str) {
        if self.is_done() {
            return;
        }
        self.append(payload);
    }

    /// Transport closed: flush the residual buffer and settle the session.
    pub fn finish(&mut self) -> &StreamSession {
        if !self.is_done() {
            if !self.pending.is_empty() {
                let tail = String::from_utf8_lossy(&self.pending).into_owned();
                self.pending.clear();
                self.buffer.push_str(&tail);
            }
            let residual = std::mem::take(&mut self.buffer);
            if !residual.trim().is_empty() {
                self.handle_frame(residual.trim_end_matches('\n'));
            }
        }
        if !self.is_done() {
            self.settle(SessionState::Completed);
        }
        &self.session
    }

    /// Transport-level failure; terminal for this session only.
    pub fn fail(&mut self, failure: StreamFailure) {
        if self.is_done() {
            return;
        }
        warn!(target: "stream", error = %failure, "stream transport failed");
        self.buffer.clear();
        self.pending.clear();
        self.settle(SessionState::Failed(failure));
    }

    fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(s) => {
                    out.push_str(s);
                    self.pending.clear();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        // incomplete multi-byte sequence at the end: keep it
                        None => {
                            self.pending.drain(..valid);
                            break;
                        }
                        Some(n) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + n);
                        }
                    }
                }
            }
        }
        out
    }

    fn handle_frame(&mut self, frame: &str) {
        match parse_frame(frame) {
            Frame::Done => {
                debug!(target: "stream", payloads = self.session.payloads, "end sentinel received");
                self.settle(SessionState::Completed);
            }
            Frame::Error(message) => {
                warn!(target: "stream", %message, "error event in stream");
                self.view.on_error(&message);
                self.session.errors.push(message);
            }
            Frame::Payload(payload) => self.append(&payload),
            Frame::Empty => {}
        }
    }

    fn append(&mut self, payload: &str) {
        let cleaned = if self.session.text.is_empty() {
            strip_role_label(payload)
        } else {
            payload
        };
        if cleaned.is_empty() {
            return;
        }
        join_into(&mut self.session.text, cleaned);
        self.session.payloads += 1;
        debug!(target: "stream", len = self.session.text.len(), text = %self.session.text, "partial answer");
        self.view.on_text(&self.session.text);
    }

    fn settle(&mut self, state: SessionState) {
        self.session.state = state;
        self.view.on_finish(&self.session.state);
    }
}

fn strip_role_label(payload: &str) -> &str {
    match ROLE_LABEL.find(payload) {
        Some(m) => &payload[m.end()..],
        None => payload,
    }
}

fn parse_frame(frame: &str) -> Frame<'_> {
    let mut data: Vec<&str> = Vec::new();
    let mut event: Option<&str> = None;
    let mut saw_field = false;

    for line in frame.split('\n') {
        if let Some(rest) = line.strip_prefix("data:") {
            saw_field = true;
            data.push(rest.strip_prefix(' ').unwrap_or(rest));
        } else if let Some(rest) = line.strip_prefix("event:") {
            saw_field = true;
            event = Some(rest.trim());
        } else if line.starts_with(':') || line.starts_with("id:") || line.starts_with("retry:") {
            saw_field = true;
        }
    }

    // Not event-stream framing at all: the whole frame is the payload.
    if !saw_field {
        if frame.trim().is_empty() {
            return Frame::Empty;
        }
        return classify(event, std::borrow::Cow::Borrowed(frame));
    }
    if data.is_empty() {
        return match event {
            Some(e) if e.eq_ignore_ascii_case("done") => Frame::Done,
            Some(e) if e.eq_ignore_ascii_case("error") => Frame::Error(String::new()),
            _ => Frame::Empty,
        };
    }
    let payload = if data.len() == 1 {
        std::borrow::Cow::Borrowed(data[0])
    } else {
        std::borrow::Cow::Owned(data.join("\n"))
    };
    classify(event, payload)
}

fn classify<'a>(event: Option<&str>, payload: std::borrow::Cow<'a, str>) -> Frame<'a> {
    let trimmed = payload.trim();
    if trimmed == END_SENTINEL || event.is_some_and(|e| e.eq_ignore_ascii_case("done")) {
        return Frame::Done;
    }
    if event.is_some_and(|e| e.eq_ignore_ascii_case("error")) {
        return Frame::Error(trimmed.to_string());
    }
    if let Some(rest) = trimmed.strip_prefix(ERROR_SENTINEL) {
        return Frame::Error(rest.trim().to_string());
    }
    if payload.is_empty() {
        return Frame::Empty;
    }
    Frame::Payload(payload)
}
