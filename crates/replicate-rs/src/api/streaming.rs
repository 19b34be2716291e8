//! Server-Sent Events (SSE) streaming of prediction output.
//!
//! Provides [`ServerSentEvent`], the incremental [`SseDecoder`], and two
//! stream types over an open `text/event-stream` response:
//! [`EventStream`] (blocking `Iterator`) and [`AsyncEventStream`]
//! (`futures::Stream`). A `done` event ends either stream without being
//! yielded; an `error` event is yielded as [`Error::Stream`] and ends it.
//! Both release the connection on [`close`](EventStream::close), on drop,
//! and as soon as the sequence ends.

use std::collections::VecDeque;
use std::fmt;
use std::io::Read;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use reqwest::header::{CONTENT_TYPE, HeaderMap};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};

/// Lifecycle tag of a server-sent event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Output,
    Logs,
    Error,
    Done,
}

impl EventType {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "output" => Some(EventType::Output),
            "logs" => Some(EventType::Logs),
            "error" => Some(EventType::Error),
            "done" => Some(EventType::Done),
            _ => None,
        }
    }
}

/// A single event from an SSE stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSentEvent {
    /// Last event id seen on the stream, carried forward per the SSE rules.
    pub id: Option<String>,
    pub event: EventType,
    /// Data lines joined with `\n`.
    pub data: String,
    /// Reconnection delay hint in milliseconds.
    pub retry: Option<u64>,
}

impl fmt::Display for ServerSentEvent {
    /// Output events render as their data, everything else as nothing, so
    /// printing a stream prints the model's text.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.event == EventType::Output {
            f.write_str(&self.data)
        } else {
            Ok(())
        }
    }
}

/// Incremental decoder for the SSE text framing.
///
/// Accepts arbitrary byte chunks (lines and UTF-8 sequences may straddle
/// chunk boundaries) and returns the events completed by each chunk.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
    last_event_id: Option<String>,
    retry: Option<u64>,
    /// The last chunk ended in `\r`; a leading `\n` of the next one belongs to it.
    after_cr: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk; returns every event it completes, in order. Lines end
    /// at `\n`, `\r\n` or a bare `\r`.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<ServerSentEvent> {
        let mut chunk = chunk;
        if self.after_cr && !chunk.is_empty() {
            self.after_cr = false;
            chunk = chunk.strip_prefix(b"\n").unwrap_or(chunk);
        }
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| matches!(b, b'\n' | b'\r')) {
            let mut raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            if raw.pop() == Some(b'\r') {
                match self.buffer.first() {
                    Some(b'\n') => {
                        self.buffer.remove(0);
                    }
                    Some(_) => {}
                    None => self.after_cr = true,
                }
            }
            let line = String::from_utf8_lossy(&raw);
            if let Some(event) = self.decode_line(&line) {
                events.push(event);
            }
        }
        events
    }

    /// Flush at end of input: a trailing unterminated line is decoded and a
    /// pending event is dispatched as if a blank line followed.
    pub fn finish(&mut self) -> Vec<ServerSentEvent> {
        let mut events = Vec::new();
        self.after_cr = false;
        if !self.buffer.is_empty() {
            let raw = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&raw);
            if let Some(event) = self.decode_line(&line) {
                events.push(event);
            }
        }
        if let Some(event) = self.dispatch() {
            events.push(event);
        }
        events
    }

    fn decode_line(&mut self, line: &str) -> Option<ServerSentEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            "id" => {
                if !value.contains('\0') {
                    self.last_event_id = Some(value.to_string());
                }
            }
            "retry" => {
                if let Ok(ms) = value.parse() {
                    self.retry = Some(ms);
                }
            }
            other => trace!("Ignoring unknown SSE field {other:?}"),
        }
        None
    }

    fn dispatch(&mut self) -> Option<ServerSentEvent> {
        let name = self.event.take();
        let data = std::mem::take(&mut self.data);
        let retry = self.retry.take();
        if name.is_none() && data.is_empty() {
            return None;
        }
        let event = match name.as_deref() {
            None => EventType::Output,
            Some(name) => match EventType::parse(name) {
                Some(event) => event,
                None => {
                    debug!("Skipping SSE event of unknown type {name:?}");
                    return None;
                }
            },
        };
        Some(ServerSentEvent {
            id: self.last_event_id.clone(),
            event,
            data: data.join("\n"),
            retry,
        })
    }
}

/// Reject responses that are not an event stream.
pub(crate) fn check_event_stream(headers: &HeaderMap) -> Result<()> {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let mime = content_type.split(';').next().unwrap_or("").trim();
    if mime.eq_ignore_ascii_case("text/event-stream") {
        Ok(())
    } else {
        Err(Error::Stream(format!(
            "expected response Content-Type to be 'text/event-stream', got {mime:?}"
        )))
    }
}

/// Queue of decoded events plus the termination rules shared by both streams.
#[derive(Debug, Default)]
struct EventQueue {
    decoder: SseDecoder,
    pending: VecDeque<ServerSentEvent>,
    completed: bool,
}

enum Step {
    Yield(Result<ServerSentEvent>),
    End,
    NeedMore,
}

impl EventQueue {
    fn next_step(&mut self) -> Step {
        match self.pending.pop_front() {
            Some(event) if event.event == EventType::Done => {
                self.completed = true;
                self.pending.clear();
                Step::End
            }
            Some(event) if event.event == EventType::Error => {
                self.pending.clear();
                Step::Yield(Err(Error::Stream(event.data)))
            }
            Some(event) => Step::Yield(Ok(event)),
            None => Step::NeedMore,
        }
    }

    fn push_chunk(&mut self, chunk: &[u8]) {
        self.pending.extend(self.decoder.feed(chunk));
    }

    fn push_eof(&mut self) {
        self.pending.extend(self.decoder.finish());
    }
}

/// Blocking event stream over an open connection.
pub struct EventStream {
    response: Option<reqwest::blocking::Response>,
    queue: EventQueue,
}

impl EventStream {
    pub(crate) fn new(response: reqwest::blocking::Response) -> Self {
        debug!("Opened event stream {}", response.url());
        Self {
            response: Some(response),
            queue: EventQueue::default(),
        }
    }

    /// Release the connection. Further calls to `next` return `None`.
    pub fn close(&mut self) {
        if self.response.take().is_some() {
            debug!("Closed event stream");
        }
        self.queue.pending.clear();
    }

    /// Whether the stream ended with a `done` event rather than a dropped
    /// connection or an explicit close.
    pub fn completed(&self) -> bool {
        self.queue.completed
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("open", &self.response.is_some())
            .field("completed", &self.queue.completed)
            .finish_non_exhaustive()
    }
}

impl Iterator for EventStream {
    type Item = Result<ServerSentEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut buf = [0u8; 8192];
        loop {
            match self.queue.next_step() {
                Step::Yield(Ok(event)) => return Some(Ok(event)),
                Step::Yield(Err(e)) => {
                    self.close();
                    return Some(Err(e));
                }
                Step::End => {
                    self.close();
                    return None;
                }
                Step::NeedMore => {}
            }
            let response = self.response.as_mut()?;
            match response.read(&mut buf) {
                Ok(0) => {
                    self.queue.push_eof();
                    self.response = None;
                    if self.queue.pending.is_empty() {
                        debug!("Event stream closed by server");
                        return None;
                    }
                }
                Ok(n) => self.queue.push_chunk(&buf[..n]),
                Err(e) => {
                    warn!("Event stream connection lost: {e}");
                    self.close();
                    return Some(Err(Error::Stream(format!("connection lost: {e}"))));
                }
            }
        }
    }
}

type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

/// Async event stream over an open connection.
pub struct AsyncEventStream {
    body: Option<ByteStream>,
    queue: EventQueue,
}

impl AsyncEventStream {
    pub(crate) fn new(response: reqwest::Response) -> Self {
        debug!("Opened event stream {}", response.url());
        Self {
            body: Some(Box::pin(response.bytes_stream())),
            queue: EventQueue::default(),
        }
    }

    /// Release the connection. The stream yields nothing afterwards.
    pub fn close(&mut self) {
        if self.body.take().is_some() {
            debug!("Closed event stream");
        }
        self.queue.pending.clear();
    }

    pub fn completed(&self) -> bool {
        self.queue.completed
    }
}

impl fmt::Debug for AsyncEventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncEventStream")
            .field("open", &self.body.is_some())
            .field("completed", &self.queue.completed)
            .finish_non_exhaustive()
    }
}

impl Stream for AsyncEventStream {
    type Item = Result<ServerSentEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match self.queue.next_step() {
                Step::Yield(Ok(event)) => return Poll::Ready(Some(Ok(event))),
                Step::Yield(Err(e)) => {
                    self.close();
                    return Poll::Ready(Some(Err(e)));
                }
                Step::End => {
                    self.close();
                    return Poll::Ready(None);
                }
                Step::NeedMore => {}
            }
            let Some(body) = self.body.as_mut() else {
                return Poll::Ready(None);
            };
            match body.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => self.queue.push_chunk(&chunk),
                Poll::Ready(Some(Err(e))) => {
                    warn!("Event stream connection lost: {e}");
                    self.close();
                    return Poll::Ready(Some(Err(Error::Stream(format!("connection lost: {e}")))));
                }
                Poll::Ready(None) => {
                    self.queue.push_eof();
                    self.body = None;
                    if self.queue.pending.is_empty() {
                        debug!("Event stream closed by server");
                        return Poll::Ready(None);
                    }
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
