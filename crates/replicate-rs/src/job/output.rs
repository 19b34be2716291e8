//! Incremental output of iterator-typed models.
//!
//! Models whose output schema is an iterator publish a growing array while
//! they run. [`OutputCursor`] remembers how much of that array has been
//! handed out so each chunk is delivered exactly once. [`OutputKind`] reads a
//! version's OpenAPI schema to decide whether output is plain, an iterator,
//! or an iterator of strings meant to be joined into one.

use std::collections::VecDeque;

use serde_json::Value;

use super::{Job, Status};
use crate::error::ModelError;

/// How a version declares its output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputKind {
    #[default]
    Plain,
    Iterator,
    /// String chunks that read as one text when joined.
    ConcatenateIterator,
}

/// First cog release whose schemas mark iterators with `x-cog-array-type`.
const ARRAY_TYPE_SINCE: (u64, u64, u64) = (0, 3, 9);

impl OutputKind {
    /// Derive the kind from a version's `openapi_schema` and `cog_version`.
    ///
    /// Older cog releases did not tag iterators, so any top-level array
    /// output counts as one there.
    pub fn from_schema(openapi_schema: &Value, cog_version: Option<&str>) -> Self {
        let output = &openapi_schema["components"]["schemas"]["Output"];
        if output["type"] != "array" {
            return OutputKind::Plain;
        }
        let legacy = cog_version
            .and_then(parse_version)
            .is_some_and(|v| v < ARRAY_TYPE_SINCE);
        if output["x-cog-array-type"] != "iterator" && !legacy {
            return OutputKind::Plain;
        }
        if output["items"]["type"] == "string" && output["x-cog-array-display"] == "concatenate" {
            OutputKind::ConcatenateIterator
        } else {
            OutputKind::Iterator
        }
    }

    pub fn is_iterator(self) -> bool {
        !matches!(self, OutputKind::Plain)
    }

    /// Final value of a completed job. Concatenated iterators of strings
    /// become a single string; everything else is returned unchanged.
    pub fn finish(self, output: Value) -> Value {
        match (self, output) {
            (OutputKind::ConcatenateIterator, Value::Array(chunks)) => {
                let mut text = String::new();
                for chunk in chunks {
                    match chunk {
                        Value::String(s) => text.push_str(&s),
                        Value::Null => {}
                        other => text.push_str(&other.to_string()),
                    }
                }
                Value::String(text)
            }
            (_, output) => output,
        }
    }
}

/// `major.minor.patch`, ignoring any pre-release or build suffix.
fn parse_version(raw: &str) -> Option<(u64, u64, u64)> {
    let core = raw.trim().trim_start_matches('v');
    let core = core.split(['-', '+']).next()?;
    let mut parts = core.split('.').map(|p| p.parse::<u64>().ok());
    let major = parts.next()??;
    let minor = parts.next().flatten().unwrap_or(0);
    let patch = parts.next().flatten().unwrap_or(0);
    Some((major, minor, patch))
}

/// Append-only view of a growing array output.
#[derive(Debug, Clone, Default)]
pub struct OutputCursor {
    delivered: usize,
}

impl OutputCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of chunks handed out so far.
    pub fn delivered(&self) -> usize {
        self.delivered
    }

    /// Chunks of `output` not yet delivered. A non-array output counts as a
    /// single chunk, delivered once the job is `terminal`.
    pub fn advance(&mut self, output: Option<&Value>, terminal: bool) -> Vec<Value> {
        match output {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => {
                let fresh = items.get(self.delivered..).unwrap_or_default().to_vec();
                self.delivered += fresh.len();
                fresh
            }
            Some(single) => {
                if terminal && self.delivered == 0 {
                    self.delivered = 1;
                    vec![single.clone()]
                } else {
                    Vec::new()
                }
            }
        }
    }
}

/// What an output iteration should do next.
pub(crate) enum FeedStep {
    Chunk(Value),
    /// Reload the job, after the next poll delay.
    Poll,
    Failed(ModelError),
    Done,
}

/// Iteration state shared by the blocking and async output iterators.
///
/// Chunks already present are handed out before any further poll, and the
/// final output of a terminal job is drained before the iteration ends (or
/// fails, for a job that did not succeed).
#[derive(Debug, Default)]
pub(crate) struct OutputFeed {
    cursor: OutputCursor,
    pending: VecDeque<Value>,
    finished: bool,
    failure: Option<ModelError>,
}

impl OutputFeed {
    pub fn step<J: Job>(&mut self, job: &J) -> FeedStep {
        loop {
            if let Some(chunk) = self.pending.pop_front() {
                return FeedStep::Chunk(chunk);
            }
            if self.finished {
                return match self.failure.take() {
                    Some(error) => FeedStep::Failed(error),
                    None => FeedStep::Done,
                };
            }
            self.pending.extend(self.cursor.advance(job.output(), job.is_terminal()));
            if job.is_terminal() {
                self.finished = true;
                if job.status() != Status::Succeeded {
                    self.failure = Some(job.clone().into_model_error());
                }
            } else if self.pending.is_empty() {
                return FeedStep::Poll;
            }
        }
    }

    /// Stop after an error raised outside the feed (a failed reload).
    pub fn abort(&mut self) {
        self.finished = true;
        self.pending.clear();
        self.failure = None;
    }
}
