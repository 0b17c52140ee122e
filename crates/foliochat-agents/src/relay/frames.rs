//! Transport framing for streamed responses.
//!
//! Providers differ in how they frame a stream (server-sent events or one JSON
//! document per line) and, separately, in the JSON envelope inside each frame.
//! This module only deals with the first concern: it turns arbitrary byte
//! chunks into complete frame payloads and holds partial frames over until the
//! rest arrives.

use std::collections::VecDeque;
use std::fmt;

use bytes::Bytes;
use foliochat_common::{Error, Result};
use futures::{Stream, StreamExt, stream};

use crate::providers::{LlmStream, StreamEvent};

/// Terminal marker used by OpenAI-compatible SSE streams.
const SSE_DONE: &str = "[DONE]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Blank-line delimited events made of `data:` lines.
    ServerSentEvents,
    /// Newline-delimited JSON documents.
    JsonLines,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Data(String),
    /// Explicit end-of-stream marker.
    Done,
}

/// Incremental frame decoder. Feed it chunks in arrival order.
#[derive(Debug)]
pub struct FrameDecoder {
    framing: Framing,
    buffer: Vec<u8>,
    /// `data:` lines of the SSE event being assembled.
    event_data: Vec<String>,
}

impl FrameDecoder {
    pub fn new(framing: Framing) -> Self {
        Self {
            framing,
            buffer: Vec::new(),
            event_data: Vec::new(),
        }
    }

    /// Append a chunk and return every frame it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line[..line.len() - 1]);
            self.take_line(line.trim_end_matches('\r'), &mut frames);
        }
        frames
    }

    /// Flush whatever is left once the transport closed cleanly.
    pub fn finish(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&rest);
            self.take_line(line.trim_end_matches('\r'), &mut frames);
        }
        if self.framing == Framing::ServerSentEvents {
            self.dispatch_event(&mut frames);
        }
        frames
    }

    fn take_line(&mut self, line: &str, frames: &mut Vec<Frame>) {
        match self.framing {
            Framing::JsonLines => {
                let line = line.trim();
                if !line.is_empty() {
                    frames.push(Frame::Data(line.to_string()));
                }
            }
            Framing::ServerSentEvents => {
                if line.is_empty() {
                    self.dispatch_event(frames);
                } else if let Some(data) = line.strip_prefix("data:") {
                    let data = data.strip_prefix(' ').unwrap_or(data);
                    self.event_data.push(data.to_string());
                }
                // `event:`, `id:`, `retry:` and `:` comment lines carry nothing we use.
            }
        }
    }

    fn dispatch_event(&mut self, frames: &mut Vec<Frame>) {
        if self.event_data.is_empty() {
            return;
        }
        let data = self.event_data.join("\n");
        self.event_data.clear();
        if data.trim() == SSE_DONE {
            frames.push(Frame::Done);
        } else {
            frames.push(Frame::Data(data));
        }
    }
}

/// Why a frame payload produced no events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Not a payload this provider sends.
    Malformed(String),
    /// The provider reported a failure inside the stream. `status` is the HTTP
    /// status the same failure carries outside a stream, when the event names one.
    Upstream { status: Option<u16>, message: String },
}

impl From<String> for FrameError {
    fn from(message: String) -> Self {
        Self::Malformed(message)
    }
}

impl FrameError {
    fn into_error(self, provider: &str) -> Error {
        match self {
            Self::Malformed(message) => Error::malformed(provider, message),
            Self::Upstream {
                status: Some(status),
                message,
            } => Error::provider_status(provider, status, &message),
            Self::Upstream {
                status: None,
                message,
            } => Error::interrupted(provider, message),
        }
    }
}

/// Provider-specific decoding of one frame payload.
pub type EnvelopeParser = fn(&str) -> std::result::Result<Vec<StreamEvent>, FrameError>;

struct DecodeState<S> {
    bytes: std::pin::Pin<Box<S>>,
    decoder: FrameDecoder,
    parse: EnvelopeParser,
    provider: String,
    pending: VecDeque<Result<StreamEvent>>,
    closed: bool,
}

impl<S> DecodeState<S> {
    fn enqueue(&mut self, frames: Vec<Frame>) {
        for frame in frames {
            match frame {
                Frame::Done => self.pending.push_back(Ok(StreamEvent::Done { stop_reason: None })),
                Frame::Data(payload) => match (self.parse)(&payload) {
                    Ok(events) => self.pending.extend(events.into_iter().map(Ok)),
                    Err(err) => {
                        self.pending.push_back(Err(err.into_error(&self.provider)));
                        self.closed = true;
                        return;
                    }
                },
            }
        }
    }
}

/// Decode a byte stream into provider-neutral events.
///
/// A transport error ends the stream with [`Error::StreamInterrupted`]; an
/// unparseable frame ends it with [`Error::MalformedResponse`]; an error the
/// provider reports in-stream ends it as described by [`FrameError::Upstream`].
/// A clean close flushes any trailing frame.
pub fn decode_stream<S, E>(
    provider: &str,
    bytes: S,
    framing: Framing,
    parse: EnvelopeParser,
) -> LlmStream
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: fmt::Display + Send + 'static,
{
    let state = DecodeState {
        bytes: Box::pin(bytes),
        decoder: FrameDecoder::new(framing),
        parse,
        provider: provider.to_string(),
        pending: VecDeque::new(),
        closed: false,
    };

    Box::pin(stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.closed {
                return None;
            }
            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    let frames = state.decoder.push(&chunk);
                    state.enqueue(frames);
                }
                Some(Err(e)) => {
                    state.closed = true;
                    let err = Error::interrupted(&state.provider, e.to_string());
                    return Some((Err(err), state));
                }
                None => {
                    let frames = state.decoder.finish();
                    state.enqueue(frames);
                    state.closed = true;
                }
            }
        }
    }))
}
