pub mod classify;
pub mod decode;
pub mod lines;

pub use classify::{classify, LineClassifier};
pub use decode::Utf8Decoder;
pub use lines::LineBuffer;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use smallvec::SmallVec;

use crate::error::ClientError;

/// One dispatchable unit recovered from the response stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedEvent {
    /// Content to append to the in-progress reply.
    Token(String),
    /// The service reported a failure; terminal.
    Error(String),
    /// The service finished the reply; terminal.
    Done,
}

/// Counters describing how much of the stream has been decoded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeStats {
    pub bytes: u64,
    pub lines: u64,
    pub events: u64,
}

/// Synchronous bytes-to-events pipeline: decoder, line buffer, classifier.
///
/// Splitting the same input into different chunks yields the same events.
/// Lines are classified one at a time, except for an SSE error block: an
/// `event: error` field collects the `data:` lines after it until the blank
/// line ending the block, and the block becomes one `Error` event.
#[derive(Debug)]
pub struct EventDecoder {
    decoder: Utf8Decoder,
    lines: LineBuffer,
    classifier: LineClassifier,
    text: String,
    completed: Vec<String>,
    error_block: Option<String>,
    stats: DecodeStats,
}

impl Default for EventDecoder {
    fn default() -> Self {
        Self::new(LineClassifier::default())
    }
}

impl EventDecoder {
    #[must_use]
    pub fn new(classifier: LineClassifier) -> Self {
        Self {
            decoder: Utf8Decoder::new(),
            lines: LineBuffer::new(),
            classifier,
            text: String::new(),
            completed: Vec::new(),
            error_block: None,
            stats: DecodeStats::default(),
        }
    }

    /// Feed one raw chunk and return the events it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<ParsedEvent> {
        let mut out = Vec::new();
        self.feed_into(chunk, &mut out);
        out
    }

    /// Feed one raw chunk, appending completed events to `out` in order.
    pub fn feed_into(&mut self, chunk: &[u8], out: &mut Vec<ParsedEvent>) {
        self.stats.bytes += chunk.len() as u64;
        self.text.clear();
        self.decoder.decode_into(chunk, &mut self.text);
        self.lines.push_into(&self.text, &mut self.completed);
        self.classify_completed(out);
    }

    /// Flush the decoder and the pending partial line at end of stream.
    pub fn finish(&mut self) -> Vec<ParsedEvent> {
        let mut out = Vec::new();
        self.finish_into(&mut out);
        out
    }

    pub fn finish_into(&mut self, out: &mut Vec<ParsedEvent>) {
        if let Some(tail) = self.decoder.finish() {
            self.lines.push_into(&tail, &mut self.completed);
        }
        if let Some(last) = self.lines.finish() {
            self.completed.push(last);
        }
        self.classify_completed(out);
        self.flush_error_block(out);
    }

    #[must_use]
    pub fn stats(&self) -> DecodeStats {
        self.stats
    }

    fn classify_completed(&mut self, out: &mut Vec<ParsedEvent>) {
        let mut completed = std::mem::take(&mut self.completed);
        for line in completed.drain(..) {
            self.classify_line(&line, out);
        }
        self.completed = completed;
    }

    fn classify_line(&mut self, line: &str, out: &mut Vec<ParsedEvent>) {
        self.stats.lines += 1;
        if self.classifier.is_error_field(line) {
            self.flush_error_block(out);
            self.error_block = Some(String::new());
            return;
        }

        let event = self.classifier.classify(line);
        let Some(block) = self.error_block.as_mut() else {
            if let Some(event) = event {
                self.emit(event, out);
            }
            return;
        };
        if line.trim().is_empty() {
            self.flush_error_block(out);
            return;
        }
        match event {
            Some(ParsedEvent::Token(text) | ParsedEvent::Error(text)) => {
                if !block.is_empty() {
                    block.push('\n');
                }
                block.push_str(&text);
            }
            Some(ParsedEvent::Done) => {
                self.flush_error_block(out);
                self.emit(ParsedEvent::Done, out);
            }
            None => {}
        }
    }

    fn flush_error_block(&mut self, out: &mut Vec<ParsedEvent>) {
        if let Some(message) = self.error_block.take() {
            let message = if message.is_empty() {
                classify::UNKNOWN_ERROR.to_owned()
            } else {
                message
            };
            self.emit(ParsedEvent::Error(message), out);
        }
    }

    #[inline]
    fn emit(&mut self, event: ParsedEvent, out: &mut Vec<ParsedEvent>) {
        self.stats.events += 1;
        out.push(event);
    }
}

/// Events decoded but not yet yielded, stored in reverse so `pop` is in order.
struct PendingEvents {
    events: SmallVec<[ParsedEvent; 8]>,
}

impl PendingEvents {
    fn new() -> Self {
        Self {
            events: SmallVec::new(),
        }
    }

    #[inline]
    fn pop_front(&mut self) -> Option<ParsedEvent> {
        self.events.pop()
    }

    #[inline]
    fn extend_from_vec(&mut self, parsed: &mut Vec<ParsedEvent>) {
        if parsed.is_empty() {
            return;
        }
        debug_assert!(self.events.is_empty());
        self.events.extend(parsed.drain(..).rev());
    }
}

struct EventStreamState<S> {
    stream: std::pin::Pin<Box<S>>,
    decoder: EventDecoder,
    parsed: Vec<ParsedEvent>,
    pending: PendingEvents,
    finished: bool,
}

/// Turn a response byte stream into a pull-based stream of events.
///
/// Events are yielded in arrival order. At end of stream the pending partial
/// line is flushed through the classifier. A failure of the byte stream is
/// yielded once, converted to [`ClientError`], after which the stream ends;
/// the incomplete tail before the failure is discarded.
pub fn event_stream<S, E>(
    byte_stream: S,
    classifier: LineClassifier,
) -> impl Stream<Item = Result<ParsedEvent, ClientError>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
    ClientError: From<E>,
{
    futures_util::stream::unfold(
        EventStreamState {
            stream: Box::pin(byte_stream),
            decoder: EventDecoder::new(classifier),
            parsed: Vec::with_capacity(8),
            pending: PendingEvents::new(),
            finished: false,
        },
        |mut state| async move {
            loop {
                if let Some(event) = state.pending.pop_front() {
                    return Some((Ok(event), state));
                }
                if state.finished {
                    return None;
                }

                match state.stream.as_mut().next().await {
                    Some(Ok(bytes)) => {
                        state.decoder.feed_into(&bytes, &mut state.parsed);
                    }
                    Some(Err(err)) => {
                        state.finished = true;
                        let stats = state.decoder.stats();
                        tracing::debug!(error = %err, bytes = stats.bytes, "response stream failed");
                        return Some((Err(ClientError::from(err)), state));
                    }
                    None => {
                        state.finished = true;
                        state.decoder.finish_into(&mut state.parsed);
                    }
                }
                state.pending.extend_from_vec(&mut state.parsed);
            }
        },
    )
}
