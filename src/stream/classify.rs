//! Line classification and payload parsing.
//!
//! One logical line maps to at most one [`ParsedEvent`]. Precedence:
//!
//! 1. blank line: no event
//! 2. the completion sentinel on its own: `Done`
//! 3. strip the data prefix if present, otherwise use the whole line
//! 4. empty payload (keep-alive framing): no event
//! 5. sentinel payload: `Done`
//! 6. JSON object: `event` discriminator first, then `text`, then `data`;
//!    anything that is not a JSON object is taken verbatim as a token

use std::sync::LazyLock;

use serde::Deserialize;
use serde_json::Value;

use super::ParsedEvent;
use crate::config::StreamConfig;

pub(crate) const UNKNOWN_ERROR: &str = "unknown error";
const SSE_COMMENT_KEYWORDS: [&str; 2] = ["ping", "keep-alive"];

static DEFAULT_CLASSIFIER: LazyLock<LineClassifier> = LazyLock::new(LineClassifier::default);

/// Classify one line with the default framing (`[DONE]` sentinel, `data:` prefix).
#[must_use]
pub fn classify(line: &str) -> Option<ParsedEvent> {
    DEFAULT_CLASSIFIER.classify(line)
}

/// Stateless line classifier configured with the stream's framing markers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineClassifier {
    done_sentinel: String,
    data_prefix: String,
    skip_sse_fields: bool,
}

impl Default for LineClassifier {
    fn default() -> Self {
        Self::new(&StreamConfig::default())
    }
}

impl LineClassifier {
    #[must_use]
    pub fn new(config: &StreamConfig) -> Self {
        Self {
            done_sentinel: config.done_sentinel.trim().to_string(),
            data_prefix: config.data_prefix.trim().to_string(),
            skip_sse_fields: config.skip_sse_fields,
        }
    }

    /// Map one logical line to an event. Pure: the result depends on `line` only.
    #[must_use]
    pub fn classify(&self, line: &str) -> Option<ParsedEvent> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }
        if trimmed == self.done_sentinel {
            return Some(ParsedEvent::Done);
        }

        let payload = match trimmed.strip_prefix(self.data_prefix.as_str()) {
            Some(rest) => rest.trim(),
            None if self.skip_sse_fields && is_sse_framing(trimmed) => return None,
            None => trimmed,
        };
        if payload.is_empty() {
            return None;
        }
        if payload == self.done_sentinel {
            return Some(ParsedEvent::Done);
        }

        parse_payload(payload)
    }

    /// True for an `event: error` field line, which opens an SSE error block.
    #[must_use]
    pub fn is_error_field(&self, line: &str) -> bool {
        self.skip_sse_fields
            && matches!(sse_field(line.trim()), Some(SseField::Event("error")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SseField<'a> {
    Comment,
    Event(&'a str),
    Id,
    Retry,
}

/// Recognise the SSE framing lines an event-stream server emits.
///
/// Only exact shapes count: a bare `:` or a `: ping`-style keep-alive
/// comment, `event:` with a single-word name, `id:` and `retry:` with a
/// numeric value. Anything else is left to the content path.
fn sse_field(line: &str) -> Option<SseField<'_>> {
    if let Some(comment) = line.strip_prefix(':') {
        let comment = comment.trim_start();
        let keyword = comment
            .split(|c: char| c.is_whitespace())
            .next()
            .unwrap_or_default();
        return (comment.is_empty() || SSE_COMMENT_KEYWORDS.contains(&keyword))
            .then_some(SseField::Comment);
    }

    let (name, value) = line.split_once(':')?;
    let value = value.trim();
    match name {
        "event" if is_event_name(value) => Some(SseField::Event(value)),
        "id" if is_numeric(value) => Some(SseField::Id),
        "retry" if is_numeric(value) => Some(SseField::Retry),
        _ => None,
    }
}

fn is_sse_framing(line: &str) -> bool {
    sse_field(line).is_some()
}

fn is_event_name(value: &str) -> bool {
    !value.is_empty()
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.'))
}

fn is_numeric(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit())
}

/// JSON envelope emitted by the agent service.
///
/// Fields are kept as raw values so a wrongly-typed field reads as absent
/// instead of failing the whole object. `metadata` is informational and
/// not decoded.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    text: Option<Value>,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    event: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EnvelopeKind {
    End,
    Error,
    Content,
}

impl Envelope {
    fn kind(&self) -> EnvelopeKind {
        match self.event.as_ref().and_then(Value::as_str) {
            Some("end") => EnvelopeKind::End,
            Some("error") => EnvelopeKind::Error,
            _ => EnvelopeKind::Content,
        }
    }

    fn text(&self) -> Option<&str> {
        self.text.as_ref().and_then(Value::as_str)
    }

    fn data(&self) -> Option<&str> {
        self.data.as_ref().and_then(Value::as_str)
    }
}

fn parse_payload(payload: &str) -> Option<ParsedEvent> {
    // Arrays and scalars are not envelopes; skip the JSON parser for them.
    if !payload.starts_with('{') {
        return Some(ParsedEvent::Token(payload.to_owned()));
    }
    let envelope = match serde_json::from_str::<Envelope>(payload) {
        Ok(envelope) => envelope,
        Err(err) => {
            tracing::trace!(error = %err, "payload is not a JSON envelope, using plain text");
            return Some(ParsedEvent::Token(payload.to_owned()));
        }
    };

    match envelope.kind() {
        EnvelopeKind::End => Some(ParsedEvent::Done),
        EnvelopeKind::Error => {
            let message = envelope
                .text()
                .or_else(|| envelope.data())
                .unwrap_or(UNKNOWN_ERROR);
            Some(ParsedEvent::Error(message.to_owned()))
        }
        EnvelopeKind::Content => match envelope.text().or_else(|| envelope.data()) {
            Some(text) => Some(ParsedEvent::Token(text.to_owned())),
            None => {
                tracing::trace!("envelope without content field, no event");
                None
            }
        },
    }
}
