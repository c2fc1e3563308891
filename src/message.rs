//! The in-flight assistant reply and the state machine that grows it.

use serde::Serialize;

use crate::config::ErrorDisplay;
use crate::dispatch::EventHandler;
use crate::error::ClientError;

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Assistant,
}

/// Why a message stopped streaming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FinishReason {
    /// The service sent its completion marker.
    Done,
    /// The service or the transport reported a failure.
    Error,
    /// The response ended without a completion marker.
    Eof,
    /// The caller cancelled the stream.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssembledMessage {
    id: String,
    session_id: String,
    agent_id: String,
    sender: Sender,
    content: String,
    fragments: usize,
    streaming: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    finish_reason: Option<FinishReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl AssembledMessage {
    /// A user message; complete from the start.
    #[must_use]
    pub fn user(
        id: impl Into<String>,
        session_id: impl Into<String>,
        agent_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            session_id: session_id.into(),
            agent_id: agent_id.into(),
            sender: Sender::User,
            content: text.into(),
            fragments: 1,
            streaming: false,
            finish_reason: Some(FinishReason::Done),
            error: None,
        }
    }

    /// An empty assistant reply, open for streaming.
    #[must_use]
    pub fn assistant(
        id: impl Into<String>,
        session_id: impl Into<String>,
        agent_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            session_id: session_id.into(),
            agent_id: agent_id.into(),
            sender: Sender::Assistant,
            content: String::new(),
            fragments: 0,
            streaming: true,
            finish_reason: None,
            error: None,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    #[must_use]
    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    #[must_use]
    pub fn sender(&self) -> Sender {
        self.sender
    }

    /// All fragments so far, concatenated in arrival order.
    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Number of token fragments appended.
    #[must_use]
    pub fn fragments(&self) -> usize {
        self.fragments
    }

    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    #[must_use]
    pub fn finish_reason(&self) -> Option<FinishReason> {
        self.finish_reason
    }

    /// The failure message, for replies closed by an error.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

/// Re-render trigger for the UI layer.
pub trait MessageObserver {
    fn on_update(&mut self, message: &AssembledMessage);
}

/// Observer that ignores updates.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl MessageObserver for NoopObserver {
    fn on_update(&mut self, _message: &AssembledMessage) {}
}

impl<F> MessageObserver for F
where
    F: FnMut(&AssembledMessage),
{
    fn on_update(&mut self, message: &AssembledMessage) {
        self(message);
    }
}

/// Owns the single in-flight reply: `Open -> (Token)* -> Closed`.
///
/// Only `Done`, `Error`, end-of-stream and cancellation close the message.
/// A closed message rejects every mutation.
///
/// On error the reply content is rewritten according to [`ErrorDisplay`]:
/// `Replace` shows only `Error: <message>`, `Append` keeps what streamed and
/// adds the same line after a blank line.
#[derive(Debug)]
pub struct MessageAssembler {
    message: AssembledMessage,
    error_display: ErrorDisplay,
    render_pending: bool,
}

impl MessageAssembler {
    #[must_use]
    pub fn new(message: AssembledMessage, error_display: ErrorDisplay) -> Self {
        Self {
            message,
            error_display,
            render_pending: false,
        }
    }

    #[must_use]
    pub fn message(&self) -> &AssembledMessage {
        &self.message
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        !self.message.streaming
    }

    /// Append one token to the reply.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::MessageClosed`] once the reply is closed.
    pub fn append_token(&mut self, text: &str) -> Result<(), ClientError> {
        self.ensure_open()?;
        self.message.content.push_str(text);
        self.message.fragments += 1;
        self.render_pending = true;
        Ok(())
    }

    /// Close the reply with an error, rewriting content per the display policy.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::MessageClosed`] once the reply is closed.
    pub fn fail(&mut self, message: &str) -> Result<(), ClientError> {
        self.ensure_open()?;
        let diagnostic = format!("Error: {message}");
        match self.error_display {
            ErrorDisplay::Replace => self.message.content = diagnostic,
            ErrorDisplay::Append => {
                if !self.message.content.is_empty() {
                    self.message.content.push_str("\n\n");
                }
                self.message.content.push_str(&diagnostic);
            }
        }
        self.message.error = Some(message.to_owned());
        self.close(FinishReason::Error);
        Ok(())
    }

    /// Close the reply without touching its content.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::MessageClosed`] once the reply is closed.
    pub fn complete(&mut self, reason: FinishReason) -> Result<(), ClientError> {
        self.ensure_open()?;
        self.close(reason);
        Ok(())
    }

    /// Whether content or state changed since the last call.
    pub fn take_render_pending(&mut self) -> bool {
        std::mem::take(&mut self.render_pending)
    }

    #[must_use]
    pub fn into_message(self) -> AssembledMessage {
        self.message
    }

    fn ensure_open(&self) -> Result<(), ClientError> {
        if self.message.streaming {
            Ok(())
        } else {
            Err(ClientError::MessageClosed {
                id: self.message.id.clone(),
            })
        }
    }

    fn close(&mut self, reason: FinishReason) {
        self.message.streaming = false;
        self.message.finish_reason = Some(reason);
        self.render_pending = true;
    }
}

impl EventHandler for MessageAssembler {
    fn on_token(&mut self, text: &str) {
        if let Err(err) = self.append_token(text) {
            tracing::warn!(error = %err, "token for closed message dropped");
        }
    }

    fn on_error(&mut self, message: &str) {
        if let Err(err) = self.fail(message) {
            tracing::warn!(error = %err, "error for closed message dropped");
        }
    }

    fn on_done(&mut self) {
        if let Err(err) = self.complete(FinishReason::Done) {
            tracing::warn!(error = %err, "completion for closed message dropped");
        }
    }
}
