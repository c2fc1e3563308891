//! Lifecycle of one request/response stream and per-conversation admission.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{Stream, StreamExt};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::dispatch::{Dispatcher, Terminal};
use crate::error::ClientError;
use crate::message::{AssembledMessage, FinishReason, MessageAssembler, MessageObserver};
use crate::stream::ParsedEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Closed,
}

/// Requests cancellation of a stream. Cloneable, idempotent, never fails.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    /// Stop the read loop at its next suspension point.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once cancellation has been requested.
    pub fn cancelled(&self) -> tokio_util::sync::WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }
}

#[derive(Debug, Default)]
struct InFlightSlot {
    active: Mutex<Option<CancellationToken>>,
}

/// Holds the conversation's in-flight slot until the session closes.
#[derive(Debug)]
struct InFlightPermit {
    slot: Arc<InFlightSlot>,
}

impl Drop for InFlightPermit {
    fn drop(&mut self) {
        *self.slot.active.lock() = None;
    }
}

/// Cancels whatever stream is in flight for a conversation, if any.
#[derive(Debug, Clone)]
pub struct ConversationCanceller {
    slot: Arc<InFlightSlot>,
}

impl ConversationCanceller {
    /// Returns whether a stream was in flight.
    pub fn cancel(&self) -> bool {
        match self.slot.active.lock().as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

/// One logical exchange with an agent, spanning many request/response pairs.
///
/// At most one stream may be open per conversation; a second send while one
/// is open is rejected with [`ClientError::StreamInFlight`]. History lives in
/// memory only.
#[derive(Debug)]
pub struct Conversation {
    session_id: String,
    agent_id: String,
    user_id: String,
    slot: Arc<InFlightSlot>,
    history: Vec<AssembledMessage>,
}

impl Conversation {
    #[must_use]
    pub fn new(
        session_id: impl Into<String>,
        agent_id: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            agent_id: agent_id.into(),
            user_id: user_id.into(),
            slot: Arc::new(InFlightSlot::default()),
            history: Vec::new(),
        }
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
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Whether a stream is currently open for this conversation.
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.slot.active.lock().is_some()
    }

    /// Open a stream session, or reject if one is already open.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::StreamInFlight`] while another session is open.
    pub fn open_session(&self) -> Result<StreamSession, ClientError> {
        let token = {
            let mut active = self.slot.active.lock();
            if active.is_some() {
                return Err(ClientError::StreamInFlight {
                    session_id: self.session_id.clone(),
                });
            }
            let token = CancellationToken::new();
            *active = Some(token.clone());
            token
        };
        tracing::debug!(session_id = %self.session_id, agent_id = %self.agent_id, "stream session opened");
        Ok(StreamSession {
            session_id: self.session_id.clone(),
            agent_id: self.agent_id.clone(),
            user_id: self.user_id.clone(),
            state: SessionState::Open,
            cancel: token,
            permit: Some(InFlightPermit {
                slot: Arc::clone(&self.slot),
            }),
        })
    }

    #[must_use]
    pub fn canceller(&self) -> ConversationCanceller {
        ConversationCanceller {
            slot: Arc::clone(&self.slot),
        }
    }

    /// Append finished messages to the in-memory history.
    pub fn record(&mut self, messages: impl IntoIterator<Item = AssembledMessage>) {
        self.history.extend(messages);
    }

    #[must_use]
    pub fn history(&self) -> &[AssembledMessage] {
        &self.history
    }
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The service sent its completion marker.
    Completed,
    /// The response ended cleanly without a completion marker.
    EndOfStream,
    /// The service reported an error in the stream.
    UpstreamError(String),
    /// Connecting, status, or reading the body failed.
    TransportFailure(String),
    Cancelled,
    /// `run` was called again on a session that had already closed. The
    /// events and the message were left untouched.
    AlreadyClosed,
}

impl SessionOutcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, SessionOutcome::Completed | SessionOutcome::EndOfStream)
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            SessionOutcome::Completed => "completed",
            SessionOutcome::EndOfStream => "end_of_stream",
            SessionOutcome::UpstreamError(_) => "upstream_error",
            SessionOutcome::TransportFailure(_) => "transport_failure",
            SessionOutcome::Cancelled => "cancelled",
            SessionOutcome::AlreadyClosed => "already_closed",
        }
    }
}

/// Summary of a closed session.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub message: AssembledMessage,
    pub outcome: SessionOutcome,
    pub tokens: u64,
    pub suppressed: u64,
    pub elapsed: Duration,
}

enum ReadStep<T> {
    Cancelled,
    Next(Option<T>),
}

/// One request/response stream: `Open` until a terminal event, end of
/// stream, or cancellation, then `Closed`.
#[derive(Debug)]
pub struct StreamSession {
    session_id: String,
    agent_id: String,
    user_id: String,
    state: SessionState,
    cancel: CancellationToken,
    permit: Option<InFlightPermit>,
}

impl StreamSession {
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    #[must_use]
    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            token: self.cancel.clone(),
        }
    }

    /// Cancel this session. Safe before, during and after the read loop.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Drive the read loop until the session closes.
    ///
    /// Events are dispatched to `assembler` one at a time in arrival order;
    /// `observer` is notified after every change. A stream failure is routed
    /// through the error path exactly like an upstream error. A stream that
    /// ends without a terminal event closes the message as
    /// [`FinishReason::Eof`].
    pub async fn run<St, O>(
        &mut self,
        events: St,
        mut assembler: MessageAssembler,
        observer: &mut O,
    ) -> SessionReport
    where
        St: Stream<Item = Result<ParsedEvent, ClientError>>,
        O: MessageObserver + ?Sized,
    {
        let started = Instant::now();
        let mut events = std::pin::pin!(events);
        let mut dispatcher = Dispatcher::new();
        let mut transport_failure: Option<String> = None;

        let outcome = if self.state == SessionState::Closed {
            tracing::warn!(session_id = %self.session_id, "run called on a closed session");
            SessionOutcome::AlreadyClosed
        } else {
            loop {
                let step = tokio::select! {
                    biased;
                    () = self.cancel.cancelled() => ReadStep::Cancelled,
                    next = events.next() => ReadStep::Next(next),
                };
                let ReadStep::Next(next) = step else {
                    break SessionOutcome::Cancelled;
                };

                match next {
                    Some(Ok(event)) => {
                        dispatcher.dispatch(&event, &mut assembler);
                    }
                    Some(Err(err)) => {
                        let diagnostic = err.diagnostic();
                        tracing::warn!(session_id = %self.session_id, error = %err, "stream transport failed");
                        dispatcher.dispatch(&ParsedEvent::Error(diagnostic.clone()), &mut assembler);
                        transport_failure = Some(diagnostic);
                    }
                    None => break SessionOutcome::EndOfStream,
                }
                if assembler.take_render_pending() {
                    observer.on_update(assembler.message());
                }
                if let Some(terminal) = dispatcher.terminal() {
                    break match (terminal, transport_failure.take()) {
                        (Terminal::Done, _) => SessionOutcome::Completed,
                        (Terminal::Error, Some(diagnostic)) => {
                            SessionOutcome::TransportFailure(diagnostic)
                        }
                        (Terminal::Error, None) => SessionOutcome::UpstreamError(
                            assembler.message().error().unwrap_or_default().to_owned(),
                        ),
                    };
                }
            }
        };

        let close_reason = match outcome {
            SessionOutcome::Cancelled => Some(FinishReason::Cancelled),
            SessionOutcome::EndOfStream => Some(FinishReason::Eof),
            _ => None,
        };
        if let Some(reason) = close_reason {
            if assembler.complete(reason).is_ok() && assembler.take_render_pending() {
                observer.on_update(assembler.message());
            }
        }
        self.close();

        let report = SessionReport {
            message: assembler.into_message(),
            outcome,
            tokens: dispatcher.tokens(),
            suppressed: dispatcher.suppressed(),
            elapsed: started.elapsed(),
        };
        tracing::debug!(
            session_id = %self.session_id,
            outcome = report.outcome.label(),
            tokens = report.tokens,
            "stream session closed"
        );
        report
    }

    fn close(&mut self) {
        self.state = SessionState::Closed;
        self.permit.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ErrorDisplay;
    use crate::message::NoopObserver;

    fn assembler() -> MessageAssembler {
        MessageAssembler::new(
            AssembledMessage::assistant("m1", "s1", "writing"),
            ErrorDisplay::Replace,
        )
    }

    fn token(text: &str) -> Result<ParsedEvent, ClientError> {
        Ok(ParsedEvent::Token(text.to_string()))
    }

    fn conversation() -> Conversation {
        Conversation::new("s1", "writing", "u1")
    }

    #[tokio::test]
    async fn test_tokens_then_done() {
        let conv = conversation();
        let mut session = conv.open_session().unwrap();
        let events = futures_util::stream::iter(vec![token("A"), token("B"), Ok(ParsedEvent::Done)]);
        let report = session.run(events, assembler(), &mut NoopObserver).await;

        assert_eq!(report.outcome, SessionOutcome::Completed);
        assert_eq!(report.message.content(), "AB");
        assert!(!report.message.is_streaming());
        assert_eq!(report.tokens, 2);
        assert_eq!(session.state(), SessionState::Closed);
        assert!(!conv.is_streaming());
    }

    #[tokio::test]
    async fn test_events_after_terminal_are_not_read() {
        let conv = conversation();
        let mut session = conv.open_session().unwrap();
        let events = futures_util::stream::iter(vec![
            Ok(ParsedEvent::Error("rate limited".to_string())),
            Ok(ParsedEvent::Done),
            token("late"),
        ]);
        let report = session.run(events, assembler(), &mut NoopObserver).await;
        assert_eq!(
            report.outcome,
            SessionOutcome::UpstreamError("rate limited".to_string())
        );
        assert_eq!(report.message.content(), "Error: rate limited");
        assert_eq!(report.message.finish_reason(), Some(FinishReason::Error));
    }

    #[tokio::test]
    async fn test_transport_failure_goes_through_error_path() {
        let conv = conversation();
        let mut session = conv.open_session().unwrap();
        let events = futures_util::stream::iter(vec![
            token("partial"),
            Err(ClientError::Transport("connection reset".to_string())),
        ]);
        let report = session.run(events, assembler(), &mut NoopObserver).await;
        match &report.outcome {
            SessionOutcome::TransportFailure(diagnostic) => {
                assert_eq!(diagnostic, "Connection failed: connection reset");
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(
            report.message.content(),
            "Error: Connection failed: connection reset"
        );
    }

    #[tokio::test]
    async fn test_end_of_stream_without_terminal_closes_message() {
        let conv = conversation();
        let mut session = conv.open_session().unwrap();
        let events = futures_util::stream::iter(vec![token("Hello")]);
        let report = session.run(events, assembler(), &mut NoopObserver).await;
        assert_eq!(report.outcome, SessionOutcome::EndOfStream);
        assert_eq!(report.message.content(), "Hello");
        assert_eq!(report.message.finish_reason(), Some(FinishReason::Eof));
    }

    #[tokio::test]
    async fn test_observer_sees_each_token_and_close() {
        let conv = conversation();
        let mut session = conv.open_session().unwrap();
        let mut snapshots: Vec<(String, bool)> = Vec::new();
        let mut observer =
            |m: &AssembledMessage| snapshots.push((m.content().to_string(), m.is_streaming()));
        let events = futures_util::stream::iter(vec![token("A"), token("B"), Ok(ParsedEvent::Done)]);
        session.run(events, assembler(), &mut observer).await;
        assert_eq!(
            snapshots,
            vec![
                ("A".to_string(), true),
                ("AB".to_string(), true),
                ("AB".to_string(), false),
            ]
        );
    }

    #[tokio::test]
    async fn test_second_open_is_rejected_until_close() {
        let conv = conversation();
        let mut session = conv.open_session().unwrap();
        assert!(conv.is_streaming());
        assert!(matches!(
            conv.open_session(),
            Err(ClientError::StreamInFlight { .. })
        ));

        session
            .run(futures_util::stream::empty(), assembler(), &mut NoopObserver)
            .await;
        assert!(conv.open_session().is_ok());
    }

    #[tokio::test]
    async fn test_dropping_unrun_session_releases_slot() {
        let conv = conversation();
        drop(conv.open_session().unwrap());
        assert!(!conv.is_streaming());
        assert!(conv.open_session().is_ok());
    }

    #[tokio::test]
    async fn test_cancel_before_run() {
        let conv = conversation();
        let mut session = conv.open_session().unwrap();
        session.cancel();
        session.cancel();
        let events = futures_util::stream::iter(vec![token("never")]);
        let report = session.run(events, assembler(), &mut NoopObserver).await;
        assert_eq!(report.outcome, SessionOutcome::Cancelled);
        assert_eq!(report.message.content(), "");
        assert_eq!(report.message.finish_reason(), Some(FinishReason::Cancelled));
        session.cancel();
    }

    #[tokio::test]
    async fn test_cancel_during_pending_read() {
        let conv = conversation();
        let mut session = conv.open_session().unwrap();
        let handle = session.cancel_handle();
        let events = futures_util::stream::iter(vec![token("first")])
            .chain(futures_util::stream::pending());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            handle.cancel();
        });
        let report = session.run(events, assembler(), &mut NoopObserver).await;
        canceller.await.unwrap();

        assert_eq!(report.outcome, SessionOutcome::Cancelled);
        assert_eq!(report.message.content(), "first");
        assert!(!report.message.is_streaming());
        assert!(!conv.is_streaming());
    }

    #[tokio::test]
    async fn test_conversation_canceller_without_stream_is_noop() {
        let conv = conversation();
        assert!(!conv.canceller().cancel());
        let session = conv.open_session().unwrap();
        assert!(conv.canceller().cancel());
        assert!(session.cancel_handle().is_cancelled());
    }

    #[tokio::test]
    async fn test_run_on_closed_session_does_not_touch_events() {
        let conv = conversation();
        let mut session = conv.open_session().unwrap();
        session
            .run(futures_util::stream::empty(), assembler(), &mut NoopObserver)
            .await;

        let mut updates = 0_u32;
        let mut observer = |_: &AssembledMessage| updates += 1;
        let report = session
            .run(futures_util::stream::iter(vec![token("x")]), assembler(), &mut observer)
            .await;
        assert_eq!(report.outcome, SessionOutcome::AlreadyClosed);
        assert!(!report.outcome.is_success());
        assert_eq!(report.outcome.label(), "already_closed");
        assert_eq!(report.message.content(), "");
        assert!(report.message.is_streaming());
        assert_eq!(report.message.finish_reason(), None);
        assert_eq!(report.tokens, 0);
        assert_eq!(updates, 0);
    }

    #[test]
    fn test_history_records_messages() {
        let mut conv = conversation();
        conv.record([
            AssembledMessage::user("u", "s1", "writing", "hi"),
            AssembledMessage::assistant("a", "s1", "writing"),
        ]);
        assert_eq!(conv.history().len(), 2);
    }
}
