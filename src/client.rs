//! High-level client: one call per user message, plus the catalog endpoints.

use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::{stream, Stream, TryStreamExt};

use crate::config::validation::validate_config;
use crate::config::AppConfig;
use crate::error::ClientError;
use crate::identity::{new_session_id, MessageIdGenerator};
use crate::message::{AssembledMessage, MessageAssembler, MessageObserver};
use crate::observability::log_stream_complete;
use crate::protocol::{
    AgentCatalog, ChatReply, ChatRequest, HealthStatus, ModelCatalog, ServiceResponse,
};
use crate::session::{Conversation, SessionOutcome, SessionReport, StreamSession};
use crate::stream::{event_stream, LineClassifier, ParsedEvent};
use crate::transport::{Endpoint, HttpTransport};

type EventStream = Pin<Box<dyn Stream<Item = Result<ParsedEvent, ClientError>> + Send>>;

/// Result of one send: the user message and the closed assistant reply.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub user: AssembledMessage,
    pub assistant: AssembledMessage,
    pub outcome: SessionOutcome,
    pub tokens: u64,
    pub bytes: u64,
}

impl Exchange {
    fn new(user: AssembledMessage, report: SessionReport, bytes: u64) -> Self {
        Self {
            user,
            assistant: report.message,
            outcome: report.outcome,
            tokens: report.tokens,
            bytes,
        }
    }

    /// Both messages in conversation order, for [`Conversation::record`].
    #[must_use]
    pub fn into_messages(self) -> [AssembledMessage; 2] {
        [self.user, self.assistant]
    }
}

pub struct ChatClient {
    config: AppConfig,
    transport: HttpTransport,
    classifier: LineClassifier,
    ids: MessageIdGenerator,
}

impl ChatClient {
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] when the configuration is invalid.
    pub fn new(config: AppConfig) -> Result<Self, ClientError> {
        validate_config(&config)?;
        let transport = HttpTransport::new(&config.server)?;
        let classifier = LineClassifier::new(&config.stream);
        Ok(Self {
            config,
            transport,
            classifier,
            ids: MessageIdGenerator::new(),
        })
    }

    #[must_use]
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// New conversation with the configured default agent.
    #[must_use]
    pub fn conversation(&self, user_id: &str) -> Conversation {
        self.conversation_with_agent(&self.config.chat.default_agent, user_id)
    }

    #[must_use]
    pub fn conversation_with_agent(&self, agent_id: &str, user_id: &str) -> Conversation {
        Conversation::new(new_session_id(), agent_id, user_id)
    }

    /// Send `text` and stream the reply into `observer`.
    ///
    /// Failures after admission (connect, status, mid-stream) close the reply
    /// through the error path and come back as an [`Exchange`] whose outcome
    /// says what happened. Cancel through [`Conversation::canceller`].
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::StreamInFlight`] when the conversation already
    /// has an open stream.
    pub async fn send_stream<O>(
        &self,
        conversation: &Conversation,
        text: &str,
        observer: &mut O,
    ) -> Result<Exchange, ClientError>
    where
        O: MessageObserver + ?Sized,
    {
        let mut session = conversation.open_session()?;
        let (user, assembler) = self.begin(&session, text);
        observer.on_update(assembler.message());

        let request = self.request(&session, text);
        let cancel = session.cancel_handle();
        let opened = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            result = self.transport.open_stream(&request) => Some(result),
        };

        let bytes = Arc::new(AtomicU64::new(0));
        let events: EventStream = match opened {
            Some(Ok(body)) => {
                let counter = Arc::clone(&bytes);
                let counted = body.inspect_ok(move |chunk| {
                    counter.fetch_add(chunk.len() as u64, Ordering::Relaxed);
                });
                Box::pin(event_stream(counted, self.classifier.clone()))
            }
            Some(Err(err)) => Box::pin(stream::iter([Err(err)])),
            None => Box::pin(stream::empty()),
        };

        let report = session.run(events, assembler, observer).await;
        let bytes = bytes.load(Ordering::Relaxed);
        log_stream_complete(&report, bytes);
        Ok(Exchange::new(user, report, bytes))
    }

    /// Send `text` and wait for the whole reply.
    ///
    /// The reply goes through the same assembler as a streamed one: a
    /// successful reply is a single fragment, a reply flagged `error` closes
    /// the message as an error.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::StreamInFlight`] when the conversation already
    /// has an open stream.
    pub async fn send<O>(
        &self,
        conversation: &Conversation,
        text: &str,
        observer: &mut O,
    ) -> Result<Exchange, ClientError>
    where
        O: MessageObserver + ?Sized,
    {
        let mut session = conversation.open_session()?;
        let (user, assembler) = self.begin(&session, text);
        observer.on_update(assembler.message());

        let request = self.request(&session, text);
        let cancel = session.cancel_handle();
        let reply = self
            .transport
            .post_json::<_, ServiceResponse<ChatReply>>(Endpoint::Chat, &request);
        let replied = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            result = reply => Some(result),
        };

        let events: Vec<Result<ParsedEvent, ClientError>> = match replied {
            Some(Ok(response)) => match response.into_result() {
                Ok(reply) if reply.is_error() => vec![Ok(ParsedEvent::Error(reply.message))],
                Ok(reply) => vec![Ok(ParsedEvent::Token(reply.message)), Ok(ParsedEvent::Done)],
                Err(ClientError::Service(message)) => vec![Ok(ParsedEvent::Error(message))],
                Err(err) => vec![Err(err)],
            },
            Some(Err(err)) => vec![Err(err)],
            None => Vec::new(),
        };

        let report = session.run(stream::iter(events), assembler, observer).await;
        log_stream_complete(&report, 0);
        Ok(Exchange::new(user, report, 0))
    }

    /// # Errors
    ///
    /// Returns [`ClientError::Service`] when the service reports a failure,
    /// or the transport errors of [`HttpTransport::get_json`].
    pub async fn agents(&self) -> Result<AgentCatalog, ClientError> {
        self.transport
            .get_json::<ServiceResponse<AgentCatalog>>(Endpoint::Agents)
            .await?
            .into_result()
    }

    /// # Errors
    ///
    /// Returns [`ClientError::Service`] when the service reports a failure,
    /// or the transport errors of [`HttpTransport::get_json`].
    pub async fn models(&self) -> Result<ModelCatalog, ClientError> {
        self.transport
            .get_json::<ServiceResponse<ModelCatalog>>(Endpoint::Models)
            .await?
            .into_result()
    }

    /// # Errors
    ///
    /// Returns the transport errors of [`HttpTransport::get_json`].
    pub async fn health(&self) -> Result<HealthStatus, ClientError> {
        self.transport.get_json(Endpoint::Health).await
    }

    fn begin(&self, session: &StreamSession, text: &str) -> (AssembledMessage, MessageAssembler) {
        let user = AssembledMessage::user(
            self.ids.next_id(),
            session.session_id(),
            session.agent_id(),
            text,
        );
        let assistant =
            AssembledMessage::assistant(self.ids.next_id(), session.session_id(), session.agent_id());
        (
            user,
            MessageAssembler::new(assistant, self.config.chat.error_display),
        )
    }

    fn request(&self, session: &StreamSession, text: &str) -> ChatRequest {
        ChatRequest {
            message: text.to_owned(),
            chat_id: session.session_id().to_owned(),
            agent_type: session.agent_id().to_owned(),
            user_id: session.user_id().to_owned(),
            provider_name: self.config.chat.provider_name.clone(),
            model_name: self.config.chat.model_name.clone(),
        }
    }
}
