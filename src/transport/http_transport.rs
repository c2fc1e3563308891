use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures_util::{Stream, TryStreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::ServerConfig;
use crate::error::ClientError;
use crate::protocol::error_message_from_body;

/// Response body chunks as they arrive.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, ClientError>> + Send>>;

/// Bytes of a failure body kept for the error message.
const MAX_ERROR_BODY_BYTES: usize = 4096;

/// The client carries only the idle read timeout, so a stream that keeps
/// producing data runs as long as it needs. Whole-request limits are set per
/// request on the JSON calls.
fn build_reqwest_client(
    pool_max_idle_per_host: usize,
    connect_timeout: Duration,
    read_timeout: Duration,
    use_env_proxy: bool,
) -> Result<reqwest::Client, ClientError> {
    let mut builder = reqwest::Client::builder()
        .pool_max_idle_per_host(pool_max_idle_per_host)
        .tcp_nodelay(true)
        .connect_timeout(connect_timeout)
        .redirect(reqwest::redirect::Policy::none())
        .read_timeout(read_timeout);

    if !use_env_proxy {
        builder = builder.no_proxy();
    }

    builder
        .build()
        .map_err(|err| ClientError::Transport(format!("Failed to build HTTP client: {err}")))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    StreamChat,
    Chat,
    Agents,
    Models,
    Health,
}

impl Endpoint {
    const ALL: [Endpoint; 5] = [
        Endpoint::StreamChat,
        Endpoint::Chat,
        Endpoint::Agents,
        Endpoint::Models,
        Endpoint::Health,
    ];

    #[must_use]
    pub fn path(self) -> &'static str {
        match self {
            Endpoint::StreamChat => "/stream_chat",
            Endpoint::Chat => "/chat",
            Endpoint::Agents => "/agents",
            Endpoint::Models => "/models",
            Endpoint::Health => "/health",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// HTTP client for the agent service.
///
/// Endpoint URLs are resolved once at construction; the reqwest client is
/// built lazily on first use.
pub struct HttpTransport {
    client: OnceLock<Arc<reqwest::Client>>,
    endpoints: [url::Url; 5],
    pool_max_idle_per_host: usize,
    connect_timeout: Duration,
    timeout: Duration,
    use_env_proxy: bool,
}

impl HttpTransport {
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] when `base_url` and `api_prefix` do not
    /// form valid URLs.
    pub fn new(config: &ServerConfig) -> Result<Self, ClientError> {
        let root = format!(
            "{}{}",
            config.base_url.trim_end_matches('/'),
            config.api_prefix.trim_end_matches('/')
        );
        let mut endpoints = Vec::with_capacity(Endpoint::ALL.len());
        for endpoint in Endpoint::ALL {
            let raw = format!("{root}{}", endpoint.path());
            let parsed = url::Url::parse(&raw).map_err(|err| {
                crate::config::ConfigError::Validation(format!("invalid endpoint URL {raw}: {err}"))
            })?;
            endpoints.push(parsed);
        }
        let endpoints: [url::Url; 5] = endpoints
            .try_into()
            .map_err(|_| ClientError::Internal("endpoint table size mismatch".to_string()))?;

        Ok(Self {
            client: OnceLock::new(),
            endpoints,
            pool_max_idle_per_host: config.http_pool_max_idle_per_host.max(1),
            connect_timeout: Duration::from_secs(config.connect_timeout),
            timeout: Duration::from_secs(config.timeout),
            use_env_proxy: config.http_use_env_proxy,
        })
    }

    #[must_use]
    pub fn endpoint_url(&self, endpoint: Endpoint) -> &url::Url {
        &self.endpoints[endpoint.index()]
    }

    fn build_client(&self) -> Arc<reqwest::Client> {
        match build_reqwest_client(
            self.pool_max_idle_per_host,
            self.connect_timeout,
            self.timeout,
            self.use_env_proxy,
        ) {
            Ok(client) => Arc::new(client),
            Err(err) => {
                tracing::error!(error = %err, "failed to build configured reqwest client, falling back to default client");
                Arc::new(reqwest::Client::new())
            }
        }
    }

    fn client(&self) -> Arc<reqwest::Client> {
        if let Some(existing) = self.client.get() {
            return existing.clone();
        }

        let built = self.build_client();
        let _ = self.client.set(built.clone());
        self.client.get().cloned().unwrap_or(built)
    }

    /// POST `body` to the streaming endpoint and hand back the response body.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Transport`] when the request cannot be sent,
    /// [`ClientError::Timeout`] when the service stays silent too long and
    /// [`ClientError::Upstream`] for a non-2xx status. Body chunks fail the
    /// same way.
    pub async fn open_stream<B>(&self, body: &B) -> Result<ByteStream, ClientError>
    where
        B: Serialize + ?Sized,
    {
        let url = self.endpoint_url(Endpoint::StreamChat).clone();
        let response = self
            .client()
            .post(url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(body)
            .send()
            .await
            .map_err(|err| request_error(err, self.timeout))?;
        let response = check_status(response, self.timeout).await?;
        tracing::debug!(status = response.status().as_u16(), "stream opened");
        let timeout = self.timeout;
        Ok(Box::pin(
            response
                .bytes_stream()
                .map_err(move |err| request_error(err, timeout)),
        ))
    }

    /// POST `body` to `endpoint` and decode the JSON reply.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Transport`], [`ClientError::Upstream`] or
    /// [`ClientError::Decode`].
    pub async fn post_json<B, T>(&self, endpoint: Endpoint, body: &B) -> Result<T, ClientError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.endpoint_url(endpoint).clone();
        let response = self
            .client()
            .post(url)
            .timeout(self.timeout)
            .json(body)
            .send()
            .await
            .map_err(|err| request_error(err, self.timeout))?;
        let response = check_status(response, self.timeout).await?;
        decode_json(response, self.timeout).await
    }

    /// GET `endpoint` and decode the JSON reply.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Transport`], [`ClientError::Upstream`] or
    /// [`ClientError::Decode`].
    pub async fn get_json<T>(&self, endpoint: Endpoint) -> Result<T, ClientError>
    where
        T: DeserializeOwned,
    {
        let url = self.endpoint_url(endpoint).clone();
        let response = self
            .client()
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|err| request_error(err, self.timeout))?;
        let response = check_status(response, self.timeout).await?;
        decode_json(response, self.timeout).await
    }
}

/// Connect failures stay transport errors; an elapsed request or read
/// timeout is reported with the configured limit.
fn request_error(err: reqwest::Error, timeout: Duration) -> ClientError {
    if err.is_timeout() && !err.is_connect() {
        ClientError::Timeout {
            secs: timeout.as_secs(),
        }
    } else {
        ClientError::transport(err)
    }
}

async fn check_status(
    response: reqwest::Response,
    timeout: Duration,
) -> Result<reqwest::Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = read_error_body(response, timeout).await;
    Err(ClientError::Upstream {
        status: status.as_u16(),
        message: error_message_from_body(&String::from_utf8_lossy(&body)),
    })
}

/// Read at most [`MAX_ERROR_BODY_BYTES`] of a failure body, within `timeout`.
async fn read_error_body(mut response: reqwest::Response, timeout: Duration) -> BytesMut {
    let mut body = BytesMut::new();
    let read = async {
        while body.len() < MAX_ERROR_BODY_BYTES {
            match response.chunk().await {
                Ok(Some(chunk)) => {
                    let take = chunk.len().min(MAX_ERROR_BODY_BYTES - body.len());
                    body.extend_from_slice(&chunk[..take]);
                }
                Ok(None) => break,
                Err(err) => {
                    tracing::debug!(error = %err, "failed to read error body");
                    break;
                }
            }
        }
    };
    if tokio::time::timeout(timeout, read).await.is_err() {
        tracing::debug!(read = body.len(), "error body read timed out");
    }
    body
}

async fn decode_json<T: DeserializeOwned>(
    response: reqwest::Response,
    timeout: Duration,
) -> Result<T, ClientError> {
    let bytes = response
        .bytes()
        .await
        .map_err(|err| request_error(err, timeout))?;
    serde_json::from_slice(&bytes).map_err(|err| ClientError::Decode(err.to_string()))
}
