//! Opening the raw byte stream behind a [`StreamTransport`](crate::StreamTransport).
//!
//! The transport only needs "give me the bytes for this URL"; the HTTP
//! specifics live here so tests can swap in [`MockConnector`](crate::mock::MockConnector).

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use rollcall_core::StreamError;
use tracing::debug;

/// Body of an open stream connection. Ends when the server closes it.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, StreamError>> + Send>>;

#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Negotiate a server-push connection and return its body.
    ///
    /// Resolves once response headers arrive; an `Err` means no connection
    /// was established.
    async fn open(&self, endpoint: &str) -> Result<ByteStream, StreamError>;
}

/// `text/event-stream` over reqwest.
#[derive(Clone, Debug)]
pub struct HttpConnector {
    client: reqwest::Client,
}

impl HttpConnector {
    /// Only the connect phase is bounded; a stream body may legitimately
    /// stay silent for a long time.
    pub fn new(connect_timeout: Duration) -> Result<Self, StreamError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| StreamError::Client(e.to_string()))?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Connector for HttpConnector {
    async fn open(&self, endpoint: &str) -> Result<ByteStream, StreamError> {
        let url = reqwest::Url::parse(endpoint)
            .map_err(|e| StreamError::InvalidEndpoint(format!("{endpoint}: {e}")))?;

        let response = self
            .client
            .get(url)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await
            .map_err(|e| StreamError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StreamError::from_status(status.as_u16(), body));
        }
        debug!(endpoint, status = status.as_u16(), "stream negotiated");

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| StreamError::Interrupted(e.to_string())));
        Ok(Box::pin(body))
    }
}

/// Fail the stream with [`StreamError::IdleTimeout`] when no chunk arrives
/// within `limit`. Any bytes, keep-alive comments included, reset the clock.
pub fn with_idle_timeout(inner: ByteStream, limit: Duration) -> ByteStream {
    Box::pin(futures::stream::unfold(
        (inner, false),
        move |(mut inner, timed_out)| async move {
            if timed_out {
                return None;
            }
            match tokio::time::timeout(limit, inner.next()).await {
                Ok(Some(item)) => Some((item, (inner, false))),
                Ok(None) => None,
                Err(_) => Some((Err(StreamError::IdleTimeout(limit)), (inner, true))),
            }
        },
    ))
}
