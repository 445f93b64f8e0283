//! Scripted [`Connector`] for tests without a server.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream, Stream};
use parking_lot::Mutex;
use rollcall_core::StreamError;
use tokio::sync::mpsc;

use crate::connector::{ByteStream, Connector};

/// What the next `open()` does.
pub enum MockOutcome {
    /// `open()` fails without a connection.
    Fail(StreamError),
    /// Each string is sent as one `data:` frame, then the server closes.
    Frames(Vec<String>),
    /// Connection stays open and silent until dropped.
    Hold,
    /// Wait, then behave like the inner outcome.
    Delay(Duration, Box<MockOutcome>),
    Live(mpsc::UnboundedReceiver<Result<Bytes, StreamError>>),
}

impl MockOutcome {
    pub fn delayed(delay: Duration, inner: MockOutcome) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Sending half of a [`MockOutcome::Live`] connection.
///
/// Dropping it closes the stream from the "server" side.
pub struct LiveFeed {
    tx: mpsc::UnboundedSender<Result<Bytes, StreamError>>,
}

impl LiveFeed {
    /// Send `payload` as one SSE `data:` frame.
    pub fn frame(&self, payload: &str) {
        self.raw(&format!("data: {payload}\n\n"));
    }

    /// Send bytes verbatim.
    pub fn raw(&self, chunk: &str) {
        let _ = self.tx.send(Ok(Bytes::from(chunk.to_string())));
    }

    /// Break the connection with a transport error.
    pub fn fail(&self, error: StreamError) {
        let _ = self.tx.send(Err(error));
    }
}

#[derive(Default)]
struct Tracker {
    opens: AtomicUsize,
    live: AtomicUsize,
    max_live: AtomicUsize,
    endpoints: Mutex<Vec<String>>,
}

struct LiveGuard(Arc<Tracker>);

impl LiveGuard {
    fn new(tracker: Arc<Tracker>) -> Self {
        let now = tracker.live.fetch_add(1, Ordering::SeqCst) + 1;
        let _ = tracker.max_live.fetch_max(now, Ordering::SeqCst);
        Self(tracker)
    }
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        let _ = self.0.live.fetch_sub(1, Ordering::SeqCst);
    }
}

struct Tracked {
    inner: ByteStream,
    _guard: LiveGuard,
}

impl Stream for Tracked {
    type Item = Result<Bytes, StreamError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

/// Connector returning scripted outcomes in order; [`MockOutcome::Hold`]
/// once the script runs out. Clones share the script and the counters.
#[derive(Clone, Default)]
pub struct MockConnector {
    script: Arc<Mutex<VecDeque<MockOutcome>>>,
    tracker: Arc<Tracker>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(outcomes: impl IntoIterator<Item = MockOutcome>) -> Self {
        let mock = Self::new();
        mock.script.lock().extend(outcomes);
        mock
    }

    pub fn push(&self, outcome: MockOutcome) {
        self.script.lock().push_back(outcome);
    }

    /// Script a connection driven by the returned feed.
    pub fn push_live(&self) -> LiveFeed {
        let (tx, rx) = mpsc::unbounded_channel();
        self.push(MockOutcome::Live(rx));
        LiveFeed { tx }
    }

    pub fn open_count(&self) -> usize {
        self.tracker.opens.load(Ordering::SeqCst)
    }

    /// Streams handed out and not yet dropped.
    pub fn live_streams(&self) -> usize {
        self.tracker.live.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously live streams ever observed.
    pub fn max_concurrent(&self) -> usize {
        self.tracker.max_live.load(Ordering::SeqCst)
    }

    pub fn endpoints(&self) -> Vec<String> {
        self.tracker.endpoints.lock().clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn open(&self, endpoint: &str) -> Result<ByteStream, StreamError> {
        let _ = self.tracker.opens.fetch_add(1, Ordering::SeqCst);
        self.tracker.endpoints.lock().push(endpoint.to_string());

        let mut outcome = self.script.lock().pop_front().unwrap_or(MockOutcome::Hold);
        let body = loop {
            match outcome {
                MockOutcome::Delay(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    outcome = *inner;
                }
                MockOutcome::Fail(error) => return Err(error),
                MockOutcome::Frames(frames) => {
                    let chunks = frames
                        .into_iter()
                        .map(|f| Ok(Bytes::from(format!("data: {f}\n\n"))));
                    break boxed(stream::iter(chunks));
                }
                MockOutcome::Hold => break boxed(stream::pending()),
                MockOutcome::Live(mut rx) => {
                    break boxed(stream::poll_fn(move |cx| rx.poll_recv(cx)));
                }
            }
        };

        Ok(Box::pin(Tracked {
            inner: body,
            _guard: LiveGuard::new(Arc::clone(&self.tracker)),
        }))
    }
}

fn boxed<S>(body: S) -> ByteStream
where
    S: Stream<Item = Result<Bytes, StreamError>> + Send + 'static,
{
    Box::pin(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use futures::StreamExt;

    #[tokio::test]
    async fn script_then_hold() {
        let mock = MockConnector::with_script([
            MockOutcome::Fail(StreamError::Closed),
            MockOutcome::Frames(vec!["{}".into()]),
        ]);

        assert_matches!(mock.open("a").await.err(), Some(StreamError::Closed));

        let mut body = mock.open("b").await.unwrap();
        let chunk = body.next().await.unwrap().unwrap();
        assert_eq!(&chunk[..], b"data: {}\n\n");
        assert!(body.next().await.is_none());
        drop(body);

        let _held = mock.open("c").await.unwrap();
        assert_eq!(mock.open_count(), 3);
        assert_eq!(mock.endpoints(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn tracks_concurrent_streams() {
        let mock = MockConnector::new();
        let first = mock.open("x").await.unwrap();
        let second = mock.open("x").await.unwrap();
        assert_eq!(mock.live_streams(), 2);
        drop(first);
        drop(second);
        assert_eq!(mock.live_streams(), 0);
        assert_eq!(mock.max_concurrent(), 2);
    }

    #[tokio::test]
    async fn live_feed_closes_on_drop() {
        let mock = MockConnector::new();
        let feed = mock.push_live();
        let mut body = mock.open("x").await.unwrap();

        feed.frame(r#"{"type":"employee_added"}"#);
        let chunk = body.next().await.unwrap().unwrap();
        assert!(chunk.starts_with(b"data: "));

        feed.fail(StreamError::Interrupted("reset".into()));
        assert_matches!(body.next().await, Some(Err(StreamError::Interrupted(_))));

        drop(feed);
        assert!(body.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_outcome_waits() {
        let mock = MockConnector::new();
        mock.push(MockOutcome::delayed(
            Duration::from_secs(2),
            MockOutcome::Fail(StreamError::Closed),
        ));
        let started = tokio::time::Instant::now();
        assert!(mock.open("x").await.is_err());
        assert!(started.elapsed() >= Duration::from_secs(2));
    }
}
