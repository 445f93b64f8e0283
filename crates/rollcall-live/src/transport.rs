//! Single long-lived stream connection with fixed-delay reconnection.
//!
//! ```text
//!                 connect()
//!  Disconnected ────────────▶ Connecting ──open ok──▶ Open
//!       ▲                        │  ▲                  │
//!       │ disconnect()     open  │  │ delay elapsed    │ error / close /
//!       │ (from any state) failed▼  │                  │ idle timeout
//!       └─────────────────────  Failed ◀───────────────┘
//! ```
//!
//! At most one receive task exists per transport. Every state publish and
//! every dispatch is tagged with the epoch of the task that produced it, so
//! a superseded task can never overwrite the state of its replacement.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use eventsource_stream::{EventStreamError, Eventsource};
use futures::StreamExt;
use metrics::counter;
use parking_lot::Mutex;
use rollcall_core::ids::ConnectionId;
use rollcall_core::{FrameError, LiveEvent, StreamError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::connector::{with_idle_timeout, Connector};
use crate::decode::{decode_frame, preview};
use crate::router::EventRouter;

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);
pub const DEFAULT_DIAGNOSTICS_CAPACITY: usize = 32;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    /// Waiting out the reconnect delay.
    Failed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Failed => "failed",
        }
    }

    /// Connecting or Open: a further `connect()` has nothing to do.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Connecting | Self::Open)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug)]
pub struct TransportConfig {
    /// Fixed wait between a failure and the next attempt. Never grows.
    pub reconnect_delay: Duration,
    /// Fail an open stream that delivers no bytes for this long.
    pub idle_timeout: Option<Duration>,
    /// Size of the malformed-frame ring. 0 keeps none.
    pub diagnostics_capacity: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            idle_timeout: None,
            diagnostics_capacity: DEFAULT_DIAGNOSTICS_CAPACITY,
        }
    }
}

impl TransportConfig {
    pub fn from_settings(stream: &rollcall_settings::StreamSettings) -> Self {
        Self {
            reconnect_delay: stream.reconnect_delay(),
            idle_timeout: stream.idle_timeout(),
            diagnostics_capacity: stream.diagnostics_capacity,
        }
    }
}

/// Counters since the transport was created.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub attempts: u64,
    pub frames_received: u64,
    pub frames_malformed: u64,
    pub reconnects_scheduled: u64,
}

#[derive(Default)]
struct Counters {
    attempts: AtomicU64,
    frames_received: AtomicU64,
    frames_malformed: AtomicU64,
    reconnects_scheduled: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> StreamStats {
        StreamStats {
            attempts: self.attempts.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_malformed: self.frames_malformed.load(Ordering::Relaxed),
            reconnects_scheduled: self.reconnects_scheduled.load(Ordering::Relaxed),
        }
    }
}

/// A frame that was dropped instead of dispatched.
#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub at: DateTime<Utc>,
    pub connection_id: ConnectionId,
    /// [`FrameError::error_kind`] of the failure.
    pub kind: &'static str,
    pub detail: String,
    pub preview: String,
}

struct Active {
    endpoint: String,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

struct Inner {
    epoch: u64,
    active: Option<Active>,
}

struct Shared {
    connector: Arc<dyn Connector>,
    router: Arc<EventRouter<LiveEvent>>,
    config: TransportConfig,
    state_tx: watch::Sender<ConnectionState>,
    inner: Mutex<Inner>,
    counters: Counters,
    diagnostics: Mutex<VecDeque<Diagnostic>>,
}

/// Owner of the stream connection. Cheap to clone; clones share the
/// connection.
#[derive(Clone)]
pub struct StreamTransport {
    shared: Arc<Shared>,
}

impl StreamTransport {
    pub fn new(
        connector: Arc<dyn Connector>,
        router: Arc<EventRouter<LiveEvent>>,
        config: TransportConfig,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let diagnostics = VecDeque::with_capacity(config.diagnostics_capacity);
        Self {
            shared: Arc::new(Shared {
                connector,
                router,
                config,
                state_tx,
                inner: Mutex::new(Inner {
                    epoch: 0,
                    active: None,
                }),
                counters: Counters::default(),
                diagnostics: Mutex::new(diagnostics),
            }),
        }
    }

    /// Start streaming from `endpoint`.
    ///
    /// No-op while Connecting or Open. From Failed the pending retry is
    /// cancelled and a new attempt starts right away. Must be called from
    /// within a tokio runtime.
    pub fn connect(&self, endpoint: &str) {
        let mut inner = self.shared.inner.lock();
        let state = *self.shared.state_tx.borrow();
        if state.is_live() {
            if let Some(active) = &inner.active {
                if active.endpoint != endpoint {
                    warn!(
                        current = %active.endpoint,
                        requested = endpoint,
                        "already connected to a different endpoint, ignoring"
                    );
                }
            }
            return;
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                error!(endpoint, error = %e, "connect called outside a tokio runtime");
                return;
            }
        };

        if let Some(previous) = inner.active.take() {
            debug!(endpoint = %previous.endpoint, "cancelling pending reconnect");
            previous.cancel.cancel();
            previous.task.abort();
        }

        inner.epoch += 1;
        let epoch = inner.epoch;
        let cancel = CancellationToken::new();
        let _ = self.shared.state_tx.send_replace(ConnectionState::Connecting);

        let task = runtime.spawn(run(
            Arc::clone(&self.shared),
            epoch,
            endpoint.to_string(),
            cancel.clone(),
        ));
        inner.active = Some(Active {
            endpoint: endpoint.to_string(),
            cancel,
            task,
        });
        info!(endpoint, from = %state, "stream connect requested");
    }

    /// Close the connection and cancel any pending retry. Safe from any
    /// state, including repeatedly.
    pub fn disconnect(&self) {
        let mut inner = self.shared.inner.lock();
        inner.epoch += 1;
        if let Some(active) = inner.active.take() {
            active.cancel.cancel();
            active.task.abort();
            info!(endpoint = %active.endpoint, "stream disconnected");
        }
        let _ = self
            .shared
            .state_tx
            .send_if_modified(|s| replace_state(s, ConnectionState::Disconnected));
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state_tx.borrow()
    }

    /// Change stream of the connection state. Only the latest value is
    /// retained; intermediate states may be skipped by slow observers.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    pub fn endpoint(&self) -> Option<String> {
        self.shared
            .inner
            .lock()
            .active
            .as_ref()
            .map(|a| a.endpoint.clone())
    }

    pub fn stats(&self) -> StreamStats {
        self.shared.counters.snapshot()
    }

    /// Recent malformed frames, oldest first.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.shared.diagnostics.lock().iter().cloned().collect()
    }

    pub fn router(&self) -> &Arc<EventRouter<LiveEvent>> {
        &self.shared.router
    }
}

impl std::fmt::Debug for StreamTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamTransport")
            .field("state", &self.state())
            .field("stats", &self.stats())
            .finish()
    }
}

fn replace_state(current: &mut ConnectionState, next: ConnectionState) -> bool {
    if *current == next {
        false
    } else {
        *current = next;
        true
    }
}

impl Shared {
    /// Publish `state` if `epoch` is still the current one.
    fn publish(&self, epoch: u64, state: ConnectionState) -> bool {
        let inner = self.inner.lock();
        if inner.epoch != epoch {
            return false;
        }
        let _ = self.state_tx.send_if_modified(|s| replace_state(s, state));
        true
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.inner.lock().epoch == epoch
    }

    /// One connection from open to failure. Always ends with the error
    /// that closed it.
    async fn session(
        &self,
        epoch: u64,
        endpoint: &str,
        connection_id: &ConnectionId,
        attempt: u64,
    ) -> StreamError {
        let body = match self.connector.open(endpoint).await {
            Ok(body) => body,
            Err(e) => return e,
        };
        let body = match self.config.idle_timeout {
            Some(limit) => with_idle_timeout(body, limit),
            None => body,
        };

        if !self.publish(epoch, ConnectionState::Open) {
            return StreamError::Closed;
        }
        info!(endpoint, %connection_id, attempt, "stream open");

        let mut frames = body.eventsource();
        loop {
            match frames.next().await {
                None => return StreamError::Closed,
                Some(Ok(frame)) => self.handle_frame(epoch, connection_id, &frame.data),
                Some(Err(EventStreamError::Transport(e))) => return e,
                // Undecodable bytes within an otherwise healthy stream.
                Some(Err(e)) => self.record_malformed(
                    connection_id,
                    FrameError::Encoding(e.to_string()),
                    "",
                ),
            }
        }
    }

    fn handle_frame(&self, epoch: u64, connection_id: &ConnectionId, raw: &str) {
        match decode_frame(raw) {
            Ok(event) => {
                let _ = self.counters.frames_received.fetch_add(1, Ordering::Relaxed);
                counter!("rollcall_stream_frames_total").increment(1);
                if !self.is_current(epoch) {
                    return;
                }
                let report = self.router.dispatch(&event);
                debug!(
                    %connection_id,
                    event_type = event.event_type(),
                    delivered = report.delivered,
                    failed = report.failed,
                    "event dispatched"
                );
            }
            Err(FrameError::Empty) => trace!(%connection_id, "empty frame"),
            Err(e) => {
                let _ = self.counters.frames_received.fetch_add(1, Ordering::Relaxed);
                self.record_malformed(connection_id, e, raw);
            }
        }
    }

    fn record_malformed(&self, connection_id: &ConnectionId, error: FrameError, raw: &str) {
        let _ = self.counters.frames_malformed.fetch_add(1, Ordering::Relaxed);
        counter!("rollcall_stream_frames_malformed_total", "kind" => error.error_kind())
            .increment(1);
        let preview = preview(raw);
        warn!(
            %connection_id,
            kind = error.error_kind(),
            error = %error,
            frame = %preview,
            "discarding malformed frame"
        );

        let capacity = self.config.diagnostics_capacity;
        if capacity == 0 {
            return;
        }
        let mut ring = self.diagnostics.lock();
        while ring.len() >= capacity {
            let _ = ring.pop_front();
        }
        ring.push_back(Diagnostic {
            at: Utc::now(),
            connection_id: connection_id.clone(),
            kind: error.error_kind(),
            detail: error.to_string(),
            preview,
        });
    }
}

async fn run(shared: Arc<Shared>, epoch: u64, endpoint: String, cancel: CancellationToken) {
    let delay = shared.config.reconnect_delay;
    let mut attempt: u64 = 0;

    loop {
        attempt += 1;
        if !shared.publish(epoch, ConnectionState::Connecting) {
            return;
        }
        let _ = shared.counters.attempts.fetch_add(1, Ordering::Relaxed);
        counter!("rollcall_stream_connect_attempts_total").increment(1);

        let connection_id = ConnectionId::new();
        debug!(endpoint = %endpoint, %connection_id, attempt, "opening stream");

        let failure = tokio::select! {
            () = cancel.cancelled() => return,
            failure = shared.session(epoch, &endpoint, &connection_id, attempt) => failure,
        };

        if !shared.publish(epoch, ConnectionState::Failed) {
            return;
        }
        let _ = shared
            .counters
            .reconnects_scheduled
            .fetch_add(1, Ordering::Relaxed);
        counter!("rollcall_stream_reconnects_total", "reason" => failure.error_kind())
            .increment(1);
        if failure.is_transient() {
            warn!(
                endpoint = %endpoint,
                %connection_id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %failure,
                "stream failed, reconnecting"
            );
        } else {
            error!(
                endpoint = %endpoint,
                %connection_id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %failure,
                "stream failed with a non-transient error, reconnecting anyway"
            );
        }

        tokio::select! {
            () = cancel.cancelled() => return,
            () = tokio::time::sleep(delay) => {}
        }
    }
}
