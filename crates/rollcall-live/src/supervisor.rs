//! Process-wide owner of the live connection.
//!
//! Build exactly one [`ConnectionSupervisor`] at the application root and
//! hand [`LiveHandle`] clones to views. The transport is created on the
//! first `connect()` and shared from then on. Views cannot tear it down;
//! only the owner's [`ConnectionSupervisor::shutdown`] does.

use std::sync::{Arc, OnceLock};

use rollcall_core::{EventKind, LiveEvent, StreamError};
use rollcall_settings::RollcallSettings;
use tokio::sync::watch;
use tracing::info;

use crate::connector::{Connector, HttpConnector};
use crate::router::{EventRouter, Subscription, Topic};
use crate::transport::{
    ConnectionState, Diagnostic, StreamStats, StreamTransport, TransportConfig,
};

struct Core {
    endpoint: String,
    connector: Arc<dyn Connector>,
    config: TransportConfig,
    router: Arc<EventRouter<LiveEvent>>,
    transport: OnceLock<StreamTransport>,
}

impl Core {
    fn transport(&self) -> &StreamTransport {
        self.transport.get_or_init(|| {
            info!(endpoint = %self.endpoint, "creating stream transport");
            StreamTransport::new(
                Arc::clone(&self.connector),
                Arc::clone(&self.router),
                self.config.clone(),
            )
        })
    }
}

pub struct ConnectionSupervisor {
    core: Arc<Core>,
}

impl ConnectionSupervisor {
    pub fn new(
        endpoint: impl Into<String>,
        connector: Arc<dyn Connector>,
        config: TransportConfig,
    ) -> Self {
        Self {
            core: Arc::new(Core {
                endpoint: endpoint.into(),
                connector,
                config,
                router: Arc::new(EventRouter::new()),
                transport: OnceLock::new(),
            }),
        }
    }

    /// HTTP connector pointed at `server.baseUrl` + `stream.path`.
    pub fn from_settings(settings: &RollcallSettings) -> Result<Self, StreamError> {
        let connector = HttpConnector::new(settings.stream.connect_timeout())?;
        Ok(Self::new(
            settings.stream_url(),
            Arc::new(connector),
            TransportConfig::from_settings(&settings.stream),
        ))
    }

    pub fn handle(&self) -> LiveHandle {
        LiveHandle {
            core: Arc::clone(&self.core),
        }
    }

    /// Whether any view has asked for the connection yet.
    pub fn is_started(&self) -> bool {
        self.core.transport.get().is_some()
    }

    pub fn stats(&self) -> StreamStats {
        self.core
            .transport
            .get()
            .map(StreamTransport::stats)
            .unwrap_or_default()
    }

    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.core
            .transport
            .get()
            .map(StreamTransport::diagnostics)
            .unwrap_or_default()
    }

    /// Close the connection at process exit.
    pub fn shutdown(&self) {
        if let Some(transport) = self.core.transport.get() {
            transport.disconnect();
        }
    }
}

impl Drop for ConnectionSupervisor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// What a view gets: connect, subscribe, observe. No teardown.
#[derive(Clone)]
pub struct LiveHandle {
    core: Arc<Core>,
}

impl LiveHandle {
    /// Ensure the shared connection is running. Idempotent.
    pub fn connect(&self) {
        self.core.transport().connect(&self.core.endpoint);
    }

    pub fn subscribe<F>(&self, topic: Topic<EventKind>, callback: F) -> Subscription<LiveEvent>
    where
        F: Fn(&LiveEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.core.router.subscribe(topic, callback)
    }

    pub fn state(&self) -> ConnectionState {
        self.core
            .transport
            .get()
            .map_or(ConnectionState::Disconnected, StreamTransport::state)
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.core.transport().watch_state()
    }

    pub fn endpoint(&self) -> &str {
        &self.core.endpoint
    }

    pub fn subscriber_count(&self) -> usize {
        self.core.router.subscriber_count()
    }
}

impl std::fmt::Debug for LiveHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveHandle")
            .field("endpoint", &self.core.endpoint)
            .field("state", &self.state())
            .finish()
    }
}
