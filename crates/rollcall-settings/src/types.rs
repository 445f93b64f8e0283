//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` and `#[serde(default)]`
//! so a partial JSON file only has to name the fields it changes.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// ```json
/// {
///   "server": { "baseUrl": "http://10.0.0.5:8080" },
///   "stream": { "reconnectDelayMs": 5000 }
/// }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RollcallSettings {
    /// Settings schema version.
    pub version: String,
    /// REST collaborator location.
    pub server: ServerSettings,
    /// Live event stream behavior.
    pub stream: StreamSettings,
    /// Log output.
    pub logging: LoggingSettings,
    /// User-facing toasts.
    pub notifications: NotificationSettings,
}

impl Default for RollcallSettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            server: ServerSettings::default(),
            stream: StreamSettings::default(),
            logging: LoggingSettings::default(),
            notifications: NotificationSettings::default(),
        }
    }
}

impl RollcallSettings {
    /// Absolute URL of the event stream endpoint.
    pub fn stream_url(&self) -> String {
        join_url(&self.server.base_url, &self.stream.path)
    }

    /// Reject values no component can run with.
    pub fn validate(&self) -> Result<()> {
        let base = self.server.base_url.trim();
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(SettingsError::InvalidValue(format!(
                "server.baseUrl must be an http(s) URL, got {base:?}"
            )));
        }
        if self.stream.reconnect_delay_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "stream.reconnectDelayMs must be positive".into(),
            ));
        }
        if !self.stream.path.starts_with('/') {
            return Err(SettingsError::InvalidValue(format!(
                "stream.path must start with '/', got {:?}",
                self.stream.path
            )));
        }
        Ok(())
    }
}

/// Where the backend lives.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Base URL shared by the REST API and the stream endpoint.
    pub base_url: String,
    /// Per-request timeout for REST calls in milliseconds.
    pub request_timeout_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            request_timeout_ms: 10_000,
        }
    }
}

impl ServerSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Live event stream settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StreamSettings {
    /// Path of the server-push endpoint, appended to `server.baseUrl`.
    pub path: String,
    /// Fixed delay before every reconnection attempt.
    pub reconnect_delay_ms: u64,
    /// TCP/TLS connect timeout for the stream request.
    pub connect_timeout_ms: u64,
    /// Treat the stream as dead after this long without bytes. 0 disables.
    pub idle_timeout_ms: u64,
    /// How many malformed-frame diagnostics to keep in memory.
    pub diagnostics_capacity: usize,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            path: "/api/events/stream".to_string(),
            reconnect_delay_ms: 3_000,
            connect_timeout_ms: 10_000,
            idle_timeout_ms: 0,
            diagnostics_capacity: 32,
        }
    }
}

impl StreamSettings {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_ms > 0).then(|| Duration::from_millis(self.idle_timeout_ms))
    }
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level (`trace`..`error`). `RUST_LOG` still wins.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
    /// Per-module overrides, e.g. `{"rollcall_live": "debug"}`.
    pub modules: std::collections::BTreeMap<String, String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            modules: std::collections::BTreeMap::new(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NotificationSettings {
    pub enabled: bool,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self { enabled: true }
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
