use std::time::Duration;

/// Failures of the stream connection itself.
///
/// Every variant ends the current connection and leads to a scheduled
/// reconnect; [`StreamError::is_transient`] only decides how loudly it is
/// logged.
#[derive(Clone, Debug, thiserror::Error)]
pub enum StreamError {
    #[error("network error: {0}")]
    Network(String),
    #[error("stream endpoint returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("stream interrupted: {0}")]
    Interrupted(String),
    #[error("stream closed by server")]
    Closed,
    #[error("no data for {0:?}")]
    IdleTimeout(Duration),
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("http client setup failed: {0}")]
    Client(String),
}

impl StreamError {
    /// Errors expected to clear up on their own (server restart, wifi blip).
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::Interrupted(_) | Self::Closed | Self::IdleTimeout(_) => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::InvalidEndpoint(_) | Self::Client(_) => false,
        }
    }

    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Network(_) => "network_error",
            Self::Status { .. } => "bad_status",
            Self::Interrupted(_) => "interrupted",
            Self::Closed => "closed",
            Self::IdleTimeout(_) => "idle_timeout",
            Self::InvalidEndpoint(_) => "invalid_endpoint",
            Self::Client(_) => "client_setup",
        }
    }

    pub fn from_status(status: u16, body: String) -> Self {
        Self::Status { status, body }
    }
}

/// A single frame that could not be turned into an event.
///
/// Never ends the connection; the frame is dropped and recorded.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame has no data")]
    Empty,
    #[error("frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame has an empty event type")]
    MissingType,
    #[error("frame payload is not a JSON object")]
    PayloadNotObject,
    #[error("frame could not be read: {0}")]
    Encoding(String),
}

impl FrameError {
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Json(_) => "json",
            Self::MissingType => "missing_type",
            Self::PayloadNotObject => "payload_not_object",
            Self::Encoding(_) => "encoding",
        }
    }
}

/// Errors from the REST collaborator.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ApiError {
    #[error("network error: {0}")]
    Network(String),
    #[error("request failed with status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("server rejected request: {0}")]
    Rejected(String),
    #[error("could not decode response: {0}")]
    Decode(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ApiError {
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Network(_) => "network_error",
            Self::Status { .. } => "bad_status",
            Self::Rejected(_) => "rejected",
            Self::Decode(_) => "decode_error",
            Self::InvalidRequest(_) => "invalid_request",
        }
    }

    /// Text suitable for a toast.
    pub fn user_message(&self) -> String {
        match self {
            Self::Network(_) => "Server unreachable".into(),
            Self::Status { message, .. } | Self::Rejected(message) => message.clone(),
            Self::Decode(_) => "Unexpected response from server".into(),
            Self::InvalidRequest(message) => message.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn transient_classification() {
        assert!(StreamError::Network("reset".into()).is_transient());
        assert!(StreamError::Interrupted("eof".into()).is_transient());
        assert!(StreamError::Closed.is_transient());
        assert!(StreamError::IdleTimeout(Duration::from_secs(90)).is_transient());
        assert!(StreamError::from_status(503, "down".into()).is_transient());
        assert!(StreamError::from_status(429, "slow down".into()).is_transient());
    }

    #[test]
    fn permanent_classification() {
        assert!(!StreamError::from_status(404, "nope".into()).is_transient());
        assert!(!StreamError::InvalidEndpoint("ftp://x".into()).is_transient());
        assert!(!StreamError::Client("tls".into()).is_transient());
    }

    #[test]
    fn from_status_keeps_body() {
        assert_matches!(
            StreamError::from_status(502, "bad gateway".into()),
            StreamError::Status { status: 502, ref body } if body == "bad gateway"
        );
    }

    #[test]
    fn stream_error_kind_strings() {
        assert_eq!(StreamError::Closed.error_kind(), "closed");
        assert_eq!(
            StreamError::IdleTimeout(Duration::from_secs(1)).error_kind(),
            "idle_timeout"
        );
    }

    #[test]
    fn frame_error_from_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{nope").unwrap_err();
        let err: FrameError = json_err.into();
        assert_matches!(err, FrameError::Json(_));
        assert_eq!(err.error_kind(), "json");
    }

    #[test]
    fn api_user_message_prefers_server_text() {
        let err = ApiError::Status {
            status: 404,
            message: "No check-in found for this employee".into(),
        };
        assert_eq!(err.user_message(), "No check-in found for this employee");
        assert_eq!(ApiError::Network("refused".into()).user_message(), "Server unreachable");
    }

    #[test]
    fn api_error_display() {
        let err = ApiError::Rejected("Employee ID 'E1' already exists".into());
        assert_eq!(
            err.to_string(),
            "server rejected request: Employee ID 'E1' already exists"
        );
    }
}
