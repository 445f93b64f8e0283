//! Transient user notifications ("toasts").
//!
//! Sinks must never block the caller: notices are raised from inside event
//! dispatch.

use std::fmt;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rollcall_core::{EventKind, LiveEvent};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Notice {
    pub severity: Severity,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl Notice {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            at: Utc::now(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(Severity::Info, message)
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(Severity::Success, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Severity::Error, message)
    }
}

pub trait NotificationSink: Send + Sync + 'static {
    fn notify(&self, notice: Notice);
}

/// Writes notices to the log.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn notify(&self, notice: Notice) {
        match notice.severity {
            Severity::Error => error!(severity = %notice.severity, "{}", notice.message),
            Severity::Warning => warn!(severity = %notice.severity, "{}", notice.message),
            Severity::Info | Severity::Success => {
                info!(severity = %notice.severity, "{}", notice.message);
            }
        }
    }
}

/// Forwards notices to an unbounded channel, e.g. for a UI loop.
#[derive(Clone, Debug)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Notice>,
}

impl ChannelSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Notice>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl NotificationSink for ChannelSink {
    fn notify(&self, notice: Notice) {
        // Receiver gone means nobody is watching anymore.
        let _ = self.tx.send(notice);
    }
}

/// Drops everything. Used when notifications are disabled.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl NotificationSink for NullSink {
    fn notify(&self, _notice: Notice) {}
}

/// Keeps every notice in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    notices: Mutex<Vec<Notice>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.notices.lock().iter().map(|n| n.message.clone()).collect()
    }
}

impl NotificationSink for MemorySink {
    fn notify(&self, notice: Notice) {
        self.notices.lock().push(notice);
    }
}

/// Default notice for a dashboard event, if it has something worth saying.
pub fn notice_for(event: &LiveEvent) -> Option<Notice> {
    let message = event.describe()?;
    let severity = match event.kind()? {
        EventKind::AttendanceScan => Severity::Success,
        EventKind::ManualCheckout | EventKind::EmployeeAdded => Severity::Info,
        EventKind::EmployeeDeleted => Severity::Warning,
    };
    Some(Notice::new(severity, message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scan_notice_is_success() {
        let event = LiveEvent::new(
            "attendance_scan",
            json!({"employee_id": "E001", "name": "Jane Doe", "action": "check_in", "time": "08:59:12"}),
        );
        let notice = notice_for(&event).unwrap();
        assert_eq!(notice.severity, Severity::Success);
        assert_eq!(notice.message, "Jane Doe checked in at 08:59:12");
    }

    #[test]
    fn deletion_notice_is_warning() {
        let event = LiveEvent::new("employee_deleted", json!({"employee_id": "E7"}));
        let notice = notice_for(&event).unwrap();
        assert_eq!(notice.severity, Severity::Warning);
        assert_eq!(notice.message, "E7 removed");
    }

    #[test]
    fn unknown_or_undecodable_events_have_no_notice() {
        assert!(notice_for(&LiveEvent::bare("device_offline")).is_none());
        assert!(notice_for(&LiveEvent::bare("attendance_scan")).is_none());
    }

    #[tokio::test]
    async fn channel_sink_forwards() {
        let (sink, mut rx) = ChannelSink::channel();
        sink.notify(Notice::info("hello"));
        let got = rx.recv().await.unwrap();
        assert_eq!(got.message, "hello");
        assert_eq!(got.severity, Severity::Info);
    }

    #[test]
    fn channel_sink_survives_closed_receiver() {
        let (sink, rx) = ChannelSink::channel();
        drop(rx);
        sink.notify(Notice::error("nobody listening"));
    }

    #[test]
    fn memory_sink_records_in_order() {
        let sink = MemorySink::new();
        sink.notify(Notice::info("a"));
        sink.notify(Notice::warning("b"));
        assert_eq!(sink.messages(), vec!["a", "b"]);
        assert_eq!(sink.notices()[1].severity, Severity::Warning);
    }

    #[test]
    fn severity_display() {
        assert_eq!(Severity::Success.to_string(), "success");
    }
}
