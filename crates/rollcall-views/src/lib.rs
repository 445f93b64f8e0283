//! # rollcall-views
//!
//! Dashboard views that stay fresh by re-fetching on live events.
//!
//! - [`api`]: the REST collaborator trait and its records, [`http`] client
//! - [`notify`]: toast sink for event notices and refresh failures
//! - [`subscription`]: [`ViewSubscription`], the subscribe-then-refetch
//!   lifecycle every view shares
//! - [`views`]: attendance board, roster, dashboard summary
//! - [`stub`]: in-memory API for tests

#![deny(unsafe_code)]

pub mod api;
pub mod http;
pub mod notify;
pub mod stub;
pub mod subscription;
pub mod views;

pub use api::{AttendanceApi, EmployeeFilter, LogQuery, ManualCheckout, NewEmployee};
pub use http::HttpAttendanceApi;
pub use notify::{notice_for, ChannelSink, Notice, NotificationSink, Severity, TracingSink};
pub use subscription::{FetchOutcome, LiveView, ViewSubscription};
pub use views::{AttendanceBoard, BoardParams, BoardTab, DashboardView, RosterView, Snapshot};
