//! # rollcall-live
//!
//! Live updates for the attendance dashboard.
//!
//! - [`StreamTransport`]: one server-push connection, fixed-delay reconnect
//! - [`EventRouter`]: typed fan-out with a wildcard topic
//! - [`ConnectionSupervisor`] / [`LiveHandle`]: the per-process owner and
//!   the handle views receive
//! - [`mock::MockConnector`]: scripted connections for tests

#![deny(unsafe_code)]

pub mod connector;
pub mod decode;
pub mod mock;
pub mod router;
pub mod supervisor;
pub mod transport;

pub use connector::{ByteStream, Connector, HttpConnector};
pub use decode::decode_frame;
pub use router::{DispatchReport, EventRouter, Routable, Subscription, Topic};
pub use supervisor::{ConnectionSupervisor, LiveHandle};
pub use transport::{
    ConnectionState, Diagnostic, StreamStats, StreamTransport, TransportConfig,
    DEFAULT_RECONNECT_DELAY,
};

/// Topic over the dashboard's own event kinds.
pub type LiveTopic = Topic<rollcall_core::EventKind>;
/// Subscription guard for dashboard events.
pub type LiveSubscription = Subscription<rollcall_core::LiveEvent>;
