//! # rollcall-core
//!
//! Shared vocabulary for the rollcall live-update subsystem:
//!
//! - **Events**: [`events::LiveEvent`] envelope, [`events::EventKind`] and the
//!   typed payloads carried by the attendance stream
//! - **Errors**: [`errors::StreamError`], [`errors::FrameError`],
//!   [`errors::ApiError`] via `thiserror`
//! - **Ids**: branded [`ids::ConnectionId`] / [`ids::ViewId`] and the
//!   router-assigned [`ids::SubscriptionId`]

#![deny(unsafe_code)]

pub mod errors;
pub mod events;
pub mod ids;

pub use errors::{ApiError, FrameError, StreamError};
pub use events::{EventKind, LiveEvent};
