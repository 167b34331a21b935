//! # comm-bridge
//!
//! Query/callback channels between a backend and every frontend displaying
//! one of its widgets.
//!
//! This crate provides:
//! - **Channel**: a logical connection to one frontend, usable before its
//!   transport exists, with correlated queries and cancellation
//! - **ChannelSet**: fan-out `call` and `query` over all displayed frontends
//! - **Registration**: binding registering frontends to waiting channels
//! - **Responder**: the frontend end serving endpoints
//! - **Transport seam**: [`Transport`]/[`Connector`] traits plus an
//!   in-process implementation
//!
//! Everything is single-threaded: handles are `Rc` based and local tasks are
//! spawned with [`tokio::task::spawn_local`].

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

// =============================================================================
// Modules
// =============================================================================

/// Logical connection to one frontend.
pub mod channel;

/// Fan-out over all frontends of a widget.
pub mod channel_set;

/// Channel configuration.
pub mod config;

/// Error types.
pub mod error;

/// Wire types and query correlation.
pub mod messaging;

mod registration;

/// Frontend end of a channel.
pub mod responder;

/// Transport seam and in-process transport.
pub mod transport;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use channel::{Channel, CommandHandler};
pub use channel_set::{ChannelSet, ReturnWhen, widget_target};
pub use config::ChannelConfig;
pub use error::{ChannelError, ProtocolError, TransportError};
pub use messaging::{Envelope, QueryId, Registration};
pub use responder::{EndpointResult, Responder};
pub use transport::{Connector, MemoryConnector, MemoryEnd, MessageHandler, Transport};
