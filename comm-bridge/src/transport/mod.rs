//! The seam between channels and whatever actually moves messages.
//!
//! A [`Transport`] is one established, bidirectional connection. A
//! [`Connector`] opens transports by name. Channels never look past these two
//! traits, so a kernel comm, a websocket or the in-process [`memory`] pair can
//! all sit underneath.

use std::rc::Rc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::TransportError;

pub mod memory;

pub use memory::{MemoryConnector, MemoryEnd};

/// Callback invoked with every raw inbound message.
pub type MessageHandler = Box<dyn Fn(Value)>;

/// One established connection to a remote endpoint.
pub trait Transport {
    /// Deliver one message to the remote side.
    ///
    /// Failures surface synchronously; nothing is retried.
    fn send(&self, payload: Value) -> Result<(), TransportError>;

    /// Install the handler receiving inbound messages.
    ///
    /// A transport has at most one handler; installing another replaces it.
    fn on_message(&self, handler: MessageHandler);
}

/// Opens transports to named remote targets.
#[async_trait(?Send)]
pub trait Connector {
    /// Establish a connection to the remote target `name`.
    async fn open(&self, name: &str) -> Result<Rc<dyn Transport>, TransportError>;
}
