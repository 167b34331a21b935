//! A channel from the backend to a single frontend.
//!
//! A [`Channel`] exists before its transport does: it is created when a
//! frontend is displayed and bound once that frontend registers. Until then
//! outbound messages wait in a FIFO backlog and their senders stay suspended;
//! [`Channel::connect`] flushes the backlog in issue order.
//!
//! # Lifecycle
//!
//! ```text
//! Unbound ──connect(transport)──► Bound      (one way; a second connect fails)
//!
//! per query:
//! Pending ──callback value──► Resolved
//!         ──callback error──► Rejected
//!         ──caller drops────► Cancelled  ("cancel" sent, late callback dropped)
//! ```
//!
//! # Single-threaded design
//!
//! Channels are `Rc` handles over `RefCell` state and are meant for a
//! current-thread runtime. Inbound messages are handled synchronously by
//! [`Channel::dispatch`], one at a time, in the order the transport delivers them.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::config::ChannelConfig;
use crate::error::{ChannelError, ProtocolError, TransportError};
use crate::messaging::{
    CallbackReply, CancelRequest, Command, Envelope, PendingQueries, QueryId, QueryRequest,
    action, command,
};
use crate::transport::Transport;

/// Handler for an inbound command.
///
/// Errors are logged by the dispatcher and never reach the remote side.
pub type CommandHandler = Rc<dyn Fn(&Channel, Value) -> Result<(), ProtocolError>>;

/// Logical connection to one frontend, independent of when its transport
/// shows up.
///
/// Cloning yields another handle to the same channel.
#[derive(Clone)]
pub struct Channel {
    inner: Rc<ChannelInner>,
}

struct ChannelInner {
    id: String,
    config: ChannelConfig,

    /// Set once by `connect`, never replaced.
    transport: RefCell<Option<Rc<dyn Transport>>>,

    /// Messages issued before the transport existed, oldest first.
    backlog: RefCell<VecDeque<Queued>>,

    pending: PendingQueries,
    commands: RefCell<HashMap<String, CommandHandler>>,
}

struct Queued {
    payload: Value,
    delivered: oneshot::Sender<Result<(), TransportError>>,
}

enum Outbound {
    Sent(Result<(), TransportError>),
    Queued(oneshot::Receiver<Result<(), TransportError>>),
}

impl Channel {
    /// Create an unbound channel.
    pub fn new(id: impl Into<String>, config: ChannelConfig) -> Self {
        let mut commands: HashMap<String, CommandHandler> = HashMap::new();
        commands.insert(
            command::CALLBACK.to_string(),
            Rc::new(|channel: &Channel, data| channel.on_callback(data)),
        );

        Self {
            inner: Rc::new(ChannelInner {
                id: id.into(),
                config,
                transport: RefCell::new(None),
                backlog: RefCell::new(VecDeque::new()),
                pending: PendingQueries::new(),
                commands: RefCell::new(commands),
            }),
        }
    }

    /// The channel's identifier.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// The configuration this channel was created with.
    pub fn config(&self) -> &ChannelConfig {
        &self.inner.config
    }

    /// Whether a transport has been bound.
    pub fn is_connected(&self) -> bool {
        self.inner.transport.borrow().is_some()
    }

    /// Number of queries awaiting a callback.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    /// Number of messages waiting for the transport.
    pub fn backlog_len(&self) -> usize {
        self.inner.backlog.borrow().len()
    }

    /// Bind the channel to its transport.
    ///
    /// Installs the inbound handler, then flushes everything sent while
    /// unbound, oldest first. Fails if the channel is already bound; the
    /// existing binding is left untouched.
    pub fn connect(&self, transport: Rc<dyn Transport>) -> Result<(), ChannelError> {
        {
            let mut slot = self.inner.transport.borrow_mut();
            if slot.is_some() {
                return Err(ChannelError::AlreadyConnected {
                    channel: self.inner.id.clone(),
                });
            }
            *slot = Some(transport.clone());
        }

        // The transport owns the handler, so it must not keep the channel alive.
        let weak = Rc::downgrade(&self.inner);
        transport.on_message(Box::new(move |message| {
            if let Some(inner) = weak.upgrade() {
                Channel { inner }.dispatch(message);
            }
        }));

        tracing::debug!(
            channel = %self.inner.id,
            backlog = self.backlog_len(),
            "channel connected"
        );

        // Sends issued while flushing land at the back of the backlog.
        loop {
            let next = self.inner.backlog.borrow_mut().pop_front();
            let Some(queued) = next else { break };
            let result = transport.send(queued.payload);
            if let Err(error) = &result {
                tracing::warn!(channel = %self.inner.id, %error, "failed to flush queued message");
            }
            let _ = queued.delivered.send(result);
        }

        Ok(())
    }

    /// Send `{action, data}` to the frontend.
    ///
    /// Suspends until the channel is bound if necessary, without a time
    /// limit. Delivery failures are returned, not retried.
    pub async fn send<T: Serialize + ?Sized>(
        &self,
        action: &str,
        data: &T,
    ) -> Result<(), ChannelError> {
        let payload = serde_json::to_value(Envelope::new(action, data)?)?;
        tracing::debug!(channel = %self.inner.id, action, "sending message");

        match self.outbound(payload)? {
            Outbound::Sent(result) => result.map_err(ChannelError::from),
            Outbound::Queued(delivered) => delivered
                .await
                .map_err(|_| ChannelError::Disconnected)?
                .map_err(ChannelError::from),
        }
    }

    /// Send without waiting for delivery. Failures are only logged.
    fn post<T: Serialize + ?Sized>(&self, action: &str, data: &T) {
        let result = Envelope::new(action, data)
            .and_then(serde_json::to_value)
            .map_err(ChannelError::from)
            .and_then(|payload| self.outbound(payload));

        match result {
            Ok(Outbound::Sent(Err(error))) => {
                tracing::warn!(channel = %self.inner.id, action, %error, "failed to post message");
            }
            Err(error) => {
                tracing::warn!(channel = %self.inner.id, action, %error, "failed to post message");
            }
            Ok(_) => {}
        }
    }

    fn outbound(&self, payload: Value) -> Result<Outbound, ChannelError> {
        let transport = self.inner.transport.borrow().clone();
        if let Some(transport) = transport {
            if self.inner.backlog.borrow().is_empty() {
                return Ok(Outbound::Sent(transport.send(payload)));
            }
        }

        let mut backlog = self.inner.backlog.borrow_mut();
        if let Some(capacity) = self.inner.config.max_backlog {
            if backlog.len() >= capacity {
                return Err(ChannelError::BacklogFull { capacity });
            }
        }
        let (delivered, receiver) = oneshot::channel();
        backlog.push_back(Queued { payload, delivered });
        Ok(Outbound::Queued(receiver))
    }

    /// Register a handler for an inbound command.
    ///
    /// Replaces any handler registered under the same name, including the
    /// built-in `callback`.
    pub fn on_command<F>(&self, name: &str, handler: F)
    where
        F: Fn(&Channel, Value) -> Result<(), ProtocolError> + 'static,
    {
        self.inner
            .commands
            .borrow_mut()
            .insert(name.to_string(), Rc::new(handler));
    }

    /// Handle one raw inbound message.
    ///
    /// Never fails: a message that cannot be handled is logged and dropped,
    /// and the channel keeps serving other queries.
    pub fn dispatch(&self, message: Value) {
        tracing::debug!(channel = %self.inner.id, %message, "received message");
        if let Err(error) = self.route(&message) {
            tracing::error!(channel = %self.inner.id, %error, "failed to handle inbound message");
        }
    }

    fn route(&self, message: &Value) -> Result<(), ProtocolError> {
        let command = Command::from_message(message)?;
        let handler = self
            .inner
            .commands
            .borrow()
            .get(&command.command)
            .cloned()
            .ok_or_else(|| ProtocolError::UnsupportedCommand(command.command.clone()))?;
        handler(self, command.data)
    }

    fn on_callback(&self, data: Value) -> Result<(), ProtocolError> {
        let reply = match CallbackReply::deserialize(&data) {
            Ok(reply) => reply,
            Err(e) => {
                // A live query addressed by an undecodable reply is rejected, not left waiting.
                let pending = data
                    .get("identifier")
                    .and_then(|id| QueryId::deserialize(id).ok())
                    .and_then(|id| self.inner.pending.take(id).ok());
                if let Some(query) = pending {
                    let identifier = query.identifier();
                    query.reject(ChannelError::MalformedReply(identifier));
                }
                return Err(ProtocolError::malformed("callback", e));
            }
        };
        let query = self.inner.pending.take(reply.identifier)?;

        match (reply.value, reply.error) {
            (Some(value), None) => query.resolve(value),
            (None, Some(error)) => query.reject(ChannelError::Remote(error)),
            _ => {
                query.reject(ChannelError::MalformedReply(reply.identifier));
                return Err(ProtocolError::AmbiguousCallback(reply.identifier));
            }
        }
        Ok(())
    }

    /// Send a query and wait for its callback.
    ///
    /// The query is registered before it is handed to the transport. Dropping
    /// the returned future before the callback arrives cancels the query: its
    /// entry is removed and a `cancel` notice is sent, so a late callback is
    /// dropped instead of delivered.
    pub async fn query<T: Serialize + ?Sized>(&self, data: &T) -> Result<Value, ChannelError> {
        let identifier = QueryId::random();
        let request = QueryRequest {
            identifier,
            data: serde_json::to_value(data)?,
        };

        let reply = self.inner.pending.register(identifier);
        let mut guard = CancelOnDrop {
            channel: self,
            identifier,
            armed: true,
        };

        if let Err(error) = self.send(action::QUERY, &request).await {
            guard.armed = false;
            self.inner.pending.remove(identifier);
            return Err(error);
        }

        let result = reply.await;
        guard.armed = false;
        result.unwrap_or(Err(ChannelError::Disconnected))
    }

    /// Like [`Channel::query`], but gives up with [`ChannelError::Cancelled`]
    /// once `cancel` fires.
    ///
    /// A reply that is already available wins over a concurrent cancellation.
    pub async fn query_until<T: Serialize + ?Sized>(
        &self,
        data: &T,
        cancel: &CancellationToken,
    ) -> Result<Value, ChannelError> {
        if cancel.is_cancelled() {
            return Err(ChannelError::Cancelled);
        }
        tokio::select! {
            biased;
            result = self.query(data) => result,
            _ = cancel.cancelled() => Err(ChannelError::Cancelled),
        }
    }

    /// Like [`Channel::query`], but gives up with [`ChannelError::Timeout`]
    /// after `timeout`. The remote side is notified as for a cancellation.
    pub async fn query_timeout<T: Serialize + ?Sized>(
        &self,
        data: &T,
        timeout: Duration,
    ) -> Result<Value, ChannelError> {
        tokio::time::timeout(timeout, self.query(data))
            .await
            .map_err(|_| ChannelError::Timeout)?
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.inner.id)
            .field("connected", &self.is_connected())
            .field("pending", &self.pending_count())
            .field("backlog", &self.backlog_len())
            .finish()
    }
}

/// Cancels a query whose caller stopped waiting.
struct CancelOnDrop<'a> {
    channel: &'a Channel,
    identifier: QueryId,
    armed: bool,
}

impl Drop for CancelOnDrop<'_> {
    fn drop(&mut self) {
        if !self.armed || !self.channel.inner.pending.remove(self.identifier) {
            return;
        }
        tracing::debug!(
            channel = %self.channel.inner.id,
            identifier = %self.identifier,
            "query cancelled"
        );
        self.channel.post(
            action::CANCEL,
            &CancelRequest {
                identifier: self.identifier,
            },
        );
    }
}
