//! Fan-out over every frontend displaying one widget.
//!
//! A [`ChannelSet`] owns one [`Channel`] per displayed frontend. Membership
//! only grows: a channel is added when the widget is displayed and stays for
//! the lifetime of the set. Every fan-out works on a snapshot of the
//! membership taken when it starts.
//!
//! ```text
//!                    ┌── Channel #0 ──► frontend A
//! ChannelSet::query ─┼── Channel #1 ──► frontend B
//!                    └── Channel #2 ──► (unbound, waits)
//! ```

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use futures::StreamExt;
use futures::future::join_all;
use futures::stream::FuturesUnordered;
use serde_json::Value;

use crate::channel::Channel;
use crate::config::ChannelConfig;
use crate::error::{ChannelError, ProtocolError};
use crate::messaging::{CallRequest, Command, Registration, action, command};
use crate::transport::{Connector, Transport};

/// Name of the comm target a widget with model id `model_id` listens on.
pub fn widget_target(model_id: &str) -> String {
    format!("{model_id}-comm-widget")
}

/// When a fan-out query returns.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReturnWhen {
    /// Wait for every channel; fail with the first failure in channel order.
    #[default]
    AllCompleted,
    /// Return the first successful reply and cancel the remaining queries.
    FirstCompleted,
}

/// The set of channels belonging to one widget.
pub struct ChannelSet<C> {
    target: String,
    connector: C,
    config: ChannelConfig,
    channels: RefCell<Vec<Channel>>,
    next_channel: Cell<u64>,

    /// Transports serving the set's own comm target, see [`ChannelSet::attach`].
    comms: RefCell<Vec<Rc<dyn Transport>>>,
}

impl<C: Connector> ChannelSet<C> {
    /// Create an empty set listening on `target`.
    pub fn new(target: impl Into<String>, connector: C) -> Self {
        Self::with_config(target, connector, ChannelConfig::default())
    }

    /// Create an empty set for the widget with model id `model_id`.
    pub fn for_widget(model_id: &str, connector: C) -> Self {
        Self::new(widget_target(model_id), connector)
    }

    /// Create an empty set whose channels use `config`.
    pub fn with_config(target: impl Into<String>, connector: C, config: ChannelConfig) -> Self {
        Self {
            target: target.into(),
            connector,
            config,
            channels: RefCell::new(Vec::new()),
            next_channel: Cell::new(0),
            comms: RefCell::new(Vec::new()),
        }
    }

    /// The comm target frontends register on.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// The connector used to open reverse channels.
    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Add a channel for a newly displayed frontend. It stays unbound until
    /// that frontend registers.
    pub fn create_channel(&self) -> Channel {
        let n = self.next_channel.get();
        self.next_channel.set(n + 1);

        let channel = Channel::new(format!("{}#{n}", self.target), self.config.clone());
        tracing::debug!(channel = %channel.id(), "created channel");
        self.channels.borrow_mut().push(channel.clone());
        channel
    }

    /// Snapshot of the current membership, in creation order.
    pub fn channels(&self) -> Vec<Channel> {
        self.channels.borrow().clone()
    }

    /// Number of channels.
    pub fn len(&self) -> usize {
        self.channels.borrow().len()
    }

    /// Whether no frontend was displayed yet.
    pub fn is_empty(&self) -> bool {
        self.channels.borrow().is_empty()
    }

    /// Invoke `target.endpoint(args)` on every frontend without waiting for
    /// a reply.
    ///
    /// Returns once every channel took the message. A channel that fails is
    /// logged and skipped. Returns the number of channels reached.
    pub async fn call(&self, target: &str, endpoint: &str, args: Vec<Value>) -> usize {
        let request = CallRequest {
            target: target.to_string(),
            endpoint: endpoint.to_string(),
            args,
        };
        let request = &request;

        let channels = self.channels();
        let sends = channels.iter().map(|channel| async move {
            match channel.send(action::CALL, request).await {
                Ok(()) => true,
                Err(error) => {
                    tracing::warn!(channel = %channel.id(), %error, "call failed");
                    false
                }
            }
        });

        join_all(sends).await.into_iter().filter(|sent| *sent).count()
    }

    /// Query `target.endpoint(args)` on every frontend.
    ///
    /// With [`ReturnWhen::AllCompleted`] the result holds one value per
    /// channel, in channel order. With [`ReturnWhen::FirstCompleted`] it
    /// holds the single first successful value; if every channel fails the
    /// error is [`ChannelError::NoSuccessfulReply`].
    ///
    /// Fails with [`ChannelError::NothingToQuery`] without suspending when no
    /// channel exists.
    pub async fn query(
        &self,
        target: &str,
        endpoint: &str,
        args: Vec<Value>,
        return_when: ReturnWhen,
    ) -> Result<Vec<Value>, ChannelError> {
        let channels = self.channels();
        if channels.is_empty() {
            return Err(ChannelError::NothingToQuery);
        }

        let request = CallRequest {
            target: target.to_string(),
            endpoint: endpoint.to_string(),
            args,
        };
        let branches = channels.iter().map(|channel| query_one(channel, &request));

        match return_when {
            ReturnWhen::AllCompleted => join_all(branches).await.into_iter().collect(),
            ReturnWhen::FirstCompleted => {
                let mut branches: FuturesUnordered<_> = branches.collect();
                let mut failures = Vec::new();
                while let Some(result) = branches.next().await {
                    match result {
                        // Dropping the remaining branches cancels them.
                        Ok(value) => return Ok(vec![value]),
                        Err(error) => {
                            tracing::warn!(%error, "query branch failed");
                            failures.push(error);
                        }
                    }
                }
                Err(ChannelError::NoSuccessfulReply { failures })
            }
        }
    }

    /// [`ChannelSet::query`] waiting for every frontend.
    pub async fn query_all(
        &self,
        target: &str,
        endpoint: &str,
        args: Vec<Value>,
    ) -> Result<Vec<Value>, ChannelError> {
        self.query(target, endpoint, args, ReturnWhen::AllCompleted)
            .await
    }

    /// [`ChannelSet::query`] returning the first successful reply.
    pub async fn query_first(
        &self,
        target: &str,
        endpoint: &str,
        args: Vec<Value>,
    ) -> Result<Value, ChannelError> {
        self.query(target, endpoint, args, ReturnWhen::FirstCompleted)
            .await?
            .pop()
            .ok_or_else(|| ChannelError::NoSuccessfulReply {
                failures: Vec::new(),
            })
    }

    /// Handle one raw message arriving on the set's own comm target.
    ///
    /// Only `register` is understood. Failures are logged.
    pub async fn receive(&self, message: Value) {
        tracing::debug!(comm_target = %self.target, %message, "received message");

        let registration = Command::from_message(&message).and_then(|frame| {
            if frame.command == command::REGISTER {
                Registration::from_command(&frame)
            } else {
                Err(ProtocolError::UnsupportedCommand(frame.command))
            }
        });
        let registration = match registration {
            Ok(registration) => registration,
            Err(error) => {
                tracing::error!(comm_target = %self.target, %error, "failed to handle message");
                return;
            }
        };

        if let Err(error) = self.register(registration).await {
            tracing::error!(comm_target = %self.target, %error, "failed to register frontend");
        }
    }
}

impl<C: Connector + 'static> ChannelSet<C> {
    /// Serve the set's own comm target over `transport`, keeping it open for
    /// the lifetime of the set.
    ///
    /// Every inbound message is handled by [`ChannelSet::receive`] on a task
    /// spawned with [`tokio::task::spawn_local`], so messages must arrive
    /// inside a [`tokio::task::LocalSet`].
    pub fn attach(self: &Rc<Self>, transport: Rc<dyn Transport>) {
        let weak: Weak<Self> = Rc::downgrade(self);
        transport.on_message(Box::new(move |message| {
            let Some(set) = weak.upgrade() else { return };
            tokio::task::spawn_local(async move { set.receive(message).await });
        }));
        self.comms.borrow_mut().push(transport);
    }
}

async fn query_one(channel: &Channel, request: &CallRequest) -> Result<Value, ChannelError> {
    match channel.config().query_timeout {
        Some(timeout) => channel.query_timeout(request, timeout).await,
        None => channel.query(request).await,
    }
}
