//! The frontend end of a channel.
//!
//! A [`Responder`] answers what a [`Channel`](crate::Channel) sends. It owns
//! named endpoints, grouped by target component, and serves:
//!
//! - `call`: run the endpoint, nobody waits for the outcome
//! - `query`: run the endpoint and answer with a `callback`
//! - `cancel`: stop a running query; no `callback` is sent for it
//!
//! Failures that cannot be reported through a `callback` are logged and kept
//! in [`Responder::errors`] for display.
//!
//! Endpoints run on tasks spawned with [`tokio::task::spawn_local`], so
//! messages must be delivered inside a [`tokio::task::LocalSet`].

use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::rc::{Rc, Weak};

use futures::FutureExt;
use futures::future::LocalBoxFuture;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::{ProtocolError, TransportError};
use crate::messaging::{
    CallRequest, CallbackReply, CancelRequest, Command, Envelope, QueryId, QueryRequest, action,
    command,
};
use crate::transport::Transport;

/// Outcome of an endpoint: a value or an error message for the caller.
pub type EndpointResult = Result<Value, String>;

type Endpoint = Rc<dyn Fn(Vec<Value>) -> LocalBoxFuture<'static, EndpointResult>>;

const SUFFIX_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Frontend side serving endpoints over one transport.
///
/// Cloning yields another handle to the same responder.
#[derive(Clone)]
pub struct Responder {
    inner: Rc<ResponderInner>,
}

struct ResponderInner {
    target: String,
    transport: Rc<dyn Transport>,
    endpoints: RefCell<HashMap<(String, String), Endpoint>>,

    /// Queries currently running, by identifier.
    running: RefCell<HashMap<QueryId, CancellationToken>>,

    errors: RefCell<Vec<String>>,
}

impl Responder {
    /// A fresh reverse target name for a frontend of `widget_target`.
    ///
    /// Every display of a widget needs its own name, so a random suffix is
    /// appended.
    pub fn target_for(widget_target: &str) -> String {
        let suffix: String = (0..8)
            .map(|_| SUFFIX_ALPHABET[rand::random_range(0..SUFFIX_ALPHABET.len())] as char)
            .collect();
        format!("{widget_target}-{suffix}")
    }

    /// Serve messages arriving on `transport`, the reverse connection
    /// listening under `target`.
    pub fn new(target: impl Into<String>, transport: Rc<dyn Transport>) -> Self {
        let responder = Self {
            inner: Rc::new(ResponderInner {
                target: target.into(),
                transport: transport.clone(),
                endpoints: RefCell::new(HashMap::new()),
                running: RefCell::new(HashMap::new()),
                errors: RefCell::new(Vec::new()),
            }),
        };

        let weak: Weak<ResponderInner> = Rc::downgrade(&responder.inner);
        transport.on_message(Box::new(move |message| {
            if let Some(inner) = weak.upgrade() {
                Responder { inner }.receive(message);
            }
        }));
        responder
    }

    /// Name the backend must open to reach this responder.
    pub fn target(&self) -> &str {
        &self.inner.target
    }

    /// Expose `handler` as `target.endpoint`. Replaces an existing endpoint
    /// of the same name.
    pub fn endpoint<F, Fut>(&self, target: &str, endpoint: &str, handler: F)
    where
        F: Fn(Vec<Value>) -> Fut + 'static,
        Fut: Future<Output = EndpointResult> + 'static,
    {
        let handler: Endpoint = Rc::new(move |args| handler(args).boxed_local());
        self.inner
            .endpoints
            .borrow_mut()
            .insert((target.to_string(), endpoint.to_string()), handler);
    }

    /// Announce this responder on the widget's own comm so the backend opens
    /// the reverse connection.
    pub fn register(&self, widget: &dyn Transport) -> Result<(), TransportError> {
        tracing::debug!(responder = %self.inner.target, "announcing frontend");
        widget.send(serde_json::json!({
            "command": command::REGISTER,
            "target": self.inner.target,
        }))
    }

    /// Errors recorded so far, oldest first.
    pub fn errors(&self) -> Vec<String> {
        self.inner.errors.borrow().clone()
    }

    /// Forget all recorded errors.
    pub fn clear_errors(&self) {
        self.inner.errors.borrow_mut().clear();
    }

    /// Number of queries still running.
    pub fn running(&self) -> usize {
        self.inner.running.borrow().len()
    }

    fn receive(&self, message: Value) {
        tracing::debug!(responder = %self.inner.target, %message, "received message");
        if let Err(error) = self.route(&message) {
            self.record(error);
        }
    }

    fn route(&self, message: &Value) -> Result<(), String> {
        let envelope = Envelope::from_message(message).map_err(|e| e.to_string())?;
        match envelope.action.as_str() {
            action::CALL => self.call(decode("call", envelope.data)?),
            action::QUERY => {
                let request: QueryRequest = decode("query", envelope.data)?;
                self.query(request.identifier, decode("query data", request.data)?);
                Ok(())
            }
            action::CANCEL => {
                let request: CancelRequest = decode("cancel", envelope.data)?;
                self.cancel(request.identifier)
            }
            other => Err(format!("Unsupported action {other}.")),
        }
    }

    fn lookup(&self, target: &str, endpoint: &str) -> Result<Endpoint, String> {
        self.inner
            .endpoints
            .borrow()
            .get(&(target.to_string(), endpoint.to_string()))
            .cloned()
            .ok_or_else(|| format!("No endpoint {endpoint} found in component {target}."))
    }

    fn call(&self, request: CallRequest) -> Result<(), String> {
        let handler = self.lookup(&request.target, &request.endpoint)?;
        let responder = self.clone();
        tokio::task::spawn_local(async move {
            if let Err(error) = handler(request.args).await {
                responder.record(error);
            }
        });
        Ok(())
    }

    fn query(&self, identifier: QueryId, request: CallRequest) {
        let handler = match self.lookup(&request.target, &request.endpoint) {
            Ok(handler) => handler,
            Err(error) => return self.reply(CallbackReply::error(identifier, error)),
        };

        let token = CancellationToken::new();
        self.inner
            .running
            .borrow_mut()
            .insert(identifier, token.clone());

        let responder = self.clone();
        tokio::task::spawn_local(async move {
            let outcome = tokio::select! {
                biased;
                _ = token.cancelled() => None,
                result = handler(request.args) => Some(result),
            };
            responder.inner.running.borrow_mut().remove(&identifier);

            match outcome {
                Some(Ok(value)) => responder.reply(CallbackReply::value(identifier, value)),
                Some(Err(error)) => responder.reply(CallbackReply::error(identifier, error)),
                None => tracing::debug!(%identifier, "query cancelled before completion"),
            }
        });
    }

    fn cancel(&self, identifier: QueryId) -> Result<(), String> {
        let token = self.inner.running.borrow_mut().remove(&identifier);
        match token {
            Some(token) => {
                token.cancel();
                Ok(())
            }
            None => Err(format!(
                "Cannot cancel request {identifier}. No cancellation for this request available anymore."
            )),
        }
    }

    fn reply(&self, reply: CallbackReply) {
        let result = serde_json::to_value(&reply)
            .and_then(|data| serde_json::to_value(Command::new(command::CALLBACK, data)))
            .map_err(|e| e.to_string())
            .and_then(|payload| self.inner.transport.send(payload).map_err(|e| e.to_string()));
        if let Err(error) = result {
            self.record(format!("Failed to answer query {}: {error}", reply.identifier));
        }
    }

    fn record(&self, error: String) {
        tracing::error!(responder = %self.inner.target, %error, "frontend error");
        self.inner.errors.borrow_mut().push(error);
    }
}

fn decode<T: DeserializeOwned>(what: &'static str, data: Value) -> Result<T, String> {
    serde_json::from_value(data).map_err(|e| ProtocolError::malformed(what, e).to_string())
}
