//! In-process transport.
//!
//! [`MemoryEnd::pair`] returns two connected ends. Whatever one end sends is
//! delivered to the other end's handler wrapped as `{"content": {"data": ..}}`,
//! like a kernel comm message.
//!
//! Delivery is synchronous but never reentrant: a message sent from inside a
//! handler is queued and handed over once the current handler returns, so each
//! end sees its messages one at a time and in order. Messages arriving before
//! a handler is installed are buffered.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::rc::{Rc, Weak};

use async_trait::async_trait;
use serde_json::Value;

use super::{Connector, MessageHandler, Transport};
use crate::error::TransportError;
use crate::messaging::wrap;

/// One end of an in-process connection.
///
/// Dropping an end closes the pair for the other side.
#[derive(Clone)]
pub struct MemoryEnd {
    inner: Rc<EndInner>,
}

struct EndInner {
    name: String,
    peer: RefCell<Weak<EndInner>>,
    handler: RefCell<Option<Rc<dyn Fn(Value)>>>,
    inbox: RefCell<VecDeque<Value>>,
    delivering: Cell<bool>,
    closed: Rc<Cell<bool>>,
}

impl EndInner {
    fn deliver(&self, message: Value) {
        self.inbox.borrow_mut().push_back(message);
        self.drain();
    }

    fn drain(&self) {
        if self.delivering.get() {
            return;
        }
        self.delivering.set(true);
        loop {
            let Some(handler) = self.handler.borrow().clone() else {
                break;
            };
            let Some(message) = self.inbox.borrow_mut().pop_front() else {
                break;
            };
            handler(message);
        }
        self.delivering.set(false);
    }
}

impl MemoryEnd {
    /// Create two connected ends named `name`.
    pub fn pair(name: &str) -> (MemoryEnd, MemoryEnd) {
        let closed = Rc::new(Cell::new(false));
        let make = || {
            Rc::new(EndInner {
                name: name.to_string(),
                peer: RefCell::new(Weak::new()),
                handler: RefCell::new(None),
                inbox: RefCell::new(VecDeque::new()),
                delivering: Cell::new(false),
                closed: closed.clone(),
            })
        };
        let (a, b) = (make(), make());
        *a.peer.borrow_mut() = Rc::downgrade(&b);
        *b.peer.borrow_mut() = Rc::downgrade(&a);
        (MemoryEnd { inner: a }, MemoryEnd { inner: b })
    }

    /// The name both ends were created with.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Close the connection for both ends.
    pub fn close(&self) {
        self.inner.closed.set(true);
    }

    /// Whether either end closed the connection.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.get() || self.inner.peer.borrow().upgrade().is_none()
    }

    /// Install a handler that records every inbound message.
    pub fn capture(&self) -> Rc<RefCell<Vec<Value>>> {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        self.on_message(Box::new(move |message| sink.borrow_mut().push(message)));
        seen
    }
}

impl Transport for MemoryEnd {
    fn send(&self, payload: Value) -> Result<(), TransportError> {
        if self.inner.closed.get() {
            return Err(TransportError::Closed);
        }
        let peer = self
            .inner
            .peer
            .borrow()
            .upgrade()
            .ok_or(TransportError::Closed)?;
        peer.deliver(wrap(payload));
        Ok(())
    }

    fn on_message(&self, handler: MessageHandler) {
        *self.inner.handler.borrow_mut() = Some(Rc::from(handler));
        self.inner.drain();
    }
}

/// Connector over in-process pairs.
///
/// A frontend calls [`MemoryConnector::expose`] to listen under a name and
/// keeps the returned end; the backend's [`Connector::open`] picks up the
/// other end. Each exposed name can be opened once.
#[derive(Clone, Default)]
pub struct MemoryConnector {
    listening: Rc<RefCell<HashMap<String, MemoryEnd>>>,
}

impl MemoryConnector {
    /// Create a connector with nothing exposed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Listen under `name` and return the listening (frontend) end.
    pub fn expose(&self, name: &str) -> MemoryEnd {
        let (frontend, backend) = MemoryEnd::pair(name);
        self.listening
            .borrow_mut()
            .insert(name.to_string(), backend);
        frontend
    }

    /// Whether `name` is exposed and not yet opened.
    pub fn is_listening(&self, name: &str) -> bool {
        self.listening.borrow().contains_key(name)
    }
}

#[async_trait(?Send)]
impl Connector for MemoryConnector {
    async fn open(&self, name: &str) -> Result<Rc<dyn Transport>, TransportError> {
        let end = self
            .listening
            .borrow_mut()
            .remove(name)
            .ok_or_else(|| TransportError::UnknownTarget(name.to_string()))?;
        tracing::debug!(name, "opened in-memory transport");
        Ok(Rc::new(end))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_pair_delivers_wrapped_messages() {
        let (a, b) = MemoryEnd::pair("t");
        let seen = b.capture();

        a.send(json!({"action": "call"})).unwrap();
        assert_eq!(
            *seen.borrow(),
            vec![json!({"content": {"data": {"action": "call"}}})]
        );
    }

    #[test]
    fn test_buffers_until_handler_installed() {
        let (a, b) = MemoryEnd::pair("t");
        a.send(json!(1)).unwrap();
        a.send(json!(2)).unwrap();

        let seen = b.capture();
        let data: Vec<_> = seen.borrow().iter().map(|m| m["content"]["data"].clone()).collect();
        assert_eq!(data, vec![json!(1), json!(2)]);
    }

    #[test]
    fn test_nested_sends_are_delivered_in_order() {
        let (a, b) = MemoryEnd::pair("t");
        let seen = Rc::new(RefCell::new(Vec::new()));

        let echo = a.clone();
        let log = seen.clone();
        b.on_message(Box::new(move |message| {
            let n = message["content"]["data"].as_i64().unwrap_or_default();
            log.borrow_mut().push(format!("start {n}"));
            if n < 3 {
                // Lands in this handler's own inbox while it is still running.
                echo.send(json!(n + 1)).unwrap();
            }
            log.borrow_mut().push(format!("end {n}"));
        }));

        a.send(json!(1)).unwrap();
        assert_eq!(
            *seen.borrow(),
            vec!["start 1", "end 1", "start 2", "end 2", "start 3", "end 3"]
        );
    }

    #[test]
    fn test_close_and_drop_fail_sends() {
        let (a, b) = MemoryEnd::pair("t");
        b.close();
        assert!(a.is_closed());
        assert_eq!(a.send(json!(1)), Err(TransportError::Closed));

        let (c, d) = MemoryEnd::pair("u");
        drop(d);
        assert_eq!(c.send(json!(1)), Err(TransportError::Closed));
    }

    #[tokio::test]
    async fn test_connector_opens_each_name_once() {
        let connector = MemoryConnector::new();
        let frontend = connector.expose("w-1");
        let seen = frontend.capture();
        assert!(connector.is_listening("w-1"));

        let backend = connector.open("w-1").await.unwrap();
        backend.send(json!("hello")).unwrap();
        assert_eq!(seen.borrow().len(), 1);

        assert!(!connector.is_listening("w-1"));
        assert!(matches!(
            connector.open("w-1").await,
            Err(TransportError::UnknownTarget(name)) if name == "w-1"
        ));
    }
}
