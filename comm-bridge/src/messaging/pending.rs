//! Pending query table.
//!
//! Every query awaiting its callback owns one entry here, keyed by its
//! [`QueryId`]. An entry leaves the table exactly once: when a callback
//! resolves or rejects it, or when the waiting caller gives up.
//!
//! ```text
//! query():     register(id) ──► send "query" ──► await Reply
//! callback:    resolve(id, value) / reject(id, error) ──► Reply fires
//! cancel:      remove(id) ──► send "cancel"; a late callback is now unknown
//! ```

use std::cell::RefCell;
use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::{ChannelError, ProtocolError};
use crate::messaging::QueryId;

/// Outcome delivered to the caller of a query.
pub type QueryResult = Result<Value, ChannelError>;

/// Receiving half of a pending query's result slot.
pub type Reply = oneshot::Receiver<QueryResult>;

/// One in-flight query.
///
/// The slot is consumed on completion, so a query can be settled at most once.
#[derive(Debug)]
pub struct PendingQuery {
    identifier: QueryId,
    slot: oneshot::Sender<QueryResult>,
}

impl PendingQuery {
    /// Create a query and the receiver its caller awaits.
    pub fn new(identifier: QueryId) -> (Self, Reply) {
        let (slot, reply) = oneshot::channel();
        (Self { identifier, slot }, reply)
    }

    /// The query's identifier.
    pub fn identifier(&self) -> QueryId {
        self.identifier
    }

    /// Settle the query with a value.
    pub fn resolve(self, value: Value) {
        self.settle(Ok(value));
    }

    /// Settle the query with an error.
    pub fn reject(self, error: ChannelError) {
        self.settle(Err(error));
    }

    fn settle(self, result: QueryResult) {
        if self.slot.send(result).is_err() {
            // The caller stopped waiting between our lookup and now.
            tracing::debug!(identifier = %self.identifier, "query settled after caller left");
        }
    }
}

/// Table of queries awaiting a callback, owned by a single channel.
#[derive(Debug, Default)]
pub struct PendingQueries {
    queries: RefCell<HashMap<QueryId, PendingQuery>>,
}

impl PendingQueries {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a query and return the receiver its caller awaits.
    ///
    /// Must happen before the query message is handed to the transport so a
    /// fast reply always finds its entry.
    pub fn register(&self, identifier: QueryId) -> Reply {
        let (query, reply) = PendingQuery::new(identifier);
        let previous = self.queries.borrow_mut().insert(identifier, query);
        debug_assert!(previous.is_none(), "query identifier {identifier} reused");
        reply
    }

    /// Take the entry for `identifier` out of the table.
    pub fn take(&self, identifier: QueryId) -> Result<PendingQuery, ProtocolError> {
        self.queries
            .borrow_mut()
            .remove(&identifier)
            .ok_or(ProtocolError::UnknownIdentifier(identifier))
    }

    /// Resolve the query with a value and drop its entry.
    pub fn resolve(&self, identifier: QueryId, value: Value) -> Result<(), ProtocolError> {
        self.take(identifier)?.resolve(value);
        Ok(())
    }

    /// Reject the query with an error and drop its entry.
    pub fn reject(&self, identifier: QueryId, error: ChannelError) -> Result<(), ProtocolError> {
        self.take(identifier)?.reject(error);
        Ok(())
    }

    /// Drop the entry of a query whose caller gave up.
    ///
    /// Returns whether the query was still pending.
    pub fn remove(&self, identifier: QueryId) -> bool {
        self.queries.borrow_mut().remove(&identifier).is_some()
    }

    /// Whether `identifier` is still awaiting a callback.
    pub fn contains(&self, identifier: QueryId) -> bool {
        self.queries.borrow().contains_key(&identifier)
    }

    /// Number of queries awaiting a callback.
    pub fn len(&self) -> usize {
        self.queries.borrow().len()
    }

    /// Whether no query is awaiting a callback.
    pub fn is_empty(&self) -> bool {
        self.queries.borrow().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_resolve_delivers_value_and_removes_entry() {
        let table = PendingQueries::new();
        let id = QueryId::from_u128(1);
        let reply = table.register(id);
        assert!(table.contains(id));

        table.resolve(id, json!("pong")).unwrap();
        assert!(table.is_empty());
        assert_eq!(reply.await.unwrap().unwrap(), json!("pong"));
    }

    #[tokio::test]
    async fn test_reject_delivers_error() {
        let table = PendingQueries::new();
        let id = QueryId::from_u128(2);
        let reply = table.register(id);

        table
            .reject(id, ChannelError::Remote("no ref".into()))
            .unwrap();
        let result = reply.await.unwrap();
        assert!(matches!(result, Err(ChannelError::Remote(msg)) if msg == "no ref"));
    }

    #[test]
    fn test_unknown_identifier_leaves_others_untouched() {
        let table = PendingQueries::new();
        let live = QueryId::from_u128(3);
        let _reply = table.register(live);

        let stray = QueryId::from_u128(4);
        assert_eq!(
            table.resolve(stray, json!(1)),
            Err(ProtocolError::UnknownIdentifier(stray))
        );
        assert_eq!(table.len(), 1);
        assert!(table.contains(live));
    }

    #[test]
    fn test_settled_entry_cannot_settle_twice() {
        let table = PendingQueries::new();
        let id = QueryId::from_u128(5);
        let _reply = table.register(id);

        table.resolve(id, json!(1)).unwrap();
        assert!(table.resolve(id, json!(2)).is_err());
        assert!(table.reject(id, ChannelError::Timeout).is_err());
    }

    #[test]
    fn test_remove_reports_whether_pending() {
        let table = PendingQueries::new();
        let id = QueryId::from_u128(6);
        let mut reply = table.register(id);

        assert!(table.remove(id));
        assert!(!table.remove(id));
        // The dropped slot closes the receiver instead of leaving it pending.
        assert!(reply.try_recv().is_err());
    }

    #[test]
    fn test_settle_after_caller_left_is_harmless() {
        let table = PendingQueries::new();
        let id = QueryId::from_u128(7);
        drop(table.register(id));

        table.resolve(id, json!(null)).unwrap();
        assert!(table.is_empty());
    }
}
