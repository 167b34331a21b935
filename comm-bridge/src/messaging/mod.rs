//! Wire types and query correlation.
//!
//! - [`QueryId`]: random token pairing a query with its callback
//! - [`envelope`]: JSON shapes of actions, commands and their payloads
//! - [`PendingQueries`]: per-channel table of queries awaiting a callback

pub mod envelope;
mod identifier;
mod pending;

pub use envelope::{
    CallRequest, CallbackReply, CancelRequest, Command, Envelope, QueryRequest, Registration,
    action, command, wrap,
};
pub use identifier::QueryId;
pub use pending::{PendingQueries, PendingQuery, QueryResult, Reply};
