//! Error types for channels, fan-out queries and the transport seam.
//!
//! Errors are split by who sees them:
//! - [`ProtocolError`]: a single inbound message could not be handled. These
//!   never leave `dispatch`; they are logged and the channel keeps serving.
//! - [`TransportError`]: raised by the transport collaborator.
//! - [`ChannelError`]: returned to the caller of `send`, `query`, `call` or
//!   `connect`.

use crate::messaging::QueryId;

/// Failure to handle one inbound message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// The message carried no `command` field.
    #[error("message carries no command")]
    MissingCommand,

    /// The command is not registered on the receiving side.
    #[error("unsupported command {0}")]
    UnsupportedCommand(String),

    /// The payload could not be decoded.
    #[error("malformed {what}: {message}")]
    Malformed {
        /// What was being decoded.
        what: &'static str,
        /// Decoder message.
        message: String,
    },

    /// A callback arrived for an identifier with no pending query.
    #[error("no pending callback for {0}")]
    UnknownIdentifier(QueryId),

    /// An identifier was not a 32 digit hex token.
    #[error("malformed query identifier {0:?}")]
    MalformedIdentifier(String),

    /// A callback carried both `value` and `error`, or neither.
    #[error("callback for {0} must carry exactly one of value or error")]
    AmbiguousCallback(QueryId),
}

impl ProtocolError {
    pub(crate) fn malformed(what: &'static str, err: serde_json::Error) -> Self {
        ProtocolError::Malformed {
            what,
            message: err.to_string(),
        }
    }
}

/// Errors surfaced by a transport implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The transport was closed by either side.
    #[error("transport closed")]
    Closed,

    /// No remote endpoint is listening under this name.
    #[error("no remote target named {0}")]
    UnknownTarget(String),

    /// Any other delivery failure.
    #[error("transport failure: {0}")]
    Other(String),
}

/// Errors returned to the caller of a channel operation.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// `connect` was called on a channel that already has a transport.
    #[error("cannot reconnect already connected channel {channel}")]
    AlreadyConnected {
        /// The channel that rejected the second binding.
        channel: String,
    },

    /// The transport refused the message.
    #[error("delivery failed: {0}")]
    Transport(#[from] TransportError),

    /// The outbound payload could not be encoded.
    #[error("encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    /// Too many messages are waiting for the channel to connect.
    #[error("backlog full: capacity {capacity}")]
    BacklogFull {
        /// Configured backlog bound.
        capacity: usize,
    },

    /// The remote side answered the query with an error.
    #[error("remote error: {0}")]
    Remote(String),

    /// The reply could not be interpreted as either a value or an error.
    #[error("malformed reply to query {0}")]
    MalformedReply(QueryId),

    /// The query was cancelled before a reply arrived.
    #[error("query cancelled")]
    Cancelled,

    /// No reply arrived within the configured time.
    #[error("query timed out")]
    Timeout,

    /// The channel went away while the operation was in flight.
    #[error("channel disconnected")]
    Disconnected,

    /// A fan-out query was issued while no channel exists.
    #[error("cannot query when there is nothing displayed in the frontend yet")]
    NothingToQuery,

    /// A first-reply fan-out finished without any successful reply.
    #[error("no channel replied successfully ({} failed)", .failures.len())]
    NoSuccessfulReply {
        /// One error per channel, in completion order.
        failures: Vec<ChannelError>,
    },
}

impl ChannelError {
    /// Whether this error stems from cancellation rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ChannelError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_display() {
        let id: QueryId = "000000000000000000000000000000ff".parse().unwrap();
        assert_eq!(
            ProtocolError::UnknownIdentifier(id).to_string(),
            "no pending callback for 000000000000000000000000000000ff"
        );
        assert_eq!(
            ProtocolError::UnsupportedCommand("heartbeat".to_string()).to_string(),
            "unsupported command heartbeat"
        );
    }

    #[test]
    fn test_channel_error_from_transport() {
        let err: ChannelError = TransportError::Closed.into();
        assert!(matches!(err, ChannelError::Transport(TransportError::Closed)));
        assert_eq!(err.to_string(), "delivery failed: transport closed");
    }

    #[test]
    fn test_no_successful_reply_counts_failures() {
        let err = ChannelError::NoSuccessfulReply {
            failures: vec![ChannelError::Remote("boom".into()), ChannelError::Timeout],
        };
        assert_eq!(err.to_string(), "no channel replied successfully (2 failed)");
        assert!(!err.is_cancelled());
        assert!(ChannelError::Cancelled.is_cancelled());
    }
}
