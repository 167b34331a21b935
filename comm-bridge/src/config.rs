//! Configuration for channels and fan-out queries.

use std::time::Duration;

/// Channel behavior knobs.
///
/// The defaults impose no limits: the backlog of messages sent before a
/// channel connects is unbounded and queries wait for their callback forever.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Maximum number of messages queued while the channel is not yet bound.
    /// `None` means unbounded.
    pub max_backlog: Option<usize>,

    /// Per-channel time limit applied by fan-out queries.
    /// `None` waits until a callback arrives.
    pub query_timeout: Option<Duration>,
}

impl ChannelConfig {
    /// Bound the backlog of an unbound channel.
    pub fn with_max_backlog(mut self, max_backlog: usize) -> Self {
        self.max_backlog = Some(max_backlog);
        self
    }

    /// Give up on fan-out query branches after `timeout`.
    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = Some(timeout);
        self
    }

    /// Settings for interactive frontends: a small backlog and a query timeout
    /// close to what a user is willing to wait.
    pub fn interactive() -> Self {
        Self {
            max_backlog: Some(64),
            query_timeout: Some(Duration::from_secs(5)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_unbounded() {
        let config = ChannelConfig::default();
        assert_eq!(config.max_backlog, None);
        assert_eq!(config.query_timeout, None);
    }

    #[test]
    fn test_builders() {
        let config = ChannelConfig::default()
            .with_max_backlog(8)
            .with_query_timeout(Duration::from_millis(250));
        assert_eq!(config.max_backlog, Some(8));
        assert_eq!(config.query_timeout, Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_interactive_preset_bounds_both() {
        let config = ChannelConfig::interactive();
        assert_eq!(config.max_backlog, Some(64));
        assert_eq!(config.query_timeout, Some(Duration::from_secs(5)));
        assert_ne!(config, ChannelConfig::default());
    }
}
