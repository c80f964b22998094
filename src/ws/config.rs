#![expect(
    clippy::module_name_repetitions,
    reason = "Configuration types intentionally mirror the module name for clarity"
)]

use std::time::Duration;

use bon::Builder;

const DEFAULT_GRACE_WINDOW_DURATION: Duration = Duration::from_secs(1);
const DEFAULT_HEARTBEAT_INTERVAL_DURATION: Duration = Duration::from_secs(30);
const DEFAULT_HEARTBEAT_TIMEOUT_DURATION: Duration = Duration::from_secs(15);
const DEFAULT_INITIAL_BACKOFF_DURATION: Duration = Duration::from_secs(1);
const DEFAULT_BACKOFF_MULTIPLIER: u32 = 2;
const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 7;

/// Configuration for the session channel.
///
/// ```
/// use std::time::Duration;
/// use notebook_session_client::ws::config::{Config, ReconnectConfig};
///
/// let config = Config::builder()
///     .heartbeat_interval(Duration::from_secs(10))
///     .reconnect(ReconnectConfig::builder().max_attempts(3).build())
///     .build();
/// assert_eq!(config.reconnect.max_attempts, 3);
/// ```
#[non_exhaustive]
#[derive(Debug, Clone, Builder)]
pub struct Config {
    /// Closes observed within this window of opening a transport count as
    /// connection failures
    #[builder(default = DEFAULT_GRACE_WINDOW_DURATION)]
    pub grace_window: Duration,
    /// Interval for sending PING frames to keep the connection alive
    #[builder(default = DEFAULT_HEARTBEAT_INTERVAL_DURATION)]
    pub heartbeat_interval: Duration,
    /// Additional time to wait for a PONG before considering the connection dead,
    /// and the longest wait for the server to answer a close
    #[builder(default = DEFAULT_HEARTBEAT_TIMEOUT_DURATION)]
    pub heartbeat_timeout: Duration,
    /// Reconnection strategy configuration
    #[builder(default)]
    pub reconnect: ReconnectConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Configuration for automatic reconnection behavior.
#[non_exhaustive]
#[derive(Debug, Clone, Builder)]
pub struct ReconnectConfig {
    /// Reconnection attempts allowed before the channel is declared dead
    #[builder(default = DEFAULT_MAX_RECONNECT_ATTEMPTS)]
    pub max_attempts: u32,
    /// Delay before the first reconnection attempt
    #[builder(default = DEFAULT_INITIAL_BACKOFF_DURATION)]
    pub initial_backoff: Duration,
    /// Growth factor applied per attempt
    #[builder(default = DEFAULT_BACKOFF_MULTIPLIER)]
    pub backoff_multiplier: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_policy() {
        let config = Config::default();

        assert_eq!(config.grace_window, Duration::from_secs(1));
        assert_eq!(config.reconnect.max_attempts, 7);
        assert_eq!(config.reconnect.initial_backoff, Duration::from_secs(1));
        assert_eq!(config.reconnect.backoff_multiplier, 2);
    }

    #[test]
    fn builder_overrides_single_field() {
        let config = Config::builder()
            .grace_window(Duration::from_millis(250))
            .build();

        assert_eq!(config.grace_window, Duration::from_millis(250));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
    }
}
