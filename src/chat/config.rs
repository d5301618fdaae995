//! Chat connection configuration

use std::time::Duration;

/// Shortest timer period accepted; tokio intervals reject zero
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Chat connection configuration options
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Challenge endpoint, `nc` and `site` query parameters are appended
    pub challenge_url: String,

    /// Script listing the live chat relays
    pub server_config_url: String,

    /// WebSocket URL template, `{host}` is replaced by the relay name
    pub ws_url_template: String,

    /// Site tag sent with the challenge answer
    pub site: String,

    /// Full handshake attempts before giving up
    pub max_attempts: u32,

    /// Heartbeat period
    pub keepalive_interval: Duration,

    /// Bound on every handshake line wait
    pub handshake_timeout: Duration,

    /// Single-result mode gives up waiting for a better line after this
    pub model_data_timeout: Duration,

    /// Capacity of the delivery channel between dispatch and consumer
    pub feed_capacity: usize,

    /// Feed mode only delivers replies to our own request id
    pub filter_request_id: bool,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            challenge_url: "https://api.myfreecams.com/dc".into(),
            server_config_url: "https://www.myfreecams.com/_js/serverconfig.js".into(),
            ws_url_template: "wss://{host}.myfreecams.com/fcsl".into(),
            site: "www".into(),
            max_attempts: 3,
            keepalive_interval: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(30),
            model_data_timeout: Duration::from_secs(30),
            feed_capacity: 1024,
            filter_request_id: false,
        }
    }
}

impl ChatConfig {
    /// WebSocket URL of a relay
    pub fn ws_url(&self, host: &str) -> String {
        self.ws_url_template.replace("{host}", host)
    }

    /// Set maximum handshake attempts
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Set heartbeat period
    pub fn keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = interval.max(MIN_INTERVAL);
        self
    }

    /// Set handshake line timeout
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set single-result deadline
    pub fn model_data_timeout(mut self, timeout: Duration) -> Self {
        self.model_data_timeout = timeout;
        self
    }

    /// Set delivery channel capacity
    pub fn feed_capacity(mut self, capacity: usize) -> Self {
        self.feed_capacity = capacity.max(1);
        self
    }

    /// Only deliver feed lines answering our request id
    pub fn filter_request_id(mut self, enabled: bool) -> Self {
        self.filter_request_id = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ChatConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.keepalive_interval, Duration::from_secs(10));
        assert_eq!(config.model_data_timeout, Duration::from_secs(30));
        assert!(!config.filter_request_id);
    }

    #[test]
    fn test_ws_url() {
        let config = ChatConfig::default();
        assert_eq!(config.ws_url("xchat42"), "wss://xchat42.myfreecams.com/fcsl");
    }

    #[test]
    fn test_builder_chain() {
        let config = ChatConfig::default()
            .max_attempts(0)
            .feed_capacity(0)
            .keepalive_interval(Duration::ZERO)
            .handshake_timeout(Duration::from_secs(5))
            .filter_request_id(true);

        assert_eq!(config.max_attempts, 1);
        assert_eq!(config.feed_capacity, 1);
        assert_eq!(config.keepalive_interval, MIN_INTERVAL);
        assert_eq!(config.handshake_timeout, Duration::from_secs(5));
        assert!(config.filter_request_id);
    }
}
