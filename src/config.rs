use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub broker: BrokerConfig,
    pub proxy: ProxyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Bootstrap address list handed to the broker client factory.
    pub bootstrap_servers: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: "localhost:9092".to_string(),
        }
    }
}

/// Settings governing consumer read tasks and the worker pool that drives
/// them. Field names mirror the flat configuration keys of the REST surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// proxy.fetch.max.wait.ms: deadline applied to each read task.
    pub fetch_max_wait_ms: u64,
    /// proxy.fetch.min.bytes: floor above which a read returns early.
    /// Negative disables the shortcut.
    pub fetch_min_bytes: i64,
    /// consumer.response.max.bytes: server-side cap on response size.
    pub response_max_bytes: u64,
    /// consumer.request.max.bytes: caller-side cap; the effective cap is the
    /// smaller of the two.
    pub request_max_bytes: u64,
    /// consumer.iterator.timeout.ms: bounded wait of one broker stream poll.
    pub iterator_timeout_ms: u64,
    /// consumer.iterator.backoff.ms: idle backoff between polls when the
    /// stream is empty.
    pub iterator_backoff_ms: u64,
    /// consumer.request.timeout.ms: broker-level request timeout. Does not
    /// influence how long the proxy waits before answering a read.
    pub request_timeout_ms: u64,
    /// consumer.threads: size of the read worker pool.
    pub read_workers: usize,
    /// consumer.instance.timeout.ms: idle consumer instances are deleted
    /// after this long without activity.
    pub instance_timeout_ms: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            fetch_max_wait_ms: 1000,
            fetch_min_bytes: -1, // shortcut disabled
            response_max_bytes: 64 * 1024 * 1024,
            request_max_bytes: 64 * 1024 * 1024,
            iterator_timeout_ms: 1,
            iterator_backoff_ms: 50,
            request_timeout_ms: 1000,
            read_workers: 4,
            instance_timeout_ms: 300_000, // 5 minutes
        }
    }
}

impl ProxyConfig {
    /// The server-side response cap: the smaller of the response and request
    /// byte limits. Per-request maxima are clamped to this.
    pub fn effective_response_max_bytes(&self) -> u64 {
        self.response_max_bytes.min(self.request_max_bytes)
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.read_workers == 0 {
            return Err(crate::error::RestMqError::InvalidConfig(
                "proxy.read_workers must be greater than 0".to_string(),
            ));
        }
        if self.fetch_max_wait_ms == 0 {
            return Err(crate::error::RestMqError::InvalidConfig(
                "proxy.fetch_max_wait_ms must be greater than 0".to_string(),
            ));
        }
        if self.iterator_backoff_ms == 0 {
            return Err(crate::error::RestMqError::InvalidConfig(
                "proxy.iterator_backoff_ms must be greater than 0".to_string(),
            ));
        }
        if self.response_max_bytes == 0 || self.request_max_bytes == 0 {
            return Err(crate::error::RestMqError::InvalidConfig(
                "proxy response/request byte limits must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl Config {
    pub fn validate(&self) -> crate::Result<()> {
        if self.broker.bootstrap_servers.is_empty() {
            return Err(crate::error::RestMqError::InvalidConfig(
                "broker.bootstrap_servers must not be empty".to_string(),
            ));
        }
        self.proxy.validate()
    }
}
