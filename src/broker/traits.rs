use crate::error::RestMqError;
use crate::types::{Offset, PartitionId, TopicName, TopicPartition};
use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;

/// One message as delivered by the broker client, before embedded-format
/// conversion.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub topic: TopicName,
    pub partition: PartitionId,
    pub offset: Offset,
    pub key: Option<Bytes>,
    pub value: Bytes,
}

/// Outcome of one bounded stream poll. An exhausted wait is the `Empty`
/// value, not an error: it is the common case and drives the read task's
/// backoff.
#[derive(Debug)]
pub enum PollOutcome {
    Ready(RawMessage),
    Empty,
    Failed(RestMqError),
}

/// A subscription's message stream. `poll` waits at most the configured
/// iterator timeout (a few milliseconds) before reporting `Empty`.
#[async_trait]
pub trait MessageStream: Send {
    async fn poll(&mut self) -> PollOutcome;
}

/// Connection owned by one consumer instance.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Open the message stream for a topic. Called once per topic, lazily on
    /// the first read.
    async fn open_stream(&self, topic: &str) -> Result<Box<dyn MessageStream>>;

    async fn commit_offsets(&self, offsets: &HashMap<TopicPartition, Offset>) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// Settings resolved by the manager for one broker client.
#[derive(Debug, Clone)]
pub struct BrokerConsumerConfig {
    pub bootstrap_servers: String,
    pub group: String,
    pub instance_id: String,
    pub auto_offset_reset: String,
    pub auto_commit_enable: bool,
    /// Bounded wait applied to each stream poll.
    pub iterator_timeout_ms: u64,
    /// Broker-level request timeout. Not consulted by the read path: only
    /// the proxy's own fetch wait governs when a read returns.
    pub request_timeout_ms: u64,
}

#[async_trait]
pub trait BrokerClientFactory: Send + Sync {
    async fn create(&self, config: &BrokerConsumerConfig) -> Result<Box<dyn BrokerClient>>;
}
