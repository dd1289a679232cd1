use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

// Custom serde implementations for Bytes to maintain serialization compatibility
mod bytes_serde {
    use super::*;

    pub fn serialize<S>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_bytes(bytes)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Bytes, D::Error>
    where
        D: Deserializer<'de>,
    {
        let vec: Vec<u8> = Vec::deserialize(deserializer)?;
        Ok(Bytes::from(vec))
    }
}

pub type TopicName = String;
pub type PartitionId = u32;
pub type Offset = u64;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct TopicPartition {
    pub topic: TopicName,
    pub partition: PartitionId,
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.topic, self.partition)
    }
}

/// Embedded format of the message payloads carried through the proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddedFormat {
    #[default]
    Binary,
    Json,
}

/// A key or value payload in the client-facing representation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    Binary(#[serde(with = "bytes_serde")] Bytes),
    Json(serde_json::Value),
}

/// One record as returned to an HTTP client of the proxy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumerRecord {
    pub topic: TopicName,
    pub key: Option<Payload>,
    pub value: Payload,
    pub partition: PartitionId,
    pub offset: Offset,
}

/// Per-partition offsets reported back from an offset commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicPartitionOffset {
    pub topic: TopicName,
    pub partition: PartitionId,
    pub consumed: Offset,
    pub committed: Offset,
}

/// Caller-supplied settings for one consumer instance. Any field left unset
/// falls back to the corresponding global in `ProxyConfig`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsumerInstanceConfig {
    pub id: Option<String>,
    pub name: Option<String>,
    #[serde(default)]
    pub format: EmbeddedFormat,
    pub auto_offset_reset: Option<String>,
    pub auto_commit_enable: Option<bool>,
    /// Shadows `proxy.fetch.min.bytes` for this instance only.
    pub response_min_bytes: Option<i64>,
    /// Shadows `proxy.fetch.max.wait.ms` for this instance only.
    pub request_wait_ms: Option<u64>,
}

impl ConsumerInstanceConfig {
    pub fn binary() -> Self {
        Self {
            format: EmbeddedFormat::Binary,
            ..Default::default()
        }
    }

    pub fn json() -> Self {
        Self {
            format: EmbeddedFormat::Json,
            ..Default::default()
        }
    }
}
