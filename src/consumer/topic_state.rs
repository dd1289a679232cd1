use crate::broker::PeekableStream;
use crate::types::{ConsumerRecord, Offset, PartitionId, TopicName};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Buffer rescued from a read that failed after accumulating messages. The
/// next read of the same topic starts from this instead of losing them.
pub(crate) struct FailedRead {
    pub messages: Vec<ConsumerRecord>,
    pub bytes_consumed: u64,
    pub exceeded_min_response_bytes: bool,
    pub will_exceed_max_response_bytes: bool,
}

/// Per-(instance, topic) serialization point: the broker stream, the offsets
/// consumed so far, and at most one rescued read.
///
/// The stream mutex doubles as the in-use flag: the read task currently
/// advancing holds an owned guard on it, so at most one task touches the
/// stream at a time and releasing is dropping the guard.
pub(crate) struct TopicState {
    topic: TopicName,
    stream: Arc<tokio::sync::Mutex<Option<PeekableStream>>>,
    consumed_offsets: Mutex<HashMap<PartitionId, Offset>>,
    failed_read: Mutex<Option<FailedRead>>,
}

impl TopicState {
    pub fn new(topic: TopicName) -> Self {
        Self {
            topic,
            stream: Arc::new(tokio::sync::Mutex::new(None)),
            consumed_offsets: Mutex::new(HashMap::new()),
            failed_read: Mutex::new(None),
        }
    }

    pub fn stream_handle(&self) -> Arc<tokio::sync::Mutex<Option<PeekableStream>>> {
        Arc::clone(&self.stream)
    }

    /// Mark messages as consumed. Only called once a read is actually being
    /// returned to the client; per-partition offsets are non-decreasing
    /// because messages arrive in stream order.
    pub fn record_consumed(&self, messages: &[ConsumerRecord]) {
        let mut offsets = self.consumed_offsets.lock();
        for message in messages {
            offsets.insert(message.partition, message.offset);
        }
    }

    pub fn offsets_snapshot(&self) -> HashMap<PartitionId, Offset> {
        self.consumed_offsets.lock().clone()
    }

    pub fn take_failed_read(&self) -> Option<FailedRead> {
        self.failed_read.lock().take()
    }

    /// Store a rescued read. The slot is empty here by construction: it is
    /// drained when the next task is built, and only the single task holding
    /// the stream can deposit.
    pub fn store_failed_read(&self, failed: FailedRead) {
        let mut slot = self.failed_read.lock();
        if slot.is_some() {
            warn!(topic = %self.topic, "overwriting non-empty failed-read slot");
        }
        *slot = Some(failed);
    }
}
