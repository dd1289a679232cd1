use crate::broker::{BrokerClient, PeekableStream, RawMessage};
use crate::config::ProxyConfig;
use crate::consumer::records;
use crate::consumer::topic_state::TopicState;
use crate::error::RestMqError;
use crate::types::{
    ConsumerInstanceConfig, ConsumerRecord, EmbeddedFormat, Offset, TopicName, TopicPartition,
    TopicPartitionOffset,
};
use crate::Result;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Read-path settings for one instance, resolved once at creation from the
/// global proxy config and the caller's per-instance overrides.
#[derive(Debug, Clone)]
pub(crate) struct InstanceSettings {
    pub response_max_bytes: u64,
    pub request_wait_ms: u64,
    /// `u64::MAX` when the min-bytes shortcut is disabled (negative config).
    pub response_min_bytes: u64,
    pub iterator_backoff_ms: u64,
}

impl InstanceSettings {
    pub fn resolve(proxy: &ProxyConfig, config: &ConsumerInstanceConfig) -> Self {
        let min_bytes = config.response_min_bytes.unwrap_or(proxy.fetch_min_bytes);
        Self {
            response_max_bytes: proxy.effective_response_max_bytes(),
            request_wait_ms: config.request_wait_ms.unwrap_or(proxy.fetch_max_wait_ms),
            response_min_bytes: if min_bytes < 0 {
                u64::MAX
            } else {
                min_bytes as u64
            },
            iterator_backoff_ms: proxy.iterator_backoff_ms,
        }
    }
}

/// One consumer instance: a broker connection plus the state of its (single)
/// topic subscription. Mutated by the manager and by whichever worker is
/// advancing a read task for it.
pub(crate) struct ConsumerInstance {
    group: String,
    id: String,
    format: EmbeddedFormat,
    settings: InstanceSettings,
    client: Arc<dyn BrokerClient>,
    topic_states: Mutex<HashMap<TopicName, Arc<TopicState>>>,
    shutting_down: AtomicBool,
    last_active_ms: AtomicU64,
    reads_in_flight: AtomicUsize,
}

impl ConsumerInstance {
    pub fn new(
        group: String,
        id: String,
        format: EmbeddedFormat,
        settings: InstanceSettings,
        client: Arc<dyn BrokerClient>,
        now_ms: u64,
    ) -> Self {
        Self {
            group,
            id,
            format,
            settings,
            client,
            topic_states: Mutex::new(HashMap::new()),
            shutting_down: AtomicBool::new(false),
            last_active_ms: AtomicU64::new(now_ms),
            reads_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn settings(&self) -> &InstanceSettings {
        &self.settings
    }

    /// The topic state for `topic`, created on first use. An instance serves
    /// one topic at a time: reads against any other topic are rejected while
    /// a subscription exists.
    pub fn get_or_create_topic_state(&self, topic: &str) -> Result<Arc<TopicState>> {
        let mut states = self.topic_states.lock();
        if let Some(state) = states.get(topic) {
            return Ok(Arc::clone(state));
        }
        if !states.is_empty() {
            return Err(RestMqError::AlreadySubscribed(topic.to_string()));
        }
        let state = Arc::new(TopicState::new(topic.to_string()));
        states.insert(topic.to_string(), Arc::clone(&state));
        Ok(state)
    }

    pub fn create_consumer_record(&self, raw: &RawMessage) -> Result<(ConsumerRecord, u64)> {
        records::create_consumer_record(self.format, raw)
    }

    pub async fn open_stream(&self, topic: &str) -> Result<PeekableStream> {
        let stream = self
            .client
            .open_stream(topic)
            .await
            .map_err(|e| RestMqError::BrokerInit(e.to_string()))?;
        Ok(PeekableStream::new(stream))
    }

    /// Snapshot the consumed offsets, commit them to the broker, and report
    /// one entry per consumed partition.
    pub async fn commit_offsets(&self) -> Result<Vec<TopicPartitionOffset>> {
        let snapshot: Vec<(TopicName, HashMap<u32, Offset>)> = {
            let states = self.topic_states.lock();
            states
                .iter()
                .map(|(topic, state)| (topic.clone(), state.offsets_snapshot()))
                .collect()
        };

        let mut to_commit = HashMap::new();
        for (topic, offsets) in &snapshot {
            for (partition, offset) in offsets {
                to_commit.insert(
                    TopicPartition {
                        topic: topic.clone(),
                        partition: *partition,
                    },
                    *offset,
                );
            }
        }
        self.client
            .commit_offsets(&to_commit)
            .await
            .map_err(|e| RestMqError::CommitFailed(e.to_string()))?;

        let mut committed: Vec<TopicPartitionOffset> = snapshot
            .into_iter()
            .flat_map(|(topic, offsets)| {
                offsets
                    .into_iter()
                    .map(move |(partition, offset)| TopicPartitionOffset {
                        topic: topic.clone(),
                        partition,
                        consumed: offset,
                        committed: offset,
                    })
            })
            .collect();
        committed.sort_by(|a, b| (&a.topic, a.partition).cmp(&(&b.topic, b.partition)));
        Ok(committed)
    }

    pub fn touch(&self, now_ms: u64) {
        self.last_active_ms.store(now_ms, Ordering::SeqCst);
    }

    pub fn begin_read(&self) {
        self.reads_in_flight.fetch_add(1, Ordering::SeqCst);
    }

    pub fn end_read(&self, now_ms: u64) {
        self.reads_in_flight.fetch_sub(1, Ordering::SeqCst);
        self.touch(now_ms);
    }

    pub fn is_idle(&self, now_ms: u64, timeout_ms: u64) -> bool {
        self.reads_in_flight.load(Ordering::SeqCst) == 0
            && now_ms.saturating_sub(self.last_active_ms.load(Ordering::SeqCst)) >= timeout_ms
    }

    pub fn mark_shutting_down(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    pub async fn close(&self) {
        if let Err(e) = self.client.close().await {
            warn!(group = %self.group, id = %self.id, "failed to close broker client: {e}");
        }
    }
}
