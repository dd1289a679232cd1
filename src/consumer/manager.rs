use crate::broker::{BrokerClientFactory, BrokerConsumerConfig};
use crate::config::Config;
use crate::consumer::instance::{ConsumerInstance, InstanceSettings};
use crate::consumer::read_task::ReadTask;
use crate::consumer::worker::ReadWorkerPool;
use crate::error::RestMqError;
use crate::metadata::MetadataObserver;
use crate::time::Clock;
use crate::types::{ConsumerInstanceConfig, TopicPartitionOffset};
use crate::Result;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub use crate::consumer::read_task::ReadCallback;

pub type CommitCallback = Box<dyn FnOnce(Result<Vec<TopicPartitionOffset>>) + Send + 'static>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct InstanceKey {
    group: String,
    id: String,
}

/// Front door of the consumer proxy: registers instances and dispatches
/// reads, offset commits and deletes against them.
pub struct ConsumerManager {
    config: Config,
    clock: Arc<dyn Clock>,
    metadata: Arc<dyn MetadataObserver>,
    factory: Arc<dyn BrokerClientFactory>,
    instances: Arc<DashMap<InstanceKey, Arc<ConsumerInstance>>>,
    pool: ReadWorkerPool,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

impl ConsumerManager {
    pub fn new(
        config: Config,
        clock: Arc<dyn Clock>,
        metadata: Arc<dyn MetadataObserver>,
        factory: Arc<dyn BrokerClientFactory>,
    ) -> Result<Self> {
        config.validate()?;
        let pool = ReadWorkerPool::start(config.proxy.read_workers, Arc::clone(&clock));
        let instances = Arc::new(DashMap::new());
        let manager = Self {
            config,
            clock,
            metadata,
            factory,
            instances,
            pool,
            reaper: Mutex::new(None),
        };
        *manager.reaper.lock() = Some(manager.spawn_reaper());
        Ok(manager)
    }

    /// Register a new consumer instance in `group` and return its id. A
    /// caller-supplied id wins over a caller-supplied name; with neither, an
    /// id is generated.
    pub async fn create_consumer(
        &self,
        group: &str,
        instance_config: ConsumerInstanceConfig,
    ) -> Result<String> {
        let id = instance_config
            .id
            .clone()
            .or_else(|| instance_config.name.clone())
            .unwrap_or_else(|| format!("rest-consumer-{}", Uuid::new_v4()));
        let key = InstanceKey {
            group: group.to_string(),
            id: id.clone(),
        };
        if self.instances.contains_key(&key) {
            return Err(RestMqError::AlreadyExists(id));
        }

        let broker_config = BrokerConsumerConfig {
            bootstrap_servers: self.config.broker.bootstrap_servers.clone(),
            group: group.to_string(),
            instance_id: id.clone(),
            auto_offset_reset: instance_config
                .auto_offset_reset
                .clone()
                .unwrap_or_else(|| "largest".to_string()),
            auto_commit_enable: instance_config.auto_commit_enable.unwrap_or(false),
            iterator_timeout_ms: self.config.proxy.iterator_timeout_ms,
            request_timeout_ms: self.config.proxy.request_timeout_ms,
        };
        let client = self
            .factory
            .create(&broker_config)
            .await
            .map_err(|e| RestMqError::BrokerInit(e.to_string()))?;

        let settings = InstanceSettings::resolve(&self.config.proxy, &instance_config);
        let instance = Arc::new(ConsumerInstance::new(
            group.to_string(),
            id.clone(),
            instance_config.format,
            settings,
            Arc::from(client),
            self.clock.now_ms(),
        ));

        match self.instances.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                instance.close().await;
                Err(RestMqError::AlreadyExists(id))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(instance);
                info!(group, id = %id, "created consumer instance");
                Ok(id)
            }
        }
    }

    /// Submit one read against `topic`. A missing instance or topic fires the
    /// callback synchronously with `NotFound` and returns no handle; any
    /// other outcome (including a synchronous `AlreadySubscribed`) resolves
    /// the returned receiver once the callback has fired.
    pub async fn read_topic(
        &self,
        group: &str,
        instance_id: &str,
        topic: &str,
        max_bytes: u64,
        callback: ReadCallback,
    ) -> Option<oneshot::Receiver<()>> {
        let key = InstanceKey {
            group: group.to_string(),
            id: instance_id.to_string(),
        };
        let Some(instance) = self.instances.get(&key).map(|e| Arc::clone(e.value())) else {
            callback(Err(RestMqError::ConsumerNotFound(instance_id.to_string())));
            return None;
        };

        match self.metadata.topic_exists(topic).await {
            Ok(true) => {}
            Ok(false) => {
                callback(Err(RestMqError::TopicNotFound(topic.to_string())));
                return None;
            }
            Err(e) => {
                callback(Err(e));
                return None;
            }
        }

        let (done_tx, done_rx) = oneshot::channel();
        let wrapped: ReadCallback = Box::new(move |result| {
            callback(result);
            let _ = done_tx.send(());
        });

        instance.begin_read();
        let task = ReadTask::new(
            instance,
            topic.to_string(),
            max_bytes,
            Arc::clone(&self.clock),
            wrapped,
        );
        if !task.is_done() {
            self.pool.submit(task);
        }
        Some(done_rx)
    }

    /// Commit the instance's consumed offsets to the broker. The callback
    /// reports one entry per consumed partition.
    pub fn commit_offsets(
        &self,
        group: &str,
        instance_id: &str,
        callback: CommitCallback,
    ) -> Option<JoinHandle<()>> {
        let key = InstanceKey {
            group: group.to_string(),
            id: instance_id.to_string(),
        };
        let Some(instance) = self.instances.get(&key).map(|e| Arc::clone(e.value())) else {
            callback(Err(RestMqError::ConsumerNotFound(instance_id.to_string())));
            return None;
        };
        let clock = Arc::clone(&self.clock);
        Some(tokio::spawn(async move {
            let result = instance.commit_offsets().await;
            instance.touch(clock.now_ms());
            callback(result);
        }))
    }

    /// Tear an instance down. An in-flight read observes the shutdown flag at
    /// its next step and finishes with `ShuttingDown`.
    pub async fn delete_consumer(&self, group: &str, instance_id: &str) -> Result<()> {
        let key = InstanceKey {
            group: group.to_string(),
            id: instance_id.to_string(),
        };
        let Some((_, instance)) = self.instances.remove(&key) else {
            return Err(RestMqError::ConsumerNotFound(instance_id.to_string()));
        };
        instance.mark_shutting_down();
        instance.close().await;
        info!(group, id = instance_id, "deleted consumer instance");
        Ok(())
    }

    /// Stop the worker pool and close every registered instance. Queued reads
    /// finish with `ShuttingDown`.
    pub async fn shutdown(&self) {
        if let Some(reaper) = self.reaper.lock().take() {
            reaper.abort();
        }
        self.pool.shutdown().await;
        let keys: Vec<InstanceKey> = self.instances.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            if let Some((_, instance)) = self.instances.remove(&key) {
                instance.mark_shutting_down();
                instance.close().await;
            }
        }
        info!("consumer manager shut down");
    }

    fn spawn_reaper(&self) -> JoinHandle<()> {
        let instances = Arc::clone(&self.instances);
        let clock = Arc::clone(&self.clock);
        let timeout_ms = self.config.proxy.instance_timeout_ms;
        tokio::spawn(async move {
            // The sweep cadence is wall-clock; idleness itself is measured on
            // the proxy clock.
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            loop {
                ticker.tick().await;
                expire_idle_instances(&instances, clock.now_ms(), timeout_ms).await;
            }
        })
    }
}

/// Delete instances that have been idle past the timeout with no read in
/// flight.
async fn expire_idle_instances(
    instances: &DashMap<InstanceKey, Arc<ConsumerInstance>>,
    now_ms: u64,
    timeout_ms: u64,
) {
    let expired: Vec<InstanceKey> = instances
        .iter()
        .filter(|entry| entry.value().is_idle(now_ms, timeout_ms))
        .map(|entry| entry.key().clone())
        .collect();
    for key in expired {
        if let Some((_, instance)) = instances.remove(&key) {
            if !instance.is_idle(now_ms, timeout_ms) {
                // Lost the race with a new read; put it back.
                warn!(group = %key.group, id = %key.id, "skipping expiry of active instance");
                instances.insert(key, instance);
                continue;
            }
            instance.mark_shutting_down();
            instance.close().await;
            debug!(group = %key.group, id = %key.id, "expired idle consumer instance");
        }
    }
}
