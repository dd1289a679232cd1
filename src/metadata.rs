use crate::Result;
use async_trait::async_trait;

/// Cluster metadata lookups the read path depends on. Implemented against the
/// broker's admin surface in production; mocked by tests.
#[async_trait]
pub trait MetadataObserver: Send + Sync {
    async fn topic_exists(&self, topic: &str) -> Result<bool>;
}
