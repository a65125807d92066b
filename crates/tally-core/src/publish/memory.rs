// # Memory Publisher
//
// In-memory implementation of Publisher.
//
// Records every published total instead of writing a file. Useful for
// embedding the orchestrator in another application and for tests.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::Error;
use crate::traits::Publisher;

/// In-memory publisher
///
/// Clones share the same history, so a test can keep one handle and give
/// the other to the orchestrator.
///
/// # Example
///
/// ```rust,no_run
/// use tally_core::publish::MemoryPublisher;
/// use tally_core::traits::Publisher;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let publisher = MemoryPublisher::new();
///
///     publisher.publish(10).await?;
///     assert_eq!(publisher.last().await, Some(10));
///
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryPublisher {
    inner: Arc<RwLock<Vec<u64>>>,
}

impl MemoryPublisher {
    /// Create a new empty memory publisher
    pub fn new() -> Self {
        Self::default()
    }

    /// Every published total, oldest first
    pub async fn published(&self) -> Vec<u64> {
        self.inner.read().await.clone()
    }

    /// The most recently published total
    pub async fn last(&self) -> Option<u64> {
        self.inner.read().await.last().copied()
    }

    /// Number of publishes so far
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Check if nothing has been published
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

#[async_trait]
impl Publisher for MemoryPublisher {
    async fn publish(&self, total: u64) -> Result<(), Error> {
        self.inner.write().await.push(total);
        Ok(())
    }
}
