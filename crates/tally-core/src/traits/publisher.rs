// # Publisher Trait
//
// Defines the interface for persisting a changed aggregate.
//
// ## Implementations
//
// - Template file rewrite: `TemplatePublisher`
// - In-memory record: `MemoryPublisher`
//
// The orchestrator decides *whether* to publish; the publisher only
// decides *how*.

use async_trait::async_trait;

/// Trait for aggregate publishers
///
/// # Trust Level: Trusted (Core Component)
///
/// ## Allowed Capabilities
/// - ✅ Write the output artifact
///
/// ## Forbidden Capabilities
/// - ❌ Decide whether the total changed (owned by `PollOrchestrator`)
/// - ❌ Retry on its own (the orchestrator retries on the next tick)
///
/// Only one publish is ever in flight: ticks are serialized and each tick
/// publishes at most once.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Persist a new aggregate total
    ///
    /// # Returns
    ///
    /// - `Ok(())`: The total was written
    /// - `Err(Error)`: The write failed; the orchestrator logs it and
    ///   keeps the previous published total
    async fn publish(&self, total: u64) -> Result<(), crate::Error>;
}
