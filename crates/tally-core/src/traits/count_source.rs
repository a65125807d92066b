// # Count Source Trait
//
// Defines the interface for fetching one external count (subscribers,
// patrons, sponsors).
//
// ## Implementations
//
// - Twitch Helix subscriptions: `tally-source-twitch` crate
// - Patreon campaign members: `tally-source-patreon` crate
//
// ## Usage
//
// ```rust,ignore
// use tally_core::CountSource;
//
// #[tokio::main]
// async fn main() -> tally_core::Result<()> {
//     let source = /* CountSource implementation */;
//
//     let count = source.get().await?;
//     println!("{} supporters", count);
//
//     Ok(())
// }
// ```

use async_trait::async_trait;

/// Trait for count source implementations
///
/// A source exposes a single no-argument operation. Everything that
/// identifies the source (credentials, target URL, session) is bound when
/// the source is constructed, before it is handed to the orchestrator.
///
/// # Thread Safety
///
/// Implementations must be thread-safe and usable across async tasks.
///
/// # Trust Level: Untrusted
///
/// Sources are **untrusted** components:
///
/// ## Allowed Capabilities
/// - ✅ Perform network I/O against their own endpoint
/// - ✅ Follow pagination within a single `get()` call
/// - ✅ Apply their own request timeout
///
/// ## Forbidden Capabilities
/// - ❌ Spawn polling loops (scheduling is owned by `PollOrchestrator`)
/// - ❌ Cache counts between calls (owned by `ResultCache`)
/// - ❌ Access other sources or the publisher
///
/// A source that panics or never resolves is contained by the
/// orchestrator: the panic is caught and the call is bounded by the
/// configured poll timeout. Both surface as a failed poll for that
/// source only.
#[async_trait]
pub trait CountSource: Send + Sync {
    /// Fetch the current count
    ///
    /// # Returns
    ///
    /// - `Ok(u64)`: The current count
    /// - `Err(Error)`: If the count could not be determined
    async fn get(&self) -> Result<u64, crate::Error>;

    /// Get the source kind (for logging/debugging)
    ///
    /// # Returns
    ///
    /// A static string identifying the kind of source (e.g., "twitch", "patreon")
    fn source_kind(&self) -> &'static str;
}

/// Helper trait for constructing count sources from configuration
pub trait CountSourceFactory: Send + Sync {
    /// Create a CountSource instance from configuration
    ///
    /// Construction is where credentials are checked. A factory error is a
    /// startup failure and stops the process before the poll loop starts.
    fn create(
        &self,
        config: &crate::config::SourceKind,
    ) -> Result<Box<dyn CountSource>, crate::Error>;
}
