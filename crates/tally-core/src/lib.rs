// # tally-core
//
// Core library for the tally supporter counter.
//
// ## Architecture Overview
//
// This library polls several independent count sources, sums their
// counts, and republishes the sum only when it changes:
// - **CountSource**: Trait for fetching one source's current count
// - **Publisher**: Trait for persisting a changed aggregate
// - **ResultCache**: Per-source last attempt and last outcome
// - **PollOrchestrator**: Core loop that schedules polls, fans them out,
//   aggregates, and publishes
// - **SourceRegistry**: Plugin-based registry for count sources
//
// ## Design Principles
//
// 1. **Separation of Concerns**: Scheduling and aggregation live here,
//    API/scraping glue lives in the source crates
// 2. **Failure Isolation**: One source failing never affects another
// 3. **Plugin-Based**: Sources are registered by kind, no hard-coded if-else
// 4. **Library-First**: The orchestrator can be embedded without the daemon
// 5. **Change-Triggered**: The publisher only runs when the total moves

pub mod traits;
pub mod cache;
pub mod orchestrator;
pub mod registry;
pub mod config;
pub mod error;
pub mod publish;

// Re-export core types for convenience
pub use traits::{CountSource, Publisher};
pub use cache::{CachePolicy, Outcome, ResultCache, SourceState};
pub use orchestrator::{OrchestratorEvent, PollOrchestrator, SourceDescriptor, TickReport};
pub use registry::SourceRegistry;
pub use config::{OrchestratorConfig, PublisherConfig, SourceConfig, SourceKind, TallyConfig};
pub use error::{Error, Result};
pub use publish::{MemoryPublisher, TemplatePublisher};
