//! Plugin-based source registry
//!
//! The registry allows count sources to be registered dynamically at
//! runtime, avoiding hardcoded if-else chains.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tally_core::registry::SourceRegistry;
//!
//! let registry = SourceRegistry::new();
//! tally_source_twitch::register(&registry);
//! tally_source_patreon::register(&registry);
//!
//! let (mut orchestrator, events) = registry.build_orchestrator(config).await?;
//! orchestrator.run().await?;
//! ```
//!
//! ## Registration
//!
//! Source crates expose a `register()` function:
//!
//! ```rust,ignore
//! pub fn register(registry: &SourceRegistry) {
//!     registry.register_source("twitch", Box::new(TwitchFactory));
//! }
//! ```

use crate::config::{SourceKind, TallyConfig};
use crate::error::{Error, Result};
use crate::orchestrator::{OrchestratorEvent, PollOrchestrator, SourceDescriptor};
use crate::publish::create_publisher;
use crate::traits::{CountSource, CountSourceFactory};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Registry of count source factories keyed by kind name
///
/// ## Thread Safety
///
/// The registry uses interior mutability with RwLock, allowing concurrent
/// reads and exclusive writes.
#[derive(Default)]
pub struct SourceRegistry {
    factories: RwLock<HashMap<String, Box<dyn CountSourceFactory>>>,
}

impl SourceRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a count source factory
    ///
    /// # Parameters
    ///
    /// - `name`: Source kind name (e.g., "twitch", "patreon")
    /// - `factory`: Factory object for creating source instances
    pub fn register_source(&self, name: impl Into<String>, factory: Box<dyn CountSourceFactory>) {
        let name = name.into();
        let mut factories = self
            .factories
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        factories.insert(name, factory);
    }

    /// Create a count source from its kind configuration
    ///
    /// # Returns
    ///
    /// - `Ok(Box<dyn CountSource>)`: Created source instance
    /// - `Err(Error)`: If the kind is not registered or construction fails
    pub fn create_source(&self, kind: &SourceKind) -> Result<Box<dyn CountSource>> {
        let type_name = kind.type_name();
        let factories = self
            .factories
            .read()
            .unwrap_or_else(PoisonError::into_inner);

        let factory = factories
            .get(type_name)
            .ok_or_else(|| Error::config(format!("Unknown source type: {}", type_name)))?;

        factory.create(kind)
    }

    /// Create descriptors for every enabled source in `config`
    ///
    /// Any factory failure aborts the whole build: a source that cannot
    /// start is a startup failure, not a per-tick one.
    pub fn create_descriptors(&self, config: &TallyConfig) -> Result<Vec<SourceDescriptor>> {
        let mut descriptors = Vec::new();

        for source in &config.sources {
            if !source.enabled {
                debug!("Source {} is disabled, skipping", source.name);
                continue;
            }

            let created = self.create_source(&source.kind).map_err(|e| {
                Error::config(format!("Failed to create source {}: {}", source.name, e))
            })?;
            info!(
                "Created {} source {} (every {}ms)",
                created.source_kind(),
                source.name,
                source.poll_interval_ms
            );

            descriptors.push(SourceDescriptor::new(
                source.name.clone(),
                source.poll_interval(),
                Arc::from(created),
            ));
        }

        if descriptors.is_empty() {
            return Err(Error::config("All configured sources are disabled"));
        }

        Ok(descriptors)
    }

    /// Validate `config` and build a ready-to-run orchestrator
    pub async fn build_orchestrator(
        &self,
        config: TallyConfig,
    ) -> Result<(PollOrchestrator, mpsc::Receiver<OrchestratorEvent>)> {
        config.validate()?;

        let descriptors = self.create_descriptors(&config)?;
        let publisher = create_publisher(&config.publisher).await?;

        PollOrchestrator::new(descriptors, publisher, config.orchestrator)
    }

    /// List all registered source kinds
    pub fn list_sources(&self) -> Vec<String> {
        let factories = self
            .factories
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        factories.keys().cloned().collect()
    }

    /// Check if a source kind is registered
    pub fn has_source(&self, name: &str) -> bool {
        let factories = self
            .factories
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        factories.contains_key(name)
    }
}
