//! Minimal embedding example for tally-core
//!
//! This example drives the poll orchestrator from a custom application:
//! its own count sources, an in-memory publisher, and an application-owned
//! shutdown path.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tally_core::config::{OrchestratorConfig, SourceKind};
use tally_core::traits::{CountSource, CountSourceFactory};
use tally_core::{
    CachePolicy, Error, MemoryPublisher, PollOrchestrator, Result, SourceDescriptor,
    SourceRegistry,
};
use tokio::time::Duration;

/// Source whose count grows by one on every poll
struct GrowingSource {
    count: AtomicU64,
}

#[async_trait::async_trait]
impl CountSource for GrowingSource {
    async fn get(&self) -> Result<u64> {
        Ok(self.count.fetch_add(1, Ordering::SeqCst))
    }

    fn source_kind(&self) -> &'static str {
        "growing"
    }
}

/// Source that fails every other poll
struct FlakySource {
    calls: AtomicU64,
    value: u64,
}

#[async_trait::async_trait]
impl CountSource for FlakySource {
    async fn get(&self) -> Result<u64> {
        if self.calls.fetch_add(1, Ordering::SeqCst) % 2 == 1 {
            return Err(Error::count_source("upstream returned HTTP 503"));
        }
        Ok(self.value)
    }

    fn source_kind(&self) -> &'static str {
        "flaky"
    }
}

/// Factory so the flaky source can also be built from configuration
struct FlakyFactory;

impl CountSourceFactory for FlakyFactory {
    fn create(&self, kind: &SourceKind) -> Result<Box<dyn CountSource>> {
        match kind {
            SourceKind::Custom { config, .. } => {
                let value = config
                    .get("value")
                    .and_then(|v| v.as_u64())
                    .ok_or_else(|| Error::config("flaky source needs a numeric value"))?;
                Ok(Box::new(FlakySource {
                    calls: AtomicU64::new(0),
                    value,
                }))
            }
            _ => Err(Error::config("Invalid config for flaky source")),
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    println!("=== Embedded tally-core Example ===\n");

    // Sources can be built directly or through the registry
    let registry = SourceRegistry::new();
    registry.register_source("flaky", Box::new(FlakyFactory));
    let flaky = registry.create_source(&SourceKind::Custom {
        factory: "flaky".to_string(),
        config: serde_json::json!({ "value": 40 }),
    })?;

    let sources = vec![
        SourceDescriptor::new(
            "growing",
            Duration::from_millis(200),
            Arc::new(GrowingSource {
                count: AtomicU64::new(1),
            }),
        ),
        SourceDescriptor::new("flaky", Duration::from_millis(500), Arc::from(flaky)),
    ];

    let publisher = MemoryPublisher::new();
    let config = OrchestratorConfig {
        floor_ms: 100,
        poll_timeout_ms: Some(1_000),
        cache_policy: CachePolicy::HoldLastSuccess,
        event_channel_capacity: 100,
    };

    println!("1. Creating orchestrator...");
    let (mut orchestrator, mut event_rx) =
        PollOrchestrator::new(sources, Box::new(publisher.clone()), config)?;

    let event_listener = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            println!("[Event] {:?}", event);
        }
    });

    println!("2. Running for two seconds...");
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let handle = tokio::spawn(async move {
        let result = orchestrator.run_with_shutdown(shutdown_rx).await;
        (orchestrator, result)
    });

    tokio::time::sleep(Duration::from_secs(2)).await;

    println!("3. Requesting shutdown...");
    let _ = shutdown_tx.send(());
    let (orchestrator, result) = handle
        .await
        .map_err(|e| Error::config(format!("orchestrator task failed: {}", e)))?;
    result?;

    for (name, state) in orchestrator.snapshot().iter() {
        let at = state
            .last_success_at
            .map(|at| at.to_rfc3339())
            .unwrap_or_else(|| "never".to_string());
        println!(
            "   {}: last success {:?} at {}, {} consecutive failure(s)",
            name, state.last_success, at, state.consecutive_failures
        );
    }

    // Dropping the orchestrator closes the event channel
    drop(orchestrator);
    let _ = tokio::time::timeout(Duration::from_millis(100), event_listener).await;

    println!("\n4. Published totals: {:?}", publisher.published().await);
    println!("\n=== Embedding Successful ===");

    Ok(())
}
