//! Test doubles and common utilities for orchestrator contract tests
//!
//! This module provides minimal sources and publishers whose behavior is
//! scripted by the test, plus helpers to assemble an orchestrator.

#![allow(dead_code)]

use tally_core::cache::CachePolicy;
use tally_core::error::{Error, Result};
use tally_core::orchestrator::{OrchestratorEvent, PollOrchestrator, SourceDescriptor};
use tally_core::traits::{CountSource, Publisher};
use tally_core::OrchestratorConfig;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// A source that replays scripted responses
///
/// Each call consumes the next response; the last one repeats forever.
pub struct ScriptedSource {
    responses: Arc<Mutex<VecDeque<std::result::Result<u64, String>>>>,
    call_count: Arc<AtomicUsize>,
}

impl ScriptedSource {
    pub fn new(responses: impl IntoIterator<Item = std::result::Result<u64, String>>) -> Self {
        let responses: VecDeque<_> = responses.into_iter().collect();
        assert!(!responses.is_empty(), "script needs at least one response");
        Self {
            responses: Arc::new(Mutex::new(responses)),
            call_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A source that always returns `count`
    pub fn constant(count: u64) -> Self {
        Self::new([Ok(count)])
    }

    /// A source that always fails with `cause`
    pub fn failing(cause: &str) -> Self {
        Self::new([Err(cause.to_string())])
    }

    /// Get the number of times get() was called
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Create a new ScriptedSource that shares script and counter with an existing one
    pub fn sharing_with(other: &Self) -> Self {
        Self {
            responses: Arc::clone(&other.responses),
            call_count: Arc::clone(&other.call_count),
        }
    }
}

#[async_trait::async_trait]
impl CountSource for ScriptedSource {
    async fn get(&self) -> Result<u64> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        let mut responses = self.responses.lock().unwrap();
        let next = if responses.len() > 1 {
            responses.pop_front().unwrap()
        } else {
            responses.front().cloned().unwrap()
        };
        next.map_err(Error::count_source)
    }

    fn source_kind(&self) -> &'static str {
        "scripted"
    }
}

/// A source that panics instead of returning an error
pub struct PanickingSource;

#[async_trait::async_trait]
impl CountSource for PanickingSource {
    async fn get(&self) -> Result<u64> {
        panic!("element #total-sponsors-card vanished");
    }

    fn source_kind(&self) -> &'static str {
        "panicking"
    }
}

/// A source that never resolves
pub struct HangingSource;

#[async_trait::async_trait]
impl CountSource for HangingSource {
    async fn get(&self) -> Result<u64> {
        std::future::pending().await
    }

    fn source_kind(&self) -> &'static str {
        "hanging"
    }
}

/// A source that takes `delay` before returning `count`
pub struct SlowSource {
    pub delay: Duration,
    pub count: u64,
}

#[async_trait::async_trait]
impl CountSource for SlowSource {
    async fn get(&self) -> Result<u64> {
        tokio::time::sleep(self.delay).await;
        Ok(self.count)
    }

    fn source_kind(&self) -> &'static str {
        "slow"
    }
}

/// A publisher that records totals and can be told to fail
#[derive(Clone, Default)]
pub struct FlakyPublisher {
    failing: Arc<AtomicBool>,
    attempts: Arc<Mutex<Vec<u64>>>,
    published: Arc<Mutex<Vec<u64>>>,
}

impl FlakyPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent publishes fail (or succeed again)
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Every total publish() was called with
    pub fn attempts(&self) -> Vec<u64> {
        self.attempts.lock().unwrap().clone()
    }

    /// Every total that was published successfully
    pub fn published(&self) -> Vec<u64> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Publisher for FlakyPublisher {
    async fn publish(&self, total: u64) -> Result<()> {
        self.attempts.lock().unwrap().push(total);
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::publish("disk full"));
        }
        self.published.lock().unwrap().push(total);
        Ok(())
    }
}

/// Helper to build a descriptor
pub fn descriptor(
    name: &str,
    interval_ms: u64,
    source: impl CountSource + 'static,
) -> SourceDescriptor {
    SourceDescriptor::new(name, Duration::from_millis(interval_ms), Arc::new(source))
}

/// Helper to create an orchestrator config for testing
pub fn test_config(policy: CachePolicy) -> OrchestratorConfig {
    OrchestratorConfig {
        floor_ms: 100,
        poll_timeout_ms: Some(2_000),
        cache_policy: policy,
        event_channel_capacity: 100,
    }
}

/// Helper to assemble an orchestrator around a FlakyPublisher
pub fn orchestrator(
    sources: Vec<SourceDescriptor>,
    config: OrchestratorConfig,
) -> (
    PollOrchestrator,
    FlakyPublisher,
    mpsc::Receiver<OrchestratorEvent>,
) {
    let publisher = FlakyPublisher::new();
    let (orchestrator, events) =
        PollOrchestrator::new(sources, Box::new(publisher.clone()), config)
            .expect("orchestrator construction succeeds");
    (orchestrator, publisher, events)
}

/// Drain every event currently queued
pub fn drain(events: &mut mpsc::Receiver<OrchestratorEvent>) -> Vec<OrchestratorEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}
