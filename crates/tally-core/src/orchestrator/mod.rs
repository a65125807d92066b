//! Core poll orchestrator
//!
//! The PollOrchestrator is responsible for:
//! - Deciding which sources are due on each tick
//! - Calling due sources concurrently with per-source failure isolation
//! - Recording attempts and outcomes in the ResultCache
//! - Publishing the aggregate when it changes
//! - Sleeping until the next source becomes due
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  ┌──────────────┐  ┌──────────────┐
//! │ CountSource  │  │ CountSource  │  │ CountSource  │
//! └──────────────┘  └──────────────┘  └──────────────┘
//!         ▲                 ▲                 ▲
//!         └─────── fan-out / fan-in ──────────┘
//!                           │
//!                  ┌──────────────────┐
//!                  │ PollOrchestrator │
//!                  └──────────────────┘
//!                           │
//!         ┌─────────────────┼─────────────────┐
//!         ▼                 ▼                 ▼
//! ┌──────────────┐  ┌──────────────┐  ┌──────────────┐
//! │ ResultCache  │  │  Publisher   │  │    Events    │
//! │ (record)     │  │ (on change)  │  │  (notify)    │
//! └──────────────┘  └──────────────┘  └──────────────┘
//! ```
//!
//! ## Tick Flow
//!
//! 1. Select sources whose interval has elapsed since their last attempt
//! 2. Record the attempt, then call every due source concurrently
//! 3. Wait for all calls to settle (no short-circuit on failure)
//! 4. Record each outcome
//! 5. Aggregate under the cache policy
//! 6. Publish if the aggregate differs from the last published total
//! 7. Sleep until the earliest next due time, never less than the floor

mod dispatch;

use crate::cache::{CachePolicy, CacheSnapshot, Outcome, ResultCache};
use crate::config::OrchestratorConfig;
use crate::error::{Error, Result};
use crate::traits::{CountSource, Publisher};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use dispatch::poll_source;

/// Static description of one source
///
/// Created once at startup and never changed.
#[derive(Clone)]
pub struct SourceDescriptor {
    /// Unique source name
    pub name: String,
    /// Minimum time between two dispatches of this source
    pub poll_interval: Duration,
    /// The source itself
    pub source: Arc<dyn CountSource>,
}

impl SourceDescriptor {
    /// Create a new source descriptor
    pub fn new(
        name: impl Into<String>,
        poll_interval: Duration,
        source: Arc<dyn CountSource>,
    ) -> Self {
        Self {
            name: name.into(),
            poll_interval,
            source,
        }
    }
}

impl std::fmt::Debug for SourceDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceDescriptor")
            .field("name", &self.name)
            .field("poll_interval", &self.poll_interval)
            .field("kind", &self.source.source_kind())
            .finish()
    }
}

/// Phase of the orchestrator within a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorPhase {
    /// Waiting for the next wake time
    Idle,
    /// Due sources selected, calls being issued
    Dispatching,
    /// Waiting for dispatched calls to settle
    Collecting,
    /// Summing, publishing, and scheduling
    Aggregating,
}

/// Events emitted by the PollOrchestrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorEvent {
    /// Poll loop started
    Started {
        sources_count: usize,
    },

    /// A source returned a count
    PollSucceeded {
        source: String,
        count: u64,
        elapsed_ms: u64,
    },

    /// A source failed (error, panic, or timeout)
    PollFailed {
        source: String,
        error: String,
        consecutive_failures: u32,
        /// When the source last succeeded (`None` = never)
        last_success_at: Option<DateTime<Utc>>,
    },

    /// A changed aggregate was published
    Published {
        total: u64,
        previous: Option<u64>,
    },

    /// Publishing a changed aggregate failed
    PublishFailed {
        total: u64,
        error: String,
    },

    /// Poll loop stopped
    Stopped {
        reason: String,
    },
}

/// Summary of one tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    /// Names of the sources dispatched this tick, in configuration order
    pub dispatched: Vec<String>,
    /// Outcome of every dispatched call, in the same order
    pub outcomes: Vec<(String, Outcome)>,
    /// Aggregate after this tick
    pub aggregate: u64,
    /// The total published this tick, if any
    pub published: Option<u64>,
    /// Publish error this tick, if a publish was attempted and failed
    pub publish_error: Option<String>,
    /// How long to sleep before the next tick
    pub next_delay: Duration,
}

/// Core poll orchestrator
///
/// Owns the source descriptors, the result cache, and the last published
/// total. There is no global state: everything a tick needs is reachable
/// from `&mut self`.
///
/// ## Lifecycle
///
/// 1. Create with [`PollOrchestrator::new()`]
/// 2. Start with [`PollOrchestrator::run()`] or drive ticks manually with
///    [`PollOrchestrator::tick()`]
/// 3. Runs until a shutdown signal is received
///
/// ## Concurrency
///
/// Ticks are strictly serialized. Inside a tick every due source is
/// polled concurrently on the orchestrator's own task; no tasks are
/// spawned and no locks are taken.
pub struct PollOrchestrator {
    /// Sources in configuration order
    sources: Vec<SourceDescriptor>,

    /// Per-source attempt and outcome record
    cache: ResultCache,

    /// Publisher for changed aggregates
    publisher: Box<dyn Publisher>,

    /// Last successfully published total (`None` until the first publish)
    last_published: Option<u64>,

    /// Minimum sleep between ticks
    floor: Duration,

    /// Upper bound for a single source call
    poll_timeout: Option<Duration>,

    /// What a failed poll does to the aggregate
    cache_policy: CachePolicy,

    /// Current phase
    phase: OrchestratorPhase,

    /// Event sender for external monitoring
    event_tx: mpsc::Sender<OrchestratorEvent>,
}

impl PollOrchestrator {
    /// Create a new poll orchestrator
    ///
    /// # Parameters
    ///
    /// - `sources`: Source descriptors (names must be unique)
    /// - `publisher`: Publisher implementation
    /// - `config`: Orchestrator configuration
    ///
    /// # Returns
    ///
    /// A tuple of (orchestrator, event_receiver) where event_receiver yields
    /// orchestrator events
    pub fn new(
        sources: Vec<SourceDescriptor>,
        publisher: Box<dyn Publisher>,
        config: OrchestratorConfig,
    ) -> Result<(Self, mpsc::Receiver<OrchestratorEvent>)> {
        config.validate()?;

        if sources.is_empty() {
            return Err(Error::config("No sources configured"));
        }

        let floor = config.floor();
        let mut names = HashSet::new();
        for descriptor in &sources {
            if !names.insert(descriptor.name.as_str()) {
                return Err(Error::config(format!(
                    "Duplicate source name: {}",
                    descriptor.name
                )));
            }
            if descriptor.poll_interval.is_zero() {
                return Err(Error::config(format!(
                    "Source {} poll interval must be > 0",
                    descriptor.name
                )));
            }
            if descriptor.poll_interval < floor {
                return Err(Error::config(format!(
                    "Source {} polls every {:?}, below the {:?} sleep floor",
                    descriptor.name, descriptor.poll_interval, floor
                )));
            }
        }

        let (tx, rx) = mpsc::channel(config.event_channel_capacity);
        let cache = ResultCache::new(sources.iter().map(|d| d.name.clone()));

        let orchestrator = Self {
            sources,
            cache,
            publisher,
            last_published: None,
            floor,
            poll_timeout: config.poll_timeout(),
            cache_policy: config.cache_policy,
            phase: OrchestratorPhase::Idle,
            event_tx: tx,
        };

        Ok((orchestrator, rx))
    }

    /// Run the poll loop until Ctrl-C
    ///
    /// # Returns
    ///
    /// - `Ok(())`: Clean shutdown
    /// - `Err(Error)`: Fatal error
    pub async fn run(&mut self) -> Result<()> {
        self.run_internal(None).await
    }

    /// Run the poll loop until `shutdown_rx` fires (or its sender is dropped)
    ///
    /// Used by the daemon, which maps SIGTERM/SIGINT onto the channel, and
    /// by embedding applications that own their own shutdown path.
    pub async fn run_with_shutdown(&mut self, shutdown_rx: oneshot::Receiver<()>) -> Result<()> {
        self.run_internal(Some(shutdown_rx)).await
    }

    async fn run_internal(&mut self, shutdown_rx: Option<oneshot::Receiver<()>>) -> Result<()> {
        self.emit_event(OrchestratorEvent::Started {
            sources_count: self.sources.len(),
        });
        info!("Starting poll loop for {} source(s)", self.sources.len());

        let shutdown = async move {
            match shutdown_rx {
                Some(rx) => {
                    let _ = rx.await;
                }
                None => {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        error!("Failed to listen for Ctrl-C: {}", e);
                    }
                }
            }
        };
        tokio::pin!(shutdown);

        // A tick is never cancelled; shutdown is observed while sleeping.
        loop {
            let report = self.tick().await;
            debug!(
                "Tick done: dispatched={:?} aggregate={} next in {}ms",
                report.dispatched,
                report.aggregate,
                report.next_delay.as_millis()
            );

            tokio::select! {
                _ = tokio::time::sleep(report.next_delay) => {}

                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    self.emit_event(OrchestratorEvent::Stopped {
                        reason: "Shutdown signal".to_string(),
                    });
                    break;
                }
            }
        }

        info!("Poll loop stopped");
        Ok(())
    }

    /// Run a single tick
    ///
    /// Dispatches every due source, records outcomes, publishes a changed
    /// aggregate, and computes the delay until the next tick. A tick with
    /// no due source skips dispatch but still reports the aggregate and
    /// the next delay.
    ///
    /// # Cancel safety
    ///
    /// Not cancel safe. Dropping the future mid-tick leaves `phase()` at
    /// whatever phase it reached and the dispatched sources marked as
    /// attempted with no outcome. The next `tick` starts from scratch and
    /// restores a consistent phase. `run` never cancels a tick.
    pub async fn tick(&mut self) -> TickReport {
        let now = Instant::now();
        self.phase = OrchestratorPhase::Dispatching;

        let due: Vec<usize> = self
            .sources
            .iter()
            .enumerate()
            .filter(|(_, d)| {
                self.cache
                    .get(&d.name)
                    .is_none_or(|state| state.is_due(now, d.poll_interval))
            })
            .map(|(idx, _)| idx)
            .collect();

        if due.is_empty() {
            debug!("No source due, skipping dispatch");
        }

        // Mark attempts before awaiting so an in-flight call already
        // pushes the source's next due time forward.
        let mut dispatched = Vec::with_capacity(due.len());
        for &idx in &due {
            let name = &self.sources[idx].name;
            if let Err(e) = self.cache.record_attempt(name, now) {
                warn!("Failed to record attempt for {}: {}", name, e);
            }
            dispatched.push(name.clone());
        }

        self.phase = OrchestratorPhase::Collecting;
        let poll_timeout = self.poll_timeout;
        let results = join_all(
            due.iter()
                .map(|&idx| poll_source(&self.sources[idx], poll_timeout)),
        )
        .await;

        let mut outcomes = Vec::with_capacity(results.len());
        for (name, result) in dispatched.iter().zip(results) {
            let elapsed_ms = u64::try_from(result.elapsed.as_millis()).unwrap_or(u64::MAX);

            if let Err(e) = self.cache.record_outcome(name, result.outcome.clone()) {
                warn!("Failed to record outcome for {}: {}", name, e);
            }

            match &result.outcome {
                Outcome::Success(count) => {
                    info!("{} count: {} ({}ms)", name, count, elapsed_ms);
                    self.emit_event(OrchestratorEvent::PollSucceeded {
                        source: name.clone(),
                        count: *count,
                        elapsed_ms,
                    });
                }
                Outcome::Failure(cause) => {
                    let (consecutive_failures, last_success_at) = self
                        .cache
                        .get(name)
                        .map_or((0, None), |state| {
                            (state.consecutive_failures, state.last_success_at)
                        });
                    match last_success_at {
                        Some(at) => warn!(
                            "{} poll failed after {}ms ({} in a row, last success {}): {}",
                            name,
                            elapsed_ms,
                            consecutive_failures,
                            at.to_rfc3339(),
                            cause
                        ),
                        None => warn!(
                            "{} poll failed after {}ms ({} in a row, never succeeded): {}",
                            name, elapsed_ms, consecutive_failures, cause
                        ),
                    }
                    self.emit_event(OrchestratorEvent::PollFailed {
                        source: name.clone(),
                        error: cause.clone(),
                        consecutive_failures,
                        last_success_at,
                    });
                }
                Outcome::Unset => {}
            }

            outcomes.push((name.clone(), result.outcome));
        }

        self.phase = OrchestratorPhase::Aggregating;
        let aggregate = self.cache.snapshot().aggregate(self.cache_policy);
        let (published, publish_error) = self.publish_if_changed(aggregate).await;

        let next_delay = self.next_delay(Instant::now());
        self.phase = OrchestratorPhase::Idle;

        TickReport {
            dispatched,
            outcomes,
            aggregate,
            published,
            publish_error,
            next_delay,
        }
    }

    /// Delay until the earliest next due time, clamped at the floor
    ///
    /// A never-polled source is due immediately, which yields the floor.
    pub fn next_delay(&self, now: Instant) -> Duration {
        let next_wake = self
            .sources
            .iter()
            .map(|d| {
                self.cache
                    .get(&d.name)
                    .and_then(|state| state.next_due(d.poll_interval))
                    .unwrap_or(now)
            })
            .min();

        next_wake
            .map(|wake| wake.saturating_duration_since(now))
            .unwrap_or(self.floor)
            .max(self.floor)
    }

    /// Publish `aggregate` unless it equals the last published total
    ///
    /// `last_published` only moves on success, so a failed publish is
    /// retried on the next tick while the aggregate still differs.
    async fn publish_if_changed(&mut self, aggregate: u64) -> (Option<u64>, Option<String>) {
        if self.last_published == Some(aggregate) {
            debug!("Aggregate unchanged at {}, skipping publish", aggregate);
            return (None, None);
        }

        let previous = self.last_published;
        match self.publisher.publish(aggregate).await {
            Ok(()) => {
                info!("Published total {} (previous: {:?})", aggregate, previous);
                self.last_published = Some(aggregate);
                self.emit_event(OrchestratorEvent::Published {
                    total: aggregate,
                    previous,
                });
                (Some(aggregate), None)
            }
            Err(e) => {
                error!("Failed to publish total {}: {}", aggregate, e);
                self.emit_event(OrchestratorEvent::PublishFailed {
                    total: aggregate,
                    error: e.to_string(),
                });
                (None, Some(e.to_string()))
            }
        }
    }

    /// Last successfully published total
    pub fn last_published(&self) -> Option<u64> {
        self.last_published
    }

    /// Current phase
    pub fn phase(&self) -> OrchestratorPhase {
        self.phase
    }

    /// Cache policy in effect
    pub fn cache_policy(&self) -> CachePolicy {
        self.cache_policy
    }

    /// Consistent copy of every source's cached state
    pub fn snapshot(&self) -> CacheSnapshot {
        self.cache.snapshot()
    }

    /// Source descriptors in configuration order
    pub fn sources(&self) -> &[SourceDescriptor] {
        &self.sources
    }

    /// Emit an orchestrator event
    ///
    /// Never blocks. A full channel drops the event with a warning; a
    /// closed one (receiver dropped) means nobody is listening, so the
    /// event is discarded silently.
    fn emit_event(&self, event: OrchestratorEvent) {
        match self.event_tx.try_send(event) {
            Ok(()) | Err(TrySendError::Closed(_)) => {}
            Err(TrySendError::Full(_)) => {
                warn!("Event channel full, dropping event. Consider increasing event_channel_capacity.");
            }
        }
    }
}
