// # Result Cache
//
// Per-source record of the last poll attempt and its outcome.
//
// ## Purpose
//
// The cache is the only memory the orchestrator has between ticks:
// - `last_polled_at` decides when a source is due again
// - `last_outcome` / `last_success` decide what the source contributes
//   to the aggregate
//
// Nothing here is persisted. A restarted process starts every source as
// `Unset` and due immediately.
//
// ## Cache Policy
//
// A failed poll always replaces `last_outcome`. What it does to the
// aggregate depends on [`CachePolicy`]:
//
// - `HoldLastSuccess`: the source keeps contributing its last good count
// - `ClearOnFailure`: the source contributes 0 until it succeeds again

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::time::{Duration, Instant};

use crate::error::{Error, Result};

/// Outcome of the most recent poll attempt
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Outcome {
    /// Never polled, or polled but not yet settled
    #[default]
    Unset,
    /// The source returned a count
    Success(u64),
    /// The source failed; carries a human-readable cause
    Failure(String),
}

impl Outcome {
    /// The count, if this outcome is a success
    pub fn count(&self) -> Option<u64> {
        match self {
            Outcome::Success(count) => Some(*count),
            _ => None,
        }
    }

    /// Whether this outcome is a failure
    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failure(_))
    }
}

/// What a failed poll does to the cached count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CachePolicy {
    /// Keep counting the last successful value through failures
    #[default]
    HoldLastSuccess,
    /// Count nothing for the source until its next success
    ClearOnFailure,
}

/// Cached state for a single source
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourceState {
    /// When the last poll was dispatched (`None` = never, due immediately)
    pub last_polled_at: Option<Instant>,
    /// Outcome of the most recent settled poll
    pub last_outcome: Outcome,
    /// Most recent successful count, kept across failures
    pub last_success: Option<u64>,
    /// Wall-clock time of the most recent success
    pub last_success_at: Option<chrono::DateTime<chrono::Utc>>,
    /// Failures since the last success
    pub consecutive_failures: u32,
}

impl SourceState {
    /// What this source adds to the aggregate under `policy`
    pub fn contribution(&self, policy: CachePolicy) -> u64 {
        match policy {
            CachePolicy::HoldLastSuccess => self.last_success.unwrap_or(0),
            CachePolicy::ClearOnFailure => self.last_outcome.count().unwrap_or(0),
        }
    }

    /// Whether the source is due at `now` given its interval
    pub fn is_due(&self, now: Instant, poll_interval: Duration) -> bool {
        match self.last_polled_at {
            None => true,
            Some(at) => now.saturating_duration_since(at) >= poll_interval,
        }
    }

    /// When the source becomes due next (`None` = already due, never polled)
    pub fn next_due(&self, poll_interval: Duration) -> Option<Instant> {
        self.last_polled_at.map(|at| at + poll_interval)
    }
}

/// Point-in-time view of every source's state
#[derive(Debug, Clone)]
pub struct CacheSnapshot {
    sources: BTreeMap<String, SourceState>,
}

impl CacheSnapshot {
    /// State of one source
    pub fn get(&self, name: &str) -> Option<&SourceState> {
        self.sources.get(name)
    }

    /// Iterate over `(name, state)` pairs in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &SourceState)> {
        self.sources.iter().map(|(name, state)| (name.as_str(), state))
    }

    /// Number of tracked sources
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Whether no sources are tracked
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Sum of all contributions under `policy`
    pub fn aggregate(&self, policy: CachePolicy) -> u64 {
        self.sources
            .values()
            .map(|state| state.contribution(policy))
            .fold(0u64, u64::saturating_add)
    }
}

/// Per-source result cache
///
/// Owned exclusively by the orchestrator and mutated only inside a tick,
/// so it needs no locking.
#[derive(Debug, Clone, Default)]
pub struct ResultCache {
    sources: BTreeMap<String, SourceState>,
}

impl ResultCache {
    /// Create a cache with one `Unset` slot per name
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            sources: names
                .into_iter()
                .map(|name| (name.into(), SourceState::default()))
                .collect(),
        }
    }

    /// Record that a poll for `name` was dispatched at `at`
    ///
    /// Called at dispatch, before the source call settles, so an
    /// in-flight poll already counts towards the next due time.
    pub fn record_attempt(&mut self, name: &str, at: Instant) -> Result<()> {
        let state = self.slot(name)?;
        state.last_polled_at = Some(at);
        Ok(())
    }

    /// Replace the outcome for `name`
    pub fn record_outcome(&mut self, name: &str, outcome: Outcome) -> Result<()> {
        let state = self.slot(name)?;
        match &outcome {
            Outcome::Success(count) => {
                state.last_success = Some(*count);
                state.last_success_at = Some(chrono::Utc::now());
                state.consecutive_failures = 0;
            }
            Outcome::Failure(_) => {
                state.consecutive_failures = state.consecutive_failures.saturating_add(1);
            }
            Outcome::Unset => {}
        }
        state.last_outcome = outcome;
        Ok(())
    }

    /// State of one source
    pub fn get(&self, name: &str) -> Option<&SourceState> {
        self.sources.get(name)
    }

    /// Consistent copy of every source's state
    pub fn snapshot(&self) -> CacheSnapshot {
        CacheSnapshot {
            sources: self.sources.clone(),
        }
    }

    /// Sum of all contributions under `policy`
    pub fn aggregate(&self, policy: CachePolicy) -> u64 {
        self.snapshot().aggregate(policy)
    }

    fn slot(&mut self, name: &str) -> Result<&mut SourceState> {
        self.sources
            .get_mut(name)
            .ok_or_else(|| Error::UnknownSource(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_cache_is_unset() {
        let cache = ResultCache::new(["twitch", "patreon"]);
        let snapshot = cache.snapshot();

        assert_eq!(snapshot.len(), 2);
        for (_, state) in snapshot.iter() {
            assert_eq!(state.last_outcome, Outcome::Unset);
            assert!(state.last_polled_at.is_none());
        }
        assert_eq!(cache.aggregate(CachePolicy::HoldLastSuccess), 0);
    }

    #[test]
    fn test_unknown_source_rejected() {
        let mut cache = ResultCache::new(["twitch"]);
        let err = cache.record_attempt("youtube", Instant::now()).unwrap_err();
        assert!(matches!(err, Error::UnknownSource(name) if name == "youtube"));
        assert!(cache.record_outcome("youtube", Outcome::Success(1)).is_err());
    }

    #[test]
    fn test_failure_policies_diverge() {
        let mut cache = ResultCache::new(["a", "b"]);
        cache.record_outcome("a", Outcome::Success(3)).unwrap();
        cache.record_outcome("b", Outcome::Success(5)).unwrap();
        cache
            .record_outcome("a", Outcome::Failure("timeout".to_string()))
            .unwrap();

        assert_eq!(cache.aggregate(CachePolicy::HoldLastSuccess), 8);
        assert_eq!(cache.aggregate(CachePolicy::ClearOnFailure), 5);

        let a = cache.get("a").unwrap();
        assert!(a.last_outcome.is_failure());
        assert_eq!(a.last_success, Some(3));
        assert_eq!(a.consecutive_failures, 1);
    }

    #[test]
    fn test_success_resets_failures() {
        let mut cache = ResultCache::new(["a"]);
        cache.record_outcome("a", Outcome::Failure("x".to_string())).unwrap();
        cache.record_outcome("a", Outcome::Failure("y".to_string())).unwrap();
        assert_eq!(cache.get("a").unwrap().consecutive_failures, 2);
        assert_eq!(cache.get("a").unwrap().last_success_at, None);

        cache.record_outcome("a", Outcome::Success(7)).unwrap();
        let a = cache.get("a").unwrap();
        assert_eq!(a.consecutive_failures, 0);
        let succeeded_at = a.last_success_at.expect("success is timestamped");

        // A later failure keeps the timestamp of the last success.
        cache.record_outcome("a", Outcome::Failure("z".to_string())).unwrap();
        assert_eq!(cache.get("a").unwrap().last_success_at, Some(succeeded_at));
        assert_eq!(cache.aggregate(CachePolicy::ClearOnFailure), 7);
    }

    #[test]
    fn test_snapshot_is_detached() {
        let mut cache = ResultCache::new(["a"]);
        cache.record_outcome("a", Outcome::Success(1)).unwrap();
        let snapshot = cache.snapshot();

        cache.record_outcome("a", Outcome::Success(100)).unwrap();
        assert_eq!(snapshot.aggregate(CachePolicy::HoldLastSuccess), 1);
        assert_eq!(cache.aggregate(CachePolicy::HoldLastSuccess), 100);
    }

    #[test]
    fn test_due_computation() {
        let interval = Duration::from_millis(1_000);
        let start = Instant::now();
        let mut state = SourceState::default();

        assert!(state.is_due(start, interval));
        assert_eq!(state.next_due(interval), None);

        state.last_polled_at = Some(start);
        assert!(!state.is_due(start + Duration::from_millis(999), interval));
        assert!(state.is_due(start + interval, interval));
        assert_eq!(state.next_due(interval), Some(start + interval));
    }
}
