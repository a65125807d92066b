//! Configuration types for the tally system
//!
//! This module defines all configuration structures used throughout the crate.

use crate::cache::CachePolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Default placeholder token substituted by the template publisher
pub const DEFAULT_PLACEHOLDER: &str = "{{count}}";

/// Main tally configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TallyConfig {
    /// Count sources to poll
    pub sources: Vec<SourceConfig>,

    /// Publisher configuration
    #[serde(default)]
    pub publisher: PublisherConfig,

    /// Optional orchestrator settings
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
}

impl TallyConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
            publisher: PublisherConfig::default(),
            orchestrator: OrchestratorConfig::default(),
        }
    }

    /// Add a source
    pub fn with_source(mut self, source: SourceConfig) -> Self {
        self.sources.push(source);
        self
    }

    /// Validate the configuration
    ///
    /// Besides per-section checks this enforces the cross-section
    /// constraint that the sleep floor never exceeds a poll interval.
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.sources.is_empty() {
            return Err(crate::Error::config("No sources configured"));
        }

        let mut names = HashSet::new();
        for source in &self.sources {
            source.validate()?;

            if !names.insert(source.name.as_str()) {
                return Err(crate::Error::config(format!(
                    "Duplicate source name: {}",
                    source.name
                )));
            }

            if source.poll_interval_ms < self.orchestrator.floor_ms {
                return Err(crate::Error::config(format!(
                    "Source {} polls every {}ms, below the {}ms sleep floor",
                    source.name, source.poll_interval_ms, self.orchestrator.floor_ms
                )));
            }
        }

        self.publisher.validate()?;
        self.orchestrator.validate()?;

        Ok(())
    }
}

impl Default for TallyConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Unique source name (log and cache key)
    pub name: String,

    /// Poll interval in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Source kind and its credentials
    pub kind: SourceKind,

    /// Whether this source is enabled
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl SourceConfig {
    /// Create a new source configuration with the default interval
    pub fn new(name: impl Into<String>, kind: SourceKind) -> Self {
        Self {
            name: name.into(),
            poll_interval_ms: default_poll_interval_ms(),
            kind,
            enabled: true,
        }
    }

    /// Set the poll interval
    pub fn with_poll_interval_ms(mut self, poll_interval_ms: u64) -> Self {
        self.poll_interval_ms = poll_interval_ms;
        self
    }

    /// Enable or disable the source
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Poll interval as a `Duration`
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Validate the source configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.name.trim().is_empty() {
            return Err(crate::Error::config("Source name cannot be empty"));
        }
        if self.poll_interval_ms == 0 {
            return Err(crate::Error::config(format!(
                "Source {} poll interval must be > 0",
                self.name
            )));
        }
        self.kind.validate()
    }
}

/// Source kind configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceKind {
    /// Twitch Helix subscriptions
    Twitch {
        /// Application client ID
        client_id: String,
        /// OAuth access token
        access_token: String,
        /// Broadcaster (channel) ID
        broadcaster_id: String,
    },

    /// Patreon campaign members
    Patreon {
        /// Creator access token
        token: String,
        /// Campaign ID
        campaign_id: String,
    },

    /// Custom source
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl SourceKind {
    /// Validate the source kind configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            SourceKind::Twitch {
                client_id,
                access_token,
                broadcaster_id,
            } => {
                if client_id.is_empty() || access_token.is_empty() || broadcaster_id.is_empty() {
                    return Err(crate::Error::config(
                        "Twitch source requires client_id, access_token and broadcaster_id",
                    ));
                }
                Ok(())
            }
            SourceKind::Patreon { token, campaign_id } => {
                if token.is_empty() || campaign_id.is_empty() {
                    return Err(crate::Error::config(
                        "Patreon source requires token and campaign_id",
                    ));
                }
                Ok(())
            }
            SourceKind::Custom { factory, config } => {
                if factory.is_empty() {
                    return Err(crate::Error::config("Custom source factory cannot be empty"));
                }
                if config.is_null() {
                    return Err(crate::Error::config("Custom source config cannot be null"));
                }
                Ok(())
            }
        }
    }

    /// Get the source kind name used for registry lookup
    pub fn type_name(&self) -> &str {
        match self {
            SourceKind::Twitch { .. } => "twitch",
            SourceKind::Patreon { .. } => "patreon",
            SourceKind::Custom { factory, .. } => factory,
        }
    }
}

/// Publisher configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PublisherConfig {
    /// Rewrite a template file with the new total
    Template {
        /// Template to read once at startup
        template_path: String,
        /// File to write on every publish
        output_path: String,
        /// Token replaced by the total
        #[serde(default = "default_placeholder")]
        placeholder: String,
    },

    /// Keep published totals in memory (not persistent)
    #[default]
    Memory,
}

impl PublisherConfig {
    /// Validate the publisher configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            PublisherConfig::Template {
                template_path,
                output_path,
                placeholder,
            } => {
                if template_path.is_empty() || output_path.is_empty() {
                    return Err(crate::Error::config(
                        "Template publisher requires template_path and output_path",
                    ));
                }
                if placeholder.is_empty() {
                    return Err(crate::Error::config("Template placeholder cannot be empty"));
                }
                if template_path == output_path {
                    return Err(crate::Error::config(
                        "Template publisher output_path must differ from template_path",
                    ));
                }
                Ok(())
            }
            PublisherConfig::Memory => Ok(()),
        }
    }
}

/// Orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Minimum sleep between ticks (in milliseconds)
    ///
    /// Guards against busy-looping when intervals are tiny. Must not
    /// exceed any source's poll interval.
    #[serde(default = "default_floor_ms")]
    pub floor_ms: u64,

    /// Upper bound on a single source call (in milliseconds)
    ///
    /// A call that does not settle in time is recorded as a failed poll
    /// so one hung source cannot stall aggregation. `None` disables the
    /// bound and leaves timeouts entirely to the sources.
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: Option<u64>,

    /// What a failed poll does to the source's cached count
    #[serde(default)]
    pub cache_policy: CachePolicy,

    /// Capacity of the orchestrator event channel
    ///
    /// When full, new events are dropped (with a warning log).
    ///
    /// Default: 1000 events
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl OrchestratorConfig {
    /// Sleep floor as a `Duration`
    pub fn floor(&self) -> Duration {
        Duration::from_millis(self.floor_ms)
    }

    /// Poll timeout as a `Duration`, if enabled
    pub fn poll_timeout(&self) -> Option<Duration> {
        self.poll_timeout_ms.map(Duration::from_millis)
    }

    /// Validate the orchestrator configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.floor_ms == 0 {
            return Err(crate::Error::config("Sleep floor must be > 0"));
        }
        if self.poll_timeout_ms == Some(0) {
            return Err(crate::Error::config(
                "Poll timeout must be > 0 (omit it to disable)",
            ));
        }
        if self.event_channel_capacity == 0 {
            return Err(crate::Error::config("Event channel capacity must be > 0"));
        }
        Ok(())
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            floor_ms: default_floor_ms(),
            poll_timeout_ms: default_poll_timeout_ms(),
            cache_policy: CachePolicy::default(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    60_000
}

fn default_enabled() -> bool {
    true
}

fn default_placeholder() -> String {
    DEFAULT_PLACEHOLDER.to_string()
}

fn default_floor_ms() -> u64 {
    1_000
}

fn default_poll_timeout_ms() -> Option<u64> {
    Some(30_000)
}

fn default_event_channel_capacity() -> usize {
    1000
}

#[cfg(test)]
mod tests {
    use super::*;

    fn custom(name: &str) -> SourceConfig {
        SourceConfig::new(
            name,
            SourceKind::Custom {
                factory: "fixed".to_string(),
                config: serde_json::json!({ "value": 1 }),
            },
        )
    }

    #[test]
    fn test_empty_sources_rejected() {
        assert!(TallyConfig::new().validate().is_err());
    }

    #[test]
    fn test_floor_above_interval_rejected() {
        let mut config = TallyConfig::new().with_source(custom("a").with_poll_interval_ms(500));
        config.orchestrator.floor_ms = 1_000;

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("below the 1000ms sleep floor"));

        config.orchestrator.floor_ms = 500;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let config = TallyConfig::new()
            .with_source(custom("same"))
            .with_source(custom("same"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_twitch_requires_credentials() {
        let kind = SourceKind::Twitch {
            client_id: "id".to_string(),
            access_token: String::new(),
            broadcaster_id: "42".to_string(),
        };
        assert!(kind.validate().is_err());
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let config: TallyConfig = serde_json::from_value(serde_json::json!({
            "sources": [
                { "name": "patreon", "kind": { "type": "patreon", "token": "t", "campaign_id": "1" } }
            ],
            "publisher": {
                "type": "template",
                "template_path": "widget.template.html",
                "output_path": "widget.html"
            }
        }))
        .unwrap();

        assert_eq!(config.sources[0].poll_interval_ms, 60_000);
        assert!(config.sources[0].enabled);
        assert_eq!(config.orchestrator.cache_policy, CachePolicy::HoldLastSuccess);
        assert_eq!(config.orchestrator.poll_timeout(), Some(Duration::from_secs(30)));
        match &config.publisher {
            PublisherConfig::Template { placeholder, .. } => {
                assert_eq!(placeholder, DEFAULT_PLACEHOLDER)
            }
            other => panic!("unexpected publisher: {:?}", other),
        }
        assert!(config.validate().is_ok());
    }
}
