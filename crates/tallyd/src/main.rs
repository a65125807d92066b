// # tallyd - Tally Daemon
//
// Thin integration layer around `tally-core`. All scheduling, caching and
// publishing logic lives in the library; this binary only:
// 1. Reads configuration from environment variables
// 2. Initializes logging and the runtime
// 3. Registers the built-in count sources
// 4. Runs the poll orchestrator until SIGTERM/SIGINT
//
// ## Configuration
//
// ### Sources (each enabled when all of its variables are set)
// - `TWITCH_CLIENT_ID`, `TWITCH_ACCESS_TOKEN`, `TWITCH_BROADCASTER_ID`
// - `PATREON_TOKEN`, `PATREON_CAMPAIGN_ID`
// - `TALLY_TWITCH_INTERVAL_MS`, `TALLY_PATREON_INTERVAL_MS`: Poll intervals (default 60000)
//
// ### Output
// - `TALLY_TEMPLATE_PATH`: Template file containing the placeholder (required)
// - `TALLY_OUTPUT_PATH`: File rewritten with each new total (required)
// - `TALLY_PLACEHOLDER`: Token replaced by the total (default `{{count}}`)
//
// ### Orchestrator
// - `TALLY_FLOOR_MS`: Minimum sleep between ticks (default 1000)
// - `TALLY_POLL_TIMEOUT_MS`: Per-call bound, `0` disables (default 30000)
// - `TALLY_CACHE_POLICY`: `hold` or `clear` (default `hold`)
// - `TALLY_LOG_LEVEL`: trace, debug, info, warn, error (default `info`)
//
// ## Example
//
// ```bash
// export PATREON_TOKEN=your_token
// export PATREON_CAMPAIGN_ID=1234567
// export TALLY_TEMPLATE_PATH=/etc/tally/widget.html.tpl
// export TALLY_OUTPUT_PATH=/var/www/widget.html
//
// tallyd
// ```

use anyhow::{Context, Result};
use std::env;
use std::process::ExitCode;
use tally_core::config::{
    DEFAULT_PLACEHOLDER, OrchestratorConfig, PublisherConfig, SourceConfig, SourceKind,
    TallyConfig,
};
use tally_core::{CachePolicy, OrchestratorEvent, SourceRegistry};
use tokio::sync::{mpsc, oneshot};
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

const DEFAULT_INTERVAL_MS: u64 = 60_000;
const DEFAULT_FLOOR_MS: u64 = 1_000;
const DEFAULT_POLL_TIMEOUT_MS: u64 = 30_000;

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum TallyExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
}

impl From<TallyExitCode> for ExitCode {
    fn from(code: TallyExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

struct TwitchCredentials {
    client_id: String,
    access_token: String,
    broadcaster_id: String,
}

struct PatreonCredentials {
    token: String,
    campaign_id: String,
}

/// Application configuration
struct Config {
    twitch: Option<TwitchCredentials>,
    twitch_interval_ms: u64,
    patreon: Option<PatreonCredentials>,
    patreon_interval_ms: u64,
    template_path: String,
    output_path: String,
    placeholder: String,
    floor_ms: u64,
    poll_timeout_ms: u64,
    cache_policy: String,
    log_level: String,
}

/// Read an optional variable, treating an empty value as unset
fn optional_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Read an optional millisecond value, falling back to `default` when unset
fn millis_var(name: &str, default: u64) -> Result<u64> {
    match optional_var(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} must be a whole number of milliseconds. Got: {}", name, raw)),
        None => Ok(default),
    }
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        let twitch = match (
            optional_var("TWITCH_CLIENT_ID"),
            optional_var("TWITCH_ACCESS_TOKEN"),
            optional_var("TWITCH_BROADCASTER_ID"),
        ) {
            (Some(client_id), Some(access_token), Some(broadcaster_id)) => Some(TwitchCredentials {
                client_id,
                access_token,
                broadcaster_id,
            }),
            (None, None, None) => None,
            _ => anyhow::bail!(
                "Twitch needs all of TWITCH_CLIENT_ID, TWITCH_ACCESS_TOKEN and \
                TWITCH_BROADCASTER_ID (or none of them to disable it)"
            ),
        };

        let patreon = match (optional_var("PATREON_TOKEN"), optional_var("PATREON_CAMPAIGN_ID")) {
            (Some(token), Some(campaign_id)) => Some(PatreonCredentials { token, campaign_id }),
            (None, None) => None,
            _ => anyhow::bail!(
                "Patreon needs both PATREON_TOKEN and PATREON_CAMPAIGN_ID \
                (or neither to disable it)"
            ),
        };

        Ok(Self {
            twitch,
            twitch_interval_ms: millis_var("TALLY_TWITCH_INTERVAL_MS", DEFAULT_INTERVAL_MS)?,
            patreon,
            patreon_interval_ms: millis_var("TALLY_PATREON_INTERVAL_MS", DEFAULT_INTERVAL_MS)?,
            template_path: optional_var("TALLY_TEMPLATE_PATH").context(
                "TALLY_TEMPLATE_PATH is required. \
                Set it via: export TALLY_TEMPLATE_PATH=/etc/tally/widget.html.tpl",
            )?,
            output_path: optional_var("TALLY_OUTPUT_PATH").context(
                "TALLY_OUTPUT_PATH is required. \
                Set it via: export TALLY_OUTPUT_PATH=/var/www/widget.html",
            )?,
            placeholder: env::var("TALLY_PLACEHOLDER")
                .unwrap_or_else(|_| DEFAULT_PLACEHOLDER.to_string()),
            floor_ms: millis_var("TALLY_FLOOR_MS", DEFAULT_FLOOR_MS)?,
            poll_timeout_ms: millis_var("TALLY_POLL_TIMEOUT_MS", DEFAULT_POLL_TIMEOUT_MS)?,
            cache_policy: env::var("TALLY_CACHE_POLICY").unwrap_or_else(|_| "hold".to_string()),
            log_level: env::var("TALLY_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// Validate the daemon-level settings
    ///
    /// Cross-source constraints (floor vs. intervals, unique names) are
    /// checked again by `TallyConfig::validate`.
    fn validate(&self) -> Result<()> {
        if self.twitch.is_none() && self.patreon.is_none() {
            anyhow::bail!(
                "No source configured. Set the TWITCH_* or PATREON_* variables \
                for at least one source."
            );
        }

        if self.twitch.is_some() && !cfg!(feature = "twitch") {
            anyhow::bail!("TWITCH_* is set but tallyd was built without the twitch feature");
        }
        if self.patreon.is_some() && !cfg!(feature = "patreon") {
            anyhow::bail!("PATREON_* is set but tallyd was built without the patreon feature");
        }

        if self.placeholder.is_empty() {
            anyhow::bail!("TALLY_PLACEHOLDER cannot be empty");
        }

        if self.floor_ms == 0 {
            anyhow::bail!("TALLY_FLOOR_MS must be greater than 0");
        }

        for (name, interval) in [
            ("TALLY_TWITCH_INTERVAL_MS", self.twitch.as_ref().map(|_| self.twitch_interval_ms)),
            ("TALLY_PATREON_INTERVAL_MS", self.patreon.as_ref().map(|_| self.patreon_interval_ms)),
        ] {
            if let Some(interval) = interval
                && interval < self.floor_ms
            {
                anyhow::bail!(
                    "{} ({}ms) must be at least TALLY_FLOOR_MS ({}ms)",
                    name,
                    interval,
                    self.floor_ms
                );
            }
        }

        self.parse_cache_policy()?;
        self.parse_log_level()?;

        Ok(())
    }

    fn parse_cache_policy(&self) -> Result<CachePolicy> {
        match self.cache_policy.to_lowercase().as_str() {
            "hold" => Ok(CachePolicy::HoldLastSuccess),
            "clear" => Ok(CachePolicy::ClearOnFailure),
            _ => anyhow::bail!(
                "TALLY_CACHE_POLICY '{}' is not valid. Valid policies: hold, clear",
                self.cache_policy
            ),
        }
    }

    fn parse_log_level(&self) -> Result<Level> {
        match self.log_level.to_lowercase().as_str() {
            "trace" => Ok(Level::TRACE),
            "debug" => Ok(Level::DEBUG),
            "info" => Ok(Level::INFO),
            "warn" => Ok(Level::WARN),
            "error" => Ok(Level::ERROR),
            _ => anyhow::bail!(
                "TALLY_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }
    }

    /// Translate into the library configuration
    fn to_tally_config(&self) -> Result<TallyConfig> {
        let mut config = TallyConfig::new();

        if let Some(twitch) = &self.twitch {
            config = config.with_source(
                SourceConfig::new(
                    "twitch",
                    SourceKind::Twitch {
                        client_id: twitch.client_id.clone(),
                        access_token: twitch.access_token.clone(),
                        broadcaster_id: twitch.broadcaster_id.clone(),
                    },
                )
                .with_poll_interval_ms(self.twitch_interval_ms),
            );
        }

        if let Some(patreon) = &self.patreon {
            config = config.with_source(
                SourceConfig::new(
                    "patreon",
                    SourceKind::Patreon {
                        token: patreon.token.clone(),
                        campaign_id: patreon.campaign_id.clone(),
                    },
                )
                .with_poll_interval_ms(self.patreon_interval_ms),
            );
        }

        config.publisher = PublisherConfig::Template {
            template_path: self.template_path.clone(),
            output_path: self.output_path.clone(),
            placeholder: self.placeholder.clone(),
        };

        config.orchestrator = OrchestratorConfig {
            floor_ms: self.floor_ms,
            poll_timeout_ms: (self.poll_timeout_ms > 0).then_some(self.poll_timeout_ms),
            cache_policy: self.parse_cache_policy()?,
            ..OrchestratorConfig::default()
        };

        Ok(config)
    }
}

fn main() -> ExitCode {
    // Load configuration from environment
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return TallyExitCode::ConfigError.into();
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {:#}", e);
        return TallyExitCode::ConfigError.into();
    }

    let log_level = config.parse_log_level().unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return TallyExitCode::ConfigError.into();
    }

    info!("Starting tallyd daemon");

    let tally_config = match config.to_tally_config() {
        Ok(c) => c,
        Err(e) => {
            error!("Configuration error: {:#}", e);
            return TallyExitCode::ConfigError.into();
        }
    };
    info!(
        "Configuration loaded: {} source(s), output {}",
        tally_config.sources.len(),
        config.output_path
    );

    // One logical task: ticks never overlap, so a single thread suffices
    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return TallyExitCode::RuntimeError.into();
        }
    };

    rt.block_on(run_daemon(tally_config)).into()
}

/// Build the orchestrator and run it until a shutdown signal arrives
async fn run_daemon(config: TallyConfig) -> TallyExitCode {
    let registry = SourceRegistry::new();

    #[cfg(feature = "twitch")]
    {
        info!("Registering Twitch source");
        tally_source_twitch::register(&registry);
    }

    #[cfg(feature = "patreon")]
    {
        info!("Registering Patreon source");
        tally_source_patreon::register(&registry);
    }

    // Unreadable template or a source that cannot be built is a startup failure
    let (mut orchestrator, events) = match registry.build_orchestrator(config).await {
        Ok(built) => built,
        Err(e) => {
            error!("Startup failed: {}", e);
            return TallyExitCode::ConfigError;
        }
    };

    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    tokio::spawn(log_events(events));
    tokio::spawn(async move {
        match wait_for_shutdown().await {
            Ok(signal) => info!("Received shutdown signal: {}", signal),
            Err(e) => error!("Signal handling failed, shutting down: {}", e),
        }
        let _ = shutdown_tx.send(());
    });

    match orchestrator.run_with_shutdown(shutdown_rx).await {
        Ok(()) => {
            info!("Shutting down daemon");
            TallyExitCode::CleanShutdown
        }
        Err(e) => {
            error!("Daemon error: {}", e);
            TallyExitCode::RuntimeError
        }
    }
}

/// Drain orchestrator events so the channel never fills up
async fn log_events(mut events: mpsc::Receiver<OrchestratorEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            OrchestratorEvent::PollFailed {
                source,
                consecutive_failures,
                ..
            } if consecutive_failures > 0 && consecutive_failures % 10 == 0 => {
                warn!("{} has failed {} polls in a row", source, consecutive_failures);
            }
            other => debug!("Event: {:?}", other),
        }
    }
}

/// Wait for SIGTERM or SIGINT
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to setup SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to setup SIGINT handler")?;

    let received = tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    };
    Ok(received)
}

/// Wait for Ctrl-C
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to wait for CTRL-C")?;
    Ok("SIGINT")
}
