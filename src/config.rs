//! Engine configuration
//!
//! Per-run options arrive with each [`RunRequest`](crate::batch::RunRequest).
//! Settings that belong to the deployment rather than to a run are read from
//! `REGEN_*` environment variables, after loading a `.env` file if present.

use std::time::Duration;

use serde::Deserialize;

use crate::batch::CHUNK_SIZE_MAX;
use crate::telemetry::LogFormat;

/// Prefix of the environment variables read by [`EngineConfig::from_env`]
pub const ENV_PREFIX: &str = "REGEN_";

fn default_max_in_flight() -> usize {
    CHUNK_SIZE_MAX
}

fn default_throttle_after_last_chunk() -> bool {
    true
}

/// Deployment-level settings for the run coordinator
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EngineConfig {
    /// Hard ceiling on simultaneous update calls (`REGEN_MAX_IN_FLIGHT`)
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    /// Per-update timeout in milliseconds (`REGEN_UPDATE_TIMEOUT_MS`)
    #[serde(default)]
    pub update_timeout_ms: Option<u64>,
    /// Keep the pause after the very last chunk (`REGEN_THROTTLE_AFTER_LAST_CHUNK`)
    #[serde(default = "default_throttle_after_last_chunk")]
    pub throttle_after_last_chunk: bool,
    /// Log output format (`REGEN_LOG_FORMAT`)
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_in_flight: default_max_in_flight(),
            update_timeout_ms: None,
            throttle_after_last_chunk: default_throttle_after_last_chunk(),
            log_format: LogFormat::default(),
        }
    }
}

impl EngineConfig {
    /// Load from the process environment
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let config: EngineConfig = envy::prefixed(ENV_PREFIX).from_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from explicit `(KEY, value)` pairs, using the same names as the environment
    pub fn from_pairs<I>(pairs: I) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config: EngineConfig = envy::prefixed(ENV_PREFIX).from_iter(pairs)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot honour
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_in_flight == 0 {
            anyhow::bail!("{}MAX_IN_FLIGHT must be at least 1", ENV_PREFIX);
        }
        if self.update_timeout_ms == Some(0) {
            anyhow::bail!("{}UPDATE_TIMEOUT_MS must be positive when set", ENV_PREFIX);
        }
        Ok(())
    }

    /// Per-update timeout as a duration
    pub fn update_timeout(&self) -> Option<Duration> {
        self.update_timeout_ms.map(Duration::from_millis)
    }
}
