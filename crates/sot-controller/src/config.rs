//! Run configuration owned by the caller and passed into the control loop.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use sot_types::{config_error, SotResult};

/// Configuration for one control loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    pub name: String,

    /// Concurrent evaluation slots.
    pub batch_size: usize,

    /// Where snapshots are written. `None` disables checkpointing.
    pub checkpoint_path: Option<PathBuf>,

    /// Write a snapshot after every `checkpoint_every` applied completions.
    pub checkpoint_every: usize,

    /// Pending evaluations older than this are resolved as failed.
    pub eval_timeout: Option<Duration>,

    /// Longest uninterrupted wait for a completion, so a stop request is
    /// noticed promptly.
    pub poll_interval: Duration,
}

impl ControllerConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            batch_size: 1,
            checkpoint_path: None,
            checkpoint_every: 1,
            eval_timeout: None,
            poll_interval: Duration::from_millis(200),
        }
    }

    pub fn with_batch_size(mut self, n: usize) -> Self {
        self.batch_size = n;
        self
    }

    pub fn with_checkpoint(mut self, path: impl Into<PathBuf>) -> Self {
        self.checkpoint_path = Some(path.into());
        self
    }

    pub fn with_checkpoint_every(mut self, n: usize) -> Self {
        self.checkpoint_every = n;
        self
    }

    pub fn with_eval_timeout(mut self, timeout: Duration) -> Self {
        self.eval_timeout = Some(timeout);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn validate(&self) -> SotResult<()> {
        if self.batch_size == 0 {
            return Err(config_error!("batch_size must be at least 1"));
        }
        if self.checkpoint_every == 0 {
            return Err(config_error!("checkpoint_every must be at least 1"));
        }
        if self.poll_interval.is_zero() {
            return Err(config_error!("poll_interval must be positive"));
        }
        Ok(())
    }

    /// Build from `SOT_*` environment variables, falling back to defaults.
    ///
    /// `SOT_RUN_NAME`, `SOT_BATCH_SIZE`, `SOT_CHECKPOINT`,
    /// `SOT_CHECKPOINT_EVERY`, `SOT_EVAL_TIMEOUT_MS`.
    pub fn from_env() -> SotResult<Self> {
        let name = std::env::var("SOT_RUN_NAME").unwrap_or_else(|_| "sot".to_string());
        let mut config = Self::new(name);

        if let Some(n) = env_parse::<usize>("SOT_BATCH_SIZE")? {
            config.batch_size = n;
        }
        if let Ok(path) = std::env::var("SOT_CHECKPOINT") {
            config.checkpoint_path = Some(PathBuf::from(path));
        }
        if let Some(n) = env_parse::<usize>("SOT_CHECKPOINT_EVERY")? {
            config.checkpoint_every = n;
        }
        if let Some(ms) = env_parse::<u64>("SOT_EVAL_TIMEOUT_MS")? {
            config.eval_timeout = Some(Duration::from_millis(ms));
        }

        config.validate()?;
        Ok(config)
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self::new("sot")
    }
}

/// Parse an optional environment variable; unset is `None`, garbage is an error.
pub fn env_parse<T: std::str::FromStr>(key: &str) -> SotResult<Option<T>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| config_error!("{key} has an invalid value: {raw:?}")),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_chain() {
        let config = ControllerConfig::new("ackley")
            .with_batch_size(4)
            .with_checkpoint("/tmp/run.sot")
            .with_checkpoint_every(2)
            .with_eval_timeout(Duration::from_secs(30));
        assert_eq!(config.batch_size, 4);
        assert_eq!(config.checkpoint_every, 2);
        assert_eq!(config.checkpoint_path, Some(PathBuf::from("/tmp/run.sot")));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_batch_size_rejected() {
        let config = ControllerConfig::new("x").with_batch_size(0);
        assert!(config.validate().is_err());
        let config = ControllerConfig::new("x").with_checkpoint_every(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = ControllerConfig::new("json").with_eval_timeout(Duration::from_millis(250));
        let json = serde_json::to_string(&config).unwrap();
        let back: ControllerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, back);
    }

    #[test]
    fn env_parse_reports_garbage() {
        std::env::set_var("SOT_TEST_ENV_PARSE_GARBAGE", "four");
        assert!(env_parse::<usize>("SOT_TEST_ENV_PARSE_GARBAGE").is_err());
        std::env::set_var("SOT_TEST_ENV_PARSE_OK", " 4 ");
        assert_eq!(env_parse::<usize>("SOT_TEST_ENV_PARSE_OK").unwrap(), Some(4));
        assert_eq!(env_parse::<usize>("SOT_TEST_ENV_PARSE_UNSET").unwrap(), None);
    }
}
