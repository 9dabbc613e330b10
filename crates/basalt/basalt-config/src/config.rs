use serde::Deserialize;
use std::path::Path;

/// Which ring discipline a session runs.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// One producer, many independent readers.
    Broadcast,
    /// One producer, one reader.
    Exclusive,
}

/// What a thread does when it has nothing to do this iteration.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PollStrategy {
    Spin,
    Yield,
    Sleep,
    Backoff,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct DriverConfig {
    #[serde(default = "defaults::log_level")]
    pub log_level: String,
    #[serde(default = "defaults::mode")]
    pub mode: Mode,
    /// Slots in the ring.
    #[serde(default = "defaults::capacity")]
    pub capacity: usize,
    #[serde(default = "defaults::consumers")]
    pub consumers: usize,
    /// How long the session runs before the running flag drops.
    #[serde(default = "defaults::duration_ms")]
    pub duration_ms: u64,
    /// Pause between publishes; 0 publishes flat out.
    #[serde(default)]
    pub publish_interval_us: u64,
    #[serde(default = "defaults::poll")]
    pub poll: PollStrategy,
    /// Only used with `poll = "sleep"`.
    #[serde(default = "defaults::sleep_us")]
    pub sleep_us: u64,
    /// Consecutive contention errors a thread tolerates before it gives up
    /// the session. 0 retries forever.
    #[serde(default)]
    pub max_contention_retries: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read '{path}'")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

mod defaults {
    use super::{Mode, PollStrategy};

    pub fn log_level() -> String {
        "info".into()
    }

    pub fn mode() -> Mode {
        Mode::Broadcast
    }

    pub fn capacity() -> usize {
        1024
    }

    pub fn consumers() -> usize {
        3
    }

    pub fn duration_ms() -> u64 {
        5_000
    }

    pub fn poll() -> PollStrategy {
        PollStrategy::Yield
    }

    pub fn sleep_us() -> u64 {
        50
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            log_level: defaults::log_level(),
            mode: defaults::mode(),
            capacity: defaults::capacity(),
            consumers: defaults::consumers(),
            duration_ms: defaults::duration_ms(),
            publish_interval_us: 0,
            poll: defaults::poll(),
            sleep_us: defaults::sleep_us(),
            max_contention_retries: 0,
        }
    }
}

impl DriverConfig {
    pub fn load(path: impl AsRef<Path> + ToString) -> Result<Self, ConfigError> {
        let toml_to_str = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        Self::from_toml(&toml_to_str)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: DriverConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::Invalid("capacity must be non-zero".into()));
        }
        if self.consumers == 0 {
            return Err(ConfigError::Invalid("at least one consumer is required".into()));
        }
        if self.mode == Mode::Exclusive && self.consumers != 1 {
            return Err(ConfigError::Invalid(format!(
                "exclusive mode supports exactly one consumer, got {}",
                self.consumers
            )));
        }
        Ok(())
    }
}
