// Commit Configuration
//
// Tunables for the commit coordinator, loadable from JSON or from table
// properties.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Table property that overrides the retry bound.
pub const RETRY_PROPERTY: &str = "commit.retry.num-retries";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitConfig {
    /// How many times a commit is rebased and retried after losing the
    /// pointer swap. Total attempts are `max_retries + 1`.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_max_retries() -> u32 {
    CommitConfig::DEFAULT_MAX_RETRIES
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("table property `{key}` has invalid value `{value}`")]
    InvalidProperty { key: &'static str, value: String },
}

impl CommitConfig {
    pub const DEFAULT_MAX_RETRIES: u32 = 4;

    /// Built-in configuration (used if nothing else is provided).
    pub fn default_config() -> Self {
        Self {
            max_retries: Self::DEFAULT_MAX_RETRIES,
        }
    }

    /// Built-in configuration, with overrides taken from table properties.
    pub fn from_properties(properties: &BTreeMap<String, String>) -> Result<Self, ConfigError> {
        let mut config = Self::default_config();
        if let Some(value) = properties.get(RETRY_PROPERTY) {
            config.max_retries =
                value
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidProperty {
                        key: RETRY_PROPERTY,
                        value: value.clone(),
                    })?;
        }
        Ok(config)
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

impl Default for CommitConfig {
    fn default() -> Self {
        Self::default_config()
    }
}
