use std::fmt;
use std::marker::PhantomData;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::key::KeyPolicy;
use crate::radix_map::RadixMap;

/// Default number of optimistic restarts a mutating call may take before it
/// falls back to running exclusively against other mutators.
pub const DEFAULT_MAX_OPTIMISTIC_RETRIES: u32 = 16;

/// Tuning knobs for a [`RadixMap`].
///
/// ```
/// # use radixmap::{Config, KeyPolicy};
/// let config = Config::from_json(r#"{ "key_policy": "case-insensitive" }"#).unwrap();
/// assert_eq!(config.key_policy, KeyPolicy::CaseInsensitive);
/// assert_eq!(config.max_optimistic_retries, 16);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub key_policy: KeyPolicy,
    pub max_optimistic_retries: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            key_policy: KeyPolicy::default(),
            max_optimistic_retries: DEFAULT_MAX_OPTIMISTIC_RETRIES,
        }
    }
}

impl Config {
    /// Parses and validates a JSON configuration document. Missing fields take
    /// their default values.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_optimistic_retries == 0 {
            return Err(Error::InvalidConfig(
                "max_optimistic_retries must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for [`RadixMap`], created by [`RadixMap::builder`].
///
/// Wraps a [`Config`]; every setter overrides one field of it.
pub struct RadixMapBuilder<V> {
    config: Config,
    _marker: PhantomData<fn() -> V>,
}

impl<V> Default for RadixMapBuilder<V> {
    fn default() -> Self {
        RadixMapBuilder {
            config: Config::default(),
            _marker: PhantomData,
        }
    }
}

impl<V> Clone for RadixMapBuilder<V> {
    fn clone(&self) -> Self {
        RadixMapBuilder {
            config: self.config.clone(),
            _marker: PhantomData,
        }
    }
}

impl<V> fmt::Debug for RadixMapBuilder<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RadixMapBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl<V> RadixMapBuilder<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn key_policy(mut self, policy: KeyPolicy) -> Self {
        self.config.key_policy = policy;
        self
    }

    /// Shorthand for `key_policy(KeyPolicy::CaseInsensitive)`.
    pub fn case_insensitive(self) -> Self {
        self.key_policy(KeyPolicy::CaseInsensitive)
    }

    pub fn max_optimistic_retries(mut self, retries: u32) -> Self {
        self.config.max_optimistic_retries = retries;
        self
    }

    pub fn build(self) -> Result<RadixMap<V>> {
        self.config.validate()?;
        Ok(RadixMap::with_config(self.config))
    }
}
