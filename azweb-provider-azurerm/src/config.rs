//! Provider configuration
//!
//! Read from `ARM_*` environment variables, then overlaid with the
//! manifest's `provider` block.

use std::collections::HashMap;
use std::time::Duration;

use azweb_core::poll::DEFAULT_POLL_INTERVAL;
use thiserror::Error;

pub const DEFAULT_ENDPOINT: &str = "https://management.azure.com";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),

    #[error("invalid poll interval \"{value}\": {reason}")]
    InvalidDuration { value: String, reason: String },

    #[error("unknown provider setting \"{0}\"")]
    UnknownSetting(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub subscription_id: String,
    pub access_token: Option<String>,
    pub endpoint: String,
    /// Interval between provisioning state and LRO status queries
    pub poll_interval: Duration,
}

impl ProviderConfig {
    pub fn new(subscription_id: impl Into<String>) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            access_token: None,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any variable source; `lookup` returns `None` for unset keys
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::new(lookup("ARM_SUBSCRIPTION_ID").unwrap_or_default());
        config.access_token = lookup("ARM_ACCESS_TOKEN").filter(|t| !t.is_empty());
        if let Some(endpoint) = lookup("ARM_ENDPOINT").filter(|e| !e.is_empty()) {
            config.endpoint = endpoint;
        }
        if let Some(interval) = lookup("ARM_POLL_INTERVAL") {
            config.poll_interval = parse_interval(&interval)?;
        }
        Ok(config)
    }

    /// Apply settings from the manifest `provider` block
    pub fn with_overrides(mut self, overrides: &HashMap<String, String>) -> Result<Self, ConfigError> {
        for (key, value) in overrides {
            match key.as_str() {
                "subscription_id" => self.subscription_id = value.clone(),
                "endpoint" => self.endpoint = value.clone(),
                "access_token" => self.access_token = Some(value.clone()),
                "poll_interval" => self.poll_interval = parse_interval(value)?,
                other => return Err(ConfigError::UnknownSetting(other.to_string())),
            }
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.subscription_id.is_empty() {
            return Err(ConfigError::Missing("ARM_SUBSCRIPTION_ID"));
        }
        Ok(())
    }

    pub fn require_token(&self) -> Result<&str, ConfigError> {
        self.access_token
            .as_deref()
            .ok_or(ConfigError::Missing("ARM_ACCESS_TOKEN"))
    }
}

fn parse_interval(value: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(value).map_err(|e| ConfigError::InvalidDuration {
        value: value.to_string(),
        reason: e.to_string(),
    })
}
