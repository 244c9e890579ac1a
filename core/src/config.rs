//! Broker connection settings loaded from environment variables.
//!
//! | Variable | Used by | Default |
//! |---|---|---|
//! | `BROKER_SERVER` | both | required |
//! | `BROKER_GROUP_ID` | consumer | required |
//! | `BROKER_TOPICS` | consumer | required, comma separated |
//! | `BROKER_SEND_MAX_RETRIES` | producer | unset (client default) |
//! | `BROKER_SEND_TIMEOUT_MS` | producer | 5000 |

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;

/// Broker address variable
pub const SERVER_VAR: &str = "BROKER_SERVER";
/// Consumer group variable
pub const GROUP_ID_VAR: &str = "BROKER_GROUP_ID";
/// Topic list variable
pub const TOPICS_VAR: &str = "BROKER_TOPICS";
/// Producer retry count variable
pub const SEND_MAX_RETRIES_VAR: &str = "BROKER_SEND_MAX_RETRIES";
/// Producer timeout variable
pub const SEND_TIMEOUT_MS_VAR: &str = "BROKER_SEND_TIMEOUT_MS";

const DEFAULT_SEND_TIMEOUT_MS: u64 = 5000;

/// Connection settings for a consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerSettings {
    /// Broker address (comma-separated list accepted)
    pub server: String,
    /// Consumer group id
    pub group_id: String,
    /// Topics to subscribe to, in configuration order
    pub topics: Vec<String>,
}

impl ConsumerSettings {
    /// Load from process environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingSetting`] if a required variable is unset or blank.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Load using `lookup` to read variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingSetting`] if a required variable is unset or blank.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let server = required(&lookup, SERVER_VAR)?;
        let group_id = required(&lookup, GROUP_ID_VAR)?;
        let topics: Vec<String> = required(&lookup, TOPICS_VAR)?
            .split(',')
            .map(str::trim)
            .filter(|topic| !topic.is_empty())
            .map(str::to_string)
            .collect();

        if topics.is_empty() {
            return Err(ConfigError::InvalidSetting {
                var: TOPICS_VAR.to_string(),
                reason: "no topics listed".to_string(),
            });
        }

        Ok(Self {
            server,
            group_id,
            topics,
        })
    }
}

/// Connection settings for a producer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerSettings {
    /// Broker address (comma-separated list accepted)
    pub bootstrap_servers: String,
    /// Retries the broker client performs for a failed send; `None` keeps the client default
    pub message_send_max_retries: Option<u32>,
    /// How long a send may wait for delivery, in milliseconds
    pub timeout_ms: u64,
}

impl ProducerSettings {
    /// Settings for `bootstrap_servers` with defaults for everything else.
    #[must_use]
    pub fn new(bootstrap_servers: impl Into<String>) -> Self {
        Self {
            bootstrap_servers: bootstrap_servers.into(),
            message_send_max_retries: None,
            timeout_ms: DEFAULT_SEND_TIMEOUT_MS,
        }
    }

    /// Set the retry count passed through to the broker client.
    #[must_use]
    pub const fn with_max_retries(mut self, retries: u32) -> Self {
        self.message_send_max_retries = Some(retries);
        self
    }

    /// Load from process environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `BROKER_SERVER` is missing or a numeric
    /// variable does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Load using `lookup` to read variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `BROKER_SERVER` is missing or a numeric
    /// variable does not parse.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        Ok(Self {
            bootstrap_servers: required(&lookup, SERVER_VAR)?,
            message_send_max_retries: parsed(&lookup, SEND_MAX_RETRIES_VAR)?,
            timeout_ms: parsed(&lookup, SEND_TIMEOUT_MS_VAR)?.unwrap_or(DEFAULT_SEND_TIMEOUT_MS),
        })
    }
}

fn required(lookup: &impl Fn(&str) -> Option<String>, var: &str) -> Result<String, ConfigError> {
    lookup(var)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ConfigError::MissingSetting {
            var: var.to_string(),
        })
}

fn parsed<T>(lookup: &impl Fn(&str) -> Option<String>, var: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(var).map(|value| value.trim().to_string()) {
        None => Ok(None),
        Some(value) if value.is_empty() => Ok(None),
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::InvalidSetting {
                var: var.to_string(),
                reason: e.to_string(),
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    #[allow(clippy::unwrap_used)] // Panics: Test will fail if loading fails
    fn consumer_settings_split_topics() {
        let settings = ConsumerSettings::from_lookup(lookup(&[
            ("BROKER_SERVER", "kafka:9092"),
            ("BROKER_GROUP_ID", "notifications"),
            ("BROKER_TOPICS", "users, orders,,users"),
        ]))
        .unwrap();

        assert_eq!(settings.server, "kafka:9092");
        assert_eq!(settings.group_id, "notifications");
        assert_eq!(settings.topics, vec!["users", "orders", "users"]);
    }

    #[test]
    #[allow(clippy::unwrap_used)] // Panics: Test will fail if loading succeeds
    fn consumer_settings_require_group() {
        let err = ConsumerSettings::from_lookup(lookup(&[
            ("BROKER_SERVER", "kafka:9092"),
            ("BROKER_TOPICS", "users"),
        ]))
        .unwrap_err();

        assert_eq!(
            err,
            ConfigError::MissingSetting {
                var: "BROKER_GROUP_ID".to_string()
            }
        );
    }

    #[test]
    #[allow(clippy::unwrap_used)] // Panics: Test will fail if loading succeeds
    fn consumer_settings_reject_blank_topic_list() {
        let err = ConsumerSettings::from_lookup(lookup(&[
            ("BROKER_SERVER", "kafka:9092"),
            ("BROKER_GROUP_ID", "g"),
            ("BROKER_TOPICS", " , "),
        ]))
        .unwrap_err();

        assert!(matches!(err, ConfigError::InvalidSetting { .. }));
    }

    #[test]
    #[allow(clippy::unwrap_used)] // Panics: Test will fail if loading fails
    fn producer_settings_defaults() {
        let settings =
            ProducerSettings::from_lookup(lookup(&[("BROKER_SERVER", "kafka:9092")])).unwrap();
        assert_eq!(settings, ProducerSettings::new("kafka:9092"));
        assert_eq!(settings.timeout_ms, 5000);
        assert_eq!(settings.message_send_max_retries, None);
    }

    #[test]
    #[allow(clippy::unwrap_used)] // Panics: Test will fail if loading fails
    fn producer_settings_parse_retries() {
        let settings = ProducerSettings::from_lookup(lookup(&[
            ("BROKER_SERVER", "kafka:9092"),
            ("BROKER_SEND_MAX_RETRIES", "3"),
            ("BROKER_SEND_TIMEOUT_MS", "250"),
        ]))
        .unwrap();
        assert_eq!(settings.message_send_max_retries, Some(3));
        assert_eq!(settings.timeout_ms, 250);
    }

    #[test]
    #[allow(clippy::unwrap_used)] // Panics: Test will fail if loading succeeds
    fn producer_settings_reject_bad_number() {
        let err = ProducerSettings::from_lookup(lookup(&[
            ("BROKER_SERVER", "kafka:9092"),
            ("BROKER_SEND_MAX_RETRIES", "many"),
        ]))
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidSetting { ref var, .. } if var == "BROKER_SEND_MAX_RETRIES"
        ));
    }
}
