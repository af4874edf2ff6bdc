//! Provider configuration
//!
//! Configuration is plain JSON. Durations are written as strings made of
//! `<number><unit>` pairs, e.g. `"500ms"`, `"30s"`, `"20m"` or `"1h30m"`.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backoff::DelayPolicy;
use crate::resource::Value;
use crate::retry::RetryableMessage;

/// Errors raised while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid duration '{0}': expected e.g. 500ms, 30s, 20m or 1h30m")]
    InvalidDuration(String),

    #[error("Invalid timeouts block: {0}")]
    InvalidTimeouts(String),

    #[error("Failed to read config file {path}: {message}")]
    Io { path: String, message: String },

    #[error("Failed to parse config: {0}")]
    Parse(String),
}

/// Parse a duration string such as `"1h30m"` or `"250ms"`
pub fn parse_duration(s: &str) -> Result<Duration, ConfigError> {
    let invalid = || ConfigError::InvalidDuration(s.to_string());
    let s = s.trim();
    if s.is_empty() {
        return Err(invalid());
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total = Duration::ZERO;
    let mut rest = s;
    while !rest.is_empty() {
        let digits = rest.find(|c: char| !c.is_ascii_digit()).ok_or_else(invalid)?;
        if digits == 0 {
            return Err(invalid());
        }
        let amount: u64 = rest[..digits].parse().map_err(|_| invalid())?;
        rest = &rest[digits..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(rest.len());
        let unit = &rest[..unit_len];
        rest = &rest[unit_len..];

        let part = match unit {
            "ms" => Duration::from_millis(amount),
            "s" => Duration::from_secs(amount),
            "m" => Duration::from_secs(amount.checked_mul(60).ok_or_else(invalid)?),
            "h" => Duration::from_secs(amount.checked_mul(3600).ok_or_else(invalid)?),
            _ => return Err(invalid()),
        };
        total = total.checked_add(part).ok_or_else(invalid)?;
    }
    Ok(total)
}

/// Render a duration in the same notation [`parse_duration`] accepts
pub fn format_duration(d: Duration) -> String {
    if d.is_zero() {
        return "0s".to_string();
    }
    if d.subsec_millis() != 0 || d.as_secs() == 0 {
        return format!("{}ms", d.as_millis());
    }

    let secs = d.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    let mut out = String::new();
    if h > 0 {
        out.push_str(&format!("{}h", h));
    }
    if m > 0 {
        out.push_str(&format!("{}m", m));
    }
    if s > 0 {
        out.push_str(&format!("{}s", s));
    }
    out
}

/// Serde adapter for `Duration` fields written as duration strings
pub mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_duration(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let s = String::deserialize(deserializer)?;
        super::parse_duration(&s).map_err(serde::de::Error::custom)
    }

    /// Same as the parent module, for `Option<Duration>`
    pub mod option {
        use std::time::Duration;

        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            d: &Option<Duration>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match d {
                Some(d) => serializer.serialize_str(&super::super::format_duration(*d)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Duration>, D::Error> {
            let s = Option::<String>::deserialize(deserializer)?;
            s.map(|s| super::super::parse_duration(&s).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}

/// Per-operation timeouts of a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub create: Duration,
    pub read: Duration,
    pub update: Duration,
    pub delete: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self::uniform(Duration::from_secs(20 * 60))
    }
}

impl Timeouts {
    pub fn uniform(timeout: Duration) -> Self {
        Self {
            create: timeout,
            read: timeout,
            update: timeout,
            delete: timeout,
        }
    }

    /// Return a copy with every overridden field replaced
    pub fn apply(mut self, overrides: &TimeoutOverrides) -> Self {
        if let Some(d) = overrides.create {
            self.create = d;
        }
        if let Some(d) = overrides.read {
            self.read = d;
        }
        if let Some(d) = overrides.update {
            self.update = d;
        }
        if let Some(d) = overrides.delete {
            self.delete = d;
        }
        self
    }
}

/// Partial timeouts, as written in configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutOverrides {
    #[serde(default, with = "duration_str::option", skip_serializing_if = "Option::is_none")]
    pub create: Option<Duration>,
    #[serde(default, with = "duration_str::option", skip_serializing_if = "Option::is_none")]
    pub read: Option<Duration>,
    #[serde(default, with = "duration_str::option", skip_serializing_if = "Option::is_none")]
    pub update: Option<Duration>,
    #[serde(default, with = "duration_str::option", skip_serializing_if = "Option::is_none")]
    pub delete: Option<Duration>,
}

impl TimeoutOverrides {
    /// Parse the `timeouts` attribute of a resource: a map of operation name to
    /// duration string.
    pub fn from_attribute(value: &Value) -> Result<Self, ConfigError> {
        let map = value
            .as_map()
            .ok_or_else(|| ConfigError::InvalidTimeouts("expected a map".to_string()))?;

        let mut overrides = TimeoutOverrides::default();
        for (key, v) in map {
            let s = v.as_str().ok_or_else(|| {
                ConfigError::InvalidTimeouts(format!("'{}' must be a duration string", key))
            })?;
            let d = parse_duration(s)?;
            match key.as_str() {
                "create" => overrides.create = Some(d),
                "read" => overrides.read = Some(d),
                "update" => overrides.update = Some(d),
                "delete" => overrides.delete = Some(d),
                other => {
                    return Err(ConfigError::InvalidTimeouts(format!(
                        "unknown operation '{}'",
                        other
                    )));
                }
            }
        }
        Ok(overrides)
    }
}

/// Settings for retrying mutating calls
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Budget for riding out eventual consistency (IAM role propagation and the like)
    #[serde(with = "duration_str", default = "default_propagation_timeout")]
    pub propagation_timeout: Duration,
    #[serde(default = "default_retry_policy")]
    pub policy: DelayPolicy,
}

fn default_propagation_timeout() -> Duration {
    Duration::from_secs(2 * 60)
}

fn default_retry_policy() -> DelayPolicy {
    DelayPolicy::default().with_min(Duration::from_millis(500))
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            propagation_timeout: default_propagation_timeout(),
            policy: default_retry_policy(),
        }
    }
}

/// Top-level provider configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub region: String,

    /// Delay policy shared by every status poller
    #[serde(default)]
    pub wait: DelayPolicy,

    #[serde(default)]
    pub retry: RetrySettings,

    /// Timeout overrides keyed by resource type
    #[serde(default)]
    pub timeouts: HashMap<String, TimeoutOverrides>,

    /// Retryable error signatures keyed by resource type. When present for a
    /// type they replace that type's built-in list.
    #[serde(default)]
    pub retryable_errors: HashMap<String, Vec<RetryableMessage>>,
}

impl ProviderConfig {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            wait: DelayPolicy::default(),
            retry: RetrySettings::default(),
            timeouts: HashMap::new(),
            retryable_errors: HashMap::new(),
        }
    }

    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Load configuration from a JSON file, then apply environment overrides
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let mut config = Self::from_json_str(&content)?;
        config.apply_env(std::env::var("AWS_REGION").ok());
        Ok(config)
    }

    fn apply_env(&mut self, region: Option<String>) {
        if let Some(region) = region.filter(|r| !r.is_empty()) {
            self.region = region;
        }
    }

    /// Timeouts for a resource type: handler defaults with configured overrides applied
    pub fn timeouts_for(&self, resource_type: &str, defaults: Timeouts) -> Timeouts {
        match self.timeouts.get(resource_type) {
            Some(overrides) => defaults.apply(overrides),
            None => defaults,
        }
    }

    /// Retryable error signatures for a resource type, falling back to `defaults`
    pub fn retryable_for(
        &self,
        resource_type: &str,
        defaults: &[RetryableMessage],
    ) -> Vec<RetryableMessage> {
        self.retryable_errors
            .get(resource_type)
            .cloned()
            .unwrap_or_else(|| defaults.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_durations() {
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("20m").unwrap(), Duration::from_secs(1200));
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
    }

    #[test]
    fn reject_bad_durations() {
        for s in ["", "10", "m", "5d", "1.5h", "h1"] {
            assert!(parse_duration(s).is_err(), "{} should not parse", s);
        }
    }

    #[test]
    fn oversized_durations_are_errors() {
        for s in ["6000000000000000h", "307445734561825861m", "18446744073709551615s1s"] {
            assert!(
                matches!(parse_duration(s), Err(ConfigError::InvalidDuration(_))),
                "{} should not parse",
                s
            );
        }
        assert!(parse_duration("2562047788015215h").is_ok());
    }

    #[test]
    fn format_round_trips() {
        for d in [
            Duration::from_millis(250),
            Duration::from_secs(45),
            Duration::from_secs(30 * 60),
            Duration::from_secs(3600 + 90),
        ] {
            assert_eq!(parse_duration(&format_duration(d)).unwrap(), d);
        }
    }

    #[test]
    fn timeouts_attribute_overrides_defaults() {
        let mut map = HashMap::new();
        map.insert("create".to_string(), Value::string("45m"));
        map.insert("delete".to_string(), Value::string("1h"));
        let overrides = TimeoutOverrides::from_attribute(&Value::Map(map)).unwrap();

        let timeouts = Timeouts::default().apply(&overrides);
        assert_eq!(timeouts.create, Duration::from_secs(45 * 60));
        assert_eq!(timeouts.update, Duration::from_secs(20 * 60));
        assert_eq!(timeouts.delete, Duration::from_secs(3600));
    }

    #[test]
    fn timeouts_attribute_rejects_unknown_operation() {
        let mut map = HashMap::new();
        map.insert("destroy".to_string(), Value::string("1m"));
        assert!(TimeoutOverrides::from_attribute(&Value::Map(map)).is_err());
    }

    #[test]
    fn parse_full_config() {
        let config = ProviderConfig::from_json_str(
            r#"{
                "region": "us-west-2",
                "wait": {"kind": "fixed", "interval": "2s"},
                "retry": {"propagation_timeout": "5m"},
                "timeouts": {"neptune_cluster": {"create": "2h"}},
                "retryable_errors": {
                    "bedrockagent_knowledge_base": [
                        {"code": "ValidationException", "message": "cannot assume role"}
                    ]
                }
            }"#,
        )
        .unwrap();

        assert_eq!(config.region, "us-west-2");
        assert_eq!(config.wait, DelayPolicy::fixed(Duration::from_secs(2)));
        assert_eq!(config.retry.propagation_timeout, Duration::from_secs(300));
        assert_eq!(config.retry.policy, default_retry_policy());

        let timeouts = config.timeouts_for("neptune_cluster", Timeouts::default());
        assert_eq!(timeouts.create, Duration::from_secs(7200));
        assert_eq!(timeouts.delete, Duration::from_secs(1200));

        let retryable = config.retryable_for("bedrockagent_knowledge_base", &[]);
        assert_eq!(retryable.len(), 1);
        assert!(config.retryable_for("neptune_cluster", &[]).is_empty());
    }

    #[test]
    fn config_file_and_env_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strata.json");
        std::fs::write(&path, r#"{"region": "eu-west-1"}"#).unwrap();

        let mut config = ProviderConfig::from_json_str(
            &std::fs::read_to_string(&path).unwrap(),
        )
        .unwrap();
        assert_eq!(config.region, "eu-west-1");

        config.apply_env(Some("ap-northeast-1".to_string()));
        assert_eq!(config.region, "ap-northeast-1");
        config.apply_env(Some(String::new()));
        assert_eq!(config.region, "ap-northeast-1");
    }

    #[test]
    fn missing_config_file_is_io_error() {
        let err = ProviderConfig::from_file("/nonexistent/strata.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
