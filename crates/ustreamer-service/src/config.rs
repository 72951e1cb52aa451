// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Service configuration.
//!
//! Supports both programmatic and file-based configuration. The address
//! tables derived from it ([`ServiceTopology`]) are built once at startup and
//! shared read-only.

use crate::door::{DOOR_MESSAGE, DOOR_RESOURCE, METHOD_EXECUTE_DOOR_COMMAND};
use crate::uri::{UEntity, UResource, UUri};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Service configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Service name (for identification in logs).
    #[serde(default = "default_service_name")]
    pub name: String,

    /// Door instances with a state topic.
    #[serde(default = "default_doors")]
    pub doors: Vec<String>,

    /// Methods to advertise.
    #[serde(default = "default_methods")]
    pub methods: Vec<String>,

    /// Topics to subscribe to at startup (long-form URIs).
    #[serde(default = "default_subscriptions")]
    pub subscriptions: Vec<String>,

    /// Bound of the inbound request queue.
    #[serde(default = "default_queue_capacity")]
    pub inbound_queue_capacity: usize,

    /// Log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Statistics reporting interval (seconds, 0 disables).
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,

    /// Local entity identity.
    #[serde(default)]
    pub entity: EntityConfig,

    /// External engine handoff.
    #[serde(default)]
    pub bridge: BridgeConfig,
}

/// Entity identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityConfig {
    #[serde(default = "default_entity_name")]
    pub name: String,

    #[serde(default = "default_version_major")]
    pub version_major: u32,
}

/// External engine handoff settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Start the engine after connecting.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Upper bound on the engine teardown call (milliseconds).
    #[serde(default = "default_teardown_timeout")]
    pub teardown_timeout_ms: u64,

    /// Topics the built-in monitor engine listens on (long-form URIs).
    #[serde(default = "default_subscriptions")]
    pub engine_topics: Vec<String>,
}

fn default_service_name() -> String {
    "ustreamer-service".to_string()
}

fn default_entity_name() -> String {
    "example.streamer".to_string()
}

fn default_version_major() -> u32 {
    1
}

fn default_doors() -> Vec<String> {
    vec!["front_left".to_string(), "front_right".to_string()]
}

fn default_methods() -> Vec<String> {
    vec![METHOD_EXECUTE_DOOR_COMMAND.to_string()]
}

fn default_subscriptions() -> Vec<String> {
    vec!["/client.test/1/resource.main#Rust".to_string()]
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_stats_interval() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

fn default_teardown_timeout() -> u64 {
    2000
}

impl Default for EntityConfig {
    fn default() -> Self {
        Self {
            name: default_entity_name(),
            version_major: default_version_major(),
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            teardown_timeout_ms: default_teardown_timeout(),
            engine_topics: default_subscriptions(),
        }
    }
}

impl BridgeConfig {
    /// Teardown bound as a duration.
    pub fn teardown_timeout(&self) -> Duration {
        Duration::from_millis(self.teardown_timeout_ms)
    }

    /// Parsed engine topics.
    pub fn engine_topic_uris(&self) -> Result<Vec<UUri>, ConfigError> {
        parse_uris("bridge.engine_topics", &self.engine_topics)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            doors: default_doors(),
            methods: default_methods(),
            subscriptions: default_subscriptions(),
            inbound_queue_capacity: default_queue_capacity(),
            log_level: default_log_level(),
            stats_interval_secs: default_stats_interval(),
            entity: EntityConfig::default(),
            bridge: BridgeConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Local entity.
    pub fn entity(&self) -> UEntity {
        UEntity::new(self.entity.name.clone(), self.entity.version_major)
    }

    /// Parsed startup subscriptions.
    pub fn subscription_uris(&self) -> Result<Vec<UUri>, ConfigError> {
        parse_uris("subscriptions", &self.subscriptions)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.entity.name.is_empty() {
            return Err(ConfigError::Invalid("Entity name is empty".into()));
        }
        if self.inbound_queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "inbound_queue_capacity must be at least 1".into(),
            ));
        }

        for (i, door) in self.doors.iter().enumerate() {
            if door.is_empty() {
                return Err(ConfigError::Invalid(format!("Door {} has empty instance", i)));
            }
            if self.doors[..i].contains(door) {
                return Err(ConfigError::Invalid(format!("Duplicate door '{}'", door)));
            }
        }

        for method in &self.methods {
            if method != METHOD_EXECUTE_DOOR_COMMAND {
                return Err(ConfigError::Invalid(format!(
                    "Unknown method '{}' (available: {})",
                    method, METHOD_EXECUTE_DOOR_COMMAND
                )));
            }
        }

        self.subscription_uris()?;
        self.bridge.engine_topic_uris()?;
        Ok(())
    }
}

fn parse_uris(field: &str, values: &[String]) -> Result<Vec<UUri>, ConfigError> {
    values
        .iter()
        .map(|text| {
            text.parse::<UUri>()
                .map_err(|e| ConfigError::Invalid(format!("{}: {}", field, e)))
        })
        .collect()
}

/// Immutable address tables derived from [`ServiceConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceTopology {
    entity: UEntity,
    service_uri: UUri,
    door_topics: BTreeMap<String, UUri>,
    method_uris: BTreeMap<String, UUri>,
}

impl ServiceTopology {
    /// Build the tables for `config`.
    pub fn from_config(config: &ServiceConfig) -> Self {
        let entity = config.entity();
        let door_topics = config
            .doors
            .iter()
            .map(|door| {
                let resource = UResource::new(DOOR_RESOURCE, door.clone(), DOOR_MESSAGE);
                (door.clone(), UUri::for_topic(&entity, resource))
            })
            .collect();
        let method_uris = config
            .methods
            .iter()
            .map(|method| (method.clone(), UUri::for_method(&entity, method)))
            .collect();

        Self {
            service_uri: UUri::for_entity(entity.clone()),
            entity,
            door_topics,
            method_uris,
        }
    }

    /// Local entity.
    pub fn entity(&self) -> &UEntity {
        &self.entity
    }

    /// Entity-level address of this service.
    pub fn service_uri(&self) -> &UUri {
        &self.service_uri
    }

    /// State topic of `door`, if the door is known.
    pub fn door_topic(&self, door: &str) -> Option<&UUri> {
        self.door_topics.get(door)
    }

    /// All door state topics.
    pub fn door_topics(&self) -> impl Iterator<Item = (&str, &UUri)> {
        self.door_topics.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Address of `method`, if advertised.
    pub fn method_uri(&self, method: &str) -> Option<&UUri> {
        self.method_uris.get(method)
    }

    /// All advertised method addresses.
    pub fn method_uris(&self) -> impl Iterator<Item = (&str, &UUri)> {
        self.method_uris.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl Default for ServiceTopology {
    fn default() -> Self {
        Self::from_config(&ServiceConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_validate() {
        let config = ServiceConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.doors, vec!["front_left", "front_right"]);
        assert_eq!(config.inbound_queue_capacity, 1024);
        assert_eq!(config.bridge.teardown_timeout(), Duration::from_millis(2000));
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = ServiceConfig::from_toml("").expect("parse");
        assert_eq!(config, ServiceConfig::default());
    }

    #[test]
    fn test_validation_errors() {
        let mut config = ServiceConfig::default();
        config.methods.push("OpenTrunk".into());
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = ServiceConfig::default();
        config.doors.push("front_left".into());
        assert!(config.validate().is_err());

        let mut config = ServiceConfig::default();
        config.subscriptions = vec!["no-leading-slash".into()];
        assert!(config.validate().is_err());

        let mut config = ServiceConfig::default();
        config.inbound_queue_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_serialization() {
        let config = ServiceConfig::default();
        let text = config.to_toml().expect("serialize");
        let parsed = ServiceConfig::from_toml(&text).expect("parse");
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(
            file,
            r#"
name = "cabin"
doors = ["rear_left"]
inbound_queue_capacity = 8

[entity]
name = "body.access"
version_major = 2

[bridge]
enabled = false
"#
        )
        .expect("write");

        let config = ServiceConfig::from_file(file.path()).expect("load");
        assert_eq!(config.name, "cabin");
        assert_eq!(config.entity().name, "body.access");
        assert_eq!(config.entity().version_major, 2);
        assert!(!config.bridge.enabled);
        assert_eq!(config.bridge.teardown_timeout_ms, 2000);
        assert_eq!(config.methods, vec![METHOD_EXECUTE_DOOR_COMMAND]);
    }

    #[test]
    fn test_topology_tables() {
        let topology = ServiceTopology::default();
        let front_left = topology.door_topic("front_left").expect("door");
        assert_eq!(front_left.to_string(), "/example.streamer/1/doors.front_left#Doors");
        assert!(topology.door_topic("rear_left").is_none());

        let method = topology
            .method_uri(METHOD_EXECUTE_DOOR_COMMAND)
            .expect("method");
        assert!(method.is_method());
        assert_eq!(topology.service_uri(), &UUri::for_entity(topology.entity().clone()));
    }
}
