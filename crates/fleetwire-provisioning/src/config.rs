//! Provisioning pipeline configuration.
//!
//! Loaded from TOML, with `FLEETWIRE_*` environment variables overriding
//! individual values. Every field has a default so an empty document is a
//! valid configuration.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use fleetwire_core::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Environment variable names for configuration overrides.
pub mod env_vars {
    pub const INBOUND_WORKERS: &str = "FLEETWIRE_INBOUND_WORKERS";
    pub const INBOUND_QUEUE_CAPACITY: &str = "FLEETWIRE_INBOUND_QUEUE_CAPACITY";
    pub const INBOUND_MONITORING: &str = "FLEETWIRE_INBOUND_MONITORING";
    pub const OUTBOUND_WORKERS: &str = "FLEETWIRE_OUTBOUND_WORKERS";
    pub const OUTBOUND_QUEUE_CAPACITY: &str = "FLEETWIRE_OUTBOUND_QUEUE_CAPACITY";
    pub const ALLOW_NEW_DEVICES: &str = "FLEETWIRE_ALLOW_NEW_DEVICES";
    pub const SYSTEM_PRINCIPAL: &str = "FLEETWIRE_SYSTEM_PRINCIPAL";
    pub const MQTT_HOST: &str = "FLEETWIRE_MQTT_HOST";
    pub const MQTT_PORT: &str = "FLEETWIRE_MQTT_PORT";
    pub const SOCKET_BIND_ADDRESS: &str = "FLEETWIRE_SOCKET_BIND_ADDRESS";
    pub const SOCKET_PORT: &str = "FLEETWIRE_SOCKET_PORT";
    pub const WEBSOCKET_URL: &str = "FLEETWIRE_WEBSOCKET_URL";
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProvisioningConfig {
    #[serde(default)]
    pub inbound: InboundConfig,
    #[serde(default)]
    pub outbound: OutboundConfig,
    #[serde(default)]
    pub registration: RegistrationConfig,
    #[serde(default)]
    pub provisioning_processor: ProvisioningProcessorConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub system: SystemConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub socket: SocketConfig,
    #[serde(default)]
    pub websocket: WebSocketConfig,
}

/// Inbound blocking-queue strategy settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundConfig {
    /// Maximum number of queued decoded requests
    #[serde(default = "default_inbound_capacity")]
    pub queue_capacity: usize,
    /// Number of worker tasks
    #[serde(default = "default_inbound_workers")]
    pub worker_count: usize,
    /// Periodically log throughput counters
    #[serde(default)]
    pub enable_monitoring: bool,
    #[serde(default = "default_monitoring_interval")]
    pub monitoring_interval_secs: u64,
}

fn default_inbound_capacity() -> usize {
    10_000
}

fn default_inbound_workers() -> usize {
    100
}

fn default_monitoring_interval() -> u64 {
    5
}

impl Default for InboundConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_inbound_capacity(),
            worker_count: default_inbound_workers(),
            enable_monitoring: false,
            monitoring_interval_secs: default_monitoring_interval(),
        }
    }
}

impl InboundConfig {
    pub fn monitoring_interval(&self) -> Duration {
        Duration::from_secs(self.monitoring_interval_secs.max(1))
    }
}

/// Outbound blocking-queue strategy settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundConfig {
    #[serde(default = "default_outbound_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_outbound_workers")]
    pub worker_count: usize,
}

fn default_outbound_capacity() -> usize {
    1_000
}

fn default_outbound_workers() -> usize {
    10
}

impl Default for OutboundConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_outbound_capacity(),
            worker_count: default_outbound_workers(),
        }
    }
}

/// Registration manager settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationConfig {
    /// Create devices for unknown hardware ids
    #[serde(default = "default_true")]
    pub allow_new_devices: bool,
    /// Place new devices in a site when none is given
    #[serde(default = "default_true")]
    pub auto_assign_site: bool,
    /// Site used for auto-assignment; first listed site when absent
    #[serde(default)]
    pub auto_assign_site_token: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            allow_new_devices: true,
            auto_assign_site: true,
            auto_assign_site_token: None,
        }
    }
}

/// Provisioning event processor settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisioningProcessorConfig {
    /// Concurrent command deliveries
    #[serde(default = "default_processor_workers")]
    pub worker_count: usize,
}

fn default_processor_workers() -> usize {
    10
}

impl Default for ProvisioningProcessorConfig {
    fn default() -> Self {
        Self {
            worker_count: default_processor_workers(),
        }
    }
}

/// Batch operation manager settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Concurrent batch operations
    #[serde(default = "default_batch_workers")]
    pub worker_count: usize,
    /// Delay between elements of one operation
    #[serde(default)]
    pub throttle_delay_ms: u64,
}

fn default_batch_workers() -> usize {
    10
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            worker_count: default_batch_workers(),
            throttle_delay_ms: 0,
        }
    }
}

/// Command router policy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RouterConfig {
    /// Route everything to the only destination
    #[default]
    SingleChoice,
    /// Route by gateway specification token
    SpecificationMapping {
        #[serde(default)]
        mappings: HashMap<String, String>,
        #[serde(default)]
        default_destination: Option<String>,
    },
}

/// Identity used by pipeline workers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemConfig {
    #[serde(default = "default_principal")]
    pub principal: String,
}

fn default_principal() -> String {
    fleetwire_core::SYSTEM_PRINCIPAL.to_string()
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            principal: default_principal(),
        }
    }
}

/// MQTT transport settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    /// Generated when absent
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    /// Command topic template; `{hardware_id}` is replaced with the gateway id
    #[serde(default = "default_command_topic")]
    pub command_topic: String,
    /// System command topic template
    #[serde(default = "default_system_topic")]
    pub system_topic: String,
    /// Topic inbound device events are received on
    #[serde(default = "default_input_topic")]
    pub input_topic: String,
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_keep_alive() -> u64 {
    60
}

fn default_command_topic() -> String {
    "fleetwire/command/{hardware_id}".to_string()
}

fn default_system_topic() -> String {
    "fleetwire/system/{hardware_id}".to_string()
}

fn default_input_topic() -> String {
    "fleetwire/input/json".to_string()
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            client_id: None,
            keep_alive_secs: default_keep_alive(),
            command_topic: default_command_topic(),
            system_topic: default_system_topic(),
            input_topic: default_input_topic(),
        }
    }
}

/// Raw TCP socket receiver settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SocketConfig {
    #[serde(default = "default_socket_bind_address")]
    pub bind_address: String,
    /// Port 0 picks a free port
    #[serde(default = "default_socket_port")]
    pub port: u16,
    /// Connections read concurrently; further connections wait to be accepted
    #[serde(default = "default_socket_max_connections")]
    pub max_connections: usize,
    /// Payloads longer than this are truncated and dropped
    #[serde(default = "default_socket_max_payload")]
    pub max_payload_bytes: usize,
}

fn default_socket_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_socket_port() -> u16 {
    8484
}

fn default_socket_max_connections() -> usize {
    5
}

fn default_socket_max_payload() -> usize {
    1024 * 1024
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            bind_address: default_socket_bind_address(),
            port: default_socket_port(),
            max_connections: default_socket_max_connections(),
            max_payload_bytes: default_socket_max_payload(),
        }
    }
}

/// WebSocket client receiver settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebSocketConfig {
    #[serde(default = "default_websocket_url")]
    pub url: String,
    /// Extra headers sent with the upgrade request
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

fn default_websocket_url() -> String {
    "ws://localhost:8080/fleetwire/events".to_string()
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            url: default_websocket_url(),
            headers: HashMap::new(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

impl ProvisioningConfig {
    /// Parse from a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        toml::from_str(source)
            .map_err(|e| Error::Configuration(format!("Invalid provisioning configuration: {}", e)))
    }

    /// Load from a TOML file, apply environment overrides and validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let mut config = Self::from_toml_str(&source)?;
        config.apply_env_overrides();
        config.validate()?;
        debug!(path = %path.display(), "Loaded provisioning configuration");
        Ok(config)
    }

    /// Override values from `FLEETWIRE_*` environment variables.
    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parse(env_vars::INBOUND_WORKERS) {
            self.inbound.worker_count = v;
        }
        if let Some(v) = env_parse(env_vars::INBOUND_QUEUE_CAPACITY) {
            self.inbound.queue_capacity = v;
        }
        if let Some(v) = env_parse(env_vars::INBOUND_MONITORING) {
            self.inbound.enable_monitoring = v;
        }
        if let Some(v) = env_parse(env_vars::OUTBOUND_WORKERS) {
            self.outbound.worker_count = v;
        }
        if let Some(v) = env_parse(env_vars::OUTBOUND_QUEUE_CAPACITY) {
            self.outbound.queue_capacity = v;
        }
        if let Some(v) = env_parse(env_vars::ALLOW_NEW_DEVICES) {
            self.registration.allow_new_devices = v;
        }
        if let Ok(v) = std::env::var(env_vars::SYSTEM_PRINCIPAL) {
            self.system.principal = v;
        }
        if let Ok(v) = std::env::var(env_vars::MQTT_HOST) {
            self.mqtt.host = v;
        }
        if let Some(v) = env_parse(env_vars::MQTT_PORT) {
            self.mqtt.port = v;
        }
        if let Ok(v) = std::env::var(env_vars::SOCKET_BIND_ADDRESS) {
            self.socket.bind_address = v;
        }
        if let Some(v) = env_parse(env_vars::SOCKET_PORT) {
            self.socket.port = v;
        }
        if let Ok(v) = std::env::var(env_vars::WEBSOCKET_URL) {
            self.websocket.url = v;
        }
    }

    /// Reject settings that would leave a worker pool unusable.
    pub fn validate(&self) -> Result<()> {
        let checks = [
            (self.inbound.queue_capacity, "inbound.queue_capacity"),
            (self.inbound.worker_count, "inbound.worker_count"),
            (self.outbound.queue_capacity, "outbound.queue_capacity"),
            (self.outbound.worker_count, "outbound.worker_count"),
            (self.provisioning_processor.worker_count, "provisioning_processor.worker_count"),
            (self.batch.worker_count, "batch.worker_count"),
            (self.socket.max_connections, "socket.max_connections"),
            (self.socket.max_payload_bytes, "socket.max_payload_bytes"),
        ];
        for (value, name) in checks {
            if value == 0 {
                return Err(Error::Configuration(format!("{} must be greater than zero", name)));
            }
        }
        if let RouterConfig::SpecificationMapping {
            mappings,
            default_destination,
        } = &self.router
        {
            if mappings.is_empty() && default_destination.is_none() {
                return Err(Error::Configuration(
                    "Specification mapping router needs at least one mapping or a default destination"
                        .to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = ProvisioningConfig::from_toml_str("").unwrap();
        assert_eq!(config, ProvisioningConfig::default());
        assert_eq!(config.inbound.queue_capacity, 10_000);
        assert_eq!(config.inbound.worker_count, 100);
        assert!(!config.inbound.enable_monitoring);
        assert_eq!(config.outbound.queue_capacity, 1_000);
        assert_eq!(config.outbound.worker_count, 10);
        assert!(config.registration.allow_new_devices);
        assert!(config.registration.auto_assign_site);
        assert_eq!(config.router, RouterConfig::SingleChoice);
        assert_eq!(config.system.principal, "system");
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.socket.port, 8484);
        assert_eq!(config.socket.max_connections, 5);
        assert!(config.websocket.headers.is_empty());
    }

    #[test]
    fn test_receiver_sections() {
        let config = ProvisioningConfig::from_toml_str(
            r#"
            [socket]
            bind_address = "0.0.0.0"
            port = 9000

            [websocket]
            url = "ws://edge.local/events"
            headers = { authorization = "Bearer abc" }
            "#,
        )
        .unwrap();
        assert_eq!(config.socket.bind_address, "0.0.0.0");
        assert_eq!(config.socket.port, 9000);
        assert_eq!(config.socket.max_payload_bytes, 1024 * 1024);
        assert_eq!(config.websocket.url, "ws://edge.local/events");
        assert_eq!(
            config.websocket.headers.get("authorization").map(String::as_str),
            Some("Bearer abc")
        );

        let config = ProvisioningConfig::from_toml_str("[socket]\nmax_connections = 0\n").unwrap();
        assert!(config.validate().unwrap_err().to_string().contains("socket.max_connections"));
    }

    #[test]
    fn test_specification_mapping_router() {
        let config = ProvisioningConfig::from_toml_str(
            r#"
            [router]
            type = "specification_mapping"
            default_destination = "mqtt"

            [router.mappings]
            "spec-a" = "coap"
            "#,
        )
        .unwrap();
        match &config.router {
            RouterConfig::SpecificationMapping {
                mappings,
                default_destination,
            } => {
                assert_eq!(mappings.get("spec-a").map(String::as_str), Some("coap"));
                assert_eq!(default_destination.as_deref(), Some("mqtt"));
            }
            other => panic!("unexpected router config: {:?}", other),
        }
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_workers_rejected() {
        let config = ProvisioningConfig::from_toml_str("[inbound]\nworker_count = 0\n").unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("inbound.worker_count"));
    }

    #[test]
    fn test_invalid_toml() {
        assert!(ProvisioningConfig::from_toml_str("[inbound\n").is_err());
    }
}
