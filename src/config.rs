//! Configuration loading (spec §6).
//!
//! Two independent config files are accepted on the command line: the
//! package config (device filters, baud rates, timeouts, logging) and the
//! RPC config (broker connection options). Both are deserialized with
//! `serde`; the file format is sniffed from the extension (`.toml` vs
//! everything else, which is treated as JSON, matching the wire-format
//! convention used throughout spec §6).

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

fn default_device_path_filters() -> Vec<String> {
    vec!["/dev/ttyUSB".to_string(), "/dev/ttyACM".to_string(), "/dev/ttyS".to_string()]
}

fn default_baudrates() -> Vec<u32> {
    vec![57600, 115200, 921600, 500000, 1500000, 9600, 19200, 38400]
}

fn default_read_timeout_ms() -> u64 {
    100
}

fn default_packet_timeout_ms() -> u64 {
    1000
}

fn default_max_packet_size() -> usize {
    280
}

fn default_log_level() -> String {
    "INFO".to_string()
}

/// Package configuration (spec §6).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PackageConfig {
    pub device_path_filters: Vec<String>,
    pub baudrates: Vec<u32>,
    pub read_timeout_ms: u64,
    pub packet_timeout_ms: u64,
    pub max_packet_size: usize,
    pub log_file: Option<String>,
    pub log_level: String,
    pub runtime_device_file: Option<String>,
}

impl Default for PackageConfig {
    fn default() -> Self {
        Self {
            device_path_filters: default_device_path_filters(),
            baudrates: default_baudrates(),
            read_timeout_ms: default_read_timeout_ms(),
            packet_timeout_ms: default_packet_timeout_ms(),
            max_packet_size: default_max_packet_size(),
            log_file: None,
            log_level: default_log_level(),
            runtime_device_file: None,
        }
    }
}

impl PackageConfig {
    /// Loads a package config from `path`, falling back to documented
    /// defaults for any absent key.
    pub fn load(path: &Path) -> Result<Self> {
        load_config(path)
    }
}

fn default_keepalive() -> u64 {
    60
}

fn default_qos() -> u8 {
    1
}

fn default_reconnect_delay_min() -> u64 {
    1
}

fn default_reconnect_delay_max() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_message_timeout() -> u64 {
    10
}

fn default_broker_port() -> u16 {
    1883
}

/// Heartbeat publish options (spec §4.8, §6). Keys are snake_case, matching
/// the rest of the RPC config.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub enabled: bool,
    pub interval_seconds: u64,
    pub topic: String,
    pub payload: String,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_seconds: 5,
            topic: "heartbeat".to_string(),
            payload: "{}".to_string(),
        }
    }
}

/// A named list of broker topics, matching the `{topics:[string]}` shape
/// used for `json_added_pubs`/`json_added_subs` in spec §6.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TopicSet {
    #[serde(default)]
    pub topics: Vec<String>,
}

/// RPC (broker) configuration (spec §6, §4.8). Keys are snake_case, unlike
/// the camelCase package config.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    pub client_id: String,
    pub broker_host: String,
    pub broker_port: u16,
    pub keepalive: u64,
    pub qos: u8,
    pub auto_reconnect: bool,
    pub reconnect_delay_min: u64,
    pub reconnect_delay_max: u64,
    pub use_tls: bool,
    pub connect_timeout: u64,
    pub message_timeout: u64,
    pub heartbeat: HeartbeatConfig,
    pub json_added_pubs: TopicSet,
    pub json_added_subs: TopicSet,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            client_id: "mav-discoveryd".to_string(),
            broker_host: "localhost".to_string(),
            broker_port: default_broker_port(),
            keepalive: default_keepalive(),
            qos: default_qos(),
            auto_reconnect: true,
            reconnect_delay_min: default_reconnect_delay_min(),
            reconnect_delay_max: default_reconnect_delay_max(),
            use_tls: false,
            connect_timeout: default_connect_timeout(),
            message_timeout: default_message_timeout(),
            heartbeat: HeartbeatConfig::default(),
            json_added_pubs: TopicSet::default(),
            json_added_subs: TopicSet::default(),
        }
    }
}

impl RpcConfig {
    /// Loads an RPC config from `path`.
    pub fn load(path: &Path) -> Result<Self> {
        load_config(path)
    }

    /// Topic this daemon subscribes to for inbound requests (spec §6).
    pub fn request_topic(&self) -> String {
        format!("direct_messaging/{}/requests", self.client_id)
    }

    /// Topic this daemon publishes replies to (spec §6).
    pub fn response_topic(&self) -> String {
        format!("direct_messaging/{}/responses", self.client_id)
    }
}

fn load_config<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;

    let is_toml = path.extension().and_then(|ext| ext.to_str()).map(|ext| ext.eq_ignore_ascii_case("toml")).unwrap_or(false);

    if is_toml {
        toml::from_str(&text).map_err(|e| Error::Config(format!("invalid TOML in {}: {e}", path.display())))
    } else {
        serde_json::from_str(&text).map_err(|e| Error::Config(format!("invalid JSON in {}: {e}", path.display())))
    }
}
