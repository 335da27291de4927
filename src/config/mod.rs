/*
 * Copyright 2024 ArpNetworking
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! Configuration parsing
//!
//! Agent and MQTT consumer configuration loaded from JSON files. Durations
//! use the ISO-8601 `PT<seconds>S` form.

use crate::error::ConsumerError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Capacity of the ingress and egress buffers when `metric_buffer` is unset or not positive
pub const DEFAULT_METRIC_BUFFER: usize = 100_000;

/// Example configuration, printed by `--sample-config`
pub const SAMPLE_CONFIG: &str = r#"{
  "interval": "PT10S",
  "mqtt_consumer": {
    "servers": ["localhost:1883"],
    "topics": [
      "telegraf/host01/cpu",
      "telegraf/host02/mem"
    ],
    "metric_buffer": 100000,
    "username": "telegraf",
    "password": "metricsmetricsmetricsmetrics",
    "tls": {
      "ca": "/etc/ssl/certs/broker-ca.pem",
      "insecure_skip_verify": false
    }
  }
}
"#;

/// Top level agent configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgentConfig {
    /// How often the collector gathers buffered metrics
    #[serde(default = "default_interval", with = "duration_serde")]
    pub interval: Duration,

    /// MQTT consumer configuration
    pub mqtt_consumer: MqttConsumerConfig,
}

/// MQTT consumer configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MqttConsumerConfig {
    /// Broker addresses (`host:port`, optionally with a `tcp://` or `ssl://` scheme)
    #[serde(default)]
    pub servers: Vec<String>,

    /// Topic filters to subscribe to
    #[serde(default)]
    pub topics: Vec<String>,

    /// Broker username
    #[serde(default)]
    pub username: Option<String>,

    /// Broker password
    #[serde(default)]
    pub password: Option<String>,

    /// Maximum number of messages and metrics buffered between gathers
    #[serde(default)]
    pub metric_buffer: i64,

    /// TLS options passed through to the transport
    #[serde(default)]
    pub tls: TlsConfig,

    /// MQTT client identifier
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// MQTT keep-alive interval
    #[serde(default = "default_keep_alive", with = "duration_serde")]
    pub keep_alive: Duration,

    /// How long to wait for a broker to acknowledge connect and subscribe
    #[serde(default = "default_connect_timeout", with = "duration_serde")]
    pub connect_timeout: Duration,

    /// Grace period for an orderly disconnect on stop
    #[serde(default = "default_disconnect_timeout", with = "duration_serde")]
    pub disconnect_timeout: Duration,
}

/// TLS configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to a PEM trust anchor for the broker certificate
    #[serde(default)]
    pub ca: Option<PathBuf>,

    /// Skip broker certificate verification
    #[serde(default)]
    pub insecure_skip_verify: bool,
}

impl AgentConfig {
    /// Load configuration from a file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_json(&contents)
    }

    /// Parse configuration from JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse configuration")
    }
}

impl MqttConsumerConfig {
    /// Create a configuration for the given servers and topics with defaults for everything else
    pub fn new<S, T>(servers: S, topics: T) -> Self
    where
        S: IntoIterator,
        S::Item: Into<String>,
        T: IntoIterator,
        T::Item: Into<String>,
    {
        Self {
            servers: servers.into_iter().map(Into::into).collect(),
            topics: topics.into_iter().map(Into::into).collect(),
            username: None,
            password: None,
            metric_buffer: 0,
            tls: TlsConfig::default(),
            client_id: default_client_id(),
            keep_alive: default_keep_alive(),
            connect_timeout: default_connect_timeout(),
            disconnect_timeout: default_disconnect_timeout(),
        }
    }

    /// Effective capacity of the ingress and egress buffers
    pub fn buffer_capacity(&self) -> usize {
        if self.metric_buffer > 0 {
            self.metric_buffer as usize
        } else {
            DEFAULT_METRIC_BUFFER
        }
    }

    /// Username to present to the broker, if one is configured
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref().filter(|u| !u.is_empty())
    }

    /// Password to present to the broker, if one is configured
    pub fn password(&self) -> Option<&str> {
        self.password.as_deref().filter(|p| !p.is_empty())
    }

    /// Check the settings required to start a consumer
    pub fn validate(&self) -> std::result::Result<(), ConsumerError> {
        if self.servers.is_empty() {
            return Err(ConsumerError::Configuration(
                "at least one server is required".to_string(),
            ));
        }
        if self.topics.is_empty() {
            return Err(ConsumerError::Configuration(
                "at least one topic is required".to_string(),
            ));
        }
        if self.client_id.is_empty() || self.client_id.starts_with(' ') {
            return Err(ConsumerError::Configuration(format!(
                "invalid client id: {:?}",
                self.client_id
            )));
        }
        if let Some(topic) = self.topics.iter().find(|t| t.is_empty()) {
            return Err(ConsumerError::Configuration(format!(
                "invalid topic filter: {:?}",
                topic
            )));
        }
        Ok(())
    }
}

// Default value functions
fn default_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_client_id() -> String {
    "metrics-mqtt-consumer".to_string()
}

fn default_keep_alive() -> Duration {
    Duration::from_secs(60)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_disconnect_timeout() -> Duration {
    Duration::from_millis(200)
}

// Duration serialization helpers
mod duration_serde {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        // Convert to ISO-8601 duration format (PT1.0S)
        let seconds = duration.as_secs_f64();
        let iso_duration = format!("PT{}S", seconds);
        serializer.serialize_str(&iso_duration)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;

        // Parse ISO-8601 duration format
        if s.starts_with("PT") && s.ends_with('S') {
            let seconds_str = &s[2..s.len() - 1];
            let seconds: f64 = seconds_str.parse().map_err(serde::de::Error::custom)?;
            Duration::try_from_secs_f64(seconds).map_err(serde::de::Error::custom)
        } else {
            Err(serde::de::Error::custom(format!(
                "Invalid duration format: {}",
                s
            )))
        }
    }
}
