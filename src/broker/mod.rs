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

//! Broker transport
//!
//! The consumer sees the broker through two traits: a [`BrokerConnector`]
//! that opens a session to the first reachable server, and the resulting
//! [`BrokerSession`] that subscribes topic filters and delivers every
//! message to a single callback. The callback runs on the transport's own
//! delivery task and must return without blocking.

use crate::config::{MqttConsumerConfig, TlsConfig};
use crate::error::{ConsumerError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub mod mqtt;
mod tls;

#[cfg(test)]
pub(crate) mod testing;

pub use mqtt::MqttConnector;

/// Callback invoked with the topic and payload of every delivered message
pub type MessageHandler = Arc<dyn Fn(&str, Bytes) + Send + Sync>;

/// Opens sessions to a broker
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    /// Connect to the first reachable server in `options`
    async fn connect(&self, options: &ConnectOptions) -> Result<Box<dyn BrokerSession>>;
}

/// An established broker session
///
/// Sessions reconnect on their own after the initial connect; callers only
/// observe that message delivery pauses and resumes.
#[async_trait]
pub trait BrokerSession: Send + Sync {
    /// Subscribe to every filter at most-once delivery and route messages to `on_message`
    async fn subscribe(&self, topics: &[String], on_message: MessageHandler) -> Result<()>;

    /// Disconnect, waiting at most `grace` for in-flight work to finish
    async fn disconnect(&self, grace: Duration);

    /// The server this session is connected to
    fn server(&self) -> &ServerAddress;
}

/// A broker endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAddress {
    host: String,
    port: Option<u16>,
    tls: bool,
}

impl ServerAddress {
    /// Create an address
    pub fn new(host: impl Into<String>, port: Option<u16>, tls: bool) -> Self {
        Self {
            host: host.into(),
            port,
            tls,
        }
    }

    /// Host name or IP address
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port, defaulting to 1883 for plain and 8883 for TLS connections
    pub fn port(&self) -> u16 {
        self.port.unwrap_or(if self.tls { 8883 } else { 1883 })
    }

    /// Whether the connection uses TLS
    pub fn is_tls(&self) -> bool {
        self.tls
    }

    /// The same endpoint over TLS
    pub fn with_tls(mut self) -> Self {
        self.tls = true;
        self
    }
}

impl FromStr for ServerAddress {
    type Err = ConsumerError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |reason: &str| {
            ConsumerError::Configuration(format!("invalid server address {:?}: {}", s, reason))
        };

        let (tls, rest) = match s.split_once("://") {
            Some((scheme, rest)) => match scheme.to_ascii_lowercase().as_str() {
                "tcp" | "mqtt" => (false, rest),
                "ssl" | "tls" | "mqtts" => (true, rest),
                _ => return Err(invalid("unsupported scheme")),
            },
            None => (false, s),
        };

        let (host, port) = if let Some(bracketed) = rest.strip_prefix('[') {
            let (host, after) = bracketed
                .split_once(']')
                .ok_or_else(|| invalid("unterminated IPv6 address"))?;
            match after {
                "" => (host, None),
                _ => {
                    let port = after
                        .strip_prefix(':')
                        .ok_or_else(|| invalid("expected ':' after IPv6 address"))?;
                    (host, Some(port))
                }
            }
        } else {
            match rest.rsplit_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (rest, None),
            }
        };

        if host.is_empty() {
            return Err(invalid("missing host"));
        }
        if host.contains(':') && !rest.starts_with('[') {
            return Err(invalid("IPv6 addresses must be enclosed in brackets"));
        }
        let port = port
            .map(|p| p.parse::<u16>().map_err(|_| invalid("invalid port")))
            .transpose()?;

        Ok(Self::new(host, port, tls))
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = if self.tls { "ssl" } else { "tcp" };
        if self.host.contains(':') {
            write!(f, "{}://[{}]:{}", scheme, self.host, self.port())
        } else {
            write!(f, "{}://{}:{}", scheme, self.host, self.port())
        }
    }
}

/// Broker credentials
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Username
    pub username: String,

    /// Password, if any
    pub password: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Everything a connector needs to open a session
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Servers to try, in order
    pub servers: Vec<ServerAddress>,

    /// MQTT client identifier
    pub client_id: String,

    /// Optional credentials
    pub credentials: Option<Credentials>,

    /// TLS settings for TLS servers
    pub tls: TlsConfig,

    /// Keep-alive interval
    pub keep_alive: Duration,

    /// How long to wait for connect and subscribe acknowledgements
    pub connect_timeout: Duration,
}

impl ConnectOptions {
    /// Build transport options from consumer configuration
    ///
    /// A configured trust anchor switches every server to TLS.
    pub fn from_config(config: &MqttConsumerConfig) -> Result<Self> {
        if config.servers.is_empty() {
            return Err(ConsumerError::Configuration(
                "at least one server is required".to_string(),
            ));
        }

        let servers = config
            .servers
            .iter()
            .map(|s| {
                let address: ServerAddress = s.parse()?;
                Ok(if config.tls.ca.is_some() {
                    address.with_tls()
                } else {
                    address
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let credentials = match (config.username(), config.password()) {
            (Some(username), password) => Some(Credentials {
                username: username.to_string(),
                password: password.map(str::to_string),
            }),
            (None, Some(_)) => {
                warn!("MQTT password configured without a username, ignoring it");
                None
            }
            (None, None) => None,
        };

        Ok(Self {
            servers,
            client_id: config.client_id.clone(),
            credentials,
            tls: config.tls.clone(),
            keep_alive: config.keep_alive,
            connect_timeout: config.connect_timeout,
        })
    }
}
