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

//! # MQTT Metrics Consumer
//!
//! Subscribes to MQTT topics carrying line-protocol metrics and buffers the
//! decoded metrics for a pull-based collector.
//!
//! ## Features
//!
//! - **Non-blocking ingestion**: the transport's delivery path never waits;
//!   full buffers drop the newest item and count it
//! - **Bounded gather**: a gather returns what was buffered when it began
//! - **Restartable lifecycle**: start, stop and start again on one instance
//! - **TLS and credentials**: CA pinning, optional verification bypass
//!
//! ## Example
//!
//! ```rust,no_run
//! use mqtt_consumer::{Agent, config::AgentConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = AgentConfig::from_file("config.json")?;
//!     Agent::new(config).run().await
//! }
//! ```

use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub mod broker;
pub mod collector;
pub mod config;
pub mod decoder;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod sinks;
pub mod sources;

use collector::Collector;
use config::AgentConfig;
use sinks::JsonLinesSink;
use sources::MqttConsumer;

/// Runs an MQTT consumer, printing gathered metrics as JSON lines
pub struct Agent {
    config: AgentConfig,
    shutdown: CancellationToken,
}

impl Agent {
    /// Create a new agent with the given configuration
    pub fn new(config: AgentConfig) -> Self {
        Self {
            config,
            shutdown: CancellationToken::new(),
        }
    }

    /// Token that stops the agent when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Collect until SIGINT, SIGTERM or the shutdown token fires
    pub async fn run(self) -> Result<()> {
        info!("Starting MQTT consumer agent");
        self.setup_signal_handlers();

        let source = Arc::new(MqttConsumer::new(self.config.mqtt_consumer));
        let collector = Collector::new(
            self.config.interval,
            source,
            Box::new(JsonLinesSink::stdout()),
        );
        collector.run(self.shutdown).await?;

        info!("Shutdown complete");
        Ok(())
    }

    fn setup_signal_handlers(&self) {
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            match signal::ctrl_c().await {
                Ok(()) => {
                    info!("Received SIGINT, initiating shutdown");
                    shutdown.cancel();
                }
                Err(err) => {
                    warn!("Failed to listen for SIGINT: {}", err);
                }
            }
        });

        #[cfg(unix)]
        {
            let shutdown = self.shutdown.clone();
            tokio::spawn(async move {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        sigterm.recv().await;
                        info!("Received SIGTERM, initiating shutdown");
                        shutdown.cancel();
                    }
                    Err(err) => {
                        warn!("Failed to register SIGTERM handler: {}", err);
                    }
                }
            });
        }
    }
}
