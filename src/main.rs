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

use anyhow::{Context, Result};
use clap::Parser;
use mqtt_consumer::config::AgentConfig;
use mqtt_consumer::sources::MqttConsumer;
use mqtt_consumer::Agent;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Read line-protocol metrics from MQTT topics and print them as JSON lines
#[derive(Debug, Parser)]
#[command(name = "mqtt-consumer", version)]
struct Args {
    /// Path to the JSON configuration file
    #[arg(required_unless_present = "sample_config")]
    config: Option<PathBuf>,

    /// Override the collection interval, e.g. "10s" or "1m"
    #[arg(long)]
    interval: Option<humantime::Duration>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Print an example configuration and exit
    #[arg(long)]
    sample_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.sample_config {
        print!("{}", MqttConsumer::sample_config());
        return Ok(());
    }

    // Metrics go to stdout, logs to stderr
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .with_context(|| format!("Invalid log level: {}", args.log_level))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config_path = args
        .config
        .context("A configuration file is required")?;
    info!("Starting with config: {}", config_path.display());

    let mut config = AgentConfig::from_file(&config_path)?;
    if let Some(interval) = args.interval {
        config.interval = interval.into();
    }
    info!("Configuration loaded successfully");

    Agent::new(config).run().await
}
