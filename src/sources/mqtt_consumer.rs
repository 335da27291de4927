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

//! MQTT consumer source
//!
//! Subscribes to MQTT topics carrying line-protocol metrics and buffers the
//! decoded metrics until the next gather.
//!
//! Start, stop and gather are serialized by one lock around the consumer's
//! state. Everything a running consumer owns (session, buffers, parser
//! worker, shutdown token) lives in a [`RunningPipeline`] that is built by
//! start and torn down by stop, so a stopped consumer can be started again.

use super::MetricsSource;
use crate::broker::{BrokerConnector, BrokerSession, ConnectOptions, MessageHandler, MqttConnector};
use crate::config::{MqttConsumerConfig, SAMPLE_CONFIG};
use crate::decoder::{Decoder, LineProtocolDecoder};
use crate::error::{ConsumerError, Result};
use crate::pipeline::{ingress, EgressQueue, ParserWorker, PipelineStats, PipelineStatsSnapshot};
use crate::sinks::Accumulator;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Reads line-protocol metrics from MQTT topics
pub struct MqttConsumer {
    config: MqttConsumerConfig,
    connector: Arc<dyn BrokerConnector>,
    decoder: Arc<dyn Decoder>,
    stats: Arc<PipelineStats>,
    state: Mutex<PipelineState>,
}

enum PipelineState {
    Stopped,
    Running(RunningPipeline),
}

/// Resources owned by a running consumer
struct RunningPipeline {
    session: Box<dyn BrokerSession>,
    egress: Arc<EgressQueue>,
    shutdown: CancellationToken,
    worker: JoinHandle<()>,
}

impl MqttConsumer {
    /// Create a consumer using the rumqttc transport and line-protocol decoder
    pub fn new(config: MqttConsumerConfig) -> Self {
        Self::with_parts(
            config,
            Arc::new(MqttConnector::new()),
            Arc::new(LineProtocolDecoder::new()),
        )
    }

    /// Create a consumer with a custom transport and decoder
    pub fn with_parts(
        config: MqttConsumerConfig,
        connector: Arc<dyn BrokerConnector>,
        decoder: Arc<dyn Decoder>,
    ) -> Self {
        Self {
            config,
            connector,
            decoder,
            stats: Arc::new(PipelineStats::new()),
            state: Mutex::new(PipelineState::Stopped),
        }
    }

    /// Example configuration for this source
    pub fn sample_config() -> &'static str {
        SAMPLE_CONFIG
    }

    /// Counters for received, decoded, dropped and gathered data
    ///
    /// Counters accumulate across restarts.
    pub fn stats(&self) -> PipelineStatsSnapshot {
        self.stats.snapshot()
    }

    /// Whether the consumer is running
    pub async fn is_running(&self) -> bool {
        matches!(*self.state.lock().await, PipelineState::Running(_))
    }

    async fn launch(&self) -> Result<RunningPipeline> {
        self.config.validate()?;
        let options = ConnectOptions::from_config(&self.config)?;
        let session = self.connector.connect(&options).await?;

        let capacity = self.config.buffer_capacity();
        let (ingress_tx, ingress_rx) = ingress(capacity, Arc::clone(&self.stats));
        let egress = Arc::new(EgressQueue::new(capacity, Arc::clone(&self.stats)));

        let on_message: MessageHandler = Arc::new(move |_topic: &str, payload: Bytes| {
            ingress_tx.offer(payload);
        });
        if let Err(err) = session.subscribe(&self.config.topics, on_message).await {
            session.disconnect(self.config.disconnect_timeout).await;
            return Err(err);
        }

        let shutdown = CancellationToken::new();
        let worker = ParserWorker::new(
            ingress_rx,
            Arc::clone(&egress),
            Arc::clone(&self.decoder),
            Arc::clone(&self.stats),
            shutdown.clone(),
        )
        .spawn();

        info!(
            server = %session.server(),
            topics = ?self.config.topics,
            metric_buffer = capacity,
            "MQTT consumer started"
        );
        Ok(RunningPipeline {
            session,
            egress,
            shutdown,
            worker,
        })
    }
}

#[async_trait]
impl MetricsSource for MqttConsumer {
    /// Connect, subscribe and launch the parser worker
    async fn start(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if let PipelineState::Running(_) = *state {
            return Err(ConsumerError::AlreadyRunning);
        }

        *state = PipelineState::Running(self.launch().await?);
        Ok(())
    }

    /// Forward every metric buffered when the call begins, oldest first
    async fn gather(&self, acc: &mut dyn Accumulator) -> Result<()> {
        let state = self.state.lock().await;
        let PipelineState::Running(pipeline) = &*state else {
            debug!("Gather called on a stopped MQTT consumer");
            return Ok(());
        };

        let gathered = pipeline.egress.drain_snapshot(|metric| {
            let (name, fields, tags, time) = metric.into_parts();
            acc.add_record(name, fields, tags, time);
        });
        debug!(metrics = gathered, stats = ?self.stats.snapshot(), "Gathered MQTT metrics");
        Ok(())
    }

    /// Stop the parser worker, then disconnect; a no-op when already stopped
    async fn stop(&self) {
        let mut state = self.state.lock().await;
        let PipelineState::Running(pipeline) =
            std::mem::replace(&mut *state, PipelineState::Stopped)
        else {
            return;
        };

        pipeline.shutdown.cancel();
        if let Err(err) = pipeline.worker.await {
            warn!(error = %err, "Parser worker ended abnormally");
        }
        pipeline
            .session
            .disconnect(self.config.disconnect_timeout)
            .await;
        info!("MQTT consumer stopped");
    }

    fn name(&self) -> &str {
        "mqtt_consumer"
    }

    fn description(&self) -> &str {
        "Read line-protocol metrics from MQTT topic(s)"
    }
}
