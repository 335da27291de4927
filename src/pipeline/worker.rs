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

//! Parser worker: decodes raw payloads off the transport's delivery task

use super::queue::{EgressQueue, IngressReceiver};
use super::stats::PipelineStats;
use crate::decoder::Decoder;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Single task draining the ingress buffer into the egress buffer
pub struct ParserWorker {
    ingress: IngressReceiver,
    egress: Arc<EgressQueue>,
    decoder: Arc<dyn Decoder>,
    stats: Arc<PipelineStats>,
    shutdown: CancellationToken,
}

impl ParserWorker {
    /// Create a new worker
    pub fn new(
        ingress: IngressReceiver,
        egress: Arc<EgressQueue>,
        decoder: Arc<dyn Decoder>,
        stats: Arc<PipelineStats>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            ingress,
            egress,
            decoder,
            stats,
            shutdown,
        }
    }

    /// Run the worker on its own task
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Decode payloads until shutdown is signalled or every producer is gone
    ///
    /// Payloads still buffered at shutdown are discarded.
    pub async fn run(mut self) {
        debug!("Parser worker started");
        loop {
            let payload = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                payload = self.ingress.recv() => match payload {
                    Some(payload) => payload,
                    None => break,
                },
            };

            let decoded = self.decoder.decode(&payload);
            if !decoded.is_clean() {
                let text = String::from_utf8_lossy(&payload);
                for err in &decoded.errors {
                    PipelineStats::incr(&self.stats.decode_errors);
                    warn!(payload = %text, error = %err, "Could not parse MQTT message");
                }
            }

            PipelineStats::add(&self.stats.metrics_decoded, decoded.metrics.len() as u64);
            for metric in decoded.metrics {
                self.egress.offer(metric);
            }
        }
        debug!("Parser worker stopped");
    }
}
