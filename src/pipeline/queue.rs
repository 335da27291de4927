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

//! Bounded buffers between the transport, the parser worker and gather
//!
//! Both buffers drop the newest item when full and never block the producer.

use super::stats::PipelineStats;
use crate::model::Metric;
use bytes::Bytes;
use crossbeam_queue::ArrayQueue;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Raw payloads waiting to be decoded
pub type IngressReceiver = mpsc::Receiver<Bytes>;

/// Producer side of the ingress buffer, owned by the message callback
#[derive(Debug, Clone)]
pub struct IngressSender {
    sender: mpsc::Sender<Bytes>,
    stats: Arc<PipelineStats>,
}

/// Create an ingress buffer holding at most `capacity` payloads
pub fn ingress(capacity: usize, stats: Arc<PipelineStats>) -> (IngressSender, IngressReceiver) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (IngressSender { sender, stats }, receiver)
}

impl IngressSender {
    /// Try to append a payload without waiting
    ///
    /// Returns `false` if the payload was dropped because the buffer is full
    /// or the parser worker has gone away.
    pub fn offer(&self, payload: Bytes) -> bool {
        PipelineStats::incr(&self.stats.messages_received);
        match self.sender.try_send(payload) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                PipelineStats::incr(&self.stats.messages_dropped);
                warn!(
                    "MQTT Consumer message buffer is full, dropping a message. \
                     You may want to increase the metric_buffer setting"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                PipelineStats::incr(&self.stats.messages_dropped);
                debug!("Parser worker stopped, dropping a message");
                false
            }
        }
    }
}

/// Decoded metrics waiting to be gathered
#[derive(Debug)]
pub struct EgressQueue {
    queue: ArrayQueue<Metric>,
    stats: Arc<PipelineStats>,
}

impl EgressQueue {
    /// Create an egress buffer holding at most `capacity` metrics
    pub fn new(capacity: usize, stats: Arc<PipelineStats>) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            stats,
        }
    }

    /// Try to append a metric without waiting
    ///
    /// Returns `false` if the metric was dropped because the buffer is full.
    pub fn offer(&self, metric: Metric) -> bool {
        match self.queue.push(metric) {
            Ok(()) => true,
            Err(_) => {
                PipelineStats::incr(&self.stats.metrics_dropped);
                warn!(
                    "MQTT Consumer buffer is full, dropping a metric. \
                     You may want to increase the metric_buffer setting"
                );
                false
            }
        }
    }

    /// Remove up to as many metrics as are buffered right now, oldest first
    ///
    /// Metrics that arrive while draining are left for the next call.
    /// Returns the number of metrics handed to `f`.
    pub fn drain_snapshot<F>(&self, mut f: F) -> usize
    where
        F: FnMut(Metric),
    {
        let snapshot = self.queue.len();
        let mut drained = 0;
        while drained < snapshot {
            match self.queue.pop() {
                Some(metric) => {
                    f(metric);
                    drained += 1;
                }
                None => break,
            }
        }
        PipelineStats::add(&self.stats.metrics_gathered, drained as u64);
        drained
    }

    /// Number of buffered metrics
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether no metrics are buffered
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Maximum number of buffered metrics
    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }
}
