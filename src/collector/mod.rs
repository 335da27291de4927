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

//! Interval-driven collection loop
//!
//! Starts a source, gathers from it into a sink on a fixed interval and
//! stops it again on shutdown.

use crate::sinks::Accumulator;
use crate::sources::MetricsSource;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Periodically moves metrics from a source into a sink
pub struct Collector {
    interval: Duration,
    source: Arc<dyn MetricsSource>,
    sink: Box<dyn Accumulator>,
}

impl Collector {
    /// Create a new collector
    pub fn new(interval: Duration, source: Arc<dyn MetricsSource>, sink: Box<dyn Accumulator>) -> Self {
        Self {
            interval,
            source,
            sink,
        }
    }

    /// Run until `shutdown` is cancelled
    ///
    /// A source that fails to start ends the run with that error. Gather and
    /// flush errors are logged and collection continues.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<()> {
        anyhow::ensure!(!self.interval.is_zero(), "Collection interval must be positive");
        self.source
            .start()
            .await
            .with_context(|| format!("Failed to start source {}", self.source.name()))?;
        info!(source = self.source.name(), interval = ?self.interval, "Collector started");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => self.collect().await,
            }
        }

        debug!(source = self.source.name(), "Final gather before shutdown");
        self.collect().await;
        self.source.stop().await;
        info!(source = self.source.name(), "Collector stopped");
        Ok(())
    }

    async fn collect(&mut self) {
        if let Err(err) = self.source.gather(self.sink.as_mut()).await {
            warn!(source = self.source.name(), error = %err, "Gather failed");
        }
        if let Err(err) = self.sink.flush() {
            warn!(error = %err, "Flush failed");
        }
    }
}
