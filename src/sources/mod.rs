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

//! Metric sources for ingesting data from external systems
//!
//! Sources receive metrics in the background between collection intervals
//! and hand whatever they have buffered to an accumulator on each gather.

use crate::error::Result;
use crate::sinks::Accumulator;
use async_trait::async_trait;

pub mod mqtt_consumer;

pub use mqtt_consumer::MqttConsumer;

/// Trait for all pull-based metric sources
#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Start receiving metrics in the background
    async fn start(&self) -> Result<()>;

    /// Forward buffered metrics to the accumulator without waiting for new ones
    async fn gather(&self, acc: &mut dyn Accumulator) -> Result<()>;

    /// Stop the source gracefully
    async fn stop(&self);

    /// Get the name of this source
    fn name(&self) -> &str;

    /// One-line description of this source
    fn description(&self) -> &str;
}
