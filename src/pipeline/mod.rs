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

//! Ingestion pipeline between the transport and gather
//!
//! ```text
//! delivery task ──offer──> ingress (mpsc) ──> ParserWorker ──offer──> egress (ArrayQueue) ──drain──> gather
//! ```
//!
//! Neither buffer ever blocks its producer: when one is full the newest item
//! is dropped, logged and counted.

pub mod queue;
pub mod stats;
pub mod worker;

pub use queue::{ingress, EgressQueue, IngressReceiver, IngressSender};
pub use stats::{PipelineStats, PipelineStatsSnapshot};
pub use worker::ParserWorker;
