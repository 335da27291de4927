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

//! Pipeline counters
//!
//! Every drop in the pipeline is logged; these counters make the same events
//! observable without scraping logs.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free counters shared by the delivery callback, parser worker and gather
#[derive(Debug, Default)]
pub struct PipelineStats {
    pub(crate) messages_received: AtomicU64,
    pub(crate) messages_dropped: AtomicU64,
    pub(crate) decode_errors: AtomicU64,
    pub(crate) metrics_decoded: AtomicU64,
    pub(crate) metrics_dropped: AtomicU64,
    pub(crate) metrics_gathered: AtomicU64,
}

/// Point-in-time copy of [`PipelineStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStatsSnapshot {
    /// Payloads handed to the pipeline by the transport
    pub messages_received: u64,
    /// Payloads dropped because the ingress buffer was full
    pub messages_dropped: u64,
    /// Payloads dropped because they could not be decoded
    pub decode_errors: u64,
    /// Metrics produced by the decoder
    pub metrics_decoded: u64,
    /// Metrics dropped because the egress buffer was full
    pub metrics_dropped: u64,
    /// Metrics forwarded to an accumulator by gather
    pub metrics_gathered: u64,
}

impl PipelineStats {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a snapshot of all counters
    pub fn snapshot(&self) -> PipelineStatsSnapshot {
        PipelineStatsSnapshot {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            metrics_decoded: self.metrics_decoded.load(Ordering::Relaxed),
            metrics_dropped: self.metrics_dropped.load(Ordering::Relaxed),
            metrics_gathered: self.metrics_gathered.load(Ordering::Relaxed),
        }
    }

    #[inline]
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot() {
        let stats = PipelineStats::new();
        PipelineStats::incr(&stats.messages_received);
        PipelineStats::incr(&stats.messages_received);
        PipelineStats::incr(&stats.messages_dropped);
        PipelineStats::add(&stats.metrics_decoded, 5);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.messages_received, 2);
        assert_eq!(snapshot.messages_dropped, 1);
        assert_eq!(snapshot.metrics_decoded, 5);
        assert_eq!(snapshot.metrics_gathered, 0);

        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains("\"messages_received\":2"));
    }
}
