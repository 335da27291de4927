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

//! Payload decoders
//!
//! A decoder turns one raw message payload into zero or more metrics. The
//! parser worker calls it off the transport's delivery task, so decoders are
//! free to do as much work as a payload needs.

use crate::error::DecodeError;
use crate::model::Metric;

pub mod line_protocol;

pub use line_protocol::LineProtocolDecoder;

/// Outcome of decoding one payload
///
/// Lines are decoded independently, so a payload can yield metrics and
/// errors at the same time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Decoded {
    /// Metrics from every line that parsed, in payload order
    pub metrics: Vec<Metric>,

    /// One error per line that did not parse
    pub errors: Vec<DecodeError>,
}

impl Decoded {
    /// Whether every line parsed
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Trait for all payload decoders
pub trait Decoder: Send + Sync {
    /// Decode a raw payload into metrics, collecting per-line errors
    fn decode(&self, payload: &[u8]) -> Decoded;
}

impl<F> Decoder for F
where
    F: Fn(&[u8]) -> Decoded + Send + Sync,
{
    fn decode(&self, payload: &[u8]) -> Decoded {
        self(payload)
    }
}
