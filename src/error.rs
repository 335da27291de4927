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

//! Error types for the consumer lifecycle and payload decoding
//!
//! Only start-time failures are ever returned to a caller. Everything that
//! happens after the consumer is running (decode failures, full buffers,
//! dropped connections) is logged and counted instead.

use thiserror::Error;

/// Errors returned by the consumer lifecycle
#[derive(Debug, Error)]
pub enum ConsumerError {
    /// Invalid or missing configuration (no servers, no topics, bad address)
    #[error("configuration error: {0}")]
    Configuration(String),

    /// No broker could be reached at start
    #[error("connection error: {0}")]
    Connection(String),

    /// The broker rejected a topic filter or never acknowledged the subscription
    #[error("subscription error: {0}")]
    Subscription(String),

    /// Start was called on a consumer that is already running
    #[error("consumer is already running")]
    AlreadyRunning,
}

/// A line of a payload could not be decoded into a metric
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {reason}")]
pub struct DecodeError {
    /// 1-based line number within the payload
    pub line: usize,

    /// What was wrong with the line
    pub reason: String,
}

impl DecodeError {
    /// Create a new decode error
    pub fn new(line: usize, reason: impl Into<String>) -> Self {
        Self {
            line,
            reason: reason.into(),
        }
    }
}

/// Result type for consumer operations
pub type Result<T> = std::result::Result<T, ConsumerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ConsumerError::Configuration("no servers".into());
        assert!(err.to_string().contains("no servers"));

        let err = ConsumerError::Connection("refused".into());
        assert!(err.to_string().starts_with("connection error"));

        let err = ConsumerError::Subscription("t/1 rejected".into());
        assert!(err.to_string().contains("t/1 rejected"));

        let err = ConsumerError::AlreadyRunning;
        assert!(err.to_string().contains("already running"));

        let err = DecodeError::new(3, "missing fields");
        assert_eq!(err.to_string(), "line 3: missing fields");
    }
}
