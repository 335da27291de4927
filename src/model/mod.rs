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

//! Core data model for consumed metrics
//!
//! Defines the structured metric record produced by decoders and handed to
//! accumulators by the consumer's gather call.

use ahash::{HashMap, HashMapExt};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Field key to value mapping of a metric
pub type Fields = HashMap<String, FieldValue>;

/// Tag key to value mapping of a metric
pub type Tags = HashMap<String, String>;

/// A single decoded metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    /// Measurement name
    name: String,

    /// Field values keyed by field name
    fields: Fields,

    /// Tags (dimensions) keyed by tag name
    tags: Tags,

    /// Timestamp of the measurement
    time: DateTime<Utc>,
}

/// Value of a metric field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Floating point value
    Float(f64),
    /// Signed integer value
    Integer(i64),
    /// Unsigned integer value
    Unsigned(u64),
    /// Boolean value
    Boolean(bool),
    /// String value
    String(String),
}

impl Metric {
    /// Create a new metric
    pub fn new(name: impl Into<String>, fields: Fields, tags: Tags, time: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            fields,
            tags,
            time,
        }
    }

    /// Start building a metric with the given name, timestamped now
    pub fn builder(name: impl Into<String>) -> MetricBuilder {
        MetricBuilder {
            name: name.into(),
            fields: Fields::new(),
            tags: Tags::new(),
            time: Utc::now(),
        }
    }

    /// Measurement name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Field values
    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    /// Tags
    pub fn tags(&self) -> &Tags {
        &self.tags
    }

    /// Timestamp
    pub fn time(&self) -> DateTime<Utc> {
        self.time
    }

    /// Consume the metric, returning its parts
    pub fn into_parts(self) -> (String, Fields, Tags, DateTime<Utc>) {
        (self.name, self.fields, self.tags, self.time)
    }
}

/// Builder for [`Metric`]
#[derive(Debug, Clone)]
pub struct MetricBuilder {
    name: String,
    fields: Fields,
    tags: Tags,
    time: DateTime<Utc>,
}

impl MetricBuilder {
    /// Add a field; a later value for the same key replaces the earlier one
    pub fn field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Add a tag; a later value for the same key replaces the earlier one
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Set the timestamp
    pub fn time(mut self, time: DateTime<Utc>) -> Self {
        self.time = time;
        self
    }

    /// Finish the metric
    pub fn build(self) -> Metric {
        Metric::new(self.name, self.fields, self.tags, self.time)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<u64> for FieldValue {
    fn from(value: u64) -> Self {
        FieldValue::Unsigned(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Boolean(value)
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::String(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::String(value.to_string())
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Float(v) => write!(f, "{}", v),
            FieldValue::Integer(v) => write!(f, "{}i", v),
            FieldValue::Unsigned(v) => write!(f, "{}u", v),
            FieldValue::Boolean(v) => write!(f, "{}", v),
            FieldValue::String(v) => write!(f, "{:?}", v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_builder() {
        let time = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let metric = Metric::builder("cpu")
            .field("usage", 42.0)
            .field("cores", 8i64)
            .tag("host", "a")
            .time(time)
            .build();

        assert_eq!(metric.name(), "cpu");
        assert_eq!(metric.fields().get("usage"), Some(&FieldValue::Float(42.0)));
        assert_eq!(metric.fields().get("cores"), Some(&FieldValue::Integer(8)));
        assert_eq!(metric.tags().get("host").map(String::as_str), Some("a"));
        assert_eq!(metric.time(), time);
    }

    #[test]
    fn test_duplicate_keys_keep_last() {
        let metric = Metric::builder("mem")
            .field("used", 1.0)
            .field("used", 2.0)
            .tag("host", "a")
            .tag("host", "b")
            .build();

        assert_eq!(metric.fields().len(), 1);
        assert_eq!(metric.fields().get("used"), Some(&FieldValue::Float(2.0)));
        assert_eq!(metric.tags().get("host").map(String::as_str), Some("b"));
    }

    #[test]
    fn test_metric_serialization() {
        let metric = Metric::builder("disk")
            .field("free", 1024u64)
            .field("mounted", true)
            .field("path", "/var")
            .tag("device", "sda1")
            .build();

        let json = serde_json::to_string(&metric).unwrap();
        let deserialized: Metric = serde_json::from_str(&json).unwrap();

        assert_eq!(deserialized.name(), "disk");
        assert_eq!(deserialized.tags(), metric.tags());
        assert_eq!(
            deserialized.fields().get("path"),
            Some(&FieldValue::String("/var".to_string()))
        );
        assert_eq!(
            deserialized.fields().get("mounted"),
            Some(&FieldValue::Boolean(true))
        );
    }
}
