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

//! Accumulators receiving gathered metrics
//!
//! An accumulator takes ownership of every record a gather call forwards.
//! What happens to it next (buffering, printing, shipping to a remote
//! system) is up to the accumulator.

use crate::model::{Fields, Metric, Tags};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::Write;

/// Trait for all metric accumulators
pub trait Accumulator: Send {
    /// Accept one gathered record
    fn add_record(&mut self, name: String, fields: Fields, tags: Tags, time: DateTime<Utc>);

    /// Flush anything buffered since the last flush
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

impl Accumulator for Vec<Metric> {
    fn add_record(&mut self, name: String, fields: Fields, tags: Tags, time: DateTime<Utc>) {
        self.push(Metric::new(name, fields, tags, time));
    }
}

/// Writes every record as one JSON object per line
pub struct JsonLinesSink<W: Write + Send> {
    writer: W,
    pending: usize,
}

#[derive(Serialize)]
struct JsonRecord<'a> {
    name: &'a str,
    fields: &'a Fields,
    tags: &'a Tags,
    time: DateTime<Utc>,
}

impl<W: Write + Send> JsonLinesSink<W> {
    /// Create a sink writing to `writer`
    pub fn new(writer: W) -> Self {
        Self { writer, pending: 0 }
    }

    /// Consume the sink, returning the writer
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl JsonLinesSink<std::io::Stdout> {
    /// Create a sink writing to standard output
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> Accumulator for JsonLinesSink<W> {
    fn add_record(&mut self, name: String, fields: Fields, tags: Tags, time: DateTime<Utc>) {
        let record = JsonRecord {
            name: &name,
            fields: &fields,
            tags: &tags,
            time,
        };
        let written = serde_json::to_writer(&mut self.writer, &record)
            .map_err(std::io::Error::from)
            .and_then(|()| self.writer.write_all(b"\n"));
        match written {
            Ok(()) => self.pending += 1,
            Err(err) => tracing::warn!(metric = %name, error = %err, "Could not write metric"),
        }
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush().context("Failed to flush metrics")?;
        tracing::debug!(records = self.pending, "Flushed metrics");
        self.pending = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_vec_accumulator() {
        let mut metrics: Vec<Metric> = Vec::new();
        let metric = Metric::builder("cpu").field("usage", 42.0).tag("host", "a").build();
        let (name, fields, tags, time) = metric.clone().into_parts();

        metrics.add_record(name, fields, tags, time);
        assert_eq!(metrics, vec![metric]);
        assert!(metrics.flush().is_ok());
    }

    #[test]
    fn test_json_lines_sink() {
        let time = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let mut sink = JsonLinesSink::new(Vec::new());
        for host in ["a", "b"] {
            let (name, fields, tags, time) = Metric::builder("cpu")
                .field("usage", 42.0)
                .tag("host", host)
                .time(time)
                .build()
                .into_parts();
            sink.add_record(name, fields, tags, time);
        }
        sink.flush().unwrap();

        let output = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<serde_json::Value> = output
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["name"], "cpu");
        assert_eq!(lines[0]["fields"]["usage"], 42.0);
        assert_eq!(lines[1]["tags"]["host"], "b");
        assert_eq!(lines[0]["time"], "2023-11-14T22:13:20Z");
    }
}
