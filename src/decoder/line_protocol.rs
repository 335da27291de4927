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

//! InfluxDB line protocol decoder
//!
//! Each line of a payload has the form
//!
//! ```text
//! measurement[,tag=value...] field=value[,field=value...] [timestamp]
//! ```
//!
//! where the timestamp is in nanoseconds since the Unix epoch. Lines without
//! a timestamp are stamped with the time the payload was decoded. Blank lines
//! and lines starting with `#` are ignored. A malformed line is reported and
//! skipped; the remaining lines of the payload are still decoded.

use super::{Decoded, Decoder};
use crate::error::DecodeError;
use crate::model::{FieldValue, Fields, Metric, Tags};
use ahash::HashMapExt;
use chrono::{DateTime, TimeZone, Utc};

/// Decoder for line protocol payloads
#[derive(Debug, Clone, Copy, Default)]
pub struct LineProtocolDecoder;

impl LineProtocolDecoder {
    /// Create a new decoder
    pub fn new() -> Self {
        Self
    }

    /// Decode a payload, stamping lines without a timestamp with `now`
    pub fn decode_at(&self, payload: &[u8], now: DateTime<Utc>) -> Decoded {
        let mut decoded = Decoded::default();
        for (index, raw) in payload.split(|b| *b == b'\n').enumerate() {
            let line = match std::str::from_utf8(raw) {
                Ok(line) => line.trim(),
                Err(_) => {
                    decoded
                        .errors
                        .push(DecodeError::new(index + 1, "line is not valid UTF-8"));
                    continue;
                }
            };
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match parse_line(line, now) {
                Ok(metric) => decoded.metrics.push(metric),
                Err(reason) => decoded.errors.push(DecodeError::new(index + 1, reason)),
            }
        }
        decoded
    }
}

impl Decoder for LineProtocolDecoder {
    fn decode(&self, payload: &[u8]) -> Decoded {
        self.decode_at(payload, Utc::now())
    }
}

fn parse_line(line: &str, now: DateTime<Utc>) -> Result<Metric, String> {
    let (series, rest) = split_once_unescaped(line, ' ', false)
        .ok_or_else(|| "missing fields".to_string())?;
    let rest = rest.trim_start();
    let (field_section, timestamp) = match split_once_unescaped(rest, ' ', true) {
        Some((fields, ts)) => (fields, Some(ts.trim())),
        None => (rest, None),
    };

    let mut parts = split_unescaped(series, ',', false).into_iter();
    let name = unescape(parts.next().unwrap_or_default(), &[',', ' ']);
    if name.is_empty() {
        return Err("missing measurement name".to_string());
    }

    let mut tags = Tags::new();
    for tag in parts {
        let (key, value) = split_once_unescaped(tag, '=', false)
            .ok_or_else(|| format!("invalid tag {:?}", tag))?;
        if key.is_empty() || value.is_empty() {
            return Err(format!("invalid tag {:?}", tag));
        }
        tags.insert(unescape(key, &[',', '=', ' ']), unescape(value, &[',', '=', ' ']));
    }

    if field_section.is_empty() {
        return Err("missing fields".to_string());
    }
    let mut fields = Fields::new();
    for field in split_unescaped(field_section, ',', true) {
        let (key, value) = split_once_unescaped(field, '=', false)
            .ok_or_else(|| format!("invalid field {:?}", field))?;
        if key.is_empty() {
            return Err(format!("invalid field {:?}", field));
        }
        fields.insert(unescape(key, &[',', '=', ' ']), parse_field_value(value)?);
    }

    let time = match timestamp {
        Some(ts) if !ts.is_empty() => {
            let nanos: i64 = ts
                .parse()
                .map_err(|_| format!("invalid timestamp {:?}", ts))?;
            Utc.timestamp_nanos(nanos)
        }
        _ => now,
    };

    Ok(Metric::new(name, fields, tags, time))
}

fn parse_field_value(value: &str) -> Result<FieldValue, String> {
    if let Some(quoted) = value.strip_prefix('"') {
        let inner = quoted
            .strip_suffix('"')
            .ok_or_else(|| format!("unterminated string value {:?}", value))?;
        return Ok(FieldValue::String(unescape(inner, &['"', '\\'])));
    }

    match value {
        "t" | "T" | "true" | "True" | "TRUE" => return Ok(FieldValue::Boolean(true)),
        "f" | "F" | "false" | "False" | "FALSE" => return Ok(FieldValue::Boolean(false)),
        _ => {}
    }

    if let Some(int) = value.strip_suffix('i') {
        return int
            .parse()
            .map(FieldValue::Integer)
            .map_err(|_| format!("invalid integer value {:?}", value));
    }
    if let Some(uint) = value.strip_suffix('u') {
        return uint
            .parse()
            .map(FieldValue::Unsigned)
            .map_err(|_| format!("invalid unsigned value {:?}", value));
    }

    // Rust also parses `inf` and `NaN`, which line protocol does not allow
    let numeric = value
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, 'e' | 'E' | '.' | '-' | '+'));
    match value.parse::<f64>() {
        Ok(float) if numeric && float.is_finite() => Ok(FieldValue::Float(float)),
        _ => Err(format!("invalid field value {:?}", value)),
    }
}

/// Split on every occurrence of `sep` that is neither escaped nor quoted
fn split_unescaped(s: &str, sep: char, respect_quotes: bool) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut rest = s;
    while let Some((head, tail)) = split_once_unescaped(rest, sep, respect_quotes) {
        parts.push(head);
        rest = tail;
    }
    parts.push(rest);
    parts
}

/// Split at the first occurrence of `sep` that is neither escaped nor quoted
fn split_once_unescaped(s: &str, sep: char, respect_quotes: bool) -> Option<(&str, &str)> {
    let mut escaped = false;
    let mut quoted = false;
    for (i, c) in s.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '"' if respect_quotes => quoted = !quoted,
            c if c == sep && !quoted => return Some((&s[..i], &s[i + c.len_utf8()..])),
            _ => {}
        }
    }
    None
}

/// Remove the backslash in front of any of `escapable`; other backslashes are literal
fn unescape(s: &str, escapable: &[char]) -> String {
    if !s.contains('\\') {
        return s.to_string();
    }
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(&next) = chars.peek() {
                if escapable.contains(&next) {
                    out.push(next);
                    chars.next();
                    continue;
                }
            }
        }
        out.push(c);
    }
    out
}
