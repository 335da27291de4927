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

//! In-process broker for tests
//!
//! `publish` invokes the installed callback synchronously on the caller's
//! thread, standing in for the transport's delivery task.

use super::{BrokerConnector, BrokerSession, ConnectOptions, MessageHandler, ServerAddress};
use crate::error::{ConsumerError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Default)]
pub(crate) struct FakeBroker {
    state: Arc<FakeBrokerState>,
}

#[derive(Default)]
struct FakeBrokerState {
    handler: RwLock<Option<MessageHandler>>,
    subscriptions: Mutex<Vec<String>>,
    rejected: Mutex<Vec<String>>,
    unreachable: AtomicBool,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    last_options: Mutex<Option<ConnectOptions>>,
}

impl FakeBroker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn connector(&self) -> Arc<dyn BrokerConnector> {
        Arc::new(FakeConnector {
            broker: self.clone(),
        })
    }

    pub(crate) fn set_unreachable(&self, unreachable: bool) {
        self.state.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub(crate) fn reject_topic(&self, topic: &str) {
        self.state.rejected.lock().push(topic.to_string());
    }

    /// Deliver a message; returns whether any subscription matched
    pub(crate) fn publish(&self, topic: &str, payload: impl Into<Bytes>) -> bool {
        let subscribed = self
            .state
            .subscriptions
            .lock()
            .iter()
            .any(|filter| topic_matches(filter, topic));
        let handler = self.state.handler.read().clone();
        match handler {
            Some(handler) if subscribed => {
                handler(topic, payload.into());
                true
            }
            _ => false,
        }
    }

    pub(crate) fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub(crate) fn disconnects(&self) -> usize {
        self.state.disconnects.load(Ordering::SeqCst)
    }

    pub(crate) fn subscriptions(&self) -> Vec<String> {
        self.state.subscriptions.lock().clone()
    }

    pub(crate) fn last_options(&self) -> Option<ConnectOptions> {
        self.state.last_options.lock().clone()
    }
}

struct FakeConnector {
    broker: FakeBroker,
}

#[async_trait]
impl BrokerConnector for FakeConnector {
    async fn connect(&self, options: &ConnectOptions) -> Result<Box<dyn BrokerSession>> {
        let state = &self.broker.state;
        *state.last_options.lock() = Some(options.clone());
        if state.unreachable.load(Ordering::SeqCst) {
            return Err(ConsumerError::Connection("connection refused".to_string()));
        }
        let server = options.servers.first().cloned().ok_or_else(|| {
            ConsumerError::Configuration("at least one server is required".to_string())
        })?;
        state.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            broker: self.broker.clone(),
            server,
            closed: AtomicBool::new(false),
        }))
    }
}

struct FakeSession {
    broker: FakeBroker,
    server: ServerAddress,
    closed: AtomicBool,
}

#[async_trait]
impl BrokerSession for FakeSession {
    async fn subscribe(&self, topics: &[String], on_message: MessageHandler) -> Result<()> {
        let state = &self.broker.state;
        let rejected = state.rejected.lock().clone();
        if let Some(topic) = topics.iter().find(|t| rejected.contains(*t)) {
            return Err(ConsumerError::Subscription(format!(
                "broker rejected topic filters: {}",
                topic
            )));
        }
        *state.handler.write() = Some(on_message);
        state.subscriptions.lock().extend(topics.iter().cloned());
        Ok(())
    }

    async fn disconnect(&self, _grace: Duration) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let state = &self.broker.state;
        *state.handler.write() = None;
        state.subscriptions.lock().clear();
        state.disconnects.fetch_add(1, Ordering::SeqCst);
    }

    fn server(&self) -> &ServerAddress {
        &self.server
    }
}

/// Whether `topic` matches the MQTT topic `filter` (`+` single level, `#` remaining levels)
fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');
    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_matches() {
        assert!(topic_matches("t/1", "t/1"));
        assert!(!topic_matches("t/1", "t/2"));
        assert!(topic_matches("sensors/+/temp", "sensors/room1/temp"));
        assert!(!topic_matches("sensors/+/temp", "sensors/room1/humidity"));
        assert!(topic_matches("devices/#", "devices/a/b/c"));
        assert!(topic_matches("#", "anything/at/all"));
        assert!(!topic_matches("t/1", "t/1/extra"));
        assert!(!topic_matches("t/1/extra", "t/1"));
    }

    #[tokio::test]
    async fn test_publish_honors_wildcard_filters() {
        let broker = FakeBroker::new();
        let session = broker
            .connector()
            .connect(&ConnectOptions::from_config(&crate::config::MqttConsumerConfig::new(
                ["broker"],
                ["sensors/+/temp"],
            ))
            .unwrap())
            .await
            .unwrap();
        session
            .subscribe(&["sensors/+/temp".to_string()], Arc::new(|_: &str, _: Bytes| {}))
            .await
            .unwrap();

        assert!(broker.publish("sensors/kitchen/temp", "t v=1"));
        assert!(!broker.publish("sensors/kitchen/humidity", "h v=1"));
    }
}
