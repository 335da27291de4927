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

//! MQTT transport backed by rumqttc
//!
//! Each session owns one rumqttc event loop, polled by a dedicated delivery
//! task. That task is the only place messages are handed to the consumer's
//! callback. When the connection drops, the task keeps polling with
//! exponential backoff, which makes rumqttc reconnect, and re-subscribes the
//! session's filters once the broker accepts the new connection.

use super::{tls, BrokerConnector, BrokerSession, ConnectOptions, MessageHandler, ServerAddress};
use crate::error::{ConsumerError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS, SubAck,
    SubscribeFilter, SubscribeReasonCode,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Capacity of the request channel between the client handle and the event loop
const REQUEST_CAPACITY: usize = 10;

/// First delay before polling a dropped connection again
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Longest delay between reconnect attempts
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Connector opening rumqttc sessions
#[derive(Debug, Clone, Copy, Default)]
pub struct MqttConnector;

impl MqttConnector {
    /// Create a new connector
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl BrokerConnector for MqttConnector {
    async fn connect(&self, options: &ConnectOptions) -> Result<Box<dyn BrokerSession>> {
        let mut last_error = None;
        for server in &options.servers {
            match MqttSession::connect(server, options).await {
                Ok(session) => return Ok(Box::new(session)),
                Err(err) => {
                    warn!(server = %server, error = %err, "Could not connect to MQTT broker");
                    last_error = Some(err);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| {
            ConsumerError::Configuration("at least one server is required".to_string())
        }))
    }
}

/// A connected rumqttc session
pub struct MqttSession {
    server: ServerAddress,
    client: AsyncClient,
    shared: Arc<SessionShared>,
    subscribe_timeout: Duration,
    delivery: Mutex<Option<JoinHandle<()>>>,
}

/// State shared between the session handle and its delivery task
#[derive(Default)]
struct SessionShared {
    handler: RwLock<Option<MessageHandler>>,
    topics: Mutex<Vec<String>>,
    pending_suback: Mutex<Option<oneshot::Sender<SubAck>>>,
    closing: AtomicBool,
}

impl MqttSession {
    async fn connect(server: &ServerAddress, options: &ConnectOptions) -> Result<Self> {
        let mqtt_options = mqtt_options(server, options)?;
        let (client, mut eventloop) = AsyncClient::new(mqtt_options, REQUEST_CAPACITY);

        tokio::time::timeout(options.connect_timeout, wait_for_connack(&mut eventloop))
            .await
            .map_err(|_| {
                ConsumerError::Connection(format!("timed out connecting to {}", server))
            })??;
        info!(server = %server, "Connected to MQTT broker");

        let shared = Arc::new(SessionShared::default());
        let delivery = tokio::spawn(deliver(eventloop, client.clone(), Arc::clone(&shared)));

        Ok(Self {
            server: server.clone(),
            client,
            shared,
            subscribe_timeout: options.connect_timeout,
            delivery: Mutex::new(Some(delivery)),
        })
    }
}

#[async_trait]
impl BrokerSession for MqttSession {
    async fn subscribe(&self, topics: &[String], on_message: MessageHandler) -> Result<()> {
        *self.shared.handler.write() = Some(on_message);

        let (ack_tx, ack_rx) = oneshot::channel();
        *self.shared.pending_suback.lock() = Some(ack_tx);

        self.client
            .subscribe_many(filters(topics))
            .await
            .map_err(|e| ConsumerError::Subscription(e.to_string()))?;

        let ack = tokio::time::timeout(self.subscribe_timeout, ack_rx)
            .await
            .map_err(|_| {
                ConsumerError::Subscription(
                    "timed out waiting for subscription acknowledgement".to_string(),
                )
            })?
            .map_err(|_| {
                ConsumerError::Subscription(
                    "connection closed before subscription was acknowledged".to_string(),
                )
            })?;

        let rejected = rejected_topics(topics, &ack);
        if !rejected.is_empty() {
            return Err(ConsumerError::Subscription(format!(
                "broker rejected topic filters: {}",
                rejected.join(", ")
            )));
        }

        *self.shared.topics.lock() = topics.to_vec();
        info!(topics = ?topics, "Subscribed to MQTT topics");
        Ok(())
    }

    async fn disconnect(&self, grace: Duration) {
        if self.shared.closing.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Err(err) = self.client.try_disconnect() {
            debug!(error = %err, "Could not queue MQTT disconnect");
        }

        let delivery = self.delivery.lock().take();
        if let Some(mut delivery) = delivery {
            if tokio::time::timeout(grace, &mut delivery).await.is_err() {
                debug!(server = %self.server, "MQTT disconnect grace period elapsed, aborting");
                delivery.abort();
            }
        }
        info!(server = %self.server, "Disconnected from MQTT broker");
    }

    fn server(&self) -> &ServerAddress {
        &self.server
    }
}

impl Drop for MqttSession {
    fn drop(&mut self) {
        if let Some(delivery) = self.delivery.get_mut().take() {
            delivery.abort();
        }
    }
}

impl SessionShared {
    fn dispatch(&self, topic: &str, payload: Bytes) {
        let handler = self.handler.read().clone();
        if let Some(handler) = handler {
            handler(topic, payload);
        }
    }

    fn complete_subscription(&self, ack: SubAck) {
        let pending = self.pending_suback.lock().take();
        match pending {
            Some(pending) => {
                let _ = pending.send(ack);
            }
            None => {
                let topics = self.topics.lock().clone();
                let rejected = rejected_topics(&topics, &ack);
                if !rejected.is_empty() {
                    warn!(topics = ?rejected, "Broker rejected re-subscription");
                }
            }
        }
    }

    fn resubscribe(&self, client: &AsyncClient) {
        let topics = self.topics.lock().clone();
        if topics.is_empty() {
            return;
        }
        match client.try_subscribe_many(filters(&topics)) {
            Ok(()) => debug!(topics = ?topics, "Re-subscribing after reconnect"),
            Err(err) => warn!(error = %err, "Could not re-subscribe after reconnect"),
        }
    }
}

/// Poll the event loop until the session is closed
async fn deliver(mut eventloop: EventLoop, client: AsyncClient, shared: Arc<SessionShared>) {
    let mut backoff = INITIAL_BACKOFF;
    loop {
        match eventloop.poll().await {
            Ok(event) => {
                backoff = INITIAL_BACKOFF;
                match event {
                    Event::Incoming(Packet::Publish(publish)) => {
                        shared.dispatch(&publish.topic, publish.payload);
                    }
                    Event::Incoming(Packet::SubAck(ack)) => shared.complete_subscription(ack),
                    Event::Incoming(Packet::ConnAck(ack)) => {
                        info!("Reconnected to MQTT broker");
                        if !ack.session_present {
                            shared.resubscribe(&client);
                        }
                    }
                    Event::Outgoing(Outgoing::Disconnect) => {
                        debug!("MQTT disconnect sent");
                        break;
                    }
                    _ => {}
                }
            }
            Err(err) => {
                if shared.closing.load(Ordering::Acquire) {
                    break;
                }
                warn!(error = %err, retry_in = ?backoff, "MQTT connection lost, reconnecting");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        }
    }
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<()> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                return if ack.code == ConnectReturnCode::Success {
                    Ok(())
                } else {
                    Err(ConsumerError::Connection(format!(
                        "broker refused connection: {:?}",
                        ack.code
                    )))
                };
            }
            Ok(_) => continue,
            Err(err) => return Err(ConsumerError::Connection(err.to_string())),
        }
    }
}

fn mqtt_options(server: &ServerAddress, options: &ConnectOptions) -> Result<MqttOptions> {
    let mut mqtt_options = MqttOptions::new(&options.client_id, server.host(), server.port());

    // rumqttc only accepts whole-second keep-alives, zero disables it
    let keep_alive = if options.keep_alive.is_zero() {
        Duration::ZERO
    } else {
        Duration::from_secs(options.keep_alive.as_secs().max(1))
    };
    mqtt_options.set_keep_alive(keep_alive);
    mqtt_options.set_clean_session(true);

    if let Some(credentials) = &options.credentials {
        mqtt_options.set_credentials(
            credentials.username.clone(),
            credentials.password.clone().unwrap_or_default(),
        );
    }

    if server.is_tls() {
        mqtt_options.set_transport(tls::transport(&options.tls)?);
    }

    Ok(mqtt_options)
}

fn filters(topics: &[String]) -> Vec<SubscribeFilter> {
    topics
        .iter()
        .map(|topic| SubscribeFilter::new(topic.clone(), QoS::AtMostOnce))
        .collect()
}

fn rejected_topics<'a>(topics: &'a [String], ack: &SubAck) -> Vec<&'a str> {
    topics
        .iter()
        .zip(ack.return_codes.iter())
        .filter(|(_, code)| matches!(code, SubscribeReasonCode::Failure))
        .map(|(topic, _)| topic.as_str())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::Credentials;
    use crate::config::MqttConsumerConfig;
    use std::net::TcpListener;

    fn options(servers: &[&str]) -> ConnectOptions {
        let mut config = MqttConsumerConfig::new(servers.iter().copied(), ["t/1"]);
        config.connect_timeout = Duration::from_secs(2);
        ConnectOptions::from_config(&config).unwrap()
    }

    #[test]
    fn test_rejected_topics() {
        let topics = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let ack = SubAck::new(
            1,
            vec![
                SubscribeReasonCode::Success(QoS::AtMostOnce),
                SubscribeReasonCode::Failure,
                SubscribeReasonCode::Success(QoS::AtMostOnce),
            ],
        );
        assert_eq!(rejected_topics(&topics, &ack), vec!["b"]);
    }

    #[test]
    fn test_filters_use_at_most_once() {
        let filters = filters(&["t/1".to_string(), "t/#".to_string()]);
        assert_eq!(filters.len(), 2);
        assert!(filters.iter().all(|f| f.qos == QoS::AtMostOnce));
        assert_eq!(filters[1].path, "t/#");
    }

    #[test]
    fn test_mqtt_options() {
        let mut options = options(&["broker:1884"]);
        options.keep_alive = Duration::from_millis(1500);
        options.credentials = Some(Credentials {
            username: "user".to_string(),
            password: None,
        });

        let mqtt_options = mqtt_options(&options.servers[0], &options).unwrap();
        assert_eq!(mqtt_options.broker_address(), ("broker".to_string(), 1884));
        assert_eq!(mqtt_options.keep_alive(), Duration::from_secs(1));
        assert_eq!(
            mqtt_options.credentials(),
            Some(("user".to_string(), String::new()))
        );
        assert!(mqtt_options.clean_session());
    }

    #[tokio::test]
    async fn test_unreachable_servers_fail_connect() {
        // Bind then drop to find ports nothing listens on
        let ports: Vec<u16> = (0..2)
            .map(|_| {
                let listener = TcpListener::bind("127.0.0.1:0").unwrap();
                listener.local_addr().unwrap().port()
            })
            .collect();
        let servers: Vec<String> = ports.iter().map(|p| format!("127.0.0.1:{}", p)).collect();
        let servers: Vec<&str> = servers.iter().map(String::as_str).collect();

        let result = MqttConnector::new().connect(&options(&servers)).await;
        assert!(matches!(result, Err(ConsumerError::Connection(_))));
    }
}
