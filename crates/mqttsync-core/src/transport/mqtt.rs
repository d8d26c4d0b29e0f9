//! rumqttc-backed pub/sub link.
//!
//! One spawned task polls the client event loop and translates rumqttc
//! packets into `LinkEvent`s on the session mailbox. When the event loop
//! errors the task emits `Disconnected` and stops: reconnection is the
//! supervisor's job, at the fixed heartbeat period, not the library's.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{LastWill, PubSubLink};
use crate::error::TransportError;
use crate::event::{LinkEvent, LinkId, Mailbox, SyncEvent};

/// Broker endpoint parameters for one link.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub keep_alive: Duration,
}

impl BrokerConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            username: String::new(),
            password: String::new(),
            keep_alive: Duration::from_secs(60),
        }
    }

    pub fn with_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }
}

/// A pub/sub link over rumqttc.
pub struct MqttLink {
    link_id: LinkId,
    config: BrokerConfig,
    mailbox: Mailbox,
    client: Option<AsyncClient>,
    event_task: Option<JoinHandle<()>>,
    /// Topics of the most recent subscribe call; rumqttc's SUBACK only
    /// carries a packet id, so the ack is matched to these.
    last_subscribed: Arc<Mutex<Vec<String>>>,
}

impl MqttLink {
    pub fn new(link_id: LinkId, config: BrokerConfig, mailbox: Mailbox) -> Self {
        Self {
            link_id,
            config,
            mailbox,
            client: None,
            event_task: None,
            last_subscribed: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn emit(&self, event: LinkEvent) {
        let tx = self.mailbox.clone();
        let link_id = self.link_id;
        // Delivered from a task so a full mailbox cannot deadlock the
        // dispatch loop that triggered this call.
        tokio::spawn(async move {
            let _ = tx.send(SyncEvent::Link(link_id, event)).await;
        });
    }

    fn drop_client(&mut self) {
        if let Some(task) = self.event_task.take() {
            task.abort();
        }
        self.client = None;
    }
}

#[async_trait]
impl PubSubLink for MqttLink {
    async fn open(&mut self) -> Result<(), TransportError> {
        // rumqttc performs TCP connect and CONNECT as one step inside the
        // event loop, so opening only clears stale state and reports the
        // transport as ready for the handshake.
        self.drop_client();
        self.emit(LinkEvent::Connected);
        Ok(())
    }

    async fn connect(
        &mut self,
        client_id: &str,
        last_will: Option<LastWill>,
    ) -> Result<(), TransportError> {
        let mut options = MqttOptions::new(client_id, &self.config.host, self.config.port);
        options.set_keep_alive(self.config.keep_alive);
        if !self.config.username.is_empty() {
            options.set_credentials(&self.config.username, &self.config.password);
        }
        if let Some(will) = last_will {
            options.set_last_will(rumqttc::LastWill::new(
                will.topic,
                will.payload,
                QoS::AtMostOnce,
                true,
            ));
        }

        let (client, mut event_loop) = AsyncClient::new(options, 10);
        self.client = Some(client);

        let tx = self.mailbox.clone();
        let link_id = self.link_id;
        let last_subscribed = self.last_subscribed.clone();
        self.event_task = Some(tokio::spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        let _ = tx.send(SyncEvent::Link(link_id, LinkEvent::HandshakeAck)).await;
                    }
                    Ok(Event::Incoming(Packet::SubAck(_))) => {
                        let topics = last_subscribed.lock().map(|t| t.clone()).unwrap_or_default();
                        let _ = tx
                            .send(SyncEvent::Link(link_id, LinkEvent::SubscribeAck(topics)))
                            .await;
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let _ = tx
                            .send(SyncEvent::Link(
                                link_id,
                                LinkEvent::Message {
                                    topic: publish.topic,
                                    payload: publish.payload.to_vec(),
                                },
                            ))
                            .await;
                    }
                    Ok(Event::Incoming(Packet::PingResp)) => {
                        let _ = tx.send(SyncEvent::Link(link_id, LinkEvent::PingResponse)).await;
                    }
                    Ok(other) => {
                        debug!(?link_id, ?other, "mqtt event");
                    }
                    Err(e) => {
                        warn!(?link_id, "mqtt event loop error: {e}");
                        let _ = tx.send(SyncEvent::Link(link_id, LinkEvent::Disconnected)).await;
                        break;
                    }
                }
            }
        }));
        Ok(())
    }

    async fn publish(
        &mut self,
        topic: &str,
        payload: Vec<u8>,
        retain: bool,
    ) -> Result<(), TransportError> {
        let client = self.client.as_ref().ok_or(TransportError::NotConnected)?;
        client
            .publish(topic, QoS::AtMostOnce, retain, payload)
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn subscribe(&mut self, topics: &[String]) -> Result<(), TransportError> {
        let client = self.client.as_ref().ok_or(TransportError::NotConnected)?;
        if let Ok(mut last) = self.last_subscribed.lock() {
            *last = topics.to_vec();
        }
        for topic in topics {
            client
                .subscribe(topic, QoS::AtMostOnce)
                .await
                .map_err(|e| TransportError::Send(e.to_string()))?;
        }
        Ok(())
    }

    async fn ping(&mut self) -> Result<(), TransportError> {
        // The rumqttc event loop issues PINGREQ on its own keepalive
        // schedule; PingResponse events still reach the supervisor. This
        // only checks that a live client exists.
        if self.client.is_some() {
            Ok(())
        } else {
            Err(TransportError::NotConnected)
        }
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        if let Some(client) = self.client.as_ref() {
            let _ = client.disconnect().await;
        }
        self.drop_client();
        Ok(())
    }
}
