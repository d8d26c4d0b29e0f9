//! Per-link connection supervisor.
//!
//! Drives one pub/sub link through
//! `Idle -> Connecting -> Connected -> Authenticated -> Disconnected -> ...`.
//! The handshake registers a retained `down` last will and, once
//! acknowledged, replaces it with a retained `up` announcement carrying
//! the session sequence. Keepalive and reconnection both run off the
//! fixed heartbeat period: ping when live, reconnect when down, nothing
//! while a connect attempt is in flight.

use tracing::{debug, info, warn};

use crate::error::TransportError;
use crate::payload::LwtPayload;
use crate::transport::{LastWill, PubSubLink};

/// Fixed prefix of every per-session client identifier.
pub const CLIENT_ID_PREFIX: &str = "mqttSync";

/// Link state as seen by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    Connecting,
    /// Transport is up, CONNECT sent, ack pending.
    Connected,
    /// Handshake acknowledged; the link is usable.
    Authenticated,
    Disconnected,
}

/// Naming inputs for the per-session client identifier.
#[derive(Debug, Clone)]
pub struct LinkIdentity {
    /// Bridge key (instance pair).
    pub key: String,
    /// Host hardware identifier.
    pub hardware_id: String,
    /// Link role, also the LWT topic leaf (`masterOnMaster`, ...).
    pub link_role: String,
    /// Session sequence stamp.
    pub sequence: String,
}

/// Supervisor owning one pub/sub link.
pub struct LinkSupervisor {
    identity: LinkIdentity,
    lwt_topic: Option<String>,
    version: String,
    state: LinkState,
    link: Box<dyn PubSubLink>,
}

impl LinkSupervisor {
    pub fn new(
        link: Box<dyn PubSubLink>,
        identity: LinkIdentity,
        lwt_topic: Option<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            identity,
            lwt_topic,
            version: version.into(),
            state: LinkState::Idle,
            link,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Whether dependent pipelines may publish through this link.
    pub fn is_authenticated(&self) -> bool {
        self.state == LinkState::Authenticated
    }

    /// `<prefix>_<key>_<hardwareId>_<linkRole>_<sequence>`.
    pub fn client_id(&self) -> String {
        format!(
            "{CLIENT_ID_PREFIX}_{}_{}_{}_{}",
            self.identity.key,
            self.identity.hardware_id,
            self.identity.link_role,
            self.identity.sequence
        )
    }

    /// Begin (re)connecting the link.
    pub async fn start(&mut self) -> Result<(), TransportError> {
        info!(role = %self.identity.link_role, "connecting link");
        self.state = LinkState::Connecting;
        self.link.open().await
    }

    /// Transport-level connection established: send the handshake with
    /// the per-session client id and the retained `down` last will.
    pub async fn handle_connected(&mut self) -> Result<(), TransportError> {
        let last_will = self.lwt_topic.as_ref().map(|topic| LastWill {
            topic: topic.clone(),
            payload: serde_json::to_vec(&LwtPayload::down(&self.version)).unwrap_or_default(),
        });
        self.state = LinkState::Connected;
        self.link.connect(&self.client_id(), last_will).await
    }

    /// Handshake acknowledged: announce `up` (retained, replacing the
    /// will payload) and open the link for traffic.
    pub async fn handle_handshake_ack(&mut self) -> Result<(), TransportError> {
        self.state = LinkState::Authenticated;
        info!(role = %self.identity.link_role, "link authenticated");
        if let Some(topic) = self.lwt_topic.clone() {
            let payload = LwtPayload::up(&self.version, &self.identity.sequence);
            let body = serde_json::to_vec(&payload)
                .map_err(|e| TransportError::Send(e.to_string()))?;
            self.link.publish(&topic, body, true).await?;
        }
        Ok(())
    }

    /// Connection lost: dependent pipelines treat the link as
    /// unavailable until the next handshake completes.
    pub fn handle_disconnected(&mut self) {
        warn!(role = %self.identity.link_role, "link disconnected");
        self.state = LinkState::Disconnected;
    }

    /// Periodic tick: ping when live, reconnect when down, and stay
    /// quiet while a connection attempt is already in flight.
    pub async fn heartbeat(&mut self) -> Result<(), TransportError> {
        match self.state {
            LinkState::Connected | LinkState::Authenticated => {
                if let Err(e) = self.link.ping().await {
                    warn!(role = %self.identity.link_role, "keepalive failed: {e}");
                    self.start().await?;
                }
                Ok(())
            }
            LinkState::Connecting => {
                debug!(role = %self.identity.link_role, "still connecting");
                Ok(())
            }
            LinkState::Idle | LinkState::Disconnected => self.start().await,
        }
    }

    /// Publish through the link; refused while not authenticated.
    pub async fn publish(
        &mut self,
        topic: &str,
        payload: Vec<u8>,
        retain: bool,
    ) -> Result<(), TransportError> {
        if !self.is_authenticated() {
            return Err(TransportError::NotConnected);
        }
        self.link.publish(topic, payload, retain).await
    }

    /// Subscribe through the link; refused while not authenticated.
    pub async fn subscribe(&mut self, topics: &[String]) -> Result<(), TransportError> {
        if !self.is_authenticated() {
            return Err(TransportError::NotConnected);
        }
        self.link.subscribe(topics).await
    }

    pub async fn shutdown(&mut self) {
        let _ = self.link.disconnect().await;
        self.state = LinkState::Idle;
    }
}
