//! Collaborator seams for the two transports.
//!
//! The core never talks to a broker or an HTTP endpoint directly: it
//! calls these traits and receives completions back through the event
//! mailbox. Production adapters live in [`mqtt`] and [`http`]; tests
//! drive the core with in-memory fakes.

pub mod http;
pub mod mqtt;

use async_trait::async_trait;

use crate::error::TransportError;
use crate::event::RequestKind;

/// Last-will registration passed with the pub/sub handshake.
///
/// The broker publishes it (retained) on the link's behalf if the
/// connection drops uncleanly.
#[derive(Debug, Clone)]
pub struct LastWill {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// One pub/sub link.
///
/// Operations are fire-and-forget: they enqueue work and return; the
/// matching acknowledgement arrives later as a [`crate::event::LinkEvent`]
/// in the mailbox.
#[async_trait]
pub trait PubSubLink: Send {
    /// Open the connection at transport level. Completion surfaces as
    /// `LinkEvent::Connected`.
    async fn open(&mut self) -> Result<(), TransportError>;

    /// Perform the CONNECT handshake with a per-session client id and an
    /// optional last will. Completion surfaces as `LinkEvent::HandshakeAck`.
    async fn connect(
        &mut self,
        client_id: &str,
        last_will: Option<LastWill>,
    ) -> Result<(), TransportError>;

    async fn publish(
        &mut self,
        topic: &str,
        payload: Vec<u8>,
        retain: bool,
    ) -> Result<(), TransportError>;

    /// Subscribe to topics. Completion surfaces as `LinkEvent::SubscribeAck`.
    async fn subscribe(&mut self, topics: &[String]) -> Result<(), TransportError>;

    /// Keepalive ping. Answer surfaces as `LinkEvent::PingResponse`.
    async fn ping(&mut self) -> Result<(), TransportError>;

    async fn disconnect(&mut self) -> Result<(), TransportError>;
}

/// Request/response client for one-shot bootstrap calls and reverse
/// update dispatch.
///
/// Each exchange is short-lived; the response (or failure) surfaces as a
/// [`crate::event::HttpEvent`] tagged with the request kind. There is
/// never more than one outstanding exchange per kind.
#[async_trait]
pub trait RequestClient: Send {
    /// Issue a GET against the instance API.
    async fn send(&mut self, kind: RequestKind, path: &str) -> Result<(), TransportError>;

    /// Release the underlying connection.
    async fn disconnect(&mut self);
}
