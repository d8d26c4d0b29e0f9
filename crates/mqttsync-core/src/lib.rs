//! Core types and pipelines for the MQTT instance-sync bridge.
//!
//! This crate implements everything except transport endpoints' actual
//! I/O policy wiring: configuration, topic layout, payload codecs, the
//! master-side sync registry, the slave-side shadow store, connection
//! supervision and both session state machines.

pub mod config;
pub mod error;
pub mod event;
pub mod payload;
pub mod queue;
pub mod registry;
pub mod resolver;
pub mod session;
pub mod shadow;
pub mod snapshot;
pub mod supervisor;
pub mod topics;
pub mod translator;
pub mod transport;

pub use config::{MappingEntry, Role, Settings, SyncConfig};
pub use error::{SyncError, SyncResult, TransportError};
pub use event::{
    mailbox, spawn_heartbeat, HttpEvent, LinkEvent, LinkId, LocalAction, Mailbox, RequestKind,
    SyncEvent, HEARTBEAT_PERIOD,
};
pub use session::{MasterSession, SessionParams, SlaveSession, VERSION};
pub use transport::http::HttpRequester;
pub use transport::mqtt::{BrokerConfig, MqttLink};
pub use transport::{LastWill, PubSubLink, RequestClient};
