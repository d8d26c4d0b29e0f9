//! Session-scoped synchronization state machines.
//!
//! One session object per run owns every piece of mutable sync state
//! (registry, permission table, supervisors, update queue) and consumes
//! the typed event mailbox on a single dispatch loop. Collaborators are
//! injected as trait objects so the whole flow runs against in-memory
//! fakes in tests.
//!
//! Master bootstrap: device list -> resolve mapping -> master link
//! handshake -> event-feed subscription -> device-table snapshot ->
//! registry population -> slave link handshake -> full resync.
//! Slave bootstrap: slave link handshake -> parameter subscription;
//! value subscriptions are issued per idx as parameter messages arrive.

use chrono::Local;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::{Role, SyncConfig};
use crate::error::{SyncError, SyncResult};
use crate::event::{HttpEvent, LinkEvent, LinkId, LocalAction, RequestKind, SyncEvent};
use crate::payload::{self, CommandMessage, ParameterMessage, ValueMessage};
use crate::queue::UpdateQueue;
use crate::registry::{ChangeNotification, SyncRegistry};
use crate::resolver::resolve_mapping;
use crate::shadow::{
    apply_parameter_message, apply_value_message, log_discarded, PermissionTable, ShadowStore,
};
use crate::snapshot::{
    device_list_path, device_table_path, parse_device_list, parse_device_table,
};
use crate::supervisor::{LinkIdentity, LinkSupervisor};
use crate::topics::{BridgeTopic, TopicLayout};
use crate::translator::{translate, DeviceKind};
use crate::transport::{PubSubLink, RequestClient};

/// Crate version, announced in LWT payloads.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Session stamp format shared by sequence fields and command timestamps.
pub fn session_stamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Link roles as announced on the LWT topics.
const MASTER_ON_MASTER: &str = "masterOnMaster";
const SLAVE_ON_MASTER: &str = "slaveOnMaster";
const SLAVE_ON_SLAVE: &str = "slaveOnSlave";

/// Identifying inputs shared by both roles.
#[derive(Debug, Clone)]
pub struct SessionParams {
    /// Host hardware identifier, part of the client id.
    pub hardware_id: String,
    /// Backend version of the local instance; selects the device-list API.
    pub backend_version: String,
    /// Session sequence stamp; defaults to the wall clock at build time.
    pub sequence: String,
}

impl Default for SessionParams {
    fn default() -> Self {
        Self {
            hardware_id: "1".to_string(),
            backend_version: "2024.1".to_string(),
            sequence: session_stamp(),
        }
    }
}

fn identity(config: &SyncConfig, params: &SessionParams, link_role: &str) -> LinkIdentity {
    LinkIdentity {
        key: format!(
            "{}2{}",
            config.settings.master_name, config.settings.slave_name
        ),
        hardware_id: params.hardware_id.clone(),
        link_role: link_role.to_string(),
        sequence: params.sequence.clone(),
    }
}

/// Master-role session.
pub struct MasterSession {
    config: SyncConfig,
    params: SessionParams,
    layout: TopicLayout,
    master_link: LinkSupervisor,
    slave_link: LinkSupervisor,
    http: Box<dyn RequestClient>,
    registry: SyncRegistry,
    queue: UpdateQueue,
    /// Set once the device-table snapshot populated the registry.
    table_loaded: bool,
}

impl MasterSession {
    pub fn new(
        config: SyncConfig,
        params: SessionParams,
        master_link: Box<dyn PubSubLink>,
        slave_link: Box<dyn PubSubLink>,
        http: Box<dyn RequestClient>,
    ) -> SyncResult<Self> {
        config.validate(Role::Master)?;
        let layout = TopicLayout::new(&config.settings.master_name, &config.settings.slave_name);
        let master_link = LinkSupervisor::new(
            master_link,
            identity(&config, &params, MASTER_ON_MASTER),
            Some(layout.lwt(MASTER_ON_MASTER)),
            VERSION,
        );
        let slave_link = LinkSupervisor::new(
            slave_link,
            identity(&config, &params, SLAVE_ON_MASTER),
            Some(layout.lwt(SLAVE_ON_MASTER)),
            VERSION,
        );
        Ok(Self {
            config,
            params,
            layout,
            master_link,
            slave_link,
            http,
            registry: SyncRegistry::default(),
            queue: UpdateQueue::new(),
            table_loaded: false,
        })
    }

    pub fn registry(&self) -> &SyncRegistry {
        &self.registry
    }

    pub fn queue(&self) -> &UpdateQueue {
        &self.queue
    }

    /// Kick off bootstrap: the device-list request comes first, the rest
    /// of the sequence is event-driven.
    pub async fn start(&mut self) -> SyncResult<()> {
        let path = device_list_path(&self.params.backend_version);
        self.http.send(RequestKind::DeviceList, &path).await?;
        Ok(())
    }

    /// Consume mailbox events until shutdown.
    pub async fn run(&mut self, mut rx: mpsc::Receiver<SyncEvent>) {
        while let Some(event) = rx.recv().await {
            if matches!(event, SyncEvent::Shutdown) {
                break;
            }
            if let Err(e) = self.handle_event(event).await {
                if e.is_fatal() {
                    error!("fatal: {e}");
                    break;
                }
                log_discarded(&e);
            }
        }
        self.master_link.shutdown().await;
        self.slave_link.shutdown().await;
    }

    pub async fn handle_event(&mut self, event: SyncEvent) -> SyncResult<()> {
        match event {
            SyncEvent::Link(LinkId::MasterFeed, event) => self.handle_master_link(event).await,
            SyncEvent::Link(LinkId::SlaveBridge, event) => self.handle_slave_link(event).await,
            SyncEvent::Http(kind, event) => self.handle_http(kind, event).await,
            SyncEvent::Heartbeat => {
                // Each link joins the keepalive cycle once its bootstrap
                // prerequisite (mapping, then snapshot) is in place.
                if !self.registry.is_empty() {
                    self.master_link.heartbeat().await?;
                }
                if self.table_loaded {
                    self.slave_link.heartbeat().await?;
                }
                Ok(())
            }
            SyncEvent::Local(_) => {
                debug!("local actions are a slave-role event, ignoring");
                Ok(())
            }
            SyncEvent::Shutdown => Ok(()),
        }
    }

    async fn handle_master_link(&mut self, event: LinkEvent) -> SyncResult<()> {
        match event {
            LinkEvent::Connected => Ok(self.master_link.handle_connected().await?),
            LinkEvent::HandshakeAck => {
                self.master_link.handle_handshake_ack().await?;
                let feed = self.config.settings.master_event_topic.clone();
                self.master_link.subscribe(&[feed]).await?;
                Ok(())
            }
            LinkEvent::SubscribeAck(topics) => {
                if topics
                    .iter()
                    .any(|t| t == &self.config.settings.master_event_topic)
                {
                    // Feed subscription is live: fetch the device table.
                    let path = device_table_path(&self.params.backend_version);
                    self.http.send(RequestKind::DeviceTable, &path).await?;
                    Ok(())
                } else {
                    Err(SyncError::Protocol(format!(
                        "unexpected subscription ack for {topics:?}"
                    )))
                }
            }
            LinkEvent::Message { topic, payload } => self.handle_feed_message(&topic, &payload).await,
            LinkEvent::PingResponse => Ok(()),
            LinkEvent::Disconnected => {
                self.master_link.handle_disconnected();
                Ok(())
            }
        }
    }

    async fn handle_feed_message(&mut self, topic: &str, body: &[u8]) -> SyncResult<()> {
        if topic != self.config.settings.master_event_topic {
            return Err(SyncError::Protocol(format!(
                "unexpected topic {topic} on the master link"
            )));
        }
        let value: serde_json::Value = serde_json::from_slice(body)
            .map_err(|e| SyncError::Protocol(format!("undecodable feed payload: {e}")))?;
        let Some(note) = ChangeNotification::from_json(&value) else {
            return Err(SyncError::Protocol("feed payload without idx".to_string()));
        };
        // Most instance traffic concerns devices outside the mapped set.
        if self
            .registry
            .merge_notification(&note, &self.params.sequence)
            .is_none()
        {
            return Ok(());
        }
        debug!(idx = %note.idx, "registry updated from feed");
        if self.slave_link.is_authenticated() {
            if let Some(message) = self.registry.value_message(&note.idx) {
                let body = serde_json::to_vec(&message)
                    .map_err(|e| SyncError::Protocol(e.to_string()))?;
                self.slave_link
                    .publish(&self.layout.values(&note.idx), body, true)
                    .await?;
            }
        }
        Ok(())
    }

    async fn handle_slave_link(&mut self, event: LinkEvent) -> SyncResult<()> {
        match event {
            LinkEvent::Connected => Ok(self.slave_link.handle_connected().await?),
            LinkEvent::HandshakeAck => {
                self.slave_link.handle_handshake_ack().await?;
                self.resync().await?;
                let wildcard = self.layout.slave_values_wildcard();
                self.slave_link.subscribe(&[wildcard]).await?;
                Ok(())
            }
            // Bridge-side subscription acks carry no follow-up work.
            LinkEvent::SubscribeAck(_) | LinkEvent::PingResponse => Ok(()),
            LinkEvent::Message { topic, payload } => {
                self.handle_reverse_message(&topic, &payload).await
            }
            LinkEvent::Disconnected => {
                self.slave_link.handle_disconnected();
                Ok(())
            }
        }
    }

    /// Republish every registry entry, parameters then values, after a
    /// slave-link handshake. Retained delivery makes this idempotent for
    /// the consumer.
    async fn resync(&mut self) -> SyncResult<()> {
        info!(devices = self.registry.len(), "resynchronizing slave");
        let idx_list: Vec<String> = self.registry.iter().map(|(idx, _)| idx.clone()).collect();
        for idx in &idx_list {
            if let Some(message) = self.registry.parameter_message(idx) {
                let body = serde_json::to_vec(&message)
                    .map_err(|e| SyncError::Protocol(e.to_string()))?;
                self.slave_link
                    .publish(&self.layout.parameters(idx), body, true)
                    .await?;
            }
        }
        for idx in &idx_list {
            if let Some(message) = self.registry.value_message(idx) {
                let body = serde_json::to_vec(&message)
                    .map_err(|e| SyncError::Protocol(e.to_string()))?;
                self.slave_link
                    .publish(&self.layout.values(idx), body, true)
                    .await?;
            }
        }
        Ok(())
    }

    async fn handle_reverse_message(&mut self, topic: &str, body: &[u8]) -> SyncResult<()> {
        let Some(BridgeTopic::Command(idx)) = self.layout.parse(topic) else {
            return Err(SyncError::Protocol(format!(
                "unexpected topic {topic} on the slave link"
            )));
        };
        let Some(entry) = self.registry.get(&idx) else {
            return Err(SyncError::Protocol(format!(
                "reverse command for unknown idx {idx}"
            )));
        };
        if !entry.allow_slave_update {
            // Loop-prevention boundary: nothing is dispatched.
            warn!(idx = %idx, "remote changes not allowed");
            return Ok(());
        }
        let Some(identity) = entry.identity.clone() else {
            return Err(SyncError::Protocol(format!(
                "reverse command for idx {idx} before identity is known"
            )));
        };
        let message: CommandMessage = payload::decode(topic, body)?;
        let kind = DeviceKind::classify(
            identity.device_type,
            identity.sub_type,
            identity.switch_type,
        );
        let Some(params) = translate(
            &message.command,
            message.level,
            &message.color,
            &idx,
            kind,
        ) else {
            return Err(SyncError::Protocol(format!(
                "command '{}' not recognized",
                message.command
            )));
        };
        self.queue.push(params.query());
        self.dispatch_next().await
    }

    /// Issue the next queued update unless one is already outstanding.
    /// A rejected send does not stall the queue; the next entry is
    /// attempted until one is accepted or the queue drains.
    async fn dispatch_next(&mut self) -> SyncResult<()> {
        while let Some(query) = self.queue.take_next() {
            let path = format!("/json.htm{query}");
            match self.http.send(RequestKind::ReverseUpdate, &path).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    error!("reverse update dispatch failed: {e}");
                    self.queue.complete();
                }
            }
        }
        if self.queue.is_idle() {
            self.http.disconnect().await;
        }
        Ok(())
    }

    async fn handle_http(&mut self, kind: RequestKind, event: HttpEvent) -> SyncResult<()> {
        let body = match event {
            HttpEvent::Response { status: 200, body } => Some(body),
            HttpEvent::Response { status, .. } => {
                error!(?kind, status, "http request failed");
                None
            }
            HttpEvent::Failed(reason) => {
                error!(?kind, "http request failed: {reason}");
                None
            }
        };
        match kind {
            RequestKind::DeviceList => {
                let Some(body) = body else {
                    // Bootstrap calls are not retried; links keep their
                    // own reconnect cycle.
                    error!("device list request abandoned");
                    return Ok(());
                };
                let snapshot = parse_device_list(&body)?;
                let resolved = resolve_mapping(&snapshot, &self.config.mapping);
                if resolved.devices.is_empty() {
                    return Err(SyncError::Configuration(
                        "no mapping entry resolved against the device list".to_string(),
                    ));
                }
                info!(
                    devices = resolved.devices.len(),
                    dropped = resolved.dropped.len(),
                    "mapping resolved"
                );
                self.registry = SyncRegistry::from_resolved(&resolved);
                self.master_link.start().await?;
                Ok(())
            }
            RequestKind::DeviceTable => {
                let Some(body) = body else {
                    // Bootstrap calls are not retried; links keep their
                    // own reconnect cycle.
                    return Ok(());
                };
                let rows = parse_device_table(&body)?;
                self.registry
                    .populate_from_snapshot(&rows, &self.params.sequence);
                info!(devices = self.registry.len(), "registry populated");
                if !self.table_loaded {
                    self.table_loaded = true;
                    self.slave_link.start().await?;
                } else if self.slave_link.is_authenticated() {
                    self.resync().await?;
                }
                Ok(())
            }
            RequestKind::ReverseUpdate => {
                self.queue.complete();
                self.dispatch_next().await
            }
        }
    }
}

/// Slave-role session.
pub struct SlaveSession {
    config: SyncConfig,
    layout: TopicLayout,
    slave_link: LinkSupervisor,
    store: Box<dyn ShadowStore>,
    permissions: PermissionTable,
}

impl SlaveSession {
    pub fn new(
        config: SyncConfig,
        params: SessionParams,
        slave_link: Box<dyn PubSubLink>,
        store: Box<dyn ShadowStore>,
    ) -> SyncResult<Self> {
        config.validate(Role::Slave)?;
        let layout = TopicLayout::new(&config.settings.master_name, &config.settings.slave_name);
        let slave_link = LinkSupervisor::new(
            slave_link,
            identity(&config, &params, SLAVE_ON_SLAVE),
            Some(layout.lwt(SLAVE_ON_SLAVE)),
            VERSION,
        );
        Ok(Self {
            config,
            layout,
            slave_link,
            store,
            permissions: PermissionTable::new(),
        })
    }

    pub fn permissions(&self) -> &PermissionTable {
        &self.permissions
    }

    pub fn store(&self) -> &dyn ShadowStore {
        self.store.as_ref()
    }

    pub async fn start(&mut self) -> SyncResult<()> {
        self.slave_link.start().await?;
        Ok(())
    }

    pub async fn run(&mut self, mut rx: mpsc::Receiver<SyncEvent>) {
        while let Some(event) = rx.recv().await {
            if matches!(event, SyncEvent::Shutdown) {
                break;
            }
            if let Err(e) = self.handle_event(event).await {
                log_discarded(&e);
            }
        }
        self.slave_link.shutdown().await;
    }

    pub async fn handle_event(&mut self, event: SyncEvent) -> SyncResult<()> {
        match event {
            SyncEvent::Link(LinkId::SlaveBridge, event) => self.handle_link(event).await,
            SyncEvent::Link(LinkId::MasterFeed, _) => Err(SyncError::Protocol(
                "master-feed event on a slave session".to_string(),
            )),
            SyncEvent::Local(action) => self.handle_local_action(action).await,
            SyncEvent::Heartbeat => Ok(self.slave_link.heartbeat().await?),
            SyncEvent::Http(kind, _) => Err(SyncError::Protocol(format!(
                "unexpected http completion {kind:?} on a slave session"
            ))),
            SyncEvent::Shutdown => Ok(()),
        }
    }

    async fn handle_link(&mut self, event: LinkEvent) -> SyncResult<()> {
        match event {
            LinkEvent::Connected => Ok(self.slave_link.handle_connected().await?),
            LinkEvent::HandshakeAck => {
                self.slave_link.handle_handshake_ack().await?;
                let wildcard = self.layout.parameters_wildcard();
                self.slave_link.subscribe(&[wildcard]).await?;
                Ok(())
            }
            LinkEvent::SubscribeAck(_) | LinkEvent::PingResponse => Ok(()),
            LinkEvent::Message { topic, payload } => self.handle_message(&topic, &payload).await,
            LinkEvent::Disconnected => {
                self.slave_link.handle_disconnected();
                Ok(())
            }
        }
    }

    async fn handle_message(&mut self, topic: &str, body: &[u8]) -> SyncResult<()> {
        match self.layout.parse(topic) {
            Some(BridgeTopic::Parameters(idx)) => {
                let message: ParameterMessage = payload::decode(topic, body)?;
                apply_parameter_message(
                    self.store.as_mut(),
                    &idx,
                    &message,
                    &self.config.settings.slave_device_prefix,
                )?;
                // The per-idx subscription is how the slave learns which
                // value topics matter to it; no value wildcard is used.
                let value_topic = self.layout.values(&idx);
                self.slave_link.subscribe(&[value_topic]).await?;
                Ok(())
            }
            Some(BridgeTopic::Values(idx)) => {
                let message: ValueMessage = payload::decode(topic, body)?;
                apply_value_message(self.store.as_mut(), &mut self.permissions, &idx, &message)?;
                Ok(())
            }
            _ => Err(SyncError::Protocol(format!(
                "unexpected topic {topic} on the slave link"
            ))),
        }
    }

    /// Forward a local user action upstream, if this device permits it.
    async fn handle_local_action(&mut self, action: LocalAction) -> SyncResult<()> {
        let Some(device) = self.store.find_by_unit(action.unit) else {
            return Err(SyncError::Protocol(format!(
                "action on unknown unit {}",
                action.unit
            )));
        };
        let idx = device.idx.clone();
        if !self.permissions.is_allowed(action.unit) {
            // No network traffic for disallowed actions.
            info!(unit = action.unit, idx = %idx, "update forbidden for this device");
            return Ok(());
        }
        let message = CommandMessage {
            command: action.command,
            level: action.level,
            color: action.color,
            last_update: session_stamp(),
        };
        let body =
            serde_json::to_vec(&message).map_err(|e| SyncError::Protocol(e.to_string()))?;
        info!(idx = %idx, command = %message.command, "forwarding action to master");
        // Commands are one-shot, never retained.
        self.slave_link
            .publish(&self.layout.slave_values(&idx), body, false)
            .await?;
        Ok(())
    }
}
