//! In-memory transport fakes shared by the session tests.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use mqttsync_core::event::RequestKind;
use mqttsync_core::transport::{LastWill, PubSubLink, RequestClient};
use mqttsync_core::{SyncConfig, TransportError};

/// One recorded call against a fake pub/sub link.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkAction {
    Open,
    Connect {
        client_id: String,
        will_topic: Option<String>,
    },
    Publish {
        topic: String,
        payload: Vec<u8>,
        retain: bool,
    },
    Subscribe(Vec<String>),
    Ping,
    Disconnect,
}

/// Pub/sub link that records every call and always succeeds.
#[derive(Default)]
pub struct FakeLink {
    actions: Arc<Mutex<Vec<LinkAction>>>,
}

impl FakeLink {
    pub fn new() -> (Self, Arc<Mutex<Vec<LinkAction>>>) {
        let link = Self::default();
        let actions = link.actions.clone();
        (link, actions)
    }
}

#[async_trait]
impl PubSubLink for FakeLink {
    async fn open(&mut self) -> Result<(), TransportError> {
        self.actions.lock().unwrap().push(LinkAction::Open);
        Ok(())
    }

    async fn connect(
        &mut self,
        client_id: &str,
        last_will: Option<LastWill>,
    ) -> Result<(), TransportError> {
        self.actions.lock().unwrap().push(LinkAction::Connect {
            client_id: client_id.to_string(),
            will_topic: last_will.map(|w| w.topic),
        });
        Ok(())
    }

    async fn publish(
        &mut self,
        topic: &str,
        payload: Vec<u8>,
        retain: bool,
    ) -> Result<(), TransportError> {
        self.actions.lock().unwrap().push(LinkAction::Publish {
            topic: topic.to_string(),
            payload,
            retain,
        });
        Ok(())
    }

    async fn subscribe(&mut self, topics: &[String]) -> Result<(), TransportError> {
        self.actions
            .lock()
            .unwrap()
            .push(LinkAction::Subscribe(topics.to_vec()));
        Ok(())
    }

    async fn ping(&mut self) -> Result<(), TransportError> {
        self.actions.lock().unwrap().push(LinkAction::Ping);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.actions.lock().unwrap().push(LinkAction::Disconnect);
        Ok(())
    }
}

/// Request client that records paths and counts releases. `fail_next`
/// holds the number of upcoming sends to reject with a transport error.
#[derive(Default)]
pub struct FakeRequester {
    requests: Arc<Mutex<Vec<(RequestKind, String)>>>,
    disconnects: Arc<Mutex<u32>>,
    fail_next: Arc<Mutex<u32>>,
}

pub struct FakeRequesterHandles {
    pub requests: Arc<Mutex<Vec<(RequestKind, String)>>>,
    pub disconnects: Arc<Mutex<u32>>,
    pub fail_next: Arc<Mutex<u32>>,
}

impl FakeRequester {
    pub fn new() -> (Self, FakeRequesterHandles) {
        let client = Self::default();
        let handles = FakeRequesterHandles {
            requests: client.requests.clone(),
            disconnects: client.disconnects.clone(),
            fail_next: client.fail_next.clone(),
        };
        (client, handles)
    }
}

#[async_trait]
impl RequestClient for FakeRequester {
    async fn send(&mut self, kind: RequestKind, path: &str) -> Result<(), TransportError> {
        self.requests
            .lock()
            .unwrap()
            .push((kind, path.to_string()));
        let mut failures = self.fail_next.lock().unwrap();
        if *failures > 0 {
            *failures -= 1;
            return Err(TransportError::Send("request rejected".to_string()));
        }
        Ok(())
    }

    async fn disconnect(&mut self) {
        *self.disconnects.lock().unwrap() += 1;
    }
}

/// Bridge configuration used across the session tests: two mapped
/// devices, reverse updates allowed on idx 12 only.
pub fn bridge_config() -> SyncConfig {
    SyncConfig::from_json(
        r#"{
            "settings": {
                "masterName": "home",
                "slaveName": "remote",
                "masterMqttHost": "10.0.0.1",
                "masterMqttPort": 1883,
                "slaveMqttHost": "10.0.0.2",
                "slaveMqttPort": 1883,
                "slaveDevicePrefix": "home: "
            },
            "mapping": [
                { "name": "Lounge Lamp", "allowSlaveUpdate": true },
                { "idx": "21" }
            ]
        }"#,
    )
    .unwrap()
}
