//! Slave-role session tests against in-memory transports.

use std::sync::{Arc, Mutex};

use mqttsync_core::event::LocalAction;
use mqttsync_core::shadow::MemoryShadowStore;
use mqttsync_core::{LinkEvent, LinkId, SessionParams, SlaveSession, SyncEvent};

mod common;
use common::{bridge_config, FakeLink, LinkAction};

type Actions = Arc<Mutex<Vec<LinkAction>>>;

fn harness() -> (SlaveSession, Actions) {
    let (link, actions) = FakeLink::new();
    let params = SessionParams {
        hardware_id: "1".to_string(),
        backend_version: "2024.1".to_string(),
        sequence: "s1".to_string(),
    };
    let session = SlaveSession::new(
        bridge_config(),
        params,
        Box::new(link),
        Box::new(MemoryShadowStore::new()),
    )
    .unwrap();
    (session, actions)
}

fn message(topic: &str, body: &str) -> SyncEvent {
    SyncEvent::Link(
        LinkId::SlaveBridge,
        LinkEvent::Message {
            topic: topic.to_string(),
            payload: body.as_bytes().to_vec(),
        },
    )
}

const PARAMETERS_12: &str =
    r#"{"Name":"Lounge Lamp","Type":244,"SubType":73,"SwitchType":7,"Sequence":"s1"}"#;
const VALUES_12: &str =
    r#"{"nValue":1,"sValue":"40","allowSlaveUpdate":true,"Sequence":"s1"}"#;

async fn bootstrap(session: &mut SlaveSession) {
    session.start().await.unwrap();
    for event in [
        SyncEvent::Link(LinkId::SlaveBridge, LinkEvent::Connected),
        SyncEvent::Link(LinkId::SlaveBridge, LinkEvent::HandshakeAck),
    ] {
        session.handle_event(event).await.unwrap();
    }
}

#[tokio::test]
async fn handshake_subscribes_to_parameters() {
    let (mut session, actions) = harness();
    bootstrap(&mut session).await;

    let actions = actions.lock().unwrap();
    assert_eq!(actions[0], LinkAction::Open);
    assert!(matches!(
        &actions[1],
        LinkAction::Connect { client_id, will_topic: Some(t) }
            if client_id == "mqttSync_home2remote_1_slaveOnSlave_s1"
                && t == "mqttSync/home2remote/lwt/slaveOnSlave"
    ));
    // up announcement, then the parameters wildcard.
    assert!(matches!(
        &actions[2],
        LinkAction::Publish { topic, retain: true, .. }
            if topic == "mqttSync/home2remote/lwt/slaveOnSlave"
    ));
    assert_eq!(
        actions[3],
        LinkAction::Subscribe(vec!["mqttSync/home2remote/masterParameters/#".to_string()])
    );
}

#[tokio::test]
async fn parameter_message_provisions_and_subscribes_values() {
    let (mut session, actions) = harness();
    bootstrap(&mut session).await;

    session
        .handle_event(message(
            "mqttSync/home2remote/masterParameters/12",
            PARAMETERS_12,
        ))
        .await
        .unwrap();

    let device = session.store().find_by_idx("12").unwrap().clone();
    assert_eq!(device.unit, 1);
    assert_eq!(device.name, "home: Lounge Lamp");
    assert_eq!(device.device_type, 244);
    assert_eq!(device.switch_type, 7);

    assert_eq!(
        actions.lock().unwrap().last().unwrap(),
        &LinkAction::Subscribe(vec!["mqttSync/home2remote/masterValues/12".to_string()])
    );
}

#[tokio::test]
async fn value_message_updates_shadow_and_permission() {
    let (mut session, _actions) = harness();
    bootstrap(&mut session).await;
    session
        .handle_event(message(
            "mqttSync/home2remote/masterParameters/12",
            PARAMETERS_12,
        ))
        .await
        .unwrap();

    session
        .handle_event(message("mqttSync/home2remote/masterValues/12", VALUES_12))
        .await
        .unwrap();

    let device = session.store().find_by_idx("12").unwrap().clone();
    assert_eq!(device.n_value, 1);
    assert_eq!(device.s_value, "40");
    assert!(session.permissions().is_allowed(1));
}

#[tokio::test]
async fn value_message_without_parameters_is_rejected() {
    let (mut session, _actions) = harness();
    bootstrap(&mut session).await;

    let err = session
        .handle_event(message("mqttSync/home2remote/masterValues/12", VALUES_12))
        .await
        .unwrap_err();
    assert!(!err.is_fatal());
}

#[tokio::test]
async fn permitted_action_is_forwarded_upstream() {
    let (mut session, actions) = harness();
    bootstrap(&mut session).await;
    session
        .handle_event(message(
            "mqttSync/home2remote/masterParameters/12",
            PARAMETERS_12,
        ))
        .await
        .unwrap();
    session
        .handle_event(message("mqttSync/home2remote/masterValues/12", VALUES_12))
        .await
        .unwrap();

    session
        .handle_event(SyncEvent::Local(LocalAction {
            unit: 1,
            command: "Set Level".to_string(),
            level: 7,
            color: String::new(),
        }))
        .await
        .unwrap();

    let actions = actions.lock().unwrap();
    let Some(LinkAction::Publish {
        topic,
        payload,
        retain,
    }) = actions.last()
    else {
        panic!("expected a publish, got {:?}", actions.last());
    };
    assert_eq!(topic, "mqttSync/home2remote/slaveValues/12");
    assert!(!retain, "commands are one-shot, not retained");
    let body: serde_json::Value = serde_json::from_slice(payload).unwrap();
    assert_eq!(body["Command"], "Set Level");
    assert_eq!(body["Level"], 7);
}

#[tokio::test]
async fn forbidden_action_stays_local() {
    let (mut session, actions) = harness();
    bootstrap(&mut session).await;
    session
        .handle_event(message(
            "mqttSync/home2remote/masterParameters/12",
            PARAMETERS_12,
        ))
        .await
        .unwrap();
    // Value message withholding the permission flag.
    session
        .handle_event(message(
            "mqttSync/home2remote/masterValues/12",
            r#"{"nValue":1,"sValue":"40","allowSlaveUpdate":false,"Sequence":"s1"}"#,
        ))
        .await
        .unwrap();
    let before = actions.lock().unwrap().len();

    session
        .handle_event(SyncEvent::Local(LocalAction {
            unit: 1,
            command: "On".to_string(),
            level: 0,
            color: String::new(),
        }))
        .await
        .unwrap();

    assert_eq!(actions.lock().unwrap().len(), before);
}

#[tokio::test]
async fn parameter_replay_is_idempotent() {
    let (mut session, _actions) = harness();
    bootstrap(&mut session).await;
    for _ in 0..2 {
        session
            .handle_event(message(
                "mqttSync/home2remote/masterParameters/12",
                PARAMETERS_12,
            ))
            .await
            .unwrap();
    }
    let device = session.store().find_by_idx("12").unwrap();
    assert_eq!(device.unit, 1);
    assert!(session.store().find_by_unit(2).is_none());
}
