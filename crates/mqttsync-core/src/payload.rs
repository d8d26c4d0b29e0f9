//! Wire records exchanged over the bridge topics.
//!
//! Each message class is a tagged record with explicit optional fields,
//! decoded at the boundary where payloads arrive. Field names follow the
//! instance API conventions (`nValue`, `sValue`, `allowSlaveUpdate`, ...)
//! so retained messages stay readable with standard broker tooling.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};

/// Retained device-identity message on `masterParameters/<idx>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterMessage {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Type")]
    pub device_type: u8,
    #[serde(rename = "SubType")]
    pub sub_type: u8,
    #[serde(rename = "SwitchType")]
    pub switch_type: u8,
    /// Encoded options string (`key:base64;key:base64`).
    #[serde(rename = "Options", default, skip_serializing_if = "Option::is_none")]
    pub options: Option<String>,
    /// Session stamp of the publishing master.
    #[serde(rename = "Sequence", default)]
    pub sequence: String,
}

/// Retained value message on `masterValues/<idx>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueMessage {
    #[serde(rename = "nValue")]
    pub n_value: i32,
    #[serde(rename = "sValue")]
    pub s_value: String,
    #[serde(rename = "LastUpdate", default, skip_serializing_if = "Option::is_none")]
    pub last_update: Option<String>,
    #[serde(rename = "Color", default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    /// Whether the slave may forward user actions for this device.
    #[serde(rename = "allowSlaveUpdate", default)]
    pub allow_slave_update: bool,
    #[serde(rename = "Sequence", default)]
    pub sequence: String,
}

/// Non-retained reverse command record on `slaveValues/<idx>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandMessage {
    #[serde(rename = "Command")]
    pub command: String,
    #[serde(rename = "Level", default)]
    pub level: i32,
    #[serde(rename = "Color", default)]
    pub color: String,
    #[serde(rename = "LastUpdate", default)]
    pub last_update: String,
}

/// Link announcement on `lwt/<linkRole>`.
///
/// The `down` variant is registered as the link's last will; `up` replaces
/// it as a retained publish right after a successful handshake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LwtPayload {
    pub state: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<String>,
}

impl LwtPayload {
    pub fn down(version: &str) -> Self {
        Self {
            state: "down".to_string(),
            version: version.to_string(),
            since: None,
        }
    }

    pub fn up(version: &str, since: &str) -> Self {
        Self {
            state: "up".to_string(),
            version: version.to_string(),
            since: Some(since.to_string()),
        }
    }
}

/// Decode an options string (`key:base64;key:base64`) into pairs.
///
/// Values are base64 because the instance stores arbitrary text there.
pub fn decode_options(options: &str) -> SyncResult<Vec<(String, String)>> {
    let mut decoded = Vec::new();
    if options.is_empty() {
        return Ok(decoded);
    }
    for element in options.split(';') {
        let (key, value) = element.split_once(':').ok_or_else(|| {
            SyncError::Protocol(format!("malformed options element '{element}'"))
        })?;
        let raw = BASE64
            .decode(value)
            .map_err(|e| SyncError::Protocol(format!("options value for '{key}': {e}")))?;
        let text = String::from_utf8(raw)
            .map_err(|e| SyncError::Protocol(format!("options value for '{key}': {e}")))?;
        decoded.push((key.to_string(), text));
    }
    Ok(decoded)
}

/// Encode option pairs back into the `key:base64;key:base64` form.
pub fn encode_options(pairs: &[(String, String)]) -> String {
    pairs
        .iter()
        .map(|(k, v)| format!("{k}:{}", BASE64.encode(v.as_bytes())))
        .collect::<Vec<_>>()
        .join(";")
}

/// Decode a JSON payload into one of the typed records, mapping failures
/// to a protocol error naming the topic.
pub fn decode<T: for<'de> Deserialize<'de>>(topic: &str, payload: &[u8]) -> SyncResult<T> {
    serde_json::from_slice(payload)
        .map_err(|e| SyncError::Protocol(format!("undecodable payload on {topic}: {e}")))
}
