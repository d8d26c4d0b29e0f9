//! Boundary decoders for the one-shot bootstrap responses.
//!
//! Two request/response calls run at session start on the master role:
//! the device list (feeding the identity resolver) and a serialized copy
//! of the device table (feeding initial registry population). Both are
//! opaque external sources; only their decoded shape matters here.

use serde::Deserialize;

use crate::error::{SyncError, SyncResult};
use crate::resolver::SnapshotDevice;

/// One row of the serialized device table.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DeviceRow {
    pub idx: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Type")]
    pub device_type: u8,
    #[serde(rename = "SubType")]
    pub sub_type: u8,
    #[serde(rename = "SwitchType", default)]
    pub switch_type: u8,
    #[serde(rename = "nValue", default)]
    pub n_value: i32,
    #[serde(rename = "sValue", default)]
    pub s_value: String,
    #[serde(rename = "Options", default)]
    pub options: Option<String>,
    #[serde(rename = "LastUpdate", default)]
    pub last_update: Option<String>,
    #[serde(rename = "Color", default)]
    pub color: Option<String>,
}

#[derive(Deserialize)]
struct ResultEnvelope<T> {
    #[serde(default = "Vec::new")]
    result: Vec<T>,
}

#[derive(Deserialize)]
struct DeviceListItem {
    #[serde(rename = "Name")]
    name: String,
    idx: String,
}

/// Decode the device-list response into `{name, idx}` pairs.
pub fn parse_device_list(body: &[u8]) -> SyncResult<Vec<SnapshotDevice>> {
    let envelope: ResultEnvelope<DeviceListItem> = serde_json::from_slice(body)
        .map_err(|e| SyncError::Protocol(format!("undecodable device list: {e}")))?;
    Ok(envelope
        .result
        .into_iter()
        .map(|item| SnapshotDevice {
            name: item.name,
            idx: item.idx,
        })
        .collect())
}

/// Decode the device-table snapshot response into rows.
///
/// Accepts either a bare array or the usual `{"result": [...]}` envelope.
pub fn parse_device_table(body: &[u8]) -> SyncResult<Vec<DeviceRow>> {
    if let Ok(rows) = serde_json::from_slice::<Vec<DeviceRow>>(body) {
        return Ok(rows);
    }
    let envelope: ResultEnvelope<DeviceRow> = serde_json::from_slice(body)
        .map_err(|e| SyncError::Protocol(format!("undecodable device table: {e}")))?;
    Ok(envelope.result)
}

/// API path for the device-list request, which changed in backend 2023.2.
pub fn device_list_path(backend_version: &str) -> String {
    if backend_version.starts_with("20") && backend_version >= "2023.2" {
        "/json.htm?type=command&param=getdevices&used=true".to_string()
    } else {
        "/json.htm?type=devices&used=true".to_string()
    }
}

/// API path for the full device-table snapshot, hidden devices included.
pub fn device_table_path(backend_version: &str) -> String {
    format!("{}&displayhidden=1", device_list_path(backend_version))
}
