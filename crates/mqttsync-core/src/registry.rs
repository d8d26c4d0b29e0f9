//! Synchronized-device registry: the single source of truth for what the
//! master republishes.
//!
//! The registry is built once per session from the resolved mapping and
//! the bootstrap device-table snapshot, then updated in place for the
//! session's lifetime. Change notifications merge field by field: a
//! notification that only carries `svalue` never touches `nValue`,
//! `Color` or identity data.

use std::collections::BTreeMap;

use crate::payload::{ParameterMessage, ValueMessage};
use crate::resolver::ResolvedMapping;
use crate::snapshot::DeviceRow;

/// Identity half of a registry entry, mirrored to `masterParameters/<idx>`.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceIdentity {
    pub name: String,
    pub device_type: u8,
    pub sub_type: u8,
    pub switch_type: u8,
    pub options: Option<String>,
}

/// One synchronized device.
///
/// `allow_slave_update` is fixed at load time and never mutated by
/// traffic. `sequence` is the session stamp of the last merge, used by
/// consumers to distinguish stale retained messages from current ones.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncEntry {
    pub allow_slave_update: bool,
    pub identity: Option<DeviceIdentity>,
    pub n_value: Option<i32>,
    pub s_value: Option<String>,
    pub last_update: Option<String>,
    pub color: Option<String>,
    pub sequence: String,
}

/// Parsed change notification from the master's event feed.
///
/// All fields but `idx` are optional; absent fields leave the registry
/// untouched on merge.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeNotification {
    pub idx: String,
    pub n_value: Option<i32>,
    pub s_value: Option<String>,
    pub last_update: Option<String>,
    pub color: Option<String>,
}

impl ChangeNotification {
    /// Decode an event-feed payload.
    ///
    /// `idx` may arrive as a number or a string. When `svalue` is absent
    /// the `svalue1..svalue9` parts, if any, are joined with `;` in part
    /// order (multi-part sensors report that way).
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        let idx = match value.get("idx")? {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Number(n) => n.to_string(),
            _ => return None,
        };
        let n_value = value.get("nvalue").and_then(|v| {
            v.as_i64()
                .map(|n| n as i32)
                .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
        });
        let mut s_value = value
            .get("svalue")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        if s_value.is_none() {
            let mut parts = Vec::new();
            for i in 0..10 {
                if let Some(part) = value.get(format!("svalue{i}")).and_then(|v| v.as_str()) {
                    parts.push(part.to_string());
                }
            }
            if !parts.is_empty() {
                s_value = Some(parts.join(";"));
            }
        }
        let text_field = |key: &str| {
            value
                .get(key)
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        Some(Self {
            idx,
            n_value,
            s_value,
            last_update: text_field("LastUpdate"),
            color: text_field("Color"),
        })
    }
}

/// idx -> SyncEntry map built once per session.
#[derive(Debug, Default)]
pub struct SyncRegistry {
    entries: BTreeMap<String, SyncEntry>,
}

impl SyncRegistry {
    /// Build the skeleton from a resolved mapping: one entry per idx,
    /// carrying only the permission flag.
    pub fn from_resolved(resolved: &ResolvedMapping) -> Self {
        let entries = resolved
            .devices
            .iter()
            .map(|(idx, allow)| {
                (
                    idx.clone(),
                    SyncEntry {
                        allow_slave_update: *allow,
                        ..Default::default()
                    },
                )
            })
            .collect();
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, idx: &str) -> bool {
        self.entries.contains_key(idx)
    }

    pub fn get(&self, idx: &str) -> Option<&SyncEntry> {
        self.entries.get(idx)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &SyncEntry)> {
        self.entries.iter()
    }

    /// Fill identity and initial values from the bootstrap snapshot.
    ///
    /// Rows for devices outside the mapped set are skipped. Identity is
    /// always taken from the snapshot; value fields are only filled where
    /// still unset, so a change notification processed before the
    /// snapshot response lands is not overwritten by older data.
    pub fn populate_from_snapshot(&mut self, rows: &[DeviceRow], sequence: &str) {
        for row in rows {
            let Some(entry) = self.entries.get_mut(&row.idx) else {
                continue;
            };
            entry.identity = Some(DeviceIdentity {
                name: row.name.clone(),
                device_type: row.device_type,
                sub_type: row.sub_type,
                switch_type: row.switch_type,
                options: row.options.clone(),
            });
            if entry.n_value.is_none() {
                entry.n_value = Some(row.n_value);
            }
            if entry.s_value.is_none() {
                entry.s_value = Some(row.s_value.clone());
            }
            if entry.last_update.is_none() {
                entry.last_update = row.last_update.clone();
            }
            if entry.color.is_none() {
                entry.color = row.color.clone().filter(|c| !c.is_empty());
            }
            entry.sequence = sequence.to_string();
        }
    }

    /// Merge a change notification into its entry, restamping `sequence`.
    ///
    /// Returns the updated entry, or `None` when the idx is not a
    /// registry member (most feed traffic is irrelevant, not an error).
    pub fn merge_notification(
        &mut self,
        note: &ChangeNotification,
        sequence: &str,
    ) -> Option<&SyncEntry> {
        let entry = self.entries.get_mut(&note.idx)?;
        if let Some(n) = note.n_value {
            entry.n_value = Some(n);
        }
        if let Some(s) = &note.s_value {
            entry.s_value = Some(s.clone());
        }
        if let Some(lu) = &note.last_update {
            entry.last_update = Some(lu.clone());
        }
        if let Some(c) = &note.color {
            entry.color = Some(c.clone());
        }
        entry.sequence = sequence.to_string();
        Some(&self.entries[&note.idx])
    }

    /// Retained parameter message for an entry, once identity is known.
    pub fn parameter_message(&self, idx: &str) -> Option<ParameterMessage> {
        let entry = self.entries.get(idx)?;
        let identity = entry.identity.as_ref()?;
        Some(ParameterMessage {
            name: identity.name.clone(),
            device_type: identity.device_type,
            sub_type: identity.sub_type,
            switch_type: identity.switch_type,
            options: identity.options.clone(),
            sequence: entry.sequence.clone(),
        })
    }

    /// Retained value message for an entry, once any value is known.
    pub fn value_message(&self, idx: &str) -> Option<ValueMessage> {
        let entry = self.entries.get(idx)?;
        if entry.n_value.is_none() && entry.s_value.is_none() {
            return None;
        }
        Some(ValueMessage {
            n_value: entry.n_value.unwrap_or(0),
            s_value: entry.s_value.clone().unwrap_or_default(),
            last_update: entry.last_update.clone(),
            color: entry.color.clone(),
            allow_slave_update: entry.allow_slave_update,
            sequence: entry.sequence.clone(),
        })
    }
}
