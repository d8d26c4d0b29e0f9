//! Slave-side shadow devices.
//!
//! A shadow device mirrors a master device's identity and value on the
//! slave instance. The host's device table is a collaborator behind the
//! [`ShadowStore`] trait; [`MemoryShadowStore`] is the in-process
//! implementation. Provisioning and value application follow the retained
//! message rules: parameter messages shape identity (and never touch
//! values), value messages update values only when they actually changed,
//! and always refresh the reverse-update permission.

use std::collections::{BTreeMap, HashMap};

use tracing::{error, info, warn};

use crate::error::{SyncError, SyncResult};
use crate::payload::{decode_options, ParameterMessage, ValueMessage};

/// One shadow device in the local table.
#[derive(Debug, Clone, PartialEq)]
pub struct ShadowDevice {
    /// Local unit number, stable across recreation.
    pub unit: u32,
    /// Master idx this shadow mirrors.
    pub idx: String,
    pub name: String,
    pub device_type: u8,
    pub sub_type: u8,
    pub switch_type: u8,
    pub options: Vec<(String, String)>,
    pub n_value: i32,
    pub s_value: String,
    pub color: Option<String>,
}

/// Host device-table seam.
pub trait ShadowStore: Send {
    fn find_by_idx(&self, idx: &str) -> Option<&ShadowDevice>;
    fn find_by_unit(&self, unit: u32) -> Option<&ShadowDevice>;
    /// Lowest free unit number.
    fn next_unit(&self) -> u32;
    fn create(&mut self, device: ShadowDevice);
    fn delete(&mut self, unit: u32);
    /// Update identity fields only; current values are preserved.
    fn update_identity(
        &mut self,
        unit: u32,
        name: &str,
        switch_type: u8,
        options: &[(String, String)],
    );
    fn update_values(&mut self, unit: u32, n_value: i32, s_value: &str, color: Option<&str>);
}

/// In-memory shadow table keyed by unit.
#[derive(Debug, Default)]
pub struct MemoryShadowStore {
    devices: BTreeMap<u32, ShadowDevice>,
}

impl MemoryShadowStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

impl ShadowStore for MemoryShadowStore {
    fn find_by_idx(&self, idx: &str) -> Option<&ShadowDevice> {
        self.devices.values().find(|d| d.idx == idx)
    }

    fn find_by_unit(&self, unit: u32) -> Option<&ShadowDevice> {
        self.devices.get(&unit)
    }

    fn next_unit(&self) -> u32 {
        let mut unit = 1;
        while self.devices.contains_key(&unit) {
            unit += 1;
        }
        unit
    }

    fn create(&mut self, device: ShadowDevice) {
        self.devices.insert(device.unit, device);
    }

    fn delete(&mut self, unit: u32) {
        self.devices.remove(&unit);
    }

    fn update_identity(
        &mut self,
        unit: u32,
        name: &str,
        switch_type: u8,
        options: &[(String, String)],
    ) {
        if let Some(device) = self.devices.get_mut(&unit) {
            device.name = name.to_string();
            device.switch_type = switch_type;
            device.options = options.to_vec();
        }
    }

    fn update_values(&mut self, unit: u32, n_value: i32, s_value: &str, color: Option<&str>) {
        if let Some(device) = self.devices.get_mut(&unit) {
            device.n_value = n_value;
            device.s_value = s_value.to_string();
            if let Some(color) = color {
                device.color = Some(color.to_string());
            }
        }
    }
}

/// Per-device reverse-update permission, keyed by local unit.
///
/// Learned from inbound value messages; mutable whenever a fresh message
/// arrives, independent of value changes.
#[derive(Debug, Default)]
pub struct PermissionTable {
    allowed: HashMap<u32, bool>,
}

impl PermissionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, unit: u32, allowed: bool) {
        self.allowed.insert(unit, allowed);
    }

    pub fn is_allowed(&self, unit: u32) -> bool {
        self.allowed.get(&unit).copied().unwrap_or(false)
    }
}

/// What a parameter message did to the shadow table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionOutcome {
    Created,
    /// Type/subtype changed: deleted and recreated with the same unit.
    Recreated,
    IdentityUpdated,
}

/// Apply a retained parameter message for `idx`.
///
/// Idempotent: replaying the identical message leaves one device and only
/// refreshes identity fields. Current values are never touched here, so a
/// provisioning replay cannot clobber a live value.
pub fn apply_parameter_message(
    store: &mut dyn ShadowStore,
    idx: &str,
    message: &ParameterMessage,
    name_prefix: &str,
) -> SyncResult<ProvisionOutcome> {
    let options = decode_options(message.options.as_deref().unwrap_or(""))?;
    let name = format!("{name_prefix}{}", message.name);

    let existing = store.find_by_idx(idx).cloned();
    match existing {
        Some(device)
            if device.device_type != message.device_type
                || device.sub_type != message.sub_type =>
        {
            // Shape changed: recreate, preserving the local unit.
            info!(idx, unit = device.unit, "recreating shadow device with new type");
            store.delete(device.unit);
            store.create(ShadowDevice {
                unit: device.unit,
                idx: idx.to_string(),
                name,
                device_type: message.device_type,
                sub_type: message.sub_type,
                switch_type: message.switch_type,
                options,
                n_value: device.n_value,
                s_value: device.s_value,
                color: device.color,
            });
            Ok(ProvisionOutcome::Recreated)
        }
        Some(device) => {
            store.update_identity(device.unit, &name, message.switch_type, &options);
            Ok(ProvisionOutcome::IdentityUpdated)
        }
        None => {
            let unit = store.next_unit();
            info!(idx, unit, name = %name, "creating shadow device");
            store.create(ShadowDevice {
                unit,
                idx: idx.to_string(),
                name,
                device_type: message.device_type,
                sub_type: message.sub_type,
                switch_type: message.switch_type,
                options,
                n_value: 0,
                s_value: String::new(),
                color: None,
            });
            Ok(ProvisionOutcome::Created)
        }
    }
}

/// Apply a retained value message for `idx`.
///
/// Returns whether a device write happened: identical values are
/// suppressed so replays do not generate device-history entries. The
/// permission flag is refreshed regardless, since permission can change
/// independently of value. A value message for an unprovisioned idx is a
/// protocol error (parameter message must precede value message).
pub fn apply_value_message(
    store: &mut dyn ShadowStore,
    permissions: &mut PermissionTable,
    idx: &str,
    message: &ValueMessage,
) -> SyncResult<bool> {
    let Some(device) = store.find_by_idx(idx).cloned() else {
        return Err(SyncError::Protocol(format!(
            "value message for idx {idx} without a shadow device"
        )));
    };

    let color_changed = match &message.color {
        Some(color) => device.color.as_deref() != Some(color.as_str()),
        None => false,
    };
    let changed =
        device.n_value != message.n_value || device.s_value != message.s_value || color_changed;
    if changed {
        info!(
            idx,
            unit = device.unit,
            n_value = message.n_value,
            s_value = %message.s_value,
            "updating shadow device"
        );
        store.update_values(
            device.unit,
            message.n_value,
            &message.s_value,
            message.color.as_deref(),
        );
    }
    permissions.set(device.unit, message.allow_slave_update);
    Ok(changed)
}

/// Log helper for discarded messages; keeps the call sites uniform.
pub fn log_discarded(err: &SyncError) {
    match err {
        SyncError::Protocol(_) => error!("{err} - message discarded"),
        other => warn!("{other}"),
    }
}
