//! Identity resolution between configured device selectors and the
//! master's device snapshot.
//!
//! Pure: takes the snapshot's `{name, idx}` pairs and the mapping list,
//! returns the registry skeleton plus diagnostics. No I/O so the
//! conflict/drop rules are unit-testable with literal tables.

use std::collections::{BTreeMap, HashSet};

use tracing::{error, warn};

use crate::config::MappingEntry;

/// One `{name, idx}` pair from the master's device list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotDevice {
    pub name: String,
    pub idx: String,
}

/// Outcome of resolving the mapping list against a snapshot.
#[derive(Debug, Default)]
pub struct ResolvedMapping {
    /// idx -> allowSlaveUpdate, for every selector that resolved.
    pub devices: BTreeMap<String, bool>,
    /// Conflicts where the explicit idx won over the name lookup.
    pub warnings: Vec<String>,
    /// Selectors dropped entirely (unresolvable or unknown idx).
    pub dropped: Vec<String>,
}

impl ResolvedMapping {
    /// idx set used for later registry membership checks.
    pub fn idx_set(&self) -> HashSet<String> {
        self.devices.keys().cloned().collect()
    }
}

/// Resolve each mapping entry to an idx.
///
/// Rules: an explicit idx wins over a disagreeing name lookup (with a
/// warning); a name that resolves fills in a missing idx; an entry with
/// neither is dropped; a resolved idx absent from the snapshot is
/// dropped. Dropped entries reduce the synchronized set, they never
/// abort the session.
pub fn resolve_mapping(snapshot: &[SnapshotDevice], mapping: &[MappingEntry]) -> ResolvedMapping {
    let name_to_idx: BTreeMap<&str, &str> = snapshot
        .iter()
        .map(|d| (d.name.as_str(), d.idx.as_str()))
        .collect();
    let known_idx: HashSet<&str> = snapshot.iter().map(|d| d.idx.as_str()).collect();

    let mut resolved = ResolvedMapping::default();
    for entry in mapping {
        let describe = || {
            format!(
                "name={:?} idx={:?}",
                entry.name.as_deref().unwrap_or(""),
                entry.idx.as_deref().unwrap_or("")
            )
        };
        let mut idx = entry.idx.clone().filter(|i| !i.is_empty());
        if let Some(name) = entry.name.as_deref().filter(|n| !n.is_empty()) {
            match name_to_idx.get(name) {
                Some(by_name) => match idx.as_deref() {
                    Some(explicit) if explicit != *by_name => {
                        let note = format!(
                            "'{name}' is idx {by_name} but {explicit} also specified - keeping idx {explicit}"
                        );
                        warn!("{note}");
                        resolved.warnings.push(note);
                    }
                    Some(_) => {}
                    None => idx = Some(by_name.to_string()),
                },
                None => match idx.as_deref() {
                    Some(explicit) => {
                        let note =
                            format!("can't find '{name}' in snapshot - using idx {explicit}");
                        warn!("{note}");
                        resolved.warnings.push(note);
                    }
                    None => {
                        error!("can't find '{name}' for {} - entry ignored", describe());
                        resolved.dropped.push(describe());
                        continue;
                    }
                },
            }
        }
        match idx {
            Some(idx) if known_idx.contains(idx.as_str()) => {
                resolved.devices.insert(idx, entry.allow_slave_update);
            }
            Some(idx) => {
                error!("device idx {idx} is not known for {} - entry ignored", describe());
                resolved.dropped.push(describe());
            }
            None => {
                error!("no idx found for {} - entry ignored", describe());
                resolved.dropped.push(describe());
            }
        }
    }
    resolved
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> Vec<SnapshotDevice> {
        vec![
            SnapshotDevice {
                name: "Lounge Lamp".into(),
                idx: "12".into(),
            },
            SnapshotDevice {
                name: "Thermostat".into(),
                idx: "33".into(),
            },
        ]
    }

    fn entry(name: Option<&str>, idx: Option<&str>, allow: bool) -> MappingEntry {
        MappingEntry {
            name: name.map(str::to_string),
            idx: idx.map(str::to_string),
            allow_slave_update: allow,
        }
    }

    #[test]
    fn name_only_resolves_through_snapshot() {
        let resolved = resolve_mapping(&snapshot(), &[entry(Some("Lounge Lamp"), None, true)]);
        assert_eq!(resolved.devices.get("12"), Some(&true));
        assert!(resolved.warnings.is_empty());
        assert!(resolved.dropped.is_empty());
    }

    #[test]
    fn explicit_idx_wins_over_disagreeing_name() {
        let resolved = resolve_mapping(&snapshot(), &[entry(Some("Lounge Lamp"), Some("33"), false)]);
        assert_eq!(resolved.devices.get("33"), Some(&false));
        assert!(!resolved.devices.contains_key("12"));
        assert_eq!(resolved.warnings.len(), 1);
    }

    #[test]
    fn agreeing_name_and_idx_is_silent() {
        let resolved = resolve_mapping(&snapshot(), &[entry(Some("Lounge Lamp"), Some("12"), true)]);
        assert_eq!(resolved.devices.get("12"), Some(&true));
        assert!(resolved.warnings.is_empty());
    }

    #[test]
    fn unknown_name_without_idx_is_dropped() {
        let resolved = resolve_mapping(&snapshot(), &[entry(Some("Garage Door"), None, true)]);
        assert!(resolved.devices.is_empty());
        assert_eq!(resolved.dropped.len(), 1);
    }

    #[test]
    fn unknown_name_with_idx_keeps_the_idx() {
        let resolved = resolve_mapping(&snapshot(), &[entry(Some("Garage Door"), Some("33"), true)]);
        assert_eq!(resolved.devices.get("33"), Some(&true));
        assert_eq!(resolved.warnings.len(), 1);
    }

    #[test]
    fn idx_missing_from_snapshot_is_dropped() {
        let resolved = resolve_mapping(&snapshot(), &[entry(None, Some("99"), true)]);
        assert!(resolved.devices.is_empty());
        assert_eq!(resolved.dropped.len(), 1);
    }

    #[test]
    fn empty_entry_is_dropped() {
        let resolved = resolve_mapping(&snapshot(), &[entry(None, None, false)]);
        assert!(resolved.devices.is_empty());
        assert_eq!(resolved.dropped.len(), 1);
    }

    #[test]
    fn name_entry_resolves_to_idx() {
        let snapshot = vec![SnapshotDevice {
            name: "Lounge Lamp".into(),
            idx: "12".into(),
        }];
        let resolved = resolve_mapping(&snapshot, &[entry(Some("Lounge Lamp"), None, true)]);
        assert_eq!(resolved.devices.len(), 1);
        assert_eq!(resolved.devices.get("12"), Some(&true));
        assert!(resolved.idx_set().contains("12"));
    }
}
