//! Local device working set.

use std::collections::BTreeMap;

use tracing::debug;

use crate::models::{Coordinate, Device, DeviceSummary, Membership, Position};

/// Result of applying one position sample to a device.
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    /// `last_position` was replaced.
    Applied { previous: Option<Position> },
    /// Identical to the current `last_position`; nothing changed.
    Duplicate,
    /// Older than the current `last_position`; ignored.
    Stale,
    /// No device with this id has been seen in a roster.
    UnknownDevice,
}

impl ApplyOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, ApplyOutcome::Applied { .. })
    }
}

/// Changes in roster membership produced by [`DeviceRegistry::sync_roster`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RosterChange {
    pub added: Vec<String>,
    pub relisted: Vec<String>,
    pub unlisted: Vec<String>,
}

/// Devices known to this session, keyed by device id.
///
/// Devices are never removed: a device missing from a roster fetch is
/// marked unlisted, which is how upstream deletion shows up locally.
#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry {
    devices: BTreeMap<String, Device>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, device_id: &str) -> Option<&Device> {
        self.devices.get(device_id)
    }

    /// Whether the device is in the current known set (listed in the latest roster).
    pub fn is_known(&self, device_id: &str) -> bool {
        self.devices.get(device_id).is_some_and(|d| d.listed)
    }

    /// All devices, including unlisted ones.
    pub fn iter(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }

    /// Devices listed in the latest roster.
    pub fn known(&self) -> impl Iterator<Item = &Device> {
        self.devices.values().filter(|d| d.listed)
    }

    pub fn known_ids(&self) -> Vec<String> {
        self.known().map(|d| d.device_id.clone()).collect()
    }

    /// Last positions of all listed devices that have one.
    pub fn known_coordinates(&self) -> Vec<Coordinate> {
        self.known()
            .filter_map(|d| d.last_position.as_ref().map(Position::coordinate))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Reconciles the listed flags against a complete roster.
    ///
    /// New ids create devices; known ids refresh kind and name; devices not
    /// in the roster become unlisted.
    pub fn sync_roster(&mut self, roster: &[DeviceSummary]) -> RosterChange {
        let mut change = RosterChange::default();

        for summary in roster {
            match self.devices.get_mut(&summary.device_id) {
                Some(device) => {
                    device.kind = summary.kind;
                    device.name = summary.name.clone();
                    if !device.listed {
                        device.listed = true;
                        change.relisted.push(summary.device_id.clone());
                    }
                }
                None => {
                    self.devices.insert(
                        summary.device_id.clone(),
                        Device::new(summary.device_id.clone(), summary.kind, summary.name.clone()),
                    );
                    change.added.push(summary.device_id.clone());
                }
            }
        }

        for device in self.devices.values_mut() {
            if device.listed && !roster.iter().any(|s| s.device_id == device.device_id) {
                device.listed = false;
                change.unlisted.push(device.device_id.clone());
            }
        }

        if !change.added.is_empty() || !change.unlisted.is_empty() {
            debug!(
                added = change.added.len(),
                relisted = change.relisted.len(),
                unlisted = change.unlisted.len(),
                "Roster synchronized"
            );
        }

        change
    }

    /// Replaces the device's last position with `position`.
    ///
    /// Re-applying the current position is a no-op, as is a sample older
    /// than the current one. Samples sharing the current timestamp but with
    /// different coordinates are applied in arrival order.
    pub fn apply_position(&mut self, device_id: &str, position: Position) -> ApplyOutcome {
        let Some(device) = self.devices.get_mut(device_id) else {
            return ApplyOutcome::UnknownDevice;
        };

        match device.last_position {
            Some(current) if current == position => ApplyOutcome::Duplicate,
            Some(current) if position.timestamp() < current.timestamp() => ApplyOutcome::Stale,
            previous => {
                device.last_position = Some(position);
                ApplyOutcome::Applied { previous }
            }
        }
    }

    /// Stores a recomputed membership; returns the previous value.
    pub fn set_membership(&mut self, device_id: &str, membership: Membership) -> Option<Membership> {
        let device = self.devices.get_mut(device_id)?;
        Some(std::mem::replace(&mut device.membership, membership))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DeviceKind;
    use chrono::{DateTime, Utc};

    fn summary(id: &str) -> DeviceSummary {
        DeviceSummary {
            device_id: id.to_string(),
            kind: DeviceKind::Equipment,
            name: format!("Asset {}", id),
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_740_000_000 + secs, 0).unwrap()
    }

    fn pos(lat: f64, secs: i64) -> Position {
        Position::new(lat, 28.0, 3.0, at(secs)).unwrap()
    }

    #[test]
    fn test_sync_roster_adds_and_unlists() {
        let mut registry = DeviceRegistry::new();
        let change = registry.sync_roster(&[summary("D1"), summary("D2")]);
        assert_eq!(change.added, vec!["D1".to_string(), "D2".to_string()]);
        assert!(registry.is_known("D1"));

        let change = registry.sync_roster(&[summary("D2")]);
        assert_eq!(change.unlisted, vec!["D1".to_string()]);
        assert!(!registry.is_known("D1"));
        // Never deleted locally.
        assert!(registry.get("D1").is_some());
        assert_eq!(registry.known_ids(), vec!["D2".to_string()]);

        let change = registry.sync_roster(&[summary("D1"), summary("D2")]);
        assert_eq!(change.relisted, vec!["D1".to_string()]);
    }

    #[test]
    fn test_apply_position_unknown_device() {
        let mut registry = DeviceRegistry::new();
        assert_eq!(
            registry.apply_position("ghost", pos(1.0, 0)),
            ApplyOutcome::UnknownDevice
        );
    }

    #[test]
    fn test_apply_position_is_idempotent() {
        let mut registry = DeviceRegistry::new();
        registry.sync_roster(&[summary("D1")]);

        let p = pos(-15.39, 0);
        assert!(registry.apply_position("D1", p).is_applied());
        let after_first = registry.get("D1").cloned();

        assert_eq!(registry.apply_position("D1", p), ApplyOutcome::Duplicate);
        assert_eq!(registry.get("D1").cloned(), after_first);
    }

    #[test]
    fn test_apply_position_ignores_stale() {
        let mut registry = DeviceRegistry::new();
        registry.sync_roster(&[summary("D1")]);
        registry.apply_position("D1", pos(1.0, 10));

        assert_eq!(registry.apply_position("D1", pos(2.0, 5)), ApplyOutcome::Stale);
        assert_eq!(
            registry.get("D1").unwrap().last_position.unwrap().latitude(),
            1.0
        );
    }

    #[test]
    fn test_apply_position_same_timestamp_new_coordinates() {
        let mut registry = DeviceRegistry::new();
        registry.sync_roster(&[summary("D1")]);
        let first = pos(1.0, 10);
        registry.apply_position("D1", first);

        let outcome = registry.apply_position("D1", pos(1.5, 10));
        assert_eq!(outcome, ApplyOutcome::Applied { previous: Some(first) });
    }

    #[test]
    fn test_known_coordinates_skip_unlisted_and_unpositioned() {
        let mut registry = DeviceRegistry::new();
        registry.sync_roster(&[summary("D1"), summary("D2"), summary("D3")]);
        registry.apply_position("D1", pos(1.0, 0));
        registry.apply_position("D3", pos(3.0, 0));
        registry.sync_roster(&[summary("D1"), summary("D2")]);

        assert_eq!(registry.known_coordinates(), vec![(1.0, 28.0)]);
    }

    #[test]
    fn test_set_membership_returns_previous() {
        let mut registry = DeviceRegistry::new();
        registry.sync_roster(&[summary("D1")]);
        assert_eq!(
            registry.set_membership("D1", Membership::Inside),
            Some(Membership::Unknown)
        );
        assert_eq!(registry.set_membership("nope", Membership::Inside), None);
    }
}
