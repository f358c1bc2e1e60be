//! Alert reconciliation.
//!
//! Turns membership transitions and device inactivity into alerts and
//! keeps the unresolved working set deduplicated: at most one unresolved
//! alert per `(device_id, alert_type)`.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use crate::models::{Alert, AlertId, AlertType, Device, Membership};

/// Outcome of merging a server alert listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeSummary {
    /// Unresolved alerts held after the merge.
    pub retained: usize,
    /// Local placeholders replaced by the server's copy.
    pub superseded_pending: usize,
    /// Older unresolved server alerts shadowed by a newer one for the same pair.
    pub shadowed: usize,
}

/// Unresolved alert working set.
#[derive(Debug, Clone, Default)]
pub struct AlertReconciler {
    alerts: Vec<Alert>,
    last_applied_seq: u64,
}

impl AlertReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> &[Alert] {
        &self.alerts
    }

    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }

    pub fn get(&self, id: &AlertId) -> Option<&Alert> {
        self.alerts.iter().find(|a| &a.id == id)
    }

    pub fn ids(&self) -> Vec<AlertId> {
        self.alerts.iter().map(|a| a.id).collect()
    }

    pub fn find_unresolved(&self, device_id: &str, alert_type: AlertType) -> Option<&Alert> {
        self.alerts
            .iter()
            .find(|a| !a.resolved && a.key() == (device_id, alert_type))
    }

    /// Raises a geofence-exit alert on `inside|unknown -> outside`.
    ///
    /// `outside -> inside` raises nothing and leaves an existing exit alert
    /// in place; resolving it is always an explicit user action.
    pub fn on_membership_transition(
        &mut self,
        device: &Device,
        old: Membership,
        new: Membership,
    ) -> Option<Alert> {
        if new != Membership::Outside || old == Membership::Outside {
            return None;
        }
        self.raise(
            &device.device_id,
            AlertType::GeofenceExit,
            format!("{} has left the geofence!", device.label()),
            Utc::now(),
        )
    }

    /// Raises device-inactive alerts for listed devices whose last position
    /// is older than `threshold` at `now`.
    pub fn check_inactivity<'a>(
        &mut self,
        devices: impl IntoIterator<Item = &'a Device>,
        now: DateTime<Utc>,
        threshold: Duration,
    ) -> Vec<Alert> {
        let mut raised = Vec::new();
        for device in devices {
            if !device.listed {
                continue;
            }
            let Some(last) = device.last_position else {
                continue;
            };
            if now - last.timestamp() < threshold {
                continue;
            }
            let message = format!(
                "{} has not reported since {}",
                device.label(),
                last.timestamp().format("%Y-%m-%d %H:%M:%S UTC")
            );
            if let Some(alert) = self.raise(&device.device_id, AlertType::DeviceInactive, message, now) {
                raised.push(alert);
            }
        }
        raised
    }

    /// Adds a new pending alert unless an unresolved one already exists for
    /// the same device and type.
    pub fn raise(
        &mut self,
        device_id: &str,
        alert_type: AlertType,
        message: String,
        at: DateTime<Utc>,
    ) -> Option<Alert> {
        if let Some(existing) = self.find_unresolved(device_id, alert_type) {
            debug!(
                device_id = %device_id,
                alert_type = %alert_type,
                existing = %existing.id,
                "Alert suppressed, unresolved alert already held"
            );
            return None;
        }

        let alert = Alert::raised(device_id, alert_type, message, at);
        info!(
            device_id = %device_id,
            alert_type = %alert_type,
            alert_id = %alert.id,
            "Alert raised"
        );
        self.alerts.push(alert.clone());
        Some(alert)
    }

    /// Marks an alert seen. Returns false if it is not held.
    pub fn mark_acknowledged(&mut self, id: &AlertId) -> bool {
        match self.alerts.iter_mut().find(|a| &a.id == id) {
            Some(alert) => {
                alert.acknowledged = true;
                true
            }
            None => false,
        }
    }

    /// Drops an alert whose resolution the backend confirmed.
    pub fn mark_resolved(&mut self, id: &AlertId) -> Option<Alert> {
        self.remove(id).map(|mut alert| {
            alert.resolved = true;
            alert
        })
    }

    /// Drops an alert from the working set.
    pub fn remove(&mut self, id: &AlertId) -> Option<Alert> {
        let index = self.alerts.iter().position(|a| &a.id == id)?;
        Some(self.alerts.remove(index))
    }

    pub fn last_applied_seq(&self) -> u64 {
        self.last_applied_seq
    }

    /// Records that state as of `seq` has been applied; fetches issued
    /// earlier are discarded afterwards.
    pub fn advance_seq(&mut self, seq: u64) {
        self.last_applied_seq = self.last_applied_seq.max(seq);
    }

    /// Merges a complete server listing fetched under sequence number `seq`.
    ///
    /// Returns `None` without touching state when `seq` is not newer than
    /// the last applied sequence number.
    pub fn apply_fetch(&mut self, seq: u64, fetched: Vec<Alert>) -> Option<MergeSummary> {
        if seq <= self.last_applied_seq {
            debug!(
                seq,
                last_applied = self.last_applied_seq,
                "Discarding stale alert fetch"
            );
            return None;
        }
        self.last_applied_seq = seq;

        let mut summary = MergeSummary::default();

        let mut newest: HashMap<(String, AlertType), Alert> = HashMap::new();
        for alert in fetched.into_iter().filter(|a| !a.resolved) {
            let key = (alert.device_id.clone(), alert.alert_type);
            match newest.get(&key) {
                Some(held) if !is_newer(&alert, held) => summary.shadowed += 1,
                Some(_) => {
                    summary.shadowed += 1;
                    newest.insert(key, alert);
                }
                None => {
                    newest.insert(key, alert);
                }
            }
        }

        let previous = std::mem::take(&mut self.alerts);
        let mut merged: Vec<Alert> = Vec::with_capacity(newest.len());

        for mut alert in newest.into_values() {
            let carried_ack = previous.iter().any(|p| {
                p.acknowledged && (p.id == alert.id || (p.id.is_pending() && p.key() == alert.key()))
            });
            alert.acknowledged |= carried_ack;
            merged.push(alert);
        }

        for local in previous.into_iter().filter(|a| a.id.is_pending()) {
            if merged.iter().any(|m| m.key() == local.key()) {
                summary.superseded_pending += 1;
            } else {
                merged.push(local);
            }
        }

        merged.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        summary.retained = merged.len();
        self.alerts = merged;
        Some(summary)
    }
}

fn is_newer(candidate: &Alert, held: &Alert) -> bool {
    match candidate.created_at.cmp(&held.created_at) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Less => false,
        std::cmp::Ordering::Equal => candidate.id.remote() > held.id.remote(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DeviceKind, Position};

    fn device(id: &str) -> Device {
        Device::new(id, DeviceKind::Equipment, format!("Tractor {}", id))
    }

    fn remote(id: i64, device_id: &str, alert_type: AlertType, secs: i64) -> Alert {
        Alert {
            id: AlertId::Remote(id),
            device_id: device_id.to_string(),
            alert_type,
            message: String::new(),
            created_at: DateTime::from_timestamp(1_740_000_000 + secs, 0).unwrap(),
            resolved: false,
            acknowledged: false,
        }
    }

    #[test]
    fn test_exit_transition_raises_alert() {
        let mut reconciler = AlertReconciler::new();
        let d1 = device("D1");

        let alert = reconciler
            .on_membership_transition(&d1, Membership::Inside, Membership::Outside)
            .unwrap();
        assert_eq!(alert.device_id, "D1");
        assert_eq!(alert.alert_type, AlertType::GeofenceExit);
        assert_eq!(alert.message, "Tractor D1 has left the geofence!");
        assert!(alert.id.is_pending());

        assert!(reconciler
            .on_membership_transition(&device("D2"), Membership::Unknown, Membership::Outside)
            .is_some());
    }

    #[test]
    fn test_non_exit_transitions_raise_nothing() {
        let mut reconciler = AlertReconciler::new();
        let d1 = device("D1");
        for (old, new) in [
            (Membership::Outside, Membership::Inside),
            (Membership::Outside, Membership::Outside),
            (Membership::Unknown, Membership::Inside),
            (Membership::Inside, Membership::Unknown),
        ] {
            assert!(reconciler.on_membership_transition(&d1, old, new).is_none());
        }
        assert!(reconciler.is_empty());
    }

    #[test]
    fn test_repeated_exits_deduplicate() {
        let mut reconciler = AlertReconciler::new();
        let d1 = device("D1");
        for _ in 0..5 {
            reconciler.on_membership_transition(&d1, Membership::Inside, Membership::Outside);
            reconciler.on_membership_transition(&d1, Membership::Outside, Membership::Inside);
        }
        let exits: Vec<_> = reconciler
            .alerts()
            .iter()
            .filter(|a| a.device_id == "D1" && a.alert_type == AlertType::GeofenceExit)
            .collect();
        assert_eq!(exits.len(), 1);
    }

    #[test]
    fn test_resolved_alert_allows_new_one() {
        let mut reconciler = AlertReconciler::new();
        let d1 = device("D1");
        let first = reconciler
            .on_membership_transition(&d1, Membership::Inside, Membership::Outside)
            .unwrap();
        let resolved = reconciler.mark_resolved(&first.id).unwrap();
        assert!(resolved.resolved);

        let second = reconciler
            .on_membership_transition(&d1, Membership::Inside, Membership::Outside)
            .unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(reconciler.len(), 1);
    }

    #[test]
    fn test_acknowledge_keeps_alert() {
        let mut reconciler = AlertReconciler::new();
        let alert = reconciler
            .on_membership_transition(&device("D1"), Membership::Inside, Membership::Outside)
            .unwrap();
        assert!(reconciler.mark_acknowledged(&alert.id));
        assert!(reconciler.get(&alert.id).unwrap().acknowledged);
        assert_eq!(reconciler.len(), 1);
        assert!(!reconciler.mark_acknowledged(&AlertId::Remote(999)));
    }

    #[test]
    fn test_check_inactivity() {
        let mut reconciler = AlertReconciler::new();
        let now = Utc::now();

        let mut stale = device("D1");
        stale.last_position =
            Some(Position::new(1.0, 1.0, 0.0, now - Duration::minutes(30)).unwrap());
        let mut fresh = device("D2");
        fresh.last_position = Some(Position::new(1.0, 1.0, 0.0, now).unwrap());
        let never = device("D3");
        let mut unlisted = stale.clone();
        unlisted.device_id = "D4".to_string();
        unlisted.listed = false;

        let devices = vec![stale, fresh, never, unlisted];
        let raised = reconciler.check_inactivity(&devices, now, Duration::minutes(15));
        assert_eq!(raised.len(), 1);
        assert_eq!(raised[0].device_id, "D1");
        assert_eq!(raised[0].alert_type, AlertType::DeviceInactive);

        // Deduplicated on the next check.
        assert!(reconciler
            .check_inactivity(&devices, now, Duration::minutes(15))
            .is_empty());
    }

    #[test]
    fn test_apply_fetch_keeps_newest_per_pair() {
        let mut reconciler = AlertReconciler::new();
        let summary = reconciler
            .apply_fetch(
                1,
                vec![
                    remote(1, "D1", AlertType::GeofenceExit, 0),
                    remote(2, "D1", AlertType::GeofenceExit, 60),
                    remote(3, "D1", AlertType::Speed, 30),
                    Alert {
                        resolved: true,
                        ..remote(4, "D2", AlertType::GeofenceExit, 10)
                    },
                ],
            )
            .unwrap();

        assert_eq!(summary.retained, 2);
        assert_eq!(summary.shadowed, 1);
        assert_eq!(
            reconciler
                .find_unresolved("D1", AlertType::GeofenceExit)
                .unwrap()
                .id,
            AlertId::Remote(2)
        );
        assert!(reconciler.find_unresolved("D2", AlertType::GeofenceExit).is_none());
    }

    #[test]
    fn test_apply_fetch_supersedes_pending_and_carries_ack() {
        let mut reconciler = AlertReconciler::new();
        let local = reconciler
            .on_membership_transition(&device("D1"), Membership::Inside, Membership::Outside)
            .unwrap();
        reconciler.mark_acknowledged(&local.id);
        let other = reconciler
            .on_membership_transition(&device("D2"), Membership::Inside, Membership::Outside)
            .unwrap();

        let summary = reconciler
            .apply_fetch(1, vec![remote(10, "D1", AlertType::GeofenceExit, 0)])
            .unwrap();
        assert_eq!(summary.superseded_pending, 1);
        assert!(reconciler.get(&local.id).is_none());
        let adopted = reconciler.get(&AlertId::Remote(10)).unwrap();
        assert!(adopted.acknowledged);
        // Pending alert without a server counterpart survives.
        assert!(reconciler.get(&other.id).is_some());
    }

    #[test]
    fn test_apply_fetch_discards_stale_sequence() {
        let mut reconciler = AlertReconciler::new();
        reconciler
            .apply_fetch(5, vec![remote(1, "D1", AlertType::GeofenceExit, 0)])
            .unwrap();

        assert!(reconciler.apply_fetch(3, vec![]).is_none());
        assert_eq!(reconciler.len(), 1);

        reconciler.advance_seq(9);
        assert!(reconciler.apply_fetch(8, vec![]).is_none());
        assert!(reconciler.apply_fetch(10, vec![]).is_some());
        assert!(reconciler.is_empty());
        assert_eq!(reconciler.last_applied_seq(), 10);
    }
}
