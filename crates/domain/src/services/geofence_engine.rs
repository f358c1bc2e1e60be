//! Geofence membership evaluation.

use tracing::debug;

use crate::models::{Device, Geofence, Membership, Position};

/// Classifies a position against a set of geofences.
///
/// `Inside` when the point falls in any polygon, `Outside` when it falls in
/// none, `Unknown` when there is no position or no geofence yet.
pub fn evaluate(position: Option<&Position>, geofences: &[Geofence]) -> Membership {
    let Some(position) = position else {
        return Membership::Unknown;
    };
    if geofences.is_empty() {
        return Membership::Unknown;
    }

    let point = position.coordinate();
    if geofences.iter().any(|g| g.contains(point)) {
        Membership::Inside
    } else {
        Membership::Outside
    }
}

/// Local geofence set.
///
/// Mutations are plain local edits; callers apply them only after the
/// backend confirmed the corresponding create/update/delete. Server
/// listings carry a sequence number and never overwrite a newer state.
#[derive(Debug, Clone, Default)]
pub struct GeofenceEngine {
    geofences: Vec<Geofence>,
    last_applied_seq: u64,
}

impl GeofenceEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_geofences(geofences: Vec<Geofence>) -> Self {
        let mut engine = Self::new();
        engine.replace_all(geofences);
        engine
    }

    pub fn geofences(&self) -> &[Geofence] {
        &self.geofences
    }

    pub fn get(&self, id: i64) -> Option<&Geofence> {
        self.geofences.iter().find(|g| g.id == id)
    }

    pub fn len(&self) -> usize {
        self.geofences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.geofences.is_empty()
    }

    pub fn evaluate(&self, position: Option<&Position>) -> Membership {
        evaluate(position, &self.geofences)
    }

    /// Membership of `device` before and after moving to `new_position`.
    pub fn reconcile(&self, device: &Device, new_position: &Position) -> (Membership, Membership) {
        (device.membership, self.evaluate(Some(new_position)))
    }

    /// Adds a confirmed geofence, replacing any existing one with the same id.
    pub fn add(&mut self, geofence: Geofence) {
        match self.geofences.iter_mut().find(|g| g.id == geofence.id) {
            Some(existing) => *existing = geofence,
            None => self.geofences.push(geofence),
        }
    }

    /// Removes a geofence whose deletion the backend confirmed.
    pub fn remove(&mut self, id: i64) -> Option<Geofence> {
        let index = self.geofences.iter().position(|g| g.id == id)?;
        Some(self.geofences.remove(index))
    }

    pub fn last_applied_seq(&self) -> u64 {
        self.last_applied_seq
    }

    /// Records that state as of `seq` has been applied; listings issued
    /// earlier are discarded afterwards.
    pub fn advance_seq(&mut self, seq: u64) {
        self.last_applied_seq = self.last_applied_seq.max(seq);
    }

    /// Installs a server listing fetched under sequence number `seq`.
    ///
    /// Returns `None` without touching state when `seq` is not newer than
    /// the last applied sequence number, otherwise whether the set changed.
    pub fn apply_listing(&mut self, seq: u64, geofences: Vec<Geofence>) -> Option<bool> {
        if seq <= self.last_applied_seq {
            debug!(
                seq,
                last_applied = self.last_applied_seq,
                "Discarding stale geofence listing"
            );
            return None;
        }
        self.last_applied_seq = seq;

        let previous = std::mem::take(&mut self.geofences);
        self.replace_all(geofences);
        Some(self.geofences != previous)
    }

    /// Replaces the whole set with a fresh server listing.
    pub fn replace_all(&mut self, geofences: Vec<Geofence>) {
        self.geofences.clear();
        for geofence in geofences {
            self.add(geofence);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DeviceKind, GeofenceRing};
    use chrono::Utc;

    fn fence(id: i64, lat: (f64, f64), lng: (f64, f64)) -> Geofence {
        Geofence {
            id,
            name: format!("G{}", id),
            description: String::new(),
            ring: GeofenceRing::new(vec![
                (lat.0, lng.0),
                (lat.0, lng.1),
                (lat.1, lng.1),
                (lat.1, lng.0),
            ])
            .unwrap(),
        }
    }

    fn pos(lat: f64, lng: f64) -> Position {
        Position::new(lat, lng, 0.0, Utc::now()).unwrap()
    }

    #[test]
    fn test_evaluate_unknown_without_geofences_or_position() {
        assert_eq!(evaluate(Some(&pos(1.0, 1.0)), &[]), Membership::Unknown);
        let fences = vec![fence(1, (0.0, 2.0), (0.0, 2.0))];
        assert_eq!(evaluate(None, &fences), Membership::Unknown);
    }

    #[test]
    fn test_evaluate_any_polygon() {
        let fences = vec![
            fence(1, (0.0, 2.0), (0.0, 2.0)),
            fence(2, (10.0, 12.0), (10.0, 12.0)),
        ];
        assert_eq!(evaluate(Some(&pos(11.0, 11.0)), &fences), Membership::Inside);
        assert_eq!(evaluate(Some(&pos(1.0, 1.0)), &fences), Membership::Inside);
        assert_eq!(evaluate(Some(&pos(5.0, 5.0)), &fences), Membership::Outside);
    }

    #[test]
    fn test_evaluate_is_order_independent() {
        let a = fence(1, (0.0, 2.0), (0.0, 2.0));
        let b = fence(2, (1.0, 3.0), (1.0, 3.0));
        let points = [pos(1.5, 1.5), pos(2.5, 2.5), pos(0.5, 2.9), pos(-1.0, 0.0)];
        for p in &points {
            let forward = evaluate(Some(p), &[a.clone(), b.clone()]);
            let backward = evaluate(Some(p), &[b.clone(), a.clone()]);
            assert_eq!(forward, backward);
            assert_eq!(forward, evaluate(Some(p), &[a.clone(), b.clone()]));
        }
    }

    #[test]
    fn test_reconcile_reports_transition() {
        let engine = GeofenceEngine::with_geofences(vec![fence(1, (0.0, 2.0), (0.0, 2.0))]);
        let mut device = Device::new("D1", DeviceKind::Equipment, "Tractor");
        device.last_position = Some(pos(1.0, 1.0));
        device.membership = Membership::Inside;

        assert_eq!(
            engine.reconcile(&device, &pos(5.0, 5.0)),
            (Membership::Inside, Membership::Outside)
        );
    }

    #[test]
    fn test_reconcile_first_position() {
        let engine = GeofenceEngine::with_geofences(vec![fence(1, (0.0, 2.0), (0.0, 2.0))]);
        let device = Device::new("D1", DeviceKind::Livestock, "Cow 7");
        assert_eq!(
            engine.reconcile(&device, &pos(5.0, 5.0)),
            (Membership::Unknown, Membership::Outside)
        );
    }

    #[test]
    fn test_add_replace_remove() {
        let mut engine = GeofenceEngine::new();
        assert!(engine.is_empty());
        engine.add(fence(1, (0.0, 2.0), (0.0, 2.0)));
        engine.add(fence(1, (0.0, 4.0), (0.0, 4.0)));
        assert_eq!(engine.len(), 1);
        assert_eq!(engine.evaluate(Some(&pos(3.0, 3.0))), Membership::Inside);

        assert!(engine.remove(1).is_some());
        assert!(engine.remove(1).is_none());
        assert_eq!(engine.evaluate(Some(&pos(3.0, 3.0))), Membership::Unknown);
    }

    #[test]
    fn test_apply_listing_reports_change() {
        let mut engine = GeofenceEngine::new();
        assert_eq!(engine.apply_listing(1, vec![]), Some(false));
        assert_eq!(
            engine.apply_listing(2, vec![fence(1, (0.0, 2.0), (0.0, 2.0))]),
            Some(true)
        );
        assert_eq!(
            engine.apply_listing(3, vec![fence(1, (0.0, 2.0), (0.0, 2.0))]),
            Some(false)
        );
        assert_eq!(engine.last_applied_seq(), 3);
    }

    #[test]
    fn test_listing_older_than_confirmed_edit_is_discarded() {
        let mut engine = GeofenceEngine::new();
        // Listing requested at seq 1, create confirmed at seq 2.
        engine.add(fence(7, (0.0, 2.0), (0.0, 2.0)));
        engine.advance_seq(2);

        assert_eq!(engine.apply_listing(1, vec![]), None);
        assert!(engine.get(7).is_some());
        assert_eq!(engine.evaluate(Some(&pos(1.0, 1.0))), Membership::Inside);

        assert_eq!(engine.apply_listing(4, vec![]), Some(true));
        assert!(engine.is_empty());
    }
}
