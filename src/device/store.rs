use std::sync::{Arc, PoisonError, RwLock};

use crate::device::types::{DeviceStateDelta, Snapshot};

/// The single authoritative copy of the scale's state.
///
/// Readers get a full copy taken under the read lock, so an update is either
/// entirely visible or not at all. Only the session manager mutates.
#[derive(Debug, Clone, Default)]
pub struct StateStore {
    inner: Arc<RwLock<Snapshot>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&self) -> Snapshot {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).connected
    }

    pub(crate) fn merge(&self, delta: &DeviceStateDelta) {
        let mut snapshot = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        snapshot.state.apply(delta);
        snapshot.connected = true;
    }

    pub(crate) fn mark_connected(&self) {
        self.inner.write().unwrap_or_else(PoisonError::into_inner).connected = true;
    }

    /// Readings are kept so a disconnected scale still shows its last weight.
    pub(crate) fn mark_disconnected(&self) {
        self.inner.write().unwrap_or_else(PoisonError::into_inner).connected = false;
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use super::*;
    use crate::device::types::Unit;

    #[test]
    fn read_reflects_latest_value_per_field() {
        let store = StateStore::new();
        assert_eq!(store.read(), Snapshot::default());

        store.merge(&DeviceStateDelta { weight: Some(1.0), unit: Some(Unit::Grams), ..Default::default() });
        store.merge(&DeviceStateDelta { weight: Some(2.0), flow_rate: Some(0.5), ..Default::default() });
        store.merge(&DeviceStateDelta { battery_percent: Some(64), ..Default::default() });

        let snapshot = store.read();
        assert!(snapshot.connected);
        assert_eq!(snapshot.state.weight, Some(2.0));
        assert_eq!(snapshot.state.flow_rate, Some(0.5));
        assert_eq!(snapshot.state.battery_percent, Some(64));
        assert_eq!(snapshot.state.unit, Some(Unit::Grams));
        assert_eq!(snapshot.state.timer_seconds, None);
    }

    #[test]
    fn mark_disconnected_retains_readings() {
        let store = StateStore::new();
        store.merge(&DeviceStateDelta { weight: Some(18.5), buzzer_level: Some(3), ..Default::default() });
        store.mark_disconnected();

        let snapshot = store.read();
        assert!(!snapshot.connected);
        assert_eq!(snapshot.state.weight, Some(18.5));
        assert_eq!(snapshot.state.buzzer_level, Some(3));

        store.mark_connected();
        assert!(store.is_connected());
        assert_eq!(store.read().state.weight, Some(18.5));
    }

    #[test]
    fn readers_never_see_half_applied_merges() {
        let store = StateStore::new();
        let writer_store = store.clone();

        // every merge writes the same value to two fields, a torn read would differ
        let writer = thread::spawn(move || {
            for i in 0..5_000 {
                let value = i as f64;
                writer_store.merge(&DeviceStateDelta {
                    weight: Some(value),
                    flow_rate: Some(value),
                    ..Default::default()
                });
            }
        });

        let readers: Vec<_> = (0..4).map(|_| {
            let store = store.clone();
            thread::spawn(move || {
                for _ in 0..5_000 {
                    let state = store.read().state;
                    assert_eq!(state.weight, state.flow_rate);
                }
            })
        }).collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(store.read().state.weight, Some(4_999.0));
    }
}
