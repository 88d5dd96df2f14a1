//! Discovered-peripheral bookkeeping for the current scan.

use chrono::{DateTime, Utc};
use tracing::trace;

use crate::ble::adapter::PeripheralId;

/// A peripheral seen during the current scan.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DiscoveredPeripheral {
    /// Platform identifier.
    pub id: PeripheralId,
    /// Advertised name, if any advertisement carried one.
    pub name: Option<String>,
    /// Signal strength of the latest sighting, in dBm.
    pub rssi: Option<i16>,
    /// Whether the latest sighting was strong enough to connect.
    pub connectable: bool,
    /// Time of the latest sighting.
    pub last_seen: DateTime<Utc>,
}

impl DiscoveredPeripheral {
    /// Name to show in a device list.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("NA")
    }
}

/// The set of peripherals discovered since the last scan started.
///
/// Unique by identifier; entries keep their first-sighting order.
#[derive(Debug, Clone)]
pub struct DiscoveredPeripherals {
    entries: Vec<DiscoveredPeripheral>,
    min_rssi: i16,
}

impl DiscoveredPeripherals {
    /// Default minimum signal strength for connection eligibility.
    pub const DEFAULT_MIN_RSSI: i16 = -100;

    /// Create an empty set with the given eligibility threshold.
    pub fn new(min_rssi: i16) -> Self {
        Self {
            entries: Vec::new(),
            min_rssi,
        }
    }

    /// Record a sighting and return the updated entry.
    ///
    /// A sighting without a name keeps the name from earlier advertisements.
    /// Unknown signal strength does not make a peripheral ineligible.
    pub fn record(
        &mut self,
        id: PeripheralId,
        name: Option<String>,
        rssi: Option<i16>,
    ) -> DiscoveredPeripheral {
        let connectable = rssi.map_or(true, |rssi| rssi >= self.min_rssi);
        let now = Utc::now();

        match self.entries.iter_mut().find(|p| p.id == id) {
            Some(entry) => {
                trace!("Updated {} (rssi {:?})", id, rssi);
                if name.is_some() {
                    entry.name = name;
                }
                entry.rssi = rssi;
                entry.connectable = connectable;
                entry.last_seen = now;
                entry.clone()
            }
            None => {
                trace!("New peripheral {} (rssi {:?})", id, rssi);
                let entry = DiscoveredPeripheral {
                    id,
                    name,
                    rssi,
                    connectable,
                    last_seen: now,
                };
                self.entries.push(entry.clone());
                entry
            }
        }
    }

    /// Look up a peripheral by identifier.
    pub fn get(&self, id: &PeripheralId) -> Option<&DiscoveredPeripheral> {
        self.entries.iter().find(|p| p.id == *id)
    }

    /// Check if a peripheral was discovered.
    pub fn contains(&self, id: &PeripheralId) -> bool {
        self.get(id).is_some()
    }

    /// Forget every peripheral.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of distinct peripherals.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if nothing was discovered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Minimum signal strength for connection eligibility.
    pub fn min_rssi(&self) -> i16 {
        self.min_rssi
    }

    /// Snapshot of all entries in first-sighting order.
    pub fn to_vec(&self) -> Vec<DiscoveredPeripheral> {
        self.entries.clone()
    }

    /// Iterate over entries in first-sighting order.
    pub fn iter(&self) -> impl Iterator<Item = &DiscoveredPeripheral> {
        self.entries.iter()
    }
}

impl Default for DiscoveredPeripherals {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MIN_RSSI)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashMap;

    #[test]
    fn test_rediscovery_updates_signal_strength() {
        let mut set = DiscoveredPeripherals::default();
        set.record(PeripheralId::from("P1"), Some("Pi".to_string()), Some(-60));
        let entry = set.record(PeripheralId::from("P1"), None, Some(-95));

        assert_eq!(set.len(), 1);
        assert_eq!(entry.rssi, Some(-95));
        assert_eq!(entry.name.as_deref(), Some("Pi"));
        assert!(entry.connectable);
    }

    #[test]
    fn test_weak_signal_recorded_but_not_connectable() {
        let mut set = DiscoveredPeripherals::default();
        let entry = set.record(PeripheralId::from("P2"), None, Some(-101));
        assert!(!entry.connectable);
        assert!(set.contains(&PeripheralId::from("P2")));

        let entry = set.record(PeripheralId::from("P2"), None, Some(-100));
        assert!(entry.connectable);
    }

    #[test]
    fn test_unknown_rssi_is_connectable() {
        let mut set = DiscoveredPeripherals::new(-70);
        let entry = set.record(PeripheralId::from("P3"), None, None);
        assert!(entry.connectable);
        assert_eq!(entry.display_name(), "NA");
    }

    #[test]
    fn test_first_sighting_order_is_kept() {
        let mut set = DiscoveredPeripherals::default();
        for id in ["B", "A", "C", "A", "B"] {
            set.record(PeripheralId::from(id), None, Some(-50));
        }
        let order: Vec<_> = set.iter().map(|p| p.id.as_str().to_string()).collect();
        assert_eq!(order, vec!["B", "A", "C"]);

        set.clear();
        assert!(set.is_empty());
    }

    proptest! {
        #[test]
        fn prop_one_entry_per_identifier(
            sightings in proptest::collection::vec((0u8..6, -120i16..0), 0..64)
        ) {
            let mut set = DiscoveredPeripherals::default();
            let mut latest = HashMap::new();
            for (id, rssi) in &sightings {
                set.record(PeripheralId::new(format!("dev-{}", id)), None, Some(*rssi));
                latest.insert(format!("dev-{}", id), *rssi);
            }

            prop_assert_eq!(set.len(), latest.len());
            for (id, rssi) in latest {
                let entry = set.get(&PeripheralId::new(id)).cloned();
                prop_assert_eq!(entry.and_then(|e| e.rssi), Some(rssi));
            }
        }
    }
}
