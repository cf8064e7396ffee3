//! Hub-side cache of discovered sensors and their last-known modes.
//!
//! Single-writer: the hub loop owns it. Everything here is in-memory and
//! rebuilt by a fresh discovery round after a restart.

use std::collections::HashMap;

use vigil_protocol::{Mode, SensorRecord};

#[derive(Debug, Default)]
pub struct SensorRegistry {
    records: HashMap<String, SensorRecord>,
}

impl SensorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one discovery round's results. New ids are added, known ids
    /// keep their mode but take the freshly reported address.
    pub fn absorb(&mut self, discovered: HashMap<String, String>) {
        for (id, address) in discovered {
            match self.records.get_mut(&id) {
                Some(record) => record.address = address,
                None => {
                    self.records.insert(id.clone(), SensorRecord::new(id, address));
                }
            }
        }
    }

    /// Sensor ids in a stable order, for deterministic subscription and
    /// refresh sweeps.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.records.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn get(&self, id: &str) -> Option<&SensorRecord> {
        self.records.get(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Record a mode observed in the shared registry. Unknown ids are
    /// ignored and reported back to the caller.
    pub fn update_mode(&mut self, id: &str, mode: Mode) -> bool {
        match self.records.get_mut(id) {
            Some(record) => {
                record.mode = mode;
                true
            }
            None => false,
        }
    }

    /// The id -> address mapping in the shape the shared `sensors` key
    /// carries.
    pub fn address_map(&self) -> serde_json::Value {
        let map: serde_json::Map<String, serde_json::Value> = self
            .records
            .values()
            .map(|r| (r.id.clone(), serde_json::Value::String(r.address.clone())))
            .collect();
        serde_json::Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(id, addr)| (id.to_string(), addr.to_string()))
            .collect()
    }

    #[test]
    fn test_absorb_adds_and_updates() {
        let mut registry = SensorRegistry::new();
        registry.absorb(round(&[("s1", "10.0.0.5"), ("s2", "10.0.0.6")]));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("s1").unwrap().address, "10.0.0.5");

        registry.update_mode("s1", Mode::Streaming);
        registry.absorb(round(&[("s1", "10.0.0.9")]));
        let s1 = registry.get("s1").unwrap();
        assert_eq!(s1.address, "10.0.0.9");
        // A re-discovered sensor keeps the mode we last saw.
        assert_eq!(s1.mode, Mode::Streaming);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_ids_are_sorted() {
        let mut registry = SensorRegistry::new();
        registry.absorb(round(&[("zeta", "a"), ("alpha", "b"), ("mid", "c")]));
        assert_eq!(registry.ids(), vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_update_mode_unknown_id() {
        let mut registry = SensorRegistry::new();
        assert!(!registry.update_mode("ghost", Mode::Sensing));
    }

    #[test]
    fn test_address_map_shape() {
        let mut registry = SensorRegistry::new();
        registry.absorb(round(&[("s1", "10.0.0.5")]));
        assert_eq!(
            registry.address_map(),
            serde_json::json!({"s1": "10.0.0.5"})
        );
    }
}
