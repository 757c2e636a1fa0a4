//! Central sensor registry.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::sensor::{DescribeFn, ReadFn, Sensor, SensorType};
use crate::{Error, Result};

/// Mapping from sensor path to sensor.
///
/// Paths are concrete strings built at registration time and are looked up
/// by exact match.
#[derive(Debug, Default)]
pub struct SensorRegistry {
    sensors: BTreeMap<String, Sensor>,
}

impl SensorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a sensor.
    ///
    /// Returns `false` and leaves the registry untouched if `path` is already
    /// taken; a duplicate is a bug in the calling module.
    pub fn register(
        &mut self,
        path: impl Into<String>,
        sensor_type: SensorType,
        read: ReadFn,
        describe: DescribeFn,
        owner: &'static str,
    ) -> bool {
        let path = path.into();
        if self.sensors.contains_key(&path) {
            warn!(%path, owner, "Sensor already registered, ignoring");
            return false;
        }

        debug!(%path, %sensor_type, owner, "Registered sensor");
        let sensor = Sensor::new(path.clone(), sensor_type, read, describe, owner);
        self.sensors.insert(path, sensor);
        true
    }

    /// Removes a sensor. Removing an unknown path is a no-op.
    pub fn remove(&mut self, path: &str) -> bool {
        let removed = self.sensors.remove(path).is_some();
        if removed {
            debug!(%path, "Removed sensor");
        }
        removed
    }

    /// Removes every sensor registered by `owner`, returning how many went.
    pub fn remove_owned_by(&mut self, owner: &str) -> usize {
        let before = self.sensors.len();
        self.sensors.retain(|_, sensor| sensor.owner() != owner);
        before - self.sensors.len()
    }

    pub fn lookup(&self, path: &str) -> Result<&Sensor> {
        self.sensors
            .get(path)
            .ok_or_else(|| Error::SensorNotFound(path.to_string()))
    }

    pub fn contains(&self, path: &str) -> bool {
        self.sensors.contains_key(path)
    }

    /// Iterates sensors in path order.
    pub fn sensors(&self) -> impl Iterator<Item = &Sensor> {
        self.sensors.values()
    }

    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::{Reading, SensorCell, SensorInfo};

    fn describe(label: &'static str) -> DescribeFn {
        Box::new(move || SensorInfo::new(label, 0.0, 0.0, ""))
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = SensorRegistry::new();
        let cell = SensorCell::new();
        cell.set(Reading::Float(0.5));

        assert!(registry.register(
            "cpu/loadavg1",
            SensorType::Float,
            cell.reader(),
            describe("Load average 1 min"),
            "loadavg",
        ));

        let sensor = registry.lookup("cpu/loadavg1").unwrap();
        assert_eq!(sensor.sensor_type(), SensorType::Float);
        assert_eq!(sensor.owner(), "loadavg");
        assert_eq!(sensor.read().unwrap(), Reading::Float(0.5));
        assert_eq!(sensor.describe().label, "Load average 1 min");
    }

    #[test]
    fn test_duplicate_register_is_noop() {
        let mut registry = SensorRegistry::new();
        let first = SensorCell::new();
        first.set(Reading::Integer(1));
        let second = SensorCell::new();
        second.set(Reading::Integer(2));

        assert!(registry.register("a/b", SensorType::Integer, first.reader(), describe("a"), "m"));
        assert!(!registry.register("a/b", SensorType::Integer, second.reader(), describe("b"), "m"));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.lookup("a/b").unwrap().read().unwrap(), Reading::Integer(1));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut registry = SensorRegistry::new();
        registry.register("a/b", SensorType::Integer, SensorCell::new().reader(), describe("a"), "m");

        assert!(registry.remove("a/b"));
        assert!(!registry.remove("a/b"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_lookup_unknown() {
        let registry = SensorRegistry::new();
        assert!(matches!(
            registry.lookup("SoftRaid/md9/NumBlocks"),
            Err(Error::SensorNotFound(path)) if path == "SoftRaid/md9/NumBlocks"
        ));
    }

    #[test]
    fn test_unset_cell_is_unavailable() {
        let mut registry = SensorRegistry::new();
        registry.register("a/b", SensorType::Integer, SensorCell::new().reader(), describe("a"), "m");
        assert!(matches!(
            registry.lookup("a/b").unwrap().read(),
            Err(Error::SensorUnavailable(_))
        ));
    }

    #[test]
    fn test_remove_owned_by_and_ordering() {
        let mut registry = SensorRegistry::new();
        for path in ["z/1", "a/1", "m/1"] {
            registry.register(path, SensorType::Integer, SensorCell::new().reader(), describe("x"), "first");
        }
        registry.register("b/1", SensorType::Float, SensorCell::new().reader(), describe("y"), "second");

        let paths: Vec<&str> = registry.sensors().map(|s| s.path()).collect();
        assert_eq!(paths, vec!["a/1", "b/1", "m/1", "z/1"]);

        assert_eq!(registry.remove_owned_by("first"), 3);
        assert_eq!(registry.len(), 1);
        assert!(registry.contains("b/1"));
    }
}
