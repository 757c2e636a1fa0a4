//! Sensor types shared by the registry, the modules and the protocol.

use std::cell::Cell;
use std::rc::Rc;
use std::str::FromStr;

use crate::{Error, Result};

/// Sensor value type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorType {
    /// Signed integer, printed with `%d` semantics.
    Integer,
    /// Floating point, printed with `%f` semantics.
    Float,
}

impl FromStr for SensorType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "integer" => Ok(SensorType::Integer),
            "float" => Ok(SensorType::Float),
            other => Err(format!("Unknown sensor type: {}", other)),
        }
    }
}

impl std::fmt::Display for SensorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SensorType::Integer => write!(f, "integer"),
            SensorType::Float => write!(f, "float"),
        }
    }
}

/// A single sampled value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reading {
    Integer(i64),
    Float(f64),
}

impl std::fmt::Display for Reading {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Reading::Integer(v) => write!(f, "{}", v),
            Reading::Float(v) => write!(f, "{:.6}", v),
        }
    }
}

/// Sensor metadata returned for `<path>?` requests.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorInfo {
    pub label: String,
    pub min: f64,
    pub max: f64,
    pub unit: String,
}

impl SensorInfo {
    /// Creates sensor metadata. A `max` of zero means "auto-range".
    pub fn new(label: &str, min: f64, max: f64, unit: &str) -> Self {
        Self {
            label: label.to_string(),
            min,
            max,
            unit: unit.to_string(),
        }
    }
}

/// Wire format: `label\tmin\tmax\tunit`.
impl std::fmt::Display for SensorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}\t{}\t{}\t{}", self.label, self.min, self.max, self.unit)
    }
}

impl FromStr for SensorInfo {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim_end_matches('\n').split('\t').collect();
        if parts.len() != 4 {
            return Err(format!("Malformed sensor info: {:?}", s));
        }
        let min = parts[1]
            .parse()
            .map_err(|_| format!("Invalid minimum: {}", parts[1]))?;
        let max = parts[2]
            .parse()
            .map_err(|_| format!("Invalid maximum: {}", parts[2]))?;
        Ok(Self {
            label: parts[0].to_string(),
            min,
            max,
            unit: parts[3].to_string(),
        })
    }
}

/// Read callback: `None` means the value is currently not observable.
pub type ReadFn = Box<dyn Fn() -> Option<Reading>>;

/// Describe callback.
pub type DescribeFn = Box<dyn Fn() -> SensorInfo>;

/// A registered sensor.
pub struct Sensor {
    path: String,
    sensor_type: SensorType,
    owner: &'static str,
    read: ReadFn,
    describe: DescribeFn,
}

impl Sensor {
    pub(crate) fn new(
        path: String,
        sensor_type: SensorType,
        read: ReadFn,
        describe: DescribeFn,
        owner: &'static str,
    ) -> Self {
        Self {
            path,
            sensor_type,
            owner,
            read,
            describe,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn sensor_type(&self) -> SensorType {
        self.sensor_type
    }

    /// Name of the module that registered this sensor.
    pub fn owner(&self) -> &'static str {
        self.owner
    }

    /// Invokes the read callback.
    pub fn read(&self) -> Result<Reading> {
        (self.read)().ok_or_else(|| Error::SensorUnavailable(self.path.clone()))
    }

    /// Invokes the describe callback.
    pub fn describe(&self) -> SensorInfo {
        (self.describe)()
    }
}

impl std::fmt::Debug for Sensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sensor")
            .field("path", &self.path)
            .field("sensor_type", &self.sensor_type)
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}

/// Value slot shared between a module and the read callback it registered.
///
/// Modules and request handling run in separate phases of one thread, so a
/// plain `Rc<Cell>` is enough.
#[derive(Debug, Clone, Default)]
pub struct SensorCell(Rc<Cell<Option<Reading>>>);

impl SensorCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, reading: Reading) {
        self.0.set(Some(reading));
    }

    /// Marks the value as unobservable until the next `set`.
    pub fn clear(&self) {
        self.0.set(None);
    }

    pub fn get(&self) -> Option<Reading> {
        self.0.get()
    }

    /// Returns a read callback backed by this cell.
    pub fn reader(&self) -> ReadFn {
        let cell = self.clone();
        Box::new(move || cell.get())
    }
}
