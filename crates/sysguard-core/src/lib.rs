//! sysguard sensor library
//!
//! Provides the sensor registry, the line protocol, helper process
//! invocation and the OS sensor modules used by the sysguard daemon.

pub mod error;
pub mod modules;
pub mod process;
pub mod protocol;
pub mod registry;
pub mod sensor;

pub use error::{Error, Result};
pub use modules::{SensorModule, UpdateStatus};
pub use process::{CommandRunner, ProcessRunner};
pub use registry::SensorRegistry;
pub use sensor::{Reading, Sensor, SensorCell, SensorInfo, SensorType};

/// Default protocol port.
pub const DEFAULT_PORT: u16 = 3112;
