//! OS sensor modules.
//!
//! Each module owns the sensors of one subsystem and is driven by the
//! daemon's periodic tick.

mod loadavg;
pub mod softraid;

pub use loadavg::LoadAvgModule;
pub use softraid::{SoftRaidConfig, SoftRaidModule};

use async_trait::async_trait;

use crate::registry::SensorRegistry;
use crate::Result;

/// Outcome of a module update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStatus {
    /// Values were refreshed; the sensor set is still valid.
    Unchanged,
    /// A sensor clients may rely on vanished. Clients must re-enumerate.
    Reconfigure,
}

/// Trait for all sensor modules.
#[async_trait(?Send)]
pub trait SensorModule {
    /// Returns the module name, used as the owner of its sensors.
    fn name(&self) -> &'static str;

    /// Registers immediately-available sensors and runs the first scan.
    async fn init(&mut self, registry: &mut SensorRegistry) -> Result<()>;

    /// Refreshes values, registering or invalidating sensors as needed.
    async fn update(&mut self, registry: &mut SensorRegistry) -> Result<UpdateStatus>;

    /// Removes every sensor this module registered.
    fn teardown(&mut self, registry: &mut SensorRegistry);
}
