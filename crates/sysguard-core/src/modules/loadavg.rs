//! System load average sensors.

use async_trait::async_trait;
use tracing::debug;

use super::{SensorModule, UpdateStatus};
use crate::registry::SensorRegistry;
use crate::sensor::{Reading, SensorCell, SensorInfo, SensorType};
use crate::Result;

const OWNER: &str = "loadavg";

/// Sensor paths paired with their labels, in sample order.
const SENSORS: [(&str, &str); 3] = [
    ("cpu/loadavg1", "Load average 1 min"),
    ("cpu/loadavg5", "Load average 5 min"),
    ("cpu/loadavg15", "Load average 15 min"),
];

/// Returns the 1, 5 and 15 minute load averages.
pub type LoadSampler = fn() -> Option<[f64; 3]>;

/// Load average sensor module.
pub struct LoadAvgModule {
    sampler: LoadSampler,
    cells: Vec<SensorCell>,
}

impl LoadAvgModule {
    /// Creates a module reading the kernel's load averages.
    pub fn new() -> Self {
        Self::with_sampler(system_load_average)
    }

    pub fn with_sampler(sampler: LoadSampler) -> Self {
        Self {
            sampler,
            cells: Vec::new(),
        }
    }

    fn sample(&self) {
        match (self.sampler)() {
            Some(loads) => {
                for (cell, load) in self.cells.iter().zip(loads) {
                    cell.set(Reading::Float(load));
                }
            }
            None => {
                debug!("Couldn't read load averages");
                self.cells.iter().for_each(SensorCell::clear);
            }
        }
    }
}

impl Default for LoadAvgModule {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait(?Send)]
impl SensorModule for LoadAvgModule {
    fn name(&self) -> &'static str {
        OWNER
    }

    async fn init(&mut self, registry: &mut SensorRegistry) -> Result<()> {
        // Nothing is registered on systems without load averages.
        let Some(loads) = (self.sampler)() else {
            debug!("Load averages unavailable, skipping module");
            return Ok(());
        };

        for ((path, label), load) in SENSORS.iter().zip(loads) {
            let cell = SensorCell::new();
            cell.set(Reading::Float(load));
            let info = SensorInfo::new(label, 0.0, 0.0, "");
            registry.register(
                *path,
                SensorType::Float,
                cell.reader(),
                Box::new(move || info.clone()),
                OWNER,
            );
            self.cells.push(cell);
        }
        Ok(())
    }

    async fn update(&mut self, _registry: &mut SensorRegistry) -> Result<UpdateStatus> {
        if !self.cells.is_empty() {
            self.sample();
        }
        Ok(UpdateStatus::Unchanged)
    }

    fn teardown(&mut self, registry: &mut SensorRegistry) {
        if self.cells.is_empty() {
            return;
        }
        for (path, _) in SENSORS {
            registry.remove(path);
        }
        self.cells.clear();
    }
}

/// Reads the load averages via `getloadavg(3)`.
pub fn system_load_average() -> Option<[f64; 3]> {
    let mut loads = [0f64; 3];
    // SAFETY: getloadavg writes at most `nelem` doubles into the buffer.
    let n = unsafe { libc::getloadavg(loads.as_mut_ptr(), 3) };
    (n == 3).then_some(loads)
}
