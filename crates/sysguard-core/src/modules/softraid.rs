//! Software RAID sensors.
//!
//! Arrays are discovered from `/proc/mdstat`; per-array detail comes from
//! `mdadm --detail /dev/<array>`. Sensors live under
//! `SoftRaid/<array>/<attribute>` and are registered the first time their
//! value is seen.
//!
//! Every scan first marks all registered attributes as missing. An attribute
//! that is still missing once its source has been parsed means something
//! clients may already be reading has vanished. Its sensors are removed, the
//! scan stops and clients are asked to re-enumerate. Values the aborted scan
//! did not get to refresh are withheld until the next complete scan.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{SensorModule, UpdateStatus};
use crate::process::{read_bounded, ProcessRunner};
use crate::registry::SensorRegistry;
use crate::sensor::{Reading, SensorCell, SensorInfo, SensorType};
use crate::Result;

const OWNER: &str = "softraid";
const CATEGORY: &str = "SoftRaid";

/// Default size of the `/proc/mdstat` buffer.
pub const DEFAULT_SNAPSHOT_LIMIT: usize = 1024;

/// Default size of the `mdadm --detail` buffer.
pub const DEFAULT_HELPER_LIMIT: usize = 2048;

/// Where the module reads its data from.
#[derive(Debug, Clone)]
pub struct SoftRaidConfig {
    /// Snapshot file listing the arrays.
    pub mdstat: PathBuf,
    /// Helper binary invoked per array.
    pub mdadm: PathBuf,
    /// Directory holding the array device nodes.
    pub device_dir: PathBuf,
    /// Maximum snapshot size in bytes.
    pub snapshot_limit: usize,
    /// Maximum helper output size in bytes.
    pub helper_limit: usize,
}

impl Default for SoftRaidConfig {
    fn default() -> Self {
        Self {
            mdstat: PathBuf::from("/proc/mdstat"),
            mdadm: PathBuf::from("/sbin/mdadm"),
            device_dir: PathBuf::from("/dev"),
            snapshot_limit: DEFAULT_SNAPSHOT_LIMIT,
            helper_limit: DEFAULT_HELPER_LIMIT,
        }
    }
}

/// Array attributes exposed as sensors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    NumBlocks,
    ArraySize,
    UsedDeviceSize,
    RaidDevices,
    TotalDevices,
    PreferredMinor,
    ActiveDevices,
    WorkingDevices,
    FailedDevices,
    SpareDevices,
}

/// One sensor backing (part of) a field.
struct SensorSpec {
    name: &'static str,
    sensor_type: SensorType,
    label: &'static str,
    unit: &'static str,
}

const fn count(name: &'static str, label: &'static str) -> SensorSpec {
    SensorSpec {
        name,
        sensor_type: SensorType::Integer,
        label,
        unit: "",
    }
}

static NUM_BLOCKS: [SensorSpec; 1] = [SensorSpec {
    name: "NumBlocks",
    sensor_type: SensorType::Integer,
    label: "Number of blocks",
    unit: "blocks",
}];

static ARRAY_SIZE: [SensorSpec; 3] = [
    SensorSpec {
        name: "ArraySizeBlocks",
        sensor_type: SensorType::Integer,
        label: "Array size in blocks",
        unit: "blocks",
    },
    SensorSpec {
        name: "ArraySizeMiB",
        sensor_type: SensorType::Float,
        label: "Array size in MiB",
        unit: "MiB",
    },
    SensorSpec {
        name: "ArraySizeMB",
        sensor_type: SensorType::Float,
        label: "Array size in MB",
        unit: "MB",
    },
];

static USED_DEVICE_SIZE: [SensorSpec; 3] = [
    SensorSpec {
        name: "UsedDeviceSizeBlocks",
        sensor_type: SensorType::Integer,
        label: "Used device size in blocks",
        unit: "blocks",
    },
    SensorSpec {
        name: "UsedDeviceSizeMiB",
        sensor_type: SensorType::Float,
        label: "Used device size in MiB",
        unit: "MiB",
    },
    SensorSpec {
        name: "UsedDeviceSizeMB",
        sensor_type: SensorType::Float,
        label: "Used device size in MB",
        unit: "MB",
    },
];

static RAID_DEVICES: [SensorSpec; 1] = [count("NumRaidDevices", "Total number of raid devices")];
static TOTAL_DEVICES: [SensorSpec; 1] = [count("TotalDevices", "Total number of devices")];
static PREFERRED_MINOR: [SensorSpec; 1] = [count("PreferredMinor", "The preferred minor")];
static ACTIVE_DEVICES: [SensorSpec; 1] = [count("ActiveDevices", "Number of active devices")];
static WORKING_DEVICES: [SensorSpec; 1] = [count("WorkingDevices", "Number of working devices")];
static FAILED_DEVICES: [SensorSpec; 1] = [count("FailedDevices", "Number of failed devices")];
static SPARE_DEVICES: [SensorSpec; 1] = [count("SpareDevices", "Number of spare devices")];

impl Field {
    pub const ALL: [Field; 10] = [
        Field::NumBlocks,
        Field::ArraySize,
        Field::UsedDeviceSize,
        Field::RaidDevices,
        Field::TotalDevices,
        Field::PreferredMinor,
        Field::ActiveDevices,
        Field::WorkingDevices,
        Field::FailedDevices,
        Field::SpareDevices,
    ];

    /// Fields sourced from the helper rather than the snapshot.
    pub const DETAIL: [Field; 9] = [
        Field::ArraySize,
        Field::UsedDeviceSize,
        Field::RaidDevices,
        Field::TotalDevices,
        Field::PreferredMinor,
        Field::ActiveDevices,
        Field::WorkingDevices,
        Field::FailedDevices,
        Field::SpareDevices,
    ];

    /// Maps an `mdadm --detail` label to its field.
    fn from_label(label: &str) -> Option<Self> {
        match label {
            "Array Size" => Some(Field::ArraySize),
            // mdadm before 2.6 printed "Device Size"
            "Used Dev Size" | "Device Size" => Some(Field::UsedDeviceSize),
            "Raid Devices" => Some(Field::RaidDevices),
            "Total Devices" => Some(Field::TotalDevices),
            "Preferred Minor" => Some(Field::PreferredMinor),
            "Active Devices" => Some(Field::ActiveDevices),
            "Working Devices" => Some(Field::WorkingDevices),
            "Failed Devices" => Some(Field::FailedDevices),
            "Spare Devices" => Some(Field::SpareDevices),
            _ => None,
        }
    }

    fn is_size(self) -> bool {
        matches!(self, Field::ArraySize | Field::UsedDeviceSize)
    }

    fn sensors(self) -> &'static [SensorSpec] {
        match self {
            Field::NumBlocks => &NUM_BLOCKS,
            Field::ArraySize => &ARRAY_SIZE,
            Field::UsedDeviceSize => &USED_DEVICE_SIZE,
            Field::RaidDevices => &RAID_DEVICES,
            Field::TotalDevices => &TOTAL_DEVICES,
            Field::PreferredMinor => &PREFERRED_MINOR,
            Field::ActiveDevices => &ACTIVE_DEVICES,
            Field::WorkingDevices => &WORKING_DEVICES,
            Field::FailedDevices => &FAILED_DEVICES,
            Field::SpareDevices => &SPARE_DEVICES,
        }
    }
}

/// A parsed attribute value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue {
    Count(i64),
    /// `N (X MiB Y MB)`: a block count plus the size in binary and decimal
    /// megabytes.
    Size { blocks: i64, mib: f64, mb: f64 },
}

impl FieldValue {
    /// Readings in the same order as the field's sensors.
    fn readings(self) -> Vec<Reading> {
        match self {
            FieldValue::Count(v) => vec![Reading::Integer(v)],
            FieldValue::Size { blocks, mib, mb } => vec![
                Reading::Integer(blocks),
                Reading::Float(mib),
                Reading::Float(mb),
            ],
        }
    }
}

/// Registration state of one attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// Never seen; no sensor exists.
    Unobserved,
    /// Sensor exists and the value was seen during the current scan.
    Registered,
    /// Sensor exists but the value has not been seen during the current scan.
    MissingThisScan,
}

#[derive(Debug)]
struct Attribute {
    liveness: Liveness,
    cells: Vec<SensorCell>,
}

/// A tracked array.
#[derive(Debug)]
pub struct RaidArray {
    name: String,
    alive: bool,
    attributes: BTreeMap<Field, Attribute>,
}

impl RaidArray {
    fn new(name: &str) -> Self {
        let attributes = Field::ALL
            .iter()
            .map(|&field| {
                (
                    field,
                    Attribute {
                        liveness: Liveness::Unobserved,
                        cells: Vec::new(),
                    },
                )
            })
            .collect();

        Self {
            name: name.to_string(),
            alive: false,
            attributes,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the array was listed in the latest snapshot.
    pub fn is_alive(&self) -> bool {
        self.alive
    }

    pub fn liveness(&self, field: Field) -> Liveness {
        self.attributes
            .get(&field)
            .map_or(Liveness::Unobserved, |attribute| attribute.liveness)
    }

    fn begin_scan(&mut self) {
        self.alive = false;
        for attribute in self.attributes.values_mut() {
            if attribute.liveness == Liveness::Registered {
                attribute.liveness = Liveness::MissingThisScan;
            }
        }
    }

    /// Stores a freshly seen value, registering its sensors on first sight.
    fn observe(&mut self, field: Field, value: FieldValue, registry: &mut SensorRegistry) {
        let Some(attribute) = self.attributes.get_mut(&field) else {
            return;
        };

        if attribute.liveness == Liveness::Unobserved {
            for spec in field.sensors() {
                let cell = SensorCell::new();
                let info = SensorInfo::new(spec.label, 0.0, 0.0, spec.unit);
                registry.register(
                    sensor_path(&self.name, spec.name),
                    spec.sensor_type,
                    cell.reader(),
                    Box::new(move || info.clone()),
                    OWNER,
                );
                attribute.cells.push(cell);
            }
        }

        for (cell, reading) in attribute.cells.iter().zip(value.readings()) {
            cell.set(reading);
        }
        attribute.liveness = Liveness::Registered;
    }

    fn missing(&self, fields: &[Field]) -> Vec<Field> {
        fields
            .iter()
            .copied()
            .filter(|&field| self.liveness(field) == Liveness::MissingThisScan)
            .collect()
    }

    /// Stops serving the given fields' last values.
    fn invalidate(&self, fields: &[Field]) {
        for field in fields {
            if let Some(attribute) = self.attributes.get(field) {
                attribute.cells.iter().for_each(SensorCell::clear);
            }
        }
    }

    /// Stops serving every attribute not seen so far in the current scan.
    fn invalidate_missing(&self) {
        self.invalidate(&self.missing(&Field::ALL));
    }

    /// Removes the sensors of vanished fields. A field that shows up again
    /// is registered afresh.
    fn forget(&mut self, fields: &[Field], registry: &mut SensorRegistry) {
        for &field in fields {
            let Some(attribute) = self.attributes.get_mut(&field) else {
                continue;
            };
            for spec in field.sensors() {
                registry.remove(&sensor_path(&self.name, spec.name));
            }
            attribute.cells.clear();
            attribute.liveness = Liveness::Unobserved;
        }
    }

    fn has_sensors(&self) -> bool {
        self.attributes
            .values()
            .any(|attribute| attribute.liveness != Liveness::Unobserved)
    }

    /// Paths of every sensor this array registered.
    pub fn sensor_paths(&self) -> Vec<String> {
        self.attributes
            .iter()
            .filter(|(_, attribute)| attribute.liveness != Liveness::Unobserved)
            .flat_map(|(field, _)| field.sensors())
            .map(|spec| sensor_path(&self.name, spec.name))
            .collect()
    }

    fn remove_sensors(&self, registry: &mut SensorRegistry) {
        for path in self.sensor_paths() {
            registry.remove(&path);
        }
    }
}

fn sensor_path(array: &str, attribute: &str) -> String {
    format!("{}/{}/{}", CATEGORY, array, attribute)
}

/// Classification of one snapshot line.
#[derive(Debug, PartialEq, Eq)]
enum SnapshotLine<'a> {
    /// `md0 : active raid1 ...`
    Header(&'a str),
    /// `      1048576 blocks super 1.2 [2/2] [UU]`
    Blocks(i64),
    Other,
}

fn parse_snapshot_line(line: &str) -> SnapshotLine<'_> {
    let mut tokens = line.split_whitespace();
    let (Some(first), Some(second)) = (tokens.next(), tokens.next()) else {
        return SnapshotLine::Other;
    };

    match second {
        ":" if first == "Personalities" => SnapshotLine::Other,
        ":" => SnapshotLine::Header(first),
        "blocks" => first
            .parse()
            .map(SnapshotLine::Blocks)
            .unwrap_or(SnapshotLine::Other),
        _ => SnapshotLine::Other,
    }
}

/// Extracts the recognized fields from `mdadm --detail` output.
pub fn parse_detail(output: &str) -> Vec<(Field, FieldValue)> {
    output.lines().filter_map(parse_detail_line).collect()
}

fn parse_detail_line(line: &str) -> Option<(Field, FieldValue)> {
    let (label, value) = line.split_once(':')?;
    let field = Field::from_label(label.trim())?;
    let value = value.trim();

    if field.is_size() {
        parse_size(value).map(|size| (field, size))
    } else {
        let count = value.split_whitespace().next()?.parse().ok()?;
        Some((field, FieldValue::Count(count)))
    }
}

/// Parses `1048576 (512.00 MiB 536.87 MB)`.
///
/// Large arrays are reported in GiB/GB or TiB/TB; those are scaled back to
/// MiB and MB.
fn parse_size(value: &str) -> Option<FieldValue> {
    let (blocks, detail) = value.split_once('(')?;
    let blocks = blocks.trim().parse().ok()?;
    let detail = detail.trim_end().strip_suffix(')')?;

    let tokens: Vec<&str> = detail.split_whitespace().collect();
    let [binary, binary_unit, decimal, decimal_unit] = tokens[..] else {
        return None;
    };

    let mib = binary.parse::<f64>().ok()?
        * match binary_unit {
            "MiB" => 1.0,
            "GiB" => 1024.0,
            "TiB" => 1024.0 * 1024.0,
            _ => return None,
        };
    let mb = decimal.parse::<f64>().ok()?
        * match decimal_unit {
            "MB" => 1.0,
            "GB" => 1000.0,
            "TB" => 1000.0 * 1000.0,
            _ => return None,
        };

    Some(FieldValue::Size { blocks, mib, mb })
}

/// Software RAID sensor module.
pub struct SoftRaidModule {
    config: SoftRaidConfig,
    runner: Box<dyn ProcessRunner>,
    arrays: BTreeMap<String, RaidArray>,
}

impl SoftRaidModule {
    pub fn new(config: SoftRaidConfig, runner: Box<dyn ProcessRunner>) -> Self {
        Self {
            config,
            runner,
            arrays: BTreeMap::new(),
        }
    }

    /// Tracked arrays in name order.
    pub fn arrays(&self) -> impl Iterator<Item = &RaidArray> {
        self.arrays.values()
    }

    pub fn array(&self, name: &str) -> Option<&RaidArray> {
        self.arrays.get(name)
    }

    /// Reads the snapshot. A missing file means no md driver, so no arrays.
    async fn read_snapshot(&self) -> Result<String> {
        let source = self.config.mdstat.display().to_string();
        let file = match tokio::fs::File::open(&self.config.mdstat).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %source, "No snapshot, md driver not loaded");
                return Ok(String::new());
            }
            Err(e) => return Err(e.into()),
        };
        read_bounded(file, &source, self.config.snapshot_limit).await
    }

    async fn scan(&mut self, registry: &mut SensorRegistry) -> Result<UpdateStatus> {
        let snapshot = self.read_snapshot().await?;

        for array in self.arrays.values_mut() {
            array.begin_scan();
        }

        let mut current: Option<String> = None;
        for line in snapshot.lines() {
            match parse_snapshot_line(line) {
                SnapshotLine::Header(name) => {
                    let array = self.arrays.entry(name.to_string()).or_insert_with(|| {
                        info!(array = name, "Found soft raid device");
                        RaidArray::new(name)
                    });
                    array.alive = true;
                    current = Some(name.to_string());

                    let device = self.config.device_dir.join(name);
                    let device = device.to_string_lossy();
                    let detail = self
                        .runner
                        .run(
                            &self.config.mdadm,
                            &["--detail", &device],
                            self.config.helper_limit,
                        )
                        .await?;

                    for (field, value) in parse_detail(&detail) {
                        array.observe(field, value, registry);
                    }

                    // NumBlocks is checked after the whole snapshot is read.
                    let missing = array.missing(&Field::DETAIL);
                    if !missing.is_empty() {
                        warn!(array = name, ?missing, "Soft raid device disappeared");
                        array.forget(&missing, registry);
                        // Nothing not yet refreshed may be served until the
                        // next complete scan.
                        for array in self.arrays.values() {
                            array.invalidate_missing();
                        }
                        return Ok(UpdateStatus::Reconfigure);
                    }
                }
                SnapshotLine::Blocks(blocks) => {
                    let Some(array) = current.as_ref().and_then(|name| self.arrays.get_mut(name))
                    else {
                        continue;
                    };
                    // Only the first count after the header belongs to the array.
                    if array.liveness(Field::NumBlocks) != Liveness::Registered {
                        array.observe(Field::NumBlocks, FieldValue::Count(blocks), registry);
                    }
                }
                SnapshotLine::Other => {}
            }
        }

        let mut status = UpdateStatus::Unchanged;

        let vanished: Vec<String> = self
            .arrays
            .values()
            .filter(|array| !array.alive)
            .map(|array| array.name.clone())
            .collect();
        for name in vanished {
            if let Some(array) = self.arrays.remove(&name) {
                if array.has_sensors() {
                    warn!(array = %name, "Soft raid device disappeared");
                    status = UpdateStatus::Reconfigure;
                }
                array.remove_sensors(registry);
            }
        }

        for array in self.arrays.values_mut() {
            if array.liveness(Field::NumBlocks) == Liveness::MissingThisScan {
                array.forget(&[Field::NumBlocks], registry);
                warn!(array = %array.name, "Soft raid block count disappeared");
                status = UpdateStatus::Reconfigure;
            }
        }

        Ok(status)
    }
}

#[async_trait(?Send)]
impl SensorModule for SoftRaidModule {
    fn name(&self) -> &'static str {
        OWNER
    }

    async fn init(&mut self, registry: &mut SensorRegistry) -> Result<()> {
        match self.scan(registry).await {
            Ok(_) => Ok(()),
            Err(e) if !e.is_fatal() => {
                warn!(error = %e, "Initial soft raid scan failed");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn update(&mut self, registry: &mut SensorRegistry) -> Result<UpdateStatus> {
        self.scan(registry).await
    }

    fn teardown(&mut self, registry: &mut SensorRegistry) {
        for array in self.arrays.values() {
            array.remove_sensors(registry);
        }
        self.arrays.clear();
    }
}
