use crate::{
    registers::{RangeError, RegisterRange, RegisterRanges},
    sensor::{Address, ComputedPowerSensor, ComputedSumSensor, RegisterSensor, Sensor, SensorError, SensorInfo},
};
use std::{
    collections::{BTreeSet, HashSet},
    sync::Arc,
};

pub const GROUP_STRING: &str = "string";
pub const GROUP_BATTERY: &str = "battery";
pub const GROUP_GRID: &str = "grid";
pub const GROUP_SETTINGS: &str = "settings";

#[derive(thiserror::Error, Debug)]
pub enum CatalogError {
    #[error("sensor {0} cannot be read from registers and must not be polled")]
    NotReadable(String),

    #[error("topic suffix {0:?} is used by more than one sensor")]
    DuplicateTopic(String),

    #[error("sensor {0} keeps state between reads and is read more than once per poll")]
    SharedStatefulSensor(String),

    #[error("no sensor publishes to topic suffix {0:?}")]
    UnknownSensor(String),

    #[error(transparent)]
    Sensor(#[from] SensorError),

    #[error(transparent)]
    Range(#[from] RangeError),
}

/// Sensors polled from one inverter.
pub struct SensorCatalog {
    sensors: Vec<Arc<dyn Sensor>>,
    writable: BTreeSet<String>,
}

impl SensorCatalog {
    pub fn new(sensors: Vec<Arc<dyn Sensor>>) -> Result<Self, CatalogError> {
        let mut topics = HashSet::new();
        let mut stateful = HashSet::new();

        for sensor in &sensors {
            if !sensor.supports_read() {
                return Err(CatalogError::NotReadable(sensor.name().to_owned()));
            }

            if !topics.insert(sensor.topic_suffix()) {
                return Err(CatalogError::DuplicateTopic(sensor.topic_suffix().to_owned()));
            }

            check_stateful_reads(sensor, &mut stateful)?;
        }

        Ok(Self { sensors, writable: BTreeSet::new() })
    }

    /// Accepts commands for the sensor published under `topic_suffix`.
    pub fn writable(mut self, topic_suffix: &str) -> Result<Self, CatalogError> {
        if !self.sensors.iter().any(|sensor| sensor.topic_suffix() == topic_suffix) {
            return Err(CatalogError::UnknownSensor(topic_suffix.to_owned()));
        }

        self.writable.insert(topic_suffix.to_owned());
        Ok(self)
    }

    pub fn active<'a>(&'a self, active_groups: &'a HashSet<String>) -> impl Iterator<Item = &'a Arc<dyn Sensor>> + 'a {
        self.sensors.iter().filter(move |sensor| sensor.in_any_group(active_groups))
    }

    pub fn is_writable(&self, topic_suffix: &str) -> bool {
        self.writable.contains(topic_suffix)
    }

    pub fn find_writable(&self, topic_suffix: &str) -> Option<&Arc<dyn Sensor>> {
        if !self.is_writable(topic_suffix) {
            return None;
        }

        self.sensors.iter().find(|sensor| sensor.topic_suffix() == topic_suffix)
    }

    /// Addresses decoded by active sensors that the fetch plan never requests.
    pub fn uncovered_registers(&self, ranges: &RegisterRanges, active_groups: &HashSet<String>) -> Vec<Address> {
        self.active(active_groups)
            .flat_map(|sensor| sensor.registers())
            .filter(|&address| !ranges.contains(address))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// Every poll reads each catalog entry and, through it, each operand. A stateful sensor reached
/// twice would see the same snapshot twice.
fn check_stateful_reads(sensor: &Arc<dyn Sensor>, seen: &mut HashSet<*const ()>) -> Result<(), CatalogError> {
    if sensor.is_stateful() && !seen.insert(Arc::as_ptr(sensor) as *const ()) {
        return Err(CatalogError::SharedStatefulSensor(sensor.name().to_owned()));
    }

    for operand in sensor.operands() {
        check_stateful_reads(&operand, seen)?;
    }

    Ok(())
}

pub fn builtin_ranges() -> Result<Vec<RegisterRange>, RangeError> {
    Ok(vec![
        RegisterRange::new([GROUP_SETTINGS], 0x0028, 0x0028)?,
        RegisterRange::new([GROUP_STRING], 0x003b, 0x0070)?,
        RegisterRange::new([GROUP_GRID], 0x00a9, 0x00a9)?,
        RegisterRange::new([GROUP_BATTERY], 0x00b6, 0x00bf)?,
    ])
}

fn info(name: &str, topic_suffix: &str, unit: &str, group: &str) -> Result<SensorInfo, SensorError> {
    SensorInfo::new(name, topic_suffix, unit, [group])
}

fn shared(sensor: impl Sensor + 'static) -> Arc<dyn Sensor> {
    Arc::new(sensor)
}

/// Register map of a single phase string inverter with optional battery.
pub fn builtin_sensors() -> Result<SensorCatalog, CatalogError> {
    let pv1_voltage = shared(RegisterSensor::single_register(
        info("PV1 voltage", "dc/pv1/voltage", "V", GROUP_STRING)?,
        0x006d,
        0.1,
    ));
    let pv1_current = shared(RegisterSensor::single_register(
        info("PV1 current", "dc/pv1/current", "A", GROUP_STRING)?,
        0x006e,
        0.1,
    ));
    let pv2_voltage = shared(RegisterSensor::single_register(
        info("PV2 voltage", "dc/pv2/voltage", "V", GROUP_STRING)?,
        0x006f,
        0.1,
    ));
    let pv2_current = shared(RegisterSensor::single_register(
        info("PV2 current", "dc/pv2/current", "A", GROUP_STRING)?,
        0x0070,
        0.1,
    ));

    let pv1_power = shared(ComputedPowerSensor::new(
        info("PV1 power", "dc/pv1/power", "W", GROUP_STRING)?,
        pv1_voltage.clone(),
        pv1_current.clone(),
    ));
    let pv2_power = shared(ComputedPowerSensor::new(
        info("PV2 power", "dc/pv2/power", "W", GROUP_STRING)?,
        pv2_voltage.clone(),
        pv2_current.clone(),
    ));
    let pv_power = shared(ComputedSumSensor::new(
        info("PV total power", "dc/total_power", "W", GROUP_STRING)?,
        vec![pv1_power.clone(), pv2_power.clone()],
    ));

    let sensors = vec![
        shared(
            RegisterSensor::single_register(
                info("Daily energy", "day_energy", "kWh", GROUP_STRING)?,
                0x003c,
                0.1,
            )
            .reset_daily(),
        ),
        shared(RegisterSensor::double_register(
            info("Total energy", "total_energy", "kWh", GROUP_STRING)?,
            0x003f,
            0.1,
            true,
        )),
        shared(RegisterSensor::single_register(
            info("AC voltage", "ac/l1/voltage", "V", GROUP_STRING)?,
            0x0049,
            0.1,
        )),
        shared(RegisterSensor::single_register(
            info("AC current", "ac/l1/current", "A", GROUP_STRING)?,
            0x004c,
            0.1,
        )),
        shared(RegisterSensor::single_register(
            info("AC frequency", "ac/freq", "Hz", GROUP_STRING)?.with_print_format("{:0.2f}")?,
            0x004f,
            0.01,
        )),
        shared(RegisterSensor::double_register(
            info("AC active power", "ac/active_power", "W", GROUP_STRING)?,
            0x0056,
            0.1,
            true,
        )),
        shared(
            RegisterSensor::single_register(
                info("Radiator temperature", "radiator_temp", "°C", GROUP_STRING)?,
                0x005a,
                0.01,
            )
            .offset(-10.0),
        ),
        pv1_voltage,
        pv1_current,
        pv2_voltage,
        pv2_current,
        pv1_power,
        pv2_power,
        pv_power,
        shared(RegisterSensor::sign_magnitude_single_register(
            info("Grid power", "ac/grid/power", "W", GROUP_GRID)?.with_print_format("{:d}")?,
            0x00a9,
            1.0,
        )),
        shared(
            RegisterSensor::single_register(
                info("Battery temperature", "battery/temperature", "°C", GROUP_BATTERY)?,
                0x00b6,
                0.1,
            )
            .offset(-100.0),
        ),
        shared(RegisterSensor::single_register(
            info("Battery voltage", "battery/voltage", "V", GROUP_BATTERY)?.with_print_format("{:0.2f}")?,
            0x00b7,
            0.01,
        )),
        shared(RegisterSensor::single_register(
            info("Battery SOC", "battery/soc", "%", GROUP_BATTERY)?.with_print_format("{:d}")?,
            0x00b8,
            1.0,
        )),
        shared(
            RegisterSensor::single_register(
                info("Battery power", "battery/power", "W", GROUP_BATTERY)?.with_print_format("{:d}")?,
                0x00be,
                1.0,
            )
            .signed(),
        ),
        shared(
            RegisterSensor::single_register(
                info("Battery current", "battery/current", "A", GROUP_BATTERY)?.with_print_format("{:0.2f}")?,
                0x00bf,
                0.01,
            )
            .signed(),
        ),
        shared(RegisterSensor::single_register(
            info("Active power regulation", "settings/active_power_regulation", "%", GROUP_SETTINGS)?
                .with_print_format("{:d}")?,
            0x0028,
            1.0,
        )),
    ];

    SensorCatalog::new(sensors)?.writable("settings/active_power_regulation")
}
