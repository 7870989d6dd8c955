use super::{Address, RegisterWrites, Registers, Sensor, SensorError, SensorInfo};
use std::sync::Arc;

/// Electric power computed as the product of a voltage and a current reading.
pub struct ComputedPowerSensor {
    info: SensorInfo,
    voltage: Arc<dyn Sensor>,
    current: Arc<dyn Sensor>,
}

impl ComputedPowerSensor {
    pub fn new(info: SensorInfo, voltage: Arc<dyn Sensor>, current: Arc<dyn Sensor>) -> Self {
        Self { info, voltage, current }
    }
}

impl Sensor for ComputedPowerSensor {
    fn info(&self) -> &SensorInfo {
        &self.info
    }

    fn read_value(&self, registers: &Registers) -> Result<Option<f64>, SensorError> {
        let voltage = self.voltage.read_value(registers)?;
        let current = self.current.read_value(registers)?;

        Ok(voltage.zip(current).map(|(voltage, current)| voltage * current))
    }

    fn write_value(&self, _value: &str) -> Result<RegisterWrites, SensorError> {
        Err(SensorError::ReadOnly(self.info.name.clone()))
    }

    fn registers(&self) -> Vec<Address> {
        Vec::new()
    }

    fn supports_read(&self) -> bool {
        self.voltage.supports_read() && self.current.supports_read()
    }

    fn operands(&self) -> Vec<Arc<dyn Sensor>> {
        vec![self.voltage.clone(), self.current.clone()]
    }
}

/// Sum of other sensors, absent as soon as any of them is.
pub struct ComputedSumSensor {
    info: SensorInfo,
    sensors: Vec<Arc<dyn Sensor>>,
}

impl ComputedSumSensor {
    pub fn new(info: SensorInfo, sensors: Vec<Arc<dyn Sensor>>) -> Self {
        Self { info, sensors }
    }
}

impl Sensor for ComputedSumSensor {
    fn info(&self) -> &SensorInfo {
        &self.info
    }

    fn read_value(&self, registers: &Registers) -> Result<Option<f64>, SensorError> {
        let mut sum = 0.0;

        for sensor in &self.sensors {
            match sensor.read_value(registers)? {
                Some(value) => sum += value,
                None => return Ok(None),
            }
        }

        Ok(Some(sum))
    }

    fn write_value(&self, _value: &str) -> Result<RegisterWrites, SensorError> {
        Err(SensorError::ReadOnly(self.info.name.clone()))
    }

    fn registers(&self) -> Vec<Address> {
        Vec::new()
    }

    fn supports_read(&self) -> bool {
        self.sensors.iter().all(|sensor| sensor.supports_read())
    }

    fn operands(&self) -> Vec<Arc<dyn Sensor>> {
        self.sensors.clone()
    }
}

/// Placeholder for a value aggregated across several inverters outside of the register poll.
pub struct AggregatedValueSensor {
    info: SensorInfo,
}

impl AggregatedValueSensor {
    pub fn new(info: SensorInfo) -> Self {
        Self { info }
    }
}

impl Sensor for AggregatedValueSensor {
    fn info(&self) -> &SensorInfo {
        &self.info
    }

    fn read_value(&self, _registers: &Registers) -> Result<Option<f64>, SensorError> {
        Err(SensorError::Unsupported { name: self.info.name.clone(), operation: "read" })
    }

    fn write_value(&self, _value: &str) -> Result<RegisterWrites, SensorError> {
        Err(SensorError::Unsupported { name: self.info.name.clone(), operation: "write" })
    }

    fn registers(&self) -> Vec<Address> {
        Vec::new()
    }

    fn supports_read(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::{test_info, RegisterSensor};

    fn leaf(address: Address) -> Arc<dyn Sensor> {
        Arc::new(RegisterSensor::single_register(test_info("leaf"), address, 0.1))
    }

    fn snapshot(words: &[(Address, u16)]) -> Registers {
        words.iter().map(|&(address, word)| (address, word.to_be_bytes())).collect()
    }

    #[test]
    fn power_is_voltage_times_current() {
        let power = ComputedPowerSensor::new(test_info("pv1_power"), leaf(1), leaf(2));

        let value = power.read_value(&snapshot(&[(1, 3000), (2, 55)])).unwrap().unwrap();
        assert!((value - 1650.0).abs() < 1e-9);
        assert!(power.registers().is_empty());
    }

    #[test]
    fn power_is_absent_without_both_operands() {
        let power = ComputedPowerSensor::new(test_info("pv1_power"), leaf(1), leaf(2));

        assert_eq!(power.read_value(&snapshot(&[(1, 3000)])).unwrap(), None);
        assert_eq!(power.read_value(&snapshot(&[(2, 55)])).unwrap(), None);
        assert!(matches!(power.write_value("1"), Err(SensorError::ReadOnly(_))));
    }

    #[test]
    fn sum_of_all_operands() {
        let sum = ComputedSumSensor::new(test_info("pv_power"), vec![leaf(1), leaf(2), leaf(3)]);

        let value = sum.read_value(&snapshot(&[(1, 10), (2, 20), (3, 30)])).unwrap().unwrap();
        assert!((value - 6.0).abs() < 1e-9);
    }

    #[test]
    fn sum_is_absent_when_any_operand_is() {
        for missing in 1..=3 {
            let sum = ComputedSumSensor::new(test_info("pv_power"), vec![leaf(1), leaf(2), leaf(3)]);
            let words: Vec<_> = (1..=3).filter(|&a| a != missing).map(|a| (a, 10)).collect();

            assert_eq!(sum.read_value(&snapshot(&words)).unwrap(), None);
        }

        let single = ComputedSumSensor::new(test_info("pv_power"), vec![leaf(1)]);
        assert_eq!(single.read_value(&Registers::new()).unwrap(), None);
    }

    #[test]
    fn empty_sum_is_zero() {
        let sum = ComputedSumSensor::new(test_info("nothing"), Vec::new());
        assert_eq!(sum.read_value(&Registers::new()).unwrap(), Some(0.0));
    }

    #[test]
    fn aggregated_sensor_refuses_register_access() {
        let sensor = AggregatedValueSensor::new(test_info("total_power"));

        assert!(!sensor.supports_read());
        assert!(sensor.registers().is_empty());
        assert!(matches!(
            sensor.read_value(&Registers::new()),
            Err(SensorError::Unsupported { operation: "read", .. })
        ));
        assert!(matches!(
            sensor.write_value("1"),
            Err(SensorError::Unsupported { operation: "write", .. })
        ));
    }

    #[test]
    fn composites_inherit_readability_of_operands() {
        let aggregated: Arc<dyn Sensor> = Arc::new(AggregatedValueSensor::new(test_info("total_power")));

        let power = ComputedPowerSensor::new(test_info("p"), leaf(1), aggregated.clone());
        let sum = ComputedSumSensor::new(test_info("s"), vec![leaf(1), aggregated]);
        assert!(!power.supports_read());
        assert!(!sum.supports_read());

        let power = ComputedPowerSensor::new(test_info("p"), leaf(1), leaf(2));
        assert!(power.supports_read());
        assert!(ComputedSumSensor::new(test_info("s"), Vec::new()).supports_read());
    }

    #[test]
    fn composites_nest() {
        let power: Arc<dyn Sensor> = Arc::new(ComputedPowerSensor::new(test_info("p"), leaf(1), leaf(2)));
        let sum = ComputedSumSensor::new(test_info("total"), vec![power, leaf(3)]);

        let value = sum.read_value(&snapshot(&[(1, 100), (2, 20), (3, 5)])).unwrap().unwrap();
        assert!((value - 20.5).abs() < 1e-9);
        assert_eq!(sum.read_value(&snapshot(&[(1, 100), (3, 5)])).unwrap(), None);
    }
}
