use super::{Address, RegisterWrites, Registers, Sensor, SensorError, SensorInfo};
use chrono::{DateTime, Local};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy)]
struct LastReading {
    value: f64,
    timestamp: DateTime<Local>,
}

/// Wraps a daily counter (e.g. energy produced today) and reports `0` for the first reading of a new day
/// until the device resets its own accumulator.
///
/// Every instance keeps its own state for the process lifetime. Reading it twice for the same snapshot
/// advances that state, so the catalog must reach each instance exactly once.
pub struct DailyResetSensor {
    delegate: Box<dyn Sensor>,
    last: Mutex<LastReading>,
}

impl DailyResetSensor {
    pub fn new(delegate: Box<dyn Sensor>) -> Self {
        Self::with_last_reading(delegate, 0.0, Local::now())
    }

    fn with_last_reading(delegate: Box<dyn Sensor>, value: f64, timestamp: DateTime<Local>) -> Self {
        Self { delegate, last: Mutex::new(LastReading { value, timestamp }) }
    }

    fn read_value_at(&self, registers: &Registers, now: DateTime<Local>) -> Result<Option<f64>, SensorError> {
        let Some(value) = self.delegate.read_value(registers)? else {
            return Ok(None);
        };

        let mut last = self.last.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let reported = if now.date_naive() != last.timestamp.date_naive() && value >= last.value {
            log::debug!(
                "{}: reporting 0 instead of {value}, counter not reset since {}",
                self.delegate.name(),
                last.timestamp
            );
            0.0
        } else {
            value
        };

        *last = LastReading { value, timestamp: now };

        Ok(Some(reported))
    }
}

impl Sensor for DailyResetSensor {
    fn info(&self) -> &SensorInfo {
        self.delegate.info()
    }

    fn read_value(&self, registers: &Registers) -> Result<Option<f64>, SensorError> {
        self.read_value_at(registers, Local::now())
    }

    fn write_value(&self, value: &str) -> Result<RegisterWrites, SensorError> {
        self.delegate.write_value(value)
    }

    fn format_value(&self, value: f64) -> String {
        self.delegate.format_value(value)
    }

    fn registers(&self) -> Vec<Address> {
        self.delegate.registers()
    }

    fn supports_read(&self) -> bool {
        self.delegate.supports_read()
    }

    fn is_stateful(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::{test_info, RegisterSensor};
    use chrono::{Duration, TimeZone};

    const ADDRESS: Address = 0x3c;

    fn day_energy() -> Box<dyn Sensor> {
        Box::new(RegisterSensor::single_register(test_info("day_energy"), ADDRESS, 1.0))
    }

    fn snapshot(word: u16) -> Registers {
        [(ADDRESS, word.to_be_bytes())].into()
    }

    fn today_noon() -> DateTime<Local> {
        let today = Local::now().date_naive();
        Local.from_local_datetime(&today.and_hms_opt(12, 0, 0).unwrap()).earliest().unwrap()
    }

    fn last(sensor: &DailyResetSensor) -> LastReading {
        *sensor.last.lock().unwrap()
    }

    #[test]
    fn stale_counter_reports_zero_on_new_day() {
        let now = today_noon();
        let sensor = DailyResetSensor::with_last_reading(day_energy(), 100.0, now - Duration::days(1));

        assert_eq!(sensor.read_value_at(&snapshot(100), now).unwrap(), Some(0.0));
        assert_eq!(sensor.read_value_at(&snapshot(5), now).unwrap(), Some(5.0));
    }

    #[test]
    fn counter_above_yesterday_is_reset_and_state_updated() {
        let now = today_noon();
        let sensor = DailyResetSensor::with_last_reading(day_energy(), 3.0, now - Duration::days(1));

        assert_eq!(sensor.read_value_at(&snapshot(5), now).unwrap(), Some(0.0));

        let state = last(&sensor);
        assert_eq!(state.value, 5.0);
        assert_eq!(state.timestamp, now);
    }

    #[test]
    fn value_below_last_is_reported_on_new_day() {
        let now = today_noon();
        let sensor = DailyResetSensor::with_last_reading(day_energy(), 100.0, now - Duration::days(1));

        assert_eq!(sensor.read_value_at(&snapshot(5), now).unwrap(), Some(5.0));

        let state = last(&sensor);
        assert_eq!(state.value, 5.0);
        assert_eq!(state.timestamp, now);
    }

    #[test]
    fn same_day_values_pass_through() {
        let now = today_noon();
        let sensor = DailyResetSensor::with_last_reading(day_energy(), 3.0, now - Duration::hours(1));

        assert_eq!(sensor.read_value_at(&snapshot(5), now).unwrap(), Some(5.0));
        assert_eq!(sensor.read_value_at(&snapshot(2), now).unwrap(), Some(2.0));
    }

    #[test]
    fn absent_value_leaves_state_untouched() {
        let now = today_noon();
        let yesterday = now - Duration::days(1);
        let sensor = DailyResetSensor::with_last_reading(day_energy(), 42.0, yesterday);

        assert_eq!(sensor.read_value_at(&Registers::new(), now).unwrap(), None);

        let state = last(&sensor);
        assert_eq!(state.value, 42.0);
        assert_eq!(state.timestamp, yesterday);
    }

    #[test]
    fn fresh_sensor_passes_same_day_value_through() {
        let before = Local::now();
        let sensor = DailyResetSensor::new(day_energy());

        let state = last(&sensor);
        assert_eq!(state.value, 0.0);
        assert!(state.timestamp >= before && state.timestamp <= Local::now());

        assert_eq!(sensor.read_value_at(&snapshot(7), state.timestamp).unwrap(), Some(7.0));
        assert_eq!(last(&sensor).value, 7.0);
    }

    #[test]
    fn first_reading_after_midnight_reports_zero() {
        let now = today_noon();

        for word in [0, 12] {
            let sensor = DailyResetSensor::with_last_reading(day_energy(), 0.0, now - Duration::days(1));

            assert_eq!(sensor.read_value_at(&snapshot(word), now).unwrap(), Some(0.0));
            assert_eq!(last(&sensor).value, word as f64);
        }
    }

    #[test]
    fn delegates_metadata() {
        let sensor = RegisterSensor::single_register(test_info("day_energy"), ADDRESS, 0.1).reset_daily();

        assert_eq!(sensor.name(), "day_energy");
        assert_eq!(sensor.registers(), vec![ADDRESS]);
        assert_eq!(sensor.format_value(1.24), "1.2");
        assert_eq!(sensor.write_value("1.0").unwrap(), snapshot(10));
        assert!(sensor.is_stateful());
    }
}
