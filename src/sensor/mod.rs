pub mod computed;
pub mod daily_reset;
pub mod register;

use lazy_static::lazy_static;
use std::{
    collections::{BTreeMap, BTreeSet, HashSet},
    sync::Arc,
};

pub use computed::{AggregatedValueSensor, ComputedPowerSensor, ComputedSumSensor};
pub use daily_reset::DailyResetSensor;
pub use register::RegisterSensor;

pub type Address = u16;

/// Raw register contents fetched during a single poll cycle, big-endian words keyed by address.
pub type Registers = BTreeMap<Address, [u8; 2]>;

/// Raw register contents to be written to the inverter.
pub type RegisterWrites = BTreeMap<Address, [u8; 2]>;

lazy_static! {
    static ref PLACEHOLDER_REGEX: regex::Regex =
        regex::Regex::new(r"\{(?::(?:0?\.(?P<precision>\d+)f|(?P<int>d)|s))?\}").unwrap();
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum SensorError {
    #[error("sensor {0} must belong to at least one group")]
    NoGroups(String),

    #[error("sensor {name}: unsupported print format {format:?}")]
    InvalidFormat { name: String, format: String },

    #[error("sensor {name}: cannot parse {value:?} as a number")]
    InvalidValue { name: String, value: String },

    #[error("sensor {name}: value {value} does not fit into its registers")]
    OutOfRange { name: String, value: f64 },

    #[error("sensor {0} is computed from other sensors and cannot be written")]
    ReadOnly(String),

    #[error("cannot {operation} registers of aggregated sensor {name}")]
    Unsupported { name: String, operation: &'static str },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placeholder {
    Plain,
    Integer,
    Fixed(usize),
}

/// Display template of a sensor value, e.g. `{:0.1f}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrintFormat {
    prefix: String,
    placeholder: Placeholder,
    suffix: String,
}

impl PrintFormat {
    pub fn parse(template: &str) -> Option<Self> {
        let captures = PLACEHOLDER_REGEX.captures(template)?;
        let whole = captures.get(0)?;

        let placeholder = if let Some(precision) = captures.name("precision") {
            Placeholder::Fixed(precision.as_str().parse().ok()?)
        } else if captures.name("int").is_some() {
            Placeholder::Integer
        } else {
            Placeholder::Plain
        };

        let prefix = &template[..whole.start()];
        let suffix = &template[whole.end()..];
        if prefix.contains(&['{', '}'][..]) || suffix.contains(&['{', '}'][..]) {
            return None;
        }

        Some(Self { prefix: prefix.to_owned(), placeholder, suffix: suffix.to_owned() })
    }

    pub fn format(&self, value: f64) -> String {
        let value = match self.placeholder {
            Placeholder::Plain => format!("{value:?}"),
            Placeholder::Integer => format!("{}", value.round() as i64),
            Placeholder::Fixed(precision) => format!("{value:.precision$}"),
        };

        format!("{}{value}{}", self.prefix, self.suffix)
    }
}

impl Default for PrintFormat {
    fn default() -> Self {
        Self { prefix: String::new(), placeholder: Placeholder::Fixed(1), suffix: String::new() }
    }
}

/// Metadata shared by every named sensor.
#[derive(Debug, Clone)]
pub struct SensorInfo {
    pub name: String,
    pub topic_suffix: String,
    pub unit: String,
    pub print_format: PrintFormat,
    pub groups: BTreeSet<String>,
}

impl SensorInfo {
    pub fn new<I, S>(name: &str, topic_suffix: &str, unit: &str, groups: I) -> Result<Self, SensorError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let groups: BTreeSet<String> = groups.into_iter().map(Into::into).collect();

        if groups.is_empty() {
            return Err(SensorError::NoGroups(name.to_owned()));
        }

        Ok(Self {
            name: name.to_owned(),
            topic_suffix: topic_suffix.to_owned(),
            unit: unit.to_owned(),
            print_format: PrintFormat::default(),
            groups,
        })
    }

    pub fn with_print_format(mut self, template: &str) -> Result<Self, SensorError> {
        self.print_format = PrintFormat::parse(template).ok_or_else(|| SensorError::InvalidFormat {
            name: self.name.clone(),
            format: template.to_owned(),
        })?;

        Ok(self)
    }

    /// A sensor without groups matches every selection.
    pub fn in_any_group(&self, active_groups: &HashSet<String>) -> bool {
        self.groups.is_empty() || self.groups.iter().any(|group| active_groups.contains(group))
    }
}

/// A physical or derived inverter measurement.
pub trait Sensor: Send + Sync {
    fn info(&self) -> &SensorInfo;

    /// Decodes the value from the snapshot, `Ok(None)` when some register was not fetched this cycle.
    fn read_value(&self, registers: &Registers) -> Result<Option<f64>, SensorError>;

    /// Encodes a textual value into the registers that have to be written.
    fn write_value(&self, value: &str) -> Result<RegisterWrites, SensorError>;

    /// Addresses this sensor decodes directly.
    fn registers(&self) -> Vec<Address>;

    fn name(&self) -> &str {
        &self.info().name
    }

    fn topic_suffix(&self) -> &str {
        &self.info().topic_suffix
    }

    fn unit(&self) -> &str {
        &self.info().unit
    }

    fn format_value(&self, value: f64) -> String {
        self.info().print_format.format(value)
    }

    fn in_any_group(&self, active_groups: &HashSet<String>) -> bool {
        self.info().in_any_group(active_groups)
    }

    /// Whether values can be decoded from a register snapshot at all.
    fn supports_read(&self) -> bool {
        true
    }

    /// Whether reading changes internal state, so the sensor must be read once per snapshot.
    fn is_stateful(&self) -> bool {
        false
    }

    /// Sensors read as part of reading this one.
    fn operands(&self) -> Vec<Arc<dyn Sensor>> {
        Vec::new()
    }
}

#[cfg(test)]
pub(crate) fn test_info(name: &str) -> SensorInfo {
    SensorInfo::new(name, name, "", ["test"]).unwrap()
}
