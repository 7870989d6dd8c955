use crate::registers::MAX_RANGE_LENGTH;
use lazy_static::lazy_static;
use log::LevelFilter;
use serde::{de::Error, Deserialize, Deserializer, Serialize};
use std::collections::HashSet;

lazy_static! {
    static ref IDENTIFIER_REGEX: regex::Regex = regex::Regex::new("^[a-zA-Z0-9_]+$").unwrap();
}

const fn default_mqtt_port() -> u16 {
    1883
}
const fn default_modbus_port() -> u16 {
    502
}
const fn default_slave_id() -> u8 {
    1
}
const fn default_polling_delay_ms() -> u64 {
    60_000
}
const fn default_request_timeout_ms() -> u64 {
    5_000
}
const fn default_max_range_length() -> u16 {
    MAX_RANGE_LENGTH
}
const fn default_log_level() -> LevelFilter {
    LevelFilter::Info
}
fn default_client_id() -> String {
    "inverter2mqtt_bridge".to_owned()
}

#[derive(Deserialize, Debug)]
pub struct Config {
    #[serde(default = "default_client_id")]
    pub client_id: String,

    pub broker: String,

    #[serde(default = "default_mqtt_port")]
    pub broker_port: u16,

    #[serde(default = "default_log_level")]
    pub log_level: LevelFilter,

    pub inverter: InverterConfig,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Identifier(pub String);

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Device {
    pub identifier: Identifier,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub sw_version: Option<String>,
}

impl<'de> Deserialize<'de> for Identifier {
    fn deserialize<D>(de: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let id = String::deserialize(de)?;

        if IDENTIFIER_REGEX.is_match(&id) {
            Ok(Identifier(id))
        } else {
            Err(Error::custom("identifier must match [a-zA-Z0-9_]+"))
        }
    }
}

#[derive(Deserialize, Debug)]
pub struct InverterConfig {
    pub name: String,
    pub device: Device,
    pub host: String,

    #[serde(default = "default_modbus_port")]
    pub port: u16,

    #[serde(default = "default_slave_id")]
    pub slave_id: u8,

    #[serde(default = "default_polling_delay_ms")]
    pub polling_delay_ms: u64,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default = "default_max_range_length", deserialize_with = "deserialize_range_length")]
    pub max_range_length: u16,

    #[serde(deserialize_with = "deserialize_metric_groups")]
    pub metric_groups: HashSet<String>,
}

fn deserialize_range_length<'de, D>(de: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    match u16::deserialize(de)? {
        len @ 1..=MAX_RANGE_LENGTH => Ok(len),
        _ => Err(Error::custom(format!(
            "max_range_length must be between 1 and {MAX_RANGE_LENGTH}"
        ))),
    }
}

fn deserialize_metric_groups<'de, D>(de: D) -> Result<HashSet<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let groups = HashSet::<String>::deserialize(de)?;

    if groups.is_empty() {
        Err(Error::custom("at least one metric group must be enabled"))
    } else {
        Ok(groups)
    }
}
