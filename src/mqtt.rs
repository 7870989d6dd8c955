use paho_mqtt::{AsyncClient, Message, QOS_1 as QOS_AT_LEAST_ONCE};
use serde::Serialize;

use crate::{
    config::{self, Identifier},
    sensor::Sensor,
};

const MQTT_DISCOVERY_TOPIC: &str = "homeassistant";
const COMMAND_TOPIC_SUFFIX: &str = "/command";

fn mqtt_avail_topic(client_id: &str) -> String {
    format!("{client_id}/bridge/state")
}

pub async fn register_devices(client: &AsyncClient, payloads: &[ConfigPayload]) -> anyhow::Result<()> {
    for payload in payloads {
        let json = serde_json::to_string(payload)?;
        log::debug!("MQTT publish: topic '{}' payload '{json}'", payload.config_topic);

        client
            .publish(Message::new_retained(&payload.config_topic, json, QOS_AT_LEAST_ONCE))
            .await?;

        if let DeviceSpecificConfig::Number { command_topic, .. } = &payload.specific {
            client.subscribe(command_topic, QOS_AT_LEAST_ONCE).await?;
        }
    }

    Ok(())
}

pub async fn announce_online(client_id: &str, client: &AsyncClient) -> anyhow::Result<()> {
    client
        .publish(Message::new_retained(
            mqtt_avail_topic(client_id),
            b"online".to_owned(),
            QOS_AT_LEAST_ONCE,
        ))
        .await?;
    Ok(())
}

pub fn offline_message(client_id: &str) -> Message {
    Message::new_retained(mqtt_avail_topic(client_id), "offline".to_owned(), QOS_AT_LEAST_ONCE)
}

pub async fn announce_offline(client_id: &str, client: &AsyncClient) -> anyhow::Result<()> {
    client.publish(offline_message(client_id)).await?;
    Ok(())
}

pub async fn publish_state(client: &AsyncClient, topic: &str, payload: &str) -> anyhow::Result<()> {
    log::debug!("MQTT publish topic: '{topic}' payload: '{payload}'");

    client
        .publish(Message::new(topic, payload.as_bytes().to_vec(), QOS_AT_LEAST_ONCE))
        .await?;

    Ok(())
}

pub fn state_topic_for_sensor(client_id: &str, dev_id: &Identifier, topic_suffix: &str) -> String {
    format!("{client_id}/{dev_id}/{topic_suffix}", dev_id = dev_id.0)
}

pub fn command_topic_for_sensor(client_id: &str, dev_id: &Identifier, topic_suffix: &str) -> String {
    state_topic_for_sensor(client_id, dev_id, topic_suffix) + COMMAND_TOPIC_SUFFIX
}

/// Recovers the sensor topic suffix addressed by a command topic of this device.
pub fn topic_suffix_for_command<'a>(client_id: &str, dev_id: &Identifier, topic: &'a str) -> Option<&'a str> {
    topic
        .strip_prefix(client_id)?
        .strip_prefix('/')?
        .strip_prefix(dev_id.0.as_str())?
        .strip_prefix('/')?
        .strip_suffix(COMMAND_TOPIC_SUFFIX)
        .filter(|suffix| !suffix.is_empty())
}

#[derive(Serialize, Debug, Clone)]
pub struct AvailabilityPayload {
    topic: String,
}

#[derive(Serialize, Debug, Default, Clone)]
pub struct DevicePayload {
    name: String,
    identifiers: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    manufacturer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sw_version: Option<String>,
}

#[derive(Serialize, Debug, Copy, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StateClass {
    Measurement,
    TotalIncreasing,
}

#[derive(Serialize, Debug, Copy, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    Battery,
    Current,
    Energy,
    Frequency,
    Power,
    Temperature,
    Voltage,
}

impl DeviceClass {
    fn from_unit(unit: &str) -> Option<Self> {
        match unit {
            "%" => Some(DeviceClass::Battery),
            "A" => Some(DeviceClass::Current),
            "kWh" | "Wh" => Some(DeviceClass::Energy),
            "Hz" => Some(DeviceClass::Frequency),
            "W" | "kW" => Some(DeviceClass::Power),
            "°C" => Some(DeviceClass::Temperature),
            "V" => Some(DeviceClass::Voltage),
            _ => None,
        }
    }
}

#[derive(Serialize, Debug, Clone)]
#[serde(untagged)]
pub enum DeviceSpecificConfig {
    Number {
        state_topic: String,
        command_topic: String,

        #[serde(skip_serializing_if = "Option::is_none")]
        unit_of_measurement: Option<String>,
    },
    Sensor {
        state_topic: String,
        state_class: StateClass,

        #[serde(skip_serializing_if = "Option::is_none")]
        unit_of_measurement: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        device_class: Option<DeviceClass>,
    },
}

#[derive(Serialize, Debug, Clone)]
pub struct ConfigPayload {
    pub name: String,
    pub unique_id: String,
    pub availability: Vec<AvailabilityPayload>,
    pub device: DevicePayload,
    pub config_topic: String,

    #[serde(flatten)]
    pub specific: DeviceSpecificConfig,
}

impl ConfigPayload {
    pub fn from_sensor(client_id: &str, conf: &config::InverterConfig, sensor: &dyn Sensor, writable: bool) -> Self {
        let dev_id = &conf.device.identifier;
        let state_topic = state_topic_for_sensor(client_id, dev_id, sensor.topic_suffix());
        let unit_of_measurement = Some(sensor.unit().to_owned()).filter(|unit| !unit.is_empty());

        let object_id = sensor.topic_suffix().replace('/', "_");
        let unique_id = format!("{client_id}_{dev_id}_{object_id}", dev_id = dev_id.0);

        let (component, specific) = if writable {
            (
                "number",
                DeviceSpecificConfig::Number {
                    command_topic: command_topic_for_sensor(client_id, dev_id, sensor.topic_suffix()),
                    state_topic,
                    unit_of_measurement,
                },
            )
        } else {
            let device_class = DeviceClass::from_unit(sensor.unit());

            (
                "sensor",
                DeviceSpecificConfig::Sensor {
                    state_topic,
                    state_class: match device_class {
                        Some(DeviceClass::Energy) => StateClass::TotalIncreasing,
                        _ => StateClass::Measurement,
                    },
                    unit_of_measurement,
                    device_class,
                },
            )
        };

        Self {
            config_topic: format!("{MQTT_DISCOVERY_TOPIC}/{component}/{unique_id}/config"),
            unique_id,
            availability: vec![AvailabilityPayload { topic: mqtt_avail_topic(client_id) }],
            device: DevicePayload {
                name: conf.name.clone(),
                identifiers: vec![dev_id.0.clone()],
                manufacturer: conf.device.manufacturer.clone(),
                model: conf.device.model.clone(),
                sw_version: conf.device.sw_version.clone(),
            },
            name: format!("{} {}", conf.name, sensor.name()),
            specific,
        }
    }
}
