use crate::{
    catalog::SensorCatalog,
    inverter::InverterClient,
    registers::RegisterRanges,
    sensor::{RegisterWrites, Registers, Sensor},
};
use std::{collections::HashSet, future::Future, net::SocketAddr, sync::Arc};
use tokio::{
    select,
    sync::mpsc,
    time::{self, Duration},
};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub topic_suffix: String,
    pub payload: String,
}

pub enum Message {
    Readings(Vec<Reading>),
    MqttEvent(paho_mqtt::Message),
}

pub struct PollSettings {
    pub addr: SocketAddr,
    pub slave_id: u8,
    pub polling_delay: Duration,
    pub request_timeout: Duration,
}

impl PollSettings {
    fn timeout_message(&self, operation: &str) -> String {
        format!("Modbus {operation} to {} timed out after {:?}", self.addr, self.request_timeout)
    }
}

/// Evaluates sensors against one snapshot, skipping values not available this cycle.
pub fn evaluate<'a, I>(sensors: I, registers: &Registers) -> Vec<Reading>
where
    I: IntoIterator<Item = &'a Arc<dyn Sensor>>,
{
    sensors
        .into_iter()
        .filter_map(|sensor| match sensor.read_value(registers) {
            Ok(Some(value)) => Some(Reading {
                topic_suffix: sensor.topic_suffix().to_owned(),
                payload: sensor.format_value(value),
            }),
            Ok(None) => {
                log::debug!("No value for {} in this poll cycle", sensor.name());
                None
            },
            Err(e) => {
                log::warn!("Error reading sensor {}: {e}", sensor.name());
                None
            },
        })
        .collect()
}

pub fn mqtt_message_event_loop(
    mqtt_stream: paho_mqtt::AsyncReceiver<Option<paho_mqtt::Message>>,
    tx: mpsc::Sender<Message>,
) -> impl Future<Output = ()> {
    async move {
        loop {
            let Ok(event) = mqtt_stream.recv().await else {
                break;
            };

            match event {
                Some(event) => {
                    if tx.send(Message::MqttEvent(event)).await.is_err() {
                        break;
                    }
                },
                None => log::warn!("Lost connection to MQTT broker"),
            }
        }

        log::info!("Shutting down MQTT client");
    }
}

async fn connect(settings: &PollSettings) -> Option<InverterClient> {
    match time::timeout(
        settings.request_timeout,
        InverterClient::connect(settings.addr, settings.slave_id),
    )
    .await
    {
        Ok(Ok(client)) => Some(client),
        Ok(Err(e)) => {
            log::error!("{e:#}");
            None
        },
        Err(_) => {
            log::error!("Connecting to inverter at {} timed out", settings.addr);
            None
        },
    }
}

pub fn inverter_event_loop(
    settings: PollSettings,
    catalog: Arc<SensorCatalog>,
    active_groups: HashSet<String>,
    ranges: RegisterRanges,
    tx: mpsc::Sender<Message>,
    mut commands: mpsc::Receiver<RegisterWrites>,
    shutdown: CancellationToken,
) -> impl Future<Output = ()> {
    let mut poll_timer = time::interval(settings.polling_delay);
    poll_timer.set_missed_tick_behavior(time::MissedTickBehavior::Skip);

    async move {
        let mut client: Option<InverterClient> = None;

        loop {
            select! {
                _ = shutdown.cancelled() => break,
                _ = poll_timer.tick() => {
                    if client.is_none() {
                        client = connect(&settings).await;
                    }

                    let Some(device) = client.as_mut() else {
                        continue;
                    };

                    match time::timeout(settings.request_timeout, device.read(&ranges)).await {
                        Ok(Ok(registers)) => {
                            let readings = evaluate(catalog.active(&active_groups), &registers);

                            if tx.send(Message::Readings(readings)).await.is_err() {
                                break;
                            }
                        },
                        Ok(Err(e)) => {
                            log::error!("Unable to read from inverter: {e:#}");
                            client = None;
                        },
                        Err(_) => {
                            log::error!("{}", settings.timeout_message("request"));
                            client = None;
                        },
                    }
                },
                Some(writes) = commands.recv() => {
                    if client.is_none() {
                        client = connect(&settings).await;
                    }

                    let Some(device) = client.as_mut() else {
                        log::error!("Dropping register write, inverter not connected");
                        continue;
                    };

                    match time::timeout(settings.request_timeout, device.write(&writes)).await {
                        Ok(Ok(())) => poll_timer.reset_immediately(),
                        Ok(Err(e)) => {
                            log::error!("Unable to write to inverter: {e:#}");
                            client = None;
                        },
                        Err(_) => {
                            log::error!("{}", settings.timeout_message("write"));
                            client = None;
                        },
                    }
                },
            }
        }

        log::info!("Shutting down poll loop for {}", settings.addr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::{AggregatedValueSensor, ComputedSumSensor, RegisterSensor, SensorInfo};

    fn info(suffix: &str) -> SensorInfo {
        SensorInfo::new(suffix, suffix, "V", ["g"]).unwrap()
    }

    #[test]
    fn evaluate_skips_absent_and_failing_sensors() {
        let voltage: Arc<dyn Sensor> = Arc::new(RegisterSensor::single_register(info("voltage"), 1, 0.1));
        let missing: Arc<dyn Sensor> = Arc::new(RegisterSensor::single_register(info("missing"), 2, 0.1));
        let sum: Arc<dyn Sensor> =
            Arc::new(ComputedSumSensor::new(info("sum"), vec![voltage.clone(), missing.clone()]));
        let aggregated: Arc<dyn Sensor> = Arc::new(AggregatedValueSensor::new(info("aggregated")));

        let registers: Registers = [(1, 2305u16.to_be_bytes())].into();
        let sensors = [voltage, missing, sum, aggregated];

        assert_eq!(
            evaluate(&sensors, &registers),
            vec![Reading { topic_suffix: "voltage".to_owned(), payload: "230.5".to_owned() }]
        );
    }

    #[test]
    fn timeout_message_names_configured_timeout() {
        let settings = PollSettings {
            addr: "192.168.1.20:502".parse().unwrap(),
            slave_id: 1,
            polling_delay: Duration::from_secs(10),
            request_timeout: Duration::from_millis(1500),
        };

        assert_eq!(
            settings.timeout_message("request"),
            "Modbus request to 192.168.1.20:502 timed out after 1.5s"
        );
    }
}
