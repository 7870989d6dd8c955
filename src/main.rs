use anyhow::{anyhow, Context, Result};
use inverter2mqtt::{catalog, config, eventloop, mqtt, registers::RegisterRanges};
use paho_mqtt::{AsyncClient, ConnectOptionsBuilder, CreateOptionsBuilder, PersistenceType};
use simplelog::{ColorChoice, TermLogger, TerminalMode};
use std::{fs::File, net::SocketAddr, sync::Arc};
use tokio::{select, sync::mpsc, time::Duration};
use tokio_util::sync::CancellationToken;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let config_path = if cfg!(debug_assertions) {
        "./inverter2mqtt.yaml"
    } else {
        "/etc/inverter2mqtt.yaml"
    };

    let config = File::open(config_path).with_context(|| format!("Failed to open config file {config_path:?}"))?;

    let config: config::Config =
        serde_yaml::from_reader(config).with_context(|| format!("Failed to parse config file {config_path:?}"))?;

    TermLogger::init(
        config.log_level,
        simplelog::Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )
    .context("Failed to initialize logger")?;

    let inverter_conf = &config.inverter;
    let active_groups = inverter_conf.metric_groups.clone();

    let sensors = Arc::new(catalog::builtin_sensors().context("Invalid sensor catalog")?);
    let ranges = RegisterRanges::new(
        &catalog::builtin_ranges().context("Invalid register catalog")?,
        &active_groups,
        inverter_conf.max_range_length,
    )
    .context("Failed to plan register reads")?;

    if ranges.is_empty() {
        log::warn!("No register ranges match metric groups {active_groups:?}");
    }

    for range in &ranges {
        log::info!("Polling {range}");
    }

    let uncovered = sensors.uncovered_registers(&ranges, &active_groups);
    if !uncovered.is_empty() {
        log::warn!("Registers {uncovered:04x?} are used by active sensors but never read");
    }

    let payloads: Vec<_> = sensors
        .active(&active_groups)
        .map(|sensor| {
            mqtt::ConfigPayload::from_sensor(
                &config.client_id,
                inverter_conf,
                sensor.as_ref(),
                sensors.is_writable(sensor.topic_suffix()),
            )
        })
        .collect();

    let mut mqtt_client = AsyncClient::new(
        CreateOptionsBuilder::new()
            .server_uri(format!(
                "tcp://{host}:{port}",
                host = config.broker,
                port = config.broker_port
            ))
            .client_id(&config.client_id)
            .persistence(PersistenceType::None)
            .finalize(),
    )
    .context("Failed to create MQTT client")?;

    let mqtt_stream = mqtt_client.get_stream(128);

    mqtt_client
        .connect(
            ConnectOptionsBuilder::new()
                .automatic_reconnect(Duration::from_secs(2u64.pow(3)), Duration::from_secs(2u64.pow(12)))
                .max_inflight(128)
                .will_message(mqtt::offline_message(&config.client_id))
                .finalize(),
        )
        .await
        .context("Failed to connect to MQTT broker")?;

    mqtt::announce_online(&config.client_id, &mqtt_client)
        .await
        .context("Failed to announce online status")?;

    mqtt::register_devices(&mqtt_client, &payloads)
        .await
        .context("Failed to register devices")?;

    let shutdown = CancellationToken::new();
    let (tx, mut rx) = mpsc::channel(16);
    let (command_tx, command_rx) = mpsc::channel(16);

    let settings = eventloop::PollSettings {
        addr: SocketAddr::new(
            inverter_conf.host.parse().context("Invalid inverter host address")?,
            inverter_conf.port,
        ),
        slave_id: inverter_conf.slave_id,
        polling_delay: Duration::from_millis(inverter_conf.polling_delay_ms),
        request_timeout: Duration::from_millis(inverter_conf.request_timeout_ms),
    };

    tokio::spawn(eventloop::inverter_event_loop(
        settings,
        sensors.clone(),
        active_groups,
        ranges,
        tx.clone(),
        command_rx,
        shutdown.clone(),
    ));

    tokio::spawn(eventloop::mqtt_message_event_loop(mqtt_stream, tx));

    let dev_id = &inverter_conf.device.identifier;

    loop {
        select! {
            _ = tokio::signal::ctrl_c() => {
                shutdown.cancel();
                let _ = mqtt::announce_offline(&config.client_id, &mqtt_client).await;
                break Ok(());
            },
            event = rx.recv() => match event {
                None => break Err(anyhow!("All event sources stopped")),
                Some(eventloop::Message::Readings(readings)) => {
                    for reading in readings {
                        let topic = mqtt::state_topic_for_sensor(&config.client_id, dev_id, &reading.topic_suffix);

                        mqtt::publish_state(&mqtt_client, &topic, &reading.payload)
                            .await
                            .context("Unable to publish state")?;
                    }
                },
                Some(eventloop::Message::MqttEvent(msg)) => {
                    let payload = match std::str::from_utf8(msg.payload()) {
                        Ok(payload) => payload,
                        Err(e) => {
                            log::error!("MQTT payload error: {e}");
                            continue;
                        },
                    };

                    log::info!("MQTT command incoming: topic '{}' payload '{}'", msg.topic(), payload);

                    let Some(sensor) = mqtt::topic_suffix_for_command(&config.client_id, dev_id, msg.topic())
                        .and_then(|suffix| sensors.find_writable(suffix))
                    else {
                        log::error!("MQTT command error: no writable sensor at {}", msg.topic());
                        continue;
                    };

                    let writes = match sensor.write_value(payload) {
                        Ok(writes) => writes,
                        Err(e) => {
                            log::error!("MQTT command error: {e}");
                            continue;
                        },
                    };

                    if command_tx.send(writes).await.is_err() {
                        break Err(anyhow!("Inverter poll loop stopped"));
                    }
                },
            }
        }
    }
}
