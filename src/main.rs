use smartmeter2mqtt::{
    config::{Config, ConfigError, InputConfig},
    sinks::VolkszaehlerManager,
    transport::{MqttHexInput, TcpSource},
    DataSink, DlmsManager, EventSink, LogEventSink, LoggerSink, MeterReader, MqttManager, MqttSink,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use log::{error, info};


#[tokio::main]
async fn main() -> Result<(), ConfigError> {
    // Initialize logging
    let default_filter = std::env::var("SM2M_LOG_LEVEL").unwrap_or("info".to_string());
    env_logger::init_from_env(env_logger::Env::new().default_filter_or(default_filter));

    let config = match Config::load_default() {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            return Err(e);
        }
    };

    let mut threads: Vec<JoinHandle<()>> = Vec::new();
    let events: Arc<dyn EventSink> = Arc::new(LogEventSink);

    // MQTT is optional, a TCP input with logger sink works without a broker
    let mqtt_sender = match &config.mqtt {
        Some(mqtt_config) => {
            let (mut mqtt, tx) = MqttManager::new(mqtt_config);
            threads.push(tokio::spawn(async move {
                mqtt.start_thread().await;
            }));
            Some(tx)
        }
        None => None,
    };

    let mut sinks: Vec<Box<dyn DataSink>> = Vec::new();
    if config.sinks.logger {
        sinks.push(Box::new(LoggerSink::new(&config.sinks.logger_name)));
    }
    if config.sinks.mqtt {
        match (&mqtt_sender, &config.mqtt) {
            (Some(tx), Some(mqtt_config)) => sinks.push(Box::new(MqttSink::new(tx.clone(), &mqtt_config.base_topic))),
            _ => return Err(ConfigError::MqttMissing("sinks.mqtt")),
        }
    }
    if let Some(vz_config) = &config.sinks.volkszaehler {
        let (mut vz, sink) = VolkszaehlerManager::new(vz_config).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        sinks.push(Box::new(sink));
        threads.push(tokio::spawn(async move {
            vz.start_thread().await;
        }));
    }

    // All inputs funnel into one channel, the DLMS task is the only reader
    let (byte_tx, byte_rx) = tokio::sync::mpsc::channel(100);
    match &config.meter.input {
        InputConfig::Mqtt { topic } => {
            let Some(tx) = mqtt_sender.clone() else {
                return Err(ConfigError::MqttMissing("meter.input of type mqtt"));
            };
            let mut input = MqttHexInput::new(tx, topic, byte_tx);
            threads.push(tokio::spawn(async move {
                input.start_thread().await;
            }));
        }
        InputConfig::Tcp { host, port, reconnect_secs } => {
            let mut input = TcpSource::new(host, *port, *reconnect_secs, byte_tx);
            threads.push(tokio::spawn(async move {
                input.start_thread().await;
            }));
        }
    }

    let reader = MeterReader::from_config(&config.meter, &config.registers, events);
    let mut dlms = DlmsManager::new(reader, sinks);
    threads.push(tokio::spawn(async move {
        dlms.start_thread(byte_rx).await;
    }));

    info!("All modules started, now waiting for a signal to exit");
    loop {
        tokio::time::sleep(Duration::from_secs(10)).await;

        if threads.iter().any(|task| task.is_finished()) {
            error!("A module stopped, shutting down");
            for task in threads.iter_mut() {
                task.abort();
            }
            break;
        }
    }
    Ok(())
}
