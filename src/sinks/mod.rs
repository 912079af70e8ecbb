use chrono::NaiveDateTime;
use log::debug;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::Sender;

use crate::models::MeterDataPoint;
use crate::mqtt::{PublishData, Transmission};

pub mod volkszaehler;

pub use volkszaehler::{VolkszaehlerManager, VolkszaehlerSink};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SinkError {
    #[error("Sink queue is full, data point dropped")]
    QueueFull,
    #[error("Sink queue closed")]
    Closed,
    #[error("Could not serialize data point: {0}")]
    Serialize(String),
    #[error("HTTP client error: {0}")]
    Http(String),
}

/// Receiver of decoded data points.
///
/// `send` is called from the decode task and must not block; sinks doing
/// I/O hand the point over to a queue. Duplicate deliveries are acceptable.
pub trait DataSink: Send + Sync {
    fn send(&self, point: &MeterDataPoint) -> Result<(), SinkError>;
    fn name(&self) -> &'static str;
}

/// Writes every data point to the log at debug level
pub struct LoggerSink {
    target: String,
}

impl LoggerSink {
    pub fn new(target: &str) -> Self {
        LoggerSink { target: target.to_string() }
    }
}

impl DataSink for LoggerSink {
    fn send(&self, point: &MeterDataPoint) -> Result<(), SinkError> {
        debug!(target: self.target.as_str(), "{}", point);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "logger"
    }
}

#[derive(Serialize)]
struct MqttPayload<'a> {
    value: f64,
    unit: &'static str,
    timestamp: NaiveDateTime,
    meter_id: &'a str,
}

/// Publishes data points as JSON to `<base_topic>/<meter_id>/<type>`
pub struct MqttSink {
    sender: Sender<Transmission>,
    base_topic: String,
}

impl MqttSink {
    pub fn new(sender: Sender<Transmission>, base_topic: &str) -> Self {
        MqttSink { sender, base_topic: base_topic.trim_end_matches('/').to_string() }
    }

    pub fn topic_for(&self, point: &MeterDataPoint) -> String {
        format!("{}/{}/{}", self.base_topic, point.meter_id, point.data_point_type.identifier().to_lowercase())
    }
}

impl DataSink for MqttSink {
    fn send(&self, point: &MeterDataPoint) -> Result<(), SinkError> {
        let payload = serde_json::to_string(&MqttPayload {
            value: point.value,
            unit: point.data_point_type.unit(),
            timestamp: point.timestamp,
            meter_id: &point.meter_id,
        })
        .map_err(|e| SinkError::Serialize(e.to_string()))?;

        let publish = PublishData { topic: self.topic_for(point), payload, qos: 1, retain: false };
        self.sender.try_send(Transmission::Publish(publish)).map_err(|e| match e {
            TrySendError::Full(_) => SinkError::QueueFull,
            TrySendError::Closed(_) => SinkError::Closed,
        })
    }

    fn name(&self) -> &'static str {
        "mqtt"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MeterDataPointType;
    use chrono::NaiveDate;

    fn point() -> MeterDataPoint {
        let ts = NaiveDate::from_ymd_opt(2022, 3, 1).unwrap().and_hms_opt(12, 0, 0).unwrap();
        MeterDataPoint::new(MeterDataPointType::ActivePowerP, 1.5, "e450", ts)
    }

    #[test]
    fn test_logger_sink_accepts_everything() {
        assert!(LoggerSink::new("DataLogger").send(&point()).is_ok());
    }

    #[tokio::test]
    async fn test_mqtt_sink_publishes_json() {
        let (sender, mut receiver) = tokio::sync::mpsc::channel(4);
        let sink = MqttSink::new(sender, "smartmeter/");
        sink.send(&point()).unwrap();

        let Some(Transmission::Publish(data)) = receiver.recv().await else {
            panic!("expected a publish");
        };
        assert_eq!(data.topic, "smartmeter/e450/active_power_p");
        let json: serde_json::Value = serde_json::from_str(&data.payload).unwrap();
        assert_eq!(json["value"], 1.5);
        assert_eq!(json["unit"], "kW");
        assert_eq!(json["meter_id"], "e450");
        assert_eq!(json["timestamp"], "2022-03-01T12:00:00");
    }

    #[test]
    fn test_mqtt_sink_never_blocks() {
        let (sender, receiver) = tokio::sync::mpsc::channel(1);
        let sink = MqttSink::new(sender, "smartmeter");
        assert!(sink.send(&point()).is_ok());
        assert_eq!(sink.send(&point()), Err(SinkError::QueueFull));
        drop(receiver);
        assert_eq!(sink.send(&point()), Err(SinkError::Closed));
    }
}
