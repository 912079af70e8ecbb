//! Smart meter data collector
//!
//! Reads DLMS/COSEM push notifications sent over HDLC by utility meters,
//! decodes them into typed data points and hands those to sinks (log, MQTT).

pub mod config;
pub mod events;
pub mod metering_dlms;
pub mod models;
pub mod mqtt;
pub mod obis_utils;
pub mod sinks;
pub mod transport;

// Re-export common types for easier access
pub use config::Config;
pub use events::{EventSink, LogEventSink, MeterEvent};
pub use metering_dlms::{DlmsManager, FrameDecoder, MeterReader};
pub use models::{MeterDataPoint, MeterDataPointType, RegisterDescriptor};
pub use mqtt::MqttManager;
pub use obis_utils::ObisCode;
pub use sinks::{DataSink, LoggerSink, MqttSink};
