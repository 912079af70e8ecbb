use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::metering_dlms::buffer::HDLC_BUFFER_MAX_SIZE;
use crate::metering_dlms::meter_definitions::{e450_push_sequence, e450_registers, METER_ID_OBIS};
use crate::metering_dlms::structs::DecoderKind;
use crate::models::RegisterDescriptor;
use crate::obis_utils::ObisCode;

pub const CONFIG_ENV: &str = "SM2M_CONFIG";
const CONFIG_PATHS: [&str; 2] = ["config/smartmeter.yaml", "smartmeter.yaml"];

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unable to read config {path}: {source}")]
    Io { path: String, source: std::io::Error },
    #[error("Unable to parse config: {0}")]
    Parse(#[from] serde_yml::Error),
    #[error("No config file found, tried {0:?}")]
    NotFound(Vec<String>),
    #[error("Invalid config: {0}")]
    Invalid(String),
    #[error("Push sequence register {0} has no entry in registers")]
    UnknownRegister(ObisCode),
    #[error("{0} needs an mqtt section")]
    MqttMissing(&'static str),
}

fn mqtt_port_default() -> u16 { return 1883 }
fn mqtt_client_name_default() -> String { return "smartmeter2mqtt".to_string() }
fn mqtt_base_topic_default() -> String { return "smartmeter".to_string() }

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct MqttConfig {
    pub host: String,
    #[serde(default="mqtt_port_default")]
    pub port: u16,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub pass: String,
    #[serde(default="mqtt_client_name_default")]
    pub client_name: String,
    #[serde(default="mqtt_base_topic_default")]
    pub base_topic: String,
}

fn input_topic_default() -> String { return "dlms_input".to_string() }
fn input_reconnect_default() -> u64 { return 5 }

/// Where the raw meter bytes come from
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputConfig {
    /// Hex strings published below the MQTT base topic
    Mqtt {
        #[serde(default="input_topic_default")]
        topic: String,
    },
    /// Raw byte stream, e.g. ser2net in raw mode
    Tcp {
        host: String,
        port: u16,
        #[serde(default="input_reconnect_default")]
        reconnect_secs: u64,
    },
}

fn meter_id_default() -> String { return "e450".to_string() }
fn meter_buffer_max_size_default() -> usize { return HDLC_BUFFER_MAX_SIZE }
fn meter_decoder_default() -> DecoderKind { return DecoderKind::PushSequence }
fn meter_input_default() -> InputConfig { return InputConfig::Mqtt { topic: input_topic_default() } }
fn meter_push_sequence_default() -> Vec<ObisCode> { return e450_push_sequence().registers().to_vec() }
fn meter_id_register_default() -> ObisCode { return METER_ID_OBIS }

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct MeterConfig {
    #[serde(default="meter_id_default")]
    pub id: String,
    #[serde(default="meter_buffer_max_size_default")]
    pub buffer_max_size: usize,
    #[serde(default="meter_decoder_default")]
    pub decoder: DecoderKind,
    #[serde(default="meter_input_default")]
    pub input: InputConfig,
    #[serde(default="meter_push_sequence_default")]
    pub push_sequence: Vec<ObisCode>,
    #[serde(default="meter_id_register_default")]
    pub id_register: ObisCode,
}

impl Default for MeterConfig {
    fn default() -> Self {
        MeterConfig {
            id: meter_id_default(),
            buffer_max_size: meter_buffer_max_size_default(),
            decoder: meter_decoder_default(),
            input: meter_input_default(),
            push_sequence: meter_push_sequence_default(),
            id_register: meter_id_register_default(),
        }
    }
}

fn volkszaehler_url_default() -> String { return "http://127.0.0.1/api/data".to_string() }
fn volkszaehler_value_divisor_default() -> f64 { return 1000.0 }
fn volkszaehler_timeout_default() -> u64 { return 10 }

/// HTTP push of consumed/supplied active power to a Volkszaehler middleware
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct VolkszaehlerConfig {
    #[serde(default="volkszaehler_url_default")]
    pub url: String,
    pub consumed_uuid: String,
    pub supplied_uuid: String,
    /// Data point values are divided by this before sending
    #[serde(default="volkszaehler_value_divisor_default")]
    pub value_divisor: f64,
    #[serde(default="volkszaehler_timeout_default")]
    pub timeout_secs: u64,
}

fn sinks_logger_default() -> bool { return true }
fn sinks_logger_name_default() -> String { return "DataLogger".to_string() }
fn sinks_mqtt_default() -> bool { return true }

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SinksConfig {
    #[serde(default="sinks_logger_default")]
    pub logger: bool,
    #[serde(default="sinks_logger_name_default")]
    pub logger_name: String,
    #[serde(default="sinks_mqtt_default")]
    pub mqtt: bool,
    #[serde(default)]
    pub volkszaehler: Option<VolkszaehlerConfig>,
}

impl Default for SinksConfig {
    fn default() -> Self {
        SinksConfig {
            logger: sinks_logger_default(),
            logger_name: sinks_logger_name_default(),
            mqtt: sinks_mqtt_default(),
            volkszaehler: None,
        }
    }
}

fn registers_default() -> Vec<RegisterDescriptor> { return e450_registers() }

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Config {
    pub mqtt: Option<MqttConfig>,
    #[serde(default)]
    pub meter: MeterConfig,
    #[serde(default="registers_default")]
    pub registers: Vec<RegisterDescriptor>,
    #[serde(default)]
    pub sinks: SinksConfig,
}

impl Config {
    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_yaml(&contents)?;
        info!("Config loaded from {}", path.display());
        Ok(config)
    }

    /// `$SM2M_CONFIG` if set, otherwise the first existing default location
    pub fn load_default() -> Result<Self, ConfigError> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Self::load(Path::new(&path));
        }

        let candidates: Vec<PathBuf> = CONFIG_PATHS.iter().map(PathBuf::from).collect();
        match candidates.iter().find(|p| p.exists()) {
            Some(path) => Self::load(path),
            None => Err(ConfigError::NotFound(CONFIG_PATHS.iter().map(|p| p.to_string()).collect())),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.meter.buffer_max_size == 0 {
            return Err(ConfigError::Invalid("meter.buffer_max_size must be greater than 0".to_string()));
        }
        if self.meter.id.trim().is_empty() {
            return Err(ConfigError::Invalid("meter.id must not be empty".to_string()));
        }
        if self.registers.is_empty() {
            return Err(ConfigError::Invalid("registers must not be empty".to_string()));
        }

        if self.meter.decoder == DecoderKind::PushSequence {
            if self.meter.push_sequence.is_empty() {
                return Err(ConfigError::Invalid("meter.push_sequence must not be empty".to_string()));
            }
            let known: HashSet<ObisCode> = self.registers.iter().map(|r| r.obis).collect();
            if let Some(unknown) = self.meter.push_sequence.iter().find(|obis| !known.contains(obis)) {
                return Err(ConfigError::UnknownRegister(*unknown));
            }
        }

        if let Some(bad) = self.registers.iter().find(|r| !r.scaling.is_finite()) {
            return Err(ConfigError::Invalid(format!("scaling of {} is not a finite number", bad.obis)));
        }

        if let Some(vz) = &self.sinks.volkszaehler {
            if !vz.url.starts_with("http://") && !vz.url.starts_with("https://") {
                return Err(ConfigError::Invalid(format!("sinks.volkszaehler.url '{}' is not an http(s) URL", vz.url)));
            }
            if vz.consumed_uuid.trim().is_empty() || vz.supplied_uuid.trim().is_empty() {
                return Err(ConfigError::Invalid("sinks.volkszaehler needs both channel UUIDs".to_string()));
            }
            if !vz.value_divisor.is_normal() {
                return Err(ConfigError::Invalid("sinks.volkszaehler.value_divisor must be a non-zero number".to_string()));
            }
        }

        if self.mqtt.is_none() {
            if self.sinks.mqtt {
                return Err(ConfigError::MqttMissing("sinks.mqtt"));
            }
            if matches!(self.meter.input, InputConfig::Mqtt { .. }) {
                return Err(ConfigError::MqttMissing("meter.input of type mqtt"));
            }
        }

        debug!("Config valid: {} registers, decoder {:?}", self.registers.len(), self.meter.decoder);
        Ok(())
    }
}
