use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::obis_utils::ObisCode;

/// Semantic kind of a register reading
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MeterDataPointType {
    ActivePowerP,
    ActivePowerN,
    ActiveEnergyPTotal,
    ActiveEnergyPT1,
    ActiveEnergyPT2,
    ActiveEnergyNTotal,
    ActiveEnergyNT1,
    ActiveEnergyNT2,
    ReactivePowerP,
    ReactivePowerN,
    ReactiveEnergyPTotal,
    ReactiveEnergyPT1,
    ReactiveEnergyPT2,
    ReactiveEnergyNTotal,
    ReactiveEnergyNT1,
    ReactiveEnergyNT2,
}

impl MeterDataPointType {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "ACTIVE_POWER_P" => Some(MeterDataPointType::ActivePowerP),
            "ACTIVE_POWER_N" => Some(MeterDataPointType::ActivePowerN),
            "ACTIVE_ENERGY_P_TOTAL" => Some(MeterDataPointType::ActiveEnergyPTotal),
            "ACTIVE_ENERGY_P_T1" => Some(MeterDataPointType::ActiveEnergyPT1),
            "ACTIVE_ENERGY_P_T2" => Some(MeterDataPointType::ActiveEnergyPT2),
            "ACTIVE_ENERGY_N_TOTAL" => Some(MeterDataPointType::ActiveEnergyNTotal),
            "ACTIVE_ENERGY_N_T1" => Some(MeterDataPointType::ActiveEnergyNT1),
            "ACTIVE_ENERGY_N_T2" => Some(MeterDataPointType::ActiveEnergyNT2),
            "REACTIVE_POWER_P" => Some(MeterDataPointType::ReactivePowerP),
            "REACTIVE_POWER_N" => Some(MeterDataPointType::ReactivePowerN),
            "REACTIVE_ENERGY_P_TOTAL" => Some(MeterDataPointType::ReactiveEnergyPTotal),
            "REACTIVE_ENERGY_P_T1" => Some(MeterDataPointType::ReactiveEnergyPT1),
            "REACTIVE_ENERGY_P_T2" => Some(MeterDataPointType::ReactiveEnergyPT2),
            "REACTIVE_ENERGY_N_TOTAL" => Some(MeterDataPointType::ReactiveEnergyNTotal),
            "REACTIVE_ENERGY_N_T1" => Some(MeterDataPointType::ReactiveEnergyNT1),
            "REACTIVE_ENERGY_N_T2" => Some(MeterDataPointType::ReactiveEnergyNT2),
            _ => None,
        }
    }

    pub fn identifier(&self) -> &'static str {
        match self {
            MeterDataPointType::ActivePowerP => "ACTIVE_POWER_P",
            MeterDataPointType::ActivePowerN => "ACTIVE_POWER_N",
            MeterDataPointType::ActiveEnergyPTotal => "ACTIVE_ENERGY_P_TOTAL",
            MeterDataPointType::ActiveEnergyPT1 => "ACTIVE_ENERGY_P_T1",
            MeterDataPointType::ActiveEnergyPT2 => "ACTIVE_ENERGY_P_T2",
            MeterDataPointType::ActiveEnergyNTotal => "ACTIVE_ENERGY_N_TOTAL",
            MeterDataPointType::ActiveEnergyNT1 => "ACTIVE_ENERGY_N_T1",
            MeterDataPointType::ActiveEnergyNT2 => "ACTIVE_ENERGY_N_T2",
            MeterDataPointType::ReactivePowerP => "REACTIVE_POWER_P",
            MeterDataPointType::ReactivePowerN => "REACTIVE_POWER_N",
            MeterDataPointType::ReactiveEnergyPTotal => "REACTIVE_ENERGY_P_TOTAL",
            MeterDataPointType::ReactiveEnergyPT1 => "REACTIVE_ENERGY_P_T1",
            MeterDataPointType::ReactiveEnergyPT2 => "REACTIVE_ENERGY_P_T2",
            MeterDataPointType::ReactiveEnergyNTotal => "REACTIVE_ENERGY_N_TOTAL",
            MeterDataPointType::ReactiveEnergyNT1 => "REACTIVE_ENERGY_N_T1",
            MeterDataPointType::ReactiveEnergyNT2 => "REACTIVE_ENERGY_N_T2",
        }
    }

    /// Physical unit of the value once the catalog scaling has been applied
    pub fn unit(&self) -> &'static str {
        match self {
            MeterDataPointType::ActivePowerP | MeterDataPointType::ActivePowerN => "kW",
            MeterDataPointType::ActiveEnergyPTotal
            | MeterDataPointType::ActiveEnergyPT1
            | MeterDataPointType::ActiveEnergyPT2
            | MeterDataPointType::ActiveEnergyNTotal
            | MeterDataPointType::ActiveEnergyNT1
            | MeterDataPointType::ActiveEnergyNT2 => "kWh",
            MeterDataPointType::ReactivePowerP | MeterDataPointType::ReactivePowerN => "kvar",
            MeterDataPointType::ReactiveEnergyPTotal
            | MeterDataPointType::ReactiveEnergyPT1
            | MeterDataPointType::ReactiveEnergyPT2
            | MeterDataPointType::ReactiveEnergyNTotal
            | MeterDataPointType::ReactiveEnergyNT1
            | MeterDataPointType::ReactiveEnergyNT2 => "kvarh",
        }
    }
}

impl fmt::Display for MeterDataPointType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.identifier())
    }
}

/// Catalog entry mapping a register to its semantic type and scaling
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RegisterDescriptor {
    pub obis: ObisCode,
    #[serde(rename = "type")]
    pub data_point_type: MeterDataPointType,
    #[serde(default = "register_scaling_default")]
    pub scaling: f64,
}

fn register_scaling_default() -> f64 { 1.0 }

/// One reading handed to the sinks
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MeterDataPoint {
    #[serde(rename = "type")]
    pub data_point_type: MeterDataPointType,
    pub value: f64,
    pub meter_id: String,
    pub timestamp: NaiveDateTime,
}

impl MeterDataPoint {
    pub fn new(data_point_type: MeterDataPointType, value: f64, meter_id: &str, timestamp: NaiveDateTime) -> Self {
        MeterDataPoint {
            data_point_type,
            value,
            meter_id: meter_id.to_string(),
            timestamp,
        }
    }
}

impl fmt::Display for MeterDataPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}] {}: {} {}", self.meter_id, self.timestamp, self.data_point_type, self.value, self.data_point_type.unit())
    }
}
