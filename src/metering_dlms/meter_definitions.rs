use crate::models::{MeterDataPointType, RegisterDescriptor};
use crate::obis_utils::ObisCode;

use super::structs::PushSequence;

/// Serial number register, used as meter id when a meter pushes it
pub const METER_ID_OBIS: ObisCode = ObisCode::new(0, 0, 96, 1, 0, 255);
pub const CLOCK_OBIS: ObisCode = ObisCode::new(0, 0, 1, 0, 0, 255);

/// Registers are reported in W/Wh (var/varh); the catalog converts to k-units
const TO_KILO: f64 = 0.001;

/// Order in which a Landis+Gyr E450 pushes its registers after the timestamp
pub fn e450_push_sequence() -> PushSequence {
    PushSequence::new(
        e450_registers()
            .iter()
            .map(|descriptor| descriptor.obis)
            .collect(),
    )
}

pub fn e450_registers() -> Vec<RegisterDescriptor> {
    let register = |obis: ObisCode, data_point_type: MeterDataPointType| RegisterDescriptor {
        obis,
        data_point_type,
        scaling: TO_KILO,
    };

    vec![
        register(ObisCode::new(1, 0, 1, 8, 0, 255), MeterDataPointType::ActiveEnergyPTotal),
        register(ObisCode::new(1, 0, 1, 8, 1, 255), MeterDataPointType::ActiveEnergyPT1),
        register(ObisCode::new(1, 0, 1, 8, 2, 255), MeterDataPointType::ActiveEnergyPT2),
        register(ObisCode::new(1, 0, 1, 7, 0, 255), MeterDataPointType::ActivePowerP),
        register(ObisCode::new(1, 0, 2, 8, 0, 255), MeterDataPointType::ActiveEnergyNTotal),
        register(ObisCode::new(1, 0, 2, 8, 1, 255), MeterDataPointType::ActiveEnergyNT1),
        register(ObisCode::new(1, 0, 2, 8, 2, 255), MeterDataPointType::ActiveEnergyNT2),
        register(ObisCode::new(1, 0, 2, 7, 0, 255), MeterDataPointType::ActivePowerN),
        register(ObisCode::new(1, 0, 3, 8, 0, 255), MeterDataPointType::ReactiveEnergyPTotal),
        register(ObisCode::new(1, 0, 3, 8, 1, 255), MeterDataPointType::ReactiveEnergyPT1),
        register(ObisCode::new(1, 0, 3, 8, 2, 255), MeterDataPointType::ReactiveEnergyPT2),
        register(ObisCode::new(1, 0, 3, 7, 0, 255), MeterDataPointType::ReactivePowerP),
        register(ObisCode::new(1, 0, 4, 8, 0, 255), MeterDataPointType::ReactiveEnergyNTotal),
        register(ObisCode::new(1, 0, 4, 8, 1, 255), MeterDataPointType::ReactiveEnergyNT1),
        register(ObisCode::new(1, 0, 4, 8, 2, 255), MeterDataPointType::ReactiveEnergyNT2),
        register(ObisCode::new(1, 0, 4, 7, 0, 255), MeterDataPointType::ReactivePowerN),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_e450_sequence() {
        let sequence = e450_push_sequence();
        assert_eq!(sequence.len(), 16);
        assert_eq!(sequence.registers()[0], "1.0.1.8.0.255".parse().unwrap());
        assert_eq!(sequence.registers()[3], "1.0.1.7.0.255".parse().unwrap());
        assert_eq!(sequence.registers()[15], "1.0.4.7.0.255".parse().unwrap());
    }

    #[test]
    fn test_e450_registers_are_unique() {
        let registers = e450_registers();
        let codes: HashSet<ObisCode> = registers.iter().map(|r| r.obis).collect();
        let types: HashSet<MeterDataPointType> = registers.iter().map(|r| r.data_point_type).collect();
        assert_eq!(codes.len(), 16);
        assert_eq!(types.len(), 16);
        assert!(registers.iter().all(|r| r.obis.description().is_some()));
    }
}
