use std::sync::Arc;

use chrono::NaiveDateTime;
use log::debug;

use super::axdr::{parse_axdr, DlmsData};
use super::catalog::{scale_value, RegisterCatalog};
use super::meter_definitions::{CLOCK_OBIS, METER_ID_OBIS};
use super::structs::NotificationPayload;
use super::{DecodeError, FrameDecoder};
use crate::events::{EventSink, MeterEvent};
use crate::models::MeterDataPoint;
use crate::obis_utils::ObisCode;

/// Name based decoder: parses the notification body as A-XDR and resolves
/// every (logical name, value) pair through the register catalog.
///
/// Works for flat pushes (`date-time, obis, value, obis, value, ...`) as well
/// as meters wrapping each register in its own structure.
pub struct CatalogDecoder {
    catalog: Arc<dyn RegisterCatalog>,
    meter_id: String,
    meter_id_obis: ObisCode,
    events: Arc<dyn EventSink>,
}

/// What a walk over the data tree collected
#[derive(Default)]
struct Collected {
    timestamp: Option<DlmsData>,
    meter_id: Option<String>,
    registers: Vec<(ObisCode, DlmsData)>,
}

impl CatalogDecoder {
    pub fn new(catalog: Arc<dyn RegisterCatalog>, meter_id: &str, events: Arc<dyn EventSink>) -> Self {
        CatalogDecoder {
            catalog,
            meter_id: meter_id.to_string(),
            meter_id_obis: METER_ID_OBIS,
            events,
        }
    }

    pub fn with_meter_id_register(mut self, obis: ObisCode) -> Self {
        self.meter_id_obis = obis;
        self
    }

    fn collect(&self, items: &[DlmsData], collected: &mut Collected) {
        let mut i = 0;
        while i < items.len() {
            let item = &items[i];

            if let (Some(obis), Some(value)) = (item.as_obis(), items.get(i + 1)) {
                if value.as_obis().is_none() {
                    self.collect_register(obis, value, collected);
                    i += 2;
                    continue;
                }
            }

            match item {
                DlmsData::Structure(children) | DlmsData::Array(children) => self.collect(children, collected),
                other if other.is_date_time() && collected.timestamp.is_none() => {
                    collected.timestamp = Some(other.clone());
                }
                other => debug!("Ignoring unpaired {} element", other.type_name()),
            }
            i += 1;
        }
    }

    fn collect_register(&self, obis: ObisCode, value: &DlmsData, collected: &mut Collected) {
        if obis == self.meter_id_obis {
            collected.meter_id = value.as_text();
        } else if obis == CLOCK_OBIS {
            collected.timestamp = Some(value.clone());
        } else if let DlmsData::Structure(children) = value {
            /* value, scaler-unit */
            match children.first() {
                Some(first) => collected.registers.push((obis, first.clone())),
                None => debug!("Empty value structure for {}", obis),
            }
        } else {
            collected.registers.push((obis, value.clone()));
        }
    }

    fn resolve_timestamp(&self, element: Option<&DlmsData>, payload: &NotificationPayload) -> NaiveDateTime {
        match element {
            Some(element) => match element.as_datetime() {
                Some(ts) => ts,
                None => {
                    self.events.emit(MeterEvent::TimestampFallback {
                        reason: format!("{} element is not a valid date-time", element.type_name()),
                    });
                    payload.fallback_timestamp()
                }
            },
            None => payload.fallback_timestamp(),
        }
    }
}

impl FrameDecoder for CatalogDecoder {
    fn decode(&self, payload: &NotificationPayload) -> Result<Vec<MeterDataPoint>, DecodeError> {
        let (root, _) = parse_axdr(&payload.body)?;
        let items = match root {
            DlmsData::Structure(items) | DlmsData::Array(items) => items,
            _ => return Err(DecodeError::NotAStructure(payload.body.first().copied().unwrap_or_default())),
        };
        if items.is_empty() {
            return Err(DecodeError::EmptyStructure);
        }

        let mut collected = Collected::default();
        self.collect(&items, &mut collected);

        let timestamp = self.resolve_timestamp(collected.timestamp.as_ref(), payload);
        let meter_id = collected.meter_id.as_deref().unwrap_or(&self.meter_id);

        let mut points = Vec::with_capacity(collected.registers.len());
        for (obis, value) in &collected.registers {
            let Some(descriptor) = self.catalog.lookup(obis) else {
                self.events.emit(MeterEvent::RegisterUnknown { obis: *obis });
                continue;
            };

            match value.to_f64().and_then(|raw| scale_value(raw, &descriptor)) {
                Some(scaled) => points.push(MeterDataPoint::new(descriptor.data_point_type, scaled, meter_id, timestamp)),
                None => self.events.emit(MeterEvent::RegisterUnscalable { obis: *obis, raw: format!("{:?}", value) }),
            }
        }

        debug!("Catalog decode: {} registers found, {} data points", collected.registers.len(), points.len());
        Ok(points)
    }

    fn name(&self) -> &'static str {
        "catalog"
    }
}
