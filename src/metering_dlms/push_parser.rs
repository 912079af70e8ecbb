use std::sync::Arc;

use chrono::NaiveDateTime;
use log::debug;
use thiserror::Error;

use super::catalog::RegisterCatalog;
use super::structs::{DecodeState, NotificationPayload, PushSequence};
use super::utils::{parse_cosem_datetime, read_slice, DATE_TIME_LENGTH};
use super::{DecodeError, FrameDecoder};
use crate::events::{EventSink, MeterEvent};
use crate::models::MeterDataPoint;
use crate::obis_utils::ObisCode;

// Push body layout
const STRUCTURE_TAG: u8 = 0x02;
const OCTET_STRING_TAG: u8 = 0x09;
const TIMESTAMP_MARKERS_OFFSET: usize = 2;
const TIMESTAMP_OFFSET: usize = 4;
const REGISTERS_OFFSET: usize = TIMESTAMP_OFFSET + DATE_TIME_LENGTH;

// Register element: 09 06 <obis:6> 06 <value:4>
const ELEMENT_STRIDE: usize = 13;
const OBIS_LENGTH_TAG: u8 = 0x06;
const DOUBLE_LONG_UNSIGNED_TAG: u8 = 0x06;
const VALUE_TAG_POSITION: usize = 8;

/// Positional decoder for meters with a known, fixed push configuration.
///
/// Walks the expected OBIS sequence in lockstep with 13 byte register
/// elements. Mismatching elements are skipped, a short payload fails the
/// whole frame. Values are the raw register contents.
pub struct PushSequenceDecoder {
    sequence: PushSequence,
    catalog: Arc<dyn RegisterCatalog>,
    meter_id: String,
    events: Arc<dyn EventSink>,
}

impl PushSequenceDecoder {
    pub fn new(sequence: PushSequence, catalog: Arc<dyn RegisterCatalog>, meter_id: &str, events: Arc<dyn EventSink>) -> Self {
        PushSequenceDecoder { sequence, catalog, meter_id: meter_id.to_string(), events }
    }

    fn read_timestamp(&self, body: &[u8], payload: &NotificationPayload) -> Result<NaiveDateTime, DecodeError> {
        let markers = read_slice(body, TIMESTAMP_MARKERS_OFFSET, 2)?;
        let raw = read_slice(body, TIMESTAMP_OFFSET, DATE_TIME_LENGTH)?;

        if markers != [OCTET_STRING_TAG, DATE_TIME_LENGTH as u8] {
            self.events.emit(MeterEvent::TimestampFallback {
                reason: format!("unexpected date-time markers {}", hex::encode(markers)),
            });
            return Ok(payload.fallback_timestamp());
        }

        match parse_cosem_datetime(raw) {
            Some(ts) => Ok(ts),
            None => {
                self.events.emit(MeterEvent::TimestampFallback {
                    reason: format!("date-time {} not representable", hex::encode(raw)),
                });
                Ok(payload.fallback_timestamp())
            }
        }
    }
}

/// Why a register element does not match its sequence entry
#[derive(Error, Debug, Clone, PartialEq)]
enum ElementMismatch {
    #[error("bad OBIS markers {0:02X} {1:02X}")]
    ObisMarkers(u8, u8),
    #[error("bad value tag {0:02X}")]
    ValueTag(u8),
    #[error("found OBIS {0}")]
    Obis(ObisCode),
}

/// Checks the structural markers of one element and its embedded OBIS code.
/// `element` is exactly `ELEMENT_STRIDE` bytes long.
fn check_element(element: &[u8], expected: &ObisCode) -> Result<u32, ElementMismatch> {
    if element[0] != OCTET_STRING_TAG || element[1] != OBIS_LENGTH_TAG {
        return Err(ElementMismatch::ObisMarkers(element[0], element[1]));
    }
    if element[VALUE_TAG_POSITION] != DOUBLE_LONG_UNSIGNED_TAG {
        return Err(ElementMismatch::ValueTag(element[VALUE_TAG_POSITION]));
    }
    let found = ObisCode::new(element[2], element[3], element[4], element[5], element[6], element[7]);
    if found != *expected {
        return Err(ElementMismatch::Obis(found));
    }
    Ok(u32::from_be_bytes([element[9], element[10], element[11], element[12]]))
}

impl FrameDecoder for PushSequenceDecoder {
    fn decode(&self, payload: &NotificationPayload) -> Result<Vec<MeterDataPoint>, DecodeError> {
        let body = payload.body.as_slice();
        let header = read_slice(body, 0, 2)?;
        if header[0] != STRUCTURE_TAG {
            return Err(DecodeError::NotAStructure(header[0]));
        }
        let count = header[1] as usize;
        if count == 0 {
            return Err(DecodeError::EmptyStructure);
        }
        if count != 1 + 2 * self.sequence.len() {
            debug!("Push structure announces {} elements, sequence expects {}", count, 1 + 2 * self.sequence.len());
        }

        let timestamp = self.read_timestamp(body, payload)?;

        let mut state = DecodeState::new(self.sequence.registers());
        let expected_sequence = state.expected_sequence;
        let mut points = Vec::with_capacity(expected_sequence.len());

        for (position, expected) in expected_sequence.iter().enumerate() {
            let element = read_slice(body, REGISTERS_OFFSET + position * ELEMENT_STRIDE, ELEMENT_STRIDE)?;
            state.elements_consumed += 1;

            let raw = match check_element(element, expected) {
                Ok(raw) => raw,
                Err(mismatch) => {
                    self.events.emit(MeterEvent::RegisterSkipped {
                        position,
                        expected: *expected,
                        reason: mismatch.to_string(),
                    });
                    continue;
                }
            };

            match self.catalog.lookup(expected) {
                Some(descriptor) => {
                    points.push(MeterDataPoint::new(descriptor.data_point_type, raw as f64, &self.meter_id, timestamp));
                }
                None => self.events.emit(MeterEvent::RegisterUnknown { obis: *expected }),
            }
        }

        let consumed = state.finish();
        debug!("Push frame consumed: {} elements walked, {} data points", consumed, points.len());
        Ok(points)
    }

    fn name(&self) -> &'static str {
        "push_sequence"
    }
}
