use log::{debug, error, info};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::Receiver;

use crate::config::MeterConfig;
use crate::events::{EventSink, MeterEvent};
use crate::models::{MeterDataPoint, RegisterDescriptor};
use crate::sinks::DataSink;

pub mod apdu;
pub mod axdr;
pub mod buffer;
pub mod catalog;
pub mod catalog_decoder;
pub mod hdlc;
pub mod meter_definitions;
pub mod push_parser;
pub mod structs;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_support;

use buffer::ByteAccumulator;
use catalog::{RegisterCatalog, StaticCatalog};
use catalog_decoder::CatalogDecoder;
use hdlc::{FrameOracle, HdlcFrameAssembler};
use push_parser::PushSequenceDecoder;
use structs::{DecoderKind, FrameStatus, NotificationPayload, PushSequence};

/// Transport bytes that cannot be turned into a Data-Notification
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HdlcError {
    #[error("No HDLC flag in {0} buffered bytes")]
    MissingFlag(usize),
    #[error("Unsupported HDLC frame format 0x{0:02X}")]
    UnsupportedFormat(u8),
    #[error("HDLC frame too short ({0} bytes)")]
    FrameTooShort(usize),
    #[error("HDLC frame not terminated by a flag")]
    MissingClosingFlag,
    #[error("Invalid HDLC address field")]
    InvalidAddress,
    #[error("HCS mismatch, expected 0x{expected:04X} got 0x{actual:04X}")]
    HcsMismatch { expected: u16, actual: u16 },
    #[error("FCS mismatch, expected 0x{expected:04X} got 0x{actual:04X}")]
    FcsMismatch { expected: u16, actual: u16 },
    #[error("First segment does not start with an LLC header")]
    MissingLlcHeader,
    #[error("Reassembled APDU exceeds {0} bytes")]
    ApduTooLarge(usize),
    #[error("Unsupported APDU tag 0x{0:02X}")]
    UnsupportedApdu(u8),
    #[error("APDU ends before its header")]
    TruncatedApdu,
    #[error("Invalid date-time length {0} in notification header")]
    InvalidDateTimeLength(u8),
    #[error("Data-Notification without body")]
    EmptyNotificationBody,
}

/// A complete payload that cannot be decoded into data points
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("Payload does not start with a structure (tag 0x{0:02X})")]
    NotAStructure(u8),
    #[error("Payload structure has no elements")]
    EmptyStructure,
    #[error("Payload truncated: {needed} bytes at offset {offset} requested, {length} available")]
    Truncated { offset: usize, needed: usize, length: usize },
    #[error("Unknown A-XDR tag 0x{0:02X} at offset {1}")]
    UnknownTag(u8, usize),
    #[error("A-XDR type 0x{0:02X} not supported")]
    UnsupportedType(u8),
    #[error("A-XDR nesting too deep at offset {0}")]
    NestingTooDeep(usize),
    #[error("Invalid A-XDR length at offset {0}")]
    InvalidLength(usize),
}

/// Turns a complete notification payload into data points. Implementations
/// keep no state between calls.
pub trait FrameDecoder: Send + Sync {
    fn decode(&self, payload: &NotificationPayload) -> Result<Vec<MeterDataPoint>, DecodeError>;
    fn name(&self) -> &'static str;
}

pub fn build_decoder(
    kind: DecoderKind,
    meter: &MeterConfig,
    catalog: Arc<dyn RegisterCatalog>,
    events: Arc<dyn EventSink>,
) -> Box<dyn FrameDecoder> {
    match kind {
        DecoderKind::PushSequence => Box::new(PushSequenceDecoder::new(
            PushSequence::new(meter.push_sequence.clone()),
            catalog,
            &meter.id,
            events,
        )),
        DecoderKind::Catalog => Box::new(
            CatalogDecoder::new(catalog, &meter.id, events).with_meter_id_register(meter.id_register),
        ),
    }
}

/// append → completion check → decode for one meter connection.
///
/// Owns the byte buffer and the oracle, so it must only be driven from a
/// single task.
pub struct MeterReader {
    buffer: ByteAccumulator,
    oracle: Box<dyn FrameOracle>,
    decoder: Box<dyn FrameDecoder>,
    events: Arc<dyn EventSink>,
}

impl MeterReader {
    pub fn new(
        buffer: ByteAccumulator,
        oracle: Box<dyn FrameOracle>,
        decoder: Box<dyn FrameDecoder>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        MeterReader { buffer, oracle, decoder, events }
    }

    pub fn from_config(meter: &MeterConfig, registers: &[RegisterDescriptor], events: Arc<dyn EventSink>) -> Self {
        let catalog: Arc<dyn RegisterCatalog> = Arc::new(StaticCatalog::new(registers.to_vec()));
        let decoder = build_decoder(meter.decoder, meter, catalog, events.clone());
        info!("Meter {} uses the {} decoder", meter.id, decoder.name());

        MeterReader::new(
            ByteAccumulator::new(meter.buffer_max_size, events.clone()),
            Box::new(HdlcFrameAssembler::new(events.clone())),
            decoder,
            events,
        )
    }

    /// Adds transport bytes. An overflow also drops the partially
    /// reassembled payload.
    pub fn append(&mut self, bytes: &[u8]) {
        if self.buffer.append(bytes) {
            self.oracle.reset();
        }
    }

    /// Feeds one transport delivery and returns every data point that became
    /// available. Errors are reported as events, never returned.
    pub fn process(&mut self, bytes: &[u8]) -> Vec<MeterDataPoint> {
        self.append(bytes);

        let mut points = Vec::new();
        loop {
            match self.oracle.check(&mut self.buffer) {
                Ok(FrameStatus::Incomplete) => break,
                Ok(FrameStatus::Complete(payload)) => {
                    match self.decoder.decode(&payload) {
                        Ok(mut decoded) => points.append(&mut decoded),
                        Err(e) => self.events.emit(MeterEvent::DecodeFailed { reason: e.to_string() }),
                    }
                    if self.buffer.is_empty() {
                        break;
                    }
                }
                /* already reported and cleared by the oracle */
                Err(_) => break,
            }
        }
        points
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }
}

pub struct DlmsManager {
    reader: MeterReader,
    sinks: Vec<Box<dyn DataSink>>,
}

impl DlmsManager {
    pub fn new(reader: MeterReader, sinks: Vec<Box<dyn DataSink>>) -> Self {
        Self { reader, sinks }
    }

    /// Single consumer of all transport deliveries for one meter
    pub async fn start_thread(&mut self, mut receiver: Receiver<Vec<u8>>) {
        info!("Starting DLMS thread with {} sinks", self.sinks.len());

        while let Some(chunk) = receiver.recv().await {
            debug!("Received {} bytes from transport", chunk.len());

            for point in self.reader.process(&chunk) {
                for sink in &self.sinks {
                    if let Err(e) = sink.send(&point) {
                        error!("Sink {} failed for {}: {}", sink.name(), point.data_point_type, e);
                    }
                }
            }
        }

        info!("DLMS input closed, {} bytes left unprocessed", self.reader.buffered_len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{InputConfig, MeterConfig};
    use crate::events::RecordingEventSink;
    use crate::metering_dlms::meter_definitions::{e450_push_sequence, e450_registers as e450_catalog, METER_ID_OBIS};
    use crate::metering_dlms::test_support::*;
    use crate::models::MeterDataPointType;
    use crate::sinks::SinkError;
    use std::sync::Mutex;

    fn meter_config(decoder: DecoderKind, buffer_max_size: usize) -> MeterConfig {
        MeterConfig {
            id: "e450".to_string(),
            buffer_max_size,
            decoder,
            input: InputConfig::Mqtt { topic: "dlms_input".to_string() },
            push_sequence: e450_push_sequence().registers().to_vec(),
            id_register: METER_ID_OBIS,
        }
    }

    fn reader(decoder: DecoderKind, buffer_max_size: usize) -> (MeterReader, Arc<RecordingEventSink>) {
        let events = Arc::new(RecordingEventSink::new());
        let reader = MeterReader::from_config(&meter_config(decoder, buffer_max_size), &e450_catalog(), events.clone());
        (reader, events)
    }

    fn push_frames() -> Vec<u8> {
        let apdu = notification_apdu(&push_body(sample_time(), &e450_registers()));
        frame_apdu(&apdu, 64).concat()
    }

    #[test]
    fn test_byte_by_byte_delivery() {
        let (mut reader, events) = reader(DecoderKind::PushSequence, 5000);
        let stream = push_frames();

        let mut points = Vec::new();
        for (i, byte) in stream.iter().enumerate() {
            let mut new_points = reader.process(&[*byte]);
            if i + 1 < stream.len() {
                assert!(new_points.is_empty());
            }
            points.append(&mut new_points);
        }

        assert_eq!(points.len(), 16);
        assert_eq!(points[0].value, 100.0);
        assert_eq!(points[0].timestamp, sample_time());
        /* closing flag stays, it may open the next frame */
        assert_eq!(reader.buffered_len(), 1);
        assert_eq!(events.count(|e| matches!(e, MeterEvent::PayloadComplete { .. })), 1);
        assert_eq!(events.count(|e| matches!(e, MeterEvent::MalformedFrame { .. })), 0);
    }

    #[test]
    fn test_two_pushes_in_one_delivery() {
        let (mut reader, _) = reader(DecoderKind::PushSequence, 5000);
        let mut stream = push_frames();
        stream.extend_from_slice(&push_frames());

        let points = reader.process(&stream);
        assert_eq!(points.len(), 32);
        assert_eq!(reader.buffered_len(), 1);
    }

    #[test]
    fn test_shared_flags_byte_by_byte() {
        let (mut reader, events) = reader(DecoderKind::PushSequence, 5000);
        let apdu = notification_apdu(&push_body(sample_time(), &e450_registers()));
        let frames = frame_apdu(&apdu, 90);
        assert_eq!(frames.len(), 3);
        let stream = join_shared_flags(&frames);

        assert_eq!(reader.process(&stream).len(), 16);

        let mut points = Vec::new();
        for byte in &stream {
            points.append(&mut reader.process(&[*byte]));
        }
        assert_eq!(points.len(), 16);
        assert_eq!(points[15].value, 1600.0);
        assert_eq!(events.count(|e| matches!(e, MeterEvent::MalformedFrame { .. })), 0);
    }

    #[test]
    fn test_catalog_decoder_scales() {
        let (mut reader, _) = reader(DecoderKind::Catalog, 5000);
        let points = reader.process(&push_frames());
        assert_eq!(points.len(), 16);
        assert_eq!(points[3].data_point_type, MeterDataPointType::ActivePowerP);
        assert!((points[3].value - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_recovers_after_garbage() {
        let (mut reader, events) = reader(DecoderKind::PushSequence, 5000);
        let mut stream = vec![0x7E, 0x12, 0x34, 0x56];
        stream.extend_from_slice(&push_frames());

        /* the garbage frame takes the rest of this delivery with it */
        assert!(reader.process(&stream).is_empty());
        assert_eq!(events.count(|e| matches!(e, MeterEvent::MalformedFrame { .. })), 1);
        assert_eq!(reader.buffered_len(), 0);

        assert_eq!(reader.process(&push_frames()).len(), 16);
    }

    #[test]
    fn test_overflow_drops_partial_state() {
        let (mut reader, events) = reader(DecoderKind::PushSequence, 300);
        let frames = frame_apdu(&notification_apdu(&push_body(sample_time(), &e450_registers())), 64);

        /* first segment reassembled, then a frame that never completes */
        assert!(reader.process(&frames[0]).is_empty());
        assert!(reader.process(&[0x7E, 0xA7, 0xFF]).is_empty());
        assert!(reader.process(&[0x00; 298]).is_empty());
        assert_eq!(events.count(|e| matches!(e, MeterEvent::BufferOverflow { .. })), 1);

        /* remaining segments alone do not form a payload */
        let tail: Vec<u8> = frames[1..].concat();
        assert!(reader.process(&tail).is_empty());

        let all: Vec<u8> = frames.concat();
        assert_eq!(reader.process(&all).len(), 16);
        assert!(reader.buffered_len() <= 300);
    }

    #[test]
    fn test_truncated_payload_emits_nothing() {
        let (mut reader, events) = reader(DecoderKind::PushSequence, 5000);
        let mut body = push_body(sample_time(), &e450_registers());
        body.truncate(150);
        let stream = frame_apdu(&notification_apdu(&body), 64).concat();

        assert!(reader.process(&stream).is_empty());
        assert_eq!(events.count(|e| matches!(e, MeterEvent::DecodeFailed { .. })), 1);
    }

    struct CollectingSink {
        points: Arc<Mutex<Vec<MeterDataPoint>>>,
    }

    impl DataSink for CollectingSink {
        fn send(&self, point: &MeterDataPoint) -> Result<(), SinkError> {
            self.points.lock().map_err(|_| SinkError::Closed)?.push(point.clone());
            Ok(())
        }

        fn name(&self) -> &'static str {
            "collecting"
        }
    }

    #[tokio::test]
    async fn test_manager_forwards_to_sinks() {
        let (reader, _) = reader(DecoderKind::PushSequence, 5000);
        let collected = Arc::new(Mutex::new(Vec::new()));
        let mut manager = DlmsManager::new(reader, vec![Box::new(CollectingSink { points: collected.clone() })]);

        let (sender, receiver) = tokio::sync::mpsc::channel(10);
        for chunk in push_frames().chunks(50) {
            sender.send(chunk.to_vec()).await.unwrap();
        }
        drop(sender);

        manager.start_thread(receiver).await;
        let points = collected.lock().unwrap();
        assert_eq!(points.len(), 16);
        assert_eq!(points[15].data_point_type, MeterDataPointType::ReactivePowerN);
    }
}
