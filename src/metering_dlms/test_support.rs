//! Builders for synthetic meter traffic used across the module tests

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};

use super::hdlc::FLAG;
use super::meter_definitions::e450_push_sequence;
use super::utils::fcs16;
use crate::obis_utils::ObisCode;

const LLC_RESPONSE: [u8; 3] = [0xE6, 0xE7, 0x00];

/// Single HDLC UI frame from server 0x01 to client 0x48
pub fn build_frame(information: &[u8], segmented: bool) -> Vec<u8> {
    let mut length = 2 + 1 + 1 + 1 + 2;
    if !information.is_empty() {
        length += 2 + information.len();
    }

    let mut format: u16 = 0xA000 | length as u16;
    if segmented {
        format |= 0x0800;
    }

    let mut content = format.to_be_bytes().to_vec();
    content.extend_from_slice(&[0x91, 0x03, 0x13]);
    if !information.is_empty() {
        let hcs = fcs16(&content).to_le_bytes();
        content.extend_from_slice(&hcs);
        content.extend_from_slice(information);
    }
    let fcs = fcs16(&content).to_le_bytes();
    content.extend_from_slice(&fcs);

    let mut frame = vec![FLAG];
    frame.extend_from_slice(&content);
    frame.push(FLAG);
    frame
}

/// Splits LLC header + APDU into frames of at most `max_info` information bytes
pub fn frame_apdu(apdu: &[u8], max_info: usize) -> Vec<Vec<u8>> {
    let mut information = LLC_RESPONSE.to_vec();
    information.extend_from_slice(apdu);
    let chunks: Vec<&[u8]> = information.chunks(max_info).collect();
    chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| build_frame(chunk, i + 1 < chunks.len()))
        .collect()
}

/// Concatenates frames so each closing flag also opens the next frame
pub fn join_shared_flags(frames: &[Vec<u8>]) -> Vec<u8> {
    let mut stream = Vec::new();
    for frame in frames {
        let skip = if stream.is_empty() { 0 } else { 1 };
        stream.extend_from_slice(&frame[skip..]);
    }
    stream
}

/// Data-Notification without header date-time
pub fn notification_apdu(body: &[u8]) -> Vec<u8> {
    let mut apdu = vec![0x0F, 0x00, 0x00, 0x00, 0x01, 0x00];
    apdu.extend_from_slice(body);
    apdu
}

pub fn encode_cosem_datetime(ts: NaiveDateTime) -> [u8; 12] {
    let year = (ts.year() as u16).to_be_bytes();
    [
        year[0],
        year[1],
        ts.month() as u8,
        ts.day() as u8,
        ts.weekday().number_from_monday() as u8,
        ts.hour() as u8,
        ts.minute() as u8,
        ts.second() as u8,
        0xFF,
        0x80,
        0x00,
        0x00,
    ]
}

pub fn register_element(obis: ObisCode, value: u32) -> [u8; 13] {
    let mut element = [0u8; 13];
    element[0] = 0x09;
    element[1] = 0x06;
    element[2..8].copy_from_slice(obis.as_bytes());
    element[8] = 0x06;
    element[9..13].copy_from_slice(&value.to_be_bytes());
    element
}

/// Notification body as an E450 pushes it: structure, date-time, then
/// (OBIS, double-long-unsigned) pairs
pub fn push_body(ts: NaiveDateTime, registers: &[(ObisCode, u32)]) -> Vec<u8> {
    let mut body = vec![0x02, (1 + 2 * registers.len()) as u8, 0x09, 0x0C];
    body.extend_from_slice(&encode_cosem_datetime(ts));
    for (obis, value) in registers {
        body.extend_from_slice(&register_element(*obis, *value));
    }
    body
}

pub fn sample_time() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2022, 3, 1).unwrap().and_hms_opt(12, 0, 0).unwrap()
}

/// All 16 E450 registers with distinct values (100, 200, ...)
pub fn e450_registers() -> Vec<(ObisCode, u32)> {
    e450_push_sequence()
        .registers()
        .iter()
        .enumerate()
        .map(|(i, obis)| (*obis, (i as u32 + 1) * 100))
        .collect()
}
