//! HDLC frame delimitation and reassembly (IEC 62056-46).
//!
//! Only what is needed to know when a pushed APDU is complete: flags, frame
//! format type 3 with its segmentation bit, addresses, HCS/FCS and the LLC
//! header. No link negotiation happens here.
//!
//! ```text
//! 7E | A?LL LLLL LLLL | dst (1-4) | src (1-4) | ctrl | HCS (2) | info | FCS (2) | 7E
//! ```

use chrono::Local;
use log::debug;
use std::sync::Arc;

use super::apdu::parse_data_notification;
use super::buffer::ByteAccumulator;
use super::structs::{FrameStatus, HdlcFrame};
use super::utils::verify_fcs;
use super::HdlcError;
use crate::events::{EventSink, MeterEvent};

pub const FLAG: u8 = 0x7E;
const FRAME_FORMAT_TYPE_3: u16 = 0xA;
const SEGMENTATION_BIT: u16 = 0x0800;
const LENGTH_MASK: u16 = 0x07FF;
/* format (2) + dst (1) + src (1) + control (1) + FCS (2) */
const MIN_FRAME_LENGTH: usize = 7;
const MAX_ADDRESS_BYTES: usize = 4;
const LLC_HEADERS: [[u8; 3]; 2] = [[0xE6, 0xE7, 0x00], [0xE6, 0xE6, 0x00]];

/// Decides whether the accumulated bytes hold a complete application payload.
///
/// On `Err` the implementation has already dropped the buffered bytes and its
/// own partial state.
pub trait FrameOracle: Send {
    fn check(&mut self, buffer: &mut ByteAccumulator) -> Result<FrameStatus, HdlcError>;

    /// Forget any partially reassembled payload
    fn reset(&mut self);
}

/// Reassembles segmented HDLC information fields into one Data-Notification
pub struct HdlcFrameAssembler {
    pending: Vec<u8>,
    segments: usize,
    /* the flag at the buffer start closed the previous frame */
    closing_flag: bool,
    events: Arc<dyn EventSink>,
}

impl HdlcFrameAssembler {
    pub fn new(events: Arc<dyn EventSink>) -> Self {
        HdlcFrameAssembler { pending: Vec::new(), segments: 0, closing_flag: false, events }
    }

    pub fn pending_segments(&self) -> usize {
        self.segments
    }

    fn assemble(&mut self, buffer: &mut ByteAccumulator) -> Result<FrameStatus, HdlcError> {
        loop {
            let data = buffer.as_slice();
            if data.is_empty() {
                return Ok(FrameStatus::Incomplete);
            }

            let start = data.iter().position(|&b| b == FLAG).ok_or(HdlcError::MissingFlag(data.len()))?;

            /* Back-to-back flags: the last one opens the frame */
            let mut open = start;
            while open + 1 < data.len() && data[open + 1] == FLAG {
                open += 1;
            }
            if open > 0 {
                if start > 0 {
                    debug!("Discarding {} bytes of line noise before HDLC flag", start);
                }
                buffer.consume(open);
                continue;
            }

            /* A closing flag followed by something other than a frame header
               was not shared, whatever follows is line noise */
            if self.closing_flag && data.len() >= 2 && u16::from(data[1] >> 4) != FRAME_FORMAT_TYPE_3 {
                buffer.consume(1);
                self.closing_flag = false;
                continue;
            }

            if data.len() < 3 {
                return Ok(FrameStatus::Incomplete);
            }

            let format = u16::from_be_bytes([data[1], data[2]]);
            if format >> 12 != FRAME_FORMAT_TYPE_3 {
                return Err(HdlcError::UnsupportedFormat(data[1]));
            }

            let length = (format & LENGTH_MASK) as usize;
            if length < MIN_FRAME_LENGTH {
                return Err(HdlcError::FrameTooShort(length));
            }
            if data.len() < length + 2 {
                return Ok(FrameStatus::Incomplete);
            }
            if data[length + 1] != FLAG {
                return Err(HdlcError::MissingClosingFlag);
            }

            debug!("HDLC frame: {}", hex::encode(&data[..length + 2]));
            let frame = parse_frame(&data[1..=length])?;

            /* The closing flag may open the next frame */
            buffer.consume(length + 1);
            self.closing_flag = true;
            trim_flags(buffer);

            if frame.information.is_empty() {
                debug!("HDLC frame without information field (control 0x{:02X}) ignored", frame.control);
                continue;
            }

            let information = if self.segments == 0 {
                strip_llc_header(&frame.information)?
            } else {
                &frame.information[..]
            };

            self.pending.extend_from_slice(information);
            self.segments += 1;
            if self.pending.len() > buffer.max_size() {
                return Err(HdlcError::ApduTooLarge(buffer.max_size()));
            }

            if frame.segmented {
                debug!("More DLMS data expected after segment {}", self.segments);
                continue;
            }

            let apdu = std::mem::take(&mut self.pending);
            self.segments = 0;
            let payload = parse_data_notification(&apdu, Local::now().naive_local())?;
            return Ok(FrameStatus::Complete(payload));
        }
    }
}

impl FrameOracle for HdlcFrameAssembler {
    fn check(&mut self, buffer: &mut ByteAccumulator) -> Result<FrameStatus, HdlcError> {
        match self.assemble(buffer) {
            Ok(FrameStatus::Incomplete) => {
                self.events.emit(MeterEvent::FrameIncomplete { buffered: buffer.len() });
                Ok(FrameStatus::Incomplete)
            }
            Ok(FrameStatus::Complete(payload)) => {
                self.events.emit(MeterEvent::PayloadComplete { length: payload.body.len() });
                Ok(FrameStatus::Complete(payload))
            }
            Err(e) => {
                let discarded = buffer.len() + self.pending.len();
                buffer.clear();
                self.reset();
                self.events.emit(MeterEvent::MalformedFrame { reason: e.to_string(), discarded });
                Err(e)
            }
        }
    }

    fn reset(&mut self) {
        self.pending.clear();
        self.segments = 0;
        self.closing_flag = false;
    }
}

/// Parses the bytes between two flags (format field up to and including FCS)
pub fn parse_frame(bytes: &[u8]) -> Result<HdlcFrame, HdlcError> {
    let length = bytes.len();
    if length < MIN_FRAME_LENGTH {
        return Err(HdlcError::FrameTooShort(length));
    }

    let format = u16::from_be_bytes([bytes[0], bytes[1]]);
    let mut pos = 2;
    let destination = read_address(bytes, &mut pos)?;
    let source = read_address(bytes, &mut pos)?;
    let control = *bytes.get(pos).ok_or(HdlcError::FrameTooShort(length))?;
    pos += 1;

    let fcs_start = length - 2;
    if pos > fcs_start {
        return Err(HdlcError::FrameTooShort(length));
    }

    verify_fcs(&bytes[..fcs_start], &bytes[fcs_start..])
        .map_err(|(expected, actual)| HdlcError::FcsMismatch { expected, actual })?;

    let information = if pos == fcs_start {
        Vec::new()
    } else {
        /* Frames carrying information protect the header separately */
        if pos + 2 > fcs_start {
            return Err(HdlcError::FrameTooShort(length));
        }
        verify_fcs(&bytes[..pos], &bytes[pos..pos + 2])
            .map_err(|(expected, actual)| HdlcError::HcsMismatch { expected, actual })?;
        bytes[pos + 2..fcs_start].to_vec()
    };

    Ok(HdlcFrame {
        segmented: format & SEGMENTATION_BIT != 0,
        destination,
        source,
        control,
        information,
    })
}

/// Address bytes end with the one whose LSB is set
fn read_address(bytes: &[u8], pos: &mut usize) -> Result<u32, HdlcError> {
    let mut address: u32 = 0;
    for i in 0..MAX_ADDRESS_BYTES {
        let byte = *bytes.get(*pos).ok_or(HdlcError::InvalidAddress)?;
        *pos += 1;
        address = (address << 7) | (byte >> 1) as u32;
        if byte & 0x01 == 0x01 {
            return Ok(address);
        }
        if i == MAX_ADDRESS_BYTES - 1 {
            break;
        }
    }
    Err(HdlcError::InvalidAddress)
}

/// Collapses repeated flags, the last one stays as it may open the next frame
fn trim_flags(buffer: &mut ByteAccumulator) {
    while buffer.as_slice().starts_with(&[FLAG, FLAG]) {
        buffer.consume(1);
    }
}

fn strip_llc_header(information: &[u8]) -> Result<&[u8], HdlcError> {
    LLC_HEADERS
        .iter()
        .find(|llc| information.starts_with(&llc[..]))
        .map(|llc| &information[llc.len()..])
        .ok_or(HdlcError::MissingLlcHeader)
}
