use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::obis_utils::ObisCode;

/// Body of a DLMS Data-Notification once all HDLC segments arrived
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationPayload {
    pub invoke_id: u32,
    /// Date-time carried in the APDU header, if the meter sent one
    pub header_timestamp: Option<NaiveDateTime>,
    /// Notification body, starting at the A-XDR structure tag
    pub body: Vec<u8>,
    pub received_at: NaiveDateTime,
}

impl NotificationPayload {
    /// Timestamp to use when the body carries no usable one
    pub fn fallback_timestamp(&self) -> NaiveDateTime {
        self.header_timestamp.unwrap_or(self.received_at)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FrameStatus {
    /// Valid prefix, more transport bytes needed
    Incomplete,
    Complete(NotificationPayload),
}

/// One HDLC frame between two flags
#[derive(Debug, Clone, PartialEq)]
pub struct HdlcFrame {
    pub segmented: bool,
    pub destination: u32,
    pub source: u32,
    pub control: u8,
    pub information: Vec<u8>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DecoderKind {
    /// Fixed positional walk over a known push configuration
    PushSequence,
    /// Generic A-XDR parse with name based catalog lookup
    Catalog,
}

/// Ordered registers a meter pushes after the timestamp element
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushSequence {
    registers: Vec<ObisCode>,
}

impl PushSequence {
    pub fn new(registers: Vec<ObisCode>) -> Self {
        PushSequence { registers }
    }

    pub fn registers(&self) -> &[ObisCode] {
        &self.registers
    }

    pub fn len(&self) -> usize {
        self.registers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }
}

/// Per-frame cursor of the positional decoder. Lives on the stack of a
/// single decode call.
#[derive(Debug)]
pub struct DecodeState<'a> {
    pub elements_consumed: usize,
    pub expected_sequence: &'a [ObisCode],
}

impl<'a> DecodeState<'a> {
    pub fn new(expected_sequence: &'a [ObisCode]) -> Self {
        DecodeState { elements_consumed: 0, expected_sequence }
    }

    /// Ends the walk; the payload is considered fully consumed
    pub fn finish(self) -> usize {
        self.elements_consumed
    }
}
