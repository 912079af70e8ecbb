//! Observability events raised by the decoding pipeline.
//!
//! Buffer overflows, malformed frames and skipped registers are expected on a
//! noisy serial line. Components report them through an injected [`EventSink`]
//! instead of logging on their own, so callers (and tests) decide what to do
//! with them.

use log::{log, Level};
use std::fmt;
use std::sync::Mutex;

use crate::obis_utils::ObisCode;

#[derive(Debug, Clone, PartialEq)]
pub enum MeterEvent {
    /// The byte buffer grew past its bound and was emptied
    BufferOverflow { buffered: usize, max_size: usize },
    /// Transport bytes could not be interpreted as a frame, buffer dropped
    MalformedFrame { reason: String, discarded: usize },
    /// Valid prefix, waiting for more bytes
    FrameIncomplete { buffered: usize },
    /// A complete notification payload is ready for decoding
    PayloadComplete { length: usize },
    /// Whole payload rejected, nothing emitted for this frame
    DecodeFailed { reason: String },
    /// Structural markers or OBIS code did not match the expected element
    RegisterSkipped { position: usize, expected: ObisCode, reason: String },
    /// Register present but its value could not be turned into a number
    RegisterUnscalable { obis: ObisCode, raw: String },
    /// Register has no catalog entry
    RegisterUnknown { obis: ObisCode },
    /// Timestamp element unusable, another time source was used
    TimestampFallback { reason: String },
}

impl MeterEvent {
    /// Severity the event is logged with
    pub fn level(&self) -> Level {
        match self {
            MeterEvent::BufferOverflow { .. }
            | MeterEvent::MalformedFrame { .. }
            | MeterEvent::DecodeFailed { .. }
            | MeterEvent::RegisterUnscalable { .. } => Level::Warn,
            MeterEvent::RegisterSkipped { .. } | MeterEvent::TimestampFallback { .. } => Level::Info,
            MeterEvent::FrameIncomplete { .. }
            | MeterEvent::PayloadComplete { .. }
            | MeterEvent::RegisterUnknown { .. } => Level::Debug,
        }
    }
}

impl fmt::Display for MeterEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeterEvent::BufferOverflow { buffered, max_size } => write!(
                f,
                "HDLC byte-buffer would grow to {} bytes (> {}). Buffer is cleared, some data is lost.",
                buffered, max_size
            ),
            MeterEvent::MalformedFrame { reason, discarded } => {
                write!(f, "Failed to extract data from HDLC frame: '{}'. {} bytes got lost.", reason, discarded)
            }
            MeterEvent::FrameIncomplete { buffered } => {
                write!(f, "HDLC frame incomplete ({} bytes buffered), not parsed yet", buffered)
            }
            MeterEvent::PayloadComplete { length } => {
                write!(f, "DLMS packet of {} bytes complete and ready for parsing", length)
            }
            MeterEvent::DecodeFailed { reason } => write!(f, "Push frame dropped: {}", reason),
            MeterEvent::RegisterSkipped { position, expected, reason } => {
                write!(f, "Skipping element {} (expected {}): {}", position, expected, reason)
            }
            MeterEvent::RegisterUnscalable { obis, raw } => {
                write!(f, "Invalid register value '{}' for {}. Skipping register.", raw, obis)
            }
            MeterEvent::RegisterUnknown { obis } => write!(f, "No catalog entry for {}, ignored", obis),
            MeterEvent::TimestampFallback { reason } => {
                write!(f, "Timestamp element not usable ({}), using fallback time", reason)
            }
        }
    }
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: MeterEvent);
}

/// Writes every event to the `log` facade with a severity per kind
#[derive(Debug, Default, Clone)]
pub struct LogEventSink;

impl EventSink for LogEventSink {
    fn emit(&self, event: MeterEvent) {
        log!(event.level(), "{}", event);
    }
}

/// Keeps events in memory, handy for inspecting a pipeline run
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<MeterEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<MeterEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn count<F: Fn(&MeterEvent) -> bool>(&self, filter: F) -> usize {
        self.events().iter().filter(|e| filter(e)).count()
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: MeterEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
