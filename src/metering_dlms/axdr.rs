use chrono::NaiveDateTime;
use log::debug;

use super::utils::{parse_cosem_datetime, read_slice, DATE_TIME_LENGTH};
use super::DecodeError;
use crate::obis_utils::ObisCode;

// A-XDR type tags (IEC 62056-6-2)
const TAG_NULL: u8 = 0x00;
const TAG_ARRAY: u8 = 0x01;
const TAG_STRUCTURE: u8 = 0x02;
const TAG_BOOLEAN: u8 = 0x03;
const TAG_BIT_STRING: u8 = 0x04;
const TAG_DOUBLE_LONG: u8 = 0x05;
const TAG_DOUBLE_LONG_UNSIGNED: u8 = 0x06;
const TAG_OCTET_STRING: u8 = 0x09;
const TAG_VISIBLE_STRING: u8 = 0x0A;
const TAG_UTF8_STRING: u8 = 0x0C;
const TAG_BCD: u8 = 0x0D;
const TAG_INTEGER: u8 = 0x0F;
const TAG_LONG: u8 = 0x10;
const TAG_UNSIGNED: u8 = 0x11;
const TAG_LONG_UNSIGNED: u8 = 0x12;
const TAG_COMPACT_ARRAY: u8 = 0x13;
const TAG_LONG64: u8 = 0x14;
const TAG_LONG64_UNSIGNED: u8 = 0x15;
const TAG_ENUM: u8 = 0x16;
const TAG_FLOAT32: u8 = 0x17;
const TAG_FLOAT64: u8 = 0x18;
const TAG_DATE_TIME: u8 = 0x19;
const TAG_DATE: u8 = 0x1A;
const TAG_TIME: u8 = 0x1B;

/// Push bodies are shallow; anything deeper is treated as garbage
pub const MAX_NESTING_DEPTH: usize = 16;

#[derive(Debug, Clone, PartialEq)]
pub enum DlmsData {
    Null,
    Array(Vec<DlmsData>),
    Structure(Vec<DlmsData>),
    Boolean(bool),
    BitString { bits: usize, bytes: Vec<u8> },
    DoubleLong(i32),
    DoubleLongUnsigned(u32),
    OctetString(Vec<u8>),
    VisibleString(String),
    Utf8String(String),
    Bcd(u8),
    Integer(i8),
    Long(i16),
    Unsigned(u8),
    LongUnsigned(u16),
    Long64(i64),
    Long64Unsigned(u64),
    Enum(u8),
    Float32(f32),
    Float64(f64),
    DateTime([u8; 12]),
    Date([u8; 5]),
    Time([u8; 4]),
}

impl DlmsData {
    /// Numeric value of the element, `None` for anything that is not a number
    pub fn to_f64(&self) -> Option<f64> {
        match self {
            DlmsData::DoubleLong(v) => Some(*v as f64),
            DlmsData::DoubleLongUnsigned(v) => Some(*v as f64),
            DlmsData::Integer(v) => Some(*v as f64),
            DlmsData::Long(v) => Some(*v as f64),
            DlmsData::Unsigned(v) => Some(*v as f64),
            DlmsData::LongUnsigned(v) => Some(*v as f64),
            DlmsData::Long64(v) => Some(*v as f64),
            DlmsData::Long64Unsigned(v) => Some(*v as f64),
            DlmsData::Float32(v) => Some(*v as f64),
            DlmsData::Float64(v) => Some(*v),
            _ => None,
        }
    }

    /// Logical name carried as a 6 byte octet string
    pub fn as_obis(&self) -> Option<ObisCode> {
        match self {
            DlmsData::OctetString(bytes) => ObisCode::from_bytes(bytes).ok(),
            _ => None,
        }
    }

    pub fn is_date_time(&self) -> bool {
        match self {
            DlmsData::DateTime(_) => true,
            DlmsData::OctetString(bytes) => bytes.len() == DATE_TIME_LENGTH,
            _ => false,
        }
    }

    pub fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            DlmsData::DateTime(bytes) => parse_cosem_datetime(bytes),
            DlmsData::OctetString(bytes) => parse_cosem_datetime(bytes),
            _ => None,
        }
    }

    /// Printable text, used for serial numbers / meter ids
    pub fn as_text(&self) -> Option<String> {
        match self {
            DlmsData::VisibleString(s) | DlmsData::Utf8String(s) => Some(s.clone()),
            DlmsData::OctetString(bytes) if !bytes.is_empty() && bytes.iter().all(|b| b.is_ascii_graphic()) => {
                String::from_utf8(bytes.clone()).ok()
            }
            DlmsData::DoubleLongUnsigned(v) => Some(v.to_string()),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            DlmsData::Null => "null-data",
            DlmsData::Array(_) => "array",
            DlmsData::Structure(_) => "structure",
            DlmsData::Boolean(_) => "boolean",
            DlmsData::BitString { .. } => "bit-string",
            DlmsData::DoubleLong(_) => "double-long",
            DlmsData::DoubleLongUnsigned(_) => "double-long-unsigned",
            DlmsData::OctetString(_) => "octet-string",
            DlmsData::VisibleString(_) => "visible-string",
            DlmsData::Utf8String(_) => "utf8-string",
            DlmsData::Bcd(_) => "bcd",
            DlmsData::Integer(_) => "integer",
            DlmsData::Long(_) => "long",
            DlmsData::Unsigned(_) => "unsigned",
            DlmsData::LongUnsigned(_) => "long-unsigned",
            DlmsData::Long64(_) => "long64",
            DlmsData::Long64Unsigned(_) => "long64-unsigned",
            DlmsData::Enum(_) => "enum",
            DlmsData::Float32(_) => "float32",
            DlmsData::Float64(_) => "float64",
            DlmsData::DateTime(_) => "date-time",
            DlmsData::Date(_) => "date",
            DlmsData::Time(_) => "time",
        }
    }
}

/// Parses exactly one A-XDR encoded element from the start of `data`.
/// Returns the element and the number of bytes it occupied.
pub fn parse_axdr(data: &[u8]) -> Result<(DlmsData, usize), DecodeError> {
    let mut reader = AxdrReader::new(data);
    let value = reader.read_data()?;
    if reader.remaining() > 0 {
        debug!("{} trailing bytes after A-XDR element", reader.remaining());
    }
    Ok((value, reader.position()))
}

pub struct AxdrReader<'a> {
    data: &'a [u8],
    pos: usize,
    depth: usize,
}

impl<'a> AxdrReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0, depth: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    pub fn read_data(&mut self) -> Result<DlmsData, DecodeError> {
        let tag_pos = self.pos;
        let tag = self.read_u8()?;

        let value = match tag {
            TAG_NULL => DlmsData::Null,
            TAG_ARRAY => DlmsData::Array(self.read_sequence()?),
            TAG_STRUCTURE => DlmsData::Structure(self.read_sequence()?),
            TAG_BOOLEAN => DlmsData::Boolean(self.read_u8()? != 0),
            TAG_BIT_STRING => {
                let bits = self.read_length()?;
                let bytes = self.read_bytes(bits.div_ceil(8))?.to_vec();
                DlmsData::BitString { bits, bytes }
            }
            TAG_DOUBLE_LONG => DlmsData::DoubleLong(i32::from_be_bytes(self.read_array()?)),
            TAG_DOUBLE_LONG_UNSIGNED => DlmsData::DoubleLongUnsigned(u32::from_be_bytes(self.read_array()?)),
            TAG_OCTET_STRING => {
                let length = self.read_length()?;
                DlmsData::OctetString(self.read_bytes(length)?.to_vec())
            }
            TAG_VISIBLE_STRING => {
                let length = self.read_length()?;
                DlmsData::VisibleString(String::from_utf8_lossy(self.read_bytes(length)?).into_owned())
            }
            TAG_UTF8_STRING => {
                let length = self.read_length()?;
                DlmsData::Utf8String(String::from_utf8_lossy(self.read_bytes(length)?).into_owned())
            }
            TAG_BCD => DlmsData::Bcd(self.read_u8()?),
            TAG_INTEGER => DlmsData::Integer(self.read_u8()? as i8),
            TAG_LONG => DlmsData::Long(i16::from_be_bytes(self.read_array()?)),
            TAG_UNSIGNED => DlmsData::Unsigned(self.read_u8()?),
            TAG_LONG_UNSIGNED => DlmsData::LongUnsigned(u16::from_be_bytes(self.read_array()?)),
            TAG_LONG64 => DlmsData::Long64(i64::from_be_bytes(self.read_array()?)),
            TAG_LONG64_UNSIGNED => DlmsData::Long64Unsigned(u64::from_be_bytes(self.read_array()?)),
            TAG_ENUM => DlmsData::Enum(self.read_u8()?),
            TAG_FLOAT32 => DlmsData::Float32(f32::from_be_bytes(self.read_array()?)),
            TAG_FLOAT64 => DlmsData::Float64(f64::from_be_bytes(self.read_array()?)),
            TAG_DATE_TIME => DlmsData::DateTime(self.read_array()?),
            TAG_DATE => DlmsData::Date(self.read_array()?),
            TAG_TIME => DlmsData::Time(self.read_array()?),
            TAG_COMPACT_ARRAY => return Err(DecodeError::UnsupportedType(tag)),
            _ => return Err(DecodeError::UnknownTag(tag, tag_pos)),
        };

        Ok(value)
    }

    fn read_sequence(&mut self) -> Result<Vec<DlmsData>, DecodeError> {
        if self.depth >= MAX_NESTING_DEPTH {
            return Err(DecodeError::NestingTooDeep(self.pos));
        }
        let count = self.read_length()?;

        /* every element needs at least its tag byte */
        if count > self.remaining() {
            return Err(DecodeError::Truncated { offset: self.pos, needed: count, length: self.data.len() });
        }

        self.depth += 1;
        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            items.push(self.read_data()?);
        }
        self.depth -= 1;
        Ok(items)
    }

    /// Length field: one byte below 0x80, otherwise 0x8N followed by N bytes
    fn read_length(&mut self) -> Result<usize, DecodeError> {
        let length_pos = self.pos;
        let first = self.read_u8()?;
        if first & 0x80 == 0 {
            return Ok(first as usize);
        }

        let count = (first & 0x7F) as usize;
        if count == 0 || count > 4 {
            return Err(DecodeError::InvalidLength(length_pos));
        }
        let bytes = self.read_bytes(count)?;
        Ok(bytes.iter().fold(0usize, |acc, b| (acc << 8) | *b as usize))
    }

    fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.read_bytes(1)?[0])
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    fn read_bytes(&mut self, count: usize) -> Result<&'a [u8], DecodeError> {
        let bytes = read_slice(self.data, self.pos, count)?;
        self.pos += count;
        Ok(bytes)
    }
}
