use chrono::{NaiveDate, NaiveDateTime};
use crc16::{State, X_25};

use super::DecodeError;

/// Length of a COSEM date-time octet string
pub const DATE_TIME_LENGTH: usize = 12;

/// HDLC FCS-16 (ISO/IEC 13239), transmitted least significant byte first
pub fn fcs16(data: &[u8]) -> u16 {
    State::<X_25>::calculate(data)
}

pub fn verify_fcs(data: &[u8], received: &[u8]) -> Result<(), (u16, u16)> {
    let expected = fcs16(data);
    let actual = u16::from_le_bytes([received[0], received[1]]);
    if expected == actual {
        Ok(())
    } else {
        Err((expected, actual))
    }
}

/// Bounds-checked view into a payload; never reads past the end
pub fn read_slice(data: &[u8], offset: usize, needed: usize) -> Result<&[u8], DecodeError> {
    offset
        .checked_add(needed)
        .and_then(|end| data.get(offset..end))
        .ok_or(DecodeError::Truncated { offset, needed, length: data.len() })
}

/// Decodes the 12 byte COSEM date-time.
///
/// Layout: year (u16 BE), month, day, weekday, hour, minute, second,
/// hundredths, deviation (i16 BE), clock status. Weekday, hundredths,
/// deviation and clock status do not contribute to the value; the result is
/// a naive local time. Returns `None` for "not specified" or impossible dates.
pub fn parse_cosem_datetime(bytes: &[u8]) -> Option<NaiveDateTime> {
    if bytes.len() != DATE_TIME_LENGTH {
        return None;
    }

    let year = u16::from_be_bytes([bytes[0], bytes[1]]);
    let month = bytes[2];
    let day = bytes[3];
    if year == 0xFFFF || month == 0 || month > 12 || day == 0 || day > 31 {
        return None;
    }

    /* 0xFF marks a time field as not specified */
    let unspecified_to_zero = |v: u8| if v == 0xFF { 0 } else { v as u32 };
    let hour = unspecified_to_zero(bytes[5]);
    let minute = unspecified_to_zero(bytes[6]);
    let second = unspecified_to_zero(bytes[7]);

    NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)?.and_hms_opt(hour, minute, second)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fcs16_check_value() {
        /* CRC-16/X-25 check value for "123456789" */
        assert_eq!(fcs16(b"123456789"), 0x906E);
    }

    #[test]
    fn test_verify_fcs() {
        let data = [0xA0, 0x08, 0x03, 0x21, 0x93];
        let fcs = fcs16(&data).to_le_bytes();
        assert!(verify_fcs(&data, &fcs).is_ok());
        assert!(verify_fcs(&data, &[fcs[0] ^ 0x01, fcs[1]]).is_err());
    }

    #[test]
    fn test_read_slice_bounds() {
        let data = [1u8, 2, 3, 4];
        assert_eq!(read_slice(&data, 1, 2).unwrap(), &[2, 3]);
        assert_eq!(
            read_slice(&data, 3, 2),
            Err(DecodeError::Truncated { offset: 3, needed: 2, length: 4 })
        );
        assert!(read_slice(&data, usize::MAX, 2).is_err());
    }

    #[test]
    fn test_parse_cosem_datetime() {
        let bytes = [0x07, 0xE6, 0x03, 0x01, 0x02, 0x0C, 0x00, 0x00, 0xFF, 0x80, 0x00, 0x00];
        let ts = parse_cosem_datetime(&bytes).unwrap();
        assert_eq!(ts, NaiveDate::from_ymd_opt(2022, 3, 1).unwrap().and_hms_opt(12, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_cosem_datetime_not_specified() {
        let mut bytes = [0xFF, 0xFF, 0x03, 0x01, 0x02, 0x0C, 0x00, 0x00, 0xFF, 0x80, 0x00, 0x00];
        assert_eq!(parse_cosem_datetime(&bytes), None);
        bytes[0] = 0x07;
        bytes[1] = 0xE6;
        bytes[2] = 13;
        assert_eq!(parse_cosem_datetime(&bytes), None);
        /* February 30th */
        bytes[2] = 2;
        bytes[3] = 30;
        assert_eq!(parse_cosem_datetime(&bytes), None);
        assert_eq!(parse_cosem_datetime(&bytes[..11]), None);
    }
}
