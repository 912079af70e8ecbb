use chrono::NaiveDateTime;
use log::debug;

use super::structs::NotificationPayload;
use super::utils::{parse_cosem_datetime, DATE_TIME_LENGTH};
use super::HdlcError;

pub const DATA_NOTIFICATION_TAG: u8 = 0x0F;
const OCTET_STRING_TAG: u8 = 0x09;

/// Splits a Data-Notification APDU into header fields and body.
///
/// ```text
/// 0F | long-invoke-id-and-priority (4) | date-time (00 | [09] 0C + 12) | body
/// ```
pub fn parse_data_notification(apdu: &[u8], received_at: NaiveDateTime) -> Result<NotificationPayload, HdlcError> {
    let tag = *apdu.first().ok_or(HdlcError::TruncatedApdu)?;
    if tag != DATA_NOTIFICATION_TAG {
        return Err(HdlcError::UnsupportedApdu(tag));
    }

    let invoke = apdu.get(1..5).ok_or(HdlcError::TruncatedApdu)?;
    let invoke_id = u32::from_be_bytes([invoke[0], invoke[1], invoke[2], invoke[3]]);

    let mut pos = 5;
    let mut length = *apdu.get(pos).ok_or(HdlcError::TruncatedApdu)?;
    pos += 1;

    /* Some meters tag the optional date-time as an explicit octet string */
    if length == OCTET_STRING_TAG {
        length = *apdu.get(pos).ok_or(HdlcError::TruncatedApdu)?;
        pos += 1;
    }

    let header_timestamp = match length as usize {
        0 => None,
        DATE_TIME_LENGTH => {
            let raw = apdu.get(pos..pos + DATE_TIME_LENGTH).ok_or(HdlcError::TruncatedApdu)?;
            pos += DATE_TIME_LENGTH;
            let ts = parse_cosem_datetime(raw);
            if ts.is_none() {
                debug!("Notification header date-time not specified: {}", hex::encode(raw));
            }
            ts
        }
        _ => return Err(HdlcError::InvalidDateTimeLength(length)),
    };

    let body = apdu[pos..].to_vec();
    if body.is_empty() {
        return Err(HdlcError::EmptyNotificationBody);
    }

    debug!("Data-Notification invoke id 0x{:08X}, body {} bytes", invoke_id, body.len());
    Ok(NotificationPayload { invoke_id, header_timestamp, body, received_at })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap()
    }

    #[test]
    fn test_notification_without_header_time() {
        let apdu = [0x0F, 0x00, 0x00, 0x01, 0x2C, 0x00, 0x02, 0x01, 0x11, 0x05];
        let payload = parse_data_notification(&apdu, now()).unwrap();
        assert_eq!(payload.invoke_id, 0x12C);
        assert_eq!(payload.header_timestamp, None);
        assert_eq!(payload.body, vec![0x02, 0x01, 0x11, 0x05]);
        assert_eq!(payload.fallback_timestamp(), now());
    }

    #[test]
    fn test_notification_with_header_time() {
        let mut apdu = vec![0x0F, 0x00, 0x00, 0x00, 0x01, 0x0C];
        apdu.extend_from_slice(&[0x07, 0xE6, 0x03, 0x01, 0x02, 0x0C, 0x00, 0x00, 0xFF, 0x80, 0x00, 0x00]);
        apdu.extend_from_slice(&[0x02, 0x00]);
        let payload = parse_data_notification(&apdu, now()).unwrap();
        let expected = NaiveDate::from_ymd_opt(2022, 3, 1).unwrap().and_hms_opt(12, 0, 0).unwrap();
        assert_eq!(payload.header_timestamp, Some(expected));
        assert_eq!(payload.fallback_timestamp(), expected);
        assert_eq!(payload.body, vec![0x02, 0x00]);
    }

    #[test]
    fn test_notification_with_tagged_header_time() {
        let mut apdu = vec![0x0F, 0x00, 0x00, 0x00, 0x01, 0x09, 0x0C];
        apdu.extend_from_slice(&[0x07, 0xE6, 0x03, 0x01, 0x02, 0x0C, 0x00, 0x00, 0xFF, 0x80, 0x00, 0x00]);
        apdu.push(0x02);
        let payload = parse_data_notification(&apdu, now()).unwrap();
        assert!(payload.header_timestamp.is_some());
        assert_eq!(payload.body, vec![0x02]);
    }

    #[test]
    fn test_rejects_other_apdus() {
        assert_eq!(parse_data_notification(&[0xDB, 0x08], now()), Err(HdlcError::UnsupportedApdu(0xDB)));
        assert_eq!(parse_data_notification(&[], now()), Err(HdlcError::TruncatedApdu));
        assert_eq!(parse_data_notification(&[0x0F, 0x00, 0x00], now()), Err(HdlcError::TruncatedApdu));
        assert_eq!(
            parse_data_notification(&[0x0F, 0x00, 0x00, 0x00, 0x01, 0x05, 0x01], now()),
            Err(HdlcError::InvalidDateTimeLength(5))
        );
        assert_eq!(
            parse_data_notification(&[0x0F, 0x00, 0x00, 0x00, 0x01, 0x00], now()),
            Err(HdlcError::EmptyNotificationBody)
        );
    }
}
