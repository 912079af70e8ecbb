use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

lazy_static! {
    /* Accepts the dotted form "1.0.1.8.0.255" as well as "1-0:1.8.0*255" and "1-0:1.8.0.255" */
    static ref OBIS_PATTERN: Regex =
        Regex::new(r"^(\d{1,3})[.\-](\d{1,3})[.:](\d{1,3})\.(\d{1,3})\.(\d{1,3})[.*](\d{1,3})$").unwrap();
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ObisError {
    #[error("Invalid OBIS code format: '{0}'")]
    InvalidFormat(String),
    #[error("OBIS group out of range in '{0}'")]
    GroupOutOfRange(String),
    #[error("OBIS code needs exactly 6 bytes, got {0}")]
    InvalidLength(usize),
}

/// A.B.C.D.E.F register identifier as it is carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ObisCode([u8; 6]);

impl ObisCode {
    pub const fn new(a: u8, b: u8, c: u8, d: u8, e: u8, f: u8) -> Self {
        ObisCode([a, b, c, d, e, f])
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ObisError> {
        let groups: [u8; 6] = bytes.try_into().map_err(|_| ObisError::InvalidLength(bytes.len()))?;
        Ok(ObisCode(groups))
    }

    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    /// IEC 62056-61 notation, e.g. `1-0:1.8.0*255`
    pub fn to_iec_string(&self) -> String {
        let g = &self.0;
        format!("{}-{}:{}.{}.{}*{}", g[0], g[1], g[2], g[3], g[4], g[5])
    }

    pub fn description(&self) -> Option<&'static str> {
        get_obis_description(self)
    }
}

impl fmt::Display for ObisCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let g = &self.0;
        write!(f, "{}.{}.{}.{}.{}.{}", g[0], g[1], g[2], g[3], g[4], g[5])
    }
}

impl FromStr for ObisCode {
    type Err = ObisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s.trim();
        let captures = OBIS_PATTERN
            .captures(code)
            .ok_or_else(|| ObisError::InvalidFormat(code.to_string()))?;

        let mut groups = [0u8; 6];
        for (i, group) in groups.iter_mut().enumerate() {
            *group = captures[i + 1]
                .parse::<u8>()
                .map_err(|_| ObisError::GroupOutOfRange(code.to_string()))?;
        }
        Ok(ObisCode(groups))
    }
}

impl TryFrom<String> for ObisCode {
    type Error = ObisError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ObisCode> for String {
    fn from(code: ObisCode) -> Self {
        code.to_string()
    }
}

pub fn get_obis_description(code: &ObisCode) -> Option<&'static str> {
    let descriptions = get_standard_obis_descriptions();
    descriptions.get(code).copied()
}

pub fn get_standard_obis_descriptions() -> HashMap<ObisCode, &'static str> {
    let mut map = HashMap::new();

    // Active energy
    map.insert(ObisCode::new(1, 0, 1, 8, 0, 255), "Active energy + (total)");
    map.insert(ObisCode::new(1, 0, 1, 8, 1, 255), "Active energy + (tariff 1)");
    map.insert(ObisCode::new(1, 0, 1, 8, 2, 255), "Active energy + (tariff 2)");
    map.insert(ObisCode::new(1, 0, 2, 8, 0, 255), "Active energy - (total)");
    map.insert(ObisCode::new(1, 0, 2, 8, 1, 255), "Active energy - (tariff 1)");
    map.insert(ObisCode::new(1, 0, 2, 8, 2, 255), "Active energy - (tariff 2)");

    // Active power
    map.insert(ObisCode::new(1, 0, 1, 7, 0, 255), "Active power + (total)");
    map.insert(ObisCode::new(1, 0, 2, 7, 0, 255), "Active power - (total)");

    // Reactive energy
    map.insert(ObisCode::new(1, 0, 3, 8, 0, 255), "Reactive energy + (total)");
    map.insert(ObisCode::new(1, 0, 3, 8, 1, 255), "Reactive energy + (tariff 1)");
    map.insert(ObisCode::new(1, 0, 3, 8, 2, 255), "Reactive energy + (tariff 2)");
    map.insert(ObisCode::new(1, 0, 4, 8, 0, 255), "Reactive energy - (total)");
    map.insert(ObisCode::new(1, 0, 4, 8, 1, 255), "Reactive energy - (tariff 1)");
    map.insert(ObisCode::new(1, 0, 4, 8, 2, 255), "Reactive energy - (tariff 2)");

    // Reactive power
    map.insert(ObisCode::new(1, 0, 3, 7, 0, 255), "Reactive power + (total)");
    map.insert(ObisCode::new(1, 0, 4, 7, 0, 255), "Reactive power - (total)");

    // Identification and clock
    map.insert(ObisCode::new(0, 0, 1, 0, 0, 255), "Clock");
    map.insert(ObisCode::new(0, 0, 96, 1, 0, 255), "Device ID 1 (serial number)");
    map.insert(ObisCode::new(0, 0, 42, 0, 0, 255), "COSEM logical device name");

    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_notations() {
        let expected = ObisCode::new(1, 0, 1, 8, 0, 255);
        assert_eq!("1.0.1.8.0.255".parse::<ObisCode>().unwrap(), expected);
        assert_eq!("1-0:1.8.0*255".parse::<ObisCode>().unwrap(), expected);
        assert_eq!("1-0:1.8.0.255".parse::<ObisCode>().unwrap(), expected);
        assert_eq!(" 1.0.1.8.0.255 ".parse::<ObisCode>().unwrap(), expected);
    }

    #[test]
    fn test_parse_invalid() {
        assert!("invalid".parse::<ObisCode>().is_err());
        assert!("1-0:1.8".parse::<ObisCode>().is_err());
        assert_eq!(
            "1.0.1.8.0.256".parse::<ObisCode>(),
            Err(ObisError::GroupOutOfRange("1.0.1.8.0.256".to_string()))
        );
    }

    #[test]
    fn test_display_forms() {
        let code = ObisCode::from_bytes(&[0x01, 0x00, 0x02, 0x07, 0x00, 0xFF]).unwrap();
        assert_eq!(code.to_string(), "1.0.2.7.0.255");
        assert_eq!(code.to_iec_string(), "1-0:2.7.0*255");
    }

    #[test]
    fn test_from_bytes_length() {
        assert_eq!(ObisCode::from_bytes(&[1, 0, 1]), Err(ObisError::InvalidLength(3)));
    }

    #[test]
    fn test_serde_as_string() {
        let code: ObisCode = serde_json::from_str("\"1-0:3.7.0*255\"").unwrap();
        assert_eq!(code, ObisCode::new(1, 0, 3, 7, 0, 255));
        assert_eq!(serde_json::to_string(&code).unwrap(), "\"1.0.3.7.0.255\"");
    }

    #[test]
    fn test_get_obis_description() {
        assert_eq!(ObisCode::new(1, 0, 1, 8, 1, 255).description(), Some("Active energy + (tariff 1)"));
        assert_eq!(ObisCode::new(9, 9, 9, 9, 9, 9).description(), None);
    }
}
