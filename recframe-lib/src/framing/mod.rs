//! Locating, validating and resynchronizing record frames.
mod integrity;
mod reconcile;
mod resync;
mod scanner;
mod validator;

use std::fmt::Display;

use serde::{Deserialize, Serialize};

pub use integrity::*;
pub use reconcile::*;
pub use resync::*;
pub use scanner::*;
pub use validator::*;

/// The kinds of record any built-in format can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Velocity,
    DiagnosticHeader,
    DiagnosticData,
    HardwareConfig,
    HeadConfig,
    UserConfig,
    Burst,
    CurrentProfile,
    StringData,
    Acceleration,
    AngularRate,
    Sensor,
    Nmea,
    /// Start and stop times closing a profiler file.
    ProfilerTime,
}

impl Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RecordKind::Velocity => "velocity",
            RecordKind::DiagnosticHeader => "diagnostic_header",
            RecordKind::DiagnosticData => "diagnostic_data",
            RecordKind::HardwareConfig => "hardware_config",
            RecordKind::HeadConfig => "head_config",
            RecordKind::UserConfig => "user_config",
            RecordKind::Burst => "burst",
            RecordKind::CurrentProfile => "current_profile",
            RecordKind::StringData => "string_data",
            RecordKind::Acceleration => "acceleration",
            RecordKind::AngularRate => "angular_rate",
            RecordKind::Sensor => "sensor",
            RecordKind::Nmea => "nmea",
            RecordKind::ProfilerTime => "profiler_time",
        };
        f.write_str(name)
    }
}

/// One candidate record's bytes, as located by a scanner and accepted by the validator.
///
/// For text formats `bytes` holds the line without its terminator, while `length`
/// still counts every input byte the frame consumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub offset: u64,
    pub length: u32,
    pub bytes: Vec<u8>,
}

impl RawFrame {
    /// Offset of the first input byte after this frame.
    #[must_use]
    pub fn end(&self) -> u64 {
        self.offset + u64::from(self.length)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Endian {
    #[default]
    Little,
    Big,
}

/// An unsigned integer stored at a fixed offset of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntField {
    pub offset: usize,
    /// Width in bytes; 1, 2 or 4.
    pub width: usize,
    #[serde(default)]
    pub endian: Endian,
    /// Bits of the stored value that hold the integer.
    #[serde(default)]
    pub mask: Option<u32>,
    /// Right shift applied after masking.
    #[serde(default)]
    pub shift: u32,
}

impl IntField {
    #[must_use]
    pub fn new(offset: usize, width: usize, endian: Endian) -> Self {
        IntField {
            offset,
            width,
            endian,
            mask: None,
            shift: 0,
        }
    }

    #[must_use]
    pub fn with_mask(mut self, mask: u32) -> Self {
        self.mask = Some(mask);
        self
    }

    #[must_use]
    pub fn with_shift(mut self, shift: u32) -> Self {
        self.shift = shift;
        self
    }

    /// Offset of the first byte after the field.
    #[must_use]
    pub fn end(&self) -> usize {
        self.offset + self.width
    }

    /// Read the field from `dat`, or `None` if `dat` is too short or the width is
    /// unsupported.
    #[must_use]
    pub fn read(&self, dat: &[u8]) -> Option<u32> {
        let bytes = dat.get(self.offset..self.end())?;
        let value = match (self.width, self.endian) {
            (1, _) => u32::from(bytes[0]),
            (2, Endian::Little) => u32::from(u16::from_le_bytes([bytes[0], bytes[1]])),
            (2, Endian::Big) => u32::from(u16::from_be_bytes([bytes[0], bytes[1]])),
            (4, Endian::Little) => u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            (4, Endian::Big) => u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            _ => return None,
        };
        let value = self.mask.map_or(value, |mask| value & mask);
        value.checked_shr(self.shift)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(IntField::new(1, 2, Endian::Little), Some(0x0201); "le16")]
    #[test_case(IntField::new(1, 2, Endian::Big), Some(0x0102); "be16")]
    #[test_case(IntField::new(0, 4, Endian::Big), Some(0x0001_0203); "be32")]
    #[test_case(IntField::new(0, 4, Endian::Little), Some(0x0302_0100); "le32")]
    #[test_case(IntField::new(3, 1, Endian::Little), Some(3); "u8")]
    #[test_case(IntField::new(3, 2, Endian::Little), None; "past end")]
    #[test_case(IntField::new(0, 3, Endian::Little), None; "bad width")]
    #[test_case(IntField::new(1, 2, Endian::Little).with_mask(0xff), Some(0x01); "masked")]
    #[test_case(IntField::new(2, 2, Endian::Big).with_mask(0x0f00).with_shift(8), Some(2); "masked nibble")]
    #[test_case(IntField::new(0, 1, Endian::Little).with_shift(40), None; "shift too wide")]
    fn read_int_field(field: IntField, expected: Option<u32>) {
        assert_eq!(field.read(&[0, 1, 2, 3]), expected);
    }

    #[test]
    fn kind_display_matches_serde() {
        let kind = RecordKind::DiagnosticHeader;
        let json = serde_json::to_string(&kind).unwrap();
        assert_eq!(json, format!("\"{kind}\""));
    }
}
