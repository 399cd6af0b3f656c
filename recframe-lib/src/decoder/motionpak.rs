//! MicroStrain MotionPak inertial records.
//!
//! Records have no sync marker; the first byte is the command echo identifying the
//! record, and each kind has a fixed length ending in a big-endian 16-bit byte sum.
//! Time comes from a free-running 62.5 kHz timer that wraps at 2^32.
use super::{DecodeError, DecodeResult, DecodedRecord, FieldReader, Fields, RecordDecoder};
use crate::config::{BinaryFraming, FormatConfig, Framing, KindSpec};
use crate::framing::{ChecksumPolicy, Endian, RawFrame, RecordKind};
use crate::rollover::RolloverSpec;

pub const ACCELERATION_ID: u8 = 0xcb;
pub const ANGULAR_RATE_ID: u8 = 0xcf;
pub const ACCELERATION_LEN: usize = 43;
pub const ANGULAR_RATE_LEN: usize = 31;

pub const TIMER: RolloverSpec = RolloverSpec {
    field: "timer",
    modulus: 1 << 32,
    ticks_per_second: 62_500.0,
};

const ACCELERATION_FIELDS: [&str; 9] = [
    "accel_x",
    "accel_y",
    "accel_z",
    "ang_rate_x",
    "ang_rate_y",
    "ang_rate_z",
    "mag_x",
    "mag_y",
    "mag_z",
];

const ANGULAR_RATE_FIELDS: [&str; 6] = [
    "roll",
    "pitch",
    "yaw",
    "ang_rate_x",
    "ang_rate_y",
    "ang_rate_z",
];

fn fixed(id: u8, kind: RecordKind, len: usize) -> KindSpec {
    KindSpec {
        id,
        kind,
        fixed_len: Some(len),
        checksum: None,
        elements: None,
    }
}

pub(super) fn default_config() -> FormatConfig {
    FormatConfig::builder()
        .format("motionpak")
        .framing(Framing::Binary(BinaryFraming {
            sync: vec![],
            markers: vec![],
            kind_offset: 0,
            header_len: 1,
            length: None,
            kinds: vec![
                fixed(ACCELERATION_ID, RecordKind::Acceleration, ACCELERATION_LEN),
                fixed(ANGULAR_RATE_ID, RecordKind::AngularRate, ANGULAR_RATE_LEN),
            ],
        }))
        .checksum(ChecksumPolicy::ByteSum {
            modulus: 65_535,
            endian: Endian::Big,
        })
        .max_frame_len(ACCELERATION_LEN)
        .build()
}

fn floats(r: &FieldReader, names: &[&'static str]) -> DecodeResult<Fields> {
    let mut fields = Fields::new();
    for (i, &name) in names.iter().enumerate() {
        let value = r.f32_be(name, 1 + i * 4)?;
        if !value.is_finite() {
            return Err(DecodeError::Range {
                field: name,
                value: value.to_string(),
            });
        }
        fields = fields.with(name, value);
    }
    Ok(fields)
}

/// Decodes MotionPak records. The timer is reported raw; sessions derive time from it
/// with [TIMER].
pub struct MotionPakDecoder;

impl RecordDecoder for MotionPakDecoder {
    fn supports(&self, kind: RecordKind) -> bool {
        matches!(kind, RecordKind::Acceleration | RecordKind::AngularRate)
    }

    fn decode(&self, frame: &RawFrame, kind: RecordKind) -> DecodeResult<DecodedRecord> {
        let r = FieldReader::new(&frame.bytes);
        let names: &[&'static str] = match kind {
            RecordKind::Acceleration => &ACCELERATION_FIELDS,
            RecordKind::AngularRate => &ANGULAR_RATE_FIELDS,
            _ => {
                return Err(DecodeError::Structural(format!(
                    "{kind} is not a motionpak record"
                )))
            }
        };
        let fields = floats(&r, names)?.with(TIMER.field, r.u32_be(TIMER.field, 1 + names.len() * 4)?);
        Ok(DecodedRecord::new(kind, fields, None))
    }

    fn rollover(&self) -> Option<RolloverSpec> {
        Some(TIMER)
    }
}
