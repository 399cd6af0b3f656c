//! Nortek Aquadopp binary records.
//!
//! Every record starts with sync byte `0xA5`, an id byte and its length in 16-bit
//! words, and ends with a running word-sum checksum seeded with `0xB58C`. A diagnostic
//! header declares how many diagnostic data records follow it.
use super::{
    unix_seconds, DecodeError, DecodeResult, DecodedRecord, FieldReader, Fields, RecordDecoder,
};
use crate::config::{BinaryFraming, FormatConfig, Framing, KindSpec, LengthField};
use crate::framing::{ChecksumPolicy, Endian, GroupSpec, IntField, RawFrame, RecordKind, NORTEK_CHECKSUM_BASE};

pub const SYNC: u8 = 0xa5;
pub const VELOCITY_ID: u8 = 0x01;
pub const DIAGNOSTIC_HEADER_ID: u8 = 0x06;
pub const DIAGNOSTIC_DATA_ID: u8 = 0x80;
pub const HARDWARE_CONFIG_ID: u8 = 0x05;
pub const HEAD_CONFIG_ID: u8 = 0x04;
pub const USER_CONFIG_ID: u8 = 0x00;

/// Diagnostic records expected when the diagnostic header is invalid or missing.
pub const DEFAULT_DIAGNOSTICS_COUNT: u32 = 20;

const KINDS: [(u8, RecordKind); 6] = [
    (VELOCITY_ID, RecordKind::Velocity),
    (DIAGNOSTIC_HEADER_ID, RecordKind::DiagnosticHeader),
    (DIAGNOSTIC_DATA_ID, RecordKind::DiagnosticData),
    (HARDWARE_CONFIG_ID, RecordKind::HardwareConfig),
    (HEAD_CONFIG_ID, RecordKind::HeadConfig),
    (USER_CONFIG_ID, RecordKind::UserConfig),
];

pub(super) fn default_config() -> FormatConfig {
    FormatConfig::builder()
        .format("aquadopp")
        .framing(Framing::Binary(BinaryFraming {
            sync: vec![SYNC],
            markers: vec![],
            kind_offset: 1,
            header_len: 4,
            length: Some(LengthField {
                field: IntField::new(2, 2, Endian::Little),
                scale: 2,
                adjust: 0,
            }),
            kinds: KINDS
                .iter()
                .map(|(id, kind)| KindSpec {
                    id: *id,
                    kind: *kind,
                    fixed_len: None,
                    checksum: None,
                    elements: None,
                })
                .collect(),
        }))
        .checksum(ChecksumPolicy::RunningSum {
            base: NORTEK_CHECKSUM_BASE,
        })
        .groups(vec![GroupSpec {
            header: RecordKind::DiagnosticHeader,
            detail: RecordKind::DiagnosticData,
            count: IntField::new(4, 2, Endian::Little),
            default_expected: Some(DEFAULT_DIAGNOSTICS_COUNT),
            header_time_from_detail: true,
        }])
        .max_frame_len(1024)
        .build()
}

fn bcd(field: &'static str, b: u8) -> DecodeResult<u8> {
    let (tens, ones) = (b >> 4, b & 0x0f);
    if tens > 9 || ones > 9 {
        return Err(DecodeError::Range {
            field,
            value: format!("0x{b:02x}"),
        });
    }
    Ok(tens * 10 + ones)
}

/// Instrument clock: minute, second, day, hour, year, month as BCD bytes.
fn clock(r: &FieldReader, offset: usize) -> DecodeResult<f64> {
    let raw = r.bytes("clock", offset, 6)?;
    let minute = bcd("minute", raw[0])?;
    let second = bcd("second", raw[1])?;
    let day = bcd("day", raw[2])?;
    let hour = bcd("hour", raw[3])?;
    let year = 2000 + i32::from(bcd("year", raw[4])?);
    let month = bcd("month", raw[5])?;
    unix_seconds("clock", (year, month, day), (hour, minute, second), 0)
}

/// Layout shared by velocity and diagnostic data records.
struct Sample {
    time: f64,
    error_code: u16,
    analog1: u16,
    battery_voltage: u16,
    sound_speed_analog2: u16,
    heading: i16,
    pitch: i16,
    roll: i16,
    pressure_mbar: u32,
    status: u8,
    temperature: i16,
    velocity: [i16; 3],
    amplitude: [u8; 3],
}

impl Sample {
    fn decode(dat: &[u8]) -> DecodeResult<Self> {
        let r = FieldReader::new(dat);
        let pressure_msb = r.u8("pressure_msb", 24)?;
        let pressure_lsw = r.u16_le("pressure_lsw", 26)?;
        Ok(Sample {
            time: clock(&r, 4)?,
            error_code: r.u16_le("error_code", 10)?,
            analog1: r.u16_le("analog1", 12)?,
            battery_voltage: r.u16_le("battery_voltage", 14)?,
            sound_speed_analog2: r.u16_le("sound_speed_analog2", 16)?,
            heading: r.i16_le("heading", 18)?,
            pitch: r.i16_le("pitch", 20)?,
            roll: r.i16_le("roll", 22)?,
            pressure_mbar: (u32::from(pressure_msb) << 16) + u32::from(pressure_lsw),
            status: r.u8("status", 25)?,
            temperature: r.i16_le("temperature", 28)?,
            velocity: [
                r.i16_le("velocity_beam1", 30)?,
                r.i16_le("velocity_beam2", 32)?,
                r.i16_le("velocity_beam3", 34)?,
            ],
            amplitude: [
                r.u8("amplitude_beam1", 36)?,
                r.u8("amplitude_beam2", 37)?,
                r.u8("amplitude_beam3", 38)?,
            ],
        })
    }

    fn into_record(self, kind: RecordKind) -> DecodedRecord {
        let fields = Fields::new()
            .with("error_code", self.error_code)
            .with("analog1", self.analog1)
            .with("battery_voltage", self.battery_voltage)
            .with("sound_speed_analog2", self.sound_speed_analog2)
            .with("heading", self.heading)
            .with("pitch", self.pitch)
            .with("roll", self.roll)
            .with("pressure_mbar", self.pressure_mbar)
            .with("status", self.status)
            .with("temperature", self.temperature)
            .with("velocity", self.velocity.map(i64::from).to_vec())
            .with("amplitude", self.amplitude.map(i64::from).to_vec());
        DecodedRecord::new(kind, fields, Some(self.time))
    }
}

fn diagnostic_header(dat: &[u8]) -> DecodeResult<Fields> {
    let r = FieldReader::new(dat);
    let noise = r.bytes("noise_amplitude", 8, 4)?;
    let mut magnitude = Vec::with_capacity(4);
    let mut distance = Vec::with_capacity(4);
    for beam in 0..4 {
        magnitude.push(i64::from(r.u16_le("processing_magnitude", 12 + beam * 2)?));
        distance.push(i64::from(r.u16_le("distance", 20 + beam * 2)?));
    }
    Ok(Fields::new()
        .with("records_to_follow", r.u16_le("records_to_follow", 4)?)
        .with("cell_number_diagnostics", r.u16_le("cell_number_diagnostics", 6)?)
        .with("noise_amplitude", noise.iter().map(|b| i64::from(*b)).collect::<Vec<_>>())
        .with("processing_magnitude", magnitude)
        .with("distance", distance))
}

fn hardware_config(dat: &[u8]) -> DecodeResult<Fields> {
    let r = FieldReader::new(dat);
    Ok(Fields::new()
        .with("serial_number", r.ascii("serial_number", 4, 14)?)
        .with("pic_version", r.u16_le("pic_version", 22)?)
        .with("hardware_revision", r.u16_le("hardware_revision", 24)?)
        .with(
            "recorder_size",
            u64::from(r.u16_le("recorder_size", 26)?) * 65536,
        )
        .with("velocity_range", r.u16_le("velocity_range", 28)? & 0x0001)
        .with("firmware_version", r.ascii("firmware_version", 42, 4)?))
}

fn head_config(dat: &[u8]) -> DecodeResult<Fields> {
    let r = FieldReader::new(dat);
    let config = r.u16_le("config", 4)?;
    Ok(Fields::new()
        .with("pressure_sensor", config & 0x0001 != 0)
        .with("magnetometer", config & 0x0002 != 0)
        .with("tilt_sensor", config & 0x0004 != 0)
        .with("tilt_sensor_mounting", config & 0x0008 != 0)
        .with("head_frequency", r.u16_le("head_frequency", 6)?)
        .with("head_type", r.u16_le("head_type", 8)?)
        .with("head_serial_number", r.ascii("head_serial_number", 10, 12)?)
        .with("number_of_beams", r.u16_le("number_of_beams", 220)?))
}

fn user_config(dat: &[u8]) -> DecodeResult<Fields> {
    let r = FieldReader::new(dat);
    let mode = r.u16_le("mode", 58)?;
    let mut fields = Fields::new();
    for (name, offset) in [
        ("transmit_pulse_length", 4),
        ("blanking_distance", 6),
        ("receive_length", 8),
        ("time_between_pings", 10),
        ("time_between_bursts", 12),
        ("number_of_beam_sequences", 14),
        ("average_interval", 16),
        ("compass_update_rate", 30),
        ("coordinate_system", 32),
        ("number_cells", 34),
        ("measurement_interval", 38),
    ] {
        fields = fields.with(name, r.u16_le(name, offset)?);
    }
    Ok(fields
        .with("deployment_name", r.ascii("deployment_name", 40, 6)?)
        .with("diagnostics_interval", r.u32_le("diagnostics_interval", 54)?)
        .with("use_specified_sound_speed", mode & 0x0001 != 0)
        .with("diagnostics_mode_enable", mode & 0x0002 != 0)
        .with("analog_output_enable", mode & 0x0004 != 0)
        .with("sound_speed_adjust_factor", r.u16_le("sound_speed_adjust_factor", 60)?)
        .with("number_diagnostic_samples", r.u16_le("number_diagnostic_samples", 62)?)
        .with("number_beams_diagnostics", r.u16_le("number_beams_diagnostics", 64)?)
        .with("number_pings_diagnostic", r.u16_le("number_pings_diagnostic", 66)?)
        .with("software_version", r.u16_le("software_version", 72)?))
}

pub struct AquadoppDecoder;

impl RecordDecoder for AquadoppDecoder {
    fn supports(&self, kind: RecordKind) -> bool {
        KINDS.iter().any(|(_, k)| *k == kind)
    }

    fn decode(&self, frame: &RawFrame, kind: RecordKind) -> DecodeResult<DecodedRecord> {
        let dat = &frame.bytes;
        let fields = match kind {
            RecordKind::Velocity | RecordKind::DiagnosticData => {
                return Ok(Sample::decode(dat)?.into_record(kind));
            }
            RecordKind::DiagnosticHeader => diagnostic_header(dat)?,
            RecordKind::HardwareConfig => hardware_config(dat)?,
            RecordKind::HeadConfig => head_config(dat)?,
            RecordKind::UserConfig => user_config(dat)?,
            _ => {
                return Err(DecodeError::Structural(format!(
                    "{kind} is not an aquadopp record"
                )))
            }
        };
        Ok(DecodedRecord::new(kind, fields, None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::Value;

    fn velocity() -> Vec<u8> {
        let mut rec = vec![0u8; 42];
        rec[..4].copy_from_slice(&[SYNC, VELOCITY_ID, 21, 0]);
        // 2014-06-15 12:30:45
        rec[4..10].copy_from_slice(&[0x30, 0x45, 0x15, 0x12, 0x14, 0x06]);
        rec[14..16].copy_from_slice(&120u16.to_le_bytes());
        rec[18..20].copy_from_slice(&(-5i16).to_le_bytes());
        rec[24] = 0x01;
        rec[26..28].copy_from_slice(&0x0203u16.to_le_bytes());
        rec[30..32].copy_from_slice(&(-100i16).to_le_bytes());
        rec[36] = 7;
        rec
    }

    fn frame(bytes: Vec<u8>) -> RawFrame {
        RawFrame {
            offset: 0,
            length: bytes.len() as u32,
            bytes,
        }
    }

    #[test]
    fn velocity_record() {
        let record = AquadoppDecoder
            .decode(&frame(velocity()), RecordKind::Velocity)
            .unwrap();
        assert_eq!(record.kind(), RecordKind::Velocity);
        assert_eq!(record.get("battery_voltage"), Some(&Value::UInt(120)));
        assert_eq!(record.get("heading"), Some(&Value::Int(-5)));
        assert_eq!(record.get("pressure_mbar"), Some(&Value::UInt(0x0001_0203)));
        assert_eq!(record.get("velocity"), Some(&Value::Ints(vec![-100, 0, 0])));
        assert_eq!(record.get("amplitude"), Some(&Value::Ints(vec![7, 0, 0])));
        // 2014-06-15T12:30:45Z
        let ts = record.derived_timestamp().unwrap();
        assert!((ts - 1_402_835_445.0).abs() < 1e-3, "{ts}");
    }

    #[test]
    fn bad_bcd_is_range_error() {
        let mut rec = velocity();
        rec[9] = 0x1a;
        assert!(matches!(
            AquadoppDecoder.decode(&frame(rec), RecordKind::Velocity),
            Err(DecodeError::Range { field: "month", .. })
        ));
    }

    #[test]
    fn impossible_date_is_range_error() {
        let mut rec = velocity();
        rec[9] = 0x13;
        assert!(matches!(
            AquadoppDecoder.decode(&frame(rec), RecordKind::Velocity),
            Err(DecodeError::Range { field: "clock", .. })
        ));
    }

    #[test]
    fn short_record_is_structural() {
        let rec = velocity()[..30].to_vec();
        assert!(matches!(
            AquadoppDecoder.decode(&frame(rec), RecordKind::DiagnosticData),
            Err(DecodeError::Structural(_))
        ));
    }

    #[test]
    fn diagnostic_header_record() {
        let mut rec = vec![0u8; 36];
        rec[..6].copy_from_slice(&[SYNC, DIAGNOSTIC_HEADER_ID, 18, 0, 5, 0]);
        rec[8] = 9;
        let record = AquadoppDecoder
            .decode(&frame(rec), RecordKind::DiagnosticHeader)
            .unwrap();
        assert_eq!(record.get("records_to_follow"), Some(&Value::UInt(5)));
        assert_eq!(
            record.get("noise_amplitude"),
            Some(&Value::Ints(vec![9, 0, 0, 0]))
        );
        assert!(record.derived_timestamp().is_none());
    }

    #[test]
    fn hardware_config_record() {
        let mut rec = vec![0u8; 48];
        rec[..4].copy_from_slice(&[SYNC, HARDWARE_CONFIG_ID, 24, 0]);
        rec[4..12].copy_from_slice(b"AQD 8493");
        rec[26..28].copy_from_slice(&2u16.to_le_bytes());
        rec[28] = 0x03;
        rec[42..46].copy_from_slice(b"3.39");
        let record = AquadoppDecoder
            .decode(&frame(rec), RecordKind::HardwareConfig)
            .unwrap();
        assert_eq!(record.get("serial_number").and_then(Value::as_str), Some("AQD 8493"));
        assert_eq!(record.get("recorder_size"), Some(&Value::UInt(131_072)));
        assert_eq!(record.get("velocity_range"), Some(&Value::UInt(1)));
        assert_eq!(record.get("firmware_version").and_then(Value::as_str), Some("3.39"));
    }

    #[test]
    fn configs_decode_at_full_length() {
        let head = [&[SYNC, HEAD_CONFIG_ID, 112, 0][..], &[0u8; 220]].concat();
        assert!(AquadoppDecoder
            .decode(&frame(head), RecordKind::HeadConfig)
            .is_ok());
        let user = [&[SYNC, USER_CONFIG_ID, 0, 1][..], &[0u8; 508]].concat();
        assert!(AquadoppDecoder
            .decode(&frame(user), RecordKind::UserConfig)
            .is_ok());
    }
}
