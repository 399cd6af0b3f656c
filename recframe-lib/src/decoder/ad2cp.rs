//! Nortek AD2CP records as written by a wire following profiler.
//!
//! A 10 byte header (sync, header size, id, family, data size, data checksum, header
//! checksum) precedes each payload. The header checksum protects the declared data
//! size, so a header that fails its checksum halts parsing by default.
//!
//! The profiler wraps the records in a 4 byte file header and closes the file with
//! the start and stop times of the profile. Profiles are timed from the start time at
//! a fixed sample interval.
use super::{unix_seconds, DecodeError, DecodeResult, DecodedRecord, FieldReader, Fields, RecordDecoder};
use crate::config::{
    BinaryFraming, ElementSpec, Envelope, FormatConfig, Framing, HeaderFailurePolicy, KindSpec,
    LengthField, Marker, SampleClock, TrailerSpec,
};
use crate::framing::{ChecksumPolicy, Endian, IntField, RawFrame, RecordKind, NORTEK_CHECKSUM_BASE};

pub const SYNC: u8 = 0xa5;
pub const HEADER_LEN: usize = 10;
pub const FAMILY: u8 = 0x10;
pub const BURST_ID: u8 = 0x15;
pub const CURRENT_PROFILE_ID: u8 = 0x16;
pub const STRING_ID: u8 = 0xa0;

pub const FILE_HEADER_LEN: usize = 4;
/// Big endian start and stop times, in Unix seconds.
pub const TIME_RECORD_LEN: usize = 8;
/// Seconds between profiler samples.
pub const SAMPLE_INTERVAL: f64 = 0.5;

// payload offsets
const BEAMS_COORDINATE: usize = 34;
const DATA: usize = 68;
// velocity (2), amplitude (1) and correlation (1)
const BEAM_CELL_SIZE: usize = 4;

const CELLS_MASK: u16 = 0x03ff;
const BEAMS_SHIFT: u16 = 12;

fn profile_kind(id: u8, kind: RecordKind) -> KindSpec {
    let beams_coordinate = IntField::new(HEADER_LEN + BEAMS_COORDINATE, 2, Endian::Little);
    KindSpec {
        id,
        kind,
        fixed_len: None,
        checksum: None,
        elements: Some(ElementSpec {
            count: beams_coordinate.with_mask(u32::from(CELLS_MASK)),
            per_count: Some(
                beams_coordinate
                    .with_mask(0xf000)
                    .with_shift(u32::from(BEAMS_SHIFT)),
            ),
            data_offset: HEADER_LEN + DATA,
            element_size: BEAM_CELL_SIZE,
        }),
    }
}

pub(super) fn default_config() -> FormatConfig {
    FormatConfig::builder()
        .format("ad2cp")
        .framing(Framing::Binary(BinaryFraming {
            sync: vec![SYNC],
            markers: vec![Marker {
                offset: 3,
                value: FAMILY,
            }],
            kind_offset: 2,
            header_len: HEADER_LEN,
            length: Some(LengthField {
                field: IntField::new(4, 2, Endian::Little),
                scale: 1,
                adjust: HEADER_LEN as i64,
            }),
            kinds: vec![
                profile_kind(BURST_ID, RecordKind::Burst),
                profile_kind(CURRENT_PROFILE_ID, RecordKind::CurrentProfile),
                KindSpec {
                    id: STRING_ID,
                    kind: RecordKind::StringData,
                    fixed_len: None,
                    checksum: None,
                    elements: None,
                },
            ],
        }))
        .checksum(ChecksumPolicy::SplitHeader {
            base: NORTEK_CHECKSUM_BASE,
            header_len: HEADER_LEN,
            header_checksum: 8,
            payload_checksum: 6,
        })
        .header_failure(HeaderFailurePolicy::Halt)
        .max_frame_len(HEADER_LEN + usize::from(u16::MAX))
        .envelope(Envelope {
            header_len: FILE_HEADER_LEN,
            trailer: Some(TrailerSpec {
                len: TIME_RECORD_LEN,
                kind: RecordKind::ProfilerTime,
                clock: Some(SampleClock {
                    interval: SAMPLE_INTERVAL,
                    sampled: vec![RecordKind::Burst, RecordKind::CurrentProfile],
                }),
            }),
        })
        .build()
}

/// Split the 16-bit data set description into five 3-bit beam assignments.
fn data_set_description(value: u16) -> Vec<i64> {
    (0..5).map(|i| i64::from((value >> (3 * i)) & 0x7)).collect()
}

fn profile(dat: &[u8]) -> DecodeResult<(Fields, f64)> {
    let r = FieldReader::new(dat.get(HEADER_LEN..).unwrap_or_default());
    let time = r.bytes("date_time", 8, 6)?;
    let micro100 = r.u16_le("micro_second", 14)?;
    let ts = unix_seconds(
        "date_time",
        (1900 + i32::from(time[0]), time[1].saturating_add(1), time[2]),
        (time[3], time[4], time[5]),
        u32::from(micro100) * 100_000,
    )?;

    let beams_coordinate = r.u16_le("beams_coordinate", BEAMS_COORDINATE)?;
    let cells = usize::from(beams_coordinate & CELLS_MASK);
    let beams = usize::from(beams_coordinate >> BEAMS_SHIFT);
    let n = cells * beams;
    let velocity = (0..n)
        .map(|i| r.i16_le("velocity", DATA + i * 2).map(i64::from))
        .collect::<DecodeResult<Vec<_>>>()?;
    let amplitude = r.bytes("amplitude", DATA + n * 2, n)?;
    let correlation = r.bytes("correlation", DATA + n * 3, n)?;

    let fields = Fields::new()
        .with("version", r.u8("version", 0)?)
        .with("date_time", ts)
        .with("serial", r.u32_le("serial", 2)?)
        .with("configuration", r.u16_le("configuration", 6)?)
        .with("speed_sound", r.u16_le("speed_sound", 16)?)
        .with("temp_c", r.i16_le("temp_c", 18)?)
        .with("pressure", r.u32_le("pressure", 20)?)
        .with("heading", r.u16_le("heading", 24)?)
        .with("pitch", r.i16_le("pitch", 26)?)
        .with("roll", r.i16_le("roll", 28)?)
        .with("error", r.u16_le("error", 30)?)
        .with("status", r.u16_le("status", 32)?)
        .with("beams_coordinate", beams_coordinate)
        .with("cell_size", r.u16_le("cell_size", 36)?)
        .with("blanking", r.u16_le("blanking", 38)?)
        .with("velocity_range", r.u16_le("velocity_range", 40)?)
        .with("battery_voltage", r.u16_le("battery_voltage", 42)?)
        .with(
            "magnetometer",
            vec![
                i64::from(r.i16_le("mag_x", 44)?),
                i64::from(r.i16_le("mag_y", 46)?),
                i64::from(r.i16_le("mag_z", 48)?),
            ],
        )
        .with(
            "accelerometer",
            vec![
                i64::from(r.i16_le("acc_x", 50)?),
                i64::from(r.i16_le("acc_y", 52)?),
                i64::from(r.i16_le("acc_z", 54)?),
            ],
        )
        .with("ambiguity", r.u16_le("ambiguity", 56)?)
        .with(
            "data_set_description",
            data_set_description(r.u16_le("data_set_description", 58)?),
        )
        .with("transmit_energy", r.u16_le("transmit_energy", 60)?)
        .with("v_scale", i64::from(r.i8("v_scale", 62)?))
        .with("power_level", i64::from(r.i8("power_level", 63)?))
        .with("velocity", velocity)
        .with("amplitude", amplitude.iter().map(|b| i64::from(*b)).collect::<Vec<_>>())
        .with("correlation", correlation.iter().map(|b| i64::from(*b)).collect::<Vec<_>>());
    Ok((fields, ts))
}

fn time_record(dat: &[u8]) -> DecodeResult<(Fields, f64)> {
    let r = FieldReader::new(dat);
    let time_on = r.u32_be("time_on", 0)?;
    let time_off = r.u32_be("time_off", 4)?;
    let fields = Fields::new()
        .with("time_on", time_on)
        .with("time_off", time_off);
    Ok((fields, f64::from(time_on)))
}

fn string_record(dat: &[u8]) -> DecodeResult<Fields> {
    let r = FieldReader::new(dat);
    let len = dat.len().saturating_sub(HEADER_LEN + 1);
    Ok(Fields::new()
        .with("string_id", r.u8("string_id", HEADER_LEN)?)
        .with("string", r.ascii("string", HEADER_LEN + 1, len)?))
}

pub struct Ad2cpDecoder;

impl RecordDecoder for Ad2cpDecoder {
    fn supports(&self, kind: RecordKind) -> bool {
        matches!(
            kind,
            RecordKind::Burst
                | RecordKind::CurrentProfile
                | RecordKind::StringData
                | RecordKind::ProfilerTime
        )
    }

    fn decode(&self, frame: &RawFrame, kind: RecordKind) -> DecodeResult<DecodedRecord> {
        match kind {
            RecordKind::Burst | RecordKind::CurrentProfile => {
                let (fields, ts) = profile(&frame.bytes)?;
                Ok(DecodedRecord::new(kind, fields, Some(ts)))
            }
            RecordKind::StringData => Ok(DecodedRecord::new(kind, string_record(&frame.bytes)?, None)),
            RecordKind::ProfilerTime => {
                let (fields, ts) = time_record(&frame.bytes)?;
                Ok(DecodedRecord::new(kind, fields, Some(ts)))
            }
            _ => Err(DecodeError::Structural(format!("{kind} is not an ad2cp record"))),
        }
    }
}
