//! Lines captured by a data concentrator logger (DCL).
//!
//! The logger prefixes every line it records with its own clock as
//! `YYYY/MM/DD HH:MM:SS.mmm`. Sensor lines follow it with whitespace separated
//! numbers; NMEA sentences follow it with a `$...*HH` sentence; logger metadata lines
//! carry a bracketed `[label]` and no record.
use super::{unix_seconds, DecodeError, DecodeResult, DecodedRecord, Fields, RecordDecoder};
use crate::config::{FormatConfig, Framing, PatternSpec, TextFraming};
use crate::framing::{ChecksumPolicy, RawFrame, RecordKind};

const TIMESTAMP: &str = r"\d{4}/\d{2}/\d{2} \d{2}:\d{2}:\d{2}\.\d{3}";
const TIMESTAMP_LEN: usize = 23;
const NUMBER: &str = r"[-+]?(?:\d+\.?\d*|\.\d+)(?:[eE][-+]?\d+)?";

pub(super) fn default_config() -> FormatConfig {
    FormatConfig::builder()
        .format("dcl")
        .framing(Framing::Text(TextFraming {
            patterns: vec![
                PatternSpec {
                    kind: RecordKind::Nmea,
                    pattern: format!(r"{TIMESTAMP} \$[^*\r\n]*\*[0-9A-Fa-f]{{2}}\s*"),
                    // the logged instruments include the '$' in the XOR
                    checksum: Some(ChecksumPolicy::NmeaXor {
                        include_marker: true,
                    }),
                },
                PatternSpec {
                    kind: RecordKind::Sensor,
                    pattern: format!(r"{TIMESTAMP}(?:[ \t,]+{NUMBER})+\s*"),
                    checksum: None,
                },
            ],
            ignore: vec![format!(r"{TIMESTAMP} \[[^\]]*\].*")],
        }))
        .build()
}

/// Split a logged line into its logger time, in Unix seconds, and the rest of the line.
fn logger_time(line: &str) -> DecodeResult<(f64, &str)> {
    let (stamp, rest) = match (line.get(..TIMESTAMP_LEN), line.get(TIMESTAMP_LEN..)) {
        (Some(stamp), Some(rest)) => (stamp, rest),
        _ => {
            return Err(DecodeError::Structural(format!(
                "line of {} bytes has no logger timestamp",
                line.len()
            )))
        }
    };
    let num = |range: std::ops::Range<usize>| -> DecodeResult<u32> {
        stamp
            .get(range)
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| DecodeError::Structural(format!("malformed logger timestamp {stamp:?}")))
    };
    let (year, month, day) = (num(0..4)?, num(5..7)?, num(8..10)?);
    let (hour, minute, second, millis) = (num(11..13)?, num(14..16)?, num(17..19)?, num(20..23)?);
    // two digit fields always fit a u8
    let ts = unix_seconds(
        "logger_timestamp",
        (year as i32, month as u8, day as u8),
        (hour as u8, minute as u8, second as u8),
        millis * 1_000_000,
    )?;
    Ok((ts, rest))
}

fn sensor(rest: &str) -> DecodeResult<Fields> {
    let values = rest
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<f64>()
                .map_err(|_| DecodeError::Structural(format!("non-numeric sensor value {s:?}")))
        })
        .collect::<DecodeResult<Vec<_>>>()?;
    if values.is_empty() {
        return Err(DecodeError::Structural("sensor line has no values".into()));
    }
    Ok(Fields::new().with("values", values))
}

fn nmea(rest: &str) -> DecodeResult<Fields> {
    let sentence = rest.trim();
    let body = sentence
        .strip_prefix('$')
        .and_then(|s| s.rsplit_once('*'))
        .map(|(body, _)| body)
        .ok_or_else(|| DecodeError::Structural(format!("not an NMEA sentence: {sentence:?}")))?;
    let mut parts = body.split(',');
    let id = parts.next().unwrap_or_default();
    if id.is_empty() {
        return Err(DecodeError::Structural("NMEA sentence has no identifier".into()));
    }
    Ok(Fields::new()
        .with("sentence_id", id.to_string())
        .with("field_count", parts.count() as u64)
        .with("sentence", sentence.to_string()))
}

pub struct DclDecoder;

impl RecordDecoder for DclDecoder {
    fn supports(&self, kind: RecordKind) -> bool {
        matches!(kind, RecordKind::Sensor | RecordKind::Nmea)
    }

    fn decode(&self, frame: &RawFrame, kind: RecordKind) -> DecodeResult<DecodedRecord> {
        let line = std::str::from_utf8(&frame.bytes)
            .map_err(|err| DecodeError::Structural(format!("line is not text: {err}")))?;
        let (ts, rest) = logger_time(line)?;
        let fields = match kind {
            RecordKind::Sensor => sensor(rest)?,
            RecordKind::Nmea => nmea(rest)?,
            _ => return Err(DecodeError::Structural(format!("{kind} is not a dcl record"))),
        };
        Ok(DecodedRecord::new(kind, fields, Some(ts)))
    }
}
