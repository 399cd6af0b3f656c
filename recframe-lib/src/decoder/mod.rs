//! Turning validated frames into typed records.
//!
//! Each built-in format pairs a [RecordDecoder] with a default
//! [FormatConfig](crate::FormatConfig); [FormatId] is the registry mapping a format
//! identifier to both.
mod ad2cp;
mod aquadopp;
mod dcl;
mod motionpak;

use std::fmt::Display;
use std::str::FromStr;

use hifitime::Epoch;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

pub use ad2cp::Ad2cpDecoder;
pub use aquadopp::AquadoppDecoder;
pub use dcl::DclDecoder;
pub use motionpak::MotionPakDecoder;

use crate::config::FormatConfig;
use crate::framing::{RawFrame, RecordKind};
use crate::prelude::*;
use crate::rollover::RolloverSpec;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// A required field is physically absent; the record is unusable.
    #[error("structural: {0}")]
    Structural(String),
    /// A field decoded to a value outside its declared bounds.
    #[error("{field} out of range: {value}")]
    Range { field: &'static str, value: String },
}

pub type DecodeResult<T> = std::result::Result<T, DecodeError>;

#[derive(Debug, Clone, PartialEq, Serialize, derive_more::From)]
#[serde(untagged)]
pub enum Value {
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
    Ints(Vec<i64>),
    Floats(Vec<f64>),
}

impl Value {
    #[must_use]
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::UInt(v) => Some(*v),
            Value::Int(v) => u64::try_from(*v).ok(),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl From<u8> for Value {
    fn from(v: u8) -> Self {
        Value::UInt(u64::from(v))
    }
}

impl From<u16> for Value {
    fn from(v: u16) -> Self {
        Value::UInt(u64::from(v))
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::UInt(u64::from(v))
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(f64::from(v))
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::UInt(u64::from(v))
    }
}

/// Named values in decode order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Fields(Vec<(&'static str, Value)>);

impl Fields {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with<V: Into<Value>>(mut self, name: &'static str, value: V) -> Self {
        self.0.push((name, value.into()));
        self
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.iter().find(|(n, _)| *n == name).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &Value)> {
        self.0.iter().map(|(n, v)| (*n, v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for Fields {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, value) in &self.0 {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// A decoded record. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedRecord {
    kind: RecordKind,
    fields: Fields,
    derived_timestamp: Option<f64>,
}

impl DecodedRecord {
    #[must_use]
    pub fn new(kind: RecordKind, fields: Fields, derived_timestamp: Option<f64>) -> Self {
        DecodedRecord {
            kind,
            fields,
            derived_timestamp,
        }
    }

    #[must_use]
    pub fn kind(&self) -> RecordKind {
        self.kind
    }

    #[must_use]
    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Unix seconds, when the record carries enough to derive a time.
    #[must_use]
    pub fn derived_timestamp(&self) -> Option<f64> {
        self.derived_timestamp
    }

    pub(crate) fn with_timestamp(mut self, ts: Option<f64>) -> Self {
        self.derived_timestamp = ts;
        self
    }
}

/// Decodes validated frames of one format.
///
/// Decoding is a pure function of the frame; it never touches the source or session
/// state.
pub trait RecordDecoder: Send + Sync {
    fn supports(&self, kind: RecordKind) -> bool;

    /// # Errors
    /// [DecodeError::Structural] if a required field is missing, [DecodeError::Range] if
    /// a value is out of bounds. Either way only this record is lost.
    fn decode(&self, frame: &RawFrame, kind: RecordKind) -> DecodeResult<DecodedRecord>;

    /// Counter field whose rollover determines record time, if any.
    fn rollover(&self) -> Option<RolloverSpec> {
        None
    }
}

/// Bounds-checked reads from frame bytes.
pub(crate) struct FieldReader<'a> {
    dat: &'a [u8],
}

impl<'a> FieldReader<'a> {
    pub(crate) fn new(dat: &'a [u8]) -> Self {
        FieldReader { dat }
    }

    pub(crate) fn bytes(&self, name: &'static str, offset: usize, len: usize) -> DecodeResult<&'a [u8]> {
        self.dat.get(offset..offset + len).ok_or_else(|| {
            DecodeError::Structural(format!(
                "{name} needs bytes {offset}..{} of a {} byte frame",
                offset + len,
                self.dat.len()
            ))
        })
    }

    fn array<const N: usize>(&self, name: &'static str, offset: usize) -> DecodeResult<[u8; N]> {
        let mut buf = [0u8; N];
        buf.copy_from_slice(self.bytes(name, offset, N)?);
        Ok(buf)
    }

    pub(crate) fn u8(&self, name: &'static str, offset: usize) -> DecodeResult<u8> {
        Ok(self.array::<1>(name, offset)?[0])
    }

    pub(crate) fn i8(&self, name: &'static str, offset: usize) -> DecodeResult<i8> {
        Ok(i8::from_le_bytes(self.array(name, offset)?))
    }

    pub(crate) fn u16_le(&self, name: &'static str, offset: usize) -> DecodeResult<u16> {
        Ok(u16::from_le_bytes(self.array(name, offset)?))
    }

    pub(crate) fn i16_le(&self, name: &'static str, offset: usize) -> DecodeResult<i16> {
        Ok(i16::from_le_bytes(self.array(name, offset)?))
    }

    pub(crate) fn u32_le(&self, name: &'static str, offset: usize) -> DecodeResult<u32> {
        Ok(u32::from_le_bytes(self.array(name, offset)?))
    }

    pub(crate) fn u32_be(&self, name: &'static str, offset: usize) -> DecodeResult<u32> {
        Ok(u32::from_be_bytes(self.array(name, offset)?))
    }

    pub(crate) fn f32_be(&self, name: &'static str, offset: usize) -> DecodeResult<f32> {
        Ok(f32::from_be_bytes(self.array(name, offset)?))
    }

    /// ASCII text, up to the first NUL.
    pub(crate) fn ascii(&self, name: &'static str, offset: usize, len: usize) -> DecodeResult<String> {
        let raw = self.bytes(name, offset, len)?;
        let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
        Ok(String::from_utf8_lossy(&raw[..end]).trim_end().to_string())
    }
}

/// Unix seconds of a UTC calendar time, or a range error naming `field`.
pub(crate) fn unix_seconds(
    field: &'static str,
    (year, month, day): (i32, u8, u8),
    (hour, minute, second): (u8, u8, u8),
    nanos: u32,
) -> DecodeResult<f64> {
    Epoch::maybe_from_gregorian_utc(year, month, day, hour, minute, second, nanos)
        .map(|epoch| epoch.to_unix_seconds())
        .map_err(|_| DecodeError::Range {
            field,
            value: format!("{year:04}-{month:02}-{day:02}T{hour:02}:{minute:02}:{second:02}"),
        })
}

/// Built-in formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FormatId {
    /// Nortek Aquadopp single-point current meter.
    #[serde(rename = "aquadopp")]
    Aquadopp,
    /// Nortek AD2CP data records.
    #[serde(rename = "ad2cp")]
    Ad2cp,
    /// MicroStrain MotionPak inertial sensor.
    #[serde(rename = "motionpak")]
    MotionPak,
    /// Lines captured by a data concentrator logger.
    #[serde(rename = "dcl")]
    Dcl,
}

impl FormatId {
    pub const ALL: [FormatId; 4] = [
        FormatId::Aquadopp,
        FormatId::Ad2cp,
        FormatId::MotionPak,
        FormatId::Dcl,
    ];

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            FormatId::Aquadopp => "aquadopp",
            FormatId::Ad2cp => "ad2cp",
            FormatId::MotionPak => "motionpak",
            FormatId::Dcl => "dcl",
        }
    }

    #[must_use]
    pub fn decoder(&self) -> Box<dyn RecordDecoder> {
        match self {
            FormatId::Aquadopp => Box::new(AquadoppDecoder),
            FormatId::Ad2cp => Box::new(Ad2cpDecoder),
            FormatId::MotionPak => Box::new(MotionPakDecoder),
            FormatId::Dcl => Box::new(DclDecoder),
        }
    }

    /// Framing, checksum and grouping used by the format's instruments.
    #[must_use]
    pub fn default_config(&self) -> FormatConfig {
        match self {
            FormatId::Aquadopp => aquadopp::default_config(),
            FormatId::Ad2cp => ad2cp::default_config(),
            FormatId::MotionPak => motionpak::default_config(),
            FormatId::Dcl => dcl::default_config(),
        }
    }
}

impl Display for FormatId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FormatId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        FormatId::ALL
            .into_iter()
            .find(|id| id.name() == s)
            .ok_or_else(|| Error::Config(format!("unknown format identifier {s:?}")))
    }
}
