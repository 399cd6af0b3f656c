//! Format configuration.
//!
//! A [FormatConfig] describes how one instrument family frames, checks and groups its
//! records. It can be built in code, loaded from JSON, or taken from a built-in
//! format via [FormatId::default_config](crate::FormatId::default_config).
//! [FormatConfig::resolve] validates it into the immutable tables a session runs on.
use serde::{Deserialize, Serialize};
use tracing::debug;
use typed_builder::TypedBuilder;

use crate::decoder::{FormatId, RecordDecoder};
use crate::framing::{
    BinaryScanner, ChecksumPolicy, FrameScanner, GroupSpec, IntField, IntegrityAlgorithm,
    RecordKind, RecordValidator, TextScanner,
};
use crate::prelude::*;
use crate::rollover::{RolloverConfig, RolloverSpec};

pub const DEFAULT_BLOCK_SIZE: usize = 1024;
pub const DEFAULT_MAX_FRAME_LEN: usize = 65_536;

/// Header field declaring the length of a frame, as `value * scale + adjust` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LengthField {
    #[serde(flatten)]
    pub field: IntField,
    #[serde(default = "default_scale")]
    pub scale: u32,
    #[serde(default)]
    pub adjust: i64,
}

fn default_scale() -> u32 {
    1
}

impl LengthField {
    /// Frame length declared by the header at the start of `header`, if it is
    /// readable and non-negative.
    #[must_use]
    pub fn frame_len(&self, header: &[u8]) -> Option<usize> {
        let value = i64::from(self.field.read(header)?);
        let len = value * i64::from(self.scale) + self.adjust;
        usize::try_from(len).ok()
    }
}

/// Fixed byte that must appear at an offset of every frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Marker {
    pub offset: usize,
    pub value: u8,
}

/// Declared element count of a frame, e.g., the number of range cells, checked against
/// the payload before decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementSpec {
    pub count: IntField,
    /// Second factor of the element count, e.g., beams per range cell.
    #[serde(default)]
    pub per_count: Option<IntField>,
    /// Frame offset of the first element.
    pub data_offset: usize,
    pub element_size: usize,
}

impl ElementSpec {
    /// Number of elements `frame` declares, or `None` if a count field is unreadable.
    #[must_use]
    pub fn declared(&self, frame: &[u8]) -> Option<u32> {
        let count = self.count.read(frame)?;
        match &self.per_count {
            Some(field) => count.checked_mul(field.read(frame)?),
            None => Some(count),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindSpec {
    /// Value of the kind byte.
    pub id: u8,
    pub kind: RecordKind,
    /// Frame length for kinds whose header carries no length.
    #[serde(default)]
    pub fixed_len: Option<usize>,
    /// Overrides the format-wide checksum policy.
    #[serde(default)]
    pub checksum: Option<ChecksumPolicy>,
    #[serde(default)]
    pub elements: Option<ElementSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryFraming {
    /// Leading marker bytes; empty when the kind byte alone starts a frame.
    #[serde(default)]
    pub sync: Vec<u8>,
    #[serde(default)]
    pub markers: Vec<Marker>,
    pub kind_offset: usize,
    /// Bytes needed to read the sync marker, kind byte, markers and length field.
    pub header_len: usize,
    #[serde(default)]
    pub length: Option<LengthField>,
    pub kinds: Vec<KindSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternSpec {
    pub kind: RecordKind,
    /// Must match a whole line.
    pub pattern: String,
    #[serde(default)]
    pub checksum: Option<ChecksumPolicy>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextFraming {
    /// Tried in order; the first full match defines the record kind.
    pub patterns: Vec<PatternSpec>,
    /// Lines that carry no record and are not corruption, e.g., logger metadata.
    #[serde(default)]
    pub ignore: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum Framing {
    Binary(BinaryFraming),
    Text(TextFraming),
}

/// What to do when a split header checksum fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeaderFailurePolicy {
    /// Stop parsing; the declared payload length can no longer be trusted.
    #[default]
    Halt,
    /// Abandon the open group and resynchronize one byte further on.
    Resync,
}

/// Fixed regions of a file outside its framed records.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Envelope {
    /// Leading bytes that carry no record.
    #[serde(default)]
    pub header_len: usize,
    #[serde(default)]
    pub trailer: Option<TrailerSpec>,
}

/// Fixed-size record closing a file. It is read before anything else because it may
/// date the records before it, and is emitted last.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrailerSpec {
    pub len: usize,
    pub kind: RecordKind,
    #[serde(default)]
    pub clock: Option<SampleClock>,
}

/// Records timed by count from the trailer's timestamp rather than by their own clock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleClock {
    /// Seconds between successive samples.
    pub interval: f64,
    /// Kinds that advance the clock; other records take the time of the next sample.
    pub sampled: Vec<RecordKind>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TypedBuilder)]
pub struct FormatConfig {
    /// Built-in format identifier, e.g., `aquadopp`.
    #[builder(setter(into))]
    pub format: String,
    pub framing: Framing,
    #[serde(default)]
    #[builder(default)]
    pub checksum: ChecksumPolicy,
    #[serde(default)]
    #[builder(default)]
    pub groups: Vec<GroupSpec>,
    /// Bytes requested from the source per read.
    #[serde(default = "default_block_size")]
    #[builder(default = DEFAULT_BLOCK_SIZE)]
    pub block_size: usize,
    /// Upper bound of any frame; bounds how much input is buffered.
    #[serde(default = "default_max_frame_len")]
    #[builder(default = DEFAULT_MAX_FRAME_LEN)]
    pub max_frame_len: usize,
    #[serde(default)]
    #[builder(default)]
    pub header_failure: HeaderFailurePolicy,
    #[serde(default)]
    #[builder(default)]
    pub rollover: RolloverConfig,
    #[serde(default)]
    #[builder(default, setter(strip_option))]
    pub envelope: Option<Envelope>,
}

fn default_block_size() -> usize {
    DEFAULT_BLOCK_SIZE
}

fn default_max_frame_len() -> usize {
    DEFAULT_MAX_FRAME_LEN
}

/// A validated [FormatConfig].
pub struct Format {
    pub(crate) id: FormatId,
    pub(crate) scanner: FrameScanner,
    pub(crate) validator: RecordValidator,
    pub(crate) decoder: Box<dyn RecordDecoder>,
    pub(crate) groups: Vec<GroupSpec>,
    pub(crate) rollover: Option<(RolloverSpec, RolloverConfig)>,
    pub(crate) block_size: usize,
    pub(crate) max_frame_len: usize,
    pub(crate) header_failure: HeaderFailurePolicy,
    pub(crate) envelope: Envelope,
}

impl Format {
    #[must_use]
    pub fn id(&self) -> FormatId {
        self.id
    }
}

struct KindRules<'a> {
    kind: RecordKind,
    fixed_len: Option<usize>,
    checksum: Option<&'a ChecksumPolicy>,
    elements: Option<ElementSpec>,
}

impl FormatConfig {
    /// # Errors
    /// [Error::Json] if `json` is not a valid config document.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// # Errors
    /// [Error::Json] if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Validate this config and build the tables a session runs on.
    ///
    /// # Errors
    /// [Error::Config] describing the first problem found.
    pub fn resolve(&self) -> Result<Format> {
        let id: FormatId = self.format.parse()?;
        if self.block_size == 0 {
            return Err(Error::Config("block_size must be non-zero".into()));
        }
        let decoder = id.decoder();

        let (scanner, header_len, rules) = match &self.framing {
            Framing::Binary(cfg) => {
                let scanner = FrameScanner::Binary(BinaryScanner::new(cfg, self.max_frame_len)?);
                let rules: Vec<KindRules> = cfg
                    .kinds
                    .iter()
                    .map(|k| KindRules {
                        kind: k.kind,
                        fixed_len: k.fixed_len,
                        checksum: k.checksum.as_ref(),
                        elements: k.elements,
                    })
                    .collect();
                (scanner, cfg.header_len, rules)
            }
            Framing::Text(cfg) => {
                let scanner = FrameScanner::Text(TextScanner::new(cfg, self.max_frame_len)?);
                let rules: Vec<KindRules> = cfg
                    .patterns
                    .iter()
                    .map(|p| KindRules {
                        kind: p.kind,
                        fixed_len: None,
                        checksum: p.checksum.as_ref(),
                        elements: None,
                    })
                    .collect();
                (scanner, 0, rules)
            }
        };
        let text = scanner.is_text();
        let length_trusted = match &self.framing {
            Framing::Binary(cfg) => !cfg.sync.is_empty(),
            Framing::Text(_) => true,
        };

        let mut checks: Vec<Option<Box<dyn IntegrityAlgorithm>>> = Vec::with_capacity(rules.len());
        let mut elements = Vec::with_capacity(rules.len());
        for rule in &rules {
            if !decoder.supports(rule.kind) {
                return Err(Error::Config(format!(
                    "format {id} cannot decode {} records",
                    rule.kind
                )));
            }
            let policy = rule.checksum.unwrap_or(&self.checksum);
            validate_policy(policy, rule, text, header_len, self.max_frame_len)?;
            if let Some(spec) = &rule.elements {
                if spec.element_size == 0 {
                    return Err(Error::Config(format!(
                        "element size of {} must be non-zero",
                        rule.kind
                    )));
                }
            }
            checks.push(policy.algorithm());
            elements.push(rule.elements);
        }

        for group in &self.groups {
            for kind in [group.header, group.detail] {
                if !rules.iter().any(|r| r.kind == kind) {
                    return Err(Error::Config(format!(
                        "group kind {kind} is not a configured record kind"
                    )));
                }
            }
            if group.header == group.detail {
                return Err(Error::Config(format!(
                    "group header and detail are both {}",
                    group.header
                )));
            }
        }

        let envelope = self.envelope.clone().unwrap_or_default();
        if let Some(trailer) = &envelope.trailer {
            if trailer.len == 0 {
                return Err(Error::Config("trailer length must be non-zero".into()));
            }
            if !decoder.supports(trailer.kind) {
                return Err(Error::Config(format!(
                    "format {id} cannot decode {} trailers",
                    trailer.kind
                )));
            }
            if let Some(clock) = &trailer.clock {
                if !clock.interval.is_finite() || clock.interval <= 0.0 {
                    return Err(Error::Config(format!(
                        "invalid sample interval {}",
                        clock.interval
                    )));
                }
                if let Some(kind) = clock.sampled.iter().find(|k| !rules.iter().any(|r| r.kind == **k)) {
                    return Err(Error::Config(format!(
                        "sampled kind {kind} is not a configured record kind"
                    )));
                }
            }
        }

        let rollover = match decoder.rollover() {
            Some(spec) => {
                let factor = self.rollover.reset_factor;
                if !factor.is_finite() || factor < 0.0 {
                    return Err(Error::Config(format!("invalid rollover reset factor {factor}")));
                }
                Some((spec, self.rollover.clone()))
            }
            None => None,
        };

        debug!(format = %id, kinds = rules.len(), groups = self.groups.len(), "resolved format");

        Ok(Format {
            id,
            scanner,
            validator: RecordValidator::new(checks, elements, length_trusted, self.header_failure),
            decoder,
            groups: self.groups.clone(),
            rollover,
            block_size: self.block_size,
            max_frame_len: self.max_frame_len,
            header_failure: self.header_failure,
            envelope,
        })
    }
}

fn validate_policy(
    policy: &ChecksumPolicy,
    rule: &KindRules,
    text: bool,
    header_len: usize,
    max_frame_len: usize,
) -> Result<()> {
    let kind = rule.kind;
    match policy {
        ChecksumPolicy::SplitHeader { .. } if text => {
            return Err(Error::Config(format!(
                "split header checksum configured for text record {kind}"
            )));
        }
        ChecksumPolicy::NmeaXor { .. } if !text => {
            return Err(Error::Config(format!(
                "sentence checksum configured for binary record {kind}"
            )));
        }
        ChecksumPolicy::ByteSum { modulus: 0, .. } => {
            return Err(Error::Config(format!("byte sum modulus of {kind} is zero")));
        }
        ChecksumPolicy::SplitHeader {
            header_len: split_len,
            header_checksum,
            payload_checksum,
            ..
        } => {
            if *split_len > max_frame_len
                || header_checksum + 2 > *split_len
                || payload_checksum + 2 > *split_len
            {
                return Err(Error::Config(format!(
                    "split header checksum fields of {kind} lie outside its header"
                )));
            }
        }
        _ => {}
    }
    if text {
        return Ok(());
    }
    let trailer = policy.algorithm().map_or(0, |alg| alg.trailer_len());
    let smallest = rule.fixed_len.unwrap_or(header_len);
    if trailer > smallest {
        return Err(Error::Config(format!(
            "checksum of {kind} is longer than its smallest frame"
        )));
    }
    Ok(())
}
