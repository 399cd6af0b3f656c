use std::ops::Range;

use regex::bytes::Regex;
use tracing::trace;

use super::RecordKind;
use crate::config::{BinaryFraming, LengthField, TextFraming};
use crate::diagnostic::{CorruptionCause, FramingFault};
use crate::prelude::*;

/// A frame located by a [FrameScanner], not yet validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub kind: RecordKind,
    /// Index of the kind or pattern in the format's table.
    pub index: usize,
    /// Input bytes the frame occupies, including any line terminator.
    pub len: usize,
    /// The part of the frame handed to validation and decoding.
    pub content: Range<usize>,
}

/// Result of one scan attempt at the cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scan {
    Candidate(Candidate),
    /// At least this many bytes from the cursor are needed before a decision can be made.
    NeedMoreData(usize),
    /// The next `len` bytes cannot begin a frame.
    Skip { len: usize, cause: CorruptionCause },
    /// The next `len` bytes are known to be benign and carry no record.
    Ignore(usize),
}

fn framing_skip(len: usize, fault: FramingFault) -> Scan {
    Scan::Skip {
        len,
        cause: CorruptionCause::Framing { fault },
    }
}

/// Locates frames that start with a fixed header holding an optional sync marker, a
/// kind byte and either a length field or a kind with a fixed length.
#[derive(Debug, Clone)]
pub struct BinaryScanner {
    sync: Vec<u8>,
    markers: Vec<(usize, u8)>,
    kind_offset: usize,
    header_len: usize,
    length: Option<LengthField>,
    // kind byte to index in `kinds`
    ids: Vec<Option<usize>>,
    kinds: Vec<(RecordKind, Option<usize>)>,
    max_frame_len: usize,
}

impl BinaryScanner {
    /// # Errors
    /// [Error::Config] if the framing description is inconsistent.
    pub fn new(cfg: &BinaryFraming, max_frame_len: usize) -> Result<Self> {
        let invalid = |msg: String| Err(Error::Config(msg));
        if cfg.header_len == 0 {
            return invalid("header_len must be non-zero".into());
        }
        if cfg.sync.len() > cfg.header_len {
            return invalid("sync marker is longer than the header".into());
        }
        if cfg.kind_offset >= cfg.header_len {
            return invalid(format!(
                "kind offset {} is outside the {} byte header",
                cfg.kind_offset, cfg.header_len
            ));
        }
        if let Some(m) = cfg.markers.iter().find(|m| m.offset >= cfg.header_len) {
            return invalid(format!("marker offset {} is outside the header", m.offset));
        }
        if let Some(length) = &cfg.length {
            if !matches!(length.field.width, 2 | 4) {
                return invalid(format!(
                    "length field width must be 2 or 4, got {}",
                    length.field.width
                ));
            }
            if length.field.end() > cfg.header_len {
                return invalid("length field extends past the header".into());
            }
            if length.scale == 0 {
                return invalid("length scale must be non-zero".into());
            }
        }
        if max_frame_len < cfg.header_len {
            return invalid("max_frame_len is smaller than the header".into());
        }
        if cfg.kinds.is_empty() {
            return invalid("no record kinds configured".into());
        }

        let mut ids = vec![None; 256];
        let mut kinds = Vec::with_capacity(cfg.kinds.len());
        for (index, spec) in cfg.kinds.iter().enumerate() {
            let slot = &mut ids[usize::from(spec.id)];
            if slot.is_some() {
                return invalid(format!("duplicate kind id 0x{:02x}", spec.id));
            }
            *slot = Some(index);
            match spec.fixed_len {
                Some(len) if len < cfg.header_len || len > max_frame_len => {
                    return invalid(format!(
                        "fixed length {len} of {} is outside [{}, {max_frame_len}]",
                        spec.kind, cfg.header_len
                    ));
                }
                None if cfg.length.is_none() => {
                    return invalid(format!(
                        "{} has neither a fixed length nor a length field",
                        spec.kind
                    ));
                }
                _ => {}
            }
            kinds.push((spec.kind, spec.fixed_len));
        }

        Ok(BinaryScanner {
            sync: cfg.sync.clone(),
            markers: cfg.markers.iter().map(|m| (m.offset, m.value)).collect(),
            kind_offset: cfg.kind_offset,
            header_len: cfg.header_len,
            length: cfg.length,
            ids,
            kinds,
            max_frame_len,
        })
    }

    fn scan(&self, buf: &[u8]) -> Scan {
        if buf.is_empty() {
            return Scan::NeedMoreData(1);
        }
        if !self.sync.is_empty() {
            let n = self.sync.len().min(buf.len());
            if buf[..n] != self.sync[..n] {
                // Nothing before the next byte that could start a marker can be a frame
                let len = buf[1..]
                    .iter()
                    .position(|b| *b == self.sync[0])
                    .map_or(buf.len(), |pos| pos + 1);
                return framing_skip(len, FramingFault::InvalidSync);
            }
        }
        if buf.len() < self.header_len {
            return Scan::NeedMoreData(self.header_len);
        }
        if self.markers.iter().any(|(offset, value)| buf[*offset] != *value) {
            return framing_skip(1, FramingFault::InvalidSync);
        }
        let id = buf[self.kind_offset];
        let Some(index) = self.ids[usize::from(id)] else {
            trace!(id, "unknown kind");
            return framing_skip(1, FramingFault::UnknownKind);
        };
        let (kind, fixed_len) = self.kinds[index];
        let len = match (fixed_len, &self.length) {
            (Some(len), _) => Some(len),
            (None, Some(length)) => length.frame_len(buf),
            (None, None) => None,
        };
        match len {
            Some(len) if len >= self.header_len && len <= self.max_frame_len => {
                Scan::Candidate(Candidate {
                    kind,
                    index,
                    len,
                    content: 0..len,
                })
            }
            _ => {
                trace!(%kind, ?len, "invalid length");
                framing_skip(1, FramingFault::InvalidLength)
            }
        }
    }
}

/// Locates newline terminated lines and classifies them with an ordered list of
/// patterns; the first pattern matching the whole line wins.
#[derive(Debug, Clone)]
pub struct TextScanner {
    patterns: Vec<(Regex, RecordKind)>,
    ignore: Vec<Regex>,
    max_frame_len: usize,
}

fn full_line(pattern: &str) -> Result<Regex> {
    Regex::new(&format!("^(?:{pattern})$"))
        .map_err(|err| Error::Config(format!("invalid pattern {pattern:?}: {err}")))
}

impl TextScanner {
    /// # Errors
    /// [Error::Config] if there are no patterns or a pattern does not compile.
    pub fn new(cfg: &TextFraming, max_frame_len: usize) -> Result<Self> {
        if cfg.patterns.is_empty() {
            return Err(Error::Config("no record patterns configured".into()));
        }
        if max_frame_len == 0 {
            return Err(Error::Config("max_frame_len must be non-zero".into()));
        }
        let patterns = cfg
            .patterns
            .iter()
            .map(|p| Ok((full_line(&p.pattern)?, p.kind)))
            .collect::<Result<Vec<_>>>()?;
        let ignore = cfg
            .ignore
            .iter()
            .map(|p| full_line(p))
            .collect::<Result<Vec<_>>>()?;
        Ok(TextScanner {
            patterns,
            ignore,
            max_frame_len,
        })
    }

    fn scan(&self, buf: &[u8], eof: bool) -> Scan {
        if buf.is_empty() {
            return Scan::NeedMoreData(1);
        }
        let window = &buf[..buf.len().min(self.max_frame_len + 1)];
        let (line_end, consumed) = match window.iter().position(|b| *b == b'\n') {
            Some(pos) => (pos, pos + 1),
            None if buf.len() > self.max_frame_len => {
                return Scan::Skip {
                    len: self.max_frame_len,
                    cause: CorruptionCause::UnexpectedData,
                };
            }
            None if eof => (buf.len(), buf.len()),
            None => return Scan::NeedMoreData(buf.len() + 1),
        };
        let line = buf[..line_end].strip_suffix(b"\r").unwrap_or(&buf[..line_end]);
        if line.is_empty() {
            return Scan::Ignore(consumed);
        }

        for (index, (re, kind)) in self.patterns.iter().enumerate() {
            if re.is_match(line) {
                return Scan::Candidate(Candidate {
                    kind: *kind,
                    index,
                    len: consumed,
                    content: 0..line.len(),
                });
            }
        }
        if self.ignore.iter().any(|re| re.is_match(line)) {
            return Scan::Ignore(consumed);
        }
        Scan::Skip {
            len: consumed,
            cause: CorruptionCause::UnexpectedData,
        }
    }
}

/// Strategy for locating the next candidate frame at the cursor.
#[derive(Debug, Clone)]
pub enum FrameScanner {
    Binary(BinaryScanner),
    Text(TextScanner),
}

impl FrameScanner {
    /// Attempt to locate a frame at the start of `buf`, where `buf` holds every
    /// buffered byte from the cursor on. `eof` indicates no more bytes will follow.
    #[must_use]
    pub fn scan(&self, buf: &[u8], eof: bool) -> Scan {
        match self {
            FrameScanner::Binary(scanner) => scanner.scan(buf),
            FrameScanner::Text(scanner) => scanner.scan(buf, eof),
        }
    }

    #[must_use]
    pub fn is_text(&self) -> bool {
        matches!(self, FrameScanner::Text(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{KindSpec, Marker, PatternSpec};
    use crate::framing::{Endian, IntField};
    use test_case::test_case;

    fn kind(id: u8, kind: RecordKind, fixed_len: Option<usize>) -> KindSpec {
        KindSpec {
            id,
            kind,
            fixed_len,
            checksum: None,
            elements: None,
        }
    }

    fn word_framed() -> FrameScanner {
        let cfg = BinaryFraming {
            sync: vec![0xa5],
            markers: vec![],
            kind_offset: 1,
            header_len: 4,
            length: Some(LengthField {
                field: IntField::new(2, 2, Endian::Little),
                scale: 2,
                adjust: 0,
            }),
            kinds: vec![
                kind(0x01, RecordKind::Velocity, None),
                kind(0x06, RecordKind::DiagnosticHeader, None),
            ],
        };
        FrameScanner::Binary(BinaryScanner::new(&cfg, 1024).unwrap())
    }

    fn framing(len: usize, fault: FramingFault) -> Scan {
        framing_skip(len, fault)
    }

    #[test_case("a5011500", Scan::Candidate(Candidate { kind: RecordKind::Velocity, index: 0, len: 42, content: 0..42 }); "declared length")]
    #[test_case("a50612", Scan::NeedMoreData(4); "partial header")]
    #[test_case("a5", Scan::NeedMoreData(4); "sync only")]
    #[test_case("0000a50115", framing(2, FramingFault::InvalidSync); "skip to next sync")]
    #[test_case("000000", framing(3, FramingFault::InvalidSync); "no sync in buffer")]
    #[test_case("a5021500", framing(1, FramingFault::UnknownKind); "unknown kind")]
    #[test_case("a5010100", framing(1, FramingFault::InvalidLength); "shorter than header")]
    #[test_case("a5010102", framing(1, FramingFault::InvalidLength); "longer than max")]
    fn scan_word_framed(input: &str, expected: Scan) {
        let buf = hex::decode(input).unwrap();
        assert_eq!(word_framed().scan(&buf, false), expected);
    }

    #[test]
    fn fixed_length_without_sync() {
        let cfg = BinaryFraming {
            sync: vec![],
            markers: vec![],
            kind_offset: 0,
            header_len: 1,
            length: None,
            kinds: vec![
                kind(0xcb, RecordKind::Acceleration, Some(43)),
                kind(0xcf, RecordKind::AngularRate, Some(31)),
            ],
        };
        let scanner = FrameScanner::Binary(BinaryScanner::new(&cfg, 64).unwrap());
        assert_eq!(
            scanner.scan(&[0xcf], false),
            Scan::Candidate(Candidate {
                kind: RecordKind::AngularRate,
                index: 1,
                len: 31,
                content: 0..31,
            })
        );
        assert_eq!(
            scanner.scan(&[0x00, 0xcf], false),
            framing(1, FramingFault::UnknownKind)
        );
    }

    #[test]
    fn family_marker() {
        let cfg = BinaryFraming {
            sync: vec![0xa5],
            markers: vec![Marker {
                offset: 3,
                value: 0x10,
            }],
            kind_offset: 2,
            header_len: 10,
            length: Some(LengthField {
                field: IntField::new(4, 2, Endian::Little),
                scale: 1,
                adjust: 10,
            }),
            kinds: vec![kind(0x16, RecordKind::CurrentProfile, None)],
        };
        let scanner = FrameScanner::Binary(BinaryScanner::new(&cfg, 1024).unwrap());
        let good = hex::decode("a50a161004000000000000").unwrap();
        let Scan::Candidate(candidate) = scanner.scan(&good, false) else {
            panic!("expected candidate");
        };
        assert_eq!(candidate.len, 14);

        let bad = hex::decode("a50a161104000000000000").unwrap();
        assert_eq!(
            scanner.scan(&bad, false),
            framing(1, FramingFault::InvalidSync)
        );
    }

    #[test]
    fn rejects_duplicate_ids() {
        let cfg = BinaryFraming {
            sync: vec![0xa5],
            markers: vec![],
            kind_offset: 1,
            header_len: 2,
            length: None,
            kinds: vec![
                kind(0x01, RecordKind::Velocity, Some(4)),
                kind(0x01, RecordKind::DiagnosticData, Some(4)),
            ],
        };
        assert!(matches!(
            BinaryScanner::new(&cfg, 64),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn rejects_missing_length() {
        let cfg = BinaryFraming {
            sync: vec![0xa5],
            markers: vec![],
            kind_offset: 1,
            header_len: 2,
            length: None,
            kinds: vec![kind(0x01, RecordKind::Velocity, None)],
        };
        assert!(matches!(
            BinaryScanner::new(&cfg, 64),
            Err(Error::Config(_))
        ));
    }

    fn lines() -> FrameScanner {
        let cfg = TextFraming {
            patterns: vec![
                PatternSpec {
                    kind: RecordKind::Nmea,
                    pattern: r"\$[A-Z]+,.*\*[0-9A-F]{2}".into(),
                    checksum: None,
                },
                PatternSpec {
                    kind: RecordKind::Sensor,
                    pattern: r"\d+( \d+)*".into(),
                    checksum: None,
                },
            ],
            ignore: vec![r"\[.*\].*".into()],
        };
        FrameScanner::Text(TextScanner::new(&cfg, 32).unwrap())
    }

    #[test_case(b"1 2 3\nxx", false, Scan::Candidate(Candidate { kind: RecordKind::Sensor, index: 1, len: 6, content: 0..5 }); "sensor")]
    #[test_case(b"1 2 3\r\n", false, Scan::Candidate(Candidate { kind: RecordKind::Sensor, index: 1, len: 7, content: 0..5 }); "crlf")]
    #[test_case(b"$GPS,1*4F\n", false, Scan::Candidate(Candidate { kind: RecordKind::Nmea, index: 0, len: 10, content: 0..9 }); "first pattern wins")]
    #[test_case(b"1 2 x\n", false, Scan::Skip { len: 6, cause: CorruptionCause::UnexpectedData }; "prefix only")]
    #[test_case(b"[dcl] power on\n", false, Scan::Ignore(15); "benign")]
    #[test_case(b"\n", false, Scan::Ignore(1); "blank")]
    #[test_case(b"1 2", false, Scan::NeedMoreData(4); "unterminated")]
    #[test_case(b"1 2", true, Scan::Candidate(Candidate { kind: RecordKind::Sensor, index: 1, len: 3, content: 0..3 }); "unterminated at eof")]
    fn scan_lines(input: &[u8], eof: bool, expected: Scan) {
        assert_eq!(lines().scan(input, eof), expected);
    }

    #[test]
    fn overlong_line() {
        let input = vec![b'1'; 40];
        assert_eq!(
            lines().scan(&input, false),
            Scan::Skip {
                len: 32,
                cause: CorruptionCause::UnexpectedData
            }
        );
    }

    #[test]
    fn bad_pattern() {
        let cfg = TextFraming {
            patterns: vec![PatternSpec {
                kind: RecordKind::Sensor,
                pattern: "(".into(),
                checksum: None,
            }],
            ignore: vec![],
        };
        assert!(matches!(TextScanner::new(&cfg, 32), Err(Error::Config(_))));
    }
}
