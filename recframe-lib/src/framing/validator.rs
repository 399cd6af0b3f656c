use tracing::debug;

use super::{Candidate, Integrity, IntegrityAlgorithm, RawFrame};
use crate::config::{ElementSpec, HeaderFailurePolicy};
use crate::diagnostic::{CorruptionCause, Span};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    Accepted(RawFrame),
    /// The candidate is discarded. `span` is the extent it claimed; the cursor moves
    /// `advance` bytes, which is less than the span when the declared length is not
    /// trusted, so a real frame hidden inside a false one is still found.
    Rejected {
        reason: CorruptionCause,
        span: Span,
        advance: usize,
    },
    /// At least this many bytes from the frame start must be buffered.
    NeedMoreData(usize),
}

/// Checks buffered candidates against the checksum and element rules of their kind.
pub struct RecordValidator {
    checks: Vec<Option<Box<dyn IntegrityAlgorithm>>>,
    elements: Vec<Option<ElementSpec>>,
    length_trusted: bool,
    header_failure: HeaderFailurePolicy,
}

fn checksum_values(integrity: Integrity) -> (Option<u32>, u32) {
    match integrity {
        Integrity::Ok => (None, 0),
        Integrity::Mismatch { stored, computed } => (Some(stored), computed),
        Integrity::Malformed { computed } => (None, computed),
    }
}

impl RecordValidator {
    /// `checks` and `elements` are indexed by [Candidate::index].
    ///
    /// `length_trusted` holds when a candidate's extent is anchored by more than its
    /// own length field, i.e., a line ending or a sync marker, so a frame failing its
    /// checksum is skipped whole. Otherwise only a passing split header earns that.
    #[must_use]
    pub fn new(
        checks: Vec<Option<Box<dyn IntegrityAlgorithm>>>,
        elements: Vec<Option<ElementSpec>>,
        length_trusted: bool,
        header_failure: HeaderFailurePolicy,
    ) -> Self {
        RecordValidator {
            checks,
            elements,
            length_trusted,
            header_failure,
        }
    }

    /// Validate `candidate`, located at absolute `offset`, where `buf` holds the
    /// buffered bytes starting at the candidate.
    ///
    /// A split header is checked as soon as it is buffered, before its declared
    /// length is used to wait for the rest of the frame.
    #[must_use]
    pub fn validate(&self, candidate: &Candidate, buf: &[u8], offset: u64) -> ValidationOutcome {
        let check = self.checks.get(candidate.index).and_then(Option::as_deref);
        let len = candidate.len;
        let span = Span::new(offset, offset + len as u64);

        let mut trusted = self.length_trusted;
        if let Some((alg, header_len)) = check.and_then(|a| a.header_len().map(|h| (a, h))) {
            if buf.len() < header_len {
                return ValidationOutcome::NeedMoreData(header_len);
            }
            let integrity = alg.check_header(&buf[..header_len]);
            if !integrity.is_ok() {
                let (stored, computed) = checksum_values(integrity);
                debug!(offset, kind = %candidate.kind, ?stored, computed, "header checksum failed");
                return ValidationOutcome::Rejected {
                    reason: CorruptionCause::HeaderChecksum {
                        stored: stored.unwrap_or_default(),
                        computed,
                    },
                    span: Span::new(offset, offset + header_len as u64),
                    advance: match self.header_failure {
                        HeaderFailurePolicy::Halt => 0,
                        HeaderFailurePolicy::Resync => 1,
                    },
                };
            }
            trusted = true;
        }

        if buf.len() < len {
            return ValidationOutcome::NeedMoreData(len);
        }
        let frame = &buf[..len];
        let content = &frame[candidate.content.clone()];
        let advance = if trusted { len } else { 1 };

        if let Some(alg) = check {
            let integrity = alg.check(content);
            if !integrity.is_ok() {
                let (stored, computed) = checksum_values(integrity);
                debug!(offset, kind = %candidate.kind, ?stored, computed, "checksum failed");
                return ValidationOutcome::Rejected {
                    reason: CorruptionCause::PayloadChecksum { stored, computed },
                    span,
                    advance,
                };
            }
        }

        if let Some(spec) = self.elements.get(candidate.index).copied().flatten() {
            let trailer = check.map_or(0, |a| a.trailer_len());
            let room = len.saturating_sub(trailer).saturating_sub(spec.data_offset);
            let capacity = room / spec.element_size;
            let declared = spec.declared(frame);
            if declared.map_or(true, |n| n as usize > capacity) {
                debug!(offset, kind = %candidate.kind, ?declared, capacity, "element count exceeds payload");
                return ValidationOutcome::Rejected {
                    reason: CorruptionCause::ElementCount {
                        declared: declared.unwrap_or_default(),
                        capacity: u32::try_from(capacity).unwrap_or(u32::MAX),
                    },
                    span,
                    // the checksum held, so the frame extent is sound
                    advance: len,
                };
            }
        }

        ValidationOutcome::Accepted(RawFrame {
            offset,
            length: u32::try_from(len).unwrap_or(u32::MAX),
            bytes: content.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::{Endian, IntField, RecordKind, RunningSum16, SplitHeader};

    fn candidate(len: usize) -> Candidate {
        Candidate {
            kind: RecordKind::CurrentProfile,
            index: 0,
            len,
            content: 0..len,
        }
    }

    fn split(policy: HeaderFailurePolicy, elements: Option<ElementSpec>) -> RecordValidator {
        let check: Box<dyn IntegrityAlgorithm> = Box::new(SplitHeader {
            base: 0xb58c,
            header_len: 10,
            header_checksum: 8,
            payload_checksum: 6,
        });
        RecordValidator::new(
            vec![Some(check)],
            vec![elements],
            false,
            policy,
        )
    }

    // 4 byte payload 01 00 02 00
    fn frame() -> Vec<u8> {
        hex::decode("a50a151004008fb5d98501000200").unwrap()
    }

    #[test]
    fn accepted() {
        let buf = frame();
        let outcome = split(HeaderFailurePolicy::Halt, None).validate(&candidate(14), &buf, 100);
        assert_eq!(
            outcome,
            ValidationOutcome::Accepted(RawFrame {
                offset: 100,
                length: 14,
                bytes: buf.clone(),
            })
        );
    }

    #[test]
    fn header_checked_before_waiting_for_payload() {
        let mut buf = frame();
        buf[5] = 0x7f; // declares a huge payload and breaks the header checksum
        let outcome = split(HeaderFailurePolicy::Halt, None).validate(&candidate(0x7f04), &buf[..10], 0);
        assert!(matches!(
            outcome,
            ValidationOutcome::Rejected {
                reason: CorruptionCause::HeaderChecksum { .. },
                advance: 0,
                ..
            }
        ));

        let outcome = split(HeaderFailurePolicy::Resync, None).validate(&candidate(0x7f04), &buf[..10], 0);
        let ValidationOutcome::Rejected { span, advance, .. } = outcome else {
            panic!("expected rejection");
        };
        assert_eq!(span, Span::new(0, 10));
        assert_eq!(advance, 1);
    }

    #[test]
    fn need_more_data() {
        let buf = frame();
        let v = split(HeaderFailurePolicy::Halt, None);
        assert_eq!(v.validate(&candidate(14), &buf[..6], 0), ValidationOutcome::NeedMoreData(10));
        assert_eq!(v.validate(&candidate(14), &buf[..12], 0), ValidationOutcome::NeedMoreData(14));
    }

    #[test]
    fn payload_checksum_skips_trusted_frame() {
        let mut buf = frame();
        buf[12] = 0x03;
        let outcome = split(HeaderFailurePolicy::Halt, None).validate(&candidate(14), &buf, 0);
        let ValidationOutcome::Rejected { reason, span, advance } = outcome else {
            panic!("expected rejection");
        };
        assert!(matches!(reason, CorruptionCause::PayloadChecksum { stored: Some(0xb58f), .. }));
        assert_eq!(span, Span::new(0, 14));
        assert_eq!(advance, 14);
    }

    fn running_sum(length_trusted: bool) -> RecordValidator {
        let check: Box<dyn IntegrityAlgorithm> = Box::new(RunningSum16::new(0xb58c));
        RecordValidator::new(
            vec![Some(check)],
            vec![None],
            length_trusted,
            HeaderFailurePolicy::Halt,
        )
    }

    #[test]
    fn payload_checksum_without_trusted_length_advances_one() {
        let buf = hex::decode("a501150047b7").unwrap();
        let outcome = running_sum(false).validate(&candidate(6), &buf, 8);
        let ValidationOutcome::Rejected { span, advance, .. } = outcome else {
            panic!("expected rejection");
        };
        assert_eq!(span, Span::new(8, 14));
        assert_eq!(advance, 1);
    }

    #[test]
    fn payload_checksum_of_sync_anchored_frame_skips_it() {
        let buf = hex::decode("a501150047b7").unwrap();
        let outcome = running_sum(true).validate(&candidate(6), &buf, 8);
        let ValidationOutcome::Rejected { span, advance, .. } = outcome else {
            panic!("expected rejection");
        };
        assert_eq!(span, Span::new(8, 14));
        assert_eq!(advance, 6);
    }

    #[test]
    fn element_count() {
        // two 2-byte elements starting at offset 10; count in the first payload byte
        let spec = ElementSpec {
            count: IntField::new(10, 1, Endian::Little),
            per_count: None,
            data_offset: 10,
            element_size: 2,
        };
        let v = split(HeaderFailurePolicy::Halt, Some(spec));
        let buf = frame();
        assert!(matches!(
            v.validate(&candidate(14), &buf, 0),
            ValidationOutcome::Accepted(_)
        ));

        let spec = ElementSpec {
            count: IntField::new(12, 1, Endian::Little),
            element_size: 3,
            ..spec
        };
        let v = split(HeaderFailurePolicy::Halt, Some(spec));
        assert_eq!(
            v.validate(&candidate(14), &buf, 0),
            ValidationOutcome::Rejected {
                reason: CorruptionCause::ElementCount {
                    declared: 2,
                    capacity: 1,
                },
                span: Span::new(0, 14),
                advance: 14,
            }
        );
    }

    #[test]
    fn element_count_is_a_product() {
        // 1 cell of 2 beams declared in the 4 byte payload
        let spec = ElementSpec {
            count: IntField::new(10, 1, Endian::Little),
            per_count: Some(IntField::new(12, 1, Endian::Little)),
            data_offset: 10,
            element_size: 1,
        };
        let v = split(HeaderFailurePolicy::Halt, Some(spec));
        let buf = frame();
        assert!(matches!(
            v.validate(&candidate(14), &buf, 0),
            ValidationOutcome::Accepted(_)
        ));

        let spec = ElementSpec {
            element_size: 3,
            ..spec
        };
        let v = split(HeaderFailurePolicy::Halt, Some(spec));
        assert!(matches!(
            v.validate(&candidate(14), &buf, 0),
            ValidationOutcome::Rejected {
                reason: CorruptionCause::ElementCount {
                    declared: 2,
                    capacity: 1,
                },
                ..
            }
        ));
    }
}
