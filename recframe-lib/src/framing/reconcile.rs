use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{IntField, RawFrame, RecordKind};
use crate::diagnostic::{ReconciliationMismatch, Span};

/// A header record kind declaring how many detail records follow it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSpec {
    pub header: RecordKind,
    pub detail: RecordKind,
    /// Where the header frame stores the declared detail count.
    pub count: IntField,
    /// Expected count when the header is invalid or missing. `None` disables
    /// reconciliation of such groups.
    #[serde(default)]
    pub default_expected: Option<u32>,
    /// The header has no clock of its own and takes the time of its first detail.
    #[serde(default)]
    pub header_time_from_detail: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReconciliationCounter {
    pub expected: Option<u32>,
    pub observed: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct OpenGroup {
    spec: usize,
    counter: ReconciliationCounter,
    declared: bool,
    span: Span,
}

/// Tracks the open header/detail group and reports count mismatches when it closes.
///
/// A group opens on a header, on a rejected header (with the default count), or on a
/// detail record with no open group (also with the default count). It closes on any
/// unrelated record, a new header, or end of input.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GroupTracker {
    open: Option<OpenGroup>,
}

impl GroupTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn counter(&self) -> Option<ReconciliationCounter> {
        self.open.as_ref().map(|g| g.counter)
    }

    /// A record of `kind` was decoded from `frame`.
    pub fn on_record(
        &mut self,
        specs: &[GroupSpec],
        kind: RecordKind,
        frame: &RawFrame,
    ) -> Option<ReconciliationMismatch> {
        let span = Span::new(frame.offset, frame.end());
        if let Some(index) = specs.iter().position(|g| g.header == kind) {
            let closed = self.close(specs);
            let declared = specs[index].count.read(&frame.bytes);
            self.open = Some(OpenGroup {
                spec: index,
                counter: ReconciliationCounter {
                    expected: declared.or(specs[index].default_expected),
                    observed: 0,
                },
                declared: declared.is_some(),
                span,
            });
            return closed;
        }

        if let Some(open) = &mut self.open {
            if specs[open.spec].detail == kind {
                open.counter.observed += 1;
                open.span.end = span.end;
                return None;
            }
        }

        if let Some(index) = specs.iter().position(|g| g.detail == kind) {
            debug!(offset = frame.offset, %kind, "detail record without a header");
            let closed = self.close(specs);
            self.open = Some(OpenGroup {
                spec: index,
                counter: ReconciliationCounter {
                    expected: specs[index].default_expected,
                    observed: 1,
                },
                declared: false,
                span,
            });
            return closed;
        }

        self.close(specs)
    }

    /// A candidate of `kind` covering `span` was rejected. A rejected header still opens
    /// a group, expecting the default count.
    pub fn on_rejected(
        &mut self,
        specs: &[GroupSpec],
        kind: RecordKind,
        span: Span,
    ) -> Option<ReconciliationMismatch> {
        let index = specs.iter().position(|g| g.header == kind)?;
        let closed = self.close(specs);
        self.open = Some(OpenGroup {
            spec: index,
            counter: ReconciliationCounter {
                expected: specs[index].default_expected,
                observed: 0,
            },
            declared: false,
            span,
        });
        closed
    }

    /// Drop the open group without reconciling it, returning the kind of its detail
    /// records.
    pub fn abandon(&mut self, specs: &[GroupSpec]) -> Option<RecordKind> {
        let group = self.open.take()?;
        debug!(span = %group.span, "abandoned group");
        Some(specs[group.spec].detail)
    }

    /// Close the open group, reporting a mismatch if its counts disagree.
    pub fn close(&mut self, specs: &[GroupSpec]) -> Option<ReconciliationMismatch> {
        let group = self.open.take()?;
        let expected = group.counter.expected?;
        if expected == group.counter.observed {
            return None;
        }
        let spec = &specs[group.spec];
        Some(ReconciliationMismatch {
            header: spec.header,
            detail: spec.detail,
            expected,
            observed: group.counter.observed,
            declared: group.declared,
            span: group.span,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::Endian;

    fn specs() -> Vec<GroupSpec> {
        vec![GroupSpec {
            header: RecordKind::DiagnosticHeader,
            detail: RecordKind::DiagnosticData,
            count: IntField::new(4, 2, Endian::Little),
            default_expected: Some(20),
            header_time_from_detail: false,
        }]
    }

    fn frame(offset: u64, bytes: &[u8]) -> RawFrame {
        RawFrame {
            offset,
            length: bytes.len() as u32,
            bytes: bytes.to_vec(),
        }
    }

    fn header(offset: u64, count: u16) -> RawFrame {
        let [lo, hi] = count.to_le_bytes();
        frame(offset, &[0xa5, 0x06, 0x12, 0x00, lo, hi, 0, 0])
    }

    #[test]
    fn expected_five_observed_three() {
        let specs = specs();
        let mut tracker = GroupTracker::new();
        assert!(tracker
            .on_record(&specs, RecordKind::DiagnosticHeader, &header(0, 5))
            .is_none());
        for i in 0..3 {
            let detail = frame(8 + i * 4, &[0; 4]);
            assert!(tracker
                .on_record(&specs, RecordKind::DiagnosticData, &detail)
                .is_none());
        }
        let mismatch = tracker
            .on_record(&specs, RecordKind::Velocity, &frame(20, &[0; 4]))
            .expect("unrelated record closes the group");
        assert_eq!(mismatch.expected, 5);
        assert_eq!(mismatch.observed, 3);
        assert!(mismatch.declared);
        assert_eq!(mismatch.span, Span::new(0, 20));
        assert!(tracker.counter().is_none());
    }

    #[test]
    fn matching_count_is_silent() {
        let specs = specs();
        let mut tracker = GroupTracker::new();
        tracker.on_record(&specs, RecordKind::DiagnosticHeader, &header(0, 2));
        tracker.on_record(&specs, RecordKind::DiagnosticData, &frame(8, &[0; 4]));
        tracker.on_record(&specs, RecordKind::DiagnosticData, &frame(12, &[0; 4]));
        assert!(tracker.close(&specs).is_none());
    }

    #[test]
    fn rejected_header_uses_default() {
        let specs = specs();
        let mut tracker = GroupTracker::new();
        tracker.on_rejected(&specs, RecordKind::DiagnosticHeader, Span::new(0, 36));
        tracker.on_record(&specs, RecordKind::DiagnosticData, &frame(36, &[0; 4]));
        let mismatch = tracker.close(&specs).unwrap();
        assert_eq!(mismatch.expected, 20);
        assert_eq!(mismatch.observed, 1);
        assert!(!mismatch.declared);
    }

    #[test]
    fn orphan_detail_opens_default_group() {
        let specs = specs();
        let mut tracker = GroupTracker::new();
        tracker.on_record(&specs, RecordKind::DiagnosticData, &frame(0, &[0; 4]));
        assert_eq!(
            tracker.counter(),
            Some(ReconciliationCounter {
                expected: Some(20),
                observed: 1
            })
        );
    }

    #[test]
    fn new_header_closes_previous_group() {
        let specs = specs();
        let mut tracker = GroupTracker::new();
        tracker.on_record(&specs, RecordKind::DiagnosticHeader, &header(0, 1));
        let mismatch = tracker
            .on_record(&specs, RecordKind::DiagnosticHeader, &header(8, 1))
            .unwrap();
        assert_eq!((mismatch.expected, mismatch.observed), (1, 0));
    }

    #[test]
    fn no_default_means_no_report() {
        let mut specs = specs();
        specs[0].default_expected = None;
        let mut tracker = GroupTracker::new();
        tracker.on_rejected(&specs, RecordKind::DiagnosticHeader, Span::new(0, 36));
        assert!(tracker.close(&specs).is_none());
    }

    #[test]
    fn abandoned_group_is_not_reported() {
        let specs = specs();
        let mut tracker = GroupTracker::new();
        tracker.on_record(&specs, RecordKind::DiagnosticHeader, &header(0, 4));
        assert_eq!(tracker.abandon(&specs), Some(RecordKind::DiagnosticData));
        assert!(tracker.close(&specs).is_none());
        assert_eq!(tracker.abandon(&specs), None);
    }
}
