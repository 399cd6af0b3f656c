//! Diagnostics reported alongside decoded records.
//!
//! Nothing here is an error in the [crate::Error] sense: each value explains a place
//! where input had to be skipped or flagged while parsing carried on.
use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::framing::RecordKind;

/// Half-open byte range `[start, end)` of the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: u64,
    pub end: u64,
}

impl Span {
    #[must_use]
    pub fn new(start: u64, end: u64) -> Self {
        Span { start, end }
    }

    #[must_use]
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn contains(&self, offset: u64) -> bool {
        self.start <= offset && offset < self.end
    }
}

impl Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// The affected bytes or record were dropped; parsing continued right after them.
    Recoverable,
    /// Trust in the surrounding group was lost.
    FatalToGroup,
    /// Nothing was dropped that could have been decoded.
    Informational,
}

/// What was wrong with the first byte of a run of unframeable bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FramingFault {
    InvalidSync,
    UnknownKind,
    InvalidLength,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cause", rename_all = "snake_case")]
pub enum CorruptionCause {
    /// A run of bytes where no frame could begin.
    Framing { fault: FramingFault },
    /// A frame header declared more bytes than the input holds.
    Truncated { declared: u32, available: u32 },
    PayloadChecksum { stored: Option<u32>, computed: u32 },
    HeaderChecksum { stored: u32, computed: u32 },
    /// The frame declares more elements than its payload can hold.
    ElementCount { declared: u32, capacity: u32 },
    /// Text that matched neither a record nor a benign pattern.
    UnexpectedData,
    DecodeStructural { kind: RecordKind, message: String },
    DecodeRange { kind: RecordKind, message: String },
    /// Unexplained bytes at end of input.
    TrailingData,
    /// Intact detail records of a group whose header failed its checksum.
    AbandonedGroup { detail: RecordKind },
}

impl CorruptionCause {
    #[must_use]
    pub fn severity(&self) -> Severity {
        match self {
            CorruptionCause::HeaderChecksum { .. } | CorruptionCause::AbandonedGroup { .. } => {
                Severity::FatalToGroup
            }
            CorruptionCause::TrailingData => Severity::Informational,
            _ => Severity::Recoverable,
        }
    }

    /// Whether skips with this cause accumulate into runs rather than claim a region.
    pub(crate) fn is_run(&self) -> bool {
        self.is_unframed() || matches!(self, CorruptionCause::AbandonedGroup { .. })
    }

    /// Bytes where no record could be framed at all.
    pub(crate) fn is_unframed(&self) -> bool {
        matches!(
            self,
            CorruptionCause::Framing { .. } | CorruptionCause::UnexpectedData
        )
    }

    /// Whether a contiguous run of skips with this cause may be reported as one event.
    pub(crate) fn merges_with(&self, other: &CorruptionCause) -> bool {
        match (self, other) {
            (CorruptionCause::Framing { .. }, CorruptionCause::Framing { .. })
            | (CorruptionCause::UnexpectedData, CorruptionCause::UnexpectedData) => true,
            (
                CorruptionCause::AbandonedGroup { detail },
                CorruptionCause::AbandonedGroup { detail: other },
            ) => detail == other,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorruptionEvent {
    pub span: Span,
    pub cause: CorruptionCause,
}

/// Declared and observed detail record counts of a group disagree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationMismatch {
    pub header: RecordKind,
    pub detail: RecordKind,
    pub expected: u32,
    pub observed: u32,
    /// False when `expected` is the configured default because the header was invalid
    /// or missing.
    pub declared: bool,
    pub span: Span,
}

/// A rolling counter went backwards by more than a wrap can explain. Records from here
/// on carry no derived timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterReset {
    pub field: String,
    pub offset: u64,
    pub previous: u64,
    pub value: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, derive_more::From)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Diagnostic {
    Corruption(CorruptionEvent),
    Reconciliation(ReconciliationMismatch),
    CounterReset(CounterReset),
}

impl Diagnostic {
    #[must_use]
    pub fn severity(&self) -> Severity {
        match self {
            Diagnostic::Corruption(event) => event.cause.severity(),
            Diagnostic::Reconciliation(_) | Diagnostic::CounterReset(_) => {
                Severity::Informational
            }
        }
    }

    #[must_use]
    pub fn span(&self) -> Span {
        match self {
            Diagnostic::Corruption(event) => event.span,
            Diagnostic::Reconciliation(mismatch) => mismatch.span,
            Diagnostic::CounterReset(reset) => Span::new(reset.offset, reset.offset),
        }
    }

    #[must_use]
    pub fn corruption(&self) -> Option<&CorruptionEvent> {
        match self {
            Diagnostic::Corruption(event) => Some(event),
            _ => None,
        }
    }
}
