use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::decoder::FormatId;
use crate::framing::{GroupTracker, RecordKind};
use crate::prelude::*;
use crate::rollover::RolloverCounter;

/// Everything needed to continue scanning from a record boundary.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub(crate) struct Checkpoint {
    /// Absolute input offset scanning continues from.
    pub cursor: u64,
    pub groups: GroupTracker,
    /// Counters keyed by field name.
    pub counters: BTreeMap<String, RolloverCounter>,
    /// Detail records of an abandoned group, dropped until the next unrelated record.
    pub discard: Option<RecordKind>,
    /// Records counted so far by a sample clock.
    pub samples: u32,
    /// A header checksum failure stopped parsing.
    pub halted: bool,
    /// No further input will be scanned.
    pub finished: bool,
}

impl Checkpoint {
    pub(crate) fn at(cursor: u64) -> Self {
        Checkpoint {
            cursor,
            ..Default::default()
        }
    }
}

/// Resumable position of a [ParserSession](super::ParserSession).
///
/// Callers should treat this as a black box. The byte form produced by
/// [OpaqueState::to_bytes] is not a wire format and carries no compatibility guarantee
/// across versions of this crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpaqueState {
    pub(crate) format: FormatId,
    pub(crate) checkpoint: Checkpoint,
}

impl OpaqueState {
    /// Input offset parsing resumes from.
    #[must_use]
    pub fn cursor(&self) -> u64 {
        self.checkpoint.cursor
    }

    #[must_use]
    pub fn format(&self) -> FormatId {
        self.format
    }

    /// # Errors
    /// [Error::Snapshot] if the state cannot be serialized.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|err| Error::Snapshot(err.to_string()))
    }

    /// # Errors
    /// [Error::Snapshot] if `dat` was not produced by [OpaqueState::to_bytes].
    pub fn from_bytes(dat: &[u8]) -> Result<Self> {
        serde_json::from_slice(dat).map_err(|err| Error::Snapshot(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_roundtrip() {
        let mut checkpoint = Checkpoint::at(42);
        checkpoint
            .counters
            .insert("timer".to_string(), RolloverCounter::new(7));
        checkpoint.discard = Some(RecordKind::DiagnosticData);
        let state = OpaqueState {
            format: FormatId::MotionPak,
            checkpoint,
        };
        let restored = OpaqueState::from_bytes(&state.to_bytes().unwrap()).unwrap();
        assert_eq!(restored, state);
        assert_eq!(restored.cursor(), 42);
    }

    #[test]
    fn garbage_is_a_snapshot_error() {
        assert!(matches!(
            OpaqueState::from_bytes(b"\x00\x01"),
            Err(Error::Snapshot(_))
        ));
    }
}
