use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::decoder::DecodedRecord;
use crate::diagnostic::{Diagnostic, Severity};
use crate::framing::RecordKind;

/// Tracks stats on what a session has emitted.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub records: usize,
    pub diagnostics: usize,
    /// Input bytes dropped while resynchronizing.
    pub skipped: u64,
    pub kinds: HashMap<RecordKind, usize>,
    pub severities: HashMap<Severity, usize>,
    /// Records emitted without a derived timestamp.
    pub untimed: usize,
}

impl Summary {
    pub fn add_record(&mut self, record: &DecodedRecord) {
        self.records += 1;
        *self.kinds.entry(record.kind()).or_default() += 1;
        if record.derived_timestamp().is_none() {
            self.untimed += 1;
        }
    }

    pub fn add_diagnostic(&mut self, diagnostic: &Diagnostic) {
        self.diagnostics += 1;
        *self.severities.entry(diagnostic.severity()).or_default() += 1;
    }
}
