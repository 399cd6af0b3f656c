//! The public façade: a resumable, pull-based parse of one input.
//!
//! A [ParserSession] owns a [Source] and a resolved format. Each call to
//! [ParserSession::fetch] pulls input only until enough records are queued, so memory
//! stays bounded by roughly one block plus one frame.
mod state;
mod summary;

use std::collections::VecDeque;

use tracing::{debug, trace, warn};

pub use state::OpaqueState;
pub use summary::Summary;

use state::Checkpoint;

use crate::config::{Format, FormatConfig, HeaderFailurePolicy};
use crate::decoder::{DecodeError, DecodeResult, DecodedRecord};
use crate::diagnostic::{CorruptionCause, CorruptionEvent, CounterReset, Diagnostic, Span};
use crate::framing::{RawFrame, RecordKind, ResyncEngine, Scan, ValidationOutcome};
use crate::prelude::*;
use crate::rollover::{RolloverCounter, Tick};
use crate::source::Source;

/// Records and diagnostics returned by one [ParserSession::fetch].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Batch {
    /// Decoded records in input order.
    pub records: Vec<DecodedRecord>,
    /// Diagnostics in input order, each released with the records that follow it.
    pub diagnostics: Vec<Diagnostic>,
}

impl Batch {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.diagnostics.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Input remains to be scanned.
    Running,
    /// All input is scanned; queued output remains.
    Draining,
    /// Nothing remains. Terminal.
    Exhausted,
}

/// Receives each emitted record along with the state to resume from after it.
pub trait Publisher {
    /// # Errors
    /// Whatever the publisher cannot deliver; draining stops at the first error.
    fn publish(&mut self, record: DecodedRecord, marker: &OpaqueState) -> Result<()>;
}

impl<F> Publisher for F
where
    F: FnMut(DecodedRecord, &OpaqueState) -> Result<()>,
{
    fn publish(&mut self, record: DecodedRecord, marker: &OpaqueState) -> Result<()> {
        self(record, marker)
    }
}

enum Entry {
    // the checkpoint after the record
    Record(DecodedRecord, Box<Checkpoint>),
    Diagnostic(Diagnostic),
}

/// The record closing the input, read before scanning starts.
struct Trailer {
    frame: RawFrame,
    kind: RecordKind,
    record: DecodeResult<DecodedRecord>,
}

/// Read the configured trailer, leaving `source` where it was.
fn read_trailer<S: Source>(source: &mut S, format: &Format) -> Result<Option<Trailer>> {
    let Some(spec) = &format.envelope.trailer else {
        return Ok(None);
    };
    let Some(size) = source.size()? else {
        warn!(format = %format.id(), "input length unknown, trailer not read");
        return Ok(None);
    };
    let len = spec.len as u64;
    if size < format.envelope.header_len as u64 + len {
        debug!(size, "input too short to hold a trailer");
        return Ok(None);
    }
    let offset = size - len;
    let resume_at = source.tell();
    source.seek(offset)?;
    let bytes = source.read(spec.len)?;
    source.seek(resume_at)?;
    if bytes.len() < spec.len {
        return Ok(None);
    }

    let frame = RawFrame {
        offset,
        length: u32::try_from(spec.len).unwrap_or(u32::MAX),
        bytes,
    };
    let record = format.decoder.decode(&frame, spec.kind);
    debug!(offset, kind = %spec.kind, ok = record.is_ok(), "read trailer");
    Ok(Some(Trailer {
        frame,
        kind: spec.kind,
        record,
    }))
}

fn decode_failure(kind: RecordKind, err: DecodeError) -> CorruptionCause {
    let message = err.to_string();
    match err {
        DecodeError::Structural(_) => CorruptionCause::DecodeStructural { kind, message },
        DecodeError::Range { .. } => CorruptionCause::DecodeRange { kind, message },
    }
}

/// Parses one input incrementally.
///
/// # Example
/// ```
/// use std::io::Cursor;
/// use recframe::{FormatId, ParserSession, ReaderSource};
///
/// let input = b"2014/06/15 12:30:45.250 1.5 2.5\n2014/06/15 12:30:46.250 1.6 2.4\n";
/// let source = ReaderSource::new(Cursor::new(input.to_vec()));
/// let mut session = ParserSession::new(source, &FormatId::Dcl.default_config()).unwrap();
///
/// let batch = session.fetch(10).unwrap();
/// assert_eq!(batch.records.len(), 2);
/// assert!(batch.diagnostics.is_empty());
/// ```
pub struct ParserSession<S: Source> {
    source: S,
    format: Format,

    // Unconsumed input; `buf[pos]` is the byte at the scan cursor, `buf[0]` is at `base`.
    buf: Vec<u8>,
    base: u64,
    pos: usize,
    eof: bool,
    // End of the framed records when a trailer closes the input.
    limit: Option<u64>,
    trailer: Option<Trailer>,

    resync: ResyncEngine,
    scan: Checkpoint,
    // Checkpoint after the last emitted record.
    emitted: Checkpoint,

    queue: VecDeque<Entry>,
    queued_records: usize,
    // A group header waiting for the time of its first detail, and what followed it.
    held: Vec<Entry>,
    held_detail: Option<RecordKind>,
    summary: Summary,
}

impl<S: Source> ParserSession<S> {
    /// Start parsing `source` from its current position.
    ///
    /// When the format closes its input with a trailer, the end of `source` is read
    /// first.
    ///
    /// # Errors
    /// [Error::Config] if `config` is invalid; no session is created. [Error::Io] if
    /// the trailer cannot be read.
    pub fn new(mut source: S, config: &FormatConfig) -> Result<Self> {
        let format = config.resolve()?;
        let start = Checkpoint::at(source.tell());
        let trailer = read_trailer(&mut source, &format)?;
        Ok(Self::with_checkpoint(source, format, start, trailer))
    }

    /// Continue parsing from a state taken by [ParserSession::snapshot] of a session
    /// over the same content.
    ///
    /// # Errors
    /// [Error::Config] if `config` is invalid, [Error::Snapshot] if `state` was taken
    /// for a different format, or [Error::Io] if `source` cannot seek to the saved
    /// position.
    pub fn resume(mut source: S, config: &FormatConfig, state: OpaqueState) -> Result<Self> {
        let format = config.resolve()?;
        if state.format != format.id() {
            return Err(Error::Snapshot(format!(
                "state was taken for {}, not {}",
                state.format,
                format.id()
            )));
        }
        source.seek(state.checkpoint.cursor)?;
        let trailer = read_trailer(&mut source, &format)?;
        debug!(format = %format.id(), cursor = state.checkpoint.cursor, "resuming");
        Ok(Self::with_checkpoint(source, format, state.checkpoint, trailer))
    }

    fn with_checkpoint(
        source: S,
        format: Format,
        checkpoint: Checkpoint,
        trailer: Option<Trailer>,
    ) -> Self {
        let capacity = format.block_size + format.max_frame_len;
        ParserSession {
            source,
            buf: Vec::with_capacity(capacity.min(1 << 20)),
            base: checkpoint.cursor,
            pos: 0,
            eof: checkpoint.finished,
            limit: trailer.as_ref().map(|t| t.frame.offset),
            trailer,
            format,
            resync: ResyncEngine::new(),
            scan: checkpoint.clone(),
            emitted: checkpoint,
            queue: VecDeque::new(),
            queued_records: 0,
            held: Vec::default(),
            held_detail: None,
            summary: Summary::default(),
        }
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        match (self.scan.finished, self.queue.is_empty()) {
            (false, _) => Phase::Running,
            (true, false) => Phase::Draining,
            (true, true) => Phase::Exhausted,
        }
    }

    /// Whether a header checksum failure stopped parsing.
    #[must_use]
    pub fn halted(&self) -> bool {
        self.scan.halted
    }

    /// Statistics on what this session has emitted.
    #[must_use]
    pub fn summary(&self) -> &Summary {
        &self.summary
    }

    /// State to resume from after the last record returned so far.
    #[must_use]
    pub fn snapshot(&self) -> OpaqueState {
        OpaqueState {
            format: self.format.id(),
            checkpoint: self.emitted.clone(),
        }
    }

    /// Return up to `n` records, reading only as much input as needed.
    ///
    /// Fewer than `n` records are returned only once input is exhausted. Diagnostics
    /// preceding each returned record are returned with it; the remaining ones are
    /// returned once no records follow them.
    ///
    /// # Errors
    /// [Error::Io] if reading the source fails. Corrupt input is never an error, it is
    /// reported as diagnostics.
    pub fn fetch(&mut self, n: usize) -> Result<Batch> {
        let mut batch = Batch::default();
        if n == 0 {
            return Ok(batch);
        }
        for entry in self.take(n)? {
            match entry {
                Entry::Record(record, _) => batch.records.push(record),
                Entry::Diagnostic(diagnostic) => batch.diagnostics.push(diagnostic),
            }
        }
        Ok(batch)
    }

    /// Fetch everything remaining in batches of `batch_size`, handing each record to
    /// `publisher` with the state to resume from after it. Returns the diagnostics.
    ///
    /// # Errors
    /// [Error::Io] from the source, or the first error returned by `publisher`. Records
    /// published before the error stay published; resume from the last marker.
    pub fn drain_into<P: Publisher>(
        &mut self,
        publisher: &mut P,
        batch_size: usize,
    ) -> Result<Vec<Diagnostic>> {
        let mut diagnostics = Vec::default();
        let batch_size = batch_size.max(1);
        while self.phase() != Phase::Exhausted {
            for entry in self.take(batch_size)? {
                match entry {
                    Entry::Record(record, checkpoint) => {
                        let marker = OpaqueState {
                            format: self.format.id(),
                            checkpoint: *checkpoint,
                        };
                        publisher.publish(record, &marker)?;
                    }
                    Entry::Diagnostic(diagnostic) => diagnostics.push(diagnostic),
                }
            }
        }
        Ok(diagnostics)
    }

    fn take(&mut self, n: usize) -> Result<Vec<Entry>> {
        while self.queued_records < n && !self.scan.finished {
            self.step()?;
        }

        let mut taken = Vec::default();
        let mut records = 0;
        while records < n {
            let Some(entry) = self.queue.pop_front() else {
                break;
            };
            match &entry {
                Entry::Record(record, checkpoint) => {
                    records += 1;
                    self.queued_records -= 1;
                    self.summary.add_record(record);
                    self.emitted = (**checkpoint).clone();
                }
                Entry::Diagnostic(diagnostic) => self.summary.add_diagnostic(diagnostic),
            }
            taken.push(entry);
        }
        // Diagnostics after the last record go out once nothing else can precede them
        if self.scan.finished && self.queued_records == 0 {
            for entry in self.queue.drain(..) {
                if let Entry::Diagnostic(diagnostic) = &entry {
                    self.summary.add_diagnostic(diagnostic);
                }
                taken.push(entry);
            }
            self.emitted = self.scan.clone();
        }
        self.summary.skipped = self.resync.skipped();
        Ok(taken)
    }

    fn cursor(&self) -> u64 {
        self.base + self.pos as u64
    }

    fn available(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn consume(&mut self, len: usize) {
        self.pos = (self.pos + len).min(self.buf.len());
        self.scan.cursor = self.cursor();
    }

    /// Read blocks until at least `need` bytes follow the cursor or input ends.
    fn fill(&mut self, need: usize) -> Result<()> {
        if self.pos > 0 {
            self.buf.drain(..self.pos);
            self.base += self.pos as u64;
            self.pos = 0;
        }
        while self.buf.len() < need && !self.eof {
            let end = self.base + self.buf.len() as u64;
            let max = match self.limit {
                Some(limit) => usize::try_from(limit.saturating_sub(end))
                    .unwrap_or(usize::MAX)
                    .min(self.format.block_size),
                None => self.format.block_size,
            };
            if max == 0 {
                self.eof = true;
                break;
            }
            let block = self.source.read(max)?;
            trace!(offset = end, len = block.len(), "read block");
            if block.len() < max || self.source.at_eof() {
                self.eof = true;
            }
            self.buf.extend_from_slice(&block);
        }
        Ok(())
    }

    fn enqueue(&mut self, entry: Entry) {
        if !self.held.is_empty() {
            self.held.push(entry);
            return;
        }
        if matches!(entry, Entry::Record(..)) {
            self.queued_records += 1;
        }
        self.queue.push_back(entry);
    }

    /// Queue the held header, timed at `time` if given, and everything held after it.
    fn release(&mut self, time: Option<f64>) {
        self.held_detail = None;
        for (i, entry) in std::mem::take(&mut self.held).into_iter().enumerate() {
            let entry = match entry {
                Entry::Record(header, checkpoint) if i == 0 && time.is_some() => {
                    Entry::Record(header.with_timestamp(time), checkpoint)
                }
                entry => entry,
            };
            self.enqueue(entry);
        }
    }

    fn push_diagnostic<D: Into<Diagnostic>>(&mut self, diagnostic: D) {
        let diagnostic = diagnostic.into();
        warn!(severity = ?diagnostic.severity(), span = %diagnostic.span(), ?diagnostic, "diagnostic");
        self.enqueue(Entry::Diagnostic(diagnostic));
    }

    fn push_event(&mut self, event: Option<CorruptionEvent>) {
        if let Some(event) = event {
            self.push_diagnostic(event);
        }
    }

    fn skip(&mut self, len: usize, cause: CorruptionCause) {
        let start = self.cursor();
        let event = self.resync.skip(Span::new(start, start + len as u64), cause);
        self.push_event(event);
        self.consume(len);
    }

    /// Bytes of the file header still ahead of the cursor.
    fn header_remaining(&self) -> usize {
        let header_len = self.format.envelope.header_len as u64;
        usize::try_from(header_len.saturating_sub(self.cursor())).unwrap_or(usize::MAX)
    }

    /// Make one scan decision at the cursor.
    fn step(&mut self) -> Result<()> {
        let offset = self.cursor();
        let eof = self.eof;

        let header = self.header_remaining();
        if header > 0 {
            if self.available() < header && !eof {
                return self.fill(header);
            }
            let len = header.min(self.available());
            if len > 0 {
                trace!(offset, len, "file header");
                self.consume(len);
                return Ok(());
            }
        }

        let scan = self.format.scanner.scan(&self.buf[self.pos..], eof);
        trace!(offset, ?scan, "scan");
        match scan {
            Scan::NeedMoreData(_) if eof => self.finish(),
            Scan::NeedMoreData(need) => self.fill(need)?,
            Scan::Skip { len, cause } => self.skip(len, cause),
            Scan::Ignore(len) => self.consume(len),
            Scan::Candidate(candidate) => {
                let outcome =
                    self.format
                        .validator
                        .validate(&candidate, &self.buf[self.pos..], offset);
                match outcome {
                    ValidationOutcome::NeedMoreData(_) if eof => {
                        // The frame runs past the end of input
                        let available = self.available();
                        self.reject(
                            candidate.kind,
                            CorruptionCause::Truncated {
                                declared: u32::try_from(candidate.len).unwrap_or(u32::MAX),
                                available: u32::try_from(available).unwrap_or(u32::MAX),
                            },
                            Span::new(offset, offset + available as u64),
                            1,
                        );
                    }
                    ValidationOutcome::NeedMoreData(need) => self.fill(need)?,
                    ValidationOutcome::Rejected {
                        reason,
                        span,
                        advance,
                    } => self.reject(candidate.kind, reason, span, advance),
                    ValidationOutcome::Accepted(_) if self.scan.discard == Some(candidate.kind) => {
                        debug!(offset, kind = %candidate.kind, "dropping detail of abandoned group");
                        if self.resync.covers(offset) {
                            let event = self.resync.accept(offset);
                            self.push_event(event);
                        }
                        let cause = CorruptionCause::AbandonedGroup {
                            detail: candidate.kind,
                        };
                        self.skip(candidate.len, cause);
                    }
                    ValidationOutcome::Accepted(frame) => {
                        let event = self.resync.accept(offset);
                        self.push_event(event);
                        self.consume(candidate.len);
                        self.decode(frame, candidate.kind);
                    }
                }
            }
        }
        Ok(())
    }

    fn reject(&mut self, kind: RecordKind, reason: CorruptionCause, span: Span, advance: usize) {
        let header_failure = matches!(reason, CorruptionCause::HeaderChecksum { .. });
        if advance == 0 {
            // Halt: the declared length of this frame cannot be trusted
            self.release(None);
            let event = self.resync.flush();
            self.push_event(event);
            self.push_diagnostic(CorruptionEvent { span, cause: reason });
            self.scan.groups.abandon(&self.format.groups);
            self.scan.halted = true;
            self.scan.finished = true;
            warn!(offset = span.start, %kind, "header checksum failed, parsing halted");
            return;
        }

        if !self.resync.covers(span.start) {
            if header_failure && self.format.header_failure == HeaderFailurePolicy::Resync {
                self.scan.discard = self.scan.groups.abandon(&self.format.groups);
            } else if let Some(mismatch) =
                self.scan.groups.on_rejected(&self.format.groups, kind, span)
            {
                self.push_diagnostic(mismatch);
            }
        }
        let event = self.resync.skip(span, reason);
        self.push_event(event);
        self.consume(advance);
    }

    fn decode(&mut self, frame: RawFrame, kind: RecordKind) {
        let span = Span::new(frame.offset, frame.end());
        let record = match self.format.decoder.decode(&frame, kind) {
            Ok(record) => record,
            Err(err) => {
                debug!(offset = frame.offset, %kind, %err, "decode failed");
                let cause = decode_failure(kind, err);
                if let Some(mismatch) = self.scan.groups.on_rejected(&self.format.groups, kind, span) {
                    self.push_diagnostic(mismatch);
                }
                let event = self.resync.skip(span, cause);
                self.push_event(event);
                return;
            }
        };

        self.scan.discard = None;
        if let Some(mismatch) = self.scan.groups.on_record(&self.format.groups, kind, &frame) {
            self.push_diagnostic(mismatch);
        }
        let record = self.apply_rollover(record, frame.offset);
        let record = self.apply_clock(record, kind);

        let time = if self.held_detail == Some(kind) {
            record.derived_timestamp()
        } else {
            None
        };
        self.release(time);

        trace!(offset = frame.offset, %kind, "record");
        let detail = self.dated_by_detail(kind, &record);
        let entry = Entry::Record(record, Box::new(self.scan.clone()));
        match detail {
            Some(detail) => {
                self.held_detail = Some(detail);
                self.held.push(entry);
            }
            None => self.enqueue(entry),
        }
    }

    /// Detail kind whose first record dates this undated group header.
    fn dated_by_detail(&self, kind: RecordKind, record: &DecodedRecord) -> Option<RecordKind> {
        if record.derived_timestamp().is_some() {
            return None;
        }
        self.format
            .groups
            .iter()
            .find(|g| g.header == kind && g.header_time_from_detail)
            .map(|g| g.detail)
    }

    /// Time the record by sample count from the trailer, if the format dates it that way.
    fn apply_clock(&mut self, record: DecodedRecord, kind: RecordKind) -> DecodedRecord {
        let Some(clock) = self
            .format
            .envelope
            .trailer
            .as_ref()
            .and_then(|t| t.clock.as_ref())
        else {
            return record;
        };
        let Some(start) = self
            .trailer
            .as_ref()
            .and_then(|t| t.record.as_ref().ok())
            .and_then(DecodedRecord::derived_timestamp)
        else {
            return record;
        };
        let ts = start + f64::from(self.scan.samples) * clock.interval;
        if clock.sampled.contains(&kind) {
            self.scan.samples = self.scan.samples.saturating_add(1);
        }
        record.with_timestamp(Some(ts))
    }

    /// Derive the record time from its counter field, if the format has one.
    fn apply_rollover(&mut self, record: DecodedRecord, offset: u64) -> DecodedRecord {
        let Some((spec, cfg)) = &self.format.rollover else {
            return record;
        };
        let Some(value) = record.get(spec.field).and_then(|v| v.as_u64()) else {
            return record;
        };
        let counter = self
            .scan
            .counters
            .entry(spec.field.to_string())
            .or_insert_with(|| RolloverCounter::new(value));
        match counter.observe(value, spec, cfg) {
            Tick::Time(ts) => record.with_timestamp(Some(ts)),
            Tick::Lost => record.with_timestamp(None),
            Tick::Reset { previous } => {
                let reset = CounterReset {
                    field: spec.field.to_string(),
                    offset,
                    previous,
                    value,
                };
                self.push_diagnostic(reset);
                record.with_timestamp(None)
            }
        }
    }

    /// Close out at end of input.
    fn finish(&mut self) {
        self.release(None);
        let eof = self.cursor() + self.available() as u64;
        let tail = (self.available() > 0).then(|| Span::new(self.cursor(), eof));
        for event in self.resync.finish(eof, tail) {
            self.push_diagnostic(event);
        }
        if let Some(mismatch) = self.scan.groups.close(&self.format.groups) {
            self.push_diagnostic(mismatch);
        }
        self.consume(self.available());
        self.scan.finished = true;

        let trailer = self.trailer.as_ref().map(|t| {
            let span = Span::new(t.frame.offset, t.frame.end());
            (span, t.kind, t.record.clone())
        });
        match trailer {
            Some((_, _, Ok(record))) => {
                let checkpoint = Box::new(self.scan.clone());
                self.enqueue(Entry::Record(record, checkpoint));
            }
            Some((span, kind, Err(err))) => {
                let cause = decode_failure(kind, err);
                self.push_diagnostic(CorruptionEvent { span, cause });
            }
            None => {}
        }
        debug!(
            format = %self.format.id(),
            eof,
            skipped = self.resync.skipped(),
            "input exhausted"
        );
    }
}
